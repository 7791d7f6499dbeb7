//! Cluster topology: node addresses and the rack layout config grammar.

mod topology;

pub use topology::{NodeAddress, RackTopology, MAX_NUM_NODES};
