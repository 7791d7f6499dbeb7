//! Router / load-balancer functionality modules: the shared balancer core,
//! the raw in-network fast path, and the endhost LB application.

mod balancer;
mod datapath;
mod endhost;

pub use balancer::{LoadBalancer, PORT_ZERO};
pub use datapath::{PacketRouter, RouterAction};
pub use endhost::{EndhostLb, RouterConfig};
