//! Helper utilities, functions, and macros.

#[macro_use]
mod print;

#[macro_use]
mod config;

mod error;
mod hash;

pub use error::PegasusError;
pub use hash::{compute_keyhash, djb2_hash, KeyHash, KEYHASH_MASK};
pub use print::{logger_init, me_prefix, ME};
