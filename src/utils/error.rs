//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;

/// Customized error type for Pegasus-KV.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct PegasusError(pub String);

impl PegasusError {
    /// Creates an error from anything displayable.
    pub fn msg(e: impl fmt::Display) -> Self {
        PegasusError(e.to_string())
    }
}

impl fmt::Display for PegasusError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for PegasusError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `PegasusError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for PegasusError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                PegasusError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(std::num::ParseIntError);
impl_from_error!(std::str::Utf8Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::task::JoinError);
impl_from_error!(tokio::time::error::Elapsed);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = PegasusError("what the heck?".into());
        assert_eq!(format!("{}", e), String::from("what the heck?"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "oh no!");
        let e = PegasusError::from(io_error);
        assert!(e.0.contains("oh no!"));
    }
}
