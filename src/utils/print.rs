//! Helper macros for logging (console printing).

use std::sync::OnceLock;

use env_logger::Env;

/// Process-global identity string used as the logging prefix. Set once at
/// startup, e.g. "s0-1" for rack 0 node 1, "lb", "ctrl", or a client ID.
pub static ME: OnceLock<String> = OnceLock::new();

/// Returns the logging prefix string, or a placeholder if not yet set.
pub fn me_prefix() -> &'static str {
    ME.get().map(|s| s.as_str()).unwrap_or("-")
}

/// Initializes the `env_logger` backend the way all executables do.
pub fn logger_init() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_module_path(true)
        .format_target(false)
        .init();
}

/// Log TRACE message with parenthesized prefix.
///
/// Example:
/// ```no_run
/// pf_trace!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! pf_trace {
    ($fmt_str:literal $(, $($fmt_arg:tt)*)?) => {
        log::trace!(concat!("({}) ", $fmt_str),
                    $crate::me_prefix() $(, $($fmt_arg)*)?)
    };
}

/// Log DEBUG message with parenthesized prefix.
#[macro_export]
macro_rules! pf_debug {
    ($fmt_str:literal $(, $($fmt_arg:tt)*)?) => {
        log::debug!(concat!("({}) ", $fmt_str),
                    $crate::me_prefix() $(, $($fmt_arg)*)?)
    };
}

/// Log INFO message with parenthesized prefix.
#[macro_export]
macro_rules! pf_info {
    ($fmt_str:literal $(, $($fmt_arg:tt)*)?) => {
        log::info!(concat!("({}) ", $fmt_str),
                   $crate::me_prefix() $(, $($fmt_arg)*)?)
    };
}

/// Log WARN message with parenthesized prefix.
#[macro_export]
macro_rules! pf_warn {
    ($fmt_str:literal $(, $($fmt_arg:tt)*)?) => {
        log::warn!(concat!("({}) ", $fmt_str),
                   $crate::me_prefix() $(, $($fmt_arg)*)?)
    };
}

/// Log ERROR message with parenthesized prefix.
#[macro_export]
macro_rules! pf_error {
    ($fmt_str:literal $(, $($fmt_arg:tt)*)?) => {
        log::error!(concat!("({}) ", $fmt_str),
                    $crate::me_prefix() $(, $($fmt_arg)*)?)
    };
}

/// Log an error string to logger and then return a `PegasusError`
/// containing the string.
///
/// Example:
/// ```no_run
/// return logged_err!("got {} to print", msg);
/// ```
#[macro_export]
macro_rules! logged_err {
    ($fmt_str:literal $(, $($fmt_arg:tt)*)?) => {{
        $crate::pf_error!($fmt_str $(, $($fmt_arg)*)?);
        Err($crate::PegasusError(
            format!($fmt_str $(, $($fmt_arg)*)?),
        ))
    }};
}
