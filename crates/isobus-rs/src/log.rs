use alloc::format;
use alloc::string::String;

/// Trait for structs that provide metadata for logging.
pub trait LogMetadata {
    fn meta(&self) -> String;
}

/// Minimal structured context attached to a log line: which component logged
/// it and which CAN port it concerns.
pub struct LogContext {
    pub component: &'static str,
    pub port: u8,
}

impl LogMetadata for LogContext {
    fn meta(&self) -> String {
        format!("component={}, port={}", self.component, self.port)
    }
}

// =============================================
// Logging Macros (namespaced under crate::log)
// =============================================

macro_rules! isobus_info {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::info!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::info!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! isobus_warn {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::warn!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::warn!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! isobus_error {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::error!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::error!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! isobus_debug {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::debug!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::debug!($fmt $(, $($arg)+)?);
    }};
}

macro_rules! isobus_trace {
    ($ctx:expr, $fmt:literal $(, $($arg:tt)+)?) => {{
        let meta = $crate::log::LogMetadata::meta(&$ctx);
        log::trace!(concat!("[{}] ", $fmt), meta $(, $($arg)+)?);
    }};
    ($fmt:literal $(, $($arg:tt)+)?) => {{
        log::trace!($fmt $(, $($arg)+)?);
    }};
}

// Re-export macros for use in other files
pub(crate) use isobus_debug;
pub(crate) use isobus_error;
pub(crate) use isobus_info;
pub(crate) use isobus_trace;
pub(crate) use isobus_warn;
