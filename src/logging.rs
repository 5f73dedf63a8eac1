use crate::error::{Severity, WsError};

/// Initializes the process-wide logger.
///
/// Everything that reaches the user goes through [`diagnose`] rather than
/// `env_logger`'s own formatting, so the `Error  :`/`Warning:`/`Info   :`
/// prefixes stay exactly as specified regardless of log level filtering;
/// `env_logger` is kept around for `log::debug!`/`log::trace!` tracing
/// that is not part of the user-visible contract.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
}

fn prefix(severity: Severity) -> &'static str {
    match severity {
        Severity::Error => "Error  :",
        Severity::Warning => "Warning:",
        Severity::Info => "Info   :",
    }
}

/// Emits a single line-oriented diagnostic to stderr, per the error
/// handling design: one line, correctly prefixed, no stack traces.
pub fn diagnose(severity: Severity, message: &str) {
    eprintln!("{} {}", prefix(severity), message);
}

pub fn error(message: impl AsRef<str>) {
    diagnose(Severity::Error, message.as_ref());
}

pub fn warning(message: impl AsRef<str>) {
    diagnose(Severity::Warning, message.as_ref());
}

pub fn info(message: impl AsRef<str>) {
    diagnose(Severity::Info, message.as_ref());
}

/// Reports an error with its mapped severity and returns its exit code,
/// for use at the top of `main`.
pub fn report(err: &WsError) -> i32 {
    diagnose(err.severity(), &err.to_string());
    err.exit_code()
}
