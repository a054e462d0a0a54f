use crate::modules::logger::file::setup_file_logger;
use crate::modules::settings::cli::SETTINGS;
use chrono::Local;
use tracing::Level;
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};

mod file;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Where log output lands, resolved from settings once at startup. The JSON
/// flag applies to either sink; ANSI only to the plain stdout format.
enum LogTarget {
    Stdout,
    StdoutJson,
    File,
}

fn resolve_target() -> LogTarget {
    if SETTINGS.postroom_log_to_file {
        LogTarget::File
    } else if SETTINGS.postroom_json_logs {
        LogTarget::StdoutJson
    } else {
        LogTarget::Stdout
    }
}

pub fn initialize_logging() {
    let level = parse_level(&SETTINGS.postroom_log_level);
    let installed = match resolve_target() {
        LogTarget::File => setup_file_logger(level),
        LogTarget::StdoutJson => setup_json_stdout_logger(level),
        LogTarget::Stdout => setup_stdout_logger(level),
    };
    installed.expect("failed to install the global tracing subscriber");
}

fn parse_level(value: &str) -> Level {
    value.parse::<Level>().unwrap_or_else(|_| {
        eprintln!(
            "Invalid log level '{}'. Use one of: error, warn, info, debug, trace.",
            value
        );
        std::process::exit(1);
    })
}

fn setup_stdout_logger(level: Level) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let format = tracing_subscriber::fmt::format()
        .with_level(true)
        .with_target(true)
        .with_timer(LocalTimer);

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_ansi(SETTINGS.postroom_ansi_logs)
        .with_writer(std::io::stdout)
        .event_format(format)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

fn setup_json_stdout_logger(
    level: Level,
) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(level)
        .with_writer(std::io::stdout)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::parse_level;
    use tracing::Level;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("Warn"), Level::WARN);
    }
}
