use crate::modules::logger::LocalTimer;
use crate::modules::settings::cli::SETTINGS;
use crate::modules::settings::dir::DATA_DIR_MANAGER;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub static LOG_WORKER_GUARD: OnceLock<Vec<WorkerGuard>> = OnceLock::new();

/// Daily-rotated file sink under the data directory's `logs/`. Honors the
/// JSON flag; ANSI makes no sense in a file and is always off.
pub fn setup_file_logger(level: Level) -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    let (nonblocking, guard) = core_log_writer();
    LOG_WORKER_GUARD.set(vec![guard]).unwrap();

    if SETTINGS.postroom_json_logs {
        let layer = fmt::layer().json().with_ansi(false).with_writer(nonblocking);
        let subscriber = tracing_subscriber::registry()
            .with(LevelFilter::from_level(level))
            .with(layer);
        return tracing::subscriber::set_global_default(subscriber);
    }

    let layer = fmt::layer()
        .with_timer(LocalTimer)
        .with_ansi(false)
        .with_level(true)
        .with_writer(nonblocking)
        .with_target(true);

    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(layer);

    tracing::subscriber::set_global_default(subscriber)
}

fn core_log_writer() -> (NonBlocking, WorkerGuard) {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("core")
        .max_log_files(SETTINGS.postroom_max_log_files)
        .build(DATA_DIR_MANAGER.logs_dir.clone())
        .expect("failed to initialize rolling file appender");
    tracing_appender::non_blocking(rolling)
}
