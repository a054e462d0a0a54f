// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use clap::{builder::ValueParser, Parser};
use std::{collections::HashSet, path::PathBuf, sync::LazyLock};

#[cfg(not(test))]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::parse);

#[cfg(test)]
pub static SETTINGS: LazyLock<Settings> = LazyLock::new(Settings::new_for_test);

#[derive(Debug, Parser)]
#[clap(
    name = "postroom",
    about = "Offline-first email core: a durable local mirror of remote mailboxes
    with reversible actions, scheduled sending and bounce detection.",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Settings {
    /// postroom log level (default: "info")
    #[clap(long, default_value = "info", env, help = "Set the log level")]
    pub postroom_log_level: String,

    /// Enable ANSI formatted logs
    #[clap(long, default_value = "true", env, help = "Enable ANSI formatted logs")]
    pub postroom_ansi_logs: bool,

    /// Enable log file output; otherwise logs go to stdout
    #[clap(
        long,
        default_value = "false",
        env,
        help = "Enable log file output (otherwise logs go to stdout)"
    )]
    pub postroom_log_to_file: bool,

    /// Enable JSON formatted logs
    #[clap(long, default_value = "false", env, help = "Enable JSON formatted logs")]
    pub postroom_json_logs: bool,

    /// Maximum number of rotated log files kept on disk
    #[clap(
        long,
        default_value = "5",
        env,
        help = "Maximum number of rotated log files"
    )]
    pub postroom_max_log_files: usize,

    /// Root data directory holding the databases and log files
    #[clap(
        long,
        default_value = "./postroom-data",
        env,
        help = "Set the root data directory"
    )]
    pub postroom_root_dir: PathBuf,

    /// Metadata database cache size in bytes
    #[clap(long, env, help = "Cache size for the metadata database in bytes")]
    pub postroom_meta_cache_size: Option<usize>,

    /// Mail database cache size in bytes
    #[clap(long, env, help = "Cache size for the mail database in bytes")]
    pub postroom_mail_cache_size: Option<usize>,

    /// Window of history fetched on the first sync of a folder; 0 means
    /// unbounded up to the per-folder cap
    #[clap(
        long,
        default_value = "30",
        env,
        help = "Days of history fetched on initial folder sync (0 = unbounded)"
    )]
    pub postroom_initial_sync_days: u32,

    /// Hard cap on initial-sync emails per folder
    #[clap(
        long,
        default_value = "500",
        env,
        help = "Maximum emails fetched per folder on initial sync"
    )]
    pub postroom_initial_max_per_folder: u32,

    /// Per-tick fetch cap for incremental sync
    #[clap(
        long,
        default_value = "100",
        env,
        help = "Maximum new emails fetched per incremental sync pass"
    )]
    pub postroom_incremental_batch_size: u32,

    /// Run the purge reconciliation pass
    #[clap(long, default_value = "true", env, help = "Enable the purge pass")]
    pub postroom_purge_enabled: bool,

    /// Local row count above which a purge pass is skipped for the tick
    #[clap(
        long,
        default_value = "10000",
        env,
        help = "Skip purge when a folder holds more local rows than this"
    )]
    pub postroom_purge_guard_threshold: usize,

    /// Undo-send window in seconds
    #[clap(
        long,
        default_value = "15",
        env,
        help = "Grace period between send intent and actual dispatch, in seconds"
    )]
    pub postroom_send_grace_seconds: u64,

    /// Scheduled-send scan interval in milliseconds
    #[clap(
        long,
        default_value = "1000",
        env,
        help = "Interval of the due-draft scan, in milliseconds"
    )]
    pub postroom_send_tick_millis: u64,

    /// Sync tick interval in seconds
    #[clap(
        long,
        default_value = "60",
        env,
        help = "Interval between automatic sync passes, in seconds"
    )]
    pub postroom_auto_refresh_seconds: u64,

    /// Folders included in auto-sync. Empty means the essential defaults:
    /// INBOX plus the canonical Sent and Trash mailboxes.
    #[clap(
        long,
        default_value = "",
        env,
        help = "Comma-separated folder names included in auto-sync",
        value_parser = ValueParser::new(|s: &str| -> Result<HashSet<String>, String> {
            Ok(s.split(',')
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect())
        })
    )]
    pub postroom_sync_folders: HashSet<String>,

    /// Per-send bounce watch duration in minutes
    #[clap(
        long,
        default_value = "5",
        env,
        help = "How long each outbound send is watched for a bounce, in minutes"
    )]
    pub postroom_bounce_watch_minutes: u64,

    /// Bounce sweep interval in seconds
    #[clap(
        long,
        default_value = "30",
        env,
        help = "Interval of the bounce sweep while sends are being watched, in seconds"
    )]
    pub postroom_bounce_sweep_seconds: u64,

    /// Snooze wakeup scan interval in seconds
    #[clap(
        long,
        default_value = "60",
        env,
        help = "Interval of the due-snooze scan, in seconds"
    )]
    pub postroom_snooze_tick_seconds: u64,

    /// Indexer tick interval in seconds
    #[clap(
        long,
        default_value = "2",
        env,
        help = "Interval between indexer batches while the indexer runs, in seconds"
    )]
    pub postroom_indexer_tick_seconds: u64,

    /// Emails indexed per indexer batch
    #[clap(
        long,
        default_value = "50",
        env,
        help = "Number of emails processed per indexer batch"
    )]
    pub postroom_indexer_batch_size: u32,

    /// Days a deleted row stays in the hot table before archival
    #[clap(
        long,
        default_value = "30",
        env,
        help = "Retention of soft-deleted rows before they move to the archive table, in days"
    )]
    pub postroom_retention_days: u32,

    /// Retention sweep interval in hours
    #[clap(
        long,
        default_value = "6",
        env,
        help = "Interval of the retention sweep, in hours"
    )]
    pub postroom_retention_sweep_hours: u64,

    /// Emails examined per attachment-backfill pass
    #[clap(
        long,
        default_value = "50",
        env,
        help = "Window of emails examined per attachment metadata backfill pass"
    )]
    pub postroom_backfill_window: u32,
}

impl Settings {
    #[cfg(test)]
    pub fn new_for_test() -> Self {
        Settings {
            postroom_log_level: "debug".into(),
            postroom_ansi_logs: false,
            postroom_log_to_file: false,
            postroom_json_logs: false,
            postroom_max_log_files: 5,
            postroom_root_dir: std::env::temp_dir().join("postroom-test"),
            postroom_meta_cache_size: None,
            postroom_mail_cache_size: None,
            postroom_initial_sync_days: 30,
            postroom_initial_max_per_folder: 500,
            postroom_incremental_batch_size: 100,
            postroom_purge_enabled: true,
            postroom_purge_guard_threshold: 10000,
            postroom_send_grace_seconds: 15,
            postroom_send_tick_millis: 1000,
            postroom_auto_refresh_seconds: 60,
            postroom_sync_folders: HashSet::new(),
            postroom_bounce_watch_minutes: 5,
            postroom_bounce_sweep_seconds: 30,
            postroom_snooze_tick_seconds: 60,
            postroom_indexer_tick_seconds: 2,
            postroom_indexer_batch_size: 50,
            postroom_retention_days: 30,
            postroom_retention_sweep_hours: 6,
            postroom_backfill_window: 50,
        }
    }
}
