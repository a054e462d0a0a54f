// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::{LazyLock, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    modules::{
        account::entity::Account,
        common::cancel::CancelToken,
        context::executors::MAIL_CONTEXT,
        envelope::entity::EmailEnvelope,
        error::{code::ErrorCode, PostroomResult},
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        imap::MailGateway,
        indexer,
        mailbox::entity::Folder,
        outbound::{bounce, pipeline, sentlog::SentLog},
        scheduler::periodic::{Driver, DriverHandle},
        settings::cli::SETTINGS,
        snooze,
        sync::{flow::sync_account, purge::purge_folder},
    },
    utc_now,
};

pub mod periodic;

/// Convention for the periodic drivers: `start` spawns the driver and hands
/// back its handle for the shutdown drain.
pub trait PostroomTask {
    fn start() -> DriverHandle;
}

/// Handles of every running driver, kept so shutdown can drain in-flight
/// ticks instead of abandoning them.
static DRIVERS: LazyLock<Mutex<Vec<DriverHandle>>> = LazyLock::new(|| Mutex::new(Vec::new()));

pub struct PeriodicTasks;

impl PeriodicTasks {
    pub fn start_background_tasks() {
        let mut drivers = DRIVERS.lock().expect("driver registry poisoned");
        drivers.push(SyncTask::start());
        drivers.push(PurgeTask::start());
        drivers.push(SendTask::start());
        drivers.push(SnoozeTask::start());
        drivers.push(BounceTask::start());
        drivers.push(IndexerTask::start());
        drivers.push(RetentionTask::start());
    }

    /// Stops every driver and waits for quiescence. Called once on shutdown
    /// after the signal fires; safe to call when nothing was started.
    pub async fn stop_all() {
        let handles: Vec<DriverHandle> = {
            let mut drivers = DRIVERS.lock().expect("driver registry poisoned");
            drivers.drain(..).collect()
        };
        let count = handles.len();
        for handle in handles {
            handle.stop().await;
        }
        if count > 0 {
            info!("All {} background drivers drained", count);
        }
    }
}

async fn enabled_accounts() -> PostroomResult<Vec<Account>> {
    Ok(Account::list_all()
        .await?
        .into_iter()
        .filter(|a| a.enabled)
        .collect())
}

/// Periodic folder synchronization for every enabled account.
struct SyncTask;

impl PostroomTask for SyncTask {
    fn start() -> DriverHandle {
        Driver::new(
            "auto-sync",
            Duration::from_secs(SETTINGS.postroom_auto_refresh_seconds),
        )
        .immediate()
        .spawn(|| async {
            for account in enabled_accounts().await? {
                let executor = match MAIL_CONTEXT.imap(account.id).await {
                    Ok(executor) => executor,
                    Err(err) => {
                        warn!("No IMAP executor for {}: {:?}", account.email, err);
                        continue;
                    }
                };
                if !executor.is_connected() {
                    match executor.connect().await {
                        Ok(()) => {
                            EVENT_BUS.publish(MailEvent::new(
                                EventType::Connected,
                                account.id,
                                EventPayload::Connection { reason: None },
                            ));
                        }
                        Err(err) => {
                            EVENT_BUS.publish(MailEvent::new(
                                EventType::ConnectError,
                                account.id,
                                EventPayload::Connection {
                                    reason: Some(err.to_string()),
                                },
                            ));
                            if err.code().is_auth() {
                                let _ = executor.close().await;
                                EVENT_BUS.publish(MailEvent::new(
                                    EventType::Disconnected,
                                    account.id,
                                    EventPayload::Connection {
                                        reason: Some(err.to_string()),
                                    },
                                ));
                            }
                            continue;
                        }
                    }
                }

                let cancel = CancelToken::new();
                match sync_account(&account, executor.as_ref(), &cancel, |outcome| {
                    debug!(
                        "Synced folder '{}': {} new",
                        outcome.folder, outcome.new_emails
                    );
                })
                .await
                {
                    Ok(report) => {
                        if !report.errors.is_empty() {
                            warn!(
                                "Sync of {} finished with {} folder errors",
                                account.email,
                                report.errors.len()
                            );
                        }
                    }
                    Err(err) => warn!("Sync of {} failed: {:?}", account.email, err),
                }
            }
            Ok(())
        })
    }
}

/// Separate reconciliation driver: marks locally-present, server-absent
/// messages deleted. Deliberately not folded into every sync tick.
struct PurgeTask;

impl PostroomTask for PurgeTask {
    fn start() -> DriverHandle {
        Driver::new(
            "purge-reconcile",
            Duration::from_secs(SETTINGS.postroom_auto_refresh_seconds * 5),
        )
        .spawn(|| async {
            if !SETTINGS.postroom_purge_enabled {
                return Ok(());
            }
            for account in enabled_accounts().await? {
                let Ok(executor) = MAIL_CONTEXT.imap(account.id).await else {
                    continue;
                };
                let folders = Folder::list_for_account(account.id).await?;
                for folder in folders.into_iter().filter(|f| f.sync_enabled) {
                    if let Err(err) = purge_folder(&account, executor.as_ref(), &folder.name).await
                    {
                        warn!("Purge of '{}' failed: {:?}", folder.name, err);
                    }
                }
            }
            Ok(())
        })
    }
}

/// Sub-second scan dispatching due scheduled drafts.
struct SendTask;

impl PostroomTask for SendTask {
    fn start() -> DriverHandle {
        Driver::new(
            "scheduled-send",
            Duration::from_millis(SETTINGS.postroom_send_tick_millis),
        )
        .spawn(|| async {
            for account in enabled_accounts().await? {
                let sender = match MAIL_CONTEXT.sender(account.id).await {
                    Ok(sender) => sender,
                    Err(err) => {
                        debug!("No send backend for {}: {:?}", account.email, err);
                        continue;
                    }
                };
                if let Err(err) = pipeline::process_due_drafts(&account, &sender).await {
                    warn!("Send tick for {} failed: {:?}", account.email, err);
                }
            }
            Ok(())
        })
    }
}

/// Wakes snoozed messages whose time has passed.
struct SnoozeTask;

impl PostroomTask for SnoozeTask {
    fn start() -> DriverHandle {
        Driver::new(
            "snooze-wakeup",
            Duration::from_secs(SETTINGS.postroom_snooze_tick_seconds),
        )
        .spawn(|| async {
            snooze::process_due_snoozes().await?;
            Ok(())
        })
    }
}

/// Bounce correlation sweep; idles while nothing is watched.
struct BounceTask;

impl PostroomTask for BounceTask {
    fn start() -> DriverHandle {
        Driver::new(
            "bounce-sweep",
            Duration::from_secs(SETTINGS.postroom_bounce_sweep_seconds),
        )
        .spawn(|| async {
            if !bounce::has_watches() {
                return Ok(());
            }
            for account in enabled_accounts().await? {
                if let Err(err) = pipeline::bounce_sweep(account.id).await {
                    warn!("Bounce sweep for {} failed: {:?}", account.email, err);
                }
            }
            Ok(())
        })
    }
}

/// Drives one indexer batch per tick for accounts whose indexer runs.
struct IndexerTask;

impl PostroomTask for IndexerTask {
    fn start() -> DriverHandle {
        Driver::new(
            "body-indexer",
            Duration::from_secs(SETTINGS.postroom_indexer_tick_seconds),
        )
        .spawn(|| async {
            for account in enabled_accounts().await? {
                if let Err(err) = indexer::process_batch(account.id).await {
                    warn!("Indexer batch for {} failed: {:?}", account.email, err);
                }
            }
            Ok(())
        })
    }
}

/// Moves long-deleted rows to the archive table and prunes the sent log.
struct RetentionTask;

impl PostroomTask for RetentionTask {
    fn start() -> DriverHandle {
        Driver::new(
            "retention-sweep",
            Duration::from_secs(SETTINGS.postroom_retention_sweep_hours * 3600),
        )
        .spawn(|| async {
            let cutoff = utc_now!() - SETTINGS.postroom_retention_days as i64 * 86_400_000;
            match EmailEnvelope::archive_expired(cutoff).await {
                Ok(moved) if moved > 0 => {
                    debug!("Retention archived {} rows", moved);
                }
                Ok(_) => {}
                Err(err) if err.code() == ErrorCode::StateConflict => {
                    debug!("Retention skipped: store busy");
                }
                Err(err) => return Err(err),
            }

            // The sent log outlives the bounce watch window by the same
            // retention span.
            let sent_cutoff = utc_now!() - SETTINGS.postroom_retention_days as i64 * 86_400_000;
            SentLog::prune_older_than(sent_cutoff).await?;
            Ok(())
        })
    }
}
