// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::{info, warn};

use crate::modules::{
    account::entity::Account,
    common::cancel::CancelToken,
    envelope::{attachment::Attachment, entity::EmailEnvelope, extractor::extract_envelope},
    error::{PostroomError, PostroomResult},
    events::{
        payload::{EventPayload, EventType, MailEvent},
        EVENT_BUS,
    },
    imap::MailGateway,
    mailbox::entity::Folder,
    settings::cli::SETTINGS,
    sync::folders::sync_set,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncOutcome {
    pub folder: String,
    pub new_emails: usize,
    pub initial: bool,
}

/// Per-folder results of a sync-all pass. Folder failures do not abort the
/// pass; they are collected and the remaining folders still run.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub outcomes: Vec<SyncOutcome>,
    pub errors: Vec<(String, PostroomError)>,
}

/// Synchronizes every folder in the account's sync set, serially per
/// account. Cancellation between folders leaves completed folders
/// committed; `on_progress` observes each finished folder as the pass
/// advances.
pub async fn sync_account<G: MailGateway>(
    account: &Account,
    gateway: &G,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(&SyncOutcome),
) -> PostroomResult<SyncReport> {
    let folders = sync_set(account, gateway).await?;
    let mut report = SyncReport::default();

    for folder in folders {
        cancel.check()?;
        match sync_folder(account, gateway, &folder.name).await {
            Ok(outcome) => {
                on_progress(&outcome);
                report.outcomes.push(outcome);
            }
            Err(err) => {
                warn!("Sync of '{}' failed: {:?}", folder.name, err);
                EVENT_BUS.publish(MailEvent::new(
                    EventType::SyncError,
                    account.id,
                    EventPayload::Sync {
                        folder: folder.name.clone(),
                        new_emails: 0,
                        error: Some(err.to_string()),
                    },
                ));
                report.errors.push((folder.name.clone(), err));
            }
        }
    }
    Ok(report)
}

/// Synchronizes one folder: initial date-bounded fetch when the folder has
/// no local UIDs yet, incremental UID-delta fetch otherwise. The
/// `latest_uid` watermark advances only after every row of the pass is
/// committed.
pub async fn sync_folder<G: MailGateway>(
    account: &Account,
    gateway: &G,
    folder_name: &str,
) -> PostroomResult<SyncOutcome> {
    EVENT_BUS.publish(MailEvent::new(
        EventType::SyncStarted,
        account.id,
        EventPayload::Sync {
            folder: folder_name.into(),
            new_emails: 0,
            error: None,
        },
    ));

    let folder = Folder::upsert_discovered(account.id, folder_name, None, true).await?;
    let selection = gateway.select_mailbox(folder_name).await?;

    // A moved uid-validity voids every local UID in the folder: rewrite.
    if let (Some(stored), Some(current)) = (folder.uid_validity, selection.uid_validity) {
        if stored != current {
            warn!(
                "UID validity of '{}' changed {} -> {}, rewriting folder",
                folder_name, stored, current
            );
            let dropped = EmailEnvelope::drop_folder_rows(folder.id).await?;
            info!("Dropped {} invalidated rows from '{}'", dropped, folder_name);
            Folder::reset_uid_validity(folder.id, current).await?;
        }
    }
    Folder::apply_selection(folder.id, &selection).await?;

    let latest_uid = EmailEnvelope::get_latest_uid(folder.id).await?;
    let initial = latest_uid == 0;

    let fetches = if initial {
        gateway
            .fetch_envelopes_since(
                folder_name,
                SETTINGS.postroom_initial_sync_days,
                SETTINGS.postroom_initial_max_per_folder,
            )
            .await?
    } else {
        gateway
            .fetch_new_envelopes(
                folder_name,
                latest_uid,
                SETTINGS.postroom_incremental_batch_size,
            )
            .await?
    };

    let mut new_emails = 0usize;
    let mut max_uid = latest_uid;
    for fetch in &fetches {
        let envelope = extract_envelope(fetch, account.id, folder_name)?;
        let subject = envelope.subject.clone();
        let from = envelope.from.as_ref().map(|a| a.to_string());
        let outcome = EmailEnvelope::upsert(envelope).await?;

        for meta in &fetch.attachments {
            Attachment::from_meta(account.id, outcome.entry_id, meta)
                .upsert()
                .await?;
        }

        if outcome.inserted {
            new_emails += 1;
            EVENT_BUS.publish(MailEvent::new(
                EventType::NewEmail,
                account.id,
                EventPayload::NewEmail {
                    folder: folder_name.into(),
                    uid: fetch.uid,
                    subject,
                    from,
                },
            ));
        }
        max_uid = max_uid.max(fetch.uid);
    }

    // Watermark moves only now, after the whole batch is committed.
    Folder::advance_latest_uid(folder.id, max_uid).await?;

    info!(
        "Synced '{}' for {}: {} new ({} fetched, initial={})",
        folder_name,
        account.email,
        new_emails,
        fetches.len(),
        initial
    );
    EVENT_BUS.publish(MailEvent::new(
        EventType::SyncCompleted,
        account.id,
        EventPayload::Sync {
            folder: folder_name.into(),
            new_emails,
            error: None,
        },
    ));

    Ok(SyncOutcome {
        folder: folder_name.into(),
        new_emails,
        initial,
    })
}
