// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::warn;

use crate::modules::{
    account::entity::Account,
    envelope::{attachment::Attachment, entity::EmailEnvelope},
    error::PostroomResult,
    imap::MailGateway,
    settings::cli::SETTINGS,
};

/// Fills in attachment metadata for mirrored emails whose parts were never
/// recorded. Best effort: a failing email is logged and skipped, the pass
/// continues.
pub async fn backfill_attachments<G: MailGateway>(
    account: &Account,
    gateway: &G,
) -> PostroomResult<usize> {
    let rows = EmailEnvelope::list_for_account(account.id).await?;
    let mut candidates = Vec::new();
    for row in rows {
        if !row.has_attachments || row.flags.deleted {
            continue;
        }
        if Attachment::list_for_email(row.entry_id).await?.is_empty() {
            candidates.push(row);
        }
        if candidates.len() >= SETTINGS.postroom_backfill_window as usize {
            break;
        }
    }

    let mut recorded = 0usize;
    for email in candidates {
        match gateway
            .fetch_attachment_metadata(&email.folder_name, email.uid)
            .await
        {
            Ok((parts, _has_any)) => {
                for meta in &parts {
                    Attachment::from_meta(account.id, email.entry_id, meta)
                        .upsert()
                        .await?;
                    recorded += 1;
                }
            }
            Err(err) => {
                warn!(
                    "Attachment backfill skipped UID {} in '{}': {:?}",
                    email.uid, email.folder_name, err
                );
            }
        }
    }
    Ok(recorded)
}
