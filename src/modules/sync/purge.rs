// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashSet;
use tracing::{debug, info};

use crate::modules::{
    account::entity::Account,
    envelope::entity::EmailEnvelope,
    error::PostroomResult,
    imap::MailGateway,
    mailbox::entity::Folder,
    settings::cli::SETTINGS,
    utils::folder_id,
};

/// Reconciles one folder against the server's UID set: local UIDs the
/// server no longer reports are soft-deleted. Rows are never removed, and
/// UIDs the server still holds are untouched.
///
/// Skipped entirely for folders that have not completed an initial sync,
/// and for folders whose local row count exceeds the guard threshold (a
/// full server UID listing is too expensive to run per tick there).
pub async fn purge_folder<G: MailGateway>(
    account: &Account,
    gateway: &G,
    folder_name: &str,
) -> PostroomResult<usize> {
    if !SETTINGS.postroom_purge_enabled {
        return Ok(0);
    }

    let folder_id = folder_id(account.id, folder_name);
    if EmailEnvelope::get_latest_uid(folder_id).await? == 0 {
        // Initial sync has not run; nothing to reconcile.
        return Ok(0);
    }

    let local_count = EmailEnvelope::count_in_folder(folder_id).await?;
    if local_count > SETTINGS.postroom_purge_guard_threshold {
        debug!(
            "Skipping purge of '{}': {} local rows exceed the guard",
            folder_name, local_count
        );
        return Ok(0);
    }

    gateway.select_mailbox(folder_name).await?;
    let server_uids: AHashSet<u32> = gateway
        .list_all_uids(folder_name)
        .await?
        .into_iter()
        .collect();
    let local_uids = EmailEnvelope::get_all_uids(folder_id).await?;

    let missing: Vec<u32> = local_uids
        .into_iter()
        .filter(|uid| !server_uids.contains(uid))
        .collect();
    if missing.is_empty() {
        return Ok(0);
    }

    let marked = EmailEnvelope::mark_deleted_by_uids(folder_id, missing).await?;
    info!(
        "Purge of '{}' marked {} rows deleted for {}",
        folder_name, marked, account.email
    );
    let _ = Folder::touch_synced(folder_id).await;
    Ok(marked)
}
