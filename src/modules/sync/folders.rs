// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::info;

use crate::modules::{
    account::entity::Account,
    error::PostroomResult,
    imap::MailGateway,
    mailbox::{entity::Folder, is_essential_folder},
    settings::cli::SETTINGS,
};

/// Enumerates the server's mailboxes and mirrors them as folder rows. The
/// sync set is the account's explicit folder list when present, then the
/// global `postroom_sync_folders` setting, then the essential defaults
/// (INBOX plus canonical Sent and Trash).
pub async fn discover_folders<G: MailGateway>(
    account: &Account,
    gateway: &G,
) -> PostroomResult<Vec<Folder>> {
    let remote = gateway.list_mailboxes().await?;
    info!(
        "Discovered {} mailboxes for {}",
        remote.len(),
        account.email
    );

    let mut folders = Vec::with_capacity(remote.len());
    for mailbox in remote {
        let default_sync = if !account.sync_folders.is_empty() {
            account.sync_folders.iter().any(|f| f == &mailbox.name)
        } else if !SETTINGS.postroom_sync_folders.is_empty() {
            SETTINGS.postroom_sync_folders.contains(&mailbox.name)
        } else {
            is_essential_folder(&mailbox.name)
        };
        let folder =
            Folder::upsert_discovered(account.id, &mailbox.name, mailbox.delimiter, default_sync)
                .await?;
        folders.push(folder);
    }
    Ok(folders)
}

/// The folders the auto-sync tick covers, discovery already applied.
pub async fn sync_set<G: MailGateway>(
    account: &Account,
    gateway: &G,
) -> PostroomResult<Vec<Folder>> {
    let folders = discover_folders(account, gateway).await?;
    Ok(folders.into_iter().filter(|f| f.sync_enabled).collect())
}
