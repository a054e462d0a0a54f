// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    modules::{
        database::{
            filter_by_secondary_key_impl, manager::DB_MANAGER, secondary_find_impl, update_impl,
            upsert_impl,
        },
        error::{code::ErrorCode, PostroomResult},
        imap::MailboxSelection,
    },
    raise_error, utc_now,
};

/// A mirrored mail folder. Stats are cached from the most recent SELECT; the
/// stored `uid_validity` is the invalidation fence for every UID in the
/// folder.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 2, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct Folder {
    /// Stable id derived from (account, decoded name)
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    /// Decoded, human-readable mailbox name (e.g. "INBOX", "[Gmail]/Sent Mail")
    pub name: String,
    /// Hierarchy separator reported by the server, opaque to the core
    pub delimiter: Option<String>,
    /// Total messages at last selection
    pub exists: u32,
    /// Unseen messages at last selection
    pub unseen: u32,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    /// Highest UID committed locally; advances monotonically between
    /// uid-validity resets
    pub latest_uid: u32,
    /// Whether the auto-sync tick covers this folder
    pub sync_enabled: bool,
    pub last_synced_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Folder {
    fn pk(&self) -> String {
        format!("{}_{}", self.account_id, self.id)
    }

    pub fn new(account_id: u64, name: &str, delimiter: Option<String>, sync_enabled: bool) -> Self {
        Folder {
            id: crate::modules::utils::folder_id(account_id, name),
            account_id,
            name: name.into(),
            delimiter,
            exists: 0,
            unseen: 0,
            uid_next: None,
            uid_validity: None,
            latest_uid: 0,
            sync_enabled,
            last_synced_at: None,
            created_at: utc_now!(),
            updated_at: utc_now!(),
        }
    }

    pub async fn find(folder_id: u64) -> PostroomResult<Option<Folder>> {
        secondary_find_impl::<Folder>(DB_MANAGER.mail_db(), FolderKey::id, folder_id).await
    }

    pub async fn get(folder_id: u64) -> PostroomResult<Folder> {
        Self::find(folder_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Folder id='{folder_id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    pub async fn find_by_name(account_id: u64, name: &str) -> PostroomResult<Option<Folder>> {
        Self::find(crate::modules::utils::folder_id(account_id, name)).await
    }

    pub async fn list_for_account(account_id: u64) -> PostroomResult<Vec<Folder>> {
        filter_by_secondary_key_impl(DB_MANAGER.mail_db(), FolderKey::account_id, account_id).await
    }

    /// Discovery upsert: refreshes counts and separator, preserves local sync
    /// preference and UID bookkeeping for folders already known.
    pub async fn upsert_discovered(
        account_id: u64,
        name: &str,
        delimiter: Option<String>,
        default_sync: bool,
    ) -> PostroomResult<Folder> {
        let existing = Self::find_by_name(account_id, name).await?;
        match existing {
            Some(folder) => Ok(folder),
            None => {
                let folder = Folder::new(account_id, name, delimiter, default_sync);
                upsert_impl(DB_MANAGER.mail_db(), folder.clone()).await?;
                Ok(folder)
            }
        }
    }

    /// Applies a SELECT result to the cached stats.
    pub async fn apply_selection(
        folder_id: u64,
        selection: &MailboxSelection,
    ) -> PostroomResult<Folder> {
        let selection = selection.clone();
        update_folder(folder_id, move |current| {
            let mut updated = current.clone();
            updated.exists = selection.exists;
            updated.unseen = selection.unseen.unwrap_or(updated.unseen);
            updated.uid_next = selection.uid_next.or(updated.uid_next);
            updated.uid_validity = selection.uid_validity.or(updated.uid_validity);
            updated.updated_at = utc_now!();
            Ok(updated)
        })
        .await
    }

    /// Advances `latest_uid`; a smaller value is ignored so the watermark is
    /// monotonic within one uid-validity generation.
    pub async fn advance_latest_uid(folder_id: u64, uid: u32) -> PostroomResult<Folder> {
        update_folder(folder_id, move |current| {
            let mut updated = current.clone();
            updated.latest_uid = updated.latest_uid.max(uid);
            updated.last_synced_at = Some(utc_now!());
            updated.updated_at = utc_now!();
            Ok(updated)
        })
        .await
    }

    pub async fn touch_synced(folder_id: u64) -> PostroomResult<Folder> {
        update_folder(folder_id, move |current| {
            let mut updated = current.clone();
            updated.last_synced_at = Some(utc_now!());
            updated.updated_at = utc_now!();
            Ok(updated)
        })
        .await
    }

    /// Resets the UID bookkeeping after the server invalidated the folder's
    /// UIDs. Row rewrite is the sync engine's job; this only moves the fence.
    pub async fn reset_uid_validity(folder_id: u64, uid_validity: u32) -> PostroomResult<Folder> {
        update_folder(folder_id, move |current| {
            let mut updated = current.clone();
            updated.uid_validity = Some(uid_validity);
            updated.latest_uid = 0;
            updated.updated_at = utc_now!();
            Ok(updated)
        })
        .await
    }

    pub async fn set_sync_enabled(folder_id: u64, sync_enabled: bool) -> PostroomResult<Folder> {
        update_folder(folder_id, move |current| {
            let mut updated = current.clone();
            updated.sync_enabled = sync_enabled;
            updated.updated_at = utc_now!();
            Ok(updated)
        })
        .await
    }
}

async fn update_folder(
    folder_id: u64,
    mutate: impl FnOnce(&Folder) -> PostroomResult<Folder> + Send + 'static,
) -> PostroomResult<Folder> {
    update_impl(
        DB_MANAGER.mail_db(),
        move |rw| {
            rw.get()
                .secondary::<Folder>(FolderKey::id, folder_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Folder id='{folder_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })
        },
        mutate,
    )
    .await
}
