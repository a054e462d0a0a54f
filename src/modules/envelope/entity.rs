// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    calculate_hash, id,
    modules::{
        common::Addr,
        database::{
            filter_by_secondary_key_impl, manager::DB_MANAGER, secondary_find_impl,
            try_with_transaction, with_transaction,
        },
        envelope::{flags_to_hash, EmailFlags},
        error::{code::ErrorCode, PostroomResult},
    },
    raise_error, utc_now,
};

/// One mirrored message. The unique `entry_id` secondary key is the
/// (account, folder, uid) identity; the primary key embeds a sort key so a
/// primary scan walks rows in display order.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 1, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct EmailEnvelope {
    #[secondary_key(unique)]
    pub entry_id: u64,
    #[secondary_key]
    pub account_id: u64,
    #[secondary_key]
    pub folder_id: u64,
    pub folder_name: String,
    /// Server-assigned UID, stable until a uid-validity change
    pub uid: u32,
    /// RFC 5322 Message-ID header when present. Non-unique: the first stored
    /// row per (account, message-id) is canonical for correlation.
    #[secondary_key(optional)]
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<Addr>,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    /// Date header, UNIX epoch milliseconds
    pub date: Option<i64>,
    /// Server internal date, UNIX epoch milliseconds
    pub internal_date: Option<i64>,
    /// Display-order key embedded in the pk. Internal date at insert time;
    /// bumped to "now" when a snooze wakes the message.
    pub sort_key: i64,
    pub size: u32,
    pub flags: EmailFlags,
    pub flags_hash: u64,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub thread_id: u64,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub raw_headers: Option<String>,
    pub has_attachments: bool,
    pub snippet: Option<String>,
    /// Set once the background indexer has consumed the text body
    pub indexed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outcome of an upsert: the row identity plus whether a new row was created,
/// which is what drives `NewEmail` events and new-since-last-sync counts.
#[derive(Clone, Debug)]
pub struct UpsertOutcome {
    pub entry_id: u64,
    pub message_id: Option<String>,
    pub inserted: bool,
}

impl EmailEnvelope {
    pub fn pk(&self) -> String {
        format!("{:013}_{}", self.sort_key, self.entry_id)
    }

    pub fn compute_thread_id(&self) -> u64 {
        if self.in_reply_to.is_some() && !self.references.is_empty() {
            return calculate_hash!(&self.references[0]);
        }
        if let Some(message_id) = self.message_id.as_ref() {
            return calculate_hash!(message_id);
        }
        id!(128)
    }

    pub async fn find(entry_id: u64) -> PostroomResult<Option<EmailEnvelope>> {
        secondary_find_impl(DB_MANAGER.mail_db(), EmailEnvelopeKey::entry_id, entry_id).await
    }

    pub async fn get(entry_id: u64) -> PostroomResult<EmailEnvelope> {
        Self::find(entry_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Email entry '{entry_id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    /// Insert-or-merge keyed by (account, folder, uid).
    ///
    /// Merge rules: server flags refresh the row but `seen`/`replied` never
    /// regress true→false (a local action may be ahead of a stale envelope);
    /// `starred` is a store-only flag and, like the `archived`/`deleted`
    /// placement state, is left alone after insert; bodies and snippet fill
    /// in only when newly available. A second row carrying an already-stored
    /// message-id is still written; it simply is not the canonical row for
    /// that id.
    pub async fn upsert(mut envelope: EmailEnvelope) -> PostroomResult<UpsertOutcome> {
        envelope.thread_id = envelope.compute_thread_id();
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let existing: Option<EmailEnvelope> = rw
                .get()
                .secondary(EmailEnvelopeKey::entry_id, envelope.entry_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            match existing {
                None => {
                    let outcome = UpsertOutcome {
                        entry_id: envelope.entry_id,
                        message_id: envelope.message_id.clone(),
                        inserted: true,
                    };
                    rw.insert(envelope)
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                    Ok(outcome)
                }
                Some(current) => {
                    let mut merged = current.clone();
                    merged.flags.seen = current.flags.seen || envelope.flags.seen;
                    merged.flags.replied = current.flags.replied || envelope.flags.replied;
                    merged.flags_hash = flags_to_hash(&merged.flags);
                    merged.size = envelope.size;
                    if merged.snippet.is_none() {
                        merged.snippet = envelope.snippet.clone();
                    }
                    if merged.text_body.is_none() {
                        merged.text_body = envelope.text_body.clone();
                    }
                    if merged.html_body.is_none() {
                        merged.html_body = envelope.html_body.clone();
                    }
                    if merged.raw_headers.is_none() {
                        merged.raw_headers = envelope.raw_headers.clone();
                    }
                    merged.has_attachments = current.has_attachments || envelope.has_attachments;
                    let changed = merged != current;
                    if changed {
                        merged.updated_at = utc_now!();
                        rw.update(current, merged.clone()).map_err(|e| {
                            raise_error!(format!("{:#?}", e), ErrorCode::InternalError)
                        })?;
                    }
                    Ok(UpsertOutcome {
                        entry_id: merged.entry_id,
                        message_id: merged.message_id,
                        inserted: false,
                    })
                }
            }
        })
        .await
    }

    pub async fn mark_as_read(entry_id: u64, read: bool) -> PostroomResult<()> {
        Self::set_flag(entry_id, move |flags| flags.seen = read).await
    }

    pub async fn mark_as_starred(entry_id: u64, starred: bool) -> PostroomResult<()> {
        Self::set_flag(entry_id, move |flags| flags.starred = starred).await
    }

    pub async fn mark_as_replied(entry_id: u64, replied: bool) -> PostroomResult<()> {
        Self::set_flag(entry_id, move |flags| flags.replied = replied).await
    }

    pub async fn mark_as_archived(entry_id: u64, archived: bool) -> PostroomResult<()> {
        Self::set_flag(entry_id, move |flags| flags.archived = archived).await
    }

    pub async fn mark_as_deleted(entry_id: u64, deleted: bool) -> PostroomResult<()> {
        Self::set_flag(entry_id, move |flags| flags.deleted = deleted).await
    }

    /// Idempotent flag write: a no-op when the flag already holds the value.
    async fn set_flag(
        entry_id: u64,
        mutate: impl FnOnce(&mut EmailFlags) + Send + 'static,
    ) -> PostroomResult<()> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let current: EmailEnvelope = rw
                .get()
                .secondary(EmailEnvelopeKey::entry_id, entry_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Email entry '{entry_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })?;
            let mut updated = current.clone();
            mutate(&mut updated.flags);
            if updated.flags == current.flags {
                return Ok(());
            }
            updated.flags_hash = flags_to_hash(&updated.flags);
            updated.updated_at = utc_now!();
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(())
        })
        .await
    }

    /// Batched soft-delete for the purge pass. Rows are never removed here;
    /// UIDs without a local row are skipped.
    pub async fn mark_deleted_by_uids(folder_id: u64, uids: Vec<u32>) -> PostroomResult<usize> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let rows: Vec<EmailEnvelope> = rw
                .scan()
                .secondary(EmailEnvelopeKey::folder_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .start_with(folder_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let targets: ahash::AHashSet<u32> = uids.into_iter().collect();
            let mut marked = 0usize;
            for current in rows {
                if !targets.contains(&current.uid) || current.flags.deleted {
                    continue;
                }
                let mut updated = current.clone();
                updated.flags.deleted = true;
                updated.flags_hash = flags_to_hash(&updated.flags);
                updated.updated_at = utc_now!();
                rw.update(current, updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                marked += 1;
            }
            Ok(marked)
        })
        .await
    }

    pub async fn list_for_folder(folder_id: u64) -> PostroomResult<Vec<EmailEnvelope>> {
        filter_by_secondary_key_impl(DB_MANAGER.mail_db(), EmailEnvelopeKey::folder_id, folder_id)
            .await
    }

    pub async fn list_for_account(account_id: u64) -> PostroomResult<Vec<EmailEnvelope>> {
        filter_by_secondary_key_impl(
            DB_MANAGER.mail_db(),
            EmailEnvelopeKey::account_id,
            account_id,
        )
        .await
    }

    pub async fn get_all_uids(folder_id: u64) -> PostroomResult<Vec<u32>> {
        let rows = Self::list_for_folder(folder_id).await?;
        Ok(rows.into_iter().map(|e| e.uid).collect())
    }

    pub async fn get_latest_uid(folder_id: u64) -> PostroomResult<u32> {
        let rows = Self::list_for_folder(folder_id).await?;
        Ok(rows.into_iter().map(|e| e.uid).max().unwrap_or(0))
    }

    pub async fn count_in_folder(folder_id: u64) -> PostroomResult<usize> {
        Ok(Self::list_for_folder(folder_id).await?.len())
    }

    /// The canonical row for an (account, message-id) pair: the earliest
    /// stored one. Later arrivals with the same id never displace it.
    pub async fn find_canonical_by_message_id(
        account_id: u64,
        message_id: &str,
    ) -> PostroomResult<Option<EmailEnvelope>> {
        let candidates: Vec<EmailEnvelope> = filter_by_secondary_key_impl(
            DB_MANAGER.mail_db(),
            EmailEnvelopeKey::message_id,
            Some(message_id.to_string()),
        )
        .await?;
        Ok(candidates
            .into_iter()
            .filter(|e| e.account_id == account_id && e.message_id.as_deref() == Some(message_id))
            .min_by_key(|e| e.created_at))
    }

    /// Stores decoded bodies on a row already mirrored from an envelope.
    pub async fn store_bodies(
        entry_id: u64,
        text_body: Option<String>,
        html_body: Option<String>,
        snippet: Option<String>,
    ) -> PostroomResult<()> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let current: EmailEnvelope = rw
                .get()
                .secondary(EmailEnvelopeKey::entry_id, entry_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Email entry '{entry_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })?;
            let mut updated = current.clone();
            updated.text_body = text_body.or(updated.text_body);
            updated.html_body = html_body.or(updated.html_body);
            updated.snippet = snippet.or(updated.snippet);
            if updated != current {
                updated.updated_at = utc_now!();
                rw.update(current, updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            Ok(())
        })
        .await
    }

    /// Moves the row to the top of display order by rewriting its sort key.
    /// The pk changes with it, so this is a remove + insert inside one
    /// transaction.
    pub async fn bump_sort_key(entry_id: u64, sort_key: i64) -> PostroomResult<()> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let current: EmailEnvelope = rw
                .get()
                .secondary(EmailEnvelopeKey::entry_id, entry_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Email entry '{entry_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })?;
            let mut updated = current.clone();
            updated.sort_key = sort_key;
            updated.updated_at = utc_now!();
            rw.update(current, updated)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(())
        })
        .await
    }

    pub async fn mark_indexed(entry_ids: Vec<u64>) -> PostroomResult<()> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            for entry_id in entry_ids {
                let found: Option<EmailEnvelope> = rw
                    .get()
                    .secondary(EmailEnvelopeKey::entry_id, entry_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                let Some(current) = found else {
                    continue;
                };
                if current.indexed {
                    continue;
                }
                let mut updated = current.clone();
                updated.indexed = true;
                rw.update(current, updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            Ok(())
        })
        .await
    }

    /// Rewrites a folder's rows after a uid-validity change. The only path
    /// that removes email rows.
    pub async fn drop_folder_rows(folder_id: u64) -> PostroomResult<usize> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let rows: Vec<EmailEnvelope> = rw
                .scan()
                .secondary(EmailEnvelopeKey::folder_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .start_with(folder_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let dropped = rows.len();
            for row in rows {
                rw.remove(row)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            Ok(dropped)
        })
        .await
    }

    /// Retention sweep: moves rows soft-deleted before `cutoff` into the
    /// archive table. User-visible semantics are unchanged; the hot table
    /// stays small. Runs behind the non-blocking write gate so a busy store
    /// makes the scheduler skip the tick instead of queueing.
    pub async fn archive_expired(cutoff: i64) -> PostroomResult<usize> {
        try_with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let rows: Vec<EmailEnvelope> = rw
                .scan()
                .primary()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .all()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let mut moved = 0usize;
            for row in rows {
                if !row.flags.deleted || row.updated_at > cutoff {
                    continue;
                }
                rw.insert(EmailArchive::from(row.clone()))
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                rw.remove(row)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                moved += 1;
            }
            Ok(moved)
        })
        .await
    }
}

/// Cold copy of an email row whose deleted flag outlived the retention
/// window. Same shape as the hot row; never read by user-facing queries.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 12, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct EmailArchive {
    #[secondary_key(unique)]
    pub entry_id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub folder_id: u64,
    pub folder_name: String,
    pub uid: u32,
    pub message_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<Addr>,
    pub date: Option<i64>,
    pub size: u32,
    pub snippet: Option<String>,
    pub archived_at: i64,
}

impl EmailArchive {
    fn pk(&self) -> String {
        format!("{:013}_{}", self.archived_at, self.entry_id)
    }
}

impl From<EmailEnvelope> for EmailArchive {
    fn from(e: EmailEnvelope) -> Self {
        EmailArchive {
            entry_id: e.entry_id,
            account_id: e.account_id,
            folder_id: e.folder_id,
            folder_name: e.folder_name,
            uid: e.uid,
            message_id: e.message_id,
            subject: e.subject,
            from: e.from,
            date: e.date,
            size: e.size,
            snippet: e.snippet,
            archived_at: utc_now!(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modules::utils::{email_entry_id, folder_id};

    pub(crate) fn test_envelope(account_id: u64, folder: &str, uid: u32) -> EmailEnvelope {
        let folder_id = folder_id(account_id, folder);
        let now = utc_now!();
        let flags = EmailFlags::default();
        EmailEnvelope {
            entry_id: email_entry_id(account_id, folder_id, uid),
            account_id,
            folder_id,
            folder_name: folder.into(),
            uid,
            message_id: Some(format!("<{uid}@example.com>")),
            subject: Some(format!("Message {uid}")),
            from: Some(Addr::new(Some("Sender"), "sender@example.com")),
            to: vec![Addr::new(None, "me@example.com")],
            cc: vec![],
            date: Some(now),
            internal_date: Some(now),
            sort_key: now,
            size: 1024,
            flags_hash: flags_to_hash(&flags),
            flags,
            in_reply_to: None,
            references: vec![],
            thread_id: 0,
            text_body: None,
            html_body: None,
            raw_headers: None,
            has_attachments: false,
            snippet: Some(format!("snippet {uid}")),
            indexed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let account_id = id!(64);
        let envelope = test_envelope(account_id, "INBOX", 10);

        let first = EmailEnvelope::upsert(envelope.clone()).await.unwrap();
        assert!(first.inserted);
        let stored_first = EmailEnvelope::get(first.entry_id).await.unwrap();

        let second = EmailEnvelope::upsert(envelope).await.unwrap();
        assert!(!second.inserted);
        let stored_second = EmailEnvelope::get(second.entry_id).await.unwrap();

        assert_eq!(stored_first.updated_at, stored_second.updated_at);
        assert_eq!(stored_first, stored_second);
    }

    #[tokio::test]
    async fn upsert_never_regresses_read_or_local_flags() {
        let account_id = id!(64);
        let envelope = test_envelope(account_id, "INBOX", 11);
        let outcome = EmailEnvelope::upsert(envelope.clone()).await.unwrap();

        EmailEnvelope::mark_as_read(outcome.entry_id, true)
            .await
            .unwrap();
        EmailEnvelope::mark_as_archived(outcome.entry_id, true)
            .await
            .unwrap();

        // A stale envelope fetch with unset flags arrives afterwards.
        EmailEnvelope::upsert(envelope).await.unwrap();
        let stored = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        assert!(stored.flags.seen);
        assert!(stored.flags.archived);
    }

    #[tokio::test]
    async fn repeated_mark_as_read_is_a_noop() {
        let account_id = id!(64);
        let outcome = EmailEnvelope::upsert(test_envelope(account_id, "INBOX", 12))
            .await
            .unwrap();

        EmailEnvelope::mark_as_read(outcome.entry_id, true)
            .await
            .unwrap();
        let first = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        EmailEnvelope::mark_as_read(outcome.entry_id, true)
            .await
            .unwrap();
        let second = EmailEnvelope::get(outcome.entry_id).await.unwrap();
        assert_eq!(first.updated_at, second.updated_at);
    }

    #[tokio::test]
    async fn mark_deleted_by_uids_touches_only_named_rows() {
        let account_id = id!(64);
        for uid in [20, 21, 22] {
            EmailEnvelope::upsert(test_envelope(account_id, "INBOX", uid))
                .await
                .unwrap();
        }
        let fid = folder_id(account_id, "INBOX");

        let marked = EmailEnvelope::mark_deleted_by_uids(fid, vec![20, 99])
            .await
            .unwrap();
        assert_eq!(marked, 1);

        let rows = EmailEnvelope::list_for_folder(fid).await.unwrap();
        assert_eq!(rows.len(), 3);
        for row in rows {
            assert_eq!(row.flags.deleted, row.uid == 20);
        }
    }

    #[tokio::test]
    async fn canonical_message_id_is_first_stored() {
        let account_id = id!(64);
        let mut first = test_envelope(account_id, "INBOX", 30);
        first.message_id = Some("<dup@example.com>".into());
        first.created_at = 1000;
        let mut second = test_envelope(account_id, "Lists", 31);
        second.message_id = Some("<dup@example.com>".into());
        second.created_at = 2000;

        EmailEnvelope::upsert(first).await.unwrap();
        EmailEnvelope::upsert(second).await.unwrap();

        let canonical = EmailEnvelope::find_canonical_by_message_id(account_id, "<dup@example.com>")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(canonical.uid, 30);
    }

    #[tokio::test]
    async fn latest_uid_and_uid_listing() {
        let account_id = id!(64);
        for uid in [5, 9, 7] {
            EmailEnvelope::upsert(test_envelope(account_id, "Sent", uid))
                .await
                .unwrap();
        }
        let fid = folder_id(account_id, "Sent");
        assert_eq!(EmailEnvelope::get_latest_uid(fid).await.unwrap(), 9);
        let mut uids = EmailEnvelope::get_all_uids(fid).await.unwrap();
        uids.sort_unstable();
        assert_eq!(uids, vec![5, 7, 9]);
    }

    #[tokio::test]
    async fn retention_archives_old_deleted_rows() {
        let account_id = id!(64);
        let outcome = EmailEnvelope::upsert(test_envelope(account_id, "INBOX", 40))
            .await
            .unwrap();
        EmailEnvelope::mark_as_deleted(outcome.entry_id, true)
            .await
            .unwrap();

        // Nothing is older than a cutoff in the past.
        let moved = EmailEnvelope::archive_expired(0).await.unwrap();
        assert_eq!(moved, 0);

        let moved = EmailEnvelope::archive_expired(utc_now!() + 1000).await.unwrap();
        assert_eq!(moved, 1);
        assert!(EmailEnvelope::find(outcome.entry_id).await.unwrap().is_none());
    }
}
