// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::atomic::{AtomicBool, Ordering};

use async_imap::types::{Fetch, Flag};
use bb8::Pool;
use chrono::{Duration, Utc};
use futures::TryStreamExt;
use imap_proto::SectionPath;
use tracing::debug;

use crate::{
    decode_mailbox_name, encode_mailbox_name,
    modules::{
        envelope::generate_uid_set,
        error::{code::ErrorCode, PostroomResult},
        imap::{
            manager::ImapConnectionManager, section::SectionExtractor, AttachmentMeta,
            EnvelopeFetch, GatewayCapability, MailGateway, MailboxSelection, RemoteMailbox,
        },
    },
    raise_error,
};

/// The metadata fetched per envelope in one round trip: identity, flags,
/// layout and the headers correlation and threading need.
const RICH_METADATA_QUERY: &str = "(UID BODYSTRUCTURE RFC822.SIZE INTERNALDATE FLAGS BODY.PEEK[HEADER.FIELDS (BCC CC Date From In-Reply-To Sender Return-Path Message-ID Subject MIME-Version References Reply-To To)])";

const BODYSTRUCTURE_QUERY: &str = "(UID BODYSTRUCTURE RFC822.SIZE)";

const BODY_FETCH_QUERY: &str = "(UID BODY.PEEK[])";

const ENVELOPE_FETCH_BATCH: usize = 500;

pub struct ImapExecutor {
    pool: Pool<ImapConnectionManager>,
    /// Mailbox messages are archived into; provider-specific, resolved at
    /// account setup.
    archive_folder: String,
    connected: AtomicBool,
}

impl ImapExecutor {
    pub fn new(pool: Pool<ImapConnectionManager>, archive_folder: String) -> Self {
        Self {
            pool,
            archive_folder,
            connected: AtomicBool::new(false),
        }
    }

    fn convert_fetch(fetch: &Fetch) -> PostroomResult<EnvelopeFetch> {
        let uid = fetch
            .uid
            .ok_or_else(|| raise_error!("No uid available".into(), ErrorCode::ImapUnexpectedResult))?;
        let size = fetch.size.ok_or_else(|| {
            raise_error!("No size available".into(), ErrorCode::ImapUnexpectedResult)
        })?;
        let header = fetch.header().unwrap_or_default().to_vec();
        let flags: Vec<String> = fetch
            .flags()
            .filter(|f| !matches!(f, Flag::Recent))
            .map(|f| flag_to_string(&f))
            .collect();
        let attachments = fetch
            .bodystructure()
            .map(|s| SectionExtractor::new(s).attachments())
            .unwrap_or_default();
        Ok(EnvelopeFetch {
            uid,
            internal_date: fetch.internal_date().map(|d| d.timestamp_millis()),
            size,
            flags,
            header,
            attachments,
        })
    }

    async fn fetch_envelopes_by_uid_set(
        &self,
        mailbox: &str,
        uid_set: &str,
    ) -> PostroomResult<Vec<EnvelopeFetch>> {
        debug!("Fetching envelope batch '{}' from '{}'", uid_set, mailbox);
        let mut session = self.pool.get().await?;
        session
            .examine(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetches = session
            .uid_fetch(uid_set, RICH_METADATA_QUERY)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let mut envelopes = Vec::with_capacity(fetches.len());
        for fetch in &fetches {
            envelopes.push(Self::convert_fetch(fetch)?);
        }
        Ok(envelopes)
    }

    async fn uid_store(&self, mailbox: &str, uid: u32, query: &str) -> PostroomResult<()> {
        let mut session = self.pool.get().await?;
        session
            .select(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let _ = session
            .uid_store(uid.to_string(), query)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        Ok(())
    }

    async fn uid_move(&self, mailbox: &str, uid: u32, target: &str) -> PostroomResult<()> {
        let mut session = self.pool.get().await?;
        session
            .select(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        session
            .uid_mv(uid.to_string(), encode_mailbox_name!(target))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        Ok(())
    }
}

impl MailGateway for ImapExecutor {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn supports(&self, capability: GatewayCapability) -> bool {
        // The executor issues UID MOVE and falls back nowhere; both modern
        // capabilities are assumed of servers this adapter targets.
        matches!(
            capability,
            GatewayCapability::Move | GatewayCapability::UidPlus
        )
    }

    async fn connect(&self) -> PostroomResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        let mut session = self.pool.get().await?;
        session
            .noop()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self) -> PostroomResult<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn list_mailboxes(&self) -> PostroomResult<Vec<RemoteMailbox>> {
        let mut session = self.pool.get().await?;
        let names = session
            .list(Some(""), Some("*"))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        Ok(names
            .iter()
            .map(|name| RemoteMailbox {
                name: decode_mailbox_name!(name.name()),
                delimiter: name.delimiter().map(Into::into),
                // LIST carries no counts; the next selection fills them in.
                total: None,
                unseen: None,
            })
            .collect())
    }

    async fn select_mailbox(&self, mailbox: &str) -> PostroomResult<MailboxSelection> {
        let mut session = self.pool.get().await?;
        let selected = session
            .examine(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        Ok(MailboxSelection {
            exists: selected.exists,
            unseen: selected.unseen,
            uid_next: selected.uid_next,
            uid_validity: selected.uid_validity,
        })
    }

    async fn fetch_new_envelopes(
        &self,
        mailbox: &str,
        since_uid: u32,
        limit: u32,
    ) -> PostroomResult<Vec<EnvelopeFetch>> {
        let uid_set = format!("{}:*", since_uid.saturating_add(1));
        let mut envelopes = self.fetch_envelopes_by_uid_set(mailbox, &uid_set).await?;
        // A `n:*` fetch always returns at least the last message; drop
        // anything at or below the watermark.
        envelopes.retain(|e| e.uid > since_uid);
        envelopes.sort_by_key(|e| e.uid);
        envelopes.truncate(limit as usize);
        Ok(envelopes)
    }

    async fn fetch_envelopes_since(
        &self,
        mailbox: &str,
        days: u32,
        max: u32,
    ) -> PostroomResult<Vec<EnvelopeFetch>> {
        let query = if days == 0 {
            "ALL".to_string()
        } else {
            let since = (Utc::now() - Duration::days(days as i64)).format("%d-%b-%Y");
            format!("SINCE {}", since)
        };

        let uid_list = {
            let mut session = self.pool.get().await?;
            session
                .examine(encode_mailbox_name!(mailbox))
                .await
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
            session
                .uid_search(&query)
                .await
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
        };

        let mut uids: Vec<u32> = uid_list.into_iter().collect();
        uids.sort_unstable();
        if uids.len() > max as usize {
            uids = uids.split_off(uids.len() - max as usize);
        }

        let mut envelopes = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(ENVELOPE_FETCH_BATCH) {
            let uid_set = generate_uid_set(chunk.to_vec());
            envelopes.extend(self.fetch_envelopes_by_uid_set(mailbox, &uid_set).await?);
        }
        envelopes.sort_by_key(|e| e.uid);
        Ok(envelopes)
    }

    async fn fetch_raw(&self, mailbox: &str, uid: u32) -> PostroomResult<Vec<u8>> {
        let mut session = self.pool.get().await?;
        session
            .examine(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetches = session
            .uid_fetch(uid.to_string(), BODY_FETCH_QUERY)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetch = fetches.first().ok_or_else(|| {
            raise_error!(
                format!("UID {} not found in '{}'", uid, mailbox),
                ErrorCode::ResourceNotFound
            )
        })?;
        let body = fetch.body().ok_or_else(|| {
            raise_error!(
                format!("No body returned for UID {}", uid),
                ErrorCode::ImapUnexpectedResult
            )
        })?;
        Ok(body.to_vec())
    }

    async fn fetch_attachment_metadata(
        &self,
        mailbox: &str,
        uid: u32,
    ) -> PostroomResult<(Vec<AttachmentMeta>, bool)> {
        let mut session = self.pool.get().await?;
        session
            .examine(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetches = session
            .uid_fetch(uid.to_string(), BODYSTRUCTURE_QUERY)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetch = fetches.first().ok_or_else(|| {
            raise_error!(
                format!("UID {} not found in '{}'", uid, mailbox),
                ErrorCode::ResourceNotFound
            )
        })?;
        let attachments = fetch
            .bodystructure()
            .map(|s| SectionExtractor::new(s).attachments())
            .unwrap_or_default();
        let has_any = !attachments.is_empty();
        Ok((attachments, has_any))
    }

    async fn fetch_attachment_part(
        &self,
        mailbox: &str,
        uid: u32,
        part_number: &str,
    ) -> PostroomResult<Vec<u8>> {
        let path: Vec<u32> = part_number
            .split('.')
            .map(|seg| {
                seg.parse::<u32>().map_err(|_| {
                    raise_error!(
                        format!("Invalid part number '{}'", part_number),
                        ErrorCode::InvalidParameter
                    )
                })
            })
            .collect::<PostroomResult<Vec<u32>>>()?;

        let mut session = self.pool.get().await?;
        session
            .examine(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetches = session
            .uid_fetch(
                uid.to_string(),
                format!("(UID BODY.PEEK[{}])", part_number),
            )
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?
            .try_collect::<Vec<Fetch>>()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let fetch = fetches.first().ok_or_else(|| {
            raise_error!(
                format!("UID {} not found in '{}'", uid, mailbox),
                ErrorCode::ResourceNotFound
            )
        })?;
        let section = fetch
            .section(&SectionPath::Part(path, None))
            .ok_or_else(|| {
                raise_error!(
                    format!("Part {} missing on UID {}", part_number, uid),
                    ErrorCode::ImapUnexpectedResult
                )
            })?;
        Ok(section.to_vec())
    }

    async fn list_all_uids(&self, mailbox: &str) -> PostroomResult<Vec<u32>> {
        let mut session = self.pool.get().await?;
        session
            .examine(encode_mailbox_name!(mailbox))
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let uid_set = session
            .uid_search("ALL")
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))?;
        let mut uids: Vec<u32> = uid_set.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn mark_read(&self, mailbox: &str, uid: u32, read: bool) -> PostroomResult<()> {
        let query = if read {
            "+FLAGS (\\Seen)"
        } else {
            "-FLAGS (\\Seen)"
        };
        self.uid_store(mailbox, uid, query).await
    }

    async fn archive(&self, mailbox: &str, uid: u32) -> PostroomResult<()> {
        let target = self.archive_folder.clone();
        self.uid_move(mailbox, uid, &target).await
    }

    async fn delete(&self, mailbox: &str, uid: u32) -> PostroomResult<()> {
        self.uid_store(mailbox, uid, "+FLAGS (\\Deleted)").await
    }

    async fn undelete(&self, mailbox: &str, uid: u32) -> PostroomResult<()> {
        self.uid_store(mailbox, uid, "-FLAGS (\\Deleted)").await
    }

    async fn move_to_folder(&self, mailbox: &str, uid: u32, target: &str) -> PostroomResult<()> {
        self.uid_move(mailbox, uid, target).await
    }
}

fn flag_to_string(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".into(),
        Flag::Answered => "\\Answered".into(),
        Flag::Flagged => "\\Flagged".into(),
        Flag::Deleted => "\\Deleted".into(),
        Flag::Draft => "\\Draft".into(),
        Flag::Recent => "\\Recent".into(),
        Flag::MayCreate => "\\*".into(),
        Flag::Custom(value) => value.to_string(),
    }
}
