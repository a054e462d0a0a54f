// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::modules::error::PostroomResult;

pub mod client;
pub mod executor;
pub mod manager;
#[cfg(test)]
pub mod mock;
pub mod section;
pub mod session;

/// Result of selecting a mailbox. `uid_validity` is the invalidation fence:
/// when it moves, every locally stored UID for the folder is void.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct MailboxSelection {
    pub exists: u32,
    pub unseen: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
}

/// A mailbox as enumerated by the server. Names are decoded for storage and
/// re-encoded on the wire; the separator is opaque to the core. Counts are
/// present when the listing carried them; a later selection refreshes them
/// either way.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct RemoteMailbox {
    pub name: String,
    pub delimiter: Option<String>,
    pub total: Option<u32>,
    pub unseen: Option<u32>,
}

/// Attachment-part metadata lifted from BODYSTRUCTURE, enough to fetch and
/// decode the part later without the full message.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct AttachmentMeta {
    /// MIME path of the part, e.g. "2" or "1.2"
    pub part_number: String,
    pub filename: Option<String>,
    pub content_type: String,
    pub content_id: Option<String>,
    pub transfer_encoding: String,
    pub size: u32,
    pub is_inline: bool,
}

/// One envelope as fetched in a metadata batch: identity, flags and raw
/// header bytes plus the attachment layout, in a single round trip.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct EnvelopeFetch {
    pub uid: u32,
    pub internal_date: Option<i64>,
    pub size: u32,
    pub flags: Vec<String>,
    pub header: Vec<u8>,
    pub attachments: Vec<AttachmentMeta>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GatewayCapability {
    /// Native UID MOVE; adapters without it fall back to copy + delete.
    Move,
    /// UIDPLUS responses on copy/append.
    UidPlus,
}

/// Capability contract of a mail server adapter.
///
/// Every operation either succeeds or returns a transport/auth/protocol
/// error; nothing retries internally. Retry policy belongs to the caller
/// (the scheduler on its next tick).
pub trait MailGateway: Send + Sync {
    fn is_connected(&self) -> bool;
    fn supports(&self, capability: GatewayCapability) -> bool;
    async fn connect(&self) -> PostroomResult<()>;
    async fn close(&self) -> PostroomResult<()>;
    async fn list_mailboxes(&self) -> PostroomResult<Vec<RemoteMailbox>>;
    async fn select_mailbox(&self, mailbox: &str) -> PostroomResult<MailboxSelection>;
    /// Envelopes with UID strictly greater than `since_uid`, ascending,
    /// capped at `limit`.
    async fn fetch_new_envelopes(
        &self,
        mailbox: &str,
        since_uid: u32,
        limit: u32,
    ) -> PostroomResult<Vec<EnvelopeFetch>>;
    /// Envelopes whose internal date is within the trailing `days` window
    /// (`0` = unbounded), capped at `max`.
    async fn fetch_envelopes_since(
        &self,
        mailbox: &str,
        days: u32,
        max: u32,
    ) -> PostroomResult<Vec<EnvelopeFetch>>;
    async fn fetch_raw(&self, mailbox: &str, uid: u32) -> PostroomResult<Vec<u8>>;
    async fn fetch_attachment_metadata(
        &self,
        mailbox: &str,
        uid: u32,
    ) -> PostroomResult<(Vec<AttachmentMeta>, bool)>;
    /// Raw part bytes, still transfer-encoded.
    async fn fetch_attachment_part(
        &self,
        mailbox: &str,
        uid: u32,
        part_number: &str,
    ) -> PostroomResult<Vec<u8>>;
    async fn list_all_uids(&self, mailbox: &str) -> PostroomResult<Vec<u32>>;
    async fn mark_read(&self, mailbox: &str, uid: u32, read: bool) -> PostroomResult<()>;
    async fn archive(&self, mailbox: &str, uid: u32) -> PostroomResult<()>;
    async fn delete(&self, mailbox: &str, uid: u32) -> PostroomResult<()>;
    async fn undelete(&self, mailbox: &str, uid: u32) -> PostroomResult<()>;
    async fn move_to_folder(&self, mailbox: &str, uid: u32, target: &str) -> PostroomResult<()>;
}
