// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    modules::{
        database::{
            filter_by_secondary_key_impl, manager::DB_MANAGER, secondary_find_impl, upsert_impl,
            with_transaction,
        },
        error::{code::ErrorCode, PostroomResult},
        imap::AttachmentMeta,
    },
    raise_error, utc_now,
};

/// Attachment metadata for one MIME part of a stored email. The part number
/// is the MIME path ("2", "1.2", …) and uniquely identifies the part within
/// its email; payload bytes live in a separate blob row once fetched.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 3, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct Attachment {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub email_id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub filename: Option<String>,
    pub content_type: String,
    /// Content-ID for inline parts, referenced from HTML as `cid:`
    pub content_id: Option<String>,
    pub part_number: String,
    pub transfer_encoding: String,
    pub size: u32,
    pub is_inline: bool,
    pub is_cached: bool,
    pub created_at: i64,
}

impl Attachment {
    fn pk(&self) -> String {
        format!("{}_{}", self.email_id, self.part_number)
    }

    pub fn from_meta(account_id: u64, email_id: u64, meta: &AttachmentMeta) -> Self {
        Attachment {
            id: crate::modules::utils::attachment_id(email_id, &meta.part_number),
            email_id,
            account_id,
            filename: meta.filename.clone(),
            content_type: meta.content_type.clone(),
            content_id: meta.content_id.clone(),
            part_number: meta.part_number.clone(),
            transfer_encoding: meta.transfer_encoding.clone(),
            size: meta.size,
            is_inline: meta.is_inline,
            is_cached: false,
            created_at: utc_now!(),
        }
    }

    pub async fn upsert(self) -> PostroomResult<()> {
        upsert_impl(DB_MANAGER.mail_db(), self).await
    }

    pub async fn find(attachment_id: u64) -> PostroomResult<Option<Attachment>> {
        secondary_find_impl(DB_MANAGER.mail_db(), AttachmentKey::id, attachment_id).await
    }

    pub async fn get(attachment_id: u64) -> PostroomResult<Attachment> {
        Self::find(attachment_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Attachment '{attachment_id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    pub async fn list_for_email(email_id: u64) -> PostroomResult<Vec<Attachment>> {
        filter_by_secondary_key_impl(DB_MANAGER.mail_db(), AttachmentKey::email_id, email_id).await
    }

    /// Stores the decoded payload and flips `is_cached`, in one transaction.
    pub async fn cache_payload(attachment_id: u64, data: Vec<u8>) -> PostroomResult<()> {
        with_transaction(DB_MANAGER.mail_db(), move |rw| {
            let current: Attachment = rw
                .get()
                .secondary(AttachmentKey::id, attachment_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Attachment '{attachment_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })?;
            rw.upsert(AttachmentBlob {
                attachment_id,
                data,
            })
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            if !current.is_cached {
                let mut updated = current.clone();
                updated.is_cached = true;
                rw.update(current, updated)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
            Ok(())
        })
        .await
    }

    pub async fn cached_payload(attachment_id: u64) -> PostroomResult<Option<Vec<u8>>> {
        let blob: Option<AttachmentBlob> =
            secondary_find_impl(DB_MANAGER.mail_db(), AttachmentBlobKey::attachment_id, attachment_id)
                .await?;
        Ok(blob.map(|b| b.data))
    }
}

/// Decoded payload bytes, kept out of the metadata row so listing
/// attachments never drags blobs through the cache.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 4, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct AttachmentBlob {
    #[secondary_key(unique)]
    pub attachment_id: u64,
    pub data: Vec<u8>,
}

impl AttachmentBlob {
    fn pk(&self) -> String {
        self.attachment_id.to_string()
    }
}
