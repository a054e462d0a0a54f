// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::future::Future;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    modules::{
        account::entity::{Account, SendBackendKind},
        context::Initialize,
        envelope::attachment::Attachment,
        error::{code::ErrorCode, PostroomResult},
        imap::{
            executor::ImapExecutor,
            manager::build_imap_pool,
            section::decode_transfer,
            MailGateway,
        },
        mime::decode_charset,
        smtp::{api::ApiSender, client::SmtpSender, SendDispatcher},
    },
    raise_error,
};

/// Folder archived messages land in. Provider-specific overrides belong to
/// account setup; this is the conservative default.
pub const ARCHIVE_FOLDER: &str = "Archive";

pub static CREDENTIALS: LazyLock<CredentialAdapter> = LazyLock::new(CredentialAdapter::new);

pub static MAIL_CONTEXT: LazyLock<MailContext> = LazyLock::new(MailContext::new);

/// Holds live account secrets (session passwords or bearer tokens) behind a
/// refresh gate: at most one refresh per account is in flight, and waiters
/// pick up the refreshed value instead of refreshing again.
pub struct CredentialAdapter {
    secrets: DashMap<u64, String>,
    refresh_locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl CredentialAdapter {
    fn new() -> Self {
        CredentialAdapter {
            secrets: DashMap::new(),
            refresh_locks: DashMap::new(),
        }
    }

    pub fn set_secret(&self, account_id: u64, secret: String) {
        self.secrets.insert(account_id, secret);
    }

    /// The live secret for an account; configured out-of-band (keychain,
    /// token provisioning) before gateways connect.
    pub async fn live_secret(&self, account_id: u64) -> PostroomResult<String> {
        self.secrets
            .get(&account_id)
            .map(|s| s.clone())
            .ok_or_else(|| {
                raise_error!(
                    format!("No credential configured for account '{account_id}'"),
                    ErrorCode::MissingConfiguration
                )
            })
    }

    /// Replaces the secret through `refresh`, serializing concurrent
    /// callers: the loser of the race returns the winner's fresh value.
    pub async fn refresh_with<F, Fut>(
        &self,
        account_id: u64,
        refresh: F,
    ) -> PostroomResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = PostroomResult<String>>,
    {
        let lock = self
            .refresh_locks
            .entry(account_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let before = self.secrets.get(&account_id).map(|s| s.clone());
        let _guard = lock.lock().await;

        // Someone else refreshed while this caller waited.
        let current = self.secrets.get(&account_id).map(|s| s.clone());
        if current != before {
            if let Some(fresh) = current {
                return Ok(fresh);
            }
        }

        let fresh = refresh().await?;
        self.secrets.insert(account_id, fresh.clone());
        Ok(fresh)
    }
}

/// Per-account gateway executors, built on first use and kept for the
/// process lifetime.
pub struct MailContext {
    imap_executors: DashMap<u64, Arc<ImapExecutor>>,
}

impl MailContext {
    fn new() -> Self {
        MailContext {
            imap_executors: DashMap::new(),
        }
    }

    pub async fn imap(&self, account_id: u64) -> PostroomResult<Arc<ImapExecutor>> {
        if let Some(executor) = self.imap_executors.get(&account_id) {
            return Ok(executor.clone());
        }
        Account::check_active(account_id).await?;
        let pool = build_imap_pool(account_id).await?;
        let executor = Arc::new(ImapExecutor::new(pool, ARCHIVE_FOLDER.to_string()));
        self.imap_executors.insert(account_id, executor.clone());
        info!("Built IMAP executor for account {}", account_id);
        Ok(executor)
    }

    /// The configured outbound backend for the account.
    pub async fn sender(&self, account_id: u64) -> PostroomResult<SendDispatcher> {
        let account = Account::check_active(account_id).await?;
        match account.send_backend {
            SendBackendKind::Session => Ok(SendDispatcher::Session(SmtpSender::new(&account))),
            SendBackendKind::Api => {
                let endpoint = account.api_send_endpoint.clone().ok_or_else(|| {
                    raise_error!(
                        format!("Account '{account_id}' uses the api backend but has no endpoint"),
                        ErrorCode::MissingConfiguration
                    )
                })?;
                Ok(SendDispatcher::Api(ApiSender::new(account.id, endpoint)))
            }
        }
    }

    /// Drops cached executors, e.g. after credentials or server settings
    /// change.
    pub fn evict(&self, account_id: u64) {
        self.imap_executors.remove(&account_id);
    }

    /// Loads a mirrored email's bodies: serves the stored copy when
    /// present, otherwise fetches the raw message, runs it through the
    /// decoder and writes bodies plus snippet back to the store.
    pub async fn load_message_body(
        &self,
        account_id: u64,
        email_id: u64,
    ) -> PostroomResult<crate::modules::mime::DecodedMessage> {
        use crate::modules::envelope::entity::EmailEnvelope;
        use crate::modules::mime::{decode_message, make_snippet, DecodedMessage};

        let email = EmailEnvelope::get(email_id).await?;
        if email.text_body.is_some() || email.html_body.is_some() {
            return Ok(DecodedMessage {
                text_body: email.text_body,
                html_body: email.html_body,
                ..Default::default()
            });
        }

        let executor = self.imap(account_id).await?;
        let raw = executor.fetch_raw(&email.folder_name, email.uid).await?;
        let decoded = decode_message(&raw);
        EmailEnvelope::store_bodies(
            email_id,
            decoded.text_body.clone(),
            decoded.html_body.clone(),
            make_snippet(&decoded),
        )
        .await?;
        Ok(decoded)
    }

    /// Fetches one attachment's payload: served from the blob cache when
    /// present, otherwise fetched from the server, transfer-decoded
    /// (charset-decoded for text parts) and cached.
    pub async fn fetch_attachment(
        &self,
        account_id: u64,
        attachment_id: u64,
    ) -> PostroomResult<Vec<u8>> {
        if let Some(cached) = Attachment::cached_payload(attachment_id).await? {
            return Ok(cached);
        }

        let attachment = Attachment::get(attachment_id).await?;
        let email =
            crate::modules::envelope::entity::EmailEnvelope::get(attachment.email_id).await?;
        let executor = self.imap(account_id).await?;
        let raw = executor
            .fetch_attachment_part(&email.folder_name, email.uid, &attachment.part_number)
            .await?;

        let mut decoded = decode_transfer(&raw, &attachment.transfer_encoding);
        if attachment.content_type.starts_with("text/") {
            decoded = decode_charset("utf-8", &decoded).into_bytes();
        }
        Attachment::cache_payload(attachment_id, decoded.clone()).await?;
        Ok(decoded)
    }
}

impl Initialize for MailContext {
    async fn initialize() -> PostroomResult<()> {
        // Executors are built lazily per account; touching the static is
        // enough here.
        let _ = MAIL_CONTEXT.imap_executors.len();
        Ok(())
    }
}
