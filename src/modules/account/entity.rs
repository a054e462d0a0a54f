// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    id,
    modules::{
        database::{
            insert_impl, list_all_impl, manager::DB_MANAGER, secondary_find_impl, update_impl,
        },
        error::{code::ErrorCode, PostroomResult},
    },
    raise_error, utc_now, validate_email,
};

/// How the mail server authenticates this account.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum AuthKind {
    /// Session password presented on every connect.
    #[default]
    Password,
    /// Bearer token obtained through the credential adapter.
    Token,
}

/// Which backend dispatches outbound mail for this account.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum SendBackendKind {
    /// Authenticated submission session per send.
    #[default]
    Session,
    /// Canonical message posted to an authorized API.
    Api,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum Encryption {
    #[default]
    Ssl,
    StartTls,
    None,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub encryption: Encryption,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 5, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct Account {
    /// Unique account identifier
    #[secondary_key(unique)]
    pub id: u64,
    /// Email address associated with this account
    pub email: String,
    /// Display name for the account (optional)
    pub name: Option<String>,
    /// Mail server (IMAP) endpoint
    pub imap: ServerConfig,
    /// Submission (SMTP) endpoint, used by the session send backend
    pub smtp: ServerConfig,
    pub auth_kind: AuthKind,
    pub send_backend: SendBackendKind,
    /// Submission endpoint for the api send backend
    pub api_send_endpoint: Option<String>,
    /// Signature appended to composed messages (optional)
    pub signature: Option<String>,
    /// When `false`, every per-account operation refuses with
    /// `AccountDisabled`.
    pub enabled: bool,
    /// Folders included in auto-sync. Empty means the essential defaults
    /// resolved at sync time: INBOX plus canonical Sent and Trash.
    pub sync_folders: Vec<String>,
    /// Creation timestamp (UNIX epoch milliseconds)
    pub created_at: i64,
    /// Last update timestamp (UNIX epoch milliseconds)
    pub updated_at: i64,
}

impl Account {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn new(
        email: &str,
        name: Option<String>,
        imap: ServerConfig,
        smtp: ServerConfig,
        auth_kind: AuthKind,
        send_backend: SendBackendKind,
    ) -> PostroomResult<Self> {
        validate_email!(email)?;
        Ok(Account {
            id: id!(64),
            email: email.into(),
            name,
            imap,
            smtp,
            auth_kind,
            send_backend,
            api_send_endpoint: None,
            signature: None,
            enabled: true,
            sync_folders: vec![],
            created_at: utc_now!(),
            updated_at: utc_now!(),
        })
    }

    pub async fn save(&self) -> PostroomResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self.to_owned()).await
    }

    pub async fn find(account_id: u64) -> PostroomResult<Option<Account>> {
        secondary_find_impl::<Account>(DB_MANAGER.meta_db(), AccountKey::id, account_id).await
    }

    pub async fn get(account_id: u64) -> PostroomResult<Account> {
        Self::find(account_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Account with ID '{account_id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    /// Fetches the account and refuses when it has been disabled.
    pub async fn check_active(account_id: u64) -> PostroomResult<Account> {
        match Self::find(account_id).await? {
            Some(entity) if entity.enabled => Ok(entity),
            Some(_) => Err(raise_error!(
                format!("Account id='{account_id}' is disabled"),
                ErrorCode::AccountDisabled
            )),
            None => Err(raise_error!(
                format!("Account id='{account_id}' not found"),
                ErrorCode::ResourceNotFound
            )),
        }
    }

    pub async fn list_all() -> PostroomResult<Vec<Account>> {
        list_all_impl(DB_MANAGER.meta_db()).await
    }

    pub async fn set_enabled(account_id: u64, enabled: bool) -> PostroomResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<Account>(AccountKey::id, account_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Account id='{account_id}' not found"),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                updated.enabled = enabled;
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await?;
        Ok(())
    }

    pub async fn update_sync_folders(account_id: u64, folders: Vec<String>) -> PostroomResult<()> {
        update_impl(
            DB_MANAGER.meta_db(),
            move |rw| {
                rw.get()
                    .secondary::<Account>(AccountKey::id, account_id)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                    .ok_or_else(|| {
                        raise_error!(
                            format!("Account id='{account_id}' not found"),
                            ErrorCode::ResourceNotFound
                        )
                    })
            },
            move |current| {
                let mut updated = current.clone();
                updated.sync_folders = folders;
                updated.updated_at = utc_now!();
                Ok(updated)
            },
        )
        .await?;
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn test_account(email: &str) -> Account {
        Account::new(
            email,
            Some("Test".into()),
            ServerConfig {
                host: "imap.example.com".into(),
                port: 993,
                encryption: Encryption::Ssl,
            },
            ServerConfig {
                host: "smtp.example.com".into(),
                port: 465,
                encryption: Encryption::Ssl,
            },
            AuthKind::Password,
            SendBackendKind::Session,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn save_and_check_active() {
        let account = test_account("active@example.com");
        account.save().await.unwrap();

        let loaded = Account::check_active(account.id).await.unwrap();
        assert_eq!(loaded.email, "active@example.com");

        Account::set_enabled(account.id, false).await.unwrap();
        let err = Account::check_active(account.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AccountDisabled);
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let err = Account::new(
            "not-an-address",
            None,
            ServerConfig::default(),
            ServerConfig::default(),
            AuthKind::Password,
            SendBackendKind::Session,
        )
        .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }
}
