// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::{Account, AuthKind};
use crate::modules::context::executors::CREDENTIALS;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::PostroomResult;
use crate::modules::imap::client::Client;
use crate::modules::imap::session::SessionStream;
use crate::raise_error;
use async_imap::Session;
use tracing::error;

/// SASL XOAUTH2 payload for token-authenticated accounts.
pub(crate) struct XOAuth2 {
    user: String,
    access_token: String,
}

impl async_imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

#[derive(Debug)]
pub struct ImapConnectionManager {
    pub account_id: u64,
}

impl ImapConnectionManager {
    pub fn new(account_id: u64) -> Self {
        Self { account_id }
    }

    async fn create_client(&self, account: &Account) -> PostroomResult<Client> {
        Client::connection(
            account.imap.host.clone(),
            account.imap.encryption.clone(),
            account.imap.port,
        )
        .await
    }

    async fn authenticate(
        &self,
        client: Client,
        account: &Account,
    ) -> PostroomResult<Session<Box<dyn SessionStream>>> {
        match &account.auth_kind {
            AuthKind::Password => {
                let password = CREDENTIALS.live_secret(self.account_id).await?;
                client.login(&account.email, &password).await
            }
            AuthKind::Token => {
                let access_token = CREDENTIALS.live_secret(self.account_id).await?;
                client
                    .authenticate(XOAuth2 {
                        user: account.email.clone(),
                        access_token,
                    })
                    .await
            }
        }
    }

    pub async fn build(&self) -> PostroomResult<Session<Box<dyn SessionStream>>> {
        let account = Account::check_active(self.account_id).await?;

        let client = match self.create_client(&account).await {
            Ok(client) => client,
            Err(err) => {
                error!(
                    "Failed to create IMAP {}'s client: {:#?}",
                    &account.email, err
                );
                return Err(err);
            }
        };

        match self.authenticate(client, &account).await {
            Ok(session) => Ok(session),
            Err(err) => {
                error!("Failed to authenticate IMAP session: {:#?}", err);
                Err(err)
            }
        }
    }
}

impl bb8::ManageConnection for ImapConnectionManager {
    type Connection = Session<Box<dyn SessionStream>>;

    type Error = crate::modules::error::PostroomError;

    async fn connect(&self) -> PostroomResult<Self::Connection> {
        self.build().await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> PostroomResult<()> {
        conn.noop()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::ImapCommandFailed))
    }

    fn has_broken(&self, _: &mut Self::Connection) -> bool {
        false
    }
}

pub async fn build_imap_pool(
    account_id: u64,
) -> PostroomResult<bb8::Pool<ImapConnectionManager>> {
    let manager = ImapConnectionManager::new(account_id);
    let pool = bb8::Pool::builder()
        .connection_timeout(std::time::Duration::from_secs(30))
        .idle_timeout(std::time::Duration::from_secs(120))
        .retry_connection(true)
        .max_size(10)
        .test_on_check_out(true)
        .build(manager)
        .await?;

    Ok(pool)
}
