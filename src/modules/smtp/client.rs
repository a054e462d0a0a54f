// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mail_send::smtp::message::IntoMessage;
use mail_send::SmtpClientBuilder;
use tracing::debug;

use crate::{
    modules::{
        account::entity::{Account, Encryption},
        context::executors::CREDENTIALS,
        error::{code::ErrorCode, PostroomResult},
        smtp::{composer::build_message, SendBackend, SendRequest, SendResult},
    },
    raise_error,
};

/// Session submission backend: one authenticated SMTP session per send,
/// released when the message is accepted.
pub struct SmtpSender {
    account_id: u64,
    host: String,
    port: u16,
    implicit_tls: bool,
    username: String,
}

impl SmtpSender {
    pub fn new(account: &Account) -> Self {
        SmtpSender {
            account_id: account.id,
            host: account.smtp.host.clone(),
            port: account.smtp.port,
            implicit_tls: matches!(account.smtp.encryption, Encryption::Ssl),
            username: account.email.clone(),
        }
    }
}

impl SendBackend for SmtpSender {
    async fn send(&self, request: &SendRequest) -> PostroomResult<SendResult> {
        request.validate()?;
        let secret = CREDENTIALS.live_secret(self.account_id).await?;
        let (builder, message_id) = build_message(request);
        let message = builder
            .into_message()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::SmtpCommandFailed))?;

        debug!(
            "Submitting message {} via {}:{}",
            message_id, self.host, self.port
        );
        let mut client = SmtpClientBuilder::new(self.host.clone(), self.port)
            .implicit_tls(self.implicit_tls)
            .credentials((self.username.clone(), secret))
            .connect()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::SmtpConnectionFailed))?;

        client
            .send(message)
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::SmtpCommandFailed))?;

        Ok(SendResult::accepted(message_id))
    }
}
