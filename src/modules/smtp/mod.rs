// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::{
    modules::{common::Addr, error::PostroomResult},
    utc_now, validate_email,
};

pub mod api;
pub mod client;
pub mod composer;

/// Canonical outbound message, backend-independent. Reply threading headers
/// are copied into the outgoing message verbatim.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SendRequest {
    pub from: Addr,
    pub to: Vec<Addr>,
    pub cc: Vec<Addr>,
    pub bcc: Vec<Addr>,
    pub subject: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub is_html: bool,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    /// Optional classification label carried as a private header
    pub classification: Option<String>,
    /// Message-ID to send under; generated when absent
    pub message_id: Option<String>,
}

impl SendRequest {
    pub fn validate(&self) -> PostroomResult<()> {
        use crate::modules::error::code::ErrorCode;
        use crate::raise_error;
        if self.to.is_empty() {
            return Err(raise_error!(
                "Missing recipient: no 'to' address provided".into(),
                ErrorCode::InvalidParameter
            ));
        }
        for addr in self.to.iter().chain(&self.cc).chain(&self.bcc) {
            let address = addr.address.as_deref().ok_or_else(|| {
                raise_error!(
                    "Recipient without an address".into(),
                    ErrorCode::InvalidParameter
                )
            })?;
            validate_email!(address)?;
        }
        if self.text.is_none() && self.html.is_none() {
            return Err(raise_error!(
                "Message body is empty".into(),
                ErrorCode::InvalidParameter
            ));
        }
        Ok(())
    }

    pub fn recipient_addresses(&self) -> Vec<String> {
        self.to
            .iter()
            .chain(&self.cc)
            .chain(&self.bcc)
            .filter_map(|a| a.address.clone())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct SendResult {
    pub success: bool,
    /// Identifier the message is known by after acceptance: the Message-ID
    /// for session submission, the server-assigned id for the api backend
    pub message_id: String,
    pub sent_at: i64,
}

impl SendResult {
    pub fn accepted(message_id: String) -> Self {
        SendResult {
            success: true,
            message_id,
            sent_at: utc_now!(),
        }
    }
}

/// One outbound backend. The pipeline is generic over this seam so tests
/// drive it with a scripted sender.
pub trait SendBackend: Send + Sync {
    async fn send(&self, request: &SendRequest) -> PostroomResult<SendResult>;
}

/// Backend dispatch for a configured account.
pub enum SendDispatcher {
    Session(client::SmtpSender),
    Api(api::ApiSender),
}

impl SendBackend for SendDispatcher {
    async fn send(&self, request: &SendRequest) -> PostroomResult<SendResult> {
        match self {
            SendDispatcher::Session(sender) => sender.send(request).await,
            SendDispatcher::Api(sender) => sender.send(request).await,
        }
    }
}

pub fn generate_message_id() -> String {
    format!("<{}.{:032x}@postroom>", utc_now!(), rand::random::<u128>())
}
