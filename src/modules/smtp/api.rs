// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::{
    base64_encode,
    modules::{
        context::executors::CREDENTIALS,
        error::{code::ErrorCode, PostroomResult},
        smtp::{composer::build_message, SendBackend, SendRequest, SendResult},
    },
    raise_error,
};

/// API submission backend: posts the canonical rendered message to an
/// authorized endpoint and takes the identifier the server assigned.
pub struct ApiSender {
    account_id: u64,
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct ApiSendResponse {
    id: String,
}

impl ApiSender {
    pub fn new(account_id: u64, endpoint: String) -> Self {
        ApiSender {
            account_id,
            endpoint,
            http: reqwest::Client::new(),
        }
    }
}

impl SendBackend for ApiSender {
    async fn send(&self, request: &SendRequest) -> PostroomResult<SendResult> {
        request.validate()?;
        let token = CREDENTIALS.live_secret(self.account_id).await?;
        let (builder, message_id) = build_message(request);
        let rendered = builder
            .write_to_vec()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;

        debug!("Posting message {} to {}", message_id, self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(&json!({ "raw": base64_encode!(&rendered) }))
            .send()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::NetworkError))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(raise_error!(
                format!("Send endpoint rejected credentials: {}", status),
                ErrorCode::ApiAuthenticationFailed
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(raise_error!(
                format!("Send endpoint returned {}: {}", status, body),
                ErrorCode::HttpResponseError
            ));
        }

        let parsed: ApiSendResponse = response
            .json()
            .await
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::HttpResponseError))?;
        Ok(SendResult::accepted(parsed.id))
    }
}
