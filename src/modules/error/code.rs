// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[repr(u32)]
pub enum ErrorCode {
    // Client-side errors (10000–10999)
    InvalidParameter = 10000,
    MissingConfiguration = 10010,
    ExceedsLimitation = 10020,
    MessageParseError = 10030,

    // Authentication and authorization errors (20000–20999)
    PermissionDenied = 20000,
    AccountDisabled = 20010,
    ImapAuthenticationFailed = 20020,
    SmtpAuthenticationFailed = 20030,
    ApiAuthenticationFailed = 20040,

    // Resource errors (30000–30999)
    ResourceNotFound = 30000,
    AlreadyExists = 30010,

    // Network connection errors (40000–40999)
    NetworkError = 40000,
    ConnectionTimeout = 40010,
    ConnectionPoolTimeout = 40020,
    HttpResponseError = 40030,

    // Mail service errors (50000–50999)
    ImapCommandFailed = 50000,
    ImapUnexpectedResult = 50010,
    SmtpCommandFailed = 50020,
    SmtpConnectionFailed = 50030,
    MailBoxNotCached = 50040,

    // State errors (60000–60999)
    StateConflict = 60000,
    Cancelled = 60010,

    // Internal system errors (70000–70999)
    InternalError = 70000,
}

impl ErrorCode {
    /// Whether a failed operation may be retried as-is by a periodic driver.
    /// Retrying is the scheduler's policy, never the op's own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NetworkError
                | ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionPoolTimeout
                | ErrorCode::SmtpConnectionFailed
        )
    }

    /// Auth failures disconnect the owning gateway until credentials change.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ErrorCode::ImapAuthenticationFailed
                | ErrorCode::SmtpAuthenticationFailed
                | ErrorCode::ApiAuthenticationFailed
                | ErrorCode::PermissionDenied
        )
    }
}
