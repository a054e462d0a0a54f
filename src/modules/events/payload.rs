// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::utc_now;

/// Kinds of events the core publishes. Subscribers register per kind or for
/// all kinds; delivery order across kinds is not guaranteed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub enum EventType {
    Connected,
    Disconnected,
    ConnectError,
    SyncStarted,
    SyncCompleted,
    SyncError,
    NewEmail,
    EmailRead,
    EmailSnoozed,
    EmailUnsnoozed,
    DraftCreated,
    DraftScheduled,
    DraftCancelled,
    SendStarted,
    SendCompleted,
    SendError,
    Bounce,
    BatchCreated,
    BatchExecuted,
    BatchCancelled,
    IndexStarted,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MailEvent {
    pub event_type: EventType,
    pub account_id: u64,
    /// UNIX epoch milliseconds at publish time. The only cross-event ordering
    /// signal subscribers may rely on.
    pub timestamp: i64,
    pub payload: EventPayload,
}

impl MailEvent {
    pub fn new(event_type: EventType, account_id: u64, payload: EventPayload) -> Self {
        Self {
            event_type,
            account_id,
            timestamp: utc_now!(),
            payload,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum EventPayload {
    None,
    Connection {
        reason: Option<String>,
    },
    Sync {
        folder: String,
        new_emails: usize,
        error: Option<String>,
    },
    NewEmail {
        folder: String,
        uid: u32,
        subject: Option<String>,
        from: Option<String>,
    },
    EmailFlag {
        email_id: u64,
    },
    Snooze {
        email_id: u64,
        snooze_until: Option<i64>,
    },
    Draft {
        draft_id: u64,
    },
    Send {
        draft_id: u64,
        message_id: Option<String>,
        error: Option<String>,
    },
    Bounce {
        recipient: String,
        reason: Option<String>,
        original_message_id: String,
    },
    Batch {
        batch_id: u64,
        affected: usize,
    },
    Index {
        resumed_from: u64,
    },
}
