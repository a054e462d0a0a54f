// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    id,
    modules::{
        database::{filter_by_secondary_key_impl, manager::DB_MANAGER},
        error::PostroomResult,
    },
    utc_now,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum SnoozePreset {
    #[default]
    LaterToday,
    Tomorrow,
    ThisWeekend,
    NextWeek,
    NextMonth,
    Custom,
}

/// One snooze of one email. At most one row per email is active, where
/// active means unprocessed with a wake time still ahead.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 8, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct SnoozeEntry {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub email_id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub snoozed_at: i64,
    pub snooze_until: i64,
    pub preset: SnoozePreset,
    /// Whether the email was read before it was hidden; restored on a
    /// manual unsnooze
    pub was_seen: bool,
    pub processed: bool,
}

impl SnoozeEntry {
    fn pk(&self) -> String {
        format!("{}_{}", self.snooze_until, self.id)
    }

    pub fn new(
        account_id: u64,
        email_id: u64,
        snooze_until: i64,
        preset: SnoozePreset,
        was_seen: bool,
    ) -> Self {
        SnoozeEntry {
            id: id!(64),
            email_id,
            account_id,
            snoozed_at: utc_now!(),
            snooze_until,
            preset,
            was_seen,
            processed: false,
        }
    }

    pub async fn list_for_email(email_id: u64) -> PostroomResult<Vec<SnoozeEntry>> {
        filter_by_secondary_key_impl(DB_MANAGER.meta_db(), SnoozeEntryKey::email_id, email_id)
            .await
    }

    pub async fn active_for_email(email_id: u64) -> PostroomResult<Option<SnoozeEntry>> {
        let now = utc_now!();
        Ok(Self::list_for_email(email_id)
            .await?
            .into_iter()
            .find(|s| !s.processed && s.snooze_until > now))
    }
}
