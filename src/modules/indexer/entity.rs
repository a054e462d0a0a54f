// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::modules::{
    database::{manager::DB_MANAGER, secondary_find_impl, upsert_impl},
    error::PostroomResult,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum IndexStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

/// Resumable indexer cursor for one account. Progress is recorded per
/// batch, so a restart continues where the previous run stopped.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 11, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct IndexState {
    #[secondary_key(unique)]
    pub account_id: u64,
    /// Entry id of the most recently indexed email
    pub last_email_id: u64,
    /// Primary key of that email, the scan resume point
    pub cursor_pk: String,
    pub status: IndexStatus,
    pub started_at: Option<i64>,
    /// Emails indexed since the cursor was created
    pub progress: u64,
}

impl IndexState {
    fn pk(&self) -> String {
        self.account_id.to_string()
    }

    pub async fn load(account_id: u64) -> PostroomResult<IndexState> {
        let found: Option<IndexState> =
            secondary_find_impl(DB_MANAGER.meta_db(), IndexStateKey::account_id, account_id)
                .await?;
        Ok(found.unwrap_or(IndexState {
            account_id,
            ..Default::default()
        }))
    }

    pub async fn store(&self) -> PostroomResult<()> {
        upsert_impl(DB_MANAGER.meta_db(), self.clone()).await
    }
}

/// One inverted-index posting: a body token pointing at the email that
/// contains it.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 13, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct TermEntry {
    #[secondary_key]
    pub term: String,
    pub email_id: u64,
    pub account_id: u64,
}

impl TermEntry {
    fn pk(&self) -> String {
        format!("{}_{}", self.term, self.email_id)
    }
}
