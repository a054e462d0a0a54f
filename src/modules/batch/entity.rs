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
            filter_by_secondary_key_impl, insert_impl, manager::DB_MANAGER, secondary_find_impl,
            with_transaction,
        },
        error::{code::ErrorCode, PostroomResult},
    },
    raise_error, utc_now,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum BatchKind {
    #[default]
    Archive,
    Delete,
    MarkRead,
    MarkUnread,
    Star,
    Unstar,
    Forward,
    Move,
}

/// `Executed` and `Cancelled` are terminal and immutable.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum BatchStatus {
    #[default]
    Pending,
    Confirmed,
    Executed,
    Cancelled,
}

/// A bulk mutation proposed by an external agent, held for user
/// confirmation. The email id list is the exact preview the UI renders.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 9, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct BatchOp {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub kind: BatchKind,
    pub email_ids: Vec<u64>,
    pub count: u32,
    pub description: String,
    pub status: BatchStatus,
    /// Recipient for `Forward` proposals
    pub forward_to: Option<String>,
    /// Target folder for `Move` proposals
    pub move_target: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BatchOp {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    pub fn new(
        account_id: u64,
        kind: BatchKind,
        email_ids: Vec<u64>,
        description: String,
    ) -> Self {
        BatchOp {
            id: id!(64),
            account_id,
            kind,
            count: email_ids.len() as u32,
            email_ids,
            description,
            status: BatchStatus::Pending,
            forward_to: None,
            move_target: None,
            created_at: utc_now!(),
            updated_at: utc_now!(),
        }
    }

    pub async fn save(&self) -> PostroomResult<()> {
        insert_impl(DB_MANAGER.meta_db(), self.to_owned()).await
    }

    pub async fn find(batch_id: u64) -> PostroomResult<Option<BatchOp>> {
        secondary_find_impl(DB_MANAGER.meta_db(), BatchOpKey::id, batch_id).await
    }

    pub async fn get(batch_id: u64) -> PostroomResult<BatchOp> {
        Self::find(batch_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Batch op '{batch_id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    /// The most recent pending proposal for the account, if any; what the
    /// UI polls to render a confirmation prompt.
    pub async fn get_pending(account_id: u64) -> PostroomResult<Option<BatchOp>> {
        let rows: Vec<BatchOp> = filter_by_secondary_key_impl(
            DB_MANAGER.meta_db(),
            BatchOpKey::account_id,
            account_id,
        )
        .await?;
        Ok(rows
            .into_iter()
            .filter(|b| b.status == BatchStatus::Pending)
            .max_by_key(|b| b.created_at))
    }

    /// Conditional status advance; refuses with `StateConflict` when the
    /// row is not in one of `allowed_from` (terminal states included).
    pub async fn transition(
        batch_id: u64,
        allowed_from: &'static [BatchStatus],
        to: BatchStatus,
    ) -> PostroomResult<BatchOp> {
        with_transaction(DB_MANAGER.meta_db(), move |rw| {
            let current: BatchOp = rw
                .get()
                .secondary(BatchOpKey::id, batch_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Batch op '{batch_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })?;
            if !allowed_from.contains(&current.status) {
                return Err(raise_error!(
                    format!(
                        "Batch op '{batch_id}' is {:?}, refusing transition to {:?}",
                        current.status, to
                    ),
                    ErrorCode::StateConflict
                ));
            }
            let mut updated = current.clone();
            updated.status = to;
            updated.updated_at = utc_now!();
            rw.update(current, updated.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(updated)
        })
        .await
    }
}
