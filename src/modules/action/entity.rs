// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    modules::{
        database::{filter_by_secondary_key_impl, manager::DB_MANAGER},
        error::PostroomResult,
    },
    utc_now,
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum OpStack {
    #[default]
    Undo,
    Redo,
}

impl OpStack {
    pub fn code(&self) -> u8 {
        match self {
            OpStack::Undo => 0,
            OpStack::Redo => 1,
        }
    }
}

/// One persisted operation on a per-account undo or redo stack. `data` is
/// the self-describing serialized form (kind tag + payload + version), so
/// reconstruction at startup is total.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 10, version = 1)]
#[native_db(primary_key(pk -> String), secondary_key(stack_scope -> String))]
pub struct OperationRecord {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub op_type: String,
    pub data: String,
    pub description: String,
    pub stack: OpStack,
    /// Position within the stack; higher is more recent
    pub position: u32,
    pub created_at: i64,
}

impl OperationRecord {
    fn pk(&self) -> String {
        format!("{}_{}_{:06}", self.account_id, self.stack.code(), self.position)
    }

    fn stack_scope(&self) -> String {
        format!("{}_{}", self.account_id, self.stack.code())
    }

    pub fn new(
        account_id: u64,
        op_type: &str,
        data: String,
        description: String,
        stack: OpStack,
        position: u32,
    ) -> Self {
        OperationRecord {
            id: crate::id!(64),
            account_id,
            op_type: op_type.into(),
            data,
            description,
            stack,
            position,
            created_at: utc_now!(),
        }
    }

    /// All records on one stack of one account, ordered bottom to top.
    pub async fn list_stack(account_id: u64, stack: OpStack) -> PostroomResult<Vec<OperationRecord>> {
        let mut records: Vec<OperationRecord> = filter_by_secondary_key_impl(
            DB_MANAGER.meta_db(),
            OperationRecordKey::stack_scope,
            format!("{}_{}", account_id, stack.code()),
        )
        .await?;
        records.sort_by_key(|r| r.position);
        Ok(records)
    }
}
