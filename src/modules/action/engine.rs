// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::warn;

use crate::{
    modules::{
        action::{
            entity::{OpStack, OperationRecord},
            operation::Operation,
        },
        database::{manager::DB_MANAGER, with_transaction},
        error::{code::ErrorCode, PostroomResult},
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        imap::MailGateway,
    },
    raise_error,
};

/// Stack cap; pushing past it drops the oldest entry.
const UNDO_STACK_LIMIT: usize = 100;

/// Per-account serialization of execute/undo/redo. Store state stays
/// race-free under concurrent calls; gateway contention on the losing side
/// surfaces as an error, never a silent retry.
static ACTION_LOCKS: LazyLock<DashMap<u64, Arc<Mutex<()>>>> = LazyLock::new(DashMap::new);

fn account_lock(account_id: u64) -> Arc<Mutex<()>> {
    ACTION_LOCKS
        .entry(account_id)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Executes a mutation: server first, store write-through second, then the
/// operation is pushed on the account's undo stack and the redo stack is
/// cleared. Undo history survives restarts through `OperationRecord`.
pub async fn execute<G: MailGateway>(
    account_id: u64,
    gateway: &G,
    op: Operation,
) -> PostroomResult<()> {
    let lock = account_lock(account_id);
    let _guard = lock.lock().await;

    op.execute(gateway).await?;
    push(account_id, &op, OpStack::Undo, true).await?;

    if let Operation::MarkRead {
        email_id, new: true, ..
    } = &op
    {
        EVENT_BUS.publish(MailEvent::new(
            EventType::EmailRead,
            account_id,
            EventPayload::EmailFlag {
                email_id: *email_id,
            },
        ));
    }
    Ok(())
}

/// Reverses the most recent operation and moves it to the redo stack.
/// Returns the reversed operation's description, or `None` on an empty
/// stack.
pub async fn undo<G: MailGateway>(account_id: u64, gateway: &G) -> PostroomResult<Option<String>> {
    let lock = account_lock(account_id);
    let _guard = lock.lock().await;

    let Some(record) = pop(account_id, OpStack::Undo).await? else {
        return Ok(None);
    };
    let op = match Operation::deserialize(&record.data) {
        Ok(op) => op,
        Err(err) => {
            warn!(
                "Skipping undo record {} with unloadable payload: {:?}",
                record.id, err
            );
            return Err(err);
        }
    };
    op.undo(gateway).await?;
    push(account_id, &op, OpStack::Redo, false).await?;
    Ok(Some(op.describe()))
}

/// Re-applies the most recently undone operation and moves it back to the
/// undo stack.
pub async fn redo<G: MailGateway>(account_id: u64, gateway: &G) -> PostroomResult<Option<String>> {
    let lock = account_lock(account_id);
    let _guard = lock.lock().await;

    let Some(record) = pop(account_id, OpStack::Redo).await? else {
        return Ok(None);
    };
    let op = Operation::deserialize(&record.data)?;
    op.execute(gateway).await?;
    push(account_id, &op, OpStack::Undo, false).await?;
    Ok(Some(op.describe()))
}

pub async fn history(account_id: u64, stack: OpStack) -> PostroomResult<Vec<OperationRecord>> {
    OperationRecord::list_stack(account_id, stack).await
}

pub async fn clear_history(account_id: u64) -> PostroomResult<()> {
    with_transaction(DB_MANAGER.meta_db(), move |rw| {
        for stack in [OpStack::Undo, OpStack::Redo] {
            let records: Vec<OperationRecord> = rw
                .scan()
                .secondary(crate::modules::action::entity::OperationRecordKey::stack_scope)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .start_with(format!("{}_{}", account_id, stack.code()))
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            for record in records {
                rw.remove(record)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
        }
        Ok(())
    })
    .await
}

/// Appends the operation to a stack in one transaction. `clear_redo` is set
/// on fresh executions: a new mutation invalidates the redo history.
async fn push(
    account_id: u64,
    op: &Operation,
    stack: OpStack,
    clear_redo: bool,
) -> PostroomResult<()> {
    let data = op.serialize()?;
    let op_type = op.kind().to_string();
    let description = op.describe();
    with_transaction(DB_MANAGER.meta_db(), move |rw| {
        let load = |rw: &native_db::transaction::RwTransaction,
                    stack: OpStack|
         -> PostroomResult<Vec<OperationRecord>> {
            let mut records: Vec<OperationRecord> = rw
                .scan()
                .secondary(crate::modules::action::entity::OperationRecordKey::stack_scope)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .start_with(format!("{}_{}", account_id, stack.code()))
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            records.sort_by_key(|r| r.position);
            Ok(records)
        };

        if clear_redo {
            for record in load(rw, OpStack::Redo)? {
                rw.remove(record)
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            }
        }

        let existing = load(rw, stack)?;
        let next_position = existing.last().map(|r| r.position + 1).unwrap_or(0);
        if existing.len() >= UNDO_STACK_LIMIT {
            // Overflow drops the oldest entry.
            let oldest = existing.into_iter().next().unwrap();
            rw.remove(oldest)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        }

        rw.insert(OperationRecord::new(
            account_id,
            &op_type,
            data,
            description,
            stack,
            next_position,
        ))
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(())
    })
    .await
}

/// Removes and returns the top record of a stack.
async fn pop(account_id: u64, stack: OpStack) -> PostroomResult<Option<OperationRecord>> {
    with_transaction(DB_MANAGER.meta_db(), move |rw| {
        let mut records: Vec<OperationRecord> = rw
            .scan()
            .secondary(crate::modules::action::entity::OperationRecordKey::stack_scope)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .start_with(format!("{}_{}", account_id, stack.code()))
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        records.sort_by_key(|r| r.position);
        let Some(top) = records.pop() else {
            return Ok(None);
        };
        rw.remove(top.clone())
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        Ok(Some(top))
    })
    .await
}
