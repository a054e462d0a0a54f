// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::id;
use crate::modules::action::engine;
use crate::modules::action::entity::{OpStack, OperationRecord};
use crate::modules::action::operation::Operation;
use crate::modules::envelope::entity::{tests::test_envelope, EmailEnvelope};
use crate::modules::error::code::ErrorCode;
use crate::modules::imap::mock::MockGateway;

async fn seed_email(account_id: u64, folder: &str, uid: u32) -> u64 {
    EmailEnvelope::upsert(test_envelope(account_id, folder, uid))
        .await
        .unwrap()
        .entry_id
}

#[tokio::test]
async fn archive_then_undo_restores_flag_and_moves_record() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 500).await;

    engine::execute(
        account_id,
        &gateway,
        Operation::Archive {
            email_id,
            archive_folder: "Archive".into(),
        },
    )
    .await
    .unwrap();

    assert_eq!(gateway.calls_matching("archive:INBOX:500").len(), 1);
    assert!(EmailEnvelope::get(email_id).await.unwrap().flags.archived);
    assert_eq!(
        engine::history(account_id, OpStack::Undo).await.unwrap().len(),
        1
    );

    let description = engine::undo(account_id, &gateway).await.unwrap();
    assert_eq!(description.as_deref(), Some("Archive message"));
    assert_eq!(gateway.calls_matching("move:Archive->INBOX:500").len(), 1);
    assert!(!EmailEnvelope::get(email_id).await.unwrap().flags.archived);
    assert!(engine::history(account_id, OpStack::Undo)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        engine::history(account_id, OpStack::Redo).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn execute_then_undo_is_an_inversion() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 501).await;
    let before = EmailEnvelope::get(email_id).await.unwrap().flags;

    engine::execute(
        account_id,
        &gateway,
        Operation::MarkRead {
            email_id,
            new: true,
            old: before.seen,
        },
    )
    .await
    .unwrap();
    assert!(EmailEnvelope::get(email_id).await.unwrap().flags.seen);

    engine::undo(account_id, &gateway).await.unwrap();
    let after = EmailEnvelope::get(email_id).await.unwrap().flags;
    assert_eq!(before, after);
}

#[tokio::test]
async fn redo_reapplies_and_returns_to_undo_stack() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 502).await;

    engine::execute(
        account_id,
        &gateway,
        Operation::MarkStarred {
            email_id,
            new: true,
            old: false,
        },
    )
    .await
    .unwrap();
    engine::undo(account_id, &gateway).await.unwrap();
    assert!(!EmailEnvelope::get(email_id).await.unwrap().flags.starred);

    let description = engine::redo(account_id, &gateway).await.unwrap();
    assert_eq!(description.as_deref(), Some("Star message"));
    assert!(EmailEnvelope::get(email_id).await.unwrap().flags.starred);
    assert_eq!(
        engine::history(account_id, OpStack::Undo).await.unwrap().len(),
        1
    );
    assert!(engine::history(account_id, OpStack::Redo)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn server_failure_aborts_the_local_write() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 503).await;

    gateway.fail_next(ErrorCode::ImapCommandFailed);
    let err = engine::execute(account_id, &gateway, Operation::Delete { email_id })
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ImapCommandFailed);

    assert!(!EmailEnvelope::get(email_id).await.unwrap().flags.deleted);
    assert!(engine::history(account_id, OpStack::Undo)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn batch_rolls_back_applied_prefix_on_failure() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let first = seed_email(account_id, "INBOX", 504).await;
    let second = seed_email(account_id, "INBOX", 505).await;

    gateway.fail_on("delete:INBOX:505", ErrorCode::ImapCommandFailed);
    let err = engine::execute(
        account_id,
        &gateway,
        Operation::Batch {
            ops: vec![
                Operation::MarkRead {
                    email_id: first,
                    new: true,
                    old: false,
                },
                Operation::Delete { email_id: second },
            ],
        },
    )
    .await
    .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ImapCommandFailed);

    // The applied prefix was rolled back and nothing reached the stack.
    assert!(!EmailEnvelope::get(first).await.unwrap().flags.seen);
    assert!(!EmailEnvelope::get(second).await.unwrap().flags.deleted);
    assert!(engine::history(account_id, OpStack::Undo)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(gateway.calls_matching("mark_read:INBOX:504:false").len(), 1);
}

#[tokio::test]
async fn new_execution_clears_the_redo_stack() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 506).await;

    engine::execute(
        account_id,
        &gateway,
        Operation::MarkStarred {
            email_id,
            new: true,
            old: false,
        },
    )
    .await
    .unwrap();
    engine::undo(account_id, &gateway).await.unwrap();
    assert_eq!(
        engine::history(account_id, OpStack::Redo).await.unwrap().len(),
        1
    );

    engine::execute(
        account_id,
        &gateway,
        Operation::MarkRead {
            email_id,
            new: true,
            old: false,
        },
    )
    .await
    .unwrap();
    assert!(engine::history(account_id, OpStack::Redo)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn stack_overflow_drops_the_oldest_entry() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 507).await;

    for round in 0..105u32 {
        let starred = round % 2 == 0;
        engine::execute(
            account_id,
            &gateway,
            Operation::MarkStarred {
                email_id,
                new: starred,
                old: !starred,
            },
        )
        .await
        .unwrap();
    }

    let stack = engine::history(account_id, OpStack::Undo).await.unwrap();
    assert_eq!(stack.len(), 100);
    // Positions stay strictly increasing after the drops.
    for pair in stack.windows(2) {
        assert!(pair[0].position < pair[1].position);
    }
}

#[tokio::test]
async fn history_survives_through_persisted_records() {
    let account_id = id!(64);
    let gateway = MockGateway::new();
    let email_id = seed_email(account_id, "INBOX", 508).await;

    engine::execute(
        account_id,
        &gateway,
        Operation::Delete { email_id },
    )
    .await
    .unwrap();

    // A fresh engine call path reads the same persisted rows.
    let records = OperationRecord::list_stack(account_id, OpStack::Undo)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].op_type, "delete");
    let reloaded = Operation::deserialize(&records[0].data).unwrap();
    assert_eq!(reloaded, Operation::Delete { email_id });

    engine::clear_history(account_id).await.unwrap();
    assert!(engine::history(account_id, OpStack::Undo)
        .await
        .unwrap()
        .is_empty());
}
