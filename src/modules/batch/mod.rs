// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::{info, warn};

use crate::{
    modules::{
        account::entity::Account,
        action::{engine, operation::Operation},
        batch::entity::{BatchKind, BatchOp, BatchStatus},
        draft::entity::DraftSource,
        envelope::entity::EmailEnvelope,
        error::{code::ErrorCode, PostroomResult},
        context::executors::ARCHIVE_FOLDER,
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        imap::MailGateway,
        outbound::pipeline,
    },
    raise_error,
};

pub mod entity;

/// Stages a bulk mutation proposed by an external agent. Nothing is applied
/// until the user confirms.
pub async fn create_batch_op(
    account_id: u64,
    kind: BatchKind,
    email_ids: Vec<u64>,
    description: String,
) -> PostroomResult<BatchOp> {
    Account::check_active(account_id).await?;
    if email_ids.is_empty() {
        return Err(raise_error!(
            "A batch proposal needs at least one email".into(),
            ErrorCode::InvalidParameter
        ));
    }
    let batch = BatchOp::new(account_id, kind, email_ids, description);
    batch.save().await?;
    EVENT_BUS.publish(MailEvent::new(
        EventType::BatchCreated,
        account_id,
        EventPayload::Batch {
            batch_id: batch.id,
            affected: batch.count as usize,
        },
    ));
    Ok(batch)
}

pub async fn get_pending_batch_op(account_id: u64) -> PostroomResult<Option<BatchOp>> {
    BatchOp::get_pending(account_id).await
}

/// User confirmation: `pending → confirmed`, then the kind-specific
/// executor applies one ActionEngine operation per email (each lands on the
/// undo stack), then `confirmed → executed`. A sub-op failure leaves the
/// batch in `confirmed` and surfaces the error.
pub async fn confirm<G: MailGateway>(
    account: &Account,
    gateway: &G,
    batch_id: u64,
) -> PostroomResult<BatchOp> {
    let batch =
        BatchOp::transition(batch_id, &[BatchStatus::Pending], BatchStatus::Confirmed).await?;

    let mut failures = 0usize;
    let mut first_error = None;
    for email_id in &batch.email_ids {
        match apply_one(account, gateway, &batch, *email_id).await {
            Ok(()) => {}
            Err(err) => {
                warn!(
                    "Batch {} sub-op on email {} failed: {:?}",
                    batch_id, email_id, err
                );
                failures += 1;
                first_error.get_or_insert(err);
            }
        }
    }

    if let Some(err) = first_error {
        return Err(raise_error!(
            format!(
                "Batch {} applied {}/{} emails before failing: {}",
                batch_id,
                batch.email_ids.len() - failures,
                batch.email_ids.len(),
                err
            ),
            err.code()
        ));
    }

    let executed =
        BatchOp::transition(batch_id, &[BatchStatus::Confirmed], BatchStatus::Executed).await?;
    info!("Batch {} executed on {} emails", batch_id, executed.count);
    EVENT_BUS.publish(MailEvent::new(
        EventType::BatchExecuted,
        account.id,
        EventPayload::Batch {
            batch_id,
            affected: executed.count as usize,
        },
    ));
    Ok(executed)
}

/// User rejection of a pending proposal. Terminal states refuse.
pub async fn cancel(account_id: u64, batch_id: u64) -> PostroomResult<BatchOp> {
    let cancelled =
        BatchOp::transition(batch_id, &[BatchStatus::Pending], BatchStatus::Cancelled).await?;
    EVENT_BUS.publish(MailEvent::new(
        EventType::BatchCancelled,
        account_id,
        EventPayload::Batch {
            batch_id,
            affected: 0,
        },
    ));
    Ok(cancelled)
}

async fn apply_one<G: MailGateway>(
    account: &Account,
    gateway: &G,
    batch: &BatchOp,
    email_id: u64,
) -> PostroomResult<()> {
    let email = EmailEnvelope::get(email_id).await?;
    let op = match batch.kind {
        BatchKind::Archive => Operation::Archive {
            email_id,
            archive_folder: ARCHIVE_FOLDER.into(),
        },
        BatchKind::Delete => Operation::Delete { email_id },
        BatchKind::MarkRead => Operation::MarkRead {
            email_id,
            new: true,
            old: email.flags.seen,
        },
        BatchKind::MarkUnread => Operation::MarkRead {
            email_id,
            new: false,
            old: email.flags.seen,
        },
        BatchKind::Star => Operation::MarkStarred {
            email_id,
            new: true,
            old: email.flags.starred,
        },
        BatchKind::Unstar => Operation::MarkStarred {
            email_id,
            new: false,
            old: email.flags.starred,
        },
        BatchKind::Move => {
            let target = batch.move_target.clone().ok_or_else(|| {
                raise_error!(
                    "Move proposal without a target folder".into(),
                    ErrorCode::InvalidParameter
                )
            })?;
            Operation::Move {
                email_id,
                from: email.folder_name.clone(),
                to: target,
            }
        }
        BatchKind::Forward => {
            // Forwarding is an outbound concern: a grace-scheduled draft per
            // email, cancellable like any other send.
            let target = batch.forward_to.clone().ok_or_else(|| {
                raise_error!(
                    "Forward proposal without a recipient".into(),
                    ErrorCode::InvalidParameter
                )
            })?;
            let subject = email.subject.clone().unwrap_or_default();
            let body = email
                .text_body
                .clone()
                .or(email.snippet.clone())
                .unwrap_or_default();
            let draft = pipeline::create_draft(account.id, DraftSource::Ai, move |draft| {
                draft.to = vec![target];
                draft.subject = Some(format!("Fwd: {}", subject));
                draft.text_body = Some(body);
            })
            .await?;
            pipeline::send_intent(account.id, draft.id).await?;
            return Ok(());
        }
    };
    engine::execute(account.id, gateway, op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::account::entity::{AuthKind, Encryption, SendBackendKind, ServerConfig};
    use crate::modules::action::entity::OpStack;
    use crate::modules::envelope::entity::tests::test_envelope;
    use crate::modules::imap::mock::MockGateway;

    async fn saved_account() -> Account {
        let account = Account::new(
            "batch-test@example.com",
            None,
            ServerConfig {
                host: "imap.example.com".into(),
                port: 993,
                encryption: Encryption::Ssl,
            },
            ServerConfig {
                host: "smtp.example.com".into(),
                port: 465,
                encryption: Encryption::Ssl,
            },
            AuthKind::Password,
            SendBackendKind::Session,
        )
        .unwrap();
        account.save().await.unwrap();
        account
    }

    async fn seed_emails(account_id: u64, uids: &[u32]) -> Vec<u64> {
        let mut ids = Vec::new();
        for uid in uids {
            let outcome = EmailEnvelope::upsert(test_envelope(account_id, "INBOX", *uid))
                .await
                .unwrap();
            ids.push(outcome.entry_id);
        }
        ids
    }

    #[tokio::test]
    async fn preview_then_confirm_executes_with_undo_history() {
        let account = saved_account().await;
        let gateway = MockGateway::new();
        let email_ids = seed_emails(account.id, &[3, 4, 5]).await;

        let batch = create_batch_op(
            account.id,
            BatchKind::Archive,
            email_ids.clone(),
            "Archive 3 newsletters".into(),
        )
        .await
        .unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);

        // The UI poll sees exactly this proposal.
        let pending = get_pending_batch_op(account.id).await.unwrap().unwrap();
        assert_eq!(pending.id, batch.id);
        assert_eq!(pending.email_ids, email_ids);

        let executed = confirm(&account, &gateway, batch.id).await.unwrap();
        assert_eq!(executed.status, BatchStatus::Executed);
        for email_id in &email_ids {
            assert!(EmailEnvelope::get(*email_id).await.unwrap().flags.archived);
        }
        assert_eq!(
            engine::history(account.id, OpStack::Undo)
                .await
                .unwrap()
                .len(),
            3
        );
        assert!(get_pending_batch_op(account.id).await.unwrap().is_none());

        // Terminal: neither confirm nor cancel may touch it again.
        let err = confirm(&account, &gateway, batch.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StateConflict);
        let err = cancel(account.id, batch.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StateConflict);
    }

    #[tokio::test]
    async fn cancel_rejects_the_proposal() {
        let account = saved_account().await;
        let gateway = MockGateway::new();
        let email_ids = seed_emails(account.id, &[10]).await;

        let batch = create_batch_op(
            account.id,
            BatchKind::Delete,
            email_ids.clone(),
            "Delete one".into(),
        )
        .await
        .unwrap();

        let cancelled = cancel(account.id, batch.id).await.unwrap();
        assert_eq!(cancelled.status, BatchStatus::Cancelled);
        assert!(!EmailEnvelope::get(email_ids[0]).await.unwrap().flags.deleted);

        let err = confirm(&account, &gateway, batch.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StateConflict);
    }

    #[tokio::test]
    async fn failed_sub_op_leaves_batch_confirmed() {
        let account = saved_account().await;
        let gateway = MockGateway::new();
        let email_ids = seed_emails(account.id, &[20, 21]).await;

        let batch = create_batch_op(
            account.id,
            BatchKind::Delete,
            email_ids.clone(),
            "Delete two".into(),
        )
        .await
        .unwrap();

        gateway.fail_on("delete:INBOX:21", ErrorCode::ImapCommandFailed);
        let err = confirm(&account, &gateway, batch.id).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ImapCommandFailed);

        let stored = BatchOp::get(batch.id).await.unwrap();
        assert_eq!(stored.status, BatchStatus::Confirmed);
        // The successful sub-op stands, with its undo entry.
        assert!(EmailEnvelope::get(email_ids[0]).await.unwrap().flags.deleted);
        assert!(!EmailEnvelope::get(email_ids[1]).await.unwrap().flags.deleted);
    }

    #[tokio::test]
    async fn empty_proposals_are_rejected() {
        let account = saved_account().await;
        let err = create_batch_op(account.id, BatchKind::Archive, vec![], "nothing".into())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidParameter);
    }
}
