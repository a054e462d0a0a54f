// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use tracing::{info, warn};

use crate::{
    modules::{
        account::entity::Account,
        common::Addr,
        draft::entity::{Draft, DraftSource},
        envelope::entity::EmailEnvelope,
        error::{code::ErrorCode, PostroomResult},
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        outbound::{bounce, sentlog::SentLog},
        settings::cli::SETTINGS,
        smtp::{SendBackend, SendRequest},
    },
    utc_now,
};

/// Creates a draft in the editable state.
pub async fn create_draft(
    account_id: u64,
    source: DraftSource,
    mutate: impl FnOnce(&mut Draft) + Send,
) -> PostroomResult<Draft> {
    Account::check_active(account_id).await?;
    let mut draft = Draft::new(account_id, source);
    mutate(&mut draft);
    draft.save().await?;
    EVENT_BUS.publish(MailEvent::new(
        EventType::DraftCreated,
        account_id,
        EventPayload::Draft { draft_id: draft.id },
    ));
    Ok(draft)
}

/// Send intent: schedules the draft at now + grace window. Until the fire
/// time passes, `cancel_scheduled` undoes the send.
pub async fn send_intent(account_id: u64, draft_id: u64) -> PostroomResult<Draft> {
    Account::check_active(account_id).await?;
    let fire_at = utc_now!() + SETTINGS.postroom_send_grace_seconds as i64 * 1000;
    let draft = Draft::schedule(draft_id, fire_at).await?;
    EVENT_BUS.publish(MailEvent::new(
        EventType::DraftScheduled,
        account_id,
        EventPayload::Draft { draft_id },
    ));
    Ok(draft)
}

/// Cancels a draft still inside its grace window. A draft the dispatcher
/// already claimed refuses the conditional update; that race is reported as
/// a no-op (`false`) and logged, not surfaced as an error.
pub async fn cancel_scheduled(account_id: u64, draft_id: u64) -> PostroomResult<bool> {
    match Draft::cancel(draft_id).await {
        Ok(_) => {
            EVENT_BUS.publish(MailEvent::new(
                EventType::DraftCancelled,
                account_id,
                EventPayload::Draft { draft_id },
            ));
            Ok(true)
        }
        Err(err) if err.code() == ErrorCode::StateConflict => {
            info!(
                "Cancel of draft {} lost the race to dispatch: {}",
                draft_id, err
            );
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// One send tick: claims the account's due scheduled drafts and dispatches
/// them. Per-draft failures mark that draft failed and the tick continues.
/// Returns the number of drafts dispatched successfully.
pub async fn process_due_drafts<S: SendBackend>(
    account: &Account,
    sender: &S,
) -> PostroomResult<usize> {
    let due = Draft::claim_due_scheduled(account.id, utc_now!()).await?;
    let mut dispatched = 0usize;

    for draft in due {
        EVENT_BUS.publish(MailEvent::new(
            EventType::SendStarted,
            account.id,
            EventPayload::Draft { draft_id: draft.id },
        ));

        let request = build_request(account, &draft);
        match sender.send(&request).await {
            Ok(result) => {
                Draft::mark_sent(draft.id, result.sent_at).await?;
                for recipient in request.recipient_addresses() {
                    SentLog::record(
                        account.id,
                        &result.message_id,
                        &recipient,
                        draft.subject.clone(),
                        result.sent_at,
                        account.send_backend.clone(),
                    )
                    .await?;
                    bounce::watch(account.id, &result.message_id, &recipient, result.sent_at);
                }
                if let Some(reply_to) = draft.reply_to_email_id {
                    if let Err(err) = EmailEnvelope::mark_as_replied(reply_to, true).await {
                        warn!(
                            "Could not mark replied email {} after send: {:?}",
                            reply_to, err
                        );
                    }
                }
                EVENT_BUS.publish(MailEvent::new(
                    EventType::SendCompleted,
                    account.id,
                    EventPayload::Send {
                        draft_id: draft.id,
                        message_id: Some(result.message_id.clone()),
                        error: None,
                    },
                ));
                dispatched += 1;
            }
            Err(err) => {
                warn!("Dispatch of draft {} failed: {:?}", draft.id, err);
                Draft::mark_failed(draft.id, err.to_string()).await?;
                EVENT_BUS.publish(MailEvent::new(
                    EventType::SendError,
                    account.id,
                    EventPayload::Send {
                        draft_id: draft.id,
                        message_id: None,
                        error: Some(err.to_string()),
                    },
                ));
            }
        }
    }
    Ok(dispatched)
}

fn build_request(account: &Account, draft: &Draft) -> SendRequest {
    let text = match (&draft.text_body, &account.signature) {
        (Some(body), Some(signature)) => Some(format!("{}\n\n{}", body, signature)),
        (Some(body), None) => Some(body.clone()),
        (None, _) => None,
    };
    SendRequest {
        from: Addr {
            name: account.name.clone(),
            address: Some(account.email.clone()),
        },
        to: draft.to.iter().map(|a| Addr::parse(a)).collect(),
        cc: draft.cc.iter().map(|a| Addr::parse(a)).collect(),
        bcc: draft.bcc.iter().map(|a| Addr::parse(a)).collect(),
        subject: draft.subject.clone(),
        text,
        html: draft.html_body.clone(),
        is_html: draft.html_body.is_some(),
        in_reply_to: draft.in_reply_to.clone(),
        references: draft.references.clone(),
        classification: draft.classification.clone(),
        message_id: None,
    }
}

/// Periodic bounce sweep for one account; a thin wrapper so the scheduler
/// has a single entry point.
pub async fn bounce_sweep(account_id: u64) -> PostroomResult<usize> {
    if !bounce::has_watches() {
        return Ok(0);
    }
    let alerts = bounce::sweep(account_id).await?;
    Ok(alerts.len())
}
