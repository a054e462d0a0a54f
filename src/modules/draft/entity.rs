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
            filter_by_secondary_key_impl, manager::DB_MANAGER, secondary_find_impl,
            with_transaction,
        },
        error::{code::ErrorCode, PostroomResult},
    },
    raise_error, utc_now,
};

/// Draft lifecycle. `Sent`, `Failed` and `Cancelled` are terminal: once
/// reached, no further transition is possible.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum DraftStatus {
    #[default]
    Draft,
    Scheduled,
    Sending,
    Sent,
    Failed,
    Cancelled,
}

impl DraftStatus {
    pub fn code(&self) -> u8 {
        match self {
            DraftStatus::Draft => 0,
            DraftStatus::Scheduled => 1,
            DraftStatus::Sending => 2,
            DraftStatus::Sent => 3,
            DraftStatus::Failed => 4,
            DraftStatus::Cancelled => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DraftStatus::Sent | DraftStatus::Failed | DraftStatus::Cancelled
        )
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub enum DraftSource {
    #[default]
    Manual,
    Ai,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[native_model(id = 6, version = 1)]
#[native_db(primary_key(pk -> String), secondary_key(status_code -> u8))]
pub struct Draft {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: Option<String>,
    pub text_body: Option<String>,
    pub html_body: Option<String>,
    pub classification: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    /// Store id of the email this draft replies to, if any
    pub reply_to_email_id: Option<u64>,
    pub status: DraftStatus,
    /// Fire time for scheduled sends (UNIX epoch milliseconds)
    pub scheduled_at: Option<i64>,
    pub sent_at: Option<i64>,
    pub error: Option<String>,
    pub source: DraftSource,
    /// Prompt the draft was generated from, for AI-composed drafts
    pub ai_prompt: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Draft {
    fn pk(&self) -> String {
        format!("{}_{}", self.created_at, self.id)
    }

    fn status_code(&self) -> u8 {
        self.status.code()
    }

    pub fn new(account_id: u64, source: DraftSource) -> Self {
        Draft {
            id: id!(64),
            account_id,
            source,
            created_at: utc_now!(),
            updated_at: utc_now!(),
            ..Default::default()
        }
    }

    pub async fn save(&self) -> PostroomResult<()> {
        crate::modules::database::insert_impl(DB_MANAGER.meta_db(), self.to_owned()).await
    }

    pub async fn find(draft_id: u64) -> PostroomResult<Option<Draft>> {
        secondary_find_impl(DB_MANAGER.meta_db(), DraftKey::id, draft_id).await
    }

    pub async fn get(draft_id: u64) -> PostroomResult<Draft> {
        Self::find(draft_id).await?.ok_or_else(|| {
            raise_error!(
                format!("Draft '{draft_id}' not found"),
                ErrorCode::ResourceNotFound
            )
        })
    }

    pub async fn list_for_account(account_id: u64) -> PostroomResult<Vec<Draft>> {
        filter_by_secondary_key_impl(DB_MANAGER.meta_db(), DraftKey::account_id, account_id).await
    }

    /// Updates composable fields while the draft has not left the editable
    /// states.
    pub async fn update_content(
        draft_id: u64,
        mutate: impl FnOnce(&mut Draft) + Send + 'static,
    ) -> PostroomResult<Draft> {
        Self::transition(
            draft_id,
            &[DraftStatus::Draft, DraftStatus::Scheduled],
            move |draft| {
                mutate(draft);
            },
        )
        .await
    }

    /// Send intent: `draft → scheduled` with the grace-window fire time.
    /// Re-issuing on an already scheduled draft moves the fire time.
    pub async fn schedule(draft_id: u64, scheduled_at: i64) -> PostroomResult<Draft> {
        Self::transition(
            draft_id,
            &[DraftStatus::Draft, DraftStatus::Scheduled],
            move |draft| {
                draft.status = DraftStatus::Scheduled;
                draft.scheduled_at = Some(scheduled_at);
                draft.error = None;
            },
        )
        .await
    }

    /// User cancel during the grace window. Refused with `StateConflict`
    /// once dispatch has claimed the draft (or it is already terminal).
    pub async fn cancel(draft_id: u64) -> PostroomResult<Draft> {
        Self::transition(
            draft_id,
            &[DraftStatus::Draft, DraftStatus::Scheduled],
            move |draft| {
                draft.status = DraftStatus::Cancelled;
                draft.scheduled_at = None;
            },
        )
        .await
    }

    pub async fn mark_sent(draft_id: u64, sent_at: i64) -> PostroomResult<Draft> {
        Self::transition(draft_id, &[DraftStatus::Sending], move |draft| {
            draft.status = DraftStatus::Sent;
            draft.sent_at = Some(sent_at);
            draft.error = None;
        })
        .await
    }

    pub async fn mark_failed(draft_id: u64, error: String) -> PostroomResult<Draft> {
        Self::transition(draft_id, &[DraftStatus::Sending], move |draft| {
            draft.status = DraftStatus::Failed;
            draft.error = Some(error);
        })
        .await
    }

    /// Claims the account's due scheduled drafts for dispatch: each row
    /// still in `scheduled` with `scheduled_at <= now` moves to `sending`
    /// inside one transaction. A draft cancelled between the scan and the
    /// claim is simply not claimed; that conditional update is the
    /// cancellation race resolution.
    pub async fn claim_due_scheduled(account_id: u64, now: i64) -> PostroomResult<Vec<Draft>> {
        with_transaction(DB_MANAGER.meta_db(), move |rw| {
            let scheduled: Vec<Draft> = rw
                .scan()
                .secondary(DraftKey::status_code)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .start_with(DraftStatus::Scheduled.code())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;

            let mut claimed = Vec::new();
            for current in scheduled {
                if current.account_id != account_id {
                    continue;
                }
                if current.scheduled_at.map_or(true, |at| at > now) {
                    continue;
                }
                let mut updated = current.clone();
                updated.status = DraftStatus::Sending;
                updated.updated_at = utc_now!();
                rw.update(current, updated.clone())
                    .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                claimed.push(updated);
            }
            Ok(claimed)
        })
        .await
    }

    async fn transition(
        draft_id: u64,
        allowed_from: &'static [DraftStatus],
        mutate: impl FnOnce(&mut Draft) + Send + 'static,
    ) -> PostroomResult<Draft> {
        with_transaction(DB_MANAGER.meta_db(), move |rw| {
            let current: Draft = rw
                .get()
                .secondary(DraftKey::id, draft_id)
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .ok_or_else(|| {
                    raise_error!(
                        format!("Draft '{draft_id}' not found"),
                        ErrorCode::ResourceNotFound
                    )
                })?;
            if !allowed_from.contains(&current.status) {
                return Err(raise_error!(
                    format!(
                        "Draft '{draft_id}' is {:?}, refusing transition",
                        current.status
                    ),
                    ErrorCode::StateConflict
                ));
            }
            let mut updated = current.clone();
            mutate(&mut updated);
            updated.updated_at = utc_now!();
            rw.update(current, updated.clone())
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            Ok(updated)
        })
        .await
    }
}
