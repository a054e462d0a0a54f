// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use ahash::AHashSet;
use tracing::debug;

use crate::{
    modules::{
        database::{batch_upsert_impl, filter_by_secondary_key_impl, manager::DB_MANAGER},
        envelope::entity::EmailEnvelope,
        error::PostroomResult,
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        indexer::entity::{IndexState, IndexStatus, TermEntry, TermEntryKey},
        settings::cli::SETTINGS,
    },
    utc_now,
};

pub mod entity;

/// Terms shorter than this carry no selectivity and are skipped.
const MIN_TERM_LENGTH: usize = 3;
/// Per-email posting cap on adversarially long bodies.
const MAX_TERMS_PER_EMAIL: usize = 500;

/// Starts (or resumes) background indexing for the account.
pub async fn start(account_id: u64) -> PostroomResult<IndexState> {
    let mut state = IndexState::load(account_id).await?;
    if state.status != IndexStatus::Running {
        state.status = IndexStatus::Running;
        if state.started_at.is_none() {
            state.started_at = Some(utc_now!());
        }
        state.store().await?;
        EVENT_BUS.publish(MailEvent::new(
            EventType::IndexStarted,
            account_id,
            EventPayload::Index {
                resumed_from: state.last_email_id,
            },
        ));
    }
    Ok(state)
}

/// Pauses indexing; the next tick is a no-op until `start` is called again.
pub async fn pause(account_id: u64) -> PostroomResult<IndexState> {
    let mut state = IndexState::load(account_id).await?;
    state.status = IndexStatus::Paused;
    state.store().await?;
    Ok(state)
}

/// One indexer batch: the next unindexed emails with a text body get their
/// tokens written to the term index, then the cursor advances. Returns the
/// number of emails consumed; zero when paused, idle or caught up.
pub async fn process_batch(account_id: u64) -> PostroomResult<usize> {
    let mut state = IndexState::load(account_id).await?;
    if state.status != IndexStatus::Running {
        return Ok(0);
    }

    let mut batch: Vec<EmailEnvelope> = EmailEnvelope::list_for_account(account_id)
        .await?
        .into_iter()
        .filter(|e| !e.indexed && e.text_body.is_some() && !e.flags.deleted)
        .collect();
    batch.sort_by_key(|e| e.pk());
    batch.truncate(SETTINGS.postroom_indexer_batch_size as usize);
    if batch.is_empty() {
        return Ok(0);
    }

    let mut postings = Vec::new();
    let mut entry_ids = Vec::with_capacity(batch.len());
    for email in &batch {
        let body = email.text_body.as_deref().unwrap_or_default();
        for term in tokenize(body) {
            postings.push(TermEntry {
                term,
                email_id: email.entry_id,
                account_id,
            });
        }
        entry_ids.push(email.entry_id);
    }

    batch_upsert_impl(DB_MANAGER.mail_db(), postings).await?;
    EmailEnvelope::mark_indexed(entry_ids.clone()).await?;

    let last = batch.last().unwrap();
    state.last_email_id = last.entry_id;
    state.cursor_pk = last.pk();
    state.progress += batch.len() as u64;
    state.store().await?;

    debug!(
        "Indexed {} emails for account {} (cursor {})",
        batch.len(),
        account_id,
        state.cursor_pk
    );
    Ok(batch.len())
}

/// Candidate emails whose indexed body contains a token starting with
/// `term`. A prefilter for search, not a ranking.
pub async fn lookup(account_id: u64, term: &str) -> PostroomResult<Vec<u64>> {
    let postings: Vec<TermEntry> = filter_by_secondary_key_impl(
        DB_MANAGER.mail_db(),
        TermEntryKey::term,
        term.to_lowercase(),
    )
    .await?;
    Ok(postings
        .into_iter()
        .filter(|p| p.account_id == account_id)
        .map(|p| p.email_id)
        .collect())
}

fn tokenize(body: &str) -> Vec<String> {
    let mut seen = AHashSet::new();
    let mut terms = Vec::new();
    for raw in body.split(|c: char| !c.is_alphanumeric()) {
        if raw.len() < MIN_TERM_LENGTH {
            continue;
        }
        let term = raw.to_lowercase();
        if seen.insert(term.clone()) {
            terms.push(term);
            if terms.len() >= MAX_TERMS_PER_EMAIL {
                break;
            }
        }
    }
    terms
}
