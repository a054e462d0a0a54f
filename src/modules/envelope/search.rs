// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::modules::{
    common::join_addr_list,
    envelope::entity::EmailEnvelope,
    error::PostroomResult,
    utils::folder_id,
};

/// Ranked search hit. Rows flagged deleted never appear.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct EmailSummary {
    pub entry_id: u64,
    pub folder_name: String,
    pub uid: u32,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub date: Option<i64>,
    pub snippet: Option<String>,
    pub score: u32,
}

/// Ranked substring search across an account's mirrored mail. Terms are
/// matched case-insensitively against subject, sender, recipients, snippet
/// and text body, weighted in that order; every term must hit somewhere.
pub async fn fuzzy_search_emails(
    account_id: u64,
    query: &str,
    limit: usize,
) -> PostroomResult<Vec<EmailSummary>> {
    let rows = EmailEnvelope::list_for_account(account_id).await?;
    Ok(rank(rows, query, limit))
}

/// Same ranking restricted to one folder.
pub async fn search_emails_in_folder(
    account_id: u64,
    folder_name: &str,
    query: &str,
    limit: usize,
) -> PostroomResult<Vec<EmailSummary>> {
    let folder = folder_id(account_id, folder_name);
    let rows = EmailEnvelope::list_for_folder(folder).await?;
    Ok(rank(rows, query, limit))
}

fn rank(rows: Vec<EmailEnvelope>, query: &str, limit: usize) -> Vec<EmailSummary> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return vec![];
    }

    let mut hits: Vec<EmailSummary> = rows
        .into_iter()
        .filter(|row| !row.flags.deleted)
        .filter_map(|row| {
            let subject = row.subject.clone().unwrap_or_default().to_lowercase();
            let from = row
                .from
                .as_ref()
                .map(|a| a.to_string().to_lowercase())
                .unwrap_or_default();
            let recipients = join_addr_list(&row.to).to_lowercase();
            let snippet = row.snippet.clone().unwrap_or_default().to_lowercase();
            let body = row.text_body.clone().unwrap_or_default().to_lowercase();

            let mut score = 0u32;
            for term in &terms {
                let mut term_score = 0u32;
                if subject.contains(term) {
                    term_score += 8;
                }
                if from.contains(term) {
                    term_score += 4;
                }
                if recipients.contains(term) {
                    term_score += 3;
                }
                if snippet.contains(term) {
                    term_score += 2;
                }
                if body.contains(term) {
                    term_score += 1;
                }
                if term_score == 0 {
                    return None;
                }
                score += term_score;
            }

            Some(EmailSummary {
                entry_id: row.entry_id,
                folder_name: row.folder_name,
                uid: row.uid,
                subject: row.subject,
                from: row.from.map(|a| a.to_string()),
                date: row.date,
                snippet: row.snippet,
                score,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.cmp(&a.score).then(b.date.cmp(&a.date)));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id;
    use crate::modules::envelope::entity::tests::test_envelope;

    #[tokio::test]
    async fn search_ranks_subject_hits_first() {
        let account_id = id!(64);
        let mut invoice = test_envelope(account_id, "INBOX", 1);
        invoice.subject = Some("Invoice overdue".into());
        let mut mention = test_envelope(account_id, "INBOX", 2);
        mention.subject = Some("Lunch plans".into());
        mention.text_body = Some("attached the invoice you wanted".into());
        let mut unrelated = test_envelope(account_id, "INBOX", 3);
        unrelated.subject = Some("Weekly digest".into());

        for e in [invoice, mention, unrelated] {
            EmailEnvelope::upsert(e).await.unwrap();
        }

        let hits = fuzzy_search_emails(account_id, "invoice", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].uid, 1);
        assert_eq!(hits[1].uid, 2);
    }

    #[tokio::test]
    async fn all_terms_must_match_and_deleted_rows_are_hidden() {
        let account_id = id!(64);
        let mut a = test_envelope(account_id, "INBOX", 4);
        a.subject = Some("Project alpha budget".into());
        let mut b = test_envelope(account_id, "INBOX", 5);
        b.subject = Some("Project beta".into());
        let entry_a = a.entry_id;

        for e in [a, b] {
            EmailEnvelope::upsert(e).await.unwrap();
        }

        let hits = fuzzy_search_emails(account_id, "project budget", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uid, 4);

        EmailEnvelope::mark_as_deleted(entry_a, true).await.unwrap();
        let hits = fuzzy_search_emails(account_id, "project budget", 10)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn folder_search_is_scoped() {
        let account_id = id!(64);
        let mut inbox = test_envelope(account_id, "INBOX", 6);
        inbox.subject = Some("standup notes".into());
        let mut archive = test_envelope(account_id, "Archive", 7);
        archive.subject = Some("standup notes old".into());

        for e in [inbox, archive] {
            EmailEnvelope::upsert(e).await.unwrap();
        }

        let hits = search_emails_in_folder(account_id, "INBOX", "standup", 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].folder_name, "INBOX");
    }
}
