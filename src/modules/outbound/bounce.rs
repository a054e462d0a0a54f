// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::LazyLock;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    modules::{
        envelope::entity::EmailEnvelope,
        error::PostroomResult,
        events::{
            payload::{EventPayload, EventType, MailEvent},
            EVENT_BUS,
        },
        settings::cli::SETTINGS,
        utils::folder_id,
    },
    utc_now,
};

/// Senders that deliver failure notifications. Matched against the local
/// part and display name, case-insensitively.
const BOUNCE_SENDERS: [&str; 5] = [
    "mailer-daemon",
    "postmaster",
    "mail delivery subsystem",
    "mail delivery system",
    "microsoftexchange",
];

/// Hyphen-joined leading subject words that mark delivery notifications.
/// Deliberately language-mixed; precision is best effort.
const BOUNCE_SUBJECT_PREFIXES: [&str; 18] = [
    "delivery-failure",
    "delivery-notification",
    "delivery-status",
    "failed-delivery",
    "failure-delivery",
    "failure-notice",
    "mail-delivery",
    "mail-failure",
    "mail-system",
    "message-delivery",
    "message-frozen",
    "non-recapitabile",
    "non-remis",
    "returned-mail",
    "undeliverable",
    "undeliverable-mail",
    "undeliverable-message",
    "undelivered-mail",
];

/// Failure phrases looked up in the candidate's subject or snippet to label
/// the alert.
const BOUNCE_REASONS: [&str; 8] = [
    "address rejected",
    "user unknown",
    "mailbox unavailable",
    "mailbox full",
    "quota exceeded",
    "no such user",
    "access denied",
    "relay denied",
];

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct WatchKey {
    message_id: String,
    recipient: String,
}

#[derive(Clone, Debug)]
struct WatchEntry {
    account_id: u64,
    sent_at: i64,
    expires_at: i64,
}

/// In-memory watch set keyed by (message-id, recipient). Entries outlive a
/// restart only through the sent log, from which the sweep re-arms.
static WATCH_SET: LazyLock<DashMap<WatchKey, WatchEntry>> = LazyLock::new(DashMap::new);

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BounceAlert {
    pub account_id: u64,
    pub recipient: String,
    pub original_message_id: String,
    pub reason: Option<String>,
    pub detected_at: i64,
}

/// Arms a watch for one accepted send. Watched for the configured window
/// from `sent_at`.
pub fn watch(account_id: u64, message_id: &str, recipient: &str, sent_at: i64) {
    let window = SETTINGS.postroom_bounce_watch_minutes as i64 * 60_000;
    WATCH_SET.insert(
        WatchKey {
            message_id: message_id.into(),
            recipient: recipient.into(),
        },
        WatchEntry {
            account_id,
            sent_at,
            expires_at: sent_at + window,
        },
    );
}

/// Whether the sweep has anything to do; the bounce tick idles otherwise.
pub fn has_watches() -> bool {
    !WATCH_SET.is_empty()
}

/// One correlation sweep over recently arrived inbox mail. Emits a `Bounce`
/// event per correlated candidate and removes its watch entry; mail state
/// is never mutated here. Expired entries fall off quietly.
pub async fn sweep(account_id: u64) -> PostroomResult<Vec<BounceAlert>> {
    let now = utc_now!();
    WATCH_SET.retain(|_, entry| entry.expires_at >= now);
    if WATCH_SET.is_empty() {
        return Ok(vec![]);
    }

    let inbox = folder_id(account_id, "INBOX");
    let candidates: Vec<EmailEnvelope> = EmailEnvelope::list_for_folder(inbox)
        .await?
        .into_iter()
        .filter(|e| !e.flags.deleted && is_bounce_candidate(e))
        .collect();
    if candidates.is_empty() {
        return Ok(vec![]);
    }

    let mut alerts = Vec::new();
    for candidate in &candidates {
        let candidate_date = candidate.date.or(candidate.internal_date).unwrap_or(0);
        let haystack = format!(
            "{} {} {}",
            candidate.subject.as_deref().unwrap_or_default(),
            candidate.snippet.as_deref().unwrap_or_default(),
            candidate.text_body.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        let mut matched: Option<(WatchKey, WatchEntry)> = None;
        for pair in WATCH_SET.iter() {
            let (key, entry) = (pair.key(), pair.value());
            if entry.account_id != account_id {
                continue;
            }
            if candidate_date < entry.sent_at {
                continue;
            }
            if !haystack.contains(&key.recipient.to_lowercase()) {
                continue;
            }
            matched = Some((key.clone(), entry.clone()));
            break;
        }

        let Some((key, _entry)) = matched else {
            continue;
        };
        WATCH_SET.remove(&key);

        let reason = extract_reason(&haystack);
        info!(
            "Correlated bounce for {} (message {})",
            key.recipient, key.message_id
        );
        let alert = BounceAlert {
            account_id,
            recipient: key.recipient.clone(),
            original_message_id: key.message_id.clone(),
            reason: reason.clone(),
            detected_at: now,
        };
        EVENT_BUS.publish(MailEvent::new(
            EventType::Bounce,
            account_id,
            EventPayload::Bounce {
                recipient: key.recipient,
                reason,
                original_message_id: key.message_id,
            },
        ));
        alerts.push(alert);
    }
    Ok(alerts)
}

fn is_bounce_candidate(email: &EmailEnvelope) -> bool {
    let sender = email
        .from
        .as_ref()
        .map(|a| a.to_string().to_lowercase())
        .unwrap_or_default();
    if BOUNCE_SENDERS.iter().any(|s| sender.contains(s)) {
        return true;
    }
    analyze_subject_for_bounce(email.subject.as_deref())
}

/// Subject heuristic: normalize, strip forwarding prefixes, then match the
/// hyphen-joined leading words against the known notification prefixes.
fn analyze_subject_for_bounce(subject: Option<&str>) -> bool {
    let subject = match subject {
        Some(s) if !s.is_empty() => s,
        _ => return false,
    };

    let subject = subject.trim().to_lowercase();
    let subject = subject
        .strip_prefix("fwd:")
        .or_else(|| subject.strip_prefix("fw:"))
        .unwrap_or(&subject)
        .trim();
    let subject = if subject.contains(&['[', ']', '_'][..]) {
        subject.replace(&['[', ']', '_'][..], " ")
    } else {
        subject.to_string()
    };
    let subject = subject.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut words = subject.splitn(3, ' ');
    let first = words.next().unwrap_or("");
    let first = first.strip_suffix(':').unwrap_or(first);
    let second = words.next().unwrap_or("");

    let joined = if second.is_empty() {
        first.to_string()
    } else {
        format!("{}-{}", first, second.trim_end_matches(':'))
    };

    BOUNCE_SUBJECT_PREFIXES
        .iter()
        .any(|p| first == *p || joined.starts_with(p))
}

fn extract_reason(haystack: &str) -> Option<String> {
    BOUNCE_REASONS.iter().find_map(|phrase| {
        haystack.contains(phrase).then(|| {
            let mut chars = phrase.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_heuristics_match_common_notifications() {
        assert!(analyze_subject_for_bounce(Some(
            "Delivery Status Notification (Failure)"
        )));
        assert!(analyze_subject_for_bounce(Some("Undeliverable: hello")));
        assert!(analyze_subject_for_bounce(Some("Mail delivery failed")));
        assert!(analyze_subject_for_bounce(Some("fwd: Returned mail: see transcript")));
        assert!(!analyze_subject_for_bounce(Some("Lunch tomorrow?")));
        assert!(!analyze_subject_for_bounce(None));
    }

    #[test]
    fn reason_extraction_capitalizes_known_phrases() {
        assert_eq!(
            extract_reason("smtp; 550 address rejected by policy"),
            Some("Address rejected".into())
        );
        assert_eq!(extract_reason("nothing of note"), None);
    }
}
