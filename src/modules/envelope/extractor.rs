// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mail_parser::MessageParser;

use crate::{
    modules::{
        common::AddrVec,
        envelope::{entity::EmailEnvelope, flags_to_hash, EmailFlags},
        error::{code::ErrorCode, PostroomResult},
        imap::EnvelopeFetch,
        utils::{email_entry_id, folder_id},
    },
    raise_error, utc_now,
};

/// Builds the stored row for one fetched envelope. Headers are parsed from
/// the raw bytes the metadata fetch carried; bodies stay empty until a full
/// message fetch decodes them.
pub fn extract_envelope(
    fetch: &EnvelopeFetch,
    account_id: u64,
    folder_name: &str,
) -> PostroomResult<EmailEnvelope> {
    let folder_id = folder_id(account_id, folder_name);
    let message = MessageParser::default()
        .parse_headers(&fetch.header[..])
        .ok_or_else(|| {
            raise_error!(
                format!("Unparsable header for UID {}", fetch.uid),
                ErrorCode::MessageParseError
            )
        })?;

    let flags = EmailFlags::from_imap(&fetch.flags);
    let now = utc_now!();
    let date = message.date().map(|d| d.to_timestamp() * 1000);
    let sort_key = fetch.internal_date.or(date).unwrap_or(now);

    let mut envelope = EmailEnvelope {
        entry_id: email_entry_id(account_id, folder_id, fetch.uid),
        account_id,
        folder_id,
        folder_name: folder_name.into(),
        uid: fetch.uid,
        message_id: message.message_id().map(String::from),
        subject: message.subject().map(String::from),
        from: message
            .from()
            .and_then(|addr| AddrVec::from(addr).0.first().cloned()),
        to: message
            .to()
            .map(|addr| AddrVec::from(addr).0)
            .unwrap_or_default(),
        cc: message
            .cc()
            .map(|addr| AddrVec::from(addr).0)
            .unwrap_or_default(),
        date,
        internal_date: fetch.internal_date,
        sort_key,
        size: fetch.size,
        flags_hash: flags_to_hash(&flags),
        flags,
        in_reply_to: message.in_reply_to().as_text().map(String::from),
        references: extract_references(&message),
        thread_id: 0,
        text_body: None,
        html_body: None,
        raw_headers: String::from_utf8(fetch.header.clone()).ok(),
        has_attachments: !fetch.attachments.is_empty(),
        snippet: None,
        indexed: false,
        created_at: now,
        updated_at: now,
    };
    envelope.thread_id = envelope.compute_thread_id();
    Ok(envelope)
}

pub fn extract_envelopes(
    fetches: &[EnvelopeFetch],
    account_id: u64,
    folder_name: &str,
) -> PostroomResult<Vec<EmailEnvelope>> {
    let mut envelopes = Vec::with_capacity(fetches.len());
    for fetch in fetches {
        envelopes.push(extract_envelope(fetch, account_id, folder_name)?);
    }
    Ok(envelopes)
}

fn extract_references(message: &mail_parser::Message<'_>) -> Vec<String> {
    match message.references() {
        mail_parser::HeaderValue::Text(text) => vec![text.to_string()],
        mail_parser::HeaderValue::TextList(list) => {
            list.iter().map(|t| t.to_string()).collect()
        }
        _ => vec![],
    }
}
