// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

//! Scripted in-memory gateway for engine tests. Records every mutating call
//! and serves envelopes from a per-mailbox script instead of a server.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{TimeZone, Utc};

use crate::{
    modules::{
        error::{code::ErrorCode, PostroomResult},
        imap::{
            AttachmentMeta, EnvelopeFetch, GatewayCapability, MailGateway, MailboxSelection,
            RemoteMailbox,
        },
    },
    raise_error,
};

#[derive(Default)]
struct MockMailbox {
    uid_validity: u32,
    unseen: u32,
    envelopes: Vec<EnvelopeFetch>,
    raw: HashMap<u32, Vec<u8>>,
}

#[derive(Default)]
struct MockState {
    mailboxes: HashMap<String, MockMailbox>,
    fail_next: Option<ErrorCode>,
    fail_on: Option<(String, ErrorCode)>,
    connected: bool,
}

#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
    calls: Mutex<Vec<String>>,
}

impl MockGateway {
    pub fn new() -> Self {
        let gateway = MockGateway::default();
        gateway.state.lock().unwrap().connected = true;
        gateway
    }

    pub fn add_mailbox(&self, name: &str, uid_validity: u32) {
        self.state.lock().unwrap().mailboxes.insert(
            name.to_string(),
            MockMailbox {
                uid_validity,
                ..Default::default()
            },
        );
    }

    pub fn push_envelope(&self, mailbox: &str, envelope: EnvelopeFetch) {
        let mut state = self.state.lock().unwrap();
        let mb = state
            .mailboxes
            .get_mut(mailbox)
            .expect("mock mailbox not scripted");
        mb.envelopes.push(envelope);
        mb.envelopes.sort_by_key(|e| e.uid);
    }

    pub fn set_raw(&self, mailbox: &str, uid: u32, bytes: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        state
            .mailboxes
            .get_mut(mailbox)
            .expect("mock mailbox not scripted")
            .raw
            .insert(uid, bytes);
    }

    pub fn remove_envelope(&self, mailbox: &str, uid: u32) {
        let mut state = self.state.lock().unwrap();
        state
            .mailboxes
            .get_mut(mailbox)
            .expect("mock mailbox not scripted")
            .envelopes
            .retain(|e| e.uid != uid);
    }

    pub fn set_uid_validity(&self, mailbox: &str, uid_validity: u32) {
        let mut state = self.state.lock().unwrap();
        state
            .mailboxes
            .get_mut(mailbox)
            .expect("mock mailbox not scripted")
            .uid_validity = uid_validity;
    }

    /// The next gateway call fails once with the given code.
    pub fn fail_next(&self, code: ErrorCode) {
        self.state.lock().unwrap().fail_next = Some(code);
    }

    /// The next call whose recorded form starts with `prefix` fails once.
    pub fn fail_on(&self, prefix: &str, code: ErrorCode) {
        self.state.lock().unwrap().fail_on = Some((prefix.to_string(), code));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    /// Checks scripted failures against the recorded call form, then logs
    /// the call.
    fn gate(&self, call: String) -> PostroomResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(code) = state.fail_next.take() {
                return Err(raise_error!("scripted gateway failure".into(), code));
            }
            if let Some((prefix, code)) = state.fail_on.clone() {
                if call.starts_with(&prefix) {
                    state.fail_on = None;
                    return Err(raise_error!(
                        format!("scripted gateway failure on '{prefix}'"),
                        code
                    ));
                }
            }
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }

    fn take_failure(&self) -> PostroomResult<()> {
        if let Some(code) = self.state.lock().unwrap().fail_next.take() {
            return Err(raise_error!("scripted gateway failure".into(), code));
        }
        Ok(())
    }
}

/// Builds a scripted envelope whose header bytes parse like real mail.
pub fn make_envelope(uid: u32, subject: &str, from: &str, date_millis: i64) -> EnvelopeFetch {
    let date = Utc
        .timestamp_millis_opt(date_millis)
        .single()
        .unwrap_or_else(Utc::now);
    let header = format!(
        "From: {from}\r\nTo: me@example.com\r\nSubject: {subject}\r\nMessage-ID: <uid-{uid}@mock.example>\r\nDate: {}\r\nMIME-Version: 1.0\r\n\r\n",
        date.to_rfc2822()
    );
    EnvelopeFetch {
        uid,
        internal_date: Some(date_millis),
        size: 512 + uid,
        flags: vec![],
        header: header.into_bytes(),
        attachments: vec![],
    }
}

pub fn make_envelope_with_attachment(
    uid: u32,
    subject: &str,
    from: &str,
    date_millis: i64,
    part_number: &str,
    filename: &str,
) -> EnvelopeFetch {
    let mut envelope = make_envelope(uid, subject, from, date_millis);
    envelope.attachments.push(AttachmentMeta {
        part_number: part_number.into(),
        filename: Some(filename.into()),
        content_type: "application/pdf".into(),
        content_id: None,
        transfer_encoding: "base64".into(),
        size: 2048,
        is_inline: false,
    });
    envelope
}

impl MailGateway for MockGateway {
    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn supports(&self, _capability: GatewayCapability) -> bool {
        true
    }

    async fn connect(&self) -> PostroomResult<()> {
        self.take_failure()?;
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn close(&self) -> PostroomResult<()> {
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    async fn list_mailboxes(&self) -> PostroomResult<Vec<RemoteMailbox>> {
        self.take_failure()?;
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state.mailboxes.keys().cloned().collect();
        names.sort();
        Ok(names
            .into_iter()
            .map(|name| {
                let mb = &state.mailboxes[&name];
                RemoteMailbox {
                    total: Some(mb.envelopes.len() as u32),
                    unseen: Some(mb.unseen),
                    name,
                    delimiter: Some("/".into()),
                }
            })
            .collect())
    }

    async fn select_mailbox(&self, mailbox: &str) -> PostroomResult<MailboxSelection> {
        self.gate(format!("select:{mailbox}"))?;
        let state = self.state.lock().unwrap();
        let mb = state.mailboxes.get(mailbox).ok_or_else(|| {
            raise_error!(
                format!("Mailbox '{mailbox}' does not exist"),
                ErrorCode::ResourceNotFound
            )
        })?;
        Ok(MailboxSelection {
            exists: mb.envelopes.len() as u32,
            unseen: Some(mb.unseen),
            uid_next: mb.envelopes.iter().map(|e| e.uid).max().map(|m| m + 1),
            uid_validity: Some(mb.uid_validity),
        })
    }

    async fn fetch_new_envelopes(
        &self,
        mailbox: &str,
        since_uid: u32,
        limit: u32,
    ) -> PostroomResult<Vec<EnvelopeFetch>> {
        self.gate(format!("fetch_new:{mailbox}:{since_uid}"))?;
        let state = self.state.lock().unwrap();
        let mb = state.mailboxes.get(mailbox).ok_or_else(|| {
            raise_error!(
                format!("Mailbox '{mailbox}' does not exist"),
                ErrorCode::ResourceNotFound
            )
        })?;
        Ok(mb
            .envelopes
            .iter()
            .filter(|e| e.uid > since_uid)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn fetch_envelopes_since(
        &self,
        mailbox: &str,
        _days: u32,
        max: u32,
    ) -> PostroomResult<Vec<EnvelopeFetch>> {
        self.gate(format!("fetch_since:{mailbox}"))?;
        let state = self.state.lock().unwrap();
        let mb = state.mailboxes.get(mailbox).ok_or_else(|| {
            raise_error!(
                format!("Mailbox '{mailbox}' does not exist"),
                ErrorCode::ResourceNotFound
            )
        })?;
        let mut envelopes = mb.envelopes.clone();
        if envelopes.len() > max as usize {
            envelopes = envelopes.split_off(envelopes.len() - max as usize);
        }
        Ok(envelopes)
    }

    async fn fetch_raw(&self, mailbox: &str, uid: u32) -> PostroomResult<Vec<u8>> {
        self.gate(format!("fetch_raw:{mailbox}:{uid}"))?;
        let state = self.state.lock().unwrap();
        state
            .mailboxes
            .get(mailbox)
            .and_then(|mb| mb.raw.get(&uid))
            .cloned()
            .ok_or_else(|| {
                raise_error!(
                    format!("UID {uid} not found in '{mailbox}'"),
                    ErrorCode::ResourceNotFound
                )
            })
    }

    async fn fetch_attachment_metadata(
        &self,
        mailbox: &str,
        uid: u32,
    ) -> PostroomResult<(Vec<AttachmentMeta>, bool)> {
        self.gate(format!("fetch_attachment_meta:{mailbox}:{uid}"))?;
        let state = self.state.lock().unwrap();
        let attachments = state
            .mailboxes
            .get(mailbox)
            .and_then(|mb| mb.envelopes.iter().find(|e| e.uid == uid))
            .map(|e| e.attachments.clone())
            .ok_or_else(|| {
                raise_error!(
                    format!("UID {uid} not found in '{mailbox}'"),
                    ErrorCode::ResourceNotFound
                )
            })?;
        let has_any = !attachments.is_empty();
        Ok((attachments, has_any))
    }

    async fn fetch_attachment_part(
        &self,
        mailbox: &str,
        uid: u32,
        part_number: &str,
    ) -> PostroomResult<Vec<u8>> {
        self.gate(format!("fetch_part:{mailbox}:{uid}:{part_number}"))?;
        Ok(b"JVBERi0xLjQK".to_vec())
    }

    async fn list_all_uids(&self, mailbox: &str) -> PostroomResult<Vec<u32>> {
        self.gate(format!("list_uids:{mailbox}"))?;
        let state = self.state.lock().unwrap();
        let mb = state.mailboxes.get(mailbox).ok_or_else(|| {
            raise_error!(
                format!("Mailbox '{mailbox}' does not exist"),
                ErrorCode::ResourceNotFound
            )
        })?;
        Ok(mb.envelopes.iter().map(|e| e.uid).collect())
    }

    async fn mark_read(&self, mailbox: &str, uid: u32, read: bool) -> PostroomResult<()> {
        self.gate(format!("mark_read:{mailbox}:{uid}:{read}"))?;
        Ok(())
    }

    async fn archive(&self, mailbox: &str, uid: u32) -> PostroomResult<()> {
        self.gate(format!("archive:{mailbox}:{uid}"))?;
        Ok(())
    }

    async fn delete(&self, mailbox: &str, uid: u32) -> PostroomResult<()> {
        self.gate(format!("delete:{mailbox}:{uid}"))?;
        Ok(())
    }

    async fn undelete(&self, mailbox: &str, uid: u32) -> PostroomResult<()> {
        self.gate(format!("undelete:{mailbox}:{uid}"))?;
        Ok(())
    }

    async fn move_to_folder(&self, mailbox: &str, uid: u32, target: &str) -> PostroomResult<()> {
        self.gate(format!("move:{mailbox}->{target}:{uid}"))?;
        Ok(())
    }
}
