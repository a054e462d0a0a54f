// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::modules::account::entity::{
    Account, AuthKind, Encryption, SendBackendKind, ServerConfig,
};
use crate::modules::common::cancel::CancelToken;
use crate::modules::envelope::attachment::Attachment;
use crate::modules::envelope::entity::{tests::test_envelope, EmailEnvelope};
use crate::modules::error::code::ErrorCode;
use crate::modules::events::payload::EventType;
use crate::modules::events::EVENT_BUS;
use crate::modules::imap::mock::{make_envelope, make_envelope_with_attachment, MockGateway};
use crate::modules::mailbox::entity::Folder;
use crate::modules::sync::backfill::backfill_attachments;
use crate::modules::sync::flow::{sync_account, sync_folder};
use crate::modules::sync::purge::purge_folder;
use crate::modules::utils::folder_id;
use crate::utc_now;

fn test_account() -> Account {
    Account::new(
        "sync-test@example.com",
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
    .unwrap()
}

#[tokio::test]
async fn initial_sync_mirrors_a_small_folder() {
    let account = test_account();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 1);
    let now = utc_now!();
    for uid in [10, 11, 12] {
        gateway.push_envelope("INBOX", make_envelope(uid, "hello", "peer@example.com", now));
    }

    let new_email_count = Arc::new(AtomicUsize::new(0));
    let counter = new_email_count.clone();
    let account_id = account.id;
    let handle = EVENT_BUS.subscribe(
        Some(EventType::NewEmail),
        Arc::new(move |event| {
            if event.account_id == account_id {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );

    let outcome = sync_folder(&account, &gateway, "INBOX").await.unwrap();
    assert!(outcome.initial);
    assert_eq!(outcome.new_emails, 3);

    let fid = folder_id(account.id, "INBOX");
    let mut uids = EmailEnvelope::get_all_uids(fid).await.unwrap();
    uids.sort_unstable();
    assert_eq!(uids, vec![10, 11, 12]);
    assert_eq!(EmailEnvelope::get_latest_uid(fid).await.unwrap(), 12);

    let folder = Folder::get(fid).await.unwrap();
    assert_eq!(folder.latest_uid, 12);
    assert_eq!(folder.exists, 3);
    assert_eq!(folder.uid_validity, Some(1));

    // The sync pass itself never reconciles against the full server UID set.
    assert!(gateway.calls_matching("list_uids").is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(new_email_count.load(Ordering::SeqCst), 3);
    EVENT_BUS.unsubscribe(handle);
}

#[tokio::test]
async fn incremental_sync_and_purge_reconcile_against_server() {
    let account = test_account();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 7);
    let now = utc_now!();
    for uid in [10, 11, 12] {
        gateway.push_envelope("INBOX", make_envelope(uid, "msg", "peer@example.com", now));
    }
    sync_folder(&account, &gateway, "INBOX").await.unwrap();

    // Server state moves: UID 10 disappears, UID 13 arrives.
    gateway.remove_envelope("INBOX", 10);
    gateway.push_envelope("INBOX", make_envelope(13, "new", "peer@example.com", now));

    let outcome = sync_folder(&account, &gateway, "INBOX").await.unwrap();
    assert!(!outcome.initial);
    assert_eq!(outcome.new_emails, 1);
    let fid = folder_id(account.id, "INBOX");
    assert_eq!(EmailEnvelope::get_latest_uid(fid).await.unwrap(), 13);

    let marked = purge_folder(&account, &gateway, "INBOX").await.unwrap();
    assert_eq!(marked, 1);

    for row in EmailEnvelope::list_for_folder(fid).await.unwrap() {
        assert_eq!(row.flags.deleted, row.uid == 10, "uid {}", row.uid);
    }
}

#[tokio::test]
async fn rerunning_a_sync_is_idempotent() {
    let account = test_account();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 3);
    let now = utc_now!();
    for uid in [20, 21] {
        gateway.push_envelope("INBOX", make_envelope(uid, "again", "peer@example.com", now));
    }

    let first = sync_folder(&account, &gateway, "INBOX").await.unwrap();
    assert_eq!(first.new_emails, 2);

    // Nothing changed server-side; the count comes from the store, so a
    // re-run reports zero new.
    let second = sync_folder(&account, &gateway, "INBOX").await.unwrap();
    assert_eq!(second.new_emails, 0);
    let fid = folder_id(account.id, "INBOX");
    assert_eq!(EmailEnvelope::count_in_folder(fid).await.unwrap(), 2);
}

#[tokio::test]
async fn uid_validity_change_rewrites_the_folder() {
    let account = test_account();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 100);
    let now = utc_now!();
    gateway.push_envelope("INBOX", make_envelope(40, "old gen", "peer@example.com", now));
    sync_folder(&account, &gateway, "INBOX").await.unwrap();

    let fid = folder_id(account.id, "INBOX");
    assert_eq!(EmailEnvelope::get_latest_uid(fid).await.unwrap(), 40);

    // The server resets the folder: new validity, renumbered UIDs.
    gateway.set_uid_validity("INBOX", 200);
    gateway.remove_envelope("INBOX", 40);
    gateway.push_envelope("INBOX", make_envelope(3, "new gen", "peer@example.com", now));

    let outcome = sync_folder(&account, &gateway, "INBOX").await.unwrap();
    assert!(outcome.initial, "rewrite runs as an initial sync");

    let mut uids = EmailEnvelope::get_all_uids(fid).await.unwrap();
    uids.sort_unstable();
    assert_eq!(uids, vec![3]);
    let folder = Folder::get(fid).await.unwrap();
    assert_eq!(folder.uid_validity, Some(200));
    assert_eq!(folder.latest_uid, 3);
}

#[tokio::test]
async fn sync_all_continues_past_folder_errors() {
    let account = test_account();
    account.save().await.unwrap();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 1);
    gateway.add_mailbox("Trash", 1);
    let now = utc_now!();
    gateway.push_envelope("INBOX", make_envelope(5, "kept", "peer@example.com", now));

    // INBOX sorts first; fail its select and let the other folder proceed.
    gateway.fail_on("select:INBOX", ErrorCode::ImapCommandFailed);
    let cancel = CancelToken::new();
    let mut progressed = Vec::new();
    let report = sync_account(&account, &gateway, &cancel, |outcome| {
        progressed.push(outcome.folder.clone());
    })
    .await
    .unwrap();

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].0, "INBOX");
    assert!(report.outcomes.iter().any(|o| o.folder == "Trash"));
    // Progress surfaced the folder that did complete.
    assert_eq!(progressed, vec!["Trash".to_string()]);
}

#[tokio::test]
async fn cancellation_stops_between_folders() {
    let account = test_account();
    account.save().await.unwrap();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 1);

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = sync_account(&account, &gateway, &cancel, |_| {}).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::Cancelled);
}

#[tokio::test]
async fn sync_records_attachment_metadata() {
    let account = test_account();
    let gateway = MockGateway::new();
    gateway.add_mailbox("INBOX", 1);
    gateway.push_envelope(
        "INBOX",
        make_envelope_with_attachment(
            50,
            "with file",
            "peer@example.com",
            utc_now!(),
            "2",
            "report.pdf",
        ),
    );

    sync_folder(&account, &gateway, "INBOX").await.unwrap();

    let fid = folder_id(account.id, "INBOX");
    let row = EmailEnvelope::list_for_folder(fid)
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.uid == 50)
        .unwrap();
    assert!(row.has_attachments);

    let attachments = Attachment::list_for_email(row.entry_id).await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].part_number, "2");
    assert_eq!(attachments[0].filename.as_deref(), Some("report.pdf"));
}

#[tokio::test]
async fn backfill_records_missing_attachment_parts() {
    let account = test_account();
    let gateway = MockGateway::new();
    gateway.add_mailbox("Archive", 1);
    gateway.push_envelope(
        "Archive",
        make_envelope_with_attachment(
            60,
            "old mail",
            "peer@example.com",
            utc_now!(),
            "1.2",
            "scan.pdf",
        ),
    );

    // Row mirrored before attachment metadata was recorded.
    let mut row = test_envelope(account.id, "Archive", 60);
    row.has_attachments = true;
    let outcome = EmailEnvelope::upsert(row).await.unwrap();

    let recorded = backfill_attachments(&account, &gateway).await.unwrap();
    assert_eq!(recorded, 1);
    let attachments = Attachment::list_for_email(outcome.entry_id).await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].part_number, "1.2");
}
