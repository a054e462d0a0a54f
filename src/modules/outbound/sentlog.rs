// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use crate::{
    id,
    modules::{
        account::entity::SendBackendKind,
        database::{
            filter_by_secondary_key_impl, insert_impl, manager::DB_MANAGER, with_transaction,
        },
        error::{code::ErrorCode, PostroomResult},
    },
    raise_error, utc_now,
};

/// One accepted outbound send, per recipient. The bounce correlator reads
/// this log; rows outlive the watch window and are pruned by retention.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[native_model(id = 7, version = 1)]
#[native_db(primary_key(pk -> String))]
pub struct SentLog {
    #[secondary_key(unique)]
    pub id: u64,
    #[secondary_key]
    pub account_id: u64,
    /// Identifier the message was accepted under
    pub message_id: String,
    pub recipient: String,
    pub subject: Option<String>,
    pub sent_at: i64,
    pub backend: SendBackendKind,
}

impl SentLog {
    fn pk(&self) -> String {
        format!("{}_{}", self.sent_at, self.id)
    }

    pub async fn record(
        account_id: u64,
        message_id: &str,
        recipient: &str,
        subject: Option<String>,
        sent_at: i64,
        backend: SendBackendKind,
    ) -> PostroomResult<()> {
        insert_impl(
            DB_MANAGER.meta_db(),
            SentLog {
                id: id!(64),
                account_id,
                message_id: message_id.into(),
                recipient: recipient.into(),
                subject,
                sent_at,
                backend,
            },
        )
        .await
    }

    /// Sends accepted within the trailing window.
    pub async fn recent(account_id: u64, window_millis: i64) -> PostroomResult<Vec<SentLog>> {
        let cutoff = utc_now!() - window_millis;
        let rows: Vec<SentLog> = filter_by_secondary_key_impl(
            DB_MANAGER.meta_db(),
            SentLogKey::account_id,
            account_id,
        )
        .await?;
        Ok(rows.into_iter().filter(|r| r.sent_at >= cutoff).collect())
    }

    /// Retention prune; keeps at least the bounce-watch window of history.
    pub async fn prune_older_than(cutoff: i64) -> PostroomResult<usize> {
        with_transaction(DB_MANAGER.meta_db(), move |rw| {
            let rows: Vec<SentLog> = rw
                .scan()
                .primary()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .all()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
            let mut pruned = 0usize;
            for row in rows {
                if row.sent_at < cutoff {
                    rw.remove(row)
                        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
                    pruned += 1;
                }
            }
            Ok(pruned)
        })
        .await
    }
}
