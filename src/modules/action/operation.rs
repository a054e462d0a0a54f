// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    modules::{
        envelope::entity::EmailEnvelope,
        error::{code::ErrorCode, PostroomError, PostroomResult},
        imap::MailGateway,
    },
    raise_error,
};

/// Schema version of the persisted operation form. Loading refuses any
/// other value instead of guessing.
pub const OPERATION_SCHEMA_VERSION: u32 = 1;

pub const INBOX_FOLDER: &str = "INBOX";

/// A reversible user-visible mutation. Execution applies the server
/// mutation first, then the store write-through; a store failure after
/// server success is logged and the server state stands (the next sync
/// reconverges).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    MarkRead {
        email_id: u64,
        new: bool,
        old: bool,
    },
    /// Store-only flag; the wire has no portable star mutation.
    MarkStarred {
        email_id: u64,
        new: bool,
        old: bool,
    },
    Archive {
        email_id: u64,
        /// Where the message lands, needed to reverse the move
        archive_folder: String,
    },
    Delete {
        email_id: u64,
    },
    Move {
        email_id: u64,
        from: String,
        to: String,
    },
    Batch {
        ops: Vec<Operation>,
    },
}

/// Self-describing persisted form.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PersistedOperation {
    pub version: u32,
    #[serde(flatten)]
    pub op: Operation,
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::MarkRead { .. } => "mark_read",
            Operation::MarkStarred { .. } => "mark_starred",
            Operation::Archive { .. } => "archive",
            Operation::Delete { .. } => "delete",
            Operation::Move { .. } => "move",
            Operation::Batch { .. } => "batch",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Operation::MarkRead { new: true, .. } => "Mark as read".into(),
            Operation::MarkRead { new: false, .. } => "Mark as unread".into(),
            Operation::MarkStarred { new: true, .. } => "Star message".into(),
            Operation::MarkStarred { new: false, .. } => "Unstar message".into(),
            Operation::Archive { .. } => "Archive message".into(),
            Operation::Delete { .. } => "Delete message".into(),
            Operation::Move { from, to, .. } => format!("Move from {} to {}", from, to),
            Operation::Batch { ops } => format!("Batch of {} operations", ops.len()),
        }
    }

    pub fn serialize(&self) -> PostroomResult<String> {
        serde_json::to_string(&PersistedOperation {
            version: OPERATION_SCHEMA_VERSION,
            op: self.clone(),
        })
        .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))
    }

    /// Total reconstruction from the persisted form; unknown schema
    /// versions are refused, never guessed at.
    pub fn deserialize(data: &str) -> PostroomResult<Operation> {
        let persisted: PersistedOperation = serde_json::from_str(data)
            .map_err(|e| raise_error!(format!("{:#?}", e), ErrorCode::InternalError))?;
        if persisted.version != OPERATION_SCHEMA_VERSION {
            return Err(raise_error!(
                format!(
                    "Refusing operation with unknown schema version {}",
                    persisted.version
                ),
                ErrorCode::InternalError
            ));
        }
        Ok(persisted.op)
    }

    pub async fn execute<G: MailGateway>(&self, gateway: &G) -> PostroomResult<()> {
        match self {
            Operation::Batch { ops } => {
                for (applied, op) in ops.iter().enumerate() {
                    if let Err(err) = op.execute_single(gateway).await {
                        // Roll back the applied prefix in reverse order.
                        for done in ops[..applied].iter().rev() {
                            if let Err(rollback_err) = done.undo_single(gateway).await {
                                warn!(
                                    "Rollback of '{}' failed: {:?}",
                                    done.describe(),
                                    rollback_err
                                );
                            }
                        }
                        return Err(err);
                    }
                }
                Ok(())
            }
            single => single.execute_single(gateway).await,
        }
    }

    pub async fn undo<G: MailGateway>(&self, gateway: &G) -> PostroomResult<()> {
        match self {
            Operation::Batch { ops } => {
                for op in ops.iter().rev() {
                    op.undo_single(gateway).await?;
                }
                Ok(())
            }
            single => single.undo_single(gateway).await,
        }
    }

    async fn execute_single<G: MailGateway>(&self, gateway: &G) -> PostroomResult<()> {
        match self {
            Operation::MarkRead { email_id, new, .. } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway
                    .mark_read(&email.folder_name, email.uid, *new)
                    .await?;
                tolerate_store_failure(EmailEnvelope::mark_as_read(*email_id, *new).await);
                Ok(())
            }
            Operation::MarkStarred { email_id, new, .. } => {
                EmailEnvelope::mark_as_starred(*email_id, *new).await
            }
            Operation::Archive { email_id, .. } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway.archive(&email.folder_name, email.uid).await?;
                tolerate_store_failure(EmailEnvelope::mark_as_archived(*email_id, true).await);
                Ok(())
            }
            Operation::Delete { email_id } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway.delete(&email.folder_name, email.uid).await?;
                tolerate_store_failure(EmailEnvelope::mark_as_deleted(*email_id, true).await);
                Ok(())
            }
            Operation::Move { email_id, from, to } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway.move_to_folder(from, email.uid, to).await?;
                // The row leaves its source folder; the target folder's next
                // sync mirrors the message under its new UID.
                tolerate_store_failure(EmailEnvelope::mark_as_deleted(*email_id, true).await);
                Ok(())
            }
            Operation::Batch { .. } => Err(raise_error!(
                "Nested batch operations are not supported".into(),
                ErrorCode::InvalidParameter
            )),
        }
    }

    async fn undo_single<G: MailGateway>(&self, gateway: &G) -> PostroomResult<()> {
        match self {
            Operation::MarkRead { email_id, old, .. } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway
                    .mark_read(&email.folder_name, email.uid, *old)
                    .await?;
                tolerate_store_failure(EmailEnvelope::mark_as_read(*email_id, *old).await);
                Ok(())
            }
            Operation::MarkStarred { email_id, old, .. } => {
                EmailEnvelope::mark_as_starred(*email_id, *old).await
            }
            Operation::Archive {
                email_id,
                archive_folder,
            } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway
                    .move_to_folder(archive_folder, email.uid, INBOX_FOLDER)
                    .await?;
                tolerate_store_failure(EmailEnvelope::mark_as_archived(*email_id, false).await);
                Ok(())
            }
            Operation::Delete { email_id } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway.undelete(&email.folder_name, email.uid).await?;
                tolerate_store_failure(EmailEnvelope::mark_as_deleted(*email_id, false).await);
                Ok(())
            }
            Operation::Move { email_id, from, to } => {
                let email = EmailEnvelope::get(*email_id).await?;
                gateway.move_to_folder(to, email.uid, from).await?;
                tolerate_store_failure(EmailEnvelope::mark_as_deleted(*email_id, false).await);
                Ok(())
            }
            Operation::Batch { .. } => Err(raise_error!(
                "Nested batch operations are not supported".into(),
                ErrorCode::InvalidParameter
            )),
        }
    }
}

fn tolerate_store_failure(result: Result<(), PostroomError>) {
    if let Err(err) = result {
        warn!(
            "Store write-through failed after server mutation succeeded: {:?}",
            err
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_form_is_versioned_and_tagged() {
        let op = Operation::MarkRead {
            email_id: 42,
            new: true,
            old: false,
        };
        let json = op.serialize().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["kind"], "mark_read");

        let roundtripped = Operation::deserialize(&json).unwrap();
        assert_eq!(roundtripped, op);
    }

    #[test]
    fn unknown_schema_version_is_refused() {
        let json = r#"{"version":2,"kind":"delete","email_id":7}"#;
        let err = Operation::deserialize(json).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn descriptions_name_the_mutation() {
        assert_eq!(
            Operation::MarkRead {
                email_id: 1,
                new: false,
                old: true
            }
            .describe(),
            "Mark as unread"
        );
        assert_eq!(
            Operation::Move {
                email_id: 1,
                from: "INBOX".into(),
                to: "Receipts".into()
            }
            .describe(),
            "Move from INBOX to Receipts"
        );
    }
}
