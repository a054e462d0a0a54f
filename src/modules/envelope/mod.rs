// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use serde::{Deserialize, Serialize};

use crate::calculate_hash;

pub mod attachment;
pub mod entity;
pub mod extractor;
pub mod search;

/// Local flag state of one email row. `seen`/`replied`/`starred` mirror the
/// server; `archived`/`deleted` are local placement flags a sync upsert never
/// touches.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
pub struct EmailFlags {
    pub seen: bool,
    pub starred: bool,
    pub replied: bool,
    pub archived: bool,
    pub deleted: bool,
}

impl EmailFlags {
    pub fn from_imap(flags: &[String]) -> Self {
        let mut out = EmailFlags::default();
        for flag in flags {
            match flag.as_str() {
                "\\Seen" => out.seen = true,
                "\\Answered" => out.replied = true,
                "\\Flagged" => out.starred = true,
                "\\Deleted" => out.deleted = true,
                _ => {}
            }
        }
        out
    }
}

/// Order-insensitive hash used to skip unchanged rows on flag resync.
pub fn flags_to_hash(flags: &EmailFlags) -> u64 {
    let canonical = format!(
        "s{}t{}r{}a{}d{}",
        flags.seen as u8, flags.starred as u8, flags.replied as u8, flags.archived as u8, flags.deleted as u8
    );
    calculate_hash!(&canonical)
}

/// Collapses a sorted UID list into the compact IMAP set form
/// (e.g. `1:3,7,9:10`).
pub fn generate_uid_set(mut uids: Vec<u32>) -> String {
    uids.sort_unstable();
    uids.dedup();
    let mut parts: Vec<String> = Vec::new();
    let mut iter = uids.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let (mut start, mut end) = (first, first);
    for uid in iter {
        if uid == end + 1 {
            end = uid;
        } else {
            parts.push(if start == end {
                start.to_string()
            } else {
                format!("{}:{}", start, end)
            });
            start = uid;
            end = uid;
        }
    }
    parts.push(if start == end {
        start.to_string()
    } else {
        format!("{}:{}", start, end)
    });
    parts.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_set_collapses_runs() {
        assert_eq!(generate_uid_set(vec![1, 2, 3, 7, 9, 10]), "1:3,7,9:10");
        assert_eq!(generate_uid_set(vec![5]), "5");
        assert_eq!(generate_uid_set(vec![]), "");
        assert_eq!(generate_uid_set(vec![3, 1, 2, 2]), "1:3");
    }

    #[test]
    fn imap_flag_mapping() {
        let flags = EmailFlags::from_imap(&[
            "\\Seen".to_string(),
            "\\Answered".to_string(),
            "$Custom".to_string(),
        ]);
        assert!(flags.seen);
        assert!(flags.replied);
        assert!(!flags.starred);
        assert!(!flags.deleted);
    }

    #[test]
    fn flag_hash_tracks_changes() {
        let a = EmailFlags {
            seen: true,
            ..Default::default()
        };
        let b = EmailFlags {
            seen: false,
            ..Default::default()
        };
        assert_ne!(flags_to_hash(&a), flags_to_hash(&b));
        assert_eq!(flags_to_hash(&a), flags_to_hash(&a.clone()));
    }
}
