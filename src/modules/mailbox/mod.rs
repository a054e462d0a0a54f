pub mod entity;

/// Canonical folder names used when an account has no explicit sync set.
/// Server-specific spellings are matched case-insensitively on the suffix.
pub const ESSENTIAL_FOLDERS: [&str; 3] = ["INBOX", "Sent", "Trash"];

/// Whether a discovered folder belongs to the essential default sync set.
pub fn is_essential_folder(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered == "inbox"
        || lowered.ends_with("sent")
        || lowered.ends_with("sent mail")
        || lowered.ends_with("sent items")
        || lowered.ends_with("trash")
        || lowered.ends_with("deleted items")
        || lowered.ends_with("bin")
}

#[cfg(test)]
mod tests {
    use super::is_essential_folder;

    #[test]
    fn essential_defaults_cover_provider_spellings() {
        assert!(is_essential_folder("INBOX"));
        assert!(is_essential_folder("[Gmail]/Sent Mail"));
        assert!(is_essential_folder("Sent Items"));
        assert!(is_essential_folder("Trash"));
        assert!(is_essential_folder("Deleted Items"));
        assert!(!is_essential_folder("Newsletters"));
        assert!(!is_essential_folder("Drafts"));
    }
}
