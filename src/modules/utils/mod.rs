// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use base64::{engine::general_purpose, Engine};

use super::error::code::ErrorCode;
use crate::raise_error;

#[macro_export]
macro_rules! postroom_version {
    () => {
        env!("CARGO_PKG_VERSION")
    };
}

#[macro_export]
macro_rules! utc_now {
    () => {{
        use chrono::Utc;
        Utc::now().timestamp_millis()
    }};
}

#[macro_export]
macro_rules! raise_error {
    ($msg:expr, $code:expr) => {
        $crate::modules::error::PostroomError::Generic {
            message: $msg,
            location: snafu::Location::default(),
            code: $code,
        }
    };
}

#[macro_export]
macro_rules! base64_encode {
    ($bytes:expr) => {{
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode($bytes)
    }};
}

#[macro_export]
macro_rules! decode_mailbox_name {
    ($name:expr) => {{
        utf7_imap::decode_utf7_imap($name.to_string())
    }};
}

#[macro_export]
macro_rules! encode_mailbox_name {
    ($name:expr) => {{
        utf7_imap::encode_utf7_imap($name.to_string())
    }};
}

#[macro_export]
macro_rules! get_encoding {
    ($label:expr) => {
        encoding_rs::Encoding::for_label($label.as_bytes())
    };
}

#[macro_export]
macro_rules! validate_email {
    ($email:expr) => {{
        $crate::modules::utils::validate_email($email)
    }};
}

#[macro_export]
macro_rules! calculate_hash {
    ($name:expr) => {
        $crate::modules::utils::hash($name)
    };
}

#[macro_export]
macro_rules! id {
    ($bit_strength:expr) => {{
        let token = $crate::modules::utils::generate_token_impl($bit_strength);
        $crate::modules::utils::hash(&token)
    }};
}

pub(crate) fn generate_token_impl(bit_strength: usize) -> String {
    let byte_length = (bit_strength + 23) / 24 * 3;
    let random_bytes: Vec<u8> = (0..byte_length).map(|_| rand::random::<u8>()).collect();
    general_purpose::URL_SAFE.encode(&random_bytes)
}

pub fn validate_email(email: &str) -> crate::modules::error::PostroomResult<()> {
    use std::str::FromStr;
    let email_address = email_address::EmailAddress::from_str(email).map_err(|_| {
        raise_error!(
            format!("Invalid email format : {}", email),
            ErrorCode::InvalidParameter
        )
    })?;
    if email != email_address.email() {
        return Err(raise_error!(
            format!("Invalid email format: {}", email),
            ErrorCode::InvalidParameter
        ));
    }
    Ok(())
}

/// Generates a 64-bit hash from a string, ensuring the output is within JavaScript's safe integer range (0 to 2^53 - 1).
pub fn hash(s: &str) -> u64 {
    let mut cursor = std::io::Cursor::new(s.as_bytes().to_vec());
    let hash = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap();
    (hash & 0x1F_FFFF_FFFF_FFFF) as u64
}

/// Stable folder identifier derived from the owning account and the decoded
/// mailbox name. Folder renames produce a new id; UIDs are scoped under it.
pub fn folder_id(account_id: u64, folder_name: &str) -> u64 {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&account_id.to_le_bytes());
    buffer.push(b':');
    buffer.extend_from_slice(folder_name.as_bytes());
    let mut cursor = std::io::Cursor::new(buffer);
    let hash = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap();
    hash as u64
}

/// Stable row identifier for the (account, folder, uid) tuple. Uniqueness of
/// this value in the email table is what enforces the UID-uniqueness
/// invariant.
pub fn email_entry_id(account_id: u64, folder_id: u64, uid: u32) -> u64 {
    let mut buffer = Vec::with_capacity(8 + 8 + 4);
    buffer.extend_from_slice(&account_id.to_be_bytes());
    buffer.extend_from_slice(&folder_id.to_be_bytes());
    buffer.extend_from_slice(&uid.to_be_bytes());
    let mut cursor = std::io::Cursor::new(buffer);
    let hash = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap();
    hash as u64
}

/// Stable attachment identifier for a part within an email.
pub fn attachment_id(email_id: u64, part_number: &str) -> u64 {
    let mut buffer = Vec::with_capacity(8 + 1 + part_number.len());
    buffer.extend_from_slice(&email_id.to_be_bytes());
    buffer.push(b'.');
    buffer.extend_from_slice(part_number.as_bytes());
    let mut cursor = std::io::Cursor::new(buffer);
    let hash = murmur3::murmur3_x64_128(&mut cursor, 0).unwrap();
    hash as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_ids_are_stable_and_distinct() {
        let folder = folder_id(7, "INBOX");
        assert_eq!(folder, folder_id(7, "INBOX"));
        assert_ne!(folder, folder_id(7, "Sent"));
        assert_ne!(folder, folder_id(8, "INBOX"));

        let a = email_entry_id(7, folder, 10);
        let b = email_entry_id(7, folder, 11);
        assert_eq!(a, email_entry_id(7, folder, 10));
        assert_ne!(a, b);
    }

    #[test]
    fn hash_fits_safe_integer_range() {
        let h = hash("some-message-id@example.com");
        assert!(h <= 0x1F_FFFF_FFFF_FFFF);
    }
}
