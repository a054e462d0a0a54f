// Copyright © 2025 postroom.dev
// Licensed under Postroom License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use mail_parser::{Addr as MimeAddr, Address as MimeAddress};
use mail_send::mail_builder::headers::address::Address as SmtpAddress;
use mail_send::mail_builder::headers::address::EmailAddress as SmtpEmailAddress;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::ops::Deref;

pub mod cancel;
pub mod signal;
pub mod tls;

#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Addr {
    /// The optional display name associated with the email address (e.g., "John Doe").
    pub name: Option<String>,
    /// The optional email address (e.g., "john.doe@example.com").
    /// Typically at least one of `name` or `address` is present.
    pub address: Option<String>,
}

impl Addr {
    pub fn new(name: Option<&str>, address: &str) -> Self {
        Addr {
            name: name.map(Into::into),
            address: Some(address.into()),
        }
    }

    pub fn parse(s: &str) -> Self {
        let re = Regex::new(r#"(?:(?P<name>.*)\s*)?<(?P<email>[^<>]+)>"#).unwrap();
        if let Some(caps) = re.captures(s) {
            let name: Option<String> = caps.name("name").map(|m| m.as_str().trim().into());
            let email: Option<String> = caps.name("email").map(|m| m.as_str().trim().into());
            Addr {
                name: name.filter(|n| !n.is_empty()),
                address: email,
            }
        } else {
            let s_trimmed = s.trim();
            Addr {
                name: None,
                address: if s_trimmed.is_empty() {
                    None
                } else {
                    Some(s_trimmed.into())
                },
            }
        }
    }
}

impl std::fmt::Display for Addr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.name, &self.address) {
            (Some(name), Some(address)) => write!(f, "{} <{}>", name, address),
            (None, Some(address)) => write!(f, "<{}>", address),
            (Some(name), None) => write!(f, "{}", name),
            (None, None) => write!(f, ""),
        }
    }
}

impl<'x> From<&MimeAddr<'x>> for Addr {
    fn from(original: &MimeAddr<'x>) -> Self {
        Addr {
            name: original.name.as_ref().map(|s| s.to_string()),
            address: original.address.as_ref().map(|s| s.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddrVec(pub Vec<Addr>);

impl Deref for AddrVec {
    type Target = Vec<Addr>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'x> From<&MimeAddress<'x>> for AddrVec {
    fn from(original: &MimeAddress<'x>) -> Self {
        let vec = match original {
            MimeAddress::List(addrs) => addrs.iter().map(Addr::from).collect(),
            MimeAddress::Group(groups) => groups
                .iter()
                .flat_map(|group| group.addresses.iter().map(Addr::from))
                .collect(),
        };
        AddrVec(vec)
    }
}

impl<'x> From<Addr> for SmtpAddress<'x> {
    fn from(addr: Addr) -> Self {
        SmtpAddress::Address(SmtpEmailAddress {
            name: addr.name.map(Cow::Owned),
            email: Cow::Owned(addr.address.unwrap_or_default()),
        })
    }
}

/// Render a list of addresses the way email headers carry them, for storage
/// in comma-separated columns.
pub fn join_addr_list(addrs: &[Addr]) -> String {
    addrs
        .iter()
        .filter_map(|a| a.address.clone())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_and_address() {
        let addr = Addr::parse("John Doe <john@example.com>");
        assert_eq!(addr.name.as_deref(), Some("John Doe"));
        assert_eq!(addr.address.as_deref(), Some("john@example.com"));
    }

    #[test]
    fn parse_bare_address() {
        let addr = Addr::parse("  jane@example.com ");
        assert_eq!(addr.name, None);
        assert_eq!(addr.address.as_deref(), Some("jane@example.com"));
    }

    #[test]
    fn join_skips_nameless_entries() {
        let joined = join_addr_list(&[
            Addr::new(Some("A"), "a@x.y"),
            Addr {
                name: Some("ghost".into()),
                address: None,
            },
            Addr::new(None, "b@x.y"),
        ]);
        assert_eq!(joined, "a@x.y, b@x.y");
    }
}
