//! Newtype domain identifiers.
//!
//! Every relay concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`RoutingKey`] with a [`ChannelName`] even though both are strings under the
//! hood.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                if v.is_empty() { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Macro for u64-wrapped newtypes (platform-assigned integers).
// Generates: struct (Copy), new(), as_u64(), Display.
// ---------------------------------------------------------------------------
macro_rules! u64_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new identifier from a raw integer.
            pub fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the underlying integer value.
            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: platform-integer-backed
// ---------------------------------------------------------------------------

u64_id! {
    /// The project-scoped issue number (GitLab `iid`), as shown to humans
    /// after a `#`.
    IssueNumber
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single inbound webhook delivery.
///
/// Generated fresh for every request that decodes successfully; recorded on the
/// dispatch span so every line sent for one webhook can be correlated in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeliveryId(Uuid);

impl DeliveryId {
    /// Generates a new random delivery identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying [`Uuid`].
    pub fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// Identity used to pick the destination channels of an event.
    ///
    /// `"<namespace>/<project>"` for GitLab events, the Alertmanager receiver
    /// name for alert batches. Matched case-sensitively against the
    /// `explicit` section of the channel mapping.
    RoutingKey
}

string_id! {
    /// The coarser routing identity (the GitLab namespace alone).
    ///
    /// Matched case-sensitively against the `groups` section of the channel
    /// mapping.
    GroupKey
}

string_id! {
    /// A Git commit id as delivered by the hosting platform (normally a
    /// 40-character lowercase hex string, but never assumed to be).
    CommitSha
}

impl CommitSha {
    /// Returns the first `len` characters of the id, or the whole id when it is
    /// shorter than `len` (or when `len` does not fall on a char boundary).
    pub fn short(&self, len: usize) -> &str {
        self.0.get(..len).unwrap_or(&self.0)
    }

    /// Returns `true` for the all-zero id GitLab sends as `before` when a
    /// branch is created (and as `after` when one is deleted).
    pub fn is_null(&self) -> bool {
        self.0.bytes().all(|b| b == b'0')
    }
}

/// An IRC channel name (e.g. `"#web-ci"`).
///
/// IRC forbids spaces, commas and control characters in channel names; those
/// are rejected at construction so a configured channel can always be placed
/// verbatim on a protocol line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    /// Creates a channel name, returning `None` if the value is empty or
    /// contains whitespace, a comma, or a control character.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let v = value.into();
        let valid = !v.is_empty()
            && !v
                .chars()
                .any(|c| c.is_whitespace() || c == ',' || c.is_control());
        if valid {
            Some(Self(v))
        } else {
            None
        }
    }

    /// Returns the channel name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_commit_id_takes_prefix() {
        let sha = CommitSha::new("b6568db1bc1dcd7f8b4d5a946b0b91f9dacd7327").unwrap();
        assert_eq!(sha.short(7), "b6568db");
        assert_eq!(sha.short(8), "b6568db1");
    }

    #[test]
    fn short_commit_id_falls_back_to_full_id_when_too_short() {
        let sha = CommitSha::new("abc12").unwrap();
        assert_eq!(sha.short(7), "abc12");
    }

    #[test]
    fn short_commit_id_never_splits_a_multibyte_char() {
        let sha = CommitSha::new("abcdeé12").unwrap();
        // Byte 6 falls inside 'é'.
        assert_eq!(sha.short(6), "abcdeé12");
    }

    #[test]
    fn null_commit_id_is_detected() {
        assert!(CommitSha::new("0000000000000000000000000000000000000000")
            .unwrap()
            .is_null());
        assert!(!CommitSha::new("0000001").unwrap().is_null());
    }

    #[test]
    fn channel_name_rejects_protocol_breaking_characters() {
        assert!(ChannelName::new("#web-ci").is_some());
        assert!(ChannelName::new("").is_none());
        assert!(ChannelName::new("#web ci").is_none());
        assert!(ChannelName::new("#a,#b").is_none());
        assert!(ChannelName::new("#bell\x07").is_none());
    }

    #[test]
    fn empty_string_identifiers_are_rejected() {
        assert!(RoutingKey::new("").is_none());
        assert_eq!(RoutingKey::new("acme/web").unwrap().as_str(), "acme/web");
    }
}
