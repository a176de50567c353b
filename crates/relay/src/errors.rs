//! Error and warning types for the relay domain.
//!
//! Each type belongs to exactly one stage of the pipeline and carries its own
//! recovery rule:
//!
//! | Type | Stage | Recovery |
//! |------|-------|----------|
//! | [`ConfigError`] | start-up | fatal; the process exits |
//! | [`DecodeError`] | per request | log and drop that request |
//! | [`RenderWarning`] | per line | substitute a placeholder and continue |
//! | [`TransportError`] | per line | log and continue with remaining lines/channels |
//!
//! Nothing is retried.

use thiserror::Error;

use crate::{ChannelName, EventKind};

// ---------------------------------------------------------------------------
// Start-up
// ---------------------------------------------------------------------------

/// The relay configuration is invalid.
///
/// Produced at load time only; the relay never starts with an invalid config.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The document could not be parsed as YAML of the expected shape.
    #[error("Configuration could not be parsed: {message}")]
    Parse {
        /// Parser diagnostic, including line/column where available.
        message: String,
    },

    /// A channel name is empty or contains characters IRC forbids.
    #[error("Invalid channel name '{name}' in {section}")]
    InvalidChannelName {
        /// Where the name was found (e.g. `"groups.acme"`).
        section: String,
        name: String,
    },

    /// A group or explicit entry maps to no channels.
    #[error("Empty channel list for {section}")]
    EmptyChannelList { section: String },

    /// A group or explicit entry has an empty key.
    #[error("Empty key in {section}")]
    EmptyKey { section: String },

    /// A render setting is outside its permitted range.
    #[error("Invalid render setting {setting} = {value}: {reason}")]
    InvalidRenderSetting {
        setting: &'static str,
        value: usize,
        reason: &'static str,
    },

    /// A message template does not parse.
    #[error("Template '{template}' is invalid: {message}")]
    InvalidTemplate {
        template: &'static str,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Per request
// ---------------------------------------------------------------------------

/// An inbound webhook could not be turned into a [`crate::NormalizedEvent`].
///
/// The request is dropped; it is never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The event-type tag is not one the relay understands.
    #[error("Unknown event type '{0}'")]
    UnknownEventType(String),

    /// The body is not JSON of the shape the event type requires, or a field
    /// holds a value that cannot be interpreted (e.g. a branch ref with too
    /// few segments).
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// A template could not be evaluated for one item; a placeholder line was
/// emitted in its place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Rendering the {template} template for a {kind} event failed: {message}")]
pub struct RenderWarning {
    /// Event kind being rendered.
    pub kind: EventKind,
    /// Template that failed (`push`, `commit`, `issue` or `alert`).
    pub template: &'static str,
    /// Template engine diagnostic.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Per line
// ---------------------------------------------------------------------------

/// A line could not be handed to the chat network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is not (or no longer) established.
    #[error("Not connected to the chat network")]
    NotConnected,

    /// The server closed the session (`ERROR` or end of stream).
    #[error("Connection closed: {reason}")]
    Closed { reason: String },

    /// The line cannot be carried by the protocol (embedded CR/LF, or too
    /// long once framed).
    #[error("Line rejected for {channel}: {reason}")]
    InvalidLine {
        channel: ChannelName,
        reason: &'static str,
    },

    /// Connecting, the TLS handshake, or a write failed.
    #[error("Transport I/O failure: {message}")]
    Io { message: String },

    /// The TLS configuration (CA file, server name) is unusable.
    #[error("TLS setup failed: {message}")]
    Tls { message: String },
}
