//! Core domain of the webhook → IRC relay.
//!
//! This crate turns one inbound webhook (an event-type tag plus a JSON body)
//! into the chat lines it should produce and the channels they go to, then
//! hands each (channel, line) pair to a [`ChatTransport`]. Infrastructure
//! crates implement the transport and the HTTP front end; they add no relay
//! rules of their own.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is sent *where*; infrastructure crates define *how*.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RoutingKey`, `ChannelName`, `DeliveryId`, …) |
//! | [`types`] | Normalised events, the `Routable` capability, `RenderedLine` |
//! | [`errors`] | `ConfigError`, `DecodeError`, `RenderWarning`, `TransportError` |
//! | [`decoder`] | Event decoder: tag + body → `NormalizedEvent` |
//! | [`mapping`] | Tiered channel mapping and the resolver |
//! | [`render`] | Template set and renderer |
//! | [`config`] | YAML configuration document → `RelayConfig` |
//! | [`dispatch`] | `Dispatcher` and the `ChatTransport` port |

pub mod config;
pub mod decoder;
pub mod dispatch;
pub mod errors;
pub mod identifiers;
pub mod mapping;
pub mod render;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::{ConfigDocument, RelayConfig, RenderSection, TemplateOverrides};
pub use decoder::EventDecoder;
pub use dispatch::{ChatTransport, DispatchOutcome, DispatchReport, Dispatcher, PreparedDispatch};
pub use errors::{ConfigError, DecodeError, RenderWarning, TransportError};
pub use identifiers::{ChannelName, CommitSha, DeliveryId, GroupKey, IssueNumber, RoutingKey};
pub use mapping::{resolve, ChannelList, ChannelMapping};
pub use render::{
    FormatSettings, Rendered, Renderer, TemplateSet, DEFAULT_MAX_LINE_BYTES,
    DEFAULT_SHORT_ID_LEN, TRUNCATION_MARKER,
};
pub use types::{
    Alert, AlertBatch, AlertStatus, CommitSummary, EventKind, IssueAction, IssueEvent,
    NormalizedEvent, Project, PushEvent, Routable, RenderedLine,
};
