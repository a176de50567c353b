//! Relay dispatcher and the chat transport port.
//!
//! One inbound webhook runs decode → resolve → render → send exactly once.
//! The pure half ([`Dispatcher::prepare`]) and the sending half
//! ([`Dispatcher::deliver`]) are exposed separately so an HTTP front end can
//! answer the caller as soon as the payload is known to be good and deliver in
//! the background. [`Dispatcher::handle`] runs both.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use crate::{
    ChannelList, ChannelName, DecodeError, DeliveryId, EventKind, RelayConfig, Rendered,
    RenderedLine, Routable, RoutingKey, TransportError,
};

/// Outbound connection to the chat network.
///
/// Implementations are shared by every in-flight dispatch and must make
/// concurrent `send` calls safe (typically by serialising them onto one
/// connection).
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends one line to one channel.
    ///
    /// # Errors
    ///
    /// [`TransportError`] when the line could not be handed to the network.
    /// The dispatcher logs it and carries on; implementations must not retry.
    async fn send(&self, channel: &ChannelName, line: &RenderedLine) -> Result<(), TransportError>;
}

/// A decoded, routed and rendered webhook, ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedDispatch {
    pub delivery_id: DeliveryId,
    pub kind: EventKind,
    pub routing_key: RoutingKey,
    pub channels: ChannelList,
    pub rendered: Rendered,
}

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivery_id: DeliveryId,
    pub kind: EventKind,
    pub channels: Vec<ChannelName>,
    /// Lines rendered (each is sent to every channel).
    pub lines: usize,
    /// Successful (channel, line) sends.
    pub sent: usize,
    /// Failed (channel, line) sends.
    pub failed: usize,
    /// Placeholders substituted while rendering.
    pub render_warnings: usize,
}

/// Result of [`Dispatcher::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The webhook could not be decoded; nothing was sent.
    Rejected(DecodeError),
    /// The webhook was decoded and every (channel, line) pair was attempted.
    Dispatched(DispatchReport),
}

/// Orchestrates one webhook at a time; cheap to share behind an `Arc`.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<RelayConfig>,
    transport: Arc<dyn ChatTransport>,
}

impl Dispatcher {
    pub fn new(config: Arc<RelayConfig>, transport: Arc<dyn ChatTransport>) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Decodes, resolves and renders one webhook. Performs no I/O.
    ///
    /// A decode failure is logged here, once, and returned.
    pub fn prepare(&self, tag: &str, body: &[u8]) -> Result<PreparedDispatch, DecodeError> {
        let event = self
            .config
            .decoder()
            .decode(tag, body)
            .inspect_err(|err| {
                tracing::warn!(
                    event_type = tag,
                    body_bytes = body.len(),
                    error = %err,
                    "Dropping webhook that could not be decoded"
                );
            })?;

        let channels = self.config.mapping().resolve_for(&event).clone();
        let rendered = self.config.renderer().render(&event);

        Ok(PreparedDispatch {
            delivery_id: DeliveryId::new_random(),
            kind: event.kind(),
            routing_key: event.routing_key().clone(),
            channels,
            rendered,
        })
    }

    /// Sends every rendered line to every resolved channel.
    ///
    /// Lines go out in render order; each line goes to the channels in
    /// resolved order. A failed send is logged and does not stop the rest.
    pub async fn deliver(&self, prepared: PreparedDispatch) -> DispatchReport {
        let span = tracing::info_span!(
            "dispatch",
            delivery_id = %prepared.delivery_id,
            kind = %prepared.kind,
            routing_key = %prepared.routing_key,
        );
        self.deliver_inner(prepared).instrument(span).await
    }

    async fn deliver_inner(&self, prepared: PreparedDispatch) -> DispatchReport {
        let PreparedDispatch {
            delivery_id,
            kind,
            channels,
            rendered,
            ..
        } = prepared;

        let mut report = DispatchReport {
            delivery_id,
            kind,
            channels: channels.as_slice().to_vec(),
            lines: rendered.lines.len(),
            sent: 0,
            failed: 0,
            render_warnings: rendered.warnings.len(),
        };

        if rendered.lines.is_empty() {
            tracing::info!("Event rendered no lines; nothing to send");
            return report;
        }

        for line in &rendered.lines {
            for channel in &channels {
                match self.transport.send(channel, line).await {
                    Ok(()) => report.sent += 1,
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(channel = %channel, error = %err, "Failed to send line");
                    }
                }
            }
        }

        tracing::info!(
            channels = report.channels.len(),
            lines = report.lines,
            sent = report.sent,
            failed = report.failed,
            render_warnings = report.render_warnings,
            "Webhook relayed"
        );
        report
    }

    /// Runs [`prepare`](Self::prepare) then [`deliver`](Self::deliver).
    pub async fn handle(&self, tag: &str, body: &[u8]) -> DispatchOutcome {
        match self.prepare(tag, body) {
            Ok(prepared) => DispatchOutcome::Dispatched(self.deliver(prepared).await),
            Err(err) => DispatchOutcome::Rejected(err),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{ChannelMapping, FormatSettings, GroupKey, TemplateSet};

    /// Fails every send to `unreachable`, records the rest.
    #[derive(Default)]
    struct FlakyTransport {
        unreachable: Option<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ChatTransport for FlakyTransport {
        async fn send(
            &self,
            channel: &ChannelName,
            line: &RenderedLine,
        ) -> Result<(), TransportError> {
            if self.unreachable.as_deref() == Some(channel.as_str()) {
                return Err(TransportError::NotConnected);
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), line.to_string()));
            Ok(())
        }
    }

    fn channels(names: &[&str]) -> ChannelList {
        ChannelList::new(names.iter().map(|n| ChannelName::new(*n).unwrap()).collect()).unwrap()
    }

    fn config() -> Arc<RelayConfig> {
        let mapping = ChannelMapping::single(ChannelName::new("#general").unwrap())
            .with_group(GroupKey::new("acme").unwrap(), channels(&["#a", "#b"]));
        Arc::new(
            RelayConfig::new(mapping, TemplateSet::builtin(), FormatSettings::default()).unwrap(),
        )
    }

    fn push_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "before": "95790bf891e76fee5e1747ab589903a6a1f80f22",
            "after": "da1560886d4f094c3e6c9ef40349f7d38b5d27d7",
            "ref": "refs/heads/main",
            "user_name": "John",
            "project": { "name": "web", "namespace": "acme" },
            "commits": [
                { "id": "b6568db1bc1dcd7f", "message": "one", "author": { "name": "J" } },
                { "id": "da1560886d4f094c", "message": "two", "author": { "name": "J" } },
            ],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn lines_keep_order_within_each_channel() {
        let transport = Arc::new(FlakyTransport::default());
        let dispatcher = Dispatcher::new(config(), transport.clone());

        let DispatchOutcome::Dispatched(report) = dispatcher.handle("Push Hook", &push_body()).await
        else {
            panic!("expected dispatch");
        };
        assert_eq!(report.lines, 3);
        assert_eq!(report.sent, 6);

        let sent = transport.sent.lock().unwrap();
        let channel_order: Vec<_> = sent.iter().map(|(c, _)| c.as_str()).collect();
        assert_eq!(channel_order, ["#a", "#b", "#a", "#b", "#a", "#b"]);
        for channel in ["#a", "#b"] {
            let lines: Vec<_> = sent
                .iter()
                .filter(|(c, _)| c == channel)
                .map(|(_, l)| l.as_str())
                .collect();
            assert!(lines[0].contains("pushed 2 new commits"));
            assert!(lines[1].ends_with(": one"));
            assert!(lines[2].ends_with(": two"));
        }
    }

    #[tokio::test]
    async fn failed_channel_does_not_stop_the_others() {
        let transport = Arc::new(FlakyTransport {
            unreachable: Some("#a".to_string()),
            ..FlakyTransport::default()
        });
        let dispatcher = Dispatcher::new(config(), transport.clone());

        let DispatchOutcome::Dispatched(report) = dispatcher.handle("Push Hook", &push_body()).await
        else {
            panic!("expected dispatch");
        };
        assert_eq!(report.failed, 3);
        assert_eq!(report.sent, 3);
        assert!(transport.sent.lock().unwrap().iter().all(|(c, _)| c == "#b"));
    }

    #[test]
    fn prepare_resolves_and_renders_without_sending() {
        let transport = Arc::new(FlakyTransport::default());
        let dispatcher = Dispatcher::new(config(), transport.clone());

        let prepared = dispatcher.prepare("Push Hook", &push_body()).unwrap();
        assert_eq!(prepared.kind, EventKind::Push);
        assert_eq!(prepared.routing_key.as_str(), "acme/web");
        assert_eq!(prepared.channels, channels(&["#a", "#b"]));
        assert_eq!(prepared.rendered.lines.len(), 3);
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_alert_batch_sends_nothing() {
        let transport = Arc::new(FlakyTransport::default());
        let dispatcher = Dispatcher::new(config(), transport.clone());

        let outcome = dispatcher
            .handle("Alertmanager", br#"{"receiver":"ops","status":"firing","alerts":[]}"#)
            .await;
        let DispatchOutcome::Dispatched(report) = outcome else {
            panic!("expected dispatch");
        };
        assert_eq!(report.lines, 0);
        assert_eq!(report.channels, vec![ChannelName::new("#general").unwrap()]);
        assert!(transport.sent.lock().unwrap().is_empty());
    }
}
