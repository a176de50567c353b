//! Webhook-to-IRC relay entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse flags** (`args`) and **wire observability** (`observability`).
//! 2. **Load configuration**: read the channel mapping file and validate it
//!    into a [`relay::RelayConfig`]. Any error is fatal; `--validate` stops
//!    here after printing a summary.
//! 3. **Construct infrastructure**: connect the IRC transport, spawn its
//!    receive loop, and inject the client into a [`relay::Dispatcher`].
//! 4. **Serve**: run the webhook listener until Ctrl-C, or until the IRC
//!    session ends. The relay does not reconnect; a lost IRC session exits
//!    non-zero so a supervisor can restart it.

mod args;
mod observability;

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context};
use clap::Parser;
use irc_transport::{IrcConfig, SessionTimeouts};
use relay::{Dispatcher, RelayConfig};

use crate::args::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let telemetry = observability::init(cli.log_format, cli.otlp_endpoint.as_deref())?;

    let result = run(cli).await;
    if let Err(err) = &result {
        tracing::error!(error = ?err, "Relay stopped");
    }

    telemetry.shutdown();
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::info!(path = %cli.channel_mapping.display(), "Loading channel mapping");
    let config = Arc::new(load_config(&cli.channel_mapping)?);

    if cli.validate {
        println!("{}", summary(&cli.channel_mapping, &config));
        return Ok(());
    }

    ensure!(
        irc_transport::is_valid_nickname(&cli.nickname),
        "invalid nickname '{}'",
        cli.nickname
    );

    let irc_config = IrcConfig {
        host: cli.host,
        port: cli.port,
        nickname: cli.nickname,
        realname: cli.gecos,
        ca_file: cli.ca_file,
        timeouts: SessionTimeouts::default(),
    };
    let (client, event_loop) = irc_transport::connect(&irc_config, config.mapping().all_channels())
        .await
        .with_context(|| format!("cannot connect to {}:{}", irc_config.host, irc_config.port))?;
    let mut irc_session = tokio::spawn(event_loop.run());

    let dispatcher = Arc::new(Dispatcher::new(config, Arc::new(client.clone())));

    tokio::select! {
        served = listener::serve(cli.listen, dispatcher, shutdown_signal()) => {
            served.context("webhook listener failed")?;
            if let Err(err) = client.quit("shutting down").await {
                tracing::warn!(error = %err, "Failed to send QUIT");
            }
            irc_session.abort();
            tracing::info!("Relay shut down");
            Ok(())
        }
        ended = &mut irc_session => {
            let reason = ended.context("IRC receive loop panicked")?;
            Err(anyhow!(reason).context("IRC session ended"))
        }
    }
}

/// Reads and validates the channel mapping file.
fn load_config(path: &Path) -> anyhow::Result<RelayConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read channel mapping '{}'", path.display()))?;
    RelayConfig::from_yaml_str(&text)
        .with_context(|| format!("invalid channel mapping '{}'", path.display()))
}

fn summary(path: &Path, config: &RelayConfig) -> String {
    let mapping = config.mapping();
    let settings = config.settings();
    format!(
        "Configuration is valid: {}\n  Default channel: {}\n  Groups: {}\n  Explicit mappings: {}\n  Channels to join: {}\n  Short id length: {}\n  Max line bytes: {}",
        path.display(),
        mapping.default_channel(),
        mapping.group_count(),
        mapping.explicit_count(),
        mapping.all_channels().len(),
        settings.short_id_len(),
        settings.max_line_bytes(),
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Cannot listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn mapping_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_mapping_file() {
        let file = mapping_file(
            r##"
default: "#general"
groups:
  acme: ["#acme"]
explicit:
  acme/web: ["#web-ci", "#acme"]
"##,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.mapping().default_channel().as_str(), "#general");

        let text = summary(file.path(), &config);
        assert!(text.contains("Default channel: #general"));
        assert!(text.contains("Groups: 1"));
        assert!(text.contains("Explicit mappings: 1"));
        assert!(text.contains("Channels to join: 3"));
        assert!(text.contains("Short id length: 7"));
    }

    #[test]
    fn missing_file_names_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yml");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.yml"));
    }

    #[test]
    fn invalid_mapping_is_rejected() {
        let file = mapping_file("groups:\n  acme: [\"#acme\"]\n");
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").starts_with("invalid channel mapping"));
    }

    #[test]
    fn out_of_range_render_setting_is_rejected() {
        let file = mapping_file("default: \"#general\"\nrender:\n  short_id_len: 2\n");
        assert!(load_config(file.path()).is_err());
    }
}
