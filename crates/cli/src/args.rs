//! Command-line flags. Every flag can also be supplied through the
//! environment; an explicit flag wins.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per event, for log aggregation.
    Json,
}

/// Relays GitLab and Alertmanager webhooks to IRC channels.
#[derive(Parser, Debug)]
#[command(name = "gitlab-irc-relay", version)]
pub struct Cli {
    /// Hostname of the IRC server.
    #[arg(long, env = "IRC_HOST", default_value = "irc.hackint.org")]
    pub host: String,

    /// TLS port of the IRC server.
    #[arg(long, alias = "sslport", env = "IRC_PORT", default_value_t = 6697)]
    pub port: u16,

    /// Nickname to assume once connected.
    #[arg(long, env = "IRC_NICKNAME", default_value = "go-gitlab-irc")]
    pub nickname: String,

    /// Real name to assume once connected.
    #[arg(long, env = "IRC_GECOS", default_value = "go-gitlab-irc")]
    pub gecos: String,

    /// Path to the channel mapping file.
    #[arg(
        long,
        alias = "channelmapping",
        env = "CHANNEL_MAPPING",
        default_value = "channelmapping.yml"
    )]
    pub channel_mapping: PathBuf,

    /// PEM file with the CA that verifies the server certificate.
    #[arg(long, alias = "cafile", env = "IRC_CA_FILE", default_value = "hackint-rootca.crt")]
    pub ca_file: PathBuf,

    /// Address the webhook listener binds to.
    #[arg(long, env = "LISTEN_ADDR", default_value = "127.0.0.1:8084")]
    pub listen: SocketAddr,

    /// Log format: text or json.
    #[arg(long, value_enum, env = "LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// OTLP (gRPC) endpoint to export trace spans to.
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Validate the channel mapping file and exit.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_public_network() {
        let cli = Cli::try_parse_from(["gitlab-irc-relay"]).unwrap();
        assert_eq!(cli.host, "irc.hackint.org");
        assert_eq!(cli.port, 6697);
        assert_eq!(cli.nickname, "go-gitlab-irc");
        assert_eq!(cli.gecos, "go-gitlab-irc");
        assert_eq!(cli.channel_mapping, PathBuf::from("channelmapping.yml"));
        assert_eq!(cli.ca_file, PathBuf::from("hackint-rootca.crt"));
        assert_eq!(cli.listen, "127.0.0.1:8084".parse().unwrap());
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.otlp_endpoint.is_none());
        assert!(!cli.validate);
    }

    #[test]
    fn legacy_flag_spellings_are_accepted() {
        let cli = Cli::try_parse_from([
            "gitlab-irc-relay",
            "--sslport",
            "7000",
            "--channelmapping",
            "/etc/relay/mapping.yml",
            "--cafile",
            "/etc/relay/ca.pem",
        ])
        .unwrap();
        assert_eq!(cli.port, 7000);
        assert_eq!(cli.channel_mapping, PathBuf::from("/etc/relay/mapping.yml"));
        assert_eq!(cli.ca_file, PathBuf::from("/etc/relay/ca.pem"));
    }

    #[test]
    fn log_format_json() {
        let cli = Cli::try_parse_from(["gitlab-irc-relay", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Cli::try_parse_from(["gitlab-irc-relay", "--log-format", "xml"]).is_err());
        assert!(Cli::try_parse_from(["gitlab-irc-relay", "--port", "70000"]).is_err());
        assert!(Cli::try_parse_from(["gitlab-irc-relay", "--listen", "localhost"]).is_err());
    }
}
