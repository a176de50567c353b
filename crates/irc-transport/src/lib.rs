//! IRC implementation of [`relay::ChatTransport`].
//!
//! One TLS connection per process. The server certificate is verified against
//! a caller-supplied CA bundle only.
//!
//! | Module    | Contents                                               |
//! |-----------|--------------------------------------------------------|
//! | `message` | line parser and outbound command builders              |
//! | `tls`     | root store loading and the rustls connector            |
//! | `client`  | [`IrcClient`] (sending side) and [`IrcEventLoop`]      |
//!
//! ```no_run
//! # async fn demo(channels: Vec<relay::ChannelName>) -> Result<(), relay::TransportError> {
//! let config = irc_transport::IrcConfig {
//!     host: "irc.hackint.org".into(),
//!     port: 6697,
//!     nickname: "go-gitlab-irc".into(),
//!     realname: "go-gitlab-irc".into(),
//!     ca_file: "hackint-rootca.crt".into(),
//!     timeouts: irc_transport::SessionTimeouts::default(),
//! };
//! let (client, event_loop) = irc_transport::connect(&config, channels).await?;
//! tokio::spawn(event_loop.run());
//! # drop(client);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

use relay::{ChannelName, TransportError};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;

pub mod client;
pub mod message;
pub mod tls;

pub use client::{
    start, IrcClient, IrcEventLoop, Registration, SessionTimeouts, MAX_INBOUND_LINE_BYTES,
    MAX_NICK_RETRIES,
};
pub use message::{is_valid_nickname, IrcMessage, MAX_LINE_BYTES};

/// Connection settings for the IRC server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
    pub nickname: String,
    pub realname: String,
    /// PEM bundle holding the CA(s) the server certificate must chain to.
    pub ca_file: PathBuf,
    pub timeouts: SessionTimeouts,
}

/// Opens the TLS connection and starts registration.
///
/// `channels` are joined once the server confirms registration; drive the
/// returned [`IrcEventLoop`] for that to happen.
///
/// # Errors
///
/// - [`TransportError::Tls`] for an unreadable CA bundle, an invalid host
///   name or a failed handshake.
/// - [`TransportError::Io`] if the TCP connection cannot be established.
pub async fn connect(
    config: &IrcConfig,
    channels: Vec<ChannelName>,
) -> Result<(IrcClient, IrcEventLoop), TransportError> {
    let roots = tls::load_root_store(&config.ca_file).await?;
    let connector = tls::connector(roots)?;

    let server_name = ServerName::try_from(config.host.clone()).map_err(|err| TransportError::Tls {
        message: format!("invalid server name '{}': {err}", config.host),
    })?;

    tracing::info!(host = %config.host, port = config.port, "Connecting to IRC server");
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .map_err(|err| TransportError::Io {
            message: format!("cannot connect to {}:{}: {err}", config.host, config.port),
        })?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|err| TransportError::Tls {
            message: format!("TLS handshake with {} failed: {err}", config.host),
        })?;

    let registration = Registration {
        nickname: config.nickname.clone(),
        realname: config.realname.clone(),
    };
    client::start(stream, &registration, channels, config.timeouts).await
}
