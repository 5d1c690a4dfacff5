//! # Relay Configuration
//!
//! Command-line flags with environment-variable fallbacks, resolved into a
//! [`RelayConfig`] once at startup. The shared secret is mandatory: a missing
//! or malformed secret aborts startup instead of failing per request.

use clap::Parser;
use relay_protocol::{DescriptorKey, KeyError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;

/// Default listen port of the relay.
pub const DEFAULT_PORT: u16 = 8443;

/// relay-server — authenticated WebSocket relay for guest consoles
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-server", version, about)]
pub struct Cli {
    /// Hex-encoded 256-bit secret shared with the backend that encrypts descriptors
    #[arg(long, env = "RELAY_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Listen address
    #[arg(long, env = "RELAY_BIND", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Listen port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Port appended to the upstream host (defaults to the wss port, 443)
    #[arg(long, env = "RELAY_UPSTREAM_PORT")]
    pub upstream_port: Option<u16>,

    /// Additional PEM CA bundle trusted for upstream connections
    #[arg(long, env = "RELAY_UPSTREAM_CA")]
    pub upstream_ca: Option<PathBuf>,

    /// Skip certificate verification for upstream connections
    #[arg(long, env = "RELAY_INSECURE_UPSTREAM")]
    pub insecure_upstream: bool,

    /// Close the previous session when a new one opens for the same guest
    #[arg(long, env = "RELAY_CLOSE_DISPLACED")]
    pub close_displaced: bool,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing shared secret: set --secret-key or RELAY_SECRET_KEY")]
    MissingSecret,

    #[error("invalid shared secret: {0}")]
    InvalidSecret(#[from] KeyError),
}

/// How upstream TLS certificates are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamTrust {
    /// Public web roots, plus an optional extra CA bundle.
    Verify { extra_ca: Option<PathBuf> },
    /// No verification at all.
    Insecure,
}

/// Settings for connections to the console endpoints.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub port: Option<u16>,
    pub trust: UpstreamTrust,
}

/// Fully resolved relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub key: DescriptorKey,
    pub upstream: UpstreamConfig,
    pub close_displaced: bool,
}

impl RelayConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let secret = cli
            .secret_key
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingSecret)?;
        let key = DescriptorKey::from_hex(secret)?;

        let trust = if cli.insecure_upstream {
            UpstreamTrust::Insecure
        } else {
            UpstreamTrust::Verify {
                extra_ca: cli.upstream_ca.clone(),
            }
        };

        Ok(Self {
            listen: SocketAddr::new(cli.bind, cli.port),
            key,
            upstream: UpstreamConfig {
                port: cli.upstream_port,
                trust,
            },
            close_displaced: cli.close_displaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("relay-server").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let secret = "11".repeat(32);
        let cli = parse(&["--secret-key", &secret]);
        let cfg = RelayConfig::from_cli(&cli).unwrap();
        if std::env::var_os("PORT").is_none() {
            assert_eq!(cfg.listen.port(), DEFAULT_PORT);
        }
        assert_eq!(cfg.upstream.port, None);
        assert_eq!(cfg.upstream.trust, UpstreamTrust::Verify { extra_ca: None });
        assert!(!cfg.close_displaced);
        assert_eq!(cfg.key.to_hex(), secret);
    }

    #[test]
    fn overrides() {
        let secret = "22".repeat(32);
        let cli = parse(&[
            "--secret-key",
            &secret,
            "--bind",
            "127.0.0.1",
            "-p",
            "9000",
            "--upstream-port",
            "8006",
            "--insecure-upstream",
            "--close-displaced",
        ]);
        let cfg = RelayConfig::from_cli(&cli).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(cfg.upstream.port, Some(8006));
        assert_eq!(cfg.upstream.trust, UpstreamTrust::Insecure);
        assert!(cfg.close_displaced);
    }

    #[test]
    fn secret_is_required() {
        let mut cli = parse(&[]);
        cli.secret_key = None;
        assert!(matches!(
            RelayConfig::from_cli(&cli),
            Err(ConfigError::MissingSecret)
        ));
        cli.secret_key = Some("   ".into());
        assert!(matches!(
            RelayConfig::from_cli(&cli),
            Err(ConfigError::MissingSecret)
        ));
    }

    #[test]
    fn secret_must_be_256_bit_hex() {
        let mut cli = parse(&[]);
        cli.secret_key = Some("abcd".into());
        assert!(matches!(
            RelayConfig::from_cli(&cli),
            Err(ConfigError::InvalidSecret(KeyError::InvalidLength(2)))
        ));
        cli.secret_key = Some("xy".repeat(32));
        assert!(matches!(
            RelayConfig::from_cli(&cli),
            Err(ConfigError::InvalidSecret(KeyError::InvalidHex))
        ));
    }
}
