//! Command-line surface.
//!
//! Argument parse failures exit with code 2 (clap's usage-error code);
//! everything that parses is valid, so there is no second validation pass.

use std::path::PathBuf;

use clap::Parser;
use uuid::Uuid;

/// An HTTP relay exposing the remote KV datapath protocol over a local
/// engine.
#[derive(Debug, Clone, Parser)]
#[command(name = "alder", version, about)]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 10159)]
    pub port: u16,

    /// Database identifier reported by the metadata exchange.
    #[arg(long)]
    pub database_id: Uuid,

    /// Long-lived access token accepted at the root endpoint.
    #[arg(long)]
    pub access_token: String,

    /// Lifetime of issued ephemeral tokens, in milliseconds.
    #[arg(long, default_value_t = 3_600_000)]
    pub ephemeral_token_ttl: u64,

    /// Engine data file; omit for a fresh in-memory store.
    pub data_path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 5] = [
        "alder",
        "--database-id",
        "7c99ff93-8ab3-4d6c-a7f2-8e2e3a9a2a2e",
        "--access-token",
        "secret",
    ];

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(REQUIRED).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 10159);
        assert_eq!(config.ephemeral_token_ttl, 3_600_000);
        assert!(config.data_path.is_none());
    }

    #[test]
    fn test_positional_data_path() {
        let mut args = REQUIRED.to_vec();
        args.push("/tmp/data.json");
        let config = ServerConfig::try_parse_from(args).unwrap();
        assert_eq!(config.data_path, Some(PathBuf::from("/tmp/data.json")));
    }

    #[test]
    fn test_required_flags() {
        assert!(ServerConfig::try_parse_from(["alder"]).is_err());
        assert!(ServerConfig::try_parse_from([
            "alder",
            "--database-id",
            "not-a-uuid",
            "--access-token",
            "secret",
        ])
        .is_err());
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::try_parse_from([
            "alder",
            "--host",
            "127.0.0.1",
            "--port",
            "4512",
            "--database-id",
            "7c99ff93-8ab3-4d6c-a7f2-8e2e3a9a2a2e",
            "--access-token",
            "secret",
            "--ephemeral-token-ttl",
            "1000",
        ])
        .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 4512);
        assert_eq!(config.ephemeral_token_ttl, 1000);
    }
}
