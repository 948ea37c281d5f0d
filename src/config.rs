//! Configuration related structures.

use clap::Parser;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// The conventional workspace path used when the client does not supply one.
pub const DEFAULT_WORKSPACE_PATH: &str = "/home/developer/workspace";

/// Default TCP port the gateway listens on for WebSocket upgrades.
const DEFAULT_PORT: u16 = 3001;

/// Default path to the container engine's domain socket.
const DEFAULT_ENGINE_SOCKET: &str = "/var/run/docker.sock";

/// Default binary name of the language server invoked inside the container.
const DEFAULT_LANGUAGE_SERVER: &str = "rust-analyzer";

macro_rules! prefix {
    () => {
        "GATEWAY_"
    };
}

#[derive(CopyGetters, Debug, Getters, Parser, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[command(
    name = "lsp-gateway",
    about = "WebSocket gateway bridging browser editors to per-container rust-analyzer instances"
)]
/// Runtime configuration for the language-server gateway, parsed from CLI
/// flags with `GATEWAY_*` environment variable fallbacks.
pub struct Config {
    #[get_copy = "pub"]
    #[arg(long, short = 'v')]
    /// Show version information.
    version: bool,

    #[get_copy = "pub"]
    #[arg(
        long,
        short = 'l',
        default_value = "info",
        env = concat!(prefix!(), "LOG_LEVEL"),
        value_name = "LEVEL"
    )]
    /// The logging level of the gateway.
    log_level: LevelFilter,

    #[get_copy = "pub"]
    #[arg(
        long,
        short = 'p',
        default_value_t = DEFAULT_PORT,
        env = concat!(prefix!(), "PORT"),
        value_name = "PORT"
    )]
    /// TCP port the WebSocket upgrade endpoint listens on.
    port: u16,

    #[get = "pub"]
    #[arg(
        long,
        default_value = DEFAULT_ENGINE_SOCKET,
        env = concat!(prefix!(), "ENGINE_SOCKET"),
        value_name = "PATH"
    )]
    /// Path to the container engine's local domain socket.
    engine_socket: PathBuf,

    #[get = "pub"]
    #[arg(
        long,
        default_value = DEFAULT_LANGUAGE_SERVER,
        env = concat!(prefix!(), "LANGUAGE_SERVER"),
        value_name = "BINARY"
    )]
    /// Name of the language server binary to run inside the container.
    language_server: String,

    #[get = "pub"]
    #[arg(
        long,
        default_value = DEFAULT_WORKSPACE_PATH,
        env = concat!(prefix!(), "DEFAULT_WORKSPACE"),
        value_name = "PATH"
    )]
    /// Workspace path used when the client omits the `workspace` query parameter.
    default_workspace: String,

    #[get_copy = "pub"]
    #[arg(
        long,
        default_value_t = 10,
        env = concat!(prefix!(), "ATTACH_TIMEOUT_SECS"),
        value_name = "SECONDS"
    )]
    /// Timeout for container verification and exec attachment.
    attach_timeout_secs: u64,

    #[get_copy = "pub"]
    #[arg(
        long,
        default_value_t = 256,
        env = concat!(prefix!(), "MAX_PENDING_MESSAGES"),
        value_name = "COUNT"
    )]
    /// Maximum number of client messages buffered before attachment completes.
    max_pending_messages: usize,

    #[cfg(feature = "telemetry")]
    #[get = "pub"]
    #[arg(long, env = concat!(prefix!(), "OTLP_ENDPOINT"), value_name = "URL")]
    /// OTLP collector endpoint, enabling distributed tracing export.
    otlp_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self::parse()
    }
}

impl Config {
    /// Validate the configuration integrity.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.port() != 0, "port must be non-zero");
        anyhow::ensure!(
            self.attach_timeout_secs() > 0,
            "attach timeout must be non-zero"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let cfg = Config::parse_from(["lsp-gateway"]);
        assert_eq!(cfg.port(), DEFAULT_PORT);
        assert_eq!(cfg.default_workspace(), DEFAULT_WORKSPACE_PATH);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_zero_port() {
        let cfg = Config::parse_from(["lsp-gateway", "--port", "0"]);
        assert!(cfg.validate().is_err());
    }
}
