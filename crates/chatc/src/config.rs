use chat_common::types::KEY_LEN;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// CLI interface for the chat client daemon.
#[derive(Parser)]
#[command(name = "chatc", about = "Encrypted group chat client")]
#[command(version)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a custom configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Chat server URL override.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Local API listen address override.
    #[arg(long, global = true)]
    pub listen: Option<String>,

    /// Increase log verbosity (repeat for more detail).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Write logs to a file instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the client daemon.
    Start,
    /// Show connection state.
    Status,
    /// Post a text message.
    Send {
        /// Message text.
        message: String,
    },
    /// Post a PNG or JPEG image.
    SendImage {
        /// Image file.
        path: PathBuf,
    },
    /// Replace the text of a message.
    Edit {
        /// Message id.
        id: String,
        /// Replacement text.
        content: String,
    },
    /// Replace the image of a message.
    EditImage {
        /// Message id.
        id: String,
        /// Replacement image file.
        path: PathBuf,
    },
    /// Withdraw a message.
    Revoke {
        /// Message id.
        id: String,
    },
    /// List visible messages.
    Messages,
    /// List online peers.
    Online,
    /// Show our own address and location.
    Whoami,
    /// Stream chat events until interrupted.
    Watch,
    /// Drop the current connection and reconnect now.
    Reconnect,
    /// Print a fresh random pre-shared key.
    Genkey,
}

/// Runtime configuration loaded from file, env, and defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// WebSocket URL of the chat server.
    pub server: String,
    /// Local API listen address (`tcp://` or `unix://`).
    pub listen: String,
    /// Pre-shared secret, exactly 32 bytes of UTF-8.
    pub psk: String,
    /// Reconnect settings.
    pub reconnect: ReconnectConfig,
    /// WebSocket keepalive ping settings.
    pub keepalive: KeepaliveConfig,
    /// Local identity settings.
    pub client: IdentityConfig,
    /// Own-address lookup settings.
    pub geolocation: GeolocationConfig,
}

/// Reconnect parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Fixed delay between a close and the next attempt, in milliseconds.
    pub delay_ms: u64,
}

/// WebSocket keepalive settings.
#[derive(Debug, Deserialize, Clone)]
pub struct KeepaliveConfig {
    /// Interval between keepalive pings, in seconds.
    pub interval_s: u64,
}

/// How this client presents itself.
#[derive(Debug, Deserialize, Clone)]
pub struct IdentityConfig {
    /// Address to report instead of looking it up. Empty means look it up.
    pub ip: String,
    /// Author label on messages sent from this client.
    pub username_label: String,
}

/// External geolocation lookup used once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct GeolocationConfig {
    /// JSON endpoint returning the caller's address and location.
    pub url: String,
    /// Request timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: "ws://127.0.0.1:6666".to_string(),
            listen: "tcp://127.0.0.1:7710".to_string(),
            psk: String::new(),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            client: IdentityConfig::default(),
            geolocation: GeolocationConfig::default(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { delay_ms: 5000 }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self { interval_s: 30 }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            ip: String::new(),
            username_label: "You".to_string(),
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            url: "https://get.geojs.io/v1/ip/geo.json".to_string(),
            timeout_ms: 10_000,
        }
    }
}

impl ClientConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.is_empty() {
            return Err("server URL must not be empty".to_string());
        }
        if !(self.server.starts_with("ws://") || self.server.starts_with("wss://")) {
            return Err(format!(
                "server URL must start with ws:// or wss://, got: {}",
                self.server
            ));
        }

        if self.listen.is_empty() {
            return Err("listen address must not be empty".to_string());
        }
        if !(self.listen.starts_with("tcp://") || self.listen.starts_with("unix://")) {
            return Err(format!(
                "listen address must start with tcp:// or unix://, got: {}",
                self.listen
            ));
        }

        if self.psk.is_empty() {
            return Err("psk must be set (generate one with `chatc genkey`)".to_string());
        }
        if self.psk.len() != KEY_LEN {
            return Err(format!(
                "psk must be exactly {KEY_LEN} bytes, got {}",
                self.psk.len()
            ));
        }

        if self.reconnect.delay_ms == 0 {
            return Err("reconnect.delay_ms must be greater than 0".to_string());
        }

        if self.keepalive.interval_s == 0 {
            return Err("keepalive.interval_s must be greater than 0".to_string());
        }

        if !self.client.ip.is_empty() && self.client.ip.parse::<IpAddr>().is_err() {
            return Err(format!(
                "client.ip must be an IP address, got: {}",
                self.client.ip
            ));
        }
        if self.client.username_label.is_empty() {
            return Err("client.username_label must not be empty".to_string());
        }

        if self.client.ip.is_empty() {
            if !(self.geolocation.url.starts_with("http://")
                || self.geolocation.url.starts_with("https://"))
            {
                return Err(format!(
                    "geolocation.url must start with http:// or https://, got: {}",
                    self.geolocation.url
                ));
            }
            if self.geolocation.timeout_ms == 0 {
                return Err("geolocation.timeout_ms must be greater than 0".to_string());
            }
        }

        Ok(())
    }
}

/// # Errors
///
/// Returns an error if the configuration file cannot be read or parsed.
#[allow(clippy::cast_possible_wrap)]
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let defaults = ClientConfig::default();
    let mut builder = config::Config::builder()
        .set_default("server", defaults.server.as_str())?
        .set_default("listen", defaults.listen.as_str())?
        .set_default("psk", defaults.psk.as_str())?
        .set_default("reconnect.delay_ms", defaults.reconnect.delay_ms as i64)?
        .set_default("keepalive.interval_s", defaults.keepalive.interval_s as i64)?
        .set_default("client.ip", defaults.client.ip.as_str())?
        .set_default(
            "client.username_label",
            defaults.client.username_label.as_str(),
        )?
        .set_default("geolocation.url", defaults.geolocation.url.as_str())?
        .set_default(
            "geolocation.timeout_ms",
            defaults.geolocation.timeout_ms as i64,
        )?;

    if let Some(config_path) = path {
        if config_path.exists() {
            builder = builder.add_source(config::File::from(config_path));
        }
    } else {
        // Platform config dir first, then ~/.config/chatc/ (used on macOS too)
        let native_path = dirs::config_dir().map(|d| d.join("chatc").join("config.toml"));
        let xdg_path =
            dirs::home_dir().map(|d| d.join(".config").join("chatc").join("config.toml"));

        let resolved = native_path
            .filter(|p| p.exists())
            .or_else(|| xdg_path.filter(|p| p.exists()));

        if let Some(config_path) = resolved {
            builder = builder.add_source(config::File::from(config_path));
        }
    }

    // CHATC_PSK, CHATC_RECONNECT__DELAY_MS, ...
    builder = builder.add_source(
        config::Environment::with_prefix("CHATC")
            .prefix_separator("_")
            .separator("__"),
    );

    let settings = builder.build()?;
    let config: ClientConfig = settings.try_deserialize()?;

    Ok(config)
}
