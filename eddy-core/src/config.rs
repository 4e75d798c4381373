//! Centralized configuration for Eddy.
//!
//! All tunable parameters live here; components receive the values they need
//! through constructors rather than reading globals.

use std::path::PathBuf;
use std::time::Duration;

/// Central configuration for all Eddy components.
#[derive(Debug, Clone, Default)]
pub struct EddyConfig {
    pub identity: IdentityConfig,
    pub hub: HubConfig,
    pub transfer: TransferConfig,
}

/// How this client presents itself to the hub and to peers.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub nick: String,
    /// Password sent when the hub asks for one
    pub password: Option<String>,
    pub email: String,
    /// Connection speed label for `$MyINFO`
    pub speed: String,
    /// Client version shown in the description tag
    pub version: String,
    /// Passive clients cannot accept incoming connections
    pub passive: bool,
    /// Address advertised in `$ConnectToMe` and active searches
    pub address: String,
    /// TCP port for incoming peer connections
    pub active_port: u16,
    /// UDP port for incoming search results
    pub search_port: u16,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            nick: "eddy".to_string(),
            password: None,
            email: String::new(),
            speed: "DSL".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            passive: true,
            address: "127.0.0.1".to_string(),
            active_port: 7314,
            search_port: 7315,
        }
    }
}

/// Hub endpoint.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub address: String,
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 411,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

/// Transfer limits and pacing.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Peers we download from concurrently
    pub download_slots: usize,
    /// Peers we upload to concurrently
    pub upload_slots: usize,
    pub download_dir: PathBuf,
    /// Bytes read from disk per upload write
    pub upload_chunk_size: usize,
    /// Upload writes allowed per second
    pub upload_ops_per_second: u64,
    /// Percent of a download between progress events
    pub progress_step: f64,
    /// Time allowed for a requested peer connection to finish its handshake
    pub handshake_timeout: Duration,
    /// How long a downloaded file catalog is reused
    pub file_list_lifetime: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            download_slots: 4,
            upload_slots: 4,
            download_dir: PathBuf::from("downloads"),
            upload_chunk_size: 16 * 1024,
            upload_ops_per_second: 100,
            progress_step: 5.0,
            handshake_timeout: Duration::from_secs(10),
            file_list_lifetime: Duration::from_secs(600),
        }
    }
}

impl EddyConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparsable values are ignored and the default kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(nick) = std::env::var("EDDY_NICK") {
            if !nick.is_empty() {
                config.identity.nick = nick;
            }
        }

        if let Ok(passive) = std::env::var("EDDY_PASSIVE") {
            if let Ok(value) = passive.parse::<bool>() {
                config.identity.passive = value;
            }
        }

        if let Ok(address) = std::env::var("EDDY_HUB_ADDRESS") {
            if !address.is_empty() {
                config.hub.address = address;
            }
        }

        if let Ok(port) = std::env::var("EDDY_HUB_PORT") {
            if let Ok(value) = port.parse::<u16>() {
                config.hub.port = value;
            }
        }

        if let Ok(slots) = std::env::var("EDDY_DOWNLOAD_SLOTS") {
            if let Ok(value) = slots.parse::<usize>() {
                config.transfer.download_slots = value;
            }
        }

        if let Ok(slots) = std::env::var("EDDY_UPLOAD_SLOTS") {
            if let Ok(value) = slots.parse::<usize>() {
                config.transfer.upload_slots = value;
            }
        }

        if let Ok(dir) = std::env::var("EDDY_DOWNLOAD_DIR") {
            if !dir.is_empty() {
                config.transfer.download_dir = PathBuf::from(dir);
            }
        }

        config
    }

    /// Creates a configuration with short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            identity: IdentityConfig {
                nick: "tester".to_string(),
                ..IdentityConfig::default()
            },
            hub: HubConfig {
                connect_timeout: Duration::from_secs(2),
                ..HubConfig::default()
            },
            transfer: TransferConfig {
                download_dir: std::env::temp_dir().join("eddy-test-downloads"),
                upload_chunk_size: 1024,
                upload_ops_per_second: 10_000,
                handshake_timeout: Duration::from_secs(1),
                ..TransferConfig::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = EddyConfig::default();

        assert_eq!(config.hub.port, 411);
        assert!(config.identity.passive);
        assert_eq!(config.transfer.upload_chunk_size, 16 * 1024);
        assert_eq!(config.transfer.progress_step, 5.0);
        assert_eq!(config.transfer.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.transfer.file_list_lifetime, Duration::from_secs(600));
    }

    #[test]
    fn test_testing_preset() {
        let config = EddyConfig::for_testing();
        assert_eq!(config.identity.nick, "tester");
        assert!(config.transfer.handshake_timeout < Duration::from_secs(10));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("EDDY_NICK", "envnick");
            std::env::set_var("EDDY_HUB_PORT", "4111");
            std::env::set_var("EDDY_PASSIVE", "false");
            std::env::set_var("EDDY_DOWNLOAD_SLOTS", "not-a-number");
            std::env::set_var("EDDY_UPLOAD_SLOTS", "7");
        }

        let config = EddyConfig::from_env();

        assert_eq!(config.identity.nick, "envnick");
        assert_eq!(config.hub.port, 4111);
        assert!(!config.identity.passive);
        assert_eq!(config.transfer.download_slots, 4);
        assert_eq!(config.transfer.upload_slots, 7);

        unsafe {
            std::env::remove_var("EDDY_NICK");
            std::env::remove_var("EDDY_HUB_PORT");
            std::env::remove_var("EDDY_PASSIVE");
            std::env::remove_var("EDDY_DOWNLOAD_SLOTS");
            std::env::remove_var("EDDY_UPLOAD_SLOTS");
        }
    }
}
