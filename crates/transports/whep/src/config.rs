//! Configuration types for the WHEP client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Public STUN server used when the caller does not supply any
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Main configuration for a WHEP player
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhepConfig {
    /// STUN server URLs (may be empty on a LAN where host candidates suffice)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Offer a recv-only video transceiver (default: true)
    pub receive_video: bool,

    /// Offer a recv-only audio transceiver (default: true)
    pub receive_audio: bool,

    /// Upper bound on ICE candidate gathering in milliseconds (default: 5000).
    /// When it elapses the offer is sent with whatever was gathered.
    pub ice_gathering_timeout_ms: u64,

    /// Upper bound on a whole negotiation attempt, from resource creation to
    /// the first inbound track (default: 30000, `None` disables)
    pub negotiation_timeout_ms: Option<u64>,

    /// Timeout for each WHEP HTTP request in milliseconds (default: 10000)
    pub request_timeout_ms: u64,

    /// Bearer token sent with WHEP requests
    pub auth_token: Option<String>,

    /// Send `DELETE` to the WHEP session resource when a session is released
    /// (default: true)
    pub delete_on_close: bool,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl TurnServerConfig {
    /// Parse `turn:host:port:username:password` (the CLI form)
    pub fn parse(spec: &str) -> crate::Result<Self> {
        let parts: Vec<&str> = spec.rsplitn(3, ':').collect();
        if parts.len() != 3 || parts[0].is_empty() || parts[1].is_empty() {
            return Err(crate::Error::InvalidConfig(format!(
                "TURN server must be turn:host:port:username:password, got {}",
                spec
            )));
        }

        Ok(Self {
            url: parts[2].to_string(),
            username: parts[1].to_string(),
            credential: parts[0].to_string(),
        })
    }
}

impl Default for WhepConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![DEFAULT_STUN_SERVER.to_string()],
            turn_servers: Vec::new(),
            receive_video: true,
            receive_audio: true,
            ice_gathering_timeout_ms: 5000,
            negotiation_timeout_ms: Some(30_000),
            request_timeout_ms: 10_000,
            auth_token: None,
            delete_on_close: true,
        }
    }
}

impl WhepConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a STUN URL does not start with `stun:`/`stuns:`
    /// - a TURN URL does not start with `turn:`/`turns:`
    /// - neither video nor audio is requested
    /// - a timeout is zero
    /// - the negotiation timeout does not exceed the gathering timeout
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server must start with stun: or stuns:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if !self.receive_video && !self.receive_audio {
            return Err(Error::InvalidConfig(
                "At least one of receive_video or receive_audio must be enabled".to_string(),
            ));
        }

        if self.ice_gathering_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "ice_gathering_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(total) = self.negotiation_timeout_ms {
            if total <= self.ice_gathering_timeout_ms {
                return Err(Error::InvalidConfig(format!(
                    "negotiation_timeout_ms ({}) must exceed ice_gathering_timeout_ms ({})",
                    total, self.ice_gathering_timeout_ms
                )));
            }
        }

        Ok(())
    }

    pub fn ice_gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.ice_gathering_timeout_ms)
    }

    pub fn negotiation_timeout(&self) -> Option<Duration> {
        self.negotiation_timeout_ms.map(Duration::from_millis)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Replace the STUN server list
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Preset for cameras on the same LAN as the viewer
    ///
    /// No STUN (host candidates only) and a short gathering bound, so the
    /// offer goes out almost immediately.
    ///
    /// # Example
    ///
    /// ```
    /// use gateview_whep::WhepConfig;
    ///
    /// let config = WhepConfig::lan_preset();
    /// assert!(config.stun_servers.is_empty());
    /// assert_eq!(config.ice_gathering_timeout_ms, 1000);
    /// ```
    pub fn lan_preset() -> Self {
        Self {
            stun_servers: Vec::new(),
            ice_gathering_timeout_ms: 1000,
            negotiation_timeout_ms: Some(10_000),
            request_timeout_ms: 5000,
            ..Default::default()
        }
    }

    /// Preset that trades candidate completeness for time-to-first-frame
    ///
    /// # Example
    ///
    /// ```
    /// use gateview_whep::WhepConfig;
    ///
    /// let config = WhepConfig::low_latency_preset();
    /// assert_eq!(config.ice_gathering_timeout_ms, 2000);
    /// assert!(config.validate().is_ok());
    /// ```
    pub fn low_latency_preset() -> Self {
        Self {
            ice_gathering_timeout_ms: 2000,
            negotiation_timeout_ms: Some(15_000),
            request_timeout_ms: 5000,
            ..Default::default()
        }
    }

    /// Parse a configuration from TOML; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> crate::Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| crate::Error::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn from_toml_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }
}
