// Session configuration.
// Every limit the protocol enforces lives here so both peers can agree on it
// and tests can shrink windows without touching the handlers.

use crate::peer::types::ServerConfig;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "peerlink_lib=debug,peerlink=debug,webrtc=warn";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Public STUN servers used when the user configured none.
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![
        ServerConfig {
            id: "default-stun".into(),
            r#type: "stun".into(),
            url: "stun:stun.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
});

/// Upper bound for every configured interval (one day).
pub const MAX_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatLimits {
    /// Maximum characters per chat frame, both directions.
    pub max_len: usize,
    pub rate_max: usize,
    pub rate_window_ms: u64,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            max_len: 2000,
            rate_max: 30,
            rate_window_ms: 5000,
        }
    }
}

impl ChatLimits {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlLimits {
    /// Maximum characters of a raw control frame before parsing.
    pub max_payload: usize,
    pub rate_max: usize,
    pub rate_window_ms: u64,
    /// Cap for a single remote `keyboard/text` insertion.
    pub keyboard_text_max: usize,
    /// Characters a controlling peer may type per grant.
    pub input_budget: usize,
    pub overlay_hide_ms: u64,
}

impl Default for ControlLimits {
    fn default() -> Self {
        Self {
            max_payload: 2048,
            rate_max: 60,
            rate_window_ms: 5000,
            keyboard_text_max: 32,
            input_budget: 600,
            overlay_hide_ms: 1200,
        }
    }
}

impl ControlLimits {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn overlay_hide(&self) -> Duration {
        Duration::from_millis(self.overlay_hide_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub gathering_poll_ms: u64,
    /// Gathering still running after this long gets reported once; polling goes on.
    pub gathering_slow_ms: u64,
    pub pointer_frame_ms: u64,
    /// How long a dropped connection may take to come back before we give up on it.
    pub grace_period_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            gathering_poll_ms: 100,
            gathering_slow_ms: 10_000,
            pointer_frame_ms: 16,
            grace_period_ms: 10_000,
        }
    }
}

impl Timing {
    pub fn gathering_poll(&self) -> Duration {
        Duration::from_millis(self.gathering_poll_ms)
    }

    pub fn gathering_slow(&self) -> Duration {
        Duration::from_millis(self.gathering_slow_ms)
    }

    pub fn pointer_frame(&self) -> Duration {
        Duration::from_millis(self.pointer_frame_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub chat: ChatLimits,
    pub control: ControlLimits,
    pub timing: Timing,
    pub ice_servers: Vec<ServerConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chat: ChatLimits::default(),
            control: ControlLimits::default(),
            timing: Timing::default(),
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
        }
    }
}

impl SessionConfig {
    /// Loads a (possibly partial) JSON document on top of the defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Same rules the ICE server settings dialog enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(ConfigError::EmptyServerUrl(server.id.clone()));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(ConfigError::TurnWithoutCredentials(server.id.clone()));
            }
        }
        if self.chat.rate_max == 0 || self.control.rate_max == 0 {
            return Err(ConfigError::ZeroRate);
        }
        // deadlines are `Instant + interval`, keep them far from overflow
        let intervals = [
            ("chat.rate_window_ms", self.chat.rate_window_ms),
            ("control.rate_window_ms", self.control.rate_window_ms),
            ("control.overlay_hide_ms", self.control.overlay_hide_ms),
            ("timing.gathering_poll_ms", self.timing.gathering_poll_ms),
            ("timing.gathering_slow_ms", self.timing.gathering_slow_ms),
            ("timing.pointer_frame_ms", self.timing.pointer_frame_ms),
            ("timing.grace_period_ms", self.timing.grace_period_ms),
        ];
        for (name, ms) in intervals {
            if ms > MAX_INTERVAL_MS {
                return Err(ConfigError::IntervalTooLong(name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ICE server `{0}` has an empty URL")]
    EmptyServerUrl(String),
    #[error("TURN server `{0}` requires username and credential")]
    TurnWithoutCredentials(String),
    #[error("rate limits must allow at least one message per window")]
    ZeroRate,
    #[error("`{0}` exceeds one day")]
    IntervalTooLong(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let c = SessionConfig::default();
        assert_eq!(c.chat.max_len, 2000);
        assert_eq!(c.chat.rate_max, 30);
        assert_eq!(c.control.max_payload, 2048);
        assert_eq!(c.control.rate_max, 60);
        assert_eq!(c.control.keyboard_text_max, 32);
        assert_eq!(c.control.overlay_hide(), Duration::from_millis(1200));
        assert_eq!(c.ice_servers.len(), 2);
    }

    #[test]
    fn partial_json_overrides_only_given_fields() {
        let c = SessionConfig::from_json(r#"{"chat":{"max_len":10},"timing":{"pointer_frame_ms":33}}"#)
            .unwrap();
        assert_eq!(c.chat.max_len, 10);
        assert_eq!(c.chat.rate_max, 30);
        assert_eq!(c.timing.pointer_frame_ms, 33);
        assert_eq!(c.control, ControlLimits::default());
    }

    #[test]
    fn turn_server_needs_credentials() {
        let err = SessionConfig::from_json(
            r#"{"ice_servers":[{"id":"t","type":"turn","url":"turn:example.org"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TurnWithoutCredentials(id) if id == "t"));
    }

    #[test]
    fn huge_intervals_are_rejected() {
        let err = SessionConfig::from_json(r#"{"timing":{"grace_period_ms":18446744073709551615}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::IntervalTooLong("timing.grace_period_ms")));

        let err = SessionConfig::from_json(r#"{"control":{"overlay_hide_ms":86400001}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::IntervalTooLong("control.overlay_hide_ms")));

        assert!(SessionConfig::from_json(r#"{"timing":{"grace_period_ms":86400000}}"#).is_ok());
    }
}
