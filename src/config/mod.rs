//! Static, file-plus-CLI loaded configuration.
//!
//! Unlike the SQLite-backed, hot-reloadable `ConfigStore` this module
//! replaces, `AppConfig` is read once at startup and held for the lifetime
//! of the process (data model invariant I8). Pipeline templates and the
//! two shared-secret passwords are resolved once, at `Coordinator`
//! construction, and never revisited.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::webrtc::WebRtcConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub webrtc: WebRtcConfig,
    pub video: VideoConfig,
    pub audio: SinkConfig,
    pub broadcast: SinkConfig,
    pub screencast: SinkConfig,
    pub webcam: SourceConfig,
    pub microphone: SourceConfig,
    pub timers: TimersConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            webrtc: WebRtcConfig::default(),
            video: VideoConfig::default(),
            audio: SinkConfig {
                id: "audio".into(),
                template: "audiotestsrc ! opusenc ! appsink name=sink".into(),
            },
            broadcast: SinkConfig {
                id: "broadcast".into(),
                template: "appsrc name=src ! queue ! rtmpsink location={url}".into(),
            },
            screencast: SinkConfig {
                id: "screencast".into(),
                template: "ximagesrc ! videoconvert ! x264enc ! appsink name=sink".into(),
            },
            webcam: SourceConfig {
                id: "webcam".into(),
                codecs: HashMap::from([(
                    "vp8".to_string(),
                    "appsrc name=src ! vp8dec ! videoconvert ! autovideosink".to_string(),
                )]),
            },
            microphone: SourceConfig {
                id: "microphone".into(),
                codecs: HashMap::from([(
                    "opus".to_string(),
                    "appsrc name=src ! opusdec ! audioconvert ! autoaudiosink".to_string(),
                )]),
            },
            timers: TimersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub admin_password: String,
    pub user_password: String,
    pub session_cookie: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_password: "admin".into(),
            user_password: "user".into(),
            session_cookie: "kvm_token".into(),
        }
    }
}

/// One declared video quality variant, backed by its own `StreamSink`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoVariant {
    pub id: String,
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Declaration order is the order exposed by `videoIDs()` (I5).
    pub variants: Vec<VideoVariant>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            variants: vec![
                VideoVariant {
                    id: "hd".into(),
                    template: "ximagesrc ! videoconvert ! video/x-raw,width=1920,height=1080 ! vp8enc ! appsink name=sink".into(),
                },
                VideoVariant {
                    id: "sd".into(),
                    template: "ximagesrc ! videoconvert ! video/x-raw,width=1280,height=720 ! vp8enc ! appsink name=sink".into(),
                },
                VideoVariant {
                    id: "ld".into(),
                    template: "ximagesrc ! videoconvert ! video/x-raw,width=854,height=480 ! vp8enc ! appsink name=sink".into(),
                },
            ],
        }
    }
}

/// Template for a single, unconditionally-declared sink (audio, broadcast, screencast).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub id: String,
    pub template: String,
}

/// Codec-keyed templates for a `StreamSource` (webcam, microphone): §4.2.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub id: String,
    pub codecs: HashMap<String, String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { id: String::new(), codecs: HashMap::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimersConfig {
    pub ping_interval_secs: u64,
    pub clipboard_poll_hz: u64,
    pub listener_mailbox_capacity: usize,
    pub sink_idle_grace_secs: u64,
}

impl Default for TimersConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: 60,
            clipboard_poll_hz: 10,
            listener_mailbox_capacity: 32,
            sink_idle_grace_secs: 5,
        }
    }
}

impl AppConfig {
    /// Load from an optional TOML file, falling back to defaults for
    /// anything the file omits. A missing file is not an error; an
    /// unparsable one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| AppError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_three_video_variants_in_order() {
        let cfg = AppConfig::default();
        let ids: Vec<_> = cfg.video.variants.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["hd", "sd", "ld"]);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = AppConfig::load(Some(Path::new("/nonexistent/config.toml"))).unwrap();
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn no_path_uses_defaults() {
        let cfg = AppConfig::load(None).unwrap();
        assert_eq!(cfg.auth.session_cookie, "kvm_token");
    }
}
