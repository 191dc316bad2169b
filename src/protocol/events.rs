//! Control channel wire events (§4.5, §6).
//!
//! Inbound frames are `{event: "tag", ...fields}` text records; [`InboundEvent::parse`]
//! looks the tag up in a static table and decodes the remaining fields,
//! mirroring the dispatcher described in §4.5 rather than relying on serde's
//! internally-tagged enum support (which can't distinguish "unknown tag"
//! from "bad payload" the way §4.5 requires).
//!
//! Outbound frames reuse the same tag namespace and are produced with a
//! single `#[serde(tag = "event")]` enum, since the server only ever needs
//! to serialize them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::desktop::ScreenMode;
use crate::error::{AppError, Result};
use crate::ids::SessionId;

/// One decoded inbound control-channel frame.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    SignalAnswer { sdp: String },
    ControlRequest,
    ControlRelease,
    ControlGive { target: SessionId },
    ControlClipboard { text: String },
    ControlKeyboard {
        layout: Option<String>,
        num_lock: Option<bool>,
        caps_lock: Option<bool>,
        scroll_lock: Option<bool>,
    },
    ScreenResolution,
    ScreenConfigurations,
    ScreenSet { width: u32, height: u32, rate: u32 },
    BroadcastCreate { url: String },
    BroadcastDestroy,
    AdminLock,
    AdminUnlock,
    AdminControl,
    AdminRelease,
    AdminGive { target: SessionId },
    AdminBan { target: SessionId },
    AdminKick { target: SessionId },
    AdminMute { target: SessionId },
    AdminUnmute { target: SessionId },
}

#[derive(Deserialize)]
struct RawFrame {
    event: String,
    #[serde(flatten)]
    payload: Value,
}

fn required<T: serde::de::DeserializeOwned>(payload: &Value, name: &str) -> Result<T> {
    match payload.get(name) {
        None | Some(Value::Null) => Err(AppError::BadPayload(format!("missing field `{name}`"))),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| AppError::BadPayload(e.to_string())),
    }
}

fn optional<T: serde::de::DeserializeOwned>(payload: &Value, name: &str) -> Result<Option<T>> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v.clone())
            .map(Some)
            .map_err(|e| AppError::BadPayload(e.to_string())),
    }
}

impl InboundEvent {
    /// Decode one text frame. Unknown tags fail with [`AppError::UnknownEvent`];
    /// payload decoding errors fail with [`AppError::BadPayload`] (§4.5).
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| AppError::BadPayload(e.to_string()))?;

        Ok(match raw.event.as_str() {
            "signal/answer" => InboundEvent::SignalAnswer { sdp: required(&raw.payload, "sdp")? },
            "control/request" => InboundEvent::ControlRequest,
            "control/release" => InboundEvent::ControlRelease,
            "control/give" => InboundEvent::ControlGive { target: required(&raw.payload, "target")? },
            "control/clipboard" => {
                InboundEvent::ControlClipboard { text: required(&raw.payload, "text")? }
            }
            "control/keyboard" => InboundEvent::ControlKeyboard {
                layout: optional(&raw.payload, "layout")?,
                num_lock: optional(&raw.payload, "numLock")?,
                caps_lock: optional(&raw.payload, "capsLock")?,
                scroll_lock: optional(&raw.payload, "scrollLock")?,
            },
            "screen/resolution" => InboundEvent::ScreenResolution,
            "screen/configurations" => InboundEvent::ScreenConfigurations,
            "screen/set" => InboundEvent::ScreenSet {
                width: required(&raw.payload, "width")?,
                height: required(&raw.payload, "height")?,
                rate: required(&raw.payload, "rate")?,
            },
            "broadcast/create" => {
                InboundEvent::BroadcastCreate { url: required(&raw.payload, "url")? }
            }
            "broadcast/destroy" => InboundEvent::BroadcastDestroy,
            "admin/lock" => InboundEvent::AdminLock,
            "admin/unlock" => InboundEvent::AdminUnlock,
            "admin/control" => InboundEvent::AdminControl,
            "admin/release" => InboundEvent::AdminRelease,
            "admin/give" => InboundEvent::AdminGive { target: required(&raw.payload, "target")? },
            "admin/ban" => InboundEvent::AdminBan { target: required(&raw.payload, "target")? },
            "admin/kick" => InboundEvent::AdminKick { target: required(&raw.payload, "target")? },
            "admin/mute" => InboundEvent::AdminMute { target: required(&raw.payload, "target")? },
            "admin/unmute" => InboundEvent::AdminUnmute { target: required(&raw.payload, "target")? },
            other => return Err(AppError::UnknownEvent(other.to_string())),
        })
    }
}

/// One outbound control-channel frame, serialized as `{"event": "tag", ...}`.
///
/// `signal/offer` and the `session/*` lifecycle notifications are not named
/// in the inbound closed namespace (§6 only enumerates tags the dispatcher
/// accepts) but are required by §4.6 (server-initiated offer) and §4.7
/// (admin-facing session lifecycle notifications); they reuse the same
/// tagged-frame shape for consistency. See DESIGN.md.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum OutboundEvent {
    #[serde(rename = "signal/offer")]
    SignalOffer { sdp: String },
    #[serde(rename = "signal/candidate")]
    SignalCandidate { candidate: String },
    #[serde(rename = "control/release")]
    ControlRelease,
    #[serde(rename = "control/requesting")]
    ControlRequesting { id: SessionId },
    #[serde(rename = "control/locked")]
    ControlLocked { id: SessionId },
    #[serde(rename = "control/give")]
    ControlGive { id: SessionId, target: SessionId },
    #[serde(rename = "control/clipboard")]
    ControlClipboard { text: String },
    #[serde(rename = "screen/resolution")]
    ScreenResolution { width: u32, height: u32, rate: u32 },
    #[serde(rename = "screen/configurations")]
    ScreenConfigurations { modes: Vec<ScreenMode> },
    #[serde(rename = "admin/mute")]
    AdminMute { target: SessionId, muted: bool },
    #[serde(rename = "admin/unmute")]
    AdminUnmute { target: SessionId, muted: bool },
    #[serde(rename = "system/disconnect")]
    SystemDisconnect { message: String },
    #[serde(rename = "session/created")]
    SessionCreated { id: SessionId, role: &'static str },
    #[serde(rename = "session/connected")]
    SessionConnected { id: SessionId },
    #[serde(rename = "session/destroyed")]
    SessionDestroyed { id: SessionId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_rejected() {
        let err = InboundEvent::parse(r#"{"event":"nonsense/tag"}"#).unwrap_err();
        assert!(matches!(err, AppError::UnknownEvent(tag) if tag == "nonsense/tag"));
    }

    #[test]
    fn missing_field_is_bad_payload() {
        let err = InboundEvent::parse(r#"{"event":"control/give"}"#).unwrap_err();
        assert!(matches!(err, AppError::BadPayload(_)));
    }

    #[test]
    fn control_keyboard_tri_state_defaults_to_unset() {
        let evt = InboundEvent::parse(r#"{"event":"control/keyboard","capsLock":true}"#).unwrap();
        match evt {
            InboundEvent::ControlKeyboard { layout, num_lock, caps_lock, scroll_lock } => {
                assert_eq!(layout, None);
                assert_eq!(num_lock, None);
                assert_eq!(caps_lock, Some(true));
                assert_eq!(scroll_lock, None);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn outbound_event_serializes_with_tag_field() {
        let id = uuid::Uuid::nil();
        let json = serde_json::to_string(&OutboundEvent::ControlLocked { id }).unwrap();
        assert!(json.contains(r#""event":"control/locked""#));
    }
}
