//! `Coordinator`: the top-level object wiring session, capture, desktop
//! and control-channel dispatch together (§4.7).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::CaptureManager;
use crate::config::AppConfig;
use crate::desktop::{Desktop, KeyboardModifiers, ScreenMode};
use crate::error::Result;
use crate::ids::SessionId;
use crate::protocol::{InboundEvent, OutboundEvent};
use crate::session::{LifecycleEvent, Role, Session, SessionManager};
use crate::utils::LogThrottler;
use crate::webrtc::{PeerTransport, WebRtcConfig};
use crate::warn_throttled;

pub struct Coordinator {
    config: Arc<AppConfig>,
    webrtc_config: WebRtcConfig,
    sessions: Arc<SessionManager>,
    capture: Arc<CaptureManager>,
    desktop: Arc<dyn Desktop>,
}

impl Coordinator {
    pub fn new(config: Arc<AppConfig>, desktop: Arc<dyn Desktop>) -> Arc<Self> {
        let sessions = Arc::new(SessionManager::new(config.timers.listener_mailbox_capacity));
        let capture = CaptureManager::new(&config, &desktop);
        let webrtc_config = config.webrtc.clone();
        let coordinator = Arc::new(Self {
            config,
            webrtc_config,
            sessions,
            capture,
            desktop,
        });
        coordinator.clone().spawn_lifecycle_notifier();
        coordinator.clone().spawn_clipboard_sync();
        coordinator
    }

    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Constant-time shared-secret check against the two process-wide
    /// passwords (§6).
    pub fn authenticate_password(&self, password: &str) -> Option<Role> {
        if constant_time_eq(password.as_bytes(), self.config.auth.admin_password.as_bytes()) {
            Some(Role::Admin)
        } else if constant_time_eq(password.as_bytes(), self.config.auth.user_password.as_bytes()) {
            Some(Role::User)
        } else {
            None
        }
    }

    /// Register a session and stand up its `PeerTransport`. Fails with
    /// `Locked`/`Forbidden` per I2/bans before anything is created.
    pub async fn create_session(
        self: &Arc<Self>,
        role: Role,
        remote_addr: IpAddr,
    ) -> Result<(Arc<Session>, mpsc::Receiver<OutboundEvent>)> {
        let id = SessionId::new_v4();
        let (session, rx) = self.sessions.create(id, role, remote_addr)?;

        let transport = PeerTransport::new(
            id,
            &self.webrtc_config,
            self.capture.clone(),
            self.desktop.clone(),
            session.outbound_sender(),
        )
        .await?;
        session.set_transport(transport);

        self.sessions.connect(id)?;
        Ok((session, rx))
    }

    pub async fn destroy_session(&self, id: SessionId) {
        if let Some(session) = self.sessions.get(id) {
            if let Some(transport) = session.transport() {
                transport.close().await;
            }
        }
        self.sessions.destroy(id);
    }

    /// Dispatch one decoded inbound frame (§4.5). Authorization failures
    /// are silent drops, logged at debug.
    pub async fn handle_event(self: &Arc<Self>, session_id: SessionId, event: InboundEvent) {
        let Some(session) = self.sessions.get(session_id) else { return };

        if let Err(e) = self.dispatch(&session, event).await {
            debug!(session = %session_id, error = %e, "control event handler failed");
        }
    }

    async fn dispatch(self: &Arc<Self>, session: &Arc<Session>, event: InboundEvent) -> Result<()> {
        let id = session.id;
        let is_host = self.sessions.is_host(id);
        let is_admin = session.role.is_admin();

        match event {
            InboundEvent::SignalAnswer { sdp } => {
                if let Some(transport) = session.transport() {
                    transport.handle_answer(sdp).await?;
                }
            }

            InboundEvent::ControlRequest => {
                if !self.sessions.has_host() {
                    self.sessions.set_host(id)?;
                    self.sessions.broadcast(OutboundEvent::ControlLocked { id }, None);
                } else if let Some(host_id) = self.sessions.host_id() {
                    self.sessions.send_to(id, OutboundEvent::ControlLocked { id: host_id });
                    self.sessions.send_to(host_id, OutboundEvent::ControlRequesting { id });
                }
            }

            InboundEvent::ControlRelease => {
                if is_host {
                    self.sessions.clear_host();
                    self.sessions.broadcast(OutboundEvent::ControlRelease, None);
                }
            }

            InboundEvent::ControlGive { target } => {
                if is_host && self.sessions.contains(target) {
                    self.sessions.force_host(Some(target));
                    self.sessions.broadcast(OutboundEvent::ControlGive { id, target }, None);
                }
            }

            InboundEvent::ControlClipboard { text } => {
                if is_host {
                    self.desktop.write_clipboard(&text)?;
                }
            }

            InboundEvent::ControlKeyboard { layout, num_lock, caps_lock, scroll_lock } => {
                if is_host {
                    self.desktop.apply_keyboard(KeyboardModifiers {
                        layout,
                        num_lock,
                        caps_lock,
                        scroll_lock,
                    })?;
                }
            }

            InboundEvent::ScreenResolution => {
                let mode = self.desktop.screen_mode();
                self.sessions.send_to(
                    id,
                    OutboundEvent::ScreenResolution { width: mode.width, height: mode.height, rate: mode.rate },
                );
            }

            InboundEvent::ScreenConfigurations => {
                self.sessions.send_to(
                    id,
                    OutboundEvent::ScreenConfigurations { modes: self.desktop.screen_configurations() },
                );
            }

            InboundEvent::ScreenSet { width, height, rate } => {
                if is_admin {
                    self.desktop.set_screen_mode(ScreenMode { width, height, rate })?;
                    self.sessions.broadcast(
                        OutboundEvent::ScreenResolution { width, height, rate },
                        None,
                    );
                }
            }

            InboundEvent::BroadcastCreate { url } => {
                if is_admin {
                    let template = crate::pipeline::substitute(&self.config.broadcast.template, "url", &url);
                    self.capture.broadcast().start_with_template(template).await?;
                }
            }

            InboundEvent::BroadcastDestroy => {
                if is_admin {
                    self.capture.broadcast().stop().await;
                }
            }

            InboundEvent::AdminLock => {
                if is_admin {
                    self.sessions.set_locked(true);
                }
            }

            InboundEvent::AdminUnlock => {
                if is_admin {
                    self.sessions.set_locked(false);
                }
            }

            InboundEvent::AdminControl => {
                if is_admin {
                    self.sessions.force_host(Some(id));
                    self.sessions.broadcast(OutboundEvent::ControlLocked { id }, None);
                }
            }

            InboundEvent::AdminRelease => {
                if is_admin {
                    self.sessions.clear_host();
                    self.sessions.broadcast(OutboundEvent::ControlRelease, None);
                }
            }

            InboundEvent::AdminGive { target } => {
                if is_admin && self.sessions.contains(target) {
                    self.sessions.force_host(Some(target));
                    self.sessions.broadcast(OutboundEvent::ControlGive { id, target }, None);
                }
            }

            InboundEvent::AdminBan { target } => {
                if is_admin {
                    if let Some(target_session) = self.sessions.get(target) {
                        self.sessions.send_to(
                            target,
                            OutboundEvent::SystemDisconnect { message: "banned".to_string() },
                        );
                        self.sessions.ban(target_session.remote_addr);
                        self.destroy_session(target).await;
                    }
                }
            }

            InboundEvent::AdminKick { target } => {
                if is_admin && self.sessions.contains(target) {
                    self.sessions.send_to(
                        target,
                        OutboundEvent::SystemDisconnect { message: "kicked".to_string() },
                    );
                    self.destroy_session(target).await;
                }
            }

            InboundEvent::AdminMute { target } => {
                if is_admin {
                    if let Some(target_session) = self.sessions.get(target) {
                        target_session.set_muted(true);
                        self.sessions.broadcast(OutboundEvent::AdminMute { target, muted: true }, None);
                    }
                }
            }

            InboundEvent::AdminUnmute { target } => {
                if is_admin {
                    if let Some(target_session) = self.sessions.get(target) {
                        target_session.set_muted(false);
                        self.sessions.broadcast(OutboundEvent::AdminUnmute { target, muted: false }, None);
                    }
                }
            }
        }

        Ok(())
    }

    fn spawn_lifecycle_notifier(self: Arc<Self>) {
        let mut rx = self.sessions.subscribe_lifecycle();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(LifecycleEvent::Created(id, role)) => {
                        self.sessions.broadcast(
                            OutboundEvent::SessionCreated { id, role: role.as_str() },
                            Some(id),
                        );
                    }
                    Ok(LifecycleEvent::Connected(id)) => {
                        self.sessions.broadcast(OutboundEvent::SessionConnected { id }, Some(id));
                    }
                    Ok(LifecycleEvent::Destroyed(id)) => {
                        self.sessions.broadcast(OutboundEvent::SessionDestroyed { id }, None);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session lifecycle notifier lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Mirrors the desktop's clipboard to the host session at
    /// ~`clipboard_poll_hz`, but only while a host exists: the source this
    /// is grounded on skips the sync entirely when `GetHost()` is non-null,
    /// which reads as a bug (the loop body falls through without using the
    /// value it just fetched). Resolution recorded in DESIGN.md: sync only
    /// while a host is present, and never push the same text twice in a row.
    fn spawn_clipboard_sync(self: Arc<Self>) {
        let hz = self.config.timers.clipboard_poll_hz.max(1);
        let period = Duration::from_millis(1000 / hz);
        tokio::spawn(async move {
            let throttler = LogThrottler::with_secs(5);
            let mut last = String::new();
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(host_id) = self.sessions.host_id() else { continue };
                match self.desktop.read_clipboard() {
                    Ok(text) if text != last => {
                        last = text.clone();
                        self.sessions.send_to(host_id, OutboundEvent::ControlClipboard { text });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn_throttled!(throttler, "clipboard_read", "clipboard read failed: {e}");
                    }
                }
            }
        });
    }

    /// Destroy every session, then shut capture down (§4.7 shutdown order).
    pub async fn shutdown(&self) {
        info!("coordinator shutting down");
        let ids: Vec<SessionId> = self.sessions.all().into_iter().map(|s| s.id).collect();
        for id in ids {
            self.destroy_session(id).await;
        }
        self.capture.shutdown().await;
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"abc", b"ab"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_slices() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"wrong!"));
    }
}
