//! Session registry, host election, locking and banning (§4.4).
//!
//! All mutations go through a single short-held `parking_lot::Mutex`;
//! `broadcast` snapshots the recipient set under the lock and sends outside
//! it, so a slow session can never stall a concurrent state change.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::error::{AppError, Result};
use crate::ids::SessionId;
use crate::protocol::OutboundEvent;
use crate::webrtc::PeerTransport;

/// A client's role, fixed for the lifetime of the session (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

/// Per-client record (§3). `host` and `locked`/`banned` live on
/// [`SessionManager`], not here, since they are cross-session invariants.
pub struct Session {
    pub id: SessionId,
    pub role: Role,
    pub remote_addr: IpAddr,
    connected: AtomicBool,
    muted: AtomicBool,
    outbound: mpsc::Sender<OutboundEvent>,
    transport: ArcSwapOption<PeerTransport>,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn transport(&self) -> Option<Arc<PeerTransport>> {
        self.transport.load_full()
    }

    pub fn set_transport(&self, transport: Arc<PeerTransport>) {
        self.transport.store(Some(transport));
    }

    /// A clone of this session's outbound sender, for a `PeerTransport` to
    /// hold instead of an `Arc<Session>` (avoids a Session/PeerTransport
    /// reference cycle, §9).
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundEvent> {
        self.outbound.clone()
    }

    /// Enqueue an outbound frame. A full or closed mailbox means this
    /// session is dead and due for destruction (§5); the caller logs and
    /// moves on rather than treating it as fatal.
    pub fn send(&self, event: OutboundEvent) -> Result<()> {
        self.outbound.try_send(event).map_err(|_| AppError::TransportClosed)
    }
}

/// Emitted by [`SessionManager`] on create/connect/destroy so the
/// [`crate::coordinator::Coordinator`] can drive admin-facing notifications
/// (§4.7) without the manager depending on the coordinator.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Created(SessionId, Role),
    Connected(SessionId),
    Destroyed(SessionId),
}

struct ManagerState {
    sessions: HashMap<SessionId, Arc<Session>>,
    host_id: Option<SessionId>,
    locked: bool,
    banned: HashSet<IpAddr>,
}

pub struct SessionManager {
    state: Mutex<ManagerState>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    mailbox_capacity: usize,
}

impl SessionManager {
    pub fn new(mailbox_capacity: usize) -> Self {
        let (lifecycle_tx, _rx) = broadcast::channel(64);
        Self {
            state: Mutex::new(ManagerState {
                sessions: HashMap::new(),
                host_id: None,
                locked: false,
                banned: HashSet::new(),
            }),
            lifecycle_tx,
            mailbox_capacity,
        }
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// Create and register a new session. I2: while `locked`, only admins
    /// may complete the handshake; bans never apply to admins (§4.4 table).
    pub fn create(
        &self,
        id: SessionId,
        role: Role,
        remote_addr: IpAddr,
    ) -> Result<(Arc<Session>, mpsc::Receiver<OutboundEvent>)> {
        let mut state = self.state.lock();
        if state.sessions.contains_key(&id) {
            return Err(AppError::Internal("duplicate session id".into()));
        }
        if role != Role::Admin && state.banned.contains(&remote_addr) {
            return Err(AppError::Forbidden("banned".into()));
        }
        if state.locked && role != Role::Admin {
            return Err(AppError::Locked);
        }

        let (tx, rx) = mpsc::channel(self.mailbox_capacity);
        let session = Arc::new(Session {
            id,
            role,
            remote_addr,
            connected: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            outbound: tx,
            transport: ArcSwapOption::from(None),
        });
        state.sessions.insert(id, session.clone());
        drop(state);

        let _ = self.lifecycle_tx.send(LifecycleEvent::Created(id, role));
        Ok((session, rx))
    }

    pub fn connect(&self, id: SessionId) -> Result<()> {
        {
            let state = self.state.lock();
            let session = state
                .sessions
                .get(&id)
                .ok_or_else(|| AppError::Internal("unknown session".into()))?;
            session.connected.store(true, Ordering::Release);
        }
        let _ = self.lifecycle_tx.send(LifecycleEvent::Connected(id));
        Ok(())
    }

    /// Remove a session. If it was host, release the host slot and
    /// broadcast `control/release` (§9: this is easy to miss and must not
    /// be). If it was the last admin, `locked` flips back to false (I3).
    pub fn destroy(&self, id: SessionId) {
        let (was_host, was_removed) = {
            let mut state = self.state.lock();
            let Some(_) = state.sessions.remove(&id) else {
                return;
            };
            let was_host = state.host_id == Some(id);
            if was_host {
                state.host_id = None;
            }
            if state.locked && !state.sessions.values().any(|s| s.role == Role::Admin) {
                state.locked = false;
            }
            (was_host, true)
        };
        debug_assert!(was_removed);
        if was_host {
            self.broadcast(OutboundEvent::ControlRelease, None);
        }
        let _ = self.lifecycle_tx.send(LifecycleEvent::Destroyed(id));
    }

    /// I1: succeeds only when nobody currently holds the host slot.
    pub fn set_host(&self, id: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.sessions.contains_key(&id) {
            return Err(AppError::Internal("unknown session".into()));
        }
        if state.host_id.is_some() {
            return Err(AppError::HostAlreadyHeld);
        }
        state.host_id = Some(id);
        Ok(())
    }

    /// Unconditional host assignment used by `admin/give`, `admin/control`
    /// and `admin/release` (§4.5), which bypass the `HostAlreadyHeld` check.
    pub fn force_host(&self, id: Option<SessionId>) {
        self.state.lock().host_id = id;
    }

    pub fn clear_host(&self) {
        self.state.lock().host_id = None;
    }

    pub fn is_host(&self, id: SessionId) -> bool {
        self.state.lock().host_id == Some(id)
    }

    pub fn has_host(&self) -> bool {
        self.state.lock().host_id.is_some()
    }

    pub fn host_id(&self) -> Option<SessionId> {
        self.state.lock().host_id
    }

    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.state.lock().sessions.get(&id).cloned()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.state.lock().sessions.contains_key(&id)
    }

    pub fn set_locked(&self, locked: bool) {
        self.state.lock().locked = locked;
    }

    pub fn locked(&self) -> bool {
        self.state.lock().locked
    }

    pub fn admins(&self) -> Vec<Arc<Session>> {
        self.state.lock().sessions.values().filter(|s| s.role.is_admin()).cloned().collect()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.state.lock().sessions.values().cloned().collect()
    }

    pub fn ban(&self, addr: IpAddr) {
        self.state.lock().banned.insert(addr);
    }

    pub fn unban(&self, addr: IpAddr) {
        self.state.lock().banned.remove(&addr);
    }

    pub fn is_banned(&self, addr: IpAddr) -> bool {
        self.state.lock().banned.contains(&addr)
    }

    /// Send `event` to every connected session except `except` (§4.4).
    /// Per-session send failures are logged, not propagated: a slow peer
    /// must never stop other peers from observing the new state.
    pub fn broadcast(&self, event: OutboundEvent, except: Option<SessionId>) {
        let recipients: Vec<Arc<Session>> = {
            let state = self.state.lock();
            state
                .sessions
                .values()
                .filter(|s| s.is_connected() && Some(s.id) != except)
                .cloned()
                .collect()
        };
        for session in recipients {
            if session.send(event.clone()).is_err() {
                warn!(session = %session.id, "dropping broadcast: mailbox full or closed");
            }
        }
    }

    pub fn send_to(&self, id: SessionId, event: OutboundEvent) {
        if let Some(session) = self.get(id) {
            if session.send(event).is_err() {
                warn!(session = %id, "dropping message: mailbox full or closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> IpAddr {
        IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, n))
    }

    #[test]
    fn host_cannot_be_taken_twice() {
        let mgr = SessionManager::new(8);
        let (a, _rx_a) = mgr.create(SessionId::new_v4(), Role::User, addr(1)).unwrap();
        let (b, _rx_b) = mgr.create(SessionId::new_v4(), Role::User, addr(2)).unwrap();
        mgr.set_host(a.id).unwrap();
        assert!(matches!(mgr.set_host(b.id), Err(AppError::HostAlreadyHeld)));
        assert!(mgr.is_host(a.id));
    }

    #[test]
    fn destroying_the_host_releases_it_and_broadcasts() {
        let mgr = SessionManager::new(8);
        let (a, _rx_a) = mgr.create(SessionId::new_v4(), Role::User, addr(1)).unwrap();
        let (b, mut rx_b) = mgr.create(SessionId::new_v4(), Role::User, addr(2)).unwrap();
        mgr.connect(a.id).unwrap();
        mgr.connect(b.id).unwrap();
        mgr.set_host(a.id).unwrap();

        mgr.destroy(a.id);

        assert!(!mgr.has_host());
        let received = rx_b.try_recv().unwrap();
        assert!(matches!(received, OutboundEvent::ControlRelease));
    }

    #[test]
    fn last_admin_leaving_unlocks() {
        let mgr = SessionManager::new(8);
        let (admin, _rx) = mgr.create(SessionId::new_v4(), Role::Admin, addr(1)).unwrap();
        mgr.set_locked(true);
        assert!(mgr.locked());

        mgr.destroy(admin.id);

        assert!(!mgr.locked());
    }

    #[test]
    fn locked_create_rejects_non_admin() {
        let mgr = SessionManager::new(8);
        mgr.set_locked(true);
        let err = mgr.create(SessionId::new_v4(), Role::User, addr(1)).unwrap_err();
        assert!(matches!(err, AppError::Locked));
        // Admin still gets in while locked.
        assert!(mgr.create(SessionId::new_v4(), Role::Admin, addr(2)).is_ok());
    }

    #[test]
    fn banned_address_is_rejected_for_non_admin_only() {
        let mgr = SessionManager::new(8);
        mgr.ban(addr(9));
        assert!(matches!(
            mgr.create(SessionId::new_v4(), Role::User, addr(9)),
            Err(AppError::Forbidden(_))
        ));
        assert!(mgr.create(SessionId::new_v4(), Role::Admin, addr(9)).is_ok());
    }

    #[test]
    fn broadcast_skips_except_and_disconnected() {
        let mgr = SessionManager::new(8);
        let (a, mut rx_a) = mgr.create(SessionId::new_v4(), Role::User, addr(1)).unwrap();
        let (b, mut rx_b) = mgr.create(SessionId::new_v4(), Role::User, addr(2)).unwrap();
        mgr.connect(a.id).unwrap();
        // b is never connected; broadcast must not reach it.
        mgr.broadcast(OutboundEvent::ControlRelease, Some(a.id));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }
}
