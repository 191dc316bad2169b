//! `Desktop` capability: the X display / input injection backend, treated
//! as an external collaborator per the purpose statement. This module
//! defines the trait the rest of the coordinator depends on, plus one
//! concrete headless implementation sufficient to drive the coordinator
//! end to end (clipboard, keyboard modifiers, screen mode, cursor) without
//! a real X server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct KeyboardModifiers {
    pub layout: Option<String>,
    pub num_lock: Option<bool>,
    pub caps_lock: Option<bool>,
    pub scroll_lock: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScreenMode {
    pub width: u32,
    pub height: u32,
    pub rate: u32,
}

pub type ScreenChangeHook = Box<dyn Fn() + Send + Sync>;

/// A freshly rendered cursor image: raw pixels plus the hotspot offset
/// within them (§4.6, `CursorFrame::Image`).
#[derive(Debug, Clone)]
pub struct CursorImage {
    pub width: u16,
    pub height: u16,
    pub xhot: u16,
    pub yhot: u16,
    pub img: Vec<u8>,
}

/// What changed about the pointer: a plain position update, or a new
/// cursor image (shape change). `PeerTransport` turns either into a
/// [`crate::protocol::CursorFrame`] and pushes it down its data channel.
#[derive(Debug, Clone)]
pub enum CursorEvent {
    Position { x: u16, y: u16 },
    Image(CursorImage),
}

pub type CursorHook = Box<dyn Fn(CursorEvent) + Send + Sync>;

/// Opaque handle returned by `on_cursor_change`, passed back to
/// `remove_cursor_hook` when a peer tears down (mirrors `ListenerId` in
/// `crate::capture::sink`).
pub type CursorHookId = u64;

/// Capability surface consumed by `CaptureManager` and the control
/// dispatcher. A production implementation talks to X11/XTest; that
/// backend is out of scope for this specification (§1) — only the trait
/// and a headless default are specified here.
pub trait Desktop: Send + Sync {
    fn read_clipboard(&self) -> Result<String>;
    fn write_clipboard(&self, text: &str) -> Result<()>;
    fn apply_keyboard(&self, mods: KeyboardModifiers) -> Result<()>;
    fn inject_pointer(&self, x: u16, y: u16) -> Result<()>;

    fn screen_mode(&self) -> ScreenMode;
    fn screen_configurations(&self) -> Vec<ScreenMode>;
    /// Changing the mode fires `on_before`/`on_after` hooks around the switch.
    fn set_screen_mode(&self, mode: ScreenMode) -> Result<()>;

    /// Register a hook invoked just before the screen size changes.
    fn on_before_screen_size_change(&self, hook: ScreenChangeHook);
    /// Register a hook invoked just after the screen size has changed.
    fn on_after_screen_size_change(&self, hook: ScreenChangeHook);

    /// Register a hook invoked on every cursor position/image change.
    /// Returns a handle for `remove_cursor_hook`; each `PeerTransport`
    /// registers its own so it can forward frames down its own data
    /// channel and deregister on close.
    fn on_cursor_change(&self, hook: CursorHook) -> CursorHookId;
    fn remove_cursor_hook(&self, id: CursorHookId);
}

struct Inner {
    clipboard: String,
    mode: ScreenMode,
    before_hooks: Vec<ScreenChangeHook>,
    after_hooks: Vec<ScreenChangeHook>,
    cursor_hooks: HashMap<CursorHookId, CursorHook>,
}

/// Headless `Desktop`: clipboard and screen mode are in-memory state
/// guarded by a single mutex. `set_screen_mode` genuinely fires the
/// before/after hooks so `CaptureManager`'s rebuild wiring is exercised
/// without a real display server behind it. There is no real pointer
/// device to watch, so cursor hooks only fire when something calls
/// `inject_pointer`.
pub struct HeadlessDesktop {
    inner: Mutex<Inner>,
    configurations: Vec<ScreenMode>,
    next_cursor_hook_id: AtomicU64,
}

impl HeadlessDesktop {
    pub fn new() -> Arc<Self> {
        let configurations = vec![
            ScreenMode { width: 1920, height: 1080, rate: 30 },
            ScreenMode { width: 1280, height: 720, rate: 30 },
            ScreenMode { width: 854, height: 480, rate: 30 },
        ];
        Arc::new(Self {
            inner: Mutex::new(Inner {
                clipboard: String::new(),
                mode: configurations[0].clone(),
                before_hooks: Vec::new(),
                after_hooks: Vec::new(),
                cursor_hooks: HashMap::new(),
            }),
            configurations,
            next_cursor_hook_id: AtomicU64::new(1),
        })
    }
}

impl Desktop for HeadlessDesktop {
    fn read_clipboard(&self) -> Result<String> {
        Ok(self.inner.lock().clipboard.clone())
    }

    fn write_clipboard(&self, text: &str) -> Result<()> {
        self.inner.lock().clipboard = text.to_string();
        Ok(())
    }

    fn apply_keyboard(&self, mods: KeyboardModifiers) -> Result<()> {
        tracing::debug!(?mods, "applied keyboard modifiers");
        Ok(())
    }

    fn inject_pointer(&self, x: u16, y: u16) -> Result<()> {
        // Hooks are taken out from under the lock before invocation so
        // registered callbacks never run while it's held, then merged back.
        let hooks = {
            let mut guard = self.inner.lock();
            std::mem::take(&mut guard.cursor_hooks)
        };
        for hook in hooks.values() {
            hook(CursorEvent::Position { x, y });
        }
        self.inner.lock().cursor_hooks.extend(hooks);
        Ok(())
    }

    fn screen_mode(&self) -> ScreenMode {
        self.inner.lock().mode.clone()
    }

    fn screen_configurations(&self) -> Vec<ScreenMode> {
        self.configurations.clone()
    }

    fn set_screen_mode(&self, mode: ScreenMode) -> Result<()> {
        let before_hooks: Vec<_> = {
            let mut guard = self.inner.lock();
            std::mem::take(&mut guard.before_hooks)
        };
        for hook in &before_hooks {
            hook();
        }
        self.inner.lock().before_hooks = before_hooks;

        self.inner.lock().mode = mode;

        let after_hooks: Vec<_> = {
            let mut guard = self.inner.lock();
            std::mem::take(&mut guard.after_hooks)
        };
        for hook in &after_hooks {
            hook();
        }
        self.inner.lock().after_hooks = after_hooks;

        Ok(())
    }

    fn on_before_screen_size_change(&self, hook: ScreenChangeHook) {
        self.inner.lock().before_hooks.push(hook);
    }

    fn on_after_screen_size_change(&self, hook: ScreenChangeHook) {
        self.inner.lock().after_hooks.push(hook);
    }

    fn on_cursor_change(&self, hook: CursorHook) -> CursorHookId {
        let id = self.next_cursor_hook_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().cursor_hooks.insert(id, hook);
        id
    }

    fn remove_cursor_hook(&self, id: CursorHookId) {
        self.inner.lock().cursor_hooks.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as StdOrdering};

    #[test]
    fn clipboard_round_trips() {
        let d = HeadlessDesktop::new();
        d.write_clipboard("hello").unwrap();
        assert_eq!(d.read_clipboard().unwrap(), "hello");
    }

    #[test]
    fn set_screen_mode_fires_both_hooks() {
        let d = HeadlessDesktop::new();
        let before = Arc::new(AtomicUsize::new(0));
        let after = Arc::new(AtomicUsize::new(0));
        let b2 = before.clone();
        let a2 = after.clone();
        d.on_before_screen_size_change(Box::new(move || {
            b2.fetch_add(1, StdOrdering::SeqCst);
        }));
        d.on_after_screen_size_change(Box::new(move || {
            a2.fetch_add(1, StdOrdering::SeqCst);
        }));

        d.set_screen_mode(ScreenMode { width: 640, height: 480, rate: 30 }).unwrap();

        assert_eq!(before.load(StdOrdering::SeqCst), 1);
        assert_eq!(after.load(StdOrdering::SeqCst), 1);
        assert_eq!(d.screen_mode().width, 640);
    }

    #[test]
    fn cursor_hook_fires_on_pointer_injection() {
        let d = HeadlessDesktop::new();
        let seen: Arc<Mutex<Option<(u16, u16)>>> = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        d.on_cursor_change(Box::new(move |event| {
            if let CursorEvent::Position { x, y } = event {
                *seen2.lock() = Some((x, y));
            }
        }));

        d.inject_pointer(12, 34).unwrap();

        assert_eq!(*seen.lock(), Some((12, 34)));
    }

    #[test]
    fn removed_cursor_hook_stops_firing() {
        let d = HeadlessDesktop::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c2 = count.clone();
        let id = d.on_cursor_change(Box::new(move |_| {
            c2.fetch_add(1, StdOrdering::SeqCst);
        }));
        d.inject_pointer(1, 1).unwrap();
        d.remove_cursor_hook(id);
        d.inject_pointer(2, 2).unwrap();

        assert_eq!(count.load(StdOrdering::SeqCst), 1);
    }
}
