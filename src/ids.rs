//! Opaque identifiers shared across the session, protocol and capture layers.

/// Opaque per-session token (§3: `Session.id`). A random v4 UUID, not
/// guessable and not tied to any persisted identity.
pub type SessionId = uuid::Uuid;
