//! Wire formats carried by the control channel and the binary cursor
//! channel (§6). Nothing outside this module should construct raw JSON or
//! raw cursor bytes directly.

mod cursor;
mod events;

pub use cursor::CursorFrame;
pub use events::{InboundEvent, OutboundEvent};
