use bytes::Bytes;

/// A single timestamped media payload emitted by a sink Pipeline.
///
/// Produced by the pipeline, passed by value to listeners, and not
/// retained beyond dispatch (§3). The payload is opaque to everything
/// above the pipeline layer: codec framing lives inside `data`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub data: Bytes,
    pub duration: std::time::Duration,
    pub pts: std::time::Duration,
    pub flags: SampleFlags,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags {
    pub keyframe: bool,
}

impl Sample {
    pub fn new(data: impl Into<Bytes>, pts: std::time::Duration, duration: std::time::Duration) -> Self {
        Self {
            data: data.into(),
            duration,
            pts,
            flags: SampleFlags::default(),
        }
    }
}
