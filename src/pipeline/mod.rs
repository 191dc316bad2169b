//! Opaque media pipeline abstraction.
//!
//! Everything above this module treats a `Pipeline` as a black box built
//! from a textual template that either emits [`Sample`]s (a sink pipeline,
//! reading from an `appsink`) or consumes them (a source pipeline, writing
//! to an `appsrc`). The concrete backend is GStreamer (`src/pipeline/gst.rs`);
//! nothing outside this module touches a `gst::*` type directly.

mod gst;
mod sample;

pub use sample::Sample;

use async_trait::async_trait;

use crate::error::Result;

/// A running (or about-to-run) sink pipeline: produces a stream of samples.
#[async_trait]
pub trait SinkPipeline: Send + Sync {
    /// Pull the next sample, or `None` once the pipeline has stopped emitting.
    async fn next_sample(&mut self) -> Option<Sample>;

    /// Tear the pipeline down. Idempotent.
    fn stop(&mut self);
}

/// A running (or about-to-run) source pipeline: accepts pushed samples.
pub trait SourcePipeline: Send + Sync {
    /// Push one sample into the pipeline. Returns an error if the
    /// pipeline has already been torn down.
    fn push_sample(&self, sample: Sample) -> Result<()>;

    fn stop(&mut self);
}

/// Build a sink pipeline from a textual GStreamer launch description.
///
/// The description must name its terminal element `appsink name=sink`.
/// Construction failure is reported to the caller (used by `StreamSink`'s
/// `start`/rebuild path); it is the caller's responsibility to decide
/// whether that failure is recoverable or fatal (§7).
pub fn build_sink(template: &str) -> Result<Box<dyn SinkPipeline>> {
    gst::GstSinkPipeline::new(template).map(|p| Box::new(p) as Box<dyn SinkPipeline>)
}

/// Build a source pipeline from a textual GStreamer launch description.
///
/// The description must name its feed element `appsrc name=src`.
pub fn build_source(template: &str) -> Result<Box<dyn SourcePipeline>> {
    gst::GstSourcePipeline::new(template).map(|p| Box::new(p) as Box<dyn SourcePipeline>)
}

/// Substitute `{url}`-style placeholders by literal string replacement,
/// as §6 specifies. No template syntax validation is performed here;
/// a malformed result surfaces later as a pipeline construction error.
pub fn substitute(template: &str, key: &str, value: &str) -> String {
    template.replace(&format!("{{{key}}}"), value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_single_placeholder() {
        let out = substitute("appsrc ! rtmpsink location={url}", "url", "rtmp://example/live");
        assert_eq!(out, "appsrc ! rtmpsink location=rtmp://example/live");
    }

    #[test]
    fn substitute_is_noop_when_placeholder_absent() {
        let out = substitute("videotestsrc ! appsink name=sink", "url", "ignored");
        assert_eq!(out, "videotestsrc ! appsink name=sink");
    }
}
