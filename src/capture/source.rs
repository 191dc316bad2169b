//! `StreamSource`: codec-selectable feed into a single source [`Pipeline`]
//! (§4.2). Used to inject a remote peer's webcam/microphone track back into
//! the desktop session.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::pipeline::{self, Sample, SourcePipeline};

struct Active {
    codec: String,
    pipeline: Box<dyn SourcePipeline>,
}

/// One-way counterpart of [`crate::capture::sink::StreamSink`]. At most one
/// codec is active at a time (§3); switching codecs tears down the current
/// Pipeline first.
pub struct StreamSource {
    id: String,
    templates: HashMap<String, String>,
    active: Mutex<Option<Active>>,
}

impl StreamSource {
    pub fn new(id: impl Into<String>, templates: HashMap<String, String>) -> Self {
        Self { id: id.into(), templates, active: Mutex::new(None) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn supports(&self, codec: &str) -> bool {
        self.templates.contains_key(codec)
    }

    pub async fn active_codec(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|a| a.codec.clone())
    }

    /// Build and switch to `codec`'s Pipeline. A no-op if `codec` is
    /// already active.
    pub async fn activate(&self, codec: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.as_ref().map(|a| a.codec.as_str()) == Some(codec) {
            return Ok(());
        }
        let template = self
            .templates
            .get(codec)
            .ok_or_else(|| AppError::Pipeline(format!("source `{}` has no template for codec `{codec}`", self.id)))?;

        if let Some(mut prev) = active.take() {
            prev.pipeline.stop();
        }

        let pipeline = pipeline::build_source(template)?;
        *active = Some(Active { codec: codec.to_string(), pipeline });
        Ok(())
    }

    pub async fn deactivate(&self) {
        if let Some(mut prev) = self.active.lock().await.take() {
            prev.pipeline.stop();
        }
    }

    /// Push a sample into the active Pipeline. Fails if nothing is active.
    pub async fn push_sample(&self, sample: Sample) -> Result<()> {
        match self.active.lock().await.as_ref() {
            Some(active) => active.pipeline.push_sample(sample),
            None => Err(AppError::Pipeline(format!("source `{}` has no active codec", self.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> HashMap<String, String> {
        HashMap::from([("vp8".to_string(), "appsrc name=src ! fakesink".to_string())])
    }

    #[tokio::test]
    async fn push_without_activation_fails() {
        let source = StreamSource::new("webcam", templates());
        let err = source.push_sample(Sample::new(vec![1], Default::default(), Default::default())).await.unwrap_err();
        assert!(matches!(err, AppError::Pipeline(_)));
    }

    #[tokio::test]
    async fn activate_unsupported_codec_fails() {
        let source = StreamSource::new("webcam", templates());
        let err = source.activate("h264").await.unwrap_err();
        assert!(matches!(err, AppError::Pipeline(_)));
    }

    #[test]
    fn supports_reflects_declared_codecs() {
        let source = StreamSource::new("webcam", templates());
        assert!(source.supports("vp8"));
        assert!(!source.supports("h264"));
    }
}
