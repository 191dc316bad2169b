//! GStreamer-backed `Pipeline` implementation.
//!
//! Pulling a sample is blocking (`try_pull_sample`), so `SinkPipeline::next_sample`
//! runs the pull on a blocking task and awaits it, keeping the async
//! dispatcher loop above this module free of blocking calls.

use async_trait::async_trait;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSrc};

use super::sample::{Sample, SampleFlags};
use super::{SinkPipeline, SourcePipeline};
use crate::error::{AppError, Result};

fn ensure_gst_init() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        if let Err(e) = gst::init() {
            tracing::error!(error = %e, "gstreamer init failed");
        }
    });
}

pub struct GstSinkPipeline {
    pipeline: gst::Pipeline,
    appsink: AppSink,
}

impl GstSinkPipeline {
    pub fn new(template: &str) -> Result<Self> {
        ensure_gst_init();

        let pipeline = gst::parse::launch(template)
            .map_err(|e| AppError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| AppError::Pipeline("launch description is not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<AppSink>().ok())
            .ok_or_else(|| AppError::Pipeline("template has no element named `sink`".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| AppError::Pipeline("failed to start pipeline".into()))?;

        Ok(Self { pipeline, appsink })
    }
}

#[async_trait]
impl SinkPipeline for GstSinkPipeline {
    async fn next_sample(&mut self) -> Option<Sample> {
        let appsink = self.appsink.clone();
        let result = tokio::task::spawn_blocking(move || {
            appsink.try_pull_sample(gst::ClockTime::from_seconds(1))
        })
        .await
        .ok()?;

        let gst_sample = result?;
        let buffer = gst_sample.buffer_owned()?;
        let map = buffer.map_readable().ok()?;

        let pts = buffer
            .pts()
            .map(|t| std::time::Duration::from_nanos(t.nseconds()))
            .unwrap_or_default();
        let duration = buffer
            .duration()
            .map(|t| std::time::Duration::from_nanos(t.nseconds()))
            .unwrap_or_default();

        Some(Sample {
            data: bytes::Bytes::copy_from_slice(map.as_slice()),
            duration,
            pts,
            flags: SampleFlags {
                keyframe: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
            },
        })
    }

    fn stop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for GstSinkPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct GstSourcePipeline {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
}

impl GstSourcePipeline {
    pub fn new(template: &str) -> Result<Self> {
        ensure_gst_init();

        let pipeline = gst::parse::launch(template)
            .map_err(|e| AppError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| AppError::Pipeline("launch description is not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name("src")
            .and_then(|e| e.downcast::<AppSrc>().ok())
            .ok_or_else(|| AppError::Pipeline("template has no element named `src`".into()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| AppError::Pipeline("failed to start pipeline".into()))?;

        Ok(Self { pipeline, appsrc })
    }
}

impl SourcePipeline for GstSourcePipeline {
    fn push_sample(&self, sample: Sample) -> Result<()> {
        let mut buf = gst::Buffer::with_size(sample.data.len())
            .map_err(|_| AppError::Pipeline("buffer allocation failed".into()))?;
        {
            let buf_mut = buf.get_mut().ok_or_else(|| AppError::Pipeline("buffer not writable".into()))?;
            buf_mut.set_pts(gst::ClockTime::from_nseconds(sample.pts.as_nanos() as u64));
            buf_mut.set_duration(gst::ClockTime::from_nseconds(sample.duration.as_nanos() as u64));
            let mut map = buf_mut
                .map_writable()
                .map_err(|_| AppError::Pipeline("buffer map failed".into()))?;
            map.copy_from_slice(&sample.data);
        }
        self.appsrc
            .push_buffer(buf)
            .map_err(|_| AppError::Pipeline("appsrc push failed".into()))?;
        Ok(())
    }

    fn stop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for GstSourcePipeline {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
