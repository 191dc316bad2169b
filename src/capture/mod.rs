//! `CaptureManager`: owns every sink and source, wires screen-resize
//! rebuild, and shuts the capture layer down in declaration order (§4.3).

mod sink;
mod source;

pub use sink::{ListenerId, ListenerQueue, StreamSink};
pub use source::StreamSource;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use crate::config::AppConfig;
use crate::desktop::Desktop;

enum ScreenEdge {
    Before,
    After,
}

/// Aggregates the capture-side sinks (video variants, audio, broadcast,
/// screencast) and sources (webcam, microphone) declared in [`AppConfig`].
pub struct CaptureManager {
    video: Vec<Arc<StreamSink>>,
    audio: Arc<StreamSink>,
    broadcast: Arc<StreamSink>,
    screencast: Arc<StreamSink>,
    webcam: Arc<StreamSource>,
    microphone: Arc<StreamSource>,
}

impl CaptureManager {
    /// Build the manager and subscribe it to `desktop`'s screen-resize
    /// hooks. Only the video variants are screen-resolution dependent
    /// (audio/broadcast/screencast templates do not encode a resolution),
    /// so only they participate in the resize walk.
    pub fn new(config: &AppConfig, desktop: &Arc<dyn Desktop>) -> Arc<Self> {
        let video = config
            .video
            .variants
            .iter()
            .map(|v| StreamSink::new(v.id.clone(), "video", v.template.clone()))
            .collect();

        let manager = Arc::new(Self {
            video,
            audio: StreamSink::new(config.audio.id.clone(), "audio", config.audio.template.clone()),
            broadcast: StreamSink::new(
                config.broadcast.id.clone(),
                "broadcast",
                config.broadcast.template.clone(),
            ),
            screencast: StreamSink::new(
                config.screencast.id.clone(),
                "screencast",
                config.screencast.template.clone(),
            ),
            webcam: Arc::new(StreamSource::new(config.webcam.id.clone(), config.webcam.codecs.clone())),
            microphone: Arc::new(StreamSource::new(
                config.microphone.id.clone(),
                config.microphone.codecs.clone(),
            )),
        });

        manager.clone().spawn_resize_walk(desktop);
        manager
    }

    /// Sinks whose template is resolution-dependent and must be torn down
    /// and rebuilt around a screen-size change: the video variants plus
    /// the `ximagesrc`-based broadcast and screencast sinks. `audio` has
    /// no resolution and is excluded (§4.3).
    fn resize_sensitive_sinks(&self) -> impl Iterator<Item = &Arc<StreamSink>> {
        self.video.iter().chain([&self.broadcast, &self.screencast])
    }

    fn spawn_resize_walk(self: Arc<Self>, desktop: &Arc<dyn Desktop>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ScreenEdge>();
        let before_tx = tx.clone();
        desktop.on_before_screen_size_change(Box::new(move || {
            let _ = before_tx.send(ScreenEdge::Before);
        }));
        desktop.on_after_screen_size_change(Box::new(move || {
            let _ = tx.send(ScreenEdge::After);
        }));

        let pending = Arc::new(Mutex::new(Vec::new()));
        tokio::spawn(async move {
            while let Some(edge) = rx.recv().await {
                match edge {
                    ScreenEdge::Before => {
                        let mut started = Vec::new();
                        for sink in self.resize_sensitive_sinks() {
                            if sink.started().await {
                                sink.stop().await;
                                started.push(sink.clone());
                            }
                        }
                        *pending.lock() = started;
                    }
                    ScreenEdge::After => {
                        let started = std::mem::take(&mut *pending.lock());
                        for sink in started {
                            if let Err(e) = sink.start().await {
                                error!(sink = sink.id(), error = %e, "pipeline rebuild failed after screen resize");
                                std::process::abort();
                            }
                        }
                    }
                }
            }
        });
    }

    pub fn video(&self, id: &str) -> Option<&Arc<StreamSink>> {
        self.video.iter().find(|s| s.id() == id)
    }

    /// Stable, declaration-ordered ids (I5).
    pub fn video_ids(&self) -> Vec<&str> {
        self.video.iter().map(|s| s.id()).collect()
    }

    pub fn audio(&self) -> &Arc<StreamSink> {
        &self.audio
    }

    pub fn broadcast(&self) -> &Arc<StreamSink> {
        &self.broadcast
    }

    pub fn screencast(&self) -> &Arc<StreamSink> {
        &self.screencast
    }

    pub fn webcam(&self) -> &Arc<StreamSource> {
        &self.webcam
    }

    pub fn microphone(&self) -> &Arc<StreamSource> {
        &self.microphone
    }

    /// Shut every sink/source down in declaration order (§4.3).
    pub async fn shutdown(&self) {
        for sink in &self.video {
            sink.stop().await;
        }
        self.audio.stop().await;
        self.broadcast.stop().await;
        self.screencast.stop().await;
        self.webcam.deactivate().await;
        self.microphone.deactivate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_ids_preserve_declaration_order() {
        let config = AppConfig::default();
        let desktop: Arc<dyn Desktop> = crate::desktop::HeadlessDesktop::new();
        let manager = CaptureManager::new(&config, &desktop);
        assert_eq!(manager.video_ids(), vec!["hd", "sd", "ld"]);
    }

    #[test]
    fn unknown_video_id_is_none() {
        let config = AppConfig::default();
        let desktop: Arc<dyn Desktop> = crate::desktop::HeadlessDesktop::new();
        let manager = CaptureManager::new(&config, &desktop);
        assert!(manager.video("4k").is_none());
    }
}
