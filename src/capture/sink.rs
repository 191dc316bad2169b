//! `StreamSink`: one-to-many fan-out over a single sink [`Pipeline`] (§4.1).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::pipeline::{self, Sample};

/// Opaque listener handle returned by [`StreamSink::add_listener`] (§9:
/// listener identity must not depend on callable equality the way the
/// source implementation's `addListener(fn)` does).
pub type ListenerId = u64;

type Listeners = Arc<Mutex<HashMap<ListenerId, Arc<ListenerQueue>>>>;

/// Bounded, drop-oldest queue backing one listener (design note §9).
pub struct ListenerQueue {
    inner: Mutex<VecDeque<Sample>>,
    capacity: usize,
    notify: Notify,
}

const DEFAULT_LISTENER_QUEUE_CAPACITY: usize = 8;

impl ListenerQueue {
    fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(VecDeque::with_capacity(capacity)), capacity, notify: Notify::new() }
    }

    fn push(&self, sample: Sample) {
        let mut queue = self.inner.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(sample);
        drop(queue);
        self.notify.notify_one();
    }

    /// Pull the next sample, waiting if the queue is currently empty.
    pub async fn recv(&self) -> Sample {
        loop {
            if let Some(sample) = self.inner.lock().pop_front() {
                return sample;
            }
            self.notify.notified().await;
        }
    }
}

enum SinkControl {
    Stop,
    Rebuild(oneshot::Sender<Result<()>>),
}

struct Lifecycle {
    control_tx: Option<mpsc::Sender<SinkControl>>,
    task: Option<JoinHandle<()>>,
}

/// Owns one sink [`Pipeline`] and multicasts its samples to every
/// registered listener (§4.1). Transitions are `none -> running -> none`
/// (I6); the listener registry survives rebuilds.
pub struct StreamSink {
    id: String,
    codec: String,
    template: String,
    listeners: Listeners,
    next_listener_id: AtomicU64,
    lifecycle: AsyncMutex<Lifecycle>,
    idle_grace: Duration,
}

impl StreamSink {
    pub fn new(id: impl Into<String>, codec: impl Into<String>, template: impl Into<String>) -> Arc<Self> {
        Self::with_idle_grace(id, codec, template, Duration::from_secs(5))
    }

    pub fn with_idle_grace(
        id: impl Into<String>,
        codec: impl Into<String>,
        template: impl Into<String>,
        idle_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            codec: codec.into(),
            template: template.into(),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            next_listener_id: AtomicU64::new(0),
            lifecycle: AsyncMutex::new(Lifecycle { control_tx: None, task: None }),
            idle_grace,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub async fn started(&self) -> bool {
        self.lifecycle.lock().await.control_tx.is_some()
    }

    /// Explicit start. Fails with `PipelineAlreadyExists` if one is already
    /// running (§4.1).
    pub async fn start(&self) -> Result<()> {
        self.start_with_template(self.template.clone()).await
    }

    /// Start using a one-off template in place of the declared one, after
    /// placeholder substitution (§6: `broadcast/create{url}`). The override
    /// only affects this run; a later plain `start()` reverts to the
    /// declared template.
    pub async fn start_with_template(&self, template: impl Into<String>) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.control_tx.is_some() {
            return Err(AppError::PipelineAlreadyExists);
        }
        self.spawn_dispatcher(&mut lifecycle, template.into()).await
    }

    /// Idempotent stop.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if let Some(tx) = lifecycle.control_tx.take() {
            let _ = tx.send(SinkControl::Stop).await;
        }
        if let Some(task) = lifecycle.task.take() {
            let _ = task.await;
        }
    }

    /// Destroy-then-recreate the pipeline without discarding listeners.
    /// A construction failure here is fatal to the process (§4.1, §7):
    /// the caller (`CaptureManager`) is expected to abort on `Err`.
    pub async fn rebuild(&self) -> Result<()> {
        let lifecycle = self.lifecycle.lock().await;
        let Some(tx) = lifecycle.control_tx.clone() else {
            return Ok(());
        };
        drop(lifecycle);

        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(SinkControl::Rebuild(resp_tx))
            .await
            .map_err(|_| AppError::Pipeline("sink dispatcher is gone".into()))?;
        resp_rx.await.map_err(|_| AppError::Pipeline("sink dispatcher is gone".into()))?
    }

    /// Register a new listener, autonomously starting the pipeline if it
    /// isn't running (§4.1). Returns the listener's opaque handle and the
    /// queue it should poll.
    pub async fn add_listener(self: &Arc<Self>) -> Result<(ListenerId, Arc<ListenerQueue>)> {
        if !self.started().await {
            match self.start().await {
                Ok(()) | Err(AppError::PipelineAlreadyExists) => {}
                Err(e) => return Err(e),
            }
        }
        let queue = Arc::new(ListenerQueue::new(DEFAULT_LISTENER_QUEUE_CAPACITY));
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().insert(id, queue.clone());
        Ok((id, queue))
    }

    /// Deregister a listener; a no-op if the handle is unknown. If this
    /// was the last listener, the pipeline is torn down after a bounded
    /// grace period (I4) unless a new listener arrives first.
    pub fn remove_listener(self: &Arc<Self>, id: ListenerId) {
        let became_empty = {
            let mut listeners = self.listeners.lock();
            let existed = listeners.remove(&id).is_some();
            existed && listeners.is_empty()
        };
        if became_empty {
            let this = self.clone();
            let grace = self.idle_grace;
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                if this.listeners.lock().is_empty() {
                    debug!(sink = %this.id, "idle grace elapsed, stopping sink");
                    this.stop().await;
                }
            });
        }
    }

    async fn spawn_dispatcher(&self, lifecycle: &mut Lifecycle, template: String) -> Result<()> {
        let (control_tx, control_rx) = mpsc::channel(4);
        let (ready_tx, ready_rx) = oneshot::channel();
        let listeners = self.listeners.clone();
        let sink_id = self.id.clone();

        let task = tokio::spawn(run_dispatcher(sink_id, template, listeners, control_rx, ready_tx));

        ready_rx
            .await
            .map_err(|_| AppError::Pipeline("sink dispatcher task died before starting".into()))??;

        lifecycle.control_tx = Some(control_tx);
        lifecycle.task = Some(task);
        Ok(())
    }
}

/// Dispatcher loop: owns the live pipeline, pulls samples and fans them
/// out to every registered listener under a short-held lock (§4.1). Once
/// the pipeline stops emitting without an explicit `stop`, it idles
/// accepting only control messages until a `Rebuild` or `Stop` arrives.
async fn run_dispatcher(
    sink_id: String,
    template: String,
    listeners: Listeners,
    mut control_rx: mpsc::Receiver<SinkControl>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let mut pipeline = match pipeline::build_sink(&template) {
        Ok(p) => {
            let _ = ready_tx.send(Ok(()));
            p
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    'outer: loop {
        loop {
            tokio::select! {
                sample = pipeline.next_sample() => {
                    match sample {
                        Some(sample) => {
                            for queue in listeners.lock().values() {
                                queue.push(sample.clone());
                            }
                        }
                        None => {
                            warn!(sink = %sink_id, "pipeline stopped emitting, waiting for rebuild");
                            break;
                        }
                    }
                }
                ctrl = control_rx.recv() => {
                    match ctrl {
                        None | Some(SinkControl::Stop) => {
                            pipeline.stop();
                            return;
                        }
                        Some(SinkControl::Rebuild(resp)) => {
                            pipeline.stop();
                            match pipeline::build_sink(&template) {
                                Ok(p) => {
                                    pipeline = p;
                                    let _ = resp.send(Ok(()));
                                }
                                Err(e) => {
                                    let _ = resp.send(Err(e));
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        }

        // Pipeline stalled: only a control message can revive or end it.
        loop {
            match control_rx.recv().await {
                None | Some(SinkControl::Stop) => {
                    pipeline.stop();
                    return;
                }
                Some(SinkControl::Rebuild(resp)) => {
                    pipeline.stop();
                    match pipeline::build_sink(&template) {
                        Ok(p) => {
                            pipeline = p;
                            let _ = resp.send(Ok(()));
                            continue 'outer;
                        }
                        Err(e) => {
                            let _ = resp.send(Err(e));
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_queue_drops_oldest_when_full() {
        let queue = ListenerQueue::new(2);
        queue.push(Sample::new(vec![1], Duration::ZERO, Duration::ZERO));
        queue.push(Sample::new(vec![2], Duration::ZERO, Duration::ZERO));
        queue.push(Sample::new(vec![3], Duration::ZERO, Duration::ZERO));
        let remaining: Vec<u8> = queue.inner.lock().iter().map(|s| s.data[0]).collect();
        assert_eq!(remaining, vec![2, 3]);
    }
}
