//! `VideoStreamIngestor` — the per-camera capture → dedupe → infer → apply
//! engine (§4.5). One instance owns exactly one capture handle for its
//! entire lifetime.

pub mod frame;
pub mod prompt;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::dispatch::ActionDispatcher;
use crate::error::VideoMemoryError;
use crate::model::{NoteEntry, Task};
use crate::provider::ModelProvider;
use frame::{Frame, FrameSource};
use prompt::build_prompt;

const DEDUPE_THRESHOLD: f64 = 3.0;
const HISTORY_CAPACITY: usize = 20;
const WARMUP_READS: u32 = 5;
const NETWORK_RECONNECT_THRESHOLD: u32 = 30;
const LOCAL_RECONNECT_THRESHOLD: u32 = 10;
const POST_FAILURE_SLEEP: Duration = Duration::from_millis(100);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const ACTION_POLL_TIMEOUT: Duration = Duration::from_millis(500);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Coarse phase of the capture-and-reason state machine, exposed for tests
/// and status reporting. Matches the states named in §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestorPhase {
    Stopped,
    Opening,
    Warming,
    Reading,
    Inferring,
    Reconnect,
    ErrorNoted,
}

/// One completed inference, retained in the output history ring.
#[derive(Clone)]
pub struct OutputEntry {
    pub task_updates: Vec<crate::provider::TaskUpdate>,
    pub system_actions: Vec<crate::provider::SystemAction>,
    pub frame: Frame,
    pub prompt: String,
}

/// Invoked every time an inference appends a note to a task, so the owning
/// `TaskManager` can persist it and forward it to its own detection hook.
pub type OnTaskUpdated = Arc<dyn Fn(Task, Option<NoteEntry>) + Send + Sync>;

/// Builds the `FrameSource` a fresh capture attempt should use, given the
/// ingestor's `io_id`, its `camera_source` (§4.6: the `pull_url` for a
/// network camera, else the numeric capture index as text), and whether it
/// is a network stream. The default (`new`) wires up `GstFrameSource`; tests
/// inject a fake via `new_with_source_factory` to exercise the capture loop
/// without a camera.
pub type FrameSourceFactory = Arc<dyn Fn(&str, &str, bool) -> Box<dyn FrameSource> + Send + Sync>;

struct Shared {
    io_id: String,
    camera_source: String,
    is_network: bool,
    tasks: RwLock<Vec<Task>>,
    provider: RwLock<Arc<dyn ModelProvider>>,
    phase: RwLock<IngestorPhase>,
    latest_frame: RwLock<Option<Frame>>,
    last_processed_frame: RwLock<Option<Frame>>,
    history: RwLock<VecDeque<OutputEntry>>,
    total_output_count: AtomicU64,
    frames_skipped: AtomicU64,
    running: AtomicBool,
    start_requested: AtomicBool,
    action_tx: mpsc::Sender<String>,
    on_task_updated: OnTaskUpdated,
    source_factory: FrameSourceFactory,
}

/// Cloning a `VideoStreamIngestor` yields another handle to the same
/// underlying engine — the pattern `TaskManager` uses to hold a reference
/// alongside the ones kept by its own worker tasks.
#[derive(Clone)]
pub struct VideoStreamIngestor {
    shared: Arc<Shared>,
    capture_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
    action_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl VideoStreamIngestor {
    /// `camera_source` is the device's `pull_url` for a network camera, or
    /// the numeric capture index (as text) for a local one — §4.6's
    /// "camera_source = url for network else numeric index".
    pub fn new(
        io_id: String,
        camera_source: String,
        is_network: bool,
        provider: Arc<dyn ModelProvider>,
        dispatcher: Arc<ActionDispatcher>,
        on_task_updated: OnTaskUpdated,
    ) -> Self {
        Self::new_with_source_factory(
            io_id,
            camera_source,
            is_network,
            provider,
            dispatcher,
            on_task_updated,
            Arc::new(|io_id: &str, camera_source: &str, is_network: bool| -> Box<dyn FrameSource> {
                if is_network {
                    Box::new(frame::GstFrameSource::network(io_id.to_string(), camera_source.to_string()))
                } else {
                    let index: u32 = camera_source.parse().unwrap_or(0);
                    Box::new(frame::GstFrameSource::local(io_id.to_string(), index))
                }
            }),
        )
    }

    /// As `new`, but with an injectable capture backend — the seam
    /// `tests/engine_test.rs` uses to drive the full capture → dedupe →
    /// infer loop against a fake camera.
    pub fn new_with_source_factory(
        io_id: String,
        camera_source: String,
        is_network: bool,
        provider: Arc<dyn ModelProvider>,
        dispatcher: Arc<ActionDispatcher>,
        on_task_updated: OnTaskUpdated,
        source_factory: FrameSourceFactory,
    ) -> Self {
        let (action_tx, action_rx) = mpsc::channel::<String>(64);

        let shared = Arc::new(Shared {
            io_id,
            camera_source,
            is_network,
            tasks: RwLock::new(Vec::new()),
            provider: RwLock::new(provider),
            phase: RwLock::new(IngestorPhase::Stopped),
            latest_frame: RwLock::new(None),
            last_processed_frame: RwLock::new(None),
            history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
            total_output_count: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            running: AtomicBool::new(false),
            start_requested: AtomicBool::new(false),
            action_tx,
            on_task_updated,
            source_factory,
        });

        let action_handle = spawn_action_worker(shared.clone(), dispatcher, action_rx);

        Self {
            shared,
            capture_handle: Arc::new(Mutex::new(None)),
            action_handle: Arc::new(Mutex::new(Some(action_handle))),
        }
    }

    pub fn io_id(&self) -> &str {
        &self.shared.io_id
    }

    pub fn phase(&self) -> IngestorPhase {
        *self.shared.phase.read()
    }

    /// Append `task`, numbering it by current list length, and start the
    /// engine if idle (§4.5/§9: auto-start is an explicit signal, not a
    /// hidden side effect of the push itself).
    pub fn add_task(&self, mut task: Task) {
        let mut tasks = self.shared.tasks.write();
        task.task_number = tasks.len();
        tasks.push(task);
        drop(tasks);
        self.shared.start_requested.store(true, Ordering::SeqCst);
        self.start_if_requested();
    }

    /// Remove by description, renumbering the remainder contiguously from 0.
    /// Unknown descriptions are a no-op with a warning (§9's open-question
    /// resolution), not an error.
    pub fn remove_task(&self, task_desc: &str) {
        let mut tasks = self.shared.tasks.write();
        let before = tasks.len();
        tasks.retain(|t| t.task_desc() != task_desc);
        if tasks.len() == before {
            warn!(io_id = %self.shared.io_id, task_desc, "remove_task: no task matched, ignoring");
            return;
        }
        for (i, t) in tasks.iter_mut().enumerate() {
            t.task_number = i;
        }
    }

    pub fn edit_task(&self, old_desc: &str, new_desc: &str) -> bool {
        let tasks = self.shared.tasks.read();
        match tasks.iter().find(|t| t.task_desc() == old_desc) {
            Some(t) => {
                t.set_task_desc(new_desc);
                true
            }
            None => false,
        }
    }

    /// Hot-swap the provider; takes effect on the next inference only — an
    /// in-flight call keeps using the provider it started with.
    pub fn set_model_provider(&self, provider: Arc<dyn ModelProvider>) {
        *self.shared.provider.write() = provider;
    }

    pub fn start_if_requested(&self) {
        if !self.shared.start_requested.load(Ordering::SeqCst) {
            return;
        }
        self.start();
    }

    /// Idempotent: a second call while already running is a no-op.
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.start_requested.store(true, Ordering::SeqCst);
        let handle = spawn_capture_worker(self.shared.clone());
        *self.capture_handle.lock() = Some(handle);
        info!(io_id = %self.shared.io_id, "Ingestor started");
    }

    /// Force a fresh capture attempt regardless of current state — the
    /// explicit "restart" path §9 reserves for reopening a camera stuck in
    /// `ErrorNoted` without waiting for a new `add_task` call.
    pub fn restart(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.start();
    }

    /// Idempotent. Signals shutdown, waits up to 5 s, then force-aborts.
    pub async fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let handle = self.capture_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!(io_id = %self.shared.io_id, "Capture worker did not exit within 5s, discarding");
            }
        }
        info!(io_id = %self.shared.io_id, "Ingestor stopped");
    }

    /// Tear down the action worker too. Called once, when the last task for
    /// this `io_id` is removed and the ingestor itself is being disposed.
    pub async fn shutdown(&self) {
        self.stop().await;
        let handle = self.action_handle.lock().take();
        if let Some(handle) = handle {
            drop(self.shared.action_tx.clone());
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!(io_id = %self.shared.io_id, "Action worker did not exit within 5s, discarding");
            }
        }
    }

    pub fn get_tasks_list(&self) -> Vec<Task> {
        self.shared.tasks.read().clone()
    }

    pub fn task_count(&self) -> usize {
        self.shared.tasks.read().len()
    }

    pub fn get_latest_output(&self) -> Option<OutputEntry> {
        self.shared.history.read().back().cloned()
    }

    pub fn get_output_history(&self) -> Vec<OutputEntry> {
        self.shared.history.read().iter().cloned().collect()
    }

    pub fn get_total_output_count(&self) -> u64 {
        self.shared.total_output_count.load(Ordering::SeqCst)
    }

    pub fn get_frames_skipped(&self) -> u64 {
        self.shared.frames_skipped.load(Ordering::SeqCst)
    }

    pub fn get_latest_frame(&self) -> Option<Frame> {
        self.shared.latest_frame.read().clone()
    }
}

fn spawn_action_worker(
    shared: Arc<Shared>,
    dispatcher: Arc<ActionDispatcher>,
    mut rx: mpsc::Receiver<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            // `start_requested` only flips true once `start()`/`add_task()`
            // has run at least once, so this can't fire before the capture
            // side has ever been started — without it, a worker spawned
            // here (construction always leaves `running == false`) could
            // observe the break condition before the first `add_task` and
            // exit for good.
            if shared.start_requested.load(Ordering::SeqCst)
                && !shared.running.load(Ordering::SeqCst)
                && rx.is_empty()
            {
                break;
            }
            match tokio::time::timeout(ACTION_POLL_TIMEOUT, rx.recv()).await {
                Ok(Some(action)) => {
                    let dispatcher = dispatcher.clone();
                    let io_id = shared.io_id.clone();
                    let result = tokio::task::spawn_blocking(move || dispatcher.dispatch(&action)).await;
                    match result {
                        Ok(r) => debug!(io_id, status = ?r.status, message = r.message, "action dispatched"),
                        Err(e) => error!(io_id, error = %e, "action dispatch task panicked"),
                    }
                }
                Ok(None) => break,
                Err(_) => continue, // poll timeout, re-check shutdown flag
            }
        }

        let mut discarded = 0u64;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            warn!(io_id = %shared.io_id, discarded, "Drained undispatched actions on shutdown");
        }
    })
}

fn spawn_capture_worker(shared: Arc<Shared>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move { run_capture_loop(shared).await })
}

async fn run_capture_loop(shared: Arc<Shared>) {
    let io_id = shared.io_id.clone();
    let mut source = build_frame_source(&shared);

    'outer: loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        *shared.phase.write() = IngestorPhase::Opening;
        let opened = {
            let mut s = source;
            let r = tokio::task::spawn_blocking(move || {
                let res = s.open();
                (s, res)
            })
            .await;
            match r {
                Ok((s, res)) => {
                    source = s;
                    res
                }
                Err(e) => {
                    error!(io_id, error = %e, "open() task panicked");
                    break 'outer;
                }
            }
        };

        if let Err(e) = opened {
            error!(io_id, error = %e, "Capture open failed, noting error on every task and stopping");
            note_error_on_all_tasks(&shared, &format!("camera unavailable: {e}"));
            *shared.phase.write() = IngestorPhase::ErrorNoted;
            // Mark not-running so a later add_task (or an explicit restart())
            // can actually spawn a fresh capture worker — otherwise start()
            // would see `running` still true and silently no-op forever.
            shared.running.store(false, Ordering::SeqCst);
            break 'outer;
        }

        *shared.phase.write() = IngestorPhase::Warming;
        for _ in 0..WARMUP_READS {
            if !shared.running.load(Ordering::SeqCst) {
                break 'outer;
            }
            let (s, _) = read_one(source).await;
            source = s;
        }

        *shared.phase.write() = IngestorPhase::Reading;
        let mut consecutive_failures: u32 = 0;
        let threshold = if shared.is_network { NETWORK_RECONNECT_THRESHOLD } else { LOCAL_RECONNECT_THRESHOLD };

        loop {
            if !shared.running.load(Ordering::SeqCst) {
                break 'outer;
            }

            let (s, outcome) = read_one(source).await;
            source = s;

            let frame = match outcome {
                Ok(Some(frame)) => {
                    consecutive_failures = 0;
                    frame
                }
                Ok(None) => continue, // benign timeout, keep reading
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(io_id, error = %e, consecutive_failures, "Frame read failed");
                    if consecutive_failures >= threshold {
                        *shared.phase.write() = IngestorPhase::Reconnect;
                        warn!(io_id, "Reconnect threshold reached, reopening capture");
                        sleep(RECONNECT_BACKOFF).await;
                        continue 'outer;
                    }
                    sleep(POST_FAILURE_SLEEP).await;
                    continue;
                }
            };

            *shared.latest_frame.write() = Some(frame.clone());

            let is_duplicate = {
                let last = shared.last_processed_frame.read();
                match last.as_ref().and_then(|l| frame.mean_abs_diff(l)) {
                    Some(diff) => diff < DEDUPE_THRESHOLD,
                    None => false,
                }
            };

            if is_duplicate {
                shared.frames_skipped.fetch_add(1, Ordering::SeqCst);
                sleep(POST_FAILURE_SLEEP).await;
                continue;
            }

            *shared.phase.write() = IngestorPhase::Inferring;
            run_inference(&shared, frame).await;
            *shared.phase.write() = IngestorPhase::Reading;
        }
    }

    {
        let mut s = source;
        let _ = tokio::task::spawn_blocking(move || {
            s.close();
            s
        })
        .await;
    }
    info!(io_id, "Capture worker exited");
}

async fn read_one(mut source: Box<dyn FrameSource>) -> (Box<dyn FrameSource>, crate::error::Result<Option<Frame>>) {
    let r = tokio::task::spawn_blocking(move || {
        let res = source.read_frame();
        (source, res)
    })
    .await;
    match r {
        Ok((s, res)) => (s, res),
        Err(e) => (
            build_panicked_source(),
            Err(VideoMemoryError::Device(format!("read_frame task panicked: {e}"))),
        ),
    }
}

/// Placeholder returned only when a blocking read task itself panics — the
/// outer loop immediately counts it as a failure and, past the reconnect
/// threshold, rebuilds a fresh source anyway.
fn build_panicked_source() -> Box<dyn FrameSource> {
    struct Dead;
    impl FrameSource for Dead {
        fn open(&mut self) -> crate::error::Result<()> {
            Err(VideoMemoryError::Device("source panicked".into()))
        }
        fn read_frame(&mut self) -> crate::error::Result<Option<Frame>> {
            Err(VideoMemoryError::Device("source panicked".into()))
        }
        fn close(&mut self) {}
    }
    Box::new(Dead)
}

fn build_frame_source(shared: &Shared) -> Box<dyn FrameSource> {
    (shared.source_factory)(&shared.io_id, &shared.camera_source, shared.is_network)
}

fn note_error_on_all_tasks(shared: &Shared, message: &str) {
    let tasks = shared.tasks.read().clone();
    let now = now_unix();
    for task in tasks {
        let note = NoteEntry::new(message.to_string(), now);
        task.push_note(note.clone());
        (shared.on_task_updated)(task, Some(note));
    }
}

async fn run_inference(shared: &Arc<Shared>, frame: Frame) {
    let tasks = shared.tasks.read().clone();
    let prompt = build_prompt(&tasks);

    let image_b64 = match frame.to_jpeg_base64() {
        Ok(b64) => b64,
        Err(e) => {
            warn!(io_id = %shared.io_id, error = %e, "Failed to encode frame, skipping inference");
            return;
        }
    };

    let provider = shared.provider.read().clone();
    let prompt_for_call = prompt.clone();
    let outcome = tokio::task::spawn_blocking(move || provider.generate(&image_b64, &prompt_for_call)).await;

    let output = match outcome {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!(io_id = %shared.io_id, error = %e, "VLM call failed, frame skipped");
            return;
        }
        Err(e) => {
            error!(io_id = %shared.io_id, error = %e, "Inference task panicked, frame skipped");
            return;
        }
    };

    apply_result(shared, &tasks, &output);

    let mut history = shared.history.write();
    if history.len() >= HISTORY_CAPACITY {
        history.pop_front();
    }
    history.push_back(OutputEntry {
        task_updates: output.task_updates,
        system_actions: output.system_actions,
        frame: frame.clone(),
        prompt,
    });
    drop(history);
    shared.total_output_count.fetch_add(1, Ordering::SeqCst);
    *shared.last_processed_frame.write() = Some(frame);
}

fn apply_result(shared: &Arc<Shared>, tasks: &[Task], output: &crate::provider::VideoIngestorOutput) {
    for update in &output.task_updates {
        let Some(task) = tasks.iter().find(|t| t.task_number == update.task_number) else {
            // Task was deleted while inference was in flight; silently
            // ignored per §5's ordering guarantees.
            continue;
        };
        let note = if !update.task_note.is_empty() {
            let note = NoteEntry::new(update.task_note.clone(), now_unix());
            task.push_note(note.clone());
            Some(note)
        } else {
            None
        };
        if update.task_done {
            task.set_done(true);
        }
        (shared.on_task_updated)(task.clone(), note);
    }

    for action in &output.system_actions {
        if shared.action_tx.try_send(action.take_action.clone()).is_err() {
            warn!(io_id = %shared.io_id, "Action queue full, action dropped");
        }
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
