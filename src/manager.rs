//! `TaskManager` — source of truth for in-memory `Task` objects, arbiter of
//! ingestor lifetimes, and the seam through which the VLM provider is
//! hot-swapped (§4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::device::io_manager::IoManager;
use crate::dispatch::ActionDispatcher;
use crate::error::{Result, VideoMemoryError};
use crate::ingestor::frame::Frame;
use crate::ingestor::VideoStreamIngestor;
use crate::model::{DeviceSource, NoteEntry, Task, TaskStatus};
use crate::provider::factory::ProviderFactory;
use crate::provider::ModelProvider;
use crate::store::TaskStore;

/// Outcome of `add_task`.
#[derive(Debug, Clone)]
pub struct AddTaskResult {
    pub status: &'static str,
    pub task_id: String,
}

/// Outcome of `reload_model_provider`.
#[derive(Debug, Clone)]
pub struct ReloadResult {
    pub provider_class: String,
    pub updated_ingestors: usize,
    pub failed_ingestors: Vec<String>,
}

pub type DetectionHook = Arc<dyn Fn(&Task, Option<&NoteEntry>) + Send + Sync>;

pub struct TaskManager {
    io_manager: Arc<IoManager>,
    store: Arc<TaskStore>,
    dispatcher: Arc<ActionDispatcher>,
    tasks: RwLock<HashMap<String, Task>>,
    ingestors: RwLock<HashMap<String, VideoStreamIngestor>>,
    provider: RwLock<Arc<dyn ModelProvider>>,
    provider_factory: ProviderFactory,
    next_task_id: AtomicI64,
    detection_hook: Arc<RwLock<Option<DetectionHook>>>,
}

impl TaskManager {
    /// Load tasks from the store, running crash recovery first. Loaded
    /// tasks are visible via `list_tasks`/`get_task` but have no ingestor —
    /// per §4.6, an ingestor only exists once `add_task` has been called
    /// during this run.
    ///
    /// `provider_factory` is the single `ProviderFactory` the caller built
    /// at startup (see `main::run_record`) — `reload_model_provider` reuses
    /// it so every `OpenRouterProvider` this manager ever builds, initial
    /// or hot-swapped, shares the same injected rate limiter.
    pub fn new(
        io_manager: Arc<IoManager>,
        store: Arc<TaskStore>,
        dispatcher: Arc<ActionDispatcher>,
        provider: Arc<dyn ModelProvider>,
        provider_factory: ProviderFactory,
    ) -> Result<Self> {
        let terminated = store.terminate_active_tasks()?;
        if terminated > 0 {
            info!(terminated, "Recovered from a previous run");
        }

        let loaded = store.load_all_tasks()?;
        let next_id = store.get_max_task_id()? + 1;

        let mut tasks = HashMap::with_capacity(loaded.len());
        for task in loaded {
            tasks.insert(task.task_id.clone(), task);
        }

        Ok(Self {
            io_manager,
            store,
            dispatcher,
            tasks: RwLock::new(tasks),
            ingestors: RwLock::new(HashMap::new()),
            provider: RwLock::new(provider),
            provider_factory,
            next_task_id: AtomicI64::new(next_id),
            detection_hook: Arc::new(RwLock::new(None)),
        })
    }

    pub fn set_detection_hook(&self, hook: DetectionHook) {
        *self.detection_hook.write() = Some(hook);
    }

    /// Validates the device, persists the task, ensures an ingestor exists
    /// for `io_id`, and hands the (shared-by-reference) `Task` to it.
    pub fn add_task(&self, io_id: &str, desc: &str) -> Result<AddTaskResult> {
        let device = self
            .io_manager
            .get(io_id)
            .ok_or_else(|| VideoMemoryError::CameraNotFound { io_id: io_id.to_string() })?;
        if device.category != "camera" {
            return Err(VideoMemoryError::Config(format!("device '{io_id}' is not a camera")));
        }

        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst).to_string();
        let task = Task::new(task_id.clone(), 0, desc.to_string(), io_id.to_string());

        self.store.save_task(&task, now_unix())?;
        self.tasks.write().insert(task_id.clone(), task.clone());

        let is_network = device.source == DeviceSource::Network;
        let camera_source = if is_network { device.pull_url.clone().unwrap_or_else(|| io_id.to_string()) } else { io_id.to_string() };
        let ingestor = self.get_or_create_ingestor(io_id, &camera_source, is_network);
        ingestor.add_task(task);

        info!(io_id, task_id, "Task added");
        Ok(AddTaskResult { status: "ok", task_id })
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.tasks.read().get(task_id).cloned()
    }

    pub fn list_tasks(&self, io_id: Option<&str>) -> Vec<Task> {
        let tasks = self.tasks.read();
        match io_id {
            Some(io_id) => tasks.values().filter(|t| t.io_id == io_id).cloned().collect(),
            None => tasks.values().cloned().collect(),
        }
    }

    /// Marks the task done, removes it from its ingestor, and tears the
    /// ingestor down if that was its last task. The row and its notes are
    /// kept. Stopping an already-stopped task is an error, per §7.
    pub fn stop_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| VideoMemoryError::Store(format!("task '{task_id}' not found")))?;

        if task.is_done() {
            return Err(VideoMemoryError::Action(format!("task '{task_id}' is already stopped")));
        }

        task.set_done(true);
        self.store.update_task_done(task_id, true, Some(TaskStatus::Done))?;

        if let Some(ingestor) = self.ingestors.read().get(&task.io_id).cloned() {
            ingestor.remove_task(&task.task_desc());
            if ingestor.task_count() == 0 {
                self.teardown_ingestor(&task.io_id);
            }
        }

        info!(task_id, "Task stopped");
        Ok(())
    }

    /// As `stop_task`, but also removes the row and its notes entirely.
    pub fn delete_task(&self, task_id: &str) -> Result<()> {
        let task = self
            .tasks
            .write()
            .remove(task_id)
            .ok_or_else(|| VideoMemoryError::Store(format!("task '{task_id}' not found")))?;

        if let Some(ingestor) = self.ingestors.read().get(&task.io_id).cloned() {
            ingestor.remove_task(&task.task_desc());
            if ingestor.task_count() == 0 {
                self.teardown_ingestor(&task.io_id);
            }
        }

        self.store.delete_task(task_id)?;
        info!(task_id, "Task deleted");
        Ok(())
    }

    pub fn update_task_status(&self, task_id: &str, done: bool) -> Result<()> {
        let task = self
            .tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| VideoMemoryError::Store(format!("task '{task_id}' not found")))?;
        task.set_done(done);
        self.store.update_task_done(task_id, done, None)
    }

    /// Mutates the description both in the store and the live `Task` —
    /// shared-reference semantics make the new description visible to the
    /// owning ingestor immediately.
    pub fn edit_task(&self, task_id: &str, new_desc: &str) -> Result<()> {
        let task = self
            .tasks
            .read()
            .get(task_id)
            .cloned()
            .ok_or_else(|| VideoMemoryError::Store(format!("task '{task_id}' not found")))?;
        task.set_task_desc(new_desc);
        self.store.update_task_desc(task_id, new_desc)
    }

    /// Builds a new provider via the factory, swaps it into the manager and
    /// every live ingestor. Never fails outward — per-ingestor failures are
    /// reported in the result, though in this implementation a hot-swap
    /// cannot itself fail once the provider is constructed.
    pub fn reload_model_provider(&self, model_name: Option<&str>) -> ReloadResult {
        let provider = self.provider_factory.build(model_name, &self.store);
        let provider: Arc<dyn ModelProvider> = Arc::from(provider);
        *self.provider.write() = provider.clone();

        let ingestors = self.ingestors.read();
        for ingestor in ingestors.values() {
            ingestor.set_model_provider(provider.clone());
        }
        let updated = ingestors.len();
        drop(ingestors);

        ReloadResult {
            provider_class: provider.name().to_string(),
            updated_ingestors: updated,
            failed_ingestors: Vec::new(),
        }
    }

    pub fn get_latest_frame_for_device(&self, io_id: &str) -> Option<Frame> {
        self.ingestors.read().get(io_id)?.get_latest_frame()
    }

    fn get_or_create_ingestor(&self, io_id: &str, camera_source: &str, is_network: bool) -> VideoStreamIngestor {
        if let Some(existing) = self.ingestors.read().get(io_id) {
            return existing.clone();
        }

        let mut ingestors = self.ingestors.write();
        if let Some(existing) = ingestors.get(io_id) {
            return existing.clone();
        }

        let provider = self.provider.read().clone();
        let hook = self.make_on_task_updated();
        let ingestor = VideoStreamIngestor::new(
            io_id.to_string(),
            camera_source.to_string(),
            is_network,
            provider,
            self.dispatcher.clone(),
            hook,
        );
        ingestors.insert(io_id.to_string(), ingestor.clone());
        ingestor
    }

    fn teardown_ingestor(&self, io_id: &str) {
        if let Some(ingestor) = self.ingestors.write().remove(io_id) {
            let ingestor = ingestor.clone();
            tokio::spawn(async move {
                ingestor.shutdown().await;
            });
        }
    }

    fn make_on_task_updated(&self) -> crate::ingestor::OnTaskUpdated {
        let store = self.store.clone();
        let hook_slot = self.detection_hook.clone();
        Arc::new(move |task: Task, note: Option<NoteEntry>| {
            if let Some(note) = &note {
                if let Err(e) = store.save_note(&task.task_id, note) {
                    error!(task_id = task.task_id, error = %e, "Failed to persist note");
                }
            }
            if task.is_done() {
                if let Err(e) = store.update_task_done(&task.task_id, true, Some(TaskStatus::Done)) {
                    error!(task_id = task.task_id, error = %e, "Failed to persist task completion");
                }
            }
            let hook = hook_slot.read().clone();
            if let Some(hook) = hook {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    hook(&task, note.as_ref());
                }));
                if result.is_err() {
                    warn!(task_id = task.task_id, "on_detection_event callback panicked");
                }
            }
        })
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::detect::{DetectedDevice, DeviceDetector};
    use crate::error::VlmError;
    use crate::provider::VideoIngestorOutput;

    struct FakeDetector;
    impl DeviceDetector for FakeDetector {
        fn detect(&self) -> Vec<DetectedDevice> {
            vec![DetectedDevice { index: 0, name: "Webcam".into() }]
        }
    }

    struct FakeProvider;
    impl ModelProvider for FakeProvider {
        fn generate(&self, _image_jpeg_b64: &str, _prompt: &str) -> std::result::Result<VideoIngestorOutput, VlmError> {
            Ok(VideoIngestorOutput::default())
        }
        fn name(&self) -> &str {
            "fake"
        }
    }

    fn manager() -> TaskManager {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        let io_manager = Arc::new(IoManager::new(Box::new(FakeDetector), store.clone(), 8554));
        let dispatcher = Arc::new(ActionDispatcher::new(store.clone()));
        let provider: Arc<dyn ModelProvider> = Arc::new(FakeProvider);
        TaskManager::new(io_manager, store, dispatcher, provider, ProviderFactory::new()).unwrap()
    }

    #[tokio::test]
    async fn add_task_rejects_unknown_device() {
        let mgr = manager();
        let result = mgr.add_task("not-a-real-device", "watch");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn add_task_creates_an_ingestor() {
        let mgr = manager();
        let result = mgr.add_task("0", "watch the door").unwrap();
        assert_eq!(result.task_id, "0");
        assert_eq!(mgr.list_tasks(Some("0")).len(), 1);
    }

    #[tokio::test]
    async fn stop_task_twice_is_an_error_the_second_time() {
        let mgr = manager();
        let result = mgr.add_task("0", "watch the door").unwrap();
        mgr.stop_task(&result.task_id).unwrap();
        assert!(mgr.stop_task(&result.task_id).is_err());
    }

    #[tokio::test]
    async fn delete_task_removes_the_row() {
        let mgr = manager();
        let result = mgr.add_task("0", "watch the door").unwrap();
        mgr.delete_task(&result.task_id).unwrap();
        assert!(mgr.get_task(&result.task_id).is_none());
    }

    #[tokio::test]
    async fn task_ids_are_monotone_after_recovery() {
        let store = Arc::new(TaskStore::open_in_memory().unwrap());
        store.save_task(&Task::new("0".into(), 0, "a".into(), "0".into()), 1).unwrap();
        store.save_task(&Task::new("5".into(), 0, "b".into(), "0".into()), 1).unwrap();

        let io_manager = Arc::new(IoManager::new(Box::new(FakeDetector), store.clone(), 8554));
        let dispatcher = Arc::new(ActionDispatcher::new(store.clone()));
        let provider: Arc<dyn ModelProvider> = Arc::new(FakeProvider);
        let mgr = TaskManager::new(io_manager, store, dispatcher, provider, ProviderFactory::new()).unwrap();

        let result = mgr.add_task("0", "c").unwrap();
        assert_eq!(result.task_id, "6");
    }
}
