//! The rotation scheduler.
//!
//! One [`RotationScheduler`] exists per process. At most one background
//! loop runs at a time; starting a new rotation first stops and awaits the
//! previous loop. The loop shows items in a shuffled order, reshuffling each
//! time the order is exhausted, and pauses while the device is disconnected.
//!
//! Every change to an active selection is persisted, so [`resume`] can
//! restore it after a restart.
//!
//! [`resume`]: RotationScheduler::resume

use std::sync::Arc;
use std::time::Duration;

use pixoo_core::{CoreError, CoreResult, RotationInterval};
use rand::seq::SliceRandom;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::display::RotationDisplay;
use crate::gallery::Gallery;
use crate::store::{RotationConfig, RotationStore};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often a paused loop checks whether the device is back.
    pub reconnect_poll: Duration,
    /// Consecutive upload failures logged before the counter is reset.
    pub max_consecutive_failures: u32,
    /// How long `shutdown` waits for the loop before aborting it.
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconnect_poll: Duration::from_secs(5),
            max_consecutive_failures: 3,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Snapshot returned by [`RotationScheduler::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotationStatus {
    pub is_active: bool,
    /// Active but waiting for the device to reconnect.
    pub is_paused: bool,
    /// The active selection, or the saved one while inactive.
    pub selected_ids: Vec<String>,
    pub selected_count: usize,
    pub interval_seconds: u64,
    pub interval_label: String,
    pub current_index: usize,
    pub has_saved_config: bool,
}

/// One entry of [`RotationScheduler::intervals`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalOption {
    pub seconds: u64,
    pub label: &'static str,
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RotationState {
    active: bool,
    paused: bool,
    selected_ids: Vec<String>,
    interval: RotationInterval,
    /// Shuffled traversal order of `selected_ids`.
    order: Vec<String>,
    current_index: usize,
}

impl RotationState {
    fn reshuffle(&mut self) {
        self.order = self.selected_ids.clone();
        self.order.shuffle(&mut rand::rng());
        self.current_index = 0;
    }

    fn snapshot(&self) -> RotationConfig {
        RotationConfig::new(self.selected_ids.clone(), self.interval)
    }

    /// Drop `id` from the selection and the traversal order. Returns
    /// whether it was selected.
    fn remove(&mut self, id: &str) -> bool {
        let Some(pos) = self.selected_ids.iter().position(|s| s == id) else {
            return false;
        };
        self.selected_ids.remove(pos);

        if let Some(pos) = self.order.iter().position(|s| s == id) {
            self.order.remove(pos);
            if pos < self.current_index {
                self.current_index -= 1;
            }
        }
        true
    }
}

struct Shared {
    gallery: Arc<dyn Gallery>,
    display: Arc<dyn RotationDisplay>,
    store: RotationStore,
    config: SchedulerConfig,
    state: Mutex<RotationState>,
}

struct LoopHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl LoopHandle {
    async fn stop(self, grace: Duration) {
        self.cancel.cancel();
        let mut handle = self.handle;
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            tracing::warn!("Rotation loop did not stop in time, aborting");
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct RotationScheduler {
    shared: Arc<Shared>,
    /// Lock order: `task` before `shared.state`.
    task: Mutex<Option<LoopHandle>>,
}

impl RotationScheduler {
    pub fn new(
        gallery: Arc<dyn Gallery>,
        display: Arc<dyn RotationDisplay>,
        store: RotationStore,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                gallery,
                display,
                store,
                config,
                state: Mutex::new(RotationState::default()),
            }),
            task: Mutex::new(None),
        }
    }

    /// The allowed intervals with their labels.
    pub fn intervals() -> Vec<IntervalOption> {
        RotationInterval::ALL
            .iter()
            .map(|i| IntervalOption {
                seconds: i.as_secs(),
                label: i.label(),
            })
            .collect()
    }

    /// Start rotating `ids`, replacing any running rotation.
    ///
    /// Unknown ids are dropped; the call fails if none are left.
    pub async fn start(&self, ids: &[String], interval_seconds: u64) -> CoreResult<()> {
        let interval = RotationInterval::from_secs(interval_seconds)?;
        if ids.is_empty() {
            return Err(CoreError::Validation("No items selected for rotation".into()));
        }

        let mut valid: Vec<String> = Vec::with_capacity(ids.len());
        for id in ids {
            if self.shared.gallery.contains(id) && !valid.contains(id) {
                valid.push(id.clone());
            } else {
                tracing::debug!(id = %id, "Skipping unknown or duplicate rotation item");
            }
        }
        if valid.is_empty() {
            return Err(CoreError::Validation(
                "None of the selected items exist in the gallery".into(),
            ));
        }

        let mut task = self.task.lock().await;
        if let Some(previous) = task.take() {
            self.shared.state.lock().await.active = false;
            previous.stop(self.shared.config.shutdown_grace).await;
        }

        {
            let mut state = self.shared.state.lock().await;
            state.selected_ids = valid;
            state.interval = interval;
            state.reshuffle();
            state.active = true;
            state.paused = false;

            if let Err(e) = self.shared.store.save(&state.snapshot()) {
                state.active = false;
                return Err(e);
            }

            tracing::info!(
                items = state.selected_ids.len(),
                interval = interval.label(),
                "Rotation started",
            );
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.shared), cancel.clone()));
        *task = Some(LoopHandle { cancel, handle });
        Ok(())
    }

    /// Stop the rotation, keeping its config on disk for [`resume`].
    /// Returns `false` if nothing was running.
    ///
    /// [`resume`]: RotationScheduler::resume
    pub async fn stop(&self) -> CoreResult<bool> {
        let mut task = self.task.lock().await;

        let snapshot = {
            let mut state = self.shared.state.lock().await;
            if !state.active {
                return Ok(false);
            }
            state.active = false;
            state.paused = false;
            state.snapshot()
        };

        if let Some(handle) = task.take() {
            handle.stop(self.shared.config.shutdown_grace).await;
        }

        self.shared.store.save(&snapshot)?;
        tracing::info!("Rotation stopped");
        Ok(true)
    }

    /// Restart the saved rotation with whichever of its items still exist.
    pub async fn resume(&self) -> CoreResult<()> {
        let config = self
            .load_saved()?
            .ok_or_else(|| CoreError::Validation("No saved rotation to resume".into()))?;
        self.start(&config.selected_ids, config.interval_seconds.as_secs())
            .await
    }

    /// Add `id` to the running rotation. Adding an id that is already
    /// selected succeeds without change.
    pub async fn add_item(&self, id: &str) -> CoreResult<()> {
        if !self.shared.gallery.contains(id) {
            return Err(CoreError::Validation(format!("Unknown gallery item '{id}'")));
        }

        let mut state = self.shared.state.lock().await;
        if !state.active {
            return Err(CoreError::Validation("Rotation is not active".into()));
        }
        if state.selected_ids.iter().any(|s| s == id) {
            return Ok(());
        }

        state.selected_ids.push(id.to_string());
        state.order.push(id.to_string());
        self.shared.store.save(&state.snapshot())?;

        tracing::info!(id, items = state.selected_ids.len(), "Item added to rotation");
        Ok(())
    }

    /// Remove `id` from the running rotation. Removing the last item stops
    /// the rotation and deletes its saved config.
    pub async fn remove_item(&self, id: &str) -> CoreResult<()> {
        let mut task = self.task.lock().await;

        {
            let mut state = self.shared.state.lock().await;
            if !state.active {
                return Err(CoreError::Validation("Rotation is not active".into()));
            }
            if !state.remove(id) {
                return Err(CoreError::Validation(format!("Item '{id}' is not in the rotation")));
            }

            if !state.selected_ids.is_empty() {
                self.shared.store.save(&state.snapshot())?;
                tracing::info!(id, items = state.selected_ids.len(), "Item removed from rotation");
                return Ok(());
            }

            state.active = false;
            state.paused = false;
        }

        if let Some(handle) = task.take() {
            handle.stop(self.shared.config.shutdown_grace).await;
        }
        self.shared.store.delete()?;
        tracing::info!("Rotation stopped: no items left");
        Ok(())
    }

    pub async fn status(&self) -> RotationStatus {
        let state = self.shared.state.lock().await;

        let (selected_ids, has_saved_config) = if state.active {
            (state.selected_ids.clone(), false)
        } else {
            match self.load_saved() {
                Ok(Some(saved)) => (saved.selected_ids, true),
                Ok(None) => (Vec::new(), false),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read saved rotation");
                    (Vec::new(), false)
                }
            }
        };

        RotationStatus {
            is_active: state.active,
            is_paused: state.paused,
            selected_count: selected_ids.len(),
            selected_ids,
            interval_seconds: state.interval.as_secs(),
            interval_label: state.interval.label().to_string(),
            current_index: state.current_index,
            has_saved_config,
        }
    }

    /// Forget the saved rotation. Returns whether one existed.
    pub async fn delete_saved_config(&self) -> CoreResult<bool> {
        self.shared.store.delete()
    }

    /// Stop the loop for process exit. The saved config is left as is so
    /// the next start can resume it.
    pub async fn shutdown(&self) {
        let mut task = self.task.lock().await;
        {
            let mut state = self.shared.state.lock().await;
            state.active = false;
            state.paused = false;
        }
        if let Some(handle) = task.take() {
            handle.stop(self.shared.config.shutdown_grace).await;
            tracing::info!("Rotation loop shut down");
        }
    }

    /// The saved config with vanished ids pruned. A config with no
    /// surviving ids is deleted.
    fn load_saved(&self) -> CoreResult<Option<RotationConfig>> {
        let Some(mut config) = self.shared.store.load()? else {
            return Ok(None);
        };

        let before = config.selected_ids.len();
        config
            .selected_ids
            .retain(|id| self.shared.gallery.contains(id));

        if config.selected_ids.is_empty() {
            tracing::warn!("Saved rotation has no remaining items, deleting it");
            self.shared.store.delete()?;
            return Ok(None);
        }
        if config.selected_ids.len() != before {
            tracing::info!(
                pruned = before - config.selected_ids.len(),
                "Pruned vanished items from saved rotation",
            );
        }
        Ok(Some(config))
    }
}

// ---------------------------------------------------------------------------
// Background loop
// ---------------------------------------------------------------------------

enum Step {
    /// Wait this long before the next step.
    Wait(Duration),
    /// The rotation ended on its own.
    Finished,
}

async fn run_loop(shared: Arc<Shared>, cancel: CancellationToken) {
    tracing::info!("Rotation loop started");
    let mut failures = 0u32;

    loop {
        let step = tokio::select! {
            _ = cancel.cancelled() => break,
            step = shared.step(&mut failures) => step,
        };

        let wait = match step {
            Step::Wait(wait) => wait,
            Step::Finished => break,
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }
    }

    tracing::info!("Rotation loop finished");
}

impl Shared {
    async fn step(&self, failures: &mut u32) -> Step {
        if !self.display.is_connected().await {
            let mut state = self.state.lock().await;
            if !state.paused {
                state.paused = true;
                tracing::info!("Rotation paused: device disconnected");
            }
            return Step::Wait(self.config.reconnect_poll);
        }

        let (id, interval, position, total) = {
            let mut state = self.state.lock().await;
            if state.paused {
                state.paused = false;
                tracing::info!("Rotation resumed: device reconnected");
            }
            if !state.active || state.selected_ids.is_empty() {
                return Step::Finished;
            }
            if state.current_index >= state.order.len() {
                state.reshuffle();
                tracing::debug!("Rotation cycle complete, reshuffled");
            }
            (
                state.order[state.current_index].clone(),
                state.interval,
                state.current_index + 1,
                state.order.len(),
            )
        };

        let Some(path) = self.gallery.resolve(&id) else {
            tracing::warn!(id = %id, "Rotation item no longer resolves, removing it");
            return self.drop_vanished(&id).await;
        };

        match self.display.show(&path).await {
            Ok(summary) => {
                *failures = 0;
                let name = self.gallery.display_name(&id).unwrap_or_else(|| id.clone());
                tracing::info!(
                    item = %name,
                    frames = summary.frames_sent,
                    position,
                    total,
                    "Rotation showed item",
                );
            }
            Err(e) => {
                *failures += 1;
                tracing::warn!(
                    id = %id,
                    error = %e,
                    failures = *failures,
                    max = self.config.max_consecutive_failures,
                    "Rotation upload failed",
                );
                if *failures >= self.config.max_consecutive_failures {
                    tracing::error!(id = %id, "Too many consecutive rotation failures, moving on");
                    *failures = 0;
                }
            }
        }

        {
            // If the item was removed meanwhile, the current slot already
            // holds the next one.
            let mut state = self.state.lock().await;
            if state.order.get(state.current_index) == Some(&id) {
                state.current_index += 1;
            }
        }

        Step::Wait(interval.as_duration())
    }

    async fn drop_vanished(&self, id: &str) -> Step {
        let mut state = self.state.lock().await;
        state.remove(id);

        if !state.selected_ids.is_empty() {
            if let Err(e) = self.store.save(&state.snapshot()) {
                tracing::warn!(error = %e, "Failed to persist rotation after removing item");
            }
            return Step::Wait(Duration::ZERO);
        }

        state.active = false;
        state.paused = false;
        if let Err(e) = self.store.delete() {
            tracing::warn!(error = %e, "Failed to delete rotation config");
        }
        tracing::info!("Rotation stopped: no items left");
        Step::Finished
    }
}
