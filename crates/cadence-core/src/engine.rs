//! The cycle coordinator.
//!
//! Two tasks run while the engine is started: the capture pump (producer)
//! and the processing loop (consumer). They share one cancellation signal.
//! Everything the processing loop mutates lives behind short-lived locks in
//! [`Inner`] so that `status()`, `pause()` and `reload()` can be called from
//! any task at any time.
//!
//! ```text
//! FrameSource ──▶ CapturePump ──▶ [bounded buffer] ──▶ processing loop
//!                                                        │ visual refresh (fan-out)
//!                                                        │ strategy selection
//!                                                        │ readiness gate / stall check
//!                                                        ▼
//!                                                    ActionSink
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::capture::{self, CapturePump, PumpStats};
use crate::collaborators::{
    ActionSink, EngagementOracle, FrameSource, NeverEngaged, Overlay, ReadinessOracle,
};
use crate::config::{has_errors, ConfigWarning, EngineConfig, EngineSettings};
use crate::delay::AdaptiveDelay;
use crate::error::{EngineError, Result, SinkError};
use crate::frame::{Fingerprint, Frame, FramePool};
use crate::gate::{GatePolicy, ReadinessGate};
use crate::perf::{PerfReport, PerformanceAccumulator};
use crate::registry::ActionRuntimeRegistry;
use crate::stall::{StallCheck, StallRecovery};
use crate::strategy::{CycleContext, Strategy, StrategyEngine, TagFilterStrategy};
use crate::types::{EngineStatus, Region, RunState, SceneState};

/// Sleep slice while paused.
const PAUSE_SLICE: Duration = Duration::from_millis(100);
/// Back-off after a failed or panicked cycle.
const RECOVERY_BACKOFF: Duration = Duration::from_secs(1);
/// Expired templates are purged every this many cycles.
const TEMPLATE_PURGE_EVERY: u64 = 100;
/// Performance is summarized in the log every this many cycles.
const PERF_LOG_EVERY: u64 = 100;
/// Below this success rate (percent) the periodic summary is a warning.
const MIN_HEALTHY_SUCCESS_RATE: f64 = 50.0;

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// External implementations the engine drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn FrameSource>,
    pub sink: Arc<dyn ActionSink>,
    pub oracle: Arc<dyn ReadinessOracle>,
    pub engagement: Arc<dyn EngagementOracle>,
    pub overlay: Option<Arc<dyn Overlay>>,
}

impl Collaborators {
    /// Never-engaged and without an overlay.
    pub fn new(
        source: Arc<dyn FrameSource>,
        sink: Arc<dyn ActionSink>,
        oracle: Arc<dyn ReadinessOracle>,
    ) -> Self {
        Self {
            source,
            sink,
            oracle,
            engagement: Arc::new(NeverEngaged),
            overlay: None,
        }
    }

    pub fn with_engagement(mut self, engagement: Arc<dyn EngagementOracle>) -> Self {
        self.engagement = engagement;
        self
    }

    pub fn with_overlay(mut self, overlay: Arc<dyn Overlay>) -> Self {
        self.overlay = Some(overlay);
        self
    }
}

/// How [`Engine::stop`] went. A timeout is not an error: the tasks are
/// aborted and their frames released regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    AlreadyStopped,
    Clean,
    TimedOut,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Cheap to clone; clones drive the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct RunHandle {
    cancel: watch::Sender<bool>,
    capture: JoinHandle<PumpStats>,
    processing: JoinHandle<()>,
}

#[derive(Debug, Clone, Default)]
struct CycleMemo {
    started_at: Option<DateTime<Utc>>,
    strategy: Option<String>,
    last_action: Option<String>,
}

struct Inner {
    collab: Collaborators,
    settings: RwLock<EngineSettings>,
    registry: Mutex<ActionRuntimeRegistry>,
    strategies: RwLock<StrategyEngine>,
    delay: Mutex<AdaptiveDelay>,
    perf: Mutex<PerformanceAccumulator>,
    gate: ReadinessGate,
    pool: FramePool,
    paused: AtomicBool,
    memo: Mutex<CycleMemo>,
    region_tx: watch::Sender<Region>,
    status_tx: watch::Sender<EngineStatus>,
    run: Mutex<Option<RunHandle>>,
}

impl Engine {
    /// Build a stopped engine. Fails when the config has error-level
    /// validation findings.
    pub fn new(config: EngineConfig, collab: Collaborators) -> Result<Self> {
        reject_errors(&config.validate())?;
        let EngineConfig { settings, actions } = config;

        let mut registry = ActionRuntimeRegistry::new();
        registry.load(actions);

        let delay = AdaptiveDelay::new(
            settings.base_delay(),
            settings.min_delay(),
            settings.max_delay(),
            settings.target_latency(),
        );
        let gate = ReadinessGate::new(Arc::clone(&collab.oracle), settings.template_ttl());
        let pool = FramePool::new(settings.frame_buffer_capacity.max(1) + 2);
        let (region_tx, _) = watch::channel(settings.capture_region);
        let (status_tx, _) = watch::channel(EngineStatus::stopped());

        let inner = Inner {
            strategies: RwLock::new(StrategyEngine::with_builtin(&settings.dispel_tag)),
            collab,
            settings: RwLock::new(settings),
            registry: Mutex::new(registry),
            delay: Mutex::new(delay),
            perf: Mutex::new(PerformanceAccumulator::new()),
            gate,
            pool,
            paused: AtomicBool::new(false),
            memo: Mutex::new(CycleMemo::default()),
            region_tx,
            status_tx,
            run: Mutex::new(None),
        };
        let engine = Self {
            inner: Arc::new(inner),
        };
        engine.inner.publish_status();
        Ok(engine)
    }

    /// Spawn the capture pump and processing loop on the current Tokio
    /// runtime. Returns `false` if the engine was already running.
    pub fn start(&self) -> Result<bool> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Task(format!("no async runtime: {e}")))?;
        let inner = &self.inner;
        {
            let mut run = lock(&inner.run);
            if run.is_some() {
                return Ok(false);
            }

            lock(&inner.perf).reset();
            inner.paused.store(false, Ordering::Release);
            *lock(&inner.memo) = CycleMemo {
                started_at: Some(Utc::now()),
                ..CycleMemo::default()
            };

            let settings = read(&inner.settings).clone();
            let (buffer, frames) = capture::frame_buffer(settings.frame_buffer_capacity);
            let (cancel, cancel_rx) = watch::channel(false);
            let pump = CapturePump::new(
                Arc::clone(&inner.collab.source),
                inner.pool.clone(),
                inner.region_tx.subscribe(),
                settings.capture_poll(),
                buffer,
            );
            let capture = runtime.spawn(pump.run(cancel_rx.clone()));
            let processing = runtime.spawn(processing_loop(Arc::clone(inner), frames, cancel_rx));
            *run = Some(RunHandle {
                cancel,
                capture,
                processing,
            });
            info!(
                actions = lock(&inner.registry).len(),
                mode = settings.loop_mode.as_str(),
                assisted = settings.assisted_mode,
                "engine started"
            );
        }

        if let Some(overlay) = &inner.collab.overlay {
            overlay.show();
        }
        inner.publish_status();
        Ok(true)
    }

    /// Cancel both loops and wait for them up to the configured stop
    /// timeout. Safe to call when already stopped.
    pub async fn stop(&self) -> StopOutcome {
        let inner = &self.inner;
        let Some(run) = lock(&inner.run).take() else {
            return StopOutcome::AlreadyStopped;
        };
        let timeout = read(&inner.settings).stop_timeout();
        let RunHandle {
            cancel,
            mut capture,
            mut processing,
        } = run;
        // Receivers may already be gone if both tasks died; nothing to signal then.
        let _ = cancel.send(true);

        let joined = tokio::time::timeout(timeout, async {
            let pump = (&mut capture).await;
            let loop_result = (&mut processing).await;
            (pump, loop_result)
        })
        .await;

        let outcome = match joined {
            Ok((pump, loop_result)) => {
                if let Err(e) = pump {
                    warn!(error = %e, "capture task ended abnormally");
                }
                if let Err(e) = loop_result {
                    warn!(error = %e, "processing task ended abnormally");
                }
                StopOutcome::Clean
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "engine tasks did not exit in time, aborting"
                );
                capture.abort();
                processing.abort();
                // Aborted tasks resolve at their next yield point; waiting
                // for them here drops their queued frames before returning.
                if !capture.is_finished() {
                    let _ = capture.await;
                }
                if !processing.is_finished() {
                    let _ = processing.await;
                }
                StopOutcome::TimedOut
            }
        };

        inner.paused.store(false, Ordering::Release);
        lock(&inner.memo).started_at = None;
        if let Some(overlay) = &inner.collab.overlay {
            overlay.hide();
        }
        inner.publish_status();
        info!(outcome = ?outcome, "engine stopped");
        outcome
    }

    /// Toggle pause. Returns the new paused state, or `None` when the engine
    /// is not running (pause is a no-op then).
    pub fn pause(&self) -> Option<bool> {
        let inner = &self.inner;
        if lock(&inner.run).is_none() {
            return None;
        }
        let paused = !inner.paused.fetch_xor(true, Ordering::AcqRel);
        if paused {
            info!("engine paused");
        } else {
            info!("engine resumed");
        }
        inner.publish_status();
        Some(paused)
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.run).is_some()
    }

    /// Latest committed snapshot. Never blocks on the processing loop.
    pub fn status(&self) -> EngineStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn perf_report(&self) -> PerfReport {
        lock(&self.inner.perf).report()
    }

    pub fn settings(&self) -> EngineSettings {
        read(&self.inner.settings).clone()
    }

    /// Pool that leases every captured frame; `outstanding()` is the number
    /// of frames not yet released.
    pub fn frame_pool(&self) -> &FramePool {
        &self.inner.pool
    }

    /// Load every template the current actions reference so the first
    /// cycles do not pay for disk reads. Fails on the first unreadable
    /// template; the engine stays usable and treats it as not ready.
    pub fn preload_templates(&self) -> Result<usize> {
        let defs: Vec<_> = lock(&self.inner.registry)
            .states()
            .iter()
            .map(|s| s.definition_arc())
            .collect();
        self.inner.gate.preload(defs.iter().map(|d| d.as_ref()))
    }

    /// Add a specialized selection strategy after the built-in ones.
    pub fn register_strategy(&self, strategy: Strategy) -> bool {
        write(&self.inner.strategies).register(strategy)
    }

    /// Apply a new configuration. Runtime action state is rebuilt from
    /// scratch and the delay is reset to the new base. Buffer capacity and
    /// capture poll changes take effect on the next start.
    pub fn reload(&self, config: EngineConfig) -> Result<()> {
        reject_errors(&config.validate())?;
        let inner = &self.inner;
        let EngineConfig { settings, actions } = config;
        let count = actions.len();

        lock(&inner.registry).load(actions);
        {
            let mut delay = lock(&inner.delay);
            delay.reconfigure(
                settings.min_delay(),
                settings.max_delay(),
                settings.target_latency(),
            );
            delay.reset(settings.base_delay());
        }
        write(&inner.strategies).upsert(Strategy::TagFiltered(TagFilterStrategy::dispel(
            settings.dispel_tag.clone(),
        )));
        inner.region_tx.send_replace(settings.capture_region);
        *write(&inner.settings) = settings;

        info!(actions = count, "configuration reloaded");
        inner.publish_status();
        Ok(())
    }
}

fn reject_errors(warnings: &[ConfigWarning]) -> Result<()> {
    if !has_errors(warnings) {
        return Ok(());
    }
    let messages: Vec<&str> = warnings.iter().map(|w| w.message.as_str()).collect();
    Err(EngineError::InvalidConfig(messages.join("; ")))
}

// ---------------------------------------------------------------------------
// Processing loop
// ---------------------------------------------------------------------------

/// What the cycle decided to do with the selected candidate.
#[derive(Debug)]
enum Plan {
    Idle,
    NotReady { id: String },
    Interrupt { id: String },
    Attempt {
        id: String,
        code: String,
        visually_ready: bool,
    },
}

#[derive(Debug)]
struct Decision {
    strategy: String,
    plan: Plan,
}

async fn processing_loop(
    inner: Arc<Inner>,
    mut frames: mpsc::Receiver<Frame>,
    mut cancel: watch::Receiver<bool>,
) {
    let mut last_fingerprint: Option<Fingerprint> = None;
    let mut cycle: u64 = 0;

    loop {
        if *cancel.borrow() {
            break;
        }
        if inner.paused.load(Ordering::Acquire) {
            if sleep_or_cancel(&mut cancel, PAUSE_SLICE).await {
                break;
            }
            continue;
        }

        let dequeue_timeout = read(&inner.settings).dequeue_timeout();
        let frame = tokio::select! {
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    break;
                }
                continue;
            }
            next = tokio::time::timeout(dequeue_timeout, frames.recv()) => match next {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(_) => continue,
            }
        };

        let fingerprint = frame.fingerprint();
        if last_fingerprint == Some(fingerprint) {
            drop(frame);
            let idle = lock(&inner.delay).current() * 2;
            if sleep_or_cancel(&mut cancel, idle).await {
                break;
            }
            continue;
        }
        last_fingerprint = Some(fingerprint);
        cycle += 1;

        let outcome = AssertUnwindSafe(run_cycle(&inner, frame, cycle))
            .catch_unwind()
            .await;
        let pause_for = match outcome {
            Ok(Ok(delay)) => delay,
            Ok(Err(e)) => {
                warn!(cycle, error = %e, "cycle failed");
                RECOVERY_BACKOFF
            }
            Err(_) => {
                error!(cycle, "cycle panicked");
                RECOVERY_BACKOFF
            }
        };
        inner.publish_status();

        if sleep_or_cancel(&mut cancel, pause_for).await {
            break;
        }
    }

    let released = capture::drain(&mut frames);
    debug!(cycles = cycle, released, "processing loop exited");
}

async fn run_cycle(inner: &Arc<Inner>, frame: Frame, cycle: u64) -> Result<Duration> {
    let timer = Instant::now();
    let settings = read(&inner.settings).clone();
    let frame = Arc::new(frame);

    refresh_visuals(inner, &frame).await;

    if settings.engagement_poll_every > 0 && cycle % settings.engagement_poll_every == 0 {
        let engagement = Arc::clone(&inner.collab.engagement);
        let engaged = tokio::task::spawn_blocking(move || engagement.is_engaged())
            .await
            .unwrap_or(false);
        let mut delay = lock(&inner.delay);
        if delay.is_heightened() != engaged {
            info!(engaged, "engagement changed");
            delay.set_heightened(engaged);
        }
    }

    if cycle % TEMPLATE_PURGE_EVERY == 0 {
        let purged = inner.gate.templates().purge_expired();
        if purged > 0 {
            debug!(purged, "expired templates purged");
        }
    }

    let engagement = Arc::clone(&inner.collab.engagement);
    let scene = tokio::task::spawn_blocking(move || engagement.scene())
        .await
        .unwrap_or_default();

    let stall = StallRecovery::new(settings.stall_threshold, settings.interrupt_code.clone());
    let decision = {
        let inner = Arc::clone(inner);
        let frame = Arc::clone(&frame);
        let settings = settings.clone();
        let stall = stall.clone();
        tokio::task::spawn_blocking(move || decide(&inner, &frame, &scene, &settings, &stall, cycle))
            .await
            .map_err(|e| EngineError::Task(format!("selection task failed: {e}")))?
    };
    // The sink never needs the pixels; hand the buffer back now.
    drop(frame);

    let success = match &decision.plan {
        Plan::Idle => true,
        Plan::NotReady { id } => {
            debug!(action = %id, "candidate not ready");
            false
        }
        Plan::Interrupt { id } => {
            warn!(
                action = %id,
                threshold = stall.threshold(),
                "stall detected, sending interrupt"
            );
            if let Err(e) = attempt(inner, stall.interrupt_code()).await {
                warn!(error = %e, "interrupt failed");
            }
            let mut registry = lock(&inner.registry);
            if let Err(e) = stall.acknowledge(&mut registry, id) {
                debug!(action = %id, error = %e, "action vanished before stall reset");
            }
            false
        }
        Plan::Attempt {
            id,
            code,
            visually_ready,
        } => {
            let result = attempt(inner, code).await;
            let mut registry = lock(&inner.registry);
            match result {
                Ok(true) => {
                    if let Err(e) = registry.mark_used(id) {
                        debug!(action = %id, error = %e, "action vanished before mark_used");
                    }
                    drop(registry);
                    debug!(action = %id, "action executed");
                    lock(&inner.memo).last_action = Some(id.clone());
                    true
                }
                Ok(false) | Err(_) => {
                    if let Err(e) = &result {
                        warn!(action = %id, error = %e, "action sink failed");
                    }
                    match stall.record_failure(&mut registry, id, *visually_ready) {
                        Ok(Some(streak)) => debug!(action = %id, streak, "attempt failed"),
                        Ok(None) => debug!(action = %id, "attempt failed while not visually ready"),
                        Err(e) => debug!(action = %id, error = %e, "action vanished before failure"),
                    }
                    false
                }
            }
        }
    };

    let latency = timer.elapsed();
    let (average, summary) = {
        let mut perf = lock(&inner.perf);
        perf.record(latency, success);
        let summary = (cycle % PERF_LOG_EVERY == 0).then(|| {
            (
                perf.report(),
                perf.has_issue(settings.max_delay(), MIN_HEALTHY_SUCCESS_RATE),
            )
        });
        (perf.average(), summary)
    };
    if let Some((report, issue)) = summary {
        if issue {
            warn!(%report, "performance degraded");
        } else {
            info!(%report, "performance");
        }
    }

    let next = lock(&inner.delay).adjust(average);
    lock(&inner.memo).strategy = Some(decision.strategy);
    Ok(next)
}

/// Refresh the visual flag of every enabled action with an icon region,
/// one blocking task per action, then write the results back together.
async fn refresh_visuals(inner: &Arc<Inner>, frame: &Arc<Frame>) {
    let targets: Vec<_> = lock(&inner.registry)
        .states()
        .iter()
        .filter(|s| s.definition().enabled && s.definition().usable_icon_region().is_some())
        .map(|s| s.definition_arc())
        .collect();
    if targets.is_empty() {
        return;
    }

    let checks = targets.into_iter().map(|def| {
        let inner = Arc::clone(inner);
        let frame = Arc::clone(frame);
        let id = def.id.clone();
        let handle =
            tokio::task::spawn_blocking(move || inner.gate.update_visual(&def, frame.image()));
        async move {
            let ready = match handle.await {
                Ok(ready) => ready,
                Err(e) => {
                    warn!(action = %id, error = %e, "visual check task failed");
                    false
                }
            };
            (id, ready)
        }
    });
    let results = join_all(checks).await;

    let mut registry = lock(&inner.registry);
    for (id, ready) in results {
        if let Err(e) = registry.apply_visual(&id, frame.seq(), ready) {
            debug!(action = %id, error = %e, "action vanished before visual update");
        }
    }
}

fn decide(
    inner: &Inner,
    frame: &Frame,
    scene: &SceneState,
    settings: &EngineSettings,
    stall: &StallRecovery,
    cycle: u64,
) -> Decision {
    let registry = lock(&inner.registry);
    let strategies = read(&inner.strategies);
    let enforce_cooldown = settings.enforce_cooldown();

    let mut ctx = CycleContext::new(registry.states(), settings.loop_mode, enforce_cooldown);
    ctx.execution_count = cycle;
    let selection = strategies.select(&ctx);
    let strategy = selection.strategy.to_string();

    let Some(candidate) = selection.candidate else {
        return Decision {
            strategy,
            plan: Plan::Idle,
        };
    };
    let id = candidate.id().to_string();

    let policy = GatePolicy {
        enforce_cooldown,
        assisted: settings.assisted_mode,
        now: ctx.now,
    };
    let plan = if !inner.gate.is_ready(candidate, frame.image(), scene, policy) {
        Plan::NotReady { id }
    } else {
        match stall.check(candidate) {
            StallCheck::Intervene => Plan::Interrupt { id },
            StallCheck::Proceed => Plan::Attempt {
                id,
                code: candidate.definition().code.clone(),
                visually_ready: candidate.visually_ready(),
            },
        }
    };
    Decision { strategy, plan }
}

/// Call the sink on a blocking thread; a panic there counts as a failure.
async fn attempt(inner: &Inner, code: &str) -> Result<bool> {
    let sink = Arc::clone(&inner.collab.sink);
    let code = code.to_string();
    let outcome = tokio::task::spawn_blocking(move || sink.attempt(&code))
        .await
        .map_err(|e| SinkError::new(format!("sink task failed: {e}")))?;
    Ok(outcome?)
}

/// Sleep for `duration`; returns `true` if cancellation arrived first.
async fn sleep_or_cancel(cancel: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *cancel.borrow() {
        return true;
    }
    tokio::select! {
        changed = cancel.changed() => changed.is_err() || *cancel.borrow(),
        _ = tokio::time::sleep(duration) => false,
    }
}

// ---------------------------------------------------------------------------
// Shared state helpers
// ---------------------------------------------------------------------------

impl Inner {
    fn publish_status(&self) {
        let running = lock(&self.run).is_some();
        let paused = running && self.paused.load(Ordering::Acquire);
        let (execution_count, avg_latency_secs, success_rate) = {
            let perf = lock(&self.perf);
            (
                perf.count(),
                perf.average().as_secs_f64(),
                perf.success_rate(),
            )
        };
        let (current_delay_ms, heightened) = {
            let delay = lock(&self.delay);
            (delay.current().as_millis() as u64, delay.is_heightened())
        };
        let memo = lock(&self.memo).clone();
        let state = match (running, paused) {
            (false, _) => RunState::Stopped,
            (true, false) => RunState::Running,
            (true, true) => RunState::Paused,
        };

        self.status_tx.send_replace(EngineStatus {
            running,
            paused,
            mode: state.as_str().to_string(),
            execution_count,
            avg_latency_secs,
            success_rate,
            current_delay_ms,
            heightened,
            strategy: memo.strategy,
            last_action: memo.last_action,
            started_at: memo.started_at,
        });
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionDefinition;
    use crate::vision::PixelOracle;
    use image::RgbaImage;

    struct BlankSource;

    impl FrameSource for BlankSource {
        fn get_region(&self, _region: Region, _pool: &FramePool) -> Option<Frame> {
            None
        }
    }

    struct OkSink;

    impl ActionSink for OkSink {
        fn attempt(&self, _code: &str) -> std::result::Result<bool, SinkError> {
            Ok(true)
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::new(
            EngineSettings::new(Region::new(0, 0, 16, 16)),
            vec![ActionDefinition::new("a", "1", 0.0)],
        )
    }

    fn engine() -> Engine {
        Engine::new(
            config(),
            Collaborators::new(
                Arc::new(BlankSource),
                Arc::new(OkSink),
                Arc::new(PixelOracle::default()),
            ),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut cfg = config();
        cfg.settings.frame_buffer_capacity = 0;
        let result = Engine::new(
            cfg,
            Collaborators::new(
                Arc::new(BlankSource),
                Arc::new(OkSink),
                Arc::new(PixelOracle::default()),
            ),
        );
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let engine = engine();
        assert!(matches!(engine.start(), Err(EngineError::Task(_))));
        assert!(!engine.is_running());
    }

    #[test]
    fn new_engine_reports_stopped() {
        let status = engine().status();
        assert_eq!(status.run_state(), RunState::Stopped);
        assert_eq!(status.current_delay_ms, 1_000);
    }

    #[test]
    fn pause_is_a_noop_when_stopped() {
        let engine = engine();
        assert_eq!(engine.pause(), None);
        assert!(!engine.status().paused);
    }

    #[tokio::test]
    async fn start_twice_then_stop_twice() {
        let engine = engine();
        assert!(engine.start().unwrap());
        assert!(!engine.start().unwrap());
        assert!(engine.status().running);
        assert!(engine.status().started_at.is_some());

        assert_eq!(engine.stop().await, StopOutcome::Clean);
        assert_eq!(engine.stop().await, StopOutcome::AlreadyStopped);
        let status = engine.status();
        assert!(!status.running);
        assert!(status.started_at.is_none());
    }

    #[tokio::test]
    async fn pause_toggles_while_running() {
        let engine = engine();
        engine.start().unwrap();
        assert_eq!(engine.pause(), Some(true));
        assert_eq!(engine.status().run_state(), RunState::Paused);
        assert_eq!(engine.pause(), Some(false));
        assert_eq!(engine.status().run_state(), RunState::Running);
        engine.stop().await;
        assert!(!engine.status().paused);
    }

    #[tokio::test]
    async fn reload_rebuilds_registry_and_resets_delay() {
        let engine = engine();
        let mut cfg = config();
        cfg.settings.base_delay_ms = 400;
        cfg.settings.dispel_tag = "purge".into();
        cfg.actions.push(ActionDefinition::new("b", "2", 1.0));
        engine.reload(cfg).unwrap();

        assert_eq!(engine.status().current_delay_ms, 400);
        assert_eq!(engine.settings().dispel_tag, "purge");
        assert_eq!(lock(&engine.inner.registry).len(), 2);

        let mut bad = config();
        bad.actions[0].code.clear();
        assert!(engine.reload(bad).is_err());
        assert_eq!(lock(&engine.inner.registry).len(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_lifecycle_changes() {
        let engine = engine();
        let mut rx = engine.subscribe();
        engine.start().unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().running);
        engine.stop().await;
        rx.changed().await.unwrap();
        assert!(!rx.borrow().running);
    }

    #[tokio::test]
    async fn sink_errors_and_panics_surface_as_sink_errors() {
        struct Broken;

        impl ActionSink for Broken {
            fn attempt(&self, code: &str) -> std::result::Result<bool, SinkError> {
                if code == "panic" {
                    panic!("driver crashed");
                }
                Err(SinkError::new("device unplugged"))
            }
        }

        let engine = Engine::new(
            config(),
            Collaborators::new(
                Arc::new(BlankSource),
                Arc::new(Broken),
                Arc::new(PixelOracle::default()),
            ),
        )
        .unwrap();
        let inner = &engine.inner;

        let err = attempt(inner, "1").await.unwrap_err();
        assert!(matches!(err, EngineError::Sink(ref e) if e.message == "device unplugged"));
        let err = attempt(inner, "panic").await.unwrap_err();
        assert!(matches!(err, EngineError::Sink(_)));

        let healthy = self::engine();
        assert!(attempt(&healthy.inner, "1").await.unwrap());
    }

    #[test]
    fn preload_templates_reports_unreadable_files() {
        let engine = engine();
        assert_eq!(engine.preload_templates().unwrap(), 0);

        let mut cfg = config();
        cfg.actions[0].template = Some("/nonexistent/a.png".into());
        engine.reload(cfg).unwrap();
        assert!(matches!(
            engine.preload_templates(),
            Err(EngineError::Vision(_))
        ));
    }

    #[test]
    fn decide_reports_idle_and_not_ready() {
        let engine = engine();
        let inner = &engine.inner;
        let frame = inner.pool.wrap(RgbaImage::new(16, 16));
        let settings = engine.settings();
        let stall = StallRecovery::default();

        let d = decide(inner, &frame, &SceneState::default(), &settings, &stall, 1);
        assert_eq!(d.strategy, "default");
        assert!(matches!(d.plan, Plan::Attempt { ref id, .. } if id == "a"));

        lock(&inner.registry).load(vec![{
            let mut def = ActionDefinition::new("t", "1", 0.0);
            def.requires_target = true;
            def
        }]);
        let d = decide(inner, &frame, &SceneState::default(), &settings, &stall, 2);
        assert!(matches!(d.plan, Plan::NotReady { ref id } if id == "t"));

        lock(&inner.registry).load(vec![ActionDefinition::new("x", "1", 0.0).disabled()]);
        let d = decide(inner, &frame, &SceneState::default(), &settings, &stall, 3);
        assert!(matches!(d.plan, Plan::Idle));
    }
}
