//! `cadence-core`: the decision-and-timing core of a frame-driven action loop.
//!
//! Given a stream of captured frames and an ordered list of actions with
//! cooldowns and preconditions, the engine repeatedly decides what to do
//! next, when, and how soon to look again.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ─▶ CapturePump ─▶ bounded buffer (drop newest when full)
//!                                   │
//!                                   ▼
//!                            processing loop ── ReadinessGate (visual refresh, fan-out)
//!                                   │        ── StrategyEngine (default / tag-filtered)
//!                                   │        ── StallRecovery
//!                                   ▼
//!                               ActionSink ─▶ PerformanceAccumulator ─▶ AdaptiveDelay
//! ```
//!
//! Capture, input injection and pixel matching are collaborators behind the
//! traits in [`collaborators`]; [`vision::PixelOracle`] is a reference
//! readiness oracle built on the `image` crate.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use cadence_core::{Collaborators, Engine, EngineConfig};
//!
//! let config = EngineConfig::load(path)?;
//! let engine = Engine::new(config, Collaborators::new(source, sink, oracle))?;
//! engine.start()?;
//! // ...
//! engine.stop().await;
//! ```

pub mod capture;
pub mod collaborators;
pub mod config;
pub mod delay;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gate;
pub mod perf;
pub mod registry;
pub mod stall;
pub mod strategy;
pub mod template_cache;
pub mod types;
pub mod vision;
pub mod watcher;

pub use collaborators::{ActionSink, EngagementOracle, FrameSource, Overlay, ReadinessOracle};
pub use config::{ConfigWarning, EngineConfig, EngineSettings, WarnLevel};
pub use engine::{Collaborators, Engine, StopOutcome};
pub use error::{EngineError, Result, SinkError, VisionError};
pub use frame::{Frame, FramePool};
pub use types::{
    ActionDefinition, EngineStatus, LoopMode, Polarity, Region, RunState, SceneState,
    StatusCondition,
};
pub use watcher::ConfigWatcher;
