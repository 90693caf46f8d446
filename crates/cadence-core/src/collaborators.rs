//! Interfaces to the outside world.
//!
//! The engine never captures pixels, injects input or draws anything itself.
//! Hosts supply implementations of these traits; all of them are called from
//! blocking worker threads, so implementations may block briefly but must
//! not block indefinitely.

use image::RgbaImage;

use crate::error::{SinkError, VisionError};
use crate::frame::{Frame, FramePool};
use crate::types::{Region, SceneState};

/// Supplies images of a fixed screen region.
pub trait FrameSource: Send + Sync {
    /// Capture `region` into a frame leased from `pool`. `None` is a
    /// transient miss, not an error.
    fn get_region(&self, region: Region, pool: &FramePool) -> Option<Frame>;
}

/// Executes actions identified by an opaque code.
pub trait ActionSink: Send + Sync {
    /// `Ok(false)` means the attempt was made and did not take effect.
    fn attempt(&self, code: &str) -> Result<bool, SinkError>;
}

/// Decides whether a sub-region of a frame shows the expected cue.
pub trait ReadinessOracle: Send + Sync {
    /// With a template, compare the crop against it using `threshold`;
    /// without one, fall back to a brightness heuristic over the crop.
    fn match_region(
        &self,
        image: &RgbaImage,
        region: Region,
        template: Option<&RgbaImage>,
        threshold: f32,
    ) -> Result<bool, VisionError>;

    /// Load a template image referenced by an action or status condition.
    fn load_template(&self, path: &str) -> Result<RgbaImage, VisionError> {
        image::open(path)
            .map(|img| img.to_rgba8())
            .map_err(|e| VisionError::TemplateLoad {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Reports whether an active, time-pressured situation is underway.
pub trait EngagementOracle: Send + Sync {
    fn is_engaged(&self) -> bool;

    /// Resource and target readings used by action preconditions. The
    /// default reports full resources and derives the target from
    /// [`is_engaged`](Self::is_engaged).
    fn scene(&self) -> SceneState {
        SceneState {
            has_target: self.is_engaged(),
            ..SceneState::default()
        }
    }
}

/// Optional on-screen indicator shown while the engine runs.
pub trait Overlay: Send + Sync {
    fn show(&self);
    fn hide(&self);
}

/// Engagement oracle for hosts without one: never engaged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverEngaged;

impl EngagementOracle for NeverEngaged {
    fn is_engaged(&self) -> bool {
        false
    }
}
