//! Readiness confirmation gate.
//!
//! Fuses the logical cooldown with visual evidence from the current frame.
//! Detection problems never escape this module: an unusable icon region
//! means "always ready", and any other failure means "not ready" (or, for a
//! status effect, "not present").

use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;
use tracing::debug;

use crate::collaborators::ReadinessOracle;
use crate::error::{Result, VisionError};
use crate::registry::ActionRuntimeState;
use crate::template_cache::TemplateCache;
use crate::types::{ActionDefinition, Polarity, Region, SceneState, StatusCondition};

/// Per-cycle switches for [`ReadinessGate::is_ready`].
#[derive(Debug, Clone, Copy)]
pub struct GatePolicy {
    pub enforce_cooldown: bool,
    pub assisted: bool,
    pub now: Instant,
}

pub struct ReadinessGate {
    oracle: Arc<dyn ReadinessOracle>,
    templates: TemplateCache,
}

impl ReadinessGate {
    pub fn new(oracle: Arc<dyn ReadinessOracle>, template_ttl: Duration) -> Self {
        Self {
            oracle,
            templates: TemplateCache::new(template_ttl),
        }
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    /// Load every template referenced by enabled actions and their status
    /// conditions into the cache. Stops at the first file that cannot be
    /// loaded; returns how many distinct templates are cached.
    pub fn preload<'a>(
        &self,
        defs: impl IntoIterator<Item = &'a ActionDefinition>,
    ) -> Result<usize> {
        for def in defs.into_iter().filter(|d| d.enabled) {
            let paths = def
                .template
                .iter()
                .chain(def.status_conditions.iter().filter_map(|c| c.template.as_ref()));
            for path in paths {
                self.templates
                    .get_or_load(path, |p| self.oracle.load_template(p))?;
            }
        }
        Ok(self.templates.len())
    }

    /// Visual verdict for one action's icon against `image`.
    pub fn update_visual(&self, def: &ActionDefinition, image: &RgbaImage) -> bool {
        let Some(region) = def.usable_icon_region() else {
            return true;
        };
        if !region.fits_within(image.width(), image.height()) {
            return true;
        }
        match self.inspect(image, region, def.template.as_deref(), def.similarity_threshold) {
            Ok(ready) => ready,
            Err(e) => {
                debug!(action = %def.id, error = %e, "visual check failed");
                false
            }
        }
    }

    /// Final go/no-go, short-circuiting on the first failing layer:
    /// cooldown, then preconditions, then the visual flag in assisted mode.
    pub fn is_ready(
        &self,
        state: &ActionRuntimeState,
        image: &RgbaImage,
        scene: &SceneState,
        policy: GatePolicy,
    ) -> bool {
        if policy.enforce_cooldown && !state.is_available_at(policy.now) {
            return false;
        }
        if !self.preconditions_hold(state.definition(), image, scene) {
            return false;
        }
        !policy.assisted || state.visually_ready()
    }

    pub fn preconditions_hold(
        &self,
        def: &ActionDefinition,
        image: &RgbaImage,
        scene: &SceneState,
    ) -> bool {
        if def.min_hp.is_some_and(|min| scene.hp < min) {
            return false;
        }
        if def.min_mp.is_some_and(|min| scene.mp < min) {
            return false;
        }
        if def.requires_target && !scene.has_target {
            return false;
        }
        def.status_conditions.iter().all(|cond| {
            let present = self.status_present(cond, image);
            match cond.polarity {
                Polarity::Required => present,
                Polarity::Forbidden => !present,
            }
        })
    }

    /// Whether a status effect is visible. Any detection failure, including
    /// an unusable region, reads as absent.
    pub fn status_present(&self, cond: &StatusCondition, image: &RgbaImage) -> bool {
        match self.inspect(image, cond.region, cond.template.as_deref(), cond.threshold) {
            Ok(present) => present,
            Err(e) => {
                debug!(status = %cond.name, error = %e, "status check failed");
                false
            }
        }
    }

    fn inspect(
        &self,
        image: &RgbaImage,
        region: Region,
        template: Option<&str>,
        threshold: f32,
    ) -> std::result::Result<bool, VisionError> {
        let template = match template {
            Some(path) => Some(
                self.templates
                    .get_or_load(path, |p| self.oracle.load_template(p))?,
            ),
            None => None,
        };
        self.oracle
            .match_region(image, region, template.as_deref(), threshold)
    }
}
