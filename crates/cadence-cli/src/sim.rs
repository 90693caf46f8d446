//! Simulated backends for `cadence run`.
//!
//! One [`SimWorld`] plays all three collaborator roles so that what the
//! engine sees stays consistent with what it did: an action's icon is drawn
//! greyed out while its cooldown runs after a successful attempt, and lit
//! otherwise.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cadence_core::{
    ActionSink, EngagementOracle, EngineConfig, Frame, FramePool, FrameSource, Region, SceneState,
    SinkError,
};
use image::Rgba;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::info;

const LIT: u8 = 220;
const DIM: u8 = 60;

struct SimIcon {
    code: String,
    region: Region,
    cooldown: Duration,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AttemptCount {
    pub ok: u64,
    pub failed: u64,
}

struct State {
    rng: StdRng,
    fired: HashMap<String, Instant>,
    attempts: BTreeMap<String, AttemptCount>,
    engaged: bool,
    hp: f32,
}

pub struct SimWorld {
    icons: Vec<SimIcon>,
    failure_rate: f64,
    engage_chance: f64,
    state: Mutex<State>,
}

impl SimWorld {
    pub fn new(config: &EngineConfig, failure_rate: f64, engage_chance: f64, seed: Option<u64>) -> Self {
        let icons = config
            .actions
            .iter()
            .filter_map(|a| {
                a.usable_icon_region().map(|region| SimIcon {
                    code: a.code.clone(),
                    region,
                    cooldown: Duration::from_secs_f64(a.cooldown_secs.max(0.0)),
                })
            })
            .collect();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            icons,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            engage_chance: engage_chance.clamp(0.0, 1.0),
            state: Mutex::new(State {
                rng,
                fired: HashMap::new(),
                attempts: BTreeMap::new(),
                engaged: false,
                hp: 1.0,
            }),
        }
    }

    /// Per-code attempt tallies, ordered by code.
    pub fn attempts(&self) -> BTreeMap<String, AttemptCount> {
        self.state().attempts.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameSource for SimWorld {
    fn get_region(&self, region: Region, pool: &FramePool) -> Option<Frame> {
        let mut state = self.state();
        // An occasional dropped capture, like a real grabber.
        if state.rng.gen_bool(0.02) {
            return None;
        }

        let mut frame = pool.acquire(region.width, region.height);
        let image = frame.image_mut();
        for pixel in image.pixels_mut() {
            let v = state.rng.gen_range(8..40);
            *pixel = Rgba([v, v, v.saturating_add(6), 255]);
        }

        let now = Instant::now();
        for icon in &self.icons {
            let cooling = state
                .fired
                .get(&icon.code)
                .is_some_and(|at| now.duration_since(*at) < icon.cooldown);
            let v = if cooling { DIM } else { LIT };
            let x_end = icon.region.x.saturating_add(icon.region.width).min(image.width());
            let y_end = icon.region.y.saturating_add(icon.region.height).min(image.height());
            for y in icon.region.y..y_end {
                for x in icon.region.x..x_end {
                    image.put_pixel(x, y, Rgba([v, v, v / 2, 255]));
                }
            }
        }
        Some(frame)
    }
}

impl ActionSink for SimWorld {
    fn attempt(&self, code: &str) -> Result<bool, SinkError> {
        let mut state = self.state();
        let ok = !state.rng.gen_bool(self.failure_rate);
        let entry = state.attempts.entry(code.to_string()).or_default();
        if ok {
            entry.ok += 1;
            state.fired.insert(code.to_string(), Instant::now());
            info!(code, "simulated input sent");
        } else {
            entry.failed += 1;
            info!(code, "simulated input ignored");
        }
        Ok(ok)
    }
}

impl EngagementOracle for SimWorld {
    fn is_engaged(&self) -> bool {
        let mut state = self.state();
        if state.rng.gen_bool(self.engage_chance) {
            state.engaged = !state.engaged;
            info!(engaged = state.engaged, "simulated engagement changed");
        }
        state.engaged
    }

    fn scene(&self) -> SceneState {
        let mut state = self.state();
        let drift: f32 = state.rng.gen_range(-0.05..0.05);
        state.hp = (state.hp + drift).clamp(0.2, 1.0);
        SceneState {
            hp: state.hp,
            mp: 1.0,
            has_target: state.engaged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{ActionDefinition, EngineSettings};

    fn world(failure_rate: f64) -> SimWorld {
        let config = EngineConfig::new(
            EngineSettings::new(Region::new(0, 0, 32, 16)),
            vec![ActionDefinition::new("a", "1", 60.0).with_icon(Region::new(0, 0, 8, 8))],
        );
        SimWorld::new(&config, failure_rate, 0.0, Some(7))
    }

    fn icon_value(world: &SimWorld, pool: &FramePool) -> u8 {
        loop {
            if let Some(frame) = world.get_region(Region::new(0, 0, 32, 16), pool) {
                return frame.image().get_pixel(2, 2).0[0];
            }
        }
    }

    #[test]
    fn icon_dims_after_a_successful_attempt() {
        let world = world(0.0);
        let pool = FramePool::default();
        assert_eq!(icon_value(&world, &pool), LIT);
        assert!(world.attempt("1").unwrap());
        assert_eq!(icon_value(&world, &pool), DIM);
        assert_eq!(world.attempts()["1"].ok, 1);
    }

    #[test]
    fn failed_attempt_keeps_icon_lit() {
        let world = world(1.0);
        let pool = FramePool::default();
        assert!(!world.attempt("1").unwrap());
        assert_eq!(icon_value(&world, &pool), LIT);
        assert_eq!(world.attempts()["1"].failed, 1);
    }
}
