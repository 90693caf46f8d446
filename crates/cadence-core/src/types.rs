use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Region
// ---------------------------------------------------------------------------

/// A rectangle in frame (or screen) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A region with zero width or height cannot be inspected.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies entirely inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        let right = self.x.checked_add(self.width);
        let bottom = self.y.checked_add(self.height);
        matches!((right, bottom), (Some(r), Some(b)) if r <= width && b <= height)
    }
}

// ---------------------------------------------------------------------------
// StatusCondition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    /// The effect must be visible for the action to fire.
    Required,
    /// The effect must be absent for the action to fire.
    Forbidden,
}

/// A status effect (buff/debuff) whose on-screen presence gates an action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCondition {
    pub name: String,
    pub region: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default = "default_similarity")]
    pub threshold: f32,
    pub polarity: Polarity,
}

// ---------------------------------------------------------------------------
// ActionDefinition
// ---------------------------------------------------------------------------

/// Static description of one schedulable action.
///
/// Definitions are immutable while a cycle runs; a reload swaps the whole
/// list and rebuilds runtime state from scratch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Opaque code handed to the action sink (e.g. a key name).
    pub code: String,
    #[serde(default)]
    pub cooldown_secs: f64,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_region: Option<Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default = "default_similarity")]
    pub similarity_threshold: f32,
    /// Minimum health fraction (0.0 - 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_hp: Option<f32>,
    /// Minimum mana fraction (0.0 - 1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_mp: Option<f32>,
    #[serde(default)]
    pub requires_target: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_conditions: Vec<StatusCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_similarity() -> f32 {
    0.8
}

impl ActionDefinition {
    /// A bare enabled action with no visual or resource preconditions.
    pub fn new(id: impl Into<String>, code: impl Into<String>, cooldown_secs: f64) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            code: code.into(),
            cooldown_secs,
            priority: 0,
            enabled: true,
            icon_region: None,
            template: None,
            similarity_threshold: default_similarity(),
            min_hp: None,
            min_mp: None,
            requires_target: false,
            status_conditions: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_icon(mut self, region: Region) -> Self {
        self.icon_region = Some(region);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// The icon region when it is configured and has a usable area.
    pub fn usable_icon_region(&self) -> Option<Region> {
        self.icon_region.filter(|r| !r.is_empty())
    }
}

// ---------------------------------------------------------------------------
// LoopMode
// ---------------------------------------------------------------------------

/// Which selection policy class the cycle should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    #[default]
    Default,
    Dispel,
}

impl LoopMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopMode::Default => "default",
            LoopMode::Dispel => "dispel",
        }
    }
}

// ---------------------------------------------------------------------------
// SceneState
// ---------------------------------------------------------------------------

/// Coarse view of the controlled application used by resource and target
/// preconditions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneState {
    pub hp: f32,
    pub mp: f32,
    pub has_target: bool,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            hp: 1.0,
            mp: 1.0,
            has_target: false,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Stopped,
    Running,
    Paused,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Stopped => "stopped",
            RunState::Running => "running",
            RunState::Paused => "paused",
        }
    }
}

/// Read-only snapshot handed to callers. Produced by the engine, never
/// mutated from outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub running: bool,
    pub paused: bool,
    pub mode: String,
    pub execution_count: u64,
    /// Mean cycle latency in seconds.
    pub avg_latency_secs: f64,
    /// Percentage of recorded cycles that succeeded (0 - 100).
    pub success_rate: f64,
    pub current_delay_ms: u64,
    pub heightened: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl EngineStatus {
    pub fn stopped() -> Self {
        Self {
            running: false,
            paused: false,
            mode: RunState::Stopped.as_str().to_string(),
            execution_count: 0,
            avg_latency_secs: 0.0,
            success_rate: 0.0,
            current_delay_ms: 0,
            heightened: false,
            strategy: None,
            last_action: None,
            started_at: None,
        }
    }

    pub fn run_state(&self) -> RunState {
        match (self.running, self.paused) {
            (false, _) => RunState::Stopped,
            (true, false) => RunState::Running,
            (true, true) => RunState::Paused,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_fits_within_frame() {
        assert!(Region::new(0, 0, 10, 10).fits_within(10, 10));
        assert!(!Region::new(5, 0, 10, 10).fits_within(10, 10));
        assert!(!Region::new(u32::MAX, 0, 2, 2).fits_within(10, 10));
    }

    #[test]
    fn zero_area_icon_region_is_not_usable() {
        let def = ActionDefinition::new("a", "1", 0.0).with_icon(Region::new(4, 4, 0, 8));
        assert_eq!(def.usable_icon_region(), None);
    }

    #[test]
    fn action_definition_yaml_defaults() {
        let yaml = "id: heal\ncode: \"4\"\n";
        let def: ActionDefinition = serde_yaml::from_str(yaml).unwrap();
        assert!(def.enabled);
        assert_eq!(def.cooldown_secs, 0.0);
        assert!((def.similarity_threshold - 0.8).abs() < f32::EPSILON);
        assert!(def.status_conditions.is_empty());
    }

    #[test]
    fn status_condition_polarity_snake_case() {
        let yaml = r#"
name: frenzy
region: { x: 1, y: 2, width: 3, height: 4 }
polarity: forbidden
"#;
        let cond: StatusCondition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cond.polarity, Polarity::Forbidden);
        assert_eq!(cond.region, Region::new(1, 2, 3, 4));
    }

    #[test]
    fn status_run_state_mapping() {
        let mut status = EngineStatus::stopped();
        assert_eq!(status.run_state(), RunState::Stopped);
        status.running = true;
        assert_eq!(status.run_state(), RunState::Running);
        status.paused = true;
        assert_eq!(status.run_state(), RunState::Paused);
    }
}
