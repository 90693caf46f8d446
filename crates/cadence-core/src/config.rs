use std::collections::HashSet;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::Result;
use crate::types::{ActionDefinition, LoopMode, Region};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }
}

pub fn has_errors(warnings: &[ConfigWarning]) -> bool {
    warnings.iter().any(|w| w.level == WarnLevel::Error)
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Screen region handed to the frame source.
    pub capture_region: Region,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_target_latency")]
    pub target_latency_ms: u64,

    /// Gate selection on visual confirmation.
    #[serde(default)]
    pub assisted_mode: bool,
    /// Keep enforcing logical cooldowns while assisted.
    #[serde(default)]
    pub enforce_cooldown_when_assisted: bool,

    #[serde(default)]
    pub loop_mode: LoopMode,
    #[serde(default = "default_dispel_tag")]
    pub dispel_tag: String,

    #[serde(default = "default_interrupt_code")]
    pub interrupt_code: String,
    #[serde(default = "default_stall_threshold")]
    pub stall_threshold: u32,

    #[serde(default = "default_buffer_capacity")]
    pub frame_buffer_capacity: usize,
    #[serde(default = "default_capture_poll")]
    pub capture_poll_ms: u64,
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_ms: u64,
    /// Poll the engagement oracle every this many processed cycles.
    #[serde(default = "default_engagement_poll")]
    pub engagement_poll_every: u64,

    #[serde(default = "default_brightness")]
    pub brightness_threshold: u8,
    #[serde(default = "default_template_ttl")]
    pub template_ttl_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

fn default_base_delay() -> u64 {
    1_000
}
fn default_min_delay() -> u64 {
    100
}
fn default_max_delay() -> u64 {
    2_000
}
fn default_target_latency() -> u64 {
    100
}
fn default_dispel_tag() -> String {
    "dispel".to_string()
}
fn default_interrupt_code() -> String {
    "Escape".to_string()
}
fn default_stall_threshold() -> u32 {
    5
}
fn default_buffer_capacity() -> usize {
    2
}
fn default_capture_poll() -> u64 {
    10
}
fn default_dequeue_timeout() -> u64 {
    500
}
fn default_engagement_poll() -> u64 {
    10
}
fn default_brightness() -> u8 {
    100
}
fn default_template_ttl() -> u64 {
    3_600
}
fn default_stop_timeout() -> u64 {
    5_000
}

impl EngineSettings {
    pub fn new(capture_region: Region) -> Self {
        Self {
            capture_region,
            base_delay_ms: default_base_delay(),
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
            target_latency_ms: default_target_latency(),
            assisted_mode: false,
            enforce_cooldown_when_assisted: false,
            loop_mode: LoopMode::Default,
            dispel_tag: default_dispel_tag(),
            interrupt_code: default_interrupt_code(),
            stall_threshold: default_stall_threshold(),
            frame_buffer_capacity: default_buffer_capacity(),
            capture_poll_ms: default_capture_poll(),
            dequeue_timeout_ms: default_dequeue_timeout(),
            engagement_poll_every: default_engagement_poll(),
            brightness_threshold: default_brightness(),
            template_ttl_secs: default_template_ttl(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }

    /// Cooldowns are enforced unless assisted mode turns them off.
    pub fn enforce_cooldown(&self) -> bool {
        !self.assisted_mode || self.enforce_cooldown_when_assisted
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn target_latency(&self) -> Duration {
        Duration::from_millis(self.target_latency_ms)
    }

    pub fn capture_poll(&self) -> Duration {
        Duration::from_millis(self.capture_poll_ms)
    }

    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn template_ttl(&self) -> Duration {
        Duration::from_secs(self.template_ttl_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Everything the engine needs from a config file: global settings plus
/// the ordered action list (order is precedence).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    #[serde(default)]
    pub actions: Vec<ActionDefinition>,
}

impl EngineConfig {
    pub fn new(settings: EngineSettings, actions: Vec<ActionDefinition>) -> Self {
        Self { settings, actions }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(data)?)
    }

    /// Write the config atomically (tempfile in the same directory, then
    /// rename) so a watcher never sees a half-written file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data.as_bytes())?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let s = &self.settings;

        if self.actions.is_empty() {
            warnings.push(ConfigWarning::warning("no actions configured"));
        }

        let mut seen = HashSet::new();
        for action in &self.actions {
            if action.id.trim().is_empty() {
                warnings.push(ConfigWarning::error("action with an empty id"));
            } else if !seen.insert(action.id.as_str()) {
                warnings.push(ConfigWarning::error(format!(
                    "duplicate action id '{}' (only the first is addressable)",
                    action.id
                )));
            }

            if action.code.trim().is_empty() {
                warnings.push(ConfigWarning::error(format!(
                    "action '{}' has an empty code",
                    action.id
                )));
            }

            if !action.cooldown_secs.is_finite() || action.cooldown_secs < 0.0 {
                warnings.push(ConfigWarning::error(format!(
                    "action '{}' has invalid cooldown {}",
                    action.id, action.cooldown_secs
                )));
            }

            if !(0.0..=1.0).contains(&action.similarity_threshold) {
                warnings.push(ConfigWarning::error(format!(
                    "action '{}' similarity_threshold {} is outside [0, 1]",
                    action.id, action.similarity_threshold
                )));
            }

            for (label, value) in [("min_hp", action.min_hp), ("min_mp", action.min_mp)] {
                if let Some(v) = value {
                    if !(0.0..=1.0).contains(&v) {
                        warnings.push(ConfigWarning::error(format!(
                            "action '{}' {label} {v} is outside [0, 1]",
                            action.id
                        )));
                    }
                }
            }

            if action.icon_region.is_some_and(|r| r.is_empty()) {
                warnings.push(ConfigWarning::warning(format!(
                    "action '{}' icon_region has zero area and will be ignored",
                    action.id
                )));
            }

            for cond in &action.status_conditions {
                if !(0.0..=1.0).contains(&cond.threshold) {
                    warnings.push(ConfigWarning::error(format!(
                        "status '{}' on action '{}' threshold {} is outside [0, 1]",
                        cond.name, action.id, cond.threshold
                    )));
                }
                if cond.region.is_empty() {
                    warnings.push(ConfigWarning::warning(format!(
                        "status '{}' on action '{}' has a zero-area region and will never be detected",
                        cond.name, action.id
                    )));
                }
            }
        }

        if s.min_delay_ms > s.max_delay_ms {
            warnings.push(ConfigWarning::error(format!(
                "min_delay_ms ({}) is greater than max_delay_ms ({})",
                s.min_delay_ms, s.max_delay_ms
            )));
        } else if s.base_delay_ms < s.min_delay_ms || s.base_delay_ms > s.max_delay_ms {
            warnings.push(ConfigWarning::warning(format!(
                "base_delay_ms ({}) is outside [{}, {}] and will be clamped",
                s.base_delay_ms, s.min_delay_ms, s.max_delay_ms
            )));
        }

        if s.frame_buffer_capacity == 0 {
            warnings.push(ConfigWarning::error("frame_buffer_capacity must be at least 1"));
        }

        if s.capture_region.is_empty() {
            warnings.push(ConfigWarning::error("capture_region has zero area"));
        }

        if s.stall_threshold == 0 {
            warnings.push(ConfigWarning::warning(
                "stall_threshold 0 is treated as 1",
            ));
        }

        if s.engagement_poll_every == 0 {
            warnings.push(ConfigWarning::warning(
                "engagement_poll_every 0 disables engagement polling",
            ));
        }

        if s.interrupt_code.trim().is_empty() {
            warnings.push(ConfigWarning::error("interrupt_code is empty"));
        }

        warnings
    }
}
