//! Mutable readiness and cooldown state for every configured action.
//!
//! The registry is the only owner of [`ActionRuntimeState`] mutation. The
//! cycle coordinator calls into it after a candidate is chosen, and the
//! readiness gate's per-frame refresh results are written back through
//! [`ActionRuntimeRegistry::apply_visual`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{EngineError, Result};
use crate::types::ActionDefinition;

// ---------------------------------------------------------------------------
// ActionRuntimeState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ActionRuntimeState {
    definition: Arc<ActionDefinition>,
    cooldown: Duration,
    last_used: Option<Instant>,
    visually_ready: bool,
    visual_frame: Option<u64>,
    consecutive_failures: u32,
}

impl ActionRuntimeState {
    fn new(definition: ActionDefinition) -> Self {
        let cooldown = Duration::try_from_secs_f64(definition.cooldown_secs.max(0.0))
            .unwrap_or(Duration::ZERO);
        Self {
            definition: Arc::new(definition),
            cooldown,
            last_used: None,
            visually_ready: true,
            visual_frame: None,
            consecutive_failures: 0,
        }
    }

    pub fn definition(&self) -> &ActionDefinition {
        &self.definition
    }

    /// Shared handle to the definition, for work that outlives a registry borrow.
    pub fn definition_arc(&self) -> Arc<ActionDefinition> {
        Arc::clone(&self.definition)
    }

    pub fn id(&self) -> &str {
        &self.definition.id
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_used(&self) -> Option<Instant> {
        self.last_used
    }

    pub fn visually_ready(&self) -> bool {
        self.visually_ready
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Enabled and out of cooldown at `now`. A never-used action is available.
    pub fn is_available_at(&self, now: Instant) -> bool {
        if !self.definition.enabled {
            return false;
        }
        match self.last_used {
            None => true,
            Some(used) => now.saturating_duration_since(used) >= self.cooldown,
        }
    }

    pub fn remaining_cooldown_at(&self, now: Instant) -> Duration {
        match self.last_used {
            None => Duration::ZERO,
            Some(used) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(used)),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionRuntimeRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ActionRuntimeRegistry {
    states: Vec<ActionRuntimeState>,
    index: HashMap<String, usize>,
}

impl ActionRuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild one runtime slot per definition, discarding all prior state.
    ///
    /// Definition order is preserved; it is the precedence order used by the
    /// default selection strategy. When ids repeat, lookups resolve to the
    /// first occurrence.
    pub fn load(&mut self, definitions: impl IntoIterator<Item = ActionDefinition>) {
        self.states = definitions
            .into_iter()
            .map(ActionRuntimeState::new)
            .collect();
        self.index.clear();
        for (i, state) in self.states.iter().enumerate() {
            self.index.entry(state.id().to_string()).or_insert(i);
        }
    }

    pub fn states(&self) -> &[ActionRuntimeState] {
        &self.states
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ActionRuntimeState> {
        self.index.get(id).map(|&i| &self.states[i])
    }

    pub fn mark_used(&mut self, id: &str) -> Result<()> {
        self.mark_used_at(id, Instant::now())
    }

    /// Stamp `now` as the last use and clear the failure streak.
    pub fn mark_used_at(&mut self, id: &str, now: Instant) -> Result<()> {
        let state = self.slot_mut(id)?;
        state.last_used = Some(now);
        state.consecutive_failures = 0;
        Ok(())
    }

    pub fn is_logically_available(&self, id: &str) -> Result<bool> {
        self.is_logically_available_at(id, Instant::now())
    }

    pub fn is_logically_available_at(&self, id: &str, now: Instant) -> Result<bool> {
        Ok(self.slot(id)?.is_available_at(now))
    }

    pub fn remaining_cooldown(&self, id: &str) -> Result<Duration> {
        self.remaining_cooldown_at(id, Instant::now())
    }

    pub fn remaining_cooldown_at(&self, id: &str, now: Instant) -> Result<Duration> {
        Ok(self.slot(id)?.remaining_cooldown_at(now))
    }

    /// Record the visual verdict for `frame_seq`.
    ///
    /// Returns `false` (and leaves the flag untouched) when this slot was
    /// already refreshed from the same frame.
    pub fn apply_visual(&mut self, id: &str, frame_seq: u64, ready: bool) -> Result<bool> {
        let state = self.slot_mut(id)?;
        if state.visual_frame == Some(frame_seq) {
            return Ok(false);
        }
        state.visual_frame = Some(frame_seq);
        state.visually_ready = ready;
        Ok(true)
    }

    /// Bump the failure streak and return the new count.
    pub fn record_failure(&mut self, id: &str) -> Result<u32> {
        let state = self.slot_mut(id)?;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        Ok(state.consecutive_failures)
    }

    pub fn reset_failures(&mut self, id: &str) -> Result<()> {
        self.slot_mut(id)?.consecutive_failures = 0;
        Ok(())
    }

    fn slot(&self, id: &str) -> Result<&ActionRuntimeState> {
        self.get(id)
            .ok_or_else(|| EngineError::UnknownAction(id.to_string()))
    }

    fn slot_mut(&mut self, id: &str) -> Result<&mut ActionRuntimeState> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.states[i]),
            None => Err(EngineError::UnknownAction(id.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(defs: Vec<ActionDefinition>) -> ActionRuntimeRegistry {
        let mut reg = ActionRuntimeRegistry::new();
        reg.load(defs);
        reg
    }

    #[test]
    fn available_immediately_after_load() {
        let reg = registry(vec![ActionDefinition::new("a", "1", 5.0)]);
        assert!(reg.is_logically_available("a").unwrap());
        assert_eq!(reg.remaining_cooldown("a").unwrap(), Duration::ZERO);
    }

    #[test]
    fn cooldown_window_after_mark_used() {
        let mut reg = registry(vec![ActionDefinition::new("a", "1", 5.0)]);
        let t0 = Instant::now();
        reg.mark_used_at("a", t0).unwrap();

        assert!(!reg.is_logically_available_at("a", t0).unwrap());
        assert!(!reg
            .is_logically_available_at("a", t0 + Duration::from_millis(4_999))
            .unwrap());
        assert!(reg
            .is_logically_available_at("a", t0 + Duration::from_secs(5))
            .unwrap());
        assert!(reg
            .is_logically_available_at("a", t0 + Duration::from_secs(9))
            .unwrap());
    }

    #[test]
    fn remaining_cooldown_never_negative() {
        let mut reg = registry(vec![ActionDefinition::new("a", "1", 2.0)]);
        let t0 = Instant::now();
        reg.mark_used_at("a", t0).unwrap();
        assert_eq!(
            reg.remaining_cooldown_at("a", t0 + Duration::from_millis(500))
                .unwrap(),
            Duration::from_millis(1_500)
        );
        assert_eq!(
            reg.remaining_cooldown_at("a", t0 + Duration::from_secs(60))
                .unwrap(),
            Duration::ZERO
        );
    }

    #[test]
    fn disabled_action_is_never_available() {
        let reg = registry(vec![ActionDefinition::new("a", "1", 0.0).disabled()]);
        assert!(!reg.is_logically_available("a").unwrap());
    }

    #[test]
    fn negative_cooldown_is_treated_as_zero() {
        let reg = registry(vec![ActionDefinition::new("a", "1", -3.0)]);
        assert_eq!(reg.get("a").unwrap().cooldown(), Duration::ZERO);
    }

    #[test]
    fn mark_used_resets_failure_streak() {
        let mut reg = registry(vec![ActionDefinition::new("a", "1", 0.0)]);
        reg.record_failure("a").unwrap();
        assert_eq!(reg.record_failure("a").unwrap(), 2);
        reg.mark_used("a").unwrap();
        assert_eq!(reg.get("a").unwrap().consecutive_failures(), 0);
    }

    #[test]
    fn load_discards_prior_runtime_state() {
        let mut reg = registry(vec![ActionDefinition::new("a", "1", 30.0)]);
        reg.mark_used("a").unwrap();
        reg.record_failure("a").unwrap();
        assert!(!reg.is_logically_available("a").unwrap());

        reg.load(vec![ActionDefinition::new("a", "1", 30.0)]);
        let state = reg.get("a").unwrap();
        assert!(state.last_used().is_none());
        assert_eq!(state.consecutive_failures(), 0);
        assert!(reg.is_logically_available("a").unwrap());
    }

    #[test]
    fn visual_flag_refreshes_once_per_frame() {
        let mut reg = registry(vec![ActionDefinition::new("a", "1", 0.0)]);
        assert!(reg.get("a").unwrap().visually_ready());
        assert!(reg.apply_visual("a", 7, false).unwrap());
        assert!(!reg.apply_visual("a", 7, true).unwrap());
        assert!(!reg.get("a").unwrap().visually_ready());
        assert!(reg.apply_visual("a", 8, true).unwrap());
        assert!(reg.get("a").unwrap().visually_ready());
    }

    #[test]
    fn unknown_id_is_an_error() {
        let mut reg = registry(vec![]);
        assert!(matches!(
            reg.mark_used("ghost"),
            Err(EngineError::UnknownAction(id)) if id == "ghost"
        ));
        assert!(reg.is_logically_available("ghost").is_err());
        assert!(reg.remaining_cooldown("ghost").is_err());
    }

    #[test]
    fn duplicate_ids_resolve_to_first() {
        let reg = registry(vec![
            ActionDefinition::new("a", "1", 0.0),
            ActionDefinition::new("a", "2", 0.0),
        ]);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.get("a").unwrap().definition().code, "1");
    }
}
