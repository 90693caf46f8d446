//! Pluggable selection policies.
//!
//! Specialized strategies are tried in registration order; the first whose
//! `can_activate` holds picks the candidate. Otherwise the default strategy
//! runs. Strategies only read the context; the coordinator applies any state
//! change after a candidate is chosen.

use std::time::Instant;

use tracing::debug;

use crate::registry::ActionRuntimeState;
use crate::types::LoopMode;

// ─── CycleContext ─────────────────────────────────────────────────────────

/// Snapshot handed to strategies, rebuilt every cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub actions: &'a [ActionRuntimeState],
    pub execution_count: u64,
    pub mode: LoopMode,
    /// `false` only in assisted mode without explicit cooldown enforcement.
    pub enforce_cooldown: bool,
    pub now: Instant,
}

impl<'a> CycleContext<'a> {
    pub fn new(actions: &'a [ActionRuntimeState], mode: LoopMode, enforce_cooldown: bool) -> Self {
        Self {
            actions,
            execution_count: 0,
            mode,
            enforce_cooldown,
            now: Instant::now(),
        }
    }

    fn is_eligible(&self, state: &ActionRuntimeState) -> bool {
        state.definition().enabled && (!self.enforce_cooldown || state.is_available_at(self.now))
    }
}

// ─── Strategies ───────────────────────────────────────────────────────────

/// First eligible action in configured order. List position is the only
/// precedence; priority weights are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStrategy;

impl DefaultStrategy {
    pub const NAME: &'static str = "default";

    pub fn select<'a>(&self, ctx: &CycleContext<'a>) -> Option<&'a ActionRuntimeState> {
        ctx.actions.iter().find(|s| ctx.is_eligible(s))
    }
}

/// Restricts candidates to actions carrying `tag`, highest priority first
/// (ties keep list order). Falls back to the default strategy when no tagged
/// action is eligible.
#[derive(Debug, Clone)]
pub struct TagFilterStrategy {
    name: String,
    mode: LoopMode,
    tag: String,
}

impl TagFilterStrategy {
    pub fn new(name: impl Into<String>, mode: LoopMode, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode,
            tag: tag.into(),
        }
    }

    /// The stock dispel policy, active in [`LoopMode::Dispel`].
    pub fn dispel(tag: impl Into<String>) -> Self {
        Self::new("dispel", LoopMode::Dispel, tag)
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    fn select<'a>(&self, ctx: &CycleContext<'a>) -> Option<&'a ActionRuntimeState> {
        let mut best: Option<&'a ActionRuntimeState> = None;
        for state in ctx.actions {
            if !ctx.is_eligible(state) || !state.definition().has_tag(&self.tag) {
                continue;
            }
            match best {
                Some(b) if b.definition().priority >= state.definition().priority => {}
                _ => best = Some(state),
            }
        }
        best.or_else(|| DefaultStrategy.select(ctx))
    }
}

#[derive(Debug, Clone)]
pub enum Strategy {
    Default(DefaultStrategy),
    TagFiltered(TagFilterStrategy),
}

impl Strategy {
    pub fn name(&self) -> &str {
        match self {
            Strategy::Default(_) => DefaultStrategy::NAME,
            Strategy::TagFiltered(s) => &s.name,
        }
    }

    pub fn can_activate(&self, ctx: &CycleContext<'_>) -> bool {
        match self {
            Strategy::Default(_) => true,
            Strategy::TagFiltered(s) => ctx.mode == s.mode,
        }
    }

    pub fn select_candidate<'a>(&self, ctx: &CycleContext<'a>) -> Option<&'a ActionRuntimeState> {
        match self {
            Strategy::Default(s) => s.select(ctx),
            Strategy::TagFiltered(s) => s.select(ctx),
        }
    }
}

// ─── StrategyEngine ───────────────────────────────────────────────────────

/// Outcome of one resolution pass.
#[derive(Debug, Clone, Copy)]
pub struct Selection<'s, 'a> {
    pub strategy: &'s str,
    pub candidate: Option<&'a ActionRuntimeState>,
}

#[derive(Debug, Clone)]
pub struct StrategyEngine {
    specialized: Vec<Strategy>,
    default: Strategy,
}

impl Default for StrategyEngine {
    fn default() -> Self {
        Self {
            specialized: Vec::new(),
            default: Strategy::Default(DefaultStrategy),
        }
    }
}

impl StrategyEngine {
    /// Default strategy plus the stock dispel policy keyed on `dispel_tag`.
    pub fn with_builtin(dispel_tag: &str) -> Self {
        let mut engine = Self::default();
        engine.register(Strategy::TagFiltered(TagFilterStrategy::dispel(dispel_tag)));
        engine
    }

    /// Append a specialized strategy. Returns `false` if one with the same
    /// name is already registered.
    pub fn register(&mut self, strategy: Strategy) -> bool {
        if self.specialized.iter().any(|s| s.name() == strategy.name()) {
            return false;
        }
        self.specialized.push(strategy);
        true
    }

    /// Replace the specialized strategy with the same name in place, or
    /// append it when there is none. Used when a reload changes a built-in.
    pub fn upsert(&mut self, strategy: Strategy) {
        match self
            .specialized
            .iter_mut()
            .find(|s| s.name() == strategy.name())
        {
            Some(slot) => *slot = strategy,
            None => self.specialized.push(strategy),
        }
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.specialized.iter().map(Strategy::name).collect()
    }

    pub fn select<'a>(&self, ctx: &CycleContext<'a>) -> Selection<'_, 'a> {
        let strategy = self
            .specialized
            .iter()
            .find(|s| s.can_activate(ctx))
            .unwrap_or(&self.default);
        debug!(strategy = strategy.name(), "selecting candidate");
        Selection {
            strategy: strategy.name(),
            candidate: strategy.select_candidate(ctx),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ActionRuntimeRegistry;
    use crate::types::ActionDefinition;
    use std::time::Duration;

    fn registry(defs: Vec<ActionDefinition>) -> ActionRuntimeRegistry {
        let mut reg = ActionRuntimeRegistry::new();
        reg.load(defs);
        reg
    }

    fn pick<'a>(engine: &StrategyEngine, ctx: &CycleContext<'a>) -> Option<&'a str> {
        engine.select(ctx).candidate.map(|s| s.id())
    }

    #[test]
    fn default_skips_disabled_and_takes_first_available() {
        let reg = registry(vec![
            ActionDefinition::new("a", "1", 0.0).disabled(),
            ActionDefinition::new("b", "2", 0.0),
            ActionDefinition::new("c", "3", 0.0),
        ]);
        let ctx = CycleContext::new(reg.states(), LoopMode::Default, true);
        assert_eq!(pick(&StrategyEngine::default(), &ctx), Some("b"));
    }

    #[test]
    fn default_order_beats_priority() {
        let reg = registry(vec![
            ActionDefinition::new("a", "1", 0.0).with_priority(1),
            ActionDefinition::new("b", "2", 0.0).with_priority(99),
        ]);
        let ctx = CycleContext::new(reg.states(), LoopMode::Default, true);
        assert_eq!(pick(&StrategyEngine::default(), &ctx), Some("a"));
    }

    #[test]
    fn default_skips_cooling_actions_when_enforced() {
        let mut reg = registry(vec![
            ActionDefinition::new("a", "1", 10.0),
            ActionDefinition::new("b", "2", 0.0),
        ]);
        let now = Instant::now();
        reg.mark_used_at("a", now).unwrap();
        let mut ctx = CycleContext::new(reg.states(), LoopMode::Default, true);
        ctx.now = now + Duration::from_secs(1);
        assert_eq!(pick(&StrategyEngine::default(), &ctx), Some("b"));

        // Assisted mode without enforcement ignores the cooldown.
        ctx.enforce_cooldown = false;
        assert_eq!(pick(&StrategyEngine::default(), &ctx), Some("a"));
    }

    #[test]
    fn no_candidate_when_everything_is_cooling() {
        let mut reg = registry(vec![ActionDefinition::new("a", "1", 10.0)]);
        let now = Instant::now();
        reg.mark_used_at("a", now).unwrap();
        let mut ctx = CycleContext::new(reg.states(), LoopMode::Default, true);
        ctx.now = now;
        assert_eq!(pick(&StrategyEngine::default(), &ctx), None);
    }

    #[test]
    fn dispel_prefers_tagged_candidate() {
        let reg = registry(vec![
            ActionDefinition::new("strike", "1", 0.0).with_priority(50),
            ActionDefinition::new("cleanse", "2", 0.0)
                .with_priority(1)
                .with_tag("dispel"),
        ]);
        let engine = StrategyEngine::with_builtin("dispel");
        let ctx = CycleContext::new(reg.states(), LoopMode::Dispel, true);
        let selection = engine.select(&ctx);
        assert_eq!(selection.strategy, "dispel");
        assert_eq!(selection.candidate.map(|s| s.id()), Some("cleanse"));
    }

    #[test]
    fn dispel_breaks_ties_by_priority_then_order() {
        let reg = registry(vec![
            ActionDefinition::new("low", "1", 0.0).with_priority(1).with_tag("dispel"),
            ActionDefinition::new("high", "2", 0.0).with_priority(5).with_tag("dispel"),
            ActionDefinition::new("high2", "3", 0.0).with_priority(5).with_tag("dispel"),
        ]);
        let engine = StrategyEngine::with_builtin("dispel");
        let ctx = CycleContext::new(reg.states(), LoopMode::Dispel, true);
        assert_eq!(pick(&engine, &ctx), Some("high"));
    }

    #[test]
    fn dispel_without_tagged_candidate_matches_default() {
        let reg = registry(vec![
            ActionDefinition::new("a", "1", 0.0).disabled(),
            ActionDefinition::new("b", "2", 0.0).with_priority(1),
            ActionDefinition::new("c", "3", 0.0).with_priority(9),
        ]);
        let engine = StrategyEngine::with_builtin("dispel");
        let dispel_ctx = CycleContext::new(reg.states(), LoopMode::Dispel, true);
        let default_ctx = CycleContext::new(reg.states(), LoopMode::Default, true);
        assert_eq!(
            pick(&engine, &dispel_ctx),
            pick(&StrategyEngine::default(), &default_ctx)
        );
        assert_eq!(pick(&engine, &dispel_ctx), Some("b"));
    }

    #[test]
    fn inactive_specialized_strategy_falls_back_to_default() {
        let reg = registry(vec![
            ActionDefinition::new("a", "1", 0.0),
            ActionDefinition::new("b", "2", 0.0).with_tag("dispel"),
        ]);
        let engine = StrategyEngine::with_builtin("dispel");
        let ctx = CycleContext::new(reg.states(), LoopMode::Default, true);
        let selection = engine.select(&ctx);
        assert_eq!(selection.strategy, "default");
        assert_eq!(selection.candidate.map(|s| s.id()), Some("a"));
    }

    #[test]
    fn register_rejects_duplicate_names() {
        let mut engine = StrategyEngine::with_builtin("dispel");
        assert!(!engine.register(Strategy::TagFiltered(TagFilterStrategy::dispel("x"))));
        assert!(engine.register(Strategy::TagFiltered(TagFilterStrategy::new(
            "interrupt",
            LoopMode::Dispel,
            "kick"
        ))));
        assert_eq!(engine.strategy_names(), vec!["dispel", "interrupt"]);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let reg = registry(vec![
            ActionDefinition::new("a", "1", 0.0).with_tag("dispel"),
            ActionDefinition::new("b", "2", 0.0).with_tag("purge"),
        ]);
        let mut engine = StrategyEngine::with_builtin("dispel");
        engine.upsert(Strategy::TagFiltered(TagFilterStrategy::dispel("purge")));
        assert_eq!(engine.strategy_names(), vec!["dispel"]);

        let ctx = CycleContext::new(reg.states(), LoopMode::Dispel, true);
        assert_eq!(pick(&engine, &ctx), Some("b"));
    }
}
