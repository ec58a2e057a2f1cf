//! A freshness supervisor: named data sources each declare how old they may
//! get before the whole system is considered degraded, then emergency.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeState {
    Normal,
    Degraded,
    Emergency,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DegradedAction {
    HoldLast,
    RampDown,
    Immediate,
    Disable,
}

/// How stale one named data source may get before it drags the whole
/// system into `Degraded`, and then into `Emergency`.
#[derive(Debug, Clone)]
pub struct FreshnessRequirement {
    pub source_name: String,
    pub max_age_ms: u32,
    pub escalation_ms: u32,
    pub action: DegradedAction,
}

impl FreshnessRequirement {
    pub fn new(source_name: impl Into<String>) -> Self {
        FreshnessRequirement { source_name: source_name.into(), max_age_ms: 500, escalation_ms: 2_000, action: DegradedAction::HoldLast }
    }

    pub fn max_age_ms(mut self, ms: u32) -> Self {
        self.max_age_ms = ms;
        self
    }

    pub fn escalation_ms(mut self, ms: u32) -> Self {
        self.escalation_ms = ms;
        self
    }

    pub fn action(mut self, action: DegradedAction) -> Self {
        self.action = action;
        self
    }
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub heartbeat_timeout_ms: u32,
    pub command_freshness_ms: u32,
    pub escalation_delay_ms: u32,
    pub default_action: DegradedAction,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig { heartbeat_timeout_ms: 500, command_freshness_ms: 200, escalation_delay_ms: 2_000, default_action: DegradedAction::HoldLast }
    }
}

impl SafetyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heartbeat_timeout_ms(mut self, ms: u32) -> Self {
        self.heartbeat_timeout_ms = ms;
        self
    }

    pub fn command_freshness_ms(mut self, ms: u32) -> Self {
        self.command_freshness_ms = ms;
        self
    }

    pub fn escalation_delay_ms(mut self, ms: u32) -> Self {
        self.escalation_delay_ms = ms;
        self
    }

    pub fn default_degraded_action(mut self, action: DegradedAction) -> Self {
        self.default_action = action;
        self
    }
}

/// Monitors data source freshness and escalates `Normal → Degraded →
/// Emergency`; `Emergency` is terminal except for an explicit
/// `reset_to_normal`.
pub struct SafetyPolicy {
    config: SafetyConfig,
    state: SafeState,
    requirements: Vec<FreshnessRequirement>,
    last_seen_ms: BTreeMap<String, u32>,
    current_time_ms: u32,
    degraded_since_ms: u32,
    pub on_state_change: Event<(SafeState, SafeState)>,
    pub on_source_timeout: Event<String>,
    pub on_emergency: Event<String>,
}

impl SafetyPolicy {
    pub fn new(config: SafetyConfig) -> Self {
        SafetyPolicy {
            config,
            state: SafeState::Normal,
            requirements: Vec::new(),
            last_seen_ms: BTreeMap::new(),
            current_time_ms: 0,
            degraded_since_ms: 0,
            on_state_change: Event::new(),
            on_source_timeout: Event::new(),
            on_emergency: Event::new(),
        }
    }

    pub fn require_freshness(&mut self, requirement: FreshnessRequirement) -> &mut Self {
        self.last_seen_ms.insert(requirement.source_name.clone(), 0);
        self.requirements.push(requirement);
        self
    }

    pub fn report_alive(&mut self, source: &str) {
        if let Some(ts) = self.last_seen_ms.get_mut(source) {
            *ts = self.current_time_ms;
        }
    }

    pub fn update(&mut self, elapsed_ms: u32) {
        self.current_time_ms += elapsed_ms;

        if self.state == SafeState::Shutdown || self.state == SafeState::Emergency {
            return;
        }

        let mut any_stale = false;
        for i in 0..self.requirements.len() {
            let req = self.requirements[i].clone();
            let age = match self.last_seen_ms.get(&req.source_name) {
                Some(&last) => self.current_time_ms - last,
                None => {
                    any_stale = true;
                    continue;
                }
            };
            if age <= req.max_age_ms {
                continue;
            }
            any_stale = true;

            if self.state == SafeState::Normal {
                self.degraded_since_ms = self.current_time_ms;
                self.set_state(SafeState::Degraded);
                self.on_source_timeout.emit(req.source_name.clone());
            } else if self.state == SafeState::Degraded {
                let time_in_degraded = self.current_time_ms - self.degraded_since_ms;
                if time_in_degraded > req.escalation_ms {
                    self.set_state(SafeState::Emergency);
                    self.on_emergency.emit(alloc::format!("source '{}' exceeded escalation timeout ({}ms)", req.source_name, time_in_degraded));
                    return;
                }
            }
        }

        if !any_stale && self.state == SafeState::Degraded {
            self.set_state(SafeState::Normal);
        }
    }

    pub fn trigger_emergency(&mut self, reason: impl Into<String>) {
        if self.state != SafeState::Emergency {
            self.set_state(SafeState::Emergency);
            self.on_emergency.emit(reason.into());
        }
    }

    pub fn reset_to_normal(&mut self) {
        if self.state != SafeState::Normal {
            self.set_state(SafeState::Normal);
        }
        for ts in self.last_seen_ms.values_mut() {
            *ts = self.current_time_ms;
        }
    }

    pub fn state(&self) -> SafeState {
        self.state
    }

    pub fn is_safe(&self) -> bool {
        self.state == SafeState::Normal
    }

    pub fn is_degraded(&self) -> bool {
        self.state == SafeState::Degraded
    }

    /// The most severe `DegradedAction` among every currently-stale source,
    /// so a host applying an output policy only needs to query this once.
    pub fn current_action(&self) -> DegradedAction {
        if self.state == SafeState::Normal {
            return self.config.default_action;
        }
        let mut worst = self.config.default_action;
        for req in &self.requirements {
            let stale = match self.last_seen_ms.get(&req.source_name) {
                Some(&last) => self.current_time_ms - last > req.max_age_ms,
                None => true,
            };
            if stale && req.action > worst {
                worst = req.action;
            }
        }
        worst
    }

    fn set_state(&mut self, new_state: SafeState) {
        if new_state != self.state {
            let old = self.state;
            self.state = new_state;
            self.on_state_change.emit((old, new_state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_source_enters_degraded_then_recovers() {
        let mut policy = SafetyPolicy::new(SafetyConfig::new());
        policy.require_freshness(FreshnessRequirement::new("engine_rpm").max_age_ms(100));
        policy.update(50);
        assert_eq!(policy.state(), SafeState::Normal);

        policy.update(60);
        assert_eq!(policy.state(), SafeState::Degraded);

        policy.report_alive("engine_rpm");
        policy.update(10);
        assert_eq!(policy.state(), SafeState::Normal);
    }

    #[test]
    fn prolonged_degraded_escalates_to_emergency() {
        let mut policy = SafetyPolicy::new(SafetyConfig::new());
        policy.require_freshness(FreshnessRequirement::new("engine_rpm").max_age_ms(100).escalation_ms(200));
        policy.update(150); // stale, enters Degraded
        assert_eq!(policy.state(), SafeState::Degraded);
        policy.update(250); // still stale, now exceeds escalation_ms
        assert_eq!(policy.state(), SafeState::Emergency);
    }

    #[test]
    fn emergency_is_terminal_until_explicit_reset() {
        let mut policy = SafetyPolicy::new(SafetyConfig::new());
        policy.trigger_emergency("operator e-stop");
        policy.update(1_000_000);
        assert_eq!(policy.state(), SafeState::Emergency);
        policy.reset_to_normal();
        assert_eq!(policy.state(), SafeState::Normal);
    }

    #[test]
    fn current_action_reports_most_severe_stale_source() {
        let mut policy = SafetyPolicy::new(SafetyConfig::new());
        policy.require_freshness(FreshnessRequirement::new("a").max_age_ms(100).action(DegradedAction::HoldLast));
        policy.require_freshness(FreshnessRequirement::new("b").max_age_ms(100).action(DegradedAction::Disable));
        policy.update(150);
        assert_eq!(policy.current_action(), DegradedAction::Disable);
    }
}
