//! Tool-gating decisions (spec §4.1 steps 2-3): every tool call is first
//! checked against the deny-list (step 2, "policy check", independent of
//! and prior to approval), then classified as requiring approval or
//! allowed before dispatch (step 3).

use rt_domain::{AliasResolver, LoopConfig, NoAliases};

/// What happens to a pending tool call before it may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    Pending,
}

/// Classifies tool calls against a loop's `require_approval`/`elevated_tools`
/// pattern sets. Stateless and cheap to construct per iteration.
pub struct ToolPolicy<'a> {
    config: &'a LoopConfig,
    alias: &'a dyn AliasResolver,
}

impl<'a> ToolPolicy<'a> {
    pub fn new(config: &'a LoopConfig) -> Self {
        Self {
            config,
            alias: &NoAliases,
        }
    }

    pub fn with_alias(config: &'a LoopConfig, alias: &'a dyn AliasResolver) -> Self {
        Self { config, alias }
    }

    /// Baseline decision for `tool_name`, ignoring any run-level elevation.
    /// The deny-list is checked first and is final — a denied tool is never
    /// upgraded by elevation, unlike a pending one.
    pub fn classify(&self, tool_name: &str) -> Decision {
        if self.config.denied_tools.matches(tool_name, self.alias) {
            Decision::Denied
        } else if self.config.require_approval.matches(tool_name, self.alias) {
            Decision::Pending
        } else {
            Decision::Allowed
        }
    }

    /// `tool_name` is dispatched through the async job pool rather than
    /// awaited inline in the current iteration (spec §4.1 step 4).
    pub fn is_async(&self, tool_name: &str) -> bool {
        self.config.async_tools.matches(tool_name, self.alias)
    }

    /// A `Pending` decision is upgraded to `Allowed` when the run context is
    /// marked elevated and `tool_name` is in the elevated-tools list — the
    /// "pending may be upgraded to allowed" rule.
    pub fn resolve(&self, tool_name: &str, context_elevated: bool) -> Decision {
        let decision = self.classify(tool_name);
        if decision == Decision::Pending
            && context_elevated
            && self.config.elevated_tools.matches(tool_name, self.alias)
        {
            Decision::Allowed
        } else {
            decision
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(require_approval: &[&str], elevated: &[&str]) -> LoopConfig {
        let mut cfg = LoopConfig::default();
        cfg.require_approval = rt_domain::PatternSet(require_approval.iter().map(|s| s.to_string()).collect());
        cfg.elevated_tools = rt_domain::PatternSet(elevated.iter().map(|s| s.to_string()).collect());
        cfg
    }

    #[test]
    fn denied_tool_is_denied() {
        let mut cfg = LoopConfig::default();
        cfg.denied_tools = rt_domain::PatternSet(vec!["shell_exec".to_string()]);
        let policy = ToolPolicy::new(&cfg);
        assert_eq!(policy.classify("shell_exec"), Decision::Denied);
    }

    #[test]
    fn denial_takes_precedence_over_approval_and_is_not_upgraded_by_elevation() {
        let mut cfg = LoopConfig::default();
        cfg.denied_tools = rt_domain::PatternSet(vec!["shell_exec".to_string()]);
        cfg.require_approval = rt_domain::PatternSet(vec!["shell_exec".to_string()]);
        cfg.elevated_tools = rt_domain::PatternSet(vec!["shell_exec".to_string()]);
        let policy = ToolPolicy::new(&cfg);
        assert_eq!(policy.classify("shell_exec"), Decision::Denied);
        assert_eq!(policy.resolve("shell_exec", true), Decision::Denied);
    }

    #[test]
    fn unlisted_tool_is_allowed() {
        let cfg = config_with(&[], &[]);
        let policy = ToolPolicy::new(&cfg);
        assert_eq!(policy.classify("read_file"), Decision::Allowed);
    }

    #[test]
    fn listed_tool_is_pending() {
        let cfg = config_with(&["shell_exec"], &[]);
        let policy = ToolPolicy::new(&cfg);
        assert_eq!(policy.classify("shell_exec"), Decision::Pending);
    }

    #[test]
    fn elevated_context_upgrades_matching_pending_tool() {
        let cfg = config_with(&["shell_exec"], &["shell_exec"]);
        let policy = ToolPolicy::new(&cfg);
        assert_eq!(policy.resolve("shell_exec", true), Decision::Allowed);
        assert_eq!(policy.resolve("shell_exec", false), Decision::Pending);
    }

    #[test]
    fn elevated_context_does_not_upgrade_non_elevated_tool() {
        let cfg = config_with(&["shell_exec"], &["other_tool"]);
        let policy = ToolPolicy::new(&cfg);
        assert_eq!(policy.resolve("shell_exec", true), Decision::Pending);
    }

    #[test]
    fn async_tools_are_flagged() {
        let mut cfg = LoopConfig::default();
        cfg.async_tools = rt_domain::PatternSet(vec!["long_job".to_string()]);
        let policy = ToolPolicy::new(&cfg);
        assert!(policy.is_async("long_job"));
        assert!(!policy.is_async("read_file"));
    }
}
