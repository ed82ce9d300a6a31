//! Configuration recognized by the runtime (spec §6 "Configuration"). Every
//! field carries a serde default so a partial TOML document still parses,
//! matching the teacher's config-struct convention.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::policy::PatternSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub max_tokens: u32,
    /// 0 = unlimited.
    pub max_tool_calls: u32,
    /// Wall-time budget in milliseconds. 0 = unlimited.
    pub max_wall_time_ms: u64,
    pub enable_backpressure: bool,
    pub stream_tool_results: bool,
    pub disable_tool_events: bool,
    pub denied_tools: PatternSet,
    pub require_approval: PatternSet,
    pub elevated_tools: PatternSet,
    pub async_tools: PatternSet,
    pub max_response_text_size: usize,
    pub max_tool_calls_per_iteration: usize,
    pub history_cap: usize,
    pub result_guard: ResultGuardConfig,
    pub executor: ExecutorConfig,
    pub compaction: CompactionConfig,
    pub max_concurrent_jobs: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_tokens: 4096,
            max_tool_calls: 0,
            max_wall_time_ms: 0,
            enable_backpressure: true,
            stream_tool_results: true,
            disable_tool_events: false,
            denied_tools: PatternSet::default(),
            require_approval: PatternSet::default(),
            elevated_tools: PatternSet::default(),
            async_tools: PatternSet::default(),
            max_response_text_size: 1024 * 1024,
            max_tool_calls_per_iteration: 32,
            history_cap: 50,
            result_guard: ResultGuardConfig::default(),
            executor: ExecutorConfig::default(),
            compaction: CompactionConfig::default(),
            max_concurrent_jobs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// 0 means "derive from CPU count" (see [`ExecutorConfig::resolved_concurrency`]).
    pub concurrency: usize,
    pub per_tool_timeout_ms: u64,
    pub default_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    pub enable_backpressure: bool,
    pub per_tool: HashMap<String, ToolOverride>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            per_tool_timeout_ms: 30_000,
            default_retries: 0,
            retry_backoff_ms: 100,
            max_retry_backoff_ms: 5_000,
            enable_backpressure: true,
            per_tool: HashMap::new(),
        }
    }
}

impl ExecutorConfig {
    /// Resolve `concurrency == 0` against the host's CPU count (spec §4.2:
    /// process-wide semaphore sized from config or the host).
    pub fn resolved_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            std::cmp::min(8, 2 * cpus)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOverride {
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub retry_backoff_ms: Option<u64>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub max_retry_backoff_ms: u64,
    pub failover_on_rate_limit: bool,
    pub failover_on_server_error: bool,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_ms: 100,
            max_retry_backoff_ms: 5_000,
            failover_on_rate_limit: true,
            failover_on_server_error: true,
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackpressureConfig {
    pub high_pri_buffer: usize,
    pub low_pri_buffer: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            high_pri_buffer: 32,
            low_pri_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultGuardConfig {
    pub enabled: bool,
    pub max_chars: usize,
    pub denylist: PatternSet,
    pub redact_patterns: Vec<String>,
    pub redaction_text: String,
    pub truncate_suffix: String,
    pub sanitize_secrets: bool,
}

impl Default for ResultGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chars: 64 * 1024,
            denylist: PatternSet::default(),
            redact_patterns: Vec::new(),
            redaction_text: "[REDACTED]".to_string(),
            truncate_suffix: "...[truncated]".to_string(),
            sanitize_secrets: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    pub enabled: bool,
    pub threshold_percent: u8,
    pub flush_prompt: Option<String>,
    pub confirmation_timeout_ms: u64,
    pub auto_compact_on_timeout: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 80,
            flush_prompt: None,
            confirmation_timeout_ms: 5 * 60 * 1000,
            auto_compact_on_timeout: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub loop_config: LoopConfig,
    pub failover: FailoverConfig,
    pub backpressure: BackpressureConfig,
}

/// Severity of a configuration validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Cross-field invariants the serde defaults alone can't enforce.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.loop_config.max_iterations == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "loop.max_iterations must be > 0".into(),
            });
        }
        if self.loop_config.result_guard.max_chars == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "result_guard.max_chars is 0; all tool output truncates to empty".into(),
            });
        }
        if self.failover.circuit_breaker_threshold == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "failover.circuit_breaker_threshold must be > 0".into(),
            });
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.loop_config.max_iterations, 10);
        assert_eq!(cfg.failover.circuit_breaker_threshold, 3);
        assert_eq!(cfg.backpressure.high_pri_buffer, 32);
    }

    #[test]
    fn validate_flags_zero_max_iterations() {
        let mut cfg = Config::default();
        cfg.loop_config.max_iterations = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn resolved_concurrency_has_a_floor() {
        assert!(ExecutorConfig::default().resolved_concurrency() >= 1);
    }
}
