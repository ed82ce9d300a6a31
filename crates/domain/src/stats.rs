//! `RunStats` (spec §3) — the aggregate report attached to the terminal
//! `run.finished` event. Reduced from the event stream by the stats
//! collector in `rt-events`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStats {
    pub iterations: u32,
    pub tool_calls: u32,
    pub tool_timeouts: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model_wall_time_ms: u64,
    pub tool_wall_time_ms: u64,
    pub total_wall_time_ms: u64,
    pub context_packs: u32,
    pub dropped_items: u32,
    pub errors: u32,
    pub cancelled: bool,
    pub timed_out: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            iterations: 0,
            tool_calls: 0,
            tool_timeouts: 0,
            input_tokens: 0,
            output_tokens: 0,
            model_wall_time_ms: 0,
            tool_wall_time_ms: 0,
            total_wall_time_ms: 0,
            context_packs: 0,
            dropped_items: 0,
            errors: 0,
            cancelled: false,
            timed_out: false,
            started_at,
            finished_at: None,
        }
    }
}
