//! Diagnostics snapshot of a pacing session

use crate::pacing::clock::ClockAnomalies;
use crate::pacing::drift::DriftStats;
use crate::pacing::scheduler::SchedulerStats;
use crate::sound::{CallbackStats, RingStats};
use serde::Serialize;

/// Everything a run counted, serialisable for reporting on exit.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PacerStats {
    pub frames: u64,
    pub pauses: u64,
    pub scheduler: SchedulerStats,
    pub clock_anomalies: ClockAnomalies,
    /// `None` when running without sound
    pub drift: Option<DriftStats>,
    pub ring: RingStats,
    /// Filled in by the owner of the callback monitor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callbacks: Option<CallbackStats>,
}

impl PacerStats {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialises_without_callbacks() {
        let stats = PacerStats::default();
        let json = stats.to_json_pretty().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["frames"], 0);
        assert!(value["drift"].is_null());
        assert!(value.get("callbacks").is_none());
        assert_eq!(value["scheduler"]["max_lag"], 0);
    }
}
