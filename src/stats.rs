//! Per-path statistics derived from accumulated samples.

use std::time::Duration;

use serde::Serialize;

use crate::path::SectionPath;
use crate::registry::NodeSnapshot;

/// Reportable statistics for one section path. All figures in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionStats {
    pub path: SectionPath,
    pub name: String,
    pub depth: usize,
    pub runs: u64,
    pub total_ms: f64,
    pub median_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl SectionStats {
    pub fn from_node(node: &NodeSnapshot) -> Self {
        let runs = node.runs.max(1);
        Self {
            path: node.path.clone(),
            name: node.path.leaf().to_owned(),
            depth: node.path.depth(),
            runs: node.runs,
            total_ms: to_ms(node.total),
            median_ms: median(&node.samples).map_or(0.0, to_ms),
            avg_ms: to_ms(node.total) / runs as f64,
            min_ms: to_ms(node.min),
            max_ms: to_ms(node.max),
        }
    }
}

fn to_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1_000_000.0
}

/// Exact median: middle sample for an odd count, mean of the two middle
/// samples for an even count. `None` for no samples.
pub fn median(samples: &[Duration]) -> Option<Duration> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        // (a + b) / 2 on nanoseconds; u128 so that very long sections cannot overflow.
        let sum = sorted[mid - 1].as_nanos() + sorted[mid].as_nanos();
        let half = sum / 2;
        Some(Duration::new(
            (half / 1_000_000_000) as u64,
            (half % 1_000_000_000) as u32,
        ))
    }
}
