//! Capacity recommendation from current load
//!
//! Pure and stateless: safe to call from any thread, as often as a UI
//! cares to poll.

use serde::{Deserialize, Serialize};

use crate::config::{MAX_CAPACITY, MIN_CAPACITY};

/// Headroom added on top of the active task count
const HEADROOM: usize = 2;

/// Backlog size above which part of the queue is added to the suggestion
const BACKLOG_THRESHOLD: usize = 5;

/// Cap on the backlog contribution
const MAX_BACKLOG_BOOST: usize = 5;

/// A recommended capacity and how it was derived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySuggestion {
    pub suggested: usize,
    pub lower_bound: usize,
    pub upper_bound: usize,
    pub rationale: String,
}

/// Recommend a capacity for a pool.
///
/// `active_tasks` is the number of running tasks and `queue_depth` the
/// number of pending ones. The result never moves more than a factor of two
/// away from `current_capacity` and never exceeds [`MAX_CAPACITY`].
pub fn advise(active_tasks: usize, queue_depth: usize, current_capacity: usize) -> CapacitySuggestion {
    let base = active_tasks.saturating_add(HEADROOM);
    let boost = if queue_depth > BACKLOG_THRESHOLD {
        (queue_depth / 2).min(MAX_BACKLOG_BOOST)
    } else {
        0
    };
    let raw = base.saturating_add(boost);

    let upper_bound = current_capacity.saturating_mul(2).min(MAX_CAPACITY).max(MIN_CAPACITY);
    let lower_bound = (current_capacity / 2).max(MIN_CAPACITY).min(upper_bound);
    let suggested = raw.clamp(lower_bound, upper_bound);

    let mut rationale = format!("{active_tasks} running + {HEADROOM} headroom");
    if boost > 0 {
        rationale.push_str(&format!(" + {boost} for a backlog of {queue_depth}"));
    }
    rationale.push_str(&format!(" = {raw}"));
    if suggested != raw {
        rationale.push_str(&format!(
            ", clamped to [{lower_bound}, {upper_bound}] from current capacity {current_capacity}"
        ));
    }

    CapacitySuggestion {
        suggested,
        lower_bound,
        upper_bound,
        rationale,
    }
}
