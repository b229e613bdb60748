//! Rebuilds the global, time-ordered event timeline whenever the set of
//! resident segments changes, and swaps it in behind a single pointer so
//! readers never see a partial merge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, instrument};

use crate::types::{Event, Nanos};
use crate::window::SegmentRegistry;

/// Protects the global timeline pointer, `route_start_ns`, and the
/// `events_changed` flag together, as the single merge lock. Held only
/// long enough to rebuild and swap a `Vec`, never across I/O or a sleep.
pub struct Merger {
    timeline: Mutex<Arc<Vec<Event>>>,
    route_start_ns: Mutex<Option<Nanos>>,
    events_changed: AtomicBool,
}

impl Merger {
    pub fn new() -> Merger {
        Merger {
            timeline: Mutex::new(Arc::new(Vec::new())),
            route_start_ns: Mutex::new(None),
            events_changed: AtomicBool::new(false),
        }
    }

    /// A cheap clone of the current global timeline pointer. Callers (the
    /// Pacing/Stream Loop) should grab this once per step rather than
    /// holding the merge lock across a sleep.
    pub fn timeline(&self) -> Arc<Vec<Event>> {
        Arc::clone(&self.timeline.lock().unwrap())
    }

    pub fn route_start_ns(&self) -> Option<Nanos> {
        *self.route_start_ns.lock().unwrap()
    }

    /// Whether the timeline has changed since the last `clear_events_changed`
    /// call. The Pacing/Stream Loop polls this every step to notice a
    /// residency change without re-locating its cursor from scratch.
    pub fn events_changed(&self) -> bool {
        self.events_changed.load(Ordering::Acquire)
    }

    pub fn clear_events_changed(&self) {
        self.events_changed.store(false, Ordering::Release);
    }

    /// Rebuilds the timeline from every currently resident, loaded
    /// segment's events, sorts it, and swaps it in. Segments that have
    /// since been evicted naturally drop out: this is a full rebuild, not
    /// an incremental append, so a re-visited segment never contributes
    /// duplicate events.
    #[instrument(skip_all)]
    pub fn merge(&self, registry: &SegmentRegistry) {
        let mut merged = Vec::new();
        let mut earliest_start: Option<Nanos> = None;

        for number in registry.numbers() {
            let Some(segment) = registry.get(number) else { continue };
            if !segment.loaded {
                continue;
            }
            merged.extend(segment.log.events.iter().cloned());
            if let Some(init) = segment.log.init_time() {
                earliest_start = Some(earliest_start.map_or(init, |e: Nanos| e.min(init)));
            }
        }
        merged.sort();

        debug!(events = merged.len(), "merged global timeline");

        *self.timeline.lock().unwrap() = Arc::new(merged);
        if let Some(start) = earliest_start {
            let mut route_start = self.route_start_ns.lock().unwrap();
            if route_start.is_none() {
                *route_start = Some(start);
            }
        }
        self.events_changed.store(true, Ordering::Release);
    }
}

impl Default for Merger {
    fn default() -> Merger {
        Merger::new()
    }
}
