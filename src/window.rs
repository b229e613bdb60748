//! Keeps a sliding window of resident segments around the current cursor
//! position and evicts the rest.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, instrument};

use crate::merger::Merger;
use crate::route::Route;
use crate::segment::{FinishedRead, Segment};
use crate::types::{BACKWARD_SEGS, FORWARD_SEGS};

/// How often the residency loop re-checks the cursor against the route.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared, thread-safe map of resident segments, keyed by segment number.
/// Lives independently of the window-manager loop so the Pacing/Stream
/// Loop (C6) and Camera Server (C7) can look segments up without taking
/// part in residency bookkeeping.
#[derive(Default)]
pub struct SegmentRegistry {
    segments: Mutex<BTreeMap<u32, Arc<Segment>>>,
}

impl SegmentRegistry {
    pub fn new() -> SegmentRegistry {
        SegmentRegistry::default()
    }

    pub fn get(&self, number: u32) -> Option<Arc<Segment>> {
        self.segments.lock().unwrap().get(&number).cloned()
    }

    pub fn contains(&self, number: u32) -> bool {
        self.segments.lock().unwrap().contains_key(&number)
    }

    pub fn insert(&self, number: u32, segment: Arc<Segment>) {
        self.segments.lock().unwrap().insert(number, segment);
    }

    pub fn numbers(&self) -> Vec<u32> {
        self.segments.lock().unwrap().keys().copied().collect()
    }

    /// Drops every resident segment whose number does not satisfy `keep`.
    pub fn retain(&self, keep: impl Fn(u32) -> bool) {
        self.segments.lock().unwrap().retain(|&n, _| keep(n));
    }
}

/// Drives the sliding residency window: `[current - BACKWARD_SEGS, current
/// + FORWARD_SEGS]`. Segments entering the window are started in the
/// background; segments leaving it are dropped, which tears down their
/// Frame Reader worker threads.
pub struct Window {
    route: Route,
    registry: Arc<SegmentRegistry>,
    merger: Arc<Merger>,
}

impl Window {
    pub fn new(route: Route, registry: Arc<SegmentRegistry>, merger: Arc<Merger>) -> Window {
        Window { route, registry, merger }
    }

    /// The number of segments the underlying route spans, regardless of how
    /// many are currently resident.
    pub fn segment_count(&self) -> u32 {
        self.route.segment_count()
    }

    /// One residency pass around `current_segment`. Idempotent: calling it
    /// again with the same `current_segment` and nothing newly resident is
    /// a no-op, matching the "already satisfied" case named in the spec.
    #[instrument(skip(self), fields(current = current_segment))]
    pub fn reconcile(&self, current_segment: i32) {
        let wanted: Vec<u32> = ((current_segment - BACKWARD_SEGS)..=(current_segment + FORWARD_SEGS))
            .filter(|&n| n >= 0 && self.route.contains(n))
            .map(|n| n as u32)
            .collect();

        self.registry.retain(|n| wanted.contains(&n));

        let mut any_started = false;
        for number in wanted {
            if self.registry.contains(number) {
                continue;
            }
            let Some(files) = self.route.files(number).cloned() else { continue };
            debug!(segment = number, "starting segment load");
            let segment = Segment::start(number, &files, move |finished: FinishedRead| {
                debug!(segment = finished.segment, "segment reader finished");
            });
            self.registry.insert(number, Arc::new(segment));
            any_started = true;
        }

        if any_started {
            self.merger.merge(&self.registry);
        }
    }

    /// Runs `reconcile` forever, polling for cursor movement. Intended to
    /// be spawned on its own thread by the Control Plane; `current` is
    /// read fresh every iteration so it reflects seeks made concurrently
    /// by the Pacing/Stream Loop.
    pub fn run(&self, current: impl Fn() -> i32, should_exit: impl Fn() -> bool) {
        loop {
            if should_exit() {
                return;
            }
            self.reconcile(current());
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::SegmentFiles;

    #[test]
    fn reconcile_skips_segments_absent_from_route() {
        let mut route = Route::new("test-route");
        route.insert(0, SegmentFiles::default());
        let registry = Arc::new(SegmentRegistry::new());
        let merger = Arc::new(Merger::new());
        let window = Window::new(route, Arc::clone(&registry), merger);

        window.reconcile(0);
        // segment 0 has no log file, so Segment::start returns synchronously
        // with loaded = false, but it is still resident.
        assert!(registry.contains(0));
        assert!(!registry.contains(1));
    }

    #[test]
    fn reconcile_evicts_segments_outside_the_window() {
        let mut route = Route::new("test-route");
        for n in 0..10 {
            route.insert(n, SegmentFiles::default());
        }
        let registry = Arc::new(SegmentRegistry::new());
        let merger = Arc::new(Merger::new());
        let window = Window::new(route, Arc::clone(&registry), merger);

        window.reconcile(0);
        assert!(registry.contains(0));
        assert!(registry.contains(FORWARD_SEGS as u32));
        assert!(!registry.contains((FORWARD_SEGS + 1) as u32));

        window.reconcile(8);
        assert!(!registry.contains(0));
        assert!(registry.contains(8));
    }
}
