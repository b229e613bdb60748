//! The single object a UI drives. Owns the playback cursor, wires the
//! Window Manager, Event Merger, pacing loop, and Camera Server together,
//! and answers queries about playback position and the current alert.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::instrument;

use crate::bus::BusFilter;
use crate::camera::{CameraServer, IpcTransport};
use crate::merger::Merger;
use crate::route::Route;
use crate::types::{AlertSize, AlertStatus, Camera, Event, MessageKind, Nanos, SEGMENT_LENGTH_NS};
use crate::window::{SegmentRegistry, Window};

/// How often the pacing loop re-checks for a pause/seek/exit while
/// otherwise sleeping towards the next event's scheduled wall-clock time.
const PACE_QUANTUM: Duration = Duration::from_millis(20);

/// How long the pacing loop sleeps before retrying when it can't locate a
/// next event to dispatch (no route start yet, or nothing past the cursor).
const LOCATE_SLEEP: Duration = Duration::from_millis(100);

/// Sink for bus traffic that isn't a camera frame (carState, controlsState,
/// can, carParams, thumbnail). The real transport is out of scope.
pub trait BusSink: Send + Sync {
    fn publish(&self, event: &Event);
}

pub struct NullBusSink;
impl BusSink for NullBusSink {
    fn publish(&self, _event: &Event) {}
}

/// A boolean mode toggle the UI can set independently of play/pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Ignore event pacing entirely and stream as fast as frames decode.
    FullSpeed,
}

impl Flag {
    fn bit(self) -> u8 {
        match self {
            Flag::FullSpeed => 1 << 0,
        }
    }
}

/// A named seek target derived from `ControlsState.enabled` transitions,
/// rather than an absolute or relative offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFlag {
    NextEngagement,
    NextDisengagement,
}

/// The alert the UI should currently be showing, derived from the most
/// recent `ControlsState` at or before the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertState {
    pub enabled: bool,
    pub size: AlertSize,
    pub status: AlertStatus,
}

/// One of the span kinds `Control::timeline` annotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineKind {
    Engaged,
    AlertInfo,
    AlertWarning,
    AlertCritical,
}

/// A half-open `[begin_sec, end_sec)` span of one `TimelineKind`, relative
/// to route start. Used to draw the progress-bar annotations the
/// out-of-scope terminal UI overlays on top of the scrub bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineInterval {
    pub begin_sec: f64,
    pub end_sec: f64,
    pub kind: TimelineKind,
}

/// `ControlsState.alertSize != None` paired with `alertStatus` determines
/// which, if any, alert span is currently open (DESIGN.md's resolution of
/// the open question over what "alert span" means for this minimal schema).
fn alert_kind(snap: &crate::types::ControlsSnapshot) -> Option<TimelineKind> {
    if snap.alert_size == AlertSize::None {
        return None;
    }
    match snap.alert_status {
        AlertStatus::Critical => Some(TimelineKind::AlertCritical),
        AlertStatus::UserPrompt => Some(TimelineKind::AlertWarning),
        AlertStatus::Normal => Some(TimelineKind::AlertInfo),
    }
}

struct CursorState {
    /// Nanoseconds since route start.
    time_ns: Nanos,
    /// Tiebreaks `time_ns` so re-location after a seek or merge can find the
    /// event strictly after the last one emitted, even when several events
    /// share a timestamp.
    which: MessageKind,
    paused: bool,
    /// Bumped on every seek so the pacing loop can abandon whatever it was
    /// waiting on and re-locate from the new position.
    seek_generation: u64,
    exit: bool,
}

pub struct Control {
    registry: Arc<SegmentRegistry>,
    merger: Arc<Merger>,
    window: Arc<Window>,
    bus_filter: BusFilter,
    bus_sink: Arc<dyn BusSink>,
    camera_server: Mutex<CameraServer>,
    cursor: Mutex<CursorState>,
    cv: Condvar,
    speed: Mutex<f64>,
    flags: AtomicU8,
    window_handle: Mutex<Option<JoinHandle<()>>>,
    pacing_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Control {
    #[instrument(skip_all)]
    pub fn new(
        route: Route,
        starting_segment: u32,
        bus_filter: BusFilter,
        bus_sink: Arc<dyn BusSink>,
        transport: Arc<dyn IpcTransport>,
    ) -> Arc<Control> {
        let registry = Arc::new(SegmentRegistry::new());
        let merger = Arc::new(Merger::new());
        let window = Arc::new(Window::new(route, Arc::clone(&registry), Arc::clone(&merger)));
        // Geometry isn't known until a segment's Frame Readers have probed
        // their video files, so the server starts with no cameras
        // configured; `dispatch` calls `ensure` lazily as geometry becomes
        // known.
        let camera_server = CameraServer::start([None, None, None], Arc::clone(&registry), transport);

        let control = Arc::new(Control {
            registry,
            merger,
            window,
            bus_filter,
            bus_sink,
            camera_server: Mutex::new(camera_server),
            cursor: Mutex::new(CursorState {
                time_ns: starting_segment as Nanos * SEGMENT_LENGTH_NS,
                which: MessageKind::min(),
                paused: false,
                seek_generation: 0,
                exit: false,
            }),
            cv: Condvar::new(),
            speed: Mutex::new(1.0),
            flags: AtomicU8::new(0),
            window_handle: Mutex::new(None),
            pacing_handle: Mutex::new(None),
        });

        // Synchronous first pass so a segment is resident before the
        // window and pacing threads start racing against it.
        control.window.reconcile(starting_segment as i32);
        control
    }

    /// Starts the Window Manager and Pacing/Stream Loop background
    /// threads. `self` must already be held behind an `Arc` (see `new`).
    pub fn start(self: &Arc<Self>) {
        let window_control = Arc::clone(self);
        let window_handle = std::thread::spawn(move || {
            window_control.window.run(
                || window_control.current_segment(),
                || window_control.cursor.lock().unwrap().exit,
            );
        });
        *self.window_handle.lock().unwrap() = Some(window_handle);

        let pacing_control = Arc::clone(self);
        let pacing_handle = std::thread::spawn(move || pacing_control.pacing_loop());
        *self.pacing_handle.lock().unwrap() = Some(pacing_handle);
    }

    /// Signals both background threads to exit and joins them.
    pub fn stop(&self) {
        {
            let mut cursor = self.cursor.lock().unwrap();
            cursor.exit = true;
        }
        self.cv.notify_all();
        if let Some(handle) = self.window_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.pacing_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    pub fn pause(&self) {
        self.cursor.lock().unwrap().paused = true;
        self.cv.notify_all();
    }

    pub fn resume(&self) {
        self.cursor.lock().unwrap().paused = false;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.cursor.lock().unwrap().paused
    }

    pub fn toggle_pause(&self) {
        let mut cursor = self.cursor.lock().unwrap();
        cursor.paused = !cursor.paused;
        drop(cursor);
        self.cv.notify_all();
    }

    pub fn set_flag(&self, flag: Flag) {
        self.flags.fetch_or(flag.bit(), Ordering::AcqRel);
    }

    pub fn clear_flag(&self, flag: Flag) {
        self.flags.fetch_and(!flag.bit(), Ordering::AcqRel);
    }

    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.load(Ordering::Acquire) & flag.bit() != 0
    }

    pub fn set_speed(&self, speed: f64) {
        *self.speed.lock().unwrap() = speed.max(0.0);
    }

    pub fn current_seconds(&self) -> f64 {
        self.cursor.lock().unwrap().time_ns as f64 / 1_000_000_000.0
    }

    pub fn total_seconds(&self) -> f64 {
        self.window.segment_count() as f64 * (SEGMENT_LENGTH_NS as f64 / 1_000_000_000.0)
    }

    /// The alert the UI should show right now: the most recent
    /// `ControlsState` at or before the cursor, resolved to a concrete
    /// engaged/size/status triple.
    pub fn current_alert(&self) -> Option<AlertState> {
        let timeline = self.merger.timeline();
        let route_start = self.merger.route_start_ns()?;
        let current_abs = route_start + self.cursor.lock().unwrap().time_ns;
        timeline
            .iter()
            .filter(|e| e.which == MessageKind::ControlsState && e.time <= current_abs)
            .last()
            .and_then(Event::controls_snapshot)
            .map(|snap| AlertState { enabled: snap.enabled, size: snap.alert_size, status: snap.alert_status })
    }

    /// A sparse list of `(begin_sec, end_sec, kind)` spans annotating
    /// engagement and alert regions over the currently-resident timeline.
    /// Spans are derived from `ControlsState.enabled`
    /// transitions (`Engaged`) and `ControlsState.alertStatus`/`alertSize`
    /// transitions (`AlertInfo`/`AlertWarning`/`AlertCritical`), the only
    /// fields this crate's minimal schema carries for either (DESIGN.md).
    /// Only covers what's resident; it is not a whole-route index.
    pub fn timeline(&self) -> Vec<TimelineInterval> {
        let timeline = self.merger.timeline();
        let Some(route_start) = self.merger.route_start_ns() else { return Vec::new() };

        let mut intervals = Vec::new();
        let mut engaged_since: Option<Nanos> = None;
        let mut alert_since: Option<(Nanos, TimelineKind)> = None;
        let mut last_time = route_start;

        let to_sec = |abs: Nanos| abs.saturating_sub(route_start) as f64 / 1_000_000_000.0;

        for event in timeline.iter().filter(|e| e.which == MessageKind::ControlsState) {
            let Some(snap) = event.controls_snapshot() else { continue };
            last_time = event.time;

            match (engaged_since, snap.enabled) {
                (None, true) => engaged_since = Some(event.time),
                (Some(start), false) => {
                    intervals.push(TimelineInterval {
                        begin_sec: to_sec(start),
                        end_sec: to_sec(event.time),
                        kind: TimelineKind::Engaged,
                    });
                    engaged_since = None;
                }
                _ => {}
            }

            let this_alert = alert_kind(&snap);
            match (alert_since, this_alert) {
                (Some((start, kind)), next) if next != Some(kind) => {
                    intervals.push(TimelineInterval { begin_sec: to_sec(start), end_sec: to_sec(event.time), kind });
                    alert_since = next.map(|k| (event.time, k));
                }
                (None, Some(kind)) => alert_since = Some((event.time, kind)),
                _ => {}
            }
        }

        if let Some(start) = engaged_since {
            intervals.push(TimelineInterval { begin_sec: to_sec(start), end_sec: to_sec(last_time), kind: TimelineKind::Engaged });
        }
        if let Some((start, kind)) = alert_since {
            intervals.push(TimelineInterval { begin_sec: to_sec(start), end_sec: to_sec(last_time), kind });
        }

        intervals.sort_by(|a, b| a.begin_sec.partial_cmp(&b.begin_sec).unwrap());
        intervals
    }

    /// A seek outside `[route_start_ns, last loaded event's time]` is
    /// reported and ignored rather than clamped: the cursor is left exactly
    /// where it was. Before the route's span is known (no segment merged yet), any
    /// non-negative target is accepted, since there's nothing to range-
    /// check against.
    pub fn seek_absolute(&self, seconds: f64) {
        let route_start = self.merger.route_start_ns().unwrap_or(0);
        let target = route_start + (seconds.max(0.0) * 1_000_000_000.0) as Nanos;

        let timeline = self.merger.timeline();
        if let (Some(route_start_known), Some(last)) = (self.merger.route_start_ns(), timeline.last()) {
            if target < route_start_known || target > last.time {
                tracing::warn!(
                    requested_ns = target,
                    start_ns = route_start_known,
                    end_ns = last.time,
                    "seek out of range, ignoring"
                );
                return;
            }
        }
        self.seek_to_absolute_ns(target);
    }

    pub fn seek_relative(&self, delta_seconds: f64) {
        self.seek_absolute((self.current_seconds() + delta_seconds).max(0.0));
    }

    /// Scans forward from the cursor for the next `ControlsState.enabled`
    /// transition matching `flag` and seeks there. A no-op if none exists.
    pub fn seek_to_flag(&self, flag: SeekFlag) {
        let timeline = self.merger.timeline();
        let Some(route_start) = self.merger.route_start_ns() else { return };
        let current_abs = route_start + self.cursor.lock().unwrap().time_ns;

        let mut last_enabled: Option<bool> = None;
        for event in timeline.iter() {
            if event.which != MessageKind::ControlsState {
                continue;
            }
            let Some(snap) = event.controls_snapshot() else { continue };
            if event.time <= current_abs {
                last_enabled = Some(snap.enabled);
                continue;
            }
            let transitioned = match flag {
                SeekFlag::NextEngagement => snap.enabled && last_enabled != Some(true),
                SeekFlag::NextDisengagement => !snap.enabled && last_enabled != Some(false),
            };
            if transitioned {
                self.seek_to_absolute_ns(event.time);
                return;
            }
            last_enabled = Some(snap.enabled);
        }
    }

    fn seek_to_absolute_ns(&self, target_abs: Nanos) {
        let route_start = self.merger.route_start_ns().unwrap_or(0);
        let relative = target_abs.saturating_sub(route_start);
        let mut cursor = self.cursor.lock().unwrap();
        cursor.time_ns = relative;
        cursor.which = MessageKind::min();
        cursor.seek_generation += 1;
        drop(cursor);
        self.cv.notify_all();
    }

    fn current_segment(&self) -> i32 {
        (self.cursor.lock().unwrap().time_ns / SEGMENT_LENGTH_NS) as i32
    }

    /// Walks the global timeline from the cursor, sleeping between events to
    /// match wall-clock elapsed time against event-time elapsed (scaled by
    /// speed), publishing each event to the bus or the Camera Server as
    /// appropriate, and restarting from scratch whenever the timeline is
    /// rebuilt out from under it or the cursor is seeked.
    fn pacing_loop(&self) {
        let mut generation = self.cursor.lock().unwrap().seek_generation;
        let mut wall_anchor = Instant::now();
        let mut event_anchor = self.cursor.lock().unwrap().time_ns;

        loop {
            if self.cursor.lock().unwrap().exit {
                return;
            }
            if self.cursor.lock().unwrap().paused {
                let cursor = self.cursor.lock().unwrap();
                let _ = self.cv.wait_timeout(cursor, PACE_QUANTUM).unwrap();
                continue;
            }

            let route_start = match self.merger.route_start_ns() {
                Some(s) => s,
                None => {
                    std::thread::sleep(LOCATE_SLEEP);
                    continue;
                }
            };
            self.merger.clear_events_changed();
            let timeline = self.merger.timeline();

            let (cursor_ns, cursor_which) = {
                let cursor = self.cursor.lock().unwrap();
                (cursor.time_ns, cursor.which)
            };
            let cursor_key = (route_start + cursor_ns, cursor_which);
            // Strictly greater than the cursor: the cursor always holds the
            // (time, which) of the last event actually dispatched (or, right
            // after a seek, the target position with `which` reset to its
            // lowest value), so this never re-selects an event already sent.
            let start_index = timeline.partition_point(|e| (e.time, e.which) <= cursor_key);

            if start_index >= timeline.len() {
                std::thread::sleep(LOCATE_SLEEP);
                continue;
            }

            wall_anchor = Instant::now();
            event_anchor = cursor_ns;

            for event in &timeline[start_index..] {
                if self.merger.events_changed() {
                    break;
                }
                let current_gen = self.cursor.lock().unwrap().seek_generation;
                if current_gen != generation {
                    generation = current_gen;
                    break;
                }
                if self.cursor.lock().unwrap().exit {
                    return;
                }
                if self.cursor.lock().unwrap().paused {
                    break;
                }

                let event_relative = event.time.saturating_sub(route_start);
                if !self.has_flag(Flag::FullSpeed) {
                    self.sleep_until(event_relative, event_anchor, wall_anchor);
                }

                {
                    let mut cursor = self.cursor.lock().unwrap();
                    cursor.time_ns = event_relative;
                    cursor.which = event.which;
                }

                self.dispatch(event, (event_relative / SEGMENT_LENGTH_NS) as i32);
            }
        }
    }

    /// Sleeps in `PACE_QUANTUM` slices (checking `exit`/seek/pause between
    /// each) for however much wall-clock time remains until `target_ns`
    /// (event-relative time) is due, scaled by the configured speed.
    fn sleep_until(&self, target_ns: Nanos, event_anchor: Nanos, wall_anchor: Instant) {
        let speed = (*self.speed.lock().unwrap()).max(0.0001);
        let event_elapsed = target_ns.saturating_sub(event_anchor);
        let wall_due = wall_anchor + Duration::from_nanos((event_elapsed as f64 / speed) as u64);

        loop {
            let now = Instant::now();
            if now >= wall_due {
                return;
            }
            if self.cursor.lock().unwrap().exit || self.cursor.lock().unwrap().paused {
                return;
            }
            if self.merger.events_changed() {
                return;
            }
            std::thread::sleep((wall_due - now).min(PACE_QUANTUM));
        }
    }

    fn dispatch(&self, event: &Event, segment_hint: i32) {
        if let Some(camera) = event.which.camera() {
            if let Some(frame_id) = event.frame_id() {
                self.ensure_camera_geometry(camera, segment_hint);
                self.camera_server.lock().unwrap().push(camera, frame_id, segment_hint);
            }
        }
        if self.bus_filter.allows(event.which) {
            self.bus_sink.publish(event);
        }
    }

    /// Reconfigures the Camera Server's IPC geometry for `camera` from the
    /// current segment's Frame Reader, if that differs from what's already
    /// configured. A no-op once geometry has stabilized, which is the
    /// common case after the first frame of a route.
    fn ensure_camera_geometry(&self, camera: Camera, segment_hint: i32) {
        let Ok(number) = u32::try_from(segment_hint) else { return };
        let Some(segment) = self.registry.get(number) else { return };
        let Some(reader) = segment.frame_reader(camera) else { return };
        if !reader.valid {
            return;
        }
        let mut requested = [None; 3];
        requested[camera.index()] = Some((reader.width, reader.height));
        let mut server = self.camera_server.lock().unwrap();
        for other in Camera::ALL {
            if other != camera {
                requested[other.index()] = server.configured_geometry(other);
            }
        }
        server.ensure(requested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::RingBufferTransport;
    use crate::route::{Route, SegmentFiles};

    fn empty_control() -> Arc<Control> {
        let mut route = Route::new("test-route");
        route.insert(0, SegmentFiles::default());
        Control::new(
            route,
            0,
            BusFilter::default(),
            Arc::new(NullBusSink),
            Arc::new(RingBufferTransport::new()),
        )
    }

    #[test]
    fn starts_unpaused_at_segment_zero() {
        let control = empty_control();
        assert!(!control.is_paused());
        assert_eq!(control.current_seconds(), 0.0);
    }

    #[test]
    fn toggle_pause_flips_state() {
        let control = empty_control();
        control.toggle_pause();
        assert!(control.is_paused());
        control.toggle_pause();
        assert!(!control.is_paused());
    }

    #[test]
    fn full_speed_flag_round_trips() {
        let control = empty_control();
        assert!(!control.has_flag(Flag::FullSpeed));
        control.set_flag(Flag::FullSpeed);
        assert!(control.has_flag(Flag::FullSpeed));
        control.clear_flag(Flag::FullSpeed);
        assert!(!control.has_flag(Flag::FullSpeed));
    }

    #[test]
    fn current_alert_is_none_without_a_route_start() {
        let control = empty_control();
        assert_eq!(control.current_alert(), None);
    }

    #[test]
    fn timeline_is_empty_without_a_route_start() {
        let control = empty_control();
        assert!(control.timeline().is_empty());
    }

    #[test]
    fn seek_absolute_with_no_route_start_seeks_from_zero() {
        let control = empty_control();
        control.seek_absolute(5.0);
        assert_eq!(control.current_seconds(), 5.0);
    }

    fn init_data_event(time_ns: Nanos) -> Event {
        use crate::log_capnp::event;
        let mut message = capnp::message::Builder::new_default();
        let mut root = message.init_root::<event::Builder>();
        root.set_log_mono_time(time_ns);
        root.init_init_data();
        let mut payload = Vec::new();
        capnp::serialize::write_message(&mut payload, &message).unwrap();
        Event { time: time_ns, which: MessageKind::InitData, payload: Arc::from(payload) }
    }

    fn controls_state_event(time_ns: Nanos, enabled: bool, status: AlertStatus, size: AlertSize) -> Event {
        use crate::log_capnp::{controls_state, event};
        let mut message = capnp::message::Builder::new_default();
        let mut root = message.init_root::<event::Builder>();
        root.set_log_mono_time(time_ns);
        let mut cs = root.init_controls_state();
        cs.set_enabled(enabled);
        cs.set_alert_status(match status {
            AlertStatus::Normal => controls_state::AlertStatus::Normal,
            AlertStatus::UserPrompt => controls_state::AlertStatus::UserPrompt,
            AlertStatus::Critical => controls_state::AlertStatus::Critical,
        });
        cs.set_alert_size(match size {
            AlertSize::None => controls_state::AlertSize::None,
            AlertSize::Small => controls_state::AlertSize::Small,
            AlertSize::Mid => controls_state::AlertSize::Mid,
            AlertSize::Full => controls_state::AlertSize::Full,
        });
        let mut payload = Vec::new();
        capnp::serialize::write_message(&mut payload, &message).unwrap();
        Event { time: time_ns, which: MessageKind::ControlsState, payload: Arc::from(payload) }
    }

    /// Feeds a fabricated, already-loaded segment straight into the
    /// registry/merger pair a `Control` owns, bypassing real file I/O, so
    /// `timeline()`'s interval logic can be exercised deterministically.
    /// Prepends a leading `InitData` event at time 0 so the merger picks up
    /// a route start time, matching what a real segment's log carries.
    fn control_with_events(mut events: Vec<Event>) -> Arc<Control> {
        events.insert(0, init_data_event(0));
        events.sort();
        let control = empty_control();
        let segment = crate::segment::Segment {
            number: 0,
            loaded: true,
            log: crate::log_reader::LogReader { events, encoder_index: Default::default(), valid: true },
            frames: [None, None, None],
        };
        control.registry.insert(0, Arc::new(segment));
        control.merger.merge(&control.registry);
        control
    }

    #[test]
    fn timeline_reports_an_engaged_span_between_enable_and_disable() {
        let control = control_with_events(vec![
            controls_state_event(0, false, AlertStatus::Normal, AlertSize::None),
            controls_state_event(1_000_000_000, true, AlertStatus::Normal, AlertSize::None),
            controls_state_event(3_000_000_000, false, AlertStatus::Normal, AlertSize::None),
        ]);
        let intervals = control.timeline();
        let engaged: Vec<_> = intervals.iter().filter(|i| i.kind == TimelineKind::Engaged).collect();
        assert_eq!(engaged.len(), 1);
        assert_eq!(engaged[0].begin_sec, 1.0);
        assert_eq!(engaged[0].end_sec, 3.0);
    }

    #[test]
    fn timeline_reports_critical_alert_span() {
        let control = control_with_events(vec![
            controls_state_event(0, false, AlertStatus::Normal, AlertSize::None),
            controls_state_event(1_000_000_000, false, AlertStatus::Critical, AlertSize::Full),
            controls_state_event(2_000_000_000, false, AlertStatus::Normal, AlertSize::None),
        ]);
        let intervals = control.timeline();
        let alerts: Vec<_> = intervals.iter().filter(|i| i.kind == TimelineKind::AlertCritical).collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].begin_sec, 1.0);
        assert_eq!(alerts[0].end_sec, 2.0);
    }

    #[test]
    fn out_of_range_seek_is_ignored_and_leaves_cursor_unchanged() {
        let control = control_with_events(vec![
            controls_state_event(0, false, AlertStatus::Normal, AlertSize::None),
            controls_state_event(2_000_000_000, false, AlertStatus::Normal, AlertSize::None),
        ]);
        control.seek_absolute(1.0);
        assert_eq!(control.current_seconds(), 1.0);
        control.seek_absolute(999.0);
        assert_eq!(control.current_seconds(), 1.0);
    }

    #[test]
    fn timeline_leaves_a_still_open_span_open_at_the_last_event() {
        let control = control_with_events(vec![
            controls_state_event(0, false, AlertStatus::Normal, AlertSize::None),
            controls_state_event(1_000_000_000, true, AlertStatus::Normal, AlertSize::None),
        ]);
        let intervals = control.timeline();
        let engaged: Vec<_> = intervals.iter().filter(|i| i.kind == TimelineKind::Engaged).collect();
        assert_eq!(engaged.len(), 1);
        assert_eq!(engaged[0].begin_sec, 1.0);
        assert_eq!(engaged[0].end_sec, 1.0);
    }

    #[test]
    fn total_seconds_is_segment_count_times_segment_length() {
        let mut route = Route::new("test-route");
        route.insert(0, SegmentFiles::default());
        route.insert(1, SegmentFiles::default());
        route.insert(2, SegmentFiles::default());
        let control = Control::new(
            route,
            0,
            BusFilter::default(),
            Arc::new(NullBusSink),
            Arc::new(RingBufferTransport::new()),
        );
        assert_eq!(control.total_seconds(), 180.0);
    }

    #[derive(Default)]
    struct RecordingBusSink {
        published: Mutex<Vec<(Nanos, MessageKind)>>,
    }

    impl BusSink for RecordingBusSink {
        fn publish(&self, event: &Event) {
            self.published.lock().unwrap().push((event.time, event.which));
        }
    }

    /// Regression test: the pacing loop used to re-locate with only a time
    /// comparison, so once the cursor caught up to the last event in the
    /// timeline it kept re-selecting (and re-publishing) that same event
    /// forever instead of idling. Running the real loop to completion and
    /// checking for duplicates catches that directly.
    #[test]
    fn pacing_loop_emits_each_event_once_and_then_idles() {
        let mut route = Route::new("test-route");
        route.insert(0, SegmentFiles::default());
        let sink = Arc::new(RecordingBusSink::default());
        let control = Control::new(
            route,
            0,
            BusFilter::default(),
            Arc::clone(&sink) as Arc<dyn BusSink>,
            Arc::new(RingBufferTransport::new()),
        );
        control.set_flag(Flag::FullSpeed);

        let mut events = vec![
            init_data_event(0),
            controls_state_event(1_000_000_000, false, AlertStatus::Normal, AlertSize::None),
            controls_state_event(2_000_000_000, true, AlertStatus::Normal, AlertSize::None),
        ];
        events.sort();
        let segment = crate::segment::Segment {
            number: 0,
            loaded: true,
            log: crate::log_reader::LogReader { events, encoder_index: Default::default(), valid: true },
            frames: [None, None, None],
        };
        control.registry.insert(0, Arc::new(segment));
        control.merger.merge(&control.registry);

        let loop_control = Arc::clone(&control);
        let handle = std::thread::spawn(move || loop_control.pacing_loop());
        std::thread::sleep(Duration::from_millis(150));
        control.stop();
        let _ = handle.join();

        let published = sink.published.lock().unwrap().clone();
        assert_eq!(
            published,
            vec![
                (1_000_000_000, MessageKind::ControlsState),
                (2_000_000_000, MessageKind::ControlsState),
            ]
        );
    }
}
