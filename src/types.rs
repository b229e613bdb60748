//! Core data model shared by every component: the event stream's element
//! type, its ordering, and the message-kind enumeration it's tagged with.

use std::sync::Arc;

use crate::log_capnp::{controls_state, event};

/// Nanosecond timestamp, monotonic within a route.
pub type Nanos = u64;

/// Duration of a route segment.
pub const SEGMENT_LENGTH_NS: Nanos = 60 * 1_000_000_000;

/// Segments kept resident behind the cursor.
pub const BACKWARD_SEGS: i32 = 2;
/// Segments kept resident ahead of the cursor.
pub const FORWARD_SEGS: i32 = 2;

/// Ring depth per camera IPC stream.
pub const UI_BUF_COUNT: usize = 4;

/// One of the three camera streams a segment may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Camera {
    Road,
    Driver,
    WideRoad,
}

impl Camera {
    pub const ALL: [Camera; 3] = [Camera::Road, Camera::Driver, Camera::WideRoad];

    pub fn index(self) -> usize {
        match self {
            Camera::Road => 0,
            Camera::Driver => 1,
            Camera::WideRoad => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Camera::Road => "Road",
            Camera::Driver => "Driver",
            Camera::WideRoad => "WideRoad",
        }
    }
}

/// Discriminator drawn from the message schema's `Event` union (log.capnp).
/// Ordering here defines the tie-break for events sharing a timestamp, and
/// must match the declaration order of the capnp union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    InitData,
    Sentinel,
    CarParams,
    Can,
    RoadEncodeIdx,
    DriverEncodeIdx,
    WideRoadEncodeIdx,
    RoadCameraState,
    DriverCameraState,
    WideRoadCameraState,
    CarState,
    ControlsState,
    Thumbnail,
}

impl MessageKind {
    /// The bus socket this kind publishes on, or `None` if this kind has no
    /// socket (e.g. the encode-index events, which only ever populate
    /// `encoder_index` and are never retained in the event vector — see
    /// `log_reader`).
    pub fn socket_name(self) -> Option<&'static str> {
        match self {
            MessageKind::InitData => None,
            MessageKind::Sentinel => None,
            MessageKind::CarParams => Some("carParams"),
            MessageKind::Can => Some("can"),
            MessageKind::RoadEncodeIdx
            | MessageKind::DriverEncodeIdx
            | MessageKind::WideRoadEncodeIdx => None,
            MessageKind::RoadCameraState => Some("roadCameraState"),
            MessageKind::DriverCameraState => Some("driverCameraState"),
            MessageKind::WideRoadCameraState => Some("wideRoadCameraState"),
            MessageKind::CarState => Some("carState"),
            MessageKind::ControlsState => Some("controlsState"),
            MessageKind::Thumbnail => Some("thumbnail"),
        }
    }

    /// The camera a camera-state kind reports frames for.
    pub fn camera(self) -> Option<Camera> {
        match self {
            MessageKind::RoadCameraState => Some(Camera::Road),
            MessageKind::DriverCameraState => Some(Camera::Driver),
            MessageKind::WideRoadCameraState => Some(Camera::WideRoad),
            _ => None,
        }
    }

    /// The lowest possible kind, used to reset `current_which` on seek.
    pub fn min() -> MessageKind {
        MessageKind::InitData
    }

    fn from_capnp_which(which: event::Which) -> MessageKind {
        match which {
            event::Which::InitData(_) => MessageKind::InitData,
            event::Which::Sentinel(_) => MessageKind::Sentinel,
            event::Which::CarParams(_) => MessageKind::CarParams,
            event::Which::Can(_) => MessageKind::Can,
            event::Which::RoadEncodeIdx(_) => MessageKind::RoadEncodeIdx,
            event::Which::DriverEncodeIdx(_) => MessageKind::DriverEncodeIdx,
            event::Which::WideRoadEncodeIdx(_) => MessageKind::WideRoadEncodeIdx,
            event::Which::RoadCameraState(_) => MessageKind::RoadCameraState,
            event::Which::DriverCameraState(_) => MessageKind::DriverCameraState,
            event::Which::WideRoadCameraState(_) => MessageKind::WideRoadCameraState,
            event::Which::CarState(_) => MessageKind::CarState,
            event::Which::ControlsState(_) => MessageKind::ControlsState,
            event::Which::Thumbnail(_) => MessageKind::Thumbnail,
        }
    }
}

/// A single timestamped message extracted from a log. Immutable once
/// constructed; shared across threads via `Arc`.
#[derive(Debug, Clone)]
pub struct Event {
    pub time: Nanos,
    pub which: MessageKind,
    /// Raw serialized capnp message, as read from the log file. Re-parsed
    /// on demand (e.g. to pull a `frame_id`) rather than kept decoded,
    /// matching the data model's `payload: bytes` field.
    pub payload: Arc<[u8]>,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.which) == (other.time, other.which)
    }
}
impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.time, self.which).cmp(&(other.time, other.which))
    }
}

impl Event {
    /// Parses the stored payload and extracts the `frame_id` for
    /// camera-state events. Returns `None` for any other kind, or if the
    /// payload fails to parse (which should not happen for a payload this
    /// `Event` already validated at construction time).
    pub fn frame_id(&self) -> Option<u32> {
        let message_reader = capnp::serialize::read_message(
            &mut &self.payload[..],
            capnp::message::ReaderOptions::new(),
        )
        .ok()?;
        let root = message_reader.get_root::<event::Reader>().ok()?;
        match root.which().ok()? {
            event::Which::RoadCameraState(Ok(f)) => Some(f.get_frame_id()),
            event::Which::DriverCameraState(Ok(f)) => Some(f.get_frame_id()),
            event::Which::WideRoadCameraState(Ok(f)) => Some(f.get_frame_id()),
            _ => None,
        }
    }

    pub fn from_reader(time: Nanos, reader: event::Reader, payload: Arc<[u8]>) -> Option<Event> {
        let which = MessageKind::from_capnp_which(reader.which().ok()?);
        Some(Event { time, which, payload })
    }

    /// Parses a `ControlsState` payload into the fields the Control Plane
    /// needs to derive an engagement transition or an alert snapshot.
    /// `None` for any other kind or on parse failure.
    pub fn controls_snapshot(&self) -> Option<ControlsSnapshot> {
        let message_reader = capnp::serialize::read_message(
            &mut &self.payload[..],
            capnp::message::ReaderOptions::new(),
        )
        .ok()?;
        let root = message_reader.get_root::<event::Reader>().ok()?;
        let event::Which::ControlsState(Ok(cs)) = root.which().ok()? else { return None };
        Some(ControlsSnapshot {
            enabled: cs.get_enabled(),
            alert_size: match cs.get_alert_size().ok()? {
                controls_state::AlertSize::None => AlertSize::None,
                controls_state::AlertSize::Small => AlertSize::Small,
                controls_state::AlertSize::Mid => AlertSize::Mid,
                controls_state::AlertSize::Full => AlertSize::Full,
            },
            alert_status: match cs.get_alert_status().ok()? {
                controls_state::AlertStatus::Normal => AlertStatus::Normal,
                controls_state::AlertStatus::UserPrompt => AlertStatus::UserPrompt,
                controls_state::AlertStatus::Critical => AlertStatus::Critical,
            },
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSize {
    None,
    Small,
    Mid,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertStatus {
    Normal,
    UserPrompt,
    Critical,
}

/// The fields the Control Plane needs out of a `ControlsState` event,
/// decoded once from raw capnp rather than kept around on `Event` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlsSnapshot {
    pub enabled: bool,
    pub alert_size: AlertSize,
    pub alert_status: AlertStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_time_then_which() {
        let a = Event { time: 10, which: MessageKind::CarState, payload: Arc::from(vec![]) };
        let b = Event { time: 10, which: MessageKind::ControlsState, payload: Arc::from(vec![]) };
        let c = Event { time: 11, which: MessageKind::InitData, payload: Arc::from(vec![]) };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn camera_kinds_map_to_cameras() {
        assert_eq!(MessageKind::RoadCameraState.camera(), Some(Camera::Road));
        assert_eq!(MessageKind::CarState.camera(), None);
    }

    #[test]
    fn encode_idx_kinds_have_no_socket() {
        assert_eq!(MessageKind::RoadEncodeIdx.socket_name(), None);
        assert_eq!(MessageKind::CarState.socket_name(), Some("carState"));
    }
}
