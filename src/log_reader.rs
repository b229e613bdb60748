//! Parses one segment's log file into a time-ordered event vector plus a
//! per-camera frame-id index.
//!
//! Wire format mirrors what `RLogWriter`/`QlogWriter`-style writers in this
//! family of tools produce: a bzip2-compressed stream of serialized capnp
//! `Event` messages (schema/log.capnp).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read as _;
use std::path::Path;
use std::sync::Arc;

use bzip2::read::BzDecoder;
use capnp::message::ReaderOptions;
use capnp::serialize;
use tracing::{debug, instrument, warn};

use crate::log_capnp::event;
use crate::types::{Camera, Event, MessageKind, Nanos};

/// `frame_id -> segment_local_index` for one camera.
pub type EncoderIndex = HashMap<u32, u32>;

#[derive(Debug, Default)]
pub struct LogReader {
    /// Sorted by `(time, which)`. Encode-index events are not retained
    /// here; they only ever populate `encoder_index` (see module docs).
    pub events: Vec<Event>,
    pub encoder_index: [EncoderIndex; 3],
    /// Whether a well-formed log was found and at least partially parsed.
    pub valid: bool,
}

impl LogReader {
    /// Parses `path`, tolerating truncation: stops cleanly at the first
    /// record that fails to deserialize rather than treating it as fatal.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> LogReader {
        let mut reader = LogReader::default();

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "failed to open log file");
                return reader;
            }
        };
        let mut decoder = BzDecoder::new(file);
        let mut buf = Vec::new();
        if let Err(e) = decoder.read_to_end(&mut buf) {
            warn!(error = %e, "failed to decompress log file");
            return reader;
        }

        let mut cursor = &buf[..];
        let mut parsed = 0usize;
        loop {
            let before_len = cursor.len();
            if before_len == 0 {
                break;
            }
            let message_reader =
                match serialize::read_message(&mut cursor, ReaderOptions::new()) {
                    Ok(m) => m,
                    Err(e) => {
                        if parsed == 0 {
                            warn!(error = %e, "log file contained no parseable events");
                        } else {
                            debug!(error = %e, parsed, "stopping at first unparseable record");
                        }
                        break;
                    }
                };
            let consumed = before_len - cursor.len();
            let raw = &buf[buf.len() - before_len..buf.len() - before_len + consumed];

            match message_reader.get_root::<event::Reader>() {
                Ok(event_reader) => {
                    reader.ingest(event_reader, raw);
                    parsed += 1;
                }
                Err(e) => {
                    debug!(error = %e, parsed, "stopping at malformed event root");
                    break;
                }
            }
        }

        reader.events.sort();
        reader.valid = parsed > 0;
        debug!(events = reader.events.len(), parsed, "log parsed");
        reader
    }

    fn ingest(&mut self, event_reader: event::Reader, raw: &[u8]) {
        let time = event_reader.get_log_mono_time();
        let which = match event_reader.which() {
            Ok(w) => w,
            Err(_) => return,
        };

        if let event::Which::RoadEncodeIdx(Ok(idx)) = which {
            self.encoder_index[Camera::Road.index()]
                .insert(idx.get_frame_id(), idx.get_segment_id());
            return;
        }
        if let event::Which::DriverEncodeIdx(Ok(idx)) = which {
            self.encoder_index[Camera::Driver.index()]
                .insert(idx.get_frame_id(), idx.get_segment_id());
            return;
        }
        if let event::Which::WideRoadEncodeIdx(Ok(idx)) = which {
            self.encoder_index[Camera::WideRoad.index()]
                .insert(idx.get_frame_id(), idx.get_segment_id());
            return;
        }

        let payload: Arc<[u8]> = Arc::from(raw.to_vec());
        if let Some(event) = Event::from_reader(time as Nanos, event_reader, payload) {
            self.events.push(event);
        }
    }

    /// The route start time, i.e. the time of the leading `InitData` event,
    /// if present.
    pub fn init_time(&self) -> Option<Nanos> {
        self.events.first().filter(|e| e.which == MessageKind::InitData).map(|e| e.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_capnp::sentinel::SentinelType;
    use bzip2::write::BzEncoder;
    use bzip2::Compression;
    use std::io::Write as _;

    fn write_event(writer: &mut BzEncoder<Vec<u8>>, time: u64, fill: impl FnOnce(event::Builder)) {
        let mut message = capnp::message::Builder::new_default();
        let mut root = message.init_root::<event::Builder>();
        root.set_log_mono_time(time);
        root.set_valid(true);
        fill(root);
        serialize::write_message(&mut *writer, &message).unwrap();
    }

    fn sample_log() -> Vec<u8> {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
        write_event(&mut encoder, 0, |e| {
            e.init_init_data();
        });
        write_event(&mut encoder, 1, |e| {
            e.init_sentinel().set_type(SentinelType::StartOfSegment);
        });
        write_event(&mut encoder, 2, |e| {
            let mut idx = e.init_road_encode_idx();
            idx.set_frame_id(42);
            idx.set_segment_id(7);
        });
        write_event(&mut encoder, 3, |e| {
            let mut cs = e.init_controls_state();
            cs.set_enabled(true);
        });
        encoder.finish().unwrap()
    }

    #[test]
    fn parses_events_and_builds_encoder_index() {
        let bytes = sample_log();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rlog.bz2");
        std::fs::write(&path, bytes).unwrap();

        let reader = LogReader::open(&path);
        assert!(reader.valid);
        // encode-idx event is not retained in `events`
        assert_eq!(reader.events.len(), 3);
        assert_eq!(reader.events[0].which, MessageKind::InitData);
        assert_eq!(reader.init_time(), Some(0));
        assert_eq!(reader.encoder_index[Camera::Road.index()].get(&42), Some(&7));
    }

    #[test]
    fn missing_file_is_contained_not_fatal() {
        let reader = LogReader::open(Path::new("/nonexistent/rlog.bz2"));
        assert!(!reader.valid);
        assert!(reader.events.is_empty());
    }

    #[test]
    fn truncated_file_stops_cleanly() {
        let mut bytes = sample_log();
        bytes.truncate(bytes.len() / 2);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rlog.bz2");
        std::fs::write(&path, bytes).unwrap();

        // bz2 decompression of a truncated stream either fails outright or
        // yields a truncated capnp stream; either way `open` must not panic.
        let reader = LogReader::open(&path);
        assert!(reader.events.len() <= 3);
    }
}
