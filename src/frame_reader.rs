// Copyright (c) 2023 Angus Gratton
// SPDX-License-Identifier: GPL-2.0-or-later

//! Opens one encoded video file and serves any frame, by index, as a
//! decoded RGB8 buffer.
//!
//! A background thread owns the actual ffmpeg decoder and a swscale
//! context; `get()` only ever touches a small `Mutex<State>` plus two
//! condition variables (decode-request, frame-ready).

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ffmpeg::{decoder, format, frame, media, software::scaling, Packet};
use tracing::{debug, instrument, warn};

/// Decoded frames kept around for locality of sequential access. The reader
/// is not required to cache every frame.
const CACHE_CAPACITY: usize = 64;

/// How long `get()` waits for the worker before giving up and returning
/// `None`. Chosen generously; real decode of one HEVC frame is far faster.
const GET_TIMEOUT: Duration = Duration::from_secs(5);

pub type RgbFrame = Arc<[u8]>;

struct State {
    cache: HashMap<u32, RgbFrame>,
    order: VecDeque<u32>,
    /// The index `get()` is currently waiting on, if any.
    want: Option<u32>,
    exit: bool,
    /// Set once the decoder hits an unrecoverable error; `get()` then
    /// always returns `None`.
    failed: bool,
}

struct Shared {
    state: Mutex<State>,
    decode_cv: Condvar,
    ready_cv: Condvar,
}

pub struct FrameReader {
    pub width: u32,
    pub height: u32,
    pub valid: bool,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl FrameReader {
    /// Probes `path` for geometry and spawns the decode worker. `valid` is
    /// `false` (and `get` always returns `None`) if the file can't even be
    /// opened or has no video stream.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn open(path: &Path) -> FrameReader {
        let (width, height) = match probe_geometry(path) {
            Ok(dims) => dims,
            Err(e) => {
                warn!(error = %e, "failed to open video file");
                return FrameReader {
                    width: 0,
                    height: 0,
                    valid: false,
                    shared: Arc::new(Shared {
                        state: Mutex::new(State {
                            cache: HashMap::new(),
                            order: VecDeque::new(),
                            want: None,
                            exit: true,
                            failed: true,
                        }),
                        decode_cv: Condvar::new(),
                        ready_cv: Condvar::new(),
                    }),
                    worker: None,
                };
            }
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                cache: HashMap::new(),
                order: VecDeque::new(),
                want: None,
                exit: false,
                failed: false,
            }),
            decode_cv: Condvar::new(),
            ready_cv: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let path = path.to_path_buf();
            std::thread::spawn(move || decode_worker(path, shared))
        };

        FrameReader { width, height, valid: true, shared, worker: Some(worker) }
    }

    pub fn rgb_size(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    /// Returns the decoded RGB8 frame at `index`, decoding (or seeking and
    /// re-decoding) as needed. `None` only on definitive decode failure or
    /// an index beyond the end of the stream.
    pub fn get(&self, index: u32) -> Option<RgbFrame> {
        if !self.valid {
            return None;
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(frame) = state.cache.get(&index) {
            return Some(Arc::clone(frame));
        }
        if state.failed {
            return None;
        }
        state.want = Some(index);
        self.shared.decode_cv.notify_one();

        loop {
            if let Some(frame) = state.cache.get(&index) {
                return Some(Arc::clone(frame));
            }
            if state.failed {
                return None;
            }
            let (guard, timeout) =
                self.shared.ready_cv.wait_timeout(state, GET_TIMEOUT).unwrap();
            state = guard;
            if timeout.timed_out() {
                return state.cache.get(&index).map(Arc::clone);
            }
        }
    }
}

impl Drop for FrameReader {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.exit = true;
        }
        self.shared.decode_cv.notify_all();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

fn probe_geometry(path: &Path) -> ffmpeg::Result<(u32, u32)> {
    let ictx = format::input(path)?;
    let stream = ictx.streams().best(media::Type::Video).ok_or(ffmpeg::Error::StreamNotFound)?;
    let decoder = stream.decoder()?.open()?.video()?;
    Ok((decoder.width(), decoder.height()))
}

/// Owns the real ffmpeg decode pipeline; lives entirely on the worker
/// thread, so none of its raw-pointer-backed types need to be `Send`.
struct Decode {
    ictx: format::context::Input,
    decoder: decoder::Video,
    scaler: scaling::Context,
    video_stream_index: usize,
    /// `pts_for_index[i]` records the pts of the `i`-th frame in
    /// presentation order, as soon as it's been decoded once. Used to
    /// re-locate an index after a seek, and to decide where to seek to
    /// service a backward `get`.
    pts_for_index: Vec<i64>,
    next_index: u32,
}

impl Decode {
    fn open(path: &Path) -> ffmpeg::Result<Decode> {
        let ictx = format::input(path)?;
        let stream = ictx.streams().best(media::Type::Video).ok_or(ffmpeg::Error::StreamNotFound)?;
        let video_stream_index = stream.index();
        let decoder = stream.decoder()?.open()?.video()?;
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            format::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )?;
        Ok(Decode {
            ictx,
            decoder,
            scaler,
            video_stream_index,
            pts_for_index: Vec::new(),
            next_index: 0,
        })
    }

    fn to_rgb(&mut self, frame: &frame::Video) -> ffmpeg::Result<RgbFrame> {
        let mut rgb = frame::Video::empty();
        self.scaler.run(frame, &mut rgb)?;
        let width = rgb.width() as usize;
        let height = rgb.height() as usize;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut out = Vec::with_capacity(width * height * 3);
        for row in 0..height {
            let start = row * stride;
            out.extend_from_slice(&data[start..start + width * 3]);
        }
        Ok(Arc::from(out))
    }

    /// Decodes forward, recording each produced frame's pts and storing it
    /// under its sequential index, until `target` has been produced (or
    /// the stream ends). Calls `on_frame` for every frame decoded so the
    /// caller can populate the shared cache incrementally.
    fn decode_until(
        &mut self,
        target: u32,
        mut on_frame: impl FnMut(u32, RgbFrame),
    ) -> ffmpeg::Result<bool> {
        let mut produced_target = false;
        let mut packet = Packet::empty();
        loop {
            if self.next_index > target {
                produced_target = true;
                break;
            }
            match packet.read(&mut self.ictx) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    self.decoder.send_eof()?;
                    let mut frame = frame::Video::empty();
                    while self.decoder.receive_frame(&mut frame).is_ok() {
                        self.record_frame(&frame, &mut on_frame)?;
                    }
                    produced_target = self.next_index > target;
                    break;
                }
                Err(e) => return Err(e),
            }
            if packet.stream() != self.video_stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            let mut frame = frame::Video::empty();
            while self.decoder.receive_frame(&mut frame).is_ok() {
                self.record_frame(&frame, &mut on_frame)?;
                if self.next_index > target {
                    produced_target = true;
                }
            }
        }
        Ok(produced_target)
    }

    fn record_frame(
        &mut self,
        frame: &frame::Video,
        on_frame: &mut impl FnMut(u32, RgbFrame),
    ) -> ffmpeg::Result<()> {
        let pts = frame.pts().unwrap_or(self.pts_for_index.last().copied().unwrap_or(0) + 1);
        let index = self.next_index;
        if index as usize == self.pts_for_index.len() {
            self.pts_for_index.push(pts);
        }
        let rgb = self.to_rgb(frame)?;
        on_frame(index, rgb);
        self.next_index += 1;
        Ok(())
    }

    /// Seeks to the nearest keyframe at or before the pts recorded for
    /// `target`, flushes the decoder, and resets `next_index` to the
    /// earliest index whose pts we can no longer distinguish from the seek
    /// target (found by binary search over the monotonic pts history).
    fn seek_before(&mut self, target: u32) -> ffmpeg::Result<()> {
        let target_pts = self.pts_for_index[target as usize];
        self.ictx.seek(target_pts, ..target_pts)?;
        self.decoder.flush();
        let resume_index = match self.pts_for_index.binary_search(&target_pts) {
            Ok(i) | Err(i) => i,
        };
        self.next_index = resume_index as u32;
        Ok(())
    }
}

fn decode_worker(path: PathBuf, shared: Arc<Shared>) {
    let mut decode = match Decode::open(&path) {
        Ok(d) => d,
        Err(e) => {
            warn!(error = %e, "decoder failed to open video file");
            let mut state = shared.state.lock().unwrap();
            state.failed = true;
            shared.ready_cv.notify_all();
            return;
        }
    };

    loop {
        let target = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.exit {
                    return;
                }
                match state.want {
                    Some(target) if !state.cache.contains_key(&target) => break target,
                    _ => {
                        state = shared.decode_cv.wait(state).unwrap();
                    }
                }
            }
        };

        if target < decode.next_index
            && (target as usize) < decode.pts_for_index.len()
            && decode.seek_before(target).is_err()
        {
            warn!("seek failed mid-decode");
            let mut state = shared.state.lock().unwrap();
            state.failed = true;
            shared.ready_cv.notify_all();
            return;
        }

        let result = decode.decode_until(target, |index, rgb| {
            let mut state = shared.state.lock().unwrap();
            state.cache.insert(index, rgb);
            state.order.push_back(index);
            while state.order.len() > CACHE_CAPACITY {
                if let Some(old) = state.order.pop_front() {
                    state.cache.remove(&old);
                }
            }
            drop(state);
            shared.ready_cv.notify_all();
        });

        match result {
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "decode loop ended");
                let mut state = shared.state.lock().unwrap();
                state.failed = true;
                shared.ready_cv.notify_all();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_invalid() {
        let reader = FrameReader::open(Path::new("/nonexistent/fcamera.hevc"));
        assert!(!reader.valid);
        assert_eq!(reader.get(0), None);
    }
}
