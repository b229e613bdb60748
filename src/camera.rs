//! Resolves a `frame_id` to a decoded RGB frame across segment boundaries
//! and republishes it over a bounded, per-camera queue, one worker thread
//! per camera stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use crate::frame_reader::RgbFrame;
use crate::types::{Camera, UI_BUF_COUNT};
use crate::window::SegmentRegistry;

/// Both the bounded-push timeout and the worker's idle poll interval.
const PUSH_TIMEOUT: Duration = Duration::from_millis(20);

/// Where decoded frames end up. The real shared-memory/socket transport a
/// UI consumes is out of scope; `RingBufferTransport` stands in for it.
pub trait IpcTransport: Send + Sync {
    fn publish(&self, camera: Camera, frame_id: u32, frame: RgbFrame);
}

/// In-memory stand-in transport: keeps the last `UI_BUF_COUNT` frames
/// published per camera.
pub struct RingBufferTransport {
    buffers: [Mutex<VecDeque<(u32, RgbFrame)>>; 3],
}

impl RingBufferTransport {
    pub fn new() -> RingBufferTransport {
        RingBufferTransport { buffers: [Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new()), Mutex::new(VecDeque::new())] }
    }

    pub fn latest(&self, camera: Camera) -> Option<(u32, RgbFrame)> {
        self.buffers[camera.index()].lock().unwrap().back().cloned()
    }
}

impl Default for RingBufferTransport {
    fn default() -> Self {
        RingBufferTransport::new()
    }
}

impl IpcTransport for RingBufferTransport {
    fn publish(&self, camera: Camera, frame_id: u32, frame: RgbFrame) {
        let mut buf = self.buffers[camera.index()].lock().unwrap();
        buf.push_back((frame_id, frame));
        while buf.len() > UI_BUF_COUNT {
            buf.pop_front();
        }
    }
}

struct Request {
    frame_id: u32,
    segment_hint: i32,
}

struct CameraChannel {
    tx: Sender<Request>,
    worker: Option<JoinHandle<()>>,
    geometry: (u32, u32),
}

/// One bounded request queue and worker thread per active camera. `None`
/// for a camera means "not wanted at all"; `Some((w, h))` is the geometry
/// the IPC stream was (or should be) configured to advertise.
pub struct CameraServer {
    channels: [Option<CameraChannel>; 3],
    registry: Arc<SegmentRegistry>,
    transport: Arc<dyn IpcTransport>,
}

impl CameraServer {
    /// Spawns workers for every camera with a `Some` geometry in `cameras`.
    pub fn start(cameras: [Option<(u32, u32)>; 3], registry: Arc<SegmentRegistry>, transport: Arc<dyn IpcTransport>) -> CameraServer {
        let mut server = CameraServer { channels: [None, None, None], registry, transport };
        server.ensure(cameras);
        server
    }

    /// Requests that `camera` resolve and publish `frame_id`, searched
    /// first in `segment_hint` and then its immediate neighbors. Drops the
    /// request, rather than blocking forever, if the worker is still behind
    /// after `PUSH_TIMEOUT`.
    pub fn push(&self, camera: Camera, frame_id: u32, segment_hint: i32) {
        let Some(channel) = &self.channels[camera.index()] else { return };
        if channel.tx.send_timeout(Request { frame_id, segment_hint }, PUSH_TIMEOUT).is_err() {
            debug!(camera = camera.name(), frame_id, "dropped frame push, worker busy");
        }
    }

    /// The geometry `camera`'s worker is currently configured for, if running.
    pub fn configured_geometry(&self, camera: Camera) -> Option<(u32, u32)> {
        self.channels[camera.index()].as_ref().map(|c| c.geometry)
    }

    /// Reconfigures which cameras are running and at what geometry: tears
    /// down workers for cameras no longer wanted, or whose geometry
    /// changed, and starts fresh ones for newly wanted cameras. A camera
    /// already running at the requested geometry is untouched.
    pub fn ensure(&mut self, cameras: [Option<(u32, u32)>; 3]) {
        for cam in Camera::ALL {
            let wanted = cameras[cam.index()];
            let current = self.channels[cam.index()].as_ref().map(|c| c.geometry);
            if current == wanted {
                continue;
            }
            self.channels[cam.index()] = None;
            if let Some(geometry) = wanted {
                let (tx, rx) = bounded::<Request>(UI_BUF_COUNT);
                let registry = Arc::clone(&self.registry);
                let transport = Arc::clone(&self.transport);
                let worker = std::thread::spawn(move || camera_worker(cam, geometry, rx, registry, transport));
                self.channels[cam.index()] = Some(CameraChannel { tx, worker: Some(worker), geometry });
            }
        }
    }
}

impl Drop for CameraServer {
    fn drop(&mut self) {
        for slot in self.channels.iter_mut() {
            if let Some(channel) = slot.take() {
                drop(channel.tx);
                if let Some(handle) = channel.worker {
                    let _ = handle.join();
                }
            }
        }
    }
}

fn camera_worker(camera: Camera, geometry: (u32, u32), rx: Receiver<Request>, registry: Arc<SegmentRegistry>, transport: Arc<dyn IpcTransport>) {
    loop {
        match rx.recv_timeout(PUSH_TIMEOUT) {
            Ok(request) => resolve_and_publish(camera, geometry, &request, &registry, &transport),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn resolve_and_publish(camera: Camera, geometry: (u32, u32), request: &Request, registry: &SegmentRegistry, transport: &Arc<dyn IpcTransport>) {
    for candidate in [request.segment_hint, request.segment_hint - 1, request.segment_hint + 1] {
        if candidate < 0 {
            continue;
        }
        let Some(segment) = registry.get(candidate as u32) else { continue };
        let Some(&local_index) = segment.log.encoder_index[camera.index()].get(&request.frame_id) else { continue };
        let Some(reader) = segment.frame_reader(camera) else { continue };
        if (reader.width, reader.height) != geometry {
            debug!(
                camera = camera.name(),
                frame_id = request.frame_id,
                expected = ?geometry,
                got = ?(reader.width, reader.height),
                "dropped frame, geometry mismatch"
            );
            return;
        }
        if let Some(rgb) = reader.get(local_index) {
            transport.publish(camera, request.frame_id, rgb);
            return;
        }
    }
    debug!(camera = camera.name(), frame_id = request.frame_id, "frame not found in resident segments");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_keeps_only_the_latest_ui_buf_count_frames() {
        let transport = RingBufferTransport::new();
        for i in 0..(UI_BUF_COUNT as u32 + 2) {
            transport.publish(Camera::Road, i, Arc::from(vec![0u8; 1]));
        }
        let (latest_id, _) = transport.latest(Camera::Road).unwrap();
        assert_eq!(latest_id, UI_BUF_COUNT as u32 + 1);
    }

    #[test]
    fn push_to_unstarted_camera_is_a_silent_no_op() {
        let registry = Arc::new(SegmentRegistry::new());
        let transport: Arc<dyn IpcTransport> = Arc::new(RingBufferTransport::new());
        let server = CameraServer::start([Some((640, 480)), None, None], registry, transport);
        server.push(Camera::Driver, 0, 0);
    }

    #[test]
    fn ensure_leaves_an_unchanged_camera_running() {
        let registry = Arc::new(SegmentRegistry::new());
        let transport: Arc<dyn IpcTransport> = Arc::new(RingBufferTransport::new());
        let mut server = CameraServer::start([Some((640, 480)), None, None], registry, transport);
        server.ensure([Some((640, 480)), None, None]);
        assert!(server.channels[Camera::Road.index()].is_some());
    }

    #[test]
    fn ensure_restarts_a_camera_whose_geometry_changed() {
        let registry = Arc::new(SegmentRegistry::new());
        let transport: Arc<dyn IpcTransport> = Arc::new(RingBufferTransport::new());
        let mut server = CameraServer::start([Some((640, 480)), None, None], registry, transport);
        server.ensure([Some((1280, 720)), None, None]);
        assert_eq!(server.channels[Camera::Road.index()].as_ref().unwrap().geometry, (1280, 720));
    }
}
