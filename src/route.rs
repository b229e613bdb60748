//! Route / segment-file data model.
//!
//! Fetching these files (from disk or a remote route catalog) is out of
//! scope; this module only describes what a segment's artifacts are named
//! and which fallback rules apply, so that `Segment`/`window` can reason
//! about residency without caring where the bytes actually come from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ReplayError, Result};

/// The up-to-five files making up one segment.
#[derive(Debug, Clone, Default)]
pub struct SegmentFiles {
    pub rlog: Option<PathBuf>,
    pub qlog: Option<PathBuf>,
    pub camera: Option<PathBuf>,
    pub qcamera: Option<PathBuf>,
    pub dcamera: Option<PathBuf>,
    pub wcamera: Option<PathBuf>,
}

impl SegmentFiles {
    /// Primary log preferred, falling back to qlog.
    pub fn log_path(&self) -> Option<&Path> {
        self.rlog.as_deref().or(self.qlog.as_deref())
    }

    /// Primary road video preferred, falling back to qcamera.
    pub fn road_path(&self) -> Option<&Path> {
        self.camera.as_deref().or(self.qcamera.as_deref())
    }

    pub fn driver_path(&self) -> Option<&Path> {
        self.dcamera.as_deref()
    }

    pub fn wide_road_path(&self) -> Option<&Path> {
        self.wcamera.as_deref()
    }

    /// Discovers a segment's files by convention inside `segment_dir`:
    /// `rlog.bz2`, `qlog.bz2`, `fcamera.hevc`, `qcamera.ts`, `dcamera.hevc`,
    /// `ecamera.hevc`. Missing files are simply absent, not an error -
    /// absence is resolved by the fallback rules above.
    pub fn discover(segment_dir: &Path) -> SegmentFiles {
        let present = |name: &str| -> Option<PathBuf> {
            let p = segment_dir.join(name);
            p.is_file().then_some(p)
        };
        SegmentFiles {
            rlog: present("rlog.bz2"),
            qlog: present("qlog.bz2"),
            camera: present("fcamera.hevc"),
            qcamera: present("qcamera.ts"),
            dcamera: present("dcamera.hevc"),
            wcamera: present("ecamera.hevc"),
        }
    }
}

/// A recorded driving session: an identifier plus an ordered, possibly
/// sparse, mapping from segment index to its files.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    segments: BTreeMap<u32, SegmentFiles>,
}

impl Route {
    pub fn new(name: impl Into<String>) -> Route {
        Route { name: name.into(), segments: BTreeMap::new() }
    }

    pub fn insert(&mut self, index: u32, files: SegmentFiles) {
        self.segments.insert(index, files);
    }

    pub fn segments(&self) -> &BTreeMap<u32, SegmentFiles> {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn first_segment(&self) -> Result<u32> {
        self.segments.keys().next().copied().ok_or(ReplayError::EmptyRoute)
    }

    pub fn files(&self, index: u32) -> Option<&SegmentFiles> {
        self.segments.get(&index)
    }

    pub fn contains(&self, index: i32) -> bool {
        u32::try_from(index).map(|i| self.segments.contains_key(&i)).unwrap_or(false)
    }

    /// The number of segments the route spans, counting from 0 through the
    /// highest segment index it names (segments may be sparse in between).
    pub fn segment_count(&self) -> u32 {
        self.segments.keys().next_back().map_or(0, |&last| last + 1)
    }

    /// Discovers segments by scanning `route_dir` for subdirectories named
    /// `<anything>--<index>`, the convention this family of tools writes
    /// (see the teacher's `segment_dir` naming).
    pub fn discover(route_dir: &Path, name: impl Into<String>) -> Result<Route> {
        let mut route = Route::new(name);
        if !route_dir.is_dir() {
            return Err(ReplayError::FileMissing(route_dir.to_path_buf()));
        }
        for entry in std::fs::read_dir(route_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name();
            let dir_name = dir_name.to_string_lossy();
            if let Some((_, idx_str)) = dir_name.rsplit_once("--") {
                if let Ok(idx) = idx_str.parse::<u32>() {
                    route.insert(idx, SegmentFiles::discover(&entry.path()));
                }
            }
        }
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_prefers_rlog() {
        let files = SegmentFiles {
            rlog: Some("rlog.bz2".into()),
            qlog: Some("qlog.bz2".into()),
            ..Default::default()
        };
        assert_eq!(files.log_path(), Some(Path::new("rlog.bz2")));
    }

    #[test]
    fn log_path_falls_back_to_qlog() {
        let files = SegmentFiles { qlog: Some("qlog.bz2".into()), ..Default::default() };
        assert_eq!(files.log_path(), Some(Path::new("qlog.bz2")));
    }

    #[test]
    fn road_path_prefers_camera_over_qcamera() {
        let files = SegmentFiles {
            camera: Some("fcamera.hevc".into()),
            qcamera: Some("qcamera.ts".into()),
            ..Default::default()
        };
        assert_eq!(files.road_path(), Some(Path::new("fcamera.hevc")));
    }

    #[test]
    fn empty_route_reports_no_first_segment() {
        let route = Route::new("test-route");
        assert!(route.first_segment().is_err());
    }

    #[test]
    fn contains_rejects_negative_index() {
        let mut route = Route::new("test-route");
        route.insert(0, SegmentFiles::default());
        assert!(route.contains(0));
        assert!(!route.contains(-1));
    }

    #[test]
    fn segment_count_spans_from_zero_through_the_highest_index() {
        let mut route = Route::new("test-route");
        assert_eq!(route.segment_count(), 0);
        route.insert(2, SegmentFiles::default());
        assert_eq!(route.segment_count(), 3);
    }
}
