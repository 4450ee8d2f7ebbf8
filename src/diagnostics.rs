//! Diagnostic artifacts
//!
//! Intermediate images of a run, written under
//! `<root>/<yyyyMMdd_HHmmss>/{parts,pre}/<stage>_<yyyyMMdd_HHmmss_fff>_<seq>.png`.
//! Write failures are logged and never affect the run.

use chrono::{DateTime, Local};
use image::{GrayImage, ImageResult, RgbImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Artifact subdirectory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Masks and the overview
    Parts,
    /// Normalization stages
    Pre,
}

impl ArtifactKind {
    fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Parts => "parts",
            ArtifactKind::Pre => "pre",
        }
    }
}

/// Collects the artifacts of one run
#[derive(Debug, Default)]
pub struct DiagnosticsSink {
    run_dir: Option<PathBuf>,
    seq: usize,
    paths: Vec<PathBuf>,
}

impl DiagnosticsSink {
    /// Sink that writes nothing
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Sink for a run started at `started`. Falls back to a disabled sink
    /// when the run directory cannot be created.
    pub fn for_run(root: &Path, started: DateTime<Local>) -> Self {
        let run_dir = root.join(started.format("%Y%m%d_%H%M%S").to_string());
        for kind in [ArtifactKind::Parts, ArtifactKind::Pre] {
            if let Err(e) = std::fs::create_dir_all(run_dir.join(kind.dir_name())) {
                warn!("Diagnostics disabled, cannot create {}: {}", run_dir.display(), e);
                return Self::disabled();
            }
        }
        debug!("Diagnostics for this run in {}", run_dir.display());
        Self {
            run_dir: Some(run_dir),
            seq: 0,
            paths: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.run_dir.is_some()
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    fn write<F>(&mut self, path: PathBuf, save: F)
    where
        F: FnOnce(&Path) -> ImageResult<()>,
    {
        match save(&path) {
            Ok(()) => self.paths.push(path),
            Err(e) => warn!("Failed to write {}: {}", path.display(), e),
        }
    }

    fn next_path(&mut self, kind: ArtifactKind, stage: &str) -> Option<PathBuf> {
        let run_dir = self.run_dir.as_ref()?;
        self.seq += 1;
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        Some(
            run_dir
                .join(kind.dir_name())
                .join(format!("{stage}_{stamp}_{:03}.png", self.seq)),
        )
    }

    pub fn save_gray(&mut self, kind: ArtifactKind, stage: &str, image: &GrayImage) {
        if let Some(path) = self.next_path(kind, stage) {
            self.write(path, |p| image.save(p));
        }
    }

    pub fn save_rgb(&mut self, kind: ArtifactKind, stage: &str, image: &RgbImage) {
        if let Some(path) = self.next_path(kind, stage) {
            self.write(path, |p| image.save(p));
        }
    }

    /// Raw frame, named after the point of interest
    pub fn save_raw(&mut self, image: &RgbImage, point: (i32, i32)) {
        let Some(run_dir) = self.run_dir.as_ref() else {
            return;
        };
        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = run_dir.join(format!("raw_{stamp}_{}x{}.png", point.0, point.1));
        self.write(path, |p| image.save(p));
    }

    pub fn into_paths(self) -> Vec<PathBuf> {
        self.paths
    }
}
