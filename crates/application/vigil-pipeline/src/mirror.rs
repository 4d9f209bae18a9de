//! Copies a source tree into the run's destination.

use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use filetime::FileTime;
use rayon::prelude::*;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorStats {
    pub files: u64,
    pub bytes: u64,
}

/// Source tree to copy, minus build outputs, tool caches and explicitly
/// excluded files.
#[derive(Debug, Clone)]
pub struct Mirror {
    source: Utf8PathBuf,
    excluded_files: Vec<Utf8PathBuf>,
}

impl Mirror {
    pub fn new(source: impl Into<Utf8PathBuf>) -> Self {
        Self {
            source: source.into(),
            excluded_files: Vec::new(),
        }
    }

    /// Excludes one file, given relative to the source root or absolute.
    pub fn exclude_file(mut self, path: impl AsRef<Utf8Path>) -> Self {
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_owned()
        } else {
            self.source.join(path)
        };
        self.excluded_files.push(path);
        self
    }

    fn keep(&self, entry: &DirEntry, destination: &Utf8Path) -> bool {
        let path = entry.path();
        if entry.depth() > 0 && path.starts_with(destination) {
            return false;
        }
        if entry.file_type().is_dir() {
            let name = entry.file_name().to_string_lossy();
            return entry.depth() == 0 || !vigil_config::is_excluded_dir(&name);
        }
        !self
            .excluded_files
            .iter()
            .any(|excluded| path == excluded.as_std_path())
    }

    /// Copies every kept file into `destination`, preserving modification
    /// times. Files already in the destination are overwritten.
    pub fn copy_to(&self, destination: &Utf8Path) -> io::Result<MirrorStats> {
        fs::create_dir_all(destination)?;
        let destination = destination.canonicalize_utf8()?;
        let source = self.source.canonicalize_utf8()?;
        let this = Self {
            source: source.clone(),
            excluded_files: self
                .excluded_files
                .iter()
                .map(|p| p.canonicalize_utf8().unwrap_or_else(|_| p.clone()))
                .collect(),
        };

        let mut files = Vec::new();
        for entry in WalkDir::new(&source)
            .into_iter()
            .filter_entry(|e| this.keep(e, &destination))
        {
            let entry = entry.map_err(io::Error::from)?;
            let rel = entry
                .path()
                .strip_prefix(&source)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let rel = Utf8Path::from_path(rel).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non UTF-8 path {}", entry.path().display()),
                )
            })?;
            if entry.file_type().is_dir() {
                fs::create_dir_all(destination.join(rel))?;
            } else if entry.file_type().is_file() {
                files.push(rel.to_owned());
            }
        }

        let bytes = files
            .par_iter()
            .map(|rel| copy_file(&source.join(rel), &destination.join(rel)))
            .collect::<io::Result<Vec<u64>>>()?;

        let stats = MirrorStats {
            files: bytes.len() as u64,
            bytes: bytes.iter().sum(),
        };
        debug!(
            "mirrored {} file(s), {} byte(s) from {} to {}",
            stats.files, stats.bytes, source, destination
        );
        Ok(stats)
    }
}

fn copy_file(from: &Utf8Path, to: &Utf8Path) -> io::Result<u64> {
    let len = fs::copy(from, to)?;
    let meta = fs::metadata(from)?;
    filetime::set_file_mtime(to, FileTime::from_last_modification_time(&meta))?;
    Ok(len)
}
