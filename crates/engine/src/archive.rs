//! Zip archive writer and extractor for staged backup trees.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{EngineError, Result};

/// Compress every file under `staging_dir` into `archive_path` with maximum
/// deflate compression. Entry names are relative to `staging_dir`.
///
/// Returns the archive size in bytes once the file is flushed and closed.
/// On failure the partial archive is removed; `staging_dir` is left alone.
pub fn compress(staging_dir: &Path, archive_path: &Path) -> Result<u64> {
    match write_archive(staging_dir, archive_path) {
        Ok(size) => Ok(size),
        Err(e) => {
            if let Err(rm) = fs::remove_file(archive_path) {
                if rm.kind() != io::ErrorKind::NotFound {
                    warn!(path = %archive_path.display(), error = %rm, "failed to remove partial archive");
                }
            }
            Err(e)
        }
    }
}

fn write_archive(staging_dir: &Path, archive_path: &Path) -> Result<u64> {
    let file = File::create(archive_path).map_err(EngineError::io("create archive", archive_path))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let file_options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));
    let dir_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    for entry in WalkDir::new(staging_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| EngineError::Io {
            action: "walk staging directory",
            path: staging_dir.to_path_buf(),
            source: e.into(),
        })?;
        let rel = entry
            .path()
            .strip_prefix(staging_dir)
            .map_err(|_| EngineError::InvalidArchive(format!("{} escapes staging", entry.path().display())))?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = entry_name(rel);
        if entry.file_type().is_dir() {
            zip.add_directory(name, dir_options)?;
            continue;
        }
        debug!(entry = %name, "adding archive entry");
        zip.start_file(name, file_options)?;
        let mut source = File::open(entry.path()).map_err(EngineError::io("open staged file", entry.path()))?;
        io::copy(&mut source, &mut zip).map_err(EngineError::io("compress staged file", entry.path()))?;
    }

    let writer = zip.finish()?;
    let file = writer
        .into_inner()
        .map_err(|e| EngineError::io("flush archive", archive_path)(e.into_error()))?;
    file.sync_all().map_err(EngineError::io("sync archive", archive_path))?;
    drop(file);

    let size = fs::metadata(archive_path)
        .map_err(EngineError::io("stat archive", archive_path))?
        .len();
    Ok(size)
}

/// Forward-slash separated entry name, independent of the host platform.
fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Extract `archive_path` into `dest`. Entries whose names would escape
/// `dest` are skipped. Returns the number of files written.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path).map_err(EngineError::io("open archive", archive_path))?;
    let mut archive = ZipArchive::new(file)?;
    fs::create_dir_all(dest).map_err(EngineError::io("create extraction directory", dest))?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            warn!(entry = %entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        let out = dest.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(EngineError::io("create directory", &out))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(EngineError::io("create directory", parent))?;
        }
        let mut target = File::create(&out).map_err(EngineError::io("create file", &out))?;
        io::copy(&mut entry, &mut target).map_err(EngineError::io("extract file", &out))?;
        written += 1;
    }
    Ok(written)
}
