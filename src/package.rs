//! Packaging: bundle every segment of a project into one deflate-compressed zip.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;
use crate::naming;

/// Archive the regular files in `segment_dir` into `<archive_dir>/<project>_final_version.zip`.
///
/// Entries are stored flat and in file-name order. The archive is written under a temporary
/// name and renamed into place, so the final path either holds a complete archive or nothing.
pub async fn package(
    segment_dir: &Path,
    archive_dir: &Path,
    project_name: &str,
) -> Result<PathBuf, PipelineError> {
    info!(segment_dir = %segment_dir.display(), "[PIPELINE][PACKAGE] Creating archive");

    let entries = list_segments(segment_dir).await?;
    if entries.is_empty() {
        return Err(PipelineError::Editing(format!(
            "no segments to package in {}",
            segment_dir.display()
        )));
    }

    tokio::fs::create_dir_all(archive_dir).await.map_err(|e| {
        PipelineError::Unexpected(format!(
            "could not create archive directory {}: {e}",
            archive_dir.display()
        ))
    })?;

    let archive_path = naming::archive_path(archive_dir, project_name);
    let target = archive_path.clone();
    let count = entries.len();

    tokio::task::spawn_blocking(move || write_archive(&entries, &target))
        .await
        .map_err(|e| PipelineError::Editing(format!("archive task failed: {e}")))?
        .map_err(|e| {
            error!(error = %e, path = %archive_path.display(), "[PIPELINE][PACKAGE] Archive failed");
            PipelineError::Editing(format!(
                "could not write archive {}: {e}",
                archive_path.display()
            ))
        })?;

    info!(path = %archive_path.display(), entries = count, "[PIPELINE][PACKAGE] Archive created");
    Ok(archive_path)
}

/// Regular files directly under `dir`, sorted by name.
async fn list_segments(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let read_err = |e: io::Error| {
        PipelineError::Editing(format!("could not read segment directory {}: {e}", dir.display()))
    };

    let mut reader = tokio::fs::read_dir(dir).await.map_err(read_err)?;
    let mut files = Vec::new();
    while let Some(entry) = reader.next_entry().await.map_err(read_err)? {
        if entry.file_type().await.map_err(read_err)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn write_archive(entries: &[PathBuf], target: &Path) -> io::Result<()> {
    let partial = target.with_extension("zip.partial");
    let result = write_entries(entries, &partial).and_then(|()| std::fs::rename(&partial, target));
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn write_entries(entries: &[PathBuf], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in entries {
        let name = entry
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("non UTF-8 file name: {}", entry.display()),
                )
            })?;
        debug!(entry = name, "Adding archive entry");
        zip.start_file(name, options)?;
        let mut source = File::open(entry)?;
        io::copy(&mut source, &mut zip)?;
    }

    zip.finish()?;
    Ok(())
}
