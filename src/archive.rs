//! gzip-compressed tar helpers

use crate::error::{Result, SomError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Pack the contents of a directory (not the directory itself) into a tar.gz writer
pub fn pack_dir<W: Write>(dir: &Path, writer: W) -> Result<W> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| SomError::Io(e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| SomError::Internal(e.to_string()))?;
        if entry.file_type().is_dir() {
            builder.append_dir(rel, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), rel)?;
        }
    }
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Pack a directory into an in-memory tar.gz
pub fn pack_dir_to_vec(dir: &Path) -> Result<Vec<u8>> {
    pack_dir(dir, Vec::new())
}

/// Write the given files flat into a tar.gz archive at `out`
pub fn pack_files(files: &[PathBuf], out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let encoder = GzEncoder::new(File::create(out)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for file in files {
        let name = file
            .file_name()
            .ok_or_else(|| SomError::Internal(format!("not a file: {}", file.display())))?;
        builder.append_path_with_name(file, name)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Unpack a tar.gz archive into `dest`, returning the regular files written
pub fn unpack(archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dest)?;
    let mut tar = tar::Archive::new(GzDecoder::new(File::open(archive)?));
    tar.unpack(dest)?;
    let files = WalkDir::new(dest)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    Ok(files)
}
