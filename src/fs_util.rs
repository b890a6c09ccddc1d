use std::fs;
use std::io;
use std::path::Path;

use flate2::read::GzDecoder;
use md5::{Digest, Md5};
use tar::Archive;

use crate::error::RefgenError;

/// Hex MD5 digest of a file's contents.
pub fn file_md5(path: &Path) -> Result<String, RefgenError> {
    let mut file = fs::File::open(path)
        .map_err(|err| RefgenError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher).map_err(|err| RefgenError::Filesystem(err.to_string()))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Unpacks a gzip-compressed tarball into `target_dir`, creating it if
/// needed. Entries escaping the target are skipped by `tar`.
pub fn untar(archive_path: &Path, target_dir: &Path) -> Result<(), RefgenError> {
    let file = fs::File::open(archive_path).map_err(|err| {
        RefgenError::Filesystem(format!("open archive {}: {err}", archive_path.display()))
    })?;
    fs::create_dir_all(target_dir).map_err(|err| RefgenError::Filesystem(err.to_string()))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(target_dir).map_err(|err| {
        RefgenError::Filesystem(format!("extract {}: {err}", archive_path.display()))
    })?;
    Ok(())
}

/// Removes a file or directory tree, ignoring a missing target.
pub fn remove_path(path: &Path) -> Result<(), RefgenError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RefgenError::Filesystem(format!(
            "remove {}: {err}",
            path.display()
        ))),
    }
}
