use log::debug;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;

/// Joins a requested relative name onto a root directory.
///
/// Names are validated before they reach this point, so the result always
/// stays under `root`.
pub fn resolve(root: &Path, name: &str) -> PathBuf {
    root.join(name)
}

/// Reads a requested file from the server's input directory.
///
/// # Arguments
/// * `root` - The configured input path
/// * `name` - Relative filename as requested by the client
/// * `limit` - Largest file size, in bytes, that will be read
///
/// # Returns
/// The whole file contents, or the I/O error (`NotFound`, permission denied, is a directory...).
/// A file over `limit` is an `InvalidData` error, decided from its metadata before
/// anything is read.
pub async fn read_file(root: &Path, name: &str, limit: u64) -> io::Result<Vec<u8>> {
    let path = resolve(root, name);
    debug!("Reading file: {:?}", path);

    let file = fs::File::open(&path).await?;
    let size = file.metadata().await?.len();
    if size > limit {
        return Err(too_large(size, limit));
    }

    // the file may grow between the metadata call and the read
    let mut data = Vec::with_capacity(size as usize);
    file.take(limit + 1).read_to_end(&mut data).await?;
    if data.len() as u64 > limit {
        return Err(too_large(data.len() as u64, limit));
    }
    Ok(data)
}

fn too_large(size: u64, limit: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("file has {} bytes, the limit is {}", size, limit),
    )
}

/// Writes a received file below the client's output directory.
///
/// Intermediate directories are created as needed; an existing file is truncated.
///
/// # Arguments
/// * `root` - The configured output path
/// * `name` - Relative filename as requested from the server
/// * `data` - Decrypted file contents
///
/// # Returns
/// The path that was written
pub async fn write_file(root: &Path, name: &str, data: &[u8]) -> io::Result<PathBuf> {
    let path = resolve(root, name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    debug!("Writing {} bytes to {:?}", data.len(), path);
    fs::write(&path, data).await?;
    Ok(path)
}
