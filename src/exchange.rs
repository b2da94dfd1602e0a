//! File exchange, run after a successful handshake.
//!
//! The client sends one encrypted frame holding the `,`-joined list of names.
//! The server answers every name, in request order, with exactly one encrypted
//! frame whose plaintext is `status (1 byte) || body`:
//!
//! ```text
//! 0x01 || file bytes   the file was read
//! 0x00                 the file is missing, unreadable or the name was refused
//! ```
//!
//! The client therefore never waits for a frame that will not come.

use indicatif::ProgressBar;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::bytes::{read_file, write_file};
use crate::cryptography::{decrypt, encrypt, DerivedKey};
use crate::error::{ProtocolError, SessionError};
use crate::networking::Connection;
use crate::utils::{validate_file_name, FileList};
use crate::{MAX_FRAME_SIZE, NONCE_SIZE, TAG_SIZE};

pub const STATUS_MISSING: u8 = 0x00;
pub const STATUS_PRESENT: u8 = 0x01;

/// Largest file that still fits one frame once status byte, nonce and tag are added.
pub const MAX_FILE_SIZE: usize = MAX_FRAME_SIZE - 1 - NONCE_SIZE - TAG_SIZE;

/// The server's answer for one requested name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileResponse {
    Present(Vec<u8>),
    Missing,
}

impl FileResponse {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            FileResponse::Present(data) => {
                let mut plaintext = Vec::with_capacity(1 + data.len());
                plaintext.push(STATUS_PRESENT);
                plaintext.extend_from_slice(data);
                plaintext
            }
            FileResponse::Missing => vec![STATUS_MISSING],
        }
    }

    pub fn decode(mut plaintext: Vec<u8>) -> Result<FileResponse, ProtocolError> {
        let status = *plaintext.first().ok_or(ProtocolError::EmptyResponse)?;
        match status {
            STATUS_PRESENT => {
                plaintext.remove(0);
                Ok(FileResponse::Present(plaintext))
            }
            STATUS_MISSING if plaintext.len() == 1 => Ok(FileResponse::Missing),
            other => Err(ProtocolError::UnknownStatus(other)),
        }
    }
}

/// What the client ended up with.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExchangeReport {
    /// Paths written under the output directory, in request order.
    pub received: Vec<PathBuf>,
    /// Requested names the server answered as missing, in request order.
    pub missing: Vec<String>,
}

/// What the server sent.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeReport {
    pub sent: usize,
    pub missing: usize,
}

// ============================================================================
// Client side
// ============================================================================

pub async fn send_file_list<S>(
    conn: &mut Connection<S>,
    key: &DerivedKey,
    files: &FileList,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    info!("sending the following list of files: {:?}", files.names());
    let encrypted = encrypt(files.join().as_bytes(), key)?;
    conn.write_frame(&encrypted).await
}

pub async fn receive_file<S>(
    conn: &mut Connection<S>,
    key: &DerivedKey,
) -> Result<FileResponse, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encrypted = conn.read_frame().await?;
    let plaintext = decrypt(&encrypted, key)?;
    Ok(FileResponse::decode(plaintext)?)
}

/// Sends the request list, then reads one response per requested name and writes
/// the present ones below `output_path`.
///
/// Missing files are logged and reported, not treated as a session failure.
pub async fn fetch_files<S>(
    conn: &mut Connection<S>,
    key: &DerivedKey,
    files: &FileList,
    output_path: &Path,
    progress: &ProgressBar,
) -> Result<ExchangeReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    send_file_list(conn, key, files).await?;

    let mut report = ExchangeReport::default();
    for name in files.names() {
        progress.set_message(name.clone());

        match receive_file(conn, key).await? {
            FileResponse::Present(data) => {
                debug!("received file {:?} of size {} bytes", name, data.len());
                let path = write_file(output_path, name, &data).await.map_err(|source| {
                    SessionError::FileSystem {
                        path: output_path.join(name).display().to_string(),
                        source,
                    }
                })?;
                info!("wrote file {}", path.display());
                report.received.push(path);
            }
            FileResponse::Missing => {
                warn!("server does not have requested file: {}", name);
                report.missing.push(name.clone());
            }
        }

        progress.inc(1);
    }

    Ok(report)
}

// ============================================================================
// Server side
// ============================================================================

pub async fn receive_file_list<S>(
    conn: &mut Connection<S>,
    key: &DerivedKey,
) -> Result<Vec<String>, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let encrypted = conn.read_frame().await?;
    let plaintext = decrypt(&encrypted, key)?;
    let wire = String::from_utf8(plaintext).map_err(|_| ProtocolError::FileListEncoding)?;
    Ok(FileList::split_wire(&wire))
}

/// Loads the answer for one requested name. Never fails: anything that keeps the
/// file from being served turns into `FileResponse::Missing`.
pub async fn load_response(input_path: &Path, name: &str, peer: &str) -> FileResponse {
    if let Err(e) = validate_file_name(name) {
        warn!("{} WARNING: refused requested name {:?}: {}", peer, name, e);
        return FileResponse::Missing;
    }

    match read_file(input_path, name, MAX_FILE_SIZE as u64).await {
        Ok(data) => FileResponse::Present(data),
        Err(e) => {
            warn!(
                "{} WARNING: cannot serve requested file: {} ({})",
                peer,
                input_path.join(name).display(),
                e
            );
            FileResponse::Missing
        }
    }
}

/// Reads the request list and answers each name in order.
pub async fn serve_files<S>(
    conn: &mut Connection<S>,
    key: &DerivedKey,
    input_path: &Path,
    peer: &str,
) -> Result<ServeReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let names = receive_file_list(conn, key).await?;
    info!("{} requested the following list of files: {:?}", peer, names);

    let mut report = ServeReport::default();
    for name in &names {
        let response = load_response(input_path, name, peer).await;
        match &response {
            FileResponse::Present(data) => {
                info!("{} sending encrypted file {:?} of size {} bytes", peer, name, data.len());
                report.sent += 1;
            }
            FileResponse::Missing => report.missing += 1,
        }

        let encrypted = encrypt(&response.encode(), key)?;
        conn.write_frame(&encrypted).await?;
        debug!("{} transfer ended for file: {}", peer, name);
    }

    Ok(report)
}
