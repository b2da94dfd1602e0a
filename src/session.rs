use indicatif::ProgressBar;
use log::{debug, error, info};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::cryptography::DerivedKey;
use crate::error::SessionError;
use crate::exchange::{fetch_files, serve_files, ExchangeReport, ServeReport};
use crate::handshake::Handshake;
use crate::networking::Connection;
use crate::utils::FileList;

/// Read-only state every server session shares.
#[derive(Debug)]
pub struct ServerContext {
    pub key: DerivedKey,
    pub input_path: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug)]
pub struct ClientContext {
    pub key: DerivedKey,
    pub files: FileList,
    pub output_path: PathBuf,
    pub timeout: Option<Duration>,
}

/// Server side of one connection: handshake, then answer the file list.
///
/// Errors are tagged with the step they happened in.
pub async fn serve_session<S>(
    stream: S,
    peer: &str,
    ctx: &ServerContext,
) -> Result<ServeReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream, ctx.timeout);

    debug!("{} sending handshake to client", peer);
    Handshake::new()
        .run_server(&mut conn, &ctx.key)
        .await
        .map_err(SessionError::in_handshake)?;
    info!("{} handshake was successful", peer);

    let report = serve_files(&mut conn, &ctx.key, &ctx.input_path, peer)
        .await
        .map_err(SessionError::in_transfer)?;
    info!(
        "{} done sending files ({} sent, {} missing)",
        peer, report.sent, report.missing
    );

    conn.shutdown().await;
    Ok(report)
}

/// Client side of one connection: answer the handshake, then fetch the files.
pub async fn fetch_session<S>(
    stream: S,
    ctx: &ClientContext,
    progress: &ProgressBar,
) -> Result<ExchangeReport, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(stream, ctx.timeout);

    debug!("receiving handshake from server");
    Handshake::new()
        .run_client(&mut conn, &ctx.key)
        .await
        .map_err(SessionError::in_handshake)?;
    info!("handshake was successful");

    let report = fetch_files(&mut conn, &ctx.key, &ctx.files, &ctx.output_path, progress)
        .await
        .map_err(SessionError::in_transfer)?;

    conn.shutdown().await;
    Ok(report)
}

/// Runs one accepted connection to completion.
///
/// This is the error boundary for the server: whatever happens inside the session
/// is logged here and the connection is closed; nothing reaches the accept loop.
pub async fn handle_connection(stream: TcpStream, addr: SocketAddr, ctx: Arc<ServerContext>) {
    let peer = format!("[{}]:", addr);
    info!("accepted connection from {}", peer);

    if let Err(e) = serve_session(stream, &peer, &ctx).await {
        error!("{} {}", peer, e);
    }

    info!("{} closing connection", peer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cryptography::derive_key;
    use crate::utils::Token;
    use tokio::io::duplex;

    fn key(text: &str) -> DerivedKey {
        derive_key(&Token::parse(text).unwrap())
    }

    #[tokio::test]
    async fn test_session_pair() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("ca.crt"), [1u8; 10]).unwrap();

        let server_ctx = ServerContext {
            key: key("abcdef.0123456789abcdef"),
            input_path: input.path().to_path_buf(),
            timeout: Some(Duration::from_secs(5)),
        };
        let client_ctx = ClientContext {
            key: key("abcdef.0123456789abcdef"),
            files: FileList::parse("ca.crt").unwrap(),
            output_path: output.path().to_path_buf(),
            timeout: Some(Duration::from_secs(5)),
        };

        let (a, b) = duplex(1 << 16);
        let server = tokio::spawn(async move { serve_session(a, "[test]", &server_ctx).await });

        let report = fetch_session(b, &client_ctx, &ProgressBar::hidden())
            .await
            .expect("Session should succeed");
        let served = server.await.unwrap().expect("Server should succeed");

        assert_eq!(report.received.len(), 1);
        assert!(report.missing.is_empty());
        assert_eq!(served, ServeReport { sent: 1, missing: 0 });
    }

    #[tokio::test]
    async fn test_wrong_token_is_tagged_as_handshake() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        std::fs::write(input.path().join("ca.crt"), [1u8; 10]).unwrap();

        let server_ctx = ServerContext {
            key: key("abcdef.0123456789abcdef"),
            input_path: input.path().to_path_buf(),
            timeout: Some(Duration::from_secs(5)),
        };
        let client_ctx = ClientContext {
            key: key("123456.0123456789abcdef"),
            files: FileList::parse("ca.crt").unwrap(),
            output_path: output.path().to_path_buf(),
            timeout: Some(Duration::from_secs(5)),
        };

        let (a, b) = duplex(1 << 16);
        let server = tokio::spawn(async move { serve_session(a, "[test]", &server_ctx).await });

        let err = fetch_session(b, &client_ctx, &ProgressBar::hidden())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Handshake(_)));
        assert!(err.is_authentication());

        let server_err = server.await.unwrap().unwrap_err();
        assert!(matches!(server_err, SessionError::Handshake(_)));
        assert!(!output.path().join("ca.crt").exists());
    }
}
