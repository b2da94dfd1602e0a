use log::{debug, error, info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::cryptography::derive_key;
use crate::error::{GetterError, Result};
use crate::networking::bind;
use crate::session::{handle_connection, ServerContext};
use crate::utils::Options;

/// Run the file server until the TTL expires.
///
/// # Overview
/// The server:
/// 1. Binds to `address:port`
/// 2. Accepts connections in a loop
/// 3. Spawns one session task per connection into a `JoinSet`, at most
///    `max_connections` at a time; further clients wait until a session ends
/// 4. Stops accepting, and aborts sessions still in flight, once the TTL elapses
///
/// # Returns
/// `Err(GetterError::TtlExpired)` when the TTL ends the process, or an error if binding fails.
/// With a TTL of zero the server runs until the process is killed.
pub async fn run(options: Options) -> Result<()> {
    run_until(options, std::future::pending()).await
}

/// Like [`run`], but also stops cleanly (with `Ok`) when `shutdown` resolves.
pub async fn run_until<F>(options: Options, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = bind(options.socket_addr()).await?;
    serve(listener, options, shutdown).await
}

/// Accept loop over an already bound listener.
pub async fn serve<F>(listener: TcpListener, options: Options, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener.local_addr()?;
    println!("* server listening on {}", local_addr);
    info!("Server started on {}", local_addr);

    // Sessions only ever read from the context
    let ctx = Arc::new(ServerContext {
        key: derive_key(&options.token),
        input_path: options.input_path.clone(),
        timeout: options.timeout,
    });
    let permits = Arc::new(Semaphore::new(options.max_connections));
    let mut sessions = JoinSet::new();

    if options.ttl.is_zero() {
        warn!("TTL value is zero! this process will remain open");
    } else {
        info!("this process will remain open for {:?} (TTL)", options.ttl);
    }
    let watchdog = ttl_elapsed(options.ttl);
    tokio::pin!(watchdog);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            admitted = admit(&listener, &permits) => {
                let (permit, stream, addr) = match admitted {
                    Ok(connection) => connection,
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };

                let ctx = Arc::clone(&ctx);
                debug!("Spawning session task for {}", addr);
                sessions.spawn(async move {
                    handle_connection(stream, addr, ctx).await;
                    drop(permit);
                });
            }

            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    error!("session task failed: {}", e);
                }
            }

            _ = &mut watchdog => {
                warn!("TTL reached!");
                sessions.shutdown().await;
                return Err(GetterError::TtlExpired(options.ttl));
            }

            _ = &mut shutdown => {
                info!("Shutting down, aborting {} session(s)", sessions.len());
                sessions.shutdown().await;
                return Ok(());
            }
        }
    }
}

/// Waits for a free session slot, then for the next connection.
///
/// While every slot is taken nothing is accepted, and new clients wait in the
/// kernel's listen backlog.
async fn admit(
    listener: &TcpListener,
    permits: &Arc<Semaphore>,
) -> io::Result<(OwnedSemaphorePermit, TcpStream, SocketAddr)> {
    let permit = Arc::clone(permits)
        .acquire_owned()
        .await
        .map_err(io::Error::other)?;
    let (stream, addr) = listener.accept().await?;
    Ok((permit, stream, addr))
}

/// Resolves once `ttl` has elapsed; never resolves for a zero TTL.
async fn ttl_elapsed(ttl: Duration) {
    if ttl.is_zero() {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(ttl).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{FileList, Token};
    use std::net::{IpAddr, Ipv4Addr};
    use std::path::PathBuf;
    use tokio::sync::oneshot;

    fn options(ttl: Duration) -> Options {
        Options {
            token: Token::parse("abcdef.0123456789abcdef").unwrap(),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ttl,
            timeout: Some(Duration::from_secs(5)),
            max_connections: 4,
            files: FileList::default(),
            input_path: PathBuf::from("./"),
            output_path: PathBuf::from("./"),
            listen: true,
        }
    }

    #[tokio::test]
    async fn test_ttl_stops_server() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let ttl = Duration::from_millis(100);

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            serve(listener, options(ttl), std::future::pending()),
        )
        .await
        .expect("TTL should stop the server");

        assert!(matches!(result, Err(GetterError::TtlExpired(d)) if d == ttl));
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_server() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let (tx, rx) = oneshot::channel::<()>();

        let server = tokio::spawn(serve(listener, options(Duration::ZERO), async {
            let _ = rx.await;
        }));
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("Server should stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_zero_ttl_never_fires() {
        let fired = tokio::time::timeout(Duration::from_millis(50), ttl_elapsed(Duration::ZERO)).await;
        assert!(fired.is_err());
    }
}
