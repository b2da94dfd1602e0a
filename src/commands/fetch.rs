use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};

use crate::cryptography::derive_key;
use crate::error::{GetterError, Result};
use crate::exchange::ExchangeReport;
use crate::networking::connect;
use crate::session::{fetch_session, ClientContext};
use crate::utils::Options;

/// Function handler to kickoff client logic:
///     - Connect to the server
///     - Decrypt the server's challenge and echo it back
///     - Send the encrypted list of requested files
///     - Decrypt every response and write it below the output path
///
/// The whole exchange is bounded by the TTL unless it is zero. Files the server
/// did not have are reported as `GetterError::MissingFiles` after the others are written.
pub async fn run(options: Options) -> Result<ExchangeReport> {
    let addr = options.socket_addr();
    let ctx = ClientContext {
        key: derive_key(&options.token),
        files: options.files.clone(),
        output_path: options.output_path.clone(),
        timeout: options.timeout,
    };

    let progress = ProgressBar::new(ctx.files.len() as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] [{bar:40}] {pos}/{len} files {msg}") {
        progress.set_style(style);
    }

    println!("* connecting to server {}", addr);
    let session = async {
        let stream = connect(addr, options.timeout).await?;
        let report = fetch_session(stream, &ctx, &progress).await?;
        Ok::<_, GetterError>(report)
    };

    let outcome = if options.ttl.is_zero() {
        session.await
    } else {
        debug!("Client bounded by TTL of {:?}", options.ttl);
        tokio::time::timeout(options.ttl, session)
            .await
            .unwrap_or(Err(GetterError::TtlExpired(options.ttl)))
    };
    progress.finish_and_clear();
    let report = outcome?;

    if !report.missing.is_empty() {
        return Err(GetterError::MissingFiles(report.missing));
    }

    info!("received {} file(s)", report.received.len());
    println!("* done transferring files");
    Ok(report)
}
