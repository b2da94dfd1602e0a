//! # Commands Module
//!
//! This module contains the three command handlers for getter:
//!
//! ## `serve`
//! Serves files from an input directory:
//! - Listens on the configured address and port
//! - Runs one session task per accepted connection
//! - Proves each client holds the token with the challenge handshake
//! - Answers the client's file list, one encrypted frame per requested name
//! - Stops when the TTL expires
//!
//! ## `fetch`
//! Fetches a list of files from a server:
//! - Connects to the server and answers the handshake
//! - Sends the encrypted file list
//! - Decrypts each response and writes it below the output directory
//! - Fails if the server was missing any of the files
//!
//! ## `token`
//! Prints a freshly generated token.
//!
//! [`run`] picks `serve` or `fetch` from `Options::listen`.

pub mod fetch;
pub mod serve;
pub mod token;

use crate::error::Result;
use crate::utils::Options;

/// Runs the role the options were validated for: the server when `listen` is
/// set, the client otherwise.
pub async fn run(options: Options) -> Result<()> {
    if options.listen {
        println!("* using the following token:\n{}", options.token.as_str());
        serve::run(options).await
    } else {
        fetch::run(options).await.map(|_| ())
    }
}
