use clap::{Parser, Subcommand};
use std::error::Error;

use getter::utils::{FetchArgs, ServeArgs};

const EXAMPLES: &str = "\
Examples:
    # server
    getter serve --address=<server-ip> --port=11764 --ttl=240 \\
        --token=abcdef.1234567890abcdef --input-path=/etc/kubernetes/pki

    # client
    getter fetch --address=<server-ip> --port=11764 --ttl=240 \\
        --token=abcdef.1234567890abcdef --output-path=/etc/kubernetes/pki \\
        --files='ca.crt,ca.key'";

#[derive(Parser)]
#[command(name = "getter")]
#[command(about = "Fetch files from a server, authenticated and encrypted with a shared token", long_about = None)]
#[command(after_help = EXAMPLES)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve files from a directory to clients holding the token
    Serve(ServeArgs),
    /// Fetch files from a server
    Fetch(FetchArgs),
    /// Print a new random token
    CreateToken,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
    log::debug!("Verbose logging enabled");

    let options = match cli.command {
        Commands::Serve(args) => args.into_options()?,
        Commands::Fetch(args) => args.into_options()?,
        Commands::CreateToken => {
            getter::commands::token::run();
            return Ok(());
        }
    };

    println!("* getter");
    getter::commands::run(options).await?;

    Ok(())
}
