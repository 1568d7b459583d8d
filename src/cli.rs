//! Command line flags.
//!
//! Key management runs before the server starts, so a key can be generated or
//! revoked against the configured database with `--no-serve` and no listener.

use clap::Parser;

/// NSFW media screening server.
#[derive(Parser, Debug)]
#[command(
    name = "nsfw_screening_server",
    version = env!("CARGO_PKG_VERSION"),
    about = "HTTP service that screens images and videos for NSFW content"
)]
pub struct Cli {
    /// Port to listen on (overrides the configuration file).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Create a new API key and print it.
    #[arg(long)]
    pub generate_key: bool,

    /// Deactivate an existing API key.
    #[arg(long, value_name = "KEY")]
    pub revoke_key: Option<String>,

    /// Do the key work above, then exit without serving.
    #[arg(short = 'd', long)]
    pub no_serve: bool,
}
