//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use kwapi_core::DEFAULT_MAX_RETRIES;

/// Command-line client for the kiteworks file-sharing API.
///
/// Connection settings can also be supplied through `KWAPI_*` environment
/// variables.
#[derive(Parser, Debug)]
#[command(name = "kwapi")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Trace every request and response (tokens are hidden)
    #[arg(long, global = true)]
    pub snoop: bool,

    /// kiteworks server host name
    #[arg(long, env = "KWAPI_SERVER")]
    pub server: String,

    /// Base URL override, e.g. http://127.0.0.1:8080 for a local test server
    #[arg(long, env = "KWAPI_ENDPOINT", hide = true)]
    pub endpoint: Option<String>,

    /// Account to act as
    #[arg(short, long, env = "KWAPI_USER")]
    pub user: String,

    /// OAuth client application ID
    #[arg(long, env = "KWAPI_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// OAuth client secret
    #[arg(long, env = "KWAPI_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// OAuth redirect URI (defaults to https://<server>/rest/callback.html)
    #[arg(long, env = "KWAPI_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Proxy URI for all requests
    #[arg(long, env = "KWAPI_PROXY")]
    pub proxy: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Maximum retry attempts for failed calls (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Upper bound on upload chunk size in MiB (0 for the server maximum)
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u64).range(0..=65))]
    pub chunk_size_mb: u64,

    /// Token database path (defaults to ~/.config/kwapi/tokens.db)
    #[arg(long, env = "KWAPI_DB")]
    pub db: Option<PathBuf>,

    /// Key material for encrypting stored tokens (defaults to the client secret)
    #[arg(long, env = "KWAPI_TOKEN_KEY", hide_env_values = true)]
    pub token_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Operations.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate with a password and store the token
    Login {
        /// Account password
        #[arg(long, env = "KWAPI_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored token
    Logout,
    /// Upload a local file into a folder
    Upload {
        /// Destination folder ID
        #[arg(long)]
        folder: u64,
        /// File to upload
        path: PathBuf,
    },
    /// Upload a local file as a new version of an existing file
    Version {
        /// File ID to version
        #[arg(long)]
        file: u64,
        /// File to upload
        path: PathBuf,
    },
    /// Resume an interrupted upload
    Resume {
        /// Upload ID returned when the upload was initiated
        #[arg(long)]
        upload_id: u64,
        /// The same local file that was being uploaded
        path: PathBuf,
    },
    /// Download a file
    Download {
        /// File ID to download
        file_id: u64,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Continue a partial download already in the output directory
        #[arg(long)]
        resume: bool,
    },
}

/// Default token database location under the user config directory.
pub fn default_db_path() -> Option<PathBuf> {
    let non_empty = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
    non_empty("XDG_CONFIG_HOME")
        .or_else(|| non_empty("HOME").map(|home| home.join(".config")))
        .or_else(|| non_empty("APPDATA"))
        .map(|dir| dir.join("kwapi").join("tokens.db"))
}
