//! Command-line interface for ivecd
//!
//! Provides argument parsing using clap derive macros.

use crate::config::Config;
use crate::defaults;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Persistent i-vector extraction server
#[derive(Parser, Debug)]
#[command(
    name = "ivecd",
    version,
    about = "Persistent i-vector extraction server",
    long_about = "Loads a diagonal GMM, a full-covariance GMM and an i-vector extractor once, \
then serves requests on a TCP port. Each request names a feature archive; \
one i-vector per utterance is appended to <VECTOR_WSPECIFIER>. Send \"quit\" to stop."
)]
pub struct ServerCli {
    /// Diagonal-covariance GMM used for Gaussian selection
    #[arg(value_name = "DIAG_GMM")]
    pub diag_gmm: PathBuf,

    /// Full-covariance GMM used for posteriors
    #[arg(value_name = "FULL_GMM")]
    pub full_gmm: PathBuf,

    /// I-vector extractor model
    #[arg(value_name = "EXTRACTOR")]
    pub extractor: PathBuf,

    /// Output vector archive, e.g. jsonl:ivectors.jsonl
    #[arg(value_name = "VECTOR_WSPECIFIER")]
    pub vector_wspecifier: String,

    /// Number of Gaussians to keep per frame
    #[arg(short = 'n', long, value_name = "N")]
    pub num_gselect: Option<usize>,

    /// If nonzero, posteriors below this threshold are pruned and the rest renormalized
    #[arg(long, value_name = "FLOAT")]
    pub min_post: Option<f32>,

    /// Compute the change in objective function from estimating each i-vector
    #[arg(long, value_name = "BOOL", action = clap::ArgAction::Set)]
    pub compute_objf_change: Option<bool>,

    /// Scale applied to posteriors before accumulating statistics
    #[arg(long, value_name = "FLOAT")]
    pub acoustic_weight: Option<f64>,

    /// Cap on the weighted frame count of one utterance (0 = no cap)
    #[arg(long, value_name = "FLOAT")]
    pub max_count: Option<f64>,

    /// Extraction worker threads (also used when loading the extractor)
    #[arg(long, value_name = "N")]
    pub num_threads: Option<usize>,

    /// Extraction tasks allowed to wait for a worker
    #[arg(long, value_name = "N")]
    pub queue_depth: Option<usize>,

    /// TCP port to listen on
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Pause after a failed accept or receive. Examples: 5s, 500ms
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub retry_pause: Option<Duration>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: per-utterance diagnostics, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl ServerCli {
    /// Override `config` with every option given on the command line.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(n) = self.num_gselect {
            config.gselect.num_gselect = n;
        }
        if let Some(min_post) = self.min_post {
            config.posterior.min_post = min_post;
        }
        if let Some(compute) = self.compute_objf_change {
            config.extract.compute_objf_change = compute;
        }
        if let Some(weight) = self.acoustic_weight {
            config.extract.acoustic_weight = weight;
        }
        if let Some(max_count) = self.max_count {
            config.extract.max_count = max_count;
        }
        if let Some(threads) = self.num_threads {
            config.pool.num_threads = threads;
        }
        if let Some(depth) = self.queue_depth {
            config.pool.queue_depth = depth;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(pause) = self.retry_pause {
            config.server.retry_pause_ms = pause.as_millis() as u64;
        }
    }

    /// Default tracing directive for the verbosity level.
    pub fn log_directive(&self) -> &'static str {
        match self.verbose {
            0 => "ivecd=info",
            1 => "ivecd=debug",
            _ => "ivecd=trace",
        }
    }
}

/// Client for a running ivecd server
#[derive(Parser, Debug)]
#[command(name = "ivecd-client", version, about = "Send a request to an ivecd server")]
pub struct ClientCli {
    /// Feature archive specifier to process, or "quit" to stop the server
    #[arg(value_name = "PAYLOAD")]
    pub payload: String,

    /// Server host
    #[arg(long, default_value = defaults::CLIENT_HOST)]
    pub host: String,

    /// Server port
    #[arg(long, default_value_t = defaults::PORT)]
    pub port: u16,
}

impl ClientCli {
    /// `host:port` of the server.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse a duration string.
///
/// Bare numbers are seconds; anything else goes through `humantime`
/// (`500ms`, `5s`, `1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}
