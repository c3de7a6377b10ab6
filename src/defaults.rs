//! Default configuration constants for ivecd.
//!
//! Shared between the config file, the CLI and the client binary so the
//! wire contract stays in one place.

/// TCP port the server listens on and the client connects to.
pub const PORT: u16 = 1428;

/// Address the server binds to.
pub const BIND_ADDR: &str = "0.0.0.0";

/// Host the client connects to.
pub const CLIENT_HOST: &str = "127.0.0.1";

/// Receive buffer size in bytes.
///
/// A request is read with a single receive call into a buffer of this size;
/// longer payloads are truncated.
pub const MAX_REQUEST_BYTES: usize = 1024;

/// Payload that stops the server.
pub const QUIT_SENTINEL: &str = "quit";

/// Reply sent once a batch has been fully processed.
pub const ACK: &str = "Operation completed";

/// Pause after a failed accept or receive, in milliseconds.
pub const RETRY_PAUSE_MS: u64 = 5000;

/// Number of Gaussians kept per frame by the diagonal-GMM preselection.
pub const NUM_GSELECT: usize = 50;

/// Posterior pruning threshold; zero disables pruning.
pub const MIN_POST: f32 = 0.0;

/// Absolute tolerance on the per-frame posterior sum before pruning.
pub const POSTERIOR_SUM_TOLERANCE: f64 = 0.01;

/// Scale applied to posteriors before accumulating statistics.
pub const ACOUSTIC_WEIGHT: f64 = 1.0;

/// Cap on the weighted frame count per utterance; zero disables the cap.
pub const MAX_COUNT: f64 = 0.0;

/// Compute the objective-function change of each extraction by default.
pub const COMPUTE_OBJF_CHANGE: bool = true;

/// Number of extraction worker threads.
pub const NUM_THREADS: usize = 1;

/// Number of extraction tasks that may wait for a free worker.
pub const QUEUE_DEPTH: usize = 20;

/// Stage-1 progress is logged for every n-th utterance.
pub const GSELECT_LOG_INTERVAL: usize = 10;
