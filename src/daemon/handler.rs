//! Request handler implementation for the daemon.

use crate::archive;
use crate::daemon::DaemonState;
use crate::error::{IvecdError, Result};
use crate::ipc::protocol::Response;
use crate::ipc::server::RequestHandler;
use crate::pipeline::BatchReport;
use std::sync::Arc;
use tracing::{error, info};

/// Runs one batch per request on the blocking thread pool.
pub struct DaemonRequestHandler {
    state: Arc<DaemonState>,
}

impl DaemonRequestHandler {
    pub fn new(state: DaemonState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Open both archives and run the pipeline over the whole batch.
    fn run_batch(state: &DaemonState, specifier: &str) -> Result<BatchReport> {
        let mut reader = archive::open_reader(specifier)?;
        let writer = archive::open_writer(&state.output_spec)?;
        state.pipeline.run(reader.as_mut(), writer)
    }
}

#[async_trait::async_trait]
impl RequestHandler for DaemonRequestHandler {
    async fn handle(&self, specifier: String) -> Response {
        let start_time = self.state.uptime();
        info!("Start at {:.3}s: {}", start_time.as_secs_f64(), specifier);

        let state = Arc::clone(&self.state);
        let result = tokio::task::spawn_blocking(move || Self::run_batch(&state, &specifier))
            .await
            .map_err(|e| IvecdError::Other(format!("Batch task failed: {}", e)))
            .and_then(|r| r);

        let end_time = self.state.uptime();
        info!("End at {:.3}s", end_time.as_secs_f64());
        info!(
            "Total time {:.3}s",
            end_time.saturating_sub(start_time).as_secs_f64()
        );

        match result {
            Ok(report) => {
                if !report.success() {
                    error!(
                        "No i-vectors written ({} utterances with errors)",
                        report.num_err()
                    );
                }
                Response::Completed {
                    success: report.success(),
                }
            }
            Err(e) => {
                error!("Request failed: {}", e);
                Response::Completed { success: false }
            }
        }
    }
}
