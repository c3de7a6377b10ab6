//! Daemon mode: load the models once, then serve requests until `quit`.

pub mod handler;

use crate::config::Config;
use crate::error::Result;
use crate::ipc::server::IpcServer;
use crate::model::{DiagGmm, FullGmm, IvectorModel};
use crate::pipeline::{BatchPipeline, Models};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Model files given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub diag_gmm: PathBuf,
    pub full_gmm: PathBuf,
    pub extractor: PathBuf,
}

/// Daemon state: loaded pipeline and output archive.
pub struct DaemonState {
    /// Stages built around the loaded models
    pub pipeline: BatchPipeline,
    /// Output archive specifier, appended to on every request
    pub output_spec: String,
    started: Instant,
}

impl DaemonState {
    pub fn new(pipeline: BatchPipeline, output_spec: String) -> Self {
        Self {
            pipeline,
            output_spec,
            started: Instant::now(),
        }
    }

    /// Time since the daemon state was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Load the three models, logging the time each load finishes.
///
/// The extractor's derived quantities are computed on `num_threads` threads.
pub fn load_models(paths: &ModelPaths, num_threads: usize, clock: Instant) -> Result<Models> {
    info!("T before gmm read at {:.3}s", clock.elapsed().as_secs_f64());
    let diag = DiagGmm::load(&paths.diag_gmm)?;
    info!("T before fgmm read at {:.3}s", clock.elapsed().as_secs_f64());
    let full = FullGmm::load(&paths.full_gmm)?;
    info!(
        "T before ivector_read at {:.3}s",
        clock.elapsed().as_secs_f64()
    );
    let extractor = IvectorModel::load(&paths.extractor, num_threads)?;
    info!(
        "T after ivector_read at {:.3}s",
        clock.elapsed().as_secs_f64()
    );

    Ok(Models {
        diag: Arc::new(diag),
        full: Arc::new(full),
        extractor: Arc::new(extractor),
    })
}

/// Run the daemon: load models, bind the port, serve until `quit`.
///
/// # Arguments
/// * `config` - Validated configuration
/// * `paths` - Model files
/// * `output_spec` - Vector archive specifier written by every request
///
/// # Returns
/// Ok(()) after a `quit` request, error if models fail to load or the port
/// cannot be bound
pub async fn run_daemon(config: Config, paths: ModelPaths, output_spec: String) -> Result<()> {
    let clock = Instant::now();
    let models = {
        let num_threads = config.pool.num_threads;
        tokio::task::spawn_blocking(move || load_models(&paths, num_threads, clock))
            .await
            .map_err(|e| crate::error::IvecdError::Other(format!("Model loading failed: {}", e)))??
    };

    // Validate the output specifier before accepting requests.
    crate::archive::ArchiveSpec::parse(&output_spec)?;

    let pipeline = BatchPipeline::new(models, &config);
    let server = IpcServer::bind(&config.server).await?;
    let handler = handler::DaemonRequestHandler::new(DaemonState::new(pipeline, output_spec));

    server.run(handler).await?;
    info!("Daemon stopped.");
    Ok(())
}
