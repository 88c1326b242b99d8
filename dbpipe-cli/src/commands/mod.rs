//! Command implementations for the dbpipe CLI

pub mod average;
pub mod exec;
pub mod fetch;
pub mod stream;

pub use average::run_average;
pub use exec::run_exec;
pub use fetch::run_fetch;
pub use stream::run_stream;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use dbpipe_core::{CancellationToken, Pipeline, PipelineConfig, SqliteSource};
use serde::Serialize;
use tracing::debug;

/// Settings shared by every command, resolved from config file, env and flags.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config: PipelineConfig,
    /// `--database` / `DBPIPE_DATABASE_URL`, taking precedence over the file
    pub database_url: Option<String>,
    /// Cancelled on Ctrl-C
    pub cancel: CancellationToken,
}

impl Settings {
    fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .or(self.config.database_url.as_deref())
            .context(
                "no database configured: pass --database, set DBPIPE_DATABASE_URL, \
                 or set database_url in the config file",
            )
    }

    /// Open a pipeline over the configured database. `batch_size` overrides
    /// the configured one. The pipeline shares the settings' cancel token.
    pub fn open_pipeline(&self, batch_size: Option<usize>) -> Result<Pipeline<SqliteSource>> {
        let url = self.database_url()?;
        let source = SqliteSource::new(url).context("failed to configure database")?;

        let mut config = self.config.clone();
        if let Some(batch_size) = batch_size {
            config.batch_size = batch_size;
        }
        config.validate()?;
        let pipeline = Pipeline::builder(Arc::new(source))
            .retry(config.retry.policy())
            .batch_size(config.batch_size)
            .cancel_token(self.cancel.clone())
            .build()?;
        debug!(url, batch_size = pipeline.batch_size(), "pipeline ready");

        Ok(pipeline)
    }
}

/// Write one value as a line of JSON.
pub fn write_ndjson<W: Write>(out: &mut W, value: &impl Serialize) -> Result<()> {
    serde_json::to_writer(&mut *out, value).context("failed to encode row")?;
    out.write_all(b"\n").context("failed to write output")?;
    Ok(())
}
