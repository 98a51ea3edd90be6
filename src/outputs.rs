//! Publication of values to the hosting job
//!
//! CI systems hand the plugin two append-only files: one for structured
//! outputs (`key=value`) and one for environment variables to inject into
//! later job steps. Either may be absent, in which case publication is
//! skipped with a debug log - the cluster still works for in-process
//! consumers because exported variables are also set on the current process.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::Result;

/// Sinks for values the hosting job consumes downstream
#[derive(Debug, Clone, Default)]
pub struct JobOutputs {
    output_file: Option<PathBuf>,
    env_file: Option<PathBuf>,
}

impl JobOutputs {
    /// Create a publication surface from the configured sink files
    pub fn new(output_file: Option<PathBuf>, env_file: Option<PathBuf>) -> Self {
        Self {
            output_file,
            env_file,
        }
    }

    /// Append `key=value` to the structured output file
    pub async fn publish(&self, key: &str, value: &str) -> Result<()> {
        match &self.output_file {
            Some(path) => append_line(path, key, value).await,
            None => {
                debug!(key, "No output file configured, skipping output publication");
                Ok(())
            }
        }
    }

    /// Export `key=value` into the job environment.
    ///
    /// The variable is appended to the env file for later job steps and set
    /// on the current process so in-process consumers (readiness checks, the
    /// DNS probe) see it immediately.
    pub async fn export_env(&self, key: &str, value: &str) -> Result<()> {
        std::env::set_var(key, value);
        match &self.env_file {
            Some(path) => append_line(path, key, value).await,
            None => {
                debug!(key, "No env file configured, skipping env publication");
                Ok(())
            }
        }
    }
}

async fn append_line(path: &PathBuf, key: &str, value: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    file.write_all(format!("{}={}\n", key, value).as_bytes())
        .await?;
    Ok(())
}
