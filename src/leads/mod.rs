//! Lead persistence
//!
//! Every finished call hands its lead to a [`LeadSink`] exactly once.
//! Each append stands alone: no sink buffers records in memory or
//! rewrites what other calls already stored.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::lead::LeadRecord;
use crate::retry::{self, RetryPolicy};
use crate::{Error, Result};

/// Append-only destination for finished leads
#[async_trait]
pub trait LeadSink: Send + Sync {
    /// Durably store one lead
    async fn append(&self, lead: &LeadRecord) -> Result<()>;

    /// Most recent leads, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<LeadRecord>>;
}

/// Store a lead, retrying per `policy`, and log instead of failing
///
/// Returns whether the lead was stored. Hang-up never waits on this
/// succeeding, so a lost lead is reported here and nowhere else.
pub async fn append_with_retry(sink: &dyn LeadSink, lead: &LeadRecord, policy: &RetryPolicy) -> bool {
    match retry::retry(policy, "append lead", || sink.append(lead)).await {
        Ok(()) => {
            tracing::info!(
                caller = %lead.caller_number(),
                qualified = lead.is_qualified(),
                "lead saved"
            );
            true
        }
        Err(e) => {
            tracing::error!(
                caller = %lead.caller_number(),
                error = %e,
                lead = %serde_json::to_string(lead).unwrap_or_default(),
                "failed to save lead, dropping"
            );
            false
        }
    }
}

/// One JSON object per line, appended in place
pub struct JsonlLeadSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlLeadSink {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LeadSink for JsonlLeadSink {
    async fn append(&self, lead: &LeadRecord) -> Result<()> {
        let mut line = serde_json::to_vec(lead)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| Error::Persistence(format!("{}: {e}", self.path.display())))?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LeadRecord>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let leads = contents
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<LeadRecord>(line) {
                Ok(lead) => Some(lead),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable lead line");
                    None
                }
            })
            .take(limit)
            .collect();

        Ok(leads)
    }
}
