//! Lead repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use super::DbPool;
use crate::lead::LeadRecord;
use crate::leads::LeadSink;
use crate::{Error, Result};

/// Lead repository
#[derive(Clone)]
pub struct LeadRepo {
    pool: DbPool,
}

impl LeadRepo {
    /// Create a new lead repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert one lead and return its row id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, lead: &LeadRecord) -> Result<String> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO leads (id, caller_number, call_time, investment_interest, investment_amount, risk_tolerance, timeline, qualified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id,
                lead.caller_number(),
                lead.call_time().to_rfc3339(),
                lead.investment_interest().map(|i| i.as_str()),
                lead.investment_amount(),
                lead.risk_tolerance().map(|r| r.as_str()),
                lead.timeline(),
                lead.is_qualified(),
            ],
        )?;

        Ok(id)
    }

    /// Most recent leads by call time, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_recent(&self, limit: usize) -> Result<Vec<LeadRecord>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT caller_number, call_time, investment_interest, investment_amount, risk_tolerance, timeline, qualified
             FROM leads ORDER BY call_time DESC, created_at DESC LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let leads = stmt
            .query_map([limit], |row| {
                let interest: Option<String> = row.get(2)?;
                let risk: Option<String> = row.get(4)?;
                Ok(LeadRecord::restore(
                    row.get(0)?,
                    parse_datetime(&row.get::<_, String>(1)?),
                    interest.and_then(|s| s.parse().ok()),
                    row.get(3)?,
                    risk.and_then(|s| s.parse().ok()),
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(leads)
    }
}

#[async_trait]
impl LeadSink for LeadRepo {
    async fn append(&self, lead: &LeadRecord) -> Result<()> {
        let repo = self.clone();
        let lead = lead.clone();
        tokio::task::spawn_blocking(move || repo.insert(&lead))
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?
            .map(|_| ())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<LeadRecord>> {
        let repo = self.clone();
        tokio::task::spawn_blocking(move || repo.list_recent(limit))
            .await
            .map_err(|e| Error::Persistence(e.to_string()))?
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
