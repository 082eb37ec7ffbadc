use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::funnel::FunnelReport;
use crate::models::Session;

/// Last known progress of a funnel session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub max_scroll_depth: u8,
    pub conversions: u64,
    pub conversion_value: f64,
    pub updated_at: DateTime<Utc>,
}

impl SessionSummary {
    pub fn from_report(session: &Session, report: &FunnelReport, max_scroll_depth: u8) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            started_at: session.started_at,
            max_scroll_depth,
            conversions: report.conversions as u64,
            conversion_value: report.conversion_value,
            updated_at: Utc::now(),
        }
    }
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| anyhow!("invalid datetime '{value}': {err}"))
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

impl Database {
    pub async fn upsert_session_summary(&self, summary: &SessionSummary) -> Result<()> {
        let record = summary.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO session_summaries (
                    session_id, user_id, started_at, max_scroll_depth,
                    conversions, conversion_value, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(session_id) DO UPDATE SET
                    max_scroll_depth = MAX(max_scroll_depth, excluded.max_scroll_depth),
                    conversions = excluded.conversions,
                    conversion_value = excluded.conversion_value,
                    updated_at = excluded.updated_at",
                params![
                    record.session_id,
                    record.user_id,
                    record.started_at.to_rfc3339(),
                    i64::from(record.max_scroll_depth),
                    to_i64(record.conversions)?,
                    record.conversion_value,
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to upsert session summary")?;
            Ok(())
        })
        .await
    }

    pub async fn recent_session_summaries(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        let limit = to_i64(limit as u64)?;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT session_id, user_id, started_at, max_scroll_depth,
                        conversions, conversion_value, updated_at
                 FROM session_summaries
                 ORDER BY started_at DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut summaries = Vec::new();
            while let Some(row) = rows.next()? {
                let depth: i64 = row.get(3)?;
                let conversions: i64 = row.get(4)?;
                summaries.push(SessionSummary {
                    session_id: row.get(0)?,
                    user_id: row.get(1)?,
                    started_at: parse_datetime(&row.get::<_, String>(2)?)?,
                    max_scroll_depth: u8::try_from(depth)
                        .map_err(|_| anyhow!("scroll depth {depth} out of range"))?,
                    conversions: u64::try_from(conversions)
                        .map_err(|_| anyhow!("conversions {conversions} is negative"))?,
                    conversion_value: row.get(5)?,
                    updated_at: parse_datetime(&row.get::<_, String>(6)?)?,
                });
            }

            Ok(summaries)
        })
        .await
    }
}
