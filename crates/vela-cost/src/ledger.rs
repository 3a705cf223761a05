// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Usage ledger persisting one row per tier invocation.
//!
//! Each insert also increments the UTC day and month aggregates inside the
//! same transaction, so spend lookups are primary-key reads and never scan
//! history. All statements run on the database's single writer thread.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::info;
use vela_core::{RoutingDecision, Tier, TokenUsage, UsageSummary, VelaError};
use vela_storage::{Database, map_tr_err};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// How a tier invocation ended.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UsageOutcome {
    Completed,
    /// The caller went away mid-stream; tokens are partial.
    Cancelled,
    /// The attempt errored. Token counts cover whatever was emitted.
    Failed,
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// UUID v4.
    pub id: String,
    /// The tier that actually served (after any fallback).
    pub tier: Tier,
    pub backend_id: String,
    pub category: String,
    pub confidence: f64,
    pub outcome: UsageOutcome,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub first_fragment_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    /// A zero-token completed record for `tier`, stamped now.
    pub fn new(tier: Tier, backend_id: impl Into<String>, decision: &RoutingDecision) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            tier,
            backend_id: backend_id.into(),
            category: decision.category.clone(),
            confidence: decision.confidence,
            outcome: UsageOutcome::Completed,
            input_tokens: 0,
            output_tokens: 0,
            cache_read_tokens: 0,
            cache_write_tokens: 0,
            cost_usd: 0.0,
            latency_ms: 0,
            first_fragment_ms: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_usage(mut self, usage: &TokenUsage) -> Self {
        self.input_tokens = usage.input_tokens;
        self.output_tokens = usage.output_tokens;
        self.cache_read_tokens = usage.cache_read_tokens;
        self.cache_write_tokens = usage.cache_write_tokens;
        self
    }

    pub fn with_summary(self, summary: &UsageSummary) -> Self {
        let mut record = self.with_usage(&summary.usage);
        record.latency_ms = summary.total_ms;
        record.first_fragment_ms = summary.first_fragment_ms;
        record
    }

    pub fn with_outcome(mut self, outcome: UsageOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Negative costs are clamped to zero so aggregates stay monotonic.
    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = if cost_usd.is_finite() { cost_usd.max(0.0) } else { 0.0 };
        self
    }

    pub fn with_latency(mut self, latency_ms: u64, first_fragment_ms: Option<u64>) -> Self {
        self.latency_ms = latency_ms;
        self.first_fragment_ms = first_fragment_ms;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            cache_read_tokens: self.cache_read_tokens,
            cache_write_tokens: self.cache_write_tokens,
        }
    }
}

/// Per-tier totals for one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierSpend {
    pub tier: Tier,
    pub records: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cost_usd: f64,
}

/// `YYYY-MM-DD` key of the UTC day containing `at`.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` key of the UTC month containing `at`.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}

/// First day of the month containing `at` and of the following month.
fn month_bounds(at: DateTime<Utc>) -> Result<(NaiveDate, NaiveDate), VelaError> {
    let (y, m) = (at.year(), at.month());
    let (ny, nm) = if m == 12 { (y + 1, 1) } else { (y, m + 1) };
    match (NaiveDate::from_ymd_opt(y, m, 1), NaiveDate::from_ymd_opt(ny, nm, 1)) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(VelaError::Internal(format!("no month boundary for {at}"))),
    }
}

fn text_err(col: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> Result<UsageRecord, rusqlite::Error> {
    let tier: String = row.get(1)?;
    let outcome: String = row.get(5)?;
    let created_at: String = row.get(13)?;
    Ok(UsageRecord {
        id: row.get(0)?,
        tier: tier.parse().map_err(|e| text_err(1, e))?,
        backend_id: row.get(2)?,
        category: row.get(3)?,
        confidence: row.get(4)?,
        outcome: outcome.parse().map_err(|e| text_err(5, e))?,
        input_tokens: row.get::<_, i64>(6)? as u64,
        output_tokens: row.get::<_, i64>(7)? as u64,
        cache_read_tokens: row.get::<_, i64>(8)? as u64,
        cache_write_tokens: row.get::<_, i64>(9)? as u64,
        cost_usd: row.get(10)?,
        latency_ms: row.get::<_, i64>(11)? as u64,
        first_fragment_ms: row.get::<_, Option<i64>>(12)?.map(|v| v as u64),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| text_err(13, e))?
            .with_timezone(&Utc),
    })
}

/// SQL access to `usage_ledger` and the spend aggregates.
#[derive(Clone)]
pub struct UsageLedger {
    db: Database,
}

impl UsageLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a record and bump its day and month aggregates atomically.
    pub async fn record(&self, record: &UsageRecord) -> Result<(), VelaError> {
        let r = record.clone();
        let day = day_key(r.created_at);
        let month = month_key(r.created_at);
        let created_at = r.created_at.format(TIMESTAMP_FORMAT).to_string();

        self.db
            .connection()
            .call(move |conn| -> Result<(), rusqlite::Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO usage_ledger (id, tier, backend_id, category, confidence, \
                     outcome, input_tokens, output_tokens, cache_read_tokens, \
                     cache_write_tokens, cost_usd, latency_ms, first_fragment_ms, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                    rusqlite::params![
                        r.id,
                        r.tier.to_string(),
                        r.backend_id,
                        r.category,
                        r.confidence,
                        r.outcome.to_string(),
                        r.input_tokens as i64,
                        r.output_tokens as i64,
                        r.cache_read_tokens as i64,
                        r.cache_write_tokens as i64,
                        r.cost_usd,
                        r.latency_ms as i64,
                        r.first_fragment_ms.map(|v| v as i64),
                        created_at,
                    ],
                )?;
                tx.execute(
                    "INSERT INTO spend_daily (day, total_usd, record_count) VALUES (?1, ?2, 1) \
                     ON CONFLICT(day) DO UPDATE SET \
                     total_usd = total_usd + excluded.total_usd, \
                     record_count = record_count + 1",
                    rusqlite::params![day, r.cost_usd],
                )?;
                tx.execute(
                    "INSERT INTO spend_monthly (month, total_usd, record_count) VALUES (?1, ?2, 1) \
                     ON CONFLICT(month) DO UPDATE SET \
                     total_usd = total_usd + excluded.total_usd, \
                     record_count = record_count + 1",
                    rusqlite::params![month, r.cost_usd],
                )?;
                tx.commit()
            })
            .await
            .map_err(map_tr_err)?;

        info!(
            tier = %record.tier,
            backend = %record.backend_id,
            outcome = %record.outcome,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cache_read_tokens = record.cache_read_tokens,
            cost_usd = record.cost_usd,
            "usage recorded"
        );
        Ok(())
    }

    /// Append `record` as if it had been created at `at`.
    pub async fn record_at(&self, record: &UsageRecord, at: DateTime<Utc>) -> Result<(), VelaError> {
        self.record(&record.clone().at(at)).await
    }

    /// Spend for the UTC day and UTC month containing `at`.
    pub async fn spend_at(&self, at: DateTime<Utc>) -> Result<(f64, f64), VelaError> {
        let day = day_key(at);
        let month = month_key(at);
        self.db
            .connection()
            .call(move |conn| -> Result<(f64, f64), rusqlite::Error> {
                let daily: f64 = conn.query_row(
                    "SELECT COALESCE((SELECT total_usd FROM spend_daily WHERE day = ?1), 0.0)",
                    rusqlite::params![day],
                    |row| row.get(0),
                )?;
                let monthly: f64 = conn.query_row(
                    "SELECT COALESCE((SELECT total_usd FROM spend_monthly WHERE month = ?1), 0.0)",
                    rusqlite::params![month],
                    |row| row.get(0),
                )?;
                Ok((daily, monthly))
            })
            .await
            .map_err(map_tr_err)
    }

    /// Spend, tokens, and record counts per tier for the UTC month containing `at`.
    pub async fn tier_breakdown(&self, at: DateTime<Utc>) -> Result<Vec<TierSpend>, VelaError> {
        let (start, end) = month_bounds(at)?;
        let (start, end) = (start.to_string(), end.to_string());
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<TierSpend>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT tier, COUNT(*), SUM(input_tokens), SUM(output_tokens), \
                     SUM(cache_read_tokens), SUM(cost_usd) FROM usage_ledger \
                     WHERE created_at >= ?1 AND created_at < ?2 \
                     GROUP BY tier ORDER BY tier",
                )?;
                let rows = stmt.query_map(rusqlite::params![start, end], |row| {
                    let tier: String = row.get(0)?;
                    Ok(TierSpend {
                        tier: tier.parse().map_err(|e| text_err(0, e))?,
                        records: row.get::<_, i64>(1)? as u64,
                        input_tokens: row.get::<_, i64>(2)? as u64,
                        output_tokens: row.get::<_, i64>(3)? as u64,
                        cache_read_tokens: row.get::<_, i64>(4)? as u64,
                        cost_usd: row.get(5)?,
                    })
                })?;
                let mut out: Vec<TierSpend> = rows.collect::<Result<_, _>>()?;
                out.sort_by_key(|s| s.tier);
                Ok(out)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Most recent records, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<UsageRecord>, VelaError> {
        let limit = limit as i64;
        self.db
            .connection()
            .call(move |conn| -> Result<Vec<UsageRecord>, rusqlite::Error> {
                let mut stmt = conn.prepare(
                    "SELECT id, tier, backend_id, category, confidence, outcome, input_tokens, \
                     output_tokens, cache_read_tokens, cache_write_tokens, cost_usd, \
                     latency_ms, first_fragment_ms, created_at FROM usage_ledger \
                     ORDER BY created_at DESC, rowid DESC LIMIT ?1",
                )?;
                let rows = stmt.query_map(rusqlite::params![limit], row_to_record)?;
                rows.collect()
            })
            .await
            .map_err(map_tr_err)
    }
}
