//! Cost and performance reporting over the optimization event log.
//!
//! Cost figures only ever include generation events: cache reads are free and
//! are counted solely for the cache hit rate.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::db::now_secs;
use crate::error::{Error, Result};
use crate::optimize::model::OptimizationEvent;
use crate::optimize::store::RecordStore;
use crate::types::ArticleId;

const SECS_PER_DAY: i64 = 86_400;
const RECENT_LIMIT: usize = 10;
const REPORT_EXPENSIVE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostStatistics {
    pub period_days: u32,
    pub article_count: usize,
    pub generation_count: usize,
    pub total_cost_usd: f64,
    pub average_cost_usd: f64,
    pub min_cost_usd: f64,
    pub max_cost_usd: f64,
    pub median_cost_usd: f64,
    pub estimated_monthly_cost_usd: f64,
}

impl CostStatistics {
    /// Aggregates the `limit` most recent generation events in `events`.
    pub fn from_events(events: &[OptimizationEvent], days: u32, limit: usize) -> Self {
        let mut generations: Vec<&OptimizationEvent> =
            events.iter().filter(|e| !e.cached).collect();
        generations.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        generations.truncate(limit);

        if generations.is_empty() {
            return Self {
                period_days: days,
                ..Self::default()
            };
        }

        let mut costs: Vec<f64> = generations.iter().map(|e| e.cost_usd).collect();
        costs.sort_by(f64::total_cmp);
        let total: f64 = costs.iter().sum();
        let n = costs.len();
        let median = if n % 2 == 0 {
            (costs[n / 2 - 1] + costs[n / 2]) / 2.0
        } else {
            costs[n / 2]
        };
        let articles: HashSet<ArticleId> = generations.iter().map(|e| e.article_id).collect();

        Self {
            period_days: days,
            article_count: articles.len(),
            generation_count: n,
            total_cost_usd: total,
            average_cost_usd: total / n as f64,
            min_cost_usd: costs[0],
            max_cost_usd: costs[n - 1],
            median_cost_usd: median,
            estimated_monthly_cost_usd: total / f64::from(days.max(1)) * 30.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceStatistics {
    pub period_days: u32,
    pub total_optimizations: usize,
    pub generations: usize,
    pub cached_reads: usize,
    /// cached_reads / (cached_reads + generations); 0 with no requests.
    pub cache_hit_rate: f64,
    pub average_duration_ms: f64,
    /// Newest first.
    pub recent_optimizations: Vec<OptimizationEvent>,
}

impl PerformanceStatistics {
    pub fn from_events(events: &[OptimizationEvent], days: u32) -> Self {
        let cached_reads = events.iter().filter(|e| e.cached).count();
        let generations = events.len() - cached_reads;
        let total = events.len();

        let cache_hit_rate = if total == 0 {
            0.0
        } else {
            cached_reads as f64 / total as f64
        };
        let average_duration_ms = if generations == 0 {
            0.0
        } else {
            events
                .iter()
                .filter(|e| !e.cached)
                .map(|e| e.duration_ms as f64)
                .sum::<f64>()
                / generations as f64
        };

        let mut recent = events.to_vec();
        recent.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        recent.truncate(RECENT_LIMIT);

        Self {
            period_days: days,
            total_optimizations: total,
            generations,
            cached_reads,
            cache_hit_rate,
            average_duration_ms,
            recent_optimizations: recent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpensiveArticle {
    pub article_id: ArticleId,
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub generated_at: i64,
}

/// Top `limit` articles by cost, ties broken by most recent first.
///
/// Each article is ranked by its latest generation only, so a regenerated
/// article takes one slot.
pub fn expensive_from_events(events: &[OptimizationEvent], limit: usize) -> Vec<ExpensiveArticle> {
    let mut latest: HashMap<ArticleId, &OptimizationEvent> = HashMap::new();
    for event in events.iter().filter(|e| !e.cached) {
        latest
            .entry(event.article_id)
            .and_modify(|kept| {
                if event.occurred_at >= kept.occurred_at {
                    *kept = event;
                }
            })
            .or_insert(event);
    }

    let mut ranked: Vec<ExpensiveArticle> = latest
        .into_values()
        .map(|e| ExpensiveArticle {
            article_id: e.article_id,
            cost_usd: e.cost_usd,
            total_tokens: e.total_tokens,
            generated_at: e.occurred_at,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.cost_usd
            .total_cmp(&a.cost_usd)
            .then(b.generated_at.cmp(&a.generated_at))
            .then(a.article_id.cmp(&b.article_id))
    });
    ranked.truncate(limit);
    ranked
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReport {
    pub period_days: u32,
    pub generated_at: i64,
    pub cost: CostStatistics,
    pub performance: PerformanceStatistics,
    pub expensive_articles: Vec<ExpensiveArticle>,
    /// Human-readable rendering of the figures above.
    pub summary: String,
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn render_summary(
    days: u32,
    now: i64,
    cost: &CostStatistics,
    perf: &PerformanceStatistics,
    expensive: &[ExpensiveArticle],
) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = writeln!(
        out,
        "Optimization report for the last {days} day(s), as of {}",
        format_timestamp(now)
    );
    let _ = writeln!(
        out,
        "Generations: {} across {} article(s)",
        cost.generation_count, cost.article_count
    );
    let _ = writeln!(
        out,
        "Total cost: ${:.4} (avg ${:.4}, median ${:.4}, min ${:.4}, max ${:.4})",
        cost.total_cost_usd,
        cost.average_cost_usd,
        cost.median_cost_usd,
        cost.min_cost_usd,
        cost.max_cost_usd
    );
    let _ = writeln!(
        out,
        "Estimated monthly cost: ${:.2}",
        cost.estimated_monthly_cost_usd
    );
    let _ = writeln!(
        out,
        "Cache hit rate: {:.1}% ({} cached of {} requests)",
        perf.cache_hit_rate * 100.0,
        perf.cached_reads,
        perf.total_optimizations
    );
    let _ = writeln!(
        out,
        "Average generation time: {:.1}s",
        perf.average_duration_ms / 1000.0
    );
    if !expensive.is_empty() {
        let _ = writeln!(out, "Most expensive:");
        for (rank, a) in expensive.iter().enumerate() {
            let _ = writeln!(
                out,
                "  {}. article {}  ${:.4}  {} tokens  {}",
                rank + 1,
                a.article_id,
                a.cost_usd,
                a.total_tokens,
                format_timestamp(a.generated_at)
            );
        }
    }
    out
}

/// Read-only view over a [`RecordStore`]'s event log.
pub struct CostMonitor {
    store: Arc<dyn RecordStore>,
}

impl CostMonitor {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    async fn window(&self, days: u32) -> Result<Vec<OptimizationEvent>> {
        if days == 0 {
            return Err(Error::Validation("days must be at least 1".to_owned()));
        }
        let since = now_secs() - i64::from(days) * SECS_PER_DAY;
        self.store.events_since(since).await
    }

    pub async fn cost_statistics(&self, days: u32, limit: usize) -> Result<CostStatistics> {
        let events = self.window(days).await?;
        Ok(CostStatistics::from_events(&events, days, limit))
    }

    pub async fn performance_statistics(&self, days: u32) -> Result<PerformanceStatistics> {
        let events = self.window(days).await?;
        Ok(PerformanceStatistics::from_events(&events, days))
    }

    pub async fn expensive_articles(&self, days: u32, limit: usize) -> Result<Vec<ExpensiveArticle>> {
        let events = self.window(days).await?;
        Ok(expensive_from_events(&events, limit))
    }

    /// Bundles cost, performance and top spenders with a printable summary.
    #[instrument(skip(self))]
    pub async fn report(&self, days: u32) -> Result<CostReport> {
        let events = self.window(days).await?;
        let now = now_secs();
        let cost = CostStatistics::from_events(&events, days, usize::MAX);
        let performance = PerformanceStatistics::from_events(&events, days);
        let expensive_articles = expensive_from_events(&events, REPORT_EXPENSIVE_LIMIT);
        let summary = render_summary(days, now, &cost, &performance, &expensive_articles);
        Ok(CostReport {
            period_days: days,
            generated_at: now,
            cost,
            performance,
            expensive_articles,
            summary,
        })
    }
}
