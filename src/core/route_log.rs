//! Routing-decision sink: async JSONL appender plus in-memory aggregates.
//!
//! Every completed request emits one [`RouteRecord`]. Emission never blocks
//! the response path: records go through a bounded channel to a background
//! writer task. The durable store behind the file (pruning to the retention
//! horizon, dashboard queries) is an external concern; this module only
//! appends and keeps the lightweight counters served by `GET /stats`.

use crate::core::catalog::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

/// One routing decision, as persisted to the metrics store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub original_model: String,
    pub routed_model: String,
    pub actual_model: String,
    pub tier: Tier,
    pub reason: String,
    pub confidence: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub original_cost_usd: f64,
    pub actual_cost_usd: f64,
    pub savings_usd: f64,
    pub escalated: bool,
    pub escalation_chain: Vec<String>,
    pub response_time_ms: u64,
    pub had_tool_calls: bool,
    pub is_dry_run: bool,
    pub is_override: bool,
    pub is_passthrough: bool,
    pub streamed: bool,
    /// Last user text; populated only when content logging is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Default)]
struct Aggregates {
    total_requests: u64,
    escalated: u64,
    passthrough: u64,
    overridden: u64,
    dry_run: u64,
    streamed: u64,
    tool_calls: u64,
    input_tokens: u64,
    output_tokens: u64,
    total_savings_usd: f64,
    total_actual_cost_usd: f64,
    tier_counts: HashMap<&'static str, u64>,
}

/// Async route-record sink with buffered writes.
pub struct RouteLog {
    sender: mpsc::Sender<RouteRecord>,
    aggregates: RwLock<Aggregates>,
    log_content: bool,
}

const CHANNEL_CAPACITY: usize = 1024;

impl RouteLog {
    /// Create the sink and spawn its background writer task.
    pub fn new(log_path: PathBuf, log_content: bool) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel::<RouteRecord>(CHANNEL_CAPACITY);

        let path = log_path.clone();
        tokio::spawn(async move {
            Self::writer_task(receiver, path).await;
        });

        tracing::info!(path = %log_path.display(), "route log sink started");

        Arc::new(Self {
            sender,
            aggregates: RwLock::new(Aggregates::default()),
            log_content,
        })
    }

    /// Emit a record. Non-blocking; a full channel drops the record with a
    /// warning rather than delaying the response.
    pub fn record(&self, mut record: RouteRecord) {
        if !self.log_content {
            record.prompt = None;
        }

        if let Ok(mut aggregates) = self.aggregates.write() {
            aggregates.total_requests += 1;
            aggregates.escalated += record.escalated as u64;
            aggregates.passthrough += record.is_passthrough as u64;
            aggregates.overridden += record.is_override as u64;
            aggregates.dry_run += record.is_dry_run as u64;
            aggregates.streamed += record.streamed as u64;
            aggregates.tool_calls += record.had_tool_calls as u64;
            aggregates.input_tokens += record.input_tokens;
            aggregates.output_tokens += record.output_tokens;
            aggregates.total_savings_usd += record.savings_usd;
            aggregates.total_actual_cost_usd += record.actual_cost_usd;
            *aggregates.tier_counts.entry(record.tier.as_str()).or_insert(0) += 1;
        }

        if let Err(e) = self.sender.try_send(record) {
            tracing::warn!(error = %e, "route log channel full, dropping record");
        }
    }

    /// Aggregated view for the `/stats` endpoint.
    pub fn stats(&self) -> serde_json::Value {
        let aggregates = match self.aggregates.read() {
            Ok(aggregates) => aggregates,
            Err(_) => return serde_json::json!({}),
        };
        serde_json::json!({
            "totalRequests": aggregates.total_requests,
            "escalated": aggregates.escalated,
            "passthrough": aggregates.passthrough,
            "overridden": aggregates.overridden,
            "dryRun": aggregates.dry_run,
            "streamed": aggregates.streamed,
            "toolCalls": aggregates.tool_calls,
            "inputTokens": aggregates.input_tokens,
            "outputTokens": aggregates.output_tokens,
            "totalSavingsUsd": aggregates.total_savings_usd,
            "totalActualCostUsd": aggregates.total_actual_cost_usd,
            "tierCounts": &aggregates.tier_counts,
        })
    }

    /// Background task that appends records to the JSONL file.
    async fn writer_task(mut receiver: mpsc::Receiver<RouteRecord>, log_path: PathBuf) {
        if let Some(parent) = log_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::error!(error = %e, "failed to create route log directory");
                return;
            }
        }

        let mut file = match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                tracing::error!(error = %e, path = %log_path.display(), "failed to open route log");
                return;
            }
        };

        while let Some(record) = receiver.recv().await {
            let line = match serde_json::to_string(&record) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize route record");
                    continue;
                }
            };
            if let Err(e) = file.write_all(format!("{}\n", line).as_bytes()).await {
                tracing::error!(error = %e, "failed to write route record");
            }
            if let Err(e) = file.flush().await {
                tracing::error!(error = %e, "failed to flush route log");
            }
        }
    }
}

impl RouteRecord {
    /// A zeroed record scaffold for the given request identity. Callers fill
    /// in the execution outcome before emitting.
    pub fn new(request_id: String, original_model: String, tier: Tier) -> Self {
        Self {
            timestamp: Utc::now(),
            request_id,
            routed_model: original_model.clone(),
            actual_model: original_model.clone(),
            original_model,
            tier,
            reason: String::new(),
            confidence: 0.0,
            input_tokens: 0,
            output_tokens: 0,
            original_cost_usd: 0.0,
            actual_cost_usd: 0.0,
            savings_usd: 0.0,
            escalated: false,
            escalation_chain: Vec::new(),
            response_time_ms: 0,
            had_tool_calls: false,
            is_dry_run: false,
            is_override: false,
            is_passthrough: false,
            streamed: false,
            prompt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(tier: Tier) -> RouteRecord {
        let mut record = RouteRecord::new("req-1".to_string(), "openai/gpt-4o".to_string(), tier);
        record.savings_usd = 0.5;
        record.input_tokens = 100;
        record.output_tokens = 20;
        record
    }

    #[tokio::test]
    async fn test_record_updates_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let log = RouteLog::new(dir.path().join("routes.jsonl"), false);

        log.record(sample_record(Tier::Heartbeat));
        let mut escalated = sample_record(Tier::Complex);
        escalated.escalated = true;
        log.record(escalated);

        let stats = log.stats();
        assert_eq!(stats["totalRequests"], 2);
        assert_eq!(stats["escalated"], 1);
        assert_eq!(stats["inputTokens"], 200);
        assert_eq!(stats["tierCounts"]["heartbeat"], 1);
        assert_eq!(stats["tierCounts"]["complex"], 1);
        assert!((stats["totalSavingsUsd"].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_writer_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.jsonl");
        let log = RouteLog::new(path.clone(), false);

        log.record(sample_record(Tier::Simple));

        // Writer runs on a background task; give it a moment
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if path.exists() && std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
                break;
            }
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: RouteRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.request_id, "req-1");
        assert_eq!(parsed.tier, Tier::Simple);
    }

    #[tokio::test]
    async fn test_prompt_stripped_unless_content_logging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("routes.jsonl");
        let log = RouteLog::new(path.clone(), false);

        let mut record = sample_record(Tier::Moderate);
        record.prompt = Some("secret prompt".to_string());
        log.record(record);

        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if path.exists() && std::fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
                break;
            }
        }

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("secret prompt"));
    }
}
