#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{OffsetDateTime, PrimitiveDateTime};
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, BufReader};

use crate::config::UsageConfig;
use crate::error::McError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub model: String,
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub cost: f64,
}

impl UsageEntry {
    fn named(model: &str) -> Self {
        Self {
            model: model.to_owned(),
            ..Self::default()
        }
    }

    fn add(&mut self, tokens: &Tokens, cost: f64) {
        self.input += tokens.input;
        self.output += tokens.output;
        self.cache_read += tokens.cache_read;
        self.cache_write += tokens.cache_write;
        self.cost += cost;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub today: UsageEntry,
    pub by_model: BTreeMap<String, UsageEntry>,
    pub last_updated: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct Tokens {
    input: u64,
    output: u64,
    cache_read: u64,
    cache_write: u64,
}

#[derive(Debug, Deserialize)]
struct LogRecord {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(rename = "_meta", default)]
    meta: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
}

/// Two field-naming conventions show up in the logs: the runtime's camelCase
/// and the provider's snake_case.
#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    input: Option<u64>,
    input_tokens: Option<u64>,
    output: Option<u64>,
    output_tokens: Option<u64>,
    #[serde(rename = "cacheRead")]
    cache_read: Option<u64>,
    cache_read_input_tokens: Option<u64>,
    #[serde(rename = "cacheWrite")]
    cache_write: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cost: Option<Value>,
}

impl RawUsage {
    fn tokens(&self) -> Tokens {
        Tokens {
            input: self.input.or(self.input_tokens).unwrap_or(0),
            output: self.output.or(self.output_tokens).unwrap_or(0),
            cache_read: self.cache_read.or(self.cache_read_input_tokens).unwrap_or(0),
            cache_write: self
                .cache_write
                .or(self.cache_creation_input_tokens)
                .unwrap_or(0),
        }
    }

    fn precomputed_cost(&self) -> Option<f64> {
        self.cost.as_ref()?.get("total")?.as_f64()
    }
}

#[derive(Debug, Clone)]
pub struct UsageAggregator {
    pricing: UsageConfig,
}

impl UsageAggregator {
    #[must_use]
    pub fn new(pricing: UsageConfig) -> Self {
        Self { pricing }
    }

    #[must_use]
    pub fn estimate_cost(&self, input: u64, output: u64, cache_read: u64, cache_write: u64) -> f64 {
        let per_m = |tokens: u64, price: f64| (tokens as f64 / 1e6) * price;
        per_m(input, self.pricing.input_per_mtok)
            + per_m(output, self.pricing.output_per_mtok)
            + per_m(cache_read, self.pricing.cache_read_per_mtok)
            + per_m(cache_write, self.pricing.cache_write_per_mtok)
    }

    pub async fn aggregate_file(&self, path: &Path, since_ms: i64) -> Result<UsageSummary, McError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| McError::io(path, e))?;
        self.aggregate(BufReader::new(file), since_ms)
            .await
            .map_err(|e| McError::io(path, e))
    }

    /// Folds a JSON-lines stream into per-model totals, holding one line in
    /// memory at a time. Lines are read as raw bytes, so one that is not
    /// valid UTF-8 is skipped like any other unparsable line.
    pub async fn aggregate<R>(&self, mut reader: R, since_ms: i64) -> std::io::Result<UsageSummary>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut today = UsageEntry::named("total");
        let mut by_model: BTreeMap<String, UsageEntry> = BTreeMap::new();

        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line).await? == 0 {
                break;
            }
            if line.trim_ascii().is_empty() {
                continue;
            }
            let Ok(record) = serde_json::from_slice::<LogRecord>(&line) else {
                continue;
            };
            if record_timestamp_ms(&record) < since_ms {
                continue;
            }
            if record.kind.as_deref() != Some("message") {
                continue;
            }
            let Some(message) = record.message.as_ref() else {
                continue;
            };
            let Some(usage) = message.get("usage") else {
                continue;
            };
            let Ok(usage) = RawUsage::deserialize(usage) else {
                continue;
            };

            let tokens = usage.tokens();
            let cost = usage.precomputed_cost().unwrap_or_else(|| {
                self.estimate_cost(tokens.input, tokens.output, tokens.cache_read, tokens.cache_write)
            });
            let model = model_name(message);

            today.add(&tokens, cost);
            by_model
                .entry(model.clone())
                .or_insert_with(|| UsageEntry::named(&model))
                .add(&tokens, cost);
        }

        Ok(UsageSummary {
            today,
            by_model,
            last_updated: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
        })
    }
}

fn record_timestamp_ms(record: &LogRecord) -> i64 {
    let raw = record
        .timestamp
        .as_ref()
        .or_else(|| record.meta.as_ref().and_then(|m| m.get("date")));
    match raw {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => parse_date_ms(s).unwrap_or(0),
        _ => 0,
    }
}

/// Offset-less forms such as `2026-10-19 08:00:00`, read as UTC.
const NAIVE_DATE_FORMATS: [&str; 2] = [
    "[year]-[month]-[day]T[hour]:[minute]:[second]",
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]",
];

fn parse_date_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    let dt = OffsetDateTime::parse(s, &Rfc3339)
        .ok()
        .or_else(|| parse_naive_utc(s));
    let Some(dt) = dt else {
        tracing::debug!(timestamp = s, "unrecognised log timestamp");
        return None;
    };
    i64::try_from(dt.unix_timestamp_nanos() / 1_000_000).ok()
}

fn parse_naive_utc(s: &str) -> Option<OffsetDateTime> {
    let normalized = s.replacen(' ', "T", 1);
    NAIVE_DATE_FORMATS.iter().find_map(|desc| {
        let format = time::format_description::parse(desc).ok()?;
        PrimitiveDateTime::parse(&normalized, format.as_slice())
            .ok()
            .map(PrimitiveDateTime::assume_utc)
    })
}

fn model_name(message: &Value) -> String {
    if let Some(model) = message.get("model").and_then(Value::as_str) {
        return model.to_owned();
    }
    message
        .get("api")
        .and_then(Value::as_str)
        .and_then(|api| api.rsplit('/').next())
        .map_or_else(|| "unknown".to_owned(), str::to_owned)
}

/// Most recently modified `*.jsonl` session log in `dir`.
pub fn latest_session_log(dir: &Path) -> Result<Option<PathBuf>, McError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(McError::io(dir, e)),
    };

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("jsonl") {
            continue;
        }
        let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
            continue;
        };
        if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, p)| p))
}

/// Epoch milliseconds of today's local midnight. Falls back to UTC when the
/// local offset cannot be determined.
#[must_use]
pub fn local_midnight_ms() -> i64 {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    midnight_ms(now)
}

#[must_use]
pub fn midnight_ms(now: OffsetDateTime) -> i64 {
    let midnight = now.replace_time(time::Time::MIDNIGHT);
    i64::try_from(midnight.unix_timestamp_nanos() / 1_000_000).unwrap_or(0)
}
