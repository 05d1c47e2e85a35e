//! Synthetic load generator used to drive a running gateway.
//!
//! Each worker dials the gateway over UDP and sends one JSON record per
//! tick, built from a randomly chosen template.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::record::LogRecord;

const FALLBACK_LEVEL: &str = "INFO";

/// Per-worker ceiling; keeps the send period well above zero.
pub const MAX_RPS: u32 = 1_000_000;

const WORDS: &[&str] = &[
    "alpha", "bravo", "cache", "delta", "engine", "fabric", "gateway", "harbor", "index", "jigsaw",
    "kernel", "lambda", "matrix", "nexus", "orbit", "pixel", "quartz", "relay", "signal", "vector",
];

#[derive(thiserror::Error, Debug)]
pub enum LoadgenError {
    #[error("failed to read loadgen config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse loadgen config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid loadgen config: {0}")]
    Invalid(String),

    #[error("udp error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadgenConfig {
    /// Gateway address, e.g. "127.0.0.1:9999".
    pub target: String,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    pub workers: usize,
    /// Records per second, per worker.
    pub rps: u32,
    /// Upper bound of a random delay added before each send.
    pub jitter_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            rps: 100,
            jitter_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub app: String,
    pub service: String,
    /// Level -> relative weight.
    pub levels: BTreeMap<String, f64>,
    /// Level -> candidate messages. `{uuid}`, `{number}` and `{word}` are
    /// substituted on every use.
    pub messages: BTreeMap<String, Vec<String>>,
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub key: String,
    /// `uuid`, `number[:min,max]`, `price[:min,max]`, `float`, `productsku`;
    /// anything else yields a random word.
    #[serde(rename = "type")]
    pub kind: String,
}

impl LoadgenConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadgenError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| LoadgenError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LoadgenError> {
        if self.load.rps == 0 || self.load.rps > MAX_RPS {
            return Err(LoadgenError::Invalid(format!("load.rps must be between 1 and {}", MAX_RPS)));
        }
        if self.load.workers == 0 {
            return Err(LoadgenError::Invalid("load.workers must be positive".into()));
        }
        Ok(())
    }
}

/// Produces random records from one template.
pub struct Generator {
    template: TemplateConfig,
    rng: StdRng,
}

impl Generator {
    pub fn new(template: TemplateConfig) -> Self {
        Self::with_rng(template, StdRng::from_entropy())
    }

    pub fn with_rng(template: TemplateConfig, rng: StdRng) -> Self {
        Generator { template, rng }
    }

    pub fn generate(&mut self) -> LogRecord {
        let level = self.pick_level();
        let message = self.pick_message(&level);
        let mut record = LogRecord::new(level, &self.template.app, &self.template.service, message);
        for field in &self.template.fields {
            record
                .fields
                .insert(field.key.clone(), field_value(&mut self.rng, &field.kind));
        }
        record
    }

    fn pick_level(&mut self) -> String {
        let total: f64 = self.template.levels.values().filter(|w| **w > 0.0).sum();
        if total <= 0.0 {
            return FALLBACK_LEVEL.to_string();
        }
        let r = self.rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        for (level, weight) in &self.template.levels {
            if *weight <= 0.0 {
                continue;
            }
            cumulative += weight;
            if r < cumulative {
                return level.clone();
            }
        }
        FALLBACK_LEVEL.to_string()
    }

    fn pick_message(&mut self, level: &str) -> String {
        let template = match self.template.messages.get(level) {
            Some(candidates) if !candidates.is_empty() => candidates
                .choose(&mut self.rng)
                .cloned()
                .unwrap_or_default(),
            _ => return format!("Default message for level {}", level),
        };
        self.fill_placeholders(&template)
    }

    fn fill_placeholders(&mut self, template: &str) -> String {
        let mut out = template.to_string();
        while out.contains("{uuid}") {
            out = out.replacen("{uuid}", &uuid::Uuid::new_v4().to_string(), 1);
        }
        while out.contains("{number}") {
            let n: u32 = self.rng.gen_range(0..10_000);
            out = out.replacen("{number}", &n.to_string(), 1);
        }
        while out.contains("{word}") {
            out = out.replacen("{word}", random_word(&mut self.rng), 1);
        }
        out
    }
}

fn random_word(rng: &mut StdRng) -> &'static str {
    WORDS.choose(rng).copied().unwrap_or("word")
}

fn field_value(rng: &mut StdRng, kind: &str) -> Value {
    let (name, params) = match kind.split_once(':') {
        Some((name, params)) => (name, Some(params)),
        None => (kind, None),
    };

    match name {
        "uuid" => Value::String(uuid::Uuid::new_v4().to_string()),
        "number" => {
            let (min, max) = parse_range::<i64>(params).unwrap_or((0, 10_000));
            Value::from(rng.gen_range(min..=max))
        }
        "price" | "float" => {
            let (min, max) = parse_range::<f64>(params).unwrap_or((0.0, 1000.0));
            let price = rng.gen_range(min..=max);
            Value::from((price * 100.0).round() / 100.0)
        }
        "productsku" => Value::String(format!("SKU-{}", rng.gen_range(1000..=9999))),
        _ => Value::String(random_word(rng).to_string()),
    }
}

/// Parse "min,max"; rejects missing parts and inverted bounds.
fn parse_range<T>(params: Option<&str>) -> Option<(T, T)>
where
    T: std::str::FromStr + PartialOrd,
{
    let (min, max) = params?.split_once(',')?;
    let min: T = min.trim().parse().ok()?;
    let max: T = max.trim().parse().ok()?;
    (min <= max).then_some((min, max))
}

/// Send records to `config.target` at `config.load.rps` until `shutdown`
/// is cancelled.
pub async fn run_worker(id: usize, config: Arc<LoadgenConfig>, shutdown: CancellationToken) -> Result<(), LoadgenError> {
    let mut generators: Vec<Generator> = config.templates.iter().cloned().map(Generator::new).collect();
    if generators.is_empty() {
        tracing::warn!(worker = id, "no templates found, exiting");
        return Ok(());
    }

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(&config.target).await?;

    let period = Duration::from_secs(1) / config.load.rps.max(1);
    let jitter = config.load.jitter_ms;
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rng = StdRng::from_entropy();

    tracing::info!(worker = id, target = %config.target, ?period, "load worker started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(worker = id, "load worker stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                if jitter > 0 {
                    sleep(Duration::from_millis(rng.gen_range(0..jitter))).await;
                }
                let index = rng.gen_range(0..generators.len());
                let record = generators[index].generate();
                let payload = serde_json::to_vec(&record).map_err(std::io::Error::from)?;
                if let Err(e) = socket.send(&payload).await {
                    tracing::warn!(worker = id, error = %e, "could not send log");
                }
            }
        }
    }
}
