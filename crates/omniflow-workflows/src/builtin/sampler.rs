//! Sampler Node - picks entries from a list of options
//!
//! Methods:
//! - `random`: shuffle, take the first `count`
//! - `top-k`: random sample from the first `min(count * 2, len)` options
//! - `top-p`: currently identical to `random` (no nucleus cut-off)
//! - `temperature`: weighted draw without replacement, favouring early options
//! - anything else: `random`

use anyhow::Result;
use async_trait::async_trait;
use omniflow_core::{value_as_f64, value_as_text, value_as_u64, Node, PortMap};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::node_types;
use crate::executor::{resolve_input, NodeExecutor};

/// Sampling strategy selected by the `samplingMethod` port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SamplingMethod {
    Random,
    TopP,
    TopK,
    Temperature,
    /// Unrecognized name, sampled like `Random`
    Other(String),
}

impl SamplingMethod {
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "random" => Self::Random,
            "top-p" => Self::TopP,
            "top-k" => Self::TopK,
            "temperature" => Self::Temperature,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "random"),
            Self::TopP => write!(f, "top-p"),
            Self::TopK => write!(f, "top-k"),
            Self::Temperature => write!(f, "temperature"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Split an options value into non-blank entries.
///
/// Accepts a newline-delimited string or a JSON array.
pub fn parse_options(value: &Value) -> Vec<String> {
    let entries: Vec<String> = match value {
        Value::Array(items) => items.iter().map(value_as_text).collect(),
        other => value_as_text(other)
            .lines()
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect(),
    };
    entries
        .into_iter()
        .filter(|entry| !entry.trim().is_empty())
        .collect()
}

/// Uniform sample of `count` options without replacement
pub fn random_sample<R: Rng + ?Sized>(options: &[String], count: usize, rng: &mut R) -> Vec<String> {
    let mut shuffled = options.to_vec();
    shuffled.shuffle(rng);
    shuffled.truncate(count.min(options.len()));
    shuffled
}

/// Random sample restricted to the first `count * 2` options
pub fn top_k_sample<R: Rng + ?Sized>(options: &[String], count: usize, rng: &mut R) -> Vec<String> {
    let pool = count.saturating_mul(2).min(options.len());
    random_sample(&options[..pool], count, rng)
}

/// Weighted sample without replacement.
///
/// Option `i` gets weight `exp(-i / max(temperature * 10, 0.01))`. After each
/// draw the chosen option is removed and the remaining weights renormalized.
/// Below 0.01 the first `count` options are returned as-is.
pub fn temperature_sample<R: Rng + ?Sized>(
    options: &[String],
    count: usize,
    temperature: f64,
    rng: &mut R,
) -> Vec<String> {
    if temperature < 0.01 {
        return options.iter().take(count).cloned().collect();
    }

    let scale = (temperature * 10.0).max(0.01);
    let mut pool: Vec<(&String, f64)> = options
        .iter()
        .enumerate()
        .map(|(i, option)| (option, (-(i as f64) / scale).exp()))
        .collect();

    let mut selected = Vec::with_capacity(count.min(options.len()));
    while selected.len() < count && !pool.is_empty() {
        let total: f64 = pool.iter().map(|(_, w)| w).sum();
        let r: f64 = rng.gen();

        let mut cumulative = 0.0;
        let mut chosen = 0;
        for (j, (_, weight)) in pool.iter().enumerate() {
            cumulative += weight / total;
            if r <= cumulative {
                chosen = j;
                break;
            }
        }

        selected.push(pool.remove(chosen).0.clone());
    }
    selected
}

/// Outputs `{sampled, count, config}`
pub struct SamplerExecutor {
    seed: Option<u64>,
}

impl SamplerExecutor {
    /// A fixed `seed` makes every run draw the same sequence
    pub fn new(seed: Option<u64>) -> Self {
        Self { seed }
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

#[async_trait]
impl NodeExecutor for SamplerExecutor {
    fn node_type(&self) -> &str {
        node_types::SAMPLER
    }

    async fn execute(
        &self,
        node: &Node,
        inputs: &PortMap,
        _token: &CancellationToken,
    ) -> Result<PortMap> {
        let options = resolve_input(node, inputs, "options", "text")
            .map(parse_options)
            .unwrap_or_default();

        let mut outputs = PortMap::new();
        if options.is_empty() {
            outputs.insert("sampled".into(), Value::String(String::new()));
            outputs.insert("count".into(), json!(0));
            return Ok(outputs);
        }

        let method = node
            .local_value("samplingMethod")
            .map(|v| SamplingMethod::parse(&value_as_text(v)))
            .unwrap_or(SamplingMethod::Random);
        let count = node
            .local_value("count")
            .map(|v| value_as_u64(v).unwrap_or(1))
            .unwrap_or(1) as usize;
        let temperature = node
            .local_value("temperature")
            .and_then(value_as_f64)
            .unwrap_or(1.0);

        let mut rng = self.rng();
        let sampled = match method {
            SamplingMethod::TopK => top_k_sample(&options, count, &mut rng),
            SamplingMethod::Temperature => temperature_sample(&options, count, temperature, &mut rng),
            SamplingMethod::Random | SamplingMethod::TopP | SamplingMethod::Other(_) => {
                random_sample(&options, count, &mut rng)
            }
        };

        debug!(
            node_id = %node.id,
            method = %method,
            requested = count,
            sampled = sampled.len(),
            "Sampled options"
        );

        let config = json!({
            "method": method.to_string(),
            "temperature": temperature,
            "count": count,
            "totalOptions": options.len(),
        });

        outputs.insert("sampled".into(), Value::String(sampled.join("\n")));
        outputs.insert("count".into(), json!(sampled.len()));
        outputs.insert("config".into(), Value::String(config.to_string()));
        Ok(outputs)
    }
}
