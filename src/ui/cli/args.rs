use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueHint};
use serde_json::{Map, Value};

use crate::aln::node::MinMaxKind;
use crate::buffer::ErrorMode;
use crate::core::constraint::BoundKind;
use crate::training::{CurveFormat, TrainConfig};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fit and evaluate adaptive logic networks on CSV data"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Train a model on a CSV file and optionally save it
    Fit(FitArgs),
    /// Evaluate a saved model on every row of a CSV file
    Eval(EvalArgs),
    /// Print the JSON schema of the training configuration
    Schema,
}

#[derive(Debug, Args)]
pub struct FitArgs {
    /// Training data; one sample per row, output column included
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub data: PathBuf,

    /// Column holding the output (defaults to the last column)
    #[arg(long, value_name = "INDEX")]
    pub output_column: Option<usize>,

    /// Where to save the trained model
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub save: Option<PathBuf>,

    /// Training configuration as JSON (see `schema`)
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Override configuration fields (key=value, nested keys with dots)
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub params: Vec<KeyValue>,

    /// Split leaves whose mean squared error exceeds this threshold
    #[arg(long, value_name = "T", conflicts_with = "significance")]
    pub mse: Option<f64>,

    /// F-test significance percentage for splitting (default 90)
    #[arg(long, value_name = "PERCENT")]
    pub significance: Option<f64>,

    /// Overrides `max_epochs`
    #[arg(long, value_name = "N")]
    pub epochs: Option<usize>,

    /// Overrides `learn_rate`
    #[arg(long, value_name = "RATE")]
    pub learn_rate: Option<f64>,

    /// Overrides `split_interval`
    #[arg(long, value_name = "N")]
    pub split_interval: Option<usize>,

    /// Overrides `seed`
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Buffer capacity (defaults to the number of rows)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    pub capacity: Option<u64>,

    /// Number of training calls
    #[arg(
        long,
        default_value_t = 1,
        value_name = "N",
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    pub rounds: u64,

    /// Halve each buffered output's distance to its neighbour before training
    #[arg(long)]
    pub reduce_noise: bool,

    /// Variable bound on the root region, e.g. `0:epsilon=0.01` or `1:max=5`
    #[arg(long = "bound", value_name = "VAR:KIND=VALUE", value_parser = parse_bound)]
    pub bounds: Vec<BoundArg>,

    /// Start from a selector with this many leaves instead of a single leaf
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(2..))]
    pub root_children: Option<u64>,

    /// Kind of the starting selector (min or max)
    #[arg(long, default_value = "max", value_name = "KIND")]
    pub root_kind: MinMaxKind,

    /// After training, invert the model so this input column becomes the output
    #[arg(long, value_name = "INDEX")]
    pub invert: Option<usize>,

    /// File to dump the per-epoch learning curve after completion
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub dump_file: Option<PathBuf>,

    /// Format for the dump file (guessed from the extension when omitted)
    #[arg(long, value_enum, value_name = "FORMAT")]
    pub dump_format: Option<CurveFormat>,
}

#[derive(Debug, Args)]
pub struct EvalArgs {
    /// Saved model
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub model: PathBuf,

    /// Rows to evaluate; the output column may hold targets or anything
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub data: PathBuf,

    /// Disable pruning while evaluating
    #[arg(long)]
    pub exhaustive: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue {
    key: String,
    value: Value,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundArg {
    pub var: usize,
    pub kind: BoundKind,
    pub value: f64,
}

impl FitArgs {
    pub fn error_mode(&self) -> Result<ErrorMode> {
        let mode = match (self.mse, self.significance) {
            (Some(threshold), _) => ErrorMode::FixedMse { threshold },
            (None, Some(significance)) => ErrorMode::FTest { significance },
            (None, None) => ErrorMode::default(),
        };
        mode.validate().context("invalid split criterion")?;
        Ok(mode)
    }

    /// Config file (or defaults) with `--param` overrides, then the
    /// dedicated flags, applied.
    pub fn train_config(&self) -> Result<TrainConfig> {
        let base = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str::<Value>(&text)
                    .with_context(|| format!("{} is not valid JSON", path.display()))?
            }
            None => serde_json::to_value(TrainConfig::default())?,
        };
        let mut value = base;
        apply_overrides(&mut value, &self.params)?;
        let mut config: TrainConfig =
            serde_json::from_value(value).context("invalid training configuration")?;
        if let Some(n) = self.epochs {
            config.max_epochs = n;
        }
        if let Some(lr) = self.learn_rate {
            config.learn_rate = lr;
        }
        if let Some(n) = self.split_interval {
            config.split_interval = n;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        config.validate()?;
        Ok(config)
    }
}

fn apply_overrides(target: &mut Value, overrides: &[KeyValue]) -> Result<()> {
    for kv in overrides {
        set_path(target, &kv.key, kv.value.clone())
            .with_context(|| format!("failed to set '{}'", kv.key))?;
    }
    Ok(())
}

fn set_path(target: &mut Value, path: &str, new_value: Value) -> Result<()> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        bail!("empty key is not allowed");
    };

    let mut current = target;
    for seg in parents {
        current = ensure_object(current)?
            .entry((*seg).to_string())
            .or_insert(Value::Null);
    }
    ensure_object(current)?.insert((*last).to_string(), new_value);
    Ok(())
}

fn ensure_object(value: &mut Value) -> Result<&mut Map<String, Value>> {
    if value.is_null() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => Ok(map),
        other => bail!("cannot set nested field on non-object value: {other:?}"),
    }
}

fn parse_key_value(raw: &str) -> Result<KeyValue, String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| "expected KEY=VALUE".to_string())?;
    let key = key.trim();
    if key.is_empty() {
        return Err("key cannot be empty".to_string());
    }

    Ok(KeyValue {
        key: key.to_string(),
        value: parse_literal(value.trim()),
    })
}

fn parse_literal(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::String(String::new());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn parse_bound(raw: &str) -> Result<BoundArg, String> {
    let inner = || -> Result<BoundArg> {
        let (lhs, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("expected VAR:KIND=VALUE"))?;
        let (var, kind) = lhs
            .split_once(':')
            .ok_or_else(|| anyhow!("expected VAR:KIND before '='"))?;
        Ok(BoundArg {
            var: var.trim().parse().context("variable index")?,
            kind: kind.trim().parse().context("bound kind")?,
            value: value.trim().parse().context("bound value")?,
        })
    };
    inner().map_err(|e| format!("{e:#}"))
}
