//! Model executor that shells out to the python model scripts
//!
//! Layout expected in `model_dir`:
//! - `build_model_production.py <model>` creates an untrained model
//! - `training_production.py <model> <rows...>` trains in place
//! - `inference_production.py <model> <rows...>` prints a `Model output:` section
//!
//! Rows are flattened into positional arguments with 6 decimals each.

use crate::error::ExecutorError;
use crate::models::executor::{FeatureRow, ModelExecutor, TrainingRow};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;

const BUILD_SCRIPT: &str = "build_model_production.py";
const TRAIN_SCRIPT: &str = "training_production.py";
const INFER_SCRIPT: &str = "inference_production.py";
const MODEL_FILE: &str = "production.h5";
const OUTPUT_MARKER: &str = "Model output:";

#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    interpreter: String,
    model_dir: PathBuf,
}

impl ProcessExecutor {
    pub fn new(interpreter: impl Into<String>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            interpreter: interpreter.into(),
            model_dir: model_dir.into(),
        }
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILE)
    }

    /// Create the model file if it does not exist yet
    pub async fn prepare(&self) -> Result<(), ExecutorError> {
        let model = self.model_path();
        if model.exists() {
            return Ok(());
        }

        log::info!("creating production model at {}", model.display());
        let output = self.run(BUILD_SCRIPT, Vec::new()).await?;
        check_status(&output)?;
        log::debug!("production model created");
        Ok(())
    }

    async fn run(&self, script: &str, args: Vec<String>) -> Result<Output, ExecutorError> {
        let output = Command::new(&self.interpreter)
            .arg(self.model_dir.join(script))
            .arg(self.model_path())
            .args(args)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl ModelExecutor for ProcessExecutor {
    async fn train(&self, rows: &[TrainingRow]) -> Result<(), ExecutorError> {
        let mut args = Vec::with_capacity(rows.len() * 14);
        for row in rows {
            args.extend(row.input.values().iter().map(|v| format_value(*v)));
            args.push(format_value(row.target));
        }

        log::trace!("calling {} with {} rows", TRAIN_SCRIPT, rows.len());
        let output = self.run(TRAIN_SCRIPT, args).await?;
        check_status(&output)
    }

    async fn infer(&self, rows: &[FeatureRow]) -> Result<Vec<f64>, ExecutorError> {
        let args = rows
            .iter()
            .flat_map(|row| row.values())
            .map(format_value)
            .collect();

        log::trace!("calling {} with {} rows", INFER_SCRIPT, rows.len());
        let output = self.run(INFER_SCRIPT, args).await?;
        check_status(&output)?;

        let predictions = parse_predictions(&String::from_utf8_lossy(&output.stdout))?;
        if predictions.len() != rows.len() {
            return Err(ExecutorError::ShapeMismatch {
                expected: rows.len(),
                actual: predictions.len(),
            });
        }
        Ok(predictions)
    }
}

fn format_value(v: f64) -> String {
    format!("{:.6}", v)
}

fn check_status(output: &Output) -> Result<(), ExecutorError> {
    if output.status.success() {
        return Ok(());
    }
    Err(ExecutorError::Process {
        status: output.status.to_string(),
        output: combined(output),
    })
}

fn combined(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}

/// Extract every number printed after the output marker, e.g. a numpy
/// array like `[[0.12]\n [0.]]`.
pub(crate) fn parse_predictions(stdout: &str) -> Result<Vec<f64>, ExecutorError> {
    let (_, section) = stdout
        .split_once(OUTPUT_MARKER)
        .ok_or_else(|| ExecutorError::MalformedOutput("missing result section".to_string()))?;

    section
        .split(|c: char| c == '[' || c == ']' || c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| match token.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            Ok(_) => Err(ExecutorError::MalformedOutput(format!("non-finite prediction '{}'", token))),
            Err(_) => Err(ExecutorError::MalformedOutput(format!("unexpected token '{}'", token))),
        })
        .collect()
}
