//! Deep research delegated to an external Python runner.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::bot::render::preview;
use crate::config::DeepResearchConfig;
use crate::error::BotError;

const RUNNER_SCRIPT: &str = "run_deep_research.py";

#[async_trait]
pub trait DeepResearch: Send + Sync {
    /// Answer `query`. An empty string means the runner produced no answer.
    async fn run(&self, query: &str) -> Result<String, BotError>;
}

/// Read `KEY=value` pairs from a dotenv file for keys not already in `current`.
/// Malformed lines are logged and skipped.
pub fn load_env_file(
    path: &Path,
    current: &HashMap<String, String>,
) -> Result<Vec<(String, String)>, BotError> {
    let iter = dotenvy::from_path_iter(path).map_err(|e| BotError::parse("env file", e))?;
    let mut vars = Vec::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                if !current.contains_key(&key) {
                    vars.push((key, value));
                }
            }
            Err(dotenvy::Error::Io(e)) => return Err(e.into()),
            Err(e) => warn!("Skipping line in {}: {}", path.display(), e),
        }
    }
    Ok(vars)
}

#[derive(Deserialize)]
struct RunnerOutput {
    final_answer: Option<serde_json::Value>,
    prediction: Option<serde_json::Value>,
}

/// `final_answer`, else `prediction`, else `""`. Only non-empty strings count.
pub fn read_answer(json: &str) -> Result<String, BotError> {
    let output: RunnerOutput =
        serde_json::from_str(json).map_err(|e| BotError::parse("deep research output", e))?;
    let answer = [output.final_answer, output.prediction]
        .into_iter()
        .flatten()
        .find_map(|v| match v {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s),
            _ => None,
        })
        .unwrap_or_default();
    Ok(answer)
}

/// Runs `<python> -u run_deep_research.py --query ... --output_file ...`.
pub struct SubprocessResearch {
    dir: PathBuf,
    env_file: Option<PathBuf>,
    model: Option<String>,
    python: String,
    timeout: Option<Duration>,
}

impl SubprocessResearch {
    pub fn new(config: &DeepResearchConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            env_file: config.env_file.clone(),
            model: config.model.clone(),
            python: config.python.clone(),
            timeout: config.timeout,
        }
    }

    fn script(&self) -> PathBuf {
        self.dir.join(RUNNER_SCRIPT)
    }
}

#[async_trait]
impl DeepResearch for SubprocessResearch {
    async fn run(&self, query: &str) -> Result<String, BotError> {
        let script = self.script();
        if !script.exists() {
            return Err(BotError::NotFound(format!(
                "deep research runner {}",
                script.display()
            )));
        }

        // Removed when dropped, whatever the outcome.
        let output_file = tempfile::Builder::new()
            .prefix("deep_research_")
            .suffix(".json")
            .tempfile()?;

        let mut cmd = Command::new(&self.python);
        cmd.arg("-u")
            .arg(&script)
            .arg("--query")
            .arg(query)
            .arg("--output_file")
            .arg(output_file.path());
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(&self.dir).kill_on_drop(true);

        if let Some(env_file) = &self.env_file {
            if env_file.exists() {
                let current: HashMap<String, String> = std::env::vars().collect();
                cmd.envs(load_env_file(env_file, &current)?);
            } else {
                warn!("Deep research env file {} not found", env_file.display());
            }
        }

        info!("🔬 Deep research: \"{}\"", preview(query, 100));
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| BotError::Timeout(limit))??,
            None => cmd.output().await?,
        };
        if !output.status.success() {
            return Err(BotError::subprocess(&self.python, &output));
        }

        let json = tokio::fs::read_to_string(output_file.path()).await?;
        let answer = read_answer(&json)?;
        info!("🔬 Deep research answered ({} chars)", answer.chars().count());
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_answer_prefers_final_answer() {
        let json = r#"{"final_answer": "42", "prediction": "41"}"#;
        assert_eq!(read_answer(json).unwrap(), "42");
    }

    #[test]
    fn test_read_answer_falls_back_to_prediction() {
        assert_eq!(read_answer(r#"{"final_answer": "", "prediction": "41"}"#).unwrap(), "41");
        assert_eq!(read_answer(r#"{"prediction": "41"}"#).unwrap(), "41");
        assert_eq!(read_answer(r#"{"final_answer": null, "prediction": "41"}"#).unwrap(), "41");
    }

    #[test]
    fn test_read_answer_nothing() {
        assert_eq!(read_answer(r#"{"other": 1}"#).unwrap(), "");
        assert_eq!(read_answer(r#"{"final_answer": 3}"#).unwrap(), "");
    }

    #[test]
    fn test_read_answer_malformed() {
        assert!(matches!(read_answer("not json"), Err(BotError::Parse { .. })));
    }

    #[test]
    fn test_load_env_file_only_fills_missing() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "OPENAI_API_KEY=from-file").unwrap();
        writeln!(file, "SERPER_API_KEY=\"quoted\"").unwrap();
        file.flush().unwrap();

        let mut current = HashMap::new();
        current.insert("OPENAI_API_KEY".to_string(), "from-env".to_string());

        let vars = load_env_file(file.path(), &current).unwrap();
        assert_eq!(vars, vec![("SERPER_API_KEY".to_string(), "quoted".to_string())]);
    }

    #[test]
    fn test_load_env_file_skips_malformed_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "OPENAI_API_KEY=from-file").unwrap();
        writeln!(file, "this line has no equals sign").unwrap();
        writeln!(file, "SERPER_API_KEY=serper").unwrap();
        file.flush().unwrap();

        let vars = load_env_file(file.path(), &HashMap::new()).unwrap();
        assert_eq!(
            vars,
            vec![
                ("OPENAI_API_KEY".to_string(), "from-file".to_string()),
                ("SERPER_API_KEY".to_string(), "serper".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_script_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let research = SubprocessResearch::new(&DeepResearchConfig {
            dir: dir.path().to_path_buf(),
            env_file: None,
            model: None,
            python: "python".to_string(),
            timeout: None,
        });
        assert!(matches!(research.run("q").await, Err(BotError::NotFound(_))));
    }
}
