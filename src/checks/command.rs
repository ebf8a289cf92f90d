use super::CheckError;
use regex::Regex;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

// Each pattern narrows the previous match (first capture group if any).
pub struct CommandCheck {
    command: String,
    language: String,
    patterns: Vec<Regex>,
}

impl CommandCheck {
    pub fn new(
        command: &str,
        language: &str,
        patterns: &[String],
    ) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            command: command.to_string(),
            language: language.to_string(),
            patterns,
        })
    }

    pub async fn run(&self) -> Result<f64, CheckError> {
        let (shell, flag) = shell();
        debug!(command = %self.command, "запуск команды проверки");

        // The child is killed if the run is dropped, e.g. on timeout.
        let output = Command::new(shell)
            .arg(flag)
            .arg(&self.command)
            .env("LANG", &self.language)
            .env("LC_ALL", &self.language)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(CheckError::Spawn)?;

        if !output.status.success() {
            return Err(CheckError::ExitStatus {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        self.extract(&String::from_utf8_lossy(&output.stdout))
    }

    pub fn extract(&self, output: &str) -> Result<f64, CheckError> {
        let mut text = output.to_string();
        for pattern in &self.patterns {
            let Some(caps) = pattern.captures(&text) else {
                return Err(CheckError::PatternMiss {
                    pattern: pattern.as_str().to_string(),
                });
            };
            let found = caps.get(1).or_else(|| caps.get(0));
            text = found.map(|m| m.as_str().to_string()).unwrap_or_default();
            debug!(pattern = %pattern.as_str(), output = %text, "совпадение найдено");
        }

        let trimmed = text.trim();
        trimmed.parse::<f64>().map_err(|_| CheckError::Parse {
            text: trimmed.to_string(),
        })
    }
}

#[cfg(not(target_os = "windows"))]
fn shell() -> (&'static str, &'static str) {
    ("sh", "-c")
}

#[cfg(target_os = "windows")]
fn shell() -> (&'static str, &'static str) {
    ("cmd", "/C")
}
