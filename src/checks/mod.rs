pub mod command;
pub mod disk_io;
pub mod system;

use crate::config::{CheckKind, CheckSpec, ConfigError};
use command::CommandCheck;
use disk_io::DiskIoCheck;
use system::{CpuCheck, DiskUsageCheck, LoadCheck, MemoryCheck};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("не удалось запустить команду: {0}")]
    Spawn(std::io::Error),
    #[error("команда завершилась с кодом {code:?}: {stderr}")]
    ExitStatus { code: Option<i32>, stderr: String },
    #[error("регулярное выражение '{pattern}' не нашло совпадений")]
    PatternMiss { pattern: String },
    #[error("не удалось разобрать число из '{text}'")]
    Parse { text: String },
    #[error("метрика недоступна: {0}")]
    MetricUnavailable(String),
    #[error("ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),
    #[error("накапливается базовое значение счётчика")]
    Warmup,
}

// Created once per configured check and reused, so variants may keep state.
pub enum Check {
    Command(CommandCheck),
    Cpu(CpuCheck),
    Memory(MemoryCheck),
    Load(LoadCheck),
    DiskUsage(DiskUsageCheck),
    DiskIo(DiskIoCheck),
}

impl Check {
    pub fn from_spec(spec: &CheckSpec) -> Result<Self, ConfigError> {
        let check = match &spec.kind {
            CheckKind::Command {
                command,
                language,
                patterns,
            } => Self::Command(CommandCheck::new(command, language, patterns).map_err(
                |err| {
                    ConfigError::Validation(format!(
                        "проверка '{}': некорректное регулярное выражение: {err}",
                        spec.name
                    ))
                },
            )?),
            CheckKind::Cpu { sample } => Self::Cpu(CpuCheck::new(*sample)),
            CheckKind::Memory => Self::Memory(MemoryCheck::new()),
            CheckKind::Load => Self::Load(LoadCheck::new()),
            CheckKind::DiskUsage { path } => Self::DiskUsage(DiskUsageCheck::new(path.clone())),
            CheckKind::DiskIo { compare_interval } => Self::DiskIo(DiskIoCheck::new(
                window_len(*compare_interval, spec.check_interval),
            )),
        };
        Ok(check)
    }

    pub async fn run(&mut self) -> Result<f64, CheckError> {
        let value = match self {
            Self::Command(check) => check.run().await?,
            Self::Cpu(check) => check.run().await?,
            Self::Memory(check) => check.run()?,
            Self::Load(check) => check.run()?,
            Self::DiskUsage(check) => check.run()?,
            Self::DiskIo(check) => check.run()?,
        };
        if !value.is_finite() {
            return Err(CheckError::Parse {
                text: value.to_string(),
            });
        }
        Ok(value)
    }
}

pub fn window_len(
    compare_interval: std::time::Duration,
    check_interval: std::time::Duration,
) -> usize {
    let interval_ms = check_interval.as_millis();
    if interval_ms == 0 {
        return 1;
    }
    ((compare_interval.as_millis() / interval_ms) as usize).max(1)
}
