use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

const DEFAULT_CONFIG_YAML: &str = include_str!("../healthcheck.yaml.example");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось записать файл конфигурации {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
    #[error("путь '{0}' не найден в конфигурации")]
    PathNotFound(String),
}

// Untyped so arbitrary paths can be read and overwritten at runtime.
// Always normalized: every default key present, every value of the right type.
#[derive(Debug, Clone)]
pub struct ConfigTree {
    root: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DaemonConfig {
    pub listen: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ScoreConfig {
    pub min: f64,
    pub max: f64,
    pub lower_is_better: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckKind {
    Command {
        command: String,
        language: String,
        patterns: Vec<String>,
    },
    Cpu {
        sample: Duration,
    },
    Memory,
    Load,
    DiskUsage {
        path: PathBuf,
    },
    DiskIo {
        compare_interval: Duration,
    },
}

impl CheckKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Cpu { .. } => "cpu",
            Self::Memory => "ram",
            Self::Load => "load",
            Self::DiskUsage { .. } => "disk_usage",
            Self::DiskIo { .. } => "disk_io",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckSpec {
    pub name: String,
    pub kind: CheckKind,
    pub min: f64,
    pub max: f64,
    pub coefficient: f64,
    pub lower_is_better: bool,
    pub check_interval: Duration,
    pub check_timeout: Duration,
    pub ignore_if_above_average: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub daemon: DaemonConfig,
    pub score: ScoreConfig,
    pub checks: BTreeMap<String, CheckSpec>,
    pub checks_to_perform: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawCheck {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    regex: Option<Vec<String>>,
    #[serde(default = "default_coeff")]
    coeff: f64,
    #[serde(default = "default_min")]
    min: f64,
    #[serde(default = "default_max")]
    max: f64,
    #[serde(default = "default_lower_is_better")]
    lower_is_better: bool,
    #[serde(default = "default_check_interval")]
    check_interval: f64,
    #[serde(default = "default_check_timeout")]
    check_timeout: f64,
    #[serde(default)]
    ignore_if_up_average: bool,
    #[serde(default = "default_command_run_language")]
    command_run_language: String,
    #[serde(default = "default_cpu_test_duration")]
    cpu_test_duration: f64,
    #[serde(default = "default_disk_test_path")]
    disk_test_path: String,
    #[serde(default = "default_compare_interval")]
    compare_interval: f64,
}

impl ConfigTree {
    pub fn load_or_init(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        if !path_ref.exists() {
            warn!(path = %path_display, "файл конфигурации не найден, создаётся файл по умолчанию");
            fs::write(path_ref, DEFAULT_CONFIG_YAML).map_err(|source| ConfigError::Write {
                path: path_display.clone(),
                source,
            })?;
        }

        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;
        Self::from_yaml(&text, &path_display)
    }

    pub fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let user: Value = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        Ok(Self::from_user_value(user))
    }

    pub fn example_yaml() -> &'static str {
        DEFAULT_CONFIG_YAML
    }

    fn from_user_value(user: Value) -> Self {
        let mut root = match user {
            Value::Mapping(map) => map,
            Value::Null => Mapping::new(),
            _ => {
                warn!("корень конфигурации должен быть отображением, используется конфигурация по умолчанию");
                Mapping::new()
            }
        };

        normalize(&mut root);

        Self {
            root: Value::Mapping(root),
        }
    }

    // Segments are separated by `/` or `.`; an empty path is the whole document.
    pub fn get(&self, path: &str) -> Result<&Value, ConfigError> {
        let mut node = &self.root;
        for segment in split_path(path) {
            node = child(node, &segment).ok_or_else(|| ConfigError::PathNotFound(path.to_string()))?;
        }
        Ok(node)
    }

    // Intermediate segments must exist. A value the loader would replace
    // with a default is rejected.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), ConfigError> {
        let segments = split_path(path);
        let Some((last, parents)) = segments.split_last() else {
            return Err(ConfigError::Validation(
                "нельзя заменить корень конфигурации целиком".to_string(),
            ));
        };

        let mut candidate = self.root.clone();
        let mut node = &mut candidate;
        for segment in parents {
            node = child_mut(node, segment)
                .ok_or_else(|| ConfigError::PathNotFound(path.to_string()))?;
        }

        match node {
            Value::Mapping(map) => {
                map.insert(Value::String(last.clone()), value);
            }
            Value::Sequence(items) => {
                let slot = last
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get_mut(idx))
                    .ok_or_else(|| ConfigError::PathNotFound(path.to_string()))?;
                *slot = value;
            }
            _ => return Err(ConfigError::PathNotFound(path.to_string())),
        }

        if let Value::Mapping(root) = &mut candidate {
            if normalize(root) > 0 {
                return Err(ConfigError::Validation(format!(
                    "значение по пути '{path}' имеет неверный тип"
                )));
            }
        }
        self.root = candidate;
        Ok(())
    }
}

impl Settings {
    pub fn from_tree(tree: &ConfigTree) -> Result<Self, ConfigError> {
        let daemon: DaemonConfig = section(tree, "daemon")?;
        let score: ScoreConfig = section(tree, "global.score")?;
        let checks_to_perform: Vec<String> = section(tree, "checks_to_perform")?;

        let mut checks = BTreeMap::new();
        if let Value::Mapping(entries) = tree.get("checks")? {
            for (key, entry) in entries {
                let Some(name) = key.as_str() else {
                    warn!(key = ?key, "имя проверки должно быть строкой, запись пропущена");
                    continue;
                };
                let raw: RawCheck = match serde_yaml::from_value(entry.clone()) {
                    Ok(raw) => raw,
                    Err(err) => {
                        warn!(check = %name, error = %err, "описание проверки не разобрано, проверка пропущена");
                        continue;
                    }
                };
                checks.insert(name.to_string(), build_spec(name, &raw)?);
            }
        }

        let settings = Self {
            daemon,
            score,
            checks,
            checks_to_perform,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.daemon.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле daemon.listen должно быть корректным адресом host:port".to_string(),
            ));
        }
        if self.daemon.poll_interval_ms < 1 {
            return Err(ConfigError::Validation(
                "daemon.poll_interval_ms должно быть >= 1".to_string(),
            ));
        }
        if !(self.score.min.is_finite() && self.score.max.is_finite())
            || self.score.min >= self.score.max
        {
            return Err(ConfigError::Validation(
                "global.score.min должно быть меньше global.score.max".to_string(),
            ));
        }
        for spec in self.checks.values() {
            validate_spec(spec)?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.daemon.poll_interval_ms)
    }
}

fn build_spec(name: &str, raw: &RawCheck) -> Result<CheckSpec, ConfigError> {
    Ok(CheckSpec {
        name: name.to_string(),
        kind: resolve_kind(name, raw)?,
        min: raw.min,
        max: raw.max,
        coefficient: raw.coeff,
        lower_is_better: raw.lower_is_better,
        check_interval: seconds(name, "check_interval", raw.check_interval)?,
        check_timeout: seconds(name, "check_timeout", raw.check_timeout)?,
        ignore_if_above_average: raw.ignore_if_up_average,
    })
}

// A `command` key wins over `type`.
fn resolve_kind(name: &str, raw: &RawCheck) -> Result<CheckKind, ConfigError> {
    if let Some(command) = &raw.command {
        return Ok(CheckKind::Command {
            command: command.clone(),
            language: raw.command_run_language.clone(),
            patterns: raw.regex.clone().unwrap_or_default(),
        });
    }

    match raw.kind.as_deref() {
        Some("cpu") => Ok(CheckKind::Cpu {
            sample: seconds(name, "cpu_test_duration", raw.cpu_test_duration)?,
        }),
        Some("ram") | Some("memory") => Ok(CheckKind::Memory),
        Some("load") => Ok(CheckKind::Load),
        Some("disk_usage") => Ok(CheckKind::DiskUsage {
            path: PathBuf::from(&raw.disk_test_path),
        }),
        Some("disk_io") => Ok(CheckKind::DiskIo {
            compare_interval: seconds(name, "compare_interval", raw.compare_interval)?,
        }),
        Some(other) => Err(ConfigError::Validation(format!(
            "проверка '{name}': неизвестный тип '{other}'"
        ))),
        None => Err(ConfigError::Validation(format!(
            "проверка '{name}': нужно указать command или type"
        ))),
    }
}

fn validate_spec(spec: &CheckSpec) -> Result<(), ConfigError> {
    if !(spec.min.is_finite() && spec.max.is_finite()) || spec.min >= spec.max {
        return Err(ConfigError::Validation(format!(
            "проверка '{}': min должно быть меньше max",
            spec.name
        )));
    }
    if !spec.coefficient.is_finite() {
        return Err(ConfigError::Validation(format!(
            "проверка '{}': coeff должен быть конечным числом",
            spec.name
        )));
    }
    if spec.check_timeout.is_zero() {
        return Err(ConfigError::Validation(format!(
            "проверка '{}': check_timeout должен быть > 0",
            spec.name
        )));
    }
    Ok(())
}

fn seconds(check: &str, field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        ConfigError::Validation(format!(
            "проверка '{check}': {field} должно быть неотрицательным числом секунд"
        ))
    })
}

fn section<T: DeserializeOwned>(tree: &ConfigTree, path: &str) -> Result<T, ConfigError> {
    let value = tree.get(path)?.clone();
    serde_yaml::from_value(value)
        .map_err(|err| ConfigError::Validation(format!("{path}: {err}")))
}

fn default_document() -> Value {
    serde_yaml::from_str(DEFAULT_CONFIG_YAML).unwrap_or_else(|err| {
        error!(error = %err, "встроенная конфигурация по умолчанию повреждена");
        Value::Mapping(Mapping::new())
    })
}

// Returns how many present values were dropped or replaced.
fn normalize(root: &mut Mapping) -> usize {
    let mut replaced = 0;
    if let Value::Mapping(defaults) = default_document() {
        replaced += merge_defaults(root, &defaults, "");
    }
    replaced += recover_poll_interval(root);
    replaced += recover_checks_to_perform(root);
    replaced + inherit_check_defaults(root)
}

// Integers and floats count as the same shape.
fn merge_defaults(config: &mut Mapping, defaults: &Mapping, scope: &str) -> usize {
    let mut replaced = 0;
    for (key, default) in defaults {
        let key_path = match key.as_str() {
            Some(k) if scope.is_empty() => k.to_string(),
            Some(k) => format!("{scope}.{k}"),
            None => format!("{scope}.{key:?}"),
        };
        match config.get_mut(key) {
            None => {
                config.insert(key.clone(), default.clone());
            }
            Some(current) if !same_shape(current, default) => {
                warn!(key = %key_path, "значение ключа некорректно, используется значение по умолчанию");
                *current = default.clone();
                replaced += 1;
            }
            Some(Value::Mapping(current)) => {
                if let Value::Mapping(default) = default {
                    replaced += merge_defaults(current, default, &key_path);
                }
            }
            Some(_) => {}
        }
    }
    replaced
}

fn recover_poll_interval(root: &mut Mapping) -> usize {
    let Some(Value::Mapping(daemon)) = root.get_mut("daemon") else {
        return 0;
    };
    let mistyped = daemon
        .get("poll_interval_ms")
        .is_some_and(|value| value.as_u64().is_none());
    if !mistyped {
        return 0;
    }
    warn!(key = "daemon.poll_interval_ms", "значение должно быть целым числом, используется значение по умолчанию");
    daemon.insert(
        Value::from("poll_interval_ms"),
        Value::from(default_poll_interval_ms()),
    );
    1
}

fn recover_checks_to_perform(root: &mut Mapping) -> usize {
    let Some(Value::Sequence(names)) = root.get_mut("checks_to_perform") else {
        return 0;
    };
    let before = names.len();
    names.retain(|name| {
        if !name.is_string() {
            warn!(entry = ?name, "имя в checks_to_perform должно быть строкой, запись удалена");
        }
        name.is_string()
    });
    before - names.len()
}

fn field_fits(field: &str, value: &Value) -> bool {
    match field {
        "type" | "command" | "command_run_language" | "disk_test_path" => value.is_string(),
        "coeff" | "min" | "max" | "check_interval" | "check_timeout" | "cpu_test_duration"
        | "compare_interval" => value.is_number(),
        "lower_is_better" | "ignore_if_up_average" => value.is_bool(),
        "regex" => value
            .as_sequence()
            .is_some_and(|patterns| patterns.iter().all(Value::is_string)),
        _ => true,
    }
}

// Mistyped fields are dropped so that the defaults fill them in afterwards.
fn recover_check_fields(entry: &mut Mapping, scope: &str) -> usize {
    let wrong: Vec<Value> = entry
        .iter()
        .filter(|(key, value)| key.as_str().is_some_and(|field| !field_fits(field, value)))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &wrong {
        warn!(
            key = %format!("{scope}.{}", key.as_str().unwrap_or("?")),
            "значение поля проверки некорректно, используется значение по умолчанию"
        );
        entry.remove(key);
    }
    wrong.len()
}

fn same_shape(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn inherit_check_defaults(root: &mut Mapping) -> usize {
    let base = match root.get("default_checks_config") {
        Some(Value::Mapping(map)) => map.clone(),
        _ => return 0,
    };
    let Some(Value::Mapping(checks)) = root.get_mut("checks") else {
        return 0;
    };

    let invalid: Vec<Value> = checks
        .iter()
        .filter(|(_, entry)| !entry.is_mapping())
        .map(|(key, _)| key.clone())
        .collect();
    let mut replaced = invalid.len();
    for key in invalid {
        warn!(check = ?key, "описание проверки должно быть отображением, запись удалена");
        checks.remove(&key);
    }

    for (key, entry) in checks.iter_mut() {
        if let Value::Mapping(entry) = entry {
            let scope = format!("checks.{}", key.as_str().unwrap_or("?"));
            replaced += recover_check_fields(entry, &scope);
            replaced += merge_defaults(entry, &base, &scope);
        }
    }
    replaced
}

fn split_path(path: &str) -> Vec<String> {
    let normalized = path.replace('/', ".");
    let trimmed = normalized.trim_matches('.');
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('.').map(str::to_string).collect()
}

fn child<'a>(node: &'a Value, segment: &str) -> Option<&'a Value> {
    match node {
        Value::Mapping(map) => map.get(segment),
        Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|idx| items.get(idx)),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match node {
        Value::Mapping(map) => map.get_mut(segment),
        Value::Sequence(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |idx| items.get_mut(idx)),
        _ => None,
    }
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_coeff() -> f64 {
    1.0
}

const fn default_min() -> f64 {
    0.0
}

const fn default_max() -> f64 {
    100.0
}

const fn default_lower_is_better() -> bool {
    true
}

const fn default_check_interval() -> f64 {
    10.0
}

const fn default_check_timeout() -> f64 {
    10.0
}

fn default_command_run_language() -> String {
    "C".to_string()
}

const fn default_cpu_test_duration() -> f64 {
    1.0
}

fn default_disk_test_path() -> String {
    "/".to_string()
}

const fn default_compare_interval() -> f64 {
    60.0
}
