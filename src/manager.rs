use crate::checks::Check;
use crate::config::{CheckSpec, ConfigError, ConfigTree, Settings};
use crate::score::{self, AggregationError, Contribution, ScoreBreakdown, ScoreEntry};
use serde::Serialize;
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

pub type SharedManager = Arc<Mutex<TestManager>>;

type Instance = Arc<Mutex<Check>>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("менеджер проверок не готов: полный прогон ещё не выполнялся")]
    NotReady,
    #[error("проверка '{0}' не найдена в конфигурации")]
    UnknownCheck(String),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub value: f64,
    pub spec: CheckSpec,
    pub ran_at_wall: SystemTime,
    pub next_due_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct CheckStats {
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ScoreState {
    NotReady,
    Ready(ScoreBreakdown),
    Degenerate(AggregationError),
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckStatus {
    pub name: String,
    pub kind: &'static str,
    pub performed: bool,
    pub value: Option<f64>,
    pub last_run: Option<String>,
    pub next_due_in_secs: Option<f64>,
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    pub ready: bool,
    pub started_at_unix: i64,
    pub score: Option<f64>,
    pub raw_score: Option<f64>,
    pub error: Option<String>,
    pub checks: Vec<CheckStatus>,
    pub contributions: Vec<Contribution>,
}

// Read without taking the manager lock.
#[derive(Debug, Clone)]
pub struct Published {
    pub ready: bool,
    pub score: Option<f64>,
    pub degenerate: Option<AggregationError>,
    pub config: Arc<ConfigTree>,
}

impl Published {
    pub fn get_config(&self, path: &str) -> Result<Value, ManagerError> {
        Ok(self.config.get(path)?.clone())
    }
}

pub struct TestManager {
    tree: Arc<ConfigTree>,
    settings: Settings,
    checks: HashMap<String, Instance>,
    results: HashMap<String, CheckResult>,
    retry_at: HashMap<String, Instant>,
    stats: HashMap<String, CheckStats>,
    score: ScoreState,
    ready: bool,
    started_at_unix: i64,
    published: watch::Sender<Published>,
}

impl TestManager {
    pub fn new(tree: ConfigTree) -> Result<Self, ConfigError> {
        let settings = Settings::from_tree(&tree)?;
        let mut checks = HashMap::with_capacity(settings.checks.len());
        for (name, spec) in &settings.checks {
            checks.insert(name.clone(), Arc::new(Mutex::new(Check::from_spec(spec)?)));
        }

        let tree = Arc::new(tree);
        let (published, _) = watch::channel(Published {
            ready: false,
            score: None,
            degenerate: None,
            config: tree.clone(),
        });

        Ok(Self {
            tree,
            settings,
            checks,
            results: HashMap::new(),
            retry_at: HashMap::new(),
            stats: HashMap::new(),
            score: ScoreState::NotReady,
            ready: false,
            started_at_unix: now_unix(),
            published,
        })
    }

    pub fn shared(self) -> SharedManager {
        Arc::new(Mutex::new(self))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.published.subscribe()
    }

    pub fn current_score(&self) -> Option<f64> {
        match &self.score {
            ScoreState::Ready(breakdown) => Some(breakdown.score),
            _ => None,
        }
    }

    pub async fn run_all(&mut self, now: Instant) -> Result<f64, ManagerError> {
        for name in self.plan() {
            if !self.settings.checks.contains_key(&name) {
                warn!(check = %name, "проверка не описана в конфигурации, пропущена");
                continue;
            }
            self.execute(&name, now, true).await;
        }

        let outcome = self.recompute();
        self.ready = true;
        self.publish();
        match &outcome {
            Ok(score) => info!(score = *score, "полный прогон завершён"),
            Err(err) => warn!(error = %err, "полный прогон завершён без оценки"),
        }
        Ok(outcome?)
    }

    pub async fn run_one(&mut self, name: &str, now: Instant) -> Result<f64, ManagerError> {
        if !self.settings.checks.contains_key(name) {
            warn!(check = %name, "запрошена неизвестная проверка");
            return Err(ManagerError::UnknownCheck(name.to_string()));
        }
        self.execute(name, now, true).await;
        let outcome = self.recompute();
        self.publish();
        Ok(outcome?)
    }

    // Returns how many checks were executed.
    pub async fn run_needed(&mut self, now: Instant) -> Result<usize, ManagerError> {
        if !self.ready {
            return Err(ManagerError::NotReady);
        }

        let mut rerun = 0;
        for name in self.plan() {
            if !self.settings.checks.contains_key(&name) {
                continue;
            }
            if self.is_due(&name, now) {
                self.execute(&name, now, false).await;
                rerun += 1;
            }
        }

        match self.recompute() {
            Ok(score) => debug!(score, rerun, "плановый прогон"),
            Err(err) => debug!(error = %err, rerun, "плановый прогон без оценки"),
        }
        self.publish();
        Ok(rerun)
    }

    // Nothing changes unless the whole resulting configuration is valid.
    pub fn set_config(&mut self, path: &str, value: Value) -> Result<(), ManagerError> {
        let mut tree = (*self.tree).clone();
        tree.set(path, value)?;
        let settings = Settings::from_tree(&tree)?;

        let mut rebuilt = HashMap::new();
        for (name, spec) in &settings.checks {
            if self.settings.checks.get(name) != Some(spec) || !self.checks.contains_key(name) {
                rebuilt.insert(name.clone(), Arc::new(Mutex::new(Check::from_spec(spec)?)));
            }
        }

        let known = |name: &String| settings.checks.contains_key(name);
        self.checks.retain(|name, _| known(name));
        self.results.retain(|name, _| known(name) && !rebuilt.contains_key(name));
        self.retry_at.retain(|name, _| known(name) && !rebuilt.contains_key(name));
        self.stats.retain(|name, _| known(name));
        self.checks.extend(rebuilt);

        info!(path = %path, "конфигурация изменена");
        self.tree = Arc::new(tree);
        self.settings = settings;
        if self.ready {
            if let Err(err) = self.recompute() {
                debug!(error = %err, "оценка после изменения конфигурации не рассчитана");
            }
        }
        self.publish();
        Ok(())
    }

    pub fn snapshot(&self, now: Instant) -> ManagerSnapshot {
        let performed: HashSet<&str> = self
            .settings
            .checks_to_perform
            .iter()
            .map(String::as_str)
            .collect();

        let checks = self
            .settings
            .checks
            .iter()
            .map(|(name, spec)| {
                let result = self.results.get(name);
                let stats = self.stats.get(name).cloned().unwrap_or_default();
                let due = result
                    .map(|r| r.next_due_at)
                    .or_else(|| self.retry_at.get(name).copied());
                CheckStatus {
                    name: name.clone(),
                    kind: spec.kind.label(),
                    performed: performed.contains(name.as_str()),
                    value: result.map(|r| r.value),
                    last_run: result
                        .map(|r| humantime::format_rfc3339_seconds(r.ran_at_wall).to_string()),
                    next_due_in_secs: due
                        .map(|at| at.saturating_duration_since(now).as_secs_f64()),
                    runs: stats.runs,
                    failures: stats.failures,
                    last_error: stats.last_error,
                }
            })
            .collect();

        let (score, raw_score, error, contributions) = match &self.score {
            ScoreState::NotReady => (None, None, None, Vec::new()),
            ScoreState::Ready(b) => (Some(b.score), Some(b.raw), None, b.contributions.clone()),
            ScoreState::Degenerate(err) => (None, None, Some(err.to_string()), Vec::new()),
        };

        ManagerSnapshot {
            ready: self.ready,
            started_at_unix: self.started_at_unix,
            score,
            raw_score,
            error,
            checks,
            contributions,
        }
    }

    // Performed names in order, without repeats.
    fn plan(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.settings
            .checks_to_perform
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }

    fn is_due(&self, name: &str, now: Instant) -> bool {
        match self.results.get(name) {
            Some(result) => now >= result.next_due_at,
            None => self.retry_at.get(name).map_or(true, |at| now >= *at),
        }
    }

    async fn execute(&mut self, name: &str, now: Instant, verbose: bool) {
        let Some(spec) = self.settings.checks.get(name).cloned() else {
            return;
        };
        let outcome = match self.instance(name, &spec) {
            Ok(instance) => self.spawn_run(name, &spec, instance).await,
            Err(err) => {
                error!(check = %name, error = %err, "не удалось создать проверку");
                Err(err.to_string())
            }
        };

        let stats = self.stats.entry(name.to_string()).or_default();
        stats.runs += 1;
        match outcome {
            Ok(value) => {
                if verbose {
                    info!(check = %name, value, "проверка выполнена");
                } else {
                    debug!(check = %name, value, "проверка выполнена");
                }
                stats.last_error = None;
                self.retry_at.remove(name);
                self.results.insert(
                    name.to_string(),
                    CheckResult {
                        value,
                        ran_at_wall: SystemTime::now(),
                        next_due_at: due_after(now, spec.check_interval),
                        spec,
                    },
                );
            }
            Err(reason) => {
                warn!(check = %name, error = %reason, "проверка не выполнена");
                stats.failures += 1;
                stats.last_error = Some(reason);
                self.results.remove(name);
                self.retry_at
                    .insert(name.to_string(), due_after(now, spec.check_interval));
            }
        }
    }

    fn instance(&mut self, name: &str, spec: &CheckSpec) -> Result<Instance, ConfigError> {
        if let Some(instance) = self.checks.get(name) {
            return Ok(instance.clone());
        }
        let instance = Arc::new(Mutex::new(Check::from_spec(spec)?));
        self.checks.insert(name.to_string(), instance.clone());
        Ok(instance)
    }

    async fn spawn_run(&mut self, name: &str, spec: &CheckSpec, instance: Instance) -> Result<f64, String> {
        let timeout = spec.check_timeout;
        // The task holds the instance lock until the run ends, even if this
        // caller is dropped, so a check never runs twice at once. On timeout
        // the run is dropped and a command child is killed.
        let handle = tokio::spawn(async move {
            let mut check = instance.lock().await;
            tokio::time::timeout(timeout, check.run()).await
        });

        match handle.await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(err))) => Err(err.to_string()),
            Ok(Err(_elapsed)) => Err(format!(
                "превышено время ожидания {}",
                humantime::format_duration(timeout)
            )),
            Err(join_err) => {
                error!(check = %name, error = %join_err, "задача проверки завершилась аварийно");
                match Check::from_spec(spec) {
                    Ok(check) => {
                        self.checks
                            .insert(name.to_string(), Arc::new(Mutex::new(check)));
                    }
                    Err(err) => {
                        self.checks.remove(name);
                        error!(check = %name, error = %err, "не удалось пересоздать проверку")
                    }
                }
                Err(join_err.to_string())
            }
        }
    }

    fn publish(&self) {
        let degenerate = match &self.score {
            ScoreState::Degenerate(err) => Some(err.clone()),
            _ => None,
        };
        self.published.send_replace(Published {
            ready: self.ready,
            score: self.current_score(),
            degenerate,
            config: self.tree.clone(),
        });
    }

    fn recompute(&mut self) -> Result<f64, AggregationError> {
        let plan = self.plan();
        let entries: Vec<ScoreEntry<'_>> = plan
            .iter()
            .filter_map(|name| {
                let spec = self.settings.checks.get(name)?;
                let cached = self.results.get(name);
                Some(ScoreEntry {
                    name,
                    value: cached.map(|r| r.value),
                    spec: cached.map(|r| &r.spec).unwrap_or(spec),
                })
            })
            .collect();

        let outcome = score::calculate(&entries, &self.settings.score);
        match outcome {
            Ok(breakdown) => {
                let value = breakdown.score;
                self.score = ScoreState::Ready(breakdown);
                Ok(value)
            }
            Err(err) => {
                self.score = ScoreState::Degenerate(err.clone());
                Err(err)
            }
        }
    }
}

fn due_after(now: Instant, interval: Duration) -> Instant {
    now.checked_add(interval)
        .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::disk_io::DiskIoCheck;
    use crate::checks::CheckError;
    use crate::score::ContributionStatus;
    use std::sync::atomic::{AtomicU64, Ordering};

    const CONFIG: &str = r#"
checks:
  fast:
    command: "echo 20"
    coeff: 2
  slow:
    command: "echo 80"
    coeff: 2
    check_interval: 60
checks_to_perform: [fast, slow, missing]
"#;

    fn manager(yaml: &str) -> TestManager {
        let tree = ConfigTree::from_yaml(yaml, "test.yaml").expect("разбор YAML");
        TestManager::new(tree).expect("создание менеджера")
    }

    fn config_at(m: &TestManager, path: &str) -> Value {
        m.subscribe().borrow().get_config(path).expect("путь в конфигурации")
    }

    fn runs(m: &TestManager, name: &str) -> u64 {
        m.stats.get(name).map(|s| s.runs).unwrap_or(0)
    }

    #[tokio::test]
    async fn run_needed_before_run_all_is_a_noop() {
        let mut m = manager(CONFIG);
        let now = Instant::now();
        assert!(matches!(m.run_needed(now).await, Err(ManagerError::NotReady)));
        assert!(matches!(m.run_needed(now).await, Err(ManagerError::NotReady)));
        assert_eq!(runs(&m, "fast"), 0);
        assert_eq!(m.current_score(), None);
        assert!(matches!(&m.score, ScoreState::NotReady));
    }

    #[tokio::test]
    async fn run_all_scores_and_skips_missing_checks() {
        let mut m = manager(CONFIG);
        let score = m.run_all(Instant::now()).await.expect("оценка");
        assert_eq!(score, 50.0);
        assert_eq!(m.current_score(), Some(50.0));
        assert!(m.ready);
        assert_eq!(runs(&m, "fast"), 1);
        assert_eq!(runs(&m, "slow"), 1);
        assert_eq!(runs(&m, "missing"), 0);
        // Defined but not performed.
        assert_eq!(runs(&m, "cpu"), 0);
    }

    #[tokio::test]
    async fn run_needed_reruns_only_due_checks() {
        let mut m = manager(CONFIG);
        let t0 = Instant::now();
        m.run_all(t0).await.unwrap();

        assert_eq!(m.run_needed(t0).await.unwrap(), 0);
        assert_eq!(m.run_needed(t0 + Duration::from_secs(1)).await.unwrap(), 0);
        assert_eq!(runs(&m, "fast"), 1);

        assert_eq!(m.run_needed(t0 + Duration::from_secs(10)).await.unwrap(), 1);
        assert_eq!(runs(&m, "fast"), 2);
        assert_eq!(runs(&m, "slow"), 1);

        assert_eq!(m.run_needed(t0 + Duration::from_secs(61)).await.unwrap(), 2);
        assert_eq!(runs(&m, "fast"), 3);
        assert_eq!(runs(&m, "slow"), 2);
        assert_eq!(m.current_score(), Some(50.0));
    }

    #[tokio::test]
    async fn failed_check_is_dropped_and_retried_after_interval() {
        let mut m = manager(
            r#"
checks:
  good:
    command: "echo 30"
  bad:
    command: "exit 3"
checks_to_perform: [good, bad]
"#,
        );
        let t0 = Instant::now();
        let score = m.run_all(t0).await.unwrap();
        assert_eq!(score, 70.0);
        assert!(!m.results.contains_key("bad"));
        assert_eq!(m.stats["bad"].failures, 1);
        assert!(m.stats["bad"].last_error.is_some());

        let breakdown = match &m.score {
            ScoreState::Ready(b) => b.clone(),
            other => panic!("неожиданное состояние {other:?}"),
        };
        assert_eq!(breakdown.contributions[1].status, ContributionStatus::Failed);

        assert_eq!(m.run_needed(t0 + Duration::from_secs(5)).await.unwrap(), 0);
        assert_eq!(m.run_needed(t0 + Duration::from_secs(10)).await.unwrap(), 2);
        assert_eq!(m.stats["bad"].failures, 2);
    }

    #[tokio::test]
    async fn all_failures_surface_aggregation_error() {
        let mut m = manager(
            r#"
checks:
  bad:
    command: "echo nope"
checks_to_perform: [bad]
"#,
        );
        let result = m.run_all(Instant::now()).await;
        assert!(matches!(
            result,
            Err(ManagerError::Aggregation(AggregationError::NoContributors))
        ));
        assert!(m.ready);
        assert_eq!(m.current_score(), None);
        assert!(matches!(&m.score, ScoreState::Degenerate(_)));
        assert!(m.snapshot(Instant::now()).error.is_some());
    }

    #[tokio::test]
    async fn hung_command_times_out() {
        let mut m = manager(
            r#"
checks:
  hung:
    command: "sleep 5; echo 1"
    check_timeout: 0.2
  ok:
    command: "echo 10"
checks_to_perform: [hung, ok]
"#,
        );
        let started = std::time::Instant::now();
        let result = m.run_one("hung", Instant::now()).await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(result.is_err());
        let err = m.stats["hung"].last_error.clone().unwrap_or_default();
        assert!(err.contains("время ожидания"), "{err}");
        // The instance survives the timeout and can run again.
        assert!(m.checks.contains_key("hung"));
    }

    #[tokio::test]
    async fn run_one_updates_score_without_ready() {
        let mut m = manager(CONFIG);
        let score = m.run_one("slow", Instant::now()).await.unwrap();
        assert_eq!(score, 20.0);
        assert!(!m.ready);

        assert!(matches!(
            m.run_one("nope", Instant::now()).await,
            Err(ManagerError::UnknownCheck(name)) if name == "nope"
        ));
        assert_eq!(runs(&m, "nope"), 0);
    }

    #[tokio::test]
    async fn set_config_rebuilds_changed_checks() {
        let mut m = manager(CONFIG);
        let t0 = Instant::now();
        m.run_all(t0).await.unwrap();

        m.set_config("checks/fast/command", Value::from("echo 60"))
            .expect("изменение конфигурации");
        assert!(!m.results.contains_key("fast"));
        assert!(m.results.contains_key("slow"));

        assert_eq!(m.run_needed(t0).await.unwrap(), 1);
        assert_eq!(m.current_score(), Some(30.0));
    }

    #[tokio::test]
    async fn invalid_set_config_keeps_previous_state() {
        let mut m = manager(CONFIG);
        m.run_all(Instant::now()).await.unwrap();

        let result = m.set_config("checks.fast.min", Value::from(500));
        assert!(matches!(
            result,
            Err(ManagerError::Config(ConfigError::Validation(_)))
        ));
        assert_eq!(config_at(&m, "checks.fast.min"), Value::from(0));
        assert!(m.results.contains_key("fast"));

        assert!(matches!(
            m.set_config("checks/absent/min", Value::from(1)),
            Err(ManagerError::Config(ConfigError::PathNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn config_round_trip_through_manager() {
        let mut m = manager(CONFIG);
        m.set_config("checks/disk_usage/disk_test_path", Value::from("/tmp"))
            .unwrap();
        assert_eq!(
            config_at(&m, "checks/disk_usage/disk_test_path"),
            Value::from("/tmp")
        );
        m.set_config("checks/disk_usage/disk_test_path", Value::from("/"))
            .unwrap();
        assert_eq!(
            config_at(&m, "checks/disk_usage/disk_test_path"),
            Value::from("/")
        );
    }

    #[tokio::test]
    async fn snapshot_reports_checks() {
        let mut m = manager(CONFIG);
        let t0 = Instant::now();
        m.run_all(t0).await.unwrap();

        let snap = m.snapshot(t0 + Duration::from_secs(4));
        assert!(snap.ready);
        assert_eq!(snap.score, Some(50.0));
        let fast = snap.checks.iter().find(|c| c.name == "fast").unwrap();
        assert!(fast.performed);
        assert_eq!(fast.kind, "command");
        assert_eq!(fast.value, Some(20.0));
        assert_eq!(fast.next_due_in_secs, Some(6.0));
        assert!(fast.last_run.is_some());
        let cpu = snap.checks.iter().find(|c| c.name == "cpu").unwrap();
        assert!(!cpu.performed);
        assert_eq!(cpu.runs, 0);
    }

    #[tokio::test]
    async fn cancelled_run_keeps_the_instance() {
        let mut m = manager(
            r#"
checks:
  hung:
    command: "sleep 0.5; echo 5"
checks_to_perform: [hung]
"#,
        );
        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), m.run_one("hung", Instant::now())).await;
        assert!(cancelled.is_err());
        assert!(m.checks.contains_key("hung"));

        let score = m.run_one("hung", Instant::now()).await.expect("оценка");
        assert_eq!(score, 95.0);
        assert_eq!(runs(&m, "hung"), 1);
        assert_eq!(m.checks.len(), m.settings.checks.len());
    }

    static DISK_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn growing_counters() -> Result<u64, CheckError> {
        Ok(DISK_COUNTER.fetch_add(4096, Ordering::SeqCst) + 4096)
    }

    #[tokio::test]
    async fn disk_io_window_survives_between_passes() {
        let mut m = manager(
            r#"
checks:
  io:
    type: disk_io
    check_interval: 0
checks_to_perform: [io]
"#,
        );
        m.checks.insert(
            "io".to_string(),
            Arc::new(Mutex::new(Check::DiskIo(DiskIoCheck::with_counters(
                4,
                growing_counters,
            )))),
        );
        let t0 = Instant::now();

        assert!(m.run_all(t0).await.is_err());
        assert!(!m.results.contains_key("io"));
        let warmup = m.stats["io"].last_error.clone().unwrap_or_default();
        assert!(warmup.contains("базовое"), "{warmup}");

        assert_eq!(m.run_needed(t0).await.expect("плановый прогон"), 1);
        assert!(m.results["io"].value > 0.0);
        assert_eq!(m.stats["io"].failures, 1);
    }

    #[test]
    fn mistyped_check_field_does_not_block_startup() {
        let tree = ConfigTree::from_yaml(
            r#"
checks:
  users:
    command: "who | wc -l"
    regex: "[0-9]+"
checks_to_perform: [cpu]
"#,
            "test.yaml",
        )
        .expect("разбор YAML");
        let m = TestManager::new(tree).expect("менеджер создаётся несмотря на поле неверного типа");
        assert!(m.settings.checks.contains_key("users"));
        assert!(m.checks.contains_key("users"));
    }

    #[tokio::test]
    async fn set_config_rejects_a_mistyped_coefficient() {
        let mut m = manager(CONFIG);
        m.run_all(Instant::now()).await.expect("оценка");

        assert!(matches!(
            m.set_config("checks/fast/coeff", Value::from("abc")),
            Err(ManagerError::Config(ConfigError::Validation(_)))
        ));
        assert_eq!(config_at(&m, "checks/fast/coeff"), Value::from(2));
        assert_eq!(m.settings.checks["fast"].coefficient, 2.0);
        assert!(m.results.contains_key("fast"));
    }

    #[tokio::test]
    async fn published_state_follows_runs_and_config() {
        let mut m = manager(CONFIG);
        let rx = m.subscribe();
        assert!(!rx.borrow().ready);
        assert_eq!(rx.borrow().score, None);

        m.run_all(Instant::now()).await.expect("оценка");
        assert!(rx.borrow().ready);
        assert_eq!(rx.borrow().score, Some(50.0));

        m.set_config("checks/fast/command", Value::from("echo 60"))
            .expect("изменение конфигурации");
        assert_eq!(
            rx.borrow().get_config("checks/fast/command").expect("путь"),
            Value::from("echo 60")
        );

        let mut failing = manager(
            r#"
checks:
  bad:
    command: "exit 1"
checks_to_perform: [bad]
"#,
        );
        let rx = failing.subscribe();
        assert!(failing.run_all(Instant::now()).await.is_err());
        assert!(matches!(
            rx.borrow().degenerate,
            Some(AggregationError::NoContributors)
        ));
        assert_eq!(rx.borrow().score, None);
    }
}
