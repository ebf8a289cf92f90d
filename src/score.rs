use crate::config::{CheckSpec, ScoreConfig};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregationError {
    #[error("ни одна проверка не участвует в расчёте оценки")]
    NoContributors,
}

#[derive(Debug, Clone, Copy)]
pub struct ScoreEntry<'a> {
    pub name: &'a str,
    pub value: Option<f64>,
    pub spec: &'a CheckSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionStatus {
    Included,
    Excluded,
    Failed,
    ZeroWeight,
}

#[derive(Debug, Clone, Serialize)]
pub struct Contribution {
    pub name: String,
    pub percentage: Option<f64>,
    pub coefficient: f64,
    pub weighted: Option<f64>,
    pub status: ContributionStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreBreakdown {
    // 0..100, before the global mapping.
    pub raw: f64,
    pub score: f64,
    pub contributions: Vec<Contribution>,
}

pub fn normalize(value: f64, spec: &CheckSpec) -> f64 {
    let span = spec.max - spec.min;
    let percentage = if span > 0.0 {
        ((value - spec.min) / span * 100.0).clamp(0.0, 100.0)
    } else if value >= spec.max {
        100.0
    } else {
        0.0
    };
    if spec.lower_is_better {
        percentage
    } else {
        100.0 - percentage
    }
}

pub fn global_score(raw: f64, cfg: &ScoreConfig) -> f64 {
    let scaled = cfg.min + raw.clamp(0.0, 100.0) / 100.0 * (cfg.max - cfg.min);
    if cfg.lower_is_better {
        scaled
    } else {
        cfg.min + cfg.max - scaled
    }
}

// `ignore_if_above_average` checks go last and are skipped whenever they
// would lower the running average.
pub fn calculate(
    entries: &[ScoreEntry<'_>],
    cfg: &ScoreConfig,
) -> Result<ScoreBreakdown, AggregationError> {
    let ordered = entries
        .iter()
        .filter(|e| !e.spec.ignore_if_above_average)
        .chain(entries.iter().filter(|e| e.spec.ignore_if_above_average));

    let mut total_weighted = 0.0_f64;
    let mut total_coefficient = 0.0_f64;
    let mut contributions = Vec::with_capacity(entries.len());

    for entry in ordered {
        let coefficient = entry.spec.coefficient;
        let Some(value) = entry.value else {
            contributions.push(Contribution {
                name: entry.name.to_string(),
                percentage: None,
                coefficient,
                weighted: None,
                status: ContributionStatus::Failed,
            });
            continue;
        };

        let percentage = normalize(value, entry.spec);
        if coefficient <= 0.0 {
            debug!(check = entry.name, coefficient, "проверка с нулевым весом пропущена");
            contributions.push(Contribution {
                name: entry.name.to_string(),
                percentage: Some(percentage),
                coefficient,
                weighted: None,
                status: ContributionStatus::ZeroWeight,
            });
            continue;
        }

        let weighted = percentage * coefficient;
        if entry.spec.ignore_if_above_average && total_coefficient > 0.0 {
            let current = total_weighted / total_coefficient;
            let candidate = (total_weighted + weighted) / (total_coefficient + coefficient);
            if candidate < current {
                debug!(
                    check = entry.name,
                    current = global_score(current, cfg),
                    with_check = global_score(candidate, cfg),
                    "проверка исключена из расчёта"
                );
                contributions.push(Contribution {
                    name: entry.name.to_string(),
                    percentage: Some(percentage),
                    coefficient,
                    weighted: Some(weighted),
                    status: ContributionStatus::Excluded,
                });
                continue;
            }
        }

        total_weighted += weighted;
        total_coefficient += coefficient;
        debug!(
            check = entry.name,
            score = global_score(total_weighted / total_coefficient, cfg),
            "промежуточная оценка"
        );
        contributions.push(Contribution {
            name: entry.name.to_string(),
            percentage: Some(percentage),
            coefficient,
            weighted: Some(weighted),
            status: ContributionStatus::Included,
        });
    }

    if total_coefficient <= 0.0 {
        return Err(AggregationError::NoContributors);
    }

    let raw = total_weighted / total_coefficient;
    let score = global_score(raw, cfg);
    debug!(raw, score, "оценка рассчитана");
    Ok(ScoreBreakdown {
        raw,
        score,
        contributions,
    })
}
