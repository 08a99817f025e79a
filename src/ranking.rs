use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{MetricEntry, Prediction, SeriesPoint};
use crate::store::MeasurementStore;
use crate::trend::{self, PredictionError};

/// Outcome of a single-user prediction: either a prediction or the reason the
/// feature is still locked. Storage failures are reported separately.
pub type Forecast = Result<Prediction, PredictionError>;

pub async fn predict_user(store: &dyn MeasurementStore, user_id: Uuid) -> anyhow::Result<Forecast> {
    let Some(user) = store.find_user(user_id).await? else {
        return Ok(Err(PredictionError::UnknownUser));
    };
    let Some(competition_end) = user.competition_end else {
        return Ok(Err(PredictionError::NoCompetitionWindow));
    };

    let samples: Vec<(NaiveDateTime, f64)> = store
        .confirmed_series(user_id)
        .await?
        .iter()
        .filter_map(|p| p.body_fat_pct.map(|fat| (p.measured_at, fat)))
        .collect();

    Ok(trend::extrapolate(&samples, competition_end).map(|fit| Prediction {
        user_id,
        name: user.name,
        first_fat_pct: fit.first,
        current_fat_pct: fit.last,
        predicted_fat_pct: fit.predicted,
        predicted_change: fit.change,
        data_points: fit.samples,
        competition_end,
    }))
}

/// Predictions for every non-demo user that can be predicted, most fat lost
/// first. Ties keep the store's user order.
pub async fn rank_all(store: &dyn MeasurementStore) -> anyhow::Result<Vec<Prediction>> {
    let mut predictions = Vec::new();

    for user in store.list_users().await? {
        if user.is_demo {
            continue;
        }
        match predict_user(store, user.id).await? {
            Ok(prediction) => predictions.push(prediction),
            Err(reason) => tracing::debug!(user = %user.name, %reason, "left out of ranking"),
        }
    }

    Ok(rank_predictions(predictions))
}

pub fn rank_predictions(mut predictions: Vec<Prediction>) -> Vec<Prediction> {
    predictions.sort_by(|a, b| {
        a.predicted_change
            .partial_cmp(&b.predicted_change)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    predictions
}

/// Winner and danger band sizes for a ranking of `total` users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bands {
    pub total: usize,
    pub winner_count: usize,
    pub danger_start: usize,
}

impl Bands {
    pub fn for_total(total: usize) -> Self {
        let winner_count = (total / 2).min(3);
        Self {
            total,
            winner_count,
            danger_start: total - winner_count,
        }
    }

    pub fn is_winner(&self, index: usize) -> bool {
        index < self.winner_count
    }

    pub fn in_danger(&self, index: usize) -> bool {
        index >= self.danger_start && index < self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Standing {
    /// 1-based.
    pub rank: usize,
    pub total: usize,
    pub winner: bool,
    pub danger: bool,
}

pub fn standing_of(ranking: &[Prediction], user_id: Uuid) -> Option<Standing> {
    let index = ranking.iter().position(|p| p.user_id == user_id)?;
    let bands = Bands::for_total(ranking.len());
    Some(Standing {
        rank: index + 1,
        total: ranking.len(),
        winner: bands.is_winner(index),
        danger: bands.in_danger(index),
    })
}

/// A ranking together with its band boundaries.
#[derive(Debug, Serialize)]
pub struct RankedCohort<'a> {
    pub bands: Bands,
    pub ranking: &'a [Prediction],
}

impl<'a> RankedCohort<'a> {
    pub fn new(ranking: &'a [Prediction]) -> Self {
        Self {
            bands: Bands::for_total(ranking.len()),
            ranking,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    BodyFatPct,
    SkeletalMuscle,
    InbodyScore,
}

impl Metric {
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "body_fat_pct" | "body-fat" => Ok(Metric::BodyFatPct),
            "skeletal_muscle" | "muscle" => Ok(Metric::SkeletalMuscle),
            "inbody_score" | "score" => Ok(Metric::InbodyScore),
            other => anyhow::bail!("unknown metric '{other}'"),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::BodyFatPct => "Body fat change",
            Metric::SkeletalMuscle => "Skeletal muscle change",
            Metric::InbodyScore => "InBody score change",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::BodyFatPct => "%",
            Metric::SkeletalMuscle => "kg",
            Metric::InbodyScore => "",
        }
    }

    pub fn lower_is_better(self) -> bool {
        matches!(self, Metric::BodyFatPct)
    }

    pub fn value(self, point: &SeriesPoint) -> Option<f64> {
        match self {
            Metric::BodyFatPct => point.body_fat_pct,
            Metric::SkeletalMuscle => point.skeletal_muscle,
            Metric::InbodyScore => point.inbody_score.map(f64::from),
        }
    }
}

/// First-to-last change of `metric` for one user's window, or `None` when the
/// user has fewer than two reports or a missing endpoint value.
pub fn metric_change(metric: Metric, series: &[SeriesPoint]) -> Option<(f64, f64)> {
    if series.len() < 2 {
        return None;
    }
    let first = metric.value(series.first()?)?;
    let last = metric.value(series.last()?)?;
    Some((first, last))
}

/// Observed (not predicted) change leaderboard over reports measured at or
/// after `since`.
pub async fn metric_leaderboard(
    store: &dyn MeasurementStore,
    metric: Metric,
    since: Option<NaiveDateTime>,
) -> anyhow::Result<Vec<MetricEntry>> {
    let mut entries = Vec::new();

    for user in store.list_users().await? {
        if user.is_demo {
            continue;
        }
        let series = store.confirmed_series_since(user.id, since).await?;
        let Some((first_value, last_value)) = metric_change(metric, &series) else {
            continue;
        };
        let badge_count = store.user_badges(user.id).await?.len();
        entries.push(MetricEntry {
            user_id: user.id,
            name: user.name,
            first_value,
            last_value,
            diff: last_value - first_value,
            count: series.len(),
            badge_count,
        });
    }

    entries.sort_by(|a, b| {
        let ordering = a.diff.partial_cmp(&b.diff).unwrap_or(std::cmp::Ordering::Equal);
        if metric.lower_is_better() {
            ordering
        } else {
            ordering.reverse()
        }
    });
    Ok(entries)
}
