use std::collections::HashSet;

use uuid::Uuid;

use crate::models::{NewBadge, SeriesPoint};
use crate::ranking::{self, Bands, Metric};
use crate::store::MeasurementStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadgeKind {
    FirstUpload,
    SecondUpload,
    FourUploads,
    FatDown1,
    FatDown3,
    MuscleUp05,
    MuscleUp1,
    Top3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    /// At least this many confirmed reports.
    Reports(usize),
    /// `last - first` of the metric's non-null readings is at most `-amount`.
    Drop { metric: Metric, amount: f64 },
    /// `last - first` of the metric's non-null readings is at least `amount`.
    Gain { metric: Metric, amount: f64 },
    /// Inside the winner band of a ranking with at least two entries.
    WinnerBand,
}

/// Evaluation order of the badge catalogue.
pub const CATALOGUE: [BadgeKind; 8] = [
    BadgeKind::FirstUpload,
    BadgeKind::SecondUpload,
    BadgeKind::FourUploads,
    BadgeKind::FatDown1,
    BadgeKind::FatDown3,
    BadgeKind::MuscleUp05,
    BadgeKind::MuscleUp1,
    BadgeKind::Top3,
];

impl BadgeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BadgeKind::FirstUpload => "first_upload",
            BadgeKind::SecondUpload => "second_upload",
            BadgeKind::FourUploads => "four_uploads",
            BadgeKind::FatDown1 => "fat_down_1",
            BadgeKind::FatDown3 => "fat_down_3",
            BadgeKind::MuscleUp05 => "muscle_up_05",
            BadgeKind::MuscleUp1 => "muscle_up_1",
            BadgeKind::Top3 => "top_3",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BadgeKind::FirstUpload => "🎯 起步",
            BadgeKind::SecondUpload => "📊 有跡可循",
            BadgeKind::FourUploads => "🔬 數據控",
            BadgeKind::FatDown1 => "🔥 初見成效",
            BadgeKind::FatDown3 => "💪 穩定燃脂",
            BadgeKind::MuscleUp05 => "🏋️ 增肌有感",
            BadgeKind::MuscleUp1 => "💎 肌肉雕刻",
            BadgeKind::Top3 => "🏆 前三強",
        }
    }

    pub fn rule(self) -> Rule {
        match self {
            BadgeKind::FirstUpload => Rule::Reports(1),
            BadgeKind::SecondUpload => Rule::Reports(2),
            BadgeKind::FourUploads => Rule::Reports(4),
            BadgeKind::FatDown1 => Rule::Drop { metric: Metric::BodyFatPct, amount: 1.0 },
            BadgeKind::FatDown3 => Rule::Drop { metric: Metric::BodyFatPct, amount: 3.0 },
            BadgeKind::MuscleUp05 => Rule::Gain { metric: Metric::SkeletalMuscle, amount: 0.5 },
            BadgeKind::MuscleUp1 => Rule::Gain { metric: Metric::SkeletalMuscle, amount: 1.0 },
            BadgeKind::Top3 => Rule::WinnerBand,
        }
    }

    pub fn badge(self) -> NewBadge {
        NewBadge {
            badge_type: self.as_str(),
            label: self.label(),
        }
    }
}

/// Where the user sits in the current prediction ranking.
#[derive(Debug, Clone, Copy, Default)]
pub struct RankContext {
    pub index: Option<usize>,
    pub total: usize,
}

/// `last - first` over the readings where `metric` is present.
fn filtered_change(metric: Metric, history: &[SeriesPoint]) -> Option<f64> {
    let mut values = history.iter().filter_map(|p| metric.value(p));
    let first = values.next()?;
    let last = values.last()?;
    Some(last - first)
}

pub fn rule_holds(rule: Rule, history: &[SeriesPoint], rank: RankContext) -> bool {
    match rule {
        Rule::Reports(min) => history.len() >= min,
        Rule::Drop { metric, amount } => {
            filtered_change(metric, history).is_some_and(|change| change <= -amount)
        }
        Rule::Gain { metric, amount } => {
            filtered_change(metric, history).is_some_and(|change| change >= amount)
        }
        Rule::WinnerBand => {
            rank.total >= 2
                && rank
                    .index
                    .is_some_and(|index| Bands::for_total(rank.total).is_winner(index))
        }
    }
}

/// Catalogue entries not in `owned` whose rule holds, in catalogue order.
pub fn pending_badges(
    history: &[SeriesPoint],
    owned: &HashSet<String>,
    rank: RankContext,
) -> Vec<BadgeKind> {
    CATALOGUE
        .into_iter()
        .filter(|kind| !owned.contains(kind.as_str()))
        .filter(|kind| rule_holds(kind.rule(), history, rank))
        .collect()
}

/// Awards every newly satisfied badge and returns exactly those inserted by
/// this call. Safe to re-run after a partial failure.
pub async fn evaluate_badges(
    store: &dyn MeasurementStore,
    user_id: Uuid,
) -> anyhow::Result<Vec<NewBadge>> {
    let owned: HashSet<String> = store
        .user_badges(user_id)
        .await?
        .into_iter()
        .map(|b| b.badge_type)
        .collect();
    let history = store.confirmed_series(user_id).await?;

    let rank = if owned.contains(BadgeKind::Top3.as_str()) {
        RankContext::default()
    } else {
        let ranking = ranking::rank_all(store).await?;
        RankContext {
            index: ranking.iter().position(|p| p.user_id == user_id),
            total: ranking.len(),
        }
    };

    let mut earned = Vec::new();
    for kind in pending_badges(&history, &owned, rank) {
        if store.award_badge(user_id, kind.as_str(), kind.label()).await? {
            tracing::info!(%user_id, badge = kind.as_str(), "badge awarded");
            earned.push(kind.badge());
        } else {
            tracing::debug!(%user_id, badge = kind.as_str(), "badge already held");
        }
    }

    Ok(earned)
}
