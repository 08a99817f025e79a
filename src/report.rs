use std::collections::HashMap;
use std::fmt::Write;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::models::{MetricEntry, Prediction};
use crate::ranking::{Bands, Metric};

fn signed(value: f64) -> String {
    if value > 0.0 {
        format!("+{value:.1}")
    } else {
        format!("{value:.1}")
    }
}

pub fn build_report(
    generated_on: NaiveDate,
    ranking: &[Prediction],
    badge_counts: &HashMap<Uuid, usize>,
    metric: Metric,
    leaderboard: &[MetricEntry],
) -> String {
    let mut output = String::new();
    let bands = Bands::for_total(ranking.len());

    let _ = writeln!(output, "# Cohort Body Composition Report");
    let _ = writeln!(output, "Generated on {}", generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Predicted Final Body Fat");

    if ranking.is_empty() {
        let _ = writeln!(
            output,
            "No predictions yet (each participant needs at least 2 readings)."
        );
    } else {
        for (index, prediction) in ranking.iter().enumerate() {
            let marker = if bands.is_winner(index) {
                " [winner]"
            } else if bands.in_danger(index) {
                " [danger]"
            } else {
                ""
            };
            let _ = writeln!(
                output,
                "{}. {}: {:.1}% -> {:.1}% by {} ({}%) from {} readings, {} badges{}",
                index + 1,
                prediction.name,
                prediction.first_fat_pct,
                prediction.predicted_fat_pct,
                prediction.competition_end,
                signed(prediction.predicted_change),
                prediction.data_points,
                badge_counts.get(&prediction.user_id).copied().unwrap_or(0),
                marker
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## {}", metric.label());

    if leaderboard.is_empty() {
        let _ = writeln!(output, "No participants with at least 2 readings in this window.");
    } else {
        for (index, entry) in leaderboard.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {}: {}{unit} -> {}{unit} ({}{unit}) across {} reports, {} badges",
                index + 1,
                entry.name,
                entry.first_value,
                entry.last_value,
                signed(entry.diff),
                entry.count,
                entry.badge_count,
                unit = metric.unit()
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(name: &str, change: f64) -> Prediction {
        Prediction {
            user_id: Uuid::new_v4(),
            name: name.to_string(),
            first_fat_pct: 24.0,
            current_fat_pct: 23.0,
            predicted_fat_pct: 24.0 + change,
            predicted_change: change,
            data_points: 3,
            competition_end: NaiveDate::from_ymd_opt(2026, 3, 16).unwrap(),
        }
    }

    #[test]
    fn empty_report_explains_locked_state() {
        let report = build_report(
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            &[],
            &HashMap::new(),
            Metric::BodyFatPct,
            &[],
        );
        assert!(report.contains("No predictions yet"));
        assert!(report.contains("## Body fat change"));
    }

    #[test]
    fn marks_winner_and_danger_bands() {
        let ranking = vec![
            prediction("Ming", -4.5),
            prediction("Wei", -3.0),
            prediction("Hua", -2.5),
            prediction("Qiang", 2.0),
        ];
        let leaderboard = vec![MetricEntry {
            user_id: ranking[0].user_id,
            name: "Ming".to_string(),
            first_value: 22.0,
            last_value: 17.5,
            diff: -4.5,
            count: 5,
            badge_count: 6,
        }];
        let badge_counts = HashMap::from([(ranking[0].user_id, 6), (ranking[2].user_id, 2)]);
        let report = build_report(
            NaiveDate::from_ymd_opt(2026, 2, 1).unwrap(),
            &ranking,
            &badge_counts,
            Metric::BodyFatPct,
            &leaderboard,
        );

        assert!(report.contains(
            "1. Ming: 24.0% -> 19.5% by 2026-03-16 (-4.5%) from 3 readings, 6 badges [winner]"
        ));
        assert!(report.contains("2. Wei") && report.contains("(-3.0%) from 3 readings, 0 badges [winner]"));
        assert!(report.contains(
            "3. Hua: 24.0% -> 21.5% by 2026-03-16 (-2.5%) from 3 readings, 2 badges [danger]"
        ));
        assert!(report.contains("(+2.0%) from 3 readings, 0 badges [danger]"));
        assert!(report.contains("1. Ming: 22% -> 17.5% (-4.5%) across 5 reports, 6 badges"));
    }
}
