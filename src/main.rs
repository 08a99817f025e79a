use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;

mod badges;
mod competition;
mod config;
mod db;
mod models;
mod ranking;
mod report;
mod store;
mod telemetry;
mod trend;

use db::PgStore;
use store::MeasurementStore;

#[derive(Parser)]
#[command(name = "cohort-body-composition")]
#[command(about = "Body composition competition tracker: trend predictions, rankings and badges", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo-ready cohort
    Seed,
    /// Import reports and measurements from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List a participant's reports awaiting confirmation
    Pending {
        #[arg(long)]
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Confirm a pending report, optionally correcting extracted values
    Confirm {
        #[arg(long)]
        report: uuid::Uuid,
        /// Corrected measurement time (YYYY-MM-DD or YYYY-MM-DDTHH:MM)
        #[arg(long)]
        measured_at: Option<String>,
        #[arg(long)]
        weight: Option<f64>,
        #[arg(long)]
        skeletal_muscle: Option<f64>,
        #[arg(long)]
        body_fat_mass: Option<f64>,
        #[arg(long)]
        body_fat_pct: Option<f64>,
        #[arg(long)]
        bmi: Option<f64>,
        #[arg(long)]
        total_body_water: Option<f64>,
        #[arg(long)]
        visceral_fat_level: Option<i32>,
        #[arg(long)]
        basal_metabolic_rate: Option<i32>,
        #[arg(long)]
        inbody_score: Option<i32>,
    },
    /// Predict one participant's final body fat
    Predict {
        #[arg(long)]
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Rank all participants by predicted body fat change
    Rank {
        #[arg(long)]
        json: bool,
    },
    /// Rank participants by observed change of a metric
    Leaderboard {
        #[arg(long, default_value = "body_fat_pct")]
        metric: String,
        /// Only count reports from the last N days (0 = all)
        #[arg(long, default_value_t = 90)]
        since_days: i64,
    },
    /// List a participant's badges
    Badges {
        #[arg(long)]
        name: String,
        /// Award any newly earned badges first
        #[arg(long)]
        evaluate: bool,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[arg(long, default_value_t = 90)]
        since_days: i64,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

async fn require_user(store: &PgStore, name: &str) -> anyhow::Result<models::User> {
    store
        .find_user_by_name(name)
        .await?
        .with_context(|| format!("no participant named '{name}'"))
}

fn cutoff(since_days: i64) -> Option<chrono::NaiveDateTime> {
    (since_days > 0).then(|| Utc::now().naive_utc() - Duration::days(since_days))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cli = Cli::parse();
    let config = config::Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;
    let store = PgStore::new(pool.clone(), config.competition_days);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&store).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let summary = db::import_csv(&store, &csv).await?;
            println!(
                "Imported {} reports for {} participants from {} ({} new badges).",
                summary.reports,
                summary.users,
                csv.display(),
                summary.badges
            );
        }
        Commands::Pending { name, json } => {
            let user = require_user(&store, &name).await?;
            let pending = store.pending_reports(user.id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
                return Ok(());
            }
            if pending.is_empty() {
                println!("{} has no reports awaiting confirmation.", user.name);
            }
            for report in pending {
                let fat = report
                    .extracted
                    .body_fat_pct
                    .map_or("-".to_string(), |v| format!("{v:.1}%"));
                let muscle = report
                    .extracted
                    .skeletal_muscle
                    .map_or("-".to_string(), |v| format!("{v:.1} kg"));
                println!(
                    "- {} measured {}: body fat {}, skeletal muscle {}",
                    report.id, report.measured_at, fat, muscle
                );
            }
        }
        Commands::Confirm {
            report,
            measured_at,
            weight,
            skeletal_muscle,
            body_fat_mass,
            body_fat_pct,
            bmi,
            total_body_water,
            visceral_fat_level,
            basal_metabolic_rate,
            inbody_score,
        } => {
            let measured_at = measured_at.as_deref().map(db::parse_measured_at).transpose()?;
            let corrections = models::MeasurementInput {
                weight,
                skeletal_muscle,
                body_fat_mass,
                body_fat_pct,
                bmi,
                total_body_water,
                visceral_fat_level,
                basal_metabolic_rate,
                inbody_score,
                ..Default::default()
            };
            let user_id = store.confirm_report(report, measured_at, &corrections).await?;
            println!("Report {} confirmed.", report);
            for badge in badges::evaluate_badges(&store, user_id).await? {
                println!("New badge: {} ({})", badge.label, badge.badge_type);
            }
        }
        Commands::Predict { name, json } => {
            let user = require_user(&store, &name).await?;
            let progress = match (user.competition_start, user.competition_end) {
                (Some(start), Some(end)) => Some(competition::CompetitionProgress::at(
                    start,
                    end,
                    Utc::now().date_naive(),
                )),
                _ => None,
            };
            match ranking::predict_user(&store, user.id).await? {
                Ok(prediction) if json => {
                    let ranking = ranking::rank_all(&store).await?;
                    let output = serde_json::json!({
                        "prediction": prediction,
                        "standing": ranking::standing_of(&ranking, user.id),
                        "progress": progress,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
                Ok(prediction) => {
                    let ranking = ranking::rank_all(&store).await?;
                    println!(
                        "{} ({}): {:.1}% now, predicted {:.1}% by {} ({:+.1}%) from {} readings",
                        prediction.name,
                        user.goal.as_str(),
                        prediction.current_fat_pct,
                        prediction.predicted_fat_pct,
                        prediction.competition_end,
                        prediction.predicted_change,
                        prediction.data_points
                    );
                    if let Some(standing) = ranking::standing_of(&ranking, user.id) {
                        let band = if standing.winner {
                            " (winner band)"
                        } else if standing.danger {
                            " (danger band)"
                        } else {
                            ""
                        };
                        println!("Predicted rank {} of {}{}", standing.rank, standing.total, band);
                    }
                    if let (Some(progress), Some(start), Some(end)) =
                        (progress, user.competition_start, user.competition_end)
                    {
                        if progress.finished {
                            println!("Competition finished ({} to {}).", start, end);
                        } else {
                            println!(
                                "Competition {}% complete, {} days remaining.",
                                progress.percent, progress.remaining_days
                            );
                        }
                    }
                }
                Err(reason) => println!("No prediction for {}: {}.", user.name, reason),
            }
        }
        Commands::Rank { json } => {
            let ranking = ranking::rank_all(&store).await?;
            if json {
                let cohort = ranking::RankedCohort::new(&ranking);
                println!("{}", serde_json::to_string_pretty(&cohort)?);
                return Ok(());
            }
            if ranking.is_empty() {
                println!("No participants with at least 2 readings yet.");
                return Ok(());
            }

            let bands = ranking::Bands::for_total(ranking.len());
            println!("Predicted ranking (most body fat lost first):");
            for (index, prediction) in ranking.iter().enumerate() {
                let marker = if bands.is_winner(index) {
                    " *"
                } else if bands.in_danger(index) {
                    " !"
                } else {
                    ""
                };
                println!(
                    "{}. {} {:.1}% -> {:.1}% ({:+.1}%){}",
                    index + 1,
                    prediction.name,
                    prediction.first_fat_pct,
                    prediction.predicted_fat_pct,
                    prediction.predicted_change,
                    marker
                );
            }
        }
        Commands::Leaderboard { metric, since_days } => {
            let metric = ranking::Metric::parse(&metric)?;
            let entries = ranking::metric_leaderboard(&store, metric, cutoff(since_days)).await?;

            if entries.is_empty() {
                println!("No participants with at least 2 readings in this window.");
                return Ok(());
            }

            println!("{}:", metric.label());
            for (index, entry) in entries.iter().enumerate() {
                println!(
                    "{}. {} {} -> {} ({:+.1}{}) across {} reports, {} badges",
                    index + 1,
                    entry.name,
                    entry.first_value,
                    entry.last_value,
                    entry.diff,
                    metric.unit(),
                    entry.count,
                    entry.badge_count
                );
            }
        }
        Commands::Badges { name, evaluate, json } => {
            let user = require_user(&store, &name).await?;
            let earned = if evaluate {
                badges::evaluate_badges(&store, user.id).await?
            } else {
                Vec::new()
            };

            let owned = store.user_badges(user.id).await?;
            if json {
                let output = serde_json::json!({ "new": earned, "badges": owned });
                println!("{}", serde_json::to_string_pretty(&output)?);
                return Ok(());
            }
            for badge in &earned {
                println!("New badge: {} ({})", badge.label, badge.badge_type);
            }
            if owned.is_empty() {
                println!("{} has no badges yet.", user.name);
            }
            for award in owned {
                println!("- {} ({}), earned {}", award.label, award.badge_type, award.earned_at.date_naive());
            }
        }
        Commands::Report { since_days, out } => {
            let ranking = ranking::rank_all(&store).await?;
            let metric = ranking::Metric::BodyFatPct;
            let leaderboard = ranking::metric_leaderboard(&store, metric, cutoff(since_days)).await?;
            let mut badge_counts = HashMap::new();
            for prediction in &ranking {
                let count = store.user_badges(prediction.user_id).await?.len();
                badge_counts.insert(prediction.user_id, count);
            }
            let report = report::build_report(
                Utc::now().date_naive(),
                &ranking,
                &badge_counts,
                metric,
                &leaderboard,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
