use std::collections::HashSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::badges;
use crate::competition;
use crate::models::{BadgeAward, Goal, MeasurementInput, PendingReport, SeriesPoint, User};
use crate::store::MeasurementStore;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Postgres-backed measurement store. Opened once in `main` and passed to
/// every engine call by reference.
pub struct PgStore {
    pool: PgPool,
    competition_days: i64,
}

fn user_from_row(row: &PgRow) -> anyhow::Result<User> {
    let goal: String = row.try_get("goal")?;
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        goal: Goal::parse(&goal)?,
        competition_start: row.try_get("competition_start")?,
        competition_end: row.try_get("competition_end")?,
        is_demo: row.try_get("is_demo")?,
    })
}

impl PgStore {
    pub fn new(pool: PgPool, competition_days: i64) -> Self {
        Self {
            pool,
            competition_days,
        }
    }

    pub async fn find_user_by_name(&self, name: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, goal, competition_start, competition_end, is_demo \
             FROM body_composition.users WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn upsert_user(&self, name: &str, goal: Goal, is_demo: bool) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query(
            r#"
            INSERT INTO body_composition.users (id, name, goal, is_demo)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET goal = EXCLUDED.goal, is_demo = EXCLUDED.is_demo
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(goal.as_str())
        .bind(is_demo)
        .fetch_one(&self.pool)
        .await?
        .get("id");

        Ok(id)
    }

    /// Stores a report. Confirmed reports get their measurement and open the
    /// user's competition window if it has not been opened yet; unconfirmed
    /// ones keep the values as a pending extraction.
    pub async fn record_report(
        &self,
        user_id: Uuid,
        measured_at: NaiveDateTime,
        confirmed: bool,
        measurement: &MeasurementInput,
    ) -> anyhow::Result<Uuid> {
        measurement.validate()?;
        let report_id = Uuid::new_v4();
        let pending = if confirmed {
            None
        } else {
            Some(serde_json::to_value(measurement)?)
        };
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO body_composition.reports (id, user_id, measured_at, confirmed, pending_json)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(report_id)
        .bind(user_id)
        .bind(measured_at)
        .bind(confirmed)
        .bind(pending)
        .execute(&mut *tx)
        .await?;

        if confirmed {
            insert_measurement(&mut tx, report_id, measurement).await?;
            self.open_window(&mut tx, user_id, measured_at).await?;
        }

        tx.commit().await?;
        Ok(report_id)
    }

    /// Confirms a pending report: corrections replace the extracted values,
    /// the measurement is written, and the competition window opens if this
    /// is the user's first confirmed report. Returns the owning user.
    pub async fn confirm_report(
        &self,
        report_id: Uuid,
        measured_at: Option<NaiveDateTime>,
        corrections: &MeasurementInput,
    ) -> anyhow::Result<Uuid> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT user_id, measured_at, confirmed, pending_json
            FROM body_composition.reports
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(report_id)
        .fetch_optional(&mut *tx)
        .await?
        .with_context(|| format!("no report {report_id}"))?;

        let user_id: Uuid = row.try_get("user_id")?;
        let confirmed: bool = row.try_get("confirmed")?;
        anyhow::ensure!(!confirmed, "report {report_id} is already confirmed");

        let pending: Option<serde_json::Value> = row.try_get("pending_json")?;
        let measurement = pending_extraction(pending)?.corrected_by(corrections);
        measurement.validate()?;
        let measured_at = match measured_at {
            Some(value) => value,
            None => row.try_get("measured_at")?,
        };

        sqlx::query(
            r#"
            UPDATE body_composition.reports
            SET confirmed = TRUE, measured_at = $2, pending_json = NULL
            WHERE id = $1
            "#,
        )
        .bind(report_id)
        .bind(measured_at)
        .execute(&mut *tx)
        .await?;

        insert_measurement(&mut tx, report_id, &measurement).await?;
        self.open_window(&mut tx, user_id, measured_at).await?;

        tx.commit().await?;
        tracing::info!(%report_id, %user_id, "report confirmed");
        Ok(user_id)
    }

    pub async fn pending_reports(&self, user_id: Uuid) -> anyhow::Result<Vec<PendingReport>> {
        let rows = sqlx::query(
            "SELECT id, measured_at, pending_json FROM body_composition.reports \
             WHERE user_id = $1 AND NOT confirmed ORDER BY measured_at, created_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            reports.push(PendingReport {
                id: row.try_get("id")?,
                measured_at: row.try_get("measured_at")?,
                extracted: pending_extraction(row.try_get("pending_json")?)?,
            });
        }

        Ok(reports)
    }

    async fn open_window(
        &self,
        conn: &mut PgConnection,
        user_id: Uuid,
        measured_at: NaiveDateTime,
    ) -> anyhow::Result<()> {
        let (start, end) = competition::window_from_first_report(measured_at, self.competition_days);
        let opened = sqlx::query(
            r#"
            UPDATE body_composition.users
            SET competition_start = $2, competition_end = $3
            WHERE id = $1 AND competition_start IS NULL
            "#,
        )
        .bind(user_id)
        .bind(start)
        .bind(end)
        .execute(&mut *conn)
        .await?;

        if opened.rows_affected() > 0 {
            tracing::info!(%user_id, %start, %end, "competition window opened");
        }
        Ok(())
    }
}

async fn insert_measurement(
    conn: &mut PgConnection,
    report_id: Uuid,
    m: &MeasurementInput,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO body_composition.measurements
        (id, report_id, weight, skeletal_muscle, body_fat_mass, body_fat_pct, bmi,
         total_body_water, visceral_fat_level, basal_metabolic_rate, inbody_score,
         segmental_lean_json, segmental_fat_json)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(report_id)
    .bind(m.weight)
    .bind(m.skeletal_muscle)
    .bind(m.body_fat_mass)
    .bind(m.body_fat_pct)
    .bind(m.bmi)
    .bind(m.total_body_water)
    .bind(m.visceral_fat_level)
    .bind(m.basal_metabolic_rate)
    .bind(m.inbody_score)
    .bind(m.segmental_lean.clone())
    .bind(m.segmental_fat.clone())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Pending extraction stored on an unconfirmed report; an empty one when the
/// extraction produced nothing.
fn pending_extraction(value: Option<serde_json::Value>) -> anyhow::Result<MeasurementInput> {
    match value {
        Some(value) => serde_json::from_value(value).context("invalid pending extraction"),
        None => Ok(MeasurementInput::default()),
    }
}

#[async_trait]
impl MeasurementStore for PgStore {
    async fn find_user(&self, user_id: Uuid) -> anyhow::Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, name, goal, competition_start, competition_end, is_demo \
             FROM body_composition.users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn list_users(&self) -> anyhow::Result<Vec<User>> {
        let rows = sqlx::query(
            "SELECT id, name, goal, competition_start, competition_end, is_demo \
             FROM body_composition.users ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    async fn confirmed_series(&self, user_id: Uuid) -> anyhow::Result<Vec<SeriesPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT r.measured_at, m.weight, m.skeletal_muscle, m.body_fat_pct, m.bmi,
                   m.inbody_score, m.basal_metabolic_rate
            FROM body_composition.reports r
            JOIN body_composition.measurements m ON m.report_id = r.id
            WHERE r.user_id = $1 AND r.confirmed
            ORDER BY r.measured_at, r.created_at
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut series = Vec::with_capacity(rows.len());
        for row in rows {
            series.push(SeriesPoint {
                measured_at: row.try_get("measured_at")?,
                weight: row.try_get("weight")?,
                skeletal_muscle: row.try_get("skeletal_muscle")?,
                body_fat_pct: row.try_get("body_fat_pct")?,
                bmi: row.try_get("bmi")?,
                inbody_score: row.try_get("inbody_score")?,
                basal_metabolic_rate: row.try_get("basal_metabolic_rate")?,
            });
        }

        Ok(series)
    }

    async fn user_badges(&self, user_id: Uuid) -> anyhow::Result<Vec<BadgeAward>> {
        let rows = sqlx::query(
            "SELECT badge_type, badge_label, earned_at FROM body_composition.badges \
             WHERE user_id = $1 ORDER BY earned_at, badge_type",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut awards = Vec::with_capacity(rows.len());
        for row in rows {
            awards.push(BadgeAward {
                badge_type: row.try_get("badge_type")?,
                label: row.try_get("badge_label")?,
                earned_at: row.try_get("earned_at")?,
            });
        }

        Ok(awards)
    }

    async fn award_badge(&self, user_id: Uuid, badge_type: &str, label: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO body_composition.badges (id, user_id, badge_type, badge_label)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, badge_type) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(badge_type)
        .bind(label)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Accepts a bare date (midnight) or a date with a time of day.
pub fn parse_measured_at(value: &str) -> anyhow::Result<NaiveDateTime> {
    let value = value.trim();
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(parsed);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| date.and_time(chrono::NaiveTime::MIN))
        .with_context(|| format!("invalid measured_at '{value}'"))
}

#[derive(Debug, serde::Deserialize)]
pub struct ImportRow {
    pub name: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub measured_at: String,
    #[serde(default)]
    pub confirmed: Option<bool>,
    #[serde(default)]
    pub is_demo: Option<bool>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub skeletal_muscle: Option<f64>,
    #[serde(default)]
    pub body_fat_mass: Option<f64>,
    #[serde(default)]
    pub body_fat_pct: Option<f64>,
    #[serde(default)]
    pub bmi: Option<f64>,
    #[serde(default)]
    pub total_body_water: Option<f64>,
    #[serde(default)]
    pub visceral_fat_level: Option<i32>,
    #[serde(default)]
    pub basal_metabolic_rate: Option<i32>,
    #[serde(default)]
    pub inbody_score: Option<i32>,
    #[serde(default)]
    pub segmental_lean: Option<String>,
    #[serde(default)]
    pub segmental_fat: Option<String>,
}

impl ImportRow {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.unwrap_or(true)
    }

    /// Values carried by the row, rejected when a reading is `NaN` or infinite.
    pub fn measurement(&self) -> anyhow::Result<MeasurementInput> {
        let json = |raw: &Option<String>| -> anyhow::Result<Option<serde_json::Value>> {
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(text) => Ok(Some(
                    serde_json::from_str(text).context("invalid segmental JSON")?,
                )),
            }
        };
        let measurement = MeasurementInput {
            weight: self.weight,
            skeletal_muscle: self.skeletal_muscle,
            body_fat_mass: self.body_fat_mass,
            body_fat_pct: self.body_fat_pct,
            bmi: self.bmi,
            total_body_water: self.total_body_water,
            visceral_fat_level: self.visceral_fat_level,
            basal_metabolic_rate: self.basal_metabolic_rate,
            inbody_score: self.inbody_score,
            segmental_lean: json(&self.segmental_lean)?,
            segmental_fat: json(&self.segmental_fat)?,
        };
        measurement.validate()?;
        Ok(measurement)
    }
}

pub fn read_import_rows<R: std::io::Read>(reader: R) -> anyhow::Result<Vec<ImportRow>> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();
    for (line, result) in reader.deserialize::<ImportRow>().enumerate() {
        let row = result.with_context(|| format!("invalid CSV record {}", line + 1))?;
        row.measurement()
            .with_context(|| format!("invalid CSV record {}", line + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

#[derive(Debug, Default)]
pub struct ImportSummary {
    pub reports: usize,
    pub users: usize,
    pub badges: usize,
}

pub async fn import_csv(store: &PgStore, csv_path: &std::path::Path) -> anyhow::Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_import_rows(file)?;

    let mut summary = ImportSummary::default();
    let mut touched: Vec<Uuid> = Vec::new();
    let mut seen = HashSet::new();

    for row in rows {
        let goal = Goal::parse(row.goal.as_deref().unwrap_or(""))?;
        let user_id = store
            .upsert_user(&row.name, goal, row.is_demo.unwrap_or(false))
            .await?;
        let measured_at = parse_measured_at(&row.measured_at)?;
        let measurement = row.measurement()?;

        store
            .record_report(user_id, measured_at, row.is_confirmed(), &measurement)
            .await?;
        summary.reports += 1;

        if seen.insert(user_id) {
            touched.push(user_id);
        }
    }

    summary.users = touched.len();
    for user_id in touched {
        summary.badges += badges::evaluate_badges(store, user_id).await?.len();
    }

    Ok(summary)
}

type SeedPoint = (i64, f64, f64, f64, f64, f64, f64, i32, i32, i32);

// (day offset, weight, skeletal muscle, fat mass, fat %, bmi, body water,
//  visceral level, bmr, inbody score)
const SEED_COHORT: [(&str, Goal, i64, &[SeedPoint]); 5] = [
    (
        "Ming",
        Goal::Cut,
        0,
        &[
            (0, 78.5, 33.2, 17.3, 22.0, 25.8, 42.1, 9, 1620, 72),
            (10, 77.8, 33.4, 16.2, 20.8, 25.5, 42.3, 9, 1625, 74),
            (21, 76.5, 33.5, 14.9, 19.5, 25.1, 42.4, 8, 1630, 76),
            (32, 75.8, 33.7, 14.0, 18.5, 24.9, 42.5, 8, 1635, 78),
            (45, 75.2, 33.8, 13.2, 17.5, 24.7, 42.7, 7, 1640, 80),
        ],
    ),
    (
        "Hua",
        Goal::Cut,
        3,
        &[
            (0, 82.0, 30.1, 23.0, 28.0, 27.5, 39.8, 11, 1550, 65),
            (14, 81.2, 30.3, 22.0, 27.1, 27.2, 40.0, 11, 1555, 66),
            (30, 80.5, 30.5, 21.0, 26.1, 27.0, 40.2, 10, 1560, 68),
            (42, 80.0, 30.6, 20.4, 25.5, 26.8, 40.3, 10, 1565, 69),
        ],
    ),
    (
        "Wei",
        Goal::Cut,
        5,
        &[
            (0, 85.0, 34.5, 20.4, 24.0, 26.9, 43.0, 10, 1680, 70),
            (15, 85.2, 34.4, 20.6, 24.2, 27.0, 43.0, 10, 1678, 70),
            (28, 84.0, 34.8, 19.3, 23.0, 26.6, 43.3, 10, 1690, 72),
            (40, 83.2, 35.0, 18.3, 22.0, 26.3, 43.5, 9, 1700, 74),
            (50, 82.5, 35.2, 17.3, 21.0, 26.1, 43.7, 9, 1710, 75),
        ],
    ),
    (
        "Mei",
        Goal::Bulk,
        2,
        &[
            (0, 58.0, 22.5, 14.5, 25.0, 21.5, 31.0, 4, 1280, 68),
            (12, 58.5, 23.0, 14.2, 24.3, 21.7, 31.4, 4, 1295, 70),
            (25, 59.0, 23.5, 14.0, 23.7, 21.9, 31.8, 4, 1310, 72),
        ],
    ),
    (
        "Qiang",
        Goal::Cut,
        1,
        &[
            (0, 90.0, 35.0, 23.4, 26.0, 28.5, 44.0, 12, 1700, 66),
            (18, 90.5, 34.8, 24.2, 26.7, 28.7, 43.8, 12, 1695, 65),
            (35, 91.2, 34.5, 25.5, 28.0, 28.9, 43.5, 13, 1688, 63),
        ],
    ),
];

/// Loads a five-person cohort starting around 2026-01-15. Users that already
/// exist are left untouched.
pub async fn seed(store: &PgStore) -> anyhow::Result<()> {
    let base = NaiveDate::from_ymd_opt(2026, 1, 15).context("invalid date")?;

    for (name, goal, start_offset, points) in SEED_COHORT {
        if store.find_user_by_name(name).await?.is_some() {
            tracing::info!(user = name, "seed user already exists, skipping");
            continue;
        }

        let user_id = store.upsert_user(name, goal, false).await?;
        for &(day, weight, muscle, fat_mass, fat_pct, bmi, water, visceral, bmr, score) in points {
            let measured_at = (base + chrono::Duration::days(start_offset + day))
                .and_time(chrono::NaiveTime::MIN);
            let measurement = MeasurementInput {
                weight: Some(weight),
                skeletal_muscle: Some(muscle),
                body_fat_mass: Some(fat_mass),
                body_fat_pct: Some(fat_pct),
                bmi: Some(bmi),
                total_body_water: Some(water),
                visceral_fat_level: Some(visceral),
                basal_metabolic_rate: Some(bmr),
                inbody_score: Some(score),
                ..Default::default()
            };
            store
                .record_report(user_id, measured_at, true, &measurement)
                .await?;
        }

        let earned = badges::evaluate_badges(store, user_id).await?;
        tracing::info!(user = name, reports = points.len(), badges = earned.len(), "seeded user");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dates_and_datetimes() {
        assert_eq!(
            parse_measured_at("2026-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap().and_hms_opt(0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_measured_at("2026-01-15T07:45").unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap().and_hms_opt(7, 45, 0).unwrap()
        );
        assert_eq!(
            parse_measured_at(" 2026-01-15 07:45:30 ").unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 15).unwrap().and_hms_opt(7, 45, 30).unwrap()
        );
        assert!(parse_measured_at("15/01/2026").is_err());
    }

    #[test]
    fn reads_import_rows_with_missing_values() {
        let data = "\
name,goal,measured_at,confirmed,is_demo,weight,skeletal_muscle,body_fat_mass,body_fat_pct,bmi,total_body_water,visceral_fat_level,basal_metabolic_rate,inbody_score,segmental_lean,segmental_fat
Ming,cut,2026-01-15,true,false,78.5,33.2,17.3,22.0,25.8,42.1,9,1620,72,\"{\"\"trunk\"\": 24.1}\",
Ming,cut,2026-01-25,true,false,77.8,,16.2,,25.5,42.3,9,1625,74,,
Hua,bulk,2026-01-18,false,false,,,,,,,,,,,
";
        let rows = read_import_rows(data.as_bytes()).unwrap();
        assert_eq!(rows.len(), 3);

        let first = rows[0].measurement().unwrap();
        assert_eq!(first.body_fat_pct, Some(22.0));
        assert_eq!(first.segmental_lean, Some(serde_json::json!({ "trunk": 24.1 })));
        assert_eq!(first.segmental_fat, None);

        let second = rows[1].measurement().unwrap();
        assert_eq!(second.skeletal_muscle, None);
        assert_eq!(second.body_fat_pct, None);
        assert_eq!(second.inbody_score, Some(74));

        assert!(!rows[2].is_confirmed());
        assert_eq!(rows[2].measurement().unwrap(), MeasurementInput::default());
    }

    #[test]
    fn unconfirmed_rows_keep_their_extracted_values() {
        let data = "\
name,measured_at,confirmed,weight,body_fat_pct
Hua,2026-01-18,false,82.0,28.0
";
        let rows = read_import_rows(data.as_bytes()).unwrap();
        assert!(!rows[0].is_confirmed());

        let extracted = rows[0].measurement().unwrap();
        assert_eq!(extracted.weight, Some(82.0));
        assert_eq!(extracted.body_fat_pct, Some(28.0));

        let stored = serde_json::to_value(&extracted).unwrap();
        assert_eq!(pending_extraction(Some(stored)).unwrap(), extracted);
        assert_eq!(pending_extraction(None).unwrap(), MeasurementInput::default());
    }

    #[test]
    fn non_finite_import_values_are_rejected() {
        for value in ["NaN", "inf", "-inf"] {
            let data = format!("name,measured_at,body_fat_pct\nMing,2026-01-15,22.0\nMing,2026-01-25,{value}\n");
            let err = read_import_rows(data.as_bytes()).unwrap_err();
            assert!(format!("{err:#}").contains("invalid CSV record 2"), "{err:#}");
            assert!(format!("{err:#}").contains("body_fat_pct"), "{err:#}");
        }
    }

    #[test]
    fn seed_cohort_series_are_chronological() {
        for (_, _, _, points) in SEED_COHORT {
            assert!(points.len() >= 3);
            assert!(points.windows(2).all(|pair| pair[0].0 < pair[1].0));
        }
    }
}
