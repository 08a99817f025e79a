use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Cut,
    Bulk,
    Maintain,
}

impl Goal {
    pub fn as_str(self) -> &'static str {
        match self {
            Goal::Cut => "cut",
            Goal::Bulk => "bulk",
            Goal::Maintain => "maintain",
        }
    }

    pub fn parse(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cut" => Ok(Goal::Cut),
            "bulk" => Ok(Goal::Bulk),
            "maintain" | "" => Ok(Goal::Maintain),
            other => anyhow::bail!("unknown goal '{other}' (expected cut, bulk or maintain)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub goal: Goal,
    pub competition_start: Option<NaiveDate>,
    pub competition_end: Option<NaiveDate>,
    pub is_demo: bool,
}

/// One confirmed measurement as seen by the analytics core.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SeriesPoint {
    pub measured_at: NaiveDateTime,
    pub weight: Option<f64>,
    pub skeletal_muscle: Option<f64>,
    pub body_fat_pct: Option<f64>,
    pub bmi: Option<f64>,
    pub inbody_score: Option<i32>,
    pub basal_metabolic_rate: Option<i32>,
}

/// Full measurement payload. Unconfirmed reports keep one of these as their
/// pending extraction until a person confirms or corrects it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementInput {
    pub weight: Option<f64>,
    pub skeletal_muscle: Option<f64>,
    pub body_fat_mass: Option<f64>,
    pub body_fat_pct: Option<f64>,
    pub bmi: Option<f64>,
    pub total_body_water: Option<f64>,
    pub visceral_fat_level: Option<i32>,
    pub basal_metabolic_rate: Option<i32>,
    pub inbody_score: Option<i32>,
    pub segmental_lean: Option<serde_json::Value>,
    pub segmental_fat: Option<serde_json::Value>,
}

impl MeasurementInput {
    /// Rejects `NaN` and infinite readings; absent values are fine.
    pub fn validate(&self) -> anyhow::Result<()> {
        let readings = [
            ("weight", self.weight),
            ("skeletal_muscle", self.skeletal_muscle),
            ("body_fat_mass", self.body_fat_mass),
            ("body_fat_pct", self.body_fat_pct),
            ("bmi", self.bmi),
            ("total_body_water", self.total_body_water),
        ];
        for (field, value) in readings {
            if let Some(value) = value {
                anyhow::ensure!(value.is_finite(), "{field} must be a finite number, got {value}");
            }
        }
        Ok(())
    }

    /// Values present in `corrections` replace the extracted ones.
    pub fn corrected_by(self, corrections: &MeasurementInput) -> MeasurementInput {
        MeasurementInput {
            weight: corrections.weight.or(self.weight),
            skeletal_muscle: corrections.skeletal_muscle.or(self.skeletal_muscle),
            body_fat_mass: corrections.body_fat_mass.or(self.body_fat_mass),
            body_fat_pct: corrections.body_fat_pct.or(self.body_fat_pct),
            bmi: corrections.bmi.or(self.bmi),
            total_body_water: corrections.total_body_water.or(self.total_body_water),
            visceral_fat_level: corrections.visceral_fat_level.or(self.visceral_fat_level),
            basal_metabolic_rate: corrections.basal_metabolic_rate.or(self.basal_metabolic_rate),
            inbody_score: corrections.inbody_score.or(self.inbody_score),
            segmental_lean: corrections.segmental_lean.clone().or(self.segmental_lean),
            segmental_fat: corrections.segmental_fat.clone().or(self.segmental_fat),
        }
    }
}

/// An unconfirmed report waiting for review.
#[derive(Debug, Clone, Serialize)]
pub struct PendingReport {
    pub id: Uuid,
    pub measured_at: NaiveDateTime,
    pub extracted: MeasurementInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub user_id: Uuid,
    pub name: String,
    pub first_fat_pct: f64,
    pub current_fat_pct: f64,
    pub predicted_fat_pct: f64,
    /// `predicted_fat_pct - first_fat_pct`; negative means fat lost.
    pub predicted_change: f64,
    pub data_points: usize,
    pub competition_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeAward {
    pub badge_type: String,
    pub label: String,
    pub earned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBadge {
    #[serde(rename = "type")]
    pub badge_type: &'static str,
    pub label: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricEntry {
    pub user_id: Uuid,
    pub name: String,
    pub first_value: f64,
    pub last_value: f64,
    pub diff: f64,
    pub count: usize,
    pub badge_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_readings_are_rejected() {
        let nan = MeasurementInput {
            body_fat_pct: Some(f64::NAN),
            ..Default::default()
        };
        assert!(nan.validate().is_err());

        let infinite = MeasurementInput {
            weight: Some(f64::INFINITY),
            ..Default::default()
        };
        assert!(infinite.validate().is_err());

        let partial = MeasurementInput {
            body_fat_pct: Some(21.4),
            ..Default::default()
        };
        assert!(partial.validate().is_ok());
        assert!(MeasurementInput::default().validate().is_ok());
    }

    #[test]
    fn corrections_override_extracted_values() {
        let extracted = MeasurementInput {
            weight: Some(78.5),
            body_fat_pct: Some(32.0),
            inbody_score: Some(72),
            ..Default::default()
        };
        let corrections = MeasurementInput {
            body_fat_pct: Some(22.0),
            skeletal_muscle: Some(33.2),
            ..Default::default()
        };

        let confirmed = extracted.corrected_by(&corrections);
        assert_eq!(confirmed.weight, Some(78.5));
        assert_eq!(confirmed.body_fat_pct, Some(22.0));
        assert_eq!(confirmed.skeletal_muscle, Some(33.2));
        assert_eq!(confirmed.inbody_score, Some(72));
        assert_eq!(confirmed.bmi, None);
    }
}
