use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::models::{BadgeAward, SeriesPoint, User};

/// Read/award access the analytics core needs from the measurement store.
///
/// Implementations must return confirmed reports only, ascending by
/// `measured_at`, and must treat a duplicate `(user, badge_type)` award as a
/// no-op rather than an error.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> anyhow::Result<Option<User>>;

    /// All users in a stable order (creation time, then id).
    async fn list_users(&self) -> anyhow::Result<Vec<User>>;

    async fn confirmed_series(&self, user_id: Uuid) -> anyhow::Result<Vec<SeriesPoint>>;

    async fn user_badges(&self, user_id: Uuid) -> anyhow::Result<Vec<BadgeAward>>;

    /// Returns `false` when the badge was already held.
    async fn award_badge(&self, user_id: Uuid, badge_type: &str, label: &str) -> anyhow::Result<bool>;

    /// Confirmed series restricted to reports measured at or after `since`.
    async fn confirmed_series_since(
        &self,
        user_id: Uuid,
        since: Option<NaiveDateTime>,
    ) -> anyhow::Result<Vec<SeriesPoint>> {
        let series = self.confirmed_series(user_id).await?;
        Ok(match since {
            Some(cutoff) => series.into_iter().filter(|p| p.measured_at >= cutoff).collect(),
            None => series,
        })
    }
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use uuid::Uuid;

    use super::MeasurementStore;
    use crate::models::{BadgeAward, Goal, SeriesPoint, User};

    /// In-process store used by the engine tests.
    #[derive(Default)]
    pub struct MemoryStore {
        users: Mutex<Vec<User>>,
        series: Mutex<HashMap<Uuid, Vec<(bool, SeriesPoint)>>>,
        badges: Mutex<HashMap<Uuid, Vec<BadgeAward>>>,
    }

    pub fn day(date: &str) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    impl MemoryStore {
        pub fn add_user(&self, name: &str, competition_end: Option<&str>, is_demo: bool) -> Uuid {
            let id = Uuid::new_v4();
            let end = competition_end.map(|d| day(d).date());
            self.users.lock().unwrap().push(User {
                id,
                name: name.to_string(),
                goal: Goal::Cut,
                competition_start: end.map(|e| e - chrono::Duration::days(60)),
                competition_end: end,
                is_demo,
            });
            id
        }

        pub fn add_point(&self, user_id: Uuid, confirmed: bool, point: SeriesPoint) {
            let mut series = self.series.lock().unwrap();
            let entries = series.entry(user_id).or_default();
            entries.push((confirmed, point));
            entries.sort_by_key(|(_, p)| p.measured_at);
        }

        pub fn add_fat(&self, user_id: Uuid, date: &str, body_fat_pct: f64) {
            self.add_point(
                user_id,
                true,
                SeriesPoint {
                    measured_at: day(date),
                    body_fat_pct: Some(body_fat_pct),
                    ..Default::default()
                },
            );
        }

        pub fn badge_types(&self, user_id: Uuid) -> Vec<String> {
            self.badges
                .lock()
                .unwrap()
                .get(&user_id)
                .map(|b| b.iter().map(|a| a.badge_type.clone()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl MeasurementStore for MemoryStore {
        async fn find_user(&self, user_id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.users.lock().unwrap().iter().find(|u| u.id == user_id).cloned())
        }

        async fn list_users(&self) -> anyhow::Result<Vec<User>> {
            Ok(self.users.lock().unwrap().clone())
        }

        async fn confirmed_series(&self, user_id: Uuid) -> anyhow::Result<Vec<SeriesPoint>> {
            Ok(self
                .series
                .lock()
                .unwrap()
                .get(&user_id)
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|(confirmed, _)| *confirmed)
                        .map(|(_, point)| point.clone())
                        .collect()
                })
                .unwrap_or_default())
        }

        async fn user_badges(&self, user_id: Uuid) -> anyhow::Result<Vec<BadgeAward>> {
            Ok(self.badges.lock().unwrap().get(&user_id).cloned().unwrap_or_default())
        }

        async fn award_badge(&self, user_id: Uuid, badge_type: &str, label: &str) -> anyhow::Result<bool> {
            let mut badges = self.badges.lock().unwrap();
            let owned = badges.entry(user_id).or_default();
            if owned.iter().any(|b| b.badge_type == badge_type) {
                return Ok(false);
            }
            owned.push(BadgeAward {
                badge_type: badge_type.to_string(),
                label: label.to_string(),
                earned_at: Utc::now(),
            });
            Ok(true)
        }
    }
}
