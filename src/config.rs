use anyhow::Context;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_COMPETITION_DAYS: i64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    /// Length of the window opened by a user's first confirmed report.
    pub competition_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS is not a number: {value}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let competition_days = match lookup("COMPETITION_DAYS") {
            Some(value) => value
                .parse()
                .with_context(|| format!("COMPETITION_DAYS is not a number: {value}"))?,
            None => DEFAULT_COMPETITION_DAYS,
        };
        anyhow::ensure!(competition_days > 0, "COMPETITION_DAYS must be positive");

        Ok(Self {
            database_url,
            max_connections,
            competition_days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/bodycomp")]).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.competition_days, 60);
    }

    #[test]
    fn database_url_is_required() {
        assert!(config(&[]).is_err());
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(config(&[("DATABASE_URL", "postgres://x"), ("COMPETITION_DAYS", "soon")]).is_err());
        assert!(config(&[("DATABASE_URL", "postgres://x"), ("COMPETITION_DAYS", "0")]).is_err());
        let custom = config(&[
            ("DATABASE_URL", "postgres://x"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
            ("COMPETITION_DAYS", "90"),
        ])
        .unwrap();
        assert_eq!(custom.max_connections, 12);
        assert_eq!(custom.competition_days, 90);
    }
}
