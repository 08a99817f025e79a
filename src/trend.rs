use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Reasons a user has no trend prediction. None of these are fatal: callers
/// treat every variant as "prediction not unlocked yet".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PredictionError {
    #[error("at least 2 body fat readings are needed, found {found}")]
    InsufficientData { found: usize },

    #[error("body fat readings do not define a line")]
    DegenerateRegression,

    #[error("competition window has not started")]
    NoCompetitionWindow,

    #[error("user not found")]
    UnknownUser,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extrapolation {
    pub first: f64,
    pub last: f64,
    pub predicted: f64,
    pub change: f64,
    pub samples: usize,
}

/// Ordinary least squares over `(x, y)` points.
pub fn fit_line(points: &[(f64, f64)]) -> Result<LinearFit, PredictionError> {
    let n = points.len();
    if n < 2 {
        return Err(PredictionError::InsufficientData { found: n });
    }

    let (mut sum_x, mut sum_y, mut sum_xy, mut sum_xx) = (0.0, 0.0, 0.0, 0.0);
    for &(x, y) in points {
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_xx += x * x;
    }

    let n = n as f64;
    let denominator = n * sum_xx - sum_x * sum_x;
    if denominator == 0.0 {
        return Err(PredictionError::DegenerateRegression);
    }

    let slope = (n * sum_xy - sum_x * sum_y) / denominator;
    let intercept = (sum_y - slope * sum_x) / n;
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(PredictionError::DegenerateRegression);
    }
    Ok(LinearFit { slope, intercept })
}

/// Fractional days from `origin` to `at`.
pub fn days_between(origin: NaiveDateTime, at: NaiveDateTime) -> f64 {
    (at - origin).num_milliseconds() as f64 / 86_400_000.0
}

/// One decimal place, halves rounded away from zero.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Extrapolates a chronologically ordered body fat series to midnight of
/// `target`. Values are not clamped to any plausible range.
pub fn extrapolate(
    samples: &[(NaiveDateTime, f64)],
    target: NaiveDate,
) -> Result<Extrapolation, PredictionError> {
    let (Some(&(origin, first)), Some(&(_, last))) = (samples.first(), samples.last()) else {
        return Err(PredictionError::InsufficientData { found: 0 });
    };

    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|(at, value)| (days_between(origin, *at), *value))
        .collect();
    let fit = fit_line(&points)?;

    let end_days = days_between(origin, target.and_time(chrono::NaiveTime::MIN));
    let predicted = round1(fit.at(end_days));
    if !predicted.is_finite() {
        return Err(PredictionError::DegenerateRegression);
    }

    Ok(Extrapolation {
        first,
        last,
        predicted,
        change: round1(predicted - first),
        samples: samples.len(),
    })
}
