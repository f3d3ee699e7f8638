//! Reference model training
//!
//! Fits a one-feature least-squares line predicting `latest_loyalty_score`
//! from `latest_purchase_value`. The split into train and test rows is a
//! seeded shuffle, so the same data and seed give the same model and MSE.

use chrono::{DateTime, Utc};
use featuresync_core::{
    Error, RawEvent, Result, Scorer, LATEST_LOYALTY_SCORE, LATEST_PURCHASE_VALUE,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub feature: String,
    pub target: String,
    /// Share of rows held out for evaluation, in `[0, 1)`
    pub test_fraction: f64,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            feature: LATEST_PURCHASE_VALUE.to_string(),
            target: LATEST_LOYALTY_SCORE.to_string(),
            test_fraction: 0.2,
            seed: 42,
        }
    }
}

/// `target = intercept + slope * feature`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub feature: String,
    pub target: String,
    pub slope: f64,
    pub intercept: f64,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Mean squared error on the held-out rows (`None` without a test split)
    pub test_mse: Option<f64>,
    pub trained_at: DateTime<Utc>,
}

impl LinearModel {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn evaluate(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

impl Scorer for LinearModel {
    fn required_features(&self) -> Vec<String> {
        vec![self.feature.clone()]
    }

    fn predict(&self, features: Vec<f64>) -> Result<f64> {
        match features.as_slice() {
            [x] => Ok(self.evaluate(*x)),
            other => Err(Error::invalid_input(format!(
                "model expects 1 input ({}), got {}",
                self.feature,
                other.len()
            ))),
        }
    }
}

/// Fit a line through `(feature, target)` pairs
///
/// Rows missing either value are skipped. At least two usable rows are
/// required.
pub fn train_linear(events: &[RawEvent], config: &TrainConfig) -> Result<LinearModel> {
    if !(0.0..1.0).contains(&config.test_fraction) {
        return Err(Error::config(format!(
            "test_fraction must be in [0, 1), got {}",
            config.test_fraction
        )));
    }

    let mut rows: Vec<(f64, f64)> = events
        .iter()
        .filter_map(|e| {
            let x = e.features.get(&config.feature)?.as_f64();
            let y = e.features.get(&config.target)?.as_f64();
            Some((x, y))
        })
        .collect();

    if rows.len() < 2 {
        return Err(Error::invalid_input(format!(
            "need at least 2 rows with '{}' and '{}', got {}",
            config.feature,
            config.target,
            rows.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    rows.shuffle(&mut rng);

    let test_rows = ((rows.len() as f64) * config.test_fraction).ceil() as usize;
    let test_rows = test_rows.min(rows.len() - 1);
    let (test, train) = rows.split_at(test_rows);

    let (slope, intercept) = least_squares(train);
    let mut model = LinearModel {
        feature: config.feature.clone(),
        target: config.target.clone(),
        slope,
        intercept,
        train_rows: train.len(),
        test_rows: test.len(),
        test_mse: None,
        trained_at: Utc::now(),
    };

    if !test.is_empty() {
        let mse = test
            .iter()
            .map(|(x, y)| (model.evaluate(*x) - y).powi(2))
            .sum::<f64>()
            / test.len() as f64;
        model.test_mse = Some(mse);
    }

    tracing::info!(
        train_rows = model.train_rows,
        test_rows = model.test_rows,
        slope = model.slope,
        intercept = model.intercept,
        test_mse = ?model.test_mse,
        "Model trained"
    );

    Ok(model)
}

/// Ordinary least squares; a constant feature gives a flat line at the mean
fn least_squares(rows: &[(f64, f64)]) -> (f64, f64) {
    let n = rows.len() as f64;
    let mean_x = rows.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = rows.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (cov, var) = rows.iter().fold((0.0, 0.0), |(cov, var), (x, y)| {
        let dx = x - mean_x;
        (cov + dx * (y - mean_y), var + dx * dx)
    });

    if var == 0.0 {
        (0.0, mean_y)
    } else {
        let slope = cov / var;
        (slope, mean_y - slope * mean_x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn events(points: &[(f64, f64)]) -> Vec<RawEvent> {
        points
            .iter()
            .enumerate()
            .map(|(i, (x, y))| {
                let ts = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap()
                    + chrono::Duration::minutes(i as i64);
                RawEvent::customer_transaction(i as i64, ts, *x, *y)
            })
            .collect()
    }

    #[test]
    fn test_fits_exact_line() {
        let points: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 0.5 * i as f64 + 1.0)).collect();
        let model = train_linear(&events(&points), &TrainConfig::default()).unwrap();

        assert!((model.slope - 0.5).abs() < 1e-9);
        assert!((model.intercept - 1.0).abs() < 1e-9);
        assert_eq!(model.train_rows, 8);
        assert_eq!(model.test_rows, 2);
        assert!(model.test_mse.unwrap() < 1e-12);
    }

    #[test]
    fn test_same_seed_same_model() {
        let points: Vec<(f64, f64)> = (0..20).map(|i| (i as f64, ((i * 7) % 5) as f64)).collect();
        let a = train_linear(&events(&points), &TrainConfig::default()).unwrap();
        let b = train_linear(&events(&points), &TrainConfig::default()).unwrap();
        assert_eq!(a.slope, b.slope);
        assert_eq!(a.test_mse, b.test_mse);
    }

    #[test]
    fn test_rows_missing_values_are_skipped() {
        let ts = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        let mut data = events(&[(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)]);
        data.push(RawEvent::new(featuresync_core::CustomerId::new(99), ts).with_feature(LATEST_PURCHASE_VALUE, 100.0));

        let config = TrainConfig {
            test_fraction: 0.0,
            ..Default::default()
        };
        let model = train_linear(&data, &config).unwrap();
        assert_eq!(model.train_rows, 3);
        assert!(model.test_mse.is_none());
        assert!((model.slope - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_rows() {
        let err = train_linear(&events(&[(1.0, 1.0)]), &TrainConfig::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_scorer_contract() {
        let model = train_linear(&events(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]), &TrainConfig {
            test_fraction: 0.0,
            ..Default::default()
        })
        .unwrap();

        assert_eq!(model.required_features(), vec![LATEST_PURCHASE_VALUE.to_string()]);
        assert!((model.predict(vec![4.0]).unwrap() - 9.0).abs() < 1e-9);
        assert!(model.predict(vec![]).is_err());

        let restored = LinearModel::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(restored, model);
    }
}
