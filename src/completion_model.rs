//! Per-user online-updated probability model for "will task at slot be completed".
//!
//! Implements the incrementally-updated logistic-regression-style linear model
//! chosen to resolve the open completion-model-algorithm question: a weighted
//! dot product over the feature vector, squashed through a sigmoid, updated by
//! a gradient step in `partial_fit`. Persists per-user weights in SQLite using
//! the same `Connection`-plus-schema-init shape as the calibration store this
//! is grounded on.

use crate::error::Result;
use crate::feature_extractor::{FeatureVector, FEATURE_NAMES};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const FALLBACK_PROBABILITY: f64 = 0.7;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

pub struct CompletionModel {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    min_samples_for_update: usize,
    learning_rate: f64,
}

impl CompletionModel {
    pub fn new(db_path: impl AsRef<Path>, min_samples_for_update: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self { db_path, conn: Mutex::new(conn), min_samples_for_update, learning_rate: 0.05 })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS completion_weights (
                user_id TEXT PRIMARY KEY,
                weights_json TEXT NOT NULL,
                bias REAL NOT NULL,
                sample_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    fn load_weights(&self, user_id: &str) -> Result<Option<(Vec<f64>, f64, u64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT weights_json, bias, sample_count FROM completion_weights WHERE user_id = ?1",
        )?;
        let mut rows = stmt.query(params![user_id])?;
        if let Some(row) = rows.next()? {
            let weights_json: String = row.get(0)?;
            let bias: f64 = row.get(1)?;
            let sample_count: i64 = row.get(2)?;
            let weights: Vec<f64> = serde_json::from_str(&weights_json)?;
            Ok(Some((weights, bias, sample_count as u64)))
        } else {
            Ok(None)
        }
    }

    fn store_weights(&self, user_id: &str, weights: &[f64], bias: f64, sample_count: u64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let weights_json = serde_json::to_string(weights)?;
        conn.execute(
            "INSERT INTO completion_weights (user_id, weights_json, bias, sample_count, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                weights_json = excluded.weights_json,
                bias = excluded.bias,
                sample_count = excluded.sample_count,
                updated_at = excluded.updated_at",
            params![user_id, weights_json, bias, sample_count as i64, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Predicts a completion probability per feature row. Falls back to a
    /// uniform 0.7 when no model has been loaded for the user yet.
    pub fn predict(&self, user_id: &str, features: &[FeatureVector]) -> Result<Vec<f64>> {
        match self.load_weights(user_id)? {
            None => Ok(vec![FALLBACK_PROBABILITY; features.len()]),
            Some((weights, bias, _)) => Ok(features
                .iter()
                .map(|f| sigmoid(dot(&weights, &f.values) + bias))
                .collect()),
        }
    }

    /// One gradient step per labeled sample. Requires at least
    /// `min_samples_for_update` samples to apply an update.
    pub fn partial_fit(&self, user_id: &str, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        if x.len() != y.len() {
            return Err(crate::error::Error::Validation(
                "partial_fit: x and y length mismatch".to_string(),
            ));
        }
        if x.len() < self.min_samples_for_update {
            return Ok(());
        }

        let n_features = FEATURE_NAMES.len();
        let (mut weights, mut bias, mut sample_count) = self
            .load_weights(user_id)?
            .unwrap_or_else(|| (vec![0.0; n_features], 0.0, 0));

        for (xi, yi) in x.iter().zip(y.iter()) {
            let pred = sigmoid(dot(&weights, xi) + bias);
            let error = yi - pred;
            for (w, xij) in weights.iter_mut().zip(xi.iter()) {
                *w += self.learning_rate * error * xij;
            }
            bias += self.learning_rate * error;
            sample_count += 1;
        }

        self.store_weights(user_id, &weights, bias, sample_count)
    }

    pub fn save(&self, user_id: &str) -> Result<bool> {
        Ok(self.load_weights(user_id)?.is_some())
    }

    pub fn load(&self, user_id: &str) -> Result<bool> {
        Ok(self.load_weights(user_id)?.is_some())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_without_model_returns_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let model = CompletionModel::new(dir.path().join("model.db"), 5).unwrap();
        let features = vec![FeatureVector { task_index: 0, slot_index: 0, values: vec![0.5; FEATURE_NAMES.len()] }];
        let preds = model.predict("u1", &features).unwrap();
        assert_eq!(preds, vec![0.7]);
    }

    #[test]
    fn test_partial_fit_requires_min_samples() {
        let dir = tempfile::tempdir().unwrap();
        let model = CompletionModel::new(dir.path().join("model.db"), 5).unwrap();
        let x = vec![vec![0.5; FEATURE_NAMES.len()]; 2];
        let y = vec![1.0, 0.0];
        model.partial_fit("u1", &x, &y).unwrap();
        assert!(!model.load("u1").unwrap());
    }

    #[test]
    fn test_partial_fit_updates_weights_after_min_samples() {
        let dir = tempfile::tempdir().unwrap();
        let model = CompletionModel::new(dir.path().join("model.db"), 2).unwrap();
        let x = vec![vec![1.0; FEATURE_NAMES.len()]; 3];
        let y = vec![1.0, 1.0, 1.0];
        model.partial_fit("u1", &x, &y).unwrap();
        assert!(model.load("u1").unwrap());

        let features = vec![FeatureVector { task_index: 0, slot_index: 0, values: vec![1.0; FEATURE_NAMES.len()] }];
        let preds = model.predict("u1", &features).unwrap();
        assert!(preds[0] > 0.5);
    }
}
