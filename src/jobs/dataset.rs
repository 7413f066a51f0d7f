//! Tabular training data accepted by Adjust jobs.

use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::prompt;

/// A dataset as submitted: named columns and string cells. The first column
/// holds questions and the second holds answers; extra columns are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check the shape: at least two columns, at least one row, and no
    /// row shorter or longer than the header.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.columns.len() < 2 {
            return Err(ValidationError::TooFewColumns {
                found: self.columns.len(),
            });
        }
        if self.rows.is_empty() {
            return Err(ValidationError::EmptyDataset);
        }
        let expected = self.columns.len();
        if let Some((row, cells)) = self
            .rows
            .iter()
            .enumerate()
            .find(|(_, cells)| cells.len() != expected)
        {
            return Err(ValidationError::RaggedRow {
                row,
                expected,
                found: cells.len(),
            });
        }
        Ok(())
    }

    /// Keep at most `max_rows` rows, chosen uniformly at random when the
    /// dataset is larger. Surviving rows keep their original order.
    pub fn capped<R: Rng + ?Sized>(mut self, max_rows: usize, rng: &mut R) -> Self {
        if self.rows.len() <= max_rows {
            return self;
        }

        let mut keep = index::sample(rng, self.rows.len(), max_rows).into_vec();
        keep.sort_unstable();

        let mut wanted = keep.into_iter().peekable();
        self.rows = std::mem::take(&mut self.rows)
            .into_iter()
            .enumerate()
            .filter_map(|(i, row)| {
                if wanted.peek() == Some(&i) {
                    wanted.next();
                    Some(row)
                } else {
                    None
                }
            })
            .collect();
        self
    }

    /// Format each row as one instruction-style training sample.
    pub fn training_samples(&self) -> Vec<String> {
        self.rows
            .iter()
            .map(|cells| prompt::training_sample(cells[0].trim(), cells[1].trim()))
            .collect()
    }
}
