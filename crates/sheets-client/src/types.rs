//! Sheets API response types

use serde::Deserialize;

/// A range of cell values, one inner vector per row
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRange {
    #[serde(default)]
    pub range: Option<String>,
    #[serde(default)]
    pub major_dimension: Option<String>,
    /// Absent when every cell in the range is empty
    #[serde(default)]
    pub values: Vec<Vec<String>>,
}

impl ValueRange {
    pub fn rows(&self) -> &[Vec<String>] {
        &self.values
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.values
    }
}
