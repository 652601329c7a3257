use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// How a food entry was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Text,
    Photo,
    Manual,
    Label,
}

/// Estimation confidence reported by the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// A single logged food item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodEntry {
    pub date: NaiveDate,
    pub source: EntrySource,
    pub food_name: String,
    pub protein_grams: f64,
    pub confidence: Confidence,
    /// Base64-encoded image for photo entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
}
