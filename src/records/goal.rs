use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Per-day protein target, overriding the default from settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyGoal {
    pub date: NaiveDate,
    pub protein_grams: f64,
}
