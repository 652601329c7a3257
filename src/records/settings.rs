use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    System,
}

/// Singleton user settings.
///
/// Most fields sync across devices. `assistant_api_key` is the device-local
/// partition: the user supplies their own third-party credential and it must
/// never leave this device nor be overwritten by a remote value (enforced by
/// `Collection::device_local_fields` at the sync boundary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub default_goal: f64,
    pub theme: Theme,
    pub track_sleep: bool,
    pub track_training: bool,
    #[serde(default)]
    pub dietary_preferences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_api_key: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            default_goal: 150.0,
            theme: Theme::System,
            track_sleep: true,
            track_training: true,
            dietary_preferences: Vec::new(),
            assistant_api_key: None,
        }
    }
}
