use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SystemSetting {
    pub key: String,
    pub value: serde_json::Value,
    pub category: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub updated_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

pub const SETTING_COLUMNS: &str = "key, value, category, description, is_public, updated_by, updated_at";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpsertSettingRequest {
    pub value: serde_json::Value,
    #[validate(length(min = 1, max = 50))]
    pub category: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SettingListQuery {
    pub category: Option<String>,
}

/// Keys are dotted lowercase identifiers, e.g. `consent.request_ttl_hours`.
pub fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 100
        && key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '.')
        && !key.starts_with('.')
        && !key.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::valid_key;
    use test_case::test_case;

    #[test_case("hospital.name", true)]
    #[test_case("consent.request_ttl_hours", true)]
    #[test_case("", false)]
    #[test_case("Hospital.Name", false)]
    #[test_case(".leading", false)]
    #[test_case("drop table;", false)]
    fn setting_keys(key: &str, ok: bool) {
        assert_eq!(valid_key(key), ok);
    }
}
