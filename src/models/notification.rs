use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::text_enum;
use super::user::Role;

text_enum! {
    NotificationPriority {
        Low => "low",
        Normal => "normal",
        High => "high",
        Urgent => "urgent",
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub priority: NotificationPriority,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub related_entity_type: Option<String>,
    pub related_entity_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

pub const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, notification_type, priority, \
     is_read, read_at, related_entity_type, related_entity_id, created_at";

/// What to write; the recipient is chosen by the caller.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub notification_type: &'static str,
    pub priority: NotificationPriority,
    pub related_entity_type: Option<&'static str>,
    pub related_entity_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationRequest {
    /// Single recipient. Exactly one of `userId` and `role` must be given.
    pub user_id: Option<Uuid>,
    /// Fan out to every active user with this role.
    pub role: Option<Role>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1, max = 2000))]
    pub message: String,
    #[serde(default = "default_priority")]
    pub priority: NotificationPriority,
}

fn default_priority() -> NotificationPriority {
    NotificationPriority::Normal
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationListQuery {
    #[serde(default)]
    pub unread_only: bool,
}
