use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub prefix: String,
    pub active_organization_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Organization {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub backpack_id: String,
    pub added_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub user_email: String,
    pub parent_id: Option<i64>,
}

/// Parent or child reference embedded in an [`ItemDetails`].
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct ItemSummary {
    pub id: i64,
    pub name: String,
    pub backpack_id: String,
}

/// An item with its relations loaded, as returned by the API.
#[derive(Serialize, Debug, Clone)]
pub struct ItemDetails {
    #[serde(flatten)]
    pub item: Item,
    pub parent: Option<ItemSummary>,
    pub children: Vec<ItemSummary>,
    pub tags: Vec<Tag>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub organization_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct ResetToken {
    pub id: i64,
    pub token: String,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub user_email: String,
}

impl ResetToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expired_at
    }
}
