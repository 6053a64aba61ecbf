use serde::{Serialize, Deserialize};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct UserQuota {
    pub user_id: Uuid,
    pub storage_allocated: i64,
    pub storage_used: i64,
}

impl UserQuota {
    pub fn available(&self) -> i64 {
        (self.storage_allocated - self.storage_used).max(0)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StorageInfo {
    pub allocated: i64,
    pub used: i64,
    pub available: i64,
    pub usage_percentage: f64,
}

impl From<&UserQuota> for StorageInfo {
    fn from(quota: &UserQuota) -> Self {
        let usage_percentage = if quota.storage_allocated > 0 {
            quota.storage_used as f64 / quota.storage_allocated as f64 * 100.0
        } else {
            0.0
        };
        StorageInfo {
            allocated: quota.storage_allocated,
            used: quota.storage_used,
            available: quota.available(),
            usage_percentage,
        }
    }
}
