//! Account profile read and update

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rexpet_core::{Account, CoreError, Result, Store};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub credit_balance: i64,
    pub created_at: DateTime<Utc>,
}

impl From<Account> for Profile {
    fn from(account: Account) -> Self {
        Self {
            user_id: account.user_id,
            display_name: account.display_name,
            credit_balance: account.credit_balance,
            created_at: account.created_at,
        }
    }
}

/// Body of a profile update; a blank name clears it
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
}

pub struct ProfileService {
    store: Arc<dyn Store>,
}

impl ProfileService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<Profile> {
        Ok(self.store.ensure_account(user_id).await?.into())
    }

    pub async fn update(&self, user_id: Uuid, update: ProfileUpdate) -> Result<Profile> {
        let display_name = update
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        if let Some(name) = &display_name {
            if name.chars().count() > MAX_DISPLAY_NAME_CHARS {
                return Err(CoreError::InvalidArgument(format!(
                    "Display name must be at most {MAX_DISPLAY_NAME_CHARS} characters"
                )));
            }
            if name.chars().any(char::is_control) {
                return Err(CoreError::InvalidArgument(
                    "Display name contains control characters".into(),
                ));
            }
        }

        let account = self.store.set_display_name(user_id, display_name).await?;
        tracing::info!(user_id = %user_id, "Profile updated");
        Ok(account.into())
    }
}
