//! Account records and lifecycle
//!
//! The account document is the source of truth. The identity index is
//! maintained after each write on a best-effort basis: an index failure is
//! logged and never fails the account operation, since the backfill job can
//! always rebuild it.

use crate::clock::Clock;
use crate::error::{LinkstatsError, Result};
use crate::identity::{AccountIdentity, IdentityIndex};
use crate::store::{from_document, to_document, DocumentStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ACCOUNTS_COLLECTION: &str = "accounts";

/// Profile detail records, keyed by account id
pub const PROFILES_COLLECTION: &str = "account_profiles";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Team the account belongs to; views trigger that group's rollup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn identity(&self) -> AccountIdentity {
        AccountIdentity {
            account_id: self.account_id.clone(),
            username: self.username.clone(),
            display_name: self.display_name.clone(),
            email: self.email.clone(),
        }
    }
}

/// Public profile details stored apart from the account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Fields for a new account
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub account_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub group_id: Option<String>,
}

/// Partial update; `None` leaves a field unchanged. For the optional fields,
/// `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub username: Option<String>,
    pub display_name: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub group_id: Option<Option<String>>,
}

/// Read an account, filling `account_id` from the document key when the body omits it
pub fn fetch_account(store: &dyn DocumentStore, account_id: &str) -> Result<Option<Account>> {
    let Some(doc) = store.get(ACCOUNTS_COLLECTION, account_id)? else {
        return Ok(None);
    };
    let mut account: Account = from_document(doc)?;
    if account.account_id.is_empty() {
        account.account_id = account_id.to_string();
    }
    Ok(Some(account))
}

/// Account writes with identity index maintenance
pub struct AccountService {
    store: Arc<dyn DocumentStore>,
    index: IdentityIndex,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(store: Arc<dyn DocumentStore>, index: IdentityIndex, clock: Arc<dyn Clock>) -> Self {
        Self { store, index, clock }
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        fetch_account(self.store.as_ref(), account_id)
    }

    pub fn create_account(&self, new: NewAccount) -> Result<Account> {
        if new.account_id.trim().is_empty() {
            return Err(LinkstatsError::InvalidInput("account id is empty".into()));
        }
        if new.username.trim().is_empty() {
            return Err(LinkstatsError::InvalidInput("username is empty".into()));
        }

        let now = self.clock.now();
        let account = Account {
            account_id: new.account_id.trim().to_string(),
            username: new.username.trim().to_string(),
            display_name: new.display_name,
            email: new.email,
            group_id: new.group_id,
            created_at: Some(now),
            updated_at: Some(now),
        };
        self.store
            .create(ACCOUNTS_COLLECTION, &account.account_id, to_document(&account)?)?;
        tracing::info!(account_id = %account.account_id, username = %account.username, "Account created");

        self.sync_index(None, &account);
        Ok(account)
    }

    pub fn update_account(&self, account_id: &str, update: AccountUpdate) -> Result<Account> {
        let previous = self
            .get_account(account_id)?
            .ok_or_else(|| LinkstatsError::NotFound(account_id.to_string()))?;

        let mut account = previous.clone();
        if let Some(username) = update.username {
            if username.trim().is_empty() {
                return Err(LinkstatsError::InvalidInput("username is empty".into()));
            }
            account.username = username.trim().to_string();
        }
        if let Some(display_name) = update.display_name {
            account.display_name = display_name;
        }
        if let Some(email) = update.email {
            account.email = email;
        }
        if let Some(group_id) = update.group_id {
            account.group_id = group_id;
        }
        account.updated_at = Some(self.clock.now());

        self.store
            .set(ACCOUNTS_COLLECTION, account_id, to_document(&account)?)?;
        tracing::info!(account_id, "Account updated");

        self.sync_index(Some(&previous), &account);
        Ok(account)
    }

    /// Delete an account and its index records. Returns false if it did not exist.
    pub fn delete_account(&self, account_id: &str) -> Result<bool> {
        let Some(account) = self.get_account(account_id)? else {
            return Ok(false);
        };
        self.store.delete(ACCOUNTS_COLLECTION, account_id)?;
        tracing::info!(account_id, "Account deleted");

        if let Err(e) = self.index.remove_index(&account.identity()) {
            tracing::warn!(account_id, error = %e, "Failed to remove identity index records");
        }
        Ok(true)
    }

    fn sync_index(&self, previous: Option<&Account>, current: &Account) {
        let identity = current.identity();
        if let Some(previous) = previous {
            if let Err(e) = self.index.remove_stale(&previous.identity(), &identity) {
                tracing::warn!(
                    account_id = %current.account_id,
                    error = %e,
                    "Failed to remove stale identity index records"
                );
            }
        }
        if let Err(e) = self.index.upsert_index(&identity) {
            tracing::warn!(
                account_id = %current.account_id,
                error = %e,
                "Failed to update identity index; run `linkstats migrate` to rebuild"
            );
        }
    }
}
