//! User and identity domain model

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::Account;
use super::result::{Error, Result};

/// Role attached to an authenticated identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "customer" => Ok(Role::Customer),
            "admin" => Ok(Role::Admin),
            other => Err(Error::database(format!("unknown role '{}'", other))),
        }
    }
}

/// The authenticated caller of an operation.
///
/// Supplied by the identity provider and trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn customer(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Customer)
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Fail with `Forbidden` unless this identity is an administrator
    pub fn require_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::forbidden("administrator role required"))
        }
    }

    /// The identity may act on resources owned by `owner`
    pub fn can_access(&self, owner: Uuid) -> bool {
        self.is_admin() || self.user_id == owner
    }
}

/// A registered bank customer and the accounts they own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    /// Owned accounts, keyed by account number
    #[serde(default)]
    pub accounts: Vec<Account>,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        full_name: impl Into<String>,
        password_hash: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: Self::normalize_email(&email.into()),
            full_name: full_name.into().trim().to_string(),
            password_hash: password_hash.into(),
            role,
            created_at: Utc::now(),
            accounts: Vec::new(),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.id, self.role)
    }

    /// Look up an owned account by its number
    pub fn account(&self, account_number: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.account_number == account_number)
    }

    /// The account used when a request does not name a source account
    pub fn primary_account(&self) -> Option<&Account> {
        self.accounts.iter().min_by_key(|a| a.opened_at)
    }

    pub fn normalize_email(email: &str) -> String {
        email.trim().to_lowercase()
    }

    pub fn validate_email(email: &str) -> Result<()> {
        let re = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").map_err(|e| Error::Other(e.to_string()))?;
        if re.is_match(email.trim()) {
            Ok(())
        } else {
            Err(Error::validation(format!("'{}' is not a valid email address", email)))
        }
    }
}
