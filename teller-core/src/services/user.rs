//! Users and their accounts

use std::sync::Arc;

use chrono::SubsecRound;
use uuid::Uuid;

use crate::adapters::duckdb::{DuckDbRepository, LedgerStore};
use crate::domain::result::{Error, Result};
use crate::domain::{Account, HashParams, Identity, Role, SecretHasher, User};
use crate::ports::Clock;

const MIN_PASSWORD_LEN: usize = 8;
const NUMBER_ATTEMPTS: usize = 5;

pub struct UserService {
    repository: Arc<DuckDbRepository>,
    clock: Arc<dyn Clock>,
    hasher: SecretHasher,
    default_currency: String,
}

impl UserService {
    pub fn new(
        repository: Arc<DuckDbRepository>,
        clock: Arc<dyn Clock>,
        password_hash: HashParams,
        default_currency: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            clock,
            hasher: SecretHasher::new(password_hash),
            default_currency: default_currency.into(),
        }
    }

    /// Register a customer and open their first account
    pub fn register(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
        currency: Option<&str>,
    ) -> Result<User> {
        self.create(email, full_name, password, currency, Role::Customer)
    }

    /// Create the first administrator. Refused once one exists.
    ///
    /// The check runs in the same unit of work as the insert, so two
    /// concurrent calls cannot both succeed.
    pub fn register_admin(&self, email: &str, full_name: &str, password: &str) -> Result<User> {
        self.create(email, full_name, password, None, Role::Admin)
    }

    fn create(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
        currency: Option<&str>,
        role: Role,
    ) -> Result<User> {
        User::validate_email(email)?;
        if full_name.trim().is_empty() {
            return Err(Error::validation("full name is required"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        let currency = currency.unwrap_or(self.default_currency.as_str());

        let mut user = User::new(email, full_name, self.hasher.hash(password)?, role);
        user.created_at = self.clock.now().trunc_subsecs(6);

        let user = self.repository.in_transaction(|store| {
            if role == Role::Admin && store.count_admins()? > 0 {
                return Err(Error::forbidden("an administrator already exists"));
            }
            if store.find_user_by_email(&user.email)?.is_some() {
                return Err(Error::validation(format!("{} is already registered", user.email)));
            }
            store.insert_user(&user)?;
            let account = self.new_account(store, user.id, "Main", currency)?;
            store.insert_account(&account)?;
            let mut user = user;
            user.accounts.push(account);
            Ok(user)
        })?;

        log::info!("Registered {} {} ({})", user.role.as_str(), user.email, user.id);
        Ok(user)
    }

    fn new_account(
        &self,
        store: &LedgerStore<'_>,
        user_id: Uuid,
        name: &str,
        currency: &str,
    ) -> Result<Account> {
        for _ in 0..NUMBER_ATTEMPTS {
            let number = Account::generate_number();
            if !store.account_number_exists(&number)? {
                let mut account = Account::open(user_id, number, name, currency)?;
                account.opened_at = self.clock.now().trunc_subsecs(6);
                return Ok(account);
            }
        }
        Err(Error::Conflict("could not allocate a free account number".into()))
    }

    /// Check credentials. Unknown email and wrong password look the same.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<Identity> {
        let email = User::normalize_email(email);
        let user = self
            .repository
            .read(|store| store.find_user_by_email(&email))?;
        match user {
            Some(user) if self.hasher.verify(password, &user.password_hash) => Ok(user.identity()),
            _ => {
                log::info!("Failed login for {}", email);
                Err(Error::forbidden("invalid credentials"))
            }
        }
    }

    /// Open another account for the caller (or, for admins, any user)
    pub fn open_account(
        &self,
        identity: &Identity,
        owner: Uuid,
        name: &str,
        currency: Option<&str>,
    ) -> Result<Account> {
        if !identity.can_access(owner) {
            return Err(Error::forbidden("cannot open accounts for another user"));
        }
        let currency = currency.unwrap_or(self.default_currency.as_str());
        let account = self.repository.in_transaction(|store| {
            if store.find_user(owner)?.is_none() {
                return Err(Error::not_found(format!("user {}", owner)));
            }
            let account = self.new_account(store, owner, name, currency)?;
            store.insert_account(&account)?;
            Ok(account)
        })?;
        log::info!("Opened account {} for {}", account.account_number, owner);
        Ok(account)
    }

    /// A user with their accounts
    pub fn get_user(&self, identity: &Identity, user_id: Uuid) -> Result<User> {
        if !identity.can_access(user_id) {
            return Err(Error::not_found(format!("user {}", user_id)));
        }
        self.repository.read(|store| {
            let mut user = store
                .find_user(user_id)?
                .ok_or_else(|| Error::not_found(format!("user {}", user_id)))?;
            user.accounts = store.accounts_for_user(user_id)?;
            Ok(user)
        })
    }

    /// Identity of a registered email, for trusted local callers
    pub fn identity_for(&self, email: &str) -> Result<Identity> {
        let email = User::normalize_email(email);
        self.repository
            .read(|store| store.find_user_by_email(&email))?
            .map(|user| user.identity())
            .ok_or_else(|| Error::not_found(format!("user {}", email)))
    }

    /// All users (administrators only)
    pub fn list_users(&self, identity: &Identity) -> Result<Vec<User>> {
        identity.require_admin()?;
        self.repository.read(|store| {
            let mut users = store.list_users()?;
            for user in users.iter_mut() {
                user.accounts = store.accounts_for_user(user.id)?;
            }
            Ok(users)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SystemClock;

    fn service() -> UserService {
        let repository = Arc::new(DuckDbRepository::open_in_memory().unwrap());
        repository.ensure_schema().unwrap();
        UserService::new(
            repository,
            Arc::new(SystemClock),
            HashParams {
                memory_kib: 64,
                iterations: 1,
            },
            "USD",
        )
    }

    #[test]
    fn test_register_opens_main_account() {
        let users = service();
        let user = users
            .register("Ann@Example.com ", "Ann Lee", "correct horse", None)
            .unwrap();
        assert_eq!(user.email, "ann@example.com");
        assert_eq!(user.accounts.len(), 1);
        assert_eq!(user.accounts[0].currency, "USD");
        assert!(Account::is_local_number(&user.accounts[0].account_number));

        let fetched = users.get_user(&user.identity(), user.id).unwrap();
        assert_eq!(fetched.accounts, user.accounts);
    }

    #[test]
    fn test_duplicate_email_and_short_password() {
        let users = service();
        users.register("ann@example.com", "Ann", "password1", None).unwrap();
        assert!(matches!(
            users.register("ANN@example.com", "Ann", "password1", None),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            users.register("bob@example.com", "Bob", "short", None),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_authenticate() {
        let users = service();
        let user = users.register("ann@example.com", "Ann", "password1", None).unwrap();
        assert_eq!(
            users.authenticate("ann@example.com", "password1").unwrap(),
            user.identity()
        );
        assert!(matches!(
            users.authenticate("ann@example.com", "password2"),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            users.authenticate("nobody@example.com", "password1"),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_only_one_bootstrap_admin() {
        let users = service();
        let admin = users.register_admin("ops@example.com", "Ops", "password1").unwrap();
        assert!(admin.identity().is_admin());
        assert!(matches!(
            users.register_admin("ops2@example.com", "Ops", "password1"),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_open_account_for_other_user_is_forbidden() {
        let users = service();
        let ann = users.register("ann@example.com", "Ann", "password1", None).unwrap();
        let bob = users.register("bob@example.com", "Bob", "password1", None).unwrap();

        assert!(matches!(
            users.open_account(&ann.identity(), bob.id, "Savings", None),
            Err(Error::Forbidden(_))
        ));
        let savings = users
            .open_account(&ann.identity(), ann.id, "Savings", Some("eur"))
            .unwrap();
        assert_eq!(savings.currency, "EUR");
        assert_eq!(users.get_user(&ann.identity(), ann.id).unwrap().accounts.len(), 2);
    }
}
