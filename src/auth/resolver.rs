//! Identity resolution: verified external identity -> local user
//!
//! At most one user exists per Telegram id. That is enforced by the UNIQUE
//! constraint on `users.telegram_id`, so several processes can resolve the same
//! identity concurrently. The loser of an insert race rolls back and re-reads.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use super::error::LoginError;
use super::models::{Profile, User, VerifiedLogin, TELEGRAM_PROVIDER};
use crate::common::generate_user_id;

/// Row data for a user created on first login
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub id: String,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub telegram_id: String,
    pub telegram_username: Option<String>,
    pub photo_url: Option<String>,
    pub display_name: String,
}

impl NewIdentity {
    pub fn from_login(login: &VerifiedLogin) -> Self {
        Self {
            id: generate_user_id(),
            username: login.local_username(),
            first_name: login.first_name.clone(),
            last_name: login.last_name.clone(),
            telegram_id: login.telegram_id.to_string(),
            telegram_username: login.username.clone(),
            photo_url: login.photo_url.clone(),
            display_name: login.display_name(),
        }
    }
}

#[derive(Debug)]
pub enum InsertOutcome {
    Created(User),
    /// A uniqueness constraint rejected the insert; nothing was written
    Conflict,
}

/// Persistence seam for identities
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>, sqlx::Error>;

    /// Insert the user and its profile as one unit
    async fn insert_with_profile(&self, identity: &NewIdentity)
        -> Result<InsertOutcome, sqlx::Error>;
}

/// Result of a resolution
#[derive(Debug)]
pub struct Resolved {
    pub user: User,
    pub created: bool,
}

/// Find the user for `login`, creating it (with its profile) if absent.
pub async fn resolve_identity(
    store: &dyn IdentityStore,
    login: &VerifiedLogin,
) -> Result<Resolved, LoginError> {
    let telegram_id = login.telegram_id.to_string();

    if let Some(user) = store.find_by_telegram_id(&telegram_id).await? {
        debug!(user_id = %user.id, telegram_id = %telegram_id, "Found existing user for Telegram id");
        return Ok(Resolved {
            user,
            created: false,
        });
    }

    let identity = NewIdentity::from_login(login);
    match store.insert_with_profile(&identity).await? {
        InsertOutcome::Created(user) => {
            info!(
                user_id = %user.id,
                telegram_id = %telegram_id,
                provider = TELEGRAM_PROVIDER,
                "Created new user account via Telegram login"
            );
            Ok(Resolved {
                user,
                created: true,
            })
        }
        InsertOutcome::Conflict => {
            warn!(
                telegram_id = %telegram_id,
                "Insert raced with a concurrent login, re-reading identity"
            );
            let user = store
                .find_by_telegram_id(&telegram_id)
                .await?
                .ok_or(LoginError::IdentityConflict(telegram_id))?;
            Ok(Resolved {
                user,
                created: false,
            })
        }
    }
}

/// SQLite-backed identity store
#[derive(Debug, Clone)]
pub struct SqliteIdentityStore {
    pool: SqlitePool,
}

impl SqliteIdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for SqliteIdentityStore {
    async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE telegram_id = ?")
            .bind(telegram_id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn insert_with_profile(
        &self,
        identity: &NewIdentity,
    ) -> Result<InsertOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO users (id, username, first_name, last_name, telegram_id, telegram_username, photo_url, auth_provider)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&identity.id)
        .bind(&identity.username)
        .bind(identity.first_name.as_deref())
        .bind(identity.last_name.as_deref())
        .bind(&identity.telegram_id)
        .bind(identity.telegram_username.as_deref())
        .bind(identity.photo_url.as_deref())
        .bind(TELEGRAM_PROVIDER)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                debug!(telegram_id = %identity.telegram_id, constraint = ?db.constraint(), "Unique violation on user insert");
                tx.rollback().await?;
                return Ok(InsertOutcome::Conflict);
            }
            Err(e) => return Err(e),
        }

        sqlx::query("INSERT INTO profiles (user_id, display_name, avatar_url) VALUES (?, ?, ?)")
            .bind(&identity.id)
            .bind(&identity.display_name)
            .bind(identity.photo_url.as_deref())
            .execute(&mut *tx)
            .await?;

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(&identity.id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(InsertOutcome::Created(user))
    }
}

/// Load a user by local id
pub async fn find_user(pool: &SqlitePool, user_id: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

/// Load a user's profile row
pub async fn find_profile(pool: &SqlitePool, user_id: &str) -> Result<Option<Profile>, sqlx::Error> {
    sqlx::query_as::<_, Profile>("SELECT * FROM profiles WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::migrations::create_schema;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        pool
    }

    fn login(telegram_id: i64) -> VerifiedLogin {
        VerifiedLogin {
            telegram_id,
            auth_date: 1_700_000_000,
            first_name: Some("Ann".to_string()),
            last_name: Some("Lee".to_string()),
            username: Some("ann_lee".to_string()),
            photo_url: Some("https://t.me/i/userpic/320/ann.jpg".to_string()),
        }
    }

    async fn count(pool: &SqlitePool, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_first_login_creates_user_and_profile() {
        let pool = setup_test_db().await;
        let store = SqliteIdentityStore::new(pool.clone());

        let resolved = resolve_identity(&store, &login(42)).await.unwrap();
        assert!(resolved.created);

        let user = resolved.user;
        assert!(user.id.starts_with("U_"));
        assert_eq!(user.username, "tg_42");
        assert_eq!(user.telegram_id.as_deref(), Some("42"));
        assert_eq!(user.first_name.as_deref(), Some("Ann"));
        assert_eq!(user.telegram_username.as_deref(), Some("ann_lee"));
        assert_eq!(user.auth_provider, "telegram");
        assert!(user.is_active);

        let profile = find_profile(&pool, &user.id).await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ann Lee"));
        assert_eq!(
            profile.avatar_url.as_deref(),
            Some("https://t.me/i/userpic/320/ann.jpg")
        );
    }

    #[tokio::test]
    async fn test_repeat_login_returns_same_user_unchanged() {
        let pool = setup_test_db().await;
        let store = SqliteIdentityStore::new(pool.clone());

        let first = resolve_identity(&store, &login(42)).await.unwrap();

        let mut renamed = login(42);
        renamed.first_name = Some("Annabel".to_string());
        let second = resolve_identity(&store, &renamed).await.unwrap();

        assert!(!second.created);
        assert_eq!(first.user, second.user);
        assert_eq!(second.user.first_name.as_deref(), Some("Ann"));
        assert_eq!(count(&pool, "users").await, 1);
        assert_eq!(count(&pool, "profiles").await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_first_logins_yield_one_user() {
        let pool = setup_test_db().await;
        let store = SqliteIdentityStore::new(pool.clone());

        let l = login(7);
        let (a, b) = tokio::join!(resolve_identity(&store, &l), resolve_identity(&store, &l));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.user.id, b.user.id);
        assert_eq!(count(&pool, "users").await, 1);
        assert_eq!(count(&pool, "profiles").await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_first_logins_on_shared_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("identity.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = SqliteIdentityStore::new(pool.clone());
                tokio::spawn(async move { resolve_identity(&store, &login(11)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().user.id);
        }

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(count(&pool, "users").await, 1);
        assert_eq!(count(&pool, "profiles").await, 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_reports_conflict() {
        let pool = setup_test_db().await;
        let store = SqliteIdentityStore::new(pool.clone());

        let first = NewIdentity::from_login(&login(9));
        assert!(matches!(
            store.insert_with_profile(&first).await.unwrap(),
            InsertOutcome::Created(_)
        ));

        let second = NewIdentity::from_login(&login(9));
        assert!(matches!(
            store.insert_with_profile(&second).await.unwrap(),
            InsertOutcome::Conflict
        ));

        // The losing attempt left no profile behind
        assert_eq!(count(&pool, "profiles").await, 1);
    }

    #[tokio::test]
    async fn test_failed_profile_insert_rolls_back_user() {
        let pool = setup_test_db().await;
        sqlx::query("DROP TABLE profiles").execute(&pool).await.unwrap();
        let store = SqliteIdentityStore::new(pool.clone());

        let result = resolve_identity(&store, &login(11)).await;
        assert!(matches!(result, Err(LoginError::Resolution(_))));
        assert_eq!(count(&pool, "users").await, 0);
    }

    /// Store where another writer always wins the race between lookup and insert
    struct RacingStore {
        users: Mutex<HashMap<String, User>>,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl IdentityStore for RacingStore {
        async fn find_by_telegram_id(&self, telegram_id: &str) -> Result<Option<User>, sqlx::Error> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.lock().unwrap().get(telegram_id).cloned())
        }

        async fn insert_with_profile(
            &self,
            identity: &NewIdentity,
        ) -> Result<InsertOutcome, sqlx::Error> {
            let winner = User {
                id: "U_WINNER".to_string(),
                username: identity.username.clone(),
                first_name: None,
                last_name: None,
                telegram_id: Some(identity.telegram_id.clone()),
                telegram_username: None,
                photo_url: None,
                auth_provider: TELEGRAM_PROVIDER.to_string(),
                is_active: true,
                created_at: None,
            };
            self.users
                .lock()
                .unwrap()
                .insert(identity.telegram_id.clone(), winner);
            Ok(InsertOutcome::Conflict)
        }
    }

    #[tokio::test]
    async fn test_lost_race_returns_winner() {
        let store = RacingStore {
            users: Mutex::new(HashMap::new()),
            lookups: AtomicUsize::new(0),
        };

        let resolved = resolve_identity(&store, &login(5)).await.unwrap();
        assert!(!resolved.created);
        assert_eq!(resolved.user.id, "U_WINNER");
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    struct PhantomConflictStore;

    #[async_trait]
    impl IdentityStore for PhantomConflictStore {
        async fn find_by_telegram_id(&self, _: &str) -> Result<Option<User>, sqlx::Error> {
            Ok(None)
        }

        async fn insert_with_profile(&self, _: &NewIdentity) -> Result<InsertOutcome, sqlx::Error> {
            Ok(InsertOutcome::Conflict)
        }
    }

    #[tokio::test]
    async fn test_conflict_without_winner_is_an_error() {
        let result = resolve_identity(&PhantomConflictStore, &login(6)).await;
        assert!(matches!(result, Err(LoginError::IdentityConflict(id)) if id == "6"));
    }
}
