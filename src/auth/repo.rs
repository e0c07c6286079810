use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::auth::repo_types::{NewUser, Rotation, User};

const USER_COLUMNS: &str = "id, username, email, password_hash, confirmed, refresh_token, avatar, created_at, updated_at";

/// Credential store. Emails are passed in already lowercased.
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Returns `None` when the email is already taken.
    async fn create(&self, new: NewUser) -> anyhow::Result<Option<User>>;

    async fn set_refresh_token(&self, email: &str, token: Option<&str>) -> anyhow::Result<()>;

    /// Atomically swaps `presented` for `next`. On mismatch the stored token is cleared.
    async fn rotate_refresh_token(
        &self,
        email: &str,
        presented: &str,
        next: &str,
    ) -> anyhow::Result<Rotation>;

    /// Returns `true` if the flag flipped, `false` if it was already set.
    async fn confirm_email(&self, email: &str) -> anyhow::Result<bool>;

    async fn update_avatar(&self, email: &str, url: &str) -> anyhow::Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE lower(email) = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await
        .context("find user by email")?;
        Ok(user)
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, email, password_hash, avatar)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(&new.avatar)
        .fetch_optional(&self.db)
        .await
        .context("insert user")?;
        Ok(user)
    }

    async fn set_refresh_token(&self, email: &str, token: Option<&str>) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET refresh_token = $2, updated_at = now()
             WHERE lower(email) = $1
            "#,
        )
        .bind(email)
        .bind(token)
        .execute(&self.db)
        .await
        .context("update refresh token")?;
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        email: &str,
        presented: &str,
        next: &str,
    ) -> anyhow::Result<Rotation> {
        let mut tx = self.db.begin().await.context("begin tx")?;

        let swapped = sqlx::query(
            r#"
            UPDATE users SET refresh_token = $3, updated_at = now()
             WHERE lower(email) = $1 AND refresh_token = $2
            "#,
        )
        .bind(email)
        .bind(presented)
        .bind(next)
        .execute(&mut *tx)
        .await
        .context("swap refresh token")?
        .rows_affected();

        let outcome = if swapped == 1 {
            Rotation::Rotated
        } else {
            let cleared = sqlx::query(
                r#"
                UPDATE users SET refresh_token = NULL, updated_at = now()
                 WHERE lower(email) = $1
                "#,
            )
            .bind(email)
            .execute(&mut *tx)
            .await
            .context("clear refresh token")?
            .rows_affected();
            if cleared == 0 {
                Rotation::UnknownUser
            } else {
                Rotation::Mismatch
            }
        };

        tx.commit().await.context("commit tx")?;
        Ok(outcome)
    }

    async fn confirm_email(&self, email: &str) -> anyhow::Result<bool> {
        let changed = sqlx::query(
            r#"
            UPDATE users SET confirmed = TRUE, updated_at = now()
             WHERE lower(email) = $1 AND confirmed = FALSE
            "#,
        )
        .bind(email)
        .execute(&self.db)
        .await
        .context("confirm email")?
        .rows_affected();
        Ok(changed == 1)
    }

    async fn update_avatar(&self, email: &str, url: &str) -> anyhow::Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users SET avatar = $2, updated_at = now()
             WHERE lower(email) = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(email)
        .bind(url)
        .fetch_optional(&self.db)
        .await
        .context("update avatar")?;
        Ok(user)
    }
}
