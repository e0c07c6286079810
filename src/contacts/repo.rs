use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use time::Date;
use uuid::Uuid;

use super::repo_types::{birthday_within, Contact, ContactInput};

const CONTACT_COLUMNS: &str = "id, user_id, name, lastname, email, phone, birthday, notes, favourite, created_at, updated_at";

/// Contact store. Every operation is scoped to `owner`; another user's rows are invisible.
#[async_trait]
pub trait ContactRepo: Send + Sync {
    async fn list(&self, owner: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<Contact>>;
    async fn get(&self, owner: Uuid, id: i64) -> anyhow::Result<Option<Contact>>;
    async fn create(&self, owner: Uuid, input: &ContactInput) -> anyhow::Result<Contact>;
    /// Full replace of every writable field.
    async fn update(&self, owner: Uuid, id: i64, input: &ContactInput) -> anyhow::Result<Option<Contact>>;
    async fn set_favourite(&self, owner: Uuid, id: i64, favourite: bool) -> anyhow::Result<Option<Contact>>;
    async fn delete(&self, owner: Uuid, id: i64) -> anyhow::Result<Option<Contact>>;
    /// Case-insensitive substring match on name, lastname or email.
    async fn search(&self, owner: Uuid, query: &str) -> anyhow::Result<Vec<Contact>>;
    async fn upcoming_birthdays(&self, owner: Uuid, today: Date, days: u32) -> anyhow::Result<Vec<Contact>>;
}

#[derive(Clone)]
pub struct PgContactRepo {
    db: PgPool,
}

impl PgContactRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl ContactRepo for PgContactRepo {
    async fn list(&self, owner: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
              FROM contacts
             WHERE user_id = $1
             ORDER BY id
             LIMIT $2 OFFSET $3
            "#
        ))
        .bind(owner)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db)
        .await
        .context("list contacts")?;
        Ok(rows)
    }

    async fn get(&self, owner: Uuid, id: i64) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await
        .context("get contact")?;
        Ok(row)
    }

    async fn create(&self, owner: Uuid, input: &ContactInput) -> anyhow::Result<Contact> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            r#"
            INSERT INTO contacts (user_id, name, lastname, email, phone, birthday, notes, favourite)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(owner)
        .bind(&input.name)
        .bind(&input.lastname)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(input.birthday)
        .bind(&input.notes)
        .bind(input.favourite)
        .fetch_one(&self.db)
        .await
        .context("insert contact")?;
        Ok(row)
    }

    async fn update(&self, owner: Uuid, id: i64, input: &ContactInput) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            r#"
            UPDATE contacts
               SET name = $3, lastname = $4, email = $5, phone = $6,
                   birthday = $7, notes = $8, favourite = $9, updated_at = now()
             WHERE id = $1 AND user_id = $2
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(&input.name)
        .bind(&input.lastname)
        .bind(&input.email)
        .bind(&input.phone)
        .bind(input.birthday)
        .bind(&input.notes)
        .bind(input.favourite)
        .fetch_optional(&self.db)
        .await
        .context("update contact")?;
        Ok(row)
    }

    async fn set_favourite(&self, owner: Uuid, id: i64, favourite: bool) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            r#"
            UPDATE contacts SET favourite = $3, updated_at = now()
             WHERE id = $1 AND user_id = $2
            RETURNING {CONTACT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(owner)
        .bind(favourite)
        .fetch_optional(&self.db)
        .await
        .context("update favourite")?;
        Ok(row)
    }

    async fn delete(&self, owner: Uuid, id: i64) -> anyhow::Result<Option<Contact>> {
        let row = sqlx::query_as::<_, Contact>(&format!(
            "DELETE FROM contacts WHERE id = $1 AND user_id = $2 RETURNING {CONTACT_COLUMNS}"
        ))
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.db)
        .await
        .context("delete contact")?;
        Ok(row)
    }

    async fn search(&self, owner: Uuid, query: &str) -> anyhow::Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, Contact>(&format!(
            r#"
            SELECT {CONTACT_COLUMNS}
              FROM contacts
             WHERE user_id = $1
               AND (name ILIKE $2 OR lastname ILIKE $2 OR email ILIKE $2)
             ORDER BY id
            "#
        ))
        .bind(owner)
        .bind(like_pattern(query))
        .fetch_all(&self.db)
        .await
        .context("search contacts")?;
        Ok(rows)
    }

    async fn upcoming_birthdays(&self, owner: Uuid, today: Date, days: u32) -> anyhow::Result<Vec<Contact>> {
        // The window test runs in Rust so leap days and year wrap behave the same everywhere.
        let rows = sqlx::query_as::<_, Contact>(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contacts WHERE user_id = $1 ORDER BY id"
        ))
        .bind(owner)
        .fetch_all(&self.db)
        .await
        .context("list contacts for birthdays")?;
        Ok(rows
            .into_iter()
            .filter(|c| birthday_within(c.birthday, today, days))
            .collect())
    }
}
