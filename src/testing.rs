//! In-memory stores and fixtures shared by unit tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtKeys,
        password::hash_password,
        repo::UserRepo,
        repo_types::{NewUser, Rotation, User},
    },
    config::JwtConfig,
    contacts::{
        repo::ContactRepo,
        repo_types::{birthday_within, Contact, ContactInput},
    },
};

pub fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        secret: "test-secret".into(),
        issuer: "test".into(),
        audience: "test".into(),
        ttl_minutes: 15,
        refresh_ttl_minutes: 60 * 24 * 7,
        verify_ttl_minutes: 60 * 24,
    }
}

pub fn test_keys() -> JwtKeys {
    JwtKeys::from_config(&test_jwt_config())
}

#[derive(Default)]
pub struct MemoryUserRepo {
    users: Mutex<HashMap<String, User>>,
    fail_next: AtomicBool,
}

impl MemoryUserRepo {
    pub fn insert_confirmed(&self, username: &str, email: &str, password: &str) -> User {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: username.into(),
            email: email.to_lowercase(),
            password_hash: hash_password(password).expect("hash"),
            confirmed: true,
            refresh_token: None,
            avatar: None,
            created_at: now,
            updated_at: now,
        };
        self.users
            .lock()
            .unwrap()
            .insert(user.email.clone(), user.clone());
        user
    }

    pub fn refresh_token_of(&self, email: &str) -> Option<String> {
        self.users
            .lock()
            .unwrap()
            .get(email)
            .and_then(|u| u.refresh_token.clone())
    }

    /// Makes the next call fail as if the database were down.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(())
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.check()?;
        Ok(self.users.lock().unwrap().get(email).cloned())
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<Option<User>> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        if users.contains_key(&new.email) {
            return Ok(None);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            username: new.username,
            email: new.email,
            password_hash: new.password_hash,
            confirmed: false,
            refresh_token: None,
            avatar: new.avatar,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.email.clone(), user.clone());
        Ok(Some(user))
    }

    async fn set_refresh_token(&self, email: &str, token: Option<&str>) -> anyhow::Result<()> {
        self.check()?;
        if let Some(u) = self.users.lock().unwrap().get_mut(email) {
            u.refresh_token = token.map(str::to_string);
        }
        Ok(())
    }

    async fn rotate_refresh_token(
        &self,
        email: &str,
        presented: &str,
        next: &str,
    ) -> anyhow::Result<Rotation> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        let Some(u) = users.get_mut(email) else {
            return Ok(Rotation::UnknownUser);
        };
        if u.refresh_token.as_deref() == Some(presented) {
            u.refresh_token = Some(next.to_string());
            Ok(Rotation::Rotated)
        } else {
            u.refresh_token = None;
            Ok(Rotation::Mismatch)
        }
    }

    async fn confirm_email(&self, email: &str) -> anyhow::Result<bool> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        match users.get_mut(email) {
            Some(u) if !u.confirmed => {
                u.confirmed = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_avatar(&self, email: &str, url: &str) -> anyhow::Result<Option<User>> {
        self.check()?;
        let mut users = self.users.lock().unwrap();
        Ok(users.get_mut(email).map(|u| {
            u.avatar = Some(url.to_string());
            u.clone()
        }))
    }
}

#[derive(Default)]
pub struct MemoryContactRepo {
    contacts: Mutex<Vec<Contact>>,
    next_id: AtomicI64,
}

impl MemoryContactRepo {
    fn owned<'a>(all: &'a mut [Contact], owner: Uuid, id: i64) -> Option<&'a mut Contact> {
        all.iter_mut().find(|c| c.id == id && c.user_id == owner)
    }
}

#[async_trait]
impl ContactRepo for MemoryContactRepo {
    async fn list(&self, owner: Uuid, limit: i64, offset: i64) -> anyhow::Result<Vec<Contact>> {
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == owner)
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, owner: Uuid, id: i64) -> anyhow::Result<Option<Contact>> {
        let mut all = self.contacts.lock().unwrap();
        Ok(Self::owned(&mut all, owner, id).map(|c| c.clone()))
    }

    async fn create(&self, owner: Uuid, input: &ContactInput) -> anyhow::Result<Contact> {
        let now = OffsetDateTime::now_utc();
        let contact = Contact {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            user_id: owner,
            name: input.name.clone(),
            lastname: input.lastname.clone(),
            email: input.email.clone(),
            phone: input.phone.clone(),
            birthday: input.birthday,
            notes: input.notes.clone(),
            favourite: input.favourite,
            created_at: now,
            updated_at: now,
        };
        self.contacts.lock().unwrap().push(contact.clone());
        Ok(contact)
    }

    async fn update(
        &self,
        owner: Uuid,
        id: i64,
        input: &ContactInput,
    ) -> anyhow::Result<Option<Contact>> {
        let mut all = self.contacts.lock().unwrap();
        Ok(Self::owned(&mut all, owner, id).map(|c| {
            c.name = input.name.clone();
            c.lastname = input.lastname.clone();
            c.email = input.email.clone();
            c.phone = input.phone.clone();
            c.birthday = input.birthday;
            c.notes = input.notes.clone();
            c.favourite = input.favourite;
            c.updated_at = OffsetDateTime::now_utc();
            c.clone()
        }))
    }

    async fn set_favourite(
        &self,
        owner: Uuid,
        id: i64,
        favourite: bool,
    ) -> anyhow::Result<Option<Contact>> {
        let mut all = self.contacts.lock().unwrap();
        Ok(Self::owned(&mut all, owner, id).map(|c| {
            c.favourite = favourite;
            c.clone()
        }))
    }

    async fn delete(&self, owner: Uuid, id: i64) -> anyhow::Result<Option<Contact>> {
        let mut all = self.contacts.lock().unwrap();
        let pos = all.iter().position(|c| c.id == id && c.user_id == owner);
        Ok(pos.map(|i| all.remove(i)))
    }

    async fn search(&self, owner: Uuid, query: &str) -> anyhow::Result<Vec<Contact>> {
        let q = query.to_lowercase();
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == owner)
            .filter(|c| {
                c.name.to_lowercase().contains(&q)
                    || c.lastname.to_lowercase().contains(&q)
                    || c.email.to_lowercase().contains(&q)
            })
            .cloned()
            .collect())
    }

    async fn upcoming_birthdays(
        &self,
        owner: Uuid,
        today: Date,
        days: u32,
    ) -> anyhow::Result<Vec<Contact>> {
        Ok(self
            .contacts
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == owner && birthday_within(c.birthday, today, days))
            .cloned()
            .collect())
    }
}
