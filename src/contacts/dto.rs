use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use super::repo_types::{Contact, ContactInput};
use crate::{
    auth::{dto::UserResponse, services::is_valid_email},
    error::AppError,
};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

const NAME_LEN: std::ops::RangeInclusive<usize> = 3..=50;
const MAX_NOTES_LEN: usize = 250;
const LIMIT_RANGE: std::ops::RangeInclusive<i64> = 10..=500;

#[derive(Debug, Deserialize)]
pub struct CreateContactRequest {
    pub name: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    #[serde(with = "iso_date")]
    pub birthday: Date,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub favourite: bool,
}

/// Full replace; every field is required.
#[derive(Debug, Deserialize)]
pub struct UpdateContactRequest {
    pub name: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    #[serde(with = "iso_date")]
    pub birthday: Date,
    pub notes: String,
    pub favourite: bool,
}

#[derive(Debug, Deserialize)]
pub struct FavouriteUpdate {
    pub favourite: bool,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
fn default_limit() -> i64 {
    10
}

impl ListQuery {
    pub fn validate(&self) -> Result<(), AppError> {
        if !LIMIT_RANGE.contains(&self.limit) {
            return Err(AppError::Validation(format!(
                "limit must be between {} and {}",
                LIMIT_RANGE.start(),
                LIMIT_RANGE.end()
            )));
        }
        if self.offset < 0 {
            return Err(AppError::Validation("offset must not be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub search: String,
}

impl SearchQuery {
    pub fn term(&self) -> Result<&str, AppError> {
        let term = self.search.trim();
        if term.is_empty() {
            return Err(AppError::Validation("search must not be empty".into()));
        }
        Ok(term)
    }
}

#[derive(Debug, Deserialize)]
pub struct BirthdayQuery {
    #[serde(default = "default_days")]
    pub days: i64,
}
fn default_days() -> i64 {
    7
}

impl BirthdayQuery {
    pub fn days(&self) -> Result<u32, AppError> {
        u32::try_from(self.days)
            .ok()
            .filter(|d| *d >= 1)
            .ok_or_else(|| AppError::Validation("days must be at least 1".into()))
    }
}

#[derive(Debug, Serialize)]
pub struct ContactResponse {
    pub id: i64,
    pub name: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    #[serde(with = "iso_date")]
    pub birthday: Date,
    pub notes: String,
    pub favourite: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub user: UserResponse,
}

impl ContactResponse {
    /// Contacts are always rendered for their owner, who is embedded as `user`.
    pub fn new(c: Contact, user: UserResponse) -> Self {
        Self {
            id: c.id,
            name: c.name,
            lastname: c.lastname,
            email: c.email,
            phone: c.phone,
            birthday: c.birthday,
            notes: c.notes,
            favourite: c.favourite,
            created_at: c.created_at,
            updated_at: c.updated_at,
            user,
        }
    }
}

fn check_name(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if !NAME_LEN.contains(&value.chars().count()) {
        return Err(AppError::Validation(format!(
            "{field} must be {} to {} characters",
            NAME_LEN.start(),
            NAME_LEN.end()
        )));
    }
    Ok(value.to_string())
}

fn build_input(
    name: &str,
    lastname: &str,
    email: &str,
    phone: &str,
    birthday: Date,
    notes: String,
    favourite: bool,
) -> Result<ContactInput, AppError> {
    let name = check_name("name", name)?;
    let lastname = check_name("lastname", lastname)?;
    let email = email.trim().to_string();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Invalid email address".into()));
    }
    let phone = phone.trim().to_string();
    if phone.is_empty() {
        return Err(AppError::Validation("phone must not be empty".into()));
    }
    if notes.chars().count() > MAX_NOTES_LEN {
        return Err(AppError::Validation(format!(
            "notes must be at most {MAX_NOTES_LEN} characters"
        )));
    }
    Ok(ContactInput {
        name,
        lastname,
        email,
        phone,
        birthday,
        notes,
        favourite,
    })
}

impl TryFrom<CreateContactRequest> for ContactInput {
    type Error = AppError;

    fn try_from(r: CreateContactRequest) -> Result<Self, Self::Error> {
        build_input(&r.name, &r.lastname, &r.email, &r.phone, r.birthday, r.notes, r.favourite)
    }
}

impl TryFrom<UpdateContactRequest> for ContactInput {
    type Error = AppError;

    fn try_from(r: UpdateContactRequest) -> Result<Self, Self::Error> {
        build_input(&r.name, &r.lastname, &r.email, &r.phone, r.birthday, r.notes, r.favourite)
    }
}
