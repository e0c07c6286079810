use sqlx::FromRow;
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

/// Contact record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct Contact {
    pub id: i64,
    pub user_id: Uuid,
    pub name: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    pub birthday: Date,
    pub notes: String,
    pub favourite: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Validated field set written by create and full-replace update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInput {
    pub name: String,
    pub lastname: String,
    pub email: String,
    pub phone: String,
    pub birthday: Date,
    pub notes: String,
    pub favourite: bool,
}

/// The birthday's anniversary in `year`; 29 February maps to the 28th in common years.
fn anniversary(birthday: Date, year: i32) -> Date {
    Date::from_calendar_date(year, birthday.month(), birthday.day())
        .or_else(|_| Date::from_calendar_date(year, Month::February, 28))
        .unwrap_or(birthday)
}

/// First anniversary on or after `today`.
pub fn next_birthday(birthday: Date, today: Date) -> Date {
    let this_year = anniversary(birthday, today.year());
    if this_year >= today {
        this_year
    } else {
        anniversary(birthday, today.year() + 1)
    }
}

/// Whether the next anniversary falls in `[today, today + days]`.
pub fn birthday_within(birthday: Date, today: Date, days: u32) -> bool {
    (next_birthday(birthday, today) - today).whole_days() <= i64::from(days)
}
