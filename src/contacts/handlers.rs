use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{info, instrument};

use super::{
    dto::{
        BirthdayQuery, ContactResponse, CreateContactRequest, FavouriteUpdate, ListQuery,
        SearchQuery, UpdateContactRequest,
    },
    repo_types::{Contact, ContactInput},
};
use crate::{
    auth::{dto::UserResponse, extractors::CurrentUser, repo_types::User},
    error::{AppError, AppResult},
    extract::{AppJson, AppPath, AppQuery},
    rate_limit::{CreateContact, DeleteContact, ReadContacts, Throttle, UpdateContact},
    state::AppState,
};

pub fn contact_routes() -> Router<AppState> {
    Router::new()
        .route("/contacts", get(list_contacts).post(create_contact))
        .route("/contacts/search", get(search_contacts))
        .route("/contacts/birthdays", get(upcoming_birthdays))
        .route(
            "/contacts/:id",
            get(get_contact)
                .put(update_contact)
                .patch(set_favourite)
                .delete(delete_contact),
        )
}

fn contact_id(id: i64) -> AppResult<i64> {
    if id < 1 {
        return Err(AppError::Validation("contact id must be at least 1".into()));
    }
    Ok(id)
}

fn respond(contacts: Vec<Contact>, owner: &User) -> Json<Vec<ContactResponse>> {
    let owner = UserResponse::from(owner);
    Json(
        contacts
            .into_iter()
            .map(|c| ContactResponse::new(c, owner.clone()))
            .collect(),
    )
}

fn respond_one(contact: Contact, owner: &User) -> Json<ContactResponse> {
    Json(ContactResponse::new(contact, owner.into()))
}

#[instrument(skip_all)]
pub async fn list_contacts(
    _: Throttle<ReadContacts>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppQuery(q): AppQuery<ListQuery>,
) -> AppResult<Json<Vec<ContactResponse>>> {
    q.validate()?;
    let contacts = state
        .contacts
        .list(user.id, q.limit, q.offset)
        .await
        .map_err(AppError::store)?;
    Ok(respond(contacts, &user))
}

#[instrument(skip_all, fields(contact_id = id))]
pub async fn get_contact(
    _: Throttle<ReadContacts>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<Json<ContactResponse>> {
    let id = contact_id(id)?;
    let contact = state
        .contacts
        .get(user.id, id)
        .await
        .map_err(AppError::store)?
        .ok_or(AppError::NotFound)?;
    Ok(respond_one(contact, &user))
}

#[instrument(skip_all)]
pub async fn create_contact(
    _: Throttle<CreateContact>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppJson(body): AppJson<CreateContactRequest>,
) -> AppResult<(StatusCode, Json<ContactResponse>)> {
    let input = ContactInput::try_from(body)?;
    let contact = state
        .contacts
        .create(user.id, &input)
        .await
        .map_err(AppError::store)?;
    info!(contact_id = contact.id, user_id = %user.id, "contact created");
    Ok((StatusCode::CREATED, respond_one(contact, &user)))
}

#[instrument(skip_all, fields(contact_id = id))]
pub async fn update_contact(
    _: Throttle<UpdateContact>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppJson(body): AppJson<UpdateContactRequest>,
) -> AppResult<Json<ContactResponse>> {
    let id = contact_id(id)?;
    let input = ContactInput::try_from(body)?;
    let contact = state
        .contacts
        .update(user.id, id, &input)
        .await
        .map_err(AppError::store)?
        .ok_or(AppError::NotFound)?;
    Ok(respond_one(contact, &user))
}

#[instrument(skip_all, fields(contact_id = id))]
pub async fn set_favourite(
    _: Throttle<UpdateContact>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
    AppJson(body): AppJson<FavouriteUpdate>,
) -> AppResult<Json<ContactResponse>> {
    let id = contact_id(id)?;
    let contact = state
        .contacts
        .set_favourite(user.id, id, body.favourite)
        .await
        .map_err(AppError::store)?
        .ok_or(AppError::NotFound)?;
    Ok(respond_one(contact, &user))
}

/// Deleting a contact that is already gone still answers 204.
#[instrument(skip_all, fields(contact_id = id))]
pub async fn delete_contact(
    _: Throttle<DeleteContact>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i64>,
) -> AppResult<StatusCode> {
    let id = contact_id(id)?;
    let removed = state
        .contacts
        .delete(user.id, id)
        .await
        .map_err(AppError::store)?;
    if removed.is_some() {
        info!(contact_id = id, user_id = %user.id, "contact deleted");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
pub async fn search_contacts(
    _: Throttle<ReadContacts>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppQuery(q): AppQuery<SearchQuery>,
) -> AppResult<Json<Vec<ContactResponse>>> {
    let term = q.term()?;
    let contacts = state
        .contacts
        .search(user.id, term)
        .await
        .map_err(AppError::store)?;
    Ok(respond(contacts, &user))
}

#[instrument(skip_all)]
pub async fn upcoming_birthdays(
    _: Throttle<ReadContacts>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    AppQuery(q): AppQuery<BirthdayQuery>,
) -> AppResult<Json<Vec<ContactResponse>>> {
    let days = q.days()?;
    let today = OffsetDateTime::now_utc().date();
    let contacts = state
        .contacts
        .upcoming_birthdays(user.id, today, days)
        .await
        .map_err(AppError::store)?;
    Ok(respond(contacts, &user))
}
