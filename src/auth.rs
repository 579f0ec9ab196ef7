use actix_identity::Identity;
use actix_session::Session;
use actix_web::HttpResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::structs::Role;

const USERNAME_KEY: &str = "username";
const ROLE_KEY: &str = "role";
const FLASH_KEY: &str = "_flash";

/// The request-scoped identity: user id from the actix-identity cookie,
/// username and role from the session established at login.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flash {
    pub level: String,
    pub message: String,
}

/// Store username and role next to the identity cookie written by
/// `Identity::login`; together they make up the session.
pub fn establish(
    session: &Session,
    username: &str,
    role: Role,
) -> Result<(), actix_session::SessionInsertError> {
    session.insert(USERNAME_KEY, username)?;
    session.insert(ROLE_KEY, role)?;
    Ok(())
}

pub fn current(identity: &Option<Identity>, session: &Session) -> Option<SessionUser> {
    let id = identity
        .as_ref()
        .and_then(|id| id.id().ok())
        .and_then(|id| id.parse::<i64>().ok())?;
    let username = session.get::<String>(USERNAME_KEY).ok().flatten()?;
    let role = session.get::<Role>(ROLE_KEY).ok().flatten()?;
    Some(SessionUser { id, username, role })
}

/// Gate for page routes. On a missing session or role mismatch the caller
/// gets a ready-made redirect to the login page carrying a flash message.
pub fn require(
    identity: &Option<Identity>,
    session: &Session,
    role: Role,
) -> Result<SessionUser, HttpResponse> {
    match current(identity, session) {
        Some(user) if user.role == role => Ok(user),
        _ => {
            flash(session, "danger", "You must be logged in to view this page.");
            Err(see_other("/login"))
        }
    }
}

/// Gate for the JSON analytics endpoints: 401 without a session, 403 on a
/// role mismatch, both with an `{"error": ...}` body.
pub fn require_api(
    identity: &Option<Identity>,
    session: &Session,
    role: Role,
) -> Result<SessionUser, HttpResponse> {
    match current(identity, session) {
        Some(user) if user.role == role => Ok(user),
        Some(_) => Err(HttpResponse::Forbidden().json(json!({ "error": "Not authorized" }))),
        None => Err(HttpResponse::Unauthorized().json(json!({ "error": "Not authenticated" }))),
    }
}

/// Queue a message for the next rendered page.
pub fn flash(session: &Session, level: &str, message: &str) {
    let mut pending: Vec<Flash> = session.get(FLASH_KEY).ok().flatten().unwrap_or_default();
    pending.push(Flash {
        level: level.to_owned(),
        message: message.to_owned(),
    });
    if let Err(e) = session.insert(FLASH_KEY, pending) {
        log::warn!("Failed to store flash message: {}", e);
    }
}

/// Drain queued messages; rendering consumes them exactly once.
pub fn take_flashes(session: &Session) -> Vec<Flash> {
    let pending: Vec<Flash> = session.get(FLASH_KEY).ok().flatten().unwrap_or_default();
    session.remove(FLASH_KEY);
    pending
}

pub fn see_other(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header(("Location", location.to_owned()))
        .finish()
}
