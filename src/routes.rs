use actix_files::NamedFile;
use actix_identity::Identity;
use actix_session::Session;
use actix_web::{
    get, post,
    web::{self, Data},
    HttpMessage, HttpRequest, HttpResponse, Responder,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tera::Context;

use crate::auth::{self, SessionUser};
use crate::errors::AppError;
use crate::structs::{LotOverview, Occupant, Role};
use crate::{db, utils, AppState, TEMPLATES};

fn render(template: &str, context: &Context) -> Result<HttpResponse, AppError> {
    let body = TEMPLATES.render(template, context)?;
    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(body))
}

/// Context shared by every rendered page: title, flashes (drained here, so
/// only call this when actually rendering) and the session user if any.
fn page_context(identity: &Option<Identity>, session: &Session, title: &str) -> Context {
    let mut context = Context::new();
    context.insert("title", title);
    context.insert("version", env!("CARGO_PKG_VERSION"));
    context.insert("flashes", &auth::take_flashes(session));
    if let Some(user) = auth::current(identity, session) {
        context.insert("current_user", &user);
    }
    context
}

#[get("/")]
pub async fn index_handler(
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    let context = page_context(&identity, &session, "Welcome");
    render("index.html", &context)
}

#[get("/signup")]
pub async fn signup_handler(
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    let context = page_context(&identity, &session, "Sign up");
    render("signup.html", &context)
}

#[derive(Deserialize)]
pub struct SignupForm {
    username: String,
    password: String,
    confirm_password: String,
}

#[post("/signup")]
pub async fn signup_form_handler(
    web::Form(form): web::Form<SignupForm>,
    state: Data<AppState>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if form.username.is_empty() || form.password.is_empty() || form.confirm_password.is_empty() {
        auth::flash(&session, "danger", "All fields are required!");
        return Ok(auth::see_other("/signup"));
    }
    if form.password != form.confirm_password {
        auth::flash(&session, "danger", "Passwords do not match!");
        return Ok(auth::see_other("/signup"));
    }
    if form.password.len() < 8 {
        auth::flash(&session, "danger", "Password must be at least 8 characters long.");
        return Ok(auth::see_other("/signup"));
    }

    match db::create_user(&state.db_pool, &form.username, &form.password).await {
        Ok(_) => {
            auth::flash(&session, "success", "Registration successful! Please login.");
            Ok(auth::see_other("/login"))
        }
        Err(db::SignupError::UsernameTaken) => {
            auth::flash(
                &session,
                "warning",
                "Username already exists. Please choose a different one.",
            );
            Ok(auth::see_other("/signup"))
        }
        Err(db::SignupError::Hash(e)) => Err(AppError::Password(e)),
        Err(db::SignupError::Db(e)) => Err(e.into()),
    }
}

#[get("/login")]
pub async fn login_handler(
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    let context = page_context(&identity, &session, "Login");
    render("login.html", &context)
}

#[derive(Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

#[post("/login")]
pub async fn login_form_handler(
    web::Form(form): web::Form<LoginForm>,
    state: Data<AppState>,
    session: Session,
    request: HttpRequest,
) -> Result<impl Responder, AppError> {
    let user = db::find_user(&state.db_pool, &form.username).await?;
    match user {
        Some(user) if utils::verify_password(&form.password, &user.pwd_hash) => {
            Identity::login(&request.extensions(), user.id.to_string())
                .map_err(|e| AppError::Identity(e.to_string()))?;
            auth::establish(&session, &user.username, user.role)?;
            auth::flash(
                &session,
                "success",
                &format!("Welcome, {}!", user.username),
            );
            let destination = match user.role {
                Role::Admin => "/admindashboard",
                Role::User => "/userdashboard",
            };
            Ok(auth::see_other(destination))
        }
        _ => {
            auth::flash(&session, "danger", "Invalid username or password.");
            Ok(auth::see_other("/login"))
        }
    }
}

#[get("/logout")]
pub async fn logout_handler(identity: Option<Identity>, session: Session) -> impl Responder {
    if let Some(identity) = identity {
        identity.logout();
    }
    session.purge();
    auth::see_other("/login")
}

#[get("/userdashboard")]
pub async fn userdashboard_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = match auth::require(&identity, &session, Role::User) {
        Ok(user) => user,
        Err(denied) => return Ok(denied),
    };

    let active_booking = db::active_booking(&state.db_pool, user.id).await?;
    // the lot list is only offered while the user has nothing parked
    let lots = if active_booking.is_none() {
        db::lot_overviews(&state.db_pool).await?
    } else {
        Vec::new()
    };

    let mut context = page_context(&identity, &session, "Dashboard");
    context.insert("active_booking", &active_booking);
    context.insert("lots", &lots);
    render("userdashboard.html", &context)
}

#[post("/bookspot/{lot_id}")]
pub async fn bookspot_handler(
    path: web::Path<i64>,
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = match auth::require(&identity, &session, Role::User) {
        Ok(user) => user,
        Err(denied) => return Ok(denied),
    };
    let lot_id = path.into_inner();

    match db::book_spot(&state.db_pool, lot_id, user.id, Local::now().naive_local()).await {
        Ok(spot_number) => {
            auth::flash(
                &session,
                "success",
                &format!("Spot {} is yours. Happy parking!", spot_number),
            );
        }
        Err(db::BookError::AlreadyBooked) => {
            auth::flash(&session, "warning", "You already have an active parking spot.");
        }
        Err(db::BookError::NoSpotFree) => {
            auth::flash(
                &session,
                "danger",
                "Sorry, no spots are available in this lot at the moment.",
            );
        }
        Err(db::BookError::LotNotFound) => {
            auth::flash(&session, "danger", "That parking lot does not exist.");
        }
        Err(db::BookError::Db(e)) => return Err(e.into()),
    }
    Ok(auth::see_other("/userdashboard"))
}

#[post("/vacatespot/{booking_id}")]
pub async fn vacatespot_handler(
    path: web::Path<i64>,
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = match auth::require(&identity, &session, Role::User) {
        Ok(user) => user,
        Err(denied) => return Ok(denied),
    };
    let booking_id = path.into_inner();

    match db::vacate_spot(&state.db_pool, booking_id, user.id, Local::now().naive_local()).await {
        Ok(total_cost) => {
            auth::flash(
                &session,
                "success",
                &format!("Spot vacated successfully. Total cost: {:.2}", total_cost),
            );
        }
        Err(db::VacateError::NotFound) => {
            auth::flash(
                &session,
                "danger",
                "Active booking not found or you do not have permission to vacate it.",
            );
        }
        Err(db::VacateError::Timestamp(e)) => {
            log::error!("Booking {} has an unparseable timestamp: {}", booking_id, e);
            auth::flash(&session, "danger", "Something went wrong computing your bill.");
        }
        Err(db::VacateError::Db(e)) => return Err(e.into()),
    }
    Ok(auth::see_other("/userdashboard"))
}

#[get("/userhistory")]
pub async fn userhistory_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = match auth::require(&identity, &session, Role::User) {
        Ok(user) => user,
        Err(denied) => return Ok(denied),
    };

    let history = db::history(&state.db_pool, user.id).await?;
    let mut context = page_context(&identity, &session, "Parking history");
    context.insert("history", &history);
    render("userhistory.html", &context)
}

#[get("/user/usersummarychart")]
pub async fn usersummarychart_handler(
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::User) {
        return Ok(denied);
    }
    let context = page_context(&identity, &session, "Your charts");
    render("usersummarychart.html", &context)
}

#[get("/api/mostusedlot")]
pub async fn mostusedlot_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = match auth::require_api(&identity, &session, Role::User) {
        Ok(user) => user,
        Err(denied) => return Ok(denied),
    };

    let rows = db::most_used_lots(&state.db_pool, user.id).await?;
    let (labels, values): (Vec<String>, Vec<i64>) = rows.into_iter().unzip();
    Ok(HttpResponse::Ok().json(json!({ "labels": labels, "values": values })))
}

#[get("/api/usermonthlycost")]
pub async fn usermonthlycost_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let user = match auth::require_api(&identity, &session, Role::User) {
        Ok(user) => user,
        Err(denied) => return Ok(denied),
    };

    let rows = db::monthly_cost(&state.db_pool, user.id).await?;
    let (labels, values): (Vec<String>, Vec<f64>) = rows.into_iter().unzip();
    Ok(HttpResponse::Ok().json(json!({ "labels": labels, "values": values })))
}

#[derive(Serialize)]
struct LotWithOccupants {
    #[serde(flatten)]
    lot: LotOverview,
    occupants: Vec<Occupant>,
}

#[get("/admindashboard")]
pub async fn admindashboard_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    let mut lots = Vec::new();
    for lot in db::lot_overviews(&state.db_pool).await? {
        let occupants = db::occupants(&state.db_pool, lot.id).await?;
        lots.push(LotWithOccupants { lot, occupants });
    }

    let mut context = page_context(&identity, &session, "Admin dashboard");
    context.insert("lots", &lots);
    render("admindashboard.html", &context)
}

#[get("/admin/createlot")]
pub async fn createlot_handler(
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }
    let context = page_context(&identity, &session, "New parking lot");
    render("createlot.html", &context)
}

/// Lot forms arrive as plain strings so missing or malformed numbers can be
/// answered with a flash instead of a bare 400.
#[derive(Deserialize)]
pub struct LotForm {
    name: String,
    price_per_hour: String,
    capacity: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    pincode: String,
}

#[post("/admin/createlot")]
pub async fn createlot_form_handler(
    web::Form(form): web::Form<LotForm>,
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    if form.name.is_empty() || form.price_per_hour.is_empty() || form.capacity.is_empty() {
        auth::flash(&session, "danger", "Name, price and number of spots are required!");
        return Ok(auth::see_other("/admin/createlot"));
    }
    let (Ok(price), Ok(capacity)) = (form.price_per_hour.parse::<f64>(), form.capacity.parse::<i64>())
    else {
        auth::flash(&session, "danger", "Price and number of spots must be numbers.");
        return Ok(auth::see_other("/admin/createlot"));
    };
    if capacity < 1 {
        auth::flash(&session, "danger", "A lot needs at least one spot.");
        return Ok(auth::see_other("/admin/createlot"));
    }

    match db::create_lot(&state.db_pool, &form.name, price, capacity, &form.address, &form.pincode)
        .await
    {
        Ok(_) => {
            auth::flash(
                &session,
                "success",
                &format!(
                    "Parking lot \"{}\" and its {} spots have been created.",
                    form.name, capacity
                ),
            );
            Ok(auth::see_other("/admindashboard"))
        }
        Err(db::LotError::NameTaken) => {
            auth::flash(
                &session,
                "warning",
                &format!("A parking lot named \"{}\" already exists.", form.name),
            );
            Ok(auth::see_other("/admin/createlot"))
        }
        Err(db::LotError::NotFound) => {
            auth::flash(&session, "danger", "Lot not found.");
            Ok(auth::see_other("/admindashboard"))
        }
        Err(db::LotError::Db(e)) => Err(e.into()),
    }
}

#[get("/admin/editlot/{lot_id}")]
pub async fn editlot_handler(
    path: web::Path<i64>,
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    let Some(lot) = db::get_lot(&state.db_pool, path.into_inner()).await? else {
        auth::flash(&session, "danger", "Lot not found.");
        return Ok(auth::see_other("/admindashboard"));
    };

    let mut context = page_context(&identity, &session, "Edit parking lot");
    context.insert("lot", &lot);
    render("editlot.html", &context)
}

#[derive(Deserialize)]
pub struct EditLotForm {
    name: String,
    price_per_hour: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    pincode: String,
}

#[post("/admin/editlot/{lot_id}")]
pub async fn editlot_form_handler(
    path: web::Path<i64>,
    web::Form(form): web::Form<EditLotForm>,
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }
    let lot_id = path.into_inner();

    if form.name.is_empty() || form.price_per_hour.is_empty() {
        auth::flash(&session, "danger", "Name and price are required!");
        return Ok(auth::see_other(&format!("/admin/editlot/{}", lot_id)));
    }
    let Ok(price) = form.price_per_hour.parse::<f64>() else {
        auth::flash(&session, "danger", "Price must be a number.");
        return Ok(auth::see_other(&format!("/admin/editlot/{}", lot_id)));
    };

    match db::edit_lot(&state.db_pool, lot_id, &form.name, price, &form.address, &form.pincode).await
    {
        Ok(()) => {
            auth::flash(&session, "success", "Parking lot details updated successfully.");
            Ok(auth::see_other("/admindashboard"))
        }
        Err(db::LotError::NameTaken) => {
            auth::flash(
                &session,
                "warning",
                &format!("A parking lot named \"{}\" already exists.", form.name),
            );
            Ok(auth::see_other(&format!("/admin/editlot/{}", lot_id)))
        }
        Err(db::LotError::NotFound) => {
            auth::flash(&session, "danger", "Lot not found.");
            Ok(auth::see_other("/admindashboard"))
        }
        Err(db::LotError::Db(e)) => Err(e.into()),
    }
}

#[post("/admin/deletelot/{lot_id}")]
pub async fn deletelot_handler(
    path: web::Path<i64>,
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    match db::delete_lot(&state.db_pool, path.into_inner()).await {
        Ok(()) => {
            auth::flash(&session, "success", "Parking lot deleted successfully.");
        }
        Err(db::DeleteLotError::HasParkedVehicles) => {
            auth::flash(&session, "danger", "Cannot delete a lot that has parked vehicles.");
        }
        Err(db::DeleteLotError::NotFound) => {
            auth::flash(&session, "danger", "Lot not found.");
        }
        Err(db::DeleteLotError::Db(e)) => return Err(e.into()),
    }
    Ok(auth::see_other("/admindashboard"))
}

#[get("/admin/allusers")]
pub async fn allusers_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    let users: Vec<SessionUser> = db::customers(&state.db_pool)
        .await?
        .into_iter()
        .map(|u| SessionUser {
            id: u.id,
            username: u.username,
            role: u.role,
        })
        .collect();

    let mut context = page_context(&identity, &session, "Registered users");
    context.insert("users", &users);
    render("allusers.html", &context)
}

#[get("/admin/adminsummarychart")]
pub async fn adminsummarychart_handler(
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require(&identity, &session, Role::Admin) {
        return Ok(denied);
    }
    let context = page_context(&identity, &session, "Occupancy charts");
    render("adminsummarychart.html", &context)
}

/// Expand sparse per-hour counts into the full 24-slot series the chart
/// expects. Out-of-range hours are dropped.
fn fill_hours(rows: &[(i64, i64)]) -> (Vec<String>, Vec<i64>) {
    let labels = (0..24).map(|h| format!("{:02}:00", h)).collect();
    let mut values = vec![0i64; 24];
    for (hour, count) in rows {
        if let Some(slot) = usize::try_from(*hour).ok().and_then(|h| values.get_mut(h)) {
            *slot = *count;
        }
    }
    (labels, values)
}

#[get("/api/admin/peakhours")]
pub async fn peakhours_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require_api(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    let rows = db::bookings_per_hour_today(&state.db_pool).await?;
    let (labels, values) = fill_hours(&rows);
    Ok(HttpResponse::Ok().json(json!({ "labels": labels, "values": values })))
}

#[get("/api/admin/lotoccupancy")]
pub async fn lotoccupancy_handler(
    identity: Option<Identity>,
    session: Session,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if let Err(denied) = auth::require_api(&identity, &session, Role::Admin) {
        return Ok(denied);
    }

    let rows = db::lot_occupancy(&state.db_pool).await?;
    let (labels, values): (Vec<String>, Vec<i64>) = rows.into_iter().unzip();
    Ok(HttpResponse::Ok().json(json!({ "labels": labels, "values": values })))
}

#[get("/favicon")]
pub async fn favicon_handler() -> Result<impl Responder, AppError> {
    Ok(NamedFile::open("static/favicon.svg")?)
}
