#[macro_use]
extern crate lazy_static;
use actix_identity::IdentityMiddleware;
use actix_session::{storage::CookieSessionStore, SessionMiddleware};

use std::{env, str::FromStr};
use tera::Tera;

use actix_files::{Files, NamedFile};
use actix_web::{
    cookie::Key,
    http::{header, Method, StatusCode},
    middleware,
    web::{self, Data},
    App, Either, HttpResponse, HttpServer, Responder,
};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};

mod auth;
mod db;
mod errors;
mod routes;
mod structs;
mod utils;

#[derive(Debug, Clone)]
pub struct AppState {
    db_pool: SqlitePool,
}

lazy_static! {
    pub static ref TEMPLATES: Tera = {
        let mut tera = match Tera::new("templates/**/*") {
            Ok(t) => t,
            Err(e) => {
                log::error!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

fn get_session_key() -> Key {
    match env::var("SESSION_KEY") {
        Ok(key) => Key::from(key.as_bytes()),
        Err(_) => {
            log::warn!("SESSION_KEY not set; sessions will not survive a restart");
            Key::generate()
        }
    }
}

const DEFAULT_ADMIN_PASSWORD: &str = "parkhaus#0123";

fn admin_password() -> String {
    env::var("ADMIN_PASSWORD").unwrap_or_else(|_| {
        log::warn!(
            "ADMIN_PASSWORD not set; seeding admin '{}' with the default password",
            db::ADMIN_USERNAME
        );
        DEFAULT_ADMIN_PASSWORD.to_owned()
    })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let database_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://parkhaus.db".to_owned());

    let opts = SqliteConnectOptions::from_str(&database_url)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .read_only(false)
        .busy_timeout(std::time::Duration::from_secs(5));

    let db_pool = SqlitePool::connect_with(opts)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    sqlx::migrate!().run(&db_pool).await.expect("Migrate Error");
    info!("Database migrated successfully");

    db::seed_admin(&db_pool, &admin_password())
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    info!("Starting HTTP server on http://localhost:8080/");

    // one key for all workers; a per-worker generated key would invalidate
    // sessions depending on which worker answers
    let session_key = get_session_key();

    HttpServer::new(move || {
        App::new()
            // enable automatic response compression - usually register this first
            .wrap(middleware::Compress::default())
            .wrap(middleware::DefaultHeaders::new().add((header::CACHE_CONTROL, "no-store")))
            .wrap(IdentityMiddleware::default())
            .wrap(SessionMiddleware::new(
                CookieSessionStore::default(),
                session_key.clone(),
            ))
            // enable logger - always register Actix Web Logger middleware last
            .wrap(middleware::Logger::default())
            .service(Files::new("/static", "static"))
            .service(routes::favicon_handler)
            .service(routes::index_handler)
            .service(routes::signup_handler)
            .service(routes::signup_form_handler)
            .service(routes::login_handler)
            .service(routes::login_form_handler)
            .service(routes::logout_handler)
            .service(routes::userdashboard_handler)
            .service(routes::bookspot_handler)
            .service(routes::vacatespot_handler)
            .service(routes::userhistory_handler)
            .service(routes::usersummarychart_handler)
            .service(routes::mostusedlot_handler)
            .service(routes::usermonthlycost_handler)
            .service(routes::admindashboard_handler)
            .service(routes::createlot_handler)
            .service(routes::createlot_form_handler)
            .service(routes::editlot_handler)
            .service(routes::editlot_form_handler)
            .service(routes::deletelot_handler)
            .service(routes::allusers_handler)
            .service(routes::adminsummarychart_handler)
            .service(routes::peakhours_handler)
            .service(routes::lotoccupancy_handler)
            .app_data(Data::new(AppState {
                db_pool: db_pool.clone(),
            }))
            .default_service(web::to(default_handler))
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await
}

async fn default_handler(req_method: Method) -> Result<impl Responder, std::io::Error> {
    match req_method {
        Method::GET => {
            let file = NamedFile::open("static/404.html")?
                .customize()
                .with_status(StatusCode::NOT_FOUND);
            Ok(Either::Left(file))
        }
        _ => Ok(Either::Right(HttpResponse::MethodNotAllowed().finish())),
    }
}
