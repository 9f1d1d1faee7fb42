pub mod auth;
pub mod classes;
pub mod config;
pub mod dashboard;
pub mod err;
pub mod instructors;
pub mod invites;
pub mod models;
pub mod profile;
pub mod tickets;
pub mod trainings;
pub mod uploads;

use axum::handler::Handler;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post, put};
use axum::{Extension, Router};

use std::net::SocketAddr;

use axum::http::Uri;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;
use crate::err::{Error, Fine, Maybe, Nothing};

pub type RefStr = &'static str;
pub type Payload<T> = axum::response::Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Nothing(err))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load();
    uploads::prepare_uploads(&config).await?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let app = Router::new()
        .route("/api/auth/login", post(auth::login))
        .route(
            "/api/classes",
            get(classes::list_classes).post(classes::create_class),
        )
        .route(
            "/api/classes/:id",
            get(classes::get_class)
                .put(classes::update_class)
                .delete(classes::delete_class),
        )
        .route("/api/classes/:id/attendees", post(classes::register_attendance))
        .route(
            "/api/classes/:id/attendees/:attendee_id/early-leave",
            post(classes::register_early_leave),
        )
        .route(
            "/api/classes/:id/attendees/:attendee_id",
            delete(classes::remove_attendee),
        )
        .route("/api/classes/:id/finish", post(classes::finish_class))
        .route("/api/classes/:id/cancel", post(classes::cancel_class))
        .route("/api/classes/:id/invite", post(invites::generate_invite))
        .route(
            "/api/classes/:id/invite/:token",
            get(invites::validate_invite),
        )
        .route(
            "/api/classes/:id/invite/:token/join",
            post(invites::join_by_invite),
        )
        .route(
            "/api/classes/:id/participants/:registration/check",
            get(invites::check_participant),
        )
        .route(
            "/api/tickets",
            get(tickets::list_tickets).post(tickets::create_ticket),
        )
        .route("/api/tickets/:id", get(tickets::get_ticket))
        .route("/api/tickets/:id/messages", post(tickets::add_message))
        .route("/api/tickets/:id/status", put(tickets::update_status))
        .route("/api/dashboard/stats", get(dashboard::get_stats))
        .route(
            "/api/instructors",
            get(instructors::list_instructors).post(instructors::create_instructor),
        )
        .route(
            "/api/instructors/search",
            get(instructors::search_instructors),
        )
        .route(
            "/api/instructors/:id",
            get(instructors::get_instructor)
                .put(instructors::update_instructor)
                .delete(instructors::delete_instructor),
        )
        .route(
            "/api/instructors/:id/toggle",
            post(instructors::toggle_instructor),
        )
        .route(
            "/api/instructors/:id/reset-password",
            post(instructors::reset_instructor_password),
        )
        .route(
            "/api/trainings",
            get(trainings::list_trainings).post(trainings::create_training),
        )
        .route(
            "/api/trainings/:id",
            get(trainings::get_training)
                .put(trainings::update_training)
                .delete(trainings::delete_training),
        )
        .route(
            "/api/profile",
            get(profile::get_profile).put(profile::update_profile),
        )
        .route("/api/profile/password", put(profile::change_password))
        .route("/api/terms/accept", post(profile::accept_terms))
        .route("/api/terms/status", get(profile::terms_status))
        .route("/api/uploads/:file", get(uploads::serve_file))
        .fallback(err::handler404.into_service())
        .layer(Extension(pool))
        .layer(Extension(config.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    log::info!("Starting TrainDesk HTTP Server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
