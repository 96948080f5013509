use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{auth::StaffUser, state::AppState};

pub mod agents;
pub mod auth;
pub mod contact;
pub mod deliverables;
pub mod feedback;
pub mod health;
pub mod intake;
pub mod leads;
pub mod portal;

const MAX_BODY_BYTES: usize = 1024 * 1024;

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}

fn cors_layer(allowed: Option<&str>) -> CorsLayer {
    let allow_origin = match allowed {
        Some(origins) => {
            let headers: Vec<HeaderValue> = origins
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .filter_map(|value| match value.parse::<HeaderValue>() {
                    Ok(header) => Some(header),
                    Err(_) => {
                        warn!(origin = value, "ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            AllowOrigin::list(headers)
        }
        None => AllowOrigin::mirror_request(),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(state.config.cors_allowed_origin.as_deref());

    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/contact", post(contact::submit_contact))
        .route("/api/auth/login", post(auth::login))
        .route("/api/intake/submit", post(intake::submit_intake))
        .route("/api/intake/:token", get(intake::get_intake));

    // Handlers here take `AuthenticatedUser` and apply their own scoping.
    let member_routes = Router::new()
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route(
            "/api/deliverables",
            get(deliverables::list_deliverables).post(deliverables::create_deliverable),
        )
        .route(
            "/api/deliverables/:id",
            get(deliverables::get_deliverable).patch(deliverables::update_deliverable),
        )
        .route(
            "/api/feedback",
            get(feedback::list_feedback).post(feedback::create_feedback),
        )
        .route("/api/portal/projects", get(portal::list_projects))
        .route("/api/portal/projects/:reference", get(portal::get_project));

    let staff_state = state.clone();
    let staff_routes = Router::new()
        .route("/api/leads", get(leads::list_leads).post(leads::create_lead))
        .route("/api/leads/classify", post(leads::classify_lead))
        .route(
            "/api/leads/:id",
            get(leads::get_lead)
                .patch(leads::update_lead)
                .delete(leads::delete_lead),
        )
        .route("/api/intake/create-token", post(intake::create_token))
        .route(
            "/api/agent/register",
            get(agents::list_agents).post(agents::register_agent),
        )
        .layer(middleware::from_extractor_with_state::<StaffUser, _>(
            staff_state,
        ));

    Router::new()
        .merge(public_routes)
        .merge(member_routes)
        .merge(staff_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
