use axum::{Router, middleware as axum_middleware};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::web::{
    middleware::{auth, csrf},
    routes::*,
};

pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

pub use crate::server::core_services::CoreServices as AppState;

pub const SESSION_COOKIE: &str = "aio_session";
pub const CSRF_HEADER: &str = "x-csrf-token";

pub fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .filter(|id| !id.is_empty())
}

pub fn session_cookie(id: String, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Strict)
        .secure(secure)
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, "")).path("/").build()
}

pub fn create_axum_router(app_state: Arc<AppState>) -> Router {
    let require_auth = || axum_middleware::from_fn_with_state(app_state.clone(), auth::auth);
    let require_csrf = || axum_middleware::from_fn_with_state(app_state.clone(), csrf::csrf);

    // Layers added last run first: CSRF is checked before the session.
    Router::new()
        .merge(setup_routes::create_index_router())
        .nest(
            "/api/auth",
            auth_routes::create_auth_public_router()
                .merge(auth_routes::create_auth_action_router().route_layer(require_csrf())),
        )
        .nest(
            "/api/setup",
            setup_routes::create_setup_router().route_layer(require_csrf()),
        )
        .nest(
            "/api/docker",
            docker_routes::create_docker_query_router()
                .route_layer(require_auth())
                .merge(
                    docker_routes::create_docker_action_router()
                        .route_layer(require_auth())
                        .route_layer(require_csrf()),
                ),
        )
        .nest(
            "/api/configuration",
            config_routes::create_configuration_router()
                .route_layer(require_auth())
                .route_layer(require_csrf()),
        )
        .nest(
            "/api/status",
            config_routes::create_status_router().route_layer(require_auth()),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
}
