pub mod auth_routes;
pub mod config_routes;
pub mod docker_routes;
pub mod setup_routes;
