pub mod auth_service;
pub mod backup_service;
pub mod csrf_guard;
pub mod status_service;
