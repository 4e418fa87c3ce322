//! Inbound operator API.

mod envelope;
mod handlers;
mod routes;

pub use envelope::ApiError;
pub use handlers::IncidentDetail;
pub use routes::api_routes;
