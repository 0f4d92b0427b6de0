//! HTTP server assembly: shared state, router and health checks.

mod error;
mod health;
mod routes;
mod state;

pub use error::AppError;
pub use routes::build_router;
pub use state::AppState;
