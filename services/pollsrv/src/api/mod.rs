//! HTTP surface
//!
//! Axum router exposing the catalog mutations, the point write endpoint,
//! the JSON schema documents and the polling statistics lookup.

mod handlers;
mod routes;
pub mod schema;

pub use routes::api_router;
