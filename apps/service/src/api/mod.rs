//! HTTP read API
//!
//! A thin projection of [`QueryService`](crate::query::QueryService) over
//! actix-web. Handlers expect the service as `web::Data<QueryService>`.

pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::routes;
