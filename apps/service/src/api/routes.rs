use actix_web::{HttpResponse, Responder, get, web};
use serde::Deserialize;
use serde_json::json;

use super::error::ApiError;
use crate::query::QueryService;

macros_utils::routes! {
    route health_route,
    route list_pings,
    route list_speedtests,
    route stats_route,
}

#[derive(Debug, Deserialize)]
pub struct PingFilter {
    pub target: Option<String>,
}

/// Health check route
/// This route returns no content, the response status is enough.
#[get("/")]
pub async fn health_route() -> impl Responder {
    HttpResponse::Ok()
}

/// Most recent reachability samples, newest first, optionally for one target
#[get("/api/pings")]
pub async fn list_pings(
    query: web::Data<QueryService>,
    filter: web::Query<PingFilter>,
) -> Result<HttpResponse, ApiError> {
    let samples = match filter.target.as_deref() {
        Some(target) => query.recent_reachability_for(target).await?,
        None => query.recent_reachability().await?,
    };
    Ok(HttpResponse::Ok().json(samples))
}

/// Most recent throughput samples, newest first
#[get("/api/speedtests")]
pub async fn list_speedtests(query: web::Data<QueryService>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(query.recent_throughput().await?))
}

#[get("/api/stats")]
pub async fn stats_route(query: web::Data<QueryService>) -> Result<HttpResponse, ApiError> {
    let (pings, speedtests) = query.counts().await?;
    Ok(HttpResponse::Ok().json(json!({ "pings": pings, "speedtests": speedtests })))
}
