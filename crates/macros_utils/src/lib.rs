//! Small declarative helpers shared across the workspace.

/// Generate a `routes` function registering actix services on a `ServiceConfig`.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     route list_pings,
/// }
/// ```
///
/// An optional `scope "/prefix"` block mounts its routes under a shared path.
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $route:path),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            $(cfg.service($route);)*
        }
    };
    (scope $prefix:literal { $(route $route:path),* $(,)? }) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            cfg.service($crate::actix_web::web::scope($prefix)$(.service($route))*);
        }
    };
}

#[cfg(feature = "actix")]
pub use actix_web;
