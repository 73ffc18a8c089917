//! HTTP routes definition

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::handlers;

/// Web shell API routes.
///
/// - POST   /mws/                                  - Create or fetch the session's resource
/// - POST   /mws/:res_id/keep-alive                - Refresh tenant activity
/// - DELETE /mws/:res_id/db                        - Drop the whole logical database
/// - GET    /mws/:res_id/db/getCollectionNames     - List the tenant's collections
/// - GET    /mws/:res_id/db/:coll/find             - Paged query
/// - GET    /mws/:res_id/db/:coll/count            - Match count
/// - GET    /mws/:res_id/db/:coll/aggregate        - Aggregation pipeline
/// - POST   /mws/:res_id/db/:coll/insert           - Insert documents
/// - PUT    /mws/:res_id/db/:coll/update           - Update documents
/// - POST   /mws/:res_id/db/:coll/save             - Save one document
/// - DELETE /mws/:res_id/db/:coll/remove           - Remove documents
/// - DELETE /mws/:res_id/db/:coll/drop             - Drop one collection
pub fn shell_routes() -> Router {
    Router::new()
        .route("/mws/", post(handlers::create_resource))
        .route("/mws/:res_id/keep-alive", post(handlers::keep_alive))
        .route("/mws/:res_id/db", delete(handlers::db_drop))
        .route(
            "/mws/:res_id/db/getCollectionNames",
            get(handlers::get_collection_names),
        )
        .route(
            "/mws/:res_id/db/:collection_name/find",
            get(handlers::collection_find),
        )
        .route(
            "/mws/:res_id/db/:collection_name/count",
            get(handlers::collection_count),
        )
        .route(
            "/mws/:res_id/db/:collection_name/aggregate",
            get(handlers::collection_aggregate),
        )
        .route(
            "/mws/:res_id/db/:collection_name/insert",
            post(handlers::collection_insert),
        )
        .route(
            "/mws/:res_id/db/:collection_name/update",
            put(handlers::collection_update),
        )
        .route(
            "/mws/:res_id/db/:collection_name/save",
            post(handlers::collection_save),
        )
        .route(
            "/mws/:res_id/db/:collection_name/remove",
            delete(handlers::collection_remove),
        )
        .route(
            "/mws/:res_id/db/:collection_name/drop",
            delete(handlers::collection_drop),
        )
}

/// Health check routes
pub fn health_routes() -> Router {
    Router::new().route("/health", get(handlers::health_check))
}
