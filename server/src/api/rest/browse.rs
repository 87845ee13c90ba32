//! Directory listing routes

use crate::api::AppState;
use crate::media::{Entry, TreeNode};
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;

use super::error::{validate_path, AppError};
use super::session;
use super::types::PathQuery;

// ============================================================================
// ROUTES
// ============================================================================

pub fn browse_routes() -> Router<AppState> {
    Router::new()
        .route("/browse", get(browse))
        .route("/tree", get(tree))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /browse?path= - immediate children of a directory
async fn browse(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<Entry>>, AppError> {
    let path = validate_path(&query.path)?;
    let entries = state
        .library
        .indexer
        .list(&path, &session::current(&jar))
        .await?;
    Ok(Json(entries))
}

/// GET /tree?path= - every visible directory beneath `path`
async fn tree(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PathQuery>,
) -> Result<Json<Vec<TreeNode>>, AppError> {
    let path = validate_path(&query.path)?;
    let nodes = state
        .library
        .indexer
        .tree(&path, &session::current(&jar))
        .await?;
    Ok(Json(nodes))
}
