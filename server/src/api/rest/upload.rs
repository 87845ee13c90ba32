//! Upload route

use crate::api::AppState;
use crate::media::Entry;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;

use super::error::{validate_path, AppError};
use super::session;
use super::types::UploadQuery;

pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload_file))
        // Media files are routinely larger than any sensible fixed cap.
        .layer(DefaultBodyLimit::disable())
}

/// POST /upload?path=&name= - the raw request body becomes the file
async fn upload_file(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<UploadQuery>,
    body: Body,
) -> Result<(StatusCode, Json<Entry>), AppError> {
    let dir = validate_path(&query.path)?;
    let entry = state
        .library
        .uploads
        .upload(&dir, &query.name, &session::current(&jar), body.into_data_stream())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
