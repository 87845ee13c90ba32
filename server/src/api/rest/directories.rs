//! Directory management routes

use crate::api::AppState;
use crate::media::Entry;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;

use super::error::{validate_path, AppError};
use super::session;
use super::types::{MkdirQuery, PasswordForm, RemoveDirQuery};

pub fn directory_routes() -> Router<AppState> {
    Router::new()
        .route("/mkdir", post(create_directory))
        .route("/dir", delete(remove_directory))
}

/// POST /mkdir?parent=&name=[&password=]
async fn create_directory(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<MkdirQuery>,
    form: Option<Form<PasswordForm>>,
) -> Result<(StatusCode, Json<Entry>), AppError> {
    let parent = validate_path(&query.parent)?;
    let password = query.password.or(form.map(|Form(f)| f.password));
    let entry = state
        .library
        .dirs
        .create(&parent, &query.name, &session::current(&jar), password.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// DELETE /dir?path=&recursive=
async fn remove_directory(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<RemoveDirQuery>,
) -> Result<StatusCode, AppError> {
    let path = validate_path(&query.path)?;
    state
        .library
        .dirs
        .remove(&path, query.recursive, &session::current(&jar))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
