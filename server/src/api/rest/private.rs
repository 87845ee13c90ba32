//! Private directory routes
//!
//! Passwords arrive as `?password=` or as a urlencoded form field. Neither
//! ever reaches the logs: the request span records only the URI path.

use crate::api::AppState;
use crate::media::UnlockOutcome;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::extract::cookie::CookieJar;

use super::error::{validate_path, AppError};
use super::session;
use super::types::{
    LockResponse, PasswordForm, PathQuery, PrivateDirectoryResponse, PrivateQuery, RelockResponse,
    RemovePrivateResponse, UnlockResponse,
};

// ============================================================================
// ROUTES
// ============================================================================

pub fn private_routes() -> Router<AppState> {
    Router::new()
        .route("/private", get(list_private).delete(remove_private))
        .route("/private/lock", post(lock_directory))
        .route("/private/unlock", post(unlock_directory))
        .route("/private/relock", post(relock_directory))
}

fn password_from(query: Option<String>, form: Option<Form<PasswordForm>>) -> Result<String, AppError> {
    query
        .or(form.map(|Form(f)| f.password))
        .filter(|p| !p.is_empty())
        .ok_or_else(|| AppError::BadRequest("password is required".into()))
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /private - protected directories outside any locked tree
async fn list_private(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<Vec<PrivateDirectoryResponse>>, AppError> {
    let directories = state
        .library
        .locks
        .list_visible(&session::current(&jar))
        .await?
        .into_iter()
        .map(|d| PrivateDirectoryResponse {
            path: d.path.to_string(),
            created_at: d.created_at,
        })
        .collect();
    Ok(Json(directories))
}

/// POST /private/lock?path=&password=
async fn lock_directory(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PrivateQuery>,
    form: Option<Form<PasswordForm>>,
) -> Result<Json<LockResponse>, AppError> {
    let path = validate_path(&query.path)?;
    let password = password_from(query.password, form)?;
    let record = state
        .library
        .set_private(&path, &password, &session::current(&jar))
        .await?;
    Ok(Json(LockResponse {
        path: record.path.to_string(),
        created_at: record.created_at,
    }))
}

/// POST /private/unlock?path=&password=
async fn unlock_directory(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PrivateQuery>,
    form: Option<Form<PasswordForm>>,
) -> Result<(CookieJar, Json<UnlockResponse>), AppError> {
    let path = validate_path(&query.path)?;
    let password = password_from(query.password, form)?;
    let (jar, session) = session::ensure(jar);

    let response = match state.library.unlock(&path, &password, &session).await? {
        UnlockOutcome::Unprotected => UnlockResponse {
            path: None,
            protected: false,
            expires_in_secs: None,
        },
        UnlockOutcome::Unlocked { path, expires_in } => UnlockResponse {
            path: Some(path.to_string()),
            protected: true,
            expires_in_secs: Some(expires_in.as_secs()),
        },
    };
    Ok((jar, Json(response)))
}

/// POST /private/relock?path= - forget this session's grants
async fn relock_directory(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PathQuery>,
) -> Result<Json<RelockResponse>, AppError> {
    let path = validate_path(&query.path)?;
    let revoked = state.library.relock(&path, &session::current(&jar)).await?;
    Ok(Json(RelockResponse {
        path: path.to_string(),
        revoked,
    }))
}

/// DELETE /private?path=
async fn remove_private(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PathQuery>,
) -> Result<Json<RemovePrivateResponse>, AppError> {
    let path = validate_path(&query.path)?;
    let removed = state
        .library
        .remove_private(&path, &session::current(&jar))
        .await?;
    Ok(Json(RemovePrivateResponse {
        path: path.to_string(),
        removed,
    }))
}
