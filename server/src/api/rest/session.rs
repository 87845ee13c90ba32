//! Session cookie helpers

use crate::auth::{SessionId, SESSION_COOKIE};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

/// Session presented by the client, or the anonymous one.
pub fn current(jar: &CookieJar) -> SessionId {
    jar.get(SESSION_COOKIE)
        .and_then(|c| SessionId::from_token(c.value()))
        .unwrap_or_else(SessionId::anonymous)
}

/// Session presented by the client, issuing a new cookie when it has none.
pub fn ensure(jar: CookieJar) -> (CookieJar, SessionId) {
    if let Some(session) = jar
        .get(SESSION_COOKIE)
        .and_then(|c| SessionId::from_token(c.value()))
    {
        return (jar, session);
    }

    let session = SessionId::generate();
    let cookie = Cookie::build((SESSION_COOKIE, session.as_str().to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    tracing::debug!(session = %session, "issued session cookie");
    (jar.add(cookie), session)
}
