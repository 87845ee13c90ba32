//! Media streaming route

use crate::api::AppState;
use crate::media::RangeRequest;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use axum_extra::extract::cookie::CookieJar;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::error::{validate_path, AppError};
use super::session;
use super::types::PathQuery;

/// RFC 5987 `attr-char`s left as is in `filename*`.
const FILENAME_ATTR: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'_')
    .remove(b'-')
    .remove(b'~');

pub fn stream_routes() -> Router<AppState> {
    Router::new().route("/stream", get(stream_file))
}

/// GET /stream?path= - file contents, honoring a single `Range`
async fn stream_file(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Query(query): Query<PathQuery>,
) -> Result<Response, AppError> {
    let path = validate_path(&query.path)?;
    let range = RangeRequest::parse(headers.get(header::RANGE).and_then(|v| v.to_str().ok()));

    let media = state
        .library
        .streams
        .open(&path, range, &session::current(&jar))
        .await?;

    let mut response = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, media.content_type.as_str())
        .header(header::CONTENT_LENGTH, media.content_length.to_string())
        .header(header::CONTENT_DISPOSITION, content_disposition(&media.file_name));
    response = match media.range {
        Some(range) => response
            .status(StatusCode::PARTIAL_CONTENT)
            .header(header::CONTENT_RANGE, range.content_range()),
        None => response.status(StatusCode::OK),
    };

    response
        .body(Body::from_stream(media.into_body()))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// `inline` disposition with an ASCII fallback name and the exact UTF-8
/// name in `filename*`.
fn content_disposition(name: &str) -> String {
    format!(
        "inline; filename=\"{}\"; filename*=UTF-8''{}",
        safe_filename(name),
        utf8_percent_encode(name, FILENAME_ATTR)
    )
}

/// Reduce a file name to ASCII that is safe inside a quoted header value.
fn safe_filename(name: &str) -> String {
    let safe: String = name
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') => Some(c),
            c if c.is_alphanumeric() => Some('_'),
            _ => None,
        })
        .collect();
    if safe.trim().is_empty() {
        "download".to_string()
    } else {
        safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("Summer Trip.mp4"), "Summer Trip.mp4");
        assert_eq!(safe_filename("a\"b\r\n.mp4"), "ab.mp4");
        assert_eq!(safe_filename("\"\""), "download");
        assert_eq!(safe_filename("电影.mp4"), "__.mp4");
    }

    #[test]
    fn test_content_disposition_is_ascii() {
        let value = content_disposition("电影 1.mp4");
        assert_eq!(
            value,
            "inline; filename=\"__ 1.mp4\"; filename*=UTF-8''%E7%94%B5%E5%BD%B1%201.mp4"
        );
        assert!(axum::http::HeaderValue::from_str(&value).unwrap().to_str().is_ok());
        assert_eq!(
            content_disposition("clip.mp4"),
            "inline; filename=\"clip.mp4\"; filename*=UTF-8''clip.mp4"
        );
    }
}
