//! NSFW classification HTTP handler.
//!
//! - GET /nsfw_detection/classify - Classify media bytes or a remote URL

use crate::{
    app::AppState,
    error::AppError,
    middleware::{pipeline::RequestBody, validation::coerce_string},
    models::classification::ApiResponse,
};
use axum::{
    Extension, Json,
    extract::State,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};

/// Classify media as safe or unsafe.
///
/// # Endpoint
///
/// `GET /nsfw_detection/classify` (JSON body)
///
/// # Authentication
///
/// Requires a valid API key in the `__key__` body field. Rate limited per
/// `ratelimitKey` (or client address when absent).
///
/// # Request Body
///
/// Bytes variant:
///
/// ```json
/// {
///   "bytes": "<base64>",
///   "contentType": "image/png",
///   "ratelimitKey": "guild-42",
///   "__key__": "..."
/// }
/// ```
///
/// URL variant:
///
/// ```json
/// {
///   "url": "https://example.com/picture.jpg",
///   "__key__": "..."
/// }
/// ```
///
/// # Response
///
/// - **Success (200)**: bytes variant returns `{data, path, contentType, hash}`;
///   URL variant returns the classifier's predictions as-is
/// - **Error (400)**: missing/invalid input, unknown content type, classifier rejected the URL
/// - **Error (401)**: invalid API key
/// - **Error (429)**: rate limited
/// - **Error (500)**: staging, transcoding or classification failed
///
/// ```json
/// {
///   "status": 200,
///   "data": {
///     "data": { "/tmp/nsfw-a1b2.png": { "safe": 0.98, "unsafe": 0.02 } },
///     "path": "/tmp/nsfw-a1b2.png",
///     "contentType": "image/png",
///     "hash": "ffffffffffffffff"
///   }
/// }
/// ```
pub async fn classify(
    State(state): State<AppState>,
    Extension(RequestBody(body)): Extension<RequestBody>,
) -> Result<Response, AppError> {
    // Bytes variant
    if let Some(encoded) = body.get("bytes").and_then(coerce_string) {
        let content_type = body
            .get("contentType")
            .and_then(coerce_string)
            .ok_or_else(|| AppError::Validation("contentType is required".to_string()))?;

        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AppError::Validation("bytes must be base64".to_string()))?;

        let view = state
            .classification
            .classify_bytes(&bytes, &content_type)
            .await?;

        return Ok(Json(ApiResponse::ok(view)).into_response());
    }

    // URL variant
    let url = body.get("url").and_then(coerce_string);
    let predictions = state.classification.classify_url(url.as_deref()).await?;

    Ok(Json(ApiResponse::ok(predictions)).into_response())
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{StubClassifier, TestApp, png_bytes};
    use axum::http::StatusCode;
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde_json::{Value, json};

    const ROUTE: &str = "/nsfw_detection/classify";

    fn msg(body: &Value) -> &str {
        body["msg"].as_str().unwrap_or_default()
    }

    #[tokio::test]
    async fn missing_or_wrong_key_is_401() {
        let app = TestApp::spawn(StubClassifier::new()).await;

        let missing = app.server.get(ROUTE).json(&json!({ "url": "https://a.test/x.png" })).await;
        missing.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(msg(&missing.json::<Value>()), "unauthorized");

        let wrong = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": "not-a-key", "url": "https://a.test/x.png" }))
            .await;
        wrong.assert_status(StatusCode::UNAUTHORIZED);

        let non_json = app.server.get(ROUTE).text("hello").await;
        non_json.assert_status(StatusCode::UNAUTHORIZED);

        assert_eq!(app.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn revoked_key_is_401() {
        let app = TestApp::spawn(StubClassifier::new()).await;
        app.keys.revoke_key(&app.key).await.unwrap();

        let response = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": app.key, "url": "https://a.test/x.png" }))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn second_request_inside_window_is_429() {
        let app = TestApp::spawn(StubClassifier::new()).await;
        let body = json!({
            "__key__": app.key,
            "url": "https://a.test/x.png",
            "ratelimitKey": "user-1"
        });

        let first = app.server.get(ROUTE).json(&body).await;
        let second = app.server.get(ROUTE).json(&body).await;

        first.assert_status_ok();
        second.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(msg(&second.json::<Value>()), "rate limit in place");
        assert_eq!(app.classifier.calls(), 1);

        // A different limiting key is tracked separately
        let other = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "url": "https://a.test/x.png",
                "ratelimitKey": 7
            }))
            .await;
        other.assert_status_ok();
    }

    #[tokio::test]
    async fn failed_auth_spends_no_rate_limit_budget() {
        let app = TestApp::spawn(StubClassifier::new()).await;

        let rejected = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": "nope",
                "url": "https://a.test/x.png",
                "ratelimitKey": "u"
            }))
            .await;
        let accepted = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "url": "https://a.test/x.png",
                "ratelimitKey": "u"
            }))
            .await;

        rejected.assert_status(StatusCode::UNAUTHORIZED);
        accepted.assert_status_ok();
        assert_eq!(app.classifier.calls(), 1);
    }

    #[tokio::test]
    async fn url_variant_errors_are_400() {
        let app = TestApp::spawn(StubClassifier::new()).await;

        let missing = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": app.key, "ratelimitKey": "a" }))
            .await;
        missing.assert_status(StatusCode::BAD_REQUEST);
        assert!(msg(&missing.json::<Value>()).contains("required"));

        let invalid = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "url": "definitely not a url",
                "ratelimitKey": "b"
            }))
            .await;
        invalid.assert_status(StatusCode::BAD_REQUEST);
        assert!(msg(&invalid.json::<Value>()).contains("invalid url"));

        let misshapen = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": app.key, "url": ["x"], "ratelimitKey": "c" }))
            .await;
        misshapen.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(msg(&misshapen.json::<Value>()), "incorrectly structured data");
    }

    #[tokio::test]
    async fn url_variant_returns_raw_predictions() {
        let classifier = StubClassifier::new().with_response(json!({ "x.png": { "safe": 1.0 } }));
        let app = TestApp::spawn(classifier).await;

        let response = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": app.key, "url": "https://a.test/x.png" }))
            .await;

        response.assert_status_ok();
        response.assert_json(&json!({ "status": 200, "data": { "x.png": { "safe": 1.0 } } }));
    }

    #[tokio::test]
    async fn rejected_url_is_400_internal_request_error() {
        let app = TestApp::spawn(StubClassifier::rejecting("404 Not Found")).await;

        let response = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": app.key, "url": "https://a.test/gone.png" }))
            .await;

        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(msg(&response.json::<Value>()), "InternalRequestError: 404 Not Found");
    }

    #[tokio::test]
    async fn png_end_to_end_is_cached_by_hash() {
        let app = TestApp::spawn(StubClassifier::new()).await;
        let encoded = STANDARD.encode(png_bytes(1, 1));

        let first = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "bytes": encoded,
                "contentType": "image/png",
                "ratelimitKey": "first"
            }))
            .await;
        let second = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "bytes": encoded,
                "contentType": "image/png",
                "ratelimitKey": "second"
            }))
            .await;

        first.assert_status_ok();
        second.assert_status_ok();
        let first = first.json::<Value>();
        let second = second.json::<Value>();

        assert_eq!(first["status"], 200);
        assert_eq!(first["data"]["contentType"], "image/png");
        let hash = first["data"]["hash"].as_str().unwrap();
        assert_eq!(hash.len(), 16);
        assert_eq!(second["data"]["hash"], hash);
        assert_eq!(app.classifier.calls(), 1);
        assert_eq!(app.results.len(), 1);
        assert_eq!(app.staged_files(), 0);
    }

    #[tokio::test]
    async fn bytes_variant_input_errors_are_400() {
        let app = TestApp::spawn(StubClassifier::new()).await;

        let no_type = app
            .server
            .get(ROUTE)
            .json(&json!({ "__key__": app.key, "bytes": "aGVsbG8=", "ratelimitKey": "a" }))
            .await;
        no_type.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(msg(&no_type.json::<Value>()), "contentType is required");

        let not_base64 = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "bytes": "%%%",
                "contentType": "image/png",
                "ratelimitKey": "b"
            }))
            .await;
        not_base64.assert_status(StatusCode::BAD_REQUEST);

        let pdf = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "bytes": "aGVsbG8=",
                "contentType": "application/pdf",
                "ratelimitKey": "c"
            }))
            .await;
        pdf.assert_status(StatusCode::BAD_REQUEST);
        assert!(msg(&pdf.json::<Value>()).starts_with("UnknownContentType"));

        assert_eq!(app.classifier.calls(), 0);
        assert_eq!(app.staged_files(), 0);
    }

    #[tokio::test]
    async fn oversized_body_is_413() {
        let app = TestApp::spawn_with_body_limit(StubClassifier::new(), 64).await;

        let response = app
            .server
            .get(ROUTE)
            .json(&json!({
                "__key__": app.key,
                "bytes": "A".repeat(256),
                "contentType": "image/png"
            }))
            .await;

        response.assert_status(StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::spawn(StubClassifier::new()).await;

        let response = app.server.get("/health").await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }
}
