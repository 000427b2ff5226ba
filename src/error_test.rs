use super::*;
use axum::body::to_bytes;

async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn not_found_body_shape() {
    let (status, body) = body_json(ApiError::not_found("post does not exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["statusCode"], 404);
    assert_eq!(body["message"], "post does not exist");
    assert_eq!(body["error"], "Not Found");
    assert!(body["timestamp"].as_str().is_some_and(|ts| ts.contains('T')));
}

#[tokio::test]
async fn unauthorized_uses_canonical_reason() {
    let (status, body) = body_json(ApiError::unauthorized("invalid token")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
}

#[tokio::test]
async fn database_error_is_masked() {
    let (status, body) = body_json(ApiError::from(sqlx::Error::RowNotFound)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "internal server error");
}

#[test]
fn constructors_set_status() {
    assert_eq!(ApiError::bad_request("x").status, StatusCode::BAD_REQUEST);
    assert_eq!(ApiError::forbidden("x").status, StatusCode::FORBIDDEN);
    assert_eq!(ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "x").status.as_u16(), 413);
}
