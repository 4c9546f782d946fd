use axum::http::StatusCode;

pub(super) async fn admin_health() -> StatusCode {
    StatusCode::NO_CONTENT
}
