use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use chrono::Utc;

use crate::{db, error::Result, middleware::auth::AuthUser, services::export, AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/json", get(export_json))
        .route("/csv", get(export_csv))
        .route("/ical", get(export_ical))
}

/// Download response with the current date baked into the filename.
fn download(content_type: &'static str, extension: &str, body: String) -> impl IntoResponse {
    let filename = format!("todos-{}.{extension}", Utc::now().format("%Y-%m-%d"));
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        body,
    )
}

async fn export_json(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let todos = db::visible_top_level_todos(&state.db.pool, &user.id).await?;
    let body = export::to_json(&todos)?;

    Ok(download("application/json", "json", body))
}

async fn export_csv(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse> {
    let todos = db::visible_top_level_todos(&state.db.pool, &user.id).await?;
    let body = export::to_csv(&todos);

    Ok(download("text/csv; charset=utf-8", "csv", body))
}

async fn export_ical(State(state): State<AppState>, user: AuthUser) -> Result<impl IntoResponse> {
    let todos = db::visible_top_level_todos(&state.db.pool, &user.id).await?;
    let body = export::to_ical(&todos, Utc::now());

    Ok(download("text/calendar; charset=utf-8", "ics", body))
}
