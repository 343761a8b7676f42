use axum::{extract::State, routing::post, Json, Router};
use serde::Serialize;

use crate::{
    db,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/google", post(sync_google_calendar))
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub message: String,
}

/// Pushes the user's due, uncompleted todos into their Google calendar.
async fn sync_google_calendar(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<SyncResponse>> {
    let access_token = sqlx::query_scalar::<_, Option<String>>(
        "SELECT access_token FROM accounts WHERE user_id = ? AND provider = 'google'",
    )
    .bind(&user.id)
    .fetch_optional(&state.db.pool)
    .await?
    .flatten()
    .ok_or_else(|| {
        AppError::Validation(
            "Connect your Google account first (sign out and sign in with Google)".to_string(),
        )
    })?;

    let todos = db::visible_top_level_todos(&state.db.pool, &user.id).await?;
    let eligible: Vec<_> = todos
        .into_iter()
        .filter(|t| t.due_date.is_some() && !t.completed)
        .collect();

    tracing::debug!(count = eligible.len(), "syncing due todos to Google Calendar");

    let message = state
        .calendar
        .sync_todos(&state.db.pool, &access_token, &eligible)
        .await?;

    Ok(Json(SyncResponse { message }))
}
