use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;

use crate::{
    db,
    error::Result,
    middleware::auth::AuthUser,
    services::stats::{self, Statistics},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_statistics))
}

async fn get_statistics(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Statistics>> {
    let todos = db::visible_top_level_todos(&state.db.pool, &user.id).await?;

    Ok(Json(stats::aggregate(&todos, Utc::now())))
}
