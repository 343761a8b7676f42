use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/overview", get(overview))
}

#[derive(Debug, Serialize)]
pub struct AdminUserResponse {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub todo_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AdminOverviewResponse {
    pub total_users: usize,
    pub total_todos: i64,
    pub completed_todos: i64,
    pub active_users: usize,
    pub users: Vec<AdminUserResponse>,
}

async fn overview(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<AdminOverviewResponse>> {
    if user.role != "admin" {
        return Err(AppError::Forbidden(
            "Administrator access required".to_string(),
        ));
    }

    let rows = sqlx::query_as::<_, (String, String, String, String, i64, DateTime<Utc>)>(
        r#"
        SELECT u.id, u.email, u.name, u.role,
               (SELECT COUNT(*) FROM todos t WHERE t.user_id = u.id),
               u.created_at
        FROM users u
        ORDER BY u.created_at DESC
        "#,
    )
    .fetch_all(&state.db.pool)
    .await?;

    let total_todos = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM todos")
        .fetch_one(&state.db.pool)
        .await?;
    let completed_todos =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM todos WHERE completed = 1")
            .fetch_one(&state.db.pool)
            .await?;

    let users: Vec<AdminUserResponse> = rows
        .into_iter()
        .map(
            |(id, email, name, role, todo_count, created_at)| AdminUserResponse {
                id,
                email,
                name,
                role,
                todo_count,
                created_at,
            },
        )
        .collect();

    Ok(Json(AdminOverviewResponse {
        total_users: users.len(),
        total_todos,
        completed_todos,
        active_users: users.iter().filter(|u| u.todo_count > 0).count(),
        users,
    }))
}
