use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    db::models::Category,
    error::{AppError, Result},
    middleware::auth::AuthUser,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_categories).post(create_category))
        .route("/:id", axum::routing::delete(delete_category))
}

#[derive(Debug, Deserialize)]
pub struct CreateCategoryRequest {
    pub name: String,
    pub color: Option<String>,
}

async fn list_categories(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<Vec<Category>>> {
    let categories =
        sqlx::query_as::<_, Category>("SELECT * FROM categories ORDER BY name ASC")
            .fetch_all(&state.db.pool)
            .await?;

    Ok(Json(categories))
}

async fn create_category(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(body): Json<CreateCategoryRequest>,
) -> Result<Json<Category>> {
    if body.name.trim().is_empty() {
        return Err(AppError::Validation("Name is required".to_string()));
    }

    let category = Category {
        id: Uuid::new_v4().to_string(),
        name: body.name.trim().to_string(),
        color: body.color.unwrap_or_else(|| "#6366f1".to_string()),
        created_at: Utc::now(),
    };

    sqlx::query("INSERT INTO categories (id, name, color, created_at) VALUES (?, ?, ?, ?)")
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.color)
        .bind(category.created_at)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(category))
}

async fn delete_category(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM categories WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db.pool)
        .await?;
    if existing == 0 {
        return Err(AppError::NotFound("Category not found".to_string()));
    }

    // Referencing todos keep living, their category_id is nulled by the schema
    sqlx::query("DELETE FROM categories WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}
