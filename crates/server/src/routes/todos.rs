use axum::{
    extract::{Path, Query, State},
    routing::{post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    db::models::{Category, Priority, Todo},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    services::access,
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", axum::routing::get(list_todos).post(create_todo))
        .route("/reorder", post(reorder_todos))
        .route("/:id", put(update_todo).delete(delete_todo))
        .route("/:id/toggle", post(toggle_todo))
        .route("/:id/subtasks", post(add_subtask))
}

#[derive(Debug, Deserialize)]
pub struct ListTodosQuery {
    pub filter: Option<String>, // all | active | completed
    pub category: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<DateTime<Utc>>,
    pub category_id: Option<String>,
}

/// Partial update. For the nullable attributes an absent field leaves the
/// value alone while an explicit `null` clears it, hence the nested options:
/// absent stays `None`, a present value (null included) becomes `Some(..)`.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
    pub priority: Option<Priority>,
    #[serde(default, deserialize_with = "present")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub category_id: Option<Option<String>>,
}

/// Wraps a provided field value in `Some`, so a field that was present as
/// `null` does not collapse into the same state as a field never sent.
fn present<'de, T, D>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct ReorderRequest {
    pub ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateSubtaskRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct TodoResponse {
    #[serde(flatten)]
    pub todo: Todo,
    pub category: Option<Category>,
    pub subtasks: Vec<Todo>,
}

#[derive(Debug, Serialize)]
pub struct TodoListResponse {
    pub todos: Vec<TodoResponse>,
}

/// Todos a user can see: their own plus those on boards they own or belong to.
async fn visible_rows(pool: &SqlitePool, user_id: &str, top_level: bool) -> Result<Vec<Todo>> {
    let parent_clause = if top_level {
        "t.parent_id IS NULL"
    } else {
        "t.parent_id IS NOT NULL"
    };
    let sql = format!(
        r#"
        SELECT DISTINCT t.* FROM todos t
        LEFT JOIN boards b ON t.board_id = b.id
        LEFT JOIN board_members bm ON t.board_id = bm.board_id AND bm.user_id = ?
        WHERE {parent_clause}
          AND (t.user_id = ? OR b.owner_id = ? OR bm.user_id IS NOT NULL)
        ORDER BY t."order" ASC, t.created_at DESC
        "#
    );

    let todos = sqlx::query_as::<_, Todo>(&sql)
        .bind(user_id)
        .bind(user_id)
        .bind(user_id)
        .fetch_all(pool)
        .await?;

    Ok(todos)
}

/// Loads a todo and checks the actor may mutate it: board todos require
/// membership, personal todos require ownership.
async fn todo_for_update(pool: &SqlitePool, id: &str, user: &AuthUser) -> Result<Todo> {
    let todo = sqlx::query_as::<_, Todo>("SELECT * FROM todos WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Todo not found".to_string()))?;

    match &todo.board_id {
        Some(board_id) => {
            if !access::can_mutate_todos(pool, board_id, &user.id).await? {
                return Err(AppError::Forbidden(
                    "You do not have access to this board".to_string(),
                ));
            }
        }
        None => {
            if todo.user_id.as_deref() != Some(user.id.as_str()) {
                return Err(AppError::Forbidden(
                    "This todo belongs to another user".to_string(),
                ));
            }
        }
    }

    Ok(todo)
}

async fn check_category_exists(pool: &SqlitePool, category_id: &str) -> Result<()> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM categories WHERE id = ?")
        .bind(category_id)
        .fetch_one(pool)
        .await?;
    if count == 0 {
        return Err(AppError::Validation("Unknown category".to_string()));
    }
    Ok(())
}

fn apply_patch(todo: &mut Todo, patch: UpdateTodoRequest) -> Result<()> {
    if let Some(title) = patch.title {
        if title.trim().is_empty() {
            return Err(AppError::Validation("Title cannot be empty".to_string()));
        }
        todo.title = title.trim().to_string();
    }
    if let Some(description) = patch.description {
        todo.description = description.filter(|d| !d.trim().is_empty());
    }
    if let Some(completed) = patch.completed {
        todo.completed = completed;
    }
    if let Some(priority) = patch.priority {
        todo.priority = priority;
    }
    if let Some(due_date) = patch.due_date {
        todo.due_date = due_date;
    }
    if let Some(category_id) = patch.category_id {
        todo.category_id = category_id;
    }
    Ok(())
}

async fn list_todos(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListTodosQuery>,
) -> Result<Json<TodoListResponse>> {
    let todos = visible_rows(&state.db.pool, &user.id, true).await?;
    let subtasks = visible_rows(&state.db.pool, &user.id, false).await?;

    let categories = sqlx::query_as::<_, Category>("SELECT * FROM categories")
        .fetch_all(&state.db.pool)
        .await?;
    let categories: HashMap<String, Category> =
        categories.into_iter().map(|c| (c.id.clone(), c)).collect();

    let mut children: HashMap<String, Vec<Todo>> = HashMap::new();
    for subtask in subtasks {
        if let Some(parent_id) = subtask.parent_id.clone() {
            children.entry(parent_id).or_default().push(subtask);
        }
    }

    let search = query.q.as_deref().map(str::to_lowercase);
    let todos = todos
        .into_iter()
        .filter(|t| match query.filter.as_deref() {
            Some("active") => !t.completed,
            Some("completed") => t.completed,
            _ => true,
        })
        .filter(|t| match &query.category {
            Some(category_id) => t.category_id.as_deref() == Some(category_id.as_str()),
            None => true,
        })
        .filter(|t| match &search {
            Some(q) => t.title.to_lowercase().contains(q),
            None => true,
        })
        .map(|todo| {
            let category = todo
                .category_id
                .as_ref()
                .and_then(|id| categories.get(id).cloned());
            let subtasks = children.remove(&todo.id).unwrap_or_default();
            TodoResponse {
                todo,
                category,
                subtasks,
            }
        })
        .collect();

    Ok(Json(TodoListResponse { todos }))
}

async fn create_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateTodoRequest>,
) -> Result<Json<Todo>> {
    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if let Some(category_id) = &body.category_id {
        check_category_exists(&state.db.pool, category_id).await?;
    }

    let next_order = sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(MAX("order"), -1) + 1 FROM todos WHERE user_id = ? AND board_id IS NULL AND parent_id IS NULL"#,
    )
    .bind(&user.id)
    .fetch_one(&state.db.pool)
    .await?;

    let now = Utc::now();
    let todo = Todo {
        id: Uuid::new_v4().to_string(),
        title: body.title.trim().to_string(),
        description: body.description.filter(|d| !d.trim().is_empty()),
        completed: false,
        priority: body.priority.unwrap_or(Priority::Medium),
        due_date: body.due_date,
        order: next_order,
        category_id: body.category_id,
        parent_id: None,
        board_id: None,
        user_id: Some(user.id),
        google_event_id: None,
        created_at: now,
        updated_at: now,
    };

    insert_todo(&state.db.pool, &todo).await?;

    Ok(Json(todo))
}

pub(crate) async fn insert_todo(pool: &SqlitePool, todo: &Todo) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO todos (id, title, description, completed, priority, due_date, "order",
                           category_id, parent_id, board_id, user_id, google_event_id,
                           created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&todo.id)
    .bind(&todo.title)
    .bind(&todo.description)
    .bind(todo.completed)
    .bind(todo.priority)
    .bind(todo.due_date)
    .bind(todo.order)
    .bind(&todo.category_id)
    .bind(&todo.parent_id)
    .bind(&todo.board_id)
    .bind(&todo.user_id)
    .bind(&todo.google_event_id)
    .bind(todo.created_at)
    .bind(todo.updated_at)
    .execute(pool)
    .await?;
    Ok(())
}

async fn toggle_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Todo>> {
    let mut todo = todo_for_update(&state.db.pool, &id, &user).await?;

    todo.completed = !todo.completed;
    todo.updated_at = Utc::now();

    sqlx::query("UPDATE todos SET completed = ?, updated_at = ? WHERE id = ?")
        .bind(todo.completed)
        .bind(todo.updated_at)
        .bind(&todo.id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(todo))
}

async fn update_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateTodoRequest>,
) -> Result<Json<Todo>> {
    let mut todo = todo_for_update(&state.db.pool, &id, &user).await?;

    if let Some(Some(category_id)) = &body.category_id {
        check_category_exists(&state.db.pool, category_id).await?;
    }

    apply_patch(&mut todo, body)?;
    todo.updated_at = Utc::now();

    sqlx::query(
        r#"
        UPDATE todos
        SET title = ?, description = ?, completed = ?, priority = ?, due_date = ?,
            category_id = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&todo.title)
    .bind(&todo.description)
    .bind(todo.completed)
    .bind(todo.priority)
    .bind(todo.due_date)
    .bind(&todo.category_id)
    .bind(todo.updated_at)
    .bind(&todo.id)
    .execute(&state.db.pool)
    .await?;

    Ok(Json(todo))
}

async fn delete_todo(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    todo_for_update(&state.db.pool, &id, &user).await?;

    // Subtasks go with their parent
    sqlx::query("DELETE FROM todos WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}

/// Persists a drag-and-drop reorder. All position updates commit as one
/// transaction so a concurrent reader never observes a half-applied order.
async fn reorder_todos(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<ReorderRequest>,
) -> Result<Json<()>> {
    let now = Utc::now();
    let mut tx = state.db.pool.begin().await?;

    for (position, id) in body.ids.iter().enumerate() {
        sqlx::query(r#"UPDATE todos SET "order" = ?, updated_at = ? WHERE id = ? AND user_id = ?"#)
            .bind(position as i64)
            .bind(now)
            .bind(id)
            .bind(&user.id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(Json(()))
}

async fn add_subtask(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<CreateSubtaskRequest>,
) -> Result<Json<Todo>> {
    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }

    let parent = todo_for_update(&state.db.pool, &id, &user).await?;
    if parent.parent_id.is_some() {
        return Err(AppError::Validation(
            "Subtasks cannot be nested".to_string(),
        ));
    }

    let next_order = sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(MAX("order"), -1) + 1 FROM todos WHERE parent_id = ?"#,
    )
    .bind(&parent.id)
    .fetch_one(&state.db.pool)
    .await?;

    let now = Utc::now();
    let subtask = Todo {
        id: Uuid::new_v4().to_string(),
        title: body.title.trim().to_string(),
        description: None,
        completed: false,
        priority: Priority::Medium,
        due_date: None,
        order: next_order,
        category_id: None,
        parent_id: Some(parent.id),
        board_id: parent.board_id,
        user_id: Some(user.id),
        google_event_id: None,
        created_at: now,
        updated_at: now,
    };

    insert_todo(&state.db.pool, &subtask).await?;

    Ok(Json(subtask))
}
