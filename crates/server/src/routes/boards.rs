use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{
    db::models::{Board, BoardInvite, Category, Priority, Todo},
    error::{AppError, Result},
    middleware::auth::AuthUser,
    routes::todos::{insert_todo, TodoResponse},
    services::{access, invites},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_boards).post(create_board))
        .route("/:id", get(get_board).delete(delete_board))
        .route("/:id/todos", post(add_todo_to_board))
        .route("/:id/invites", post(invite_member))
        .route(
            "/:id/members/:user_id",
            axum::routing::delete(remove_member),
        )
        .route("/join/:token", post(join_board))
}

#[derive(Debug, Deserialize)]
pub struct CreateBoardRequest {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddBoardTodoRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct InviteMemberRequest {
    pub email: String,
    pub role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BoardSummaryResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub owner_id: String,
    pub owner_name: String,
    pub owner_email: String,
    pub member_count: i64,
    pub todo_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BoardListResponse {
    pub boards: Vec<BoardSummaryResponse>,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct InviteResponse {
    pub id: String,
    pub token: String,
    pub email: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct BoardDetailResponse {
    #[serde(flatten)]
    pub board: Board,
    pub owner: MemberResponse,
    pub members: Vec<MemberResponse>,
    pub todos: Vec<TodoResponse>,
    pub invites: Vec<InviteResponse>,
}

#[derive(Debug, Serialize)]
pub struct IssuedInviteResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct JoinBoardResponse {
    pub board_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

async fn list_boards(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<BoardListResponse>> {
    let rows = sqlx::query_as::<
        _,
        (
            String,
            String,
            Option<String>,
            String,
            String,
            String,
            String,
            i64,
            i64,
            DateTime<Utc>,
            DateTime<Utc>,
        ),
    >(
        r#"
        SELECT DISTINCT b.id, b.name, b.description, b.color, b.owner_id, u.name, u.email,
               (SELECT COUNT(*) FROM board_members m WHERE m.board_id = b.id),
               (SELECT COUNT(*) FROM todos t WHERE t.board_id = b.id AND t.parent_id IS NULL),
               b.created_at, b.updated_at
        FROM boards b
        JOIN users u ON b.owner_id = u.id
        LEFT JOIN board_members bm ON b.id = bm.board_id
        WHERE b.owner_id = ? OR bm.user_id = ?
        ORDER BY b.updated_at DESC
        "#,
    )
    .bind(&user.id)
    .bind(&user.id)
    .fetch_all(&state.db.pool)
    .await?;

    let boards = rows
        .into_iter()
        .map(
            |(
                id,
                name,
                description,
                color,
                owner_id,
                owner_name,
                owner_email,
                member_count,
                todo_count,
                created_at,
                updated_at,
            )| BoardSummaryResponse {
                id,
                name,
                description,
                color,
                owner_id,
                owner_name,
                owner_email,
                member_count,
                todo_count,
                created_at,
                updated_at,
            },
        )
        .collect();

    Ok(Json(BoardListResponse { boards }))
}

async fn create_board(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateBoardRequest>,
) -> Result<Json<Board>> {
    let name = body.name.trim();
    if name.len() < 2 {
        return Err(AppError::Validation(
            "Board name must be at least 2 characters".to_string(),
        ));
    }

    let now = Utc::now();
    let board = Board {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        description: body.description.filter(|d| !d.trim().is_empty()),
        color: body.color.unwrap_or_else(|| "#6366f1".to_string()),
        owner_id: user.id.clone(),
        created_at: now,
        updated_at: now,
    };

    // The board and its owner membership land together
    let mut tx = state.db.pool.begin().await?;

    sqlx::query(
        "INSERT INTO boards (id, name, description, color, owner_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&board.id)
    .bind(&board.name)
    .bind(&board.description)
    .bind(&board.color)
    .bind(&board.owner_id)
    .bind(board.created_at)
    .bind(board.updated_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO board_members (id, board_id, user_id, role, created_at) VALUES (?, ?, ?, 'owner', ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&board.id)
    .bind(&user.id)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(board))
}

async fn get_board(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<BoardDetailResponse>> {
    let board = sqlx::query_as::<_, Board>("SELECT * FROM boards WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Board not found".to_string()))?;

    if !access::can_view(&state.db.pool, &board.id, &user.id).await? {
        return Err(AppError::Forbidden(
            "You do not have access to this board".to_string(),
        ));
    }

    let owner = sqlx::query_as::<_, (String, String, String)>(
        "SELECT id, name, email FROM users WHERE id = ?",
    )
    .bind(&board.owner_id)
    .fetch_one(&state.db.pool)
    .await?;

    let members = sqlx::query_as::<_, (String, String, String, String)>(
        r#"
        SELECT u.id, u.name, u.email, bm.role
        FROM board_members bm
        JOIN users u ON bm.user_id = u.id
        WHERE bm.board_id = ?
        ORDER BY u.name ASC
        "#,
    )
    .bind(&board.id)
    .fetch_all(&state.db.pool)
    .await?;

    let todos = sqlx::query_as::<_, Todo>(
        r#"SELECT * FROM todos WHERE board_id = ? AND parent_id IS NULL ORDER BY "order" ASC, created_at DESC"#,
    )
    .bind(&board.id)
    .fetch_all(&state.db.pool)
    .await?;

    let subtasks = sqlx::query_as::<_, Todo>(
        r#"SELECT * FROM todos WHERE board_id = ? AND parent_id IS NOT NULL ORDER BY "order" ASC"#,
    )
    .bind(&board.id)
    .fetch_all(&state.db.pool)
    .await?;

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

    let todos = todos
        .into_iter()
        .map(|todo| {
            let category = todo
                .category_id
                .as_ref()
                .and_then(|cat| categories.get(cat).cloned());
            let subtasks = children.remove(&todo.id).unwrap_or_default();
            TodoResponse {
                todo,
                category,
                subtasks,
            }
        })
        .collect();

    // Only invites that can still be redeemed
    let now = Utc::now();
    let invites = sqlx::query_as::<_, BoardInvite>(
        "SELECT * FROM board_invites WHERE board_id = ? ORDER BY created_at DESC",
    )
    .bind(&board.id)
    .fetch_all(&state.db.pool)
    .await?
    .into_iter()
    .filter(|invite| invite.used_at.is_none() && invite.expires_at > now)
    .map(|invite| InviteResponse {
        id: invite.id,
        token: invite.token,
        email: invite.email,
        role: invite.role,
        expires_at: invite.expires_at,
    })
    .collect();

    let (owner_id, owner_name, owner_email) = owner;

    Ok(Json(BoardDetailResponse {
        board,
        owner: MemberResponse {
            user_id: owner_id,
            user_name: owner_name,
            user_email: owner_email,
            role: "owner".to_string(),
        },
        members: members
            .into_iter()
            .map(|(user_id, user_name, user_email, role)| MemberResponse {
                user_id,
                user_name,
                user_email,
                role,
            })
            .collect(),
        todos,
        invites,
    }))
}

async fn delete_board(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<()>> {
    let board = sqlx::query_as::<_, (String,)>("SELECT owner_id FROM boards WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Board not found".to_string()))?;

    if board.0 != user.id {
        return Err(AppError::Forbidden(
            "Only the owner can delete this board".to_string(),
        ));
    }

    // Members, invites and todos cascade
    sqlx::query("DELETE FROM boards WHERE id = ?")
        .bind(&id)
        .execute(&state.db.pool)
        .await?;

    Ok(Json(()))
}

async fn add_todo_to_board(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<AddBoardTodoRequest>,
) -> Result<Json<Todo>> {
    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }

    if !access::can_mutate_todos(&state.db.pool, &id, &user.id).await? {
        return Err(AppError::Forbidden(
            "You do not have access to this board".to_string(),
        ));
    }

    let next_order = sqlx::query_scalar::<_, i64>(
        r#"SELECT COALESCE(MAX("order"), -1) + 1 FROM todos WHERE board_id = ? AND parent_id IS NULL"#,
    )
    .bind(&id)
    .fetch_one(&state.db.pool)
    .await?;

    let now = Utc::now();
    let todo = Todo {
        id: Uuid::new_v4().to_string(),
        title: body.title.trim().to_string(),
        description: None,
        completed: false,
        priority: Priority::Medium,
        due_date: None,
        order: next_order,
        category_id: None,
        parent_id: None,
        board_id: Some(id),
        user_id: Some(user.id),
        google_event_id: None,
        created_at: now,
        updated_at: now,
    };

    insert_todo(&state.db.pool, &todo).await?;

    Ok(Json(todo))
}

async fn invite_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<InviteMemberRequest>,
) -> Result<Json<IssuedInviteResponse>> {
    let role = body.role.as_deref().unwrap_or("member");
    let token = invites::issue(&state.db.pool, &id, &body.email, role, &user.id).await?;

    Ok(Json(IssuedInviteResponse { token }))
}

async fn join_board(
    State(state): State<AppState>,
    user: AuthUser,
    Path(token): Path<String>,
) -> Result<Json<JoinBoardResponse>> {
    let redeemed = invites::redeem(&state.db.pool, &token, &user.id).await?;

    Ok(Json(JoinBoardResponse {
        board_id: redeemed.board_id,
        message: redeemed
            .already_member
            .then(|| "You are already a member of this board".to_string()),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MemberPathParams {
    pub id: String,
    pub user_id: String,
}

async fn remove_member(
    State(state): State<AppState>,
    user: AuthUser,
    Path(params): Path<MemberPathParams>,
) -> Result<Json<()>> {
    let board = sqlx::query_as::<_, (String,)>("SELECT owner_id FROM boards WHERE id = ?")
        .bind(&params.id)
        .fetch_optional(&state.db.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Board not found".to_string()))?;

    if params.user_id == board.0 {
        return Err(AppError::Validation(
            "The board owner cannot be removed".to_string(),
        ));
    }

    let self_removal = params.user_id == user.id;
    if !self_removal && !access::can_manage(&state.db.pool, &params.id, &user.id).await? {
        return Err(AppError::Forbidden(
            "You are not allowed to remove this member".to_string(),
        ));
    }

    let removed =
        sqlx::query("DELETE FROM board_members WHERE board_id = ? AND user_id = ?")
            .bind(&params.id)
            .bind(&params.user_id)
            .execute(&state.db.pool)
            .await?;

    if removed.rows_affected() == 0 {
        return Err(AppError::NotFound("Member not found".to_string()));
    }

    Ok(Json(()))
}
