//! Board access control. Every board mutation goes through these checks
//! instead of re-deriving membership predicates at each call site.

use sqlx::SqlitePool;

use crate::error::Result;

/// True iff the user owns the board or holds any membership row on it.
pub async fn can_view(pool: &SqlitePool, board_id: &str, user_id: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM boards b
        LEFT JOIN board_members bm ON b.id = bm.board_id AND bm.user_id = ?
        WHERE b.id = ? AND (b.owner_id = ? OR bm.user_id IS NOT NULL)
        "#,
    )
    .bind(user_id)
    .bind(board_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// True iff the user owns the board or is a member with role owner/admin.
/// Gates invite issuance and member removal.
pub async fn can_manage(pool: &SqlitePool, board_id: &str, user_id: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM boards b
        LEFT JOIN board_members bm
            ON b.id = bm.board_id AND bm.user_id = ? AND bm.role IN ('owner', 'admin')
        WHERE b.id = ? AND (b.owner_id = ? OR bm.user_id IS NOT NULL)
        "#,
    )
    .bind(user_id)
    .bind(board_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

/// True iff any membership row exists. Every role may add and edit todos
/// within a board; permission is flat inside the membership.
pub async fn can_mutate_todos(pool: &SqlitePool, board_id: &str, user_id: &str) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM board_members WHERE board_id = ? AND user_id = ?",
    )
    .bind(board_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}
