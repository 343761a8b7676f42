//! Board invitation workflow: issue a time-limited single-use token, redeem
//! it into a membership row.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::models::BoardInvite;
use crate::error::{AppError, Result};
use crate::services::access;

/// Invites stay valid for a week after issuance.
const INVITE_TTL_DAYS: i64 = 7;

#[derive(Debug)]
pub struct Redeemed {
    pub board_id: String,
    /// Set when the actor was already a member and the invite was left intact.
    pub already_member: bool,
}

/// Issues an invite for `email` at `role` on the board. The actor must hold
/// an owner/admin role. Delivery of the join link is out-of-band; we only log
/// it here.
pub async fn issue(
    pool: &SqlitePool,
    board_id: &str,
    email: &str,
    role: &str,
    actor_id: &str,
) -> Result<String> {
    if !access::can_manage(pool, board_id, actor_id).await? {
        return Err(AppError::Forbidden(
            "You are not allowed to invite members to this board".to_string(),
        ));
    }

    if email.trim().is_empty() || !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if role != "member" && role != "admin" {
        return Err(AppError::Validation(
            "Role must be 'member' or 'admin'".to_string(),
        ));
    }

    // Reject invites for users who already belong to the board
    let already_member = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM board_members bm
        JOIN users u ON bm.user_id = u.id
        WHERE bm.board_id = ? AND u.email = ?
        "#,
    )
    .bind(board_id)
    .bind(email)
    .fetch_one(pool)
    .await?;

    if already_member > 0 {
        return Err(AppError::Conflict(
            "This user is already a member of the board".to_string(),
        ));
    }

    let token = Uuid::new_v4().simple().to_string();
    let now = Utc::now();
    let expires_at = now + Duration::days(INVITE_TTL_DAYS);

    sqlx::query(
        "INSERT INTO board_invites (id, token, board_id, email, role, expires_at, used_at, created_at) VALUES (?, ?, ?, ?, ?, ?, NULL, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&token)
    .bind(board_id)
    .bind(email)
    .bind(role)
    .bind(expires_at)
    .bind(now)
    .execute(pool)
    .await?;

    tracing::info!(email, board_id, "invite issued, join link: /boards/join/{token}");

    Ok(token)
}

/// Redeems an invite token for the acting user.
///
/// Check order matters: a used invite reports as already-used even past its
/// expiry. When the actor already belongs to the board the call succeeds
/// without touching the invite, so the token stays redeemable by its intended
/// recipient. Otherwise membership creation and the used-stamp commit as one
/// transaction.
pub async fn redeem(pool: &SqlitePool, token: &str, actor_id: &str) -> Result<Redeemed> {
    let invite = sqlx::query_as::<_, BoardInvite>("SELECT * FROM board_invites WHERE token = ?")
        .bind(token)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Invite not found".to_string()))?;

    if invite.used_at.is_some() {
        return Err(AppError::AlreadyUsed(
            "This invite has already been used".to_string(),
        ));
    }

    let now = Utc::now();
    if now >= invite.expires_at {
        return Err(AppError::Expired("This invite has expired".to_string()));
    }

    let existing = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM board_members WHERE board_id = ? AND user_id = ?",
    )
    .bind(&invite.board_id)
    .bind(actor_id)
    .fetch_one(pool)
    .await?;

    if existing > 0 {
        return Ok(Redeemed {
            board_id: invite.board_id,
            already_member: true,
        });
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO board_members (id, board_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&invite.board_id)
    .bind(actor_id)
    .bind(&invite.role)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE board_invites SET used_at = ? WHERE id = ?")
        .bind(now)
        .bind(&invite.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Redeemed {
        board_id: invite.board_id,
        already_member: false,
    })
}

#[cfg(test)]
pub mod tests_support {
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use uuid::Uuid;

    /// In-memory database with the checked-in migrations applied. A single
    /// connection so every query sees the same memory file.
    pub async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    pub async fn seed_user(pool: &SqlitePool, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO users (id, email, name, password_hash, role, created_at, updated_at) VALUES (?, ?, 'Test', NULL, 'user', ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        id
    }

    /// Creates a board plus the owner membership row, like board creation does.
    pub async fn seed_board(pool: &SqlitePool, owner_id: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO boards (id, name, description, color, owner_id, created_at, updated_at) VALUES (?, 'Board', NULL, '#6366f1', ?, ?, ?)",
        )
        .bind(&id)
        .bind(owner_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
        seed_member(pool, &id, owner_id, "owner").await;
        id
    }

    pub fn test_state(pool: SqlitePool) -> crate::AppState {
        crate::AppState {
            db: crate::db::Database { pool },
            config: crate::config::Config {
                port: 0,
                database_url: String::new(),
                jwt_secret: "test-secret".to_string(),
                calendar_api_base: "http://localhost".to_string(),
            },
            calendar: crate::services::calendar::CalendarClient::new("http://localhost"),
        }
    }

    pub fn auth_user(id: &str) -> crate::middleware::auth::AuthUser {
        crate::middleware::auth::AuthUser {
            id: id.to_string(),
            email: format!("{id}@test.local"),
            name: "Test".to_string(),
            role: "user".to_string(),
        }
    }

    pub async fn seed_member(pool: &SqlitePool, board_id: &str, user_id: &str, role: &str) {
        sqlx::query(
            "INSERT INTO board_members (id, board_id, user_id, role, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(board_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::*;
    use super::*;

    async fn member_count(pool: &SqlitePool, board_id: &str, user_id: &str) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM board_members WHERE board_id = ? AND user_id = ?")
            .bind(board_id)
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn invite_used_at(pool: &SqlitePool, token: &str) -> Option<chrono::DateTime<Utc>> {
        sqlx::query_scalar("SELECT used_at FROM board_invites WHERE token = ?")
            .bind(token)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn redeem_creates_membership_and_marks_used() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let invitee = seed_user(&pool, "user@x.com").await;
        let board = seed_board(&pool, &owner).await;

        let token = issue(&pool, &board, "user@x.com", "member", &owner)
            .await
            .unwrap();
        let redeemed = redeem(&pool, &token, &invitee).await.unwrap();

        assert_eq!(redeemed.board_id, board);
        assert!(!redeemed.already_member);
        assert_eq!(member_count(&pool, &board, &invitee).await, 1);
        assert!(invite_used_at(&pool, &token).await.is_some());
    }

    #[tokio::test]
    async fn second_redeem_by_same_user_short_circuits_without_duplicating() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let invitee = seed_user(&pool, "user@x.com").await;
        let board = seed_board(&pool, &owner).await;

        let token = issue(&pool, &board, "user@x.com", "member", &owner)
            .await
            .unwrap();
        redeem(&pool, &token, &invitee).await.unwrap();
        let again = redeem(&pool, &token, &invitee).await.unwrap();

        assert!(again.already_member);
        assert_eq!(member_count(&pool, &board, &invitee).await, 1);
    }

    #[tokio::test]
    async fn redeem_by_a_different_user_after_use_reports_already_used() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let first = seed_user(&pool, "first@x.com").await;
        let second = seed_user(&pool, "second@x.com").await;
        let board = seed_board(&pool, &owner).await;

        let token = issue(&pool, &board, "first@x.com", "member", &owner)
            .await
            .unwrap();
        redeem(&pool, &token, &first).await.unwrap();

        let err = redeem(&pool, &token, &second).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyUsed(_)));
        assert_eq!(member_count(&pool, &board, &second).await, 0);
    }

    #[tokio::test]
    async fn expired_invite_is_rejected_before_any_write() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let invitee = seed_user(&pool, "late@x.com").await;
        let board = seed_board(&pool, &owner).await;

        let token = issue(&pool, &board, "late@x.com", "member", &owner)
            .await
            .unwrap();
        sqlx::query("UPDATE board_invites SET expires_at = ? WHERE token = ?")
            .bind(Utc::now() - Duration::days(1))
            .bind(&token)
            .execute(&pool)
            .await
            .unwrap();

        let err = redeem(&pool, &token, &invitee).await.unwrap_err();
        assert!(matches!(err, AppError::Expired(_)));
        assert_eq!(member_count(&pool, &board, &invitee).await, 0);
    }

    #[tokio::test]
    async fn already_member_redeem_leaves_invite_unused() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let member = seed_user(&pool, "member@x.com").await;
        let board = seed_board(&pool, &owner).await;
        seed_member(&pool, &board, &member, "member").await;

        // Invite issued for someone who joins through another path first
        let token = issue(&pool, &board, "elsewhere@x.com", "member", &owner)
            .await
            .unwrap();
        let redeemed = redeem(&pool, &token, &member).await.unwrap();

        assert!(redeemed.already_member);
        assert_eq!(member_count(&pool, &board, &member).await, 1);
        // The short-circuit intentionally does not consume the token
        assert!(invite_used_at(&pool, &token).await.is_none());
    }

    #[tokio::test]
    async fn plain_member_cannot_issue_invites() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let member = seed_user(&pool, "member@x.com").await;
        let board = seed_board(&pool, &owner).await;
        seed_member(&pool, &board, &member, "member").await;

        let err = issue(&pool, &board, "new@x.com", "member", &member)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn inviting_an_existing_member_conflicts() {
        let pool = test_pool().await;
        let owner = seed_user(&pool, "owner@x.com").await;
        let member = seed_user(&pool, "member@x.com").await;
        let board = seed_board(&pool, &owner).await;
        seed_member(&pool, &board, &member, "member").await;

        let err = issue(&pool, &board, "member@x.com", "member", &owner)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_token_is_not_found() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "user@x.com").await;

        let err = redeem(&pool, "nope", &user).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
