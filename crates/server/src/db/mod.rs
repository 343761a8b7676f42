pub mod models;

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use self::models::TodoWithCategory;

#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        // Ensure the data directory exists
        if let Some(path) = url.strip_prefix("sqlite:") {
            let path = path.split('?').next().unwrap_or(path);
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Loads the top-level todos visible to a user: their own plus those on boards
/// they own or belong to, with the category name joined in.
pub async fn visible_top_level_todos(
    pool: &SqlitePool,
    user_id: &str,
) -> sqlx::Result<Vec<TodoWithCategory>> {
    sqlx::query_as::<_, TodoWithCategory>(
        r#"
        SELECT DISTINCT t.id, t.title, t.description, t.completed, t.priority,
               t.due_date, t.google_event_id, c.name AS category_name,
               t.created_at, t.updated_at
        FROM todos t
        LEFT JOIN categories c ON t.category_id = c.id
        LEFT JOIN boards b ON t.board_id = b.id
        LEFT JOIN board_members bm ON t.board_id = bm.board_id AND bm.user_id = ?
        WHERE t.parent_id IS NULL
          AND (t.user_id = ? OR b.owner_id = ? OR bm.user_id IS NOT NULL)
        ORDER BY t."order" ASC, t.created_at DESC
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_all(pool)
    .await
}
