//! External calendar sync: pushes due todos to the Google Calendar REST API.
//! The loop is sequential; the first 401 aborts the whole run, any other
//! failure is tallied and the loop moves on.

use reqwest::StatusCode;
use sqlx::SqlitePool;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::db::models::TodoWithCategory;
use crate::error::{AppError, Result};

const EVENT_TIME_ZONE: &str = "Europe/Warsaw";

#[derive(Clone)]
pub struct CalendarClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: String,
    #[serde(rename = "timeZone")]
    time_zone: &'static str,
}

#[derive(Debug, Serialize)]
struct EventPayload {
    summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    start: EventTime,
    end: EventTime,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}

#[derive(Debug, Default)]
struct SyncReport {
    total: usize,
    synced: usize,
    errors: usize,
}

/// Every event is blocked out for one hour starting at the due date.
fn event_payload(todo: &TodoWithCategory) -> Option<EventPayload> {
    let due = todo.due_date?;
    Some(EventPayload {
        summary: todo.title.clone(),
        description: todo.description.clone(),
        start: EventTime {
            date_time: due.to_rfc3339(),
            time_zone: EVENT_TIME_ZONE,
        },
        end: EventTime {
            date_time: (due + Duration::hours(1)).to_rfc3339(),
            time_zone: EVENT_TIME_ZONE,
        },
    })
}

fn summarize(report: SyncReport) -> Result<String> {
    if report.total == 0 {
        return Ok("No due tasks to sync".to_string());
    }
    if report.errors > 0 && report.synced == 0 {
        return Err(AppError::Upstream(format!(
            "Calendar sync failed ({} errors)",
            report.errors
        )));
    }
    if report.errors > 0 {
        Ok(format!(
            "Synced {}/{} tasks ({} errors)",
            report.synced, report.total, report.errors
        ))
    } else {
        Ok(format!("Synced {} tasks", report.synced))
    }
}

impl CalendarClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Pushes each eligible todo into the primary calendar, updating events we
    /// already created earlier and remembering ids of newly created ones.
    pub async fn sync_todos(
        &self,
        pool: &SqlitePool,
        access_token: &str,
        todos: &[TodoWithCategory],
    ) -> Result<String> {
        let mut report = SyncReport {
            total: todos.len(),
            ..Default::default()
        };

        for todo in todos {
            let Some(payload) = event_payload(todo) else {
                continue;
            };

            let request = match &todo.google_event_id {
                Some(event_id) => self
                    .http
                    .put(format!("{}/calendars/primary/events/{event_id}", self.base_url)),
                None => self
                    .http
                    .post(format!("{}/calendars/primary/events", self.base_url)),
            };

            match request.bearer_auth(access_token).json(&payload).send().await {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    // Expired credential: stop immediately, nothing after this
                    // todo gets synced
                    return Err(AppError::Upstream(
                        "Google token expired, sign out and sign in with Google again".to_string(),
                    ));
                }
                Ok(response) if response.status().is_success() => {
                    if todo.google_event_id.is_none() {
                        match response.json::<CreatedEvent>().await {
                            Ok(created) => {
                                sqlx::query("UPDATE todos SET google_event_id = ? WHERE id = ?")
                                    .bind(&created.id)
                                    .bind(&todo.id)
                                    .execute(pool)
                                    .await?;
                            }
                            Err(e) => {
                                tracing::warn!(todo = %todo.id, "created event has no readable id: {e}");
                            }
                        }
                    }
                    report.synced += 1;
                }
                Ok(response) => {
                    tracing::warn!(
                        todo = %todo.id,
                        status = %response.status(),
                        "calendar API rejected event"
                    );
                    report.errors += 1;
                }
                Err(e) => {
                    tracing::warn!(todo = %todo.id, "calendar request failed: {e}");
                    report.errors += 1;
                }
            }
        }

        summarize(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Priority;
    use crate::services::invites::tests_support::{seed_user, test_pool};
    use axum::{extract::State, routing::post, Json, Router};
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn due_todo(id: &str) -> TodoWithCategory {
        let now = Utc::now();
        TodoWithCategory {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: None,
            completed: false,
            priority: Priority::Medium,
            due_date: Some(Utc.with_ymd_and_hms(2024, 6, 10, 14, 0, 0).unwrap()),
            google_event_id: None,
            category_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed_todo(pool: &sqlx::SqlitePool, id: &str, user_id: &str) {
        let now = Utc::now();
        sqlx::query(
            r#"INSERT INTO todos (id, title, description, completed, priority, due_date, "order", user_id, created_at, updated_at) VALUES (?, ?, NULL, 0, 'medium', ?, 0, ?, ?, ?)"#,
        )
        .bind(id)
        .bind(format!("Task {id}"))
        .bind(Utc.with_ymd_and_hms(2024, 6, 10, 14, 0, 0).unwrap())
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .unwrap();
    }

    /// Stub calendar API: answers requests in order from `statuses`.
    async fn spawn_stub(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = (Arc::new(statuses), hits.clone());

        async fn create_event(
            State((statuses, hits)): State<(Arc<Vec<u16>>, Arc<AtomicUsize>)>,
        ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            let status = statuses.get(n).copied().unwrap_or(200);
            (
                axum::http::StatusCode::from_u16(status).unwrap(),
                Json(serde_json::json!({ "id": format!("evt-{n}") })),
            )
        }

        let app = Router::new()
            .route("/calendars/primary/events", post(create_event))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), hits)
    }

    #[test]
    fn payload_blocks_out_one_hour_in_the_fixed_time_zone() {
        let payload = event_payload(&due_todo("t1")).unwrap();
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["start"]["timeZone"], "Europe/Warsaw");
        assert_eq!(json["end"]["timeZone"], "Europe/Warsaw");
        assert_eq!(json["start"]["dateTime"], "2024-06-10T14:00:00+00:00");
        assert_eq!(json["end"]["dateTime"], "2024-06-10T15:00:00+00:00");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn summary_messages_cover_all_outcomes() {
        assert_eq!(
            summarize(SyncReport { total: 0, synced: 0, errors: 0 }).unwrap(),
            "No due tasks to sync"
        );
        assert_eq!(
            summarize(SyncReport { total: 3, synced: 3, errors: 0 }).unwrap(),
            "Synced 3 tasks"
        );
        assert_eq!(
            summarize(SyncReport { total: 3, synced: 2, errors: 1 }).unwrap(),
            "Synced 2/3 tasks (1 errors)"
        );
        assert!(matches!(
            summarize(SyncReport { total: 2, synced: 0, errors: 2 }),
            Err(AppError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn first_401_aborts_the_run_leaving_later_todos_unsynced() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "sync@x.com").await;
        for id in ["t1", "t2", "t3"] {
            seed_todo(&pool, id, &user).await;
        }

        let (base_url, hits) = spawn_stub(vec![200, 401, 200]).await;
        let client = CalendarClient::new(&base_url);
        let todos = vec![due_todo("t1"), due_todo("t2"), due_todo("t3")];

        let err = client.sync_todos(&pool, "tok", &todos).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(msg) if msg.contains("expired")));

        // The third todo was never attempted
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let first_event: Option<String> =
            sqlx::query_scalar("SELECT google_event_id FROM todos WHERE id = 't1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(first_event.as_deref(), Some("evt-0"));

        let third_event: Option<String> =
            sqlx::query_scalar("SELECT google_event_id FROM todos WHERE id = 't3'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert!(third_event.is_none());
    }

    #[tokio::test]
    async fn per_item_failures_are_tallied_and_the_loop_continues() {
        let pool = test_pool().await;
        let user = seed_user(&pool, "sync@x.com").await;
        for id in ["t1", "t2", "t3"] {
            seed_todo(&pool, id, &user).await;
        }

        let (base_url, hits) = spawn_stub(vec![200, 500, 200]).await;
        let client = CalendarClient::new(&base_url);
        let todos = vec![due_todo("t1"), due_todo("t2"), due_todo("t3")];

        let message = client.sync_todos(&pool, "tok", &todos).await.unwrap();
        assert_eq!(message, "Synced 2/3 tasks (1 errors)");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }
}
