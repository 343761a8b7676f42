//! Export formatters: serialize a todo collection to JSON, CSV and iCal text.
//! All three are pure over the loaded collection; the routes wrap them in
//! download responses.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::db::models::TodoWithCategory;
use crate::error::{AppError, Result};

/// Domain part of every VEVENT UID.
const ICAL_UID_DOMAIN: &str = "todolist.local";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportTodo<'a> {
    id: &'a str,
    title: &'a str,
    description: Option<&'a str>,
    completed: bool,
    priority: &'a str,
    due_date: Option<String>,
    category: Option<&'a str>,
    created_at: String,
}

pub fn to_json(todos: &[TodoWithCategory]) -> Result<String> {
    let items: Vec<ExportTodo<'_>> = todos
        .iter()
        .map(|t| ExportTodo {
            id: &t.id,
            title: &t.title,
            description: t.description.as_deref(),
            completed: t.completed,
            priority: t.priority.as_str(),
            due_date: t.due_date.map(|d| d.to_rfc3339()),
            category: t.category_name.as_deref(),
            created_at: t.created_at.to_rfc3339(),
        })
        .collect();

    serde_json::to_string_pretty(&items)
        .map_err(|e| AppError::Internal(format!("Failed to serialize export: {e}")))
}

pub fn to_csv(todos: &[TodoWithCategory]) -> String {
    let mut lines = vec![
        "ID,Tytuł,Opis,Ukończone,Priorytet,Termin,Kategoria,Data utworzenia".to_string(),
    ];

    for todo in todos {
        let row = [
            todo.id.clone(),
            csv_quote(&todo.title),
            todo.description.as_deref().map(csv_quote).unwrap_or_default(),
            if todo.completed { "Tak" } else { "Nie" }.to_string(),
            todo.priority.display_label().to_string(),
            todo.due_date.map(format_date_pl).unwrap_or_default(),
            todo.category_name.clone().unwrap_or_default(),
            format_date_pl(todo.created_at),
        ];
        lines.push(row.join(","));
    }

    lines.join("\n")
}

/// RFC 5545-style calendar: one VEVENT per due-dated todo, each blocked out
/// for an hour with a display alarm an hour before the start.
pub fn to_ical(todos: &[TodoWithCategory], now: DateTime<Utc>) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//ToDo Lista//Todo App//PL".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        "X-WR-CALNAME:ToDo Lista".to_string(),
    ];

    for todo in todos {
        let Some(due) = todo.due_date else { continue };

        let status = if todo.completed { "COMPLETED" } else { "CONFIRMED" };

        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}@{ICAL_UID_DOMAIN}", todo.id));
        lines.push(format!("DTSTAMP:{}", format_ical_date(now)));
        lines.push(format!("DTSTART:{}", format_ical_date(due)));
        lines.push(format!("DTEND:{}", format_ical_date(due + Duration::hours(1))));
        lines.push(format!("SUMMARY:{}", escape_ical(&todo.title)));
        if let Some(description) = &todo.description {
            lines.push(format!("DESCRIPTION:{}", escape_ical(description)));
        }
        lines.push(format!("STATUS:{status}"));
        lines.push(format!("PRIORITY:{}", todo.priority.ical_value()));

        lines.push("BEGIN:VALARM".to_string());
        lines.push("TRIGGER:-PT1H".to_string());
        lines.push("ACTION:DISPLAY".to_string());
        lines.push(format!("DESCRIPTION:Przypomnienie: {}", escape_ical(&todo.title)));
        lines.push("END:VALARM".to_string());

        lines.push("END:VEVENT".to_string());
    }

    lines.push("END:VCALENDAR".to_string());

    lines.join("\r\n")
}

fn csv_quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Short Polish date, day.month.year with a two-digit month.
fn format_date_pl(date: DateTime<Utc>) -> String {
    date.format("%-d.%m.%Y").to_string()
}

/// Compact UTC timestamp: ISO-8601 with punctuation and fraction stripped.
fn format_ical_date(date: DateTime<Utc>) -> String {
    date.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Backslash must be escaped first, otherwise the backslashes introduced for
/// the later substitutions would be doubled up.
fn escape_ical(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Priority;
    use chrono::TimeZone;

    fn todo(title: &str, completed: bool, priority: Priority) -> TodoWithCategory {
        TodoWithCategory {
            id: "todo-1".to_string(),
            title: title.to_string(),
            description: None,
            completed,
            priority,
            due_date: None,
            google_event_id: None,
            category_name: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 5, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn json_round_trip_preserves_title_completed_priority() {
        let todos = vec![
            todo("Kupić mleko", false, Priority::High),
            todo("Posprzątać", true, Priority::Low),
        ];

        let json = to_json(&todos).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.len(), 2);
        for (value, source) in parsed.iter().zip(&todos) {
            assert_eq!(value["title"], source.title.as_str());
            assert_eq!(value["completed"], source.completed);
            assert_eq!(value["priority"], source.priority.as_str());
        }
        assert!(parsed[0]["dueDate"].is_null());
        assert!(parsed[0]["category"].is_null());
    }

    #[test]
    fn csv_doubles_embedded_quotes_and_translates_labels() {
        let mut t = todo("Say \"hello\"", true, Priority::Medium);
        t.description = Some("line, with comma".to_string());
        t.category_name = Some("Dom".to_string());
        t.due_date = Some(Utc.with_ymd_and_hms(2024, 12, 1, 12, 0, 0).unwrap());

        let csv = to_csv(&[t]);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ID,Tytuł,Opis,Ukończone,Priorytet,Termin,Kategoria,Data utworzenia"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("\"Say \"\"hello\"\"\""));
        assert!(row.contains("\"line, with comma\""));
        assert!(row.contains(",Tak,"));
        assert!(row.contains(",Średni,"));
        assert!(row.contains("1.12.2024"));
        assert!(row.contains("5.03.2024"));
    }

    #[test]
    fn ical_escapes_backslash_first() {
        assert_eq!(escape_ical("a;b,c\\d\ne"), "a\\;b\\,c\\\\d\\ne");
    }

    #[test]
    fn ical_event_covers_one_hour_with_alarm() {
        let mut t = todo("Wizyta", false, Priority::High);
        t.due_date = Some(Utc.with_ymd_and_hms(2024, 6, 10, 14, 0, 0).unwrap());
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();

        let ics = to_ical(&[t], now);
        let lines: Vec<&str> = ics.split("\r\n").collect();

        assert_eq!(lines.first(), Some(&"BEGIN:VCALENDAR"));
        assert_eq!(lines.last(), Some(&"END:VCALENDAR"));
        assert!(lines.contains(&"UID:todo-1@todolist.local"));
        assert!(lines.contains(&"DTSTAMP:20240601T080000Z"));
        assert!(lines.contains(&"DTSTART:20240610T140000Z"));
        assert!(lines.contains(&"DTEND:20240610T150000Z"));
        assert!(lines.contains(&"STATUS:CONFIRMED"));
        assert!(lines.contains(&"PRIORITY:1"));
        assert!(lines.contains(&"TRIGGER:-PT1H"));
        assert!(lines.contains(&"ACTION:DISPLAY"));
    }

    #[test]
    fn ical_skips_todos_without_due_date_and_marks_completed() {
        let undated = todo("Bez terminu", false, Priority::Low);
        let mut done = todo("Zrobione", true, Priority::Low);
        done.due_date = Some(Utc.with_ymd_and_hms(2024, 6, 10, 14, 0, 0).unwrap());

        let ics = to_ical(&[undated, done], Utc::now());
        assert_eq!(ics.matches("BEGIN:VEVENT").count(), 1);
        assert!(ics.contains("STATUS:COMPLETED"));
        assert!(ics.contains("PRIORITY:9"));
    }
}
