//! Read-only story exports.

use crate::state::models::{CardValue, Story, StoryStatus};

const CSV_HEADER: &str = "Title,Description,Final Estimate,Status";

/// One exported story.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRow {
    /// Story title.
    pub title: String,
    /// Story description.
    pub description: Option<String>,
    /// Agreed estimate, if any.
    pub final_estimate: Option<CardValue>,
    /// Story status.
    pub status: StoryStatus,
}

impl From<&Story> for ExportRow {
    fn from(story: &Story) -> Self {
        Self {
            title: story.title.clone(),
            description: story.description.clone(),
            final_estimate: story.final_estimate.clone(),
            status: story.status,
        }
    }
}

/// Project stories into export rows, keeping their order.
pub fn export_rows(stories: &[Story]) -> Vec<ExportRow> {
    stories.iter().map(ExportRow::from).collect()
}

/// Render export rows as CSV. Text columns and label estimates are quoted.
pub fn rows_csv(rows: &[ExportRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.to_string());
    for row in rows {
        let estimate = match &row.final_estimate {
            Some(CardValue::Number(number)) => number.to_string(),
            Some(CardValue::Label(label)) => quote(label),
            Some(CardValue::Blank) | None => String::new(),
        };
        lines.push(format!(
            "{},{},{},{}",
            quote(&row.title),
            quote(row.description.as_deref().unwrap_or_default()),
            estimate,
            row.status.as_str()
        ));
    }
    lines.join("\n")
}

fn quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn story(title: &str, description: Option<&str>, estimate: Option<CardValue>) -> Story {
        Story {
            id: title.to_lowercase(),
            room_id: "room".into(),
            title: title.into(),
            description: description.map(Into::into),
            order: 0,
            status: if estimate.is_some() {
                StoryStatus::Revealed
            } else {
                StoryStatus::Pending
            },
            final_estimate: estimate,
            created_at: SystemTime::now(),
            estimated_at: None,
            cached: None,
        }
    }

    #[test]
    fn csv_quotes_text_and_doubles_embedded_quotes() {
        let stories = vec![
            story("Login", Some("Use the \"magic\" link"), Some(5.into())),
            story("Logout", None, None),
            story("Size", Some("a, b"), Some("XL".into())),
        ];

        let csv = rows_csv(&export_rows(&stories));
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], "Title,Description,Final Estimate,Status");
        assert_eq!(lines[1], "\"Login\",\"Use the \"\"magic\"\" link\",5,revealed");
        assert_eq!(lines[2], "\"Logout\",\"\",,pending");
        assert_eq!(lines[3], "\"Size\",\"a, b\",\"XL\",revealed");
        assert!(!csv.ends_with('\n'));
    }

    #[test]
    fn csv_without_stories_is_header_only() {
        assert_eq!(rows_csv(&[]), CSV_HEADER);
    }

    #[test]
    fn label_estimates_cannot_break_columns() {
        let stories = vec![story("T", None, Some("1,5 \"days\"".into()))];
        let csv = rows_csv(&export_rows(&stories));
        assert_eq!(
            csv.lines().nth(1),
            Some("\"T\",\"\",\"1,5 \"\"days\"\"\",revealed")
        );
    }

    #[test]
    fn rows_keep_story_order() {
        let stories = vec![story("B", None, None), story("A", None, None)];
        let titles: Vec<_> = export_rows(&stories).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }
}
