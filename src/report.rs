use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analytics;
use crate::models::Conversation;

pub fn build_report(
    student_id: &str,
    since_days: i64,
    since: DateTime<Utc>,
    conversations: &[Conversation],
) -> String {
    let summary = analytics::mood_analytics(conversations);
    let concerns = analytics::summarize_concerns(conversations);

    let mut output = String::new();

    let _ = writeln!(output, "# Student Wellbeing Report");
    let _ = writeln!(
        output,
        "Generated for {} over the last {} days (sessions since {})",
        student_id,
        since_days,
        since.date_naive()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Conversations: {}", summary.total_conversations);
    let _ = writeln!(
        output,
        "- Average wellbeing: {:.1} / 10",
        summary.average_wellbeing
    );
    let _ = writeln!(output, "- Crisis flags: {}", summary.flags.total_crises);
    let _ = writeln!(
        output,
        "- Needing attention: {}",
        summary.flags.needs_attention
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Mood Trend");

    if summary.mood_trend.is_empty() {
        let _ = writeln!(output, "No conversations recorded for this window.");
    } else {
        for point in summary.mood_trend.iter() {
            let score = point
                .score
                .map(|score| format!("{score:.2}"))
                .unwrap_or_else(|| "n/a".to_string());
            let _ = writeln!(
                output,
                "- {}: {} (score {})",
                point.date.format("%Y-%m-%d %H:%M"),
                point.mood.as_deref().unwrap_or("in progress"),
                score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Common Concerns");

    if concerns.is_empty() {
        let _ = writeln!(output, "No concerns detected for this window.");
    } else {
        for concern in concerns.iter() {
            let _ = writeln!(output, "- {}: {} mentions", concern.concern, concern.count);
        }
    }

    let mut recent: Vec<&Conversation> = conversations
        .iter()
        .filter(|conversation| conversation.session.summary.is_some())
        .collect();
    recent.sort_by(|a, b| b.session.start_time.cmp(&a.session.start_time));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Session Summaries");

    if recent.is_empty() {
        let _ = writeln!(output, "No completed sessions for this window.");
    } else {
        for conversation in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {}{}: {}",
                conversation.session.start_time.date_naive(),
                if conversation.flags.crisis_detected {
                    " [crisis]"
                } else {
                    ""
                },
                conversation.session.summary.as_deref().unwrap_or_default()
            );
        }
    }

    output
}

#[derive(Debug, Serialize)]
pub struct MoodRow<'a> {
    pub conversation_id: &'a str,
    pub started_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub overall_mood: Option<&'a str>,
    pub mood_score: Option<f64>,
    pub overall_wellbeing: Option<f64>,
    pub message_count: usize,
    pub crisis_detected: bool,
}

pub fn mood_rows(conversations: &[Conversation]) -> Vec<MoodRow<'_>> {
    conversations
        .iter()
        .map(|conversation| MoodRow {
            conversation_id: &conversation.conversation_id,
            started_at: conversation.session.start_time,
            duration_minutes: conversation.session.duration,
            overall_mood: conversation.session.overall_mood.as_deref(),
            mood_score: conversation.session.mood_score,
            overall_wellbeing: conversation
                .analytics
                .as_ref()
                .map(|analytics| analytics.overall_wellbeing),
            message_count: conversation.messages.len(),
            crisis_detected: conversation.flags.crisis_detected,
        })
        .collect()
}

/// Write one CSV row per conversation; returns the number of rows written.
pub fn write_mood_csv<W: std::io::Write>(
    writer: W,
    conversations: &[Conversation],
) -> anyhow::Result<usize> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    let rows = mood_rows(conversations);
    for row in rows.iter() {
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(rows.len())
}
