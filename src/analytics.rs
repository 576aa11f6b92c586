use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::models::{ConcernSummary, Conversation, FlagTotals, MoodAnalytics, MoodPoint};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const MAX_WINDOW_DAYS: i64 = 36_500;

/// Start of an analytics window `since_days` back from now, clamped to
/// `1..=MAX_WINDOW_DAYS`.
pub fn window_start(since_days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(since_days.clamp(1, MAX_WINDOW_DAYS))
}

/// Aggregate a student's conversations (oldest session first) into the
/// mood analytics payload.
pub fn mood_analytics(conversations: &[Conversation]) -> MoodAnalytics {
    let mood_trend = conversations
        .iter()
        .map(|conversation| MoodPoint {
            date: conversation.session.start_time,
            mood: conversation.session.overall_mood.clone(),
            score: conversation.session.mood_score,
        })
        .collect();

    let mut common_concerns: BTreeMap<String, usize> = BTreeMap::new();
    for conversation in conversations {
        for concern in &conversation.session.concerns {
            *common_concerns.entry(concern.clone()).or_insert(0) += 1;
        }
    }

    let wellbeing_scores: Vec<f64> = conversations
        .iter()
        .filter_map(|conversation| conversation.analytics.as_ref())
        .map(|analytics| analytics.overall_wellbeing)
        .filter(|score| *score != 0.0)
        .collect();

    let average_wellbeing = if wellbeing_scores.is_empty() {
        0.0
    } else {
        wellbeing_scores.iter().sum::<f64>() / wellbeing_scores.len() as f64
    };

    MoodAnalytics {
        total_conversations: conversations.len(),
        mood_trend,
        common_concerns,
        average_wellbeing,
        flags: FlagTotals {
            total_crises: conversations
                .iter()
                .filter(|conversation| conversation.flags.crisis_detected)
                .count(),
            needs_attention: conversations
                .iter()
                .filter(|conversation| conversation.flags.requires_attention)
                .count(),
        },
        latest_metrics: conversations
            .last()
            .and_then(|conversation| conversation.analytics.clone()),
    }
}

/// Concerns raised across sessions and individual messages, most frequent first.
pub fn summarize_concerns(conversations: &[Conversation]) -> Vec<ConcernSummary> {
    let mut map: HashMap<String, usize> = HashMap::new();

    for conversation in conversations {
        for concern in &conversation.session.concerns {
            *map.entry(concern.clone()).or_insert(0) += 1;
        }
        for message in &conversation.messages {
            for concern in &message.concerns {
                *map.entry(concern.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut summaries: Vec<ConcernSummary> = map
        .into_iter()
        .map(|(concern, count)| ConcernSummary { concern, count })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.concern.cmp(&b.concern)));
    summaries
}

/// Minutes between two instants, rounded to the nearest minute.
pub fn session_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let millis = (end - start).num_milliseconds();
    (millis as f64 / 60_000.0).round() as i64
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ChatMessage, SessionAnalytics, Sentiment};

    pub(crate) fn sample_conversation(days_ago: i64, mood: &str, wellbeing: Option<f64>) -> Conversation {
        let mut conversation = Conversation::start("student-1", uuid::Uuid::new_v4().to_string());
        conversation.session.start_time = Utc::now() - Duration::days(days_ago);
        conversation.session.overall_mood = Some(mood.to_string());
        conversation.session.mood_score = Some(0.1);
        conversation.analytics = wellbeing.map(|overall_wellbeing| SessionAnalytics {
            overall_wellbeing,
            ..SessionAnalytics::default()
        });
        conversation
    }

    #[test]
    fn empty_window_has_zeroed_analytics() {
        let analytics = mood_analytics(&[]);
        assert_eq!(analytics.total_conversations, 0);
        assert_eq!(analytics.average_wellbeing, 0.0);
        assert!(analytics.latest_metrics.is_none());
        assert!(analytics.common_concerns.is_empty());
    }

    #[test]
    fn counts_concerns_and_flags() {
        let mut first = sample_conversation(5, "negative", Some(4.0));
        first.session.concerns = vec!["stress".into(), "sleep_issues".into()];
        first.flags.crisis_detected = true;
        first.flags.requires_attention = true;

        let mut second = sample_conversation(1, "positive", Some(8.0));
        second.session.concerns = vec!["stress".into()];

        let analytics = mood_analytics(&[first, second]);
        assert_eq!(analytics.total_conversations, 2);
        assert_eq!(analytics.common_concerns["stress"], 2);
        assert_eq!(analytics.common_concerns["sleep_issues"], 1);
        assert_eq!(analytics.flags.total_crises, 1);
        assert_eq!(analytics.flags.needs_attention, 1);
        assert_eq!(analytics.mood_trend[1].mood.as_deref(), Some("positive"));
        assert_eq!(analytics.latest_metrics.unwrap().overall_wellbeing, 8.0);
    }

    #[test]
    fn average_ignores_missing_and_zero_wellbeing() {
        let conversations = vec![
            sample_conversation(3, "neutral", Some(6.0)),
            sample_conversation(2, "neutral", Some(0.0)),
            sample_conversation(1, "neutral", None),
            sample_conversation(0, "neutral", Some(9.0)),
        ];
        let analytics = mood_analytics(&conversations);
        assert!((analytics.average_wellbeing - 7.5).abs() < 0.001);
    }

    #[test]
    fn latest_metrics_come_from_last_conversation_even_if_missing() {
        let conversations = vec![
            sample_conversation(3, "neutral", Some(6.0)),
            sample_conversation(1, "neutral", None),
        ];
        assert!(mood_analytics(&conversations).latest_metrics.is_none());
    }

    #[test]
    fn concern_summary_includes_message_tags() {
        let mut conversation = sample_conversation(1, "neutral", None);
        conversation.session.concerns = vec!["stress".into()];
        conversation.messages.push(ChatMessage::user(
            "exam tomorrow and I can't sleep",
            Sentiment::neutral(),
            vec!["academic_pressure".into(), "stress".into()],
        ));
        let summaries = summarize_concerns(&[conversation]);
        assert_eq!(summaries[0].concern, "stress");
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[1].concern, "academic_pressure");
    }

    #[test]
    fn session_minutes_round_to_nearest() {
        let start = Utc::now();
        assert_eq!(session_minutes(start, start + Duration::seconds(89)), 1);
        assert_eq!(session_minutes(start, start + Duration::seconds(90)), 2);
        assert_eq!(session_minutes(start, start), 0);
    }

    #[test]
    fn window_start_respects_since_days() {
        let start = window_start(14);
        let expected = Utc::now() - Duration::days(14);
        assert!((expected - start).num_seconds().abs() < 5);
        assert!(window_start(0) < Utc::now() - Duration::hours(23));
    }

    #[test]
    fn huge_windows_are_capped() {
        let capped = Utc::now() - Duration::days(MAX_WINDOW_DAYS);
        for days in [100_000_000, i64::MAX] {
            let start = window_start(days);
            assert!((capped - start).num_seconds().abs() < 5);
        }
        assert!(window_start(i64::MIN) < Utc::now());
    }
}
