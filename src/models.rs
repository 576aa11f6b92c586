use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimetableMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub academic_year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    /// Anything else the model chose to report.
    #[serde(flatten)]
    pub any: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timetable {
    pub id: Uuid,
    pub student_id: String,
    pub metadata: TimetableMetadata,
    pub structured_data: Value,
    pub original_file_url: Option<String>,
    pub raw_extracted_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassEntry {
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sentiment {
    #[serde(default)]
    pub score: f64,
    #[serde(default = "neutral_label")]
    pub label: String,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
}

fn neutral_label() -> String {
    "neutral".to_string()
}

impl Sentiment {
    pub fn neutral() -> Self {
        Self {
            score: 0.0,
            label: neutral_label(),
            emotions: Vec::new(),
            intensity: Some(5.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ChatMessage {
    pub fn user(content: &str, sentiment: Sentiment, concerns: Vec<String>) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
            timestamp: Utc::now(),
            sentiment: Some(sentiment),
            concerns,
            metadata: None,
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
            timestamp: Utc::now(),
            sentiment: None,
            concerns: Vec::new(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Minutes, rounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood_score: Option<f64>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Per-session wellbeing scores on a 0-10 scale.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalytics {
    #[serde(default)]
    pub academic_pressure: f64,
    #[serde(default)]
    pub sleep_quality: f64,
    #[serde(default)]
    pub stress_level: f64,
    #[serde(default)]
    pub social_wellbeing: f64,
    #[serde(default)]
    pub overall_wellbeing: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFlags {
    #[serde(default)]
    pub requires_attention: bool,
    #[serde(default)]
    pub crisis_detected: bool,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_id: String,
    pub student_id: String,
    pub messages: Vec<ChatMessage>,
    pub session: SessionInfo,
    pub analytics: Option<SessionAnalytics>,
    pub flags: ConversationFlags,
    pub metadata: Option<Value>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn start(student_id: &str, conversation_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            student_id: student_id.to_string(),
            messages: Vec::new(),
            session: SessionInfo {
                start_time: now,
                end_time: None,
                duration: None,
                overall_mood: None,
                mood_score: None,
                concerns: Vec::new(),
                summary: None,
            },
            analytics: None,
            flags: ConversationFlags::default(),
            metadata: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// The trailing `count` messages, oldest first.
    pub fn recent_messages(&self, count: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }
}

/// What the model concluded about a finished session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalysis {
    #[serde(default = "neutral_label")]
    pub overall_mood: String,
    #[serde(default)]
    pub mood_score: f64,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub analytics: Option<SessionAnalytics>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentContext {
    pub upcoming_classes: usize,
    pub next_class: Option<ClassEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodPoint {
    pub date: DateTime<Utc>,
    pub mood: Option<String>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagTotals {
    pub total_crises: usize,
    pub needs_attention: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoodAnalytics {
    pub total_conversations: usize,
    pub mood_trend: Vec<MoodPoint>,
    pub common_concerns: std::collections::BTreeMap<String, usize>,
    pub average_wellbeing: f64,
    pub flags: FlagTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_metrics: Option<SessionAnalytics>,
}

#[derive(Debug, Clone)]
pub struct ConcernSummary {
    pub concern: String,
    pub count: usize,
}
