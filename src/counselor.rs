use std::fmt::Write;

use crate::gemini::{parse_model_json, GenerativeModel};
use crate::models::{
    ChatMessage, Role, Sentiment, SessionAnalysis, SessionAnalytics, StudentContext,
};

pub const CRISIS_KEYWORDS: &[&str] = &[
    "suicide",
    "kill myself",
    "end my life",
    "want to die",
    "better off dead",
    "self harm",
    "hurt myself",
    "cut myself",
    "hate myself",
    "no point living",
];

pub const CONCERN_PATTERNS: &[(&str, &[&str])] = &[
    (
        "academic_pressure",
        &["exam", "test", "assignment", "grade", "fail", "study", "homework", "pressure"],
    ),
    (
        "sleep_issues",
        &["sleep", "tired", "exhausted", "insomnia", "cant sleep", "sleepless"],
    ),
    (
        "stress",
        &["stress", "anxious", "anxiety", "worried", "nervous", "overwhelmed"],
    ),
    (
        "social_issues",
        &["lonely", "alone", "friends", "isolated", "left out", "bullied"],
    ),
    ("family_issues", &["family", "parents", "home", "fight", "argument"]),
    ("health", &["sick", "pain", "headache", "unwell", "health"]),
];

pub const FALLBACK_REPLY: &str =
    "I'm here to listen. Can you tell me more about how you're feeling?";

/// History window handed to the model when generating a reply.
pub const HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrisisCheck {
    pub is_crisis: bool,
    pub keywords: Vec<String>,
}

/// Concern categories whose keywords occur in `text`, in category order.
pub fn detect_concerns(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    CONCERN_PATTERNS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(concern, _)| concern.to_string())
        .collect()
}

/// Substring scan against the crisis phrase list. This only raises a flag
/// for human follow-up; it is not a clinical assessment.
pub fn detect_crisis(text: &str) -> CrisisCheck {
    let lower = text.to_lowercase();
    let keywords: Vec<String> = CRISIS_KEYWORDS
        .iter()
        .filter(|keyword| lower.contains(*keyword))
        .map(|keyword| keyword.to_string())
        .collect();

    CrisisCheck {
        is_crisis: !keywords.is_empty(),
        keywords,
    }
}

pub fn sentiment_prompt(text: &str) -> String {
    format!(
        r#"Analyze the sentiment and emotions in this message. Return ONLY a JSON object:

Message: "{text}"

Return format:
{{
  "score": <number between -1 and 1, where -1 is very negative, 0 is neutral, 1 is very positive>,
  "label": "positive" | "negative" | "neutral",
  "emotions": ["happy", "sad", "anxious", "stressed", "excited", "calm", etc.],
  "intensity": <number 0-10 indicating emotional intensity>
}}"#
    )
}

pub async fn analyze_sentiment<M: GenerativeModel>(model: &M, text: &str) -> Sentiment {
    let result = match model.generate_text(&sentiment_prompt(text)).await {
        Ok(reply) => parse_model_json::<Sentiment>(&reply),
        Err(error) => Err(error),
    };

    match result {
        Ok(mut sentiment) => {
            sentiment.score = sentiment.score.clamp(-1.0, 1.0);
            sentiment
        }
        Err(error) => {
            tracing::warn!(%error, "sentiment analysis failed, using neutral sentiment");
            Sentiment::neutral()
        }
    }
}

fn speaker(role: Role, assistant_label: &str) -> &str {
    match role {
        Role::User => "Student",
        Role::Assistant | Role::System => assistant_label,
    }
}

fn render_history(messages: &[ChatMessage], assistant_label: &str) -> String {
    messages
        .iter()
        .map(|message| format!("{}: {}", speaker(message.role, assistant_label), message.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn reply_prompt(user_message: &str, history: &[ChatMessage], context: &StudentContext) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let history_text = render_history(&history[start..], "You");

    let mut context_info = String::new();
    if let Some(next) = &context.next_class {
        let _ = write!(
            context_info,
            "\nStudent's next class: {} at {}",
            next.subject, next.time
        );
    }
    if context.upcoming_classes > 0 {
        let _ = write!(
            context_info,
            "\nUpcoming classes today: {}",
            context.upcoming_classes
        );
    }

    let history_text = if history_text.is_empty() {
        "This is the start of the conversation.".to_string()
    } else {
        history_text
    };

    format!(
        r#"You are a caring, empathetic AI counselor chatbot for students. Your role is to:
- Check in on students' mental health and wellbeing
- Listen actively and empathetically
- Provide emotional support and validation
- Help students identify stressors and concerns
- Suggest healthy coping strategies
- Encourage seeking professional help when needed
- Be warm, understanding, and non-judgmental

Guidelines:
- Keep responses concise (2-4 sentences max)
- Ask follow-up questions to understand better
- Acknowledge their feelings
- Never diagnose or provide medical advice
- If serious concerns detected, encourage professional help
- Be natural and conversational, not clinical
- Reference their schedule/context when relevant

{context_info}

Previous conversation:
{history_text}

Student's message: "{user_message}"

Respond empathetically and supportively:"#
    )
}

pub async fn generate_reply<M: GenerativeModel>(
    model: &M,
    user_message: &str,
    history: &[ChatMessage],
    context: &StudentContext,
) -> String {
    let prompt = reply_prompt(user_message, history, context);
    match model.generate_text(&prompt).await {
        Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
        Ok(_) => FALLBACK_REPLY.to_string(),
        Err(error) => {
            tracing::warn!(%error, "reply generation failed, using fallback reply");
            FALLBACK_REPLY.to_string()
        }
    }
}

pub fn session_prompt(messages: &[ChatMessage]) -> String {
    let conversation = render_history(messages, "Assistant");
    format!(
        r#"Analyze this counseling conversation and provide insights. Return ONLY a JSON object:

Conversation:
{conversation}

Return format:
{{
  "overallMood": "positive" | "negative" | "neutral" | "mixed",
  "moodScore": <number -1 to 1>,
  "concerns": ["academic_pressure", "sleep_issues", etc.],
  "summary": "Brief 1-2 sentence summary of the conversation",
  "analytics": {{
    "academicPressure": <0-10>,
    "sleepQuality": <0-10>,
    "stressLevel": <0-10>,
    "socialWellbeing": <0-10>,
    "overallWellbeing": <0-10>
  }}
}}"#
    )
}

impl SessionAnalysis {
    pub fn empty_session() -> Self {
        Self {
            overall_mood: "neutral".to_string(),
            mood_score: 0.0,
            concerns: Vec::new(),
            summary: "No messages in session".to_string(),
            analytics: None,
        }
    }

    pub fn fallback() -> Self {
        Self {
            overall_mood: "neutral".to_string(),
            mood_score: 0.0,
            concerns: Vec::new(),
            summary: "Conversation completed".to_string(),
            analytics: Some(SessionAnalytics {
                academic_pressure: 5.0,
                sleep_quality: 5.0,
                stress_level: 5.0,
                social_wellbeing: 5.0,
                overall_wellbeing: 5.0,
            }),
        }
    }
}

pub async fn analyze_session<M: GenerativeModel>(model: &M, messages: &[ChatMessage]) -> SessionAnalysis {
    if messages.is_empty() {
        return SessionAnalysis::empty_session();
    }

    let result = match model.generate_text(&session_prompt(messages)).await {
        Ok(reply) => parse_model_json::<SessionAnalysis>(&reply),
        Err(error) => Err(error),
    };

    match result {
        Ok(mut analysis) => {
            analysis.mood_score = analysis.mood_score.clamp(-1.0, 1.0);
            analysis
        }
        Err(error) => {
            tracing::warn!(%error, "session analysis failed, using fallback analysis");
            SessionAnalysis::fallback()
        }
    }
}
