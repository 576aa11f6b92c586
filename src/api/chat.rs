use super::ApiState;

use crate::analytics::{self, DEFAULT_WINDOW_DAYS};
use crate::counselor::{self, HISTORY_WINDOW};
use crate::db;
use crate::error::ApiError;
use crate::models::{
    ChatMessage, Conversation, MoodAnalytics, Sentiment, SessionAnalysis, StudentContext,
};
use crate::schedule::{self, WeeklySchedule};

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;

pub(super) fn routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/message", post(send_message))
        .route(
            "/conversation/{conversation_id}",
            get(get_conversation).delete(delete_conversation),
        )
        .route("/conversation/{conversation_id}/end", post(end_conversation))
        .route("/student/{student_id}/conversations", get(list_conversations))
        .route("/student/{student_id}/analytics", get(mood_analytics))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageRequest {
    student_id: Option<String>,
    message: Option<String>,
    conversation_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SendMessageResponse {
    success: bool,
    conversation_id: String,
    message: String,
    sentiment: Sentiment,
    concerns: Vec<String>,
    crisis_detected: bool,
    is_new_conversation: bool,
}

#[derive(Serialize)]
pub(super) struct ConversationResponse {
    conversation: Conversation,
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    limit: Option<i64>,
    skip: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ListResponse {
    conversations: Vec<Conversation>,
    total: i64,
    has_more: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct EndedSession {
    overall_mood: String,
    summary: String,
    duration: i64,
}

#[derive(Serialize)]
pub(super) struct EndResponse {
    success: bool,
    message: &'static str,
    analysis: EndedSession,
}

#[derive(Debug, Deserialize)]
pub(super) struct AnalyticsQuery {
    days: Option<i64>,
}

#[derive(Serialize)]
pub(super) struct AnalyticsResponse {
    analytics: MoodAnalytics,
}

#[derive(Serialize)]
pub(super) struct DeleteResponse {
    success: bool,
    message: &'static str,
}

fn required(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Clamp list paging to `1..=100` and a non-negative offset.
fn page_bounds(query: &ListQuery) -> (i64, i64) {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let skip = query.skip.unwrap_or(0).max(0);
    (limit, skip)
}

fn has_more(total: i64, skip: i64, returned: usize) -> bool {
    let returned = i64::try_from(returned).unwrap_or(i64::MAX);
    total > skip.saturating_add(returned)
}

/// Write the session analysis onto the conversation and mark it ended.
fn close_session(
    conversation: &mut Conversation,
    analysis: SessionAnalysis,
    end_time: DateTime<Utc>,
) -> EndedSession {
    let duration = analytics::session_minutes(conversation.session.start_time, end_time);

    let session = &mut conversation.session;
    session.end_time = Some(end_time);
    session.duration = Some(duration);
    session.overall_mood = Some(analysis.overall_mood.clone());
    session.mood_score = Some(analysis.mood_score);
    session.concerns = analysis.concerns;
    session.summary = Some(analysis.summary.clone());
    conversation.analytics = analysis.analytics;
    conversation.is_active = false;

    EndedSession {
        overall_mood: analysis.overall_mood,
        summary: analysis.summary,
        duration,
    }
}

/// Today's remaining classes from the student's newest timetable.
async fn student_context(pool: &PgPool, student_id: &str) -> StudentContext {
    let timetables = match db::fetch_student_timetables(pool, student_id, Some(1)).await {
        Ok(timetables) => timetables,
        Err(error) => {
            tracing::warn!(%error, %student_id, "could not load timetable for chat context");
            return StudentContext::default();
        }
    };

    let Some(timetable) = timetables.first() else {
        return StudentContext::default();
    };

    let (today, minutes) = schedule::local_now();
    WeeklySchedule::from_value(&timetable.structured_data).context_for(today, minutes)
}

/// Find the conversation to append to, or open a new one.
async fn open_conversation(
    pool: &PgPool,
    student_id: &str,
    conversation_id: Option<String>,
) -> Result<(Conversation, bool), ApiError> {
    let Some(conversation_id) = conversation_id else {
        return Ok((
            Conversation::start(student_id, Uuid::new_v4().to_string()),
            true,
        ));
    };

    let existing = db::fetch_conversation(pool, &conversation_id)
        .await
        .map_err(|error| ApiError::internal("Failed to process message", error))?;

    match existing {
        Some(conversation) if conversation.is_active => Ok((conversation, false)),
        Some(_) => Err(ApiError::Conflict("Conversation has ended".to_string())),
        None => Ok((Conversation::start(student_id, conversation_id), true)),
    }
}

/// Store the messages from `first_new` on. A new conversation is inserted
/// whole; otherwise the messages are appended to the stored row, which
/// must still be active.
async fn persist_exchange(
    pool: &PgPool,
    conversation: &Conversation,
    is_new: bool,
    first_new: usize,
    crisis: bool,
) -> Result<(), ApiError> {
    let failed = |error: anyhow::Error| ApiError::internal("Failed to process message", error);

    if is_new && db::insert_conversation(pool, conversation).await.map_err(failed)? {
        return Ok(());
    }

    let appended = db::append_messages(
        pool,
        &conversation.conversation_id,
        &conversation.messages[first_new..],
        crisis.then_some(&conversation.flags),
    )
    .await
    .map_err(failed)?;

    if appended {
        Ok(())
    } else {
        Err(ApiError::Conflict("Conversation has ended".to_string()))
    }
}

pub(super) async fn send_message(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(request) = payload?;

    let (Some(student_id), Some(message)) =
        (required(request.student_id), required(request.message))
    else {
        return Err(ApiError::bad_request("studentId and message are required"));
    };

    let (mut conversation, is_new_conversation) =
        open_conversation(&state.pool, &student_id, required(request.conversation_id)).await?;
    let first_new_message = conversation.messages.len();

    let (sentiment, context) = tokio::join!(
        counselor::analyze_sentiment(&state.model, &message),
        student_context(&state.pool, &student_id),
    );
    let concerns = counselor::detect_concerns(&message);
    let crisis = counselor::detect_crisis(&message);

    conversation.messages.push(ChatMessage::user(
        &message,
        sentiment.clone(),
        concerns.clone(),
    ));

    if crisis.is_crisis {
        tracing::warn!(
            conversation_id = %conversation.conversation_id,
            %student_id,
            keywords = ?crisis.keywords,
            "crisis language detected"
        );
        conversation.flags.crisis_detected = true;
        conversation.flags.requires_attention = true;
        conversation.flags.keywords = crisis.keywords.clone();
    }

    let reply = counselor::generate_reply(
        &state.model,
        &message,
        conversation.recent_messages(HISTORY_WINDOW),
        &context,
    )
    .await;
    conversation.messages.push(ChatMessage::assistant(&reply));

    persist_exchange(
        &state.pool,
        &conversation,
        is_new_conversation,
        first_new_message,
        crisis.is_crisis,
    )
    .await?;

    tracing::info!(
        conversation_id = %conversation.conversation_id,
        %student_id,
        messages = conversation.messages.len(),
        is_new_conversation,
        "chat message handled"
    );

    Ok(Json(SendMessageResponse {
        success: true,
        conversation_id: conversation.conversation_id,
        message: reply,
        sentiment,
        concerns,
        crisis_detected: crisis.is_crisis,
        is_new_conversation,
    }))
}

pub(super) async fn get_conversation(
    State(state): State<Arc<ApiState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation = db::fetch_conversation(&state.pool, &conversation_id)
        .await
        .map_err(|error| ApiError::internal("Failed to fetch conversation", error))?
        .ok_or_else(|| ApiError::not_found("Conversation not found"))?;

    Ok(Json(ConversationResponse { conversation }))
}

pub(super) async fn list_conversations(
    State(state): State<Arc<ApiState>>,
    Path(student_id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse>, ApiError> {
    let Query(query) = query?;
    let (limit, skip) = page_bounds(&query);

    let (conversations, total) =
        db::fetch_student_conversations(&state.pool, &student_id, limit, skip)
            .await
            .map_err(|error| ApiError::internal("Failed to fetch conversations", error))?;

    Ok(Json(ListResponse {
        has_more: has_more(total, skip, conversations.len()),
        conversations,
        total,
    }))
}

/// Close an active conversation and record the model's read of the session.
pub(super) async fn end_conversation(
    State(state): State<Arc<ApiState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<EndResponse>, ApiError> {
    let mut conversation = db::fetch_active_conversation(&state.pool, &conversation_id)
        .await
        .map_err(|error| ApiError::internal("Failed to end conversation", error))?
        .ok_or_else(|| ApiError::not_found("Active conversation not found"))?;

    let analysis = counselor::analyze_session(&state.model, &conversation.messages).await;

    let ended = close_session(&mut conversation, analysis, Utc::now());

    let finished = db::finish_conversation(&state.pool, &conversation)
        .await
        .map_err(|error| ApiError::internal("Failed to end conversation", error))?;
    if !finished {
        return Err(ApiError::not_found("Active conversation not found"));
    }

    tracing::info!(%conversation_id, duration = ended.duration, mood = %ended.overall_mood, "conversation ended");

    Ok(Json(EndResponse {
        success: true,
        message: "Conversation ended",
        analysis: ended,
    }))
}

pub(super) async fn mood_analytics(
    State(state): State<Arc<ApiState>>,
    Path(student_id): Path<String>,
    query: Result<Query<AnalyticsQuery>, QueryRejection>,
) -> Result<Json<AnalyticsResponse>, ApiError> {
    let Query(query) = query?;
    let since = analytics::window_start(query.days.unwrap_or(DEFAULT_WINDOW_DAYS));

    let conversations = db::fetch_conversations_since(&state.pool, &student_id, since)
        .await
        .map_err(|error| ApiError::internal("Failed to fetch analytics", error))?;

    Ok(Json(AnalyticsResponse {
        analytics: analytics::mood_analytics(&conversations),
    }))
}

pub(super) async fn delete_conversation(
    State(state): State<Arc<ApiState>>,
    Path(conversation_id): Path<String>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = db::delete_conversation(&state.pool, &conversation_id)
        .await
        .map_err(|error| ApiError::internal("Failed to delete conversation", error))?;

    if !deleted {
        return Err(ApiError::not_found("Conversation not found"));
    }

    tracing::info!(%conversation_id, "conversation deleted");
    Ok(Json(DeleteResponse {
        success: true,
        message: "Conversation deleted",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::tests::sample_conversation;
    use crate::api::tests::{send, send_to, state_with_pool};
    use crate::db::tests::test_pool;
    use crate::models::SessionAnalytics;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Duration;

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn message_requires_student_and_text() {
        let (status, body) = send(post_json("/api/chat/message", r#"{"studentId":"s-1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "studentId and message are required");

        let (status, _) = send(post_json(
            "/api/chat/message",
            r#"{"studentId":"  ","message":"hello"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let (status, body) = send(post_json("/api/chat/message", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn non_numeric_paging_is_rejected() {
        let request = Request::get("/api/chat/student/s-1/conversations?limit=lots")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[test]
    fn paging_is_clamped() {
        let bounds = |limit, skip| page_bounds(&ListQuery { limit, skip });
        assert_eq!(bounds(None, None), (10, 0));
        assert_eq!(bounds(Some(500), Some(-3)), (100, 0));
        assert_eq!(bounds(Some(0), Some(20)), (1, 20));
    }

    #[test]
    fn blank_fields_count_as_missing() {
        assert_eq!(required(Some("  ".to_string())), None);
        assert_eq!(required(None), None);
        assert_eq!(required(Some(" s-1 ".to_string())), Some("s-1".to_string()));
    }

    #[test]
    fn has_more_counts_skipped_and_returned() {
        assert!(has_more(25, 0, 10));
        assert!(has_more(25, 10, 10));
        assert!(!has_more(25, 20, 5));
        assert!(!has_more(0, 0, 0));
        assert!(!has_more(3, 50, 0));
    }

    #[test]
    fn closing_a_session_records_the_analysis() {
        let mut conversation = sample_conversation(0, "neutral", None);
        conversation.session.start_time = Utc::now() - Duration::minutes(30);
        conversation.session.overall_mood = None;
        conversation.session.mood_score = None;
        let end_time = conversation.session.start_time + Duration::seconds(12 * 60 + 40);

        let analysis = SessionAnalysis {
            overall_mood: "anxious".to_string(),
            mood_score: -0.4,
            concerns: vec!["academic_pressure".to_string()],
            summary: "Worried about finals.".to_string(),
            analytics: Some(SessionAnalytics {
                stress_level: 8.0,
                ..SessionAnalytics::default()
            }),
        };
        let ended = close_session(&mut conversation, analysis, end_time);

        assert_eq!(ended.duration, 13);
        assert_eq!(ended.overall_mood, "anxious");
        assert_eq!(ended.summary, "Worried about finals.");
        assert!(!conversation.is_active);
        assert_eq!(conversation.session.end_time, Some(end_time));
        assert_eq!(conversation.session.duration, Some(13));
        assert_eq!(conversation.session.mood_score, Some(-0.4));
        assert_eq!(conversation.session.concerns, vec!["academic_pressure"]);
        assert_eq!(conversation.analytics.unwrap().stress_level, 8.0);
    }

    #[tokio::test]
    async fn chat_round_trip_against_database() {
        let Some((pool, database_url)) = test_pool().await else {
            return;
        };
        let state = state_with_pool(pool.clone(), &database_url);
        let student_id = format!("student-{}", Uuid::new_v4());

        let (status, body) = send_to(
            state.clone(),
            post_json(
                "/api/chat/message",
                &serde_json::json!({"studentId": student_id, "message": "exams are stressing me out"})
                    .to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isNewConversation"], true);
        assert_eq!(body["message"], counselor::FALLBACK_REPLY);
        assert_eq!(body["sentiment"]["label"], "neutral");
        let conversation_id = body["conversationId"].as_str().unwrap().to_string();

        let (status, body) = send_to(
            state.clone(),
            post_json(
                "/api/chat/message",
                &serde_json::json!({
                    "studentId": student_id,
                    "message": "still here",
                    "conversationId": conversation_id
                })
                .to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isNewConversation"], false);

        let stored = db::fetch_conversation(&pool, &conversation_id).await.unwrap().unwrap();
        assert_eq!(stored.messages.len(), 4);

        let end_uri = format!("/api/chat/conversation/{conversation_id}/end");
        let (status, body) = send_to(state.clone(), post_json(&end_uri, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis"]["summary"], "Conversation completed");

        let (status, body) = send_to(state.clone(), post_json(&end_uri, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Active conversation not found");

        let (status, body) = send_to(
            state.clone(),
            post_json(
                "/api/chat/message",
                &serde_json::json!({
                    "studentId": student_id,
                    "message": "one more thing",
                    "conversationId": conversation_id
                })
                .to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Conversation has ended");

        let stored = db::fetch_conversation(&pool, &conversation_id).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.messages.len(), 4);
        assert_eq!(stored.session.summary.as_deref(), Some("Conversation completed"));
    }

    #[tokio::test]
    async fn message_after_end_in_flight_is_a_conflict() {
        let Some((pool, _)) = test_pool().await else {
            return;
        };
        let mut conversation = sample_conversation(0, "neutral", None);
        conversation.messages.push(ChatMessage::assistant("hello"));
        db::insert_conversation(&pool, &conversation).await.unwrap();

        // The message handler loaded the row while it was still active.
        let mut loaded = conversation.clone();
        let first_new = loaded.messages.len();
        loaded.messages.push(ChatMessage::assistant("late reply"));

        close_session(&mut conversation, SessionAnalysis::fallback(), Utc::now());
        assert!(db::finish_conversation(&pool, &conversation).await.unwrap());

        let error = persist_exchange(&pool, &loaded, false, first_new, false)
            .await
            .unwrap_err();
        assert_eq!(error.status(), StatusCode::CONFLICT);

        let stored = db::fetch_conversation(&pool, &conversation.conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.is_active);
        assert_eq!(stored.session.summary.as_deref(), Some("Conversation completed"));
    }
}
