use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    ChatMessage, Conversation, ConversationFlags, SessionAnalytics, SessionInfo, Timetable,
    TimetableMetadata,
};

const TIMETABLE_COLUMNS: &str = "id, student_id, metadata, structured_data, original_file_name, \
     raw_extracted_text, created_at, updated_at";

const CONVERSATION_COLUMNS: &str = "id, conversation_id, student_id, messages, session, analytics, \
     flags, metadata, is_active, created_at, updated_at";

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

fn timetable_from_row(row: &PgRow) -> anyhow::Result<Timetable> {
    let metadata: Json<TimetableMetadata> = row.try_get("metadata")?;
    Ok(Timetable {
        id: row.try_get("id")?,
        student_id: row.try_get("student_id")?,
        metadata: metadata.0,
        structured_data: row.try_get("structured_data")?,
        original_file_url: row.try_get("original_file_name")?,
        raw_extracted_text: row.try_get("raw_extracted_text")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn conversation_from_row(row: &PgRow) -> anyhow::Result<Conversation> {
    let messages: Json<Vec<ChatMessage>> = row.try_get("messages")?;
    let session: Json<SessionInfo> = row.try_get("session")?;
    let analytics: Option<Json<SessionAnalytics>> = row.try_get("analytics")?;
    let flags: Json<ConversationFlags> = row.try_get("flags")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        student_id: row.try_get("student_id")?,
        messages: messages.0,
        session: session.0,
        analytics: analytics.map(|value| value.0),
        flags: flags.0,
        metadata: row.try_get("metadata")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn insert_timetable(pool: &PgPool, timetable: &Timetable) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO student_companion.timetables
        (id, student_id, metadata, structured_data, original_file_name, raw_extracted_text,
         created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(timetable.id)
    .bind(&timetable.student_id)
    .bind(Json(&timetable.metadata))
    .bind(&timetable.structured_data)
    .bind(&timetable.original_file_url)
    .bind(&timetable.raw_extracted_text)
    .bind(timetable.created_at)
    .bind(timetable.updated_at)
    .execute(pool)
    .await
    .context("failed to insert timetable")?;
    Ok(())
}

/// All timetables for a student, newest first. `limit` caps the result.
pub async fn fetch_student_timetables(
    pool: &PgPool,
    student_id: &str,
    limit: Option<i64>,
) -> anyhow::Result<Vec<Timetable>> {
    let mut query = format!(
        "SELECT {TIMETABLE_COLUMNS} FROM student_companion.timetables \
         WHERE student_id = $1 ORDER BY created_at DESC"
    );
    if limit.is_some() {
        query.push_str(" LIMIT $2");
    }

    let mut rows = sqlx::query(&query).bind(student_id);
    if let Some(value) = limit {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    records.iter().map(timetable_from_row).collect()
}

pub async fn fetch_timetable(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Timetable>> {
    let query = format!("SELECT {TIMETABLE_COLUMNS} FROM student_companion.timetables WHERE id = $1");
    let row = sqlx::query(&query).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(timetable_from_row).transpose()
}

pub async fn delete_timetable(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM student_companion.timetables WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_conversation(
    pool: &PgPool,
    conversation_id: &str,
) -> anyhow::Result<Option<Conversation>> {
    let query = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM student_companion.conversations \
         WHERE conversation_id = $1"
    );
    let row = sqlx::query(&query)
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(conversation_from_row).transpose()
}

pub async fn fetch_active_conversation(
    pool: &PgPool,
    conversation_id: &str,
) -> anyhow::Result<Option<Conversation>> {
    let query = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM student_companion.conversations \
         WHERE conversation_id = $1 AND is_active"
    );
    let row = sqlx::query(&query)
        .bind(conversation_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(conversation_from_row).transpose()
}

/// Returns `false` when a conversation with the same id already exists.
pub async fn insert_conversation(pool: &PgPool, conversation: &Conversation) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_companion.conversations
        (id, conversation_id, student_id, messages, session, analytics, flags, metadata,
         is_active, started_at, crisis_detected, requires_attention, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (conversation_id) DO NOTHING
        "#,
    )
    .bind(conversation.id)
    .bind(&conversation.conversation_id)
    .bind(&conversation.student_id)
    .bind(Json(&conversation.messages))
    .bind(Json(&conversation.session))
    .bind(conversation.analytics.as_ref().map(Json))
    .bind(Json(&conversation.flags))
    .bind(&conversation.metadata)
    .bind(conversation.is_active)
    .bind(conversation.session.start_time)
    .bind(conversation.flags.crisis_detected)
    .bind(conversation.flags.requires_attention)
    .bind(conversation.created_at)
    .bind(conversation.updated_at)
    .execute(pool)
    .await
    .with_context(|| format!("failed to insert conversation {}", conversation.conversation_id))?;

    Ok(result.rows_affected() > 0)
}

/// Append messages to an active conversation. `crisis` replaces the stored
/// flags. Returns `false` when the conversation is missing or has ended.
pub async fn append_messages(
    pool: &PgPool,
    conversation_id: &str,
    messages: &[ChatMessage],
    crisis: Option<&ConversationFlags>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE student_companion.conversations
        SET messages = messages || $2,
            flags = CASE WHEN $3 THEN $4 ELSE flags END,
            crisis_detected = crisis_detected OR $3,
            requires_attention = requires_attention OR $3,
            updated_at = $5
        WHERE conversation_id = $1 AND is_active
        "#,
    )
    .bind(conversation_id)
    .bind(Json(messages))
    .bind(crisis.is_some())
    .bind(crisis.map(Json))
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to append to conversation {conversation_id}"))?;

    Ok(result.rows_affected() > 0)
}

/// Store the closing session and analytics, once. Returns `false` when the
/// conversation was already ended or is gone.
pub async fn finish_conversation(pool: &PgPool, conversation: &Conversation) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE student_companion.conversations
        SET session = $2,
            analytics = $3,
            is_active = FALSE,
            updated_at = $4
        WHERE conversation_id = $1 AND is_active
        "#,
    )
    .bind(&conversation.conversation_id)
    .bind(Json(&conversation.session))
    .bind(conversation.analytics.as_ref().map(Json))
    .bind(Utc::now())
    .execute(pool)
    .await
    .with_context(|| format!("failed to finish conversation {}", conversation.conversation_id))?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_student_conversations(
    pool: &PgPool,
    student_id: &str,
    limit: i64,
    skip: i64,
) -> anyhow::Result<(Vec<Conversation>, i64)> {
    let query = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM student_companion.conversations \
         WHERE student_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    );
    let records = sqlx::query(&query)
        .bind(student_id)
        .bind(limit)
        .bind(skip)
        .fetch_all(pool)
        .await?;
    let conversations = records
        .iter()
        .map(conversation_from_row)
        .collect::<anyhow::Result<Vec<_>>>()?;

    let total: i64 = sqlx::query(
        "SELECT COUNT(*) AS total FROM student_companion.conversations WHERE student_id = $1",
    )
    .bind(student_id)
    .fetch_one(pool)
    .await?
    .get("total");

    Ok((conversations, total))
}

/// Conversations whose session started on or after `since`, oldest first.
pub async fn fetch_conversations_since(
    pool: &PgPool,
    student_id: &str,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<Conversation>> {
    let query = format!(
        "SELECT {CONVERSATION_COLUMNS} FROM student_companion.conversations \
         WHERE student_id = $1 AND started_at >= $2 ORDER BY started_at ASC"
    );
    let records = sqlx::query(&query)
        .bind(student_id)
        .bind(since)
        .fetch_all(pool)
        .await?;
    records.iter().map(conversation_from_row).collect()
}

pub async fn delete_conversation(pool: &PgPool, conversation_id: &str) -> anyhow::Result<bool> {
    let result =
        sqlx::query("DELETE FROM student_companion.conversations WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected() > 0)
}
