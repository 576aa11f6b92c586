use super::ApiState;

use crate::error::ApiError;
use crate::extraction;
use crate::gemini::InlineFile;
use crate::models::{ClassEntry, Timetable};
use crate::schedule::{self, WeeklySchedule};
use crate::upload::{self, UploadRejection, UploadedFile, UNSUPPORTED_FILE_MESSAGE};
use crate::db;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

pub(super) fn routes(upload_body_limit: usize) -> Router<Arc<ApiState>> {
    Router::new()
        .route(
            "/upload",
            post(upload_timetable).layer(DefaultBodyLimit::max(upload_body_limit)),
        )
        .route("/student/{student_id}", get(student_timetables))
        .route("/{id}", get(get_timetable).delete(delete_timetable))
        .route("/{id}/upcoming", get(upcoming_classes))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UploadResponse {
    message: &'static str,
    timetable_id: Uuid,
    data: Timetable,
}

#[derive(Serialize)]
pub(super) struct StudentTimetablesResponse {
    success: bool,
    timetables: Vec<Timetable>,
    count: usize,
}

#[derive(Serialize)]
pub(super) struct TimetableResponse {
    timetable: Timetable,
}

#[derive(Serialize)]
pub(super) struct MessageResponse {
    message: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpcomingResponse {
    today: &'static str,
    current_class: Option<ClassEntry>,
    upcoming_day: Option<&'static str>,
    upcoming_classes: Vec<ClassEntry>,
}

fn parse_timetable_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim()).map_err(|_| ApiError::bad_request("Invalid timetable id"))
}

/// Pull the `timetable` file and `studentId` field out of the form.
async fn read_upload_form(
    multipart: &mut Multipart,
) -> Result<(Option<UploadedFile>, Option<String>), ApiError> {
    let mut file = None;
    let mut student_id = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("timetable") => {
                let original_name = field.file_name().unwrap_or("timetable").to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                // Reject on the part headers, before the bytes are read.
                if !upload::is_accepted(&mime_type, &original_name) {
                    tracing::info!(mime = %mime_type, "rejected unsupported upload");
                    return Err(ApiError::bad_request(UNSUPPORTED_FILE_MESSAGE));
                }
                let data = field.bytes().await?;
                file = Some(UploadedFile {
                    original_name,
                    mime_type,
                    data: data.to_vec(),
                });
            }
            Some("studentId") => {
                let value = field.text().await?;
                let value = value.trim();
                if !value.is_empty() {
                    student_id = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    Ok((file, student_id))
}

/// Validate an uploaded timetable, have the vision model read it, and store
/// the result.
pub(super) async fn upload_timetable(
    State(state): State<Arc<ApiState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let (file, student_id) = read_upload_form(&mut multipart).await?;

    let file = file.ok_or_else(|| ApiError::bad_request("No file uploaded"))?;
    tracing::info!(file_name = %file.original_name, mime = %file.mime_type, "processing uploaded timetable");

    match file.validate(state.config.max_upload_bytes) {
        Ok(()) => {}
        Err(UploadRejection::UnsupportedType) => {
            tracing::info!(mime = %file.mime_type, "rejected unsupported upload");
            return Err(ApiError::bad_request(UNSUPPORTED_FILE_MESSAGE));
        }
        Err(UploadRejection::TooLarge { size, limit }) => {
            return Err(ApiError::PayloadTooLarge(format!(
                "File too large ({size} bytes). The limit is {limit} bytes"
            )));
        }
    }

    let student_id = student_id.ok_or_else(|| ApiError::bad_request("Student ID is required"))?;

    let inline = InlineFile {
        mime_type: file.effective_mime_type(),
        data: file.data,
    };
    let extraction = extraction::extract_timetable(&state.model, &inline)
        .await
        .map_err(|error| {
            tracing::warn!(%error, %student_id, "timetable extraction failed");
            ApiError::internal("Failed to extract timetable", error)
        })?;

    let now = Utc::now();
    let timetable = Timetable {
        id: Uuid::new_v4(),
        student_id,
        metadata: extraction.metadata,
        structured_data: extraction.structured_data,
        original_file_url: Some(file.original_name),
        raw_extracted_text: Some(extraction.raw_text),
        created_at: now,
        updated_at: now,
    };

    db::insert_timetable(&state.pool, &timetable)
        .await
        .map_err(|error| ApiError::internal("Internal server error", error))?;

    tracing::info!(timetable_id = %timetable.id, student_id = %timetable.student_id, "timetable stored");

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            message: "Timetable uploaded and processed successfully",
            timetable_id: timetable.id,
            data: timetable,
        }),
    ))
}

pub(super) async fn student_timetables(
    State(state): State<Arc<ApiState>>,
    Path(student_id): Path<String>,
) -> Result<Json<StudentTimetablesResponse>, ApiError> {
    let student_id = student_id.trim();
    if student_id.is_empty() {
        return Err(ApiError::bad_request("Student ID is required"));
    }

    let timetables = db::fetch_student_timetables(&state.pool, student_id, None)
        .await
        .map_err(|error| ApiError::internal("Failed to fetch timetables", error))?;

    tracing::debug!(%student_id, count = timetables.len(), "fetched timetables");

    Ok(Json(StudentTimetablesResponse {
        success: true,
        count: timetables.len(),
        timetables,
    }))
}

async fn load_timetable(state: &ApiState, raw_id: &str) -> Result<Timetable, ApiError> {
    let id = parse_timetable_id(raw_id)?;
    db::fetch_timetable(&state.pool, id)
        .await
        .map_err(|error| ApiError::internal("Failed to fetch timetable", error))?
        .ok_or_else(|| ApiError::not_found("Timetable not found"))
}

pub(super) async fn get_timetable(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<TimetableResponse>, ApiError> {
    let timetable = load_timetable(&state, &id).await?;
    Ok(Json(TimetableResponse { timetable }))
}

pub(super) async fn delete_timetable(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_timetable_id(&id)?;
    let deleted = db::delete_timetable(&state.pool, id)
        .await
        .map_err(|error| ApiError::internal("Failed to delete timetable", error))?;

    if !deleted {
        return Err(ApiError::not_found("Timetable not found"));
    }

    tracing::info!(timetable_id = %id, "timetable deleted");
    Ok(Json(MessageResponse {
        message: "Timetable deleted successfully",
    }))
}

/// The class in progress and what comes next, by the server's clock.
pub(super) async fn upcoming_classes(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<UpcomingResponse>, ApiError> {
    let timetable = load_timetable(&state, &id).await?;
    let (today, minutes) = schedule::local_now();
    Ok(Json(upcoming_response(
        &WeeklySchedule::from_value(&timetable.structured_data),
        today,
        minutes,
    )))
}

fn upcoming_response(
    weekly: &WeeklySchedule,
    today: chrono::Weekday,
    minutes: u32,
) -> UpcomingResponse {
    let upcoming = weekly.upcoming(today, minutes);
    UpcomingResponse {
        today: schedule::day_name(today),
        current_class: weekly.current_class(today, minutes).cloned(),
        upcoming_day: upcoming.as_ref().map(|upcoming| upcoming.day),
        upcoming_classes: upcoming.map(|upcoming| upcoming.classes).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::send;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Weekday;
    use serde_json::json;

    const BOUNDARY: &str = "timetable-boundary";

    fn multipart_request(parts: &[(&str, Option<(&str, &str)>, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, file, data) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match file {
                Some((file_name, mime)) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: {mime}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                }
                None => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                    );
                }
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/timetable/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn upload_without_file_is_rejected() {
        let request = multipart_request(&[("studentId", None, b"s-1".as_slice())]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No file uploaded");
    }

    #[tokio::test]
    async fn upload_of_unsupported_type_is_rejected() {
        let request = multipart_request(&[
            ("studentId", None, b"s-1".as_slice()),
            ("timetable", Some(("notes.txt", "text/plain")), b"hello".as_slice()),
        ]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], UNSUPPORTED_FILE_MESSAGE);
    }

    #[tokio::test]
    async fn unsupported_type_wins_over_size() {
        // Over the 1 KiB file limit, inside the request body limit.
        let data = vec![b'x'; 4096];
        let request = multipart_request(&[
            ("timetable", Some(("notes.txt", "text/plain")), data.as_slice()),
            ("studentId", None, b"s-1".as_slice()),
        ]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], UNSUPPORTED_FILE_MESSAGE);
    }

    #[tokio::test]
    async fn upload_without_student_id_is_rejected() {
        let request = multipart_request(&[("timetable", Some(("week.png", "image/png")), [1u8, 2, 3].as_slice())]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Student ID is required");
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        // The offline state allows 1 KiB files.
        let data = vec![0u8; 2048];
        let request = multipart_request(&[
            ("studentId", None, b"s-1".as_slice()),
            ("timetable", Some(("week.png", "image/png")), data.as_slice()),
        ]);
        let (status, _) = send(request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn upload_fails_cleanly_without_api_key() {
        let request = multipart_request(&[
            ("studentId", None, b"s-1".as_slice()),
            ("timetable", Some(("week.png", "image/png")), [1u8, 2, 3].as_slice()),
        ]);
        let (status, body) = send(request).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to extract timetable");
        assert_eq!(body["details"], "GEMINI_API_KEY is not configured");
    }

    #[tokio::test]
    async fn malformed_timetable_id_is_a_bad_request() {
        let (status, body) = send(Request::get("/api/timetable/not-a-uuid").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid timetable id");

        let (status, _) = send(
            Request::delete("/api/timetable/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn upcoming_response_serializes_camel_case() {
        let weekly = WeeklySchedule::from_value(&json!({
            "Monday": [
                {"time": "9:00AM - 10:00AM", "subject": "Math"},
                {"time": "11:00AM - 12:00PM", "subject": "History"}
            ]
        }));
        let response = upcoming_response(&weekly, Weekday::Mon, 9 * 60 + 15);
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["today"], "Monday");
        assert_eq!(value["currentClass"]["subject"], "Math");
        assert_eq!(value["upcomingDay"], "Monday");
        assert_eq!(value["upcomingClasses"][0]["subject"], "History");
    }
}
