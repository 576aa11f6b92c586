use serde_json::{Map, Value};

use crate::error::LlmError;
use crate::gemini::{parse_model_json, strip_code_fences, GenerativeModel, InlineFile};
use crate::models::TimetableMetadata;

pub const EXTRACTION_PROMPT: &str = r#"
You are an expert at analyzing and extracting timetable/schedule information from images.

Analyze this timetable image and extract ALL information in a structured JSON format. Be intelligent and flexible - understand the format and structure it appropriately.

Return ONLY a valid JSON object with this general structure:
{
  "metadata": {
    "semester": "extract if visible",
    "academicYear": "extract if visible",
    "institutionName": "extract if visible",
    "courseName": "extract if visible",
    "studentName": "extract if visible",
    "section": "extract if visible",
    "any_other_info": "extract any other relevant metadata"
  },
  "schedule": {
    "Monday": [{"time": "9:00-10:00", "subject": "Math", "teacher": "Dr. X", "room": "101"}],
    "Tuesday": [{"time": "9:00-10:00", "subject": "Physics", "teacher": "Dr. Y", "room": "102"}],
    "Wednesday": [],
    "Thursday": [],
    "Friday": [],
    "Saturday": [],
    "Sunday": []
  }
}

Guidelines:
- Extract ALL visible information including: subjects, teachers, rooms, times, days
- Preserve exact names and spellings
- Use time formats like "9:00AM - 10:00AM" or "09:00-10:00"
- If a cell is empty, return empty array for that day
- Include any special notes, lab sessions, tutorial sessions
- Always structure with days of week as keys

Return ONLY the JSON, no markdown formatting, no explanations.
"#;

/// A timetable as the model read it, split into the stored parts.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub metadata: TimetableMetadata,
    pub structured_data: Value,
    pub raw_text: String,
}

impl Extraction {
    /// `metadata` and `schedule` come from their own keys when present;
    /// without a `schedule` key the whole object is the schedule.
    pub fn from_parsed(parsed: Map<String, Value>, raw_text: String) -> Self {
        let metadata = parsed
            .get("metadata")
            .and_then(|value| lenient_metadata(value.clone()))
            .unwrap_or_default();

        let structured_data = match parsed.get("schedule") {
            Some(schedule) if !schedule.is_null() => schedule.clone(),
            _ => Value::Object(parsed),
        };

        Self {
            metadata,
            structured_data,
            raw_text,
        }
    }
}

/// Each known field is read on its own; a value that cannot be rendered as
/// text moves into `any` rather than failing the rest.
fn lenient_metadata(value: Value) -> Option<TimetableMetadata> {
    let Value::Object(object) = value else {
        return None;
    };

    let mut metadata = TimetableMetadata::default();
    for (key, value) in object {
        if value.is_null() {
            continue;
        }
        let slot = match key.as_str() {
            "semester" => Some(&mut metadata.semester),
            "academicYear" => Some(&mut metadata.academic_year),
            "institutionName" => Some(&mut metadata.institution_name),
            "courseName" => Some(&mut metadata.course_name),
            "studentName" => Some(&mut metadata.student_name),
            "section" => Some(&mut metadata.section),
            _ => None,
        };
        match (slot, metadata_text(&value)) {
            (Some(slot), Some(text)) => *slot = Some(text),
            _ => {
                metadata.any.insert(key, value);
            }
        }
    }
    Some(metadata)
}

fn metadata_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Array(items) => items
            .iter()
            .map(metadata_text)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(", ")),
        Value::Null | Value::Object(_) => None,
    }
}

pub async fn extract_timetable<M: GenerativeModel>(
    model: &M,
    file: &InlineFile,
) -> Result<Extraction, LlmError> {
    tracing::info!(mime = %file.mime_type, size = file.data.len(), "sending timetable to vision model");
    let reply = model.generate_with_file(EXTRACTION_PROMPT, file).await?;

    let parsed: Value = parse_model_json(&reply)?;
    let Value::Object(object) = parsed else {
        return Err(LlmError::NotAnObject);
    };

    tracing::info!("timetable extraction parsed");
    Ok(Extraction::from_parsed(object, strip_code_fences(&reply)))
}
