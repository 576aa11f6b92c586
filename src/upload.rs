pub const UNSUPPORTED_FILE_MESSAGE: &str =
    "File type not supported. Please upload images (JPG, PNG, GIF) or PDF";

const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
];

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "pdf"];

/// A timetable file pulled out of the multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadRejection {
    UnsupportedType,
    TooLarge { size: usize, limit: usize },
}

impl UploadedFile {
    pub fn validate(&self, max_bytes: usize) -> Result<(), UploadRejection> {
        if !is_accepted(&self.mime_type, &self.original_name) {
            return Err(UploadRejection::UnsupportedType);
        }
        if self.data.len() > max_bytes {
            return Err(UploadRejection::TooLarge {
                size: self.data.len(),
                limit: max_bytes,
            });
        }
        Ok(())
    }

    /// MIME type to hand to the model. Browsers sometimes send
    /// `application/octet-stream`, in which case the extension decides.
    pub fn effective_mime_type(&self) -> String {
        let declared = self.mime_type.to_ascii_lowercase();
        if ALLOWED_MIME_TYPES.contains(&declared.as_str()) || declared.starts_with("image/") {
            return declared;
        }
        match extension(&self.original_name).as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
            Some("png") => "image/png".to_string(),
            Some("gif") => "image/gif".to_string(),
            Some("webp") => "image/webp".to_string(),
            Some("pdf") => "application/pdf".to_string(),
            _ => declared,
        }
    }
}

pub fn is_accepted(mime_type: &str, file_name: &str) -> bool {
    let mime_type = mime_type.to_ascii_lowercase();
    let mime_ok = ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) || mime_type.starts_with("image/");
    let name_ok = extension(file_name)
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);
    mime_ok || name_ok
}

fn extension(file_name: &str) -> Option<String> {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}
