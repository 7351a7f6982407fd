use std::path::{MAIN_SEPARATOR, Path, PathBuf};

use axum::{
    Form,
    body::{Body, BodyDataStream},
    extract::{FromRequest, Multipart, Request},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::AppState;
use crate::error::FileServerError;
use crate::listing::ListingError;
use crate::path_guard::{absolutize, basename, dirname, rename_target};
use crate::template::render_index;

pub const TEXT_CONTENT_TYPE: &str = "text/text";
pub const JSON_CONTENT_TYPE: &str = "text/json";
pub const FILE_NOT_FOUND: &str = "File not found";

const MISSING_FILENAME_OR_TEXT: &str = "Missing filename or text";
const MISSING_FILE_OR_PATH: &str = "Missing file or path";
const GENERIC_FAILURE: &str = "Generic failure";

/// JSON envelope returned by every mutating endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct OperationResponse {
    pub error: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl OperationResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            error: false,
            message: message.into(),
            path: None,
            file: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: message.into(),
            path: None,
            file: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    /// Build the envelope for the outcome of a filesystem operation.
    fn from_result(result: Result<(), FileServerError>, success: &str) -> Self {
        match result {
            Ok(()) => Self::success(success),
            Err(err) => {
                warn!("{}", err);
                Self::failure(err.to_string())
            }
        }
    }
}

impl IntoResponse for OperationResponse {
    fn into_response(self) -> Response {
        json(&self)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FilenameQuery {
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveForm {
    pub filename: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameForm {
    pub src: Option<String>,
    pub dstfilename: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteForm {
    pub path: Option<String>,
}

/// Form for `/api/newfolder` and `/api/newfile`.
#[derive(Debug, Deserialize)]
pub struct CreateForm {
    pub path: Option<String>,
    pub name: Option<String>,
}

// ============================================================================
// Response helpers
// ============================================================================

pub fn text(status: StatusCode, body: impl Into<Body>) -> Response {
    (status, [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], body.into()).into_response()
}

pub fn json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, JSON_CONTENT_TYPE)],
            bytes,
        )
            .into_response(),
        Err(err) => {
            error!("Failed to serialize response: {}", err);
            text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn stream_file(path: &Path) -> Result<Body, FileServerError> {
    let file = fs::File::open(path)
        .await
        .map_err(|e| FileServerError::from_io(e, path))?;
    Ok(Body::from_stream(ReaderStream::new(file)))
}

async fn parse_form<T>(req: Request, state: &AppState) -> Result<T, OperationResponse>
where
    T: serde::de::DeserializeOwned + Send,
{
    match Form::<T>::from_request(req, state).await {
        Ok(Form(form)) => Ok(form),
        Err(rejection) => {
            warn!("Rejected form body: {}", rejection.body_text());
            Err(OperationResponse::failure(rejection.body_text()))
        }
    }
}

// ============================================================================
// GET handlers
// ============================================================================

/// GET /api/file - File content for the editor
///
/// Images are streamed raw with their own content type; everything else must
/// decode as UTF-8 and is returned as text.
pub async fn get_file(state: &AppState, filename: Option<String>) -> Response {
    let Some(filename) = filename else {
        return text(StatusCode::OK, "");
    };

    match read_file(state, &filename).await {
        Ok(response) => response,
        Err(err) => {
            warn!("Failed to read {}: {}", filename, err);
            text(StatusCode::OK, err.to_string())
        }
    }
}

async fn read_file(state: &AppState, filename: &str) -> Result<Response, FileServerError> {
    let path = state.config.join_base().join(filename);
    state.guard(&path)?;

    if !is_file(&path).await {
        return Ok(text(StatusCode::OK, FILE_NOT_FOUND));
    }

    if let Some(mime) = mime_guess::from_path(&path).first() {
        if mime.type_() == mime_guess::mime::IMAGE {
            debug!("Streaming image: {}", path.display());
            let body = stream_file(&path).await?;
            return Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime.essence_str().to_string())],
                body,
            )
                .into_response());
        }
    }

    debug!("Reading text file: {}", path.display());
    let bytes = fs::read(&path)
        .await
        .map_err(|e| FileServerError::from_io(e, &path))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| FileServerError::InvalidUtf8(path.display().to_string()))?;
    Ok(text(StatusCode::OK, content))
}

/// GET /api/download - File as an attachment
pub async fn download(state: &AppState, filename: Option<String>) -> Response {
    let Some(filename) = filename else {
        return text(StatusCode::OK, "");
    };

    match download_file(state, &filename).await {
        Ok(response) => response,
        Err(err) => {
            warn!("Failed to download {}: {}", filename, err);
            text(StatusCode::OK, err.to_string())
        }
    }
}

async fn download_file(state: &AppState, filename: &str) -> Result<Response, FileServerError> {
    let path = state.config.join_base().join(filename);
    state.guard(&path)?;

    if !is_file(&path).await {
        return Ok(text(StatusCode::OK, FILE_NOT_FOUND));
    }

    debug!("Downloading file: {}", path.display());
    let body = stream_file(&path).await?;
    let mime = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime),
            (
                header::CONTENT_DISPOSITION,
                attachment_disposition(basename(filename)),
            ),
        ],
        body,
    )
        .into_response())
}

/// `Content-Disposition` for `name`, with control characters replaced so the
/// value is always a valid header.
fn attachment_disposition(name: &str) -> String {
    let name: String = name
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    format!("attachment; filename={name}")
}

/// GET /api/listdir - Directory listing as JSON
pub async fn list_dir(state: &AppState, path: Option<String>) -> Response {
    let Some(path) = path else {
        return json(&ListingError {
            error: "Missing path".to_string(),
        });
    };

    if let Err(err) = state.guard(Path::new(&path)) {
        return json(&ListingError {
            error: err.to_string(),
        });
    }

    if !is_dir(Path::new(&path)).await {
        return json(&ListingError {
            error: FileServerError::NotADirectory(path).to_string(),
        });
    }

    let lister = state.lister.clone();
    let target = path.clone();
    let result = tokio::task::spawn_blocking(move || lister.listing(&target)).await;

    match result {
        Ok(Ok(listing)) => json(&listing),
        Ok(Err(err)) => {
            let err = FileServerError::from_io(err, &path);
            warn!("Failed to list {}: {}", path, err);
            json(&ListingError {
                error: err.to_string(),
            })
        }
        Err(err) => {
            error!("Listing task failed: {}", err);
            json(&ListingError {
                error: err.to_string(),
            })
        }
    }
}

/// GET /api/abspath - Absolute form of a directory path
pub async fn abs_path(state: &AppState, path: Option<String>) -> Response {
    let Some(path) = path else {
        return text(StatusCode::OK, "");
    };
    if let Err(err) = state.guard(Path::new(&path)) {
        return text(StatusCode::OK, err.to_string());
    }
    if !is_dir(Path::new(&path)).await {
        return text(StatusCode::OK, "");
    }
    text(StatusCode::OK, absolutize(Path::new(&path)).display().to_string())
}

/// GET /api/parent - Absolute path of a directory's parent
pub async fn parent(state: &AppState, path: Option<String>) -> Response {
    let Some(path) = path else {
        return text(StatusCode::OK, "");
    };
    if let Err(err) = state.guard(Path::new(&path)) {
        return text(StatusCode::OK, err.to_string());
    }
    if !is_dir(Path::new(&path)).await {
        return text(StatusCode::OK, "");
    }
    let parent = absolutize(Path::new(dirname(&path)));
    text(StatusCode::OK, parent.display().to_string())
}

/// GET .../ - HTML shell
pub async fn index(state: &AppState) -> Response {
    match render_index(&state.config.assets_dir, &state.config.page_title).await {
        Ok(html) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            html,
        )
            .into_response(),
        Err(err) => {
            error!("Failed to render index: {}", err);
            text(StatusCode::OK, err.to_string())
        }
    }
}

/// GET static asset from the assets directory
pub async fn asset(state: &AppState, request_path: &str) -> Response {
    let assets_dir = &state.config.assets_dir;
    let path = assets_dir.join(request_path.trim_start_matches('/'));

    if crate::path_guard::ensure_safe(Some(assets_dir), &path).is_err() {
        return text(StatusCode::NOT_FOUND, FILE_NOT_FOUND);
    }

    match stream_file(&path).await {
        Ok(body) => {
            let mime = mime_guess::from_path(&path)
                .first_or_octet_stream()
                .to_string();
            (StatusCode::OK, [(header::CONTENT_TYPE, mime)], body).into_response()
        }
        Err(err) => {
            error!("Failed to read asset {}: {}", path.display(), err);
            text(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

pub fn not_found() -> Response {
    text(StatusCode::NOT_FOUND, FILE_NOT_FOUND)
}

pub fn unsupported_method() -> Response {
    text(StatusCode::NOT_IMPLEMENTED, "Unsupported method")
}

// ============================================================================
// POST handlers
// ============================================================================

/// POST /api/save - Overwrite a file with the submitted text
pub async fn save(state: &AppState, req: Request) -> Response {
    let form: SaveForm = match parse_form(req, state).await {
        Ok(form) => form,
        Err(response) => return response.into_response(),
    };
    let (Some(filename), Some(contents)) = (form.filename, form.text) else {
        return OperationResponse::failure(MISSING_FILENAME_OR_TEXT).into_response();
    };

    let result = save_text(state, &filename, &contents).await;
    OperationResponse::from_result(result, "File saved successfully")
        .with_file(filename)
        .into_response()
}

async fn save_text(state: &AppState, filename: &str, contents: &str) -> Result<(), FileServerError> {
    let path = Path::new(filename);
    state.guard(path)?;
    info!("Saving file: {} ({} bytes)", filename, contents.len());
    fs::write(path, contents.as_bytes())
        .await
        .map_err(|e| FileServerError::from_io(e, path))
}

/// POST /api/upload - Multipart upload into a directory
///
/// The body is read up to `max_upload_size` before it is parsed. Anything
/// larger is drained and answered with the number of bytes it carried, whether
/// or not the client declared a length.
pub async fn upload(state: &AppState, req: Request) -> Response {
    let limit = state.config.max_upload_size;
    let (parts, body) = req.into_parts();
    let declared = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());

    let buffered = if declared.is_some_and(|length| length > limit) {
        let size = drain_body(body.into_data_stream(), 0).await;
        Err(FileServerError::FileTooLarge { size })
    } else {
        read_limited(body, limit).await
    };

    let data = match buffered {
        Ok(data) => data,
        Err(err) => {
            warn!("Rejected upload (limit {}): {}", limit, err);
            return OperationResponse::failure(err.to_string()).into_response();
        }
    };

    let req = Request::from_parts(parts, Body::from(data));
    let multipart = match Multipart::from_request(req, state).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!("Rejected upload body: {}", rejection.body_text());
            return OperationResponse::failure(rejection.body_text()).into_response();
        }
    };

    let result = store_upload(state, multipart).await;
    OperationResponse::from_result(result, "Upload successful").into_response()
}

/// Collect `body` while it stays within `limit` bytes.
async fn read_limited(body: Body, limit: u64) -> Result<Vec<u8>, FileServerError> {
    let mut stream = body.into_data_stream();
    let mut data = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FileServerError::Multipart(e.to_string()))?;
        let total = (data.len() + chunk.len()) as u64;
        if total > limit {
            let size = drain_body(stream, total).await;
            return Err(FileServerError::FileTooLarge { size });
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

/// Read and discard the rest of a body, returning `read` plus the bytes it
/// still carried.
async fn drain_body(mut stream: BodyDataStream, mut read: u64) -> u64 {
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => read = read.saturating_add(bytes.len() as u64),
            Err(err) => {
                debug!("Upload body ended early: {}", err);
                break;
            }
        }
    }
    read
}

async fn store_upload(state: &AppState, mut multipart: Multipart) -> Result<(), FileServerError> {
    let mut dest_dir: Option<String> = None;
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FileServerError::Multipart(e.body_text()))?
    {
        match field.name() {
            Some("path") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| FileServerError::Multipart(e.body_text()))?;
                dest_dir = Some(value);
            }
            Some("file") => {
                let Some(file_name) = field.file_name().map(str::to_string) else {
                    continue;
                };
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| FileServerError::Multipart(e.body_text()))?;
                upload = Some((file_name, data.to_vec()));
            }
            _ => {}
        }
    }

    let (Some(dest_dir), Some((file_name, data))) = (dest_dir, upload) else {
        return Err(FileServerError::MissingField(MISSING_FILE_OR_PATH));
    };

    let target = PathBuf::from(format!("{dest_dir}{MAIN_SEPARATOR}{file_name}"));
    state.guard(&target)?;

    info!("Uploading file: {} ({} bytes)", target.display(), data.len());
    fs::write(&target, data)
        .await
        .map_err(|e| FileServerError::from_io(e, &target))
}

/// POST /api/rename - Rename an entry within its directory
pub async fn rename(state: &AppState, req: Request) -> Response {
    let form: RenameForm = match parse_form(req, state).await {
        Ok(form) => form,
        Err(response) => return response.into_response(),
    };
    let (Some(src), Some(dst_name)) = (form.src, form.dstfilename) else {
        return OperationResponse::failure(MISSING_FILENAME_OR_TEXT).into_response();
    };

    let target = rename_target(&src, &dst_name);
    let result = rename_entry(state, &src, &target).await;
    OperationResponse::from_result(result, "Rename successful")
        .with_path(target)
        .into_response()
}

async fn rename_entry(state: &AppState, src: &str, target: &str) -> Result<(), FileServerError> {
    state.guard(Path::new(src))?;
    state.guard(Path::new(target))?;
    info!("Renaming: {} -> {}", src, target);
    fs::rename(src, target)
        .await
        .map_err(|e| FileServerError::from_io(e, src))
}

/// POST /api/delete - Remove a file or an empty directory
pub async fn delete(state: &AppState, req: Request) -> Response {
    let form: DeleteForm = match parse_form(req, state).await {
        Ok(form) => form,
        Err(response) => return response.into_response(),
    };
    let Some(path) = form.path else {
        return OperationResponse::failure(MISSING_FILENAME_OR_TEXT).into_response();
    };

    let result = delete_entry(state, &path).await;
    OperationResponse::from_result(result, "Deletion successful")
        .with_path(path)
        .into_response()
}

async fn delete_entry(state: &AppState, path: &str) -> Result<(), FileServerError> {
    let target = Path::new(path);
    state.guard(target)?;

    if state.config.restrict_paths {
        if let Some(base) = state.config.base_dir.as_deref() {
            let canonical_base = crate::path_guard::realpath(base);
            if crate::path_guard::realpath(target) == canonical_base {
                warn!("Attempted to delete base directory: {}", path);
                return Err(FileServerError::InvalidPath(
                    "Cannot delete base directory".to_string(),
                ));
            }
        }
    }

    info!("Deleting: {}", path);
    let result = if is_dir(target).await {
        fs::remove_dir(target).await
    } else {
        fs::remove_file(target).await
    };
    result.map_err(|e| FileServerError::from_io(e, target))
}

/// POST /api/newfolder - Create a directory and any missing parents
pub async fn new_folder(state: &AppState, req: Request) -> Response {
    let form: CreateForm = match parse_form(req, state).await {
        Ok(form) => form,
        Err(response) => return response.into_response(),
    };
    let (Some(base), Some(name)) = (form.path, form.name) else {
        return OperationResponse::failure(GENERIC_FAILURE).into_response();
    };

    let target = Path::new(&base).join(&name);
    let result = create_folder(state, &target).await;
    OperationResponse::from_result(result, "Folder created")
        .with_path(target.display().to_string())
        .into_response()
}

async fn create_folder(state: &AppState, target: &Path) -> Result<(), FileServerError> {
    state.guard(target)?;
    info!("Creating directory: {}", target.display());

    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| FileServerError::from_io(e, parent))?;
    }
    // create_dir, not create_dir_all, so an existing target is an error.
    fs::create_dir(target)
        .await
        .map_err(|e| FileServerError::from_io(e, target))
}

/// POST /api/newfile - Create an empty file, truncating any existing one
pub async fn new_file(state: &AppState, req: Request) -> Response {
    let form: CreateForm = match parse_form(req, state).await {
        Ok(form) => form,
        Err(response) => return response.into_response(),
    };
    let (Some(base), Some(name)) = (form.path, form.name) else {
        return OperationResponse::failure(MISSING_FILENAME_OR_TEXT).into_response();
    };

    let target = Path::new(&base).join(&name);
    let result = create_file(state, &target).await;
    OperationResponse::from_result(result, "File created")
        .with_path(target.display().to_string())
        .into_response()
}

async fn create_file(state: &AppState, target: &Path) -> Result<(), FileServerError> {
    state.guard(target)?;
    info!("Creating file: {}", target.display());
    fs::File::create(target)
        .await
        .map(|_| ())
        .map_err(|e| FileServerError::from_io(e, target))
}

/// POST to any other path
pub fn invalid_method() -> Response {
    OperationResponse::failure("Invalid method").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization_skips_empty_fields() {
        let value = serde_json::to_value(OperationResponse::success("ok")).unwrap();
        assert_eq!(value, serde_json::json!({"error": false, "message": "ok"}));

        let value = serde_json::to_value(
            OperationResponse::failure("bad")
                .with_path("/a")
                .with_file("/b"),
        )
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"error": true, "message": "bad", "path": "/a", "file": "/b"})
        );
    }

    #[test]
    fn test_envelope_from_result() {
        let ok = OperationResponse::from_result(Ok(()), "Done");
        assert!(!ok.error);
        assert_eq!(ok.message, "Done");

        let err = OperationResponse::from_result(
            Err(FileServerError::AlreadyExists("/tmp/x".to_string())),
            "Done",
        );
        assert!(err.error);
        assert_eq!(err.message, "File exists: /tmp/x");
    }

    #[test]
    fn test_attachment_disposition_replaces_control_characters() {
        assert_eq!(
            attachment_disposition("report.txt"),
            "attachment; filename=report.txt"
        );
        let value = attachment_disposition("bad\u{1}name\r\n.txt");
        assert_eq!(value, "attachment; filename=bad_name__.txt");
        assert!(header::HeaderValue::from_str(&value).is_ok());
        assert_eq!(
            attachment_disposition("del\u{7f}.txt"),
            "attachment; filename=del_.txt"
        );
    }

    #[test]
    fn test_json_content_type() {
        let response = OperationResponse::success("ok").into_response();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            JSON_CONTENT_TYPE
        );
        assert_eq!(response.status(), StatusCode::OK);
    }
}
