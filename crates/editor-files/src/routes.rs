//! Endpoint dispatch.
//!
//! Endpoints match on the suffix of the request path so the editor keeps
//! working when it is mounted below a prefix (`/tools/editor/api/file`).

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, Request, State},
    http::Method,
    response::Response,
};
use serde::de::DeserializeOwned;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::handlers::{self, FilenameQuery, PathQuery};

/// File suffixes served from the assets directory.
pub const ASSET_SUFFIXES: &[&str] = &[".css", ".eot", ".ttf", ".woff", ".woff2", ".js"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    File,
    Download,
    ListDir,
    AbsPath,
    Parent,
    Index,
    Asset,
    NotFound,
    Save,
    Upload,
    Rename,
    Delete,
    NewFolder,
    NewFile,
    InvalidMethod,
    Unsupported,
}

impl Endpoint {
    /// Select the endpoint for a method and request path.
    pub fn classify(method: &Method, path: &str) -> Self {
        if method == Method::GET {
            Self::classify_get(path)
        } else if method == Method::POST {
            Self::classify_post(path)
        } else {
            Self::Unsupported
        }
    }

    fn classify_get(path: &str) -> Self {
        if path.ends_with("/api/file") {
            Self::File
        } else if path.ends_with("/api/download") {
            Self::Download
        } else if path.ends_with("/api/listdir") {
            Self::ListDir
        } else if path.ends_with("/api/abspath") {
            Self::AbsPath
        } else if path.ends_with("/api/parent") {
            Self::Parent
        } else if path.ends_with('/') {
            Self::Index
        } else if ASSET_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
            Self::Asset
        } else {
            Self::NotFound
        }
    }

    fn classify_post(path: &str) -> Self {
        if path.ends_with("/api/save") {
            Self::Save
        } else if path.ends_with("/api/upload") {
            Self::Upload
        } else if path.ends_with("/api/rename") {
            Self::Rename
        } else if path.ends_with("/api/delete") {
            Self::Delete
        } else if path.ends_with("/api/newfolder") {
            Self::NewFolder
        } else if path.ends_with("/api/newfile") {
            Self::NewFile
        } else {
            Self::InvalidMethod
        }
    }
}

/// Create the editor routes
pub fn editor_routes() -> Router<AppState> {
    Router::new().fallback(dispatch)
}

/// Full application router with state and middleware applied.
pub fn app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);
    editor_routes()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Query values, or all-absent when the query string does not parse.
fn query<T: DeserializeOwned + Default>(req: &Request) -> T {
    Query::<T>::try_from_uri(req.uri())
        .map(|Query(value)| value)
        .unwrap_or_default()
}

async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    let endpoint = Endpoint::classify(req.method(), &path);

    match endpoint {
        Endpoint::File => {
            let filename = query::<FilenameQuery>(&req).filename;
            handlers::get_file(&state, filename).await
        }
        Endpoint::Download => {
            let filename = query::<FilenameQuery>(&req).filename;
            handlers::download(&state, filename).await
        }
        Endpoint::ListDir => {
            let dir = query::<PathQuery>(&req).path;
            handlers::list_dir(&state, dir).await
        }
        Endpoint::AbsPath => {
            let dir = query::<PathQuery>(&req).path;
            handlers::abs_path(&state, dir).await
        }
        Endpoint::Parent => {
            let dir = query::<PathQuery>(&req).path;
            handlers::parent(&state, dir).await
        }
        Endpoint::Index => handlers::index(&state).await,
        Endpoint::Asset => handlers::asset(&state, &path).await,
        Endpoint::NotFound => handlers::not_found(),
        Endpoint::Save => handlers::save(&state, req).await,
        Endpoint::Upload => handlers::upload(&state, req).await,
        Endpoint::Rename => handlers::rename(&state, req).await,
        Endpoint::Delete => handlers::delete(&state, req).await,
        Endpoint::NewFolder => handlers::new_folder(&state, req).await,
        Endpoint::NewFile => handlers::new_file(&state, req).await,
        Endpoint::InvalidMethod => handlers::invalid_method(),
        Endpoint::Unsupported => handlers::unsupported_method(),
    }
}
