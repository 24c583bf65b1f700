//! HTTP route handlers for the workbench API.

use std::io::Write;
use std::path::PathBuf;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use tracing::info;
use workbench::core::run::{RunId, RunStatus};
use workbench::io::archive::CONTENT_TYPE;
use workbench::io::backup::BackupReport;
use workbench::io::project_index::ProjectRecord;

use crate::error::ApiError;
use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/projects", get(list_projects).post(create_project))
        .route("/projects/{project}/files", get(list_files))
        .route(
            "/projects/{project}/file",
            get(read_file).put(save_file).delete(delete_file),
        )
        .route("/projects/{project}/upload", post(upload_file))
        .route("/projects/{project}/archive", get(download_archive))
        .route("/projects/{project}/run", post(run_file))
        .route("/projects/{project}/backup", post(backup))
        .route("/terminal", post(run_command))
        .route("/runs/{run_id}", get(run_status))
        .route("/runs/{run_id}/kill", post(kill_run))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/projects - known projects with creation time.
async fn list_projects(State(state): State<AppState>) -> Json<Vec<ProjectRecord>> {
    Json(state.workbench.projects())
}

#[derive(Deserialize)]
struct CreateProject {
    name: String,
}

#[derive(Serialize)]
struct CreatedProject {
    name: String,
    path: PathBuf,
}

/// POST /api/projects - create (or touch) a project.
async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProject>,
) -> Result<Json<CreatedProject>, ApiError> {
    let path = state.workbench.create_project(&body.name)?;
    let name = state.workbench.guard().project(Some(&body.name)).name;
    Ok(Json(CreatedProject { name, path }))
}

#[derive(Serialize)]
struct FileList {
    files: Vec<String>,
}

/// GET /api/projects/:project/files - every file, relative to the root.
async fn list_files(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<FileList>, ApiError> {
    let files = state.workbench.list_files(Some(&project))?;
    Ok(Json(FileList { files }))
}

#[derive(Deserialize)]
struct FileQuery {
    path: String,
}

/// GET /api/projects/:project/file?path= - raw file content.
async fn read_file(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<Vec<u8>, ApiError> {
    Ok(state.workbench.read_file(Some(&project), &query.path)?)
}

/// PUT /api/projects/:project/file?path= - overwrite with the request body.
async fn save_file(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<FileQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.workbench.save_file(Some(&project), &query.path, &body)?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/projects/:project/file?path=
async fn delete_file(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<FileQuery>,
) -> Result<StatusCode, ApiError> {
    state.workbench.delete_file(Some(&project), &query.path)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct Uploaded {
    files: Vec<String>,
}

/// POST /api/projects/:project/upload - multipart; every file field is placed
/// in the project root under its base name.
async fn upload_file(
    State(state): State<AppState>,
    Path(project): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Uploaded>, ApiError> {
    let spool_dir = state.workbench.guard().projects_dir().to_path_buf();
    let mut files = Vec::new();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(e.to_string()))?
    {
        let Some(original) = field.file_name().map(str::to_string) else {
            continue;
        };
        // Spool next to the projects so placing the file is usually a rename.
        let mut temp = tempfile::NamedTempFile::new_in(&spool_dir)
            .map_err(|e| ApiError::internal(format!("create upload temp file: {e}")))?;
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(e.to_string()))?
        {
            temp.write_all(&chunk)
                .map_err(|e| ApiError::internal(format!("spool upload: {e}")))?;
        }
        let temp_path = temp.into_temp_path();
        let dest = state
            .workbench
            .upload_file(Some(&project), &temp_path, &original)?;
        if let Some(name) = dest.file_name() {
            files.push(name.to_string_lossy().into_owned());
        }
    }
    if files.is_empty() {
        return Err(ApiError::bad_request("no file field in upload"));
    }
    Ok(Json(Uploaded { files }))
}

/// GET /api/projects/:project/archive - streamed zip of the project.
async fn download_archive(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Response, ApiError> {
    let stream = state.workbench.download_archive(Some(&project))?;
    let name = state.workbench.guard().project(Some(&project)).name;
    let disposition = format!("attachment; filename=\"{name}.zip\"");
    Ok((
        [
            (header::CONTENT_TYPE, CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

#[derive(Deserialize)]
struct RunFileRequest {
    path: String,
}

#[derive(Serialize)]
struct Started {
    run_id: RunId,
}

/// POST /api/projects/:project/run - start a file; output arrives on /events.
async fn run_file(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<RunFileRequest>,
) -> Result<Json<Started>, ApiError> {
    let run_id = state.workbench.run_file(Some(&project), &body.path)?;
    info!(%run_id, project = %project, path = %body.path, "run accepted");
    Ok(Json(Started { run_id }))
}

#[derive(Deserialize)]
struct CommandRequest {
    command: String,
    project: Option<String>,
    cwd: Option<String>,
}

/// POST /api/terminal - run a free-form command line.
async fn run_command(
    State(state): State<AppState>,
    Json(body): Json<CommandRequest>,
) -> Result<Json<Started>, ApiError> {
    if body.command.trim().is_empty() {
        return Err(ApiError::bad_request("command must not be empty"));
    }
    let run_id = state.workbench.run_command(
        &body.command,
        body.project.as_deref(),
        body.cwd.as_deref(),
    )?;
    Ok(Json(Started { run_id }))
}

/// GET /api/runs/:id - status of a live run; finished runs are 404.
async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<RunId>,
) -> Result<Json<RunStatus>, StatusCode> {
    state
        .workbench
        .run_status(run_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /api/runs/:id/kill - always succeeds.
async fn kill_run(State(state): State<AppState>, Path(run_id): Path<RunId>) -> StatusCode {
    state.workbench.kill_run(run_id);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct BackupRequest {
    token: String,
}

/// POST /api/projects/:project/backup - create a remote repo and push to it.
async fn backup(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Json(body): Json<BackupRequest>,
) -> Result<Json<BackupReport>, ApiError> {
    let report = state
        .workbench
        .backup_to_remote(Some(&project), &body.token)
        .await?;
    Ok(Json(report))
}
