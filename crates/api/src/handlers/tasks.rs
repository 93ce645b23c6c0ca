//! Handlers for task submission and status polling.
//!
//! Submissions return `202 Accepted` with the new task handle as soon as
//! the job is queued. Job failures never surface here; they are only
//! visible through the status endpoint.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use inpaint_core::error::CoreError;
use inpaint_core::types::TaskId;
use inpaint_pipeline::jobs::{inference_job, mask_job};
use inpaint_pipeline::{InferenceJobRequest, JobKind, MaskRequest, Task};
use serde::Serialize;
use validator::Validate;

use crate::error::AppResult;
use crate::state::AppState;

/// Body of a `202 Accepted` submission response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub message: &'static str,
    pub task_id: TaskId,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/tasks/inference (also POST /process_image)
pub async fn submit_inference(
    State(state): State<AppState>,
    payload: Result<Json<InferenceJobRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload?;
    request.validate()?;

    let task_id = state
        .executor
        .submit(JobKind::Inference, inference_job(state.jobs.clone(), request))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            message: "Processing started",
            task_id,
        }),
    ))
}

/// POST /api/v1/tasks/mask (also POST /generate_mask)
pub async fn submit_mask(
    State(state): State<AppState>,
    payload: Result<Json<MaskRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(request) = payload?;
    request.validate()?;

    let task_id = state
        .executor
        .submit(JobKind::Mask, mask_job(state.jobs.clone(), request))
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            message: "Mask generation started",
            task_id,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/tasks/{task_id} (also GET /task_status/{task_id})
///
/// A handle that does not parse is reported the same way as one that was
/// never issued.
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<Task>> {
    let id: TaskId = task_id.parse().map_err(|_| CoreError::NotFound {
        entity: "task",
        id: task_id.clone(),
    })?;
    Ok(Json(state.registry().status(id).await?))
}
