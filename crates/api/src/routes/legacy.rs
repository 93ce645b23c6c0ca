//! Root-level routes with the paths the original Flask service exposed.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// ```text
/// POST   /process_image            -> submit_inference
/// POST   /generate_mask            -> submit_mask
/// GET    /task_status/{task_id}    -> get_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process_image", post(tasks::submit_inference))
        .route("/generate_mask", post(tasks::submit_mask))
        .route("/task_status/{task_id}", get(tasks::get_task))
}
