use axum::routing::{get, post};
use axum::Router;

use crate::handlers::tasks;
use crate::state::AppState;

/// Routes mounted at `/tasks`.
///
/// ```text
/// POST   /inference       -> submit_inference
/// POST   /mask            -> submit_mask
/// GET    /{task_id}       -> get_task
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/inference", post(tasks::submit_inference))
        .route("/mask", post(tasks::submit_mask))
        .route("/{task_id}", get(tasks::get_task))
}
