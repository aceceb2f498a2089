// Raw form submissions (client requests, interpreter applications) and their
// conversion into contacts by the submission watcher.

pub mod convert;
pub mod handlers;
pub mod watcher;

pub use watcher::SubmissionWatcher;

use serde_json::Value;
use tracing::info;

use crate::errors::AppError;
use crate::models::submission::{Submission, SubmissionKind};
use crate::store::Store;

/// Stores a raw submission for later conversion. The form body is kept as-is
/// once it passes the minimal identity checks.
pub async fn submit(
    store: &dyn Store,
    kind: SubmissionKind,
    payload: Value,
) -> Result<Submission, AppError> {
    convert::validate_form(kind, &payload)?;
    let submission = Submission::new(kind, payload);
    store.insert_submission(&submission).await?;
    info!("Received {} submission {}", kind.as_str(), submission.id);
    Ok(submission)
}
