use crate::models::JobStatus;
use crate::services::providers::ProviderTaskStatus;

pub const DEFAULT_FAILURE_MESSAGE: &str = "Video generation failed";

/// What a provider task status means for one of our jobs
#[derive(Clone, Debug, PartialEq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub progress: i32,
    pub video_url: Option<String>,
    pub error: Option<String>,
}

/// Stage and progress for a raw provider status; unknown values count as still running
pub fn map_provider_status(raw: &str) -> (JobStatus, i32) {
    match raw {
        "submitted" => (JobStatus::Pending, 0),
        "processing" => (JobStatus::Processing, 50),
        "succeed" => (JobStatus::Completed, 100),
        "failed" => (JobStatus::Failed, 0),
        _ => (JobStatus::Processing, 50),
    }
}

/// Translate a provider task status into our lifecycle vocabulary.
///
/// The artifact URL is only surfaced when the provider explicitly reports
/// success, and the error text only when it explicitly reports failure.
pub fn reconcile(task: &ProviderTaskStatus) -> StatusUpdate {
    let (status, progress) = map_provider_status(&task.status);

    let video_url = match status {
        JobStatus::Completed => task.video_url.clone(),
        _ => None,
    };

    let error = match status {
        JobStatus::Failed => Some(
            task.status_message
                .clone()
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string()),
        ),
        _ => None,
    };

    StatusUpdate {
        status,
        progress,
        video_url,
        error,
    }
}
