pub mod job_status;
pub mod row;
pub mod image_job;
pub mod video_job;
pub mod video_job_attempt;

pub use job_status::JobStatus;
