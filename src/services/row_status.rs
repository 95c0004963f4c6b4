use chrono::Utc;
use sea_orm::*;
use uuid::Uuid;

use crate::models::{image_job, row, video_job, JobStatus};

/// Fold the statuses of a row's jobs into the row's own status.
///
/// Returns `None` for a row without jobs, which keeps whatever status it has.
pub fn aggregate_status<I>(children: I) -> Option<JobStatus>
where
    I: IntoIterator<Item = JobStatus>,
{
    let mut total = 0;
    let mut pending = 0;
    let mut processing = 0;
    let mut failed = 0;

    for status in children {
        total += 1;
        match status {
            JobStatus::Pending => pending += 1,
            JobStatus::Processing => processing += 1,
            JobStatus::Failed => failed += 1,
            JobStatus::Completed => {}
        }
    }

    if total == 0 {
        None
    } else if processing > 0 {
        Some(JobStatus::Processing)
    } else if pending == total {
        Some(JobStatus::Pending)
    } else if pending > 0 {
        Some(JobStatus::Processing)
    } else if failed > 0 {
        Some(JobStatus::Failed)
    } else {
        Some(JobStatus::Completed)
    }
}

/// Recompute and persist the status of a row from its jobs
pub async fn refresh_row_status<C>(db: &C, row_id: Uuid) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let Some(row_model) = row::Entity::find_by_id(row_id).one(db).await? else {
        return Ok(());
    };

    let image_statuses: Vec<JobStatus> = image_job::Entity::find()
        .select_only()
        .column(image_job::Column::Status)
        .filter(image_job::Column::RowId.eq(row_id))
        .into_tuple()
        .all(db)
        .await?;

    let video_statuses: Vec<JobStatus> = video_job::Entity::find()
        .select_only()
        .column(video_job::Column::Status)
        .filter(video_job::Column::RowId.eq(row_id))
        .into_tuple()
        .all(db)
        .await?;

    let Some(status) = aggregate_status(image_statuses.into_iter().chain(video_statuses)) else {
        return Ok(());
    };

    if status == row_model.status {
        return Ok(());
    }

    log::debug!("Row {} status {} -> {}", row_id, row_model.status, status);

    let mut active_row: row::ActiveModel = row_model.into();
    active_row.status = Set(status);
    active_row.updated_at = Set(Utc::now());
    active_row.update(db).await?;

    Ok(())
}
