use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A finished submission cycle of a video job, archived when the job is retried
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "video_job_attempts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub video_job_id: Uuid,
    pub attempt_number: i32,

    pub external_task_id: Option<String>,
    pub progress: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    // When the attempt was archived by a retry
    pub archived_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::video_job::Entity",
        from = "Column::VideoJobId",
        to = "super::video_job::Column::Id",
        on_delete = "Cascade"
    )]
    VideoJob,
}

impl Related<super::video_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VideoJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
