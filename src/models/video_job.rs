use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::job_status::JobStatus;

pub const MIN_DURATION_SECS: i32 = 1;
pub const MAX_DURATION_SECS: i32 = 10;
pub const DEFAULT_DURATION_SECS: i32 = 5;

/// Video generation backend a job is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum VideoModel {
    #[sea_orm(string_value = "kling")]
    Kling,
    #[sea_orm(string_value = "veo")]
    Veo,
}

impl std::fmt::Display for VideoModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoModel::Kling => f.write_str("kling"),
            VideoModel::Veo => f.write_str("veo"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "video_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub row_id: Option<Uuid>,
    pub image_job_id: Option<Uuid>,

    // Input
    pub source_image_url: String,
    #[sea_orm(column_type = "Text")]
    pub motion_prompt: String,
    pub duration: i32,

    // Provider routing
    pub model: VideoModel,
    #[sea_orm(indexed)]
    pub external_task_id: Option<String>,

    // Output
    pub video_url: Option<String>,

    pub status: JobStatus,
    pub progress: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
    pub completed_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::row::Entity",
        from = "Column::RowId",
        to = "super::row::Column::Id",
        on_delete = "Cascade"
    )]
    Row,
    #[sea_orm(
        belongs_to = "super::image_job::Entity",
        from = "Column::ImageJobId",
        to = "super::image_job::Column::Id",
        on_delete = "Cascade"
    )]
    SourceImage,
    #[sea_orm(has_many = "super::video_job_attempt::Entity")]
    Attempts,
}

impl Related<super::row::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Row.def()
    }
}

impl Related<super::image_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SourceImage.def()
    }
}

impl Related<super::video_job_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attempts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
