use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::job_status::JobStatus;

pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";
pub const DEFAULT_IMAGE_SIZE: &str = "1024x1024";
pub const SUPPORTED_IMAGE_SIZES: [&str; 3] = ["1024x1024", "1792x1024", "1024x1792"];

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "image_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub row_id: Option<Uuid>,

    // Input
    #[sea_orm(column_type = "Text")]
    pub prompt: String,
    pub reference_image_url: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub yaml_content: Option<String>,

    // Output
    pub image_url: Option<String>,

    pub status: JobStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub model: String,
    pub size: String,

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
    #[sea_orm(has_many = "super::video_job::Entity")]
    VideoJobs,
}

impl Related<super::row::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Row.def()
    }
}

impl Related<super::video_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VideoJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
