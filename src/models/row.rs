use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::job_status::JobStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "rows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // Reference into the spreadsheet (or other source) this row mirrors
    pub external_ref: Option<String>,

    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub status: JobStatus,

    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::image_job::Entity")]
    ImageJobs,
    #[sea_orm(has_many = "super::video_job::Entity")]
    VideoJobs,
}

impl Related<super::image_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ImageJobs.def()
    }
}

impl Related<super::video_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::VideoJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
