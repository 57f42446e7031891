use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub struct Tag {
    pub id: String,
    pub tag: String,
    pub view_count: i64,
    pub post_count: i64,
    pub rank: Option<i32>,
    pub heat: f64,
    pub fansly_created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_used_for_discovery: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_detected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    /// The view count the API surface reports: zero once the tag is deleted,
    /// while storage keeps the last known value.
    pub fn reported_view_count(&self) -> i64 {
        if self.is_deleted {
            0
        } else {
            self.view_count
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TagHistory {
    pub id: i64,
    pub tag_id: String,
    pub view_count: i64,
    pub change: i64,
    pub post_count: i64,
    pub post_count_change: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TagRelationDaily {
    pub tag_id: String,
    pub related_tag_id: String,
    pub bucket_date: NaiveDate,
    pub co_count: i64,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Creator {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub media_likes: i64,
    pub post_likes: i64,
    pub followers: i64,
    pub image_count: i64,
    pub video_count: i64,
    pub rank: Option<i32>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_detected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CreatorHistory {
    pub id: i64,
    pub creator_id: String,
    pub media_likes: i64,
    pub post_likes: i64,
    pub followers: i64,
    pub image_count: i64,
    pub video_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TagStatistics {
    pub id: i64,
    pub total_view_count: i64,
    pub change_24h: i64,
    pub change_percent_24h: f64,
    pub total_post_count: i64,
    pub post_change_24h: i64,
    pub post_change_percent_24h: f64,
    pub calculated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct CreatorStatistics {
    pub id: i64,
    pub total_followers: i64,
    pub followers_change_24h: i64,
    pub followers_change_percent_24h: f64,
    pub total_media_likes: i64,
    pub media_likes_change_24h: i64,
    pub media_likes_change_percent_24h: f64,
    pub total_post_likes: i64,
    pub post_likes_change_24h: i64,
    pub post_likes_change_percent_24h: f64,
    pub calculated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct WorkerRow {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: i32,
    pub success_count: i32,
    pub failure_count: i32,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert parameters for a tag first seen during discovery or on request.
#[derive(Debug, Clone)]
pub struct NewTag {
    pub id: String,
    pub tag: String,
    pub view_count: i64,
    pub post_count: i64,
    pub fansly_created_at: DateTime<Utc>,
}

/// The metric set a creator refresh writes.
#[derive(Debug, Clone)]
pub struct CreatorMetrics {
    pub username: String,
    pub display_name: String,
    pub media_likes: i64,
    pub post_likes: i64,
    pub followers: i64,
    pub image_count: i64,
    pub video_count: i64,
}
