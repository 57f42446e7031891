use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Every upstream payload arrives wrapped in this envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub response: Option<T>,
}

/// A tag as the content-discovery API reports it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanslyTag {
    pub id: String,
    pub tag: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub view_count: i64,
    /// Absent on older response shapes; treated as zero.
    #[serde(default)]
    pub post_count: i64,
    #[serde(default)]
    pub flags: i32,
    /// Milliseconds since the epoch.
    #[serde(default)]
    pub created_at: i64,
}

impl FanslyTag {
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        ms_to_datetime(self.created_at)
    }
}

/// Payload of the tag lookup endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagResponseData {
    pub media_offer_suggestion_tag: Option<FanslyTag>,
    #[serde(default)]
    pub aggregation_data: Option<serde_json::Value>,
}

/// Resolved tag details: the suggestion tag is guaranteed present.
#[derive(Debug, Clone)]
pub struct TagDetails {
    pub tag: FanslyTag,
    pub aggregation_data: Option<serde_json::Value>,
}

/// One media suggestion with the tags attached to it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaOfferSuggestion {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub correlation_id: String,
    #[serde(default)]
    pub post_tags: Vec<FanslyTag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStats {
    #[serde(default)]
    pub image_count: i64,
    #[serde(default)]
    pub video_count: i64,
}

/// An account/creator record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanslyAccount {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub account_media_likes: i64,
    #[serde(default)]
    pub post_likes: i64,
    #[serde(default)]
    pub follow_count: i64,
    #[serde(default)]
    pub timeline_stats: TimelineStats,
}

/// The heterogeneous aggregation block attached to suggestion responses.
/// Only accounts and posts matter here; everything else is passed through
/// untyped and ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationData {
    #[serde(default)]
    pub accounts: Vec<FanslyAccount>,
    #[serde(default)]
    pub posts: Vec<serde_json::Value>,
}

/// Payload of the suggestions endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionsData {
    #[serde(default)]
    pub media_offer_suggestions: Vec<MediaOfferSuggestion>,
    #[serde(default)]
    pub aggregation_data: Option<AggregationData>,
}

/// Convert an upstream millisecond timestamp to an absolute instant.
/// Out-of-range values fall back to now, matching the lenient decoder policy.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_timestamps_convert_to_utc() {
        let ts = ms_to_datetime(1_700_000_000_000);
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(ts.timestamp_subsec_millis(), 0);
    }

    #[test]
    fn tag_decodes_with_missing_post_count() {
        let tag: FanslyTag = serde_json::from_str(
            r#"{"id":"1","tag":"blonde","viewCount":1200,"createdAt":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(tag.post_count, 0);
        assert_eq!(tag.view_count, 1200);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let account: FanslyAccount = serde_json::from_str(
            r#"{
                "id": "9",
                "username": "alice",
                "followCount": 10,
                "subscriptionTiers": [{"id": "x"}],
                "avatar": {"url": "https://example.com/a.jpg"}
            }"#,
        )
        .unwrap();
        assert_eq!(account.follow_count, 10);
        assert_eq!(account.display_name, "");
        assert_eq!(account.timeline_stats.image_count, 0);
    }

    #[test]
    fn suggestions_decode_with_null_aggregation() {
        let data: SuggestionsData = serde_json::from_str(
            r#"{"mediaOfferSuggestions":[{"id":"s1","postTags":[{"id":"t1","tag":"a"}]}],"aggregationData":null}"#,
        )
        .unwrap();
        assert_eq!(data.media_offer_suggestions.len(), 1);
        assert!(data.aggregation_data.is_none());
    }
}
