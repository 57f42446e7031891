use std::sync::OnceLock;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use ftoolbox_store::models::{NewTag, Tag, TagHistory};
use ftoolbox_store::tags::{BannedListFilter, TagListFilter};
use ftoolbox_store::{ranks, relations, statistics, tags};

use super::{parse_history_date, total_pages, unix, unix_opt};
use crate::state::AppState;

fn hashtag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#([\p{L}\p{N}_-]+)").unwrap())
}

/// Pull `#hashtag` labels out of a free-text search query.
fn extract_hashtags(query: &str) -> Vec<String> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let found: Vec<String> = hashtag_pattern()
        .captures_iter(trimmed)
        .map(|c| c[1].to_string())
        .collect();
    if !found.is_empty() {
        return found;
    }

    // A lone leading '#' without a word match still means an exact lookup.
    if let Some(stripped) = trimmed.strip_prefix('#') {
        let label = stripped.trim_start_matches('#');
        if !label.is_empty() {
            return vec![label.to_string()];
        }
    }
    Vec::new()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message})),
    )
        .into_response()
}

fn tag_json(tag: &Tag) -> Value {
    json!({
        "id": tag.id,
        "tag": tag.tag,
        "viewCount": tag.reported_view_count(),
        "postCount": tag.post_count,
        "rank": tag.rank,
        "heat": if tag.is_deleted { 0.0 } else { tag.heat },
        "fanslyCreatedAt": unix(tag.fansly_created_at),
        "lastCheckedAt": unix_opt(tag.last_checked_at),
        "lastUsedForDiscovery": unix_opt(tag.last_used_for_discovery),
        "isDeleted": tag.is_deleted,
        "deletedDetectedAt": unix_opt(tag.deleted_detected_at),
        "createdAt": unix(tag.created_at),
        "updatedAt": unix(tag.updated_at),
    })
}

/// History points for one tag, newest first, with changes recomputed against
/// the next-older point so windowed queries stay self-consistent.
fn history_points(history: &[TagHistory]) -> (Vec<Value>, i64) {
    let points: Vec<Value> = history
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let (change, post_change, change_percent) = match history.get(i + 1) {
                Some(previous) => {
                    let change = point.view_count - previous.view_count;
                    let percent = if previous.view_count > 0 {
                        change as f64 / previous.view_count as f64 * 100.0
                    } else {
                        0.0
                    };
                    (change, point.post_count - previous.post_count, percent)
                }
                None => (0, 0, 0.0),
            };
            json!({
                "id": point.id,
                "tagId": point.tag_id,
                "viewCount": point.view_count,
                "change": change,
                "postCount": point.post_count,
                "postCountChange": post_change,
                "createdAt": unix(point.created_at),
                "updatedAt": unix(point.updated_at),
                "changePercent": change_percent,
            })
        })
        .collect();

    let total_change = match (history.first(), history.last()) {
        (Some(newest), Some(oldest)) => newest.view_count - oldest.view_count,
        _ => 0,
    };

    (points, total_change)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagsQuery {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
    tags: Option<String>,
    sort_order: Option<String>,
    include_history: Option<String>,
    history_start_date: Option<String>,
    history_end_date: Option<String>,
}

pub async fn list_tags(
    State(state): State<AppState>,
    Query(params): Query<TagsQuery>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let limit = match params.limit.unwrap_or(20) {
        l @ 1..=100 => l,
        _ => 20,
    };
    let sort_desc = params.sort_order.as_deref().is_some_and(|s| s.eq_ignore_ascii_case("desc"));
    let include_history = params.include_history.as_deref() == Some("true");

    let mut search = params.search.clone().unwrap_or_default();
    let mut labels: Vec<String> = params
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    // `#hashtags` in the search box act like an exact tags filter.
    if labels.is_empty() {
        let hashtags = extract_hashtags(&search);
        if !hashtags.is_empty() {
            labels = hashtags;
            search.clear();
        } else if let Some(stripped) = search.trim().strip_prefix('#') {
            search = stripped.to_string();
        }
    }

    let filter = TagListFilter {
        page,
        limit,
        search: Some(search.clone()).filter(|s| !s.is_empty()),
        labels,
        sort_desc,
    };

    let (rows, total) = match tags::list_ranked(&state.pool, &filter).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to fetch tags");
            return internal_error("Failed to fetch tags");
        }
    };

    let pagination = json!({
        "page": page,
        "limit": limit,
        "totalCount": total,
        "totalPages": total_pages(total, limit),
    });

    if !include_history {
        let tags_json: Vec<Value> = rows.iter().map(tag_json).collect();
        return Json(json!({"tags": tags_json, "pagination": pagination})).into_response();
    }

    let ids: Vec<String> = rows.iter().map(|t| t.id.clone()).collect();
    let start = params.history_start_date.as_deref().and_then(parse_history_date);
    let end = params.history_end_date.as_deref().and_then(parse_history_date);

    let history = match tags::history_for_tags(&state.pool, &ids, start, end).await {
        Ok(history) => history,
        Err(e) => {
            error!(error = %e, "Failed to fetch tag histories");
            return internal_error("Failed to fetch tag histories");
        }
    };

    let tags_json: Vec<Value> = rows
        .iter()
        .map(|tag| {
            let own: Vec<TagHistory> = history
                .iter()
                .filter(|h| h.tag_id == tag.id)
                .cloned()
                .collect();
            let (points, total_change) = history_points(&own);

            let mut value = tag_json(tag);
            value["history"] = Value::Array(points);
            value["totalChange"] = json!(total_change);
            value
        })
        .collect();

    Json(json!({"tags": tags_json, "pagination": pagination})).into_response()
}

pub async fn tag_statistics(State(state): State<AppState>) -> Response {
    match statistics::latest_tag_statistics(&state.pool).await {
        Ok(Some(stats)) => Json(json!({
            "totalViewCount": stats.total_view_count,
            "totalPostCount": stats.total_post_count,
            "change24h": stats.change_24h,
            "changePercent24h": stats.change_percent_24h,
            "postChange24h": stats.post_change_24h,
            "postChangePercent24h": stats.post_change_percent_24h,
            "calculatedAt": unix(stats.calculated_at),
        }))
        .into_response(),
        Ok(None) => Json(json!({
            "totalViewCount": 0,
            "totalPostCount": 0,
            "change24h": 0,
            "changePercent24h": 0,
            "postChange24h": 0,
            "postChangePercent24h": 0,
            "calculatedAt": null,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to fetch tag statistics");
            internal_error("Failed to fetch tag statistics")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BannedQuery {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
}

pub async fn list_banned(
    State(state): State<AppState>,
    Query(params): Query<BannedQuery>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let limit = match params.limit.unwrap_or(20) {
        l @ 1..=100 => l,
        _ => 20,
    };

    // Hashtags collapse to exact labels for the banned search too.
    let search = params.search.as_deref().unwrap_or_default();
    let search = {
        let hashtags = extract_hashtags(search);
        if let Some(first) = hashtags.first() {
            Some(first.clone())
        } else {
            Some(search.trim().trim_start_matches('#').to_string()).filter(|s| !s.is_empty())
        }
    };

    let filter = BannedListFilter {
        page,
        limit,
        search,
        sort_by: params.sort_by.unwrap_or_else(|| "deletedDetectedAt".to_string()),
        sort_desc: !params
            .sort_order
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("asc")),
    };

    let (rows, total) = match tags::list_banned(&state.pool, &filter).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to fetch banned tags");
            return internal_error("Failed to fetch banned tags");
        }
    };

    let stats = match tags::ban_statistics(&state.pool).await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "Failed to fetch ban statistics");
            return internal_error("Failed to fetch banned tags");
        }
    };

    let tags_json: Vec<Value> = rows.iter().map(tag_json).collect();
    Json(json!({
        "tags": tags_json,
        "pagination": {
            "page": page,
            "limit": limit,
            "totalCount": total,
            "totalPages": total_pages(total, limit),
        },
        "statistics": stats,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedQuery {
    tags: Option<String>,
    limit: Option<usize>,
    window_days: Option<i64>,
    min_view_count: Option<i64>,
    min_coverage: Option<i64>,
}

pub async fn related_tags(
    State(state): State<AppState>,
    Query(params): Query<RelatedQuery>,
) -> Response {
    let inputs: Vec<String> = params
        .tags
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if inputs.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Query param 'tags' is required"})),
        )
            .into_response();
    }

    let sources = match tags::find_by_labels(&state.pool, &inputs).await {
        Ok(sources) => sources,
        Err(e) => {
            error!(error = %e, "Failed to resolve tags");
            return internal_error("Failed to resolve tags");
        }
    };
    if sources.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No matching tags found"})),
        )
            .into_response();
    }

    let source_ids: Vec<String> = sources.iter().map(|t| t.id.clone()).collect();
    let clamped = relations::RelatedParams::clamped(
        params.window_days,
        params.min_view_count,
        params.limit,
        params.min_coverage,
        source_ids.len(),
    );

    let candidates = match relations::related_candidates(&state.pool, &source_ids, &clamped).await {
        Ok(candidates) => candidates,
        Err(e) => {
            error!(error = %e, "Failed to query related tags");
            return internal_error("Failed to fetch related tags");
        }
    };

    let scored = relations::score_candidates(candidates, source_ids.len(), clamped.limit);
    let tags_json: Vec<Value> = scored
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "tag": s.tag,
                "normScore": s.norm_score,
                "coverage": s.coverage,
                "finalScore": s.final_score,
                "score": s.final_score,
            })
        })
        .collect();

    Json(json!({
        "tags": tags_json,
        "source": "computed",
        "mode": "smart",
        "windowDays": clamped.window_days,
        "minViewCount": clamped.min_view_count,
        "minCoverage": clamped.min_coverage,
        "usedTagIds": source_ids,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct RequestTagBody {
    tag: Option<String>,
}

/// Start tracking a tag on demand: resolve it upstream, insert it with its
/// first history row, and hand back the freshly ranked row.
pub async fn request_tag(
    State(state): State<AppState>,
    Json(body): Json<RequestTagBody>,
) -> Response {
    let label = body.tag.unwrap_or_default();
    if label.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Tag is required"})),
        )
            .into_response();
    }

    match tags::find_by_label(&state.pool, &label).await {
        Ok(Some(existing)) => {
            return Json(json!({
                "message": "Tag is already being tracked",
                "tag": tag_json(&existing),
            }))
            .into_response();
        }
        Ok(None) => {}
        Err(e) => {
            error!(error = %e, "Failed to look up tag");
            return internal_error("Failed to look up tag");
        }
    }

    let details = match state.client.get_tag(&state.shutdown, &label).await {
        Ok(details) => details,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Tag not found on Fansly"})),
            )
                .into_response();
        }
    };

    let new_tag = NewTag {
        id: details.tag.id.clone(),
        tag: details.tag.tag.clone(),
        view_count: details.tag.view_count,
        post_count: details.tag.post_count,
        fansly_created_at: details.tag.created_at_utc(),
    };
    if let Err(e) = tags::insert_tracked(&state.pool, &new_tag, Utc::now()).await {
        error!(error = %e, "Failed to create tag");
        return internal_error("Failed to create tag");
    }

    if let Err(e) = ranks::recalculate_tag_ranks(&state.pool).await {
        error!(error = %e, "Failed to calculate ranks");
    }

    match tags::find_by_id(&state.pool, &new_tag.id).await {
        Ok(Some(tag)) => Json(json!({
            "message": "Tag added successfully",
            "tag": tag_json(&tag),
        }))
        .into_response(),
        _ => Json(json!({
            "message": "Tag added successfully",
            "tag": {"id": new_tag.id, "tag": new_tag.tag},
        }))
        .into_response(),
    }
}
