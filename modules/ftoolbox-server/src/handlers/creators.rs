use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use ftoolbox_store::creators::{self, CreatorListFilter};
use ftoolbox_store::models::{Creator, CreatorHistory};
use ftoolbox_store::statistics;

use super::{parse_history_date, total_pages, unix, unix_opt};
use crate::state::AppState;

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": message})),
    )
        .into_response()
}

fn creator_json(creator: &Creator) -> Value {
    json!({
        "id": creator.id,
        "username": creator.username,
        "displayName": creator.display_name,
        "mediaLikes": creator.media_likes,
        "postLikes": creator.post_likes,
        "followers": creator.followers,
        "imageCount": creator.image_count,
        "videoCount": creator.video_count,
        "rank": creator.rank,
        "lastCheckedAt": unix_opt(creator.last_checked_at),
        "isDeleted": creator.is_deleted,
        "deletedDetectedAt": unix_opt(creator.deleted_detected_at),
        "createdAt": unix(creator.created_at),
        "updatedAt": unix(creator.updated_at),
    })
}

fn history_points(history: &[CreatorHistory]) -> Vec<Value> {
    history
        .iter()
        .map(|point| {
            json!({
                "id": point.id,
                "creatorId": point.creator_id,
                "mediaLikes": point.media_likes,
                "postLikes": point.post_likes,
                "followers": point.followers,
                "imageCount": point.image_count,
                "videoCount": point.video_count,
                "createdAt": unix(point.created_at),
                "updatedAt": unix(point.updated_at),
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorsQuery {
    page: Option<i64>,
    limit: Option<i64>,
    search: Option<String>,
    sort_by: Option<String>,
    sort_order: Option<String>,
    include_history: Option<String>,
    history_start_date: Option<String>,
    history_end_date: Option<String>,
}

pub async fn list_creators(
    State(state): State<AppState>,
    Query(params): Query<CreatorsQuery>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let limit = match params.limit.unwrap_or(20) {
        l @ 1..=100 => l,
        _ => 20,
    };

    let filter = CreatorListFilter {
        page,
        limit,
        search: params.search.clone().filter(|s| !s.is_empty()),
        sort_by: params.sort_by.clone().unwrap_or_else(|| "followers".to_string()),
        sort_desc: !params
            .sort_order
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("asc")),
    };

    let (rows, total) = match creators::list_creators(&state.pool, &filter).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to fetch creators");
            return internal_error("Failed to fetch creators");
        }
    };

    let pagination = json!({
        "page": page,
        "limit": limit,
        "totalCount": total,
        "totalPages": total_pages(total, limit),
    });

    if params.include_history.as_deref() != Some("true") {
        let creators_json: Vec<Value> = rows.iter().map(creator_json).collect();
        return Json(json!({"creators": creators_json, "pagination": pagination}))
            .into_response();
    }

    let ids: Vec<String> = rows.iter().map(|c| c.id.clone()).collect();
    let start = params.history_start_date.as_deref().and_then(parse_history_date);
    let end = params.history_end_date.as_deref().and_then(parse_history_date);

    let history = match creators::history_for_creators(&state.pool, &ids, start, end).await {
        Ok(history) => history,
        Err(e) => {
            error!(error = %e, "Failed to fetch creator histories");
            return internal_error("Failed to fetch creator histories");
        }
    };

    let creators_json: Vec<Value> = rows
        .iter()
        .map(|creator| {
            let own: Vec<CreatorHistory> = history
                .iter()
                .filter(|h| h.creator_id == creator.id)
                .cloned()
                .collect();
            let mut value = creator_json(creator);
            value["history"] = Value::Array(history_points(&own));
            value
        })
        .collect();

    Json(json!({"creators": creators_json, "pagination": pagination})).into_response()
}

pub async fn creator_statistics(State(state): State<AppState>) -> Response {
    match statistics::latest_creator_statistics(&state.pool).await {
        Ok(Some(stats)) => Json(json!({
            "totalFollowers": stats.total_followers,
            "followersChange24h": stats.followers_change_24h,
            "followersChangePercent24h": stats.followers_change_percent_24h,
            "totalMediaLikes": stats.total_media_likes,
            "mediaLikesChange24h": stats.media_likes_change_24h,
            "mediaLikesChangePercent24h": stats.media_likes_change_percent_24h,
            "totalPostLikes": stats.total_post_likes,
            "postLikesChange24h": stats.post_likes_change_24h,
            "postLikesChangePercent24h": stats.post_likes_change_percent_24h,
            "calculatedAt": unix(stats.calculated_at),
        }))
        .into_response(),
        Ok(None) => Json(json!({
            "totalFollowers": 0,
            "followersChange24h": 0,
            "followersChangePercent24h": 0,
            "totalMediaLikes": 0,
            "mediaLikesChange24h": 0,
            "mediaLikesChangePercent24h": 0,
            "totalPostLikes": 0,
            "postLikesChange24h": 0,
            "postLikesChangePercent24h": 0,
            "calculatedAt": null,
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to fetch creator statistics");
            internal_error("Failed to fetch creator statistics")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RequestCreatorBody {
    username: Option<String>,
}

/// Start tracking a creator on demand via the shared insert/refresh path.
pub async fn request_creator(
    State(state): State<AppState>,
    Json(body): Json<RequestCreatorBody>,
) -> Response {
    let username = body.username.unwrap_or_default();
    if username.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Username is required"})),
        )
            .into_response();
    }

    let account = match state
        .client
        .get_account_by_username(&state.shutdown, username.trim())
        .await
    {
        Ok(account) => account,
        Err(_) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": "Creator not found on Fansly"})),
            )
                .into_response();
        }
    };

    if let Err(e) = state
        .creator_updater
        .process_accounts(std::slice::from_ref(&account))
        .await
    {
        error!(error = %e, "Failed to store requested creator");
        return internal_error("Failed to create creator");
    }

    match creators::find_by_id(&state.pool, &account.id).await {
        Ok(Some(creator)) => Json(json!({
            "message": "Creator added successfully",
            "creator": creator_json(&creator),
        }))
        .into_response(),
        _ => Json(json!({
            "message": "Creator added successfully",
            "creator": {"id": account.id, "username": account.username},
        }))
        .into_response(),
    }
}
