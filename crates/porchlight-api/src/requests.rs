use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use porchlight_db::models::{PhotoRow, RequestRecord, RequestRow};
use porchlight_db::search::{NearFilter, PageRequest, RequestSearch, SortKey};
use porchlight_db::{StoreError, format_timestamp};
use porchlight_types::api::{
    Claims, CreateRequestBody, PagedResponse, PhotoSnapshot, RequestSnapshot,
};
use porchlight_types::events::{EventKind, RequestEvent};
use porchlight_types::models::{RequestStatus, UserRole};

use crate::error::{ApiError, join_error};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequestsQuery {
    pub status: Option<RequestStatus>,
    pub elderly_id: Option<Uuid>,
    /// Centre point formatted as `<lat>,<lng>`.
    pub near: Option<String>,
    pub radius_km: Option<f64>,
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
    #[serde(default = "default_sort")]
    pub sort: String,
}

fn default_page_size() -> u32 {
    20
}

fn default_sort() -> String {
    "createdAt,DESC".to_string()
}

pub async fn create_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateRequestBody>,
) -> Result<impl IntoResponse, ApiError> {
    validate_create(&body)?;

    let elderly_id = claims.sub;

    // The stored role decides, not the token.
    let db = state.clone();
    let actor = tokio::task::spawn_blocking(move || db.db.find_user_by_id(&elderly_id.to_string()))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::NotFound(format!("Elderly user not found: {elderly_id}")))?;
    if actor.role != UserRole::Elderly.as_str() {
        return Err(ApiError::BusinessRule(
            "Only elderly users can create help requests".to_string(),
        ));
    }

    let request_id = Uuid::new_v4();
    let stamp = format_timestamp(&Utc::now());
    let row = RequestRow {
        id: request_id.to_string(),
        elderly_id: elderly_id.to_string(),
        title: body.title,
        details: body.details,
        status: RequestStatus::Open.as_str().to_string(),
        category: body.category,
        location_lat: body.location_lat,
        location_lng: body.location_lng,
        address: body.address,
        created_at: stamp.clone(),
        updated_at: stamp,
        version: 0,
    };
    let photos: Vec<PhotoRow> = body
        .photos
        .into_iter()
        .enumerate()
        .map(|(position, photo)| PhotoRow {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            url: photo.url,
            content_type: photo.content_type,
            position: position as i64,
        })
        .collect();

    let db = state.clone();
    let record = tokio::task::spawn_blocking(move || -> Result<RequestRecord, StoreError> {
        db.db.insert_request(&row, &photos)?;
        Ok(RequestRecord { request: row, photos })
    })
    .await
    .map_err(join_error)??;

    let snapshot = to_snapshot(&record)?;
    publish(&state, EventKind::RequestCreated, snapshot.clone());

    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn cancel_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let actor_id = claims.sub;

    let db = state.clone();
    let record = tokio::task::spawn_blocking(move || db.db.find_request(&id.to_string()))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::NotFound(format!("Request not found: {id}")))?;

    let status = parse_status(&record.request)?;
    if status.is_terminal() {
        return Err(ApiError::BusinessRule("Request is already finalized".to_string()));
    }

    let db = state.clone();
    let actor = tokio::task::spawn_blocking(move || db.db.find_user_by_id(&actor_id.to_string()))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::NotFound(format!("User not found: {actor_id}")))?;

    let is_owner = record.request.elderly_id == actor_id.to_string();
    let is_admin = actor.role == UserRole::Admin.as_str();
    if !is_owner && !is_admin {
        return Err(ApiError::BusinessRule(
            "Only the owner or an admin can cancel this request".to_string(),
        ));
    }

    // Version-checked transition: of two racing cancels exactly one wins.
    let expected_version = record.request.version;
    let stamp = format_timestamp(&Utc::now());
    let db = state.clone();
    let updated = tokio::task::spawn_blocking(move || -> Result<RequestRecord, StoreError> {
        db.db.update_request_status(
            &id.to_string(),
            RequestStatus::Cancelled.as_str(),
            &stamp,
            expected_version,
        )?;
        db.db
            .find_request(&id.to_string())?
            .ok_or(StoreError::NotFound("request"))
    })
    .await
    .map_err(join_error)??;

    let snapshot = to_snapshot(&updated)?;
    publish(&state, EventKind::RequestCancelled, snapshot.clone());

    Ok(Json(snapshot))
}

pub async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.clone();
    let record = tokio::task::spawn_blocking(move || db.db.find_request(&id.to_string()))
        .await
        .map_err(join_error)??
        .ok_or_else(|| ApiError::NotFound(format!("Request not found: {id}")))?;

    Ok(Json(to_snapshot(&record)?))
}

pub async fn list_requests(
    State(state): State<AppState>,
    Query(query): Query<ListRequestsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let near = parse_near(query.near.as_deref(), query.radius_km)?;
    let search = RequestSearch {
        status: query.status,
        elderly_id: query.elderly_id,
        near,
    };
    let (sort, descending) = parse_sort(&query.sort);
    let page = PageRequest {
        page: query.page,
        size: query.size.clamp(1, 100),
        sort,
        descending,
    };

    let db = state.clone();
    let result = tokio::task::spawn_blocking(move || db.db.search_requests(&search, &page))
        .await
        .map_err(join_error)??;

    let content = result
        .items
        .iter()
        .map(to_snapshot)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(PagedResponse {
        content,
        page: page.page,
        size: page.size,
        total_elements: result.total,
        total_pages: result.total.div_ceil(u64::from(page.size)),
    }))
}

/// Broadcast after commit: one event to the board feed and one to the
/// request's own feed.
fn publish(state: &AppState, kind: EventKind, payload: RequestSnapshot) {
    let request_id = payload.id;
    let event = Arc::new(RequestEvent { kind, payload });
    state.hub.publish_board(Arc::clone(&event));
    state.hub.publish_to_request(request_id, event);
}

fn validate_create(body: &CreateRequestBody) -> Result<(), ApiError> {
    let mut problems: Vec<String> = Vec::new();

    if body.title.trim().is_empty() {
        problems.push("title: must not be blank".to_string());
    } else if body.title.len() > 160 {
        problems.push("title: must be at most 160 characters".to_string());
    }
    if body.details.trim().is_empty() {
        problems.push("details: must not be blank".to_string());
    }
    if body.category.as_deref().is_some_and(|c| c.len() > 64) {
        problems.push("category: must be at most 64 characters".to_string());
    }
    if let Some(lat) = body.location_lat {
        if !(-90.0..=90.0).contains(&lat) {
            problems.push("locationLat: must be between -90 and 90".to_string());
        }
    }
    if let Some(lng) = body.location_lng {
        if !(-180.0..=180.0).contains(&lng) {
            problems.push("locationLng: must be between -180 and 180".to_string());
        }
    }
    if body.address.as_deref().is_some_and(|a| a.len() > 255) {
        problems.push("address: must be at most 255 characters".to_string());
    }
    for (index, photo) in body.photos.iter().enumerate() {
        if photo.url.trim().is_empty() {
            problems.push(format!("photos[{index}].url: must not be blank"));
        } else if photo.url.len() > 512 {
            problems.push(format!("photos[{index}].url: must be at most 512 characters"));
        }
        if photo.content_type.as_deref().is_some_and(|ct| ct.len() > 100) {
            problems.push(format!(
                "photos[{index}].contentType: must be at most 100 characters"
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Validation(problems.join("; ")))
    }
}

/// `near` arrives as `<lat>,<lng>`; anything else is a business-rule
/// rejection rather than a plain parse failure.
fn parse_near(near: Option<&str>, radius_km: Option<f64>) -> Result<Option<NearFilter>, ApiError> {
    let Some(near) = near else { return Ok(None) };
    let parts: Vec<&str> = near.split(',').collect();
    if parts.len() != 2 {
        return Err(ApiError::BusinessRule(
            "near parameter must be formatted as '<lat>,<lng>'".to_string(),
        ));
    }
    match (parts[0].trim().parse::<f64>(), parts[1].trim().parse::<f64>()) {
        (Ok(latitude), Ok(longitude)) => Ok(Some(NearFilter {
            latitude,
            longitude,
            radius_km,
        })),
        _ => Err(ApiError::BusinessRule(
            "near parameter must contain valid decimal coordinates".to_string(),
        )),
    }
}

/// Sort arrives as `<property>[,<direction>]`. Unknown properties fall back
/// to creation time; only the whitelisted keys ever reach the SQL layer.
fn parse_sort(sort: &str) -> (SortKey, bool) {
    let mut tokens = sort.split(',');
    let property = tokens.next().unwrap_or("createdAt");
    let descending = tokens
        .next()
        .is_some_and(|d| d.eq_ignore_ascii_case("DESC"));
    let key = match property {
        "updatedAt" => SortKey::UpdatedAt,
        "status" => SortKey::Status,
        _ => SortKey::CreatedAt,
    };
    (key, descending)
}

fn parse_status(row: &RequestRow) -> Result<RequestStatus, ApiError> {
    RequestStatus::parse(&row.status).ok_or_else(|| {
        ApiError::Internal(anyhow::anyhow!(
            "corrupt status '{}' on request {}",
            row.status,
            row.id
        ))
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, ApiError> {
    value
        .parse()
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("corrupt id '{value}': {e}")))
}

fn parse_timestamp(value: &str, request_id: &str) -> DateTime<Utc> {
    value.parse::<DateTime<Utc>>().unwrap_or_else(|e| {
        warn!("Corrupt timestamp '{value}' on request '{request_id}': {e}");
        DateTime::default()
    })
}

fn to_snapshot(record: &RequestRecord) -> Result<RequestSnapshot, ApiError> {
    let request = &record.request;
    let photos = record
        .photos
        .iter()
        .map(|photo| {
            Ok(PhotoSnapshot {
                photo_id: parse_uuid(&photo.id)?,
                url: photo.url.clone(),
                content_type: photo.content_type.clone(),
            })
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(RequestSnapshot {
        id: parse_uuid(&request.id)?,
        title: request.title.clone(),
        details: request.details.clone(),
        status: parse_status(request)?,
        category: request.category.clone(),
        location_lat: request.location_lat,
        location_lng: request.location_lng,
        address: request.address.clone(),
        elderly_id: parse_uuid(&request.elderly_id)?,
        created_at: parse_timestamp(&request.created_at, &request.id),
        updated_at: parse_timestamp(&request.updated_at, &request.id),
        photos,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use porchlight_types::api::PhotoUpload;

    fn body() -> CreateRequestBody {
        CreateRequestBody {
            title: "Need groceries".to_string(),
            details: "Milk and bread".to_string(),
            category: None,
            location_lat: Some(10.0),
            location_lng: Some(20.0),
            address: None,
            photos: Vec::new(),
        }
    }

    #[test]
    fn valid_body_passes() {
        assert!(validate_create(&body()).is_ok());
    }

    #[test]
    fn validation_reports_every_field_at_once() {
        let mut bad = body();
        bad.title = " ".to_string();
        bad.details = String::new();
        bad.location_lat = Some(95.0);
        bad.photos.push(PhotoUpload {
            url: String::new(),
            content_type: None,
        });

        let err = validate_create(&bad).unwrap_err();
        let ApiError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("title: must not be blank"));
        assert!(message.contains("details: must not be blank"));
        assert!(message.contains("locationLat: must be between -90 and 90"));
        assert!(message.contains("photos[0].url: must not be blank"));
    }

    #[test]
    fn oversized_title_is_rejected() {
        let mut bad = body();
        bad.title = "x".repeat(161);
        assert!(validate_create(&bad).is_err());

        let mut fine = body();
        fine.title = "x".repeat(160);
        assert!(validate_create(&fine).is_ok());
    }

    #[test]
    fn category_and_address_caps_are_enforced() {
        let mut bad = body();
        bad.category = Some("x".repeat(65));
        bad.address = Some("x".repeat(256));

        let err = validate_create(&bad).unwrap_err();
        let ApiError::Validation(message) = err else {
            panic!("expected validation error");
        };
        assert!(message.contains("category: must be at most 64 characters"));
        assert!(message.contains("address: must be at most 255 characters"));

        let mut fine = body();
        fine.category = Some("x".repeat(64));
        fine.address = Some("x".repeat(255));
        assert!(validate_create(&fine).is_ok());
    }

    #[test]
    fn near_parses_a_lat_lng_pair() {
        let filter = parse_near(Some("10.5,-20.25"), Some(2.0)).unwrap().unwrap();
        assert_eq!(filter.latitude, 10.5);
        assert_eq!(filter.longitude, -20.25);
        assert_eq!(filter.radius_km, Some(2.0));

        assert!(parse_near(None, None).unwrap().is_none());
    }

    #[test]
    fn malformed_near_is_a_business_rule_error() {
        assert!(matches!(
            parse_near(Some("10.5"), None),
            Err(ApiError::BusinessRule(_))
        ));
        assert!(matches!(
            parse_near(Some("a,b"), None),
            Err(ApiError::BusinessRule(_))
        ));
        assert!(matches!(
            parse_near(Some("1,2,3"), None),
            Err(ApiError::BusinessRule(_))
        ));
    }

    #[test]
    fn sort_falls_back_to_created_at_descending_stays_explicit() {
        assert_eq!(parse_sort("createdAt,DESC"), (SortKey::CreatedAt, true));
        assert_eq!(parse_sort("updatedAt,asc"), (SortKey::UpdatedAt, false));
        assert_eq!(parse_sort("status"), (SortKey::Status, false));
        assert_eq!(parse_sort("sneaky;DROP"), (SortKey::CreatedAt, false));
        assert_eq!(parse_sort(""), (SortKey::CreatedAt, false));
    }

    #[test]
    fn corrupt_timestamp_degrades_instead_of_failing_the_read() {
        let parsed = parse_timestamp("2026-01-02T09:00:00.000000Z", "r1");
        assert_eq!(parsed.to_rfc3339(), "2026-01-02T09:00:00+00:00");

        // Garbage falls back to the epoch rather than erroring the fetch.
        assert_eq!(parse_timestamp("not-a-time", "r1"), DateTime::<Utc>::default());
    }
}
