//! Search predicate construction for the request read path.
//!
//! Criteria compose by conjunction; an absent criterion contributes no
//! clause. Proximity is a bounding rectangle around a centre point, not a
//! true radius, which keeps the query cheap and index-friendly.

use std::collections::HashMap;

use rusqlite::types::ToSql;
use uuid::Uuid;

use porchlight_types::models::RequestStatus;

use crate::models::{PageResult, PhotoRow, RequestRecord};
use crate::queries::{map_request_row, query_photos};
use crate::{Database, StoreResult};

/// Radius applied when the caller omits one or supplies a non-positive
/// value.
const DEFAULT_RADIUS_KM: f64 = 3.0;

/// Kilometres per degree of latitude.
const KM_PER_LAT_DEGREE: f64 = 111.0;
/// Kilometres per degree of longitude at the equator.
const KM_PER_LNG_DEGREE: f64 = 111.321;

#[derive(Debug, Clone, Default)]
pub struct RequestSearch {
    pub status: Option<RequestStatus>,
    pub elderly_id: Option<Uuid>,
    pub near: Option<NearFilter>,
}

#[derive(Debug, Clone)]
pub struct NearFilter {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: Option<f64>,
}

/// Rectangle approximating a radius around a centre point. Requests with no
/// stored coordinates never match.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lng_min: f64,
    pub lng_max: f64,
}

impl BoundingBox {
    /// Half-extents are `r / 111.0` degrees of latitude and
    /// `r / (111.321 * max(1e-6, |cos(lat)|))` degrees of longitude; the
    /// cosine floor keeps the box finite near the poles.
    pub fn around(latitude: f64, longitude: f64, radius_km: Option<f64>) -> Self {
        let radius = match radius_km {
            Some(r) if r > 0.0 => r,
            _ => DEFAULT_RADIUS_KM,
        };
        let lat_extent = radius / KM_PER_LAT_DEGREE;
        let cos_lat = latitude.to_radians().cos();
        let lng_extent = radius / (KM_PER_LNG_DEGREE * cos_lat.abs().max(1.0e-6));
        Self {
            lat_min: latitude - lat_extent,
            lat_max: latitude + lat_extent,
            lng_min: longitude - lng_extent,
            lng_max: longitude + lng_extent,
        }
    }

    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        latitude >= self.lat_min
            && latitude <= self.lat_max
            && longitude >= self.lng_min
            && longitude <= self.lng_max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    Status,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: SortKey,
    pub descending: bool,
}

impl Database {
    /// Run a paged search: one COUNT for the total, one page query, one
    /// batch photo fetch for the page's rows.
    pub fn search_requests(
        &self,
        search: &RequestSearch,
        page: &PageRequest,
    ) -> StoreResult<PageResult> {
        let (where_clause, params) = build_where(search);
        let size = page.size.max(1);
        let offset = u64::from(page.page) * u64::from(size);

        self.with_conn(|conn| {
            let refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

            let count_sql = format!("SELECT COUNT(*) FROM requests{where_clause}");
            let total: u64 = conn.query_row(&count_sql, refs.as_slice(), |row| row.get(0))?;

            let direction = if page.descending { "DESC" } else { "ASC" };
            let select_sql = format!(
                "SELECT id, elderly_id, title, details, status, category, location_lat,
                        location_lng, address, created_at, updated_at, version
                 FROM requests{where_clause}
                 ORDER BY {} {direction}
                 LIMIT {size} OFFSET {offset}",
                page.sort.column(),
            );
            let mut stmt = conn.prepare(&select_sql)?;
            let rows = stmt
                .query_map(refs.as_slice(), map_request_row)?
                .collect::<Result<Vec<_>, _>>()?;

            let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
            let mut by_request: HashMap<String, Vec<PhotoRow>> = HashMap::new();
            for photo in query_photos(conn, &ids)? {
                by_request
                    .entry(photo.request_id.clone())
                    .or_default()
                    .push(photo);
            }

            let items = rows
                .into_iter()
                .map(|request| {
                    let photos = by_request.remove(&request.id).unwrap_or_default();
                    RequestRecord { request, photos }
                })
                .collect();

            Ok(PageResult { items, total })
        })
    }
}

/// Assemble the WHERE clause and its positional parameters. Placeholders
/// are numbered in push order.
fn build_where(search: &RequestSearch) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(status) = search.status {
        params.push(Box::new(status.as_str()));
        clauses.push(format!("status = ?{}", params.len()));
    }

    if let Some(elderly_id) = search.elderly_id {
        params.push(Box::new(elderly_id.to_string()));
        clauses.push(format!("elderly_id = ?{}", params.len()));
    }

    if let Some(near) = &search.near {
        let bbox = BoundingBox::around(near.latitude, near.longitude, near.radius_km);
        clauses.push("location_lat IS NOT NULL AND location_lng IS NOT NULL".to_string());
        params.push(Box::new(bbox.lat_min));
        params.push(Box::new(bbox.lat_max));
        clauses.push(format!(
            "location_lat BETWEEN ?{} AND ?{}",
            params.len() - 1,
            params.len()
        ));
        params.push(Box::new(bbox.lng_min));
        params.push(Box::new(bbox.lng_max));
        clauses.push(format!(
            "location_lng BETWEEN ?{} AND ?{}",
            params.len() - 1,
            params.len()
        ));
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestRow, UserRow};

    #[test]
    fn bounding_box_half_extents_at_declared_constants() {
        let bbox = BoundingBox::around(10.0, 20.0, Some(3.0));

        let lat_extent = (bbox.lat_max - bbox.lat_min) / 2.0;
        let lng_extent = (bbox.lng_max - bbox.lng_min) / 2.0;
        assert!((lat_extent - 3.0 / 111.0).abs() < 1e-9);
        let expected_lng = 3.0 / (111.321 * 10.0_f64.to_radians().cos());
        assert!((lng_extent - expected_lng).abs() < 1e-9);

        // Roughly 0.027 degrees either way at this latitude.
        assert!(bbox.contains(10.02, 20.02));
        assert!(!bbox.contains(10.05, 20.05));
    }

    #[test]
    fn missing_or_non_positive_radius_falls_back_to_default() {
        let default_box = BoundingBox::around(10.0, 20.0, None);
        assert_eq!(default_box, BoundingBox::around(10.0, 20.0, Some(3.0)));
        assert_eq!(default_box, BoundingBox::around(10.0, 20.0, Some(0.0)));
        assert_eq!(default_box, BoundingBox::around(10.0, 20.0, Some(-2.0)));
    }

    #[test]
    fn cosine_floor_keeps_polar_boxes_finite() {
        let bbox = BoundingBox::around(90.0, 0.0, Some(3.0));
        assert!(bbox.lng_max.is_finite());
        assert!(bbox.lng_max > 1_000.0);
    }

    #[test]
    fn empty_search_produces_no_where_clause() {
        let (clause, params) = build_where(&RequestSearch::default());
        assert_eq!(clause, "");
        assert!(params.is_empty());
    }

    fn seed_user(db: &Database, id: &str) {
        db.create_user(&UserRow {
            id: id.to_string(),
            phone: None,
            email: Some(format!("{id}@example.com")),
            display_name: id.to_string(),
            role: "ELDERLY".to_string(),
            volunteer_verified: false,
            password_hash: None,
            created_at: "2026-01-01T00:00:00.000000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000000Z".to_string(),
            version: 0,
        })
        .unwrap();
    }

    fn seed_request(
        db: &Database,
        id: &str,
        elderly_id: &str,
        status: &str,
        lat: Option<f64>,
        lng: Option<f64>,
        created_at: &str,
    ) {
        db.insert_request(
            &RequestRow {
                id: id.to_string(),
                elderly_id: elderly_id.to_string(),
                title: format!("request {id}"),
                details: "details".to_string(),
                status: status.to_string(),
                category: None,
                location_lat: lat,
                location_lng: lng,
                address: None,
                created_at: created_at.to_string(),
                updated_at: created_at.to_string(),
                version: 0,
            },
            &[],
        )
        .unwrap();
    }

    fn page() -> PageRequest {
        PageRequest {
            page: 0,
            size: 20,
            sort: SortKey::CreatedAt,
            descending: true,
        }
    }

    #[test]
    fn filters_compose_by_conjunction() {
        let db = Database::open_in_memory().unwrap();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        seed_user(&db, &owner.to_string());
        seed_user(&db, &other.to_string());

        // Matches every criterion.
        seed_request(
            &db,
            "r1",
            &owner.to_string(),
            "OPEN",
            Some(10.01),
            Some(20.01),
            "2026-01-02T09:00:00.000000Z",
        );
        // Wrong status.
        seed_request(
            &db,
            "r2",
            &owner.to_string(),
            "CANCELLED",
            Some(10.01),
            Some(20.01),
            "2026-01-02T09:01:00.000000Z",
        );
        // Wrong owner.
        seed_request(
            &db,
            "r3",
            &other.to_string(),
            "OPEN",
            Some(10.01),
            Some(20.01),
            "2026-01-02T09:02:00.000000Z",
        );
        // Outside the box.
        seed_request(
            &db,
            "r4",
            &owner.to_string(),
            "OPEN",
            Some(11.0),
            Some(21.0),
            "2026-01-02T09:03:00.000000Z",
        );
        // No coordinates at all.
        seed_request(
            &db,
            "r5",
            &owner.to_string(),
            "OPEN",
            None,
            None,
            "2026-01-02T09:04:00.000000Z",
        );

        let search = RequestSearch {
            status: Some(RequestStatus::Open),
            elderly_id: Some(owner),
            near: Some(NearFilter {
                latitude: 10.0,
                longitude: 20.0,
                radius_km: Some(3.0),
            }),
        };
        let result = db.search_requests(&search, &page()).unwrap();
        assert_eq!(result.total, 1);
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].request.id, "r1");
    }

    #[test]
    fn pages_slice_a_stable_descending_order() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1");
        for i in 0..5 {
            seed_request(
                &db,
                &format!("r{i}"),
                "u1",
                "OPEN",
                None,
                None,
                &format!("2026-01-02T09:0{i}:00.000000Z"),
            );
        }

        let mut first = page();
        first.size = 2;
        let result = db.search_requests(&RequestSearch::default(), &first).unwrap();
        assert_eq!(result.total, 5);
        let ids: Vec<&str> = result.items.iter().map(|r| r.request.id.as_str()).collect();
        assert_eq!(ids, vec!["r4", "r3"]);

        let mut last = first;
        last.page = 2;
        let result = db.search_requests(&RequestSearch::default(), &last).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].request.id, "r0");
    }

    #[test]
    fn page_past_the_end_is_empty_with_total_intact() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1");
        seed_request(&db, "r1", "u1", "OPEN", None, None, "2026-01-02T09:00:00.000000Z");

        let mut past = page();
        past.page = 7;
        let result = db.search_requests(&RequestSearch::default(), &past).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.total, 1);
    }

    #[test]
    fn ascending_sort_by_status_is_supported() {
        let db = Database::open_in_memory().unwrap();
        seed_user(&db, "u1");
        seed_request(&db, "r1", "u1", "OPEN", None, None, "2026-01-02T09:00:00.000000Z");
        seed_request(&db, "r2", "u1", "CANCELLED", None, None, "2026-01-02T09:01:00.000000Z");

        let sorted = PageRequest {
            page: 0,
            size: 20,
            sort: SortKey::Status,
            descending: false,
        };
        let result = db.search_requests(&RequestSearch::default(), &sorted).unwrap();
        let statuses: Vec<&str> = result
            .items
            .iter()
            .map(|r| r.request.status.as_str())
            .collect();
        assert_eq!(statuses, vec!["CANCELLED", "OPEN"]);
    }
}
