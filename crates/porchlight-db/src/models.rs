//! Row types mapping one-to-one onto the SQLite schema. Kept separate from
//! the wire-facing shapes in `porchlight-types`; the API layer does the
//! translation.

pub struct UserRow {
    pub id: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub display_name: String,
    pub role: String,
    pub volunteer_verified: bool,
    pub password_hash: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

pub struct RequestRow {
    pub id: String,
    pub elderly_id: String,
    pub title: String,
    pub details: String,
    pub status: String,
    pub category: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub address: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub version: i64,
}

pub struct PhotoRow {
    pub id: String,
    pub request_id: String,
    pub url: String,
    pub content_type: Option<String>,
    pub position: i64,
}

/// A request row together with its photos, ordered by position.
pub struct RequestRecord {
    pub request: RequestRow,
    pub photos: Vec<PhotoRow>,
}

/// One page of search results plus the total match count across all pages.
pub struct PageResult {
    pub items: Vec<RequestRecord>,
    pub total: u64,
}
