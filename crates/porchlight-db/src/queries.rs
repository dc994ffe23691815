use rusqlite::Connection;

use crate::models::{PhotoRow, RequestRecord, RequestRow, UserRow};
use crate::{Database, StoreError, StoreResult};

impl Database {
    // ---- Users ----

    pub fn create_user(&self, user: &UserRow) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, phone, email, display_name, role, volunteer_verified,
                                    password_hash, created_at, updated_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    user.id,
                    user.phone,
                    user.email,
                    user.display_name,
                    user.role,
                    user.volunteer_verified,
                    user.password_hash,
                    user.created_at,
                    user.updated_at,
                    user.version,
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_user_by_id(&self, id: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "phone", phone))
    }

    // ---- Requests ----

    /// Insert a request and its photos in one transaction.
    pub fn insert_request(&self, request: &RequestRow, photos: &[PhotoRow]) -> StoreResult<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO requests (id, elderly_id, title, details, status, category,
                                       location_lat, location_lng, address, created_at,
                                       updated_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    request.id,
                    request.elderly_id,
                    request.title,
                    request.details,
                    request.status,
                    request.category,
                    request.location_lat,
                    request.location_lng,
                    request.address,
                    request.created_at,
                    request.updated_at,
                    request.version,
                ],
            )?;
            for photo in photos {
                tx.execute(
                    "INSERT INTO request_photos (id, request_id, url, content_type, position)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        photo.id,
                        photo.request_id,
                        photo.url,
                        photo.content_type,
                        photo.position,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn find_request(&self, id: &str) -> StoreResult<Option<RequestRecord>> {
        self.with_conn(|conn| {
            let Some(request) = query_request(conn, id)? else {
                return Ok(None);
            };
            let photos = query_photos(conn, std::slice::from_ref(&request.id))?;
            Ok(Some(RequestRecord { request, photos }))
        })
    }

    /// Version-checked status transition. The update applies only if the
    /// stored version still equals `expected_version`; otherwise the row is
    /// re-read to tell a lost race from a missing request.
    pub fn update_request_status(
        &self,
        id: &str,
        status: &str,
        updated_at: &str,
        expected_version: i64,
    ) -> StoreResult<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE requests
                 SET status = ?1, updated_at = ?2, version = version + 1
                 WHERE id = ?3 AND version = ?4",
                rusqlite::params![status, updated_at, id, expected_version],
            )?;
            if changed == 1 {
                return Ok(());
            }
            let exists = conn
                .query_row("SELECT 1 FROM requests WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            if exists {
                Err(StoreError::Conflict("request was modified concurrently"))
            } else {
                Err(StoreError::NotFound("request"))
            }
        })
    }
}

fn query_user(conn: &Connection, column: &'static str, value: &str) -> StoreResult<Option<UserRow>> {
    let sql = format!(
        "SELECT id, phone, email, display_name, role, volunteer_verified, password_hash,
                created_at, updated_at, version
         FROM users WHERE {column} = ?1"
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_row([value], |row| {
        Ok(UserRow {
            id: row.get(0)?,
            phone: row.get(1)?,
            email: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            volunteer_verified: row.get(5)?,
            password_hash: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
            version: row.get(9)?,
        })
    })
    .optional()
}

fn query_request(conn: &Connection, id: &str) -> StoreResult<Option<RequestRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, elderly_id, title, details, status, category, location_lat,
                location_lng, address, created_at, updated_at, version
         FROM requests WHERE id = ?1",
    )?;
    stmt.query_row([id], map_request_row).optional()
}

pub(crate) fn map_request_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get(0)?,
        elderly_id: row.get(1)?,
        title: row.get(2)?,
        details: row.get(3)?,
        status: row.get(4)?,
        category: row.get(5)?,
        location_lat: row.get(6)?,
        location_lng: row.get(7)?,
        address: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        version: row.get(11)?,
    })
}

/// Batch-fetch photos for a set of request ids, ordered by position within
/// each request.
pub(crate) fn query_photos(conn: &Connection, request_ids: &[String]) -> StoreResult<Vec<PhotoRow>> {
    if request_ids.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders: Vec<String> = (1..=request_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, request_id, url, content_type, position
         FROM request_photos
         WHERE request_id IN ({})
         ORDER BY request_id, position",
        placeholders.join(", ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = request_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();
    let photos = stmt
        .query_map(params.as_slice(), |row| {
            Ok(PhotoRow {
                id: row.get(0)?,
                request_id: row.get(1)?,
                url: row.get(2)?,
                content_type: row.get(3)?,
                position: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(photos)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> StoreResult<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> StoreResult<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
