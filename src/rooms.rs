//! Resolution of guest-facing room access tokens.
//!
//! The QR code in each room carries an opaque token. Resolving it yields the
//! room identity and the tenant context every other guest operation is scoped
//! to. This is a pure lookup.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

use crate::db::DbState;
use crate::error::PipelineError;

/// Longest token accepted before we even hit the database.
const MAX_TOKEN_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Room {
    pub id: String,
    pub room_number: String,
    pub hotel_id: String,
    pub hotel_name: String,
    pub organization_id: String,
}

/// Resolve an access token to exactly one room.
pub fn resolve_room_token(db: &DbState, token: &str) -> Result<Room, PipelineError> {
    let conn = db
        .conn
        .lock()
        .map_err(|e| PipelineError::Storage(format!("db lock poisoned: {e}")))?;
    resolve_with_conn(&conn, token)
}

pub(crate) fn resolve_with_conn(conn: &Connection, token: &str) -> Result<Room, PipelineError> {
    let token = token.trim();
    if token.is_empty() || token.len() > MAX_TOKEN_LEN {
        return Err(PipelineError::InvalidToken);
    }

    let room = conn
        .query_row(
            "SELECT r.id, r.room_number, r.hotel_id, h.name, r.organization_id
             FROM rooms r
             JOIN hotels h ON h.id = r.hotel_id
             WHERE r.access_token = ?1",
            params![token],
            |row| {
                Ok(Room {
                    id: row.get(0)?,
                    room_number: row.get(1)?,
                    hotel_id: row.get(2)?,
                    hotel_name: row.get(3)?,
                    organization_id: row.get(4)?,
                })
            },
        )
        .optional()?;

    match room {
        Some(room) => Ok(room),
        None => {
            debug!("room token did not match any room");
            Err(PipelineError::InvalidToken)
        }
    }
}

/// Look a room up by its internal identity (staff and scheduler paths).
pub fn get_room_by_id(conn: &Connection, room_id: &str) -> Result<Option<Room>, PipelineError> {
    conn.query_row(
        "SELECT r.id, r.room_number, r.hotel_id, h.name, r.organization_id
         FROM rooms r
         JOIN hotels h ON h.id = r.hotel_id
         WHERE r.id = ?1",
        params![room_id],
        |row| {
            Ok(Room {
                id: row.get(0)?,
                room_number: row.get(1)?,
                hotel_id: row.get(2)?,
                hotel_name: row.get(3)?,
                organization_id: row.get(4)?,
            })
        },
    )
    .optional()
    .map_err(PipelineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use crate::test_fixtures::seed_hotel;

    #[test]
    fn test_resolve_known_token() {
        let db = open_test_db();
        seed_hotel(&db);

        let room = resolve_room_token(&db, "tok-r1").expect("resolve");
        assert_eq!(room.id, "r1");
        assert_eq!(room.room_number, "R1");
        assert_eq!(room.hotel_id, "h1");
        assert_eq!(room.organization_id, "org1");
        assert_eq!(room.hotel_name, "Harbor View");
    }

    #[test]
    fn test_resolve_trims_surrounding_whitespace() {
        let db = open_test_db();
        seed_hotel(&db);

        let room = resolve_room_token(&db, "  tok-r1\n").expect("resolve");
        assert_eq!(room.id, "r1");
    }

    #[test]
    fn test_unknown_or_garbage_token_is_invalid() {
        let db = open_test_db();
        seed_hotel(&db);

        let oversized = "x".repeat(MAX_TOKEN_LEN + 1);
        for token in ["nope", "", "   ", oversized.as_str()] {
            let err = resolve_room_token(&db, token).unwrap_err();
            assert!(matches!(err, PipelineError::InvalidToken), "token {token:?}");
        }
    }

    #[test]
    fn test_get_room_by_id() {
        let db = open_test_db();
        seed_hotel(&db);
        let conn = db.conn.lock().unwrap();

        assert_eq!(
            get_room_by_id(&conn, "r1").unwrap().map(|r| r.room_number),
            Some("R1".to_string())
        );
        assert!(get_room_by_id(&conn, "missing").unwrap().is_none());
    }
}
