//! Conversion between backend payloads and typed records
//!
//! Payloads are loosely shaped: ids may arrive as `id` or `serverId`,
//! timestamps as Unix milliseconds or PocketBase date strings, cleared
//! relations as `""`. Everything is normalized here so that nothing
//! untyped reaches the store.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};

use crate::models::{Collection, Record, RecordMeta, ServerId};
use crate::remote::RemoteRecord;
use crate::{Error, Result};

const POCKETBASE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.fZ";

/// Backend bookkeeping that is never replicated
const SYSTEM_KEYS: &[&str] = &[
    "id",
    "serverId",
    "created",
    "createdAt",
    "updated",
    "updatedAt",
    "collectionId",
    "collectionName",
    "expand",
    "emailVisibility",
    "verified",
    "username",
    "avatar",
    "password",
    "passwordConfirm",
    "tokenKey",
];

/// Local metadata columns, stripped before a record is sent
const META_KEYS: &[&str] = &[
    "local_id",
    "server_id",
    "created_at",
    "updated_at",
    "is_deleted",
    "sync_status",
];

/// Local field name → backend field name
const RENAMES: &[(Collection, &str, &str)] = &[
    (Collection::Lists, "list_type", "type"),
    (Collection::ListItems, "is_checked", "checked"),
];

/// Fields holding a point in time, stored locally as Unix ms
const DATE_FIELDS: &[(Collection, &str)] = &[
    (Collection::LocationHistory, "timestamp"),
    (Collection::Members, "last_location_at"),
];

const INTEGER_FIELDS: &[&str] = &["sort_order"];

fn invalid(collection: Collection, reason: impl Into<String>) -> Error {
    Error::InvalidRecord {
        collection: collection.table(),
        reason: reason.into(),
    }
}

/// Parse a timestamp given as Unix ms or as a date string.
#[allow(clippy::cast_possible_truncation)]
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|millis| millis as i64)),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            NaiveDateTime::parse_from_str(text, POCKETBASE_DATE_FORMAT)
                .map(|date| date.and_utc().timestamp_millis())
                .or_else(|_| {
                    DateTime::parse_from_rfc3339(text).map(|date| date.timestamp_millis())
                })
                .ok()
                .or_else(|| text.parse().ok())
        }
        _ => None,
    }
}

fn format_timestamp(millis: i64) -> Option<String> {
    DateTime::from_timestamp_millis(millis)
        .map(|date| date.format("%Y-%m-%d %H:%M:%S%.3fZ").to_string())
}

/// Server id of a payload, if it has a usable one
pub fn server_id(remote: &RemoteRecord) -> Option<ServerId> {
    ["id", "serverId"]
        .iter()
        .filter_map(|key| remote.get(*key).and_then(Value::as_str))
        .find_map(|id| id.parse().ok())
}

/// Last modification time of a payload
pub fn updated_at(remote: &RemoteRecord) -> Option<i64> {
    ["updated", "updatedAt"]
        .iter()
        .filter_map(|key| remote.get(*key))
        .find_map(parse_timestamp)
}

fn local_name(collection: Collection, key: &str) -> &str {
    RENAMES
        .iter()
        .find(|(owner, _, remote)| *owner == collection && *remote == key)
        .map_or(key, |(_, local, _)| *local)
}

fn remote_name(collection: Collection, key: &str) -> &str {
    RENAMES
        .iter()
        .find(|(owner, local, _)| *owner == collection && *local == key)
        .map_or(key, |(_, _, remote)| *remote)
}

fn is_date_field(collection: Collection, key: &str) -> bool {
    DATE_FIELDS
        .iter()
        .any(|(owner, field)| *owner == collection && *field == key)
}

/// Decode a backend payload into a typed record with fresh synced metadata.
///
/// The local id is new; merging maps the record onto an existing row
/// through its server id.
#[allow(clippy::cast_possible_truncation)]
pub fn decode_record(collection: Collection, remote: &RemoteRecord) -> Result<Record> {
    let server_id = server_id(remote).ok_or_else(|| invalid(collection, "missing id"))?;
    let updated = updated_at(remote)
        .ok_or_else(|| invalid(collection, format!("record {server_id} has no update time")))?;
    let created = ["created", "createdAt"]
        .iter()
        .filter_map(|key| remote.get(*key))
        .find_map(parse_timestamp)
        .unwrap_or(updated);

    let mut fields = Map::new();
    for (key, value) in remote {
        if SYSTEM_KEYS.contains(&key.as_str()) || value.is_null() || value.as_str() == Some("") {
            continue;
        }
        let key = local_name(collection, key);
        let value = if is_date_field(collection, key) {
            let millis = parse_timestamp(value)
                .ok_or_else(|| invalid(collection, format!("{key} is not a timestamp")))?;
            Value::from(millis)
        } else if INTEGER_FIELDS.contains(&key) {
            value
                .as_f64()
                .filter(|number| number.fract() == 0.0)
                .map_or_else(|| value.clone(), |number| Value::from(number as i64))
        } else {
            value.clone()
        };
        fields.insert(key.to_string(), value);
    }

    let meta = RecordMeta::synced(server_id, created, updated);
    if let Value::Object(meta) = serde_json::to_value(&meta)? {
        fields.extend(meta);
    }

    Record::from_value(collection, Value::Object(fields))
        .map_err(|error| invalid(collection, error.to_string()))
}

/// Encode a record as a backend payload carrying its server id.
pub fn encode_record(record: &Record) -> Result<RemoteRecord> {
    let collection = record.collection();
    let Value::Object(stored) = record.to_value()? else {
        return Err(invalid(collection, "record is not an object"));
    };

    let mut fields = RemoteRecord::new();
    fields.insert("id".to_string(), Value::from(record.server_id().as_str()));
    for (key, value) in stored {
        if META_KEYS.contains(&key.as_str()) {
            continue;
        }
        let value = match value {
            Value::Null => Value::from(""),
            Value::Number(millis) if is_date_field(collection, &key) => millis
                .as_i64()
                .and_then(format_timestamp)
                .map_or(Value::from(""), Value::from),
            other => other,
        };
        fields.insert(remote_name(collection, &key).to_string(), value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{List, ListItem, ListType, LocationHistory, Member, Model, RowState};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn payload(value: Value) -> RemoteRecord {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn parses_backend_date_formats() {
        assert_eq!(parse_timestamp(&json!(1_700_000_000_000_i64)), Some(1_700_000_000_000));
        assert_eq!(
            parse_timestamp(&json!("2024-01-02 10:00:00.000Z")),
            Some(1_704_189_600_000)
        );
        assert_eq!(
            parse_timestamp(&json!("2024-01-02T10:00:00Z")),
            Some(1_704_189_600_000)
        );
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn decodes_list_with_backend_names() {
        let record = decode_record(
            Collection::Lists,
            &payload(json!({
                "id": "l1",
                "collectionName": "lists",
                "family_id": "f1",
                "name": "Groceries",
                "type": "shopping",
                "status": "active",
                "sort_order": 2.0,
                "assigned_to": "",
                "created": "2024-01-02 09:00:00.000Z",
                "updated": "2024-01-02 10:00:00.000Z"
            })),
        )
        .unwrap();

        let list: List = record.into_model().unwrap();
        assert_eq!(list.meta.server_id.as_str(), "l1");
        assert_eq!(list.meta.updated_at, 1_704_189_600_000);
        assert_eq!(list.meta.created_at, 1_704_186_000_000);
        assert_eq!(list.meta.sync_status, RowState::Synced);
        assert_eq!(list.list_type, ListType::Shopping);
        assert_eq!(list.sort_order, 2);
        assert_eq!(list.assigned_to, None);
    }

    #[test]
    fn decodes_camel_case_envelope_fields() {
        let record = decode_record(
            Collection::ListItems,
            &payload(json!({
                "serverId": "i1",
                "list_id": "l1",
                "name": "Milk",
                "checked": true,
                "updatedAt": 5
            })),
        )
        .unwrap();

        let item: ListItem = record.into_model().unwrap();
        assert_eq!(item.meta.server_id.as_str(), "i1");
        assert_eq!(item.meta.created_at, 5);
        assert!(item.is_checked);
    }

    #[test]
    fn converts_date_fields_to_millis() {
        let point: LocationHistory = decode_record(
            Collection::LocationHistory,
            &payload(json!({
                "id": "p1",
                "user_id": "u1",
                "lat": 52.1,
                "lng": 4.3,
                "timestamp": "2024-01-02 10:00:00.000Z",
                "updated": 1
            })),
        )
        .unwrap()
        .into_model()
        .unwrap();
        assert_eq!(point.timestamp, 1_704_189_600_000);

        let member: Member = decode_record(
            Collection::Members,
            &payload(json!({
                "id": "u1",
                "family_id": "f1",
                "name": "Ada",
                "role": "admin",
                "avatar": "ada.png",
                "verified": true,
                "last_location_at": "",
                "updated": 1
            })),
        )
        .unwrap()
        .into_model()
        .unwrap();
        assert_eq!(member.last_location_at, None);
    }

    #[test]
    fn malformed_records_are_invalid() {
        let missing_id = decode_record(Collection::Lists, &payload(json!({"updated": 1})));
        assert!(matches!(missing_id, Err(Error::InvalidRecord { .. })));

        let missing_time = decode_record(Collection::Lists, &payload(json!({"id": "l1"})));
        assert!(matches!(missing_time, Err(Error::InvalidRecord { .. })));

        let wrong_shape = decode_record(
            Collection::Geofences,
            &payload(json!({"id": "g1", "updated": 1, "family_id": "f1", "lat": "north"})),
        );
        assert!(matches!(
            wrong_shape,
            Err(Error::InvalidRecord { collection: "geofences", .. })
        ));
    }

    #[test]
    fn encode_uses_backend_names_and_strips_metadata() {
        let list = List::new(ServerId::from("f1"), "Groceries", ListType::Todo, None, 10);
        let server_id = list.meta.server_id.clone();
        let fields = encode_record(&list.into_record()).unwrap();

        assert_eq!(fields["id"], json!(server_id.as_str()));
        assert_eq!(fields["type"], json!("todo"));
        assert_eq!(fields["created_by"], json!(""));
        assert!(!fields.contains_key("local_id"));
        assert!(!fields.contains_key("list_type"));
        assert!(!fields.contains_key("sync_status"));
    }
}
