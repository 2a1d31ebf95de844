//! Common types used throughout StockSync.

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a catalog record.
///
/// On the wire and in local storage this is a plain integer: positive values
/// are assigned by the server, negative values are client-minted placeholders
/// for records the server has not seen yet, and zero means "not assigned".
/// The server resets the id on create, so any of these may be sent in a POST
/// body.
///
/// Build ids through [`RecordId::server`], [`RecordId::pending`] or
/// `From<i32>`, which keep the sign and the variant in agreement.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RecordId {
    /// No identity yet (a record about to be created).
    #[default]
    Unassigned,
    /// Authoritative id handed out by the server.
    Server(i32),
    /// Local placeholder awaiting a successful create replay.
    Pending(i32),
}

impl RecordId {
    /// Build a server id.
    ///
    /// # Errors
    /// - Returns error if `id` is not positive
    pub fn server(id: i32) -> crate::Result<Self> {
        if id <= 0 {
            return Err(crate::Error::InvalidInput(format!(
                "server ids must be positive, got {}",
                id
            )));
        }
        Ok(Self::Server(id))
    }

    /// Build a placeholder id from a positive sequence number.
    ///
    /// # Errors
    /// - Returns error if `seq` is not positive
    pub fn pending(seq: i32) -> crate::Result<Self> {
        if seq <= 0 {
            return Err(crate::Error::InvalidInput(format!(
                "placeholder sequence must be positive, got {}",
                seq
            )));
        }
        Ok(Self::Pending(-seq))
    }

    /// Raw integer form used by the remote API.
    pub fn as_i32(&self) -> i32 {
        match self {
            RecordId::Unassigned => 0,
            RecordId::Server(id) | RecordId::Pending(id) => *id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, RecordId::Pending(_))
    }

    /// Server id, if this record has one.
    pub fn server_id(&self) -> Option<i32> {
        match self {
            RecordId::Server(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<i32> for RecordId {
    fn from(raw: i32) -> Self {
        match raw {
            0 => RecordId::Unassigned,
            id if id > 0 => RecordId::Server(id),
            id => RecordId::Pending(id),
        }
    }
}

impl From<RecordId> for i32 {
    fn from(id: RecordId) -> Self {
        id.as_i32()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_i32())
    }
}

/// A product entry in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Record {
    pub id: RecordId,
    /// Name of the user who logged the entry.
    pub user_name: String,
    #[serde(with = "wall_clock")]
    pub entry_date_time: NaiveDateTime,
    pub product_model: String,
    pub part_number: String,
    pub quantity: i32,
    pub price: f64,
    #[serde(with = "wall_clock")]
    pub created_at: NaiveDateTime,
}

impl Record {
    /// Create an unsaved record stamped with the current local time.
    pub fn new(
        user_name: impl Into<String>,
        product_model: impl Into<String>,
        part_number: impl Into<String>,
        quantity: i32,
        price: f64,
    ) -> Self {
        let now = Local::now().naive_local();
        Self {
            id: RecordId::Unassigned,
            user_name: user_name.into(),
            entry_date_time: now,
            product_model: product_model.into(),
            part_number: part_number.into(),
            quantity,
            price,
            created_at: now,
        }
    }

    /// Overwrite both timestamps with the given wall-clock time.
    pub fn stamp(&mut self, now: NaiveDateTime) {
        self.entry_date_time = now;
        self.created_at = now;
    }
}

impl Default for Record {
    fn default() -> Self {
        Self {
            id: RecordId::Unassigned,
            user_name: String::new(),
            entry_date_time: NaiveDateTime::default(),
            product_model: String::new(),
            part_number: String::new(),
            quantity: 0,
            price: 0.0,
            created_at: NaiveDateTime::default(),
        }
    }
}

/// Server timestamps are wall-clock values that may or may not carry an
/// offset; both forms are accepted and the offset is dropped.
mod wall_clock {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, FORMAT) {
            return Ok(naive);
        }
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.naive_local())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    #[test]
    fn test_record_id_from_raw() {
        assert_eq!(RecordId::from(0), RecordId::Unassigned);
        assert_eq!(RecordId::from(7), RecordId::Server(7));
        assert_eq!(RecordId::from(-3), RecordId::Pending(-3));
    }

    #[test]
    fn test_pending_requires_positive_seq() {
        assert_eq!(RecordId::pending(4).unwrap(), RecordId::Pending(-4));
        assert!(RecordId::pending(0).is_err());
        assert!(RecordId::pending(-1).is_err());

        assert_eq!(RecordId::server(7).unwrap(), RecordId::Server(7));
        assert!(RecordId::server(0).is_err());
        assert!(RecordId::server(-5).is_err());
    }

    #[test]
    fn test_record_wire_format() {
        let json = r#"{
            "id": 1,
            "userName": "John Doe",
            "entryDateTime": "2025-11-28T03:27:32.2009119",
            "productModel": "Widget Pro 3000",
            "partNumber": "WP-3000-BLK",
            "quantity": 50,
            "price": 299.99,
            "createdAt": "2025-11-28T03:27:32.2036860+01:00"
        }"#;

        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, RecordId::Server(1));
        assert_eq!(record.product_model, "Widget Pro 3000");
        assert_eq!(record.quantity, 50);
        assert_eq!(
            record.created_at.date(),
            NaiveDate::from_ymd_opt(2025, 11, 28).unwrap()
        );

        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["id"], 1);
        assert_eq!(out["partNumber"], "WP-3000-BLK");
    }

    #[test]
    fn test_placeholder_serializes_as_negative_integer() {
        let mut record = Record::new("ann", "Widget", "W-1", 1, 2.5);
        record.id = RecordId::pending(12).unwrap();
        let out = serde_json::to_value(&record).unwrap();
        assert_eq!(out["id"], -12);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let record: Record = serde_json::from_str(r#"{"productModel":"Widget"}"#).unwrap();
        assert_eq!(record.id, RecordId::Unassigned);
        assert_eq!(record.product_model, "Widget");
        assert_eq!(record.quantity, 0);
    }

    proptest! {
        #[test]
        fn record_id_sign_decides_variant(raw in any::<i32>()) {
            let id = RecordId::from(raw);
            prop_assert_eq!(id.as_i32(), raw);
            prop_assert_eq!(id.is_pending(), raw < 0);
            prop_assert_eq!(id.server_id().is_some(), raw > 0);
        }
    }
}
