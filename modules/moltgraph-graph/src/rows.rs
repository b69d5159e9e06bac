// Bolt row construction for UNWIND-batched writes.
//
// Each upsert ships its rows as a list of Bolt maps. Absent optional fields
// are written as explicit Bolt nulls so the store's coalesce() keeps the
// previously stored value.

use chrono::{DateTime, Utc};
use neo4rs::{BoltBoolean, BoltFloat, BoltInteger, BoltMap, BoltNull, BoltString, BoltType};

/// Format a timestamp the way the graph's datetime() expects:
/// "YYYY-MM-DDThh:mm:ss.ffffff" without an offset (assumed UTC).
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

pub(crate) struct Row {
    fields: Vec<(BoltString, BoltType)>,
}

impl Row {
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn push(&mut self, key: &str, value: BoltType) {
        self.fields.push((BoltString::from(key), value));
    }

    pub fn str(mut self, key: &str, value: &str) -> Self {
        self.push(key, BoltType::String(BoltString::from(value)));
        self
    }

    pub fn int(mut self, key: &str, value: i64) -> Self {
        self.push(key, BoltType::Integer(BoltInteger::new(value)));
        self
    }

    pub fn opt_str(mut self, key: &str, value: Option<&str>) -> Self {
        let bolt = match value {
            Some(v) => BoltType::String(BoltString::from(v)),
            None => BoltType::Null(BoltNull),
        };
        self.push(key, bolt);
        self
    }

    pub fn opt_int(mut self, key: &str, value: Option<i64>) -> Self {
        let bolt = match value {
            Some(v) => BoltType::Integer(BoltInteger::new(v)),
            None => BoltType::Null(BoltNull),
        };
        self.push(key, bolt);
        self
    }

    pub fn opt_float(mut self, key: &str, value: Option<f64>) -> Self {
        let bolt = match value {
            Some(v) => BoltType::Float(BoltFloat::new(v)),
            None => BoltType::Null(BoltNull),
        };
        self.push(key, bolt);
        self
    }

    pub fn opt_bool(mut self, key: &str, value: Option<bool>) -> Self {
        let bolt = match value {
            Some(v) => BoltType::Boolean(BoltBoolean::new(v)),
            None => BoltType::Null(BoltNull),
        };
        self.push(key, bolt);
        self
    }

    /// Timestamps travel as formatted strings; the cypher side wraps them in
    /// datetime(), where a null passes through untouched.
    pub fn opt_datetime(mut self, key: &str, value: Option<&DateTime<Utc>>) -> Self {
        let bolt = match value {
            Some(v) => BoltType::String(BoltString::from(format_datetime(v).as_str())),
            None => BoltType::Null(BoltNull),
        };
        self.push(key, bolt);
        self
    }

    pub fn build(self) -> BoltType {
        BoltType::Map(BoltMap::from_iter(self.fields))
    }
}
