/// Production database primary keys.
pub type EntityId = i64;

/// A raw production-database record: field name to JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Frame numbers as stored on versions. Negative values mean "unknown".
pub type FrameNumber = i64;

/// Field-name lists per capitalized entity type (`"Shot"`, `"Version"`),
/// as returned by schema introspection.
pub type FieldSchema = std::collections::HashMap<String, Vec<String>>;
