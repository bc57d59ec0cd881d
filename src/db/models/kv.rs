use sqlx::FromRow;

/// A JSON document stored under a fixed key.
#[derive(Debug, Clone, FromRow)]
pub struct StoredDocument {
    pub value: String,
    pub revision: i64,
}
