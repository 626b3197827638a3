//! Collection schema bootstrap for SurrealDB.
//!
//! The collection table is SCHEMAFULL so type constraints hold even for
//! writes that bypass the store. Every statement is `IF NOT EXISTS`: an
//! existing table or index is never an error, and bootstrap runs again
//! on every (re)connection.

use std::fmt;

use surrealdb::{Connection, Surreal};
use tracing::info;

use crate::error::DbError;

/// Collection used when none is configured.
pub const DEFAULT_TABLE: &str = "entities";

const MAX_TABLE_LEN: usize = 64;

// -----------------------------------------------------------------------
// Table names
// -----------------------------------------------------------------------

/// A validated collection name, safe to embed in SurrealQL.
///
/// Must start with a lowercase ASCII letter and contain only lowercase
/// letters, digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn parse(name: impl Into<String>) -> Result<Self, DbError> {
        let name = name.into();
        let mut chars = name.chars();
        let valid_start = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_start || !valid_rest || name.len() > MAX_TABLE_LEN {
            return Err(DbError::InvalidTable(name));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TableName {
    fn default() -> Self {
        Self(DEFAULT_TABLE.to_string())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// -----------------------------------------------------------------------
// Collection definition
// -----------------------------------------------------------------------

/// Returns the DDL for the collection table and its indexes.
///
/// Identity is the record key, which the engine indexes itself; the
/// explicit indexes cover the visibility condition and the email lookup.
pub fn collection_ddl(table: &TableName) -> String {
    format!(
        "\
DEFINE TABLE IF NOT EXISTS {t} SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE {t} TYPE int DEFAULT 0 \
    ASSERT $value >= 0;
DEFINE FIELD IF NOT EXISTS deleted_at ON TABLE {t} TYPE option<datetime>;
DEFINE FIELD IF NOT EXISTS name ON TABLE {t} TYPE string \
    ASSERT string::len(string::trim($value)) > 0;
DEFINE FIELD IF NOT EXISTS first_name ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS last_name ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS phone ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS email ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS street_name ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS block ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS unit ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS postal_code ON TABLE {t} TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE {t} TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE {t} TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_{t}_deleted_at ON TABLE {t} COLUMNS deleted_at;
DEFINE INDEX IF NOT EXISTS idx_{t}_email ON TABLE {t} COLUMNS email;
",
        t = table
    )
}

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Ensures the collection table and its indexes exist.
pub async fn bootstrap<C: Connection>(db: &Surreal<C>, table: &TableName) -> Result<(), DbError> {
    db.query(collection_ddl(table))
        .await?
        .check()
        .map_err(|e| DbError::Bootstrap(format!("collection '{table}': {e}")))?;

    info!(table = %table, "Collection schema ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_are_restricted() {
        assert!(TableName::parse("entities").is_ok());
        assert!(TableName::parse("people_v2").is_ok());
        assert!(TableName::parse("").is_err());
        assert!(TableName::parse("2fast").is_err());
        assert!(TableName::parse("Entities").is_err());
        assert!(TableName::parse("entities; REMOVE TABLE x").is_err());
        assert!(TableName::parse("a".repeat(MAX_TABLE_LEN + 1)).is_err());
    }

    #[test]
    fn ddl_is_idempotent_and_scoped_to_table() {
        let ddl = collection_ddl(&TableName::parse("people").unwrap());
        for line in ddl.lines().filter(|l| l.starts_with("DEFINE")) {
            assert!(line.contains("IF NOT EXISTS"), "not idempotent: {line}");
        }
        assert!(ddl.contains("idx_people_deleted_at"));
        assert!(ddl.contains("idx_people_email"));
        assert!(!ddl.contains("entities"));
    }
}
