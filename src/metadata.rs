//! Column metadata consumed by the normalizer and the write helpers.
//!
//! Introspection itself lives behind [`MetadataProvider`]; this module only
//! defines the shapes the core reads and the native-type mapping.

use async_trait::async_trait;

use crate::error::MssqlAdapterError;

/// `max_length` sentinel meaning unbounded / LOB storage.
pub const UNBOUNDED_LENGTH: i32 = -1;

/// Semantic column type, collapsed from the engine's native type zoo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetaType {
    /// BIT; stored and bound as 0/1 integers
    Boolean,
    Integer,
    /// Decimal/floating numeric
    Number,
    /// Bounded character data
    Char,
    /// Unbounded character data (text, nvarchar(max), ...)
    Text,
    /// Binary / LOB
    Binary,
    Datetime,
}

/// Metadata for one column, as supplied by the metadata collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub meta_type: MetaType,
    pub not_null: bool,
    pub auto_increment: bool,
    /// Maximum length in characters/bytes, or [`UNBOUNDED_LENGTH`]
    pub max_length: i32,
}

impl ColumnInfo {
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self.meta_type, MetaType::Integer | MetaType::Number)
    }

    #[must_use]
    pub fn is_unbounded(&self) -> bool {
        self.max_length == UNBOUNDED_LENGTH
    }
}

/// Map a native engine type name to its semantic type.
///
/// # Errors
///
/// Unknown native types raise [`MssqlAdapterError::TypeMapping`] — guessing
/// would risk silent data corruption.
pub fn map_native_type(native: &str) -> Result<MetaType, MssqlAdapterError> {
    match native.to_uppercase().as_str() {
        "BIT" => Ok(MetaType::Boolean),
        "INT" | "SMALLINT" | "INTEGER" | "BIGINT" => Ok(MetaType::Integer),
        "DECIMAL" | "REAL" | "FLOAT" => Ok(MetaType::Number),
        "VARCHAR" | "NVARCHAR" => Ok(MetaType::Char),
        "TEXT" | "NTEXT" | "VARCHAR(MAX)" | "NVARCHAR(MAX)" => Ok(MetaType::Text),
        "IMAGE" | "VARBINARY" | "VARBINARY(MAX)" => Ok(MetaType::Binary),
        "DATETIME" => Ok(MetaType::Datetime),
        other => Err(MssqlAdapterError::TypeMapping(other.to_string())),
    }
}

/// Supplies column metadata per table on demand.
///
/// The core reads `meta_type`, `auto_increment`, `max_length` and `not_null`
/// and caches per connection; caches are invalidated on structure changes.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Column metadata for a logical (unprefixed) table name, in ordinal
    /// order.
    ///
    /// # Errors
    ///
    /// Implementations surface lookup failures as adapter errors.
    async fn columns(&self, table: &str) -> Result<Vec<ColumnInfo>, MssqlAdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_families_collapse_to_semantic_types() {
        assert_eq!(map_native_type("bigint").unwrap(), MetaType::Integer);
        assert_eq!(map_native_type("NVARCHAR").unwrap(), MetaType::Char);
        assert_eq!(map_native_type("nvarchar(max)").unwrap(), MetaType::Text);
        assert_eq!(map_native_type("IMAGE").unwrap(), MetaType::Binary);
        assert_eq!(map_native_type("bit").unwrap(), MetaType::Boolean);
    }

    #[test]
    fn unknown_native_type_is_fatal() {
        let err = map_native_type("GEOGRAPHY").unwrap_err();
        assert!(matches!(err, MssqlAdapterError::TypeMapping(_)));
    }
}
