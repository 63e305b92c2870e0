//! Scalar attribute types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scalar data types an attribute can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    /// Boolean value.
    Bool,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point.
    Float64,
    /// Fixed-precision decimal.
    Decimal,
    /// UTF-8 string.
    String,
    /// Timestamp (microseconds since Unix epoch).
    Timestamp,
    /// UUID (128-bit identifier).
    Uuid,
}

impl ScalarType {
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::Float64 => "float64",
            ScalarType::Decimal => "decimal",
            ScalarType::String => "string",
            ScalarType::Timestamp => "timestamp",
            ScalarType::Uuid => "uuid",
        }
    }

    /// Whether values of this type are ordered numerically.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarType::Int32 | ScalarType::Int64 | ScalarType::Float64 | ScalarType::Decimal
        )
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_names() {
        let ty: ScalarType = serde_json::from_str("\"timestamp\"").unwrap();
        assert_eq!(ty, ScalarType::Timestamp);
        assert_eq!(serde_json::to_string(&ScalarType::Int64).unwrap(), "\"int64\"");
        assert_eq!(ScalarType::Uuid.to_string(), "uuid");
        assert!(ScalarType::Decimal.is_numeric());
        assert!(!ScalarType::String.is_numeric());
    }
}
