//! Ordered parameter maps.

use crate::catalog::ScalarType;
use crate::value::Value;
use std::fmt;

/// Who supplied a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterOrigin {
    /// Supplied with the query text.
    Caller,
    /// Contributed by the named criterion.
    Criterion(String),
}

impl fmt::Display for ParameterOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterOrigin::Caller => f.write_str("the caller"),
            ParameterOrigin::Criterion(name) => write!(f, "criterion '{}'", name),
        }
    }
}

/// A parameter value with its declared type and origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBinding {
    pub value: Value,
    /// Type of the attribute the parameter is compared against, or of the value itself.
    pub declared_type: Option<ScalarType>,
    pub origin: ParameterOrigin,
}

impl ParameterBinding {
    pub fn caller(value: Value) -> Self {
        Self {
            declared_type: value.scalar_type(),
            value,
            origin: ParameterOrigin::Caller,
        }
    }

    pub fn criterion(criterion: impl Into<String>, value: Value) -> Self {
        Self {
            declared_type: value.scalar_type(),
            value,
            origin: ParameterOrigin::Criterion(criterion.into()),
        }
    }
}

/// Insertion-ordered map from parameter name to binding.
///
/// Names are unique; inserting an existing name replaces its binding in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    entries: Vec<(String, ParameterBinding)>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a caller-supplied parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, ParameterBinding::caller(value.into()));
        self
    }

    /// Insert a binding, returning the one it replaced.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        binding: ParameterBinding,
    ) -> Option<ParameterBinding> {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => Some(std::mem::replace(existing, binding)),
            None => {
                self.entries.push((name, binding));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&ParameterBinding> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).map(|b| &b.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Override the declared type of an existing entry.
    pub fn set_declared_type(&mut self, name: &str, ty: ScalarType) {
        if let Some((_, binding)) = self.entries.iter_mut().find(|(n, _)| n == name) {
            binding.declared_type = Some(ty);
        }
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterBinding)> {
        self.entries.iter().map(|(n, b)| (n.as_str(), b))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>, V: Into<Value>> FromIterator<(N, V)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(ParameterMap::new(), |map, (n, v)| map.with(n, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insertion_order_is_kept() {
        let params = ParameterMap::new().with("b", 1i64).with("a", "x").with("c", true);
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut params = ParameterMap::new().with("a", 1i64).with("b", 2i64);
        let previous = params.insert("a", ParameterBinding::criterion("tenant", Value::from("acme")));
        assert_eq!(previous.map(|b| b.value), Some(Value::Int64(1)));
        assert_eq!(params.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(
            params.get("a").map(|b| &b.origin),
            Some(&ParameterOrigin::Criterion("tenant".into()))
        );
    }

    #[test]
    fn test_declared_type_defaults_to_value_type() {
        let mut params: ParameterMap = [("name", "Alice")].into_iter().collect();
        assert_eq!(params.get("name").and_then(|b| b.declared_type), Some(ScalarType::String));

        params.set_declared_type("name", ScalarType::Uuid);
        assert_eq!(params.get("name").and_then(|b| b.declared_type), Some(ScalarType::Uuid));
        assert_eq!(ParameterOrigin::Caller.to_string(), "the caller");
    }
}
