//! Instruction configuration state
//!
//! [`Variables`] is an immutable map from variable ids to JSON values. Edits
//! return a new map.

use crate::DeclarationError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Typed variable key
#[derive(Debug)]
pub struct Variable<T> {
    id: String,
    _type: PhantomData<fn() -> T>,
}

impl<T> Variable<T> {
    /// Declare a variable
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            _type: PhantomData,
        }
    }

    /// Variable id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self::new(self.id.clone())
    }
}

/// Configuration state of an instruction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    values: BTreeMap<String, Value>,
}

impl Variables {
    /// Empty variables
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a raw value
    #[must_use]
    pub fn with_value(&self, id: impl Into<String>, value: Value) -> Self {
        let mut values = self.values.clone();
        values.insert(id.into(), value);
        Self { values }
    }

    /// Set a typed value
    ///
    /// # Errors
    /// Returns [`DeclarationError::Variable`] if the value cannot be
    /// represented as JSON
    pub fn with<T: Serialize>(&self, variable: &Variable<T>, value: &T) -> Result<Self, DeclarationError> {
        let value = serde_json::to_value(value).map_err(|source| DeclarationError::Variable {
            id: variable.id().to_string(),
            source,
        })?;
        Ok(self.with_value(variable.id(), value))
    }

    /// Remove a value
    #[must_use]
    pub fn without(&self, id: &str) -> Self {
        let mut values = self.values.clone();
        values.remove(id);
        Self { values }
    }

    /// Get a raw value
    #[inline]
    #[must_use]
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    /// Get a typed value
    ///
    /// # Errors
    /// Returns [`DeclarationError::Variable`] if the stored value does not
    /// have the variable's type
    pub fn get<T: DeserializeOwned>(&self, variable: &Variable<T>) -> Result<Option<T>, DeclarationError> {
        self.value(variable.id())
            .map(|value| {
                T::deserialize(value).map_err(|source| DeclarationError::Variable {
                    id: variable.id().to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Iterate values in id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(id, value)| (id.as_str(), value))
    }

    /// Number of values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Variables {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, Value>> for Variables {
    fn from(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_returns_new_map() {
        let empty = Variables::new();
        let set = empty.with_value("mass", json!(12.5));

        assert!(empty.is_empty());
        assert_eq!(set.value("mass"), Some(&json!(12.5)));
    }

    #[test]
    fn typed_access() {
        let mass = Variable::<f64>::new("mass");
        let variables = Variables::new().with(&mass, &3.0).unwrap();

        assert_eq!(variables.get(&mass).unwrap(), Some(3.0));
        assert_eq!(variables.get(&Variable::<f64>::new("other")).unwrap(), None);
    }

    #[test]
    fn typed_access_wrong_type() {
        let variables = Variables::new().with_value("mass", json!("heavy"));
        let result = variables.get(&Variable::<f64>::new("mass"));
        assert!(matches!(result, Err(DeclarationError::Variable { .. })));
    }

    #[test]
    fn equality_is_structural() {
        let a = Variables::new().with_value("x", json!(1));
        let b = Variables::new().with_value("x", json!(1));
        assert_eq!(a, b);
        assert_ne!(a, b.without("x"));
    }

    #[test]
    fn serde_is_a_plain_map() {
        let variables = Variables::new().with_value("x", json!([1, 2]));
        assert_eq!(serde_json::to_value(&variables).unwrap(), json!({ "x": [1, 2] }));
    }
}
