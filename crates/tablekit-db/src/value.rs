//! Values, rows and the ordered maps that drive statement building

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A bound parameter or a fetched column value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

macro_rules! value_from {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

value_from!(Bool: bool);
value_from!(Integer: i8, i16, i32, i64, u8, u16, u32);
value_from!(Float: f32, f64);
value_from!(Text: String, &str);
value_from!(Bytes: Vec<u8>, &[u8]);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// One result row: column name to value, in result-set column order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, Value>);

impl Row {
    pub fn with_capacity(n: usize) -> Self {
        Self(IndexMap::with_capacity(n))
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.0.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Defines an insertion-ordered string-to-[`Value`] map. Position in the map
/// is position in the parameter list, and re-inserting a key keeps its slot.
macro_rules! ordered_map {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name(IndexMap<String, Value>);

        impl $name {
            pub fn new() -> Self {
                Self::default()
            }

            /// Builder-style insert
            #[must_use]
            pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
                self.insert(key, value);
                self
            }

            /// Insert or replace; a replaced key keeps its original position
            pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
                self.0.insert(key.into(), value.into())
            }

            pub fn get(&self, key: &str) -> Option<&Value> {
                self.0.get(key)
            }

            pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
                self.0.iter().map(|(k, v)| (k.as_str(), v))
            }

            pub fn len(&self) -> usize {
                self.0.len()
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for $name {
            fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
                let mut map = Self::new();
                for (k, v) in iter {
                    map.insert(k, v);
                }
                map
            }
        }

        impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for $name {
            fn from(pairs: [(K, V); N]) -> Self {
                pairs.into_iter().collect()
            }
        }
    };
}

ordered_map!(
    /// Predicate expression (e.g. `"id = ?"`) to the value bound to its placeholder
    Conditions
);

ordered_map!(
    /// Column name to value, for inserts and updates
    Columns
);
