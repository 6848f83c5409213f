//! Identity keys: recognizing "the same row" across two copies of a graph.

use crate::value::Value;
use std::any::TypeId;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The generated identity of an entity: its type plus its key values.
///
/// Two entities are the same logical row iff both produce a key and the keys
/// are equal. Key values are held in [`Value::key_form`] so integer width
/// differences between a driver and a struct field do not matter.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    type_id: TypeId,
    type_name: &'static str,
    values: Vec<Value>,
    hash: u64,
}

impl IdentityKey {
    pub fn new(type_id: TypeId, type_name: &'static str, values: &[Value]) -> Self {
        let values: Vec<Value> = values.iter().map(Value::key_form).collect();
        let hash = hash_values(&values);
        Self {
            type_id,
            type_name,
            values,
            hash,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Hash of the key values alone.
    pub fn value_hash(&self) -> u64 {
        self.hash
    }

    /// The key as a single value: the sole component, or an array for
    /// composite keys.
    pub fn as_value(&self) -> Value {
        match self.values.as_slice() {
            [single] => single.clone(),
            many => Value::Array(many.to_vec()),
        }
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.hash == other.hash && self.values == other.values
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.hash.hash(state);
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.type_name.rsplit("::").next().unwrap_or(self.type_name);
        write!(f, "{short}(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, ")")
    }
}

/// Hash a slice of values with variant tagging, so `Int(1)` and `Text("1")`
/// never collide by construction.
pub fn hash_values(values: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for value in values {
        value.hash_into(&mut hasher);
    }
    hasher.finish()
}
