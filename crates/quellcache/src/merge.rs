//! Response Merger: combine cached and freshly fetched data

use serde_json::{Map, Value};

use crate::config::IdentifierFields;
use crate::prototype::{FieldKind, ProtoField, Prototype};

/// Fetched data lacks a field the remainder query asked for
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("response is missing requested field '{path}'")]
pub struct ShapeMismatchError {
    /// Dotted response path, with `[i]` for list items
    pub path: String,
}

fn mismatch(path: &str) -> ShapeMismatchError {
    ShapeMismatchError {
        path: path.to_string(),
    }
}

/// Merge cached and fetched data into the shape of the caller's query
///
/// Keys follow prototype order. Satisfied fields come from `cached`, the
/// rest from `fetched`; list items are paired by identifier.
pub fn merge_responses(
    prototype: &Prototype,
    cached: &Map<String, Value>,
    fetched: &Map<String, Value>,
    identifiers: &IdentifierFields,
) -> Result<Map<String, Value>, ShapeMismatchError> {
    let merger = Merger { identifiers };
    let mut merged = Map::new();

    for field in &prototype.fields {
        let key = field.response_key();
        let value = merger.merge_field(field, cached.get(key), fetched.get(key), key)?;
        merged.insert(key.to_string(), value);
    }

    Ok(merged)
}

struct Merger<'a> {
    identifiers: &'a IdentifierFields,
}

impl Merger<'_> {
    fn merge_field(
        &self,
        field: &ProtoField,
        cached: Option<&Value>,
        fetched: Option<&Value>,
        path: &str,
    ) -> Result<Value, ShapeMismatchError> {
        if field.is_satisfied() {
            if let Some(value) = cached {
                return Ok(value.clone());
            }
        }

        let fetched = fetched.ok_or_else(|| mismatch(path))?;
        if field.is_scalar() {
            return Ok(fetched.clone());
        }

        // A by-id lookup may come back as a one-element list
        let fetched = match (&field.kind, fetched) {
            (FieldKind::Entity { identifier: Some(_), .. }, Value::Array(items))
                if items.len() == 1 =>
            {
                &items[0]
            }
            _ => fetched,
        };

        self.merge_composite(field.children(), cached, fetched, path)
    }

    fn merge_composite(
        &self,
        children: &[ProtoField],
        cached: Option<&Value>,
        fetched: &Value,
        path: &str,
    ) -> Result<Value, ShapeMismatchError> {
        match fetched {
            Value::Null => Ok(Value::Null),
            Value::Object(object) => {
                let cached = cached.and_then(Value::as_object);
                Ok(Value::Object(self.merge_object(children, cached, object, path)?))
            }
            Value::Array(items) => {
                let cached_items: Vec<&Map<String, Value>> = cached
                    .and_then(Value::as_array)
                    .map(|items| items.iter().filter_map(Value::as_object).collect())
                    .unwrap_or_default();

                let mut merged = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    match item {
                        Value::Object(object) => {
                            let partner = self.identity(children, object).and_then(|id| {
                                cached_items
                                    .iter()
                                    .find(|c| self.identity(children, c).as_ref() == Some(&id))
                                    .copied()
                            });
                            merged.push(Value::Object(
                                self.merge_object(children, partner, object, &item_path)?,
                            ));
                        }
                        other => merged.push(other.clone()),
                    }
                }
                Ok(Value::Array(merged))
            }
            _ => Err(mismatch(path)),
        }
    }

    fn merge_object(
        &self,
        children: &[ProtoField],
        cached: Option<&Map<String, Value>>,
        fetched: &Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, ShapeMismatchError> {
        let mut merged = Map::new();
        for child in children {
            let key = child.response_key();
            let child_path = format!("{}.{}", path, key);
            let value = self.merge_field(
                child,
                cached.and_then(|c| c.get(key)),
                fetched.get(key),
                &child_path,
            )?;
            merged.insert(key.to_string(), value);
        }
        Ok(merged)
    }

    /// Identifier value of an item, read through the selected id field
    fn identity(&self, children: &[ProtoField], object: &Map<String, Value>) -> Option<Value> {
        children
            .iter()
            .filter(|c| c.is_scalar() && self.identifiers.contains(&c.name))
            .find_map(|c| object.get(c.response_key()))
            .cloned()
    }
}
