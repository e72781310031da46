//! Remainder Query Builder: the minimal query for what the store lacks

use std::fmt;

use crate::ast::ArgValue;
use crate::config::IdentifierFields;
use crate::prototype::{FieldKind, ProtoField, Prototype};

/// A query covering only unsatisfied fields
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemainderQuery {
    /// Root selections
    pub fields: Vec<RemainderField>,
}

/// One selection of a remainder query
#[derive(Debug, Clone, PartialEq)]
pub struct RemainderField {
    /// Alias, kept so the response comes back under the caller's key
    pub alias: Option<String>,
    /// Field name
    pub name: String,
    /// Arguments, verbatim
    pub arguments: Vec<(String, ArgValue)>,
    /// Sub-selections
    pub selections: Vec<RemainderField>,
}

impl RemainderField {
    fn leaf(field: &ProtoField) -> Self {
        Self {
            alias: field.alias.clone(),
            name: field.name.clone(),
            arguments: field.arguments.clone(),
            selections: Vec::new(),
        }
    }
}

impl RemainderQuery {
    /// Build the remainder of a planned prototype
    ///
    /// A node is included when any leaf under it is unsatisfied. Items of an
    /// included collection also select their identifier fields so fetched
    /// items can be paired with cached ones; a single entity is already
    /// pinned by its arguments or its parent and selects only what is missing.
    pub fn build(prototype: &Prototype, identifiers: &IdentifierFields) -> Self {
        Self {
            fields: prototype
                .fields
                .iter()
                .filter_map(|field| remainder_field(field, identifiers))
                .collect(),
        }
    }

    /// Check if nothing needs fetching
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of leaf selections
    pub fn leaf_count(&self) -> usize {
        fn count(fields: &[RemainderField]) -> usize {
            fields
                .iter()
                .map(|f| {
                    if f.selections.is_empty() {
                        1
                    } else {
                        count(&f.selections)
                    }
                })
                .sum()
        }
        count(&self.fields)
    }
}

fn remainder_field(field: &ProtoField, identifiers: &IdentifierFields) -> Option<RemainderField> {
    if let FieldKind::Scalar { satisfied } = field.kind {
        return (satisfied != Some(true)).then(|| RemainderField::leaf(field));
    }
    if field.is_satisfied() {
        return None;
    }

    let pairs_items = matches!(field.kind, FieldKind::Collection { .. });
    let selections = field
        .children()
        .iter()
        .filter_map(|child| {
            remainder_field(child, identifiers).or_else(|| {
                (pairs_items && child.is_scalar() && identifiers.contains(&child.name))
                    .then(|| RemainderField::leaf(child))
            })
        })
        .collect();

    Some(RemainderField {
        selections,
        ..RemainderField::leaf(field)
    })
}

fn write_fields(f: &mut fmt::Formatter<'_>, fields: &[RemainderField]) -> fmt::Result {
    f.write_str("{")?;
    for field in fields {
        f.write_str(" ")?;
        if let Some(alias) = &field.alias {
            write!(f, "{}: ", alias)?;
        }
        f.write_str(&field.name)?;
        if !field.arguments.is_empty() {
            f.write_str("(")?;
            for (i, (name, value)) in field.arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}: {}", name, value)?;
            }
            f.write_str(")")?;
        }
        if !field.selections.is_empty() {
            f.write_str(" ")?;
            write_fields(f, &field.selections)?;
        }
    }
    f.write_str(" }")
}

impl fmt::Display for RemainderQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("query ")?;
        write_fields(f, &self.fields)
    }
}
