//! Parsed query documents
//!
//! The shape the Prototype Builder consumes. [`crate::parser`] produces it from
//! query text, but any parser that fills these types will do.

use std::fmt;

/// A parsed document: operations plus named fragment definitions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// Operation definitions, in source order
    pub operations: Vec<OperationDefinition>,
    /// Fragment definitions, in source order
    pub fragments: Vec<FragmentDefinition>,
}

/// Operation keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `query` (or an anonymous `{ ... }` shorthand)
    Query,
    /// `mutation`
    Mutation,
    /// `subscription`
    Subscription,
}

/// One `query` / `mutation` / `subscription`
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    /// Operation keyword
    pub kind: OperationKind,
    /// Optional operation name
    pub name: Option<String>,
    /// Declared variable names, without the `$`
    pub variables: Vec<String>,
    /// Operation-level directives
    pub directives: Vec<Directive>,
    /// Root selections
    pub selection_set: Vec<Selection>,
}

/// `fragment Name on Type { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    /// Fragment name
    pub name: String,
    /// Type condition
    pub type_condition: String,
    /// Fragment-level directives
    pub directives: Vec<Directive>,
    /// Fragment selections
    pub selection_set: Vec<Selection>,
}

/// One entry of a selection set
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// A field
    Field(Field),
    /// `...Name`
    FragmentSpread(FragmentSpread),
    /// `... on Type { ... }`
    InlineFragment(InlineFragment),
}

/// A requested field
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Alias, if any
    pub alias: Option<String>,
    /// Field name
    pub name: String,
    /// Literal arguments, in source order
    pub arguments: Vec<(String, ArgValue)>,
    /// Field directives
    pub directives: Vec<Directive>,
    /// Sub-selections; empty for scalar fields
    pub selection_set: Vec<Selection>,
}

impl Field {
    /// Field without alias, arguments or selections
    pub fn leaf(name: &str) -> Self {
        Self {
            alias: None,
            name: name.to_string(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: Vec::new(),
        }
    }
}

/// `...Name`
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
    /// Name of the spread fragment
    pub name: String,
    /// Spread directives
    pub directives: Vec<Directive>,
}

/// `... on Type { ... }`
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    /// Optional type condition
    pub type_condition: Option<String>,
    /// Inline fragment directives
    pub directives: Vec<Directive>,
    /// Selections
    pub selection_set: Vec<Selection>,
}

/// `@name(args)`
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    /// Directive name
    pub name: String,
    /// Directive arguments
    pub arguments: Vec<(String, ArgValue)>,
}

/// An argument value as written in the query
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// `$name`
    Variable(String),
    /// Integer literal
    Int(i64),
    /// Float literal
    Float(f64),
    /// String literal (unescaped)
    String(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// Enum value
    Enum(String),
    /// `[a, b]`
    List(Vec<ArgValue>),
    /// `{k: v}`
    Object(Vec<(String, ArgValue)>),
}

impl ArgValue {
    /// Identifier text of a scalar value, as used in entry keys
    ///
    /// `2` and `"2"` both give `2`, matching how response ids are keyed.
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            ArgValue::Int(n) => Some(n.to_string()),
            ArgValue::String(s) | ArgValue::Enum(s) => Some(s.clone()),
            ArgValue::Float(f) => Some(f.to_string()),
            ArgValue::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Check if this value or any nested value is a variable
    pub fn has_variable(&self) -> bool {
        match self {
            ArgValue::Variable(_) => true,
            ArgValue::List(items) => items.iter().any(ArgValue::has_variable),
            ArgValue::Object(fields) => fields.iter().any(|(_, v)| v.has_variable()),
            _ => false,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Variable(name) => write!(f, "${}", name),
            ArgValue::Int(n) => write!(f, "{}", n),
            ArgValue::Float(x) => write!(f, "{:?}", x),
            ArgValue::String(s) => {
                let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                f.write_str(&quoted)
            }
            ArgValue::Boolean(b) => write!(f, "{}", b),
            ArgValue::Null => f.write_str("null"),
            ArgValue::Enum(name) => f.write_str(name),
            ArgValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            ArgValue::Object(fields) => {
                f.write_str("{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", name, value)?;
                }
                f.write_str("}")
            }
        }
    }
}
