//! Prototype Builder: classify a parsed operation into a typed selection tree
//!
//! Every query is turned into a [`Prototype`]: one [`ProtoField`] per
//! requested field, tagged with how the store can answer it. Entities are
//! looked up by key, collections through a list record, and scalars are read
//! off their parent entry. Anything the engine cannot reason about flags the
//! operation [`OperationType::UnQuellable`], but a best-effort prototype is
//! still produced so pass-through responses can be normalized.

use std::collections::HashMap;

use ahash::RandomState;
use tracing::debug;

use crate::ast::{
    ArgValue, Directive, Document, Field, FragmentDefinition, OperationKind, Selection,
};
use crate::config::{IdentifierFields, TypeMaps};

/// A requested field that has no type mapping
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no type mapped for field '{field}' at {path}")]
pub struct UnmappedTypeError {
    /// Field name
    pub field: String,
    /// Dotted response path of the field
    pub path: String,
}

/// Why an operation bypasses the cache
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnQuellableReason {
    /// A type could not be resolved
    #[error(transparent)]
    Unmapped(#[from] UnmappedTypeError),

    /// A root field selects a scalar
    #[error("root field '{0}' has no selection set")]
    RootScalar(String),

    /// A directive may change the selection at runtime
    #[error("directive @{0} is not cached")]
    Directive(String),

    /// Variables are declared or referenced
    #[error("operation uses variables")]
    Variables,

    /// The document does not hold exactly one operation
    #[error("document holds {0} operations")]
    MultipleOperations(usize),

    /// Inline fragments need schema knowledge
    #[error("inline fragments are not cached")]
    InlineFragment,

    /// A spread names a fragment the document does not define
    #[error("fragment '{0}' is not defined")]
    UnknownFragment(String),

    /// Fragments spread each other in a cycle
    #[error("fragment '{0}' spreads itself")]
    FragmentCycle(String),

    /// Subscriptions stream and are never cached
    #[error("subscriptions are not cached")]
    Subscription,
}

impl UnQuellableReason {
    /// Check if a pass-through response may still be written to the store
    ///
    /// Only reasons where the response shape still follows the prototype
    /// qualify.
    pub fn allows_normalization(&self) -> bool {
        matches!(
            self,
            UnQuellableReason::Unmapped(_)
                | UnQuellableReason::RootScalar(_)
                | UnQuellableReason::Directive(_)
        )
    }
}

/// How the orchestrator handles an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    /// Cacheable read
    Query,
    /// Write, routed through mutation handling
    Mutation,
    /// Forwarded unchanged
    UnQuellable(UnQuellableReason),
}

/// Classification of one requested field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    /// Leaf value read off the parent entry
    Scalar {
        /// Tri-state: unset, resolvable from the store, or must be fetched
        satisfied: Option<bool>,
    },
    /// A single entity, pinned by id when the query supplies one
    Entity {
        /// Graph type
        type_name: String,
        /// Id argument value
        identifier: Option<String>,
        /// Sub-selections
        children: Vec<ProtoField>,
    },
    /// A list of entities
    Collection {
        /// Graph type of the items
        type_name: String,
        /// Sub-selections of each item
        children: Vec<ProtoField>,
    },
    /// Object selection with no known type
    Unmapped {
        /// Sub-selections
        children: Vec<ProtoField>,
    },
}

impl FieldKind {
    /// Graph type, if known
    pub fn type_name(&self) -> Option<&str> {
        match self {
            FieldKind::Entity { type_name, .. } | FieldKind::Collection { type_name, .. } => {
                Some(type_name)
            }
            _ => None,
        }
    }

    /// Sub-selections; empty for scalars
    pub fn children(&self) -> &[ProtoField] {
        match self {
            FieldKind::Scalar { .. } => &[],
            FieldKind::Entity { children, .. }
            | FieldKind::Collection { children, .. }
            | FieldKind::Unmapped { children } => children.as_slice(),
        }
    }

    /// Mutable sub-selections; empty for scalars
    pub fn children_mut(&mut self) -> &mut [ProtoField] {
        match self {
            FieldKind::Scalar { .. } => &mut [],
            FieldKind::Entity { children, .. }
            | FieldKind::Collection { children, .. }
            | FieldKind::Unmapped { children } => children.as_mut_slice(),
        }
    }

    fn children_vec(&mut self) -> Option<&mut Vec<ProtoField>> {
        match self {
            FieldKind::Scalar { .. } => None,
            FieldKind::Entity { children, .. }
            | FieldKind::Collection { children, .. }
            | FieldKind::Unmapped { children } => Some(children),
        }
    }

    /// Record satisfiability for every leaf under this node
    ///
    /// Flags combine with AND: once a leaf is marked `false` it stays false
    /// for the rest of the planning pass.
    pub fn mark(&mut self, satisfied: bool) {
        match self {
            FieldKind::Scalar { satisfied: slot } => {
                *slot = Some(slot.unwrap_or(true) && satisfied);
            }
            other => mark_all(other.children_mut(), satisfied),
        }
    }

    /// Check if every leaf under this node is satisfied
    pub fn is_satisfied(&self) -> bool {
        match self {
            FieldKind::Scalar { satisfied } => *satisfied == Some(true),
            other => other.children().iter().all(ProtoField::is_satisfied),
        }
    }

    fn reset(&mut self) {
        match self {
            FieldKind::Scalar { satisfied } => *satisfied = None,
            other => {
                for child in other.children_mut() {
                    child.kind.reset();
                }
            }
        }
    }
}

/// Mark every field in `fields`
pub fn mark_all(fields: &mut [ProtoField], satisfied: bool) {
    for field in fields {
        field.kind.mark(satisfied);
    }
}

/// One node of the prototype
#[derive(Debug, Clone, PartialEq)]
pub struct ProtoField {
    /// Field name
    pub name: String,
    /// Alias, if any
    pub alias: Option<String>,
    /// Literal arguments, in source order
    pub arguments: Vec<(String, ArgValue)>,
    /// Classification
    pub kind: FieldKind,
    spreads: Vec<String>,
}

impl ProtoField {
    /// A scalar leaf
    pub fn scalar(name: &str) -> Self {
        Self::new(name, FieldKind::Scalar { satisfied: None })
    }

    /// A node of any kind without alias or arguments
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
            arguments: Vec::new(),
            kind,
            spreads: Vec::new(),
        }
    }

    /// Key of this field in responses: the alias when present
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Key of this field inside a stored entry
    ///
    /// Arguments are folded into the name so `cities(country_id: 1)` and
    /// `cities(country_id: 2)` never share a slot.
    pub fn storage_key(&self) -> String {
        if self.arguments.is_empty() {
            return self.name.clone();
        }

        let arguments: Vec<String> = self
            .arguments
            .iter()
            .map(|(name, value)| format!("{}:{}", name, value))
            .collect();
        format!("{}({})", self.name, arguments.join(","))
    }

    /// Store key of the reference list behind a collection field
    ///
    /// The bare type name for an unfiltered collection, the storage key when
    /// arguments filter it. `None` for every other kind.
    pub fn list_key(&self) -> Option<String> {
        match &self.kind {
            FieldKind::Collection { type_name, .. } if self.arguments.is_empty() => {
                Some(type_name.clone())
            }
            FieldKind::Collection { .. } => Some(self.storage_key()),
            _ => None,
        }
    }

    /// Check if this is a scalar leaf
    pub fn is_scalar(&self) -> bool {
        matches!(self.kind, FieldKind::Scalar { .. })
    }

    /// Sub-selections; empty for scalars
    pub fn children(&self) -> &[ProtoField] {
        self.kind.children()
    }

    /// Child by response key
    pub fn child(&self, response_key: &str) -> Option<&ProtoField> {
        self.children()
            .iter()
            .find(|c| c.response_key() == response_key)
    }

    /// Check if every leaf under this field is satisfied
    pub fn is_satisfied(&self) -> bool {
        self.kind.is_satisfied()
    }

    /// Fragment spreads not yet expanded into this field
    pub fn pending_spreads(&self) -> &[String] {
        &self.spreads
    }
}

/// The typed selection tree of one operation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prototype {
    /// Root fields, in request order
    pub fields: Vec<ProtoField>,
    spreads: Vec<String>,
}

impl Prototype {
    /// Prototype over the given root fields
    pub fn new(fields: Vec<ProtoField>) -> Self {
        Self {
            fields,
            spreads: Vec::new(),
        }
    }

    /// Response keys of the root fields
    pub fn root_keys(&self) -> Vec<&str> {
        self.fields.iter().map(ProtoField::response_key).collect()
    }

    /// Root field by response key
    pub fn field(&self, response_key: &str) -> Option<&ProtoField> {
        self.fields
            .iter()
            .find(|f| f.response_key() == response_key)
    }

    /// Check if every leaf is satisfied
    pub fn is_satisfied(&self) -> bool {
        self.fields.iter().all(ProtoField::is_satisfied)
    }

    /// Clear all satisfiability flags
    pub fn reset_satisfaction(&mut self) {
        for field in &mut self.fields {
            field.kind.reset();
        }
    }

    /// Merge fragment selections into the fields that spread them
    ///
    /// Spread fields are appended after a node's own children; a field
    /// requested both directly and through a fragment appears once.
    pub fn expand_fragments(&mut self, fragments: &FragmentTable) {
        let spreads = std::mem::take(&mut self.spreads);
        let mut active = Vec::new();
        expand_into(&mut self.fields, spreads, fragments, &mut active);
    }
}

/// A fragment's selections, converted but not yet expanded
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FragmentBody {
    /// Type condition
    pub type_condition: String,
    /// Fields
    pub fields: Vec<ProtoField>,
    spreads: Vec<String>,
}

/// Fragments by name
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FragmentTable {
    fragments: HashMap<String, FragmentBody, RandomState>,
}

impl FragmentTable {
    /// Fragment by name
    pub fn get(&self, name: &str) -> Option<&FragmentBody> {
        self.fragments.get(name)
    }

    /// Number of fragments
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if there are no fragments
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Name of a fragment that reaches itself through spreads
    fn find_cycle(&self) -> Option<String> {
        let mut names: Vec<&String> = self.fragments.keys().collect();
        names.sort();
        names
            .into_iter()
            .find(|name| self.reaches(name, name, &mut Vec::new()))
            .cloned()
    }

    fn reaches(&self, from: &str, target: &str, seen: &mut Vec<String>) -> bool {
        let Some(body) = self.fragments.get(from) else {
            return false;
        };

        let mut spreads = Vec::new();
        collect_spreads(&body.fields, &body.spreads, &mut spreads);
        for name in spreads {
            if name == target {
                return true;
            }
            if seen.contains(&name) {
                continue;
            }
            seen.push(name.clone());
            if self.reaches(&name, target, seen) {
                return true;
            }
        }
        false
    }
}

fn collect_spreads(fields: &[ProtoField], spreads: &[String], out: &mut Vec<String>) {
    out.extend(spreads.iter().cloned());
    for field in fields {
        collect_spreads(field.children(), &field.spreads, out);
    }
}

/// Output of [`PrototypeBuilder::build`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOperation {
    /// Selection tree, fragments not yet expanded
    pub prototype: Prototype,
    /// Routing decision
    pub operation_type: OperationType,
    /// Fragment definitions of the document
    pub fragments: FragmentTable,
}

impl ParsedOperation {
    /// Prototype with fragments merged in, plus the operation type
    pub fn into_expanded(self) -> (Prototype, OperationType) {
        let mut prototype = self.prototype;
        prototype.expand_fragments(&self.fragments);
        (prototype, self.operation_type)
    }
}

/// Builds prototypes against the caller's type maps
pub struct PrototypeBuilder<'a> {
    maps: &'a TypeMaps,
    identifiers: &'a IdentifierFields,
}

struct BuildContext<'d> {
    fragment_types: HashMap<&'d str, &'d str, RandomState>,
    root_collections: bool,
    reason: Option<UnQuellableReason>,
}

impl BuildContext<'_> {
    /// Keep the first reason found
    fn flag(&mut self, reason: UnQuellableReason) {
        if self.reason.is_none() {
            debug!("Operation not cacheable: {}", reason);
            self.reason = Some(reason);
        }
    }

    fn flag_directives(&mut self, directives: &[Directive]) {
        if let Some(directive) = directives.first() {
            self.flag(UnQuellableReason::Directive(directive.name.clone()));
        }
    }
}

impl<'a> PrototypeBuilder<'a> {
    /// Create a builder
    pub fn new(maps: &'a TypeMaps, identifiers: &'a IdentifierFields) -> Self {
        Self { maps, identifiers }
    }

    /// Build the prototype of the document's operation
    pub fn build(&self, document: &Document) -> ParsedOperation {
        let mut ctx = BuildContext {
            fragment_types: document
                .fragments
                .iter()
                .map(|f| (f.name.as_str(), f.type_condition.as_str()))
                .collect(),
            root_collections: true,
            reason: None,
        };

        if document.operations.len() != 1 {
            ctx.flag(UnQuellableReason::MultipleOperations(
                document.operations.len(),
            ));
        }

        let mut prototype = Prototype::default();
        let mut kind = OperationKind::Query;

        if let Some(operation) = document.operations.first() {
            kind = operation.kind;
            ctx.root_collections = kind == OperationKind::Query;

            if kind == OperationKind::Subscription {
                ctx.flag(UnQuellableReason::Subscription);
            }
            if !operation.variables.is_empty() {
                ctx.flag(UnQuellableReason::Variables);
            }
            ctx.flag_directives(&operation.directives);

            let (fields, spreads) =
                self.convert_selections(&operation.selection_set, "", 0, &mut ctx);
            prototype = Prototype { fields, spreads };
        }

        let fragments = self.convert_fragments(&document.fragments, &mut ctx);
        if let Some(name) = fragments.find_cycle() {
            ctx.flag(UnQuellableReason::FragmentCycle(name));
        }

        let operation_type = match ctx.reason {
            Some(reason) => OperationType::UnQuellable(reason),
            None if kind == OperationKind::Mutation => OperationType::Mutation,
            None => OperationType::Query,
        };

        ParsedOperation {
            prototype,
            operation_type,
            fragments,
        }
    }

    fn convert_fragments(
        &self,
        definitions: &[FragmentDefinition],
        ctx: &mut BuildContext<'_>,
    ) -> FragmentTable {
        let mut table = FragmentTable::default();
        for definition in definitions {
            ctx.flag_directives(&definition.directives);
            let (fields, spreads) =
                self.convert_selections(&definition.selection_set, &definition.name, 1, ctx);
            table.fragments.insert(
                definition.name.clone(),
                FragmentBody {
                    type_condition: definition.type_condition.clone(),
                    fields,
                    spreads,
                },
            );
        }
        table
    }

    fn convert_selections(
        &self,
        selections: &[Selection],
        path: &str,
        depth: usize,
        ctx: &mut BuildContext<'_>,
    ) -> (Vec<ProtoField>, Vec<String>) {
        let mut fields: Vec<ProtoField> = Vec::new();
        let mut spreads: Vec<String> = Vec::new();

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    let converted = self.convert_field(field, path, depth, ctx);
                    merge_field(&mut fields, converted);
                }
                Selection::FragmentSpread(spread) => {
                    ctx.flag_directives(&spread.directives);
                    if !ctx.fragment_types.contains_key(spread.name.as_str()) {
                        ctx.flag(UnQuellableReason::UnknownFragment(spread.name.clone()));
                    } else if !spreads.contains(&spread.name) {
                        spreads.push(spread.name.clone());
                    }
                }
                Selection::InlineFragment(inline) => {
                    ctx.flag(UnQuellableReason::InlineFragment);
                    let (inner, inner_spreads) =
                        self.convert_selections(&inline.selection_set, path, depth, ctx);
                    for field in inner {
                        merge_field(&mut fields, field);
                    }
                    for name in inner_spreads {
                        if !spreads.contains(&name) {
                            spreads.push(name);
                        }
                    }
                }
            }
        }

        (fields, spreads)
    }

    fn convert_field(
        &self,
        field: &Field,
        parent_path: &str,
        depth: usize,
        ctx: &mut BuildContext<'_>,
    ) -> ProtoField {
        let response_key = field.alias.as_deref().unwrap_or(&field.name);
        let path = if parent_path.is_empty() {
            response_key.to_string()
        } else {
            format!("{}.{}", parent_path, response_key)
        };

        ctx.flag_directives(&field.directives);
        if field.arguments.iter().any(|(_, value)| value.has_variable()) {
            ctx.flag(UnQuellableReason::Variables);
        }

        let mut proto = ProtoField {
            name: field.name.clone(),
            alias: field.alias.clone(),
            arguments: field.arguments.clone(),
            kind: FieldKind::Scalar { satisfied: None },
            spreads: Vec::new(),
        };

        if field.selection_set.is_empty() {
            if depth == 0 && ctx.root_collections {
                ctx.flag(UnQuellableReason::RootScalar(field.name.clone()));
            }
            return proto;
        }

        let (children, spreads) =
            self.convert_selections(&field.selection_set, &path, depth + 1, ctx);
        proto.spreads = spreads;

        let type_name = self.maps.type_of(&field.name).or_else(|| {
            proto
                .spreads
                .iter()
                .find_map(|name| ctx.fragment_types.get(name.as_str()).copied())
        });

        let Some(type_name) = type_name else {
            ctx.flag(UnQuellableReason::Unmapped(UnmappedTypeError {
                field: field.name.clone(),
                path,
            }));
            proto.kind = FieldKind::Unmapped { children };
            return proto;
        };
        let type_name = type_name.to_string();

        let identifier = field
            .arguments
            .iter()
            .find(|(name, _)| self.identifiers.contains(name))
            .and_then(|(_, value)| value.as_identifier());

        proto.kind = match identifier {
            Some(identifier) => FieldKind::Entity {
                type_name,
                identifier: Some(identifier),
                children,
            },
            None if depth == 0 && ctx.root_collections => {
                FieldKind::Collection { type_name, children }
            }
            None if self.maps.is_collection_field(&type_name, &field.name) => {
                FieldKind::Collection { type_name, children }
            }
            None => FieldKind::Entity {
                type_name,
                identifier: None,
                children,
            },
        };
        proto
    }
}

/// Add `incoming` to `fields`, folding it into an existing field with the
/// same response key
fn merge_field(fields: &mut Vec<ProtoField>, incoming: ProtoField) {
    let Some(index) = fields
        .iter()
        .position(|f| f.response_key() == incoming.response_key())
    else {
        fields.push(incoming);
        return;
    };
    let existing = &mut fields[index];

    for name in incoming.spreads {
        if !existing.spreads.contains(&name) {
            existing.spreads.push(name);
        }
    }

    let incoming_children = match incoming.kind {
        FieldKind::Scalar { .. } => return,
        FieldKind::Entity { children, .. }
        | FieldKind::Collection { children, .. }
        | FieldKind::Unmapped { children } => children,
    };
    if let Some(children) = existing.kind.children_vec() {
        for child in incoming_children {
            merge_field(children, child);
        }
    }
}

fn expand_into(
    fields: &mut Vec<ProtoField>,
    spreads: Vec<String>,
    fragments: &FragmentTable,
    active: &mut Vec<String>,
) {
    for name in spreads {
        if active.contains(&name) {
            continue;
        }
        let Some(body) = fragments.get(&name) else {
            continue;
        };

        for field in body.fields.iter().cloned() {
            merge_field(fields, field);
        }
        active.push(name);
        expand_into(fields, body.spreads.clone(), fragments, active);
        active.pop();
    }

    for field in fields.iter_mut() {
        let nested = std::mem::take(&mut field.spreads);
        if let Some(children) = field.kind.children_vec() {
            expand_into(children, nested, fragments, active);
        }
    }
}
