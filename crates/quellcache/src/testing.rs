//! In-process graph server for engine tests

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};

use crate::ast::{Document, Field, Selection};
use crate::config::TypeMaps;
use crate::parser::parse_document;
use crate::transport::{GraphResponse, Transport, TransportError};

/// Type maps of the country dataset
pub fn maps() -> TypeMaps {
    TypeMaps::new()
        .with_field("country", "Country")
        .with_field("countries", "Country")
        .with_field("city", "City")
        .with_field("cities", "City")
        .with_field("capital", "City")
        .with_field("addCountry", "Country")
        .with_field("deleteCountry", "Country")
        .with_field("updateCountry", "Country")
        .with_collection("City", "cities")
}

/// Root data of the country dataset
pub fn countries() -> Map<String, Value> {
    let dataset = json!({
        "countries": [
            {
                "id": 1,
                "name": "Bolivia",
                "population": 12,
                "weather": {"temp": 21},
                "capital": {"id": 10, "name": "Sucre"},
                "cities": [{"id": 10, "name": "Sucre"}, {"id": 11, "name": "La Paz"}]
            },
            {
                "id": 2,
                "name": "Peru",
                "population": 33,
                "weather": {"temp": 18},
                "capital": {"id": 20, "name": "Lima"},
                "cities": [{"id": 20, "name": "Lima"}]
            },
            {
                "id": 3,
                "name": "Chile",
                "population": 19,
                "weather": {"temp": 15},
                "capital": null,
                "cities": []
            }
        ]
    });
    match dataset {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Answers queries by projecting them over a JSON dataset
///
/// `country(id: n)` is looked up in `countries`; other root fields are read
/// by name. Scripted responses, when queued, are returned first.
pub struct FakeServer {
    dataset: Map<String, Value>,
    requests: Mutex<Vec<String>>,
    scripted: Mutex<VecDeque<Result<GraphResponse, TransportError>>>,
}

impl FakeServer {
    pub fn new(dataset: Map<String, Value>) -> Self {
        Self {
            dataset,
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a canned answer for the next request
    pub fn script(&self, response: Result<GraphResponse, TransportError>) {
        self.scripted.lock().push_back(response);
    }

    /// Query texts received so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }

    fn resolve_root(&self, field: &Field, document: &Document) -> Value {
        let source = match self.dataset.get(&field.name) {
            Some(value) => value.clone(),
            None => self.lookup(field),
        };
        if field.selection_set.is_empty() {
            return source;
        }
        project(&source, &field.selection_set, document)
    }

    fn lookup(&self, field: &Field) -> Value {
        let plural = match field.name.strip_suffix('y') {
            Some(stem) => format!("{}ies", stem),
            None => format!("{}s", field.name),
        };

        let wanted = field
            .arguments
            .iter()
            .find(|(name, _)| name == "id")
            .and_then(|(_, value)| value.as_identifier());
        let items = self.dataset.get(&plural).and_then(Value::as_array);

        match (wanted, items) {
            (Some(wanted), Some(items)) => items
                .iter()
                .find(|item| match item.get("id") {
                    Some(Value::Number(n)) => n.to_string() == wanted,
                    Some(Value::String(s)) => *s == wanted,
                    _ => false,
                })
                .cloned()
                .unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }
}

fn project(value: &Value, selections: &[Selection], document: &Document) -> Value {
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| project(item, selections, document))
                .collect(),
        ),
        Value::Object(object) => {
            let mut out = Map::new();
            project_into(&mut out, object, selections, document);
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn project_into(
    out: &mut Map<String, Value>,
    object: &Map<String, Value>,
    selections: &[Selection],
    document: &Document,
) {
    for selection in selections {
        match selection {
            Selection::Field(field) => {
                let key = field.alias.as_deref().unwrap_or(&field.name);
                let value = object.get(&field.name).unwrap_or(&Value::Null);
                let value = if field.selection_set.is_empty() {
                    value.clone()
                } else {
                    project(value, &field.selection_set, document)
                };
                out.insert(key.to_string(), value);
            }
            Selection::FragmentSpread(spread) => {
                if let Some(fragment) = document.fragments.iter().find(|f| f.name == spread.name) {
                    project_into(out, object, &fragment.selection_set, document);
                }
            }
            Selection::InlineFragment(inline) => {
                project_into(out, object, &inline.selection_set, document);
            }
        }
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn execute(
        &self,
        _endpoint: &str,
        query: &str,
        _headers: &BTreeMap<String, String>,
    ) -> Result<GraphResponse, TransportError> {
        self.requests.lock().push(query.to_string());
        if let Some(response) = self.scripted.lock().pop_front() {
            return response;
        }

        let document =
            parse_document(query).map_err(|e| TransportError::Other(e.to_string()))?;
        let Some(operation) = document.operations.first() else {
            return Err(TransportError::Other("no operation".to_string()));
        };

        let mut data = Map::new();
        for selection in &operation.selection_set {
            if let Selection::Field(field) = selection {
                let key = field.alias.as_deref().unwrap_or(&field.name);
                data.insert(key.to_string(), self.resolve_root(field, &document));
            }
        }
        Ok(GraphResponse::from_data(data))
    }
}
