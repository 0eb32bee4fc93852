//! Bundled table definition and sample items the Create handler seeds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::HandlerError;

/// BatchWriteItem accepts at most this many put requests per call.
pub const BATCH_WRITE_LIMIT: usize = 25;

/// Attribute holding an optional export id; dropped when empty.
pub const EXPORT_ID_ATTRIBUTE: &str = "__id";

const TABLE_DEFINITION_JSON: &str = include_str!("../assets/table-definition.json");
const TABLE_DATA_JSON: &str = include_str!("../assets/table-data.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    S,
    N,
    B,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyType {
    Hash,
    Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AttributeDefinition {
    pub attribute_name: String,
    pub attribute_type: ScalarType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySchemaElement {
    pub attribute_name: String,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamSpecification {
    pub stream_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_view_type: Option<String>,
}

/// CreateTable input in the service's own JSON shape. The table name is
/// always taken from the environment, never from the bundled file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableDefinition {
    #[serde(default)]
    pub table_name: String,
    pub attribute_definitions: Vec<AttributeDefinition>,
    pub key_schema: Vec<KeySchemaElement>,
    #[serde(default = "default_billing_mode")]
    pub billing_mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_specification: Option<StreamSpecification>,
}

fn default_billing_mode() -> String {
    "PAY_PER_REQUEST".to_string()
}

impl TableDefinition {
    pub fn bundled(table_name: &str) -> Result<TableDefinition, HandlerError> {
        let mut definition: TableDefinition = serde_json::from_str(TABLE_DEFINITION_JSON)
            .map_err(|error| HandlerError::Seed(format!("table definition: {error}")))?;
        definition.table_name = table_name.to_string();
        Ok(definition)
    }

    pub fn key_attributes(&self) -> impl Iterator<Item = &str> {
        self.key_schema
            .iter()
            .map(|element| element.attribute_name.as_str())
    }
}

/// A DynamoDB attribute value in the service's JSON encoding
/// (`{"S": "..."}`, `{"N": "..."}`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    S(String),
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    M(BTreeMap<String, AttributeValue>),
    L(Vec<AttributeValue>),
    SS(Vec<String>),
    NS(Vec<String>),
}

impl AttributeValue {
    fn is_empty(&self) -> bool {
        match self {
            Self::S(value) | Self::N(value) => value.is_empty(),
            Self::Null(_) => true,
            Self::M(map) => map.is_empty(),
            Self::L(items) => items.is_empty(),
            Self::SS(items) | Self::NS(items) => items.is_empty(),
            Self::Bool(_) => false,
        }
    }
}

pub type Item = BTreeMap<String, AttributeValue>;

pub fn bundled_items() -> Result<Vec<Item>, HandlerError> {
    serde_json::from_str(TABLE_DATA_JSON)
        .map_err(|error| HandlerError::Seed(format!("table data: {error}")))
}

/// Drops an empty export id so it never reaches the table.
pub fn prepare_item(mut item: Item) -> Item {
    if item
        .get(EXPORT_ID_ATTRIBUTE)
        .is_some_and(AttributeValue::is_empty)
    {
        item.remove(EXPORT_ID_ATTRIBUTE);
    }
    item
}

/// Prepared items split into BatchWriteItem-sized groups, after checking
/// every item carries the table's key attributes.
pub fn write_batches(
    definition: &TableDefinition,
    items: Vec<Item>,
) -> Result<Vec<Vec<Item>>, HandlerError> {
    let prepared: Vec<Item> = items.into_iter().map(prepare_item).collect();
    for (index, item) in prepared.iter().enumerate() {
        if let Some(missing) = definition
            .key_attributes()
            .find(|key| !item.contains_key(*key))
        {
            return Err(HandlerError::Seed(format!(
                "item {index} is missing key attribute `{missing}`"
            )));
        }
    }
    Ok(prepared
        .chunks(BATCH_WRITE_LIMIT)
        .map(|chunk| chunk.to_vec())
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bundled_definition_takes_table_name() {
        let definition = TableDefinition::bundled("orders").expect("bundled definition parses");
        assert_eq!(definition.table_name, "orders");
        assert_eq!(definition.key_attributes().collect::<Vec<_>>(), vec!["id"]);
        assert!(definition
            .stream_specification
            .as_ref()
            .is_some_and(|stream| stream.stream_enabled));
    }

    #[test]
    fn bundled_items_cover_both_document_types() {
        let items = bundled_items().expect("bundled items parse");
        let kinds: Vec<&AttributeValue> = items.iter().filter_map(|item| item.get("type")).collect();
        assert!(kinds.contains(&&AttributeValue::S("fare".to_string())));
        assert!(kinds.contains(&&AttributeValue::S("flight".to_string())));
        assert!(items.len() > BATCH_WRITE_LIMIT);
    }

    #[test]
    fn empty_export_id_is_dropped() {
        let item: Item = serde_json::from_value(json!({
            "id": {"S": "fare-1"},
            "__id": {"S": ""}
        }))
        .expect("item parses");
        assert!(!prepare_item(item).contains_key(EXPORT_ID_ATTRIBUTE));

        let kept: Item = serde_json::from_value(json!({
            "id": {"S": "fare-2"},
            "__id": {"S": "export-7"}
        }))
        .expect("item parses");
        assert!(prepare_item(kept).contains_key(EXPORT_ID_ATTRIBUTE));
    }

    #[test]
    fn batches_never_exceed_limit() {
        let definition = TableDefinition::bundled("t").expect("definition");
        let items = bundled_items().expect("items");
        let total = items.len();
        let batches = write_batches(&definition, items).expect("valid items");

        assert!(batches.iter().all(|batch| batch.len() <= BATCH_WRITE_LIMIT));
        assert_eq!(batches.iter().map(Vec::len).sum::<usize>(), total);
        assert!(batches
            .iter()
            .flatten()
            .all(|item| !item.contains_key(EXPORT_ID_ATTRIBUTE)));
    }

    #[test]
    fn items_without_key_are_rejected() {
        let definition = TableDefinition::bundled("t").expect("definition");
        let item: Item =
            serde_json::from_value(json!({"type": {"S": "fare"}})).expect("item parses");
        let error = write_batches(&definition, vec![item]).expect_err("missing key");
        assert!(error.to_string().contains("missing key attribute `id`"));
    }
}
