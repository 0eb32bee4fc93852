//! Stack outputs and their projection onto realized resources.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::DeclarationError;
use crate::intrinsics::{get_att, reference, RealizedResources};

pub const BUCKET_NAME: &str = "BucketName";
pub const TABLE_NAME: &str = "TableName";
pub const COLLECTION_ENDPOINT: &str = "OpenSearchServerlessCollectionEndpoint";
pub const PIPELINE_NAME: &str = "OpenSearchIngestionPipelineName";
pub const LOG_GROUP: &str = "OpenSearchIngestionLogGroup";
pub const VPC_ID: &str = "OpenSearchServerlessVPCId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputValue {
    Literal(String),
    Ref(String),
    Attribute { logical_id: String, attribute: String },
}

impl OutputValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(logical_id: &str) -> Self {
        Self::Ref(logical_id.to_string())
    }

    pub fn attribute(logical_id: &str, attribute: &str) -> Self {
        Self::Attribute {
            logical_id: logical_id.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// The template form of the value.
    pub fn to_template_value(&self) -> Value {
        match self {
            Self::Literal(value) => json!(value),
            Self::Ref(logical_id) => reference(logical_id),
            Self::Attribute {
                logical_id,
                attribute,
            } => get_att(logical_id, attribute),
        }
    }

    /// Logical id this value depends on, if any.
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::Literal(_) => None,
            Self::Ref(logical_id) | Self::Attribute { logical_id, .. } => Some(logical_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDeclaration {
    pub name: &'static str,
    pub value: OutputValue,
}

impl OutputDeclaration {
    pub fn new(name: &'static str, value: OutputValue) -> Self {
        Self { name, value }
    }
}

/// Projects declared outputs onto what an apply produced. Output names are
/// unique, so a map loses nothing; declaration order is kept by the caller's
/// slice when it matters.
pub fn publish(
    outputs: &[OutputDeclaration],
    realized: &RealizedResources,
) -> Result<BTreeMap<String, String>, DeclarationError> {
    let mut published = BTreeMap::new();
    for output in outputs {
        let value = realized.resolve_string(&output.value.to_template_value())?;
        published.insert(output.name.to_string(), value);
    }
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn declared() -> Vec<OutputDeclaration> {
        vec![
            OutputDeclaration::new(TABLE_NAME, OutputValue::literal("orders")),
            OutputDeclaration::new(VPC_ID, OutputValue::reference("Vpc")),
            OutputDeclaration::new(
                COLLECTION_ENDPOINT,
                OutputValue::attribute("Collection", "CollectionEndpoint"),
            ),
        ]
    }

    #[test]
    fn publishes_literals_and_references() {
        let mut realized = RealizedResources::new("us-east-1", "1", "stack");
        realized.set_physical_id("Vpc", "vpc-0abc");
        realized.set_attribute("Collection", "CollectionEndpoint", "https://abc.aoss.amazonaws.com");

        let published = publish(&declared(), &realized).expect("all outputs resolve");
        assert_eq!(published[TABLE_NAME], "orders");
        assert_eq!(published[VPC_ID], "vpc-0abc");
        assert_eq!(
            published[COLLECTION_ENDPOINT],
            "https://abc.aoss.amazonaws.com"
        );
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let realized = RealizedResources::new("us-east-1", "1", "stack");
        let error = publish(&declared(), &realized).expect_err("vpc is not realized");
        assert_eq!(error, DeclarationError::Unresolved("Ref Vpc".to_string()));
    }

    #[test]
    fn template_form_uses_intrinsics() {
        assert_eq!(
            OutputValue::attribute("Collection", "Arn").to_template_value(),
            json!({"Fn::GetAtt": ["Collection", "Arn"]})
        );
        assert_eq!(OutputValue::literal("x").source(), None);
        assert_eq!(OutputValue::reference("Vpc").source(), Some("Vpc"));
    }
}
