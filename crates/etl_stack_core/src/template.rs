//! CloudFormation template rendering.
//!
//! Only explicit ordering edges are written as `DependsOn`; reference edges
//! are already implied by the intrinsics CloudFormation sees.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::stack::StackDeclaration;

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";
pub const TEMPLATE_DESCRIPTION: &str =
    "OpenSearch Serverless collection fed from DynamoDB through an OpenSearch Ingestion pipeline";

pub fn render_template(declaration: &StackDeclaration) -> Value {
    let mut parameters = Map::new();
    for parameter in &declaration.template_parameters {
        let mut entry = Map::new();
        entry.insert("Type".to_string(), json!("String"));
        entry.insert("Description".to_string(), json!(parameter.description));
        if let Some(default) = &parameter.default {
            entry.insert("Default".to_string(), json!(default));
        }
        parameters.insert(parameter.name.to_string(), Value::Object(entry));
    }

    let mut resources = Map::new();
    for node in declaration.graph.nodes() {
        let mut entry = Map::new();
        entry.insert("Type".to_string(), json!(node.resource_type));
        if !node.explicit_dependencies().is_empty() {
            entry.insert(
                "DependsOn".to_string(),
                json!(node.explicit_dependencies()),
            );
        }
        if let Some(policy) = node.deletion_policy {
            entry.insert("DeletionPolicy".to_string(), json!(policy.as_str()));
            entry.insert("UpdateReplacePolicy".to_string(), json!(policy.as_str()));
        }
        entry.insert("Properties".to_string(), node.properties.clone());
        resources.insert(node.logical_id.clone(), Value::Object(entry));
    }

    let mut outputs = Map::new();
    for output in &declaration.outputs {
        outputs.insert(
            output.name.to_string(),
            json!({ "Value": output.value.to_template_value() }),
        );
    }

    json!({
        "AWSTemplateFormatVersion": TEMPLATE_FORMAT_VERSION,
        "Description": TEMPLATE_DESCRIPTION,
        "Parameters": parameters,
        "Resources": resources,
        "Outputs": outputs,
    })
}

/// Pretty JSON with a trailing newline, the form written to disk.
pub fn render_template_string(declaration: &StackDeclaration) -> Result<String, serde_json::Error> {
    let mut rendered = serde_json::to_string_pretty(&render_template(declaration))?;
    rendered.push('\n');
    Ok(rendered)
}

/// SHA-256 over the compact rendering; object keys are sorted, so equal
/// declarations always hash the same.
pub fn template_fingerprint(template: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(template.to_string());
    format!("{:x}", hasher.finalize())
}
