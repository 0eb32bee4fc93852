//! CloudFormation intrinsic functions: constructors used by the declarator,
//! reference extraction used by the graph, and evaluation against realized
//! resources used by the output publisher and the handler environment.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};

use crate::error::DeclarationError;

pub const AWS_REGION: &str = "AWS::Region";
pub const AWS_ACCOUNT_ID: &str = "AWS::AccountId";
pub const AWS_PARTITION: &str = "AWS::Partition";
pub const AWS_STACK_NAME: &str = "AWS::StackName";

const PSEUDO_PARAMETER_PREFIX: &str = "AWS::";

pub fn reference(logical_id: &str) -> Value {
    json!({ "Ref": logical_id })
}

pub fn get_att(logical_id: &str, attribute: &str) -> Value {
    json!({ "Fn::GetAtt": [logical_id, attribute] })
}

pub fn sub(template: impl Into<String>) -> Value {
    json!({ "Fn::Sub": template.into() })
}

pub fn join(delimiter: &str, parts: Vec<Value>) -> Value {
    json!({ "Fn::Join": [delimiter, parts] })
}

pub fn is_pseudo_parameter(name: &str) -> bool {
    name.starts_with(PSEUDO_PARAMETER_PREFIX)
}

/// Variable names appearing in an `Fn::Sub` template, in order of
/// appearance. `${!Literal}` escapes are skipped.
pub fn sub_variables(template: &str) -> Vec<&str> {
    let mut variables = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            break;
        };
        let name = &after[..end];
        if !name.starts_with('!') && !name.is_empty() {
            variables.push(name);
        }
        rest = &after[end + 1..];
    }
    variables
}

/// Collects the names every `Ref`, `Fn::GetAtt` and `Fn::Sub` inside `value`
/// points at. Pseudo parameters are skipped; template parameters are not
/// distinguished here.
pub fn collect_references(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.len() == 1 {
                if let Some(Value::String(target)) = map.get("Ref") {
                    if !is_pseudo_parameter(target) {
                        out.insert(target.clone());
                    }
                    return;
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                    if let Some(Value::String(target)) = args.first() {
                        out.insert(target.clone());
                    }
                    return;
                }
                if let Some(args) = map.get("Fn::Sub") {
                    collect_sub_references(args, out);
                    return;
                }
            }
            for nested in map.values() {
                collect_references(nested, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

fn collect_sub_references(args: &Value, out: &mut BTreeSet<String>) {
    let (template, local_vars) = match args {
        Value::String(template) => (template.as_str(), None),
        Value::Array(items) => match (items.first(), items.get(1)) {
            (Some(Value::String(template)), Some(Value::Object(vars))) => {
                for nested in vars.values() {
                    collect_references(nested, out);
                }
                (template.as_str(), Some(vars))
            }
            (Some(Value::String(template)), None) => (template.as_str(), None),
            _ => return,
        },
        _ => return,
    };

    for variable in sub_variables(template) {
        let base = variable.split('.').next().unwrap_or(variable);
        if is_pseudo_parameter(base) {
            continue;
        }
        if local_vars.is_some_and(|vars| vars.contains_key(variable)) {
            continue;
        }
        out.insert(base.to_string());
    }
}

/// Concrete values produced by an apply: physical ids, attributes, template
/// parameter values and pseudo parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealizedResources {
    pseudo_parameters: BTreeMap<String, String>,
    parameters: BTreeMap<String, String>,
    physical_ids: BTreeMap<String, String>,
    attributes: BTreeMap<String, BTreeMap<String, String>>,
}

impl RealizedResources {
    pub fn new(region: &str, account_id: &str, stack_name: &str) -> Self {
        let pseudo_parameters = BTreeMap::from([
            (AWS_REGION.to_string(), region.to_string()),
            (AWS_ACCOUNT_ID.to_string(), account_id.to_string()),
            (AWS_PARTITION.to_string(), "aws".to_string()),
            (AWS_STACK_NAME.to_string(), stack_name.to_string()),
        ]);
        Self {
            pseudo_parameters,
            ..Default::default()
        }
    }

    pub fn set_parameter(&mut self, name: &str, value: impl Into<String>) {
        self.parameters.insert(name.to_string(), value.into());
    }

    pub fn set_physical_id(&mut self, logical_id: &str, physical_id: impl Into<String>) {
        self.physical_ids
            .insert(logical_id.to_string(), physical_id.into());
    }

    pub fn set_attribute(&mut self, logical_id: &str, attribute: &str, value: impl Into<String>) {
        self.attributes
            .entry(logical_id.to_string())
            .or_default()
            .insert(attribute.to_string(), value.into());
    }

    pub fn physical_id(&self, logical_id: &str) -> Option<&str> {
        self.physical_ids.get(logical_id).map(String::as_str)
    }

    pub fn is_realized(&self, logical_id: &str) -> bool {
        self.physical_ids.contains_key(logical_id)
    }

    pub fn forget(&mut self, logical_id: &str) {
        self.physical_ids.remove(logical_id);
        self.attributes.remove(logical_id);
    }

    fn lookup_ref(&self, name: &str) -> Result<String, DeclarationError> {
        self.pseudo_parameters
            .get(name)
            .or_else(|| self.parameters.get(name))
            .or_else(|| self.physical_ids.get(name))
            .cloned()
            .ok_or_else(|| DeclarationError::Unresolved(format!("Ref {name}")))
    }

    fn lookup_attribute(&self, logical_id: &str, attribute: &str) -> Result<String, DeclarationError> {
        self.attributes
            .get(logical_id)
            .and_then(|attributes| attributes.get(attribute))
            .cloned()
            .ok_or_else(|| DeclarationError::Unresolved(format!("{logical_id}.{attribute}")))
    }

    /// Evaluates every intrinsic inside `value`.
    pub fn resolve(&self, value: &Value) -> Result<Value, DeclarationError> {
        match value {
            Value::Object(map) if map.len() == 1 => {
                if let Some(Value::String(target)) = map.get("Ref") {
                    return self.lookup_ref(target).map(Value::String);
                }
                if let Some(Value::Array(args)) = map.get("Fn::GetAtt") {
                    return match (args.first(), args.get(1)) {
                        (Some(Value::String(id)), Some(Value::String(attribute))) => {
                            self.lookup_attribute(id, attribute).map(Value::String)
                        }
                        _ => Err(DeclarationError::Unresolved(format!(
                            "malformed Fn::GetAtt {value}"
                        ))),
                    };
                }
                if let Some(Value::String(template)) = map.get("Fn::Sub") {
                    return self.substitute(template).map(Value::String);
                }
                if let Some(Value::Array(args)) = map.get("Fn::Join") {
                    return self.join(args).map(Value::String);
                }
                self.resolve_members(map)
            }
            Value::Object(map) => self.resolve_members(map),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    /// Like [`Self::resolve`] but requires the result to be a string.
    pub fn resolve_string(&self, value: &Value) -> Result<String, DeclarationError> {
        match self.resolve(value)? {
            Value::String(text) => Ok(text),
            Value::Number(number) => Ok(number.to_string()),
            other => Err(DeclarationError::Unresolved(format!(
                "{other} is not a scalar string"
            ))),
        }
    }

    fn resolve_members(
        &self,
        map: &serde_json::Map<String, Value>,
    ) -> Result<Value, DeclarationError> {
        let mut resolved = serde_json::Map::with_capacity(map.len());
        for (key, nested) in map {
            resolved.insert(key.clone(), self.resolve(nested)?);
        }
        Ok(Value::Object(resolved))
    }

    fn join(&self, args: &[Value]) -> Result<String, DeclarationError> {
        let (Some(Value::String(delimiter)), Some(Value::Array(parts))) = (args.first(), args.get(1))
        else {
            return Err(DeclarationError::Unresolved("malformed Fn::Join".to_string()));
        };
        let parts = parts
            .iter()
            .map(|part| self.resolve_string(part))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(parts.join(delimiter))
    }

    fn substitute(&self, template: &str) -> Result<String, DeclarationError> {
        let mut output = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("${") {
            output.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                output.push_str(&rest[start..]);
                rest = "";
                break;
            };
            let name = &after[..end];
            if let Some(literal) = name.strip_prefix('!') {
                output.push_str("${");
                output.push_str(literal);
                output.push('}');
            } else if is_pseudo_parameter(name) {
                output.push_str(&self.lookup_ref(name)?);
            } else if let Some((id, attribute)) = name.split_once('.') {
                output.push_str(&self.lookup_attribute(id, attribute)?);
            } else {
                output.push_str(&self.lookup_ref(name)?);
            }
            rest = &after[end + 1..];
        }
        output.push_str(rest);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_variables_skip_escapes() {
        let variables = sub_variables("arn:${AWS::Partition}:x/${Role.Arn}/${!Literal}/${Bucket}");
        assert_eq!(variables, vec!["AWS::Partition", "Role.Arn", "Bucket"]);
    }

    #[test]
    fn collects_refs_get_atts_and_sub_variables() {
        let value = json!({
            "Role": get_att("IngestionRole", "Arn"),
            "Vpc": reference("Vpc"),
            "Region": reference(AWS_REGION),
            "Doc": sub("${DataAccess.Name}-${AWS::AccountId}"),
            "Nested": [join("", vec![json!("["), reference("SubnetA"), json!("]")])],
        });

        let mut references = BTreeSet::new();
        collect_references(&value, &mut references);

        let expected: BTreeSet<String> = ["DataAccess", "IngestionRole", "SubnetA", "Vpc"]
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(references, expected);
    }

    #[test]
    fn sub_list_form_skips_local_variables() {
        let value = json!({
            "Fn::Sub": ["${Local}-${Bucket}", { "Local": reference("Vpc") }]
        });
        let mut references = BTreeSet::new();
        collect_references(&value, &mut references);
        assert!(references.contains("Vpc"));
        assert!(references.contains("Bucket"));
        assert!(!references.contains("Local"));
    }

    #[test]
    fn resolves_nested_intrinsics() {
        let mut realized = RealizedResources::new("us-east-1", "111111111111", "EtlStack");
        realized.set_physical_id("SubnetA", "subnet-a");
        realized.set_physical_id("SubnetB", "subnet-b");
        realized.set_attribute("IngestionRole", "Arn", "arn:aws:iam::111111111111:role/x");

        let value = json!({
            "List": join("", vec![
                json!("[\""),
                reference("SubnetA"),
                json!("\",\""),
                reference("SubnetB"),
                json!("\"]"),
            ]),
            "Arn": sub("arn:${AWS::Partition}:osis:${AWS::Region}:${AWS::AccountId}:pipeline/p"),
            "Role": get_att("IngestionRole", "Arn"),
            "Escaped": sub("${!Keep}"),
        });

        let resolved = realized.resolve(&value).expect("all references are realized");
        assert_eq!(resolved["List"], json!("[\"subnet-a\",\"subnet-b\"]"));
        assert_eq!(
            resolved["Arn"],
            json!("arn:aws:osis:us-east-1:111111111111:pipeline/p")
        );
        assert_eq!(resolved["Role"], json!("arn:aws:iam::111111111111:role/x"));
        assert_eq!(resolved["Escaped"], json!("${Keep}"));
    }

    #[test]
    fn unresolved_reference_is_an_error() {
        let realized = RealizedResources::new("us-east-1", "111111111111", "EtlStack");
        let error = realized
            .resolve(&get_att("Collection", "CollectionEndpoint"))
            .expect_err("collection is not realized");
        assert_eq!(
            error,
            DeclarationError::Unresolved("Collection.CollectionEndpoint".to_string())
        );
    }
}
