//! OpenSearch Serverless security and data-access policy documents.

use serde::{Deserialize, Serialize};

pub const ENCRYPTION_POLICY_NAME: &str = "ddb-etl-encryption-policy";
pub const NETWORK_POLICY_NAME: &str = "ddb-etl-network-policy";
pub const DATA_ACCESS_POLICY_NAME: &str = "ddb-etl-access-policy";

const COLLECTION_PERMISSIONS: [&str; 4] = [
    "aoss:CreateCollectionItems",
    "aoss:DescribeCollectionItems",
    "aoss:DeleteCollectionItems",
    "aoss:UpdateCollectionItems",
];

const INDEX_PERMISSIONS: [&str; 6] = [
    "aoss:CreateIndex",
    "aoss:DeleteIndex",
    "aoss:UpdateIndex",
    "aoss:DescribeIndex",
    "aoss:ReadDocument",
    "aoss:WriteDocument",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Collection,
    Dashboard,
    Index,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(rename = "ResourceType")]
    pub resource_type: ResourceType,
    #[serde(rename = "Resource")]
    pub resource: Vec<String>,
    #[serde(rename = "Permission", skip_serializing_if = "Vec::is_empty", default)]
    pub permission: Vec<String>,
}

impl PolicyRule {
    fn new(resource_type: ResourceType, resource: String) -> Self {
        Self {
            resource_type,
            resource: vec![resource],
            permission: Vec::new(),
        }
    }

    fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permission = permissions.iter().map(|p| p.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionPolicy {
    #[serde(rename = "Rules")]
    pub rules: Vec<PolicyRule>,
    #[serde(rename = "AWSOwnedKey")]
    pub aws_owned_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicyStatement {
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none", default)]
    pub description: Option<String>,
    #[serde(rename = "Rules")]
    pub rules: Vec<PolicyRule>,
    #[serde(rename = "AllowFromPublic")]
    pub allow_from_public: bool,
    #[serde(rename = "SourceVPCEs", skip_serializing_if = "Vec::is_empty", default)]
    pub source_vpces: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAccessStatement {
    #[serde(rename = "Rules")]
    pub rules: Vec<PolicyRule>,
    #[serde(rename = "Principal")]
    pub principal: Vec<String>,
}

fn collection_resource(collection_name: &str) -> String {
    format!("collection/{collection_name}")
}

fn collection_pattern(collection_name: &str) -> String {
    format!("collection/{collection_name}*")
}

fn index_pattern(collection_name: &str) -> String {
    format!("index/{collection_name}*/*")
}

pub fn encryption_policy(collection_name: &str) -> EncryptionPolicy {
    EncryptionPolicy {
        rules: vec![PolicyRule::new(
            ResourceType::Collection,
            collection_pattern(collection_name),
        )],
        aws_owned_key: true,
    }
}

/// Network policy the stack starts with: collection and dashboard reachable
/// publicly until the handler narrows it to the VPC endpoint.
pub fn initial_network_policy(collection_name: &str) -> Vec<NetworkPolicyStatement> {
    vec![NetworkPolicyStatement {
        description: None,
        rules: vec![
            PolicyRule::new(ResourceType::Collection, collection_resource(collection_name)),
            PolicyRule::new(ResourceType::Dashboard, collection_resource(collection_name)),
        ],
        allow_from_public: true,
        source_vpces: Vec::new(),
    }]
}

/// Network policy written by the handler once the VPC endpoint exists: the
/// collection API only through that endpoint, the dashboard still public.
pub fn vpc_only_network_policy(
    collection_name: &str,
    vpc_endpoint_id: &str,
) -> Vec<NetworkPolicyStatement> {
    vec![
        NetworkPolicyStatement {
            description: Some("VPC only access to the OpenSearch APIs".to_string()),
            rules: vec![PolicyRule::new(
                ResourceType::Collection,
                collection_resource(collection_name),
            )],
            allow_from_public: false,
            source_vpces: vec![vpc_endpoint_id.to_string()],
        },
        NetworkPolicyStatement {
            description: Some("Public access to the dashboard".to_string()),
            rules: vec![PolicyRule::new(
                ResourceType::Dashboard,
                collection_resource(collection_name),
            )],
            allow_from_public: true,
            source_vpces: Vec::new(),
        },
    ]
}

pub fn data_access_policy(collection_name: &str, principals: Vec<String>) -> Vec<DataAccessStatement> {
    vec![DataAccessStatement {
        rules: vec![
            PolicyRule::new(ResourceType::Collection, collection_pattern(collection_name))
                .with_permissions(&COLLECTION_PERMISSIONS),
            PolicyRule::new(ResourceType::Index, index_pattern(collection_name))
                .with_permissions(&INDEX_PERMISSIONS),
        ],
        principal: principals,
    }]
}

pub fn network_policy_description(collection_name: &str) -> String {
    format!("Network policy for {collection_name} collection.")
}

/// Compact JSON text, the form the policy APIs accept. The policy types hold
/// only strings, lists and flags, so serialization cannot fail.
pub fn render_policy(document: &impl Serialize) -> String {
    serde_json::to_string(document).expect("policy documents always serialize")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn encryption_policy_uses_wildcard_collection() {
        let rendered: Value =
            serde_json::from_str(&render_policy(&encryption_policy("etl"))).expect("json");
        assert_eq!(
            rendered,
            json!({
                "Rules": [{"ResourceType": "collection", "Resource": ["collection/etl*"]}],
                "AWSOwnedKey": true
            })
        );
    }

    #[test]
    fn vpc_only_policy_pins_endpoint() {
        let rendered: Value = serde_json::from_str(&render_policy(&vpc_only_network_policy(
            "etl",
            "vpce-123",
        )))
        .expect("json");
        assert_eq!(rendered[0]["AllowFromPublic"], false);
        assert_eq!(rendered[0]["SourceVPCEs"], json!(["vpce-123"]));
        assert_eq!(rendered[1]["Rules"][0]["ResourceType"], "dashboard");
        assert_eq!(rendered[1]["AllowFromPublic"], true);
        assert!(rendered[1].get("SourceVPCEs").is_none());
    }

    #[test]
    fn data_access_rules_cover_collection_and_indices() {
        let statements = data_access_policy("etl", vec!["arn:aws:iam::1:user/a".to_string()]);
        let rules = &statements[0].rules;
        assert_eq!(rules[0].resource, vec!["collection/etl*"]);
        assert_eq!(rules[1].resource, vec!["index/etl*/*"]);
        assert_eq!(rules[1].permission.len(), 6);
    }
}
