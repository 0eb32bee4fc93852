//! IAM policy documents: trust policies for the two roles, the statements
//! granted to the custom-resource role, and the two policies the handler
//! creates for the ingestion role at runtime.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::intrinsics::{get_att, join, sub};

pub const POLICY_VERSION: &str = "2012-10-17";

pub const INGESTION_PIPELINE_POLICY_NAME: &str = "IngestionPipelinePolicy";
pub const DYNAMODB_INGESTION_POLICY_NAME: &str = "DynamoDBIngestionPolicy";

/// Policies the handler creates and deletes by name.
pub const HANDLER_MANAGED_POLICY_NAMES: [&str; 2] =
    [INGESTION_PIPELINE_POLICY_NAME, DYNAMODB_INGESTION_POLICY_NAME];

pub const OSIS_SERVICE_PRINCIPAL: &str = "osis-pipelines.amazonaws.com";
pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";

/// DynamoDB actions that change table state or data.
pub const TABLE_MUTATING_ACTIONS: [&str; 4] = [
    "dynamodb:BatchWriteItem",
    "dynamodb:CreateTable",
    "dynamodb:DeleteTable",
    "dynamodb:UpdateContinuousBackups",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

pub type ConditionBlock = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid", skip_serializing_if = "Option::is_none", default)]
    pub sid: Option<String>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", skip_serializing_if = "Option::is_none", default)]
    pub principal: Option<Value>,
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource", skip_serializing_if = "Vec::is_empty", default)]
    pub resources: Vec<Value>,
    #[serde(rename = "Condition", skip_serializing_if = "Option::is_none", default)]
    pub condition: Option<ConditionBlock>,
}

impl PolicyStatement {
    pub fn allow(actions: &[&str]) -> Self {
        Self {
            sid: None,
            effect: Effect::Allow,
            principal: None,
            actions: actions.iter().map(|action| action.to_string()).collect(),
            resources: Vec::new(),
            condition: None,
        }
    }

    pub fn sid(mut self, sid: &str) -> Self {
        self.sid = Some(sid.to_string());
        self
    }

    pub fn resource(mut self, resource: impl Into<Value>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn any_resource(self) -> Self {
        self.resource("*")
    }

    pub fn principal(mut self, principal: Value) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn string_equals(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.condition
            .get_or_insert_with(BTreeMap::new)
            .entry("StringEquals".to_string())
            .or_default()
            .insert(key.to_string(), value.into());
        self
    }

    pub fn grants_any_resource(&self) -> bool {
        self.resources.iter().any(|resource| resource == "*")
    }

    pub fn is_conditioned_on(&self, key: &str) -> bool {
        self.condition
            .as_ref()
            .is_some_and(|block| block.values().any(|entries| entries.contains_key(key)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements,
        }
    }

    // Serializing cannot fail: every field is a string, a `Value` or a map
    // keyed by strings.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("policy documents always serialize")
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string_pretty(self).expect("policy documents always serialize")
    }
}

pub fn service_trust_policy(service_principal: &str) -> PolicyDocument {
    PolicyDocument::new(vec![PolicyStatement::allow(&["sts:AssumeRole"])
        .principal(json!({ "Service": service_principal }))])
}

/// Names and references the custom-resource role statements are scoped to.
#[derive(Debug, Clone)]
pub struct CustomResourceScope<'a> {
    pub table_name: &'a str,
    pub pipeline_name: &'a str,
    pub account: &'a str,
    pub ingestion_role_id: &'a str,
    pub bucket_id: &'a str,
}

/// Statements attached to the role the custom-resource handler runs as.
///
/// DynamoDB actions are granted on `*` only under a `dynamodb:TableName`
/// condition and policy creation only for the two handler-managed names.
pub fn custom_resource_statements(scope: &CustomResourceScope<'_>) -> Vec<PolicyStatement> {
    let bucket_arn = get_att(scope.bucket_id, "Arn");
    let bucket_objects = join("", vec![bucket_arn.clone(), json!("/*")]);

    let mut table_actions: Vec<&str> = TABLE_MUTATING_ACTIONS.to_vec();
    table_actions.push("dynamodb:DescribeTable");

    vec![
        PolicyStatement::allow(&table_actions)
            .any_resource()
            .string_equals("dynamodb:TableName", scope.table_name),
        PolicyStatement::allow(&[
            "osis:CreatePipeline",
            "osis:DeletePipeline",
            "osis:StopPipeline",
            "osis:GetPipeline",
        ])
        .resource(sub(format!(
            "arn:${{AWS::Partition}}:osis:${{AWS::Region}}:{}:pipeline/{}",
            scope.account, scope.pipeline_name
        ))),
        PolicyStatement::allow(&[
            "iam:PassRole",
            "iam:CreateRole",
            "iam:AttachRolePolicy",
            "iam:DetachRolePolicy",
            "iam:GetRole",
            "iam:DeleteRole",
        ])
        .resource(get_att(scope.ingestion_role_id, "Arn")),
        PolicyStatement::allow(&["iam:ListPolicies"]).any_resource(),
        PolicyStatement::allow(&["iam:CreatePolicy", "iam:DeletePolicy"])
            .any_resource()
            .string_equals("iam:PolicyName", json!(HANDLER_MANAGED_POLICY_NAMES)),
        PolicyStatement::allow(&[
            "logs:CreateLogDelivery",
            "logs:PutResourcePolicy",
            "logs:UpdateLogDelivery",
            "logs:DeleteLogDelivery",
            "logs:DescribeResourcePolicies",
            "logs:GetLogDelivery",
            "logs:ListLogDeliveries",
        ])
        .any_resource(),
        PolicyStatement::allow(&[
            "s3:ListObjects",
            "s3:DeleteObject",
            "s3:DeleteObjectVersion",
            "s3:ListBucket",
            "s3:DeleteBucket",
        ])
        .resource(bucket_arn)
        .resource(bucket_objects),
        PolicyStatement::allow(&[
            "aoss:CreateVpcEndpoint",
            "aoss:DeleteVpcEndpoint",
            "aoss:ListVpcEndpoints",
            "aoss:BatchGetVpcEndpoint",
            "aoss:GetSecurityPolicy",
            "aoss:UpdateSecurityPolicy",
            "ec2:CreateVpcEndpoint",
            "ec2:DeleteVpcEndpoints",
            "ec2:ListVpcEndpoints",
            "ec2:DescribeVpcEndpoints",
            "ec2:DescribeVpcs",
            "ec2:DescribeSubnets",
            "ec2:DescribeSecurityGroups",
            "ec2:CreateTags",
            "ec2:DeleteTags",
            "route53:AssociateVPCWithHostedZone",
            "route53:DisassociateVPCFromHostedZone",
        ])
        .any_resource(),
    ]
}

/// Policy granting the ingestion pipeline access to the collection.
pub fn ingestion_pipeline_policy(collection_arn: &str, collection_name: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        PolicyStatement::allow(&["aoss:*"]).resource(collection_arn),
        PolicyStatement::allow(&[
            "aoss:CreateSecurityPolicy",
            "aoss:GetSecurityPolicy",
            "aoss:UpdateSecurityPolicy",
        ])
        .any_resource()
        .string_equals("aoss:collection", collection_name),
    ])
}

/// Policy granting the ingestion pipeline the table export, stream and S3
/// staging access it needs.
pub fn dynamodb_ingestion_policy(table_arn: &str, bucket_arn: &str) -> PolicyDocument {
    PolicyDocument::new(vec![
        PolicyStatement::allow(&[
            "dynamodb:DescribeTable",
            "dynamodb:DescribeContinuousBackups",
            "dynamodb:ExportTableToPointInTime",
        ])
        .sid("allowRunExportJob")
        .resource(table_arn),
        PolicyStatement::allow(&["dynamodb:DescribeExport"])
            .sid("allowCheckExportjob")
            .resource(format!("{table_arn}/export/*")),
        PolicyStatement::allow(&[
            "dynamodb:DescribeStream",
            "dynamodb:GetRecords",
            "dynamodb:GetShardIterator",
        ])
        .sid("allowReadFromStream")
        .resource(format!("{table_arn}/stream/*")),
        PolicyStatement::allow(&[
            "s3:GetObject",
            "s3:AbortMultipartUpload",
            "s3:PutObject",
            "s3:PutObjectAcl",
        ])
        .sid("allowReadAndWriteToS3ForExport")
        .resource(format!("{bucket_arn}/*")),
    ])
}

/// ARN of a customer-managed policy created by the handler.
pub fn managed_policy_arn(account_id: &str, policy_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:policy/{policy_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> CustomResourceScope<'static> {
        CustomResourceScope {
            table_name: "opensearch-etl-table",
            pipeline_name: "dynamodb-etl-pipeline",
            account: "${AWS::AccountId}",
            ingestion_role_id: "IngestionRole",
            bucket_id: "OpenSearchIngestionBucket",
        }
    }

    #[test]
    fn table_mutations_are_always_conditioned() {
        for statement in custom_resource_statements(&scope()) {
            let mutates_table = statement
                .actions
                .iter()
                .any(|action| TABLE_MUTATING_ACTIONS.contains(&action.as_str()));
            if mutates_table && statement.grants_any_resource() {
                assert!(statement.is_conditioned_on("dynamodb:TableName"));
                let value = &statement.condition.as_ref().expect("condition")["StringEquals"]
                    ["dynamodb:TableName"];
                assert_eq!(value, "opensearch-etl-table");
            }
        }
    }

    #[test]
    fn policy_creation_is_limited_to_handler_names() {
        let statements = custom_resource_statements(&scope());
        let create = statements
            .iter()
            .find(|statement| statement.actions.contains(&"iam:CreatePolicy".to_string()))
            .expect("create policy statement");
        let names = &create.condition.as_ref().expect("condition")["StringEquals"]["iam:PolicyName"];
        assert_eq!(
            names,
            &json!(["IngestionPipelinePolicy", "DynamoDBIngestionPolicy"])
        );
    }

    #[test]
    fn trust_policy_names_the_service() {
        let document = service_trust_policy(OSIS_SERVICE_PRINCIPAL).to_value();
        assert_eq!(
            document["Statement"][0]["Principal"]["Service"],
            "osis-pipelines.amazonaws.com"
        );
        assert_eq!(document["Statement"][0]["Action"], json!(["sts:AssumeRole"]));
        assert!(document["Statement"][0].get("Resource").is_none());
    }

    #[test]
    fn runtime_policies_scope_to_given_arns() {
        let document = dynamodb_ingestion_policy(
            "arn:aws:dynamodb:us-east-1:1:table/t",
            "arn:aws:s3:::bucket",
        );
        let rendered = document.to_value();
        assert_eq!(
            rendered["Statement"][1]["Resource"],
            json!(["arn:aws:dynamodb:us-east-1:1:table/t/export/*"])
        );
        assert_eq!(
            rendered["Statement"][3]["Resource"],
            json!(["arn:aws:s3:::bucket/*"])
        );

        let pipeline = ingestion_pipeline_policy("arn:aws:aoss:us-east-1:1:collection/abc", "c");
        assert!(pipeline.statements[1].is_conditioned_on("aoss:collection"));
    }

    #[test]
    fn managed_policy_arn_uses_account() {
        assert_eq!(
            managed_policy_arn("111111111111", INGESTION_PIPELINE_POLICY_NAME),
            "arn:aws:iam::111111111111:policy/IngestionPipelinePolicy"
        );
    }
}
