//! Resource declarator: turns resolved parameters into the full resource
//! graph, the handler environment and the declared outputs.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::environment as keys;
use crate::error::DeclarationError;
use crate::graph::{DeletionPolicy, ResourceGraph, ResourceNode};
use crate::intrinsics::{get_att, reference, sub, AWS_ACCOUNT_ID, AWS_REGION};
use crate::network::{self, declare_network, pipeline_subnets, subnet_ids_json, NetworkTopology};
use crate::opensearch_policy::{
    data_access_policy, encryption_policy, initial_network_policy, network_policy_description,
    render_policy, DATA_ACCESS_POLICY_NAME, ENCRYPTION_POLICY_NAME, NETWORK_POLICY_NAME,
};
use crate::outputs::{self, OutputDeclaration, OutputValue};
use crate::params::{StackEnvironment, StackParameters};
use crate::policy::{
    custom_resource_statements, service_trust_policy, CustomResourceScope, PolicyDocument,
    LAMBDA_SERVICE_PRINCIPAL, OSIS_SERVICE_PRINCIPAL,
};

pub mod logical_ids {
    pub use crate::network::{SECURITY_GROUP_ID as SECURITY_GROUP, VPC_ID as VPC};

    pub const COLLECTION: &str = "OpenSearchServerlessCollection";
    pub const BUCKET: &str = "OpenSearchIngestionBucket";
    pub const INGESTION_LOG_GROUP: &str = "IngestionPipelineLogGroup";
    pub const INGESTION_ROLE: &str = "IngestionRole";
    pub const CUSTOM_RESOURCE_ROLE: &str = "DynamoDbPipelineCustomResourceRole";
    pub const CUSTOM_RESOURCE_ROLE_POLICY: &str = "DynamoDbPipelineCustomResourceRoleDefaultPolicy";
    pub const ENCRYPTION_POLICY: &str = "EncryptionPolicy";
    pub const NETWORK_POLICY: &str = "NetworkPolicy";
    pub const DATA_ACCESS_POLICY: &str = "DataAccessPolicy";
    pub const FUNCTION: &str = "DynamoDBPipelineCustomFunction";
    pub const FUNCTION_LOG_GROUP: &str = "DynamoDBPipelineCustomFunctionLogGroup";
    pub const CUSTOM_RESOURCE: &str = "DynamoDBPipelineCustomResource";
}

pub const CODE_BUCKET_PARAMETER: &str = "CustomResourceCodeBucket";
pub const CODE_KEY_PARAMETER: &str = "CustomResourceCodeKey";
pub const DEFAULT_CODE_KEY: &str = "custom_resource_lambda.zip";

pub const CUSTOM_RESOURCE_TYPE: &str = "Custom::DynamoDBPipeline";
pub const CONFIGURATION_FINGERPRINT_PROPERTY: &str = "ConfigurationFingerprint";

pub const FUNCTION_RUNTIME: &str = "provided.al2023";
pub const FUNCTION_HANDLER: &str = "bootstrap";
pub const FUNCTION_ARCHITECTURE: &str = "x86_64";
pub const FUNCTION_TIMEOUT_SECONDS: u32 = 600;
pub const FUNCTION_MEMORY_MB: u32 = 256;
pub const LOG_RETENTION_DAYS: u32 = 1;

const COLLECTION_DESCRIPTION: &str =
    "Collection for exploring the DynamoDB to OpenSearch ingestion pipeline.";
const LAMBDA_BASIC_EXECUTION_POLICY: &str =
    "arn:${AWS::Partition}:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";

/// Where the packaged custom-resource handler lives. These become template
/// parameter defaults; a missing bucket has to be supplied at deploy time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeLocation {
    pub bucket: Option<String>,
    pub key: String,
}

impl Default for CodeLocation {
    fn default() -> Self {
        Self {
            bucket: None,
            key: DEFAULT_CODE_KEY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParameter {
    pub name: &'static str,
    pub description: &'static str,
    pub default: Option<String>,
}

/// Everything the declarator produced for one set of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct StackDeclaration {
    pub parameters: StackParameters,
    pub environment: StackEnvironment,
    pub template_parameters: Vec<TemplateParameter>,
    pub graph: ResourceGraph,
    pub network: NetworkTopology,
    pub outputs: Vec<OutputDeclaration>,
}

impl StackDeclaration {
    pub fn configuration_fingerprint(&self) -> String {
        self.parameters.fingerprint()
    }

    /// The handler environment exactly as declared on the function.
    pub fn handler_environment(&self) -> BTreeMap<String, Value> {
        self.graph
            .get(logical_ids::FUNCTION)
            .and_then(|function| function.properties["Environment"]["Variables"].as_object())
            .map(|variables| {
                variables
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

pub fn function_name(params: &StackParameters) -> String {
    format!("{}-custom-resource", params.pipeline_name)
}

pub fn function_log_group_name(params: &StackParameters) -> String {
    format!("/aws/lambda/{}", function_name(params))
}

/// Declares the whole stack. Pure: no I/O, same input, same declaration.
pub fn declare_stack(
    params: &StackParameters,
    environment: &StackEnvironment,
    code: &CodeLocation,
) -> Result<StackDeclaration, DeclarationError> {
    use logical_ids::*;

    let mut graph = ResourceGraph::new();
    graph.declare_parameter(CODE_BUCKET_PARAMETER);
    graph.declare_parameter(CODE_KEY_PARAMETER);

    let network = declare_network(
        &mut graph,
        &params.vpc_name,
        &environment.effective_availability_zones(),
    )?;

    declare_collection(&mut graph, params, environment)?;
    declare_storage(&mut graph, params)?;

    graph.add_resource(ResourceNode::new(
        INGESTION_ROLE,
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": service_trust_policy(OSIS_SERVICE_PRINCIPAL).to_value(),
        }),
    ))?;

    declare_custom_resource(&mut graph, params, environment, &network)?;

    let template_parameters = vec![
        TemplateParameter {
            name: CODE_BUCKET_PARAMETER,
            description: "S3 bucket holding the packaged custom-resource handler",
            default: code.bucket.clone(),
        },
        TemplateParameter {
            name: CODE_KEY_PARAMETER,
            description: "S3 key of the packaged custom-resource handler zip",
            default: Some(code.key.clone()),
        },
    ];

    Ok(StackDeclaration {
        parameters: params.clone(),
        environment: environment.clone(),
        template_parameters,
        graph,
        network,
        outputs: declared_outputs(params),
    })
}

fn declare_collection(
    graph: &mut ResourceGraph,
    params: &StackParameters,
    environment: &StackEnvironment,
) -> Result<(), DeclarationError> {
    use logical_ids::*;

    let collection = &params.collection_name;

    graph.add_resource(ResourceNode::new(
        ENCRYPTION_POLICY,
        "AWS::OpenSearchServerless::SecurityPolicy",
        json!({
            "Name": ENCRYPTION_POLICY_NAME,
            "Type": "encryption",
            "Description": format!("Encryption policy for {collection} collection."),
            "Policy": render_policy(&encryption_policy(collection)),
        }),
    ))?;
    graph.add_resource(ResourceNode::new(
        NETWORK_POLICY,
        "AWS::OpenSearchServerless::SecurityPolicy",
        json!({
            "Name": NETWORK_POLICY_NAME,
            "Type": "network",
            "Description": network_policy_description(collection),
            "Policy": render_policy(&initial_network_policy(collection)),
        }),
    ))?;

    let principals = vec![
        format!("${{{INGESTION_ROLE}.Arn}}"),
        params.current_user_identity.clone(),
        format!("arn:aws:iam::{}:user/Admin", environment.account_sub()),
    ];
    graph.add_resource(ResourceNode::new(
        DATA_ACCESS_POLICY,
        "AWS::OpenSearchServerless::AccessPolicy",
        json!({
            "Name": DATA_ACCESS_POLICY_NAME,
            "Type": "data",
            "Description": format!("Data access policy for {collection} collection."),
            "Policy": sub(render_policy(&data_access_policy(collection, principals))),
        }),
    ))?;

    graph.add_resource(ResourceNode::new(
        COLLECTION,
        "AWS::OpenSearchServerless::Collection",
        json!({
            "Name": collection,
            "Description": COLLECTION_DESCRIPTION,
            "Type": "SEARCH",
        }),
    ))?;
    for policy in [ENCRYPTION_POLICY, NETWORK_POLICY, DATA_ACCESS_POLICY] {
        graph.add_dependency(COLLECTION, policy)?;
    }
    Ok(())
}

fn declare_storage(graph: &mut ResourceGraph, params: &StackParameters) -> Result<(), DeclarationError> {
    use logical_ids::*;

    graph.add_resource(
        ResourceNode::new(
            BUCKET,
            "AWS::S3::Bucket",
            json!({
                "BucketName": params.bucket_name,
                "BucketEncryption": {
                    "ServerSideEncryptionConfiguration": [{
                        "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                    }]
                },
                "PublicAccessBlockConfiguration": {
                    "BlockPublicAcls": true,
                    "BlockPublicPolicy": true,
                    "IgnorePublicAcls": true,
                    "RestrictPublicBuckets": true,
                },
            }),
        )
        .with_deletion_policy(DeletionPolicy::Delete),
    )?;

    graph.add_resource(
        ResourceNode::new(
            INGESTION_LOG_GROUP,
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": params.log_group_name,
                "RetentionInDays": LOG_RETENTION_DAYS,
            }),
        )
        .with_deletion_policy(DeletionPolicy::Delete),
    )?;
    Ok(())
}

fn declare_custom_resource(
    graph: &mut ResourceGraph,
    params: &StackParameters,
    environment: &StackEnvironment,
    network: &NetworkTopology,
) -> Result<(), DeclarationError> {
    use logical_ids::*;

    graph.add_resource(ResourceNode::new(
        CUSTOM_RESOURCE_ROLE,
        "AWS::IAM::Role",
        json!({
            "AssumeRolePolicyDocument": service_trust_policy(LAMBDA_SERVICE_PRINCIPAL).to_value(),
            "ManagedPolicyArns": [sub(LAMBDA_BASIC_EXECUTION_POLICY)],
        }),
    ))?;

    let account = environment.account_sub();
    let scope = CustomResourceScope {
        table_name: &params.table_name,
        pipeline_name: &params.pipeline_name,
        account: &account,
        ingestion_role_id: INGESTION_ROLE,
        bucket_id: BUCKET,
    };
    graph.add_resource(ResourceNode::new(
        CUSTOM_RESOURCE_ROLE_POLICY,
        "AWS::IAM::Policy",
        json!({
            "PolicyName": CUSTOM_RESOURCE_ROLE_POLICY,
            "PolicyDocument": PolicyDocument::new(custom_resource_statements(&scope)).to_value(),
            "Roles": [reference(CUSTOM_RESOURCE_ROLE)],
        }),
    ))?;

    graph.add_resource(
        ResourceNode::new(
            FUNCTION_LOG_GROUP,
            "AWS::Logs::LogGroup",
            json!({
                "LogGroupName": function_log_group_name(params),
                "RetentionInDays": LOG_RETENTION_DAYS,
            }),
        )
        .with_deletion_policy(DeletionPolicy::Delete),
    )?;

    graph.add_resource(ResourceNode::new(
        FUNCTION,
        "AWS::Lambda::Function",
        json!({
            "FunctionName": function_name(params),
            "Runtime": FUNCTION_RUNTIME,
            "Handler": FUNCTION_HANDLER,
            "Architectures": [FUNCTION_ARCHITECTURE],
            "Timeout": FUNCTION_TIMEOUT_SECONDS,
            "MemorySize": FUNCTION_MEMORY_MB,
            "Role": get_att(CUSTOM_RESOURCE_ROLE, "Arn"),
            "Code": {
                "S3Bucket": reference(CODE_BUCKET_PARAMETER),
                "S3Key": reference(CODE_KEY_PARAMETER),
            },
            "Environment": {
                "Variables": handler_environment_variables(params, environment, network),
            },
            "LoggingConfig": {
                "LogFormat": "JSON",
                "LogGroup": reference(FUNCTION_LOG_GROUP),
            },
        }),
    ))?;
    graph.add_dependency(FUNCTION, CUSTOM_RESOURCE_ROLE_POLICY)?;

    graph.add_resource(
        ResourceNode::new(
            CUSTOM_RESOURCE,
            CUSTOM_RESOURCE_TYPE,
            json!({
                "ServiceToken": get_att(FUNCTION, "Arn"),
                CONFIGURATION_FINGERPRINT_PROPERTY: params.fingerprint(),
            }),
        )
        .with_deletion_policy(DeletionPolicy::Delete),
    )?;
    Ok(())
}

/// The sixteen environment variables of the custom-resource function, keyed
/// by name. Values that only exist after apply are intrinsics.
pub fn handler_environment_variables(
    params: &StackParameters,
    environment: &StackEnvironment,
    network: &NetworkTopology,
) -> BTreeMap<String, Value> {
    use logical_ids::*;

    let account_id = match &environment.account_id {
        Some(account) => json!(account),
        None => reference(AWS_ACCOUNT_ID),
    };
    let subnets = pipeline_subnets(&network.isolated_subnets);

    BTreeMap::from([
        (keys::TABLE_NAME, json!(params.table_name)),
        (keys::PIPELINE_NAME, json!(params.pipeline_name)),
        (keys::PIPELINE_ROLE_NAME, reference(INGESTION_ROLE)),
        (keys::REGION, reference(AWS_REGION)),
        (keys::ACCOUNT_ID, account_id),
        (keys::NETWORK_POLICY_NAME, json!(NETWORK_POLICY_NAME)),
        (keys::BUCKET_NAME, json!(params.bucket_name)),
        (keys::BUCKET_ARN, get_att(BUCKET, "Arn")),
        (keys::COLLECTION_ARN, get_att(COLLECTION, "Arn")),
        (keys::COLLECTION_NAME, json!(params.collection_name)),
        (
            keys::COLLECTION_ENDPOINT,
            get_att(COLLECTION, "CollectionEndpoint"),
        ),
        (keys::LOG_GROUP_NAME, reference(INGESTION_LOG_GROUP)),
        (keys::VPC_ID, reference(&network.vpc_id)),
        (
            keys::VPC_ENDPOINT_NAME,
            json!(params.vpc_endpoint_name),
        ),
        (
            keys::SECURITY_GROUP_IDS,
            get_att(&network.security_group_id, "GroupId"),
        ),
        (keys::SUBNET_IDS_ISOLATED, subnet_ids_json(&subnets)),
    ])
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

/// Outputs in declaration order.
pub fn declared_outputs(params: &StackParameters) -> Vec<OutputDeclaration> {
    vec![
        OutputDeclaration::new(
            outputs::BUCKET_NAME,
            OutputValue::literal(&params.bucket_name),
        ),
        OutputDeclaration::new(outputs::TABLE_NAME, OutputValue::literal(&params.table_name)),
        OutputDeclaration::new(
            outputs::COLLECTION_ENDPOINT,
            OutputValue::attribute(logical_ids::COLLECTION, "CollectionEndpoint"),
        ),
        OutputDeclaration::new(
            outputs::PIPELINE_NAME,
            OutputValue::literal(&params.pipeline_name),
        ),
        OutputDeclaration::new(
            outputs::LOG_GROUP,
            OutputValue::literal(&params.log_group_name),
        ),
        OutputDeclaration::new(outputs::VPC_ID, OutputValue::reference(network::VPC_ID)),
    ]
}
