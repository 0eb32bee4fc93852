#![allow(dead_code)]

use std::collections::BTreeMap;

use etl_stack_core::environment::HandlerEnvironment;
use etl_stack_core::intrinsics::RealizedResources;
use etl_stack_core::lifecycle::CustomResourceRequest;
use etl_stack_core::opensearch_policy::{initial_network_policy, render_policy};
use etl_stack_core::params::{resolve, StackEnvironment, StackOverrides};
use etl_stack_core::stack::{declare_stack, logical_ids, CodeLocation, StackDeclaration};
use etl_stack_lambda::test_helpers::{InMemoryCloud, TEST_ACCOUNT_ID, TEST_REGION};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::{json, Value};

pub const STACK_ID: &str = "arn:aws:cloudformation:us-east-1:123456789012:stack/etl/1";

/// A declared stack after the apply engine has created every resource ahead
/// of the custom resource, with the handler environment resolved from it.
pub struct AppliedStack {
    pub declaration: StackDeclaration,
    pub realized: RealizedResources,
    pub environment: HandlerEnvironment,
}

pub fn apply_stack(seed: u64) -> AppliedStack {
    let mut rng = StdRng::seed_from_u64(seed);
    let params = resolve(
        StackOverrides {
            current_user_identity: Some(format!("arn:aws:iam::{TEST_ACCOUNT_ID}:user/dev")),
            ..Default::default()
        },
        &mut rng,
    )
    .expect("parameters resolve");
    let declaration = declare_stack(&params, &StackEnvironment::new(TEST_REGION), &CodeLocation::default())
        .expect("stack declares");

    let mut realized = RealizedResources::new(TEST_REGION, TEST_ACCOUNT_ID, "etl");
    realized.set_parameter("CustomResourceCodeBucket", "artifacts");
    realized.set_parameter("CustomResourceCodeKey", "custom_resource_lambda.zip");
    for logical_id in declaration.graph.creation_order().expect("acyclic") {
        if logical_id == logical_ids::CUSTOM_RESOURCE {
            continue;
        }
        let node = declaration.graph.get(&logical_id).expect("declared");
        let physical_id = match node.resource_type.as_str() {
            "AWS::EC2::Subnet" => format!("subnet-{}", logical_id.to_lowercase()),
            "AWS::EC2::VPC" => "vpc-0abc".to_string(),
            "AWS::EC2::SecurityGroup" => "sg-0abc".to_string(),
            "AWS::S3::Bucket" => node.properties["BucketName"]
                .as_str()
                .expect("bucket name")
                .to_string(),
            _ => format!("{logical_id}-physical"),
        };
        realized.set_physical_id(&logical_id, &physical_id);
        realized.set_attribute(&logical_id, "Arn", format!("arn:aws:test:::{physical_id}"));
        realized.set_attribute(&logical_id, "GroupId", physical_id.clone());
        realized.set_attribute(&logical_id, "CidrBlock", "10.0.0.0/16");
        realized.set_attribute(
            &logical_id,
            "CollectionEndpoint",
            "https://coll.us-east-1.aoss.amazonaws.com",
        );
    }

    let variables: BTreeMap<String, String> = declaration
        .handler_environment()
        .iter()
        .map(|(key, value)| {
            let value = realized.resolve_string(value).expect("variable resolves");
            (key.clone(), value)
        })
        .collect();
    let environment = HandlerEnvironment::from_map(&variables).expect("environment parses");

    AppliedStack {
        declaration,
        realized,
        environment,
    }
}

/// Cloud state the template leaves behind before the custom resource runs.
pub fn cloud_for(environment: &HandlerEnvironment) -> InMemoryCloud {
    let initial = render_policy(&initial_network_policy(&environment.collection_name));
    InMemoryCloud::new()
        .with_role(&environment.pipeline_role_name)
        .with_network_policy(&environment.network_policy_name, &initial)
        .with_bucket(&environment.bucket_name, &[])
}

fn request(request_type: &str, extra: Value) -> CustomResourceRequest {
    let mut body = json!({
        "RequestType": request_type,
        "ServiceToken": "arn:aws:lambda:us-east-1:123456789012:function:etl-custom-resource",
        "ResponseURL": "https://cloudformation-custom-resource-response.example/put",
        "StackId": STACK_ID,
        "RequestId": format!("{}-request", request_type.to_lowercase()),
        "ResourceType": "Custom::DynamoDBPipeline",
        "LogicalResourceId": logical_ids::CUSTOM_RESOURCE,
        "ResourceProperties": {"ConfigurationFingerprint": "fp-1"}
    });
    if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
        body.extend(extra.clone());
    }
    serde_json::from_value(body).expect("request parses")
}

pub fn create_request() -> CustomResourceRequest {
    request("Create", json!({}))
}

pub fn update_request(physical_id: &str) -> CustomResourceRequest {
    request(
        "Update",
        json!({
            "PhysicalResourceId": physical_id,
            "ResourceProperties": {"ConfigurationFingerprint": "fp-2"},
            "OldResourceProperties": {"ConfigurationFingerprint": "fp-1"}
        }),
    )
}

pub fn delete_request(physical_id: &str) -> CustomResourceRequest {
    request("Delete", json!({ "PhysicalResourceId": physical_id }))
}
