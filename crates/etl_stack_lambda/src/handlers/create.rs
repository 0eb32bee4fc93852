//! Create: seed the table, open the collection to the VPC, grant the
//! ingestion role and start the pipeline.
//!
//! Each step adopts what an earlier, interrupted attempt left behind, so a
//! retried Create converges instead of failing on existing resources.

use std::collections::BTreeMap;
use std::time::Duration;

use etl_stack_core::environment::HandlerEnvironment;
use etl_stack_core::lifecycle::PipelineResourceId;
use etl_stack_core::opensearch_policy::{
    network_policy_description, render_policy, vpc_only_network_policy,
};
use etl_stack_core::policy::{
    dynamodb_ingestion_policy, ingestion_pipeline_policy, managed_policy_arn,
    DYNAMODB_INGESTION_POLICY_NAME, INGESTION_PIPELINE_POLICY_NAME,
};
use serde_json::json;

use crate::adapters::collection_network::{NetworkPolicyUpdate, VpcEndpointRequest, VpcEndpointStatus};
use crate::adapters::table_store::TableStatus;
use crate::adapters::CloudServices;
use crate::error::{CloudError, CloudErrorKind, HandlerError};
use crate::handlers::{
    DATA_PIPELINE_NAME, DATA_PIPELINE_ROLE_ARN, DATA_TABLE_ARN, DATA_VPC_ENDPOINT_ID,
};
use crate::logging::log_handler_info;
use crate::pipeline_config::{
    render_pipeline_body, PipelineBodyInputs, PipelineDefinition, PIPELINE_MAX_UNITS,
    PIPELINE_MIN_UNITS,
};
use crate::retry::Retrier;
use crate::seed::{bundled_items, write_batches, TableDefinition};

/// Time for newly attached policies (and the log group) to become visible to
/// the ingestion service.
pub const IAM_PROPAGATION_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    pub resource_id: PipelineResourceId,
    pub table_arn: String,
    pub vpc_endpoint_id: String,
    pub pipeline_role_arn: String,
}

impl Provisioned {
    pub fn response_data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (
                DATA_PIPELINE_NAME.to_string(),
                self.resource_id.pipeline_name.clone(),
            ),
            (DATA_TABLE_ARN.to_string(), self.table_arn.clone()),
            (DATA_VPC_ENDPOINT_ID.to_string(), self.vpc_endpoint_id.clone()),
            (
                DATA_PIPELINE_ROLE_ARN.to_string(),
                self.pipeline_role_arn.clone(),
            ),
        ])
    }
}

/// A failed Create still reports the physical id with whatever progress was
/// made, so the rollback Delete can find it.
#[derive(Debug)]
pub struct CreateFailure {
    pub resource_id: PipelineResourceId,
    pub error: HandlerError,
}

pub fn handle_create(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
) -> Result<Provisioned, CreateFailure> {
    let mut resource_id = PipelineResourceId::new(&environment.pipeline_name);
    match provision(environment, cloud, retrier, &mut resource_id) {
        Ok(provisioned) => Ok(provisioned),
        Err(error) => Err(CreateFailure { resource_id, error }),
    }
}

fn provision(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    resource_id: &mut PipelineResourceId,
) -> Result<Provisioned, HandlerError> {
    let table_arn = provision_table(environment, cloud, retrier)?;

    let vpc_endpoint_id = provision_vpc_endpoint(environment, cloud, retrier)?;
    resource_id.vpc_endpoint_id = Some(vpc_endpoint_id.clone());

    restrict_network_policy(environment, cloud, retrier, &vpc_endpoint_id)?;
    let pipeline_role_arn = grant_pipeline_access(environment, cloud, retrier, &table_arn)?;
    retrier.pause("IAM policy propagation", IAM_PROPAGATION_DELAY)?;
    create_pipeline(environment, cloud, retrier, &table_arn, &pipeline_role_arn)?;

    Ok(Provisioned {
        resource_id: resource_id.clone(),
        table_arn,
        vpc_endpoint_id,
        pipeline_role_arn,
    })
}

/// Creates the table from the bundled definition, waits for it to become
/// active, seeds it and enables point-in-time recovery (required for the
/// pipeline's initial export). Returns the table ARN.
pub fn provision_table(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
) -> Result<String, HandlerError> {
    let table_name = environment.table_name.as_str();
    let definition = TableDefinition::bundled(table_name)?;
    let batches = write_batches(&definition, bundled_items()?)?;

    let created = retrier.run("CreateTable", || cloud.create_table(&definition));
    let table_arn = match created {
        Ok(description) => description.table_arn,
        Err(error) if error.is_already_exists() => {
            log_handler_info("table_adopted", json!({ "table_name": table_name }));
            retrier
                .run("DescribeTable", || cloud.describe_table(table_name))?
                .table_arn
        }
        Err(error) => return Err(error.into()),
    };

    retrier.wait_until("table to become active", || {
        cloud
            .describe_table(table_name)
            .map(|description| description.status == TableStatus::Active)
    })?;

    let mut written = 0;
    for batch in &batches {
        let mut pending = batch.clone();
        retrier.wait_until("unprocessed table items", || {
            pending = retrier.run("BatchWriteItem", || cloud.batch_write(table_name, &pending))?;
            Ok(pending.is_empty())
        })?;
        written += batch.len();
    }

    retrier.run("UpdateContinuousBackups", || {
        cloud.enable_point_in_time_recovery(table_name)
    })?;

    log_handler_info(
        "table_seeded",
        json!({
            "table_name": table_name,
            "table_arn": table_arn,
            "items_written": written,
            "batches": batches.len(),
        }),
    );
    Ok(table_arn)
}

/// Finds or creates the collection's VPC endpoint and waits until it is
/// active. Returns the endpoint id.
pub fn provision_vpc_endpoint(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
) -> Result<String, HandlerError> {
    let name = environment.vpc_endpoint_name.as_str();
    let existing = retrier.run("ListVpcEndpoints", || cloud.find_vpc_endpoint(name))?;

    let endpoint_id = match existing {
        Some(endpoint) => {
            log_handler_info(
                "vpc_endpoint_adopted",
                json!({ "name": name, "vpc_endpoint_id": endpoint.id }),
            );
            endpoint.id
        }
        None => {
            let request = VpcEndpointRequest {
                name: name.to_string(),
                vpc_id: environment.vpc_id.clone(),
                subnet_ids: environment.subnet_ids.clone(),
                security_group_ids: environment.security_group_ids.clone(),
            };
            retrier.run("CreateVpcEndpoint", || cloud.create_vpc_endpoint(&request))?
        }
    };

    retrier.wait_until("VPC endpoint to become active", || {
        match cloud.vpc_endpoint(&endpoint_id)? {
            Some(endpoint) if endpoint.status == VpcEndpointStatus::Failed => Err(CloudError::new(
                CloudErrorKind::Other,
                "BatchGetVpcEndpoint",
                format!("VPC endpoint {endpoint_id} failed to provision"),
            )),
            Some(endpoint) => Ok(endpoint.status == VpcEndpointStatus::Active),
            None => Ok(false),
        }
    })?;

    log_handler_info(
        "vpc_endpoint_ready",
        json!({ "name": name, "vpc_endpoint_id": endpoint_id }),
    );
    Ok(endpoint_id)
}

/// Rewrites the collection's network policy so the API is reachable only
/// through `vpc_endpoint_id`; the dashboard stays public.
pub fn restrict_network_policy(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    vpc_endpoint_id: &str,
) -> Result<(), HandlerError> {
    let policy_name = environment.network_policy_name.as_str();
    let policy = render_policy(&vpc_only_network_policy(
        &environment.collection_name,
        vpc_endpoint_id,
    ));

    // A concurrent edit bumps the version, so it is re-read on every attempt.
    retrier.run("UpdateSecurityPolicy", || {
        let policy_version = cloud.network_policy_version(policy_name)?;
        cloud.update_network_policy(&NetworkPolicyUpdate {
            name: policy_name.to_string(),
            policy_version,
            description: network_policy_description(&environment.collection_name),
            policy: policy.clone(),
        })
    })?;

    log_handler_info(
        "network_policy_restricted",
        json!({ "policy_name": policy_name, "vpc_endpoint_id": vpc_endpoint_id }),
    );
    Ok(())
}

/// Creates the two ingestion policies and attaches them to the pipeline
/// role. Returns the role ARN.
pub fn grant_pipeline_access(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    table_arn: &str,
) -> Result<String, HandlerError> {
    let role_name = environment.pipeline_role_name.as_str();
    let role_arn = retrier.run("GetRole", || cloud.role_arn(role_name))?;

    let documents = [
        (
            INGESTION_PIPELINE_POLICY_NAME,
            ingestion_pipeline_policy(&environment.collection_arn, &environment.collection_name),
        ),
        (
            DYNAMODB_INGESTION_POLICY_NAME,
            dynamodb_ingestion_policy(table_arn, &environment.bucket_arn),
        ),
    ];

    for (policy_name, document) in documents {
        let rendered = document.to_json_string();
        let policy_arn = match retrier.run("CreatePolicy", || {
            cloud.create_policy(policy_name, &rendered)
        }) {
            Ok(arn) => arn,
            Err(error) if error.is_already_exists() => {
                let arn = managed_policy_arn(&environment.account_id, policy_name);
                adopt_policy(cloud, retrier, &arn, &rendered)?;
                arn
            }
            Err(error) => return Err(error.into()),
        };
        retrier.run("AttachRolePolicy", || {
            cloud.attach_role_policy(role_name, &policy_arn)
        })?;
        log_handler_info(
            "policy_attached",
            json!({ "role_name": role_name, "policy_arn": policy_arn }),
        );
    }
    Ok(role_arn)
}

/// Brings an existing policy of the same name up to `document`. The names
/// are account-wide, so the existing one may scope another stack's
/// collection and table.
fn adopt_policy(
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    policy_arn: &str,
    document: &str,
) -> Result<(), HandlerError> {
    let current = retrier.run("GetPolicyVersion", || cloud.policy_document(policy_arn))?;
    if same_document(&current, document) {
        log_handler_info("policy_adopted", json!({ "policy_arn": policy_arn }));
        return Ok(());
    }
    retrier.run("CreatePolicyVersion", || {
        cloud.replace_policy_document(policy_arn, document)
    })?;
    log_handler_info("policy_document_replaced", json!({ "policy_arn": policy_arn }));
    Ok(())
}

/// Compares as JSON; IAM may hand documents back with different spacing.
fn same_document(current: &str, wanted: &str) -> bool {
    match (
        serde_json::from_str::<serde_json::Value>(current),
        serde_json::from_str::<serde_json::Value>(wanted),
    ) {
        (Ok(current), Ok(wanted)) => current == wanted,
        _ => current == wanted,
    }
}

pub fn pipeline_definition(
    environment: &HandlerEnvironment,
    table_arn: &str,
    pipeline_role_arn: &str,
) -> PipelineDefinition {
    let body = render_pipeline_body(&PipelineBodyInputs {
        table_arn,
        bucket_name: &environment.bucket_name,
        region: &environment.region,
        role_arn: pipeline_role_arn,
        collection_endpoint: &environment.collection_endpoint,
        network_policy_name: &environment.network_policy_name,
    });
    PipelineDefinition {
        name: environment.pipeline_name.clone(),
        min_units: PIPELINE_MIN_UNITS,
        max_units: PIPELINE_MAX_UNITS,
        body,
        log_group_name: environment.log_group_name.clone(),
        subnet_ids: environment.subnet_ids.clone(),
        security_group_ids: environment.security_group_ids.clone(),
    }
}

/// Submits the pipeline. Creation continues asynchronously on the service
/// side; an existing pipeline of the same name is adopted.
pub fn create_pipeline(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    table_arn: &str,
    pipeline_role_arn: &str,
) -> Result<(), HandlerError> {
    let definition = pipeline_definition(environment, table_arn, pipeline_role_arn);
    match retrier.run("CreatePipeline", || cloud.create_pipeline(&definition)) {
        Ok(()) => {
            log_handler_info(
                "pipeline_submitted",
                json!({
                    "pipeline_name": definition.name,
                    "min_units": definition.min_units,
                    "max_units": definition.max_units,
                    "subnet_ids": definition.subnet_ids,
                }),
            );
            Ok(())
        }
        Err(error) if error.is_already_exists() => {
            log_handler_info(
                "pipeline_adopted",
                json!({ "pipeline_name": definition.name }),
            );
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}
