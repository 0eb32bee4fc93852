//! Delete: tear down everything Create made, in reverse, tolerating pieces
//! that are already gone.
//!
//! The pipeline role itself belongs to the template and is left alone, as
//! are the bucket (only emptied here) and the collection network policy.

use etl_stack_core::environment::HandlerEnvironment;
use etl_stack_core::lifecycle::PipelineResourceId;
use etl_stack_core::policy::{managed_policy_arn, HANDLER_MANAGED_POLICY_NAMES};
use serde_json::json;

use crate::adapters::CloudServices;
use crate::error::{CloudError, HandlerError};
use crate::logging::log_handler_info;
use crate::retry::Retrier;

/// Resources removed by one Delete, those that were already absent, and
/// those left in place because something outside the stack still uses them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: Vec<String>,
    pub already_absent: Vec<String>,
    pub retained: Vec<String>,
}

impl TeardownReport {
    fn record(&mut self, resource: String, outcome: Outcome) {
        match outcome {
            Outcome::Removed => self.removed.push(resource),
            Outcome::Absent => self.already_absent.push(resource),
            Outcome::Retained => self.retained.push(resource),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Removed,
    Absent,
    Retained,
}

/// NotFound means someone else finished the job.
fn tolerate_missing(result: Result<(), CloudError>) -> Result<Outcome, CloudError> {
    match result {
        Ok(()) => Ok(Outcome::Removed),
        Err(error) if error.is_not_found() => Ok(Outcome::Absent),
        Err(error) => Err(error),
    }
}

pub fn handle_delete(
    physical_id: &str,
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
) -> Result<TeardownReport, HandlerError> {
    let resource_id = PipelineResourceId::parse(physical_id)
        .unwrap_or_else(|| PipelineResourceId::new(&environment.pipeline_name));
    let mut report = TeardownReport::default();

    delete_pipeline(&resource_id.pipeline_name, cloud, retrier, &mut report)?;
    delete_ingestion_policies(environment, cloud, retrier, &mut report)?;
    delete_vpc_endpoint(
        resource_id.vpc_endpoint_id.as_deref(),
        environment,
        cloud,
        retrier,
        &mut report,
    )?;

    let table_name = environment.table_name.as_str();
    let outcome = tolerate_missing(retrier.run("DeleteTable", || cloud.delete_table(table_name)))?;
    report.record(format!("table/{table_name}"), outcome);

    empty_bucket(&environment.bucket_name, cloud, retrier, &mut report)?;

    log_handler_info(
        "teardown_finished",
        json!({
            "physical_resource_id": physical_id,
            "removed": report.removed,
            "already_absent": report.already_absent,
            "retained": report.retained,
        }),
    );
    Ok(report)
}

/// Deletes the pipeline and waits until it is gone; the pipeline holds the
/// VPC endpoint's network interfaces until then.
fn delete_pipeline(
    pipeline_name: &str,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    report: &mut TeardownReport,
) -> Result<(), HandlerError> {
    let outcome = tolerate_missing(
        retrier.run("DeletePipeline", || cloud.delete_pipeline(pipeline_name)),
    )?;
    if outcome == Outcome::Removed {
        retrier.wait_until("pipeline deletion", || {
            cloud.pipeline_status(pipeline_name).map(|status| status.is_none())
        })?;
    }
    report.record(format!("pipeline/{pipeline_name}"), outcome);
    Ok(())
}

fn delete_ingestion_policies(
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    report: &mut TeardownReport,
) -> Result<(), HandlerError> {
    let role_name = environment.pipeline_role_name.as_str();
    for policy_name in HANDLER_MANAGED_POLICY_NAMES {
        let policy_arn = managed_policy_arn(&environment.account_id, policy_name);
        tolerate_missing(retrier.run("DetachRolePolicy", || {
            cloud.detach_role_policy(role_name, &policy_arn)
        }))?;
        let outcome = match tolerate_missing(
            retrier.run("DeletePolicy", || cloud.delete_policy(&policy_arn)),
        ) {
            Ok(outcome) => outcome,
            // Still attached to an entity outside this stack.
            Err(error) if error.is_in_use() => {
                log_handler_info(
                    "policy_retained",
                    json!({ "policy_arn": policy_arn, "error": error.to_string() }),
                );
                Outcome::Retained
            }
            Err(error) => return Err(error.into()),
        };
        report.record(format!("policy/{policy_name}"), outcome);
    }
    Ok(())
}

fn delete_vpc_endpoint(
    known_id: Option<&str>,
    environment: &HandlerEnvironment,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    report: &mut TeardownReport,
) -> Result<(), HandlerError> {
    let endpoint_id = match known_id {
        Some(id) => Some(id.to_string()),
        None => retrier
            .run("ListVpcEndpoints", || {
                cloud.find_vpc_endpoint(&environment.vpc_endpoint_name)
            })?
            .map(|endpoint| endpoint.id),
    };
    let Some(endpoint_id) = endpoint_id else {
        report.record(
            format!("vpc-endpoint/{}", environment.vpc_endpoint_name),
            Outcome::Absent,
        );
        return Ok(());
    };

    let outcome = tolerate_missing(
        retrier.run("DeleteVpcEndpoint", || cloud.delete_vpc_endpoint(&endpoint_id)),
    )?;
    if outcome == Outcome::Removed {
        retrier.wait_until("VPC endpoint deletion", || {
            cloud
                .vpc_endpoint(&endpoint_id)
                .map(|endpoint| endpoint.is_none())
        })?;
    }
    report.record(format!("vpc-endpoint/{endpoint_id}"), outcome);
    Ok(())
}

/// Removes the export and dead-letter objects so the template can delete
/// the bucket after this resource is gone.
fn empty_bucket(
    bucket_name: &str,
    cloud: &dyn CloudServices,
    retrier: &Retrier<'_>,
    report: &mut TeardownReport,
) -> Result<(), HandlerError> {
    let keys = match retrier.run("ListObjectsV2", || cloud.list_object_keys(bucket_name)) {
        Ok(keys) => keys,
        Err(error) if error.is_not_found() => {
            report.record(format!("bucket/{bucket_name}"), Outcome::Absent);
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };
    for key in &keys {
        tolerate_missing(retrier.run("DeleteObject", || cloud.delete_object(bucket_name, key)))?;
    }
    log_handler_info(
        "bucket_emptied",
        json!({ "bucket_name": bucket_name, "objects_deleted": keys.len() }),
    );
    report.record(format!("objects/{bucket_name}"), Outcome::Removed);
    Ok(())
}
