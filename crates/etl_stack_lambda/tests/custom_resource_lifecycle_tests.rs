mod support;

use std::time::Duration;

use etl_stack_core::lifecycle::{PipelineResourceId, ResponseStatus};
use etl_stack_core::policy::{
    ingestion_pipeline_policy, managed_policy_arn, HANDLER_MANAGED_POLICY_NAMES,
    INGESTION_PIPELINE_POLICY_NAME,
};
use etl_stack_lambda::error::CloudErrorKind;
use etl_stack_lambda::handlers::delete::handle_delete;
use etl_stack_lambda::handlers::{
    handle_custom_resource_event, DATA_PIPELINE_NAME, DATA_PIPELINE_ROLE_ARN, DATA_TABLE_ARN,
    DATA_VPC_ENDPOINT_ID,
};
use etl_stack_lambda::retry::{Retrier, RetryPolicy};
use etl_stack_lambda::seed::bundled_items;
use etl_stack_lambda::test_helpers::{InMemoryCloud, InstantSleeper, TEST_ACCOUNT_ID};
use support::{apply_stack, cloud_for, create_request, delete_request, update_request};

#[test]
fn create_provisions_everything_and_delete_leaves_nothing_behind() {
    let stack = apply_stack(7);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);
    assert_eq!(created.status, ResponseStatus::Success, "{:?}", created.reason);

    let resource_id =
        PipelineResourceId::parse(&created.physical_resource_id).expect("physical id parses");
    assert_eq!(resource_id.pipeline_name, environment.pipeline_name);
    let endpoint_id = resource_id.vpc_endpoint_id.clone().expect("endpoint recorded");
    assert_eq!(created.data[DATA_PIPELINE_NAME], environment.pipeline_name);
    assert_eq!(created.data[DATA_VPC_ENDPOINT_ID], endpoint_id);
    assert!(created.data[DATA_TABLE_ARN].ends_with(&format!("table/{}", environment.table_name)));
    assert!(created.data[DATA_PIPELINE_ROLE_ARN].ends_with(&environment.pipeline_role_name));

    {
        let state = cloud.state();
        let table = &state.tables[&environment.table_name];
        assert_eq!(table.items.len(), bundled_items().expect("items").len());
        assert!(table.point_in_time_recovery);

        let policy = &state.network_policies[&environment.network_policy_name];
        assert_eq!(policy.version, 2);
        assert!(policy.policy.contains(&endpoint_id));
        assert!(policy.description.contains(&environment.collection_name));

        assert_eq!(state.attachments.len(), HANDLER_MANAGED_POLICY_NAMES.len());
        let pipeline = &state.pipelines[&environment.pipeline_name].definition;
        assert_eq!(pipeline.subnet_ids, environment.subnet_ids);
        assert_eq!(pipeline.security_group_ids, environment.security_group_ids);
        assert_eq!(pipeline.log_group_name, environment.log_group_name);
        assert!(pipeline.body.contains(&environment.collection_endpoint));
    }
    assert!(sleeper.total() >= Duration::from_secs(10));

    cloud
        .state()
        .objects
        .entry(environment.bucket_name.clone())
        .or_default()
        .extend(["export/manifest".to_string(), "dlq/fare/1".to_string()]);

    let deleted = handle_custom_resource_event(
        &delete_request(&created.physical_resource_id),
        environment,
        &cloud,
        &retrier,
    );
    assert_eq!(deleted.status, ResponseStatus::Success, "{:?}", deleted.reason);
    assert_eq!(deleted.physical_resource_id, created.physical_resource_id);
    assert!(cloud.residual_resources().is_empty(), "{:?}", cloud.residual_resources());
    assert!(cloud.state().objects[&environment.bucket_name].is_empty());
    assert!(cloud.state().roles.contains_key(&environment.pipeline_role_name));
}

#[test]
fn teardown_runs_in_reverse_dependency_order() {
    let stack = apply_stack(8);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);
    let before = cloud.calls().len();
    handle_custom_resource_event(
        &delete_request(&created.physical_resource_id),
        environment,
        &cloud,
        &retrier,
    );

    let calls = cloud.calls()[before..].to_vec();
    let position = |operation: &str| {
        calls
            .iter()
            .position(|call| call == operation)
            .unwrap_or_else(|| panic!("{operation} was not called"))
    };
    assert!(position("DeletePipeline") < position("DetachRolePolicy"));
    assert!(position("DetachRolePolicy") < position("DeletePolicy"));
    assert!(position("DeletePolicy") < position("DeleteVpcEndpoint"));
    assert!(position("DeleteVpcEndpoint") < position("DeleteTable"));
    assert!(position("DeleteTable") < position("ListObjectsV2"));
}

#[test]
fn repeated_create_adopts_existing_resources() {
    let stack = apply_stack(9);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let first = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);
    let second = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);

    assert_eq!(second.status, ResponseStatus::Success, "{:?}", second.reason);
    assert_eq!(first.physical_resource_id, second.physical_resource_id);
    assert_eq!(cloud.call_count("CreateVpcEndpoint"), 1);
    assert_eq!(cloud.state().pipelines.len(), 1);
    assert_eq!(cloud.state().policies.len(), HANDLER_MANAGED_POLICY_NAMES.len());
    assert_eq!(cloud.call_count("CreatePolicyVersion"), 0);
}

#[test]
fn stale_policy_from_earlier_stack_is_rewritten() {
    let stack = apply_stack(16);
    let environment = &stack.environment;
    let stale = ingestion_pipeline_policy(
        "arn:aws:aoss:us-east-1:123456789012:collection/old-stack",
        "old-collection",
    )
    .to_json_string();
    let cloud = cloud_for(environment).with_policy(INGESTION_PIPELINE_POLICY_NAME, &stale);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);

    assert_eq!(created.status, ResponseStatus::Success, "{:?}", created.reason);
    assert_eq!(cloud.call_count("CreatePolicyVersion"), 1);
    let arn = managed_policy_arn(TEST_ACCOUNT_ID, INGESTION_PIPELINE_POLICY_NAME);
    let current: serde_json::Value =
        serde_json::from_str(&cloud.state().policies[&arn]).expect("policy json");
    let wanted: serde_json::Value = serde_json::from_str(
        &ingestion_pipeline_policy(&environment.collection_arn, &environment.collection_name)
            .to_json_string(),
    )
    .expect("policy json");
    assert_eq!(current, wanted);
}

#[test]
fn policy_attached_elsewhere_is_retained_on_delete() {
    let stack = apply_stack(17);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);
    let shared = managed_policy_arn(TEST_ACCOUNT_ID, INGESTION_PIPELINE_POLICY_NAME);
    cloud
        .state()
        .attachments
        .insert(("other-team-role".to_string(), shared.clone()));
    let before = cloud.call_count("DeletePolicy");

    let report = handle_delete(&created.physical_resource_id, environment, &cloud, &retrier)
        .expect("teardown finishes");

    assert_eq!(
        report.retained,
        vec![format!("policy/{INGESTION_PIPELINE_POLICY_NAME}")]
    );
    assert_eq!(
        cloud.call_count("DeletePolicy") - before,
        HANDLER_MANAGED_POLICY_NAMES.len()
    );
    let state = cloud.state();
    assert!(state.policies.contains_key(&shared));
    assert_eq!(state.policies.len(), 1);
    assert!(state.pipelines.is_empty());
    assert!(state.tables.is_empty());
}

#[test]
fn transient_failures_are_retried_within_budget() {
    let stack = apply_stack(10);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    cloud.fail("CreatePipeline", CloudErrorKind::IamPropagation, 2);
    cloud.fail("CreateTable", CloudErrorKind::Throttled, 1);
    cloud.leave_unprocessed(3);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);

    assert_eq!(created.status, ResponseStatus::Success, "{:?}", created.reason);
    assert_eq!(cloud.call_count("CreatePipeline"), 3);
    assert_eq!(cloud.call_count("CreateTable"), 2);
    assert_eq!(
        cloud.state().tables[&environment.table_name].items.len(),
        bundled_items().expect("items").len()
    );
    assert!(retrier.spent() <= RetryPolicy::default().budget);
}

#[test]
fn failed_create_reports_progress_and_rolls_back_cleanly() {
    let stack = apply_stack(11);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    cloud.fail("CreatePipeline", CloudErrorKind::Other, 1);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);

    assert_eq!(created.status, ResponseStatus::Failed);
    let reason = created.reason.clone().expect("failure reason");
    assert!(reason.contains("CreatePipeline failed"), "{reason}");
    let resource_id = PipelineResourceId::parse(&created.physical_resource_id).expect("parses");
    assert!(resource_id.vpc_endpoint_id.is_some());

    let rolled_back = handle_custom_resource_event(
        &delete_request(&created.physical_resource_id),
        environment,
        &cloud,
        &retrier,
    );
    assert_eq!(rolled_back.status, ResponseStatus::Success, "{:?}", rolled_back.reason);
    assert!(cloud.residual_resources().is_empty(), "{:?}", cloud.residual_resources());
}

#[test]
fn create_fails_when_budget_cannot_cover_propagation_wait() {
    let stack = apply_stack(12);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let policy = RetryPolicy {
        budget: Duration::from_secs(15),
        ..RetryPolicy::default()
    };
    let retrier = Retrier::new(policy, &sleeper);

    let created = handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);

    assert_eq!(created.status, ResponseStatus::Failed);
    assert_eq!(
        created.reason.as_deref(),
        Some("timed out waiting for IAM policy propagation")
    );
    assert_eq!(cloud.call_count("CreatePipeline"), 0);
}

#[test]
fn delete_without_prior_create_succeeds() {
    let stack = apply_stack(13);
    let environment = &stack.environment;
    let cloud = InMemoryCloud::new().with_role(&environment.pipeline_role_name);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    let report = handle_delete(&environment.pipeline_name, environment, &cloud, &retrier)
        .expect("teardown of absent resources succeeds");

    assert!(report.removed.is_empty());
    assert!(report
        .already_absent
        .contains(&format!("pipeline/{}", environment.pipeline_name)));
    assert!(report
        .already_absent
        .contains(&format!("table/{}", environment.table_name)));
    assert!(report
        .already_absent
        .contains(&format!("bucket/{}", environment.bucket_name)));
    assert!(sleeper.sleeps().is_empty());

    let response = handle_custom_resource_event(
        &delete_request(&environment.pipeline_name),
        environment,
        &cloud,
        &retrier,
    );
    assert_eq!(response.status, ResponseStatus::Success);
}

#[test]
fn update_is_acknowledged_without_cloud_calls() {
    let stack = apply_stack(14);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);
    let physical_id = format!("{}|vpce-0042", environment.pipeline_name);

    let response =
        handle_custom_resource_event(&update_request(&physical_id), environment, &cloud, &retrier);

    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.physical_resource_id, physical_id);
    assert_eq!(response.data[DATA_PIPELINE_NAME], environment.pipeline_name);
    assert!(cloud.calls().is_empty());
}

#[test]
fn policies_are_created_under_the_stack_account() {
    let stack = apply_stack(15);
    let environment = &stack.environment;
    let cloud = cloud_for(environment);
    let sleeper = InstantSleeper::new();
    let retrier = Retrier::new(RetryPolicy::default(), &sleeper);

    handle_custom_resource_event(&create_request(), environment, &cloud, &retrier);

    assert_eq!(environment.account_id, TEST_ACCOUNT_ID);
    let state = cloud.state();
    for name in HANDLER_MANAGED_POLICY_NAMES {
        let arn = format!("arn:aws:iam::{TEST_ACCOUNT_ID}:policy/{name}");
        assert!(state.policies.contains_key(&arn), "missing {arn}");
        assert!(state
            .attachments
            .contains(&(environment.pipeline_role_name.clone(), arn)));
    }
}
