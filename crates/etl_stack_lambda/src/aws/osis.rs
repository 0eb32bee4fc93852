use aws_sdk_osis::types::{
    CloudWatchLogDestination, LogPublishingOptions, PipelineStatus as SdkPipelineStatus,
    VpcOptions,
};

use super::{block_on, invalid_request, AwsCloud};
use crate::adapters::pipeline_service::{PipelineService, PipelineStatus};
use crate::error::CloudError;
use crate::pipeline_config::PipelineDefinition;

impl PipelineService for AwsCloud {
    fn create_pipeline(&self, definition: &PipelineDefinition) -> Result<(), CloudError> {
        const OPERATION: &str = "CreatePipeline";
        let log_destination = CloudWatchLogDestination::builder()
            .log_group(&definition.log_group_name)
            .build()
            .map_err(|error| invalid_request(OPERATION, error))?;
        let vpc_options = VpcOptions::builder()
            .set_subnet_ids(Some(definition.subnet_ids.clone()))
            .set_security_group_ids(Some(definition.security_group_ids.clone()))
            .build()
            .map_err(|error| invalid_request(OPERATION, error))?;

        block_on(
            self.osis
                .create_pipeline()
                .pipeline_name(&definition.name)
                .min_units(definition.min_units)
                .max_units(definition.max_units)
                .pipeline_configuration_body(&definition.body)
                .log_publishing_options(
                    LogPublishingOptions::builder()
                        .is_logging_enabled(true)
                        .cloud_watch_log_destination(log_destination)
                        .build(),
                )
                .vpc_options(vpc_options)
                .send(),
        )
        .map(|_| ())
        .map_err(|error| CloudError::from_sdk(OPERATION, &error))
    }

    fn pipeline_status(&self, pipeline_name: &str) -> Result<Option<PipelineStatus>, CloudError> {
        let output = match block_on(self.osis.get_pipeline().pipeline_name(pipeline_name).send()) {
            Ok(output) => output,
            Err(error) => {
                let error = CloudError::from_sdk("GetPipeline", &error);
                return if error.is_not_found() { Ok(None) } else { Err(error) };
            }
        };
        Ok(output.pipeline().map(|pipeline| match pipeline.status() {
            Some(SdkPipelineStatus::Creating | SdkPipelineStatus::Starting) => {
                PipelineStatus::Creating
            }
            Some(SdkPipelineStatus::Active) => PipelineStatus::Active,
            Some(SdkPipelineStatus::Updating) => PipelineStatus::Updating,
            Some(SdkPipelineStatus::Deleting) => PipelineStatus::Deleting,
            Some(
                SdkPipelineStatus::CreateFailed
                | SdkPipelineStatus::StartFailed
                | SdkPipelineStatus::UpdateFailed,
            ) => PipelineStatus::Failed,
            _ => PipelineStatus::Other,
        }))
    }

    fn delete_pipeline(&self, pipeline_name: &str) -> Result<(), CloudError> {
        block_on(self.osis.delete_pipeline().pipeline_name(pipeline_name).send())
            .map(|_| ())
            .map_err(|error| CloudError::from_sdk("DeletePipeline", &error))
    }
}
