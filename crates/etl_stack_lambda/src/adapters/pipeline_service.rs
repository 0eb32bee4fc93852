use crate::error::CloudError;
use crate::pipeline_config::PipelineDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Creating,
    Active,
    Updating,
    Deleting,
    Failed,
    Other,
}

pub trait PipelineService {
    fn create_pipeline(&self, definition: &PipelineDefinition) -> Result<(), CloudError>;
    /// `None` once the pipeline no longer exists.
    fn pipeline_status(&self, pipeline_name: &str) -> Result<Option<PipelineStatus>, CloudError>;
    fn delete_pipeline(&self, pipeline_name: &str) -> Result<(), CloudError>;
}
