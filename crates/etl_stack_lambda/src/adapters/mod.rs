//! Seams between the lifecycle handlers and the cloud. Each trait covers one
//! service; [`CloudServices`] is what the handlers take.

pub mod collection_network;
pub mod object_store;
pub mod pipeline_service;
pub mod policy_store;
pub mod table_store;

use collection_network::CollectionNetwork;
use object_store::ObjectStore;
use pipeline_service::PipelineService;
use policy_store::PolicyStore;
use table_store::TableStore;

pub trait CloudServices:
    TableStore + PolicyStore + CollectionNetwork + PipelineService + ObjectStore
{
}

impl<T> CloudServices for T where
    T: TableStore + PolicyStore + CollectionNetwork + PipelineService + ObjectStore
{
}
