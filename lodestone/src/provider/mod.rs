//! Budgeted streaming resource provider.
//!
//! Scans the VFS for native (reflected) and third-party resources,
//! tracks consumer requests by `(type, name)`, schedules parallel
//! deserialization into generated containers and delivers results
//! through updated events. Runs as a context-hosted system ticked by the
//! host.

mod config;
mod containers;
mod hot_reload;
mod index;
mod serve;
mod state;
mod system;

pub use config::ResourceProviderConfig;
pub use containers::{CONTAINER_TYPE_PREFIX, ResourceTypeMeta, container_generation_hook};
pub use hot_reload::{
    HOT_RELOAD_COORDINATION_SYSTEM_NAME, HotReloadCoordinationSystem, HotReloadState,
    HotReloadStateMachine,
};
pub use index::{
    INDEX_FILE_NAME, ResourceFormat, ResourceIndex, ResourceIndexNativeGroup,
    ResourceIndexNativeItem, ResourceIndexThirdPartyItem, STRING_REGISTRY_FILE_NAME,
    write_resource_index,
};
pub use state::{
    ProvidedData, ResourceProviderSingleton, ResourceRequest, ResourceUpdatedEvent,
};
pub use system::{RESOURCE_PROVIDER_SYSTEM_NAME, ResourceProviderSystem};
