//! Lodestone runtime core.
//!
//! This crate provides the core substrate the rest of the engine is built
//! on: the context/system graph, the reflection-driven readable-data
//! serializer, the virtual file system and the budgeted streaming
//! resource provider.

use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub mod context;
pub mod intern;
pub mod memory;
pub mod provider;
pub mod rdata;
pub mod reflect;
pub mod repo;
pub mod stream;
pub mod vfs;

pub use context::{Context, System, SystemApi, SystemHandle};
pub use intern::{InternedString, intern};
pub use lodestone_shared::errors::{LodestoneError, LodestoneResult};
pub use memory::AllocationGroup;
pub use provider::{ResourceProviderConfig, ResourceProviderSystem};
pub use reflect::{Patch, TypeRegistry};
pub use vfs::Volume;

/// Initialize tracing for Lodestone.
///
/// Installs a fmt subscriber writing to stderr. Uses the `RUST_LOG`
/// environment variable for filtering (defaults to `info`).
/// Idempotent: subsequent calls return immediately once initialized.
pub fn init_logging() {
    LOG_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new("info"))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        // If a global default subscriber is already set, this will return
        // an error. We ignore it to avoid interfering with host-configured
        // tracing.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
