//! Context system hosting the reflection registry.

use std::any::Any;
use std::sync::Arc;

use lodestone_shared::errors::LodestoneResult;

use crate::context::{System, SystemApi};
use crate::memory::AllocationGroup;

use super::{TypeRegistry, registry::RegistryBuilder};

pub const REFLECTION_SYSTEM_NAME: &str = "reflection_system_t";

/// User config: the generated registry to host.
pub struct ReflectionSystemConfig {
    pub registry: Arc<TypeRegistry>,
}

/// Hosts the current type registry.
///
/// The registry is immutable; regeneration installs a replacement `Arc`,
/// which in-flight readers detect by pointer comparison.
pub struct ReflectionSystem {
    registry: Arc<TypeRegistry>,
}

impl ReflectionSystem {
    pub fn registry(&self) -> Arc<TypeRegistry> {
        self.registry.clone()
    }

    /// Install a regenerated registry.
    pub fn install(&mut self, registry: Arc<TypeRegistry>) {
        tracing::debug!("installed regenerated reflection registry");
        self.registry = registry;
    }
}

impl System for ReflectionSystem {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn create_reflection_system(
    _group: AllocationGroup,
    config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    let registry = config
        .and_then(|config| config.downcast_ref::<ReflectionSystemConfig>())
        .map(|config| config.registry.clone());

    let registry = match registry {
        Some(registry) => registry,
        None => RegistryBuilder::default().build()?,
    };
    Ok(Box::new(ReflectionSystem { registry }))
}

inventory::submit! {
    SystemApi {
        name: REFLECTION_SYSTEM_NAME,
        create: create_reflection_system,
    }
}
