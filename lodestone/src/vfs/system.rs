//! Context system hosting a volume.

use std::any::Any;

use lodestone_shared::errors::LodestoneResult;

use crate::context::{System, SystemApi};
use crate::memory::AllocationGroup;

use super::Volume;

pub const VIRTUAL_FILE_SYSTEM_SYSTEM_NAME: &str = "virtual_file_system_t";

/// Hosts the volume shared by file-consuming systems.
pub struct VirtualFileSystemSystem {
    volume: Volume,
}

impl VirtualFileSystemSystem {
    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn volume_mut(&mut self) -> &mut Volume {
        &mut self.volume
    }
}

impl System for VirtualFileSystemSystem {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn create_virtual_file_system(
    _group: AllocationGroup,
    _config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    Ok(Box::new(VirtualFileSystemSystem {
        volume: Volume::new(),
    }))
}

inventory::submit! {
    SystemApi {
        name: VIRTUAL_FILE_SYSTEM_SYSTEM_NAME,
        create: create_virtual_file_system,
    }
}
