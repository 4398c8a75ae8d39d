//! Hot-reload coordination.
//!
//! The provider reschedules loading when files change; consumers that
//! need atomic publication layer [`HotReloadStateMachine`] on top and an
//! optional coordination system can delay the publication frame to align
//! with foreign events. A missing coordinator is never fatal.

use std::any::Any;

use lodestone_shared::errors::LodestoneResult;

use crate::context::{System, SystemApi};
use crate::intern::InternedString;
use crate::memory::AllocationGroup;

pub const HOT_RELOAD_COORDINATION_SYSTEM_NAME: &str = "hot_reload_coordination_system_t";

/// Pluggable gate deciding when hot reloads may apply.
pub struct HotReloadCoordinationSystem {
    ready: bool,
}

impl HotReloadCoordinationSystem {
    pub fn ready_for_hot_reload(&self) -> bool {
        self.ready
    }

    /// Hold or release hot-reload application.
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }
}

impl System for HotReloadCoordinationSystem {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn create_hot_reload_coordination(
    _group: AllocationGroup,
    _config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    Ok(Box::new(HotReloadCoordinationSystem { ready: true }))
}

inventory::submit! {
    SystemApi {
        name: HOT_RELOAD_COORDINATION_SYSTEM_NAME,
        create: create_hot_reload_coordination,
    }
}

/// Consumer-side hot-reload phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HotReloadState {
    #[default]
    None,
    SetupFrame,
    LoadingScope,
    ApplicationFrame,
}

/// Consumer-side reload tracker.
///
/// While in the loading scope, dependent resources that finished
/// reloading are tagged ready but not published; once the in-flight
/// counter reaches zero (and the coordinator agrees) the machine enters
/// the application frame and hands the ready set over for one atomic
/// publication.
#[derive(Debug, Default)]
pub struct HotReloadStateMachine {
    state: HotReloadState,
    in_flight: u32,
    ready: Vec<InternedString>,
}

impl HotReloadStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> HotReloadState {
        self.state
    }

    /// A change was observed; set up the reload pass.
    pub fn begin(&mut self) {
        debug_assert_eq!(self.state, HotReloadState::None);
        self.state = HotReloadState::SetupFrame;
    }

    /// Setup done, dependent loads are being issued.
    pub fn enter_loading(&mut self) {
        debug_assert_eq!(self.state, HotReloadState::SetupFrame);
        self.state = HotReloadState::LoadingScope;
    }

    pub fn note_reload_started(&mut self) {
        debug_assert_eq!(self.state, HotReloadState::LoadingScope);
        self.in_flight += 1;
    }

    /// One dependent resource finished; tagged ready, not yet published.
    pub fn note_reload_ready(&mut self, name: InternedString) {
        debug_assert_eq!(self.state, HotReloadState::LoadingScope);
        debug_assert!(self.in_flight > 0, "ready without a started reload");
        self.in_flight -= 1;
        self.ready.push(name);
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    /// Enter the application frame when everything landed and the
    /// coordinator (if any) releases it; returns the set to publish
    /// atomically.
    pub fn try_publish(&mut self, coordinator_ready: bool) -> Option<Vec<InternedString>> {
        if self.state != HotReloadState::LoadingScope
            || self.in_flight != 0
            || !coordinator_ready
        {
            return None;
        }
        self.state = HotReloadState::ApplicationFrame;
        Some(std::mem::take(&mut self.ready))
    }

    /// Publication applied; back to idle.
    pub fn finish(&mut self) {
        debug_assert_eq!(self.state, HotReloadState::ApplicationFrame);
        self.state = HotReloadState::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    #[test]
    fn full_cycle_publishes_once_everything_landed() {
        let mut machine = HotReloadStateMachine::new();
        machine.begin();
        machine.enter_loading();
        machine.note_reload_started();
        machine.note_reload_started();

        assert!(machine.try_publish(true).is_none());
        machine.note_reload_ready(intern("texture_a"));
        assert!(machine.try_publish(true).is_none());
        machine.note_reload_ready(intern("texture_b"));

        let published = machine.try_publish(true).unwrap();
        assert_eq!(published.len(), 2);
        machine.finish();
        assert_eq!(machine.state(), HotReloadState::None);
    }

    #[test]
    fn coordinator_can_hold_publication() {
        let mut machine = HotReloadStateMachine::new();
        machine.begin();
        machine.enter_loading();
        machine.note_reload_started();
        machine.note_reload_ready(intern("mesh"));

        assert!(machine.try_publish(false).is_none());
        assert_eq!(machine.state(), HotReloadState::LoadingScope);
        assert!(machine.try_publish(true).is_some());
    }
}
