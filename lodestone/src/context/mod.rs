//! Context/system graph.
//!
//! A context assembles named subsystems with declared lifecycles and lets
//! them discover each other by name. System APIs are registered statically
//! through `inventory`; a host requests systems by name, then one
//! `assembly` call drives `create` → `connect` → `init` in registration
//! order. Teardown runs the reverse sequence.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::intern::{InternedString, intern};
use crate::memory::AllocationGroup;
use lodestone_shared::errors::LodestoneResult;

/// Lifecycle phase of one hosted system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleState {
    Created,
    Connected,
    Initialized,
    Shutdown,
    Disconnected,
}

/// A context-hosted subsystem.
///
/// All methods have empty defaults; systems override the phases they care
/// about. During `connect` and `disconnect` peers may be looked up through
/// the context; `init` runs only after every peer is connected.
pub trait System: Send {
    fn connect(&mut self, _context: &Context) {}
    fn init(&mut self) {}
    fn shutdown(&mut self) {}
    fn disconnect(&mut self, _context: &Context) {}

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

type SystemCell = Arc<Mutex<Box<dyn System>>>;

/// Statically registered system constructor.
///
/// Submit with `inventory::submit!` next to the system implementation;
/// contexts discover APIs by name at assembly time.
pub struct SystemApi {
    pub name: &'static str,
    pub create:
        fn(AllocationGroup, Option<&(dyn Any + Send)>) -> LodestoneResult<Box<dyn System>>,
}

inventory::collect!(SystemApi);

fn find_api(name: &str) -> Option<&'static SystemApi> {
    inventory::iter::<SystemApi>().find(|api| api.name == name)
}

/// Shared handle to a hosted system, valid from `connect` onward.
#[derive(Clone)]
pub struct SystemHandle {
    name: InternedString,
    cell: SystemCell,
}

impl SystemHandle {
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Run `operation` against the system downcast to `T`.
    ///
    /// Returns `None` when the hosted system is not a `T`.
    pub fn with<T: 'static, R>(&self, operation: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut guard = self.cell.lock();
        guard.as_any_mut().downcast_mut::<T>().map(operation)
    }

    /// Read-only variant of [`SystemHandle::with`].
    pub fn with_ref<T: 'static, R>(&self, operation: impl FnOnce(&T) -> R) -> Option<R> {
        let guard = self.cell.lock();
        guard.as_any().downcast_ref::<T>().map(operation)
    }
}

struct SystemEntry {
    name: InternedString,
    state: LifecycleState,
    cell: SystemCell,
}

struct PendingRequest {
    name: InternedString,
    config: Option<Box<dyn Any + Send>>,
}

/// Bag of named systems plus the root allocation group they share.
pub struct Context {
    group: AllocationGroup,
    entries: Vec<SystemEntry>,
    by_name: HashMap<InternedString, usize>,
    pending: Vec<PendingRequest>,
}

impl Context {
    pub fn new(group: AllocationGroup) -> Self {
        Self {
            group,
            entries: Vec::new(),
            by_name: HashMap::new(),
            pending: Vec::new(),
        }
    }

    pub fn allocation_group(&self) -> &AllocationGroup {
        &self.group
    }

    /// Record a pending system request. Returns false for duplicates.
    pub fn request_system(&mut self, name: &str, config: Option<Box<dyn Any + Send>>) -> bool {
        let name = intern(name);
        let duplicate = self.pending.iter().any(|request| request.name == name)
            || self.by_name.contains_key(&name);
        if duplicate {
            tracing::warn!(system = %name, "duplicate system request rejected");
            return false;
        }

        self.pending.push(PendingRequest { name, config });
        true
    }

    /// Run one full assemble cycle over the pending requests:
    /// create everything, then connect in registration order, then init
    /// in registration order.
    pub fn assembly(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        let first_new = self.entries.len();

        for request in pending {
            let Some(api) = find_api(request.name.as_str()) else {
                tracing::error!(system = %request.name, "unknown system requested");
                continue;
            };

            let group = self.group.child(request.name.as_str());
            match (api.create)(group, request.config.as_deref()) {
                Ok(system) => {
                    let index = self.entries.len();
                    self.by_name.insert(request.name.clone(), index);
                    self.entries.push(SystemEntry {
                        name: request.name,
                        state: LifecycleState::Created,
                        cell: Arc::new(Mutex::new(system)),
                    });
                }
                Err(error) => {
                    tracing::error!(system = %request.name, %error, "system creation failed");
                }
            }
        }

        for index in first_new..self.entries.len() {
            debug_assert_eq!(self.entries[index].state, LifecycleState::Created);
            let cell = self.entries[index].cell.clone();
            cell.lock().connect(self);
            self.entries[index].state = LifecycleState::Connected;
            tracing::debug!(system = %self.entries[index].name, "system connected");
        }

        for index in first_new..self.entries.len() {
            debug_assert_eq!(self.entries[index].state, LifecycleState::Connected);
            let cell = self.entries[index].cell.clone();
            cell.lock().init();
            self.entries[index].state = LifecycleState::Initialized;
            tracing::debug!(system = %self.entries[index].name, "system initialized");
        }
    }

    /// Look up a hosted system by name. Valid from `connect` onward.
    pub fn query(&self, name: &str) -> Option<SystemHandle> {
        let name = intern(name);
        let index = *self.by_name.get(&name)?;
        let entry = &self.entries[index];
        Some(SystemHandle {
            name: entry.name.clone(),
            cell: entry.cell.clone(),
        })
    }

    /// Tear down and consume the context.
    pub fn destroy(self) {}

    fn teardown(&mut self) {
        for index in (0..self.entries.len()).rev() {
            if self.entries[index].state == LifecycleState::Initialized {
                let cell = self.entries[index].cell.clone();
                cell.lock().shutdown();
                self.entries[index].state = LifecycleState::Shutdown;
                tracing::debug!(system = %self.entries[index].name, "system shut down");
            }
        }

        for index in (0..self.entries.len()).rev() {
            let expected = matches!(
                self.entries[index].state,
                LifecycleState::Shutdown | LifecycleState::Connected
            );
            debug_assert!(expected, "disconnect from unexpected lifecycle state");
            let cell = self.entries[index].cell.clone();
            cell.lock().disconnect(self);
            self.entries[index].state = LifecycleState::Disconnected;
            tracing::debug!(system = %self.entries[index].name, "system disconnected");
        }

        self.by_name.clear();
        while let Some(entry) = self.entries.pop() {
            tracing::debug!(system = %entry.name, "system destroyed");
            drop(entry);
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.teardown();
    }
}
