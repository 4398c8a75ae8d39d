//! Integration tests for context assembly and teardown ordering.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use lodestone::context::{Context, System, SystemApi, SystemHandle};
use lodestone::memory::AllocationGroup;
use lodestone::{LodestoneResult, intern};
use parking_lot::Mutex;

// ============================================================================
// TEST FIXTURES
// ============================================================================

/// Flags shared between test systems and assertions, passed in through
/// the user config of each system.
#[derive(Clone, Default)]
struct ProbeFlags {
    initialized: Arc<AtomicBool>,
    second_connected: Arc<AtomicBool>,
    first_used: Arc<AtomicBool>,
    second_used: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ProbeFlags {
    fn note(&self, entry: &str) {
        self.log.lock().push(entry.to_string());
    }
}

struct FirstIndependentSystem {
    flags: ProbeFlags,
}

impl System for FirstIndependentSystem {
    fn connect(&mut self, _context: &Context) {
        assert!(!self.flags.initialized.load(Ordering::SeqCst));
    }
    fn init(&mut self) {
        self.flags.initialized.store(true, Ordering::SeqCst);
    }
    fn shutdown(&mut self) {
        self.flags.initialized.store(false, Ordering::SeqCst);
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for FirstIndependentSystem {
    fn drop(&mut self) {
        // The peer must have cleared its mark during disconnect, before
        // this system is destroyed.
        assert!(!self.flags.second_connected.load(Ordering::SeqCst));
        self.flags.note("first_destroyed");
    }
}

struct SecondIndependentSystem {
    flags: ProbeFlags,
    first: Option<SystemHandle>,
}

impl SecondIndependentSystem {
    fn mark_first(&self, value: bool) {
        if let Some(first) = &self.first {
            first.with_ref::<FirstIndependentSystem, _>(|first| {
                first.flags.second_connected.store(value, Ordering::SeqCst);
            });
        }
    }
}

impl System for SecondIndependentSystem {
    fn connect(&mut self, context: &Context) {
        self.first = context.query("first_independent_probe_t");
        self.mark_first(true);
    }
    fn disconnect(&mut self, _context: &Context) {
        self.mark_first(false);
        self.flags.note("second_disconnected");
        self.first = None;
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SystemWithDependencies {
    flags: ProbeFlags,
    first: Option<SystemHandle>,
    second: Option<SystemHandle>,
}

impl System for SystemWithDependencies {
    fn connect(&mut self, context: &Context) {
        self.first = context.query("first_independent_probe_t");
        self.second = context.query("second_independent_probe_t");
    }
    fn init(&mut self) {
        // Peers connected before us must already be initialized.
        let first = self.first.as_ref().expect("first peer present");
        first
            .with_ref::<FirstIndependentSystem, _>(|first| {
                assert!(first.flags.initialized.load(Ordering::SeqCst));
            })
            .expect("first peer downcasts");
        self.flags.first_used.store(true, Ordering::SeqCst);

        let second = self.second.as_ref().expect("second peer present");
        second
            .with_ref::<SecondIndependentSystem, _>(|_| {})
            .expect("second peer downcasts");
        self.flags.second_used.store(true, Ordering::SeqCst);
    }
    fn disconnect(&mut self, _context: &Context) {
        self.first = None;
        self.second = None;
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn probe_flags(config: Option<&(dyn Any + Send)>) -> ProbeFlags {
    config
        .and_then(|config| config.downcast_ref::<ProbeFlags>())
        .cloned()
        .unwrap_or_default()
}

fn create_first(
    _group: AllocationGroup,
    config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    Ok(Box::new(FirstIndependentSystem {
        flags: probe_flags(config),
    }))
}

fn create_second(
    _group: AllocationGroup,
    config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    Ok(Box::new(SecondIndependentSystem {
        flags: probe_flags(config),
        first: None,
    }))
}

fn create_with_dependencies(
    _group: AllocationGroup,
    config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    Ok(Box::new(SystemWithDependencies {
        flags: probe_flags(config),
        first: None,
        second: None,
    }))
}

inventory::submit! {
    SystemApi { name: "first_independent_probe_t", create: create_first }
}
inventory::submit! {
    SystemApi { name: "second_independent_probe_t", create: create_second }
}
inventory::submit! {
    SystemApi { name: "with_dependencies_probe_t", create: create_with_dependencies }
}

// ============================================================================
// ASSEMBLY TESTS
// ============================================================================

#[test]
fn three_system_assembly_and_teardown() {
    let flags = ProbeFlags::default();
    let mut context = Context::new(AllocationGroup::root().child("context_scenario"));

    assert!(context.request_system(
        "first_independent_probe_t",
        Some(Box::new(flags.clone()))
    ));
    assert!(context.request_system(
        "second_independent_probe_t",
        Some(Box::new(flags.clone()))
    ));
    assert!(context.request_system(
        "with_dependencies_probe_t",
        Some(Box::new(flags.clone()))
    ));

    context.assembly();

    // Second looked first up during connect and flipped its mark.
    assert!(flags.second_connected.load(Ordering::SeqCst));
    assert!(flags.first_used.load(Ordering::SeqCst));
    assert!(flags.second_used.load(Ordering::SeqCst));
    assert!(flags.initialized.load(Ordering::SeqCst));

    context.destroy();

    // The mark was cleared during disconnect, observable before first's
    // destruction (first's drop asserts it).
    assert!(!flags.second_connected.load(Ordering::SeqCst));
    let log = flags.log.lock();
    let disconnect_position = log
        .iter()
        .position(|entry| entry == "second_disconnected")
        .expect("second disconnected");
    let destroy_position = log
        .iter()
        .position(|entry| entry == "first_destroyed")
        .expect("first destroyed");
    assert!(disconnect_position < destroy_position);
}

#[test]
fn query_before_assembly_finds_nothing() {
    let mut context = Context::new(AllocationGroup::root().child("context_query_early"));
    assert!(context.request_system("first_independent_probe_t", None));
    assert!(context.query("first_independent_probe_t").is_none());
    context.assembly();
    assert!(context.query("first_independent_probe_t").is_some());
}

#[test]
fn failed_and_unknown_systems_assemble_in_degraded_mode() {
    let flags = ProbeFlags::default();
    let mut context = Context::new(AllocationGroup::root().child("context_degraded"));
    assert!(context.request_system("no_such_probe_t", None));
    assert!(context.request_system(
        "first_independent_probe_t",
        Some(Box::new(flags.clone()))
    ));

    context.assembly();

    // The unknown system is skipped; the rest still assemble and init.
    assert!(context.query("no_such_probe_t").is_none());
    assert!(flags.initialized.load(Ordering::SeqCst));

    // Peers treat the absent system as degraded mode.
    let _ = intern("no_such_probe_t");
}
