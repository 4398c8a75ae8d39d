//! Hierarchical allocation-group accounting.
//!
//! Every sizeable allocation in the engine is tagged with a group so that
//! memory usage can be inspected per subsystem. Groups form a tree rooted
//! at [`AllocationGroup::root`]; charging a group bumps its own counter
//! only, while [`AllocationGroup::total`] sums the subtree. This is an
//! accounting facility, not an allocator.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::intern::{InternedString, intern};

static ROOT: OnceLock<AllocationGroup> = OnceLock::new();

thread_local! {
    static GROUP_STACK: RefCell<Vec<AllocationGroup>> = const { RefCell::new(Vec::new()) };
}

struct GroupNode {
    name: InternedString,
    children: Mutex<Vec<AllocationGroup>>,
    allocated: AtomicU64,
}

/// Handle to one node of the allocation accounting tree.
#[derive(Clone)]
pub struct AllocationGroup {
    node: Arc<GroupNode>,
}

impl AllocationGroup {
    /// The process-wide root group.
    pub fn root() -> AllocationGroup {
        ROOT.get_or_init(|| AllocationGroup {
            node: Arc::new(GroupNode {
                name: intern("root"),
                children: Mutex::new(Vec::new()),
                allocated: AtomicU64::new(0),
            }),
        })
        .clone()
    }

    /// Find or create the child group with the given name.
    pub fn child(&self, name: &str) -> AllocationGroup {
        let name = intern(name);
        let mut children = self.node.children.lock();

        if let Some(existing) = children.iter().find(|c| c.node.name == name) {
            return existing.clone();
        }

        let child = AllocationGroup {
            node: Arc::new(GroupNode {
                name,
                children: Mutex::new(Vec::new()),
                allocated: AtomicU64::new(0),
            }),
        };
        children.push(child.clone());
        child
    }

    pub fn name(&self) -> &InternedString {
        &self.node.name
    }

    /// Record `bytes` as allocated under this group.
    pub fn charge(&self, bytes: u64) {
        self.node.allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record `bytes` as released from this group.
    pub fn release(&self, bytes: u64) {
        let previous = self.node.allocated.fetch_sub(bytes, Ordering::Relaxed);
        debug_assert!(previous >= bytes, "released more than was charged");
    }

    /// Bytes currently charged to this group alone.
    pub fn allocated(&self) -> u64 {
        self.node.allocated.load(Ordering::Relaxed)
    }

    /// Bytes currently charged to this group and its whole subtree.
    pub fn total(&self) -> u64 {
        let own = self.allocated();
        let children = self.node.children.lock();
        own + children.iter().map(|c| c.total()).sum::<u64>()
    }

    /// The thread's current default group (top of the scope stack, or root).
    pub fn current() -> AllocationGroup {
        GROUP_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .cloned()
                .unwrap_or_else(AllocationGroup::root)
        })
    }

    /// Push this group as the thread's default until the guard drops.
    pub fn enter(&self) -> GroupScope {
        GROUP_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        GroupScope {
            _not_send: std::marker::PhantomData,
        }
    }

    fn is_same(&self, other: &AllocationGroup) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }
}

impl PartialEq for AllocationGroup {
    fn eq(&self, other: &Self) -> bool {
        self.is_same(other)
    }
}

impl Eq for AllocationGroup {}

impl std::fmt::Debug for AllocationGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocationGroup")
            .field("name", &self.node.name)
            .field("allocated", &self.allocated())
            .finish()
    }
}

/// RAII guard restoring the previous thread-default group.
///
/// Tied to the thread it was created on.
pub struct GroupScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for GroupScope {
    fn drop(&mut self) {
        GROUP_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert!(popped.is_some(), "group scope stack underflow");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_lookup_is_stable() {
        let root = AllocationGroup::root();
        let a = root.child("stable_lookup");
        let b = root.child("stable_lookup");
        assert_eq!(a, b);
    }

    #[test]
    fn totals_sum_subtree() {
        let root = AllocationGroup::root();
        let parent = root.child("totals_parent");
        let child = parent.child("totals_child");

        parent.charge(100);
        child.charge(50);
        assert_eq!(parent.allocated(), 100);
        assert_eq!(parent.total(), 150);

        child.release(50);
        parent.release(100);
        assert_eq!(parent.total(), 0);
    }

    #[test]
    fn scope_guard_restores_default() {
        let root = AllocationGroup::root();
        let scoped = root.child("scoped_default");

        assert_eq!(AllocationGroup::current(), AllocationGroup::root());
        {
            let _scope = scoped.enter();
            assert_eq!(AllocationGroup::current(), scoped);
        }
        assert_eq!(AllocationGroup::current(), AllocationGroup::root());
    }
}
