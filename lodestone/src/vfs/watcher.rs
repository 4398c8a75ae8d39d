//! Volume change watchers.
//!
//! A watcher covers a virtual path: pinned on a virtual directory it
//! follows every real mount reachable below; created inside a real mount
//! it follows just that host subtree. Real trees are observed by snapshot
//! diffing (walkdir + mtime + size) from the single mutator thread;
//! mounts appearing or disappearing below the scope synthesize added and
//! removed events. Events land on a lock-protected queue consumed through
//! iterator handles; an event is released only after every live iterator
//! has passed it.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use walkdir::WalkDir;

use super::EntryType;
use super::path::VfsPath;

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEventType {
    Added,
    Modified,
    Removed,
}

/// One change observed below a watcher's scope.
#[derive(Debug, Clone)]
pub struct WatcherEvent {
    pub event_type: WatcherEventType,
    pub entry_type: EntryType,
    pub path: VfsPath,
}

// ----------------------------------------------------------------------
// Event queue
// ----------------------------------------------------------------------

struct QueueInner {
    events: VecDeque<(u64, WatcherEvent)>,
    next_sequence: u64,
    /// Iterator id → next sequence it will consume.
    iterators: HashMap<u64, u64>,
    next_iterator_id: u64,
}

/// Single-producer multi-consumer event queue.
///
/// Events are enqueued only while at least one iterator exists and are
/// dropped once every iterator has consumed them.
pub(crate) struct EventQueue {
    inner: Mutex<QueueInner>,
}

impl EventQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                events: VecDeque::new(),
                next_sequence: 0,
                iterators: HashMap::new(),
                next_iterator_id: 0,
            }),
        })
    }

    pub fn push(&self, event: WatcherEvent) {
        let mut inner = self.inner.lock();
        if inner.iterators.is_empty() {
            // Nobody will ever consume it.
            return;
        }
        let sequence = inner.next_sequence;
        inner.next_sequence += 1;
        inner.events.push_back((sequence, event));
    }

    fn release_consumed(inner: &mut QueueInner) {
        let Some(minimum) = inner.iterators.values().copied().min() else {
            inner.events.clear();
            return;
        };
        while inner
            .events
            .front()
            .is_some_and(|(sequence, _)| *sequence < minimum)
        {
            inner.events.pop_front();
        }
    }

    fn create_iterator(self: &Arc<Self>) -> WatcherIterator {
        let mut inner = self.inner.lock();
        let id = inner.next_iterator_id;
        inner.next_iterator_id += 1;
        let start = inner.next_sequence;
        inner.iterators.insert(id, start);
        WatcherIterator {
            queue: self.clone(),
            id,
        }
    }
}

/// Consumer handle over a watcher's event queue.
///
/// Dropping the iterator releases its hold on unconsumed events.
pub struct WatcherIterator {
    queue: Arc<EventQueue>,
    id: u64,
}

impl Iterator for WatcherIterator {
    type Item = WatcherEvent;

    fn next(&mut self) -> Option<WatcherEvent> {
        let mut inner = self.queue.inner.lock();
        let position = *inner
            .iterators
            .get(&self.id)
            .expect("live iterator is always registered");
        let event = inner
            .events
            .iter()
            .find(|(sequence, _)| *sequence == position)
            .map(|(_, event)| event.clone())?;

        inner.iterators.insert(self.id, position + 1);
        EventQueue::release_consumed(&mut inner);
        Some(event)
    }
}

impl Drop for WatcherIterator {
    fn drop(&mut self) {
        let mut inner = self.queue.inner.lock();
        inner.iterators.remove(&self.id);
        EventQueue::release_consumed(&mut inner);
    }
}

// ----------------------------------------------------------------------
// Watcher state
// ----------------------------------------------------------------------

/// Handle to one watcher owned by a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq)]
struct Stamp {
    is_dir: bool,
    modified: Option<SystemTime>,
    size: u64,
}

/// One observed real subtree: host root plus its virtual prefix.
pub(crate) struct RealAttachment {
    pub virtual_prefix: VfsPath,
    pub host_root: PathBuf,
    snapshot: HashMap<PathBuf, Stamp>,
}

impl RealAttachment {
    /// Attach with the current tree as baseline; nothing is reported for
    /// content that already existed.
    pub fn new_silent(virtual_prefix: VfsPath, host_root: PathBuf) -> Self {
        let snapshot = scan_tree(&host_root);
        Self {
            virtual_prefix,
            host_root,
            snapshot,
        }
    }

    /// Attach with an empty baseline so the first poll reports the whole
    /// tree as added (new mounts under a pinned watcher).
    pub fn new_reporting(virtual_prefix: VfsPath, host_root: PathBuf) -> Self {
        Self {
            virtual_prefix,
            host_root,
            snapshot: HashMap::new(),
        }
    }

    /// Diff the host tree against the snapshot, pushing events.
    pub fn poll(&mut self, queue: &EventQueue) {
        let current = scan_tree(&self.host_root);

        for (relative, stamp) in &current {
            match self.snapshot.get(relative) {
                None => {
                    self.push_event(queue, relative, stamp.is_dir, WatcherEventType::Added);
                }
                Some(previous) if !stamp.is_dir && previous != stamp => {
                    self.push_event(queue, relative, false, WatcherEventType::Modified);
                }
                Some(_) => {}
            }
        }

        // Removals go children before parents.
        let mut removed: Vec<(&PathBuf, &Stamp)> = self
            .snapshot
            .iter()
            .filter(|(relative, _)| !current.contains_key(*relative))
            .collect();
        removed.sort_by_key(|(relative, _)| std::cmp::Reverse(relative.components().count()));
        for (relative, stamp) in removed {
            self.push_event(queue, relative, stamp.is_dir, WatcherEventType::Removed);
        }

        self.snapshot = current;
    }

    /// Emit removal events for the whole remembered tree (unmount).
    pub fn synthesize_removed(&self, queue: &EventQueue) {
        let mut entries: Vec<(&PathBuf, &Stamp)> = self.snapshot.iter().collect();
        entries.sort_by_key(|(relative, _)| std::cmp::Reverse(relative.components().count()));
        for (relative, stamp) in entries {
            self.push_event(queue, relative, stamp.is_dir, WatcherEventType::Removed);
        }
    }

    fn push_event(
        &self,
        queue: &EventQueue,
        relative: &Path,
        is_dir: bool,
        event_type: WatcherEventType,
    ) {
        let mut path = self.virtual_prefix.clone();
        for component in relative.components() {
            let text = component.as_os_str().to_string_lossy();
            if path.push(&text).is_err() {
                tracing::warn!(path = %self.virtual_prefix, "watcher event path exceeds bounds");
                return;
            }
        }
        queue.push(WatcherEvent {
            event_type,
            entry_type: if is_dir {
                EntryType::Directory
            } else {
                EntryType::File
            },
            path,
        });
    }
}

fn scan_tree(root: &Path) -> HashMap<PathBuf, Stamp> {
    let mut snapshot = HashMap::new();
    for entry in WalkDir::new(root).min_depth(1).into_iter() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::debug!(%error, "watcher scan skipped an entry");
                continue;
            }
        };
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        snapshot.insert(
            relative.to_path_buf(),
            Stamp {
                is_dir: metadata.is_dir(),
                modified: metadata.modified().ok(),
                size: if metadata.is_dir() { 0 } else { metadata.len() },
            },
        );
    }
    snapshot
}

/// Watcher bookkeeping held by the volume.
pub(crate) struct WatcherState {
    /// The virtual path this watcher covers.
    pub scope: VfsPath,
    /// Set when the watcher is pinned to a virtual directory and follows
    /// mounts appearing below it.
    pub pinned: bool,
    pub attachments: Vec<RealAttachment>,
    pub queue: Arc<EventQueue>,
}

impl WatcherState {
    pub fn new(scope: VfsPath, pinned: bool) -> Self {
        Self {
            scope,
            pinned,
            attachments: Vec::new(),
            queue: EventQueue::new(),
        }
    }

    pub fn create_iterator(&self) -> WatcherIterator {
        self.queue.create_iterator()
    }

    pub fn poll(&mut self) {
        for attachment in &mut self.attachments {
            attachment.poll(&self.queue);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(path: &str) -> WatcherEvent {
        WatcherEvent {
            event_type: WatcherEventType::Added,
            entry_type: EntryType::File,
            path: VfsPath::new(path).unwrap(),
        }
    }

    #[test]
    fn events_without_iterators_are_dropped() {
        let queue = EventQueue::new();
        queue.push(event("a"));
        let mut iterator = queue.create_iterator();
        assert!(iterator.next().is_none());
    }

    #[test]
    fn every_iterator_sees_every_event() {
        let queue = EventQueue::new();
        let mut first = queue.create_iterator();
        let mut second = queue.create_iterator();

        queue.push(event("one"));
        queue.push(event("two"));

        assert_eq!(first.next().unwrap().path.as_str(), "one");
        assert_eq!(first.next().unwrap().path.as_str(), "two");
        assert!(first.next().is_none());

        // Events stay alive until the slower iterator consumed them.
        assert_eq!(second.next().unwrap().path.as_str(), "one");
        assert_eq!(second.next().unwrap().path.as_str(), "two");
        assert_eq!(queue.inner.lock().events.len(), 0);
    }

    #[test]
    fn dropping_an_iterator_releases_events() {
        let queue = EventQueue::new();
        let mut first = queue.create_iterator();
        let second = queue.create_iterator();

        queue.push(event("one"));
        assert_eq!(first.next().unwrap().path.as_str(), "one");
        assert_eq!(queue.inner.lock().events.len(), 1);

        drop(second);
        assert_eq!(queue.inner.lock().events.len(), 0);
    }

    #[test]
    fn attachment_diff_reports_add_modify_remove() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("keep.txt"), b"one").unwrap();

        let mut attachment =
            RealAttachment::new_silent(VfsPath::new("assets").unwrap(), temp.path().to_path_buf());
        let queue = EventQueue::new();
        let mut iterator = queue.create_iterator();

        std::fs::write(temp.path().join("fresh.txt"), b"new").unwrap();
        std::fs::write(temp.path().join("keep.txt"), b"changed").unwrap();
        attachment.poll(&queue);

        let events: Vec<WatcherEvent> = iterator.by_ref().collect();
        assert_eq!(events.len(), 2);
        assert!(events.iter().any(|e| {
            e.event_type == WatcherEventType::Added && e.path.as_str() == "assets/fresh.txt"
        }));
        assert!(events.iter().any(|e| {
            e.event_type == WatcherEventType::Modified && e.path.as_str() == "assets/keep.txt"
        }));

        std::fs::remove_file(temp.path().join("fresh.txt")).unwrap();
        attachment.poll(&queue);
        let events: Vec<WatcherEvent> = iterator.by_ref().collect();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WatcherEventType::Removed);
    }

    #[test]
    fn removed_events_order_children_before_parents() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("outer/inner")).unwrap();
        std::fs::write(temp.path().join("outer/inner/leaf.txt"), b"x").unwrap();

        let attachment =
            RealAttachment::new_silent(VfsPath::new("mount").unwrap(), temp.path().to_path_buf());
        let queue = EventQueue::new();
        let mut iterator = queue.create_iterator();
        attachment.synthesize_removed(&queue);

        let paths: Vec<String> = iterator
            .by_ref()
            .map(|event| event.path.as_str().to_string())
            .collect();
        assert_eq!(
            paths,
            vec![
                "mount/outer/inner/leaf.txt",
                "mount/outer/inner",
                "mount/outer"
            ]
        );
    }
}
