//! Virtual file system.
//!
//! A volume is a tree of purely in-memory virtual directories whose
//! leaves bind external data sources: real host directories and sealed
//! read-only packs. One hierarchical `/`-separated namespace unifies
//! them, with directory iteration, stream opening and recursive change
//! watchers on top.

mod builder;
mod iter;
mod path;
mod ropack;
mod system;
mod watcher;

pub use builder::ReadOnlyPackBuilder;
pub use iter::DirectoryIterator;
pub use path::{VFS_PATH_CAPACITY, VfsPath};
pub use ropack::RopackFileStream;
pub use system::{VIRTUAL_FILE_SYSTEM_SYSTEM_NAME, VirtualFileSystemSystem};
pub use watcher::{WatcherEvent, WatcherEventType, WatcherId, WatcherIterator};

use std::path::{Path, PathBuf};

use lodestone_shared::errors::{LodestoneError, LodestoneResult};

use crate::intern::{InternedString, intern};
use crate::stream::{FileStream, Stream};

use ropack::{PackDir, build_pack_tree, compose_file_name, read_pack_registry};
use watcher::{RealAttachment, WatcherState};

/// Kind of a resolved entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Unknown,
    File,
    Directory,
}

/// Status of one resolved entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryStatus {
    pub entry_type: EntryType,
    pub size: u64,
    pub read_only: bool,
}

/// Index of a virtual directory in the volume arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DirId(u32);

const ROOT: DirId = DirId(0);

struct RealMount {
    name: InternedString,
    real_path: PathBuf,
}

struct PackMount {
    name: InternedString,
    pack_path: PathBuf,
    root: PackDir,
}

struct DirNode {
    name: InternedString,
    parent: Option<DirId>,
    children: Vec<DirId>,
    real_mounts: Vec<RealMount>,
    pack_mounts: Vec<PackMount>,
}

impl DirNode {
    fn named(name: InternedString, parent: Option<DirId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            real_mounts: Vec::new(),
            pack_mounts: Vec::new(),
        }
    }
}

enum Resolved {
    VirtualDir(DirId),
    /// Somewhere at or below a real mount; host existence is not checked.
    Real {
        host: PathBuf,
    },
    PackDir {
        dir: DirId,
        mount_index: usize,
        chain: Vec<InternedString>,
    },
    PackFile {
        pack_path: PathBuf,
        offset: u64,
        size: u64,
    },
}

/// A mount-point tree unifying real directories and read-only packs.
pub struct Volume {
    dirs: Vec<Option<DirNode>>,
    watchers: Vec<Option<WatcherState>>,
}

impl Default for Volume {
    fn default() -> Self {
        Self::new()
    }
}

impl Volume {
    pub fn new() -> Self {
        Self {
            dirs: vec![Some(DirNode::named(intern(""), None))],
            watchers: Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Arena helpers
    // ------------------------------------------------------------------

    fn dir(&self, id: DirId) -> &DirNode {
        self.dirs[id.0 as usize]
            .as_ref()
            .expect("directory ids are never dangling")
    }

    fn dir_mut(&mut self, id: DirId) -> &mut DirNode {
        self.dirs[id.0 as usize]
            .as_mut()
            .expect("directory ids are never dangling")
    }

    fn alloc_dir(&mut self, node: DirNode) -> DirId {
        if let Some(position) = self.dirs.iter().position(|slot| slot.is_none()) {
            self.dirs[position] = Some(node);
            return DirId(position as u32);
        }
        self.dirs.push(Some(node));
        DirId(self.dirs.len() as u32 - 1)
    }

    fn child_by_name(&self, parent: DirId, name: &InternedString) -> Option<DirId> {
        self.dir(parent)
            .children
            .iter()
            .copied()
            .find(|child| self.dir(*child).name == *name)
    }

    /// Reconstruct a directory's virtual path through parent back-links.
    fn dir_path(&self, id: DirId) -> VfsPath {
        let mut components = Vec::new();
        let mut current = id;
        while let Some(parent) = self.dir(current).parent {
            components.push(self.dir(current).name.clone());
            current = parent;
        }
        components.reverse();

        let mut path = VfsPath::root();
        for component in components {
            path.push(component.as_str())
                .expect("existing directory paths are always in bounds");
        }
        path
    }

    fn name_taken(&self, dir: DirId, name: &InternedString) -> bool {
        let node = self.dir(dir);
        node.children
            .iter()
            .any(|child| self.dir(*child).name == *name)
            || node.real_mounts.iter().any(|mount| mount.name == *name)
            || node.pack_mounts.iter().any(|mount| mount.name == *name)
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    fn resolve(&self, path: &VfsPath) -> LodestoneResult<Resolved> {
        let components: Vec<&str> = path.components().collect();
        let mut current = ROOT;

        for (position, component) in components.iter().enumerate() {
            let name = intern(component);

            if let Some(child) = self.child_by_name(current, &name) {
                current = child;
                continue;
            }

            let node = self.dir(current);
            if let Some(mount) = node.real_mounts.iter().find(|mount| mount.name == name) {
                let mut host = mount.real_path.clone();
                for remaining in &components[position + 1..] {
                    host.push(remaining);
                }
                return Ok(Resolved::Real { host });
            }

            if let Some(mount_index) = node
                .pack_mounts
                .iter()
                .position(|mount| mount.name == name)
            {
                return self.resolve_in_pack(
                    current,
                    mount_index,
                    &components[position + 1..],
                    path,
                );
            }

            return Err(LodestoneError::NotFound(format!("{path}")));
        }

        Ok(Resolved::VirtualDir(current))
    }

    fn resolve_in_pack(
        &self,
        dir: DirId,
        mount_index: usize,
        components: &[&str],
        path: &VfsPath,
    ) -> LodestoneResult<Resolved> {
        let mount = &self.dir(dir).pack_mounts[mount_index];
        let mut pack_dir = &mount.root;
        let mut chain = Vec::new();

        for (position, component) in components.iter().enumerate() {
            let name = intern(component);
            if let Some(child) = pack_dir.child(&name) {
                pack_dir = child;
                chain.push(name);
                continue;
            }

            if position + 1 == components.len() {
                if let Some(file) = pack_dir.file(component) {
                    return Ok(Resolved::PackFile {
                        pack_path: mount.pack_path.clone(),
                        offset: file.offset,
                        size: file.size,
                    });
                }
            }
            return Err(LodestoneError::NotFound(format!("{path}")));
        }

        Ok(Resolved::PackDir {
            dir,
            mount_index,
            chain,
        })
    }

    fn pack_dir(&self, dir: DirId, mount_index: usize, chain: &[InternedString]) -> &PackDir {
        let mut pack_dir = &self.dir(dir).pack_mounts[mount_index].root;
        for name in chain {
            pack_dir = pack_dir
                .child(name)
                .expect("pack chains come from resolution");
        }
        pack_dir
    }

    /// Resolve `path` up to a virtual directory, for mount operations.
    fn resolve_virtual_dir(&self, path: &VfsPath) -> LodestoneResult<DirId> {
        match self.resolve(path)? {
            Resolved::VirtualDir(dir) => Ok(dir),
            _ => Err(LodestoneError::NotADirectory(format!(
                "{path} is not a virtual directory"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn query_entry(&self, path: &str) -> LodestoneResult<EntryStatus> {
        let path = VfsPath::new(path)?;
        match self.resolve(&path)? {
            Resolved::VirtualDir(_) => Ok(EntryStatus {
                entry_type: EntryType::Directory,
                size: 0,
                read_only: false,
            }),
            Resolved::Real { host } => {
                let metadata = std::fs::metadata(&host).map_err(|e| {
                    LodestoneError::NotFound(format!("{}: {e}", host.display()))
                })?;
                Ok(EntryStatus {
                    entry_type: if metadata.is_dir() {
                        EntryType::Directory
                    } else {
                        EntryType::File
                    },
                    size: if metadata.is_dir() { 0 } else { metadata.len() },
                    read_only: metadata.permissions().readonly(),
                })
            }
            Resolved::PackDir { .. } => Ok(EntryStatus {
                entry_type: EntryType::Directory,
                size: 0,
                read_only: true,
            }),
            Resolved::PackFile { size, .. } => Ok(EntryStatus {
                entry_type: EntryType::File,
                size,
                read_only: true,
            }),
        }
    }

    pub fn check_existence(&self, path: &str) -> bool {
        self.query_entry(path).is_ok()
    }

    // ------------------------------------------------------------------
    // Mounting
    // ------------------------------------------------------------------

    pub fn mount_real(&mut self, path: &str, host_path: &Path) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        let (parent_path, name) = path.split_last().ok_or_else(|| {
            LodestoneError::PathInvalid("cannot mount at the volume root".to_string())
        })?;
        let parent = self.resolve_virtual_dir(&parent_path)?;
        let name = intern(name);

        if self.name_taken(parent, &name) {
            return Err(LodestoneError::AlreadyExists(format!("{path}")));
        }

        self.dir_mut(parent).real_mounts.push(RealMount {
            name,
            real_path: host_path.to_path_buf(),
        });
        tracing::debug!(path = %path, host = %host_path.display(), "mounted real directory");

        // Pinned watchers covering the mount start following it and see
        // its current content as added.
        for slot in self.watchers.iter_mut().flatten() {
            if !slot.pinned || !path.starts_with(&slot.scope) {
                continue;
            }
            slot.queue.push(WatcherEvent {
                event_type: WatcherEventType::Added,
                entry_type: EntryType::Directory,
                path: path.clone(),
            });
            let mut attachment =
                RealAttachment::new_reporting(path.clone(), host_path.to_path_buf());
            attachment.poll(&slot.queue);
            slot.attachments.push(attachment);
        }
        Ok(())
    }

    pub fn unmount_real(&mut self, path: &str) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        let (parent_path, name) = path
            .split_last()
            .ok_or_else(|| LodestoneError::PathInvalid("cannot unmount the root".to_string()))?;
        let parent = self.resolve_virtual_dir(&parent_path)?;
        let name = intern(name);

        let position = self
            .dir(parent)
            .real_mounts
            .iter()
            .position(|mount| mount.name == name)
            .ok_or_else(|| LodestoneError::NotFound(format!("{path}")))?;
        self.dir_mut(parent).real_mounts.remove(position);
        tracing::debug!(path = %path, "unmounted real directory");

        // Attached watchers see the whole subtree removed, children
        // before parents, then lose the attachment.
        for slot in self.watchers.iter_mut().flatten() {
            let mut kept = Vec::new();
            for attachment in slot.attachments.drain(..) {
                let overlaps = attachment.virtual_prefix.starts_with(&path)
                    || path.starts_with(&attachment.virtual_prefix);
                if !overlaps {
                    kept.push(attachment);
                    continue;
                }
                attachment.synthesize_removed(&slot.queue);
                slot.queue.push(WatcherEvent {
                    event_type: WatcherEventType::Removed,
                    entry_type: EntryType::Directory,
                    path: attachment.virtual_prefix.clone(),
                });
            }
            slot.attachments = kept;
        }
        Ok(())
    }

    pub fn mount_read_only_pack(&mut self, path: &str, pack_file: &Path) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        let (parent_path, name) = path.split_last().ok_or_else(|| {
            LodestoneError::PathInvalid("cannot mount at the volume root".to_string())
        })?;
        let parent = self.resolve_virtual_dir(&parent_path)?;
        let name = intern(name);

        if self.name_taken(parent, &name) {
            return Err(LodestoneError::AlreadyExists(format!("{path}")));
        }

        // A failed registry read leaves no partial mount.
        let stream = FileStream::open_for_read(pack_file)?;
        let registry = read_pack_registry(Box::new(stream)).map_err(|error| {
            tracing::error!(path = %path, pack = %pack_file.display(), %error, "read-only pack registry rejected");
            error
        })?;
        let root = build_pack_tree(&registry)?;

        self.dir_mut(parent).pack_mounts.push(PackMount {
            name,
            pack_path: pack_file.to_path_buf(),
            root,
        });
        tracing::debug!(path = %path, pack = %pack_file.display(), "mounted read-only pack");

        let events = {
            let mount = self
                .dir(parent)
                .pack_mounts
                .last()
                .expect("mount was just pushed");
            let mut events = vec![WatcherEvent {
                event_type: WatcherEventType::Added,
                entry_type: EntryType::Directory,
                path: path.clone(),
            }];
            collect_pack_events(&mount.root, &path, WatcherEventType::Added, &mut events);
            events
        };
        self.dispatch_to_pinned(&events);
        Ok(())
    }

    pub fn unmount_read_only_pack(&mut self, path: &str) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        let (parent_path, name) = path
            .split_last()
            .ok_or_else(|| LodestoneError::PathInvalid("cannot unmount the root".to_string()))?;
        let parent = self.resolve_virtual_dir(&parent_path)?;
        let name = intern(name);

        let position = self
            .dir(parent)
            .pack_mounts
            .iter()
            .position(|mount| mount.name == name)
            .ok_or_else(|| LodestoneError::NotFound(format!("{path}")))?;

        let events = {
            let mount = &self.dir(parent).pack_mounts[position];
            let mut events = Vec::new();
            collect_pack_events(&mount.root, &path, WatcherEventType::Removed, &mut events);
            events.push(WatcherEvent {
                event_type: WatcherEventType::Removed,
                entry_type: EntryType::Directory,
                path: path.clone(),
            });
            events
        };

        self.dir_mut(parent).pack_mounts.remove(position);
        tracing::debug!(path = %path, "unmounted read-only pack");
        self.dispatch_scoped(&events);
        Ok(())
    }

    /// Push pack mount events to pinned watchers covering them.
    fn dispatch_to_pinned(&mut self, events: &[WatcherEvent]) {
        for slot in self.watchers.iter_mut().flatten() {
            if !slot.pinned {
                continue;
            }
            for event in events {
                if event.path.starts_with(&slot.scope) {
                    slot.queue.push(event.clone());
                }
            }
        }
    }

    /// Push events to every watcher whose scope contains them.
    fn dispatch_scoped(&mut self, events: &[WatcherEvent]) {
        for slot in self.watchers.iter_mut().flatten() {
            for event in events {
                if event.path.starts_with(&slot.scope) {
                    slot.queue.push(event.clone());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    pub fn make_directory(&mut self, path: &str) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        let components: Vec<String> =
            path.components().map(|component| component.to_string()).collect();
        let mut current = ROOT;

        for (position, component) in components.iter().enumerate() {
            let name = intern(component);

            if let Some(child) = self.child_by_name(current, &name) {
                current = child;
                continue;
            }

            let node = self.dir(current);
            if let Some(mount) = node.real_mounts.iter().find(|mount| mount.name == name) {
                let mut host = mount.real_path.clone();
                for remaining in &components[position + 1..] {
                    host.push(remaining);
                }
                std::fs::create_dir_all(&host)?;
                return Ok(());
            }
            if node.pack_mounts.iter().any(|mount| mount.name == name) {
                return Err(LodestoneError::ReadOnly(format!("{path}")));
            }

            let created = self.alloc_dir(DirNode::named(name, Some(current)));
            self.dir_mut(current).children.push(created);
            current = created;
        }
        Ok(())
    }

    pub fn remove_file(&mut self, path: &str) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        match self.resolve(&path)? {
            Resolved::Real { host } => {
                let metadata = std::fs::metadata(&host)
                    .map_err(|e| LodestoneError::NotFound(format!("{path}: {e}")))?;
                if metadata.is_dir() {
                    return Err(LodestoneError::NotAFile(format!("{path}")));
                }
                std::fs::remove_file(&host)?;
                Ok(())
            }
            Resolved::PackFile { .. } => Err(LodestoneError::ReadOnly(format!("{path}"))),
            Resolved::VirtualDir(_) | Resolved::PackDir { .. } => {
                Err(LodestoneError::NotAFile(format!("{path}")))
            }
        }
    }

    pub fn remove_empty_directory(&mut self, path: &str) -> LodestoneResult<()> {
        let path = VfsPath::new(path)?;
        match self.resolve(&path)? {
            Resolved::VirtualDir(dir) => {
                let node = self.dir(dir);
                if node.parent.is_none() {
                    return Err(LodestoneError::PathInvalid(
                        "cannot remove the volume root".to_string(),
                    ));
                }
                if !node.children.is_empty()
                    || !node.real_mounts.is_empty()
                    || !node.pack_mounts.is_empty()
                {
                    return Err(LodestoneError::InvalidState(format!(
                        "{path} is not empty"
                    )));
                }
                let parent = node.parent.expect("checked above");
                self.dir_mut(parent).children.retain(|child| *child != dir);
                self.dirs[dir.0 as usize] = None;
                Ok(())
            }
            Resolved::Real { host } => {
                std::fs::remove_dir(&host)?;
                Ok(())
            }
            Resolved::PackDir { .. } => Err(LodestoneError::ReadOnly(format!("{path}"))),
            Resolved::PackFile { .. } => Err(LodestoneError::NotADirectory(format!("{path}"))),
        }
    }

    pub fn remove_directory_with_content(&mut self, path: &str) -> LodestoneResult<()> {
        let vfs_path = VfsPath::new(path)?;
        match self.resolve(&vfs_path)? {
            Resolved::VirtualDir(dir) => {
                if self.dir(dir).parent.is_none() {
                    return Err(LodestoneError::PathInvalid(
                        "cannot remove the volume root".to_string(),
                    ));
                }
                self.remove_virtual_subtree(dir)?;
                Ok(())
            }
            Resolved::Real { host } => {
                std::fs::remove_dir_all(&host)?;
                Ok(())
            }
            Resolved::PackDir { .. } => Err(LodestoneError::ReadOnly(format!("{vfs_path}"))),
            Resolved::PackFile { .. } => {
                Err(LodestoneError::NotADirectory(format!("{vfs_path}")))
            }
        }
    }

    fn remove_virtual_subtree(&mut self, dir: DirId) -> LodestoneResult<()> {
        let dir_path = self.dir_path(dir);

        // Unmount everything bound below, with watcher notifications.
        let real_names: Vec<InternedString> = self
            .dir(dir)
            .real_mounts
            .iter()
            .map(|mount| mount.name.clone())
            .collect();
        for name in real_names {
            let mount_path = dir_path.join(name.as_str())?;
            self.unmount_real(mount_path.as_str())?;
        }
        let pack_names: Vec<InternedString> = self
            .dir(dir)
            .pack_mounts
            .iter()
            .map(|mount| mount.name.clone())
            .collect();
        for name in pack_names {
            let mount_path = dir_path.join(name.as_str())?;
            self.unmount_read_only_pack(mount_path.as_str())?;
        }

        let children: Vec<DirId> = self.dir(dir).children.clone();
        for child in children {
            self.remove_virtual_subtree(child)?;
        }

        if let Some(parent) = self.dir(dir).parent {
            self.dir_mut(parent).children.retain(|child| *child != dir);
        }
        self.dirs[dir.0 as usize] = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    pub fn open_for_read(&self, path: &str) -> LodestoneResult<Box<dyn Stream>> {
        let path = VfsPath::new(path)?;
        match self.resolve(&path)? {
            Resolved::Real { host } => Ok(Box::new(FileStream::open_for_read(&host)?)),
            Resolved::PackFile {
                pack_path,
                offset,
                size,
            } => Ok(Box::new(RopackFileStream::open(&pack_path, offset, size)?)),
            Resolved::VirtualDir(_) | Resolved::PackDir { .. } => {
                Err(LodestoneError::NotAFile(format!("{path}")))
            }
        }
    }

    pub fn open_for_write(&self, path: &str) -> LodestoneResult<Box<dyn Stream>> {
        let path = VfsPath::new(path)?;
        match self.resolve(&path)? {
            Resolved::Real { host } => Ok(Box::new(FileStream::open_for_write(&host)?)),
            Resolved::PackFile { .. } | Resolved::PackDir { .. } => {
                Err(LodestoneError::ReadOnly(format!("{path}")))
            }
            Resolved::VirtualDir(_) => Err(LodestoneError::NotAFile(format!("{path}"))),
        }
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    pub fn directory_iterator(&self, path: &str) -> LodestoneResult<DirectoryIterator> {
        let path = VfsPath::new(path)?;
        match self.resolve(&path)? {
            Resolved::VirtualDir(dir) => {
                let node = self.dir(dir);
                let mut names: Vec<String> = node
                    .children
                    .iter()
                    .map(|child| self.dir(*child).name.as_str().to_string())
                    .collect();
                names.extend(
                    node.real_mounts
                        .iter()
                        .map(|mount| mount.name.as_str().to_string()),
                );
                names.extend(
                    node.pack_mounts
                        .iter()
                        .map(|mount| mount.name.as_str().to_string()),
                );
                Ok(DirectoryIterator::new(names))
            }
            Resolved::Real { host } => {
                let mut names = Vec::new();
                for entry in std::fs::read_dir(&host)? {
                    let entry = entry?;
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
                names.sort();
                Ok(DirectoryIterator::new(names))
            }
            Resolved::PackDir {
                dir,
                mount_index,
                chain,
            } => {
                let pack_dir = self.pack_dir(dir, mount_index, &chain);
                let mut names: Vec<String> = pack_dir
                    .children
                    .iter()
                    .map(|child| child.name.as_str().to_string())
                    .collect();
                let mut file_names: Vec<String> = pack_dir
                    .files
                    .values()
                    .map(|file| compose_file_name(&file.name, &file.extension))
                    .collect();
                file_names.sort();
                names.extend(file_names);
                Ok(DirectoryIterator::new(names))
            }
            Resolved::PackFile { .. } => Err(LodestoneError::NotADirectory(format!("{path}"))),
        }
    }

    // ------------------------------------------------------------------
    // Watchers
    // ------------------------------------------------------------------

    pub fn watcher_create(&mut self, path: &str) -> LodestoneResult<WatcherId> {
        let scope = VfsPath::new(path)?;
        let mut state = match self.resolve(&scope)? {
            Resolved::VirtualDir(dir) => {
                let mut state = WatcherState::new(scope.clone(), true);
                let mut mounts = Vec::new();
                self.collect_real_mounts(dir, &mut mounts);
                for (mount_path, host) in mounts {
                    state
                        .attachments
                        .push(RealAttachment::new_silent(mount_path, host));
                }
                state
            }
            Resolved::Real { host } => {
                let mut state = WatcherState::new(scope.clone(), false);
                state
                    .attachments
                    .push(RealAttachment::new_silent(scope.clone(), host));
                state
            }
            // Pack content is immutable; only unmount synthesizes events.
            Resolved::PackDir { .. } => WatcherState::new(scope.clone(), false),
            Resolved::PackFile { .. } => {
                return Err(LodestoneError::NotADirectory(format!("{scope}")));
            }
        };

        tracing::debug!(path = %scope, "created file system watcher");
        if let Some(position) = self.watchers.iter().position(|slot| slot.is_none()) {
            self.watchers[position] = Some(state);
            Ok(WatcherId(position as u32))
        } else {
            self.watchers.push(Some(state));
            Ok(WatcherId(self.watchers.len() as u32 - 1))
        }
    }

    pub fn watcher_destroy(&mut self, id: WatcherId) {
        if let Some(slot) = self.watchers.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// Create a consuming iterator over a watcher's events.
    pub fn watcher_iterator(&self, id: WatcherId) -> LodestoneResult<WatcherIterator> {
        let state = self
            .watchers
            .get(id.0 as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| LodestoneError::NotFound(format!("watcher {}", id.0)))?;
        Ok(state.create_iterator())
    }

    /// Diff every watcher's real attachments against the host trees.
    ///
    /// Called from the single mutator thread; iterator consumption may
    /// happen anywhere.
    pub fn poll_watchers(&mut self) {
        for slot in self.watchers.iter_mut().flatten() {
            slot.poll();
        }
    }

    fn collect_real_mounts(&self, dir: DirId, out: &mut Vec<(VfsPath, PathBuf)>) {
        let dir_path = self.dir_path(dir);
        let node = self.dir(dir);
        for mount in &node.real_mounts {
            if let Ok(mount_path) = dir_path.join(mount.name.as_str()) {
                out.push((mount_path, mount.real_path.clone()));
            }
        }
        for child in &node.children {
            self.collect_real_mounts(*child, out);
        }
    }
}

/// Collect added/removed events for a whole pack subtree.
///
/// Added events go parents before children; removed events children
/// before parents.
fn collect_pack_events(
    dir: &PackDir,
    dir_path: &VfsPath,
    event_type: WatcherEventType,
    out: &mut Vec<WatcherEvent>,
) {
    let mut file_events = Vec::new();
    for file in dir.files.values() {
        let name = compose_file_name(&file.name, &file.extension);
        let Ok(path) = dir_path.join(&name) else {
            continue;
        };
        file_events.push(WatcherEvent {
            event_type,
            entry_type: EntryType::File,
            path,
        });
    }
    file_events.sort_by(|a, b| a.path.as_str().cmp(b.path.as_str()));

    match event_type {
        WatcherEventType::Added | WatcherEventType::Modified => {
            out.extend(file_events);
            for child in &dir.children {
                let Ok(child_path) = dir_path.join(child.name.as_str()) else {
                    continue;
                };
                out.push(WatcherEvent {
                    event_type,
                    entry_type: EntryType::Directory,
                    path: child_path.clone(),
                });
                collect_pack_events(child, &child_path, event_type, out);
            }
        }
        WatcherEventType::Removed => {
            out.extend(file_events);
            for child in &dir.children {
                let Ok(child_path) = dir_path.join(child.name.as_str()) else {
                    continue;
                };
                collect_pack_events(child, &child_path, event_type, out);
                out.push(WatcherEvent {
                    event_type,
                    entry_type: EntryType::Directory,
                    path: child_path,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::read_to_end;

    #[test]
    fn virtual_directories_and_mount_name_collisions() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut volume = Volume::new();

        volume.make_directory("/assets/nested").unwrap();
        assert_eq!(
            volume.query_entry("/assets/nested").unwrap().entry_type,
            EntryType::Directory
        );

        volume.mount_real("/assets/data", temp.path()).unwrap();
        // A mount name must not collide with a sibling virtual directory
        // or another mount.
        assert!(volume.mount_real("/assets/nested", temp.path()).is_err());
        assert!(volume.mount_real("/assets/data", temp.path()).is_err());
    }

    #[test]
    fn real_mount_read_write_round_trip() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut volume = Volume::new();
        volume.mount_real("/assets", temp.path()).unwrap();

        {
            let mut stream = volume.open_for_write("/assets/readme.txt").unwrap();
            stream.write_all(b"hello").unwrap();
            stream.flush().unwrap();
        }

        let status = volume.query_entry("/assets/readme.txt").unwrap();
        assert_eq!(status.entry_type, EntryType::File);
        assert_eq!(status.size, 5);

        let mut stream = volume.open_for_read("/assets/readme.txt").unwrap();
        assert_eq!(read_to_end(stream.as_mut()).unwrap(), b"hello");

        volume.remove_file("/assets/readme.txt").unwrap();
        assert!(!volume.check_existence("/assets/readme.txt"));
    }

    #[test]
    fn unknown_paths_report_not_found() {
        let volume = Volume::new();
        assert!(matches!(
            volume.query_entry("/nowhere/file.bin"),
            Err(LodestoneError::NotFound(_))
        ));
    }

    #[test]
    fn directory_iterator_orders_children_then_mounts() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut volume = Volume::new();
        volume.make_directory("/root/vdir").unwrap();
        volume.mount_real("/root/rmount", temp.path()).unwrap();

        let names: Vec<String> = volume.directory_iterator("/root").unwrap().collect();
        assert_eq!(names, vec!["vdir".to_string(), "rmount".to_string()]);
    }

    #[test]
    fn remove_empty_directory_rules() {
        let mut volume = Volume::new();
        volume.make_directory("/a/b").unwrap();
        assert!(volume.remove_empty_directory("/a").is_err());
        volume.remove_empty_directory("/a/b").unwrap();
        volume.remove_empty_directory("/a").unwrap();
        assert!(!volume.check_existence("/a"));
    }
}
