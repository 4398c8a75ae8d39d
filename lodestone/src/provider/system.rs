//! Resource provider system.
//!
//! Runs as a context-hosted mutator: every tick it advances scanning
//! under the scan budget, then (once serving) drains watcher and request
//! events, reschedules debounced reloads and runs the shared parallel
//! loading serve under the load budget.

use std::any::{Any, TypeId};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use lodestone_shared::errors::LodestoneResult;

use crate::context::{Context, System, SystemApi, SystemHandle};
use crate::intern::{InternedString, intern};
use crate::memory::AllocationGroup;
use crate::rdata::{StepResult, StringRegistry, StringRegistryReader};
use crate::rdata::{read_binary_type_header, read_readable_type_header};
use crate::reflect::{REFLECTION_SYSTEM_NAME, ReflectionSystem, TypeRegistry};
use crate::repo::TableEvent;
use crate::vfs::{
    EntryType, VIRTUAL_FILE_SYSTEM_SYSTEM_NAME, VfsPath, VirtualFileSystemSystem, Volume,
    WatcherEvent, WatcherEventType, WatcherId, WatcherIterator,
};

use super::config::ResourceProviderConfig;
use super::containers::ContainerRecords;
use super::hot_reload::{HOT_RELOAD_COORDINATION_SYSTEM_NAME, HotReloadCoordinationSystem};
use super::index::{
    INDEX_FILE_NAME, IndexReading, ResourceFormat, STRING_REGISTRY_FILE_NAME,
};
use super::serve::{build_native_operation, run_loading_serve};
use super::state::{
    NativeEntry, NativeKey, ProvidedData, ProviderData, ProviderStatus, ResourceProviderSingleton,
    ResourceRequest, ResourceUpdatedEvent, ThirdPartyEntry,
};

pub const RESOURCE_PROVIDER_SYSTEM_NAME: &str = "resource_provider_system_t";

#[derive(Default)]
struct ScanState {
    stack: Vec<VfsPath>,
    index: Option<IndexReading>,
    string_registry: Option<(StringRegistryReader, VfsPath)>,
}

struct WatcherHook {
    id: WatcherId,
    iterator: WatcherIterator,
}

/// Budgeted streaming resource loader.
pub struct ResourceProviderSystem {
    config: ResourceProviderConfig,
    group: AllocationGroup,
    epoch: Instant,

    vfs: Option<SystemHandle>,
    reflection: Option<SystemHandle>,
    hot_reload: Option<SystemHandle>,

    public: Arc<ResourceProviderSingleton>,
    status: ProviderStatus,
    scan: ScanState,
    data: ProviderData,
    watcher: Option<WatcherHook>,
    registry: Option<Arc<TypeRegistry>>,
    next_container_id: u64,
    degraded_logged: bool,
}

impl ResourceProviderSystem {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    // ------------------------------------------------------------------
    // Consumer API
    // ------------------------------------------------------------------

    pub fn singleton(&self) -> Arc<ResourceProviderSingleton> {
        self.public.clone()
    }

    pub fn status_serving(&self) -> bool {
        self.status == ProviderStatus::Serving
    }

    /// Insert a request row; the matching resource is scheduled on the
    /// next tick. An empty `resource_type` requests third-party bytes.
    pub fn insert_request(&mut self, resource_type: &str, name: &str, priority: u32) -> u64 {
        let request_id = self.public.next_request_id();
        let row = ResourceRequest {
            request_id,
            resource_type: intern(resource_type),
            name: intern(name),
            priority,
        };
        let row_id = self.data.requests.insert(row);
        self.data.request_rows.insert(request_id, row_id);
        self.data.provided.insert(request_id, ProvidedData::None);
        request_id
    }

    pub fn update_request_priority(
        &mut self,
        request_id: u64,
        priority: u32,
    ) -> LodestoneResult<()> {
        let row_id = *self.data.request_rows.get(&request_id).ok_or_else(|| {
            lodestone_shared::errors::LodestoneError::NotFound(format!("request {request_id}"))
        })?;
        self.data
            .requests
            .update(row_id, |request| request.priority = priority)
    }

    pub fn remove_request(&mut self, request_id: u64) -> LodestoneResult<()> {
        let row_id = self.data.request_rows.remove(&request_id).ok_or_else(|| {
            lodestone_shared::errors::LodestoneError::NotFound(format!("request {request_id}"))
        })?;
        self.data.requests.remove(row_id);
        Ok(())
    }

    /// Current provided data for a request.
    pub fn request_provided(&self, request_id: u64) -> ProvidedData {
        self.data
            .provided
            .get(&request_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn drain_updated_events(&mut self) -> Vec<ResourceUpdatedEvent> {
        self.data.updated_events.drain(..).collect()
    }

    /// Borrow a loaded container's payload as its backing Rust type.
    pub fn with_loaded_resource<T: 'static, R>(
        &self,
        resource_type: &str,
        container_id: u64,
        operation: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let record_index = self.data.containers.find(&intern(resource_type))?;
        let record = self.data.containers.record(record_index);
        if record.payload_type.rust_type() != Some(TypeId::of::<T>()) {
            return None;
        }
        let container = record.storage.get(container_id)?;
        let payload =
            unsafe { &*(container.as_ptr().add(record.payload_offset as usize) as *const T) };
        Some(operation(payload))
    }

    /// Bookkeeping snapshot of one native entry, for diagnostics.
    pub fn native_entry_state(
        &self,
        resource_type: &str,
        name: &str,
    ) -> Option<(u32, Option<u64>, Option<u64>)> {
        let entry = self
            .data
            .natives
            .get(&(intern(resource_type), intern(name)))?;
        Some((
            entry.request_count,
            entry.loaded_container_id,
            entry.loading_container_id,
        ))
    }

    // ------------------------------------------------------------------
    // Tick driver
    // ------------------------------------------------------------------

    /// Run one mutator tick.
    pub fn update(&mut self) {
        let Some(vfs) = self.vfs.clone() else {
            if !self.degraded_logged {
                tracing::warn!("virtual file system peer absent, resource provider degraded");
                self.degraded_logged = true;
            }
            return;
        };

        let ran = vfs.with::<VirtualFileSystemSystem, _>(|system| {
            let volume = system.volume_mut();
            self.tick(volume);
        });
        if ran.is_none() && !self.degraded_logged {
            tracing::warn!("virtual file system peer has unexpected type, provider degraded");
            self.degraded_logged = true;
        }
    }

    fn tick(&mut self, volume: &mut Volume) {
        if self.public.request_rescan.swap(false, Ordering::Relaxed)
            && self.status != ProviderStatus::NotInitialized
        {
            self.begin_rescan(volume);
        }

        match self.status {
            ProviderStatus::NotInitialized => {
                self.begin_scan();
                self.scan_tick(volume);
            }
            ProviderStatus::Scanning => self.scan_tick(volume),
            ProviderStatus::Serving => self.serve_tick(volume),
        }
    }

    fn begin_scan(&mut self) {
        self.status = ProviderStatus::Scanning;
        self.scan = ScanState::default();
        match VfsPath::new(&self.config.resource_directory_path) {
            Ok(root) => self.scan.stack.push(root),
            Err(error) => {
                tracing::error!(
                    path = %self.config.resource_directory_path,
                    %error,
                    "resource root path rejected, nothing will be scanned"
                );
            }
        }
        tracing::debug!(
            root = %self.config.resource_directory_path,
            "resource scanning started"
        );
    }

    /// Clear all entries and derived state, then scan from scratch.
    fn begin_rescan(&mut self, volume: &mut Volume) {
        if let Some(hook) = self.watcher.take() {
            drop(hook.iterator);
            volume.watcher_destroy(hook.id);
        }

        // Consumers must drop container references before reuse.
        let request_ids: Vec<u64> = self.data.provided.keys().copied().collect();
        for request_id in request_ids {
            self.data.provided.insert(request_id, ProvidedData::None);
        }
        let rows: Vec<(u64, InternedString, InternedString)> = self
            .data
            .requests
            .iter()
            .map(|(_, request)| {
                (
                    request.request_id,
                    request.resource_type.clone(),
                    request.name.clone(),
                )
            })
            .collect();
        for (request_id, resource_type, name) in rows {
            self.data.updated_events.push_back(ResourceUpdatedEvent {
                request_id,
                resource_type,
                name,
                provided: ProvidedData::None,
            });
        }

        self.data.natives.clear();
        self.data.third_party.clear();
        self.data.operations.clear();
        self.data.loaded_string_registries.clear();
        for record in self.data.containers.iter_mut() {
            record.storage.clear();
        }
        self.public.native_loading_count.store(0, Ordering::Relaxed);
        self.public
            .third_party_loading_count
            .store(0, Ordering::Relaxed);

        tracing::info!("resource rescan requested, all entries cleared");
        self.begin_scan();
    }

    // ------------------------------------------------------------------
    // Scanning
    // ------------------------------------------------------------------

    fn scan_tick(&mut self, volume: &mut Volume) {
        let deadline = self.now_ns() + self.config.scan_budget_ns;

        loop {
            if self.now_ns() >= deadline {
                return;
            }

            if self.scan.string_registry.is_some() {
                self.step_string_registry(volume);
                continue;
            }
            if self.scan.index.is_some() {
                self.step_index();
                continue;
            }

            let Some(directory) = self.scan.stack.pop() else {
                self.finish_scan(volume);
                return;
            };
            self.scan_directory(volume, &directory);
        }
    }

    fn step_string_registry(&mut self, volume: &Volume) {
        let (reader, _) = self
            .scan
            .string_registry
            .as_mut()
            .expect("caller checked presence");
        match reader.step() {
            StepResult::InProgress => {}
            StepResult::Finished => {
                let (reader, directory) = self
                    .scan
                    .string_registry
                    .take()
                    .expect("checked just above");
                let registry = Arc::new(reader.into_registry());
                if !self.config.use_load_only_string_registry {
                    self.data.loaded_string_registries.push(registry.clone());
                }
                self.open_index(volume, directory, Some(registry));
            }
            StepResult::Failed => {
                let (_, directory) = self
                    .scan
                    .string_registry
                    .take()
                    .expect("checked just above");
                tracing::error!(directory = %directory, "string registry read failed, directory skipped");
            }
        }
    }

    fn step_index(&mut self) {
        let reading = self.scan.index.as_mut().expect("caller checked presence");
        match reading.reader.step() {
            StepResult::InProgress => {}
            StepResult::Finished => {
                let reading = self.scan.index.take().expect("checked just above");
                let (index, directory, string_registry) = reading.into_index();
                self.register_index(*index, &directory, string_registry);
            }
            StepResult::Failed => {
                let reading = self.scan.index.take().expect("checked just above");
                let (_, directory, _) = reading.into_index();
                tracing::error!(directory = %directory, "resource index read failed, directory skipped");
            }
        }
    }

    fn open_index(
        &mut self,
        volume: &Volume,
        directory: VfsPath,
        string_registry: Option<Arc<StringRegistry>>,
    ) {
        let index_path = match directory.join(INDEX_FILE_NAME) {
            Ok(path) => path,
            Err(error) => {
                tracing::error!(directory = %directory, %error, "index path out of bounds");
                return;
            }
        };
        match volume.open_for_read(index_path.as_str()) {
            Ok(stream) => {
                self.scan.index = Some(IndexReading::start(stream, directory, string_registry));
            }
            Err(error) => {
                tracing::error!(path = %index_path, %error, "resource index open failed");
            }
        }
    }

    fn scan_directory(&mut self, volume: &Volume, directory: &VfsPath) {
        let index_exists = directory
            .join(INDEX_FILE_NAME)
            .map(|path| volume.check_existence(path.as_str()))
            .unwrap_or(false);

        if index_exists {
            let registry_path = directory.join(STRING_REGISTRY_FILE_NAME);
            let registry_exists = registry_path
                .as_ref()
                .map(|path| volume.check_existence(path.as_str()))
                .is_ok_and(|exists| exists);

            if registry_exists {
                let path = registry_path.expect("existence implies a valid path");
                match volume.open_for_read(path.as_str()) {
                    Ok(stream) => {
                        self.scan.string_registry =
                            Some((StringRegistryReader::new(stream), directory.clone()));
                    }
                    Err(error) => {
                        tracing::error!(path = %path, %error, "string registry open failed");
                        self.open_index(volume, directory.clone(), None);
                    }
                }
            } else {
                self.open_index(volume, directory.clone(), None);
            }
            return;
        }

        let iterator = match volume.directory_iterator(directory.as_str()) {
            Ok(iterator) => iterator,
            Err(error) => {
                tracing::warn!(directory = %directory, %error, "directory iteration failed");
                return;
            }
        };

        for name in iterator {
            let child = match directory.join(&name) {
                Ok(child) => child,
                Err(error) => {
                    tracing::warn!(directory = %directory, name = %name, %error, "entry path out of bounds");
                    continue;
                }
            };
            match volume.query_entry(child.as_str()) {
                Ok(status) => match status.entry_type {
                    EntryType::Directory => self.scan.stack.push(child),
                    EntryType::File | EntryType::Unknown => {
                        self.register_scanned_file(volume, child, status.size);
                    }
                },
                Err(error) => {
                    tracing::warn!(path = %child, %error, "entry query failed");
                }
            }
        }
    }

    /// Recognize a file outside any index by its extension.
    fn register_scanned_file(&mut self, volume: &Volume, path: VfsPath, size: u64) {
        let file_name = path
            .split_last()
            .map(|(_, name)| name.to_string())
            .unwrap_or_default();
        if file_name == INDEX_FILE_NAME || file_name == STRING_REGISTRY_FILE_NAME {
            return;
        }

        let (stem, extension) = match file_name.rfind('.') {
            Some(position) => (&file_name[..position], &file_name[position + 1..]),
            None => (file_name.as_str(), ""),
        };

        let format = match extension {
            "bin" => ResourceFormat::Binary,
            "rd" => ResourceFormat::ReadableData,
            _ => {
                let name = intern(&file_name);
                if self.data.third_party.contains_key(&name) {
                    return;
                }
                self.data.third_party.insert(
                    name.clone(),
                    ThirdPartyEntry {
                        name,
                        size,
                        path,
                        request_count: 0,
                        loaded_data: None,
                        loading: false,
                        reload_after_ns: None,
                    },
                );
                return;
            }
        };

        let mut stream = match volume.open_for_read(path.as_str()) {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(path = %path, %error, "resource open failed during scan");
                return;
            }
        };
        let header = match format {
            ResourceFormat::Binary => read_binary_type_header(stream.as_mut()),
            ResourceFormat::ReadableData => read_readable_type_header(stream.as_mut()),
        };
        let resource_type = match header {
            Ok(resource_type) => resource_type,
            Err(error) => {
                tracing::warn!(path = %path, %error, "type header rejected during scan");
                return;
            }
        };

        let key: NativeKey = (resource_type.clone(), intern(stem));
        if self.data.natives.contains_key(&key) {
            tracing::warn!(
                resource_type = %key.0,
                name = %key.1,
                path = %path,
                "duplicate resource ignored"
            );
            return;
        }
        self.data.natives.insert(
            key.clone(),
            NativeEntry {
                resource_type: key.0,
                name: key.1,
                format,
                path,
                string_registry: None,
                request_count: 0,
                loaded_container_id: None,
                loading_container_id: None,
                reload_after_ns: None,
            },
        );
    }

    fn register_index(
        &mut self,
        index: super::index::ResourceIndex,
        directory: &VfsPath,
        string_registry: Option<Arc<StringRegistry>>,
    ) {
        for group in index.native {
            let resource_type = intern(&group.type_name);
            for item in group.items {
                let format = match item.format {
                    0 => ResourceFormat::Binary,
                    1 => ResourceFormat::ReadableData,
                    other => {
                        tracing::warn!(name = %item.name, format = other, "unknown index format");
                        continue;
                    }
                };
                let path = match VfsPath::new(&format!("{}/{}", directory.as_str(), item.path)) {
                    Ok(path) => path,
                    Err(error) => {
                        tracing::warn!(name = %item.name, %error, "index item path rejected");
                        continue;
                    }
                };
                let key: NativeKey = (resource_type.clone(), intern(&item.name));
                if self.data.natives.contains_key(&key) {
                    tracing::warn!(resource_type = %key.0, name = %key.1, "duplicate indexed resource ignored");
                    continue;
                }
                self.data.natives.insert(
                    key.clone(),
                    NativeEntry {
                        resource_type: key.0,
                        name: key.1,
                        format,
                        path,
                        string_registry: string_registry.clone(),
                        request_count: 0,
                        loaded_container_id: None,
                        loading_container_id: None,
                        reload_after_ns: None,
                    },
                );
            }
        }

        for item in index.third_party {
            let path = match VfsPath::new(&format!("{}/{}", directory.as_str(), item.path)) {
                Ok(path) => path,
                Err(error) => {
                    tracing::warn!(name = %item.name, %error, "index item path rejected");
                    continue;
                }
            };
            let name = intern(&item.name);
            if self.data.third_party.contains_key(&name) {
                continue;
            }
            self.data.third_party.insert(
                name.clone(),
                ThirdPartyEntry {
                    name,
                    size: item.size,
                    path,
                    request_count: 0,
                    loaded_data: None,
                    loading: false,
                    reload_after_ns: None,
                },
            );
        }
    }

    fn finish_scan(&mut self, volume: &mut Volume) {
        if self.config.observe_file_system
            && let Ok(root) = VfsPath::new(&self.config.resource_directory_path)
        {
            match volume.watcher_create(root.as_str()) {
                Ok(id) => match volume.watcher_iterator(id) {
                    Ok(iterator) => self.watcher = Some(WatcherHook { id, iterator }),
                    Err(error) => {
                        tracing::error!(%error, "watcher iterator creation failed");
                        volume.watcher_destroy(id);
                    }
                },
                Err(error) => {
                    tracing::error!(%error, "file system watcher creation failed");
                }
            }
        }

        self.status = ProviderStatus::Serving;
        tracing::info!(
            native = self.data.natives.len(),
            third_party = self.data.third_party.len(),
            "resource scanning finished, provider serving"
        );
    }

    // ------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------

    fn serve_tick(&mut self, volume: &mut Volume) {
        let now = self.now_ns();

        volume.poll_watchers();
        let watcher_events: Vec<WatcherEvent> = match &mut self.watcher {
            Some(hook) => hook.iterator.by_ref().collect(),
            None => Vec::new(),
        };
        for event in watcher_events {
            self.handle_watcher_event(volume, event, now);
        }

        let request_events = self.data.requests.drain_events();
        for event in request_events {
            self.handle_request_event(volume, event);
        }

        self.process_due_reloads(volume, now);

        let deadline = self.now_ns() + self.config.load_budget_ns;
        run_loading_serve(
            &mut self.data,
            volume,
            self.registry.clone(),
            self.group.clone(),
            &mut self.next_container_id,
            &self.public,
            deadline,
            self.epoch,
        );
    }

    fn handle_watcher_event(&mut self, volume: &Volume, event: WatcherEvent, now: u64) {
        match (event.event_type, event.entry_type) {
            (WatcherEventType::Added, EntryType::File) => {
                self.handle_added_file(volume, event.path);
            }
            (WatcherEventType::Modified, EntryType::File) => {
                let wait = self.config.modify_wait_ns;
                if let Some(entry) = self
                    .data
                    .natives
                    .values_mut()
                    .find(|entry| entry.path == event.path)
                {
                    entry.reload_after_ns = Some(now + wait);
                    tracing::debug!(path = %event.path, "modification debounced");
                } else if let Some(entry) = self
                    .data
                    .third_party
                    .values_mut()
                    .find(|entry| entry.path == event.path)
                {
                    entry.reload_after_ns = Some(now + wait);
                }
            }
            (WatcherEventType::Removed, _) => self.handle_removed_path(&event.path),
            _ => {}
        }
    }

    fn handle_added_file(&mut self, volume: &Volume, path: VfsPath) {
        let already_known = self.data.natives.values().any(|entry| entry.path == path)
            || self.data.third_party.values().any(|entry| entry.path == path);
        if already_known {
            return;
        }

        let size = volume
            .query_entry(path.as_str())
            .map(|status| status.size)
            .unwrap_or(0);
        self.register_scanned_file(volume, path.clone(), size);

        // Requests inserted before the file appeared attach now.
        if let Some(key) = self
            .data
            .natives
            .iter()
            .find(|(_, entry)| entry.path == path)
            .map(|(key, _)| key.clone())
        {
            let count = self
                .data
                .requests
                .iter()
                .filter(|(_, request)| {
                    request.resource_type == key.0 && request.name == key.1
                })
                .count() as u32;
            if count > 0 {
                if let Some(entry) = self.data.natives.get_mut(&key) {
                    entry.request_count = count;
                }
                self.schedule_native(volume, &key);
            }
        } else if let Some(name) = self
            .data
            .third_party
            .iter()
            .find(|(_, entry)| entry.path == path)
            .map(|(name, _)| name.clone())
        {
            let empty = intern("");
            let count = self
                .data
                .requests
                .iter()
                .filter(|(_, request)| {
                    request.resource_type == empty && request.name == name
                })
                .count() as u32;
            if count > 0 {
                if let Some(entry) = self.data.third_party.get_mut(&name) {
                    entry.request_count = count;
                }
                self.schedule_third_party(volume, &name);
            }
        }
    }

    fn handle_removed_path(&mut self, path: &VfsPath) {
        if let Some(key) = self
            .data
            .natives
            .iter()
            .find(|(_, entry)| entry.path == *path)
            .map(|(key, _)| key.clone())
        {
            self.unload_native(&key);
            self.data.natives.remove(&key);
            self.data
                .publish_provided(&key.0, &key.1, ProvidedData::None);
            tracing::debug!(path = %path, "resource entry removed");
        } else if let Some(name) = self
            .data
            .third_party
            .iter()
            .find(|(_, entry)| entry.path == *path)
            .map(|(name, _)| name.clone())
        {
            self.unload_third_party(&name);
            self.data.third_party.remove(&name);
            let empty = intern("");
            self.data.publish_provided(&empty, &name, ProvidedData::None);
        }
    }

    fn handle_request_event(&mut self, volume: &Volume, event: TableEvent<ResourceRequest>) {
        match event {
            TableEvent::Inserted { row, .. } => self.attach_request(volume, &row),
            TableEvent::Removed { row, .. } => {
                self.data.provided.remove(&row.request_id);
                self.detach_request(&row);
            }
            // A change is delete-old + insert-new.
            TableEvent::Changed { before, after, .. } => {
                self.detach_request(&before);
                self.attach_request(volume, &after);
            }
        }
    }

    fn attach_request(&mut self, volume: &Volume, request: &ResourceRequest) {
        if request.resource_type.is_empty() {
            let Some(entry) = self.data.third_party.get_mut(&request.name) else {
                return;
            };
            entry.request_count += 1;
            let loaded = entry.loaded_data.clone();
            let loading = entry.loading;
            if let Some(bytes) = loaded {
                self.deliver_to_request(request, ProvidedData::ThirdParty(bytes));
            } else if !loading {
                let name = request.name.clone();
                self.schedule_third_party(volume, &name);
            }
            return;
        }

        let key: NativeKey = (request.resource_type.clone(), request.name.clone());
        let Some(entry) = self.data.natives.get_mut(&key) else {
            return;
        };
        entry.request_count += 1;
        let loaded = entry.loaded_container_id;
        let loading = entry.loading_container_id;

        if let Some(container_id) = loaded {
            self.deliver_to_request(request, ProvidedData::Container(container_id));
        } else if loading.is_none() {
            self.schedule_native(volume, &key);
        }

        // Reshuffle: a new request may raise the operation's priority.
        let priority = self.data.max_priority(&key.0, &key.1);
        if let Some(operation) = self
            .data
            .operations
            .get_mut(&(Some(key.0.clone()), key.1.clone()))
        {
            operation.priority = priority;
        }
    }

    fn deliver_to_request(&mut self, request: &ResourceRequest, provided: ProvidedData) {
        self.data
            .provided
            .insert(request.request_id, provided.clone());
        self.data.updated_events.push_back(ResourceUpdatedEvent {
            request_id: request.request_id,
            resource_type: request.resource_type.clone(),
            name: request.name.clone(),
            provided,
        });
    }

    fn detach_request(&mut self, request: &ResourceRequest) {
        if request.resource_type.is_empty() {
            let Some(entry) = self.data.third_party.get_mut(&request.name) else {
                return;
            };
            entry.request_count = entry.request_count.saturating_sub(1);
            if entry.request_count == 0 {
                let name = request.name.clone();
                self.unload_third_party(&name);
            }
            return;
        }

        let key: NativeKey = (request.resource_type.clone(), request.name.clone());
        let Some(entry) = self.data.natives.get_mut(&key) else {
            return;
        };
        entry.request_count = entry.request_count.saturating_sub(1);
        if entry.request_count == 0 {
            self.unload_native(&key);
        } else {
            let priority = self.data.max_priority(&key.0, &key.1);
            if let Some(operation) = self
                .data
                .operations
                .get_mut(&(Some(key.0.clone()), key.1.clone()))
            {
                operation.priority = priority;
            }
        }
    }

    /// Drop containers and cancel loading; called when the last request
    /// detaches or the backing file disappears.
    fn unload_native(&mut self, key: &NativeKey) {
        if self
            .data
            .operations
            .remove(&(Some(key.0.clone()), key.1.clone()))
            .is_some()
        {
            self.public
                .native_loading_count
                .fetch_sub(1, Ordering::Relaxed);
        }

        let Some(entry) = self.data.natives.get_mut(key) else {
            return;
        };
        let loading = entry.loading_container_id.take();
        let loaded = entry.loaded_container_id.take();
        entry.reload_after_ns = None;

        if let Some(record_index) = self.data.containers.find(&key.0) {
            let record = self.data.containers.record_mut(record_index);
            if let Some(id) = loading {
                record.storage.remove(id);
            }
            if let Some(id) = loaded {
                record.storage.remove(id);
            }
        }
    }

    fn unload_third_party(&mut self, name: &InternedString) {
        if self
            .data
            .operations
            .remove(&(None, name.clone()))
            .is_some()
        {
            self.public
                .third_party_loading_count
                .fetch_sub(1, Ordering::Relaxed);
        }
        if let Some(entry) = self.data.third_party.get_mut(name) {
            entry.loaded_data = None;
            entry.loading = false;
            entry.reload_after_ns = None;
        }
    }

    fn process_due_reloads(&mut self, volume: &Volume, now: u64) {
        if !self.coordinator_ready() {
            // Timers stay set; the coordinator releases them later.
            return;
        }

        let due_native: Vec<NativeKey> = self
            .data
            .natives
            .iter()
            .filter(|(_, entry)| entry.reload_after_ns.is_some_and(|after| after <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in due_native {
            if let Some(entry) = self.data.natives.get_mut(&key) {
                entry.reload_after_ns = None;
            }
            // Cancel the in-flight load, keep the published container.
            if self
                .data
                .operations
                .remove(&(Some(key.0.clone()), key.1.clone()))
                .is_some()
            {
                self.public
                    .native_loading_count
                    .fetch_sub(1, Ordering::Relaxed);
                if let Some(entry) = self.data.natives.get_mut(&key) {
                    if let Some(loading_id) = entry.loading_container_id.take() {
                        if let Some(record_index) = self.data.containers.find(&key.0) {
                            self.data
                                .containers
                                .record_mut(record_index)
                                .storage
                                .remove(loading_id);
                        }
                    }
                }
            }
            let request_count = self
                .data
                .natives
                .get(&key)
                .map(|entry| entry.request_count)
                .unwrap_or(0);
            if request_count > 0 {
                tracing::debug!(resource_type = %key.0, name = %key.1, "debounce expired, reloading");
                self.schedule_native(volume, &key);
            }
        }

        let due_third: Vec<InternedString> = self
            .data
            .third_party
            .iter()
            .filter(|(_, entry)| entry.reload_after_ns.is_some_and(|after| after <= now))
            .map(|(name, _)| name.clone())
            .collect();
        for name in due_third {
            if let Some(entry) = self.data.third_party.get_mut(&name) {
                entry.reload_after_ns = None;
                entry.loading = false;
            }
            if self.data.operations.remove(&(None, name.clone())).is_some() {
                self.public
                    .third_party_loading_count
                    .fetch_sub(1, Ordering::Relaxed);
            }
            let request_count = self
                .data
                .third_party
                .get(&name)
                .map(|entry| entry.request_count)
                .unwrap_or(0);
            if request_count > 0 {
                self.schedule_third_party(volume, &name);
            }
        }
    }

    fn coordinator_ready(&self) -> bool {
        let Some(handle) = &self.hot_reload else {
            return true;
        };
        handle
            .with_ref::<HotReloadCoordinationSystem, _>(|coordination| {
                coordination.ready_for_hot_reload()
            })
            .unwrap_or(true)
    }

    fn schedule_native(&mut self, volume: &Volume, key: &NativeKey) {
        let Some(registry) = self.registry.clone() else {
            tracing::error!(
                resource_type = %key.0,
                name = %key.1,
                "reflection peer absent, loading refused"
            );
            return;
        };

        let operation = build_native_operation(
            &mut self.data,
            volume,
            &registry,
            &self.group,
            &mut self.next_container_id,
            key,
        );
        if let Some(operation) = operation {
            self.data
                .operations
                .insert((Some(key.0.clone()), key.1.clone()), operation);
            self.public
                .native_loading_count
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    fn schedule_third_party(&mut self, volume: &Volume, name: &InternedString) {
        let Some(entry) = self.data.third_party.get_mut(name) else {
            return;
        };
        let stream = match volume.open_for_read(entry.path.as_str()) {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(path = %entry.path, %error, "third-party open failed");
                return;
            }
        };
        let total = volume
            .query_entry(entry.path.as_str())
            .map(|status| status.size)
            .unwrap_or(entry.size);
        entry.loading = true;

        let priority = self.data.max_priority(&intern(""), name);
        self.data.operations.insert(
            (None, name.clone()),
            super::state::LoadingOperation {
                priority,
                target_type: None,
                target_name: name.clone(),
                registry: None,
                payload: super::state::OperationPayload::ThirdParty {
                    stream,
                    buffer: Vec::new(),
                    total,
                },
            },
        );
        self.public
            .third_party_loading_count
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl System for ResourceProviderSystem {
    fn connect(&mut self, context: &Context) {
        self.vfs = context.query(VIRTUAL_FILE_SYSTEM_SYSTEM_NAME);
        self.reflection = context.query(REFLECTION_SYSTEM_NAME);
        self.hot_reload = context.query(HOT_RELOAD_COORDINATION_SYSTEM_NAME);
        if self.hot_reload.is_none() {
            tracing::debug!("hot-reload coordination peer absent, reloads apply immediately");
        }
    }

    fn init(&mut self) {
        if let Some(reflection) = &self.reflection {
            self.registry = reflection
                .with_ref::<ReflectionSystem, _>(|system| system.registry());
        }
        if let Some(registry) = &self.registry {
            self.data.containers = ContainerRecords::build(registry);
        } else {
            tracing::warn!("reflection peer absent, native resources cannot load");
        }
    }

    fn shutdown(&mut self) {
        self.data.operations.clear();
        for record in self.data.containers.iter_mut() {
            record.storage.clear();
        }
        self.data.natives.clear();
        self.data.third_party.clear();
        self.status = ProviderStatus::NotInitialized;
    }

    fn disconnect(&mut self, _context: &Context) {
        self.vfs = None;
        self.reflection = None;
        self.hot_reload = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn create_resource_provider(
    group: AllocationGroup,
    config: Option<&(dyn Any + Send)>,
) -> LodestoneResult<Box<dyn System>> {
    let config = config
        .and_then(|config| config.downcast_ref::<ResourceProviderConfig>())
        .cloned()
        .unwrap_or_default();

    Ok(Box::new(ResourceProviderSystem {
        config,
        group,
        epoch: Instant::now(),
        vfs: None,
        reflection: None,
        hot_reload: None,
        public: Arc::new(ResourceProviderSingleton::default()),
        status: ProviderStatus::NotInitialized,
        scan: ScanState::default(),
        data: ProviderData::new(),
        watcher: None,
        registry: None,
        next_container_id: 0,
        degraded_logged: false,
    }))
}

inventory::submit! {
    SystemApi {
        name: RESOURCE_PROVIDER_SYSTEM_NAME,
        create: create_resource_provider,
    }
}
