//! Shared parallel loading serve.
//!
//! One foreground worker per logical CPU drains a descending-priority
//! cursor over the loading operations. A single lock brackets cursor
//! advancement and the post-step repository mutation window; the
//! per-operation reader step itself runs without it. Each worker checks
//! the tick deadline between steps and exits cleanly on expiry.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::memory::AllocationGroup;
use crate::rdata::{
    BinaryReader, ReadableReader, StepResult, read_binary_type_header, read_readable_type_header,
};
use crate::reflect::TypeRegistry;
use crate::vfs::Volume;

use super::index::ResourceFormat;
use super::state::{
    LoadingOperation, NativeKey, OpKey, OperationPayload, ProvidedData, ProviderData,
    ResourceProviderSingleton,
};

/// Per-step copy grain for third-party payloads.
const THIRD_PARTY_CHUNK_BYTES: usize = 64 * 1024;

/// Create the loading container, open the stream, validate the header and
/// build the reader for one native entry. On success the entry's
/// `loading_container_id` is set and the operation is returned for the
/// caller to insert; on failure everything is rolled back and the entry's
/// request count stays intact so a later modification can retry.
pub(crate) fn build_native_operation(
    data: &mut ProviderData,
    volume: &Volume,
    registry: &Arc<TypeRegistry>,
    group: &AllocationGroup,
    next_container_id: &mut u64,
    key: &NativeKey,
) -> Option<LoadingOperation> {
    let Some(entry) = data.natives.get(key) else {
        return None;
    };
    let path = entry.path.clone();
    let format = entry.format;
    let string_registry = entry.string_registry.clone();

    let Some(record_index) = data.containers.find(&key.0) else {
        tracing::error!(
            resource_type = %key.0,
            name = %key.1,
            "no reflection type registered for resource, loading refused"
        );
        return None;
    };

    let container_id = *next_container_id;
    *next_container_id += 1;

    let payload_pointer = match data
        .containers
        .create_container(record_index, container_id, group.clone())
    {
        Ok(pointer) => pointer,
        Err(error) => {
            tracing::error!(resource_type = %key.0, name = %key.1, %error, "container allocation failed");
            return None;
        }
    };
    let payload_type = data.containers.record(record_index).payload_type.clone();

    let discard = |data: &mut ProviderData| {
        data.containers
            .record_mut(record_index)
            .storage
            .remove(container_id);
    };

    let mut stream = match volume.open_for_read(path.as_str()) {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(path = %path, %error, "resource open failed");
            discard(data);
            return None;
        }
    };

    let header_type = match format {
        ResourceFormat::Binary => read_binary_type_header(stream.as_mut()),
        ResourceFormat::ReadableData => read_readable_type_header(stream.as_mut()),
    };
    match header_type {
        Ok(header_type) if header_type == key.0 => {}
        Ok(header_type) => {
            tracing::error!(
                path = %path,
                expected = %key.0,
                found = %header_type,
                "resource header names a different type"
            );
            discard(data);
            return None;
        }
        Err(error) => {
            tracing::error!(path = %path, %error, "resource header read failed");
            discard(data);
            return None;
        }
    }

    let payload = match format {
        ResourceFormat::ReadableData => {
            let reader = match unsafe {
                ReadableReader::new_raw(
                    stream.as_mut(),
                    payload_pointer,
                    payload_type,
                    registry.clone(),
                )
            } {
                Ok(reader) => reader,
                Err(error) => {
                    tracing::error!(path = %path, %error, "resource content read failed");
                    discard(data);
                    return None;
                }
            };
            OperationPayload::NativeReadable { reader }
        }
        ResourceFormat::Binary => {
            let reader = unsafe {
                BinaryReader::new_raw(
                    stream,
                    payload_pointer,
                    payload_type,
                    registry.clone(),
                    string_registry,
                )
            };
            OperationPayload::NativeBinary { reader }
        }
    };

    if let Some(entry) = data.natives.get_mut(key) {
        entry.loading_container_id = Some(container_id);
    }

    Some(LoadingOperation {
        priority: data.max_priority(&key.0, &key.1),
        target_type: Some(key.0.clone()),
        target_name: key.1.clone(),
        registry: Some(registry.clone()),
        payload,
    })
}

struct ServeCore<'a> {
    data: &'a mut ProviderData,
    volume: &'a Volume,
    group: AllocationGroup,
    next_container_id: &'a mut u64,
    public: &'a ResourceProviderSingleton,
    queue: std::collections::VecDeque<OpKey>,
}

struct ServeShared<'a> {
    core: Mutex<ServeCore<'a>>,
    registry: Option<Arc<TypeRegistry>>,
    deadline_ns: u64,
    epoch: Instant,
}

impl<'a> ServeShared<'a> {
    fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

impl<'a> ServeCore<'a> {
    /// Advance the descending-priority cursor to the next live operation.
    fn checkout_next(&mut self) -> Option<(OpKey, LoadingOperation)> {
        while let Some(key) = self.queue.pop_front() {
            if let Some(operation) = self.data.operations.remove(&key) {
                return Some((key, operation));
            }
        }
        None
    }

    fn reinsert(&mut self, key: OpKey, operation: LoadingOperation) {
        self.data.operations.insert(key, operation);
    }

    fn publish_success(&mut self, key: &OpKey, operation: LoadingOperation) {
        match &key.0 {
            Some(resource_type) => {
                let native_key = (resource_type.clone(), key.1.clone());
                let Some(entry) = self.data.natives.get_mut(&native_key) else {
                    return;
                };
                let Some(new_id) = entry.loading_container_id.take() else {
                    return;
                };
                let old_id = entry.loaded_container_id.replace(new_id);

                if let Some(record_index) = self.data.containers.find(resource_type) {
                    if let Some(old_id) = old_id {
                        self.data
                            .containers
                            .record_mut(record_index)
                            .storage
                            .remove(old_id);
                    }
                }

                self.data
                    .publish_provided(resource_type, &key.1, ProvidedData::Container(new_id));
                self.public
                    .native_loading_count
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                tracing::debug!(resource_type = %resource_type, name = %key.1, container_id = new_id, "resource loaded");
            }
            None => {
                let OperationPayload::ThirdParty { buffer, .. } = operation.payload else {
                    return;
                };
                let Some(entry) = self.data.third_party.get_mut(&key.1) else {
                    return;
                };
                let bytes = Arc::new(buffer);
                entry.loaded_data = Some(bytes.clone());
                entry.loading = false;

                let empty = crate::intern::intern("");
                self.data
                    .publish_provided(&empty, &key.1, ProvidedData::ThirdParty(bytes));
                self.public
                    .third_party_loading_count
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                tracing::debug!(name = %key.1, "third-party resource loaded");
            }
        }
    }

    fn publish_failure(&mut self, key: &OpKey) {
        match &key.0 {
            Some(resource_type) => {
                let native_key = (resource_type.clone(), key.1.clone());
                if let Some(entry) = self.data.natives.get_mut(&native_key) {
                    if let Some(loading_id) = entry.loading_container_id.take() {
                        if let Some(record_index) = self.data.containers.find(resource_type) {
                            self.data
                                .containers
                                .record_mut(record_index)
                                .storage
                                .remove(loading_id);
                        }
                    }
                }
                self.public
                    .native_loading_count
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            }
            None => {
                if let Some(entry) = self.data.third_party.get_mut(&key.1) {
                    entry.loading = false;
                }
                self.public
                    .third_party_loading_count
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        tracing::warn!(name = %key.1, "resource load failed, entry stays requested");
    }

    /// Reflection changed mid-load: discard the reader and the
    /// half-filled container, then rebuild both against the current
    /// registry.
    fn rebuild(
        &mut self,
        key: &OpKey,
        operation: LoadingOperation,
        registry: &Arc<TypeRegistry>,
    ) -> Option<LoadingOperation> {
        let Some(resource_type) = &key.0 else {
            // Third-party payloads do not touch reflection.
            return Some(operation);
        };
        let native_key = (resource_type.clone(), key.1.clone());
        let priority = operation.priority;
        drop(operation);

        if let Some(entry) = self.data.natives.get_mut(&native_key) {
            if let Some(loading_id) = entry.loading_container_id.take() {
                if let Some(record_index) = self.data.containers.find(resource_type) {
                    self.data
                        .containers
                        .record_mut(record_index)
                        .storage
                        .remove(loading_id);
                }
            }
        }

        let rebuilt = build_native_operation(
            self.data,
            self.volume,
            registry,
            &self.group,
            self.next_container_id,
            &native_key,
        );
        match rebuilt {
            Some(mut operation) => {
                operation.priority = priority.max(operation.priority);
                tracing::debug!(resource_type = %resource_type, name = %key.1, "loading rebuilt after reflection change");
                Some(operation)
            }
            None => {
                self.public
                    .native_loading_count
                    .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
                None
            }
        }
    }
}

/// Advance one operation by one grain of work.
fn step_once(operation: &mut LoadingOperation) -> StepResult {
    match &mut operation.payload {
        OperationPayload::NativeReadable { reader } => reader.step(),
        OperationPayload::NativeBinary { reader } => reader.step(),
        OperationPayload::ThirdParty {
            stream,
            buffer,
            total,
        } => {
            let mut chunk = [0u8; THIRD_PARTY_CHUNK_BYTES];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    if buffer.len() as u64 >= *total {
                        StepResult::Finished
                    } else {
                        tracing::warn!(
                            have = buffer.len(),
                            want = *total,
                            "third-party stream ended early"
                        );
                        StepResult::Failed
                    }
                }
                Ok(read) => {
                    buffer.extend_from_slice(&chunk[..read]);
                    StepResult::InProgress
                }
                Err(error) => {
                    tracing::error!(%error, "third-party read failed");
                    StepResult::Failed
                }
            }
        }
    }
}

fn serve_worker(shared: &ServeShared<'_>) {
    loop {
        let mut operation = {
            let mut core = shared.core.lock();
            match core.checkout_next() {
                Some(checked_out) => checked_out,
                None => return,
            }
        };

        'operation: loop {
            // Reflection drift: rebuild reader and container mid-load.
            let drifted = match (&operation.1.registry, &shared.registry) {
                (Some(captured), Some(current)) => !Arc::ptr_eq(captured, current),
                _ => false,
            };
            if drifted {
                let current = shared.registry.as_ref().expect("drift implies a registry");
                let mut core = shared.core.lock();
                match core.rebuild(&operation.0, operation.1, current) {
                    Some(rebuilt) => operation.1 = rebuilt,
                    None => break 'operation,
                }
            }

            match step_once(&mut operation.1) {
                StepResult::Finished => {
                    shared.core.lock().publish_success(&operation.0, operation.1);
                    break 'operation;
                }
                StepResult::Failed => {
                    shared.core.lock().publish_failure(&operation.0);
                    break 'operation;
                }
                StepResult::InProgress => {
                    if shared.now_ns() >= shared.deadline_ns {
                        let (key, operation) = operation;
                        shared.core.lock().reinsert(key, operation);
                        return;
                    }
                }
            }
        }

        if shared.now_ns() >= shared.deadline_ns {
            return;
        }
    }
}

/// Run the shared loading serve until the queue drains or the deadline
/// expires.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_loading_serve(
    data: &mut ProviderData,
    volume: &Volume,
    registry: Option<Arc<TypeRegistry>>,
    group: AllocationGroup,
    next_container_id: &mut u64,
    public: &ResourceProviderSingleton,
    deadline_ns: u64,
    epoch: Instant,
) {
    if data.operations.is_empty() {
        return;
    }

    // Descending-priority cursor; ties resolve by key for determinism.
    let mut keyed: Vec<(OpKey, u32)> = data
        .operations
        .iter()
        .map(|(key, operation)| (key.clone(), operation.priority))
        .collect();
    keyed.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let queue: std::collections::VecDeque<OpKey> =
        keyed.into_iter().map(|(key, _)| key).collect();

    let workers = rayon::current_num_threads().max(1);
    let shared = ServeShared {
        core: Mutex::new(ServeCore {
            data,
            volume,
            group,
            next_container_id,
            public,
            queue,
        }),
        registry,
        deadline_ns,
        epoch,
    };

    rayon::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| serve_worker(&shared));
        }
    });
}
