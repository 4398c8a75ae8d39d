//! Provider bookkeeping records and singletons.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::intern::InternedString;
use crate::rdata::{BinaryReader, ReadableReader, StringRegistry};
use crate::reflect::TypeRegistry;
use crate::repo::{EventedTable, RowId};
use crate::stream::Stream;
use crate::vfs::VfsPath;

use super::containers::ContainerRecords;
use super::index::ResourceFormat;

/// Public singleton shared with consumers.
///
/// Read-mostly; the request-id counter and loading counters are atomics
/// so consumers can allocate ids without taking the provider lock.
#[derive(Debug, Default)]
pub struct ResourceProviderSingleton {
    /// Set to request a full rescan on the next tick.
    pub request_rescan: AtomicBool,
    request_id_counter: AtomicU64,
    pub native_loading_count: AtomicU64,
    pub third_party_loading_count: AtomicU64,
}

impl ResourceProviderSingleton {
    pub fn next_request_id(&self) -> u64 {
        self.request_id_counter.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A consumer-owned resource request.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub request_id: u64,
    /// Empty for third-party requests.
    pub resource_type: InternedString,
    pub name: InternedString,
    pub priority: u32,
}

/// What a request currently resolves to.
#[derive(Debug, Clone, Default)]
pub enum ProvidedData {
    #[default]
    None,
    Container(u64),
    ThirdParty(Arc<Vec<u8>>),
}

/// Emitted whenever a request's provided data changes.
#[derive(Debug, Clone)]
pub struct ResourceUpdatedEvent {
    pub request_id: u64,
    pub resource_type: InternedString,
    pub name: InternedString,
    pub provided: ProvidedData,
}

/// Key of a native entry: `(type, name)`.
pub(crate) type NativeKey = (InternedString, InternedString);

/// Key of a loading operation: `(Some(type), name)` for native,
/// `(None, name)` for third-party.
pub(crate) type OpKey = (Option<InternedString>, InternedString);

pub(crate) struct NativeEntry {
    pub resource_type: InternedString,
    pub name: InternedString,
    pub format: ResourceFormat,
    pub path: VfsPath,
    pub string_registry: Option<Arc<StringRegistry>>,
    pub request_count: u32,
    pub loaded_container_id: Option<u64>,
    pub loading_container_id: Option<u64>,
    pub reload_after_ns: Option<u64>,
}

pub(crate) struct ThirdPartyEntry {
    pub name: InternedString,
    pub size: u64,
    pub path: VfsPath,
    pub request_count: u32,
    pub loaded_data: Option<Arc<Vec<u8>>>,
    pub loading: bool,
    pub reload_after_ns: Option<u64>,
}

pub(crate) enum OperationPayload {
    NativeReadable { reader: ReadableReader },
    NativeBinary { reader: BinaryReader },
    ThirdParty {
        stream: Box<dyn Stream>,
        buffer: Vec<u8>,
        total: u64,
    },
}

/// One in-flight load. Exactly one exists per key while the matching
/// entry has a non-nil loading id.
pub(crate) struct LoadingOperation {
    pub priority: u32,
    pub target_type: Option<InternedString>,
    pub target_name: InternedString,
    /// Registry snapshot captured at reader creation; a mismatch with the
    /// current one mid-load forces a reader rebuild.
    pub registry: Option<Arc<TypeRegistry>>,
    pub payload: OperationPayload,
}

/// Provider status, kept on the private singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderStatus {
    NotInitialized,
    Scanning,
    Serving,
}

/// All mutable provider bookkeeping, bundled so the shared loading serve
/// can borrow it as one unit behind the concurrency lock.
pub(crate) struct ProviderData {
    pub natives: HashMap<NativeKey, NativeEntry>,
    pub third_party: HashMap<InternedString, ThirdPartyEntry>,
    pub requests: EventedTable<ResourceRequest>,
    pub request_rows: HashMap<u64, RowId>,
    /// Provided data lives outside the request rows so provider writes do
    /// not echo through the request change events.
    pub provided: HashMap<u64, ProvidedData>,
    pub operations: HashMap<OpKey, LoadingOperation>,
    pub containers: ContainerRecords,
    pub updated_events: VecDeque<ResourceUpdatedEvent>,
    pub loaded_string_registries: Vec<Arc<StringRegistry>>,
}

impl ProviderData {
    pub fn new() -> Self {
        Self {
            natives: HashMap::new(),
            third_party: HashMap::new(),
            requests: EventedTable::with_events(),
            request_rows: HashMap::new(),
            provided: HashMap::new(),
            operations: HashMap::new(),
            containers: ContainerRecords::default(),
            updated_events: VecDeque::new(),
            loaded_string_registries: Vec::new(),
        }
    }

    /// Highest priority over live requests for one native key, or the
    /// fallback when none reference it.
    pub fn max_priority(&self, resource_type: &InternedString, name: &InternedString) -> u32 {
        self.requests
            .iter()
            .filter(|(_, request)| {
                request.resource_type == *resource_type && request.name == *name
            })
            .map(|(_, request)| request.priority)
            .max()
            .unwrap_or(0)
    }

    /// Record new provided data for every request of `(type, name)` and
    /// queue one updated event per affected request.
    pub fn publish_provided(
        &mut self,
        resource_type: &InternedString,
        name: &InternedString,
        provided: ProvidedData,
    ) {
        let affected: Vec<(u64, InternedString, InternedString)> = self
            .requests
            .iter()
            .filter(|(_, request)| {
                request.resource_type == *resource_type && request.name == *name
            })
            .map(|(_, request)| {
                (
                    request.request_id,
                    request.resource_type.clone(),
                    request.name.clone(),
                )
            })
            .collect();

        for (request_id, resource_type, name) in affected {
            self.provided.insert(request_id, provided.clone());
            self.updated_events.push_back(ResourceUpdatedEvent {
                request_id,
                resource_type,
                name,
                provided: provided.clone(),
            });
        }
    }
}
