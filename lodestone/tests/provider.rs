//! Integration tests for the resource provider: scan, request lifecycle
//! and hot reload over a context-assembled stack.

use std::sync::Arc;
use std::time::Duration;

use lodestone::context::Context;
use lodestone::intern;
use lodestone::memory::AllocationGroup;
use lodestone::provider::{
    INDEX_FILE_NAME, ProvidedData, RESOURCE_PROVIDER_SYSTEM_NAME, ResourceFormat, ResourceIndex,
    ResourceIndexNativeGroup, ResourceIndexNativeItem, ResourceIndexThirdPartyItem,
    ResourceProviderConfig, ResourceProviderSystem, ResourceTypeMeta, container_generation_hook,
    write_resource_index,
};
use lodestone::rdata::{write_binary_instance, write_binary_type_header};
use lodestone::reflect::{
    REFLECTION_SYSTEM_NAME, ReflectionSystemConfig, StructBuilder, TypeRegistry,
};
use lodestone::stream::FileStream;
use lodestone::vfs::{VIRTUAL_FILE_SYSTEM_SYSTEM_NAME, VirtualFileSystemSystem};
use tempfile::TempDir;

// ============================================================================
// TEST FIXTURES
// ============================================================================

#[derive(Default, Debug, Clone, PartialEq)]
struct Weapon {
    damage: i32,
    name: String,
}

fn weapon_registry() -> Arc<TypeRegistry> {
    let weapon = StructBuilder::new::<Weapon>("weapon_t")
        .field_sint("damage", std::mem::offset_of!(Weapon, damage), 4)
        .field_string("name", std::mem::offset_of!(Weapon, name))
        .meta(ResourceTypeMeta)
        .build();

    let mut builder = TypeRegistry::builder();
    builder.add_struct(weapon);
    builder.add_generation_hook(container_generation_hook());
    builder.build().unwrap()
}

/// Context with the vfs, reflection and provider systems assembled, a
/// real mount at `/assets` and automatic cleanup of the temp tree.
struct TestContext {
    context: Context,
    _temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        std::fs::write(
            temp_dir.path().join("weapon.rd"),
            b"//! weapon_t\ndamage = 7\nname = \"blade\"\n",
        )
        .expect("write weapon resource");

        let mut context = Context::new(AllocationGroup::root().child("provider_test"));
        assert!(context.request_system(VIRTUAL_FILE_SYSTEM_SYSTEM_NAME, None));
        assert!(context.request_system(
            REFLECTION_SYSTEM_NAME,
            Some(Box::new(ReflectionSystemConfig {
                registry: weapon_registry(),
            }))
        ));
        assert!(context.request_system(
            RESOURCE_PROVIDER_SYSTEM_NAME,
            Some(Box::new(ResourceProviderConfig {
                resource_directory_path: "assets".to_string(),
                scan_budget_ns: 50_000_000,
                load_budget_ns: 50_000_000,
                modify_wait_ns: 0,
                ..ResourceProviderConfig::default()
            }))
        ));
        context.assembly();

        let vfs = context
            .query(VIRTUAL_FILE_SYSTEM_SYSTEM_NAME)
            .expect("vfs assembled");
        vfs.with::<VirtualFileSystemSystem, _>(|system| {
            system.volume_mut().mount_real("/assets", temp_dir.path())
        })
        .expect("vfs downcasts")
        .expect("mount succeeds");

        Self {
            context,
            _temp_dir: temp_dir,
        }
    }

    fn with_provider<R>(&self, operation: impl FnOnce(&mut ResourceProviderSystem) -> R) -> R {
        self.context
            .query(RESOURCE_PROVIDER_SYSTEM_NAME)
            .expect("provider assembled")
            .with::<ResourceProviderSystem, _>(operation)
            .expect("provider downcasts")
    }

    fn tick(&self) {
        self.with_provider(|provider| provider.update());
    }

    /// Tick until the request resolves or the iteration cap trips.
    fn tick_until_provided(&self, request_id: u64) -> ProvidedData {
        for _ in 0..200 {
            self.tick();
            let provided = self.with_provider(|provider| provider.request_provided(request_id));
            if !matches!(provided, ProvidedData::None) {
                return provided;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("request {request_id} never resolved");
    }
}

// ============================================================================
// PROVIDER LIFECYCLE (S5)
// ============================================================================

#[test]
fn request_resolves_to_decoded_container() {
    let fixture = TestContext::new();

    let request_id =
        fixture.with_provider(|provider| provider.insert_request("weapon_t", "weapon", 10));
    let provided = fixture.tick_until_provided(request_id);

    let ProvidedData::Container(container_id) = provided else {
        panic!("expected a container, got {provided:?}");
    };

    // Exactly one updated event fired for this request.
    let events = fixture.with_provider(|provider| provider.drain_updated_events());
    let for_request: Vec<_> = events
        .iter()
        .filter(|event| event.request_id == request_id)
        .collect();
    assert_eq!(for_request.len(), 1);

    // The container holds the decoded file content.
    fixture.with_provider(|provider| {
        provider
            .with_loaded_resource::<Weapon, _>("weapon_t", container_id, |weapon| {
                assert_eq!(weapon.damage, 7);
                assert_eq!(weapon.name, "blade");
            })
            .expect("container readable");
    });

    // Deleting the request unloads everything.
    fixture.with_provider(|provider| provider.remove_request(request_id).unwrap());
    fixture.tick();
    fixture.with_provider(|provider| {
        let (request_count, loaded, loading) = provider
            .native_entry_state("weapon_t", "weapon")
            .expect("entry survives unload");
        assert_eq!(request_count, 0);
        assert_eq!(loaded, None);
        assert_eq!(loading, None);
        assert!(
            provider
                .with_loaded_resource::<Weapon, _>("weapon_t", container_id, |_| ())
                .is_none(),
            "container row is gone"
        );
    });
}

#[test]
fn unrequested_entries_stay_discoverable_but_unloaded() {
    let fixture = TestContext::new();
    fixture.tick();
    fixture.tick();

    fixture.with_provider(|provider| {
        let (request_count, loaded, loading) = provider
            .native_entry_state("weapon_t", "weapon")
            .expect("entry scanned");
        assert_eq!(request_count, 0);
        assert_eq!(loaded, None);
        assert_eq!(loading, None);
    });
}

#[test]
fn missing_reflection_type_refuses_loading() {
    let fixture = TestContext::new();
    std::fs::write(
        fixture._temp_dir.path().join("mystery.rd"),
        b"//! mystery_t\nvalue = 1\n",
    )
    .unwrap();

    let request_id =
        fixture.with_provider(|provider| provider.insert_request("mystery_t", "mystery", 1));
    for _ in 0..10 {
        fixture.tick();
    }

    // The entry is discoverable but never resolves.
    fixture.with_provider(|provider| {
        assert!(provider.native_entry_state("mystery_t", "mystery").is_some());
        assert!(matches!(
            provider.request_provided(request_id),
            ProvidedData::None
        ));
    });
}

#[test]
fn priority_orders_concurrent_requests() {
    let fixture = TestContext::new();
    std::fs::write(
        fixture._temp_dir.path().join("second.rd"),
        b"//! weapon_t\ndamage = 2\nname = \"axe\"\n",
    )
    .unwrap();

    let low = fixture.with_provider(|provider| provider.insert_request("weapon_t", "second", 1));
    let high = fixture.with_provider(|provider| provider.insert_request("weapon_t", "weapon", 50));

    let high_provided = fixture.tick_until_provided(high);
    let low_provided = fixture.tick_until_provided(low);

    // Both resolve; container ids are provider-monotone.
    let (ProvidedData::Container(high_id), ProvidedData::Container(low_id)) =
        (high_provided, low_provided)
    else {
        panic!("both requests must resolve to containers");
    };
    assert_ne!(high_id, low_id);
}

#[test]
fn indexed_directory_scan_and_third_party_bytes() {
    let fixture = TestContext::new();
    let dir = fixture._temp_dir.path();
    std::fs::write(dir.join("icon.png"), b"PNGBYTES").unwrap();

    // With an index present, the directory is registered from it instead
    // of being enumerated.
    let index = ResourceIndex {
        native: vec![ResourceIndexNativeGroup {
            type_name: "weapon_t".to_string(),
            items: vec![ResourceIndexNativeItem {
                name: "weapon".to_string(),
                format: ResourceFormat::ReadableData as u32,
                path: "weapon.rd".to_string(),
            }],
        }],
        third_party: vec![ResourceIndexThirdPartyItem {
            name: "icon.png".to_string(),
            size: 8,
            path: "icon.png".to_string(),
        }],
    };
    let mut stream = FileStream::open_for_write(&dir.join(INDEX_FILE_NAME)).unwrap();
    write_resource_index(&mut stream, &index).unwrap();
    drop(stream);

    let weapon_request =
        fixture.with_provider(|provider| provider.insert_request("weapon_t", "weapon", 5));
    let icon_request = fixture.with_provider(|provider| provider.insert_request("", "icon.png", 5));

    let ProvidedData::Container(container_id) = fixture.tick_until_provided(weapon_request) else {
        panic!("indexed native entry must resolve to a container");
    };
    fixture.with_provider(|provider| {
        provider
            .with_loaded_resource::<Weapon, _>("weapon_t", container_id, |weapon| {
                assert_eq!(weapon.damage, 7);
            })
            .expect("container readable");
    });

    let ProvidedData::ThirdParty(bytes) = fixture.tick_until_provided(icon_request) else {
        panic!("third-party entry must resolve to bytes");
    };
    assert_eq!(bytes.as_slice(), b"PNGBYTES");
}

#[test]
fn binary_resources_load_through_the_same_pipeline() {
    let fixture = TestContext::new();
    let dir = fixture._temp_dir.path();

    let armor = Weapon {
        damage: 3,
        name: "plate".to_string(),
    };
    let registry = weapon_registry();
    let ty = registry.struct_by_name(&intern("weapon_t")).unwrap().clone();
    let mut stream = FileStream::open_for_write(&dir.join("armor.bin")).unwrap();
    write_binary_type_header(&mut stream, &intern("weapon_t")).unwrap();
    unsafe {
        write_binary_instance(
            &mut stream,
            &armor as *const Weapon as *const u8,
            &ty,
            &registry,
            None,
        )
        .unwrap();
    }
    drop(stream);

    let request_id =
        fixture.with_provider(|provider| provider.insert_request("weapon_t", "armor", 2));
    let ProvidedData::Container(container_id) = fixture.tick_until_provided(request_id) else {
        panic!("binary entry must resolve to a container");
    };
    fixture.with_provider(|provider| {
        provider
            .with_loaded_resource::<Weapon, _>("weapon_t", container_id, |decoded| {
                assert_eq!(decoded.damage, 3);
                assert_eq!(decoded.name, "plate");
            })
            .expect("container readable");
    });
}

// ============================================================================
// HOT RELOAD (S6)
// ============================================================================

#[test]
fn modified_file_reloads_with_greater_container_id() {
    let fixture = TestContext::new();

    let request_id =
        fixture.with_provider(|provider| provider.insert_request("weapon_t", "weapon", 10));
    let ProvidedData::Container(first_id) = fixture.tick_until_provided(request_id) else {
        panic!("initial load failed");
    };
    fixture.with_provider(|provider| provider.drain_updated_events());

    // Rewrite the file with different content and a fresh timestamp.
    let path = fixture._temp_dir.path().join("weapon.rd");
    std::fs::write(&path, b"//! weapon_t\ndamage = 9\nname = \"blade_sharpened\"\n").unwrap();
    filetime::set_file_mtime(&path, filetime::FileTime::now()).unwrap();

    let mut second_id = None;
    for _ in 0..500 {
        fixture.tick();
        let events = fixture.with_provider(|provider| provider.drain_updated_events());
        if let Some(event) = events.iter().find(|event| event.request_id == request_id) {
            let ProvidedData::Container(id) = event.provided else {
                panic!("reload must provide a container");
            };
            assert_eq!(events.len(), 1, "exactly one additional updated event");
            second_id = Some(id);
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    let second_id = second_id.expect("modification never triggered a reload");

    assert!(
        second_id > first_id,
        "container ids are strictly increasing per resource"
    );
    fixture.with_provider(|provider| {
        provider
            .with_loaded_resource::<Weapon, _>("weapon_t", second_id, |weapon| {
                assert_eq!(weapon.damage, 9);
                assert_eq!(weapon.name, "blade_sharpened");
            })
            .expect("reloaded container readable");
        assert!(
            provider
                .with_loaded_resource::<Weapon, _>("weapon_t", first_id, |_| ())
                .is_none(),
            "old container was swapped out"
        );
    });
}

#[test]
fn removed_file_unloads_its_entry() {
    let fixture = TestContext::new();

    let request_id =
        fixture.with_provider(|provider| provider.insert_request("weapon_t", "weapon", 10));
    let ProvidedData::Container(_) = fixture.tick_until_provided(request_id) else {
        panic!("initial load failed");
    };

    std::fs::remove_file(fixture._temp_dir.path().join("weapon.rd")).unwrap();
    for _ in 0..10 {
        fixture.tick();
        std::thread::sleep(Duration::from_millis(1));
    }

    fixture.with_provider(|provider| {
        assert!(provider.native_entry_state("weapon_t", "weapon").is_none());
        assert!(matches!(
            provider.request_provided(request_id),
            ProvidedData::None
        ));
    });
}
