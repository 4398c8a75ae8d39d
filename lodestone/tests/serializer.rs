//! Integration tests for the readable-data and binary serializers:
//! writer/reader round trips over reflected instances and patches.

use std::sync::Arc;

use lodestone::rdata::{
    BinaryReader, ReadableReader, ReadableWriter, StepResult, read_readable_type_header,
    write_binary_instance, write_readable_type_header,
};
use lodestone::reflect::{
    Archetype, EnumBuilder, Patch, PatchBuilder, StructBuilder, TypeRegistry,
};
use lodestone::stream::{MemoryStream, SeekFrom, Stream};
use lodestone::intern;

// ============================================================================
// TEST TYPES
// ============================================================================

const ACCESS_READ: u32 = 1;
const ACCESS_WRITE: u32 = 2;
const ACCESS_EXECUTE: u32 = 4;

#[derive(Default, Debug, PartialEq, Clone)]
struct IoResource {
    a: i32,
    name: String,
    mode: u32,
    arr: [i32; 3],
}

#[derive(Default, Debug, PartialEq, Clone)]
struct Inner {
    value: u64,
    ratio: f32,
}

#[derive(Default, Debug, PartialEq, Clone)]
struct Outer {
    id: i64,
    inner: Inner,
    tags: Vec<String>,
    children: Vec<Inner>,
}

#[derive(Default, Debug, Clone)]
struct PatchHolder {
    marker: i32,
    overlay: Patch,
}

#[derive(Default, Debug, PartialEq, Clone)]
struct PodTarget {
    x: i32,
    y: i32,
    mode: u32,
}

fn test_registry() -> Arc<TypeRegistry> {
    let access = EnumBuilder::new("access_flags_t")
        .flags()
        .item("read", ACCESS_READ)
        .item("write", ACCESS_WRITE)
        .item("execute", ACCESS_EXECUTE)
        .build();

    let io_resource = StructBuilder::new::<IoResource>("io_resource_t")
        .field_sint("a", std::mem::offset_of!(IoResource, a), 4)
        .field_string("name", std::mem::offset_of!(IoResource, name))
        .field_enum("mode", std::mem::offset_of!(IoResource, mode), "access_flags_t")
        .field_inline_array(
            "arr",
            std::mem::offset_of!(IoResource, arr),
            Archetype::SignedInt { size: 4 },
            4,
            3,
        )
        .build();

    let inner = StructBuilder::new::<Inner>("inner_t")
        .field_uint("value", std::mem::offset_of!(Inner, value), 8)
        .field_float("ratio", std::mem::offset_of!(Inner, ratio), 4)
        .build();

    let outer = StructBuilder::new::<Outer>("outer_t")
        .field_sint("id", std::mem::offset_of!(Outer, id), 8)
        .field_struct(
            "inner",
            std::mem::offset_of!(Outer, inner),
            "inner_t",
            std::mem::size_of::<Inner>(),
        )
        .field_dynamic_array::<String>(
            "tags",
            std::mem::offset_of!(Outer, tags),
            Archetype::String,
        )
        .field_dynamic_array::<Inner>(
            "children",
            std::mem::offset_of!(Outer, children),
            Archetype::Struct {
                type_name: intern("inner_t"),
            },
        )
        .build();

    let pod_target = StructBuilder::new::<PodTarget>("pod_target_t")
        .field_sint("x", std::mem::offset_of!(PodTarget, x), 4)
        .field_sint("y", std::mem::offset_of!(PodTarget, y), 4)
        .field_enum("mode", std::mem::offset_of!(PodTarget, mode), "access_flags_t")
        .build();

    let patch_holder = StructBuilder::new::<PatchHolder>("patch_holder_t")
        .field_sint("marker", std::mem::offset_of!(PatchHolder, marker), 4)
        .field_patch("overlay", std::mem::offset_of!(PatchHolder, overlay))
        .build();

    let mut builder = TypeRegistry::builder();
    builder.add_enum(access);
    builder.add_struct(io_resource);
    builder.add_struct(inner);
    builder.add_struct(outer);
    builder.add_struct(pod_target);
    builder.add_struct(patch_holder);
    builder.build().unwrap()
}

// ============================================================================
// ROUND-TRIP HELPERS
// ============================================================================

fn write_readable<T>(value: &T, type_name: &str, registry: &Arc<TypeRegistry>) -> String {
    let ty = registry.struct_by_name(&intern(type_name)).unwrap().clone();
    let mut stream = MemoryStream::new();
    write_readable_type_header(&mut stream, &intern(type_name)).unwrap();
    {
        let mut writer = unsafe {
            ReadableWriter::new_raw(
                &mut stream,
                value as *const T as *const u8,
                ty,
                registry.clone(),
            )
        };
        loop {
            match writer.step() {
                StepResult::InProgress => {}
                StepResult::Finished => break,
                StepResult::Failed => panic!("writer failed"),
            }
        }
    }
    String::from_utf8(stream.into_inner()).unwrap()
}

fn read_readable<T: Default>(text: &str, type_name: &str, registry: &Arc<TypeRegistry>) -> T {
    let ty = registry.struct_by_name(&intern(type_name)).unwrap().clone();
    let mut stream = MemoryStream::from_vec(text.as_bytes().to_vec());
    let header = read_readable_type_header(&mut stream).unwrap();
    assert_eq!(header, intern(type_name));

    let mut decoded = T::default();
    let mut reader = unsafe {
        ReadableReader::new_raw(
            &mut stream,
            &mut decoded as *mut T as *mut u8,
            ty,
            registry.clone(),
        )
    }
    .unwrap();
    loop {
        match reader.step() {
            StepResult::InProgress => {}
            StepResult::Finished => break,
            StepResult::Failed => panic!("reader failed"),
        }
    }
    decoded
}

// ============================================================================
// READABLE DATA
// ============================================================================

#[test]
fn scalar_struct_round_trips() {
    let registry = test_registry();
    let original = IoResource {
        a: 7,
        name: "io".to_string(),
        mode: ACCESS_READ | ACCESS_EXECUTE,
        arr: [4, 5, 6],
    };

    let text = write_readable(&original, "io_resource_t", &registry);
    let decoded: IoResource = read_readable(&text, "io_resource_t", &registry);
    assert_eq!(decoded, original);
}

#[test]
fn nested_structs_and_dynamic_arrays_round_trip() {
    let registry = test_registry();
    let original = Outer {
        id: -12,
        inner: Inner {
            value: 99,
            ratio: 0.5,
        },
        tags: vec!["fast".to_string(), "old".to_string()],
        children: vec![
            Inner {
                value: 1,
                ratio: 1.5,
            },
            Inner {
                value: 2,
                ratio: -2.25,
            },
        ],
    };

    let text = write_readable(&original, "outer_t", &registry);
    let decoded: Outer = read_readable(&text, "outer_t", &registry);
    assert_eq!(decoded, original);
}

#[test]
fn zero_flags_round_trip_as_absent_setter() {
    let registry = test_registry();
    let original = IoResource {
        a: 1,
        name: "n".to_string(),
        mode: 0,
        arr: [0, 0, 0],
    };
    let text = write_readable(&original, "io_resource_t", &registry);
    assert!(!text.contains("mode"));

    let decoded: IoResource = read_readable(&text, "io_resource_t", &registry);
    assert_eq!(decoded.mode, 0);
}

#[test]
fn hand_written_statements_decode() {
    let registry = test_registry();
    let text = "//! io_resource_t\n\
                // tuning values\n\
                a = -3\n\
                name = \"blade\"\n\
                mode = read, write\n\
                arr[1] = 11\n";
    let decoded: IoResource = read_readable(text, "io_resource_t", &registry);
    assert_eq!(decoded.a, -3);
    assert_eq!(decoded.name, "blade");
    assert_eq!(decoded.mode, ACCESS_READ | ACCESS_WRITE);
    assert_eq!(decoded.arr, [0, 11, 0]);
}

#[test]
fn mismatches_fail_with_failed_state() {
    let registry = test_registry();
    let ty = registry.struct_by_name(&intern("io_resource_t")).unwrap().clone();

    for text in [
        "missing = 1\n",        // reflection field absent
        "a = \"text\"\n",       // wrong archetype for the setter
        "a = 99999999999999\n", // integer out of range for i32
        "arr = 1, 2, 3, 4\n",   // array length beyond inline capacity
        "mode = nonsense\n",    // unknown enum item
    ] {
        let mut decoded = IoResource::default();
        let mut stream = MemoryStream::from_vec(text.as_bytes().to_vec());
        let mut reader = unsafe {
            ReadableReader::new_raw(
                &mut stream,
                &mut decoded as *mut IoResource as *mut u8,
                ty.clone(),
                registry.clone(),
            )
        }
        .unwrap();

        let mut result = reader.step();
        while result == StepResult::InProgress {
            result = reader.step();
        }
        assert_eq!(result, StepResult::Failed, "case: {text}");
    }
}

// ============================================================================
// PATCHES
// ============================================================================

fn sample_patch() -> Patch {
    let mut builder = PatchBuilder::new();
    builder.set_type(intern("pod_target_t"));
    builder.add_bytes(
        std::mem::offset_of!(PodTarget, x) as u32,
        &7i32.to_le_bytes(),
    );
    builder.add_bytes(
        std::mem::offset_of!(PodTarget, mode) as u32,
        &(ACCESS_READ | ACCESS_WRITE).to_le_bytes(),
    );
    builder.build().unwrap()
}

#[test]
fn patch_round_trips_and_applies_identically() {
    let registry = test_registry();
    let original = PatchHolder {
        marker: 3,
        overlay: sample_patch(),
    };

    let text = write_readable(&original, "patch_holder_t", &registry);
    assert!(text.contains("__type = pod_target_t"));

    let decoded: PatchHolder = read_readable(&text, "patch_holder_t", &registry);
    assert_eq!(decoded.marker, 3);
    assert!(decoded.overlay.is_valid());
    assert_eq!(
        decoded.overlay.type_name(),
        Some(&intern("pod_target_t"))
    );

    // Applying the re-read patch to an empty target must equal applying
    // the original, bytewise.
    let mut from_original = PodTarget::default();
    let mut from_decoded = PodTarget::default();
    unsafe {
        original
            .overlay
            .apply(
                &mut from_original as *mut PodTarget as *mut u8,
                std::mem::size_of::<PodTarget>() as u32,
            )
            .unwrap();
        decoded
            .overlay
            .apply(
                &mut from_decoded as *mut PodTarget as *mut u8,
                std::mem::size_of::<PodTarget>() as u32,
            )
            .unwrap();
    }
    assert_eq!(from_original, from_decoded);
    assert_eq!(from_original.x, 7);
    assert_eq!(from_original.y, 0);
    assert_eq!(from_original.mode, ACCESS_READ | ACCESS_WRITE);
}

#[test]
fn patch_without_type_is_rejected() {
    let registry = test_registry();
    let ty = registry
        .struct_by_name(&intern("patch_holder_t"))
        .unwrap()
        .clone();

    let text = "overlay {\n    x = 1\n}\n";
    let mut decoded = PatchHolder::default();
    let mut stream = MemoryStream::from_vec(text.as_bytes().to_vec());
    let mut reader = unsafe {
        ReadableReader::new_raw(
            &mut stream,
            &mut decoded as *mut PatchHolder as *mut u8,
            ty,
            registry.clone(),
        )
    }
    .unwrap();

    let mut result = reader.step();
    while result == StepResult::InProgress {
        result = reader.step();
    }
    assert_eq!(result, StepResult::Failed);
}

// ============================================================================
// BINARY RECORD STREAM
// ============================================================================

#[test]
fn binary_round_trips_nested_instance() {
    let registry = test_registry();
    let ty = registry.struct_by_name(&intern("outer_t")).unwrap().clone();
    let original = Outer {
        id: 1234,
        inner: Inner {
            value: u64::MAX,
            ratio: 8.25,
        },
        tags: vec!["one".to_string()],
        children: vec![Inner {
            value: 5,
            ratio: 0.0,
        }],
    };

    let mut stream = MemoryStream::new();
    unsafe {
        write_binary_instance(
            &mut stream,
            &original as *const Outer as *const u8,
            &ty,
            &registry,
            None,
        )
        .unwrap();
    }
    stream.seek(SeekFrom::Start(0)).unwrap();

    let mut decoded = Outer::default();
    let mut reader = unsafe {
        BinaryReader::new_raw(
            Box::new(stream),
            &mut decoded as *mut Outer as *mut u8,
            ty,
            registry.clone(),
            None,
        )
    };
    loop {
        match reader.step() {
            StepResult::InProgress => {}
            StepResult::Finished => break,
            StepResult::Failed => panic!("binary reader failed"),
        }
    }
    assert_eq!(decoded, original);
}

#[test]
fn binary_truncation_fails_cleanly() {
    let registry = test_registry();
    let ty = registry.struct_by_name(&intern("outer_t")).unwrap().clone();
    let original = Outer {
        id: 5,
        tags: vec!["tag".to_string()],
        ..Outer::default()
    };

    let mut stream = MemoryStream::new();
    unsafe {
        write_binary_instance(
            &mut stream,
            &original as *const Outer as *const u8,
            &ty,
            &registry,
            None,
        )
        .unwrap();
    }
    let mut bytes = stream.into_inner();
    bytes.truncate(bytes.len() - 2);

    let mut decoded = Outer::default();
    let mut reader = unsafe {
        BinaryReader::new_raw(
            Box::new(MemoryStream::from_vec(bytes)),
            &mut decoded as *mut Outer as *mut u8,
            ty,
            registry.clone(),
            None,
        )
    };
    let mut result = reader.step();
    while result == StepResult::InProgress {
        result = reader.step();
    }
    assert_eq!(result, StepResult::Failed);
}
