mod common;

use common::{ModuleBuilder, ProcBuilder, Slot, Imm, NO_ENV, PTR, W32};

use pz_asm::Opcode;
use pz_vm::error::LoadErrorKind;
use pz_vm::heap::HeapOptions;
use pz_vm::loader::LoadOptions;
use pz_vm::pz::Pz;

fn new_pz() -> Pz {
    Pz::new(HeapOptions::default(), LoadOptions::default()).expect("mapping the heap")
}

fn ret_proc(name: &str) -> ProcBuilder {
    ProcBuilder::new(name).instr(Opcode::Ret, &[], Imm::None)
}

fn load_err(bytes: Vec<u8>) -> LoadErrorKind {
    let file = common::write_module(&bytes);
    let mut pz = new_pz();
    pz.load(file.path()).expect_err("load must fail").source
}

#[test]
fn minimal_program_loads() {
    let bytes = ModuleBuilder::program()
        .name("empty")
        .entry(0, 0)
        .proc(ret_proc("main"))
        .closure(0, NO_ENV)
        .build();
    let file = common::write_module(&bytes);

    let mut pz = new_pz();
    let module = pz.load(file.path()).expect("a valid module");
    assert_eq!(module, "empty");
    assert_eq!(pz.library("empty").unwrap().num_procs(), 1);
}

#[test]
fn bad_magic_is_rejected() {
    let bytes = ModuleBuilder::program()
        .raw_magic(0xdead_beef)
        .name("m")
        .build();

    assert!(matches!(load_err(bytes), LoadErrorKind::BadMagic(0xdead_beef)));
}

#[test]
fn object_files_are_rejected_for_execution() {
    let bytes = ModuleBuilder::object().name("m").build();

    assert!(matches!(load_err(bytes), LoadErrorKind::ObjectNotRunnable));
}

#[test]
fn version_mismatch_is_a_hard_failure() {
    let bytes = ModuleBuilder::program().version(999).name("m").build();

    assert!(matches!(
        load_err(bytes),
        LoadErrorKind::VersionMismatch { found: 999, .. }
    ));
}

#[test]
fn truncated_files_report_the_short_read() {
    let mut bytes = ModuleBuilder::program()
        .name("m")
        .proc(ret_proc("main"))
        .closure(0, NO_ENV)
        .build();
    bytes.truncate(bytes.len() - 3);

    assert!(matches!(load_err(bytes), LoadErrorKind::Truncated { .. }));
}

#[test]
fn unknown_options_are_skipped_by_length() {
    let bytes = ModuleBuilder::program()
        .option(7, b"opaque-payload")
        .entry(0, 0)
        .name("m")
        .proc(ret_proc("main"))
        .closure(0, NO_ENV)
        .build();
    let file = common::write_module(&bytes);

    new_pz().load(file.path()).expect("unknown options are skipped");
}

#[test]
fn forward_data_references_are_rejected() {
    // Entry 0 points at entry 1: references may only reach backward.
    let bytes = ModuleBuilder::program()
        .name("m")
        .struct_(&[PTR])
        .data_struct(0, &[Slot::DataRef(1)])
        .data_string("x")
        .build();

    let err = load_err(bytes);
    assert!(matches!(
        err,
        LoadErrorKind::ForwardDataReference {
            referrer: 0,
            referent: 1
        }
    ));
    assert!(err.to_string().contains("forward reference"));
}

#[test]
fn self_data_reference_is_also_forward() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .struct_(&[PTR])
        .data_struct(0, &[Slot::DataRef(0)])
        .build();

    assert!(matches!(
        load_err(bytes),
        LoadErrorKind::ForwardDataReference { .. }
    ));
}

#[test]
fn junk_at_end_of_file_is_rejected() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .proc(ret_proc("main"))
        .closure(0, NO_ENV)
        .trailing_junk(&[0x42])
        .build();

    assert!(matches!(load_err(bytes), LoadErrorKind::JunkAtEnd { .. }));
}

#[test]
fn missing_import_module_fails_the_load() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .import("NoSuchModule", "f")
        .build();

    assert!(matches!(
        load_err(bytes),
        LoadErrorKind::MissingModule(module) if module == "NoSuchModule"
    ));
}

#[test]
fn missing_import_symbol_fails_the_load() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .import("Builtin", "no_such_builtin")
        .build();

    assert!(matches!(
        load_err(bytes),
        LoadErrorKind::MissingSymbol { module, symbol }
            if module == "Builtin" && symbol == "no_such_builtin"
    ));
}

#[test]
fn imports_resolve_against_the_builtin_module() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .import("Builtin", "print")
        .proc(ret_proc("main"))
        .closure(0, NO_ENV)
        .build();
    let file = common::write_module(&bytes);

    new_pz().load(file.path()).expect("print resolves");
}

#[test]
fn bad_closure_proc_id_is_rejected() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .proc(ret_proc("main"))
        .closure(9, NO_ENV)
        .build();

    assert!(matches!(
        load_err(bytes),
        LoadErrorKind::BadId { what: "proc", id: 9 }
    ));
}

#[test]
fn exports_are_published_fully_qualified() {
    let bytes = ModuleBuilder::library()
        .name("lib")
        .proc(ret_proc("noop"))
        .closure(0, NO_ENV)
        .export("noop", 0)
        .build();
    let file = common::write_module(&bytes);

    let mut pz = new_pz();
    pz.load(file.path()).unwrap();

    let lib = pz.library("lib").unwrap();
    assert!(lib.export("lib.noop").is_some());
    assert!(lib.export("noop").is_none());
}

#[test]
fn loading_is_deterministic() {
    let bytes = ModuleBuilder::library()
        .name("det")
        .struct_(&[W32, PTR])
        .data_string("payload")
        .proc(
            ProcBuilder::new("f")
                .instr(Opcode::LoadImmediate, &[W32], Imm::U32(7))
                .instr(Opcode::Ret, &[], Imm::None),
        )
        .closure(0, NO_ENV)
        .export("f", 0)
        .build();
    let file = common::write_module(&bytes);

    let mut first = new_pz();
    let mut second = new_pz();
    first.load(file.path()).unwrap();
    second.load(file.path()).unwrap();

    let a = first.library("det").unwrap();
    let b = second.library("det").unwrap();

    let mut a_exports: Vec<_> = a.exports().map(|(name, e)| (name.to_string(), e.closure_id)).collect();
    let mut b_exports: Vec<_> = b.exports().map(|(name, e)| (name.to_string(), e.closure_id)).collect();
    a_exports.sort();
    b_exports.sort();
    assert_eq!(a_exports, b_exports);

    assert_eq!(a.num_procs(), b.num_procs());
    for id in 0..a.num_procs() as u32 {
        let pa = a.proc(id).unwrap();
        let pb = b.proc(id).unwrap();
        assert_eq!(pa.name(), pb.name());
        assert_eq!(pa.code().len(), pb.code().len());
    }
}

#[test]
fn debug_contexts_attach_file_and_line() {
    let bytes = ModuleBuilder::program()
        .name("m")
        .data_string("m.p")
        .proc(
            ProcBuilder::new("main")
                .context(0, 3)
                .instr(Opcode::LoadImmediate, &[W32], Imm::U32(1))
                .context_short(4)
                .instr(Opcode::Ret, &[], Imm::None),
        )
        .closure(0, NO_ENV)
        .build();
    let file = common::write_module(&bytes);

    let mut pz = Pz::new(
        HeapOptions::default(),
        LoadOptions {
            debug_contexts: true,
        },
    )
    .unwrap();
    pz.load(file.path()).unwrap();

    let proc = pz.library("m").unwrap().proc(0).unwrap();
    let at_start = proc.context_for(0).expect("context at offset 0");
    assert_eq!((at_start.file.as_str(), at_start.line), ("m.p", 3));

    let late = proc
        .context_for(proc.code().len() - 1)
        .expect("context at the ret");
    assert_eq!(late.line, 4);
}
