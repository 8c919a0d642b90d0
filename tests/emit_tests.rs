//! Artifact content checks: object files parse and carry the expected
//! symbols and relocations, assembly and IR outputs have the right shape.

use object::{Object, ObjectSection, ObjectSymbol};
use quill::config::{OptLevel, OutputKind, PipelineConfig};
use quill::diagnostics::CollectingSink;
use quill::driver::PipelineDriver;
use quill::frontend::TextualFrontend;
use quill::ir::bitcode;
use std::fs;
use std::path::PathBuf;

const PROGRAM: &str = r#"
module "demo"

declare @quill_print(%v)

func @main(%n) {
entry:
  %two = const 2
  %m = mul %n, %two
  retain %m
  call @quill_print(%m)
  %r = call @scale(%m)
  release %m
  ret %r
}

func @scale(%x) internal {
entry:
  %k = const 3
  %y = mul %x, %k
  br out
out:
  ret %y
}

debug @main, "demo.ql", 4
debug @scale, "demo.ql", 14
"#;

fn artifact_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("quill-emit-{}-{name}", std::process::id()))
}

fn run_to_file(kind: OutputKind, level: OptLevel, debug_info: bool, path: &PathBuf) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut config = PipelineConfig::new("x86_64-unknown-linux-gnu");
    config.opt_level = level;
    config.output_kind = kind;
    config.output_path = Some(path.clone());
    config.debug_info = debug_info;
    config.verify = true;
    let driver = PipelineDriver::new(&config);
    let mut frontend = TextualFrontend::new(PROGRAM);
    let mut sink = CollectingSink::new();
    driver.run(&mut frontend, 0, &mut sink).expect("pipeline should succeed");
    assert!(sink.is_empty(), "unexpected diagnostics: {:?}", sink.diagnostics);
}

#[test]
fn test_object_file_parses_with_expected_symbols() {
    let path = artifact_path("symbols.o");
    run_to_file(OutputKind::ObjectFile, OptLevel::O0, false, &path);

    let bytes = fs::read(&path).unwrap();
    let file = object::File::parse(&*bytes).expect("emitted object should parse");
    let names: Vec<String> = file
        .symbols()
        .filter_map(|s| s.name().ok().map(str::to_string))
        .collect();
    assert!(names.iter().any(|n| n == "main"));
    assert!(names.iter().any(|n| n == "scale"));
    // Runtime and external calls surface as undefined symbols.
    assert!(names.iter().any(|n| n == "quill_retain"));
    assert!(names.iter().any(|n| n == "quill_release"));
    assert!(names.iter().any(|n| n == "quill_print"));
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_object_file_has_call_relocations() {
    let path = artifact_path("relocs.o");
    run_to_file(OutputKind::ObjectFile, OptLevel::O0, false, &path);

    let bytes = fs::read(&path).unwrap();
    let file = object::File::parse(&*bytes).unwrap();
    let text = file.section_by_name(".text").expect("text section");
    // retain + print + scale + release at minimum.
    assert!(text.relocations().count() >= 4);
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_debug_info_adds_metadata_section_to_object() {
    let path = artifact_path("debug.o");
    run_to_file(OutputKind::ObjectFile, OptLevel::O0, true, &path);

    let bytes = fs::read(&path).unwrap();
    let file = object::File::parse(&*bytes).unwrap();
    let section = file
        .section_by_name(".quill_debug")
        .expect("debug metadata section");
    let data = section.data().unwrap();
    let text = String::from_utf8_lossy(data);
    assert!(text.contains("main:demo.ql:4"));
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_object_without_debug_flag_has_no_metadata_section() {
    let path = artifact_path("nodebug.o");
    run_to_file(OutputKind::ObjectFile, OptLevel::O0, false, &path);

    let bytes = fs::read(&path).unwrap();
    let file = object::File::parse(&*bytes).unwrap();
    assert!(file.section_by_name(".quill_debug").is_none());
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_assembly_output_shape() {
    let path = artifact_path("out.s");
    run_to_file(OutputKind::NativeAssembly, OptLevel::O0, true, &path);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\t.globl main"));
    assert!(text.contains("main:"));
    assert!(text.contains("\tcall quill_retain"));
    assert!(text.contains("\tcall quill_print"));
    // Internal functions stay local.
    assert!(!text.contains(".globl scale"));
    // The debug patch appended its section after the code.
    let code_pos = text.find("main:").unwrap();
    let debug_pos = text.find(".quill_debug").unwrap();
    assert!(debug_pos > code_pos);
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_textual_ir_output_round_trips() {
    let path = artifact_path("out.ll");
    run_to_file(OutputKind::TextualIr, OptLevel::O0, false, &path);

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("target triple = \"x86_64-unknown-linux-gnu\""));
    assert!(text.contains("flag \"Debug Version\" = 3"));
    assert!(text.contains("func @main(%n) {"));
    // The printed module parses again.
    let reparsed = quill::ir::parser::parse(&text).expect("printed IR should re-parse");
    assert_eq!(reparsed.functions.len(), 3);
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_binary_ir_output_decodes() {
    let path = artifact_path("out.qbc");
    run_to_file(OutputKind::BinaryIr, OptLevel::O1, false, &path);

    let bytes = fs::read(&path).unwrap();
    let module = bitcode::read_module(&bytes).expect("binary IR should decode");
    assert_eq!(module.target_triple(), Some("x86_64-unknown-linux-gnu"));
    assert_eq!(module.flag("Debug Version"), Some(3));
    assert!(module.function("main").is_some());
    fs::remove_file(&path).unwrap();
}

#[test]
fn test_optimized_object_still_links_symbols() {
    let path = artifact_path("optimized.o");
    run_to_file(OutputKind::ObjectFile, OptLevel::O3, false, &path);

    let bytes = fs::read(&path).unwrap();
    let file = object::File::parse(&*bytes).unwrap();
    let names: Vec<String> = file
        .symbols()
        .filter_map(|s| s.name().ok().map(str::to_string))
        .collect();
    assert!(names.iter().any(|n| n == "main"));
    fs::remove_file(&path).unwrap();
}
