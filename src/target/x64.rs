//! x86-64 backend: instruction encoding and artifact construction.
//!
//! The lowering is deliberately simple: every value gets a stack slot below
//! `rbp`, instructions load their operands into scratch registers, operate,
//! and store the result back. Calls follow the System V register convention
//! for up to six integer arguments. Reference-count operations lower to calls
//! into the language runtime (`quill_retain` / `quill_release`).
//!
//! Object emission encodes each function with iced-x86 and assembles an ELF,
//! Mach-O or COFF object (chosen from the triple) with one text-section
//! symbol per function and a relative relocation per call site. Assembly
//! emission prints the same lowering as AT&T-syntax text.

use super::{
    validate_features, CodegenFileType, CodegenInitError, EmissionStepProvider, MachineError,
    MachineOptions, TargetDescriptor, TargetMachine,
};
use crate::emit::{binary_format_for_triple, Artifact, EmitError, EmitPlan, EmitStep};
use crate::ir::{BinOp, Function, Inst, Module, ValueId};
use iced_x86::code_asm::*;
use iced_x86::BlockEncoderOptions;
use object::write::{Object, Relocation, StandardSection, Symbol, SymbolId, SymbolSection};
use object::{
    Architecture, Endianness, RelocationEncoding, RelocationFlags, RelocationKind, SymbolFlags,
    SymbolKind, SymbolScope,
};

/// Runtime entry points the reference-count primitives lower to.
pub const RETAIN_SYMBOL: &str = "quill_retain";
pub const RELEASE_SYMBOL: &str = "quill_release";

const SUPPORTED_CPUS: &[&str] = &["generic", "x86-64", "x86-64-v2", "x86-64-v3"];

const ARG_REGS: [AsmRegister64; 6] = [rdi, rsi, rdx, rcx, r8, r9];
const ARG_REG_NAMES: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

/// The x86-64 backend family.
#[derive(Debug)]
pub struct X64Target;

impl TargetDescriptor for X64Target {
    fn name(&self) -> &'static str {
        "x86-64"
    }

    fn description(&self) -> &'static str {
        "64-bit x86 (System V stack-slot lowering)"
    }

    fn create_machine(
        &self,
        triple: &str,
        options: &MachineOptions,
    ) -> Result<Box<dyn TargetMachine>, MachineError> {
        if !SUPPORTED_CPUS.contains(&options.cpu.as_str()) {
            return Err(MachineError::UnsupportedCpu {
                cpu: options.cpu.clone(),
                target: self.name(),
            });
        }
        validate_features(&options.features)?;
        Ok(Box::new(X64Machine {
            triple: triple.to_string(),
            data_layout: data_layout_for(triple),
        }))
    }
}

/// Data-layout string for an x86-64 triple. The mangling component follows
/// the object format the triple implies.
pub(crate) fn data_layout_for(triple: &str) -> String {
    let mangling = if triple.contains("apple") || triple.contains("darwin") {
        "o"
    } else if triple.contains("windows") {
        "w"
    } else {
        "e"
    };
    format!("e-m:{mangling}-p270:32:32-p271:32:32-p272:64:64-i64:64-i128:128-f80:128-n8:16:32:64-S128")
}

#[derive(Debug)]
struct X64Machine {
    triple: String,
    data_layout: String,
}

impl TargetMachine for X64Machine {
    fn triple(&self) -> &str {
        &self.triple
    }

    fn data_layout(&self) -> &str {
        &self.data_layout
    }

    fn new_artifact(&self, file_type: CodegenFileType) -> Artifact {
        match file_type {
            CodegenFileType::Assembly => Artifact::assembly(),
            CodegenFileType::Object => Artifact::object(
                binary_format_for_triple(&self.triple),
                Architecture::X86_64,
                Endianness::Little,
            ),
        }
    }
}

impl EmissionStepProvider for X64Machine {
    fn add_emission_steps(
        &self,
        plan: &mut EmitPlan,
        file_type: CodegenFileType,
    ) -> Result<(), CodegenInitError> {
        match file_type {
            CodegenFileType::Assembly => plan.push(Box::new(X64AssemblyStep {
                triple: self.triple.clone(),
            })),
            CodegenFileType::Object => plan.push(Box::new(X64ObjectStep)),
        }
        Ok(())
    }
}

struct X64AssemblyStep {
    triple: String,
}

impl EmitStep for X64AssemblyStep {
    fn name(&self) -> &'static str {
        "x64-assembly"
    }

    fn run(&self, module: &Module, artifact: &mut Artifact) -> Result<(), EmitError> {
        let Artifact::Assembly(text) = artifact else {
            return Err(EmitError::Codegen(
                "assembly step applied to a non-text artifact".to_string(),
            ));
        };
        text.push_str(&print_assembly(module, &self.triple)?);
        Ok(())
    }
}

struct X64ObjectStep;

impl EmitStep for X64ObjectStep {
    fn name(&self) -> &'static str {
        "x64-object"
    }

    fn run(&self, module: &Module, artifact: &mut Artifact) -> Result<(), EmitError> {
        let Artifact::Object(obj) = artifact else {
            return Err(EmitError::Codegen(
                "object step applied to a non-object artifact".to_string(),
            ));
        };
        build_object(module, obj)
    }
}

/// Stack slot of a value, relative to `rbp`.
fn slot(value: ValueId) -> i32 {
    -8 * (value as i32 + 1)
}

/// Frame bytes reserved below the saved `rbp`, 16-byte aligned so `rsp`
/// stays aligned at call sites.
fn frame_size(func: &Function) -> i32 {
    let bytes = 8 * func.value_count() as i32;
    (bytes + 15) & !15
}

struct EncodedFunction {
    code: Vec<u8>,
    /// Byte offset of each call's rel32 field, with the callee symbol.
    call_sites: Vec<(u64, String)>,
}

fn enc_err(err: iced_x86::IcedError) -> EmitError {
    EmitError::Codegen(err.to_string())
}

/// Encode one function body to machine code.
fn encode_function(func: &Function) -> Result<EncodedFunction, EmitError> {
    if func.params.len() > ARG_REGS.len() {
        return Err(EmitError::Codegen(format!(
            "function @{} has more than {} parameters",
            func.name,
            ARG_REGS.len()
        )));
    }

    let mut a = CodeAssembler::new(64).map_err(enc_err)?;
    let mut labels: hashbrown::HashMap<&str, CodeLabel> = func
        .blocks
        .iter()
        .map(|b| (b.label.as_str(), a.create_label()))
        .collect();
    let mut sites: Vec<(CodeLabel, String)> = Vec::new();

    let frame = frame_size(func);
    a.push(rbp).map_err(enc_err)?;
    a.mov(rbp, rsp).map_err(enc_err)?;
    if frame > 0 {
        a.sub(rsp, frame).map_err(enc_err)?;
    }
    for idx in 0..func.params.len() {
        a.mov(qword_ptr(rbp + slot(idx as ValueId)), ARG_REGS[idx])
            .map_err(enc_err)?;
    }

    for block in &func.blocks {
        {
            let label = labels.get_mut(block.label.as_str()).expect("label created above");
            a.set_label(label).map_err(enc_err)?;
        }
        for inst in &block.insts {
            encode_inst(&mut a, &labels, &mut sites, func, inst)?;
        }
    }

    let result = a
        .assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)
        .map_err(enc_err)?;
    let mut code = result.inner.code_buffer.clone();
    let mut call_sites = Vec::new();
    for (label, callee) in sites {
        // The site label marks the instruction after the call; the rel32
        // field is the four bytes before it. Zero it so the linker sees the
        // conventional addend form.
        let end = result.label_ip(&label).map_err(enc_err)? as usize;
        code[end - 4..end].fill(0);
        call_sites.push(((end - 4) as u64, callee));
    }
    Ok(EncodedFunction { code, call_sites })
}

fn encode_inst(
    a: &mut CodeAssembler,
    labels: &hashbrown::HashMap<&str, CodeLabel>,
    sites: &mut Vec<(CodeLabel, String)>,
    func: &Function,
    inst: &Inst,
) -> Result<(), EmitError> {
    let block_label = |name: &str| -> Result<CodeLabel, EmitError> {
        labels.get(name).copied().ok_or_else(|| {
            EmitError::Codegen(format!("branch to unknown block '{name}' in @{}", func.name))
        })
    };
    match inst {
        Inst::Const { dest, value } => {
            a.mov(rax, *value).map_err(enc_err)?;
            a.mov(qword_ptr(rbp + slot(*dest)), rax).map_err(enc_err)?;
        }
        Inst::Binary { op, dest, lhs, rhs } => {
            a.mov(rax, qword_ptr(rbp + slot(*lhs))).map_err(enc_err)?;
            a.mov(rcx, qword_ptr(rbp + slot(*rhs))).map_err(enc_err)?;
            match op {
                BinOp::Add => a.add(rax, rcx).map_err(enc_err)?,
                BinOp::Sub => a.sub(rax, rcx).map_err(enc_err)?,
                BinOp::Mul => a.imul_2(rax, rcx).map_err(enc_err)?,
            }
            a.mov(qword_ptr(rbp + slot(*dest)), rax).map_err(enc_err)?;
        }
        Inst::Call { dest, callee, args } => {
            if args.len() > ARG_REGS.len() {
                return Err(EmitError::Codegen(format!(
                    "call to @{callee} passes more than {} arguments",
                    ARG_REGS.len()
                )));
            }
            for (idx, arg) in args.iter().enumerate() {
                a.mov(ARG_REGS[idx], qword_ptr(rbp + slot(*arg)))
                    .map_err(enc_err)?;
            }
            emit_call(a, sites, callee)?;
            if let Some(dest) = dest {
                a.mov(qword_ptr(rbp + slot(*dest)), rax).map_err(enc_err)?;
            }
        }
        Inst::Retain { value } => emit_rc_call(a, sites, RETAIN_SYMBOL, *value)?,
        Inst::Release { value } => emit_rc_call(a, sites, RELEASE_SYMBOL, *value)?,
        Inst::RcAdjust { value, delta } => {
            let symbol = if *delta > 0 { RETAIN_SYMBOL } else { RELEASE_SYMBOL };
            for _ in 0..delta.unsigned_abs() {
                emit_rc_call(a, sites, symbol, *value)?;
            }
        }
        Inst::Ret { value } => {
            if let Some(value) = value {
                a.mov(rax, qword_ptr(rbp + slot(*value))).map_err(enc_err)?;
            }
            a.leave().map_err(enc_err)?;
            a.ret().map_err(enc_err)?;
        }
        Inst::Br { target } => {
            a.jmp(block_label(target)?).map_err(enc_err)?;
        }
        Inst::CondBr {
            cond,
            then_target,
            else_target,
        } => {
            a.mov(rax, qword_ptr(rbp + slot(*cond))).map_err(enc_err)?;
            a.test(rax, rax).map_err(enc_err)?;
            a.jne(block_label(then_target)?).map_err(enc_err)?;
            a.jmp(block_label(else_target)?).map_err(enc_err)?;
        }
    }
    Ok(())
}

/// Emit a call with a zero placeholder target and remember the site. The
/// label is placed on the following instruction so its address marks the end
/// of the call encoding.
fn emit_call(
    a: &mut CodeAssembler,
    sites: &mut Vec<(CodeLabel, String)>,
    callee: &str,
) -> Result<(), EmitError> {
    a.call(0u64).map_err(enc_err)?;
    let mut site = a.create_label();
    a.set_label(&mut site).map_err(enc_err)?;
    sites.push((site, callee.to_string()));
    Ok(())
}

fn emit_rc_call(
    a: &mut CodeAssembler,
    sites: &mut Vec<(CodeLabel, String)>,
    symbol: &str,
    value: ValueId,
) -> Result<(), EmitError> {
    a.mov(rdi, qword_ptr(rbp + slot(value))).map_err(enc_err)?;
    emit_call(a, sites, symbol)
}

/// Encode every bodied function into the object's text section, with one
/// symbol per function and a relative relocation per call site.
fn build_object(module: &Module, obj: &mut Object<'static>) -> Result<(), EmitError> {
    let text = obj.section_id(StandardSection::Text);

    let mut encoded: Vec<(&Function, EncodedFunction)> = Vec::new();
    for func in &module.functions {
        if func.is_declaration() {
            continue;
        }
        encoded.push((func, encode_function(func)?));
    }

    let mut symbols: hashbrown::HashMap<String, SymbolId> = hashbrown::HashMap::new();
    for (func, enc) in &encoded {
        let scope = if func.internal {
            SymbolScope::Compilation
        } else {
            SymbolScope::Linkage
        };
        let id = obj.add_symbol(Symbol {
            name: func.name.clone().into_bytes(),
            value: 0,
            size: enc.code.len() as u64,
            kind: SymbolKind::Text,
            scope,
            weak: false,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        });
        symbols.insert(func.name.clone(), id);
    }

    for (func, enc) in &encoded {
        let sym = symbols[&func.name];
        let offset = obj.add_symbol_data(sym, text, &enc.code, 16);
        for (rel_offset, callee) in &enc.call_sites {
            let callee_sym = match symbols.get(callee) {
                Some(id) => *id,
                None => {
                    let id = obj.add_symbol(Symbol {
                        name: callee.clone().into_bytes(),
                        value: 0,
                        size: 0,
                        kind: SymbolKind::Text,
                        scope: SymbolScope::Unknown,
                        weak: false,
                        section: SymbolSection::Undefined,
                        flags: SymbolFlags::None,
                    });
                    symbols.insert(callee.clone(), id);
                    id
                }
            };
            obj.add_relocation(
                text,
                Relocation {
                    offset: offset + rel_offset,
                    symbol: callee_sym,
                    addend: -4,
                    flags: RelocationFlags::Generic {
                        kind: RelocationKind::Relative,
                        encoding: RelocationEncoding::X86Branch,
                        size: 32,
                    },
                },
            )
            .map_err(|e| EmitError::Object(e.to_string()))?;
        }
        log::trace!(
            "encoded @{}: {} bytes, {} call site(s)",
            func.name,
            enc.code.len(),
            enc.call_sites.len()
        );
    }
    Ok(())
}

/// Print the same lowering as AT&T-syntax assembly text.
fn print_assembly(module: &Module, triple: &str) -> Result<String, EmitError> {
    use std::fmt::Write;

    let elf = !(triple.contains("apple") || triple.contains("darwin") || triple.contains("windows"));
    let mut out = String::new();
    writeln!(out, "\t.text").unwrap();
    for func in &module.functions {
        if func.is_declaration() {
            continue;
        }
        if func.params.len() > ARG_REGS.len() {
            return Err(EmitError::Codegen(format!(
                "function @{} has more than {} parameters",
                func.name,
                ARG_REGS.len()
            )));
        }
        out.push('\n');
        if !func.internal {
            writeln!(out, "\t.globl {}", func.name).unwrap();
        }
        if elf {
            writeln!(out, "\t.type {},@function", func.name).unwrap();
        }
        writeln!(out, "{}:", func.name).unwrap();
        writeln!(out, "\tpushq %rbp").unwrap();
        writeln!(out, "\tmovq %rsp, %rbp").unwrap();
        let frame = frame_size(func);
        if frame > 0 {
            writeln!(out, "\tsubq ${frame}, %rsp").unwrap();
        }
        for idx in 0..func.params.len() {
            writeln!(
                out,
                "\tmovq %{}, {}(%rbp)",
                ARG_REG_NAMES[idx],
                slot(idx as ValueId)
            )
            .unwrap();
        }
        for block in &func.blocks {
            writeln!(out, ".L{}_{}:", func.name, block.label).unwrap();
            for inst in &block.insts {
                print_inst(&mut out, func, inst);
            }
        }
        if elf {
            writeln!(out, "\t.size {0}, .-{0}", func.name).unwrap();
        }
    }
    Ok(out)
}

fn print_inst(out: &mut String, func: &Function, inst: &Inst) {
    use std::fmt::Write;

    let mem = |v: &ValueId| format!("{}(%rbp)", slot(*v));
    let label = |target: &str| format!(".L{}_{}", func.name, target);
    match inst {
        Inst::Const { dest, value } => {
            if i32::try_from(*value).is_ok() {
                writeln!(out, "\tmovq ${value}, %rax").unwrap();
            } else {
                writeln!(out, "\tmovabsq ${value}, %rax").unwrap();
            }
            writeln!(out, "\tmovq %rax, {}", mem(dest)).unwrap();
        }
        Inst::Binary { op, dest, lhs, rhs } => {
            let mnemonic = match op {
                BinOp::Add => "addq",
                BinOp::Sub => "subq",
                BinOp::Mul => "imulq",
            };
            writeln!(out, "\tmovq {}, %rax", mem(lhs)).unwrap();
            writeln!(out, "\tmovq {}, %rcx", mem(rhs)).unwrap();
            writeln!(out, "\t{mnemonic} %rcx, %rax").unwrap();
            writeln!(out, "\tmovq %rax, {}", mem(dest)).unwrap();
        }
        Inst::Call { dest, callee, args } => {
            for (idx, arg) in args.iter().enumerate() {
                writeln!(out, "\tmovq {}, %{}", mem(arg), ARG_REG_NAMES[idx]).unwrap();
            }
            writeln!(out, "\tcall {callee}").unwrap();
            if let Some(dest) = dest {
                writeln!(out, "\tmovq %rax, {}", mem(dest)).unwrap();
            }
        }
        Inst::Retain { value } => {
            writeln!(out, "\tmovq {}, %rdi", mem(value)).unwrap();
            writeln!(out, "\tcall {RETAIN_SYMBOL}").unwrap();
        }
        Inst::Release { value } => {
            writeln!(out, "\tmovq {}, %rdi", mem(value)).unwrap();
            writeln!(out, "\tcall {RELEASE_SYMBOL}").unwrap();
        }
        Inst::RcAdjust { value, delta } => {
            let symbol = if *delta > 0 { RETAIN_SYMBOL } else { RELEASE_SYMBOL };
            for _ in 0..delta.unsigned_abs() {
                writeln!(out, "\tmovq {}, %rdi", mem(value)).unwrap();
                writeln!(out, "\tcall {symbol}").unwrap();
            }
        }
        Inst::Ret { value } => {
            if let Some(value) = value {
                writeln!(out, "\tmovq {}, %rax", mem(value)).unwrap();
            }
            writeln!(out, "\tleave").unwrap();
            writeln!(out, "\tret").unwrap();
        }
        Inst::Br { target } => {
            writeln!(out, "\tjmp {}", label(target)).unwrap();
        }
        Inst::CondBr {
            cond,
            then_target,
            else_target,
        } => {
            writeln!(out, "\tmovq {}, %rax", mem(cond)).unwrap();
            writeln!(out, "\ttestq %rax, %rax").unwrap();
            writeln!(out, "\tjne {}", label(then_target)).unwrap();
            writeln!(out, "\tjmp {}", label(else_target)).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser;

    fn function_of(source: &str) -> Function {
        let mut module = parser::parse(source).expect("test IR should parse").into_module();
        module.functions.remove(0)
    }

    #[test]
    fn test_data_layout_mangling_follows_triple() {
        assert!(data_layout_for("x86_64-unknown-linux-gnu").contains("-m:e-"));
        assert!(data_layout_for("x86_64-apple-darwin").contains("-m:o-"));
        assert!(data_layout_for("x86_64-pc-windows-msvc").contains("-m:w-"));
    }

    #[test]
    fn test_encode_straight_line_function() {
        let func = function_of(
            "func @answer() {\nentry:\n  %a = const 40\n  %b = const 2\n  %c = add %a, %b\n  ret %c\n}\n",
        );
        let enc = encode_function(&func).unwrap();
        assert!(!enc.code.is_empty());
        assert!(enc.call_sites.is_empty());
        // Prologue starts with push rbp.
        assert_eq!(enc.code[0], 0x55);
        // Epilogue ends with leave; ret.
        assert_eq!(&enc.code[enc.code.len() - 2..], &[0xc9, 0xc3]);
    }

    #[test]
    fn test_call_sites_are_zeroed_placeholders() {
        let func = function_of(
            "func @f(%x) {\nentry:\n  retain %x\n  %r = call @callee(%x)\n  ret %r\n}\n",
        );
        let enc = encode_function(&func).unwrap();
        assert_eq!(enc.call_sites.len(), 2);
        assert_eq!(enc.call_sites[0].1, RETAIN_SYMBOL);
        assert_eq!(enc.call_sites[1].1, "callee");
        for (offset, _) in &enc.call_sites {
            let offset = *offset as usize;
            // E8 opcode precedes the rel32 field, which is zeroed.
            assert_eq!(enc.code[offset - 1], 0xe8);
            assert_eq!(&enc.code[offset..offset + 4], &[0, 0, 0, 0]);
        }
    }

    #[test]
    fn test_too_many_parameters_is_a_codegen_error() {
        let func = function_of(
            "func @f(%a, %b, %c, %d, %e, %g, %h) {\nentry:\n  ret\n}\n",
        );
        assert!(encode_function(&func).is_err());
    }

    #[test]
    fn test_assembly_text_shape() {
        let mut module = Module::new("m");
        module.functions.push(function_of(
            "func @main(%n) {\nentry:\n  %two = const 2\n  %m = mul %n, %two\n  release %m\n  cond_br %m, done, done\ndone:\n  ret %m\n}\n",
        ));
        let text = print_assembly(&module, "x86_64-unknown-linux-gnu").unwrap();
        assert!(text.contains("\t.globl main"));
        assert!(text.contains("main:"));
        assert!(text.contains(".Lmain_entry:"));
        assert!(text.contains("\timulq %rcx, %rax"));
        assert!(text.contains("\tcall quill_release"));
        assert!(text.contains("\tjne .Lmain_done"));
        assert!(text.contains("\t.size main, .-main"));
    }

    #[test]
    fn test_internal_functions_are_not_global_in_assembly() {
        let mut module = Module::new("m");
        module.functions.push(function_of(
            "func @helper() internal {\nentry:\n  ret\n}\n",
        ));
        let text = print_assembly(&module, "x86_64-unknown-linux-gnu").unwrap();
        assert!(!text.contains(".globl helper"));
        assert!(text.contains("helper:"));
    }
}
