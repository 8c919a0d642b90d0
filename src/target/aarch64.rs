//! aarch64 backend: assembly emission only.
//!
//! The lowering mirrors the x86-64 backend's stack-slot scheme with frame
//! slots below `x29`. Object emission is not wired up for this architecture;
//! requesting it fails when the machine is asked for its emission steps.

use super::{
    validate_features, CodegenFileType, CodegenInitError, EmissionStepProvider, MachineError,
    MachineOptions, TargetDescriptor, TargetMachine,
};
use crate::emit::{Artifact, EmitError, EmitPlan, EmitStep};
use crate::ir::{BinOp, Function, Inst, Module, ValueId};
use crate::target::x64::{RELEASE_SYMBOL, RETAIN_SYMBOL};

const SUPPORTED_CPUS: &[&str] = &["generic"];

/// Integer argument registers of the AAPCS64 convention.
const ARG_REG_COUNT: usize = 8;

/// The aarch64 backend family.
#[derive(Debug)]
pub struct A64Target;

impl TargetDescriptor for A64Target {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn description(&self) -> &'static str {
        "64-bit Arm (assembly emission only)"
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
        Ok(Box::new(A64Machine {
            triple: triple.to_string(),
        }))
    }
}

#[derive(Debug)]
struct A64Machine {
    triple: String,
}

impl TargetMachine for A64Machine {
    fn triple(&self) -> &str {
        &self.triple
    }

    fn data_layout(&self) -> &str {
        "e-m:e-i8:8:32-i16:16:32-i64:64-i128:128-n32:64-S128"
    }

    fn new_artifact(&self, _file_type: CodegenFileType) -> Artifact {
        Artifact::assembly()
    }
}

impl EmissionStepProvider for A64Machine {
    fn add_emission_steps(
        &self,
        plan: &mut EmitPlan,
        file_type: CodegenFileType,
    ) -> Result<(), CodegenInitError> {
        match file_type {
            CodegenFileType::Assembly => {
                plan.push(Box::new(A64AssemblyStep));
                Ok(())
            }
            CodegenFileType::Object => Err(CodegenInitError {
                reason: "aarch64 supports assembly emission only".to_string(),
            }),
        }
    }
}

struct A64AssemblyStep;

impl EmitStep for A64AssemblyStep {
    fn name(&self) -> &'static str {
        "a64-assembly"
    }

    fn run(&self, module: &Module, artifact: &mut Artifact) -> Result<(), EmitError> {
        let Artifact::Assembly(text) = artifact else {
            return Err(EmitError::Codegen(
                "assembly step applied to a non-text artifact".to_string(),
            ));
        };
        text.push_str(&print_assembly(module)?);
        Ok(())
    }
}

fn slot(value: ValueId) -> i32 {
    -8 * (value as i32 + 1)
}

fn frame_size(func: &Function) -> i32 {
    let bytes = 8 * func.value_count() as i32;
    (bytes + 15) & !15
}

fn print_assembly(module: &Module) -> Result<String, EmitError> {
    use std::fmt::Write;

    let mut out = String::new();
    writeln!(out, "\t.text").unwrap();
    for func in &module.functions {
        if func.is_declaration() {
            continue;
        }
        if func.params.len() > ARG_REG_COUNT {
            return Err(EmitError::Codegen(format!(
                "function @{} has more than {ARG_REG_COUNT} parameters",
                func.name
            )));
        }
        out.push('\n');
        if !func.internal {
            writeln!(out, "\t.globl {}", func.name).unwrap();
        }
        writeln!(out, "{}:", func.name).unwrap();
        writeln!(out, "\tstp x29, x30, [sp, #-16]!").unwrap();
        writeln!(out, "\tmov x29, sp").unwrap();
        let frame = frame_size(func);
        if frame > 0 {
            writeln!(out, "\tsub sp, sp, #{frame}").unwrap();
        }
        for idx in 0..func.params.len() {
            writeln!(out, "\tstr x{idx}, [x29, #{}]", slot(idx as ValueId)).unwrap();
        }
        for block in &func.blocks {
            writeln!(out, ".L{}_{}:", func.name, block.label).unwrap();
            for inst in &block.insts {
                print_inst(&mut out, func, inst);
            }
        }
    }
    Ok(out)
}

fn print_inst(out: &mut String, func: &Function, inst: &Inst) {
    use std::fmt::Write;

    let mem = |v: &ValueId| format!("[x29, #{}]", slot(*v));
    let label = |target: &str| format!(".L{}_{}", func.name, target);
    match inst {
        Inst::Const { dest, value } => {
            writeln!(out, "\tldr x9, ={value}").unwrap();
            writeln!(out, "\tstr x9, {}", mem(dest)).unwrap();
        }
        Inst::Binary { op, dest, lhs, rhs } => {
            let mnemonic = match op {
                BinOp::Add => "add",
                BinOp::Sub => "sub",
                BinOp::Mul => "mul",
            };
            writeln!(out, "\tldr x9, {}", mem(lhs)).unwrap();
            writeln!(out, "\tldr x10, {}", mem(rhs)).unwrap();
            writeln!(out, "\t{mnemonic} x9, x9, x10").unwrap();
            writeln!(out, "\tstr x9, {}", mem(dest)).unwrap();
        }
        Inst::Call { dest, callee, args } => {
            for (idx, arg) in args.iter().enumerate() {
                writeln!(out, "\tldr x{idx}, {}", mem(arg)).unwrap();
            }
            writeln!(out, "\tbl {callee}").unwrap();
            if let Some(dest) = dest {
                writeln!(out, "\tstr x0, {}", mem(dest)).unwrap();
            }
        }
        Inst::Retain { value } => {
            writeln!(out, "\tldr x0, {}", mem(value)).unwrap();
            writeln!(out, "\tbl {RETAIN_SYMBOL}").unwrap();
        }
        Inst::Release { value } => {
            writeln!(out, "\tldr x0, {}", mem(value)).unwrap();
            writeln!(out, "\tbl {RELEASE_SYMBOL}").unwrap();
        }
        Inst::RcAdjust { value, delta } => {
            let symbol = if *delta > 0 { RETAIN_SYMBOL } else { RELEASE_SYMBOL };
            for _ in 0..delta.unsigned_abs() {
                writeln!(out, "\tldr x0, {}", mem(value)).unwrap();
                writeln!(out, "\tbl {symbol}").unwrap();
            }
        }
        Inst::Ret { value } => {
            if let Some(value) = value {
                writeln!(out, "\tldr x0, {}", mem(value)).unwrap();
            }
            writeln!(out, "\tmov sp, x29").unwrap();
            writeln!(out, "\tldp x29, x30, [sp], #16").unwrap();
            writeln!(out, "\tret").unwrap();
        }
        Inst::Br { target } => {
            writeln!(out, "\tb {}", label(target)).unwrap();
        }
        Inst::CondBr {
            cond,
            then_target,
            else_target,
        } => {
            writeln!(out, "\tldr x9, {}", mem(cond)).unwrap();
            writeln!(out, "\tcbnz x9, {}", label(then_target)).unwrap();
            writeln!(out, "\tb {}", label(else_target)).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodeModel, OptLevel, RelocModel};
    use crate::ir::parser;

    fn options() -> MachineOptions {
        MachineOptions {
            cpu: "generic".to_string(),
            features: String::new(),
            reloc_model: RelocModel::Default,
            code_model: CodeModel::Default,
            opt_level: OptLevel::O0,
        }
    }

    #[test]
    fn test_object_emission_is_rejected() {
        let machine = A64Target
            .create_machine("aarch64-unknown-linux-gnu", &options())
            .unwrap();
        let mut plan = EmitPlan::new();
        let err = machine
            .add_emission_steps(&mut plan, CodegenFileType::Object)
            .unwrap_err();
        assert!(err.reason.contains("assembly emission only"));
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn test_assembly_emission_shape() {
        let module = parser::parse(
            "func @main(%n) {\nentry:\n  %two = const 2\n  %m = add %n, %two\n  retain %m\n  ret %m\n}\n",
        )
        .unwrap()
        .into_module();
        let text = print_assembly(&module).unwrap();
        assert!(text.contains("\tstp x29, x30, [sp, #-16]!"));
        assert!(text.contains("\tadd x9, x9, x10"));
        assert!(text.contains("\tbl quill_retain"));
        assert!(text.contains("\tldp x29, x30, [sp], #16"));
    }
}
