//! Human-readable textual serialization of modules.
//!
//! The format round-trips through [`super::parser`]:
//!
//! ```text
//! module "demo"
//! target triple = "x86_64-unknown-linux-gnu"
//! target datalayout = "e-m:e-..."
//! flag "Debug Version" = 3
//!
//! declare @quill_retain(%obj)
//!
//! func @main() {
//! entry:
//!   %a = const 40
//!   %b = const 2
//!   %sum = add %a, %b
//!   rc.adjust %sum, 2
//!   ret %sum
//! }
//!
//! debug @main, "main.ql", 3
//! ```

use super::{Function, Inst, Module};
use std::fmt::Write;

/// Serialize a whole module.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    if !module.name().is_empty() {
        writeln!(out, "module \"{}\"", module.name()).unwrap();
    }
    if let Some(triple) = module.target_triple() {
        writeln!(out, "target triple = \"{triple}\"").unwrap();
    }
    if let Some(layout) = module.data_layout() {
        writeln!(out, "target datalayout = \"{layout}\"").unwrap();
    }
    for flag in module.flags() {
        writeln!(out, "flag \"{}\" = {}", flag.key, flag.value).unwrap();
    }
    for func in &module.functions {
        out.push('\n');
        print_function(&mut out, func);
    }
    if !module.debug_records.is_empty() {
        out.push('\n');
        for record in &module.debug_records {
            writeln!(
                out,
                "debug @{}, \"{}\", {}",
                record.symbol, record.file, record.line
            )
            .unwrap();
        }
    }
    out
}

fn print_function(out: &mut String, func: &Function) {
    let params = func
        .params
        .iter()
        .map(|p| format!("%{p}"))
        .collect::<Vec<_>>()
        .join(", ");
    if func.is_declaration() {
        writeln!(out, "declare @{}({})", func.name, params).unwrap();
        return;
    }
    let linkage = if func.internal { " internal" } else { "" };
    writeln!(out, "func @{}({}){} {{", func.name, params, linkage).unwrap();
    for block in &func.blocks {
        writeln!(out, "{}:", block.label).unwrap();
        for inst in &block.insts {
            writeln!(out, "  {}", print_inst(func, inst)).unwrap();
        }
    }
    writeln!(out, "}}").unwrap();
}

fn print_inst(func: &Function, inst: &Inst) -> String {
    let v = |id: &u32| format!("%{}", func.value_name(*id));
    match inst {
        Inst::Const { dest, value } => format!("{} = const {}", v(dest), value),
        Inst::Binary { op, dest, lhs, rhs } => {
            format!("{} = {} {}, {}", v(dest), op.mnemonic(), v(lhs), v(rhs))
        }
        Inst::Call { dest, callee, args } => {
            let args = args.iter().map(|a| v(a)).collect::<Vec<_>>().join(", ");
            match dest {
                Some(dest) => format!("{} = call @{}({})", v(dest), callee, args),
                None => format!("call @{callee}({args})"),
            }
        }
        Inst::Retain { value } => format!("retain {}", v(value)),
        Inst::Release { value } => format!("release {}", v(value)),
        Inst::RcAdjust { value, delta } => format!("rc.adjust {}, {}", v(value), delta),
        Inst::Ret { value: Some(value) } => format!("ret {}", v(value)),
        Inst::Ret { value: None } => "ret".to_string(),
        Inst::Br { target } => format!("br {target}"),
        Inst::CondBr {
            cond,
            then_target,
            else_target,
        } => format!("cond_br {}, {}, {}", v(cond), then_target, else_target),
    }
}
