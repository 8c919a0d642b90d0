//! Reference-count optimization passes.
//!
//! Both passes are installed through fixed extension hooks on every pass
//! plan. `reduce` merges and cancels reference-count traffic once the scalar
//! passes have simplified the surrounding code; `expand` rewrites the fused
//! `rc.adjust` form into retain/release primitives and must be the last
//! module-level optimization, so nothing downstream ever sees the expanded
//! form before code generation.

use crate::ir::{Inst, Module};

/// Merge adjacent reference-count operations on the same value and drop
/// net-zero traffic.
pub fn reduce(module: &mut Module) -> bool {
    let mut changed = false;
    for func in &mut module.functions {
        for block in &mut func.blocks {
            let mut out: Vec<Inst> = Vec::with_capacity(block.insts.len());
            for inst in block.insts.drain(..) {
                let Some(value) = inst.rc_value() else {
                    out.push(inst);
                    continue;
                };
                let delta = inst.rc_delta().unwrap_or(0);
                if let Some(last) = out.last_mut() {
                    if last.rc_value() == Some(value) {
                        let combined = last.rc_delta().unwrap_or(0) + delta;
                        changed = true;
                        if combined == 0 {
                            out.pop();
                        } else {
                            *last = Inst::RcAdjust {
                                value,
                                delta: combined,
                            };
                        }
                        continue;
                    }
                }
                if delta == 0 {
                    changed = true;
                    continue;
                }
                out.push(inst);
            }
            block.insts = out;
        }
    }
    changed
}

/// Split every fused `rc.adjust` into its primitive retain/release steps.
pub fn expand(module: &mut Module) -> bool {
    let mut changed = false;
    for func in &mut module.functions {
        for block in &mut func.blocks {
            if !block
                .insts
                .iter()
                .any(|i| matches!(i, Inst::RcAdjust { .. }))
            {
                continue;
            }
            changed = true;
            let mut out: Vec<Inst> = Vec::with_capacity(block.insts.len());
            for inst in block.insts.drain(..) {
                match inst {
                    Inst::RcAdjust { value, delta } => {
                        for _ in 0..delta.unsigned_abs() {
                            if delta > 0 {
                                out.push(Inst::Retain { value });
                            } else {
                                out.push(Inst::Release { value });
                            }
                        }
                    }
                    other => out.push(other),
                }
            }
            block.insts = out;
        }
    }
    changed
}
