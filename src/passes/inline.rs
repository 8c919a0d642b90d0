//! Module-scope inlining and global dead-code elimination.

use crate::ir::{Function, Inst, Module, ValueId};
use std::collections::HashMap;

/// Inline calls to small single-block functions.
///
/// A callee qualifies when it has a body consisting of exactly one block that
/// ends in `ret`, its instruction count is within `threshold`, and it is not
/// the caller itself. Inlined bodies are spliced in place of the call; the
/// call's result is redirected to the callee's returned value.
pub fn inline(module: &mut Module, threshold: u32) -> bool {
    let candidates: HashMap<String, Function> = module
        .functions
        .iter()
        .filter(|f| {
            !f.is_declaration()
                && f.blocks.len() == 1
                && f.inst_count() <= threshold as usize
                && matches!(f.blocks[0].insts.last(), Some(Inst::Ret { .. }))
        })
        .map(|f| (f.name.clone(), f.clone()))
        .collect();
    if candidates.is_empty() {
        return false;
    }

    let mut changed = false;
    for caller_idx in 0..module.functions.len() {
        let caller_name = module.functions[caller_idx].name.clone();
        for block_idx in 0..module.functions[caller_idx].blocks.len() {
            let mut rewritten: Option<Vec<Inst>> = None;
            let mut redirects: Vec<(ValueId, ValueId)> = Vec::new();
            let inst_count = module.functions[caller_idx].blocks[block_idx].insts.len();
            for inst_idx in 0..inst_count {
                let inst = module.functions[caller_idx].blocks[block_idx].insts[inst_idx].clone();
                let splice = match &inst {
                    Inst::Call { dest, callee, args } if *callee != caller_name => candidates
                        .get(callee)
                        .filter(|candidate| candidate.params.len() == args.len())
                        .and_then(|candidate| {
                            splice_body(
                                &mut module.functions[caller_idx],
                                candidate,
                                *dest,
                                args,
                                &mut redirects,
                            )
                        }),
                    _ => None,
                };
                match splice {
                    Some(mut body) => {
                        let out = rewritten.get_or_insert_with(|| {
                            module.functions[caller_idx].blocks[block_idx].insts[..inst_idx]
                                .to_vec()
                        });
                        out.append(&mut body);
                        changed = true;
                    }
                    None => {
                        if let Some(out) = rewritten.as_mut() {
                            out.push(inst);
                        }
                    }
                }
            }
            if let Some(insts) = rewritten {
                module.functions[caller_idx].blocks[block_idx].insts = insts;
            }
            for (from, to) in redirects {
                module.functions[caller_idx].replace_all_uses(from, to);
            }
        }
    }
    changed
}

/// Clone the candidate's body into the caller's value space. Returns the
/// instructions to splice, or `None` when the call's result shape does not
/// match the callee's return.
fn splice_body(
    caller: &mut Function,
    callee: &Function,
    call_dest: Option<ValueId>,
    args: &[ValueId],
    redirects: &mut Vec<(ValueId, ValueId)>,
) -> Option<Vec<Inst>> {
    let body = &callee.blocks[0].insts;
    let returned = match body.last() {
        Some(Inst::Ret { value }) => *value,
        _ => return None,
    };
    if call_dest.is_some() && returned.is_none() {
        return None;
    }

    // Parameters map to the call arguments; everything else gets a fresh id.
    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    for (idx, arg) in args.iter().enumerate() {
        value_map.insert(idx as ValueId, *arg);
    }
    for id in callee.params.len() as u32..callee.value_count() {
        // Suffix with the fresh id so repeated inlines keep names unique.
        let name = format!("{}.{}.{}", callee.name, callee.value_name(id), caller.value_count());
        let fresh = caller.alloc_value(name);
        value_map.insert(id, fresh);
    }

    let mut spliced = Vec::with_capacity(body.len() - 1);
    for inst in &body[..body.len() - 1] {
        spliced.push(remap(inst, &value_map));
    }
    if let (Some(dest), Some(returned)) = (call_dest, returned) {
        redirects.push((dest, value_map[&returned]));
    }
    Some(spliced)
}

fn remap(inst: &Inst, map: &HashMap<ValueId, ValueId>) -> Inst {
    let m = |id: ValueId| map[&id];
    match inst {
        Inst::Const { dest, value } => Inst::Const {
            dest: m(*dest),
            value: *value,
        },
        Inst::Binary { op, dest, lhs, rhs } => Inst::Binary {
            op: *op,
            dest: m(*dest),
            lhs: m(*lhs),
            rhs: m(*rhs),
        },
        Inst::Call { dest, callee, args } => Inst::Call {
            dest: dest.map(m),
            callee: callee.clone(),
            args: args.iter().map(|a| m(*a)).collect(),
        },
        Inst::Retain { value } => Inst::Retain { value: m(*value) },
        Inst::Release { value } => Inst::Release { value: m(*value) },
        Inst::RcAdjust { value, delta } => Inst::RcAdjust {
            value: m(*value),
            delta: *delta,
        },
        Inst::Ret { value } => Inst::Ret {
            value: value.map(m),
        },
        Inst::Br { target } => Inst::Br {
            target: target.clone(),
        },
        Inst::CondBr {
            cond,
            then_target,
            else_target,
        } => Inst::CondBr {
            cond: m(*cond),
            then_target: then_target.clone(),
            else_target: else_target.clone(),
        },
    }
}

/// Drop internal functions no remaining call refers to.
pub fn global_dce(module: &mut Module) -> bool {
    let called: Vec<String> = module
        .called_symbols()
        .into_iter()
        .map(str::to_string)
        .collect();
    let before = module.functions.len();
    module
        .functions
        .retain(|f| !f.internal || called.iter().any(|c| c == &f.name));
    before != module.functions.len()
}
