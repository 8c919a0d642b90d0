//! Function-scope scalar passes.
//!
//! Each pass takes one function body and reports whether it changed anything;
//! the executor re-runs the list until a fixpoint. Passes that only redirect
//! uses leave the stale definitions behind for dead-code elimination.

use crate::ir::{BinOp, Function, Inst, ValueId};
use crate::session::CompilationSession;

/// Fold binary operations whose operands are both constants.
pub fn const_fold(func: &mut Function) -> bool {
    let consts = func.const_values();
    let mut changed = false;
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            if let Inst::Binary { op, dest, lhs, rhs } = inst {
                if let (Some(&l), Some(&r)) = (consts.get(lhs), consts.get(rhs)) {
                    *inst = Inst::Const {
                        dest: *dest,
                        value: op.apply(l, r),
                    };
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Peephole algebraic identities: x+0, 0+x, x-0, x*1, 1*x collapse to the
/// surviving operand; x*0 and 0*x collapse to the constant zero.
pub fn simplify(func: &mut Function) -> bool {
    let consts = func.const_values();
    let mut redirects: Vec<(ValueId, ValueId)> = Vec::new();
    let mut changed = false;
    for block in &mut func.blocks {
        for inst in &mut block.insts {
            let Inst::Binary { op, dest, lhs, rhs } = *inst else {
                continue;
            };
            let lhs_const = consts.get(&lhs).copied();
            let rhs_const = consts.get(&rhs).copied();
            match op {
                BinOp::Add => {
                    if rhs_const == Some(0) {
                        redirects.push((dest, lhs));
                    } else if lhs_const == Some(0) {
                        redirects.push((dest, rhs));
                    }
                }
                BinOp::Sub => {
                    if rhs_const == Some(0) {
                        redirects.push((dest, lhs));
                    }
                }
                BinOp::Mul => {
                    if rhs_const == Some(0) || lhs_const == Some(0) {
                        *inst = Inst::Const { dest, value: 0 };
                        changed = true;
                    } else if rhs_const == Some(1) {
                        redirects.push((dest, lhs));
                    } else if lhs_const == Some(1) {
                        redirects.push((dest, rhs));
                    }
                }
            }
        }
    }
    for (from, to) in redirects {
        changed |= func.replace_all_uses(from, to);
    }
    changed
}

/// Local value numbering: within one block, later pure instructions identical
/// to an earlier one are redirected to the first result.
pub fn cse(func: &mut Function) -> bool {
    #[derive(PartialEq, Eq, Hash)]
    enum Key {
        Const(i64),
        Binary(BinOp, ValueId, ValueId),
    }

    let mut redirects: Vec<(ValueId, ValueId)> = Vec::new();
    for block in &func.blocks {
        let mut seen: hashbrown::HashMap<Key, ValueId> = hashbrown::HashMap::new();
        for inst in &block.insts {
            let (key, dest) = match *inst {
                Inst::Const { dest, value } => (Key::Const(value), dest),
                Inst::Binary { op, dest, lhs, rhs } => (Key::Binary(op, lhs, rhs), dest),
                _ => continue,
            };
            match seen.get(&key) {
                Some(&prior) => redirects.push((dest, prior)),
                None => {
                    seen.insert(key, dest);
                }
            }
        }
    }
    let mut changed = false;
    for (from, to) in redirects {
        changed |= func.replace_all_uses(from, to);
    }
    changed
}

/// Remove pure instructions whose result is never read. Returns the number of
/// instructions deleted; cascading removal is handled by the fixpoint loop.
pub fn dce(func: &mut Function, session: &CompilationSession<'_>) -> usize {
    let value_count = func.value_count() as usize;
    let mut used = bumpalo::collections::Vec::from_iter_in(
        std::iter::repeat(false).take(value_count),
        session.arena(),
    );
    for block in &func.blocks {
        for inst in &block.insts {
            for operand in inst.operands() {
                used[operand as usize] = true;
            }
        }
    }
    let mut removed = 0;
    for block in &mut func.blocks {
        block.insts.retain(|inst| {
            let dead = inst.is_pure() && inst.dest().is_some_and(|d| !used[d as usize]);
            if dead {
                removed += 1;
            }
            !dead
        });
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser;
    use bumpalo::Bump;

    fn function_of(source: &str) -> Function {
        let mut module = parser::parse(source).expect("test IR should parse").into_module();
        module.functions.remove(0)
    }

    #[test]
    fn test_const_fold_add() {
        let mut func = function_of(
            "func @f() {\nentry:\n  %a = const 40\n  %b = const 2\n  %c = add %a, %b\n  ret %c\n}\n",
        );
        assert!(const_fold(&mut func));
        assert_eq!(
            func.blocks[0].insts[2],
            Inst::Const { dest: 2, value: 42 }
        );
        assert!(!const_fold(&mut func));
    }

    #[test]
    fn test_simplify_add_zero() {
        let mut func = function_of(
            "func @f(%x) {\nentry:\n  %z = const 0\n  %y = add %x, %z\n  ret %y\n}\n",
        );
        assert!(simplify(&mut func));
        assert_eq!(func.blocks[0].insts[2], Inst::Ret { value: Some(0) });
    }

    #[test]
    fn test_simplify_mul_zero() {
        let mut func = function_of(
            "func @f(%x) {\nentry:\n  %z = const 0\n  %y = mul %x, %z\n  ret %y\n}\n",
        );
        assert!(simplify(&mut func));
        assert_eq!(func.blocks[0].insts[1], Inst::Const { dest: 2, value: 0 });
    }

    #[test]
    fn test_cse_deduplicates_within_block() {
        let mut func = function_of(
            "func @f(%x) {\nentry:\n  %a = add %x, %x\n  %b = add %x, %x\n  %c = add %a, %b\n  ret %c\n}\n",
        );
        assert!(cse(&mut func));
        match &func.blocks[0].insts[2] {
            Inst::Binary { lhs, rhs, .. } => {
                assert_eq!(*lhs, 1);
                assert_eq!(*rhs, 1);
            }
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn test_dce_removes_unused_pure_defs() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut func = function_of(
            "func @f() {\nentry:\n  %a = const 1\n  %b = const 2\n  ret %b\n}\n",
        );
        assert_eq!(dce(&mut func, &session), 1);
        assert_eq!(func.blocks[0].insts.len(), 2);
        assert_eq!(dce(&mut func, &session), 0);
    }

    #[test]
    fn test_dce_keeps_impure_instructions() {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut func = function_of(
            "func @f(%x) {\nentry:\n  %r = call @effect(%x)\n  retain %x\n  ret\n}\n",
        );
        assert_eq!(dce(&mut func, &session), 0);
        assert_eq!(func.blocks[0].insts.len(), 3);
    }
}
