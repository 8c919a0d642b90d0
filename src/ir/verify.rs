//! Structural module verification.
//!
//! The verifier checks invariants that earlier pipeline stages are required
//! to uphold: well-formed blocks, terminator placement, resolvable branch
//! targets, single assignment, and intra-block definition order. A failure
//! here is an internal-consistency violation in whatever produced or
//! transformed the module, never a user-facing condition.

use super::{Function, Inst, Module, ValueId};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("function @{function} has no blocks")]
    NoBlocks { function: String },

    #[error("function @{function}: block '{block}' is empty")]
    EmptyBlock { function: String, block: String },

    #[error("function @{function}: block '{block}' does not end in a terminator")]
    MissingTerminator { function: String, block: String },

    #[error("function @{function}: terminator before the end of block '{block}'")]
    EarlyTerminator { function: String, block: String },

    #[error("function @{function}: branch to unknown block '{target}'")]
    UnknownBranchTarget { function: String, target: String },

    #[error("function @{function}: value id {id} is out of range")]
    ValueOutOfRange { function: String, id: ValueId },

    #[error("function @{function}: value %{name} defined more than once")]
    Redefinition { function: String, name: String },

    #[error("function @{function}: block '{block}' uses %{name} before its definition")]
    UseBeforeDef {
        function: String,
        block: String,
        name: String,
    },
}

/// Verify every bodied function in the module.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for func in &module.functions {
        if !func.is_declaration() {
            verify_function(func)?;
        }
    }
    Ok(())
}

/// Verify one function body.
pub fn verify_function(func: &Function) -> Result<(), VerifyError> {
    let name = || func.name.clone();
    if func.blocks.is_empty() {
        return Err(VerifyError::NoBlocks { function: name() });
    }

    let value_count = func.value_count();
    let check_id = |id: ValueId| -> Result<(), VerifyError> {
        if id >= value_count {
            Err(VerifyError::ValueOutOfRange {
                function: name(),
                id,
            })
        } else {
            Ok(())
        }
    };

    // Definition sites: parameters first, then instruction dests.
    let mut defs: HashMap<ValueId, (usize, usize)> = HashMap::new();
    for param in 0..func.params.len() {
        defs.insert(param as ValueId, (0, 0));
    }
    for (block_idx, block) in func.blocks.iter().enumerate() {
        for (inst_idx, inst) in block.insts.iter().enumerate() {
            if let Some(dest) = inst.dest() {
                check_id(dest)?;
                if defs.insert(dest, (block_idx, inst_idx)).is_some() {
                    return Err(VerifyError::Redefinition {
                        function: name(),
                        name: func.value_name(dest).to_string(),
                    });
                }
            }
        }
    }

    for (block_idx, block) in func.blocks.iter().enumerate() {
        let Some(last) = block.insts.last() else {
            return Err(VerifyError::EmptyBlock {
                function: name(),
                block: block.label.clone(),
            });
        };
        if !last.is_terminator() {
            return Err(VerifyError::MissingTerminator {
                function: name(),
                block: block.label.clone(),
            });
        }
        for (inst_idx, inst) in block.insts.iter().enumerate() {
            if inst.is_terminator() && inst_idx + 1 != block.insts.len() {
                return Err(VerifyError::EarlyTerminator {
                    function: name(),
                    block: block.label.clone(),
                });
            }
            for target in branch_targets(inst) {
                if func.block(target).is_none() {
                    return Err(VerifyError::UnknownBranchTarget {
                        function: name(),
                        target: target.to_string(),
                    });
                }
            }
            for operand in inst.operands() {
                check_id(operand)?;
                // Within a block, an operand defined later in the same block
                // is a use before definition. Cross-block ordering is the
                // producer's responsibility.
                if let Some(&(def_block, def_inst)) = defs.get(&operand) {
                    let is_param = (operand as usize) < func.params.len();
                    if !is_param && def_block == block_idx && def_inst >= inst_idx {
                        return Err(VerifyError::UseBeforeDef {
                            function: name(),
                            block: block.label.clone(),
                            name: func.value_name(operand).to_string(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

fn branch_targets(inst: &Inst) -> Vec<&str> {
    match inst {
        Inst::Br { target } => vec![target.as_str()],
        Inst::CondBr {
            then_target,
            else_target,
            ..
        } => vec![then_target.as_str(), else_target.as_str()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser;

    fn module_of(source: &str) -> Module {
        parser::parse(source).expect("test IR should parse").into_module()
    }

    #[test]
    fn test_well_formed_module_verifies() {
        let module = module_of(
            "func @f(%x) {\nentry:\n  %y = mul %x, %x\n  cond_br %y, done, again\nagain:\n  br done\ndone:\n  ret %y\n}\n",
        );
        assert!(verify_module(&module).is_ok());
    }

    #[test]
    fn test_missing_terminator() {
        let module = module_of("func @f() {\nentry:\n  %a = const 1\n  ret %a\n}\n");
        // Drop the terminator after parsing.
        let mut module = module;
        module.functions[0].blocks[0].insts.pop();
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, VerifyError::MissingTerminator { .. }));
    }

    #[test]
    fn test_unknown_branch_target() {
        let module = module_of("func @f() {\nentry:\n  br nowhere\n}\n");
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(
            err,
            VerifyError::UnknownBranchTarget { ref target, .. } if target == "nowhere"
        ));
    }

    #[test]
    fn test_early_terminator() {
        let mut module = module_of("func @f() {\nentry:\n  ret\n}\n");
        module.functions[0].blocks[0]
            .insts
            .push(crate::ir::Inst::Ret { value: None });
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, VerifyError::EarlyTerminator { .. }));
    }

    #[test]
    fn test_use_before_def_in_block() {
        let mut module = module_of("func @f() {\nentry:\n  %a = const 1\n  ret %a\n}\n");
        // Swap the definition below its use.
        module.functions[0].blocks[0].insts.swap(0, 1);
        let err = verify_module(&module).unwrap_err();
        assert!(matches!(err, VerifyError::UseBeforeDef { .. }));
    }

    #[test]
    fn test_declarations_are_skipped() {
        let module = module_of("declare @ext(%a)\n");
        assert!(verify_module(&module).is_ok());
    }
}
