//! The two-tier optimization pipeline.
//!
//! [`build_pass_plan`] is a pure function from the optimization level to an
//! immutable [`PassPlan`]: an ordered list of function-scope pass descriptors
//! and an ordered list of module-scope pass descriptors. Descriptors are
//! plain tagged variants; [`PassExecutor`] resolves each to its executable
//! pass and runs the plan:
//!
//! - function passes run to a fixpoint per bodied function, before any
//!   module pass;
//! - module passes run exactly once each, in plan order.
//!
//! Two fixed extension hooks are registered on every plan regardless of
//! level. The late scalar hook installs reference-count traffic reduction
//! after the other scalar module passes; the final hook installs
//! reference-count expansion as the very last module pass. Both passes
//! internally no-op at O0.

use crate::config::OptLevel;
use crate::ir::{verify, Module};
use crate::session::CompilationSession;

pub mod inline;
pub mod rc;
pub mod scalar;

/// Inlining size threshold at O1/O2, matching the historical default.
const INLINE_THRESHOLD: u32 = 200;
/// More permissive threshold at O3.
const INLINE_THRESHOLD_AGGRESSIVE: u32 = 275;

/// Cap on fixpoint iterations per function, against oscillating pass pairs.
const MAX_FIXPOINT_ITERATIONS: usize = 8;

/// Function-scope pass descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionPassKind {
    ConstFold,
    Simplify,
    Cse,
    Dce,
}

impl FunctionPassKind {
    pub fn name(self) -> &'static str {
        match self {
            FunctionPassKind::ConstFold => "const-fold",
            FunctionPassKind::Simplify => "simplify",
            FunctionPassKind::Cse => "cse",
            FunctionPassKind::Dce => "dce",
        }
    }
}

/// Module-scope pass descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulePassKind {
    Inline { threshold: u32 },
    GlobalDce,
    RcReduce { enabled: bool },
    RcExpand { enabled: bool },
}

impl ModulePassKind {
    pub fn name(self) -> &'static str {
        match self {
            ModulePassKind::Inline { .. } => "inline",
            ModulePassKind::GlobalDce => "global-dce",
            ModulePassKind::RcReduce { .. } => "rc-reduce",
            ModulePassKind::RcExpand { .. } => "rc-expand",
        }
    }
}

/// Immutable, ordered pass lists for one run. Consumed, not retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassPlan {
    pub function_passes: Vec<FunctionPassKind>,
    pub module_passes: Vec<ModulePassKind>,
}

/// Where an extension hook's passes land in the module pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionPoint {
    /// After the general scalar module passes.
    ScalarOptimizerLate,
    /// After every other module pass.
    OptimizerLast,
}

/// An extension installs passes for its point given the optimization level.
pub type ExtensionHook = fn(OptLevel, &mut Vec<ModulePassKind>);

/// Assembles a [`PassPlan`] from the optimization level and the registered
/// extension hooks. Building has no side effects; the result is a plain
/// descriptor list.
pub struct PassPlanBuilder {
    opt_level: OptLevel,
    extensions: Vec<(ExtensionPoint, ExtensionHook)>,
}

impl PassPlanBuilder {
    pub fn new(opt_level: OptLevel) -> Self {
        Self {
            opt_level,
            extensions: Vec::new(),
        }
    }

    pub fn add_extension(mut self, point: ExtensionPoint, hook: ExtensionHook) -> Self {
        self.extensions.push((point, hook));
        self
    }

    pub fn build(self) -> PassPlan {
        let level = self.opt_level;
        let mut function_passes = Vec::new();
        if level.optimizes() {
            function_passes.push(FunctionPassKind::ConstFold);
            function_passes.push(FunctionPassKind::Simplify);
            if level >= OptLevel::O2 {
                function_passes.push(FunctionPassKind::Cse);
            }
            function_passes.push(FunctionPassKind::Dce);
        }

        let mut module_passes = Vec::new();
        if level.optimizes() {
            let threshold = if level >= OptLevel::O3 {
                INLINE_THRESHOLD_AGGRESSIVE
            } else {
                INLINE_THRESHOLD
            };
            module_passes.push(ModulePassKind::Inline { threshold });
            module_passes.push(ModulePassKind::GlobalDce);
        }
        self.run_hooks(ExtensionPoint::ScalarOptimizerLate, &mut module_passes);
        self.run_hooks(ExtensionPoint::OptimizerLast, &mut module_passes);

        PassPlan {
            function_passes,
            module_passes,
        }
    }

    fn run_hooks(&self, point: ExtensionPoint, passes: &mut Vec<ModulePassKind>) {
        for (registered, hook) in &self.extensions {
            if *registered == point {
                hook(self.opt_level, passes);
            }
        }
    }
}

fn add_rc_reduce_pass(level: OptLevel, passes: &mut Vec<ModulePassKind>) {
    passes.push(ModulePassKind::RcReduce {
        enabled: level.optimizes(),
    });
}

fn add_rc_expand_pass(level: OptLevel, passes: &mut Vec<ModulePassKind>) {
    passes.push(ModulePassKind::RcExpand {
        enabled: level.optimizes(),
    });
}

/// Build the standard plan for a level, with the two fixed hooks registered.
pub fn build_pass_plan(opt_level: OptLevel) -> PassPlan {
    PassPlanBuilder::new(opt_level)
        .add_extension(ExtensionPoint::ScalarOptimizerLate, add_rc_reduce_pass)
        .add_extension(ExtensionPoint::OptimizerLast, add_rc_expand_pass)
        .build()
}

/// Resolves pass descriptors to executable passes and runs a plan over a
/// module, recording what ran into the session.
pub struct PassExecutor<'s, 'arena> {
    session: &'s mut CompilationSession<'arena>,
    verify: bool,
}

impl<'s, 'arena> PassExecutor<'s, 'arena> {
    pub fn new(session: &'s mut CompilationSession<'arena>, verify: bool) -> Self {
        Self { session, verify }
    }

    /// Run the whole plan. Verification, when configured, runs before the
    /// function passes and again after the last module pass; a verification
    /// failure is an internal-consistency violation in an earlier stage and
    /// aborts the process.
    pub fn run(&mut self, module: &mut Module, plan: &PassPlan) {
        log::debug!(
            "optimizing: {} function pass(es), {} module pass(es)",
            plan.function_passes.len(),
            plan.module_passes.len()
        );
        for idx in 0..module.functions.len() {
            if module.functions[idx].is_declaration() {
                continue;
            }
            if self.verify {
                if let Err(err) = verify::verify_function(&module.functions[idx]) {
                    panic!("module verification failed: {err}");
                }
                self.session.record_function_pass("verify", false);
            }
            let mut iterations = 0;
            loop {
                iterations += 1;
                let mut changed = false;
                for pass in &plan.function_passes {
                    changed |= self.run_function_pass(*pass, module, idx);
                }
                if !changed || iterations >= MAX_FIXPOINT_ITERATIONS {
                    break;
                }
            }
            self.session.record_function_optimized(iterations);
        }

        for pass in &plan.module_passes {
            let changed = self.run_module_pass(*pass, module);
            self.session.record_module_pass(pass.name(), changed);
            log::trace!("module pass {}: changed={}", pass.name(), changed);
        }

        if self.verify {
            if let Err(err) = verify::verify_module(module) {
                panic!("module verification failed: {err}");
            }
            self.session.record_module_pass("verify", false);
        }
    }

    fn run_function_pass(
        &mut self,
        pass: FunctionPassKind,
        module: &mut Module,
        func_idx: usize,
    ) -> bool {
        let func = &mut module.functions[func_idx];
        let changed = match pass {
            FunctionPassKind::ConstFold => scalar::const_fold(func),
            FunctionPassKind::Simplify => scalar::simplify(func),
            FunctionPassKind::Cse => scalar::cse(func),
            FunctionPassKind::Dce => {
                let removed = scalar::dce(func, self.session);
                self.session.record_instructions_removed(removed);
                removed > 0
            }
        };
        self.session.record_function_pass(pass.name(), changed);
        changed
    }

    fn run_module_pass(&mut self, pass: ModulePassKind, module: &mut Module) -> bool {
        match pass {
            ModulePassKind::Inline { threshold } => inline::inline(module, threshold),
            ModulePassKind::GlobalDce => inline::global_dce(module),
            ModulePassKind::RcReduce { enabled } => enabled && rc::reduce(module),
            ModulePassKind::RcExpand { enabled } => enabled && rc::expand(module),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parser;
    use bumpalo::Bump;

    fn module_of(source: &str) -> Module {
        parser::parse(source).expect("test IR should parse").into_module()
    }

    #[test]
    fn test_o0_plan_has_no_inliner() {
        let plan = build_pass_plan(OptLevel::O0);
        assert!(plan.function_passes.is_empty());
        assert!(!plan
            .module_passes
            .iter()
            .any(|p| matches!(p, ModulePassKind::Inline { .. })));
        // The hook-installed passes are present but disabled.
        assert_eq!(
            plan.module_passes,
            vec![
                ModulePassKind::RcReduce { enabled: false },
                ModulePassKind::RcExpand { enabled: false },
            ]
        );
    }

    #[test]
    fn test_optimized_plan_ordering() {
        let plan = build_pass_plan(OptLevel::O2);
        assert_eq!(
            plan.module_passes,
            vec![
                ModulePassKind::Inline { threshold: 200 },
                ModulePassKind::GlobalDce,
                ModulePassKind::RcReduce { enabled: true },
                ModulePassKind::RcExpand { enabled: true },
            ]
        );
        assert_eq!(
            plan.function_passes,
            vec![
                FunctionPassKind::ConstFold,
                FunctionPassKind::Simplify,
                FunctionPassKind::Cse,
                FunctionPassKind::Dce,
            ]
        );
    }

    #[test]
    fn test_o3_raises_inline_threshold() {
        let plan = build_pass_plan(OptLevel::O3);
        assert!(plan
            .module_passes
            .contains(&ModulePassKind::Inline { threshold: 275 }));
    }

    #[test]
    fn test_rc_expand_runs_last() {
        let mut module = module_of(
            "func @f(%x) {\nentry:\n  rc.adjust %x, 2\n  ret\n}\n",
        );
        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);
        let plan = build_pass_plan(OptLevel::O2);
        PassExecutor::new(&mut session, false).run(&mut module, &plan);

        let executed = &session.stats().executed_module_passes;
        assert_eq!(executed.last(), Some(&"rc-expand"));
        let reduce_pos = executed.iter().position(|p| *p == "rc-reduce").unwrap();
        for scalar_pass in ["inline", "global-dce"] {
            let pos = executed.iter().position(|p| *p == scalar_pass).unwrap();
            assert!(pos < reduce_pos);
        }
        // The fused form is gone after the final pass.
        let block = &module.functions[0].blocks[0];
        assert!(block
            .insts
            .iter()
            .all(|i| !matches!(i, crate::ir::Inst::RcAdjust { .. })));
    }

    #[test]
    fn test_o0_executor_leaves_fused_ops_alone() {
        let mut module = module_of(
            "func @f(%x) {\nentry:\n  rc.adjust %x, 2\n  ret\n}\n",
        );
        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);
        let plan = build_pass_plan(OptLevel::O0);
        PassExecutor::new(&mut session, false).run(&mut module, &plan);

        assert!(matches!(
            module.functions[0].blocks[0].insts[0],
            crate::ir::Inst::RcAdjust { .. }
        ));
        // Both hook passes still executed, as no-ops.
        assert_eq!(
            session.stats().executed_module_passes,
            vec!["rc-reduce", "rc-expand"]
        );
    }

    #[test]
    fn test_fixpoint_cascades_folding() {
        let mut module = module_of(
            "func @f() {\nentry:\n  %a = const 2\n  %b = const 3\n  %c = mul %a, %b\n  %d = add %c, %a\n  ret %d\n}\n",
        );
        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);
        let plan = build_pass_plan(OptLevel::O1);
        PassExecutor::new(&mut session, true).run(&mut module, &plan);

        // Everything folds into a single constant return.
        let block = &module.functions[0].blocks[0];
        assert_eq!(block.insts.len(), 2);
        assert!(matches!(
            block.insts[0],
            crate::ir::Inst::Const { value: 8, .. }
        ));
    }

    #[test]
    #[should_panic(expected = "module verification failed")]
    fn test_verification_failure_is_fatal() {
        let mut module = module_of("func @f() {\nentry:\n  ret\n}\n");
        // Corrupt the body behind the parser's back.
        module.functions[0].blocks[0].insts.clear();
        module.functions[0]
            .blocks[0]
            .insts
            .push(crate::ir::Inst::Const { dest: 0, value: 1 });
        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);
        let plan = build_pass_plan(OptLevel::O0);
        PassExecutor::new(&mut session, true).run(&mut module, &plan);
    }
}
