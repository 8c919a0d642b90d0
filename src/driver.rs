//! The backend pipeline driver.
//!
//! One run moves through a fixed sequence of stages, each either producing
//! the input for the next or aborting the whole run:
//!
//! ```text
//! resolve target -> create machine -> stamp module (triple, flags, layout)
//!   -> acquire IR from the frontend collaborator
//!   -> frontend error gate
//!   -> open output destination
//!   -> optimize (function passes to fixpoint, then module passes)
//!   -> emit artifact
//! ```
//!
//! Every recoverable failure is reported exactly once through the diagnostic
//! sink and aborts with no partial artifact; the output-file guard unlinks
//! anything half-written. A frontend failure aborts silently, its details
//! were already reported by the collaborator that produced them.

use crate::config::PipelineConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use crate::emit::{self, EmitError, OutputFile};
use crate::error::{PipelineError, PipelineResult};
use crate::frontend::IrEmitter;
use crate::ir::Module;
use crate::passes::{build_pass_plan, PassExecutor};
use crate::session::CompilationSession;
use crate::target::{MachineOptions, TargetRegistry};
use bumpalo::Bump;
use std::io;
use std::path::PathBuf;

/// Module flag key carrying the debug-metadata version tag.
pub const DEBUG_VERSION_FLAG: &str = "Debug Version";

/// Sequences one compilation pipeline run. Borrows its configuration for the
/// run's duration; owns the target registry used for resolution.
pub struct PipelineDriver<'a> {
    config: &'a PipelineConfig,
    registry: TargetRegistry,
}

impl<'a> PipelineDriver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self::with_registry(config, TargetRegistry::with_builtin_targets())
    }

    /// Use a caller-assembled registry, e.g. with extra backends registered.
    pub fn with_registry(config: &'a PipelineConfig, registry: TargetRegistry) -> Self {
        Self { config, registry }
    }

    /// Run the pipeline on a driver-owned module and return it. For the
    /// `InMemoryModule` output kind the returned module is the artifact.
    pub fn run(
        &self,
        emitter: &mut dyn IrEmitter,
        start_element: usize,
        sink: &mut dyn DiagnosticSink,
    ) -> PipelineResult<Module> {
        let name = self
            .config
            .output_path
            .as_deref()
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let mut module = Module::new(name);
        self.run_with_module(&mut module, emitter, start_element, sink)?;
        Ok(module)
    }

    /// Run the pipeline on a caller-owned module. Exactly one module and one
    /// target machine exist for the duration of the run.
    pub fn run_with_module(
        &self,
        module: &mut Module,
        emitter: &mut dyn IrEmitter,
        start_element: usize,
        sink: &mut dyn DiagnosticSink,
    ) -> PipelineResult<()> {
        let config = self.config;

        let target = match self.registry.lookup(&config.target_triple) {
            Ok(target) => target,
            Err(err) => {
                sink.report(Diagnostic::new(
                    DiagnosticKind::UnknownTarget,
                    format!("{}: {}", config.target_triple, err),
                ));
                return Err(PipelineError::UnknownTarget {
                    triple: config.target_triple.clone(),
                    reason: err.to_string(),
                });
            }
        };
        log::debug!(
            "resolved target '{}' for {}",
            target.name(),
            config.target_triple
        );

        let options = MachineOptions::from_config(config);
        let machine = match target.create_machine(&config.target_triple, &options) {
            Ok(machine) => machine,
            Err(err) => {
                sink.report(Diagnostic::new(
                    DiagnosticKind::TargetMachineCreationFailed,
                    format!("{}: {}", config.target_triple, err),
                ));
                return Err(PipelineError::TargetMachineCreation {
                    triple: config.target_triple.clone(),
                    reason: err.to_string(),
                });
            }
        };

        // Stamp the module before anything is emitted into it. The layout
        // string comes from the machine, never from anywhere else.
        module.set_target_triple(config.target_triple.clone());
        module.set_flag(DEBUG_VERSION_FLAG, config.debug_metadata_version);
        module.set_data_layout(machine.data_layout());

        log::debug!("acquiring IR starting at element {start_element}");
        if emitter.emit_into(module, start_element).is_err() {
            // Already reported by the frontend; abort with no output and no
            // report of our own.
            log::debug!("aborting: frontend reported errors");
            return Err(PipelineError::FrontendErrors);
        }
        log::trace!("module before passes:\n{module}");

        // The destination is opened before any pass runs; from here on the
        // guard owns the path and unlinks it on every non-commit exit.
        let mut output = self.open_output(sink)?;

        let arena = Bump::new();
        let mut session = CompilationSession::new(&arena);
        let plan = build_pass_plan(config.opt_level);
        PassExecutor::new(&mut session, config.verify).run(module, &plan);
        log::debug!("{}", session.stats());

        let bytes = match emit::render_artifact(module, machine.as_ref(), config) {
            Ok(bytes) => bytes,
            Err(err) => return Err(self.report_emit_error(err, sink)),
        };
        if let (Some(bytes), Some(out)) = (bytes, output.as_mut()) {
            let path = out.path().to_path_buf();
            let write_result = out.write_all(&bytes);
            if let Err(err) = self.finish_output(output.take(), write_result, &path, sink) {
                return Err(err);
            }
            log::info!(
                "emitted {:?} ({} bytes) to {}",
                config.output_kind,
                bytes.len(),
                path.display()
            );
        }
        Ok(())
    }

    fn open_output(&self, sink: &mut dyn DiagnosticSink) -> PipelineResult<Option<OutputFile>> {
        if !self.config.output_kind.writes_file() {
            return Ok(None);
        }
        let Some(path) = self.config.output_path.as_deref() else {
            sink.report(Diagnostic::new(
                DiagnosticKind::OutputOpenFailed,
                "no output path configured",
            ));
            return Err(PipelineError::OutputOpen {
                path: PathBuf::new(),
                source: io::Error::other("no output path configured"),
            });
        };
        let binary = self.config.output_kind.is_binary();
        match OutputFile::create(path, binary) {
            Ok(out) => {
                log::debug!(
                    "opened output {} ({} mode)",
                    path.display(),
                    if binary { "binary" } else { "text" }
                );
                Ok(Some(out))
            }
            Err(err) => {
                sink.report(
                    Diagnostic::new(DiagnosticKind::OutputOpenFailed, err.to_string())
                        .with_location(path.display().to_string()),
                );
                Err(PipelineError::OutputOpen {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Complete the write-and-commit of the output file, reporting any
    /// failure and letting the dropped guard unlink the partial file.
    fn finish_output(
        &self,
        output: Option<OutputFile>,
        write_result: io::Result<()>,
        path: &std::path::Path,
        sink: &mut dyn DiagnosticSink,
    ) -> PipelineResult<()> {
        let commit_result = match write_result {
            Ok(()) => match output {
                Some(out) => out.commit(),
                None => Ok(()),
            },
            Err(err) => Err(err),
        };
        commit_result.map_err(|err| {
            sink.report(
                Diagnostic::new(DiagnosticKind::OutputOpenFailed, err.to_string())
                    .with_location(path.display().to_string()),
            );
            PipelineError::OutputWrite {
                path: path.to_path_buf(),
                source: err,
            }
        })
    }

    fn report_emit_error(&self, err: EmitError, sink: &mut dyn DiagnosticSink) -> PipelineError {
        match err {
            EmitError::CodegenInit(reason)
            | EmitError::Codegen(reason)
            | EmitError::Object(reason) => {
                sink.report(Diagnostic::new(
                    DiagnosticKind::CodegenInitializationFailed,
                    reason.clone(),
                ));
                PipelineError::CodegenInit { reason }
            }
            EmitError::Io(source) => {
                let path = self.config.output_path.clone().unwrap_or_default();
                sink.report(
                    Diagnostic::new(DiagnosticKind::OutputOpenFailed, source.to_string())
                        .with_location(path.display().to_string()),
                );
                PipelineError::OutputWrite { path, source }
            }
        }
    }
}
