//! Quill backend compilation pipeline.
//!
//! This crate is the final stage of the Quill compiler: it takes a fully
//! formed program-level IR module, resolves a target backend, runs a
//! two-tier (function-level, then module-level) optimization pipeline, and
//! emits one of several artifact kinds.
//!
//! # Primary Usage
//!
//! ```no_run
//! use quill::config::{OptLevel, OutputKind, PipelineConfig};
//! use quill::diagnostics::StderrSink;
//! use quill::driver::PipelineDriver;
//! use quill::frontend::TextualFrontend;
//!
//! let mut config = PipelineConfig::new("x86_64-unknown-linux-gnu");
//! config.opt_level = OptLevel::O2;
//! config.output_kind = OutputKind::ObjectFile;
//! config.output_path = Some("out.o".into());
//!
//! let mut frontend = TextualFrontend::new("func @main() {\nentry:\n  ret\n}\n");
//! let mut sink = StderrSink;
//! let driver = PipelineDriver::new(&config);
//! let _module = driver.run(&mut frontend, 0, &mut sink)?;
//! # Ok::<(), quill::error::PipelineError>(())
//! ```
//!
//! # Architecture
//!
//! - [`driver`] - The stage-sequencing pipeline driver
//! - [`ir`] - The IR module, parser, printers and verifier
//! - [`passes`] - Pass plan construction and execution
//! - [`target`] - Target registry, descriptors and machines
//! - [`emit`] - Artifact emission and output-file handling
//! - [`frontend`] - The IR-producing collaborator seam
//! - [`diagnostics`] - The structured diagnostic sink seam

pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod emit;
pub mod error;
pub mod frontend;
pub mod ir;
pub mod passes;
pub mod session;
pub mod target;

// Re-export the types one pipeline run touches.
pub use config::{OptLevel, OutputKind, PipelineConfig};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, StderrSink};
pub use driver::PipelineDriver;
pub use error::{PipelineError, PipelineResult};
pub use frontend::{FrontendError, IrEmitter, TextualFrontend};
pub use ir::Module;
pub use session::{CompilationSession, SessionStats};
pub use target::TargetRegistry;
