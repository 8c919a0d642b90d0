//! Artifact emission.
//!
//! [`render_artifact`] dispatches on the configured output kind: nothing for
//! an in-memory module, the textual printer or the binary encoder for IR
//! kinds, and an [`EmitPlan`] of target-contributed steps for the native
//! kinds. The plan's steps fill an [`Artifact`] in order; the finished bytes
//! are written through an [`OutputFile`] guard that unlinks the path on
//! every exit that does not commit, so an aborted run never leaves a
//! truncated file behind.

use crate::config::{OutputKind, PipelineConfig};
use crate::ir::{bitcode, printer, Module};
use crate::target::{CodegenFileType, EmissionStepProvider, TargetMachine};
use object::write::Object;
use object::{Architecture, BinaryFormat, Endianness};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod debug_patch;

pub use debug_patch::DebugInfoPatch;

/// Errors raised while producing artifact bytes.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("cannot initialize code generation: {0}")]
    CodegenInit(String),

    #[error("code generation failed: {0}")]
    Codegen(String),

    #[error("object emission failed: {0}")]
    Object(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The container an emission plan fills in.
pub enum Artifact {
    /// Assembly or other textual output.
    Assembly(String),
    /// A relocatable object under construction.
    Object(Box<Object<'static>>),
}

impl Artifact {
    pub fn assembly() -> Self {
        Artifact::Assembly(String::new())
    }

    pub fn object(format: BinaryFormat, architecture: Architecture, endian: Endianness) -> Self {
        Artifact::Object(Box::new(Object::new(format, architecture, endian)))
    }

    /// Finalize into the bytes written to the output destination.
    pub fn finish(self) -> Result<Vec<u8>, EmitError> {
        match self {
            Artifact::Assembly(text) => Ok(text.into_bytes()),
            Artifact::Object(obj) => obj.write().map_err(|e| EmitError::Object(e.to_string())),
        }
    }
}

/// Object format implied by a target triple.
pub fn binary_format_for_triple(triple: &str) -> BinaryFormat {
    if triple.contains("apple") || triple.contains("darwin") {
        BinaryFormat::MachO
    } else if triple.contains("windows") {
        BinaryFormat::Coff
    } else {
        BinaryFormat::Elf
    }
}

/// One step of native emission. Steps run in plan order over the artifact.
pub trait EmitStep {
    fn name(&self) -> &'static str;

    fn run(&self, module: &Module, artifact: &mut Artifact) -> Result<(), EmitError>;
}

/// Ordered emission steps contributed by the target machine (and any
/// decorators composed over it).
#[derive(Default)]
pub struct EmitPlan {
    steps: Vec<Box<dyn EmitStep>>,
}

impl EmitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Box<dyn EmitStep>) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, module: &Module, artifact: &mut Artifact) -> Result<(), EmitError> {
        for step in &self.steps {
            log::debug!("emission step: {}", step.name());
            step.run(module, artifact)?;
        }
        Ok(())
    }
}

/// Scoped output destination. The file exists from `create` on; it survives
/// only if `commit` is called, every other exit path unlinks it.
#[derive(Debug)]
pub struct OutputFile {
    path: PathBuf,
    file: Option<File>,
    binary: bool,
    committed: bool,
}

impl OutputFile {
    /// Create (or clobber) the destination file. `binary` records the mode
    /// the configuration requested for this artifact kind.
    pub fn create(path: &Path, binary: bool) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            binary,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(bytes),
            None => Err(io::Error::other("output file already closed")),
        }
    }

    /// Flush and keep the file.
    pub fn commit(mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for OutputFile {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            if fs::remove_file(&self.path).is_ok() {
                log::debug!("discarded partial output {}", self.path.display());
            }
        }
    }
}

/// Produce the artifact bytes for the configured output kind, or `None` when
/// the module itself is the deliverable.
pub fn render_artifact(
    module: &Module,
    machine: &dyn TargetMachine,
    config: &PipelineConfig,
) -> Result<Option<Vec<u8>>, EmitError> {
    match config.output_kind {
        OutputKind::InMemoryModule => Ok(None),
        OutputKind::TextualIr => Ok(Some(printer::print_module(module).into_bytes())),
        OutputKind::BinaryIr => Ok(Some(bitcode::write_module(module))),
        OutputKind::NativeAssembly | OutputKind::ObjectFile => {
            let file_type = if config.output_kind == OutputKind::ObjectFile {
                CodegenFileType::Object
            } else {
                CodegenFileType::Assembly
            };
            let mut plan = EmitPlan::new();
            if config.debug_info {
                DebugInfoPatch::new(machine).add_emission_steps(&mut plan, file_type)
            } else {
                machine.add_emission_steps(&mut plan, file_type)
            }
            .map_err(|e| EmitError::CodegenInit(e.reason))?;
            let mut artifact = machine.new_artifact(file_type);
            plan.run(module, &mut artifact)?;
            Ok(Some(artifact.finish()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("quill-emit-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_output_guard_unlinks_without_commit() {
        let path = scratch_path("discard.o");
        {
            let mut out = OutputFile::create(&path, true).unwrap();
            out.write_all(b"partial").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_output_guard_keeps_committed_file() {
        let path = scratch_path("keep.s");
        {
            let mut out = OutputFile::create(&path, false).unwrap();
            out.write_all(b"\t.text\n").unwrap();
            out.commit().unwrap();
        }
        assert!(path.exists());
        assert_eq!(fs::read(&path).unwrap(), b"\t.text\n");
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_create_fails_for_missing_directory() {
        let err = OutputFile::create(Path::new("/nonexistent-dir/out.o"), true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_binary_format_selection() {
        assert_eq!(
            binary_format_for_triple("x86_64-unknown-linux-gnu"),
            BinaryFormat::Elf
        );
        assert_eq!(
            binary_format_for_triple("x86_64-apple-darwin"),
            BinaryFormat::MachO
        );
        assert_eq!(
            binary_format_for_triple("x86_64-pc-windows-msvc"),
            BinaryFormat::Coff
        );
    }
}
