//! Pipeline configuration.
//!
//! A [`PipelineConfig`] is an immutable snapshot of every option the backend
//! driver consults during one run: the target triple, the optimization level,
//! the requested artifact kind, and the flags gating verification and
//! debug-info emission. It also carries the target-machine construction
//! parameters (cpu, feature string, relocation and code model) that older
//! drivers hard-coded; they keep their historical defaults here.

use std::path::PathBuf;

/// Module-flag value identifying the debug-metadata layout understood by the
/// consumer toolchain this backend targets. Stamped on every emitted module.
pub const DEBUG_METADATA_VERSION: u32 = 3;

/// Optimization level. The four variants map exactly to the integers 0-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OptLevel {
    #[default]
    O0,
    O1,
    O2,
    O3,
}

impl OptLevel {
    /// Parse a numeric level. Values outside 0-3 are rejected.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(OptLevel::O0),
            1 => Some(OptLevel::O1),
            2 => Some(OptLevel::O2),
            3 => Some(OptLevel::O3),
            _ => None,
        }
    }

    pub fn as_level(self) -> u8 {
        match self {
            OptLevel::O0 => 0,
            OptLevel::O1 => 1,
            OptLevel::O2 => 2,
            OptLevel::O3 => 3,
        }
    }

    /// Whether any optimization is enabled at all.
    pub fn optimizes(self) -> bool {
        self != OptLevel::O0
    }
}

/// Requested artifact kind for a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// No file output; the in-memory module itself is the deliverable.
    InMemoryModule,
    /// Human-readable textual IR.
    TextualIr,
    /// Compact binary IR encoding.
    BinaryIr,
    /// Target assembly text.
    NativeAssembly,
    /// Relocatable object file.
    ObjectFile,
}

impl OutputKind {
    /// Whether the output destination is opened in binary mode.
    pub fn is_binary(self) -> bool {
        match self {
            OutputKind::InMemoryModule | OutputKind::TextualIr | OutputKind::NativeAssembly => false,
            OutputKind::BinaryIr | OutputKind::ObjectFile => true,
        }
    }

    /// Whether this kind writes a file at all.
    pub fn writes_file(self) -> bool {
        self != OutputKind::InMemoryModule
    }

    /// Whether this kind runs target code generation.
    pub fn is_native(self) -> bool {
        matches!(self, OutputKind::NativeAssembly | OutputKind::ObjectFile)
    }
}

/// Relocation model passed to target-machine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelocModel {
    #[default]
    Default,
    Static,
    Pic,
}

/// Code model passed to target-machine construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeModel {
    #[default]
    Default,
    Small,
    Large,
}

/// Immutable snapshot of all driver-relevant options for one pipeline run.
///
/// Owned by the caller and borrowed by the driver for the run's duration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Target triple naming platform, architecture and ABI.
    pub target_triple: String,
    pub opt_level: OptLevel,
    pub output_kind: OutputKind,
    /// Destination path; required for every kind except `InMemoryModule`.
    pub output_path: Option<PathBuf>,
    /// Emit source-location metadata into native artifacts.
    pub debug_info: bool,
    /// Run structural verification before and after optimization.
    pub verify: bool,
    /// Target cpu name for machine construction.
    pub cpu: String,
    /// Target feature string for machine construction.
    pub features: String,
    pub reloc_model: RelocModel,
    pub code_model: CodeModel,
    /// Value of the "Debug Version" module flag stamped on every run.
    pub debug_metadata_version: u32,
}

impl PipelineConfig {
    /// A configuration with the historical defaults for the given triple:
    /// no optimization, in-memory output, generic cpu, no features.
    pub fn new(target_triple: impl Into<String>) -> Self {
        Self {
            target_triple: target_triple.into(),
            opt_level: OptLevel::O0,
            output_kind: OutputKind::InMemoryModule,
            output_path: None,
            debug_info: false,
            verify: false,
            cpu: "generic".to_string(),
            features: String::new(),
            reloc_model: RelocModel::Default,
            code_model: CodeModel::Default,
            debug_metadata_version: DEBUG_METADATA_VERSION,
        }
    }
}
