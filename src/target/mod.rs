//! Target resolution and machine construction.
//!
//! A [`TargetRegistry`] maps the architecture component of a target triple to
//! a [`TargetDescriptor`]. The descriptor validates the machine-construction
//! parameters and produces a [`TargetMachine`], which owns the authoritative
//! data-layout string for the triple and contributes code-generation steps to
//! an emission plan. The pipeline holds exactly one machine per run.

use crate::config::{CodeModel, OptLevel, PipelineConfig, RelocModel};
use crate::emit::{Artifact, EmitPlan};
use thiserror::Error;

pub mod aarch64;
pub mod x64;

/// Native artifact flavor requested from code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenFileType {
    Assembly,
    Object,
}

/// Why a triple failed to resolve.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetError {
    #[error("empty target triple")]
    EmptyTriple,

    #[error("unknown architecture '{arch}'")]
    UnknownArchitecture { arch: String },
}

/// Why a resolved target rejected machine construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("unsupported cpu '{cpu}' for {target}")]
    UnsupportedCpu { cpu: String, target: &'static str },

    #[error("malformed feature string '{features}': features are +name or -name, comma separated")]
    MalformedFeatures { features: String },
}

/// Why a machine could not provide the requested emission steps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct CodegenInitError {
    pub reason: String,
}

/// Machine-construction parameters, taken from the pipeline configuration.
#[derive(Debug, Clone)]
pub struct MachineOptions {
    pub cpu: String,
    pub features: String,
    pub reloc_model: RelocModel,
    pub code_model: CodeModel,
    pub opt_level: OptLevel,
}

impl MachineOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            cpu: config.cpu.clone(),
            features: config.features.clone(),
            reloc_model: config.reloc_model,
            code_model: config.code_model,
            opt_level: config.opt_level,
        }
    }
}

/// The "add emission steps" contract shared by machines and their
/// decorators. Implementations append steps to the plan in execution order.
pub trait EmissionStepProvider {
    fn add_emission_steps(
        &self,
        plan: &mut EmitPlan,
        file_type: CodegenFileType,
    ) -> Result<(), CodegenInitError>;
}

/// A constructed backend for one triple, immutable once created.
pub trait TargetMachine: EmissionStepProvider + std::fmt::Debug {
    fn triple(&self) -> &str;

    /// The data-layout string every module compiled by this machine carries.
    fn data_layout(&self) -> &str;

    /// Fresh artifact container for the given output flavor.
    fn new_artifact(&self, file_type: CodegenFileType) -> Artifact;
}

/// A registered backend family, keyed by architecture.
pub trait TargetDescriptor: std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn create_machine(
        &self,
        triple: &str,
        options: &MachineOptions,
    ) -> Result<Box<dyn TargetMachine>, MachineError>;
}

/// Maps triple architecture components to target descriptors.
pub struct TargetRegistry {
    targets: hashbrown::HashMap<&'static str, Box<dyn TargetDescriptor>>,
}

impl TargetRegistry {
    /// An empty registry, for embedders bringing their own backends.
    pub fn new() -> Self {
        Self {
            targets: hashbrown::HashMap::new(),
        }
    }

    /// The registry with every built-in backend registered.
    pub fn with_builtin_targets() -> Self {
        let mut registry = Self::new();
        registry.register("x86_64", Box::new(x64::X64Target));
        registry.register("amd64", Box::new(x64::X64Target));
        registry.register("aarch64", Box::new(aarch64::A64Target));
        registry.register("arm64", Box::new(aarch64::A64Target));
        registry
    }

    pub fn register(&mut self, arch: &'static str, target: Box<dyn TargetDescriptor>) {
        self.targets.insert(arch, target);
    }

    /// Resolve a triple to its descriptor by architecture component.
    pub fn lookup(&self, triple: &str) -> Result<&dyn TargetDescriptor, TargetError> {
        let arch = triple
            .split('-')
            .next()
            .filter(|a| !a.is_empty())
            .ok_or(TargetError::EmptyTriple)?;
        self.targets
            .get(arch)
            .map(|t| t.as_ref())
            .ok_or_else(|| TargetError::UnknownArchitecture {
                arch: arch.to_string(),
            })
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::with_builtin_targets()
    }
}

/// Shared feature-string validation: empty, or comma-separated `+f`/`-f`.
pub(crate) fn validate_features(features: &str) -> Result<(), MachineError> {
    if features.is_empty() {
        return Ok(());
    }
    let ok = features
        .split(',')
        .all(|f| (f.starts_with('+') || f.starts_with('-')) && f.len() > 1);
    if ok {
        Ok(())
    } else {
        Err(MachineError::MalformedFeatures {
            features: features.to_string(),
        })
    }
}
