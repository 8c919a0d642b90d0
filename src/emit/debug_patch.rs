//! Debug-information patch stage.
//!
//! A decorator over the target machine's "add emission steps" contract: it
//! forwards to the wrapped provider, then appends one extra step that emits
//! the module's accumulated source-location records into the artifact. The
//! step runs strictly after instruction emission and never alters the code
//! the machine produced.

use super::{Artifact, EmitError, EmitStep};
use crate::ir::Module;
use crate::target::{CodegenFileType, CodegenInitError, EmissionStepProvider};
use object::write::StandardSegment;
use object::SectionKind;

/// Name of the section the debug records land in.
pub const DEBUG_SECTION: &str = ".quill_debug";

/// Decorator composing the debug-metadata step after a provider's own steps.
pub struct DebugInfoPatch<'a, P: EmissionStepProvider + ?Sized> {
    inner: &'a P,
}

impl<'a, P: EmissionStepProvider + ?Sized> DebugInfoPatch<'a, P> {
    pub fn new(inner: &'a P) -> Self {
        Self { inner }
    }
}

impl<P: EmissionStepProvider + ?Sized> EmissionStepProvider for DebugInfoPatch<'_, P> {
    fn add_emission_steps(
        &self,
        plan: &mut super::EmitPlan,
        file_type: CodegenFileType,
    ) -> Result<(), CodegenInitError> {
        self.inner.add_emission_steps(plan, file_type)?;
        plan.push(Box::new(DebugMetadataStep));
        Ok(())
    }
}

/// Serializes the module's source-location records into the artifact.
struct DebugMetadataStep;

impl EmitStep for DebugMetadataStep {
    fn name(&self) -> &'static str {
        "debug-metadata"
    }

    fn run(&self, module: &Module, artifact: &mut Artifact) -> Result<(), EmitError> {
        match artifact {
            Artifact::Assembly(text) => {
                use std::fmt::Write;
                writeln!(text, "\n\t.section {DEBUG_SECTION}").unwrap();
                for record in &module.debug_records {
                    writeln!(text, "\t.asciz \"{}:{}:{}\"", record.symbol, record.file, record.line)
                        .unwrap();
                }
            }
            Artifact::Object(obj) => {
                let segment = obj.segment_name(StandardSegment::Debug).to_vec();
                let section =
                    obj.add_section(segment, DEBUG_SECTION.as_bytes().to_vec(), SectionKind::Debug);
                obj.append_section_data(section, &serialize_records(module), 1);
            }
        }
        Ok(())
    }
}

fn serialize_records(module: &Module) -> Vec<u8> {
    let mut bytes = Vec::new();
    for record in &module.debug_records {
        bytes.extend_from_slice(record.symbol.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(record.file.as_bytes());
        bytes.push(b':');
        bytes.extend_from_slice(record.line.to_string().as_bytes());
        bytes.push(0);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CodeModel, OptLevel, RelocModel};
    use crate::emit::EmitPlan;
    use crate::ir::DebugRecord;
    use crate::target::{MachineOptions, TargetDescriptor};

    fn machine() -> Box<dyn crate::target::TargetMachine> {
        crate::target::x64::X64Target
            .create_machine(
                "x86_64-unknown-linux-gnu",
                &MachineOptions {
                    cpu: "generic".to_string(),
                    features: String::new(),
                    reloc_model: RelocModel::Default,
                    code_model: CodeModel::Default,
                    opt_level: OptLevel::O0,
                },
            )
            .unwrap()
    }

    #[test]
    fn test_patch_appends_after_codegen_step() {
        let machine = machine();
        let patch = DebugInfoPatch::new(&*machine);
        let mut plan = EmitPlan::new();
        patch
            .add_emission_steps(&mut plan, CodegenFileType::Object)
            .unwrap();
        assert_eq!(plan.step_names(), vec!["x64-object", "debug-metadata"]);
    }

    #[test]
    fn test_records_serialize_with_terminators() {
        let mut module = Module::new("m");
        module.debug_records.push(DebugRecord {
            symbol: "main".to_string(),
            file: "main.ql".to_string(),
            line: 7,
        });
        let bytes = serialize_records(&module);
        assert_eq!(bytes, b"main:main.ql:7\0");
    }

    #[test]
    fn test_assembly_artifact_gains_debug_section() {
        let mut module = Module::new("m");
        module.debug_records.push(DebugRecord {
            symbol: "main".to_string(),
            file: "main.ql".to_string(),
            line: 7,
        });
        let mut artifact = Artifact::assembly();
        DebugMetadataStep.run(&module, &mut artifact).unwrap();
        let Artifact::Assembly(text) = artifact else {
            unreachable!()
        };
        assert!(text.contains(".section .quill_debug"));
        assert!(text.contains(".asciz \"main:main.ql:7\""));
    }
}
