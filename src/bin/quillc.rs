//! Backend driver binary.
//!
//! Reads a textual IR file, runs the compilation pipeline, and writes the
//! requested artifact. Backend diagnostics go to stderr through the stderr
//! sink; frontend parse errors are printed here, with the input path.

use clap::{Parser, ValueEnum};
use quill::config::{OptLevel, OutputKind, PipelineConfig};
use quill::diagnostics::StderrSink;
use quill::driver::PipelineDriver;
use quill::error::PipelineError;
use quill::frontend::TextualFrontend;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "quillc", about = "Quill backend: compile textual IR to an artifact")]
struct Cli {
    /// Input textual IR file.
    input: PathBuf,

    /// Target triple.
    #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
    target: String,

    /// Optimization level.
    #[arg(short = 'O', long = "opt-level", default_value_t = 0,
          value_parser = clap::value_parser!(u8).range(0..=3))]
    opt_level: u8,

    /// Artifact kind to emit.
    #[arg(long, value_enum, default_value = "obj")]
    emit: EmitKind,

    /// Output path; required for every kind except `module`.
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Emit source-location metadata into native artifacts.
    #[arg(long)]
    debug_info: bool,

    /// Verify the module before and after optimization.
    #[arg(long)]
    verify: bool,

    /// Target cpu name.
    #[arg(long, default_value = "generic")]
    cpu: String,

    /// Target feature string (comma-separated +feat/-feat).
    #[arg(long, default_value = "")]
    features: String,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum EmitKind {
    /// Keep the optimized module in memory; print a summary.
    Module,
    /// Textual IR.
    Ir,
    /// Binary IR.
    Bc,
    /// Target assembly text.
    Asm,
    /// Relocatable object file.
    Obj,
}

impl EmitKind {
    fn output_kind(self) -> OutputKind {
        match self {
            EmitKind::Module => OutputKind::InMemoryModule,
            EmitKind::Ir => OutputKind::TextualIr,
            EmitKind::Bc => OutputKind::BinaryIr,
            EmitKind::Asm => OutputKind::NativeAssembly,
            EmitKind::Obj => OutputKind::ObjectFile,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let source = match fs::read_to_string(&cli.input) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {err}", cli.input.display());
            return ExitCode::FAILURE;
        }
    };

    let mut config = PipelineConfig::new(cli.target);
    config.opt_level = OptLevel::from_level(cli.opt_level).unwrap_or_default();
    config.output_kind = cli.emit.output_kind();
    config.output_path = cli.output;
    config.debug_info = cli.debug_info;
    config.verify = cli.verify;
    config.cpu = cli.cpu;
    config.features = cli.features;

    let mut frontend = TextualFrontend::new(source);
    let mut sink = StderrSink;
    let driver = PipelineDriver::new(&config);
    match driver.run(&mut frontend, 0, &mut sink) {
        Ok(module) => {
            if config.output_kind == OutputKind::InMemoryModule {
                println!(
                    "module '{}': {} function(s), target {}",
                    module.name(),
                    module.functions.len(),
                    module.target_triple().unwrap_or("?")
                );
            }
            ExitCode::SUCCESS
        }
        Err(PipelineError::FrontendErrors) => {
            for err in frontend.errors() {
                eprintln!("error: {}: {err}", cli.input.display());
            }
            ExitCode::FAILURE
        }
        // Already reported through the diagnostic sink.
        Err(_) => ExitCode::FAILURE,
    }
}
