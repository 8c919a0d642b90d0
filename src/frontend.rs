//! The IR-producing collaborator.
//!
//! The driver does not lower source programs itself; it delegates to an
//! [`IrEmitter`] that populates the module from whatever program
//! representation the frontend holds. The emitter owns its own error
//! reporting; its return value is the only thing the driver inspects. An
//! error return means the problem was already reported upstream and the
//! pipeline must abort without producing output and without reporting
//! anything further.

use crate::ir::parser::{self, ParseError};
use crate::ir::Module;
use thiserror::Error;

/// Why IR acquisition failed. Details were already reported by the emitter.
#[derive(Error, Debug)]
#[error("frontend reported {count} error(s)")]
pub struct FrontendError {
    pub count: usize,
}

/// Populates a module from a program representation, starting at a
/// caller-supplied top-level element offset. Resumed emission of a partially
/// emitted translation unit passes the number of elements already emitted.
pub trait IrEmitter {
    fn emit_into(&mut self, module: &mut Module, start_element: usize) -> Result<(), FrontendError>;
}

/// Frontend over the textual IR format.
///
/// Top-level elements are the functions of the source text, in order; the
/// `start_element` offset skips functions already emitted by an earlier run.
/// Parse errors are retained on the frontend for its caller to render.
pub struct TextualFrontend {
    source: String,
    errors: Vec<ParseError>,
}

impl TextualFrontend {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            errors: Vec::new(),
        }
    }

    /// Parse errors recorded by the last `emit_into` call.
    pub fn errors(&self) -> &[ParseError] {
        &self.errors
    }
}

impl IrEmitter for TextualFrontend {
    fn emit_into(&mut self, module: &mut Module, start_element: usize) -> Result<(), FrontendError> {
        let unit = match parser::parse(&self.source) {
            Ok(unit) => unit,
            Err(errors) => {
                log::debug!("frontend: {} parse error(s)", errors.len());
                self.errors = errors;
                return Err(FrontendError {
                    count: self.errors.len(),
                });
            }
        };
        // Target annotations on the module are the driver's to stamp; only
        // the program content of the source is emitted.
        let emitted: Vec<_> = unit.functions.into_iter().skip(start_element).collect();
        for record in unit.debug_records {
            if emitted.iter().any(|f| f.name == record.symbol) {
                module.debug_records.push(record);
            }
        }
        module.functions.extend(emitted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "func @a() {\nentry:\n  ret\n}\nfunc @b() {\nentry:\n  ret\n}\ndebug @b, \"b.ql\", 2\n";

    #[test]
    fn test_emits_all_functions_from_zero() {
        let mut frontend = TextualFrontend::new(SOURCE);
        let mut module = Module::new("m");
        frontend.emit_into(&mut module, 0).unwrap();
        assert_eq!(module.functions.len(), 2);
        assert_eq!(module.debug_records.len(), 1);
    }

    #[test]
    fn test_start_element_resumes_emission() {
        let mut frontend = TextualFrontend::new(SOURCE);
        let mut module = Module::new("m");
        frontend.emit_into(&mut module, 1).unwrap();
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "b");
    }

    #[test]
    fn test_parse_errors_surface_as_frontend_error() {
        let mut frontend = TextualFrontend::new("func @broken() {\nentry:\n  frob\n}\n");
        let mut module = Module::new("m");
        let err = frontend.emit_into(&mut module, 0).unwrap_err();
        assert_eq!(err.count, 1);
        assert_eq!(frontend.errors().len(), 1);
        assert!(module.functions.is_empty());
    }
}
