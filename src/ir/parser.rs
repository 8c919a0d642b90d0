//! Line-based parser for the textual IR format.
//!
//! The grammar is the one [`super::printer`] emits. Parsing is per-line with
//! error recovery: a malformed line is recorded and skipped so one mistake
//! does not hide the rest. Any recorded error fails the parse as a whole.

use super::{BinOp, Block, DebugRecord, Function, Inst, Module, ValueId};
use std::collections::HashMap;
use std::fmt;

/// One parse failure with its 1-based source line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Everything one source text declares, before it is merged into a module.
#[derive(Debug, Clone, Default)]
pub struct ParsedUnit {
    pub module_name: Option<String>,
    pub target_triple: Option<String>,
    pub data_layout: Option<String>,
    pub flags: Vec<(String, u32)>,
    pub functions: Vec<Function>,
    pub debug_records: Vec<DebugRecord>,
}

impl ParsedUnit {
    /// Build a standalone module from this unit, for tests and tooling.
    pub fn into_module(self) -> Module {
        let mut module = Module::new(self.module_name.unwrap_or_default());
        if let Some(triple) = self.target_triple {
            module.set_target_triple(triple);
        }
        if let Some(layout) = self.data_layout {
            module.set_data_layout(layout);
        }
        for (key, value) in self.flags {
            module.set_flag(key, value);
        }
        module.functions = self.functions;
        module.debug_records = self.debug_records;
        module
    }
}

/// Parse a source text. Returns every error found when any line fails.
pub fn parse(source: &str) -> Result<ParsedUnit, Vec<ParseError>> {
    let mut parser = Parser::default();
    parser.run(source);
    if parser.errors.is_empty() {
        Ok(parser.unit)
    } else {
        Err(parser.errors)
    }
}

#[derive(Default)]
struct Parser {
    unit: ParsedUnit,
    errors: Vec<ParseError>,
    /// Function currently being parsed, with its value-name table.
    current: Option<(Function, HashMap<String, ValueId>)>,
}

impl Parser {
    fn run(&mut self, source: &str) {
        for (idx, raw) in source.lines().enumerate() {
            let line_no = idx + 1;
            let line = match raw.find(';') {
                Some(pos) => &raw[..pos],
                None => raw,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.line(line_no, line);
        }
        if self.current.is_some() {
            self.error(0, "unterminated function body at end of input");
            self.current = None;
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(ParseError {
            line,
            message: message.into(),
        });
    }

    fn line(&mut self, line_no: usize, line: &str) {
        if self.current.is_some() {
            self.body_line(line_no, line);
            return;
        }
        if let Some(rest) = line.strip_prefix("module ") {
            match parse_quoted(rest.trim()) {
                Some(name) => self.unit.module_name = Some(name),
                None => self.error(line_no, "expected module \"name\""),
            }
        } else if let Some(rest) = line.strip_prefix("target triple") {
            match parse_assigned_string(rest) {
                Some(triple) => self.unit.target_triple = Some(triple),
                None => self.error(line_no, "expected target triple = \"...\""),
            }
        } else if let Some(rest) = line.strip_prefix("target datalayout") {
            match parse_assigned_string(rest) {
                Some(layout) => self.unit.data_layout = Some(layout),
                None => self.error(line_no, "expected target datalayout = \"...\""),
            }
        } else if let Some(rest) = line.strip_prefix("flag ") {
            self.flag_line(line_no, rest.trim());
        } else if let Some(rest) = line.strip_prefix("declare ") {
            if let Some((name, params, _)) = self.signature(line_no, rest.trim()) {
                self.unit.functions.push(Function::declaration(name, params));
            }
        } else if let Some(rest) = line.strip_prefix("func ") {
            self.func_header(line_no, rest.trim());
        } else if let Some(rest) = line.strip_prefix("debug ") {
            self.debug_line(line_no, rest.trim());
        } else {
            self.error(line_no, format!("unrecognized top-level line '{line}'"));
        }
    }

    fn flag_line(&mut self, line_no: usize, rest: &str) {
        let parsed = rest.split_once('=').and_then(|(key, value)| {
            let key = parse_quoted(key.trim())?;
            let value: u32 = value.trim().parse().ok()?;
            Some((key, value))
        });
        match parsed {
            Some(flag) => self.unit.flags.push(flag),
            None => self.error(line_no, "expected flag \"key\" = value"),
        }
    }

    fn debug_line(&mut self, line_no: usize, rest: &str) {
        let mut parts = rest.splitn(3, ',').map(str::trim);
        let parsed = (|| {
            let symbol = parts.next()?.strip_prefix('@')?.to_string();
            let file = parse_quoted(parts.next()?)?;
            let line: u32 = parts.next()?.parse().ok()?;
            Some(DebugRecord { symbol, file, line })
        })();
        match parsed {
            Some(record) => self.unit.debug_records.push(record),
            None => self.error(line_no, "expected debug @symbol, \"file\", line"),
        }
    }

    /// Parse `@name(%a, %b)` and whatever trails the closing parenthesis.
    fn signature(&mut self, line_no: usize, rest: &str) -> Option<(String, Vec<String>, String)> {
        let rest = match rest.strip_prefix('@') {
            Some(rest) => rest,
            None => {
                self.error(line_no, "expected @name after keyword");
                return None;
            }
        };
        let open = rest.find('(');
        let close = rest.find(')');
        let (open, close) = match (open, close) {
            (Some(open), Some(close)) if open < close => (open, close),
            _ => {
                self.error(line_no, "malformed parameter list");
                return None;
            }
        };
        let name = rest[..open].trim().to_string();
        if name.is_empty() {
            self.error(line_no, "empty function name");
            return None;
        }
        let mut params = Vec::new();
        let param_text = rest[open + 1..close].trim();
        if !param_text.is_empty() {
            for param in param_text.split(',') {
                match param.trim().strip_prefix('%') {
                    Some(p) if !p.is_empty() => params.push(p.to_string()),
                    _ => {
                        self.error(line_no, format!("malformed parameter '{}'", param.trim()));
                        return None;
                    }
                }
            }
        }
        Some((name, params, rest[close + 1..].trim().to_string()))
    }

    fn func_header(&mut self, line_no: usize, rest: &str) {
        let Some((name, params, tail)) = self.signature(line_no, rest) else {
            return;
        };
        let (internal, tail) = match tail.strip_prefix("internal") {
            Some(tail) => (true, tail.trim()),
            None => (false, tail.as_str()),
        };
        if tail != "{" {
            self.error(line_no, "expected '{' after function signature");
            return;
        }
        let func = Function::new(name, params.clone(), internal);
        let mut values = HashMap::new();
        for (idx, param) in params.iter().enumerate() {
            values.insert(param.clone(), idx as ValueId);
        }
        self.current = Some((func, values));
    }

    fn body_line(&mut self, line_no: usize, line: &str) {
        if line == "}" {
            let (func, _) = self.current.take().unwrap();
            if func.blocks.is_empty() {
                self.error(line_no, format!("function @{} has no blocks", func.name));
            }
            self.unit.functions.push(func);
            return;
        }
        if let Some(label) = line.strip_suffix(':') {
            let label = label.trim();
            if label.is_empty() || label.contains(char::is_whitespace) {
                self.error(line_no, format!("malformed block label '{label}'"));
                return;
            }
            let (func, _) = self.current.as_mut().unwrap();
            func.blocks.push(Block::new(label));
            return;
        }
        let Some(inst) = self.inst(line_no, line) else {
            return;
        };
        if self.current.as_ref().unwrap().0.blocks.is_empty() {
            self.error(line_no, "instruction before first block label");
            return;
        }
        let (func, _) = self.current.as_mut().unwrap();
        func.blocks.last_mut().unwrap().insts.push(inst);
    }

    fn inst(&mut self, line_no: usize, line: &str) -> Option<Inst> {
        // Optional `%dest =` prefix.
        let (dest, body) = match line.split_once('=') {
            Some((lhs, rhs)) if lhs.trim_start().starts_with('%') => {
                let name = lhs.trim().strip_prefix('%').unwrap().to_string();
                (Some(name), rhs.trim())
            }
            _ => (None, line),
        };
        let (mnemonic, rest) = match body.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None => (body, ""),
        };
        if dest.is_some() && !matches!(mnemonic, "const" | "add" | "sub" | "mul" | "call") {
            self.error(line_no, format!("{mnemonic} does not produce a value"));
            return None;
        }

        let inst = match mnemonic {
            "const" => {
                let value: i64 = match rest.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        self.error(line_no, format!("malformed constant '{rest}'"));
                        return None;
                    }
                };
                let dest = self.require_dest(line_no, dest, "const")?;
                let dest = self.define(line_no, dest)?;
                Inst::Const { dest, value }
            }
            "add" | "sub" | "mul" => {
                let op = match mnemonic {
                    "add" => BinOp::Add,
                    "sub" => BinOp::Sub,
                    _ => BinOp::Mul,
                };
                let Some((lhs, rhs)) = rest.split_once(',') else {
                    self.error(line_no, format!("{mnemonic} needs two operands"));
                    return None;
                };
                let lhs = self.use_value(line_no, lhs.trim())?;
                let rhs = self.use_value(line_no, rhs.trim())?;
                let dest = self.require_dest(line_no, dest, mnemonic)?;
                let dest = self.define(line_no, dest)?;
                Inst::Binary { op, dest, lhs, rhs }
            }
            "call" => {
                let rest = match rest.strip_prefix('@') {
                    Some(rest) => rest,
                    None => {
                        self.error(line_no, "expected @callee after call");
                        return None;
                    }
                };
                let (open, close) = match (rest.find('('), rest.rfind(')')) {
                    (Some(open), Some(close)) if open < close => (open, close),
                    _ => {
                        self.error(line_no, "malformed call argument list");
                        return None;
                    }
                };
                let callee = rest[..open].trim().to_string();
                let mut args = Vec::new();
                let arg_text = rest[open + 1..close].trim();
                if !arg_text.is_empty() {
                    for arg in arg_text.split(',') {
                        args.push(self.use_value(line_no, arg.trim())?);
                    }
                }
                let dest = match dest {
                    Some(name) => Some(self.define(line_no, name)?),
                    None => None,
                };
                Inst::Call { dest, callee, args }
            }
            "retain" => Inst::Retain {
                value: self.use_value(line_no, rest)?,
            },
            "release" => Inst::Release {
                value: self.use_value(line_no, rest)?,
            },
            "rc.adjust" => {
                let Some((value, delta)) = rest.split_once(',') else {
                    self.error(line_no, "rc.adjust needs a value and a delta");
                    return None;
                };
                let value = self.use_value(line_no, value.trim())?;
                let delta: i32 = match delta.trim().parse() {
                    Ok(d) => d,
                    Err(_) => {
                        self.error(line_no, format!("malformed rc delta '{}'", delta.trim()));
                        return None;
                    }
                };
                Inst::RcAdjust { value, delta }
            }
            "ret" => {
                let value = if rest.is_empty() {
                    None
                } else {
                    Some(self.use_value(line_no, rest)?)
                };
                Inst::Ret { value }
            }
            "br" => {
                if rest.is_empty() || rest.contains(char::is_whitespace) {
                    self.error(line_no, format!("malformed branch target '{rest}'"));
                    return None;
                }
                Inst::Br {
                    target: rest.to_string(),
                }
            }
            "cond_br" => {
                let parts: Vec<&str> = rest.splitn(3, ',').map(str::trim).collect();
                if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
                    self.error(line_no, "cond_br needs a condition and two targets");
                    return None;
                }
                let cond = self.use_value(line_no, parts[0])?;
                Inst::CondBr {
                    cond,
                    then_target: parts[1].to_string(),
                    else_target: parts[2].to_string(),
                }
            }
            other => {
                self.error(line_no, format!("unknown instruction '{other}'"));
                return None;
            }
        };
        Some(inst)
    }

    fn require_dest(
        &mut self,
        line_no: usize,
        dest: Option<String>,
        mnemonic: &str,
    ) -> Option<String> {
        if dest.is_none() {
            self.error(line_no, format!("{mnemonic} needs a %dest"));
        }
        dest
    }

    /// Define a fresh value named `name` in the current function.
    fn define(&mut self, line_no: usize, name: String) -> Option<ValueId> {
        if self.current.as_ref().unwrap().1.contains_key(&name) {
            self.error(line_no, format!("value %{name} defined twice"));
            return None;
        }
        let (func, values) = self.current.as_mut().unwrap();
        let id = func.alloc_value(name.clone());
        values.insert(name, id);
        Some(id)
    }

    /// Resolve a `%name` use in the current function.
    fn use_value(&mut self, line_no: usize, text: &str) -> Option<ValueId> {
        let name = match text.strip_prefix('%') {
            Some(name) if !name.is_empty() => name,
            _ => {
                self.error(line_no, format!("expected %value, found '{text}'"));
                return None;
            }
        };
        let id = self.current.as_ref().unwrap().1.get(name).copied();
        if id.is_none() {
            self.error(line_no, format!("use of undefined value %{name}"));
        }
        id
    }
}

fn parse_quoted(text: &str) -> Option<String> {
    let text = text.strip_prefix('"')?;
    let end = text.find('"')?;
    Some(text[..end].to_string())
}

fn parse_assigned_string(rest: &str) -> Option<String> {
    let rest = rest.trim().strip_prefix('=')?;
    parse_quoted(rest.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::printer::print_module;

    const DEMO: &str = r#"
; arithmetic plus reference counting
module "demo"
target triple = "x86_64-unknown-linux-gnu"
flag "Debug Version" = 3

declare @quill_print(%v)

func @main() {
entry:
  %a = const 40
  %b = const 2
  %sum = add %a, %b
  rc.adjust %sum, 2
  retain %sum
  release %sum
  %r = call @square(%sum)
  call @quill_print(%r)
  cond_br %r, done, more
more:
  br done
done:
  ret %r
}

func @square(%x) internal {
entry:
  %y = mul %x, %x
  ret %y
}

debug @main, "demo.ql", 1
"#;

    #[test]
    fn test_parse_demo_module() {
        let unit = parse(DEMO).expect("parse should succeed");
        assert_eq!(unit.module_name.as_deref(), Some("demo"));
        assert_eq!(unit.functions.len(), 3);
        assert!(unit.functions[0].is_declaration());

        let main = &unit.functions[1];
        assert_eq!(main.name, "main");
        assert_eq!(main.blocks.len(), 3);
        assert_eq!(main.blocks[0].insts.len(), 9);

        let square = &unit.functions[2];
        assert!(square.internal);
        assert_eq!(square.params, vec!["x".to_string()]);

        assert_eq!(unit.debug_records.len(), 1);
        assert_eq!(unit.debug_records[0].line, 1);
    }

    #[test]
    fn test_round_trip_through_printer() {
        let module = parse(DEMO).unwrap().into_module();
        let printed = print_module(&module);
        let reparsed = parse(&printed).unwrap().into_module();
        assert_eq!(module, reparsed);
    }

    #[test]
    fn test_undefined_value_is_an_error() {
        let errors = parse("func @f() {\nentry:\n  ret %missing\n}\n").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("undefined value %missing"));
        assert_eq!(errors[0].line, 3);
    }

    #[test]
    fn test_duplicate_definition_is_an_error() {
        let source = "func @f() {\nentry:\n  %a = const 1\n  %a = const 2\n  ret %a\n}\n";
        let errors = parse(source).unwrap_err();
        assert!(errors.iter().any(|e| e.message.contains("defined twice")));
    }

    #[test]
    fn test_unterminated_function() {
        let errors = parse("func @f() {\nentry:\n  ret\n").unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message.contains("unterminated function")));
    }

    #[test]
    fn test_error_recovery_reports_multiple_lines() {
        let source = "func @f() {\nentry:\n  %a = cnst 1\n  frobnicate %a\n  ret\n}\n";
        let errors = parse(source).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}
