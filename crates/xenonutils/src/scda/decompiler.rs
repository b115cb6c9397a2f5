//! Stack-based SCDA bytecode decompiler
//!
//! Reconstructs indented pseudo-source from compiled script bytecode. The
//! walk never fails: malformed payloads degrade to `; Unknown opcode`
//! comment lines and a two-byte advance, so a torn record still yields the
//! readable part of its script.
//!
//! ## Opcode payloads
//!
//! ```text
//! 0x0010 Begin     u16 len (counts itself), u16 mode, optional u16 param
//! 0x0011 End       no payload
//! 0x0015 Set       u16 var_len, variable, u16 expr_len, expression
//! 0x0016 If        u16 len, u16 jump, u16 expr_len, expression
//! 0x0018 ElseIf    same shape as If
//! 0x0017 Else      u16 len, skipped
//! 0x0019 EndIf     u16 len, skipped
//! 0x001C Ref       u16 len, u16 reference index; dots the next call
//! 0x001D/0x001E    ScriptName / Return, no payload
//! >= 0x0100        function call: u16 param_len, u16 param_count, params
//! ```
//!
//! Expressions are postfix: operand markers push, ASCII operators pop two
//! and push the infix rendering.

use crate::binary::BinaryReader;

use super::opcodes::OpcodeTable;
use super::{FUNCTION_OPCODE_BASE, FUNCTION_OPCODE_LIMIT};

/// Expression operand markers
const MARKER_INT: u8 = 0x6E; // i32 literal
const MARKER_FLOAT: u8 = 0x7A; // f64 literal
const MARKER_REF: u8 = 0x72; // reference index
const MARKER_INT_LOCAL: u8 = 0x73; // integer local
const MARKER_FLOAT_LOCAL: u8 = 0x66; // float local

/// SCDA bytecode decompiler over a borrowed opcode table
pub struct Decompiler<'a> {
    table: &'a OpcodeTable,
}

impl<'a> Decompiler<'a> {
    pub fn new(table: &'a OpcodeTable) -> Self {
        Self { table }
    }

    /// Decompile raw bytecode (envelope already stripped) to pseudo-source.
    pub fn decompile(&self, bytecode: &[u8]) -> String {
        let r = BinaryReader::new(bytecode);
        let mut out = String::new();
        let mut pos = 0usize;
        let mut indent = 0usize;
        let mut pending_ref: Option<String> = None;

        while let Ok(opcode) = r.u16_le(pos) {
            match opcode {
                0x0010 => {
                    // The length field counts itself(2), the mode(2) and the
                    // optional block parameter(2), so a param-bearing block
                    // has len == 6
                    let len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    let mode = r.u16_le(pos + 4).unwrap_or(0);
                    let mut line = format!("Begin {}", OpcodeTable::block_type_name(mode));
                    if len >= 6 {
                        if let Ok(param) = r.u16_le(pos + 6) {
                            line.push_str(&format!(" {param}"));
                        }
                    }
                    push_line(&mut out, indent, &line);
                    indent += 1;
                    pos += 2 + len.max(4);
                }
                0x0011 => {
                    indent = indent.saturating_sub(1);
                    push_line(&mut out, indent, "End");
                    pos += 2;
                }
                0x0015 => {
                    let var_len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    let variable = r
                        .bytes(pos + 4, var_len)
                        .map(|b| self.render_expression(b))
                        .unwrap_or_default();
                    let expr_len = r.u16_le(pos + 4 + var_len).unwrap_or(0) as usize;
                    let expr = r
                        .bytes(pos + 6 + var_len, expr_len)
                        .map(|b| self.render_expression(b))
                        .unwrap_or_default();
                    push_line(&mut out, indent, &format!("set {variable} to {expr}"));
                    pos += 6 + var_len + expr_len;
                }
                0x0016 | 0x0018 => {
                    let len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    let expr_len = (r.u16_le(pos + 6).unwrap_or(0) as usize)
                        .min(len.saturating_sub(4));
                    let expr = r
                        .bytes(pos + 8, expr_len)
                        .map(|b| self.render_expression(b))
                        .unwrap_or_default();
                    if opcode == 0x0016 {
                        push_line(&mut out, indent, &format!("if {expr}"));
                        indent += 1;
                    } else {
                        push_line(&mut out, indent.saturating_sub(1), &format!("elseif {expr}"));
                    }
                    pos += 4 + len;
                }
                0x0017 => {
                    let len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    push_line(&mut out, indent.saturating_sub(1), "else");
                    pos += 4 + len;
                }
                0x0019 => {
                    let len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    indent = indent.saturating_sub(1);
                    push_line(&mut out, indent, "endif");
                    pos += 4 + len;
                }
                0x001C => {
                    let len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    if let Ok(index) = r.u16_le(pos + 4) {
                        pending_ref = Some(format!("ref{index}"));
                    }
                    pos += 4 + len;
                }
                0x001D => {
                    push_line(&mut out, indent, "ScriptName");
                    pos += 2;
                }
                0x001E => {
                    push_line(&mut out, indent, "Return");
                    pos += 2;
                }
                op if (FUNCTION_OPCODE_BASE..FUNCTION_OPCODE_LIMIT).contains(&op) => {
                    let param_len = r.u16_le(pos + 2).unwrap_or(0) as usize;
                    let call =
                        self.render_call(op, r.bytes(pos + 4, param_len).unwrap_or(&[]));
                    let line = match pending_ref.take() {
                        Some(reference) => format!("{reference}.{call}"),
                        None => call,
                    };
                    push_line(&mut out, indent, &line);
                    pos += 4 + param_len;
                }
                other => {
                    push_line(&mut out, indent, &format!("; Unknown opcode 0x{other:04X}"));
                    pos += 2;
                }
            }
        }

        out
    }

    /// Render a function call: name plus decoded parameters.
    fn render_call(&self, opcode: u16, params: &[u8]) -> String {
        let mut name = match self.table.function_name(opcode) {
            Some(name) => name.to_string(),
            None => format!("Function_0x{opcode:04X}"),
        };

        let r = BinaryReader::new(params);
        let mut pos = 0usize;
        let _param_count = r.u16_le(pos).unwrap_or(0);
        pos += 2;

        while pos < params.len() {
            let (text, consumed) = match self.decode_operand(params, pos) {
                Some(decoded) => decoded,
                None => break,
            };
            name.push(' ');
            name.push_str(&text);
            pos += consumed;
        }
        name
    }

    /// Postfix expression walk with an operand stack.
    fn render_expression(&self, expr: &[u8]) -> String {
        let mut stack: Vec<String> = Vec::new();
        let mut pos = 0usize;

        while pos < expr.len() {
            if let Some((text, consumed)) = self.decode_operand(expr, pos) {
                stack.push(text);
                pos += consumed;
                continue;
            }

            let (op, consumed): (&str, usize) = match (expr[pos], expr.get(pos + 1)) {
                (b'=', Some(b'=')) => ("==", 2),
                (b'!', Some(b'=')) => ("!=", 2),
                (b'>', Some(b'=')) => (">=", 2),
                (b'<', Some(b'=')) => ("<=", 2),
                (b'&', Some(b'&')) => ("&&", 2),
                (b'|', Some(b'|')) => ("||", 2),
                (b'>', _) => (">", 1),
                (b'<', _) => ("<", 1),
                (b'+', _) => ("+", 1),
                (b'-', _) => ("-", 1),
                (b'*', _) => ("*", 1),
                (b'/', _) => ("/", 1),
                (b' ', _) => ("", 1),
                (other, _) => {
                    stack.push(format!("?0x{other:02X}"));
                    pos += 1;
                    continue;
                }
            };
            pos += consumed;
            if op.is_empty() {
                continue;
            }

            let rhs = stack.pop().unwrap_or_default();
            let lhs = stack.pop().unwrap_or_default();
            stack.push(format!("{lhs} {op} {rhs}"));
        }

        stack.pop().unwrap_or_default()
    }

    /// Decode one marker-prefixed operand; `None` when the byte at `pos`
    /// is not an operand marker.
    fn decode_operand(&self, data: &[u8], pos: usize) -> Option<(String, usize)> {
        let r = BinaryReader::new(data);
        match *data.get(pos)? {
            MARKER_INT => Some((r.i32_le(pos + 1).ok()?.to_string(), 5)),
            MARKER_FLOAT => Some((format_float(r.f64_le(pos + 1).ok()?), 9)),
            MARKER_REF => Some((format!("ref{}", r.u16_le(pos + 1).ok()?), 3)),
            MARKER_INT_LOCAL => Some((format!("iVar{}", r.u16_le(pos + 1).ok()?), 3)),
            MARKER_FLOAT_LOCAL => Some((format!("fVar{}", r.u16_le(pos + 1).ok()?), 3)),
            _ => None,
        }
    }
}

fn push_line(out: &mut String, indent: usize, line: &str) {
    for _ in 0..indent {
        out.push('\t');
    }
    out.push_str(line);
    out.push('\n');
}

/// Floats print without a trailing `.0` ambiguity: integral values keep one
/// decimal place.
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}
