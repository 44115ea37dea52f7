//! Textual IR reader.
//!
//! Accepts the format produced by [`crate::dump::write_ir`]. References
//! to instruction results and blocks may appear before their
//! definition; they are collected while parsing and resolved once the
//! whole input has been read.

use std::collections::HashMap;
use std::io::Read;

use thiserror::Error;

use crate::block::BlockId;
use crate::instr::{InstrId, MAX_INSTR_ARGS};
use crate::ir::Ir;
use crate::opcode::{OpFlags, Opcode};
use crate::types::Type;
use crate::value::ValueId;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: expected {expected}, found {found}")]
    UnexpectedToken {
        line: usize,
        expected: &'static str,
        found: String,
    },
    #[error("line {line}: unknown type '{name}'")]
    UnknownType { line: usize, name: String },
    #[error("line {line}: unknown op '{name}'")]
    UnknownOp { line: usize, name: String },
    #[error("line {line}: bad literal '{text}'")]
    BadLiteral { line: usize, text: String },
    #[error("line {line}: more than {MAX_INSTR_ARGS} arguments")]
    TooManyArgs { line: usize },
    #[error("line {line}: '{op}' takes {expected} arguments, found {found}")]
    Arity {
        line: usize,
        op: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: argument {slot} of '{op}' cannot be {ty}")]
    OperandType {
        line: usize,
        op: &'static str,
        slot: usize,
        ty: Type,
    },
    #[error("line {line}: '{op}' {what}")]
    ResultMismatch {
        line: usize,
        op: &'static str,
        what: &'static str,
    },
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: usize },
    #[error("unresolved reference %{name}")]
    UnresolvedReference { name: String },
    #[error("%{name} is {found}, used as {expected}")]
    TypeMismatch {
        name: String,
        expected: Type,
        found: Type,
    },
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

// -- Lexer --

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Eof,
    Eol,
    Op(char),
    Ident(String),
    Int(u64),
    Str(String),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Eof => "end of input".to_string(),
            Token::Eol => "end of line".to_string(),
            Token::Op(c) => format!("'{c}'"),
            Token::Ident(s) => format!("'{s}'"),
            Token::Int(v) => format!("0x{v:x}"),
            Token::Str(s) => format!("string '{s}'"),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '%' || c == '_'
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.src.get(self.pos).map(|&b| b as char)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_blank(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '#' {
                while !matches!(self.peek_char(), None | Some('\n')) {
                    self.pos += 1;
                }
            } else if c != '\n' && c.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_blank();
        let Some(c) = self.bump() else {
            return Ok(Token::Eof);
        };

        if c == '\n' {
            self.line += 1;
            // collapse runs of empty lines
            loop {
                self.skip_blank();
                if self.peek_char() != Some('\n') {
                    break;
                }
                self.pos += 1;
                self.line += 1;
            }
            return Ok(Token::Eol);
        }

        if matches!(c, ':' | ',' | '=') {
            return Ok(Token::Op(c));
        }

        if c == '\'' {
            return self.string();
        }

        if is_ident_char(c) {
            let start = self.pos - 1;
            while self.peek_char().is_some_and(is_ident_char) {
                self.pos += 1;
            }
            let text = String::from_utf8_lossy(&self.src[start..self.pos])
                .into_owned();
            if c.is_ascii_digit() {
                return self.number(text);
            }
            return Ok(Token::Ident(text));
        }

        Err(ParseError::UnexpectedToken {
            line: self.line,
            expected: "token",
            found: format!("'{c}'"),
        })
    }

    /// String body after the opening quote. `\'`, `\\` and `\n` are the
    /// only escapes.
    fn string(&mut self) -> Result<Token, ParseError> {
        let mut buf = Vec::new();
        loop {
            let unterminated = ParseError::UnterminatedString { line: self.line };
            match self.bump() {
                Some('\'') => break,
                Some('\n') | None => return Err(unterminated),
                Some('\\') => match self.bump() {
                    Some('n') => buf.push(b'\n'),
                    Some(c @ ('\'' | '\\')) => buf.push(c as u8),
                    Some('\n') | None => return Err(unterminated),
                    Some(c) => {
                        return Err(ParseError::BadLiteral {
                            line: self.line,
                            text: format!("\\{c}"),
                        })
                    }
                },
                Some(c) => buf.push(c as u8),
            }
        }
        Ok(Token::Str(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn number(&self, text: String) -> Result<Token, ParseError> {
        let parsed = match text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse::<u64>(),
        };
        parsed.map(Token::Int).map_err(|_| ParseError::BadLiteral {
            line: self.line,
            text,
        })
    }
}

// -- Parser --

/// An argument naming a label, resolved after the whole input is read.
struct PendingRef {
    instr: InstrId,
    slot: usize,
    ty: Type,
    name: String,
}

struct Parser<'a> {
    lex: Lexer<'a>,
    tok: Token,
    refs: Vec<PendingRef>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self, ParseError> {
        let mut lex = Lexer::new(src);
        let tok = lex.next_token()?;
        Ok(Self {
            lex,
            tok,
            refs: Vec::new(),
        })
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let next = self.lex.next_token()?;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn unexpected<T>(&self, expected: &'static str) -> Result<T, ParseError> {
        Err(ParseError::UnexpectedToken {
            line: self.lex.line,
            expected,
            found: self.tok.describe(),
        })
    }

    fn expect_op(&mut self, op: char) -> Result<(), ParseError> {
        if self.tok != Token::Op(op) {
            return self.unexpected(match op {
                ':' => "':'",
                '=' => "'='",
                _ => "','",
            });
        }
        self.advance()?;
        Ok(())
    }

    fn ident(&mut self, expected: &'static str) -> Result<String, ParseError> {
        match &self.tok {
            Token::Ident(_) => match self.advance()? {
                Token::Ident(s) => Ok(s),
                _ => unreachable!(),
            },
            _ => self.unexpected(expected),
        }
    }

    fn label(&mut self) -> Result<String, ParseError> {
        match &self.tok {
            Token::Ident(s) if s.starts_with('%') && s.len() > 1 => {
                let s = s[1..].to_string();
                self.advance()?;
                Ok(s)
            }
            _ => self.unexpected("%label"),
        }
    }

    fn ty(&mut self) -> Result<Type, ParseError> {
        let line = self.lex.line;
        let name = self.ident("type")?;
        Type::from_name(&name).ok_or(ParseError::UnknownType { line, name })
    }

    fn program(&mut self, ir: &mut Ir) -> Result<(), ParseError> {
        loop {
            match &self.tok {
                Token::Eof => break,
                Token::Eol => {
                    self.advance()?;
                }
                Token::Ident(s) if s.starts_with('%') => self.block(ir)?,
                _ => self.instr(ir)?,
            }
        }
        self.resolve_refs(ir)
    }

    fn block(&mut self, ir: &mut Ir) -> Result<(), ParseError> {
        let name = self.label()?;
        self.expect_op(':')?;
        let block = ir.append_block();
        ir.set_block_label(block, name);
        ir.set_current_block(block);
        Ok(())
    }

    fn instr(&mut self, ir: &mut Ir) -> Result<(), ParseError> {
        let line = self.lex.line;
        let mut word = self.ident("type or op")?;

        let mut result = None;
        if let Some(ty) = Type::from_name(&word) {
            let label = self.label()?;
            self.expect_op('=')?;
            result = Some((ty, label));
            word = self.ident("op")?;
        }
        let op = Opcode::from_name(&word)
            .ok_or(ParseError::UnknownOp { line, name: word })?;

        let instr = ir.append_instr(op, result.as_ref().map(|(ty, _)| *ty));
        if let Some((_, label)) = result.as_ref() {
            ir.set_instr_label(instr, label.clone());
        }

        let mut arg_types = Vec::new();
        while !matches!(self.tok, Token::Eol | Token::Eof) {
            let slot = arg_types.len();
            if slot == MAX_INSTR_ARGS {
                return Err(ParseError::TooManyArgs { line });
            }
            if slot > 0 {
                self.expect_op(',')?;
            }
            let ty = self.ty()?;
            self.value(ir, instr, slot, ty)?;
            arg_types.push(ty);
        }
        check_signature(line, op, result.as_ref().map(|(ty, _)| *ty), &arg_types)?;

        // Local slots are recreated from the offsets they are accessed at.
        let local_ty = match op {
            Opcode::LoadLocal => result.map(|(ty, _)| ty),
            Opcode::StoreLocal => arg_types.get(1).copied(),
            _ => None,
        };
        if let (Some(ty), Some(offset)) = (local_ty, ir.instr(instr).arg(0)) {
            if ir.is_constant(offset) && ir.ty(offset) == Type::I32 {
                let offset = ir.value(offset).i32();
                ir.reserve_local(ty, offset);
            }
        }
        Ok(())
    }

    fn value(
        &mut self,
        ir: &mut Ir,
        instr: InstrId,
        slot: usize,
        ty: Type,
    ) -> Result<(), ParseError> {
        let line = self.lex.line;
        match self.advance()? {
            Token::Ident(s) if s.starts_with('%') && s.len() > 1 => {
                self.refs.push(PendingRef {
                    instr,
                    slot,
                    ty,
                    name: s[1..].to_string(),
                });
            }
            Token::Int(bits) => {
                if !(ty.is_int() || ty.is_float()) {
                    return Err(ParseError::BadLiteral {
                        line,
                        text: format!("{ty} 0x{bits:x}"),
                    });
                }
                let v = ir.alloc_int(ty, bits);
                ir.set_arg(instr, slot, v);
            }
            Token::Str(s) => {
                if ty != Type::Str {
                    return Err(ParseError::BadLiteral {
                        line,
                        text: format!("{ty} '{s}'"),
                    });
                }
                let v = ir.alloc_str(s);
                ir.set_arg(instr, slot, v);
            }
            other => {
                return Err(ParseError::UnexpectedToken {
                    line,
                    expected: "value",
                    found: other.describe(),
                })
            }
        }
        Ok(())
    }

    fn resolve_refs(&mut self, ir: &mut Ir) -> Result<(), ParseError> {
        let blocks: HashMap<String, BlockId> = ir
            .blocks()
            .iter()
            .filter_map(|&b| ir.block(b).label.clone().map(|l| (l, b)))
            .collect();
        let defs: HashMap<String, ValueId> = ir
            .all_instrs()
            .into_iter()
            .filter_map(|i| {
                let instr = ir.instr(i);
                Some((instr.label.clone()?, instr.result?))
            })
            .collect();

        for r in std::mem::take(&mut self.refs) {
            let value = if r.ty == Type::Blk {
                let block = *blocks.get(&r.name).ok_or_else(|| {
                    ParseError::UnresolvedReference {
                        name: r.name.clone(),
                    }
                })?;
                let src = ir.instr(r.instr).block;
                if ir.instr(r.instr).op.is_branch() {
                    ir.add_edge(src, block);
                }
                ir.alloc_blk(block)
            } else {
                let def = *defs.get(&r.name).ok_or_else(|| {
                    ParseError::UnresolvedReference {
                        name: r.name.clone(),
                    }
                })?;
                if ir.ty(def) != r.ty {
                    return Err(ParseError::TypeMismatch {
                        name: r.name,
                        expected: r.ty,
                        found: ir.ty(def),
                    });
                }
                def
            };
            ir.set_arg(r.instr, r.slot, value);
        }
        Ok(())
    }
}

/// Check argument count, result presence and argument types against
/// what the op accepts. Reference arguments are checked by their
/// declared type; the definition's type is matched on resolution.
fn check_signature(
    line: usize,
    op: Opcode,
    result: Option<Type>,
    args: &[Type],
) -> Result<(), ParseError> {
    let def = op.def();
    let expected = def.nb_args as usize;
    let arity_ok = if op == Opcode::Call {
        (1..=expected).contains(&args.len())
    } else {
        args.len() == expected
    };
    if !arity_ok {
        return Err(ParseError::Arity {
            line,
            op: def.name,
            expected,
            found: args.len(),
        });
    }

    match (def.flags.contains(OpFlags::RESULT), result) {
        (true, None) => {
            return Err(ParseError::ResultMismatch {
                line,
                op: def.name,
                what: "requires a result",
            })
        }
        (false, Some(_)) => {
            return Err(ParseError::ResultMismatch {
                line,
                op: def.name,
                what: "has no result",
            })
        }
        _ => {}
    }

    let data = |t: Type| t.is_int() || t.is_float() || t == Type::V128;
    let target = |t: Type| t == Type::I32 || t == Type::Blk;
    for (slot, &ty) in args.iter().enumerate() {
        use Opcode::*;
        let ok = match (op, slot) {
            (SourceInfo, _) | (LoadGuest | StoreGuest, 0) => ty == Type::I32,
            (LoadContext | StoreContext | LoadLocal | StoreLocal, 0) => ty == Type::I32,
            (Fallback, 0) | (Call, _) | (LoadHost | StoreHost, 0) => ty == Type::I64,
            (Fallback, _) => ty == Type::I32,
            (StoreGuest, 1) => ty.is_int(),
            (StoreHost | StoreContext | StoreLocal, 1) => data(ty),
            (Select, 0) => ty.is_int(),
            (Select, 1) => data(ty),
            (Select, 2) => ty == args[1],
            (Ftoi | Fext | Ftrunc | Fneg | Fabs | Sqrt, 0) => ty.is_float(),
            (Itof | Sext | Zext | Trunc | Neg | Abs | Not, 0) => ty.is_int(),
            (Shl | Ashr | Lshr | Ashd | Lshd, _) => ty.is_int(),
            (Fadd | Fsub | Fmul | Fdiv, 0) => ty.is_float(),
            (_, 0) if op.is_float_cmp() => ty.is_float(),
            (Add | Sub | Smul | Umul | Div | And | Or | Xor, 0) => ty.is_int(),
            (_, 0) if op.is_int_cmp() => ty.is_int(),
            (_, 1) if op.is_int_cmp() || op.is_float_cmp() => ty == args[0],
            (Add | Sub | Smul | Umul | Div | And | Or | Xor, 1) => ty == args[0],
            (Fadd | Fsub | Fmul | Fdiv, 1) => ty == args[0],
            (Branch, 0) | (BranchTrue | BranchFalse, 1) => target(ty),
            (BranchTrue | BranchFalse, 0) => ty.is_int(),
            _ => false,
        };
        if !ok {
            return Err(ParseError::OperandType {
                line,
                op: def.name,
                slot,
                ty,
            });
        }
    }
    Ok(())
}

/// Parse textual IR, appending to `ir`.
///
/// On error `ir` holds whatever was built before the failure and
/// should be discarded.
pub fn parse_ir(src: &str, ir: &mut Ir) -> Result<(), ParseError> {
    let result = Parser::new(src).and_then(|mut p| p.program(ir));
    if let Err(err) = &result {
        log::info!("failed to parse IR: {err}");
    }
    result
}

/// Read the whole stream and parse it with [`parse_ir`].
pub fn read_ir(mut r: impl Read, ir: &mut Ir) -> Result<(), ParseError> {
    let mut src = String::new();
    r.read_to_string(&mut src)?;
    parse_ir(&src, ir)
}
