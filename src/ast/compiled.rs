//! The `.dlc` container: a deflate-compressed binary encoding of a parsed
//! [`Program`].
//!
//! ```text
//! bytes[8]   magic = "RULRAST1"
//! u32 LE     uncompressed payload size
//! bytes[N]   deflate-compressed payload
//! ```
//!
//! The payload is a flags byte followed by the declarations, facts and rules,
//! each as a `u16` count and that many records. There is no version field; any
//! mismatch is a hard error.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use thiserror::Error;

use super::*;

pub const MAGIC: &[u8; 8] = b"RULRAST1";
const HEADER_LEN: usize = MAGIC.len() + 4;
const FLAG_CLEAR_DERIVED: u8 = 1;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("bad magic, not a compiled rule file")]
    BadMagic,
    #[error("compiled rule file is truncated")]
    Truncated,
    #[error("decompression failed: {0}")]
    Decompress(#[source] std::io::Error),
    #[error("payload size mismatch: header says {expected} bytes, found {found}")]
    SizeMismatch { expected: usize, found: usize },
    #[error("unknown {0} tag {1}")]
    BadTag(&'static str, u8),
    #[error("string is not valid UTF-8")]
    BadString,
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("too many {0} ({1}) for the compiled format")]
    TooMany(&'static str, usize),
    #[error("compression failed: {0}")]
    Compress(#[from] std::io::Error),
}

/// Serializes `program` into the `.dlc` container.
pub fn compile_program(program: &Program) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::default();
    w.u8(if program.clear_derived {
        FLAG_CLEAR_DERIVED
    } else {
        0
    });
    w.count(program.decls.len(), "declarations")?;
    for decl in &program.decls {
        w.str(decl.name.as_str())?;
        w.count(decl.args.len(), "arguments")?;
        for arg in &decl.args {
            w.str(arg.name.as_str())?;
            w.u8(type_tag(arg.ty));
        }
    }
    w.count(program.facts.len(), "facts")?;
    for fact in &program.facts {
        w.atom(fact)?;
    }
    w.count(program.rules.len(), "rules")?;
    for rule in &program.rules {
        w.atom(&rule.head)?;
        w.count(rule.body.len(), "body literals")?;
        for lit in &rule.body {
            w.literal(lit)?;
        }
    }

    let payload = w.0;
    let size = u32::try_from(payload.len())
        .map_err(|_| EncodeError::TooMany("payload bytes", payload.len()))?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len() / 2);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&size.to_le_bytes());
    let mut encoder = DeflateEncoder::new(out, Compression::default());
    encoder.write_all(&payload)?;
    Ok(encoder.finish()?)
}

/// Whether `bytes` start with the `.dlc` magic.
pub fn is_compiled(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

/// Deserializes a `.dlc` container back into a [`Program`].
pub fn decode_program(bytes: &[u8]) -> Result<Program, DecodeError> {
    if bytes.len() < MAGIC.len() {
        return Err(if MAGIC.starts_with(bytes) {
            DecodeError::Truncated
        } else {
            DecodeError::BadMagic
        });
    }
    if !is_compiled(bytes) {
        return Err(DecodeError::BadMagic);
    }
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let mut size = [0u8; 4];
    size.copy_from_slice(&bytes[MAGIC.len()..HEADER_LEN]);
    let expected = u32::from_le_bytes(size) as usize;

    let mut payload = Vec::with_capacity(expected);
    DeflateDecoder::new(&bytes[HEADER_LEN..])
        .take(expected as u64 + 1)
        .read_to_end(&mut payload)
        .map_err(DecodeError::Decompress)?;
    if payload.len() != expected {
        return Err(DecodeError::SizeMismatch {
            expected,
            found: payload.len(),
        });
    }

    let mut r = Reader {
        buf: &payload,
        pos: 0,
    };
    let flags = r.u8()?;
    let mut program = Program {
        clear_derived: flags & FLAG_CLEAR_DERIVED != 0,
        ..Program::default()
    };
    for _ in 0..r.u16()? {
        let name = r.symbol()?;
        let mut args = vec![];
        for _ in 0..r.u16()? {
            let name = r.symbol()?;
            let ty = match r.u8()? {
                0 => ArgType::Unknown,
                1 => ArgType::Symbol,
                2 => ArgType::Int,
                3 => ArgType::Range,
                t => return Err(DecodeError::BadTag("type", t)),
            };
            args.push(ArgDecl { name, ty });
        }
        program.decls.push(PredDecl { name, args });
    }
    for _ in 0..r.u16()? {
        program.facts.push(r.atom()?);
    }
    for _ in 0..r.u16()? {
        let head = r.atom()?;
        let mut body = vec![];
        for _ in 0..r.u16()? {
            body.push(r.literal()?);
        }
        program.rules.push(Rule { head, body });
    }
    if r.pos != payload.len() {
        return Err(DecodeError::TrailingBytes(payload.len() - r.pos));
    }
    Ok(program)
}

fn type_tag(ty: ArgType) -> u8 {
    match ty {
        ArgType::Unknown => 0,
        ArgType::Symbol => 1,
        ArgType::Int => 2,
        ArgType::Range => 3,
    }
}

fn cmp_tag(op: CmpOp) -> u8 {
    match op {
        CmpOp::Ne => 0,
        CmpOp::Lt => 1,
        CmpOp::Le => 2,
        CmpOp::Gt => 3,
        CmpOp::Ge => 4,
    }
}

#[derive(Default)]
struct Writer(Vec<u8>);

impl Writer {
    fn u8(&mut self, b: u8) {
        self.0.push(b);
    }

    fn count(&mut self, n: usize, what: &'static str) -> Result<(), EncodeError> {
        let n = u16::try_from(n).map_err(|_| EncodeError::TooMany(what, n))?;
        self.0.extend_from_slice(&n.to_le_bytes());
        Ok(())
    }

    fn str(&mut self, s: &str) -> Result<(), EncodeError> {
        self.count(s.len(), "string bytes")?;
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn term(&mut self, term: &Term) -> Result<(), EncodeError> {
        match term {
            Term::Var(v) => {
                self.u8(0);
                self.str(v.as_str())?;
            }
            Term::Wildcard => self.u8(1),
            Term::Str(s) => {
                self.u8(2);
                self.str(s)?;
            }
            Term::Int(i) => {
                self.u8(3);
                self.0.extend_from_slice(&i.to_le_bytes());
            }
            Term::Name(n) => {
                self.u8(4);
                self.str(n.as_str())?;
            }
        }
        Ok(())
    }

    fn terms(&mut self, terms: &[Term]) -> Result<(), EncodeError> {
        self.count(terms.len(), "arguments")?;
        terms.iter().try_for_each(|t| self.term(t))
    }

    fn atom(&mut self, atom: &Atom) -> Result<(), EncodeError> {
        self.str(atom.name.as_str())?;
        self.terms(&atom.args)
    }

    fn literal(&mut self, lit: &Literal) -> Result<(), EncodeError> {
        match lit {
            Literal::Atom(a) => {
                self.u8(0);
                self.atom(a)
            }
            Literal::Not(a) => {
                self.u8(1);
                self.atom(a)
            }
            Literal::Eq(l, r) => {
                self.u8(2);
                self.term(l)?;
                self.term(r)
            }
            Literal::Cmp(op, l, r) => {
                self.u8(3);
                self.u8(cmp_tag(*op));
                self.term(l)?;
                self.term(r)
            }
            Literal::Builtin {
                builtin,
                args,
                negated,
            } => {
                self.u8(4);
                self.u8(builtin.tag());
                self.u8(u8::from(*negated));
                self.terms(args)
            }
        }
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        let out = self.buf.get(self.pos..end).ok_or(DecodeError::Truncated)?;
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        let mut b = [0u8; 8];
        b.copy_from_slice(self.bytes(8)?);
        Ok(i64::from_le_bytes(b))
    }

    fn string(&mut self) -> Result<&'a str, DecodeError> {
        let len = self.u16()? as usize;
        std::str::from_utf8(self.bytes(len)?).map_err(|_| DecodeError::BadString)
    }

    fn symbol(&mut self) -> Result<Symbol, DecodeError> {
        Ok(Symbol::from(self.string()?))
    }

    fn term(&mut self) -> Result<Term, DecodeError> {
        Ok(match self.u8()? {
            0 => Term::Var(self.symbol()?),
            1 => Term::Wildcard,
            2 => Term::Str(self.string()?.to_string()),
            3 => Term::Int(self.i64()?),
            4 => Term::Name(self.symbol()?),
            t => return Err(DecodeError::BadTag("term", t)),
        })
    }

    fn terms(&mut self) -> Result<Vec<Term>, DecodeError> {
        (0..self.u16()?).map(|_| self.term()).collect()
    }

    fn atom(&mut self) -> Result<Atom, DecodeError> {
        let name = self.symbol()?;
        let args = self.terms()?;
        Ok(Atom { name, args })
    }

    fn literal(&mut self) -> Result<Literal, DecodeError> {
        Ok(match self.u8()? {
            0 => Literal::Atom(self.atom()?),
            1 => Literal::Not(self.atom()?),
            2 => Literal::Eq(self.term()?, self.term()?),
            3 => {
                let op = match self.u8()? {
                    0 => CmpOp::Ne,
                    1 => CmpOp::Lt,
                    2 => CmpOp::Le,
                    3 => CmpOp::Gt,
                    4 => CmpOp::Ge,
                    t => return Err(DecodeError::BadTag("comparison", t)),
                };
                Literal::Cmp(op, self.term()?, self.term()?)
            }
            4 => {
                let tag = self.u8()?;
                let builtin =
                    Builtin::from_tag(tag).ok_or(DecodeError::BadTag("builtin", tag))?;
                let negated = match self.u8()? {
                    0 => false,
                    1 => true,
                    t => return Err(DecodeError::BadTag("negation flag", t)),
                };
                Literal::Builtin {
                    builtin,
                    args: self.terms()?,
                    negated,
                }
            }
            t => return Err(DecodeError::BadTag("literal", t)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"
        .clear_derived()
        .pred dep(pkg: symbol, on: symbol, min: range).
        .pred seen(x).
        dep("app", "core", 3).
        dep(lib, core, -7).
        unused(P) :- dep(P, _, V), not seen(P), V >= 0, P = P, not starts_with(P, "elm/").
    "#;

    #[test]
    fn decodes_what_it_encodes() {
        let program = parse_program(SRC).unwrap();
        let bytes = compile_program(&program).unwrap();
        assert!(is_compiled(&bytes));
        assert_eq!(decode_program(&bytes).unwrap(), program);
    }

    #[test]
    fn rejects_bad_magic() {
        let program = parse_program(SRC).unwrap();
        let mut bytes = compile_program(&program).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode_program(&bytes), Err(DecodeError::BadMagic)));
        assert!(matches!(decode_program(b"hello"), Err(DecodeError::BadMagic)));
    }

    #[test]
    fn rejects_truncation() {
        let program = parse_program(SRC).unwrap();
        let bytes = compile_program(&program).unwrap();
        assert!(matches!(decode_program(&bytes[..6]), Err(DecodeError::Truncated)));
        assert!(matches!(decode_program(&bytes[..10]), Err(DecodeError::Truncated)));
        assert!(decode_program(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn rejects_size_mismatch() {
        let program = parse_program(SRC).unwrap();
        let mut bytes = compile_program(&program).unwrap();
        let size = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        bytes[8..12].copy_from_slice(&(size + 5).to_le_bytes());
        assert!(matches!(
            decode_program(&bytes),
            Err(DecodeError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn rejects_trailing_payload_bytes() {
        let mut payload = vec![0u8, 0, 0, 0, 0, 0, 0];
        payload.push(42);
        let mut out = MAGIC.to_vec();
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        let mut enc = DeflateEncoder::new(out, Compression::default());
        enc.write_all(&payload).unwrap();
        let bytes = enc.finish().unwrap();
        assert!(matches!(
            decode_program(&bytes),
            Err(DecodeError::TrailingBytes(1))
        ));
    }
}
