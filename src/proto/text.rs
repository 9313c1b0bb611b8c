//! Protobuf text format for [`LlmMetadata`].
//!
//! Parsing happens in two steps: a schema-agnostic pass turns the text into
//! a tree of named fields, then the tree is mapped onto the typed messages.
//! Unknown field names are errors.  A singular field given twice keeps the
//! last value.
//!
//! The printer emits proto3 text the way protobuf's own `MessageToString`
//! does: two-space indentation, default scalars omitted, set oneof members
//! always printed.

use super::sampler_parameters::Type as SamplerType;
use super::token_union::Token;
use super::{LlmMetadata, PromptAffixes, PromptTemplates, SamplerParameters, TokenIds, TokenUnion};
use std::fmt::Write as _;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ProtoTextError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("line {line}: message {message} has no field named \"{field}\"")]
    UnknownField { line: usize, message: &'static str, field: String },
    #[error("line {line}: invalid value for field \"{field}\": {value}")]
    InvalidValue { line: usize, field: String, value: String },
}

fn syntax(line: usize, message: impl Into<String>) -> ProtoTextError {
    ProtoTextError::Syntax { line, message: message.into() }
}

// ── Lexer ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Str(String),
    Num(String),
    Colon,
    Open(u8),
    Close(u8),
    LBracket,
    RBracket,
    Sep,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'.'
}

fn lex(input: &str) -> Result<Vec<(Tok, usize)>, ProtoTextError> {
    let bytes = input.as_bytes();
    let mut toks = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\n' => { line += 1; i += 1; }
            b if b.is_ascii_whitespace() => i += 1,
            b'#' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b':'        => { toks.push((Tok::Colon, line)); i += 1; }
            b'{' | b'<' => { toks.push((Tok::Open(b), line)); i += 1; }
            b'}' | b'>' => { toks.push((Tok::Close(b), line)); i += 1; }
            b'['        => { toks.push((Tok::LBracket, line)); i += 1; }
            b']'        => { toks.push((Tok::RBracket, line)); i += 1; }
            b',' | b';' => { toks.push((Tok::Sep, line)); i += 1; }
            b'"' | b'\'' => {
                let (s, next) = lex_string(bytes, i, line)?;
                toks.push((Tok::Str(s), line));
                i = next;
            }
            b'-' | b'+' | b'.' | b'0'..=b'9' => {
                let start = i;
                i += 1;
                while i < bytes.len()
                    && (is_ident_byte(bytes[i])
                        || (matches!(bytes[i], b'+' | b'-') && matches!(bytes[i - 1], b'e' | b'E')))
                {
                    i += 1;
                }
                toks.push((Tok::Num(input[start..i].to_owned()), line));
            }
            b if b.is_ascii_alphabetic() || b == b'_' => {
                let start = i;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                toks.push((Tok::Ident(input[start..i].to_owned()), line));
            }
            other => return Err(syntax(line, format!("unexpected character '{}'", other as char))),
        }
    }
    Ok(toks)
}

/// Lex a quoted string starting at `start`.  Returns the decoded text and
/// the index just past the closing quote.
fn lex_string(bytes: &[u8], start: usize, line: usize) -> Result<(String, usize), ProtoTextError> {
    let quote = bytes[start];
    let mut out = Vec::new();
    let mut i = start + 1;

    loop {
        let Some(&b) = bytes.get(i) else {
            return Err(syntax(line, "unterminated string"));
        };
        i += 1;
        match b {
            b'\n' => return Err(syntax(line, "newline in string")),
            b if b == quote => break,
            b'\\' => {
                let Some(&esc) = bytes.get(i) else {
                    return Err(syntax(line, "unterminated string"));
                };
                i += 1;
                match esc {
                    b'n'  => out.push(b'\n'),
                    b't'  => out.push(b'\t'),
                    b'r'  => out.push(b'\r'),
                    b'a'  => out.push(0x07),
                    b'b'  => out.push(0x08),
                    b'f'  => out.push(0x0c),
                    b'v'  => out.push(0x0b),
                    b'\\' | b'\'' | b'"' | b'?' => out.push(esc),
                    b'0'..=b'7' => {
                        let mut v = (esc - b'0') as u32;
                        for _ in 0..2 {
                            match bytes.get(i) {
                                Some(&d @ b'0'..=b'7') => { v = v * 8 + (d - b'0') as u32; i += 1; }
                                _ => break,
                            }
                        }
                        out.push(v as u8);
                    }
                    b'x' => {
                        let mut v = 0u32;
                        let mut digits = 0;
                        while digits < 2 {
                            match bytes.get(i).and_then(|&d| (d as char).to_digit(16)) {
                                Some(d) => { v = v * 16 + d; i += 1; digits += 1; }
                                None => break,
                            }
                        }
                        if digits == 0 {
                            return Err(syntax(line, "\\x with no hex digits"));
                        }
                        out.push(v as u8);
                    }
                    other => {
                        return Err(syntax(line, format!("invalid escape '\\{}'", other as char)))
                    }
                }
            }
            b => out.push(b),
        }
    }

    String::from_utf8(out)
        .map(|s| (s, i))
        .map_err(|_| syntax(line, "string is not valid UTF-8"))
}

// ── Field tree ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum FieldValue {
    Ident(String),
    Str(String),
    Num(String),
    Message(Vec<Field>),
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    value: FieldValue,
    line: usize,
}

struct Parser {
    toks: Vec<(Tok, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos).map(|(t, _)| t)
    }

    fn line(&self) -> usize {
        self.toks
            .get(self.pos)
            .or_else(|| self.toks.last())
            .map_or(1, |&(_, l)| l)
    }

    fn bump(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        tok
    }

    /// Fields until `close` (or end of input at top level).
    fn fields(&mut self, close: Option<u8>) -> Result<Vec<Field>, ProtoTextError> {
        let mut fields = Vec::new();
        loop {
            let line = self.line();
            match self.bump() {
                None if close.is_none() => return Ok(fields),
                None => return Err(syntax(line, "unexpected end of input")),
                Some(Tok::Close(c)) if Some(c) == close => return Ok(fields),
                Some(Tok::Ident(name)) => {
                    self.field_value(name, line, &mut fields)?;
                    if self.peek() == Some(&Tok::Sep) {
                        self.pos += 1;
                    }
                }
                Some(tok) => return Err(syntax(line, format!("expected field name, found {tok:?}"))),
            }
        }
    }

    fn field_value(&mut self, name: String, line: usize, out: &mut Vec<Field>) -> Result<(), ProtoTextError> {
        match self.peek() {
            Some(Tok::Colon) => {
                self.pos += 1;
                if self.peek() == Some(&Tok::LBracket) {
                    self.pos += 1;
                    return self.list(name, out);
                }
                let value = self.value()?;
                out.push(Field { name, value, line });
            }
            Some(Tok::Open(_)) => {
                let value = self.value()?;
                out.push(Field { name, value, line });
            }
            _ => return Err(syntax(line, format!("expected ':' or '{{' after \"{name}\""))),
        }
        Ok(())
    }

    fn list(&mut self, name: String, out: &mut Vec<Field>) -> Result<(), ProtoTextError> {
        if self.peek() == Some(&Tok::RBracket) {
            self.pos += 1;
            return Ok(());
        }
        loop {
            let line = self.line();
            let value = self.value()?;
            out.push(Field { name: name.clone(), value, line });
            match self.bump() {
                Some(Tok::Sep) => continue,
                Some(Tok::RBracket) => return Ok(()),
                _ => return Err(syntax(line, "expected ',' or ']' in list")),
            }
        }
    }

    fn value(&mut self) -> Result<FieldValue, ProtoTextError> {
        let line = self.line();
        match self.bump() {
            Some(Tok::Open(open)) => {
                let close = if open == b'{' { b'}' } else { b'>' };
                Ok(FieldValue::Message(self.fields(Some(close))?))
            }
            Some(Tok::Str(mut s)) => {
                // Adjacent literals concatenate.
                while let Some(Tok::Str(more)) = self.peek() {
                    s.push_str(more);
                    self.pos += 1;
                }
                Ok(FieldValue::Str(s))
            }
            Some(Tok::Num(n)) => Ok(FieldValue::Num(n)),
            Some(Tok::Ident(i)) => Ok(FieldValue::Ident(i)),
            Some(tok) => Err(syntax(line, format!("expected a value, found {tok:?}"))),
            None => Err(syntax(line, "unexpected end of input")),
        }
    }
}

// ── Mapping onto messages ────────────────────────────────────────────────────

impl Field {
    fn invalid(&self) -> ProtoTextError {
        let value = match &self.value {
            FieldValue::Ident(s) | FieldValue::Num(s) => s.clone(),
            FieldValue::Str(s)                        => format!("\"{s}\""),
            FieldValue::Message(_)                    => "{ ... }".to_owned(),
        };
        ProtoTextError::InvalidValue { line: self.line, field: self.name.clone(), value }
    }

    fn unknown(&self, message: &'static str) -> ProtoTextError {
        ProtoTextError::UnknownField { line: self.line, message, field: self.name.clone() }
    }

    fn message(self) -> Result<Vec<Field>, ProtoTextError> {
        match self.value {
            FieldValue::Message(fields) => Ok(fields),
            _ => Err(self.invalid()),
        }
    }

    fn string(self) -> Result<String, ProtoTextError> {
        match self.value {
            FieldValue::Str(s) => Ok(s),
            _ => Err(self.invalid()),
        }
    }

    fn int32(&self) -> Result<i32, ProtoTextError> {
        match &self.value {
            FieldValue::Num(n) => parse_int32(n).ok_or_else(|| self.invalid()),
            _ => Err(self.invalid()),
        }
    }

    fn float(&self) -> Result<f32, ProtoTextError> {
        let raw = match &self.value {
            FieldValue::Num(n) | FieldValue::Ident(n) => n.as_str(),
            _ => return Err(self.invalid()),
        };
        raw.parse::<f32>()
            .or_else(|_| raw.trim_end_matches(['f', 'F']).parse::<f32>())
            .map_err(|_| self.invalid())
    }

    fn sampler_type(&self) -> Result<i32, ProtoTextError> {
        match &self.value {
            FieldValue::Ident(name) => SamplerType::from_str_name(name)
                .map(|t| t as i32)
                .ok_or_else(|| self.invalid()),
            FieldValue::Num(_) => self.int32(),
            _ => Err(self.invalid()),
        }
    }
}

fn token_ids(fields: Vec<Field>) -> Result<TokenIds, ProtoTextError> {
    let mut ids = TokenIds::default();
    for f in fields {
        match f.name.as_str() {
            "ids" => ids.ids.push(f.int32()?),
            _ => return Err(f.unknown("TokenIds")),
        }
    }
    Ok(ids)
}

fn token_union(fields: Vec<Field>) -> Result<TokenUnion, ProtoTextError> {
    let mut token = TokenUnion::default();
    for f in fields {
        match f.name.as_str() {
            "token_ids" => token.token = Some(Token::TokenIds(token_ids(f.message()?)?)),
            "token_str" => token.token = Some(Token::TokenStr(f.string()?)),
            _ => return Err(f.unknown("TokenUnion")),
        }
    }
    Ok(token)
}

fn prompt_affixes(fields: Vec<Field>) -> Result<PromptAffixes, ProtoTextError> {
    let mut affixes = PromptAffixes::default();
    for f in fields {
        match f.name.as_str() {
            "prefix" => affixes.prefix = f.string()?,
            "suffix" => affixes.suffix = f.string()?,
            _ => return Err(f.unknown("PromptAffixes")),
        }
    }
    Ok(affixes)
}

fn prompt_templates(fields: Vec<Field>) -> Result<PromptTemplates, ProtoTextError> {
    let mut templates = PromptTemplates::default();
    for f in fields {
        match f.name.as_str() {
            "user"   => templates.user = Some(prompt_affixes(f.message()?)?),
            "model"  => templates.model = Some(prompt_affixes(f.message()?)?),
            "system" => templates.system = Some(prompt_affixes(f.message()?)?),
            _ => return Err(f.unknown("PromptTemplates")),
        }
    }
    Ok(templates)
}

fn sampler_params(fields: Vec<Field>) -> Result<SamplerParameters, ProtoTextError> {
    let mut params = SamplerParameters::default();
    for f in fields {
        match f.name.as_str() {
            "type"        => params.r#type = f.sampler_type()?,
            "k"           => params.k = f.int32()?,
            "p"           => params.p = f.float()?,
            "temperature" => params.temperature = f.float()?,
            "seed"        => params.seed = f.int32()?,
            _ => return Err(f.unknown("SamplerParameters")),
        }
    }
    Ok(params)
}

/// Parse `LlmMetadata` from protobuf text format.
pub fn parse_text(input: &str) -> Result<LlmMetadata, ProtoTextError> {
    let mut parser = Parser { toks: lex(input)?, pos: 0 };
    let fields = parser.fields(None)?;

    let mut meta = LlmMetadata::default();
    for f in fields {
        match f.name.as_str() {
            "start_token"      => meta.start_token = Some(token_union(f.message()?)?),
            "stop_tokens"      => meta.stop_tokens.push(token_union(f.message()?)?),
            "prompt_templates" => meta.prompt_templates = Some(prompt_templates(f.message()?)?),
            "sampler_params"   => meta.sampler_params = Some(sampler_params(f.message()?)?),
            "max_num_tokens"   => meta.max_num_tokens = f.int32()?,
            _ => return Err(f.unknown("LlmMetadata")),
        }
    }
    Ok(meta)
}

/// Integer literal in decimal, hex (`0x1F`) or octal (`017`), optionally
/// preceded by `-`.
fn parse_int32(raw: &str) -> Option<i32> {
    let (negative, body) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (digits, radix) = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (hex, 16)
    } else if body.len() > 1 && body.starts_with('0') {
        (&body[1..], 8)
    } else {
        (body, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    i32::try_from(if negative { -magnitude } else { magnitude }).ok()
}

// ── Printer ──────────────────────────────────────────────────────────────────

struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open(&mut self, name: &str) {
        self.indent();
        self.out.push_str(name);
        self.out.push_str(" {\n");
        self.depth += 1;
    }

    fn close(&mut self) {
        self.depth -= 1;
        self.indent();
        self.out.push_str("}\n");
    }

    fn raw(&mut self, name: &str, value: &str) {
        self.indent();
        let _ = writeln!(self.out, "{name}: {value}");
    }

    fn string(&mut self, name: &str, value: &str) {
        self.raw(name, &format!("\"{}\"", escape(value)));
    }

    fn int(&mut self, name: &str, value: i32) {
        if value != 0 {
            self.raw(name, &value.to_string());
        }
    }

    fn float(&mut self, name: &str, value: f32) {
        if value != 0.0 {
            self.raw(name, &format_float(value));
        }
    }

    fn token(&mut self, name: &str, token: &TokenUnion) {
        self.open(name);
        match &token.token {
            Some(Token::TokenIds(ids)) => {
                self.open("token_ids");
                for id in &ids.ids {
                    self.raw("ids", &id.to_string());
                }
                self.close();
            }
            Some(Token::TokenStr(s)) => self.string("token_str", s),
            None => {}
        }
        self.close();
    }

    fn affixes(&mut self, name: &str, affixes: &Option<PromptAffixes>) {
        let Some(a) = affixes else { return };
        self.open(name);
        if !a.prefix.is_empty() {
            self.string("prefix", &a.prefix);
        }
        if !a.suffix.is_empty() {
            self.string("suffix", &a.suffix);
        }
        self.close();
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"'  => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

fn format_float(v: f32) -> String {
    if v.is_nan() {
        return "nan".to_owned();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let s = v.to_string();
    if s.contains(['.', 'e']) { s } else { s + ".0" }
}

/// Render `meta` in protobuf text format.
pub fn to_text(meta: &LlmMetadata) -> String {
    let mut p = Printer { out: String::new(), depth: 0 };

    if let Some(t) = &meta.start_token {
        p.token("start_token", t);
    }
    for t in &meta.stop_tokens {
        p.token("stop_tokens", t);
    }
    if let Some(t) = &meta.prompt_templates {
        p.open("prompt_templates");
        p.affixes("user", &t.user);
        p.affixes("model", &t.model);
        p.affixes("system", &t.system);
        p.close();
    }
    if let Some(s) = &meta.sampler_params {
        p.open("sampler_params");
        if s.r#type != 0 {
            match SamplerType::try_from(s.r#type) {
                Ok(t)  => p.raw("type", t.as_str_name()),
                Err(_) => p.raw("type", &s.r#type.to_string()),
            }
        }
        p.int("k", s.k);
        p.float("p", s.p);
        p.float("temperature", s.temperature);
        p.int("seed", s.seed);
        p.close();
    }
    p.int("max_num_tokens", meta.max_num_tokens);

    p.out
}
