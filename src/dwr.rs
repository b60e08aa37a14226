//! Reader for DWR reply scripts.
//!
//! Replies are small JavaScript programs that build an object graph in `sN` variables and
//! hand the result to `dwr.engine._remoteHandleCallback`. Only the subset the remoting
//! engine emits is understood; anything else is skipped statement by statement.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::protocol::ORIG_SCRIPT_SESSION_MARKER;
use crate::{Error, Result};

const EXCEPTION_MARKERS: [&str; 2] = [
    "dwr.engine._remoteHandleException(",
    "dwr.engine._remoteHandleBatchException(",
];

pub struct DwrResponse<'a> {
    body: &'a str,
}

impl<'a> DwrResponse<'a> {
    pub fn new(body: &'a str) -> Self {
        Self { body }
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.body.contains(marker)
    }

    pub fn is_error(&self) -> bool {
        EXCEPTION_MARKERS.iter().any(|m| self.body.contains(m))
    }

    pub fn error_message(&self) -> Option<String> {
        self.quoted_after("message=\"")
            .or_else(|| self.quoted_after("message:\""))
    }

    /// Unescaped contents of the string literal whose opening quote ends `marker`.
    pub fn quoted_after(&self, marker: &str) -> Option<String> {
        let start = self.body.find(marker)? + marker.len();
        let mut cursor = Cursor::at(self.body, start);
        cursor.string_body('"')
    }

    pub fn script_session_prefix(&self) -> Option<&'a str> {
        let start = self.body.find(ORIG_SCRIPT_SESSION_MARKER)? + ORIG_SCRIPT_SESSION_MARKER.len();
        let rest = &self.body[start..];
        rest.find('"').map(|end| &rest[..end])
    }

    /// The value passed to the first callback, with all `sN` references resolved.
    pub fn callback_value(&self) -> Option<Value> {
        let mut interpreter = Interpreter::default();
        let mut cursor = Cursor::at(self.body, 0);
        let result = interpreter.run(&mut cursor)?;
        Some(interpreter.resolve(&result, &mut Vec::new()))
    }

    pub fn decode_callback<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.callback_value().ok_or_else(|| Error::ProtocolMismatch {
            context: "callback".to_string(),
            body: self.body.to_string(),
        })?;
        Ok(serde_json::from_value(value)?)
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Value(Value),
    Ref(String),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
}

#[derive(Default)]
struct Interpreter {
    vars: HashMap<String, Expr>,
}

impl Interpreter {
    fn run(&mut self, cursor: &mut Cursor<'_>) -> Option<Expr> {
        let mut callback = None;
        loop {
            cursor.skip_trivia();
            if cursor.at_end() {
                break;
            }
            let start = cursor.pos;
            match self.statement(cursor) {
                Some(Some(result)) if callback.is_none() => callback = Some(result),
                Some(_) => {}
                None => {
                    cursor.pos = start;
                    cursor.skip_statement();
                }
            }
            cursor.skip_ws();
            cursor.eat(";");
        }
        callback
    }

    /// `None` when the statement is not understood; `Some(Some(_))` for a callback.
    fn statement(&mut self, cursor: &mut Cursor<'_>) -> Option<Option<Expr>> {
        if cursor.eat("var ") {
            cursor.skip_ws();
            let name = cursor.ident()?;
            cursor.skip_ws();
            cursor.expect("=")?;
            let value = cursor.expr()?;
            self.vars.insert(name, value);
            return Some(None);
        }
        if cursor.eat(crate::protocol::CALLBACK_MARKER) {
            cursor.skip_ws();
            cursor.string_literal()?;
            cursor.list_separator()?;
            cursor.string_literal()?;
            cursor.list_separator()?;
            let value = cursor.expr()?;
            cursor.skip_ws();
            cursor.expect(")")?;
            return Some(Some(value));
        }

        let name = cursor.ident()?;
        if !self.vars.contains_key(&name) {
            return None;
        }
        if cursor.eat(".") {
            let field = cursor.ident()?;
            cursor.skip_ws();
            cursor.expect("=")?;
            let value = cursor.expr()?;
            if let Some(Expr::Object(fields)) = self.vars.get_mut(&name) {
                fields.retain(|(f, _)| *f != field);
                fields.push((field, value));
            }
            return Some(None);
        }
        if cursor.eat("[") {
            cursor.skip_ws();
            let key = cursor.expr()?;
            cursor.skip_ws();
            cursor.expect("]")?;
            cursor.skip_ws();
            cursor.expect("=")?;
            let value = cursor.expr()?;
            match (self.vars.get_mut(&name), key) {
                (Some(Expr::Array(items)), Expr::Value(Value::Number(n))) => {
                    let idx = usize::try_from(n.as_u64()?).ok()?;
                    if items.len() <= idx {
                        items.resize(idx + 1, Expr::Value(Value::Null));
                    }
                    items[idx] = value;
                }
                (Some(Expr::Object(fields)), Expr::Value(Value::String(field))) => {
                    fields.retain(|(f, _)| *f != field);
                    fields.push((field, value));
                }
                _ => return None,
            }
            return Some(None);
        }
        None
    }

    /// Cycles resolve to `null`; shared sub-graphs are duplicated.
    fn resolve(&self, expr: &Expr, visiting: &mut Vec<String>) -> Value {
        match expr {
            Expr::Value(v) => v.clone(),
            Expr::Ref(name) => {
                if visiting.contains(name) {
                    return Value::Null;
                }
                let Some(target) = self.vars.get(name) else {
                    return Value::Null;
                };
                visiting.push(name.clone());
                let value = self.resolve(target, visiting);
                visiting.pop();
                value
            }
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (name, value) in fields {
                    map.insert(name.clone(), self.resolve(value, visiting));
                }
                Value::Object(map)
            }
            Expr::Array(items) => {
                Value::Array(items.iter().map(|i| self.resolve(i, visiting)).collect())
            }
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at(src: &'a str, pos: usize) -> Self {
        Self { src, pos }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Option<()> {
        self.eat(token).then_some(())
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn skip_trivia(&mut self) {
        loop {
            self.skip_ws();
            if self.eat("//") {
                while self.bump().is_some_and(|c| c != '\n') {}
            } else if !self.eat(";") {
                return;
            }
        }
    }

    fn skip_statement(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ';' | '\n' => return,
                '"' | '\'' => {
                    self.bump();
                    self.string_body(c);
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn list_separator(&mut self) -> Option<()> {
        self.skip_ws();
        self.expect(",")?;
        self.skip_ws();
        Some(())
    }

    fn ident(&mut self) -> Option<String> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            self.bump();
        }
        (self.pos > start).then(|| self.src[start..self.pos].to_string())
    }

    fn string_literal(&mut self) -> Option<String> {
        let quote = self.peek().filter(|c| *c == '"' || *c == '\'')?;
        self.bump();
        self.string_body(quote)
    }

    /// Reads up to the closing `quote`, resolving JavaScript escapes.
    fn string_body(&mut self, quote: char) -> Option<String> {
        let mut out = String::new();
        loop {
            match self.bump()? {
                c if c == quote => return Some(out),
                '\\' => match self.bump()? {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    'b' => out.push('\u{8}'),
                    'f' => out.push('\u{c}'),
                    'u' => {
                        let hex = self.rest().get(..4)?;
                        let code = u32::from_str_radix(hex, 16).ok()?;
                        self.pos += 4;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    other => out.push(other),
                },
                c => out.push(c),
            }
        }
    }

    fn number(&mut self) -> Option<Value> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        if let Ok(i) = text.parse::<i64>() {
            return Some(Value::Number(i.into()));
        }
        let f = text.parse::<f64>().ok()?;
        Some(Number::from_f64(f).map_or(Value::Null, Value::Number))
    }

    fn expr(&mut self) -> Option<Expr> {
        self.skip_ws();
        match self.peek()? {
            '"' | '\'' => return self.string_literal().map(|s| Expr::Value(Value::String(s))),
            '[' => return self.array_literal(),
            '{' => return self.object_literal(),
            c if c.is_ascii_digit() || c == '-' => return self.number().map(Expr::Value),
            _ => {}
        }
        if self.eat("new Date(") {
            self.skip_ws();
            let millis = self.number()?;
            self.skip_ws();
            self.expect(")")?;
            return Some(Expr::Value(millis));
        }
        if self.eat("new ") {
            while self
                .peek()
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '$' | '.'))
            {
                self.bump();
            }
            self.expect("()")?;
            return Some(Expr::Object(Vec::new()));
        }
        let word = self.ident()?;
        Some(match word.as_str() {
            "true" => Expr::Value(Value::Bool(true)),
            "false" => Expr::Value(Value::Bool(false)),
            "null" | "undefined" | "NaN" | "Infinity" => Expr::Value(Value::Null),
            _ => Expr::Ref(word),
        })
    }

    fn array_literal(&mut self) -> Option<Expr> {
        self.expect("[")?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.eat("]") {
                return Some(Expr::Array(items));
            }
            items.push(self.expr()?);
            self.skip_ws();
            if !self.eat(",") {
                self.skip_ws();
                self.expect("]")?;
                return Some(Expr::Array(items));
            }
        }
    }

    fn object_literal(&mut self) -> Option<Expr> {
        self.expect("{")?;
        let mut fields = Vec::new();
        loop {
            self.skip_ws();
            if self.eat("}") {
                return Some(Expr::Object(fields));
            }
            let key = match self.peek()? {
                '"' | '\'' => self.string_literal()?,
                _ => self.ident()?,
            };
            self.skip_ws();
            self.expect(":")?;
            fields.push((key, self.expr()?));
            self.skip_ws();
            if !self.eat(",") {
                self.skip_ws();
                self.expect("}")?;
                return Some(Expr::Object(fields));
            }
        }
    }
}
