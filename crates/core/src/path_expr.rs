//! JSON path expressions
//!
//! A small JSONPath dialect evaluated against `serde_json::Value`. It is used
//! to pull child objects out of parent input values (`$.scans`), to filter
//! candidates with input matchers (`@.scan-type in ["T1", "T1w"]`), and to
//! expand `^...^` substrings in templates.
//!
//! ## Syntax
//!
//! - `$` document root (optional: `label` is read as `$.label`), `@` current item
//! - `.name`, `['name']` child access; names may contain `-`
//! - `..name` recursive descent
//! - `[*]` / `.*` wildcard, `[n]` index (negative counts from the end)
//! - `[?(filter)]` keeps array elements (or the object itself) matching `filter`
//!
//! Filters compare operands (`@.path`, `$.path`, strings, numbers, booleans,
//! `null`, `[lists]`) with `==`, `!=`, `<`, `<=`, `>`, `>=`, `in`, `nin` and
//! `=~` (regex, as `/re/i` or a string). A bare path tests existence.
//! Combine with `!`, `&&`, `||` and parentheses.
//!
//! Evaluation always yields a list of matches; a path that selects nothing
//! yields an empty list rather than an error.

use crate::errors::ResolutionError;
use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// A parsed path expression
#[derive(Debug, Clone)]
pub struct PathExpr {
    source: String,
    root: Root,
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Root {
    Document,
    Current,
}

#[derive(Debug, Clone)]
enum Segment {
    Child(String),
    Descendant(String),
    Wildcard,
    Index(i64),
    Filter(FilterExpr),
}

impl PathExpr {
    /// Parse an expression
    pub fn parse(source: &str) -> Result<Self, ResolutionError> {
        let (root, segments) = parse_segments(source).map_err(|message| {
            ResolutionError::PathExpression {
                expression: source.to_string(),
                message,
            }
        })?;
        Ok(Self {
            source: source.to_string(),
            root,
            segments,
        })
    }

    /// The expression text as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Evaluate against a document, returning owned copies of every match
    pub fn evaluate(&self, document: &Value) -> Vec<Value> {
        self.select(document, document).into_iter().cloned().collect()
    }

    fn select<'a>(&self, current: &'a Value, root: &'a Value) -> Vec<&'a Value> {
        let start = match self.root {
            Root::Document => root,
            Root::Current => current,
        };
        let mut nodes = vec![start];
        for segment in &self.segments {
            let mut next = Vec::new();
            for node in nodes {
                apply_segment(segment, node, root, &mut next);
            }
            nodes = next;
        }
        nodes
    }
}

/// Parse and evaluate in one step
pub fn select(expression: &str, document: &Value) -> Result<Vec<Value>, ResolutionError> {
    Ok(PathExpr::parse(expression)?.evaluate(document))
}

/// Render a JSON value as an input value string: strings are taken raw,
/// everything else is serialized.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apply_segment<'a>(segment: &Segment, node: &'a Value, root: &'a Value, out: &mut Vec<&'a Value>) {
    match segment {
        Segment::Child(name) => {
            if let Some(child) = node.as_object().and_then(|map| map.get(name)) {
                out.push(child);
            }
        }
        Segment::Descendant(name) => collect_descendants(node, name, out),
        Segment::Wildcard => match node {
            Value::Object(map) => out.extend(map.values()),
            Value::Array(items) => out.extend(items.iter()),
            _ => {}
        },
        Segment::Index(index) => {
            if let Value::Array(items) = node {
                let len = items.len() as i64;
                let idx = if *index < 0 { len + index } else { *index };
                if (0..len).contains(&idx) {
                    out.push(&items[idx as usize]);
                }
            }
        }
        Segment::Filter(expr) => match node {
            Value::Array(items) => {
                out.extend(items.iter().filter(|item| expr.eval(item, root)));
            }
            Value::Object(_) => {
                if expr.eval(node, root) {
                    out.push(node);
                }
            }
            _ => {}
        },
    }
}

fn collect_descendants<'a>(node: &'a Value, name: &str, out: &mut Vec<&'a Value>) {
    match node {
        Value::Object(map) => {
            if let Some(found) = map.get(name) {
                out.push(found);
            }
            for child in map.values() {
                collect_descendants(child, name, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_descendants(child, name, out);
            }
        }
        _ => {}
    }
}

const NAME_TERMINATORS: &str = ".[]()=!<>&|,'\"~";

fn scan_name(chars: &[char], start: usize) -> (String, usize) {
    let mut i = start;
    while i < chars.len() && !chars[i].is_whitespace() && !NAME_TERMINATORS.contains(chars[i]) {
        i += 1;
    }
    (chars[start..i].iter().collect(), i)
}

fn find_closing_bracket(chars: &[char], open: usize) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = open;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
        } else {
            match c {
                '\'' | '"' => quote = Some(c),
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    Err(format!("unclosed '[' at position {}", open))
}

fn parse_segments(source: &str) -> Result<(Root, Vec<Segment>), String> {
    let chars: Vec<char> = source.trim().chars().collect();
    let mut segments = Vec::new();

    let (root, mut i) = match chars.first() {
        None => return Err("empty expression".to_string()),
        Some('$') => (Root::Document, 1),
        Some('@') => (Root::Current, 1),
        Some(_) => {
            let (name, next) = scan_name(&chars, 0);
            if name.is_empty() {
                return Err(format!("unexpected character '{}' at position 0", chars[0]));
            }
            segments.push(Segment::Child(name));
            (Root::Document, next)
        }
    };

    while i < chars.len() {
        match chars[i] {
            '.' if chars.get(i + 1) == Some(&'.') => {
                let (name, next) = scan_name(&chars, i + 2);
                if name.is_empty() {
                    return Err(format!("expected a field name after '..' at position {}", i));
                }
                segments.push(Segment::Descendant(name));
                i = next;
            }
            '.' if chars.get(i + 1) == Some(&'*') => {
                segments.push(Segment::Wildcard);
                i += 2;
            }
            '.' => {
                let (name, next) = scan_name(&chars, i + 1);
                if name.is_empty() {
                    return Err(format!("expected a field name at position {}", i + 1));
                }
                segments.push(Segment::Child(name));
                i = next;
            }
            '[' => {
                let close = find_closing_bracket(&chars, i)?;
                let inner: String = chars[i + 1..close].iter().collect();
                segments.push(parse_bracket(inner.trim())?);
                i = close + 1;
            }
            c => return Err(format!("unexpected character '{}' at position {}", c, i)),
        }
    }

    Ok((root, segments))
}

fn parse_bracket(inner: &str) -> Result<Segment, String> {
    if inner == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(rest) = inner.strip_prefix('?') {
        let rest = rest.trim();
        let body = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(|| format!("filter must be written as [?(...)], got [{}]", inner))?;
        return Ok(Segment::Filter(parse_filter(body)?));
    }
    if inner.len() >= 2
        && ((inner.starts_with('\'') && inner.ends_with('\''))
            || (inner.starts_with('"') && inner.ends_with('"')))
    {
        return Ok(Segment::Child(inner[1..inner.len() - 1].to_string()));
    }
    inner
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| format!("unsupported bracket selector [{}]", inner))
}

/// A filter predicate, as used by input matchers
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    expr: FilterExpr,
}

impl Filter {
    /// Parse a filter expression such as `@.type == 'T1' || @.quality =~ /usable/i`
    pub fn parse(source: &str) -> Result<Self, ResolutionError> {
        let expr = parse_filter(source).map_err(|message| ResolutionError::PathExpression {
            expression: source.to_string(),
            message,
        })?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// `@.field == value`, comparing loosely so `"12"` matches `12`
    pub fn field_equals(field: &str, value: &str) -> Self {
        Self {
            source: format!("@.{} == '{}'", field, value),
            expr: FilterExpr::Compare(
                Operand::Path(PathExpr {
                    source: format!("@.{}", field),
                    root: Root::Current,
                    segments: vec![Segment::Child(field.to_string())],
                }),
                CmpOp::Eq,
                Operand::Literal(Value::String(value.to_string())),
            ),
        }
    }

    /// Either filter matches
    pub fn or(self, other: Filter) -> Filter {
        Filter {
            source: format!("({}) || ({})", self.source, other.source),
            expr: FilterExpr::Or(Box::new(self.expr), Box::new(other.expr)),
        }
    }

    /// Both filters match
    pub fn and(self, other: Filter) -> Filter {
        Filter {
            source: format!("({}) && ({})", self.source, other.source),
            expr: FilterExpr::And(Box::new(self.expr), Box::new(other.expr)),
        }
    }

    /// The filter text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `item` satisfies the filter (with `item` as both `@` and `$`)
    pub fn matches(&self, item: &Value) -> bool {
        self.expr.eval(item, item)
    }

    /// Keep the candidates that satisfy the filter
    pub fn retain(&self, candidates: Vec<Value>) -> Vec<Value> {
        candidates.into_iter().filter(|c| self.matches(c)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Nin,
    Match,
}

#[derive(Debug, Clone)]
enum Operand {
    Path(PathExpr),
    Literal(Value),
    Regex(Regex),
}

#[derive(Debug, Clone)]
enum FilterExpr {
    Or(Box<FilterExpr>, Box<FilterExpr>),
    And(Box<FilterExpr>, Box<FilterExpr>),
    Not(Box<FilterExpr>),
    Compare(Operand, CmpOp, Operand),
    Exists(PathExpr),
}

impl FilterExpr {
    fn eval(&self, current: &Value, root: &Value) -> bool {
        match self {
            FilterExpr::Or(a, b) => a.eval(current, root) || b.eval(current, root),
            FilterExpr::And(a, b) => a.eval(current, root) && b.eval(current, root),
            FilterExpr::Not(inner) => !inner.eval(current, root),
            FilterExpr::Exists(path) => !path.select(current, root).is_empty(),
            FilterExpr::Compare(left, op, right) => compare(left, *op, right, current, root),
        }
    }
}

impl Operand {
    fn value(&self, current: &Value, root: &Value) -> Option<Value> {
        match self {
            Operand::Literal(v) => Some(v.clone()),
            Operand::Regex(re) => Some(Value::String(re.as_str().to_string())),
            Operand::Path(path) => {
                let mut found = path.select(current, root);
                match found.len() {
                    0 => None,
                    1 => found.pop().cloned(),
                    _ => Some(Value::Array(found.into_iter().cloned().collect())),
                }
            }
        }
    }
}

fn compare(left: &Operand, op: CmpOp, right: &Operand, current: &Value, root: &Value) -> bool {
    let Some(lhs) = left.value(current, root) else {
        return false;
    };

    if op == CmpOp::Match {
        let text = match &lhs {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return false,
        };
        return match right {
            Operand::Regex(re) => re.is_match(&text),
            _ => false,
        };
    }

    let Some(rhs) = right.value(current, root) else {
        return false;
    };

    match op {
        CmpOp::Eq => loose_eq(&lhs, &rhs),
        CmpOp::Ne => !loose_eq(&lhs, &rhs),
        CmpOp::In => contained_in(&lhs, &rhs),
        CmpOp::Nin => !contained_in(&lhs, &rhs),
        CmpOp::Lt => order(&lhs, &rhs) == Some(Ordering::Less),
        CmpOp::Le => matches!(order(&lhs, &rhs), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => order(&lhs, &rhs) == Some(Ordering::Greater),
        CmpOp::Ge => matches!(order(&lhs, &rhs), Some(Ordering::Greater | Ordering::Equal)),
        CmpOp::Match => false,
    }
}

fn contained_in(needle: &Value, haystack: &Value) -> bool {
    let Value::Array(options) = haystack else {
        return loose_eq(needle, haystack);
    };
    match needle {
        Value::Array(values) => values.iter().any(|v| options.iter().any(|o| loose_eq(v, o))),
        single => options.iter().any(|o| loose_eq(single, o)),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            s.trim().parse::<f64>().ok() == n.as_f64()
        }
        (Value::String(s), Value::Bool(b)) | (Value::Bool(b), Value::String(s)) => {
            s.eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::String(s), Value::Number(n)) => s.trim().parse::<f64>().ok()?.partial_cmp(&n.as_f64()?),
        (Value::Number(n), Value::String(s)) => n.as_f64()?.partial_cmp(&s.trim().parse::<f64>().ok()?),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Str(String),
    Num(f64),
    Bool(bool),
    Null,
    Regex(String),
    LBracket,
    RBracket,
    Comma,
    LParen,
    RParen,
    Op(CmpOp),
    And,
    Or,
    Not,
}

fn lex_filter(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if c.is_whitespace() => i += 1,
            '@' | '$' => {
                let end = scan_path_end(&chars, i);
                tokens.push(Token::Path(chars[i..end].iter().collect()));
                i = end;
            }
            '\'' | '"' => {
                let (text, end) = scan_string(&chars, i)?;
                tokens.push(Token::Str(text));
                i = end;
            }
            '/' => {
                let (pattern, end) = scan_regex(&chars, i)?;
                tokens.push(Token::Regex(pattern));
                i = end;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Eq));
                i += 2;
            }
            '=' if next == Some('~') => {
                tokens.push(Token::Op(CmpOp::Match));
                i += 2;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Op(CmpOp::Ne));
                i += 2;
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let op = match (c, next == Some('=')) {
                    ('<', true) => CmpOp::Le,
                    ('<', false) => CmpOp::Lt,
                    (_, true) => CmpOp::Ge,
                    (_, false) => CmpOp::Gt,
                };
                tokens.push(Token::Op(op));
                i += if next == Some('=') { 2 } else { 1 };
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            c if c == '-' || c.is_ascii_digit() => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let number = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Num(number));
            }
            c if c.is_alphabetic() => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "null" => Token::Null,
                    "in" => Token::Op(CmpOp::In),
                    "nin" => Token::Op(CmpOp::Nin),
                    _ => return Err(format!("unexpected word '{}'", word)),
                });
            }
            c => return Err(format!("unexpected character '{}' at position {}", c, i)),
        }
    }

    Ok(tokens)
}

fn scan_path_end(chars: &[char], start: usize) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' if depth > 0 => quote = Some(c),
            '[' => depth += 1,
            ']' if depth == 0 => break,
            ']' => depth -= 1,
            _ if depth > 0 => {}
            c if c.is_whitespace() || "=!<>&|,()".contains(c) => break,
            _ => {}
        }
        i += 1;
    }
    i
}

fn scan_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' && i + 1 < chars.len() {
            text.push(chars[i + 1]);
            i += 2;
            continue;
        }
        if c == quote {
            return Ok((text, i + 1));
        }
        text.push(c);
        i += 1;
    }
    Err(format!("unterminated string starting at position {}", start))
}

fn scan_regex(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let mut pattern = String::new();
    let mut i = start + 1;
    loop {
        match chars.get(i) {
            None => return Err(format!("unterminated regex starting at position {}", start)),
            Some('\\') if chars.get(i + 1) == Some(&'/') => {
                pattern.push('/');
                i += 2;
            }
            Some('/') => {
                i += 1;
                break;
            }
            Some(c) => {
                pattern.push(*c);
                i += 1;
            }
        }
    }
    let mut case_insensitive = false;
    while let Some(flag) = chars.get(i).filter(|c| c.is_ascii_alphabetic()) {
        match *flag {
            'i' => case_insensitive = true,
            other => return Err(format!("unsupported regex flag '{}'", other)),
        }
        i += 1;
    }
    if case_insensitive {
        pattern.insert_str(0, "(?i)");
    }
    Ok((pattern, i))
}

fn parse_filter(source: &str) -> Result<FilterExpr, String> {
    let tokens = lex_filter(source)?;
    if tokens.is_empty() {
        return Err("empty filter".to_string());
    }
    let mut parser = FilterParser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!(
            "unexpected trailing token {:?}",
            parser.tokens[parser.pos]
        ));
    }
    Ok(expr)
}

struct FilterParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl FilterParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, String> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = FilterExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<FilterExpr, String> {
        let mut left = self.parse_unary()?;
        while self.eat(&Token::And) {
            let right = self.parse_unary()?;
            left = FilterExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, String> {
        if self.eat(&Token::Not) {
            return Ok(FilterExpr::Not(Box::new(self.parse_unary()?)));
        }
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            if !self.eat(&Token::RParen) {
                return Err("missing ')'".to_string());
            }
            return Ok(inner);
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<FilterExpr, String> {
        let left = self.parse_operand()?;
        let op = match self.peek() {
            Some(Token::Op(op)) => *op,
            _ => {
                return match left {
                    Operand::Path(path) => Ok(FilterExpr::Exists(path)),
                    other => Err(format!("expected a comparison after {:?}", other)),
                };
            }
        };
        self.pos += 1;
        let mut right = self.parse_operand()?;
        if op == CmpOp::Match {
            right = match right {
                Operand::Literal(Value::String(pattern)) => Operand::Regex(
                    Regex::new(&pattern).map_err(|e| format!("invalid regex: {}", e))?,
                ),
                Operand::Regex(re) => Operand::Regex(re),
                _ => return Err("'=~' requires a regex on its right-hand side".to_string()),
            };
        }
        Ok(FilterExpr::Compare(left, op, right))
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.advance() {
            Some(Token::Path(text)) => {
                let (root, segments) = parse_segments(&text)?;
                Ok(Operand::Path(PathExpr {
                    source: text,
                    root,
                    segments,
                }))
            }
            Some(Token::Str(s)) => Ok(Operand::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Operand::Literal(number_value(n))),
            Some(Token::Bool(b)) => Ok(Operand::Literal(Value::Bool(b))),
            Some(Token::Null) => Ok(Operand::Literal(Value::Null)),
            Some(Token::Regex(pattern)) => Regex::new(&pattern)
                .map(Operand::Regex)
                .map_err(|e| format!("invalid regex: {}", e)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Operand::Literal(Value::Array(items)));
                }
                loop {
                    match self.parse_operand()? {
                        Operand::Literal(v) => items.push(v),
                        _ => return Err("list literals may only contain literals".to_string()),
                    }
                    if self.eat(&Token::RBracket) {
                        break;
                    }
                    if !self.eat(&Token::Comma) {
                        return Err("expected ',' or ']' in list".to_string());
                    }
                }
                Ok(Operand::Literal(Value::Array(items)))
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of filter".to_string()),
        }
    }
}

fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
