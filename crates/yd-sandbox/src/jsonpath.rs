//! JSONPath queries for scripts: `$`, `.name`, `.*`, `['name']`, `[n]`,
//! `[-n]`, `[*]`, unions `['a','b']` / `[0,2]`, slices `[start:end:step]`,
//! filters `[?(@.price < 10 && @.tags)]`, `..name` and `..*`.

use std::cmp::Ordering;

use rhai::{Array, Dynamic, Engine, EvalAltResult};
use serde_json::{Number, Value};
use thiserror::Error;
use yd_interp::helpers::rhai_bridge::{dynamic_to_json, json_to_dynamic};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonPathError {
    #[error("Invalid JSONPath \"{path}\": {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("jp: value is not valid JSON ({0})")]
    InvalidJson(String),
    #[error("jp: {0}")]
    UnsupportedValue(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Child(String),
    Index(i64),
    Wildcard,
    Descendant(String),
    DescendantWildcard,
    Union(Vec<Segment>),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    /// `@` followed by a relative path.
    Current(Vec<Segment>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Truthy(Operand),
    Compare(Operand, CmpOp, Operand),
    Not(Box<Filter>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Operand(Operand),
    Cmp(CmpOp),
    And,
    Or,
    Not,
    Open,
    Close,
}

fn invalid(path: &str, reason: impl Into<String>) -> JsonPathError {
    JsonPathError::InvalidPath {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn take_name(rest: &str) -> (&str, &str) {
    let end = rest
        .find(|ch: char| ch == '.' || ch == '[')
        .unwrap_or(rest.len());
    (&rest[..end], &rest[end..])
}

/// Byte offset of the `]` closing a bracket whose `[` was already consumed.
fn closing_bracket(text: &str) -> Option<usize> {
    let mut quote = None;
    let mut depth = 0usize;
    for (offset, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[' | '(') => depth += 1,
            (None, ']') if depth == 0 => return Some(offset),
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote = None;
    let mut start = 0;
    for (offset, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, _) if ch == separator => {
                parts.push(&text[start..offset]);
                start = offset + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

fn unquote(text: &str) -> Option<&str> {
    text.strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .or_else(|| text.strip_prefix('"').and_then(|inner| inner.strip_suffix('"')))
}

fn parse_path(path: &str) -> Result<Vec<Segment>, JsonPathError> {
    let Some(rest) = path.trim().strip_prefix('$') else {
        return Err(invalid(path, "must start with '$'"));
    };
    parse_segments(path, rest)
}

fn parse_segments(path: &str, mut rest: &str) -> Result<Vec<Segment>, JsonPathError> {
    let mut segments = Vec::new();
    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("..") {
            if let Some(after_star) = after.strip_prefix('*') {
                segments.push(Segment::DescendantWildcard);
                rest = after_star;
                continue;
            }
            let (name, tail) = take_name(after);
            if name.is_empty() {
                return Err(invalid(path, "expected a name after '..'"));
            }
            segments.push(Segment::Descendant(name.to_string()));
            rest = tail;
        } else if let Some(after) = rest.strip_prefix('.') {
            if let Some(after_star) = after.strip_prefix('*') {
                segments.push(Segment::Wildcard);
                rest = after_star;
                continue;
            }
            let (name, tail) = take_name(after);
            if name.is_empty() {
                return Err(invalid(path, "expected a name after '.'"));
            }
            segments.push(Segment::Child(name.to_string()));
            rest = tail;
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = closing_bracket(after).ok_or_else(|| invalid(path, "missing ']'"))?;
            segments.push(parse_bracket(path, after[..close].trim())?);
            rest = &after[close + 1..];
        } else {
            return Err(invalid(path, format!("unexpected token at \"{}\"", rest)));
        }
    }
    Ok(segments)
}

fn parse_bracket(path: &str, inner: &str) -> Result<Segment, JsonPathError> {
    if let Some(expression) = inner.strip_prefix('?') {
        let tokens = tokenize_filter(path, expression)?;
        return parse_filter(path, &tokens).map(Segment::Filter);
    }
    let members = split_top_level(inner, ',');
    if members.len() > 1 {
        return members
            .into_iter()
            .map(|member| parse_member(path, member.trim()))
            .collect::<Result<Vec<_>, _>>()
            .map(Segment::Union);
    }
    if split_top_level(inner, ':').len() > 1 {
        return parse_slice(path, inner);
    }
    parse_member(path, inner)
}

fn parse_member(path: &str, member: &str) -> Result<Segment, JsonPathError> {
    if member == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Some(name) = unquote(member) {
        return Ok(Segment::Child(name.to_string()));
    }
    member
        .parse::<i64>()
        .map(Segment::Index)
        .map_err(|_| invalid(path, format!("unsupported selector [{}]", member)))
}

fn parse_slice(path: &str, inner: &str) -> Result<Segment, JsonPathError> {
    let parts = inner.split(':').map(str::trim).collect::<Vec<_>>();
    if parts.len() > 3 {
        return Err(invalid(path, format!("malformed slice [{}]", inner)));
    }
    let bound = |text: &str| -> Result<Option<i64>, JsonPathError> {
        if text.is_empty() {
            return Ok(None);
        }
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| invalid(path, format!("malformed slice [{}]", inner)))
    };
    let step = bound(parts.get(2).copied().unwrap_or(""))?.unwrap_or(1);
    if step == 0 {
        return Err(invalid(path, "slice step must not be 0"));
    }
    Ok(Segment::Slice {
        start: bound(parts[0])?,
        end: bound(parts[1])?,
        step,
    })
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// Length of the relative path following `@`.
fn relative_path_len(path: &str, text: &str) -> Result<usize, JsonPathError> {
    let mut offset = 0;
    while offset < text.len() {
        let rest = &text[offset..];
        if let Some(after) = rest.strip_prefix('[') {
            let close = closing_bracket(after).ok_or_else(|| invalid(path, "missing ']'"))?;
            offset += close + 2;
        } else if let Some(ch) = rest
            .chars()
            .next()
            .filter(|ch| *ch == '.' || *ch == '*' || is_name_char(*ch))
        {
            offset += ch.len_utf8();
        } else {
            break;
        }
    }
    Ok(offset)
}

fn tokenize_filter(path: &str, expression: &str) -> Result<Vec<Token>, JsonPathError> {
    let mut tokens = Vec::new();
    let mut rest = expression.trim_start();
    while let Some(ch) = rest.chars().next() {
        let (token, used) = match ch {
            '(' => (Token::Open, 1),
            ')' => (Token::Close, 1),
            '&' if rest.starts_with("&&") => (Token::And, 2),
            '|' if rest.starts_with("||") => (Token::Or, 2),
            '!' if rest.starts_with("!==") => (Token::Cmp(CmpOp::Ne), 3),
            '!' if rest.starts_with("!=") => (Token::Cmp(CmpOp::Ne), 2),
            '!' => (Token::Not, 1),
            '=' if rest.starts_with("===") => (Token::Cmp(CmpOp::Eq), 3),
            '=' if rest.starts_with("==") => (Token::Cmp(CmpOp::Eq), 2),
            '<' if rest.starts_with("<=") => (Token::Cmp(CmpOp::Le), 2),
            '<' => (Token::Cmp(CmpOp::Lt), 1),
            '>' if rest.starts_with(">=") => (Token::Cmp(CmpOp::Ge), 2),
            '>' => (Token::Cmp(CmpOp::Gt), 1),
            '@' => {
                let len = relative_path_len(path, &rest[1..])?;
                let segments = parse_segments(path, &rest[1..1 + len])?;
                (Token::Operand(Operand::Current(segments)), 1 + len)
            }
            '\'' | '"' => {
                let close = rest[1..]
                    .find(ch)
                    .ok_or_else(|| invalid(path, "unterminated string in filter"))?;
                let text = rest[1..1 + close].to_string();
                (Token::Operand(Operand::Literal(Value::String(text))), close + 2)
            }
            '-' | '0'..='9' => {
                let len = rest[1..]
                    .find(|next: char| !(next.is_ascii_digit() || next == '.'))
                    .map_or(rest.len(), |end| end + 1);
                (Token::Operand(Operand::Literal(number_literal(path, &rest[..len])?)), len)
            }
            _ if is_name_char(ch) => {
                let len = rest.find(|next: char| !is_name_char(next)).unwrap_or(rest.len());
                let literal = match &rest[..len] {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    word => return Err(invalid(path, format!("unknown word '{}' in filter", word))),
                };
                (Token::Operand(Operand::Literal(literal)), len)
            }
            _ => return Err(invalid(path, format!("unexpected '{}' in filter", ch))),
        };
        tokens.push(token);
        rest = rest[used..].trim_start();
    }
    Ok(tokens)
}

fn number_literal(path: &str, text: &str) -> Result<Value, JsonPathError> {
    if let Ok(integer) = text.parse::<i64>() {
        return Ok(Value::from(integer));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| invalid(path, format!("malformed number '{}' in filter", text)))
}

struct FilterParser<'t> {
    path: &'t str,
    tokens: &'t [Token],
    position: usize,
}

impl FilterParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.position);
        self.position += 1;
        token
    }

    fn or(&mut self) -> Result<Filter, JsonPathError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.position += 1;
            left = Filter::Or(Box::new(left), Box::new(self.and()?));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Filter, JsonPathError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.position += 1;
            left = Filter::And(Box::new(left), Box::new(self.unary()?));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Filter, JsonPathError> {
        match self.next().cloned() {
            Some(Token::Not) => Ok(Filter::Not(Box::new(self.unary()?))),
            Some(Token::Open) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(invalid(self.path, "missing ')' in filter")),
                }
            }
            Some(Token::Operand(left)) => match self.peek().cloned() {
                Some(Token::Cmp(op)) => {
                    self.position += 1;
                    match self.next().cloned() {
                        Some(Token::Operand(right)) => Ok(Filter::Compare(left, op, right)),
                        _ => Err(invalid(self.path, "comparison is missing its right side")),
                    }
                }
                _ => Ok(Filter::Truthy(left)),
            },
            _ => Err(invalid(self.path, "malformed filter expression")),
        }
    }
}

fn parse_filter(path: &str, tokens: &[Token]) -> Result<Filter, JsonPathError> {
    let mut parser = FilterParser {
        path,
        tokens,
        position: 0,
    };
    let filter = parser.or()?;
    if parser.position != tokens.len() {
        return Err(invalid(path, "trailing tokens in filter"));
    }
    Ok(filter)
}

fn operand_value(operand: &Operand, item: &Value) -> Option<Value> {
    match operand {
        Operand::Literal(value) => Some(value.clone()),
        Operand::Current(segments) => {
            let mut nodes = vec![item];
            for segment in segments {
                nodes = apply(segment, nodes);
            }
            nodes.into_iter().next().cloned()
        }
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|number| number != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(_) => true,
    }
}

fn loosely_equal(left: Option<&Value>, right: Option<&Value>) -> bool {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => true,
        (Some(Value::Number(left)), Some(Value::Number(right))) => left.as_f64() == right.as_f64(),
        (Some(left), Some(right)) => left == right,
        _ => false,
    }
}

fn ordering(left: Option<&Value>, right: Option<&Value>) -> Option<Ordering> {
    match (left?, right?) {
        (Value::Number(left), Value::Number(right)) => left.as_f64()?.partial_cmp(&right.as_f64()?),
        (Value::String(left), Value::String(right)) => Some(left.cmp(right)),
        _ => None,
    }
}

fn matches(filter: &Filter, item: &Value) -> bool {
    match filter {
        Filter::Truthy(operand) => truthy(operand_value(operand, item).as_ref()),
        Filter::Not(inner) => !matches(inner, item),
        Filter::And(left, right) => matches(left, item) && matches(right, item),
        Filter::Or(left, right) => matches(left, item) || matches(right, item),
        Filter::Compare(left, op, right) => {
            let left = operand_value(left, item);
            let right = operand_value(right, item);
            let (left, right) = (left.as_ref(), right.as_ref());
            match op {
                CmpOp::Eq => loosely_equal(left, right),
                CmpOp::Ne => !loosely_equal(left, right),
                CmpOp::Lt => ordering(left, right) == Some(Ordering::Less),
                CmpOp::Le => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
                CmpOp::Gt => ordering(left, right) == Some(Ordering::Greater),
                CmpOp::Ge => {
                    matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal))
                }
            }
        }
    }
}

fn slice_positions(len: usize, start: Option<i64>, end: Option<i64>, step: i64) -> Vec<usize> {
    let len = len as i64;
    let resolve = |index: i64| if index < 0 { index + len } else { index };
    let mut positions = Vec::new();
    if step > 0 {
        let mut index = start.map_or(0, resolve).clamp(0, len);
        let end = end.map_or(len, resolve).clamp(0, len);
        while index < end {
            positions.push(index as usize);
            index += step;
        }
    } else {
        let mut index = start.map_or(len - 1, resolve).clamp(-1, len - 1);
        let end = end.map_or(-1, resolve).clamp(-1, len - 1);
        while index > end {
            positions.push(index as usize);
            index += step;
        }
    }
    positions
}

fn collect_descendants<'a>(value: &'a Value, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(entries) => {
            for item in entries.values() {
                out.push(item);
                collect_descendants(item, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                out.push(item);
                collect_descendants(item, out);
            }
        }
        _ => {}
    }
}

fn apply<'a>(segment: &Segment, nodes: Vec<&'a Value>) -> Vec<&'a Value> {
    let mut next = Vec::new();
    for node in nodes {
        match segment {
            Segment::Child(name) => next.extend(node.get(name.as_str())),
            Segment::Index(index) => {
                if let Value::Array(items) = node {
                    let resolved = if *index < 0 {
                        items.len().checked_sub(index.unsigned_abs() as usize)
                    } else {
                        Some(*index as usize)
                    };
                    next.extend(resolved.and_then(|position| items.get(position)));
                }
            }
            Segment::Wildcard => match node {
                Value::Object(entries) => next.extend(entries.values()),
                Value::Array(items) => next.extend(items.iter()),
                _ => {}
            },
            Segment::Descendant(name) => {
                let mut scope = vec![node];
                collect_descendants(node, &mut scope);
                next.extend(scope.into_iter().filter_map(|item| item.get(name.as_str())));
            }
            Segment::DescendantWildcard => collect_descendants(node, &mut next),
            Segment::Union(members) => {
                for member in members {
                    next.extend(apply(member, vec![node]));
                }
            }
            Segment::Slice { start, end, step } => {
                if let Value::Array(items) = node {
                    next.extend(
                        slice_positions(items.len(), *start, *end, *step)
                            .into_iter()
                            .filter_map(|position| items.get(position)),
                    );
                }
            }
            Segment::Filter(filter) => match node {
                Value::Array(items) => {
                    next.extend(items.iter().filter(|item| matches(filter, item)))
                }
                Value::Object(entries) => {
                    next.extend(entries.values().filter(|item| matches(filter, item)))
                }
                _ => {}
            },
        }
    }
    next
}

/// Every value matched by `path`, in document order.
pub fn query(path: &str, value: &Value) -> Result<Vec<Value>, JsonPathError> {
    let segments = parse_path(path)?;
    let mut nodes = vec![value];
    for segment in &segments {
        nodes = apply(segment, nodes);
    }
    Ok(nodes.into_iter().cloned().collect())
}

pub fn query_first(path: &str, value: &Value) -> Result<Option<Value>, JsonPathError> {
    Ok(query(path, value)?.into_iter().next())
}

/// Strings are parsed as JSON documents; other values are queried directly.
fn document(value: Dynamic) -> Result<Value, JsonPathError> {
    if value.is_string() {
        let text = value.into_string().unwrap_or_default();
        return serde_json::from_str(&text)
            .map_err(|error| JsonPathError::InvalidJson(error.to_string()));
    }
    dynamic_to_json(value).map_err(|error| JsonPathError::UnsupportedValue(error.message))
}

fn script_error(error: JsonPathError) -> Box<EvalAltResult> {
    error.to_string().into()
}

pub fn register(engine: &mut Engine) {
    engine.register_fn(
        "jp",
        |path: &str, value: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            let document = document(value).map_err(script_error)?;
            Ok(query_first(path, &document)
                .map_err(script_error)?
                .map(|found| json_to_dynamic(&found))
                .unwrap_or(Dynamic::UNIT))
        },
    );
    engine.register_fn(
        "jp_all",
        |path: &str, value: Dynamic| -> Result<Array, Box<EvalAltResult>> {
            let document = document(value).map_err(script_error)?;
            Ok(query(path, &document)
                .map_err(script_error)?
                .iter()
                .map(json_to_dynamic)
                .collect())
        },
    );
}

#[cfg(test)]
mod jsonpath_tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "store": {
                "book": [
                    {"title": "A", "price": 8},
                    {"title": "B", "price": 12, "meta": {"title": "inner"}}
                ],
                "bike": {"color": "red"}
            },
            "odd key": 1
        })
    }

    #[test]
    fn child_and_index_selectors() {
        let doc = sample();
        assert_eq!(query_first("$.store.bike.color", &doc), Ok(Some(json!("red"))));
        assert_eq!(query_first("$.store.book[1].title", &doc), Ok(Some(json!("B"))));
        assert_eq!(query_first("$.store.book[-1].price", &doc), Ok(Some(json!(12))));
        assert_eq!(query_first("$['odd key']", &doc), Ok(Some(json!(1))));
        assert_eq!(query_first("$.store.book[5]", &doc), Ok(None));
        assert_eq!(query_first("$", &doc), Ok(Some(doc.clone())));
    }

    #[test]
    fn wildcard_and_descendant_selectors() {
        let doc = sample();
        assert_eq!(
            query("$.store.book[*].price", &doc),
            Ok(vec![json!(8), json!(12)])
        );
        assert_eq!(
            query("$..title", &doc),
            Ok(vec![json!("A"), json!("B"), json!("inner")])
        );
        assert_eq!(query("$.store.bike.*", &doc), Ok(vec![json!("red")]));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        assert!(matches!(
            query("store.book", &sample()),
            Err(JsonPathError::InvalidPath { .. })
        ));
        assert!(query("$.store[", &sample()).is_err());
        assert!(query("$.store.book[?(@.price <)]", &sample()).is_err());
        assert!(query("$.store.book[::0]", &sample()).is_err());
        assert!(query("$.store.book[?(@.price == 8]", &sample()).is_err());
    }

    #[test]
    fn filter_expressions_select_matching_children() {
        let doc = sample();
        assert_eq!(
            query("$.store.book[?(@.price < 10)].title", &doc),
            Ok(vec![json!("A")])
        );
        assert_eq!(
            query("$.store.book[?(@.title == 'B' && @.meta)].price", &doc),
            Ok(vec![json!(12)])
        );
        assert_eq!(
            query("$.store.book[?(!@.meta || @.price >= 100)].title", &doc),
            Ok(vec![json!("A")])
        );
        assert_eq!(
            query("$..book[?(@.meta.title != \"inner\")].title", &doc),
            Ok(vec![json!("A")])
        );
        assert_eq!(
            query("$.items[?(@.tags[0] === 'x')].id", &json!({"items": [
                {"id": 1, "tags": ["x"]}, {"id": 2, "tags": ["y"]}
            ]})),
            Ok(vec![json!(1)])
        );
    }

    #[test]
    fn slices_follow_start_end_step_rules() {
        let doc = json!({"n": [0, 1, 2, 3, 4]});
        assert_eq!(query("$.n[0:2]", &doc), Ok(vec![json!(0), json!(1)]));
        assert_eq!(query("$.n[-2:]", &doc), Ok(vec![json!(3), json!(4)]));
        assert_eq!(query("$.n[:10:2]", &doc), Ok(vec![json!(0), json!(2), json!(4)]));
        assert_eq!(query("$.n[::-2]", &doc), Ok(vec![json!(4), json!(2), json!(0)]));
        assert_eq!(query("$.n[3:1]", &doc), Ok(Vec::new()));
    }

    #[test]
    fn unions_keep_member_order() {
        let doc = sample();
        assert_eq!(
            query("$.store.book[0]['price','title']", &doc),
            Ok(vec![json!(8), json!("A")])
        );
        assert_eq!(
            query("$.store.book[1,0].title", &doc),
            Ok(vec![json!("B"), json!("A")])
        );
    }

    #[test]
    fn script_functions_parse_strings_and_return_unit_when_missing() {
        let mut engine = Engine::new();
        register(&mut engine);
        let title = engine
            .eval::<String>(r#"jp("$.a[0].b", `{"a":[{"b":"x"}]}`)"#)
            .expect("jp should evaluate");
        assert_eq!(title, "x");
        let missing = engine
            .eval::<Dynamic>(r#"jp("$.nope", #{a: 1})"#)
            .expect("jp should evaluate");
        assert!(missing.is_unit());
        let all = engine
            .eval::<Array>(r#"jp_all("$..id", #{a: #{id: 1}, b: [#{id: 2}]})"#)
            .expect("jp_all should evaluate");
        assert_eq!(all.len(), 2);
        assert!(engine.eval::<Dynamic>(r#"jp("$.a", "{not json")"#).is_err());
    }
}
