//! Tokenizer for `${...}` templates and the identifier rules of the
//! interpolation scope.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

/// Words that can never be bound as scope variables because the expression
/// language reserves them.
const RESERVED_WORDS: &[&str] = &[
    "as", "async", "await", "break", "call", "case", "catch", "const", "continue", "curry",
    "debug", "default", "do", "else", "eval", "exit", "export", "false", "Fn", "fn", "for",
    "global", "go", "goto", "if", "import", "in", "is_def_fn", "is_def_var", "is_shared", "let",
    "loop", "match", "module", "new", "nil", "null", "package", "print", "private", "protected",
    "public", "return", "shared", "spawn", "static", "super", "switch", "sync", "this",
    "thread", "throw", "true", "try", "type_of", "until", "use", "var", "void", "while", "with",
    "yield",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSegment {
    Literal(String),
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated template expression at offset {offset}")]
    Unterminated { offset: usize },
    #[error("empty template expression at offset {offset}")]
    EmptyExpression { offset: usize },
}

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[a-zA-Z_$][a-zA-Z0-9_$]*$").expect("identifier regex must compile")
    })
}

pub fn is_valid_variable_name(name: &str) -> bool {
    !RESERVED_WORDS.contains(&name) && identifier_regex().is_match(name)
}

/// Name under which a variable is pushed into the evaluation scope. The
/// expression language has no `$` in identifiers, so those names are mangled.
pub fn scope_symbol(name: &str) -> String {
    if name.contains('$') {
        format!("__yd{}", name.replace('$', "_dollar_"))
    } else {
        name.to_string()
    }
}

pub fn contains_template(text: &str) -> bool {
    text.contains("${")
}

pub fn parse_template(template: &str) -> Result<Vec<TemplateSegment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut cursor = 0usize;

    while cursor < template.len() {
        let rest = &template[cursor..];
        if rest.starts_with("\\${") {
            literal.push_str("${");
            cursor += 3;
            continue;
        }
        if rest.starts_with("${") {
            let start = cursor + 2;
            let end = find_expression_end(template, start)
                .ok_or(TemplateError::Unterminated { offset: cursor })?;
            let expr = template[start..end].trim();
            if expr.is_empty() {
                return Err(TemplateError::EmptyExpression { offset: cursor });
            }
            if !literal.is_empty() {
                segments.push(TemplateSegment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(TemplateSegment::Expression(expr.to_string()));
            cursor = end + 1;
            continue;
        }
        let Some(ch) = rest.chars().next() else {
            break;
        };
        literal.push(ch);
        cursor += ch.len_utf8();
    }

    if !literal.is_empty() {
        segments.push(TemplateSegment::Literal(literal));
    }
    Ok(segments)
}

/// Byte offset of the `}` closing the expression that starts at `start`.
fn find_expression_end(source: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (offset, ch) in source[start..].char_indices() {
        if let Some(open) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '{' => depth += 1,
            '}' if depth == 0 => return Some(start + offset),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
}

/// Rewrites `$`-bearing identifiers of an expression to their scope symbols.
/// String literals and property names after `.` are left alone.
pub fn rewrite_scope_symbols(expr: &str) -> String {
    if !expr.contains('$') {
        return expr.to_string();
    }

    let mut out = String::with_capacity(expr.len() + 16);
    let mut token = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in expr.chars() {
        if let Some(open) = quote {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        if is_identifier_char(ch) {
            token.push(ch);
            continue;
        }
        flush_token(&mut out, &mut token);
        if matches!(ch, '"' | '\'' | '`') {
            quote = Some(ch);
        }
        out.push(ch);
    }
    flush_token(&mut out, &mut token);
    out
}

fn flush_token(out: &mut String, token: &mut String) {
    if token.is_empty() {
        return;
    }
    let trimmed = out.trim_end();
    let is_property = trimmed.ends_with('.') && !trimmed.ends_with("..");
    let starts_with_digit = token.starts_with(|ch: char| ch.is_ascii_digit());
    if token.contains('$') && !is_property && !starts_with_digit {
        out.push_str(&scope_symbol(token));
    } else {
        out.push_str(token);
    }
    token.clear();
}

#[cfg(test)]
mod template_tests {
    use super::*;

    #[test]
    fn parse_template_splits_literals_and_expressions() {
        let segments = parse_template("https://${host}:${port}/api").expect("parse");
        assert_eq!(
            segments,
            vec![
                TemplateSegment::Literal("https://".to_string()),
                TemplateSegment::Expression("host".to_string()),
                TemplateSegment::Literal(":".to_string()),
                TemplateSegment::Expression("port".to_string()),
                TemplateSegment::Literal("/api".to_string()),
            ]
        );
    }

    #[test]
    fn parse_template_keeps_braces_and_quotes_inside_expressions() {
        let segments = parse_template(r#"${#{a: "}"}.a}!"#).expect("parse");
        assert_eq!(
            segments,
            vec![
                TemplateSegment::Expression(r#"#{a: "}"}.a"#.to_string()),
                TemplateSegment::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn parse_template_treats_lone_dollar_and_escape_as_literal() {
        assert_eq!(
            parse_template("cost: $5 \\${x}").expect("parse"),
            vec![TemplateSegment::Literal("cost: $5 ${x}".to_string())]
        );
    }

    #[test]
    fn parse_template_reports_unterminated_and_empty_expressions() {
        assert_eq!(
            parse_template("a ${b"),
            Err(TemplateError::Unterminated { offset: 2 })
        );
        assert_eq!(
            parse_template("${  }"),
            Err(TemplateError::EmptyExpression { offset: 0 })
        );
    }

    #[test]
    fn variable_name_validation_rejects_keywords_and_symbols() {
        assert!(is_valid_variable_name("host"));
        assert!(is_valid_variable_name("_private"));
        assert!(is_valid_variable_name("$token"));
        assert!(is_valid_variable_name("a1$b"));
        assert!(!is_valid_variable_name("bad-key"));
        assert!(!is_valid_variable_name("1abc"));
        assert!(!is_valid_variable_name(""));
        assert!(!is_valid_variable_name("let"));
        assert!(!is_valid_variable_name("true"));
    }

    #[test]
    fn rewrite_scope_symbols_skips_strings_and_properties() {
        assert_eq!(rewrite_scope_symbols("a + b"), "a + b");
        assert_eq!(
            rewrite_scope_symbols(r#"$btoa(user + ":$x") + $env.$odd"#),
            r#"__yd_dollar_btoa(user + ":$x") + __yd_dollar_env.$odd"#
        );
        assert_eq!(scope_symbol("a$b"), "__yda_dollar_b");
        assert_eq!(scope_symbol("plain"), "plain");
    }
}
