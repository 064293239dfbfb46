//! Placeholder Resolver
//!
//! Command templates carry `{expression}` tokens. An expression is either a
//! literal top-level key of the context or a path `ident(.ident|[int])*`.
//! Resolution never fails loudly: unresolved tokens stay verbatim and are
//! reported as missing.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

use crate::hooks::HookMap;
use crate::value::Value;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"))
}

/// One traversal step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    Key(String),
    Index(usize),
}

/// Parse `ident(.ident|[int])*`. Returns `None` for anything else.
pub fn parse_path(expr: &str) -> Option<Vec<PathStep>> {
    let bytes = expr.as_bytes();
    let mut steps = Vec::new();
    let mut pos = 0;

    let ident = |start: usize| -> Option<usize> {
        let first = *bytes.get(start)?;
        if !(first.is_ascii_alphabetic() || first == b'_') {
            return None;
        }
        let mut end = start + 1;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
        Some(end)
    };

    let end = ident(pos)?;
    steps.push(PathStep::Key(expr[pos..end].to_string()));
    pos = end;

    while pos < bytes.len() {
        match bytes[pos] {
            b'.' => {
                let end = ident(pos + 1)?;
                steps.push(PathStep::Key(expr[pos + 1..end].to_string()));
                pos = end;
            }
            b'[' => {
                let close = pos + 1 + expr[pos + 1..].find(']')?;
                let digits = &expr[pos + 1..close];
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return None;
                }
                steps.push(PathStep::Index(digits.parse().ok()?));
                pos = close + 1;
            }
            _ => return None,
        }
    }

    Some(steps)
}

/// Walk a parsed path against the context.
pub fn lookup<'a>(ctx: &'a Value, steps: &[PathStep]) -> Option<&'a Value> {
    steps.iter().try_fold(ctx, |current, step| match step {
        PathStep::Key(key) => current.get(key),
        PathStep::Index(idx) => current.index(*idx),
    })
}

/// Resolve one expression: exact top-level key first, then path traversal.
pub fn resolve<'a>(expr: &str, ctx: &'a Value) -> Option<&'a Value> {
    ctx.get(expr)
        .or_else(|| parse_path(expr).and_then(|steps| lookup(ctx, &steps)))
}

/// Every `{...}` token body in the sequence.
pub fn find_placeholders<I, S>(seq: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut found = BTreeSet::new();
    for line in seq {
        for caps in placeholder_re().captures_iter(line.as_ref()) {
            found.insert(caps[1].to_string());
        }
    }
    found
}

fn render_line(line: &str, ctx: &Value, missing: &mut BTreeSet<String>) -> String {
    placeholder_re()
        .replace_all(line, |caps: &regex::Captures| match resolve(&caps[1], ctx) {
            Some(value) => value.to_string(),
            None => {
                missing.insert(caps[1].to_string());
                caps[0].to_string()
            }
        })
        .into_owned()
}

/// Render a sequence against the context.
///
/// Returns the rendered lines (same length and order as the input) and the
/// set of raw expressions that could not be resolved.
pub fn render<I, S>(seq: I, ctx: &Value) -> (Vec<String>, BTreeSet<String>)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut missing = BTreeSet::new();
    let rendered = seq
        .into_iter()
        .map(|line| render_line(line.as_ref(), ctx, &mut missing))
        .collect();
    (rendered, missing)
}

/// Render every hook of a map; missing expressions are unioned.
pub fn render_hooks(hooks: &HookMap, ctx: &Value) -> (HookMap, BTreeSet<String>) {
    let mut missing = BTreeSet::new();
    let rendered = hooks
        .iter()
        .map(|(name, seq)| {
            let (lines, miss) = render(seq, ctx);
            missing.extend(miss);
            (name.clone(), lines)
        })
        .collect();
    (rendered, missing)
}
