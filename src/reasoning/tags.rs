// src/reasoning/tags.rs
//! Static inference of thinking delimiters from a chat template.
//!
//! A template that renders past reasoning usually wraps it in the same tags the
//! model emits, e.g. `{% for message in messages %}...<think>{{ message.thinking }}</think>...`.
//! The walker looks for the first output of a thinking-like field inside a loop
//! over the messages, then reads the literal text around it: the neighbouring
//! string operands when the field is part of a concatenation, otherwise the
//! text that opens and closes the enclosing body.

use super::ThinkingTags;
use crate::template::{
    concat_operands, field_refs, references, string_constant, walk, FieldRef, NodeRef, Visitor,
};
use minijinja::machinery::ast::{Expr, Stmt};

const THINKING_FIELDS: &[&str] = &["thinking", "reasoning_content", "reasoning"];

fn is_thinking_attribute(field: &FieldRef) -> bool {
    let name = field.field();
    field.path().len() > 1 && THINKING_FIELDS.iter().any(|f| name.eq_ignore_ascii_case(f))
}

fn is_messages_segment(segment: &str) -> bool {
    let segment = segment.to_ascii_lowercase();
    segment == "messages" || segment.ends_with("_messages")
}

/// Trimmed constant text a statement starts with.
fn leading_text<'a>(stmt: &'a Stmt<'_>) -> Option<&'a str> {
    match stmt {
        Stmt::EmitRaw(raw) => Some(raw.raw.trim()),
        Stmt::EmitExpr(emit) => concat_operands(&emit.expr)
            .first()
            .copied()
            .and_then(string_constant)
            .map(str::trim),
        _ => None,
    }
}

/// Trimmed constant text a statement ends with.
fn trailing_text<'a>(stmt: &'a Stmt<'_>) -> Option<&'a str> {
    match stmt {
        Stmt::EmitRaw(raw) => Some(raw.raw.trim()),
        Stmt::EmitExpr(emit) => concat_operands(&emit.expr)
            .last()
            .copied()
            .and_then(string_constant)
            .map(str::trim),
        _ => None,
    }
}

fn is_blank(stmt: &Stmt<'_>) -> bool {
    matches!(stmt, Stmt::EmitRaw(raw) if raw.raw.trim().is_empty())
}

fn tags_from_body(body: &[Stmt<'_>]) -> ThinkingTags {
    // blank text (indentation, newlines) does not delimit anything
    let mut literals = body.iter().filter(|stmt| !is_blank(stmt));
    let first = literals.next();
    let last = literals.next_back().or(first);
    ThinkingTags::new(
        first.and_then(leading_text).unwrap_or_default(),
        last.and_then(trailing_text).unwrap_or_default(),
    )
}

/// Literal operands on either side of the thinking field in `a + thinking + b`.
fn tags_from_concat(operands: &[&Expr<'_>], at: usize) -> ThinkingTags {
    let opening = at
        .checked_sub(1)
        .and_then(|i| string_constant(operands[i]))
        .unwrap_or_default();
    let closing = operands
        .get(at + 1)
        .copied()
        .and_then(string_constant)
        .unwrap_or_default();
    ThinkingTags::new(opening.trim(), closing.trim())
}

#[derive(Default)]
struct TagFinder {
    /// Variables assigned from a thinking field, e.g. `{% set reasoning = m.reasoning_content %}`
    aliases: Vec<String>,
    found: Option<ThinkingTags>,
}

impl TagFinder {
    fn is_thinking_field(&self, field: &FieldRef) -> bool {
        is_thinking_attribute(field)
            || matches!(field.path(), [var] if self.aliases.contains(var))
    }

    fn record_alias(&mut self, target: &Expr<'_>, value: &Expr<'_>) {
        let Expr::Var(var) = target else {
            return;
        };
        if references(value, |r| self.is_thinking_field(r)) {
            tracing::trace!("`{}` aliases a thinking field", var.id);
            self.aliases.push(var.id.to_string());
        }
    }
}

impl<'a> Visitor<'a> for TagFinder {
    fn enter(&mut self, node: NodeRef<'a>, ancestors: &[NodeRef<'a>]) -> bool {
        if self.found.is_some() {
            return false;
        }
        let expr = match node {
            NodeRef::Stmt(Stmt::Set(set)) => {
                self.record_alias(&set.target, &set.expr);
                return false;
            }
            // only rendered values count, not the conditions guarding them
            NodeRef::Stmt(Stmt::EmitExpr(emit)) => &emit.expr,
            _ => return true,
        };
        if !references(expr, |r| self.is_thinking_field(r)) {
            return false;
        }

        let in_messages_loop = ancestors.iter().rev().find_map(|a| match a {
            NodeRef::Stmt(Stmt::ForLoop(for_loop)) => Some(&for_loop.iter),
            _ => None,
        });
        match in_messages_loop {
            Some(iter) if references(iter, |r| r.mentions(is_messages_segment)) => {}
            _ => return false,
        }

        let operands = concat_operands(expr);
        let position = operands
            .iter()
            .position(|e| field_refs(e).iter().any(|r| self.is_thinking_field(r)));
        let tags = match position {
            Some(at) if operands.len() > 1 => tags_from_concat(&operands, at),
            _ => match ancestors.last() {
                Some(NodeRef::Body(body)) => tags_from_body(body),
                _ => ThinkingTags::default(),
            },
        };
        tracing::debug!(
            "thinking field found, tags {:?} / {:?}",
            tags.opening,
            tags.closing
        );
        self.found = Some(tags);
        false
    }
}

/// Infer the opening/closing thinking tags used by a parsed template.
///
/// Returns empty tags (thinking disabled) when no qualifying pattern exists.
/// The first qualifying field reference wins.
pub fn infer_thinking_tags(template: &Stmt<'_>) -> ThinkingTags {
    let mut finder = TagFinder::default();
    walk(template, &mut finder);
    finder.found.unwrap_or_default()
}
