// src/template/mod.rs
//! Chat templates as a static tree.
//!
//! Setup-time heuristics (thinking tag inference) inspect the template
//! structure without rendering it. The tree is minijinja's own AST, parsed
//! with the same block trimming the renderer in
//! [`crate::utils::chat_template`] uses, so literal text seen here is the text
//! a render would emit.

use minijinja::machinery::ast::{BinOpKind, CallArg, CallType, Expr, Stmt};
use minijinja::machinery::{self, WhitespaceConfig};
use minijinja::syntax::SyntaxConfig;

/// Parse a chat template source.
pub fn parse(source: &str) -> Result<Stmt<'_>, minijinja::Error> {
    let whitespace = WhitespaceConfig {
        keep_trailing_newline: false,
        lstrip_blocks: true,
        trim_blocks: true,
    };
    machinery::parse(source, "chat_template", SyntaxConfig::default(), whitespace)
}

/// A dotted lookup such as `message.reasoning_content` or `message['thinking']`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    path: Vec<String>,
}

impl FieldRef {
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Last segment of the path.
    pub fn field(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    pub fn mentions(&self, pred: impl Fn(&str) -> bool) -> bool {
        self.path.iter().any(|segment| pred(segment))
    }
}

pub fn string_constant<'e>(expr: &'e Expr<'_>) -> Option<&'e str> {
    match expr {
        Expr::Const(c) => c.value.as_str(),
        _ => None,
    }
}

fn field_path(expr: &Expr<'_>) -> Option<Vec<String>> {
    match expr {
        Expr::Var(var) => Some(vec![var.id.to_string()]),
        Expr::GetAttr(attr) => {
            let mut path = field_path(&attr.expr)?;
            path.push(attr.name.to_string());
            Some(path)
        }
        Expr::GetItem(item) => {
            let mut path = field_path(&item.expr)?;
            match &item.subscript_expr {
                // `messages[0]` is still `messages`
                Expr::Const(c) => {
                    if let Some(key) = c.value.as_str() {
                        path.push(key.to_string());
                    }
                }
                _ => return None,
            }
            Some(path)
        }
        // `message.get('reasoning_content')`
        Expr::Call(call) => match call.identify_call() {
            CallType::Method(object, "get") => {
                let key = match call.args.first() {
                    Some(CallArg::Pos(arg)) => string_constant(arg)?,
                    _ => return None,
                };
                let mut path = field_path(object)?;
                path.push(key.to_string());
                Some(path)
            }
            _ => None,
        },
        _ => None,
    }
}

fn call_arg(arg: &CallArg<'_>, out: &mut Vec<FieldRef>) {
    match arg {
        CallArg::Pos(expr)
        | CallArg::Kwarg(_, expr)
        | CallArg::PosSplat(expr)
        | CallArg::KwargSplat(expr) => collect_refs(expr, out),
    }
}

fn collect_refs(expr: &Expr<'_>, out: &mut Vec<FieldRef>) {
    if let Some(path) = field_path(expr) {
        out.push(FieldRef { path });
        return;
    }
    match expr {
        Expr::Var(_) | Expr::Const(_) => {}
        Expr::Slice(slice) => {
            collect_refs(&slice.expr, out);
            for bound in [&slice.start, &slice.stop, &slice.step].into_iter().flatten() {
                collect_refs(bound, out);
            }
        }
        Expr::UnaryOp(op) => collect_refs(&op.expr, out),
        Expr::BinOp(op) => {
            collect_refs(&op.left, out);
            collect_refs(&op.right, out);
        }
        Expr::Compare(cmp) => {
            collect_refs(&cmp.expr, out);
            for op in &cmp.ops {
                collect_refs(&op.expr, out);
            }
        }
        Expr::IfExpr(cond) => {
            collect_refs(&cond.test_expr, out);
            collect_refs(&cond.true_expr, out);
            if let Some(expr) = &cond.false_expr {
                collect_refs(expr, out);
            }
        }
        Expr::Filter(filter) => {
            if let Some(expr) = &filter.expr {
                collect_refs(expr, out);
            }
            filter.args.iter().for_each(|arg| call_arg(arg, out));
        }
        Expr::Test(test) => {
            collect_refs(&test.expr, out);
            test.args.iter().for_each(|arg| call_arg(arg, out));
        }
        Expr::GetAttr(attr) => collect_refs(&attr.expr, out),
        Expr::GetItem(item) => {
            collect_refs(&item.expr, out);
            collect_refs(&item.subscript_expr, out);
        }
        Expr::Call(call) => {
            // `message.content.strip()` refers to `message.content`
            match call.identify_call() {
                CallType::Method(object, _) => collect_refs(object, out),
                CallType::Function(_) => {}
                _ => collect_refs(&call.expr, out),
            }
            call.args.iter().for_each(|arg| call_arg(arg, out));
        }
        Expr::List(list) => list.items.iter().for_each(|item| collect_refs(item, out)),
        Expr::Map(map) => {
            for expr in map.keys.iter().chain(map.values.iter()) {
                collect_refs(expr, out);
            }
        }
    }
}

/// Field lookups made anywhere in `expr`.
pub fn field_refs(expr: &Expr<'_>) -> Vec<FieldRef> {
    let mut refs = Vec::new();
    collect_refs(expr, &mut refs);
    refs
}

pub fn references(expr: &Expr<'_>, pred: impl Fn(&FieldRef) -> bool) -> bool {
    field_refs(expr).iter().any(pred)
}

/// Operands of a `+` / `~` chain in source order; a single operand otherwise.
pub fn concat_operands<'e, 's>(expr: &'e Expr<'s>) -> Vec<&'e Expr<'s>> {
    match expr {
        Expr::BinOp(op) if matches!(op.op, BinOpKind::Add | BinOpKind::Concat) => {
            let mut operands = concat_operands(&op.left);
            operands.extend(concat_operands(&op.right));
            operands
        }
        _ => vec![expr],
    }
}

/// A position in the tree handed to a [`Visitor`].
///
/// Statement bodies are nodes of their own so that a visitor can look at the
/// siblings of whatever it is inspecting.
#[derive(Clone, Copy)]
pub enum NodeRef<'a> {
    Stmt(&'a Stmt<'a>),
    Body(&'a [Stmt<'a>]),
}

impl<'a> NodeRef<'a> {
    fn children(self) -> Vec<NodeRef<'a>> {
        let stmt = match self {
            NodeRef::Body(stmts) => return stmts.iter().map(NodeRef::Stmt).collect(),
            NodeRef::Stmt(stmt) => stmt,
        };
        match stmt {
            Stmt::Template(t) => vec![NodeRef::Body(&t.children)],
            Stmt::ForLoop(f) => vec![NodeRef::Body(&f.body), NodeRef::Body(&f.else_body)],
            Stmt::IfCond(c) => vec![NodeRef::Body(&c.true_body), NodeRef::Body(&c.false_body)],
            Stmt::WithBlock(w) => vec![NodeRef::Body(&w.body)],
            Stmt::SetBlock(s) => vec![NodeRef::Body(&s.body)],
            Stmt::AutoEscape(a) => vec![NodeRef::Body(&a.body)],
            Stmt::FilterBlock(f) => vec![NodeRef::Body(&f.body)],
            Stmt::Block(b) => vec![NodeRef::Body(&b.body)],
            Stmt::Macro(m) => vec![NodeRef::Body(&m.body)],
            Stmt::CallBlock(c) => vec![NodeRef::Body(&c.macro_decl.body)],
            _ => Vec::new(),
        }
    }
}

pub trait Visitor<'a> {
    /// Return `false` to skip the children of `node`.
    fn enter(&mut self, node: NodeRef<'a>, ancestors: &[NodeRef<'a>]) -> bool;

    fn exit(&mut self, _node: NodeRef<'a>, _ancestors: &[NodeRef<'a>]) {}
}

/// Depth-first walk in source order; `ancestors` runs from the root down to
/// the parent of the visited node.
pub fn walk<'a, V: Visitor<'a>>(root: &'a Stmt<'a>, visitor: &mut V) {
    let mut ancestors = Vec::new();
    visit(NodeRef::Stmt(root), visitor, &mut ancestors);
}

fn visit<'a, V: Visitor<'a>>(node: NodeRef<'a>, visitor: &mut V, ancestors: &mut Vec<NodeRef<'a>>) {
    if !visitor.enter(node, ancestors) {
        return;
    }
    ancestors.push(node);
    for child in node.children() {
        visit(child, visitor, ancestors);
    }
    ancestors.pop();
    visitor.exit(node, ancestors);
}
