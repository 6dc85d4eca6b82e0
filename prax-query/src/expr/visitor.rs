//! Read-only and rewriting traversals over [`Expr`].

use smol_str::SmolStr;

use super::{CollectionShaper, Expr, IncludeExpr, MemberArg};
use crate::error::QueryResult;

/// A read-only walk over an expression tree.
///
/// Override [`ExprVisitor::visit_expr`] and call [`walk_expr`] to keep
/// descending.
pub trait ExprVisitor {
    /// Visit one node.
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

/// Visit every direct child of `expr`.
pub fn walk_expr<V: ExprVisitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Constant(_)
        | Expr::Parameter(_)
        | Expr::QueryParameter { .. }
        | Expr::QueryRoot(_)
        | Expr::Field(_)
        | Expr::EntityProjection(_)
        | Expr::ObjectArray(_)
        | Expr::ProjectionBinding(_)
        | Expr::StructuralShaper(_)
        | Expr::ValueBufferRead(_)
        | Expr::NotTranslated(_) => {}
        Expr::Member { expr, .. } => visitor.visit_expr(expr),
        Expr::Binary { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        Expr::Unary { operand, .. } => visitor.visit_expr(operand),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            visitor.visit_expr(test);
            visitor.visit_expr(if_true);
            visitor.visit_expr(if_false);
        }
        Expr::Call { args, .. } | Expr::List(args) => {
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::Lambda { body, .. } => visitor.visit_expr(body),
        Expr::New { args, .. } => {
            for arg in args {
                visitor.visit_expr(&arg.expr);
            }
        }
        Expr::MemberInit { bindings, .. } => {
            for binding in bindings {
                visitor.visit_expr(&binding.expr);
            }
        }
        Expr::Query { source, args, .. } => {
            visitor.visit_expr(source);
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::CollectionShaper(shaper) => visitor.visit_expr(&shaper.element),
        Expr::Include(include) => {
            visitor.visit_expr(&include.entity);
            visitor.visit_expr(&include.related);
        }
        Expr::Materialize(materialize) => {
            for variant in &materialize.variants {
                for read in &variant.reads {
                    visitor.visit_expr(&read.read);
                }
            }
        }
    }
}

/// A bottom-up rebuilding pass.
///
/// The default [`ExprRewriter::rewrite`] rebuilds every child and leaves the
/// node itself unchanged.
pub trait ExprRewriter {
    /// Rewrite one node.
    fn rewrite(&mut self, expr: Expr) -> QueryResult<Expr> {
        rewrite_children(self, expr)
    }
}

fn rewrite_box<R: ExprRewriter + ?Sized>(rewriter: &mut R, expr: Box<Expr>) -> QueryResult<Box<Expr>> {
    Ok(Box::new(rewriter.rewrite(*expr)?))
}

fn rewrite_all<R: ExprRewriter + ?Sized>(rewriter: &mut R, exprs: Vec<Expr>) -> QueryResult<Vec<Expr>> {
    exprs.into_iter().map(|e| rewriter.rewrite(e)).collect()
}

fn rewrite_members<R: ExprRewriter + ?Sized>(
    rewriter: &mut R,
    args: Vec<MemberArg>,
) -> QueryResult<Vec<MemberArg>> {
    args.into_iter()
        .map(|arg| {
            Ok(MemberArg {
                name: arg.name,
                expr: rewriter.rewrite(arg.expr)?,
            })
        })
        .collect()
}

/// Rebuild `expr` with every direct child rewritten.
pub fn rewrite_children<R: ExprRewriter + ?Sized>(rewriter: &mut R, expr: Expr) -> QueryResult<Expr> {
    Ok(match expr {
        leaf @ (Expr::Constant(_)
        | Expr::Parameter(_)
        | Expr::QueryParameter { .. }
        | Expr::QueryRoot(_)
        | Expr::Field(_)
        | Expr::EntityProjection(_)
        | Expr::ObjectArray(_)
        | Expr::ProjectionBinding(_)
        | Expr::StructuralShaper(_)
        | Expr::ValueBufferRead(_)
        | Expr::NotTranslated(_)) => leaf,
        Expr::Member { expr, member } => Expr::Member {
            expr: rewrite_box(rewriter, expr)?,
            member,
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: rewrite_box(rewriter, left)?,
            right: rewrite_box(rewriter, right)?,
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: rewrite_box(rewriter, operand)?,
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => Expr::Conditional {
            test: rewrite_box(rewriter, test)?,
            if_true: rewrite_box(rewriter, if_true)?,
            if_false: rewrite_box(rewriter, if_false)?,
        },
        Expr::Call { method, args } => Expr::Call {
            method,
            args: rewrite_all(rewriter, args)?,
        },
        Expr::Lambda { params, body } => Expr::Lambda {
            params,
            body: rewrite_box(rewriter, body)?,
        },
        Expr::New { type_name, args } => Expr::New {
            type_name,
            args: rewrite_members(rewriter, args)?,
        },
        Expr::MemberInit {
            type_name,
            bindings,
        } => Expr::MemberInit {
            type_name,
            bindings: rewrite_members(rewriter, bindings)?,
        },
        Expr::List(items) => Expr::List(rewrite_all(rewriter, items)?),
        Expr::Query { op, source, args } => Expr::Query {
            op,
            source: rewrite_box(rewriter, source)?,
            args: rewrite_all(rewriter, args)?,
        },
        Expr::CollectionShaper(shaper) => Expr::CollectionShaper(CollectionShaper {
            element: rewrite_box(rewriter, shaper.element)?,
            ..shaper
        }),
        Expr::Include(include) => Expr::Include(IncludeExpr {
            entity: rewrite_box(rewriter, include.entity)?,
            related: rewrite_box(rewriter, include.related)?,
            ..include
        }),
        Expr::Materialize(mut materialize) => {
            for variant in &mut materialize.variants {
                for read in &mut variant.reads {
                    let current = std::mem::replace(&mut read.read, Expr::null());
                    read.read = rewriter.rewrite(current)?;
                }
            }
            Expr::Materialize(materialize)
        }
    })
}

/// Check whether any node of `expr` satisfies `predicate`.
pub fn contains(expr: &Expr, predicate: impl Fn(&Expr) -> bool) -> bool {
    struct Finder<F> {
        predicate: F,
        found: bool,
    }

    impl<F: Fn(&Expr) -> bool> ExprVisitor for Finder<F> {
        fn visit_expr(&mut self, expr: &Expr) {
            if self.found {
                return;
            }
            if (self.predicate)(expr) {
                self.found = true;
                return;
            }
            walk_expr(self, expr);
        }
    }

    let mut finder = Finder {
        predicate,
        found: false,
    };
    finder.visit_expr(expr);
    finder.found
}

/// Substitutes a lambda parameter with an expression.
///
/// Inner lambdas that rebind the same name shadow the substitution.
pub struct ParameterReplacer<'a> {
    name: &'a str,
    replacement: &'a Expr,
}

impl<'a> ParameterReplacer<'a> {
    /// Replace `name` with `replacement`.
    pub fn new(name: &'a str, replacement: &'a Expr) -> Self {
        Self { name, replacement }
    }

    /// Run the substitution over `expr`.
    pub fn replace(mut self, expr: Expr) -> QueryResult<Expr> {
        self.rewrite(expr)
    }
}

impl ExprRewriter for ParameterReplacer<'_> {
    fn rewrite(&mut self, expr: Expr) -> QueryResult<Expr> {
        match expr {
            Expr::Parameter(ref name) if name == self.name => Ok(self.replacement.clone()),
            Expr::Lambda { ref params, .. } if params.iter().any(|p| p == self.name) => Ok(expr),
            other => rewrite_children(self, other),
        }
    }
}

/// Names of every lambda parameter referenced by `expr` that is not bound inside it.
pub fn free_parameters(expr: &Expr) -> Vec<SmolStr> {
    struct Collector {
        bound: Vec<SmolStr>,
        free: Vec<SmolStr>,
    }

    impl ExprVisitor for Collector {
        fn visit_expr(&mut self, expr: &Expr) {
            match expr {
                Expr::Parameter(name) => {
                    if !self.bound.contains(name) && !self.free.contains(name) {
                        self.free.push(name.clone());
                    }
                }
                Expr::Lambda { params, body } => {
                    let depth = self.bound.len();
                    self.bound.extend(params.iter().cloned());
                    self.visit_expr(body);
                    self.bound.truncate(depth);
                }
                _ => walk_expr(self, expr),
            }
        }
    }

    let mut collector = Collector {
        bound: vec![],
        free: vec![],
    };
    collector.visit_expr(expr);
    collector.free
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_replace_parameter() {
        let body = Expr::param("x").member("Title");
        let replaced = ParameterReplacer::new("x", &Expr::root("Movie"))
            .replace(body)
            .unwrap();
        assert_eq!(replaced, Expr::root("Movie").member("Title"));
    }

    #[test]
    fn test_replace_respects_shadowing() {
        let inner = Expr::lambda("x", Expr::param("x"));
        let replaced = ParameterReplacer::new("x", &Expr::null())
            .replace(inner.clone())
            .unwrap();
        assert_eq!(replaced, inner);
    }

    #[test]
    fn test_contains_and_free_parameters() {
        let expr = Expr::lambda("a", Expr::param("a").add(Expr::param("b")));
        assert!(contains(&expr, |e| matches!(e, Expr::Parameter(n) if n == "b")));
        assert!(!contains(&expr, |e| matches!(e, Expr::Constant(_))));
        assert_eq!(free_parameters(&expr), vec![SmolStr::new("b")]);
    }
}
