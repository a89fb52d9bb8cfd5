//! Human-readable printer for expressions and queries.
//!
//! The output is a stable S-expression form used in logs and test fixtures.
//! It preserves canonical structure: what you see is exactly the node shape
//! the constructors produced.

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use crate::array::ArrayRef;
use crate::expr::{BinOp, CmpOp, ExprKind, ExprRef};
use crate::updates::UpdateList;

/// Pretty print a single expression to a string.
pub fn pretty_print_expr(expr: &ExprRef) -> String {
    let mut printer = PrettyPrinter::new();
    printer.print_expr(expr);
    printer.output
}

/// Pretty print a query: the array declarations, the constraint list, and
/// the query expression.
pub fn pretty_print_query(constraints: &[ExprRef], expr: &ExprRef) -> String {
    let mut printer = PrettyPrinter::new();
    printer.print_query(constraints, expr);
    printer.output
}

struct PrettyPrinter {
    output: String,
}

impl PrettyPrinter {
    fn new() -> Self {
        Self {
            output: String::new(),
        }
    }

    fn write(&mut self, s: &str) {
        self.output.push_str(s);
    }

    fn print_query(&mut self, constraints: &[ExprRef], expr: &ExprRef) {
        self.write("query {\n");
        for array in collect_arrays(constraints.iter().chain(std::iter::once(expr))) {
            self.write("    array ");
            self.write(&array.name);
            self.write(&format!(
                "[{}] : w{} -> w{} {}\n",
                array.size,
                array.domain,
                array.range,
                if array.is_symbolic() {
                    "symbolic"
                } else {
                    "constant"
                }
            ));
        }
        for c in constraints {
            self.write("    ");
            self.print_expr(c);
            self.write("\n");
        }
        self.write("} ");
        self.print_expr(expr);
        self.write("\n");
    }

    fn print_expr(&mut self, e: &ExprRef) {
        match e.kind() {
            ExprKind::Constant(v) => {
                self.write(&format!("{}:w{}", v.bits(), v.width()));
            }
            ExprKind::NotOptimized(inner) => self.print_unary("NotOptimized", inner),
            ExprKind::Not(inner) => self.print_unary("Not", inner),
            ExprKind::Read { updates, index } => {
                self.write(&format!("(Read w{} ", updates.root.range));
                self.print_expr(index);
                self.write(" ");
                self.print_updates(updates);
                self.write(")");
            }
            ExprKind::Select { cond, t, f } => {
                self.write("(Select ");
                self.print_expr(cond);
                self.write(" ");
                self.print_expr(t);
                self.write(" ");
                self.print_expr(f);
                self.write(")");
            }
            ExprKind::Concat { left, right } => self.print_binary("Concat", left, right),
            ExprKind::Extract {
                expr,
                offset,
                width,
            } => {
                self.write(&format!("(Extract w{width} {offset} "));
                self.print_expr(expr);
                self.write(")");
            }
            ExprKind::ZExt { expr, width } => {
                self.write(&format!("(ZExt w{width} "));
                self.print_expr(expr);
                self.write(")");
            }
            ExprKind::SExt { expr, width } => {
                self.write(&format!("(SExt w{width} "));
                self.print_expr(expr);
                self.write(")");
            }
            ExprKind::Binary { op, left, right } => {
                self.print_binary(binop_name(*op), left, right)
            }
            ExprKind::Compare { op, left, right } => {
                self.print_binary(cmpop_name(*op), left, right)
            }
        }
    }

    fn print_unary(&mut self, name: &str, e: &ExprRef) {
        self.write("(");
        self.write(name);
        self.write(" ");
        self.print_expr(e);
        self.write(")");
    }

    fn print_binary(&mut self, name: &str, l: &ExprRef, r: &ExprRef) {
        self.write("(");
        self.write(name);
        self.write(" ");
        self.print_expr(l);
        self.write(" ");
        self.print_expr(r);
        self.write(")");
    }

    fn print_updates(&mut self, ul: &UpdateList) {
        if ul.is_empty() {
            self.write(&ul.root.name);
            return;
        }
        self.write("(");
        self.write(&ul.root.name);
        let mut node = ul.head.clone();
        while let Some(n) = node {
            self.write(" [");
            self.print_expr(&n.index);
            self.write(" := ");
            self.print_expr(&n.value);
            self.write("]");
            node = n.next.clone();
        }
        self.write(")");
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "Add",
        BinOp::Sub => "Sub",
        BinOp::Mul => "Mul",
        BinOp::UDiv => "UDiv",
        BinOp::SDiv => "SDiv",
        BinOp::URem => "URem",
        BinOp::SRem => "SRem",
        BinOp::And => "And",
        BinOp::Or => "Or",
        BinOp::Xor => "Xor",
        BinOp::Shl => "Shl",
        BinOp::LShr => "LShr",
        BinOp::AShr => "AShr",
    }
}

fn cmpop_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "Eq",
        CmpOp::Ult => "Ult",
        CmpOp::Ule => "Ule",
        CmpOp::Slt => "Slt",
        CmpOp::Sle => "Sle",
    }
}

/// Every array referenced by the given expressions, ordered by name.
pub fn collect_arrays<'a>(exprs: impl Iterator<Item = &'a ExprRef>) -> Vec<ArrayRef> {
    let mut seen = FxHashSet::default();
    let mut found: BTreeMap<(String, usize), ArrayRef> = BTreeMap::new();
    let mut stack: Vec<ExprRef> = exprs.cloned().collect();
    while let Some(e) = stack.pop() {
        if !seen.insert(e.as_ptr_usize()) {
            continue;
        }
        if let ExprKind::Read { updates, .. } = e.kind() {
            let key = (
                updates.root.name.clone(),
                std::rc::Rc::as_ptr(&updates.root) as usize,
            );
            found.entry(key).or_insert_with(|| updates.root.clone());
            let mut node = updates.head.clone();
            while let Some(n) = node {
                stack.push(n.index.clone());
                stack.push(n.value.clone());
                node = n.next.clone();
            }
        }
        stack.extend(e.kids());
    }
    found.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::ArrayCache;
    use crate::builders::{constant, eq, read, ult};
    use crate::updates::UpdateList;
    use crate::value::WIDTH_32;

    #[test]
    fn prints_canonical_shapes() {
        let mut cache = ArrayCache::new();
        let a = cache.make_symbolic("a", 4);
        let r = read(UpdateList::fresh(a), constant(0, WIDTH_32));
        let e = eq(constant(42, 8), r.clone());
        assert_eq!(pretty_print_expr(&e), "(Eq 42:w8 (Read w8 0:w32 a))");
        let q = pretty_print_query(&[e], &ult(r, constant(5, 8)));
        assert!(q.starts_with("query {\n    array a[4] : w32 -> w8 symbolic\n"));
        assert!(q.contains("(Eq 42:w8 (Read w8 0:w32 a))"));
        assert!(q.ends_with("} (Ult (Read w8 0:w32 a) 5:w8)\n"));
    }
}
