use kflow_common::NodeId;

use crate::logical_plan::{AggExpr, Expr, LogicalPlan, NodeKind};

/// Render the plan as indented text, root first.
pub fn explain_plan(plan: &LogicalPlan) -> String {
    let mut s = String::new();
    fmt_node(plan, plan.root(), 0, &mut s);
    s
}

fn fmt_node(plan: &LogicalPlan, id: NodeId, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let Some(node) = plan.node(id) else {
        out.push_str(&format!("{pad}<missing node {id}>\n"));
        return;
    };
    match &node.kind {
        NodeKind::Source(src) => {
            let fields = src
                .schema()
                .fields()
                .iter()
                .map(|f| f.name().clone())
                .collect::<Vec<_>>();
            out.push_str(&format!("{pad}{id} Source fields={fields:?}\n"));
        }
        NodeKind::Scan(scan) => {
            out.push_str(&format!(
                "{pad}{id} Scan uri={} hive={}\n",
                scan.uri, scan.hive_partitioning
            ));
        }
        NodeKind::Aggregate {
            group_exprs,
            aggr_exprs,
        } => {
            out.push_str(&format!("{pad}{id} Aggregate\n"));
            out.push_str(&format!(
                "{pad}  group_by=[{}]\n",
                group_exprs.iter().map(fmt_expr).collect::<Vec<_>>().join(", ")
            ));
            for (a, name) in aggr_exprs {
                out.push_str(&format!("{pad}  {name} := {}\n", fmt_agg(a)));
            }
        }
        NodeKind::Filter { predicate } => {
            out.push_str(&format!("{pad}{id} Filter {}\n", fmt_expr(predicate)));
        }
        NodeKind::Projection { exprs } => {
            out.push_str(&format!("{pad}{id} Projection\n"));
            for (e, name) in exprs {
                out.push_str(&format!("{pad}  {name} := {}\n", fmt_expr(e)));
            }
        }
        NodeKind::Write(opts) => {
            out.push_str(&format!(
                "{pad}{id} Write base_dir={} partition_by={:?} template={} behavior={:?}\n",
                opts.base_dir,
                opts.partition_by,
                opts.basename_template,
                opts.existing_data_behavior
            ));
        }
    }
    for input in &node.inputs {
        fmt_node(plan, *input, indent + 1, out);
    }
}

fn fmt_agg(a: &AggExpr) -> String {
    match a {
        AggExpr::Count(e) => format!("hash_count({})", fmt_expr(e)),
        AggExpr::TDigest { expr, options } => {
            format!("tdigest({}, q={})", fmt_expr(expr), options.q)
        }
    }
}

/// Compact single-line rendering, also used for default output names.
pub fn fmt_expr(e: &Expr) -> String {
    match e {
        Expr::Column(c) => c.clone(),
        Expr::Literal(v) => format!("{v:?}"),
        Expr::Cast { expr, to_type } => format!("cast({} as {to_type:?})", fmt_expr(expr)),
        Expr::Not(x) => format!("NOT ({})", fmt_expr(x)),
        Expr::And(a, b) => format!("({}) AND ({})", fmt_expr(a), fmt_expr(b)),
        Expr::Or(a, b) => format!("({}) OR ({})", fmt_expr(a), fmt_expr(b)),
        Expr::BinaryOp { left, op, right } => {
            format!("({}) {:?} ({})", fmt_expr(left), op, fmt_expr(right))
        }
        Expr::InList {
            expr,
            values,
            negated,
        } => format!(
            "{}{} IN <{} values>",
            fmt_expr(expr),
            if *negated { " NOT" } else { "" },
            values.len()
        ),
        Expr::RegexMatch { expr, pattern } => {
            format!("match_substring_regex({}, {pattern:?})", fmt_expr(expr))
        }
        Expr::RegexReplace {
            expr,
            pattern,
            replacement,
            ..
        } => format!(
            "replace_substring_regex({}, {pattern:?}, {replacement:?})",
            fmt_expr(expr)
        ),
        Expr::Strptime {
            expr, format, unit, ..
        } => format!("strptime({}, {format:?}, {unit:?})", fmt_expr(expr)),
        Expr::ScalarFunction { name, args, .. } => format!(
            "{}({})",
            name,
            args.iter().map(fmt_expr).collect::<Vec<_>>().join(", ")
        ),
    }
}
