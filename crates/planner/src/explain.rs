use crate::expr::{Expr, SortDirection, SortOrder, WindowSpec};
use crate::logical_plan::LogicalPlan;

/// Render a logical plan as human-readable multiline text.
pub fn explain_logical(plan: &LogicalPlan) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, &mut s);
    s
}

fn fmt_plan(plan: &LogicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        LogicalPlan::UnresolvedRelation { name, alias } => {
            out.push_str(&format!(
                "{pad}UnresolvedRelation name={}{}\n",
                name.join("."),
                alias
                    .as_ref()
                    .map(|a| format!(" alias={a}"))
                    .unwrap_or_default()
            ));
        }
        LogicalPlan::Relation { name, output } => {
            out.push_str(&format!(
                "{pad}Relation table={name} columns=[{}]\n",
                output
                    .iter()
                    .map(|a| format!("{}:{}", a.name, a.data_type))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        LogicalPlan::Subquery { alias, input } => {
            out.push_str(&format!("{pad}Subquery alias={alias}\n"));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Project { exprs, input } => {
            out.push_str(&format!("{pad}Project\n"));
            for e in exprs {
                match e.to_attribute() {
                    Some(attr) => out.push_str(&format!("{pad}  {} := {e}\n", attr.name)),
                    None => out.push_str(&format!("{pad}  {e}\n")),
                }
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Filter { predicate, input } => {
            out.push_str(&format!("{pad}Filter {predicate}\n"));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Sort { order, input } => {
            out.push_str(&format!("{pad}Sort [{}]\n", fmt_order(order)));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            input,
        } => {
            out.push_str(&format!("{pad}Aggregate\n"));
            out.push_str(&format!(
                "{pad}  group_by=[{}]\n",
                join_rendered(group_exprs)
            ));
            for e in aggr_exprs {
                match e.to_attribute() {
                    Some(attr) => out.push_str(&format!("{pad}  {} := {e}\n", attr.name)),
                    None => out.push_str(&format!("{pad}  {e}\n")),
                }
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Join {
            left,
            right,
            join_type,
            condition,
        } => {
            out.push_str(&format!(
                "{pad}Join type={join_type:?}{}\n",
                condition
                    .as_ref()
                    .map(|c| format!(" on={c}"))
                    .unwrap_or_default()
            ));
            out.push_str(&format!("{pad}  left:\n"));
            fmt_plan(left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_plan(right, indent + 2, out);
        }
        LogicalPlan::Generate {
            generator,
            join,
            outer,
            output,
            input,
            ..
        } => {
            out.push_str(&format!(
                "{pad}Generate {generator} join={join} outer={outer} columns=[{}]\n",
                output
                    .iter()
                    .map(|a| a.name.clone())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Window {
            window_exprs,
            spec,
            input,
        } => {
            out.push_str(&format!("{pad}Window {}\n", fmt_window_spec(spec)));
            for e in window_exprs {
                match e.to_attribute() {
                    Some(attr) => out.push_str(&format!("{pad}  {} := {e}\n", attr.name)),
                    None => out.push_str(&format!("{pad}  {e}\n")),
                }
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Expand {
            bitmasks,
            group_by,
            gid,
            input,
        } => {
            out.push_str(&format!(
                "{pad}Expand masks={bitmasks:?} group_by=[{}] gid={}\n",
                group_by
                    .iter()
                    .map(|a| a.name.clone())
                    .collect::<Vec<_>>()
                    .join(", "),
                gid.name
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::With { input, ctes } => {
            out.push_str(&format!("{pad}With\n"));
            for (name, cte) in ctes {
                out.push_str(&format!("{pad}  cte {name}:\n"));
                fmt_plan(cte, indent + 2, out);
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::WithWindowDefinition { defs, input } => {
            out.push_str(&format!(
                "{pad}WithWindowDefinition [{}]\n",
                defs.iter()
                    .map(|(n, s)| format!("{n}: {}", fmt_window_spec(s)))
                    .collect::<Vec<_>>()
                    .join("; ")
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::InsertInto { table, input } => {
            out.push_str(&format!("{pad}InsertInto\n"));
            out.push_str(&format!("{pad}  table:\n"));
            fmt_plan(table, indent + 2, out);
            out.push_str(&format!("{pad}  query:\n"));
            fmt_plan(input, indent + 2, out);
        }
        LogicalPlan::Cube {
            group_exprs, input, ..
        } => {
            out.push_str(&format!("{pad}Cube group_by=[{}]\n", join_rendered(group_exprs)));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Rollup {
            group_exprs, input, ..
        } => {
            out.push_str(&format!(
                "{pad}Rollup group_by=[{}]\n",
                join_rendered(group_exprs)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::GroupingSets {
            bitmasks,
            group_exprs,
            input,
            ..
        } => {
            out.push_str(&format!(
                "{pad}GroupingSets masks={bitmasks:?} group_by=[{}]\n",
                join_rendered(group_exprs)
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::ScriptTransformation {
            input_exprs,
            script,
            input,
            ..
        } => {
            out.push_str(&format!(
                "{pad}ScriptTransformation script={script:?} inputs=[{}]\n",
                join_rendered(input_exprs)
            ));
            fmt_plan(input, indent + 1, out);
        }
    }
}

fn join_rendered(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_order(order: &[SortOrder]) -> String {
    order
        .iter()
        .map(|o| {
            format!(
                "{} {} NULLS {}",
                o.expr,
                match o.direction {
                    SortDirection::Ascending => "ASC",
                    SortDirection::Descending => "DESC",
                },
                if o.nulls_first { "FIRST" } else { "LAST" }
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_window_spec(spec: &WindowSpec) -> String {
    format!(
        "partition=[{}] order=[{}]",
        join_rendered(&spec.partition_by),
        fmt_order(&spec.order_by)
    )
}
