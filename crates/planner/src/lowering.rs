//! Rules that lower higher-level SQL constructs into primitive operators:
//! CUBE/ROLLUP/GROUPING SETS into `Aggregate` over `Expand`, table-generating
//! functions into `Generate`, windowed expressions into `Window` stacks, and
//! nondeterministic expressions into dedicated projections.

use arrow_schema::DataType;
use flint_common::{ExprId, FlintError, Result};

use crate::analyzer::{columns, AnalyzerContext, AnalyzerRule};
use crate::expr::{Attribute, AttributeSet, Expr, SortOrder, WindowSpec};
use crate::logical_plan::LogicalPlan;

/// Name of the synthesized grouping-id column.
pub const GROUPING_ID_NAME: &str = "grouping__id";

/// Wrap an expression in an alias, returning both the alias and the
/// attribute it exposes.
fn named_alias(expr: Expr, name: String) -> (Expr, Attribute) {
    let id = ExprId::fresh();
    let attr = Attribute {
        name: name.clone(),
        data_type: expr.data_type().unwrap_or(DataType::Null),
        nullable: expr.nullable(),
        qualifier: None,
        id,
    };
    (
        Expr::Alias {
            expr: Box::new(expr),
            name,
            id,
        },
        attr,
    )
}

// -------------------------
// Grouping analytics
// -------------------------

/// Lower CUBE and ROLLUP into explicit grouping-set masks, and grouping-set
/// masks into an aggregation over row replication.
pub struct ResolveGroupingAnalytics;

impl AnalyzerRule for ResolveGroupingAnalytics {
    fn name(&self) -> &str {
        "resolve_grouping_analytics"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.try_transform_up(&mut |p| match p {
            LogicalPlan::Cube {
                group_exprs,
                aggr_exprs,
                input,
            } if lowerable(&group_exprs, &aggr_exprs, &input) => {
                let n = checked_grouping_width(&group_exprs)?;
                // Every subset of the group-by list.
                let bitmasks: Vec<u64> = (0..(1u64 << n)).collect();
                lower_grouping_sets(bitmasks, group_exprs, aggr_exprs, input)
            }
            LogicalPlan::Rollup {
                group_exprs,
                aggr_exprs,
                input,
            } if lowerable(&group_exprs, &aggr_exprs, &input) => {
                let n = checked_grouping_width(&group_exprs)?;
                // Prefixes of the group-by list, from empty to full.
                let bitmasks: Vec<u64> = (0..=n).map(|k| (1u64 << k) - 1).collect();
                lower_grouping_sets(bitmasks, group_exprs, aggr_exprs, input)
            }
            LogicalPlan::GroupingSets {
                bitmasks,
                group_exprs,
                aggr_exprs,
                input,
            } if lowerable(&group_exprs, &aggr_exprs, &input) => {
                lower_grouping_sets(bitmasks, group_exprs, aggr_exprs, input)
            }
            other => Ok(other),
        })
    }
}

fn lowerable(group_exprs: &[Expr], aggr_exprs: &[Expr], input: &LogicalPlan) -> bool {
    input.resolved()
        && group_exprs.iter().all(|e| e.resolved())
        && aggr_exprs.iter().all(|e| e.resolved())
}

fn checked_grouping_width(group_exprs: &[Expr]) -> Result<u32> {
    let n = group_exprs.len();
    if n > 31 {
        return Err(FlintError::Planning(format!(
            "too many grouping expressions for grouping analytics: {n} (max 31)"
        )));
    }
    Ok(n as u32)
}

fn lower_grouping_sets(
    bitmasks: Vec<u64>,
    group_exprs: Vec<Expr>,
    aggr_exprs: Vec<Expr>,
    input: Box<LogicalPlan>,
) -> Result<LogicalPlan> {
    let gid = Attribute::new(GROUPING_ID_NAME, DataType::Int32, false);

    // Pair every group-by expression with the attribute it will be grouped
    // under; non-named expressions are aliased by their rendering.
    let mut aliases: Vec<Expr> = vec![];
    let mut pairs: Vec<(Expr, Attribute)> = Vec::with_capacity(group_exprs.len());
    for g in &group_exprs {
        match g.to_attribute() {
            Some(attr) => pairs.push((g.clone(), attr)),
            None => {
                let (alias, attr) = named_alias(g.clone(), g.to_string());
                aliases.push(alias);
                pairs.push((g.clone(), attr));
            }
        }
    }

    // The aggregation list sees grouped values through the paired attributes.
    let new_aggs: Vec<Expr> = aggr_exprs
        .into_iter()
        .map(|agg| {
            agg.transform_down(&mut |e| {
                match pairs.iter().find(|(orig, _)| orig.semantically_equal(&e)) {
                    Some((_, attr)) => Expr::Column(attr.clone()),
                    None => e,
                }
            })
        })
        .collect();

    let new_input = if aliases.is_empty() {
        *input
    } else {
        let mut exprs = columns(&input.output());
        exprs.extend(aliases);
        LogicalPlan::Project {
            exprs,
            input,
        }
    };

    let group_attrs: Vec<Attribute> = pairs.into_iter().map(|(_, a)| a).collect();
    let mut new_group = columns(&group_attrs);
    new_group.push(Expr::Column(gid.clone()));
    Ok(LogicalPlan::Aggregate {
        group_exprs: new_group,
        aggr_exprs: new_aggs,
        input: Box::new(LogicalPlan::Expand {
            bitmasks,
            group_by: group_attrs,
            gid,
            input: Box::new(new_input),
        }),
    })
}

// -------------------------
// Generator resolution
// -------------------------

/// Synthesize output attributes for table-generating functions, and lower an
/// aliased generator in a projection into a `Generate` operator.
pub struct ResolveGenerate;

impl AnalyzerRule for ResolveGenerate {
    fn name(&self) -> &str {
        "resolve_generate"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.try_transform_up(&mut |p| match p {
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                qualifier,
                output_names,
                output,
                input,
            } if input.resolved() && generator.resolved() && output.is_empty() => {
                let output = make_generator_output(&generator, &output_names)?;
                Ok(LogicalPlan::Generate {
                    generator,
                    join,
                    outer,
                    qualifier,
                    output_names,
                    output,
                    input,
                })
            }
            LogicalPlan::Project { exprs, input }
                if input.resolved() && exprs.iter().any(is_aliased_generator) =>
            {
                rewrite_project_generator(exprs, input)
            }
            other => Ok(other),
        })
    }
}

fn is_aliased_generator(expr: &Expr) -> bool {
    match expr {
        Expr::Alias { expr, .. } | Expr::MultiAlias { expr, .. } => {
            matches!(**expr, Expr::Generator { .. })
        }
        _ => false,
    }
}

fn make_generator_output(generator: &Expr, names: &[String]) -> Result<Vec<Attribute>> {
    let element_types = generator.generator_element_types().ok_or_else(|| {
        FlintError::Planning(format!("generator {generator} requires an array argument"))
    })?;
    let names: Vec<String> = if names.is_empty() {
        (0..element_types.len()).map(|i| format!("_c{i}")).collect()
    } else if names.len() == element_types.len() {
        names.to_vec()
    } else {
        return Err(FlintError::Planning(format!(
            "the number of aliases supplied in the AS clause does not match the number of \
             columns output by the generator: expected {} aliases but got {}",
            element_types.len(),
            names.len()
        )));
    };
    Ok(names
        .into_iter()
        .zip(element_types)
        .map(|(name, (data_type, nullable))| Attribute::new(name, data_type, nullable))
        .collect())
}

fn rewrite_project_generator(exprs: Vec<Expr>, input: Box<LogicalPlan>) -> Result<LogicalPlan> {
    let generator_count = exprs.iter().filter(|e| is_aliased_generator(e)).count();
    if generator_count > 1 {
        let rendered: Vec<String> = exprs
            .iter()
            .filter(|e| is_aliased_generator(e))
            .map(|e| e.to_string())
            .collect();
        return Err(FlintError::Planning(format!(
            "only one generator allowed per select clause but found {generator_count}: {}",
            rendered.join(", ")
        )));
    }
    let other_count = exprs.len() - generator_count;

    let mut new_exprs: Vec<Expr> = Vec::with_capacity(exprs.len());
    let mut lowered: Option<(Expr, Vec<Attribute>, Vec<String>)> = None;
    for e in exprs {
        match e {
            Expr::Alias { expr, name, .. } if matches!(*expr, Expr::Generator { .. }) => {
                let generator = *expr;
                let element_count = generator
                    .generator_element_types()
                    .ok_or_else(|| {
                        FlintError::Planning(format!(
                            "generator {generator} requires an array argument"
                        ))
                    })?
                    .len();
                if element_count != 1 {
                    return Err(FlintError::Planning(format!(
                        "generator {generator} produces {element_count} columns but the alias \
                         supplies one name; use a multi-part alias"
                    )));
                }
                let output = make_generator_output(&generator, std::slice::from_ref(&name))?;
                new_exprs.extend(columns(&output));
                lowered = Some((generator, output, vec![name]));
            }
            Expr::MultiAlias { expr, names } if matches!(*expr, Expr::Generator { .. }) => {
                let generator = *expr;
                let output = make_generator_output(&generator, &names)?;
                new_exprs.extend(columns(&output));
                lowered = Some((generator, output, names));
            }
            other => new_exprs.push(other),
        }
    }

    let Some((generator, output, output_names)) = lowered else {
        return Err(FlintError::Internal(
            "projection lost its generator entry".to_string(),
        ));
    };
    Ok(LogicalPlan::Project {
        exprs: new_exprs,
        input: Box::new(LogicalPlan::Generate {
            generator,
            join: other_count > 0,
            outer: false,
            qualifier: None,
            output_names,
            output,
            input,
        }),
    })
}

// -------------------------
// Window extraction
// -------------------------

/// Pull windowed expressions out of projections, aggregations, and lifted
/// HAVING filters into dedicated `Window` operators, one per distinct window
/// spec, and restore the original schema with a projection on top.
pub struct ExtractWindowExpressions;

impl AnalyzerRule for ExtractWindowExpressions {
    fn name(&self) -> &str {
        "extract_window_expressions"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.try_transform_down(&mut |p| match p {
            LogicalPlan::Filter { predicate, input }
                if predicate.resolved() && is_extractable_aggregate(&input) =>
            {
                let LogicalPlan::Aggregate {
                    group_exprs,
                    aggr_exprs,
                    input: agg_input,
                } = *input
                else {
                    return Err(FlintError::Internal(
                        "windowed aggregate pattern mismatch".to_string(),
                    ));
                };
                let original = output_attributes(&aggr_exprs)?;
                let (windowed, regular) = extract_window_arguments(aggr_exprs);
                let aggregate = LogicalPlan::Aggregate {
                    group_exprs,
                    aggr_exprs: regular,
                    input: agg_input,
                };
                let filtered = LogicalPlan::Filter {
                    predicate,
                    input: Box::new(aggregate),
                };
                let with_windows = add_window_operators(windowed, filtered)?;
                Ok(LogicalPlan::Project {
                    exprs: columns(&original),
                    input: Box::new(with_windows),
                })
            }
            p @ LogicalPlan::Aggregate { .. } if is_extractable_aggregate_node(&p) => {
                let LogicalPlan::Aggregate {
                    group_exprs,
                    aggr_exprs,
                    input,
                } = p
                else {
                    return Err(FlintError::Internal(
                        "aggregate pattern mismatch".to_string(),
                    ));
                };
                let original = output_attributes(&aggr_exprs)?;
                let (windowed, regular) = extract_window_arguments(aggr_exprs);
                let aggregate = LogicalPlan::Aggregate {
                    group_exprs,
                    aggr_exprs: regular,
                    input,
                };
                let with_windows = add_window_operators(windowed, aggregate)?;
                Ok(LogicalPlan::Project {
                    exprs: columns(&original),
                    input: Box::new(with_windows),
                })
            }
            LogicalPlan::Project { exprs, input }
                if has_window_expressions(&exprs)
                    && exprs.iter().all(|e| e.resolved())
                    && all_named(&exprs) =>
            {
                let original = output_attributes(&exprs)?;
                let (windowed, regular) = extract_window_arguments(exprs);
                let below = LogicalPlan::Project {
                    exprs: regular,
                    input,
                };
                let with_windows = add_window_operators(windowed, below)?;
                Ok(LogicalPlan::Project {
                    exprs: columns(&original),
                    input: Box::new(with_windows),
                })
            }
            other => Ok(other),
        })
    }
}

fn has_window_expressions(exprs: &[Expr]) -> bool {
    exprs.iter().any(|e| e.contains_window())
}

fn all_named(exprs: &[Expr]) -> bool {
    exprs.iter().all(|e| e.to_attribute().is_some())
}

fn is_extractable_aggregate(plan: &LogicalPlan) -> bool {
    matches!(plan, LogicalPlan::Aggregate { .. }) && is_extractable_aggregate_node(plan)
}

fn is_extractable_aggregate_node(plan: &LogicalPlan) -> bool {
    let LogicalPlan::Aggregate {
        group_exprs,
        aggr_exprs,
        input,
    } = plan
    else {
        return false;
    };
    input.resolved()
        && has_window_expressions(aggr_exprs)
        && group_exprs.iter().all(|e| e.resolved())
        && aggr_exprs.iter().all(|e| e.resolved())
        && all_named(aggr_exprs)
}

fn output_attributes(exprs: &[Expr]) -> Result<Vec<Attribute>> {
    exprs
        .iter()
        .map(|e| {
            e.to_attribute().ok_or_else(|| {
                FlintError::Internal(format!("output expression '{e}' has no name"))
            })
        })
        .collect()
}

/// Split an output list into window-bearing and regular expressions, pulling
/// every non-trivial window-function argument, partition/order expression,
/// and out-of-window aggregate into named extra columns appended to the
/// regular list.
fn extract_window_arguments(exprs: Vec<Expr>) -> (Vec<Expr>, Vec<Expr>) {
    let (windowed, mut regular): (Vec<Expr>, Vec<Expr>) =
        exprs.into_iter().partition(|e| e.contains_window());

    let mut seen = AttributeSet::default();
    for attr in regular.iter().filter_map(|e| e.to_attribute()) {
        seen.insert(&attr);
    }
    let mut extracted: Vec<Expr> = vec![];
    let new_windowed: Vec<Expr> = windowed
        .into_iter()
        .map(|e| extract_in_expression(e, &mut extracted, &mut seen))
        .collect();
    regular.extend(extracted);
    (new_windowed, regular)
}

fn extract_in_expression(
    expr: Expr,
    extracted: &mut Vec<Expr>,
    seen: &mut AttributeSet,
) -> Expr {
    match expr {
        Expr::Alias { expr, name, id } => Expr::Alias {
            expr: Box::new(extract_in_expression(*expr, extracted, seen)),
            name,
            id,
        },
        Expr::Window { function, spec } => {
            let function = Box::new(match *function {
                Expr::AggregateFunction {
                    func,
                    args,
                    distinct,
                } => Expr::AggregateFunction {
                    func,
                    args: args
                        .into_iter()
                        .map(|a| extract_argument(a, extracted, seen))
                        .collect(),
                    distinct,
                },
                Expr::WindowFunction { func, args } => Expr::WindowFunction {
                    func,
                    args: args
                        .into_iter()
                        .map(|a| extract_argument(a, extracted, seen))
                        .collect(),
                },
                other => other,
            });
            let spec = WindowSpec {
                partition_by: spec
                    .partition_by
                    .into_iter()
                    .map(|e| extract_argument(e, extracted, seen))
                    .collect(),
                order_by: spec
                    .order_by
                    .into_iter()
                    .map(|o| SortOrder {
                        expr: extract_argument(o.expr, extracted, seen),
                        direction: o.direction,
                        nulls_first: o.nulls_first,
                    })
                    .collect(),
                frame: spec.frame,
            };
            Expr::Window { function, spec }
        }
        // An aggregate outside any window is computed by the aggregation
        // operator below; the window stack sees only its result.
        agg @ Expr::AggregateFunction { .. } => {
            let (alias, attr) = named_alias(agg, format!("_w{}", extracted.len()));
            extracted.push(alias);
            seen.insert(&attr);
            Expr::Column(attr)
        }
        Expr::Column(attr) => {
            if !seen.contains(&attr) {
                seen.insert(&attr);
                extracted.push(Expr::Column(attr.clone()));
            }
            Expr::Column(attr)
        }
        other => other.map_children(&mut |c| extract_in_expression(c, extracted, seen)),
    }
}

fn extract_argument(expr: Expr, extracted: &mut Vec<Expr>, seen: &mut AttributeSet) -> Expr {
    match expr {
        Expr::Column(attr) => {
            if !seen.contains(&attr) {
                seen.insert(&attr);
                extracted.push(Expr::Column(attr.clone()));
            }
            Expr::Column(attr)
        }
        e if e.foldable() => e,
        other => {
            let (alias, attr) = named_alias(other, format!("_w{}", extracted.len()));
            extracted.push(alias);
            seen.insert(&attr);
            Expr::Column(attr)
        }
    }
}

/// Give every window expression a stable alias, group them by window spec,
/// stack one `Window` operator per group over `child`, and project the
/// stacked output plus the rewritten expressions.
fn add_window_operators(windowed: Vec<Expr>, child: LogicalPlan) -> Result<LogicalPlan> {
    let mut groups: Vec<(WindowSpec, Vec<Expr>)> = vec![];
    let mut rewritten: Vec<Expr> = Vec::with_capacity(windowed.len());
    let mut counter = 0usize;

    for expr in windowed {
        let mut specs: Vec<&WindowSpec> = vec![];
        collect_window_specs(&expr, &mut specs);
        let mut distinct: Vec<&WindowSpec> = vec![];
        for s in specs {
            if !distinct.iter().any(|d| *d == s) {
                distinct.push(s);
            }
        }
        if distinct.len() != 1 {
            return Err(FlintError::Internal(format!(
                "expected exactly one window spec per extracted expression, found {}",
                distinct.len()
            )));
        }

        match expr {
            // A pre-existing alias directly over a window keeps its name and id.
            Expr::Alias { expr, name, id } if matches!(*expr, Expr::Window { .. }) => {
                let Expr::Window { function, spec } = *expr else {
                    return Err(FlintError::Internal("window pattern mismatch".to_string()));
                };
                let alias = Expr::Alias {
                    expr: Box::new(Expr::Window {
                        function,
                        spec: spec.clone(),
                    }),
                    name,
                    id,
                };
                let attr = alias.to_attribute().ok_or_else(|| {
                    FlintError::Internal("alias without attribute".to_string())
                })?;
                push_window_group(&mut groups, spec, alias);
                rewritten.push(Expr::Column(attr));
            }
            other => {
                let transformed = other.transform_up(&mut |e| match e {
                    Expr::Window { function, spec } => {
                        let (alias, attr) = named_alias(
                            Expr::Window {
                                function,
                                spec: spec.clone(),
                            },
                            format!("_we{counter}"),
                        );
                        counter += 1;
                        push_window_group(&mut groups, spec, alias);
                        Expr::Column(attr)
                    }
                    other => other,
                });
                rewritten.push(transformed);
            }
        }
    }

    let mut current = child;
    for (spec, exprs) in groups {
        current = LogicalPlan::Window {
            window_exprs: exprs,
            spec,
            input: Box::new(current),
        };
    }
    let mut final_exprs = columns(&current.output());
    final_exprs.extend(rewritten);
    Ok(LogicalPlan::Project {
        exprs: final_exprs,
        input: Box::new(current),
    })
}

fn push_window_group(groups: &mut Vec<(WindowSpec, Vec<Expr>)>, spec: WindowSpec, alias: Expr) {
    if let Some((_, exprs)) = groups.iter_mut().find(|(s, _)| *s == spec) {
        exprs.push(alias);
    } else {
        groups.push((spec, vec![alias]));
    }
}

fn collect_window_specs<'a>(expr: &'a Expr, out: &mut Vec<&'a WindowSpec>) {
    if let Expr::Window { spec, .. } = expr {
        out.push(spec);
    }
    for c in expr.children() {
        collect_window_specs(c, out);
    }
}

// -------------------------
// Nondeterministic pull-out
// -------------------------

/// Nondeterministic expressions evaluated by operators other than projections
/// and filters are lifted into a projection below the operator, so each
/// occurrence is evaluated exactly once per input row.
pub struct PullOutNondeterministic;

impl AnalyzerRule for PullOutNondeterministic {
    fn name(&self) -> &str {
        "pull_out_nondeterministic"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        Ok(plan.transform_down(&mut |p| match p {
            p @ (LogicalPlan::Project { .. } | LogicalPlan::Filter { .. }) => p,
            p if p.children().len() == 1
                && output_ids_match_child(&p)
                && p.expressions().iter().any(|e| !e.deterministic()) =>
            {
                pull_out(p)
            }
            other => other,
        }))
    }
}

fn output_ids_match_child(plan: &LogicalPlan) -> bool {
    let child = plan.children()[0];
    let own: Vec<ExprId> = plan.output().iter().map(|a| a.id).collect();
    let childs: Vec<ExprId> = child.output().iter().map(|a| a.id).collect();
    own == childs
}

fn pull_out(plan: LogicalPlan) -> LogicalPlan {
    let child = plan.children()[0].clone();
    let original_output = plan.output();

    // One alias per occurrence: two syntactically identical nondeterministic
    // calls still evaluate independently.
    let mut aliases: Vec<Expr> = vec![];
    let rewritten = plan.map_expressions(&mut |e| {
        e.transform_up(&mut |e2| {
            if e2.children().is_empty() && !e2.deterministic() {
                let (alias, attr) = named_alias(e2, "_nondeterministic".to_string());
                aliases.push(alias);
                Expr::Column(attr)
            } else {
                e2
            }
        })
    });

    let mut below_exprs = columns(&child.output());
    below_exprs.extend(aliases);
    let below = LogicalPlan::Project {
        exprs: below_exprs,
        input: Box::new(child),
    };
    let replaced = rewritten.map_children(&mut |_| below.clone());
    LogicalPlan::Project {
        exprs: columns(&original_output),
        input: Box::new(replaced),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use flint_common::AnalyzerConfig;

    use super::*;
    use crate::analyzer::{Analyzer, BuiltinFunctionRegistry, MemoryCatalog};
    use crate::expr::{BinaryOp, Literal, SortOrder};

    fn test_catalog() -> Arc<MemoryCatalog> {
        let catalog = MemoryCatalog::new();
        catalog.register_table(
            "r",
            Arc::new(Schema::new(vec![
                Field::new("a", DataType::Int64, false),
                Field::new("b", DataType::Utf8, true),
                Field::new("x", DataType::Int64, true),
            ])),
        );
        catalog.register_table(
            "docs",
            Arc::new(Schema::new(vec![
                Field::new("tag", DataType::Utf8, false),
                Field::new(
                    "xs",
                    DataType::List(Field::new("item", DataType::Int64, true).into()),
                    true,
                ),
            ])),
        );
        Arc::new(catalog)
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(
            test_catalog(),
            Arc::new(BuiltinFunctionRegistry::new()),
            AnalyzerConfig::default(),
        )
    }

    fn table(name: &str) -> LogicalPlan {
        LogicalPlan::UnresolvedRelation {
            name: vec![name.to_string()],
            alias: None,
        }
    }

    fn ualias(e: Expr) -> Expr {
        Expr::UnresolvedAlias(Box::new(e))
    }

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::UnresolvedFunction {
            name: name.to_string(),
            args,
            distinct: false,
        }
    }

    #[test]
    fn rollup_lowers_to_prefix_masks() {
        let plan = LogicalPlan::Rollup {
            group_exprs: vec![Expr::col("a"), Expr::col("b")],
            aggr_exprs: vec![ualias(Expr::col("a")), ualias(Expr::col("b"))],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let LogicalPlan::Aggregate {
            group_exprs, input, ..
        } = analyzed
        else {
            panic!("expected aggregate on top");
        };
        assert_eq!(group_exprs.len(), 3, "two grouping columns plus grouping id");
        assert!(
            matches!(&group_exprs[2], Expr::Column(a) if a.name == GROUPING_ID_NAME)
        );
        let LogicalPlan::Expand {
            bitmasks, gid, ..
        } = *input
        else {
            panic!("expected expand under the aggregate");
        };
        assert_eq!(bitmasks, vec![0, 1, 3]);
        assert_eq!(gid.name, GROUPING_ID_NAME);
        assert_eq!(gid.data_type, DataType::Int32);
        assert!(!gid.nullable);
    }

    #[test]
    fn cube_lowers_to_all_subset_masks() {
        let plan = LogicalPlan::Cube {
            group_exprs: vec![Expr::col("a"), Expr::col("b")],
            aggr_exprs: vec![ualias(Expr::col("a")), ualias(Expr::col("b"))],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let LogicalPlan::Aggregate { input, .. } = analyzed else {
            panic!("expected aggregate on top");
        };
        let LogicalPlan::Expand { bitmasks, .. } = *input else {
            panic!("expected expand under the aggregate");
        };
        assert_eq!(bitmasks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn grouping_by_an_expression_inserts_an_aliasing_projection() {
        let plan = LogicalPlan::Rollup {
            group_exprs: vec![Expr::BinaryOp {
                left: Box::new(Expr::col("a")),
                op: BinaryOp::Plus,
                right: Box::new(Expr::col("x")),
            }],
            aggr_exprs: vec![ualias(call("count", vec![Expr::col("b")]))],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let LogicalPlan::Aggregate { input, .. } = analyzed else {
            panic!("expected aggregate on top");
        };
        let LogicalPlan::Expand {
            group_by, input, ..
        } = *input
        else {
            panic!("expected expand under the aggregate");
        };
        assert_eq!(group_by.len(), 1);
        let LogicalPlan::Project { exprs, .. } = *input else {
            panic!("expected aliasing projection under the expand");
        };
        // Original columns plus the alias computing the grouping expression.
        assert_eq!(exprs.len(), 4);
        assert!(exprs[3].to_attribute().map(|a| a.id) == Some(group_by[0].id));
    }

    #[test]
    fn aliased_explode_becomes_a_generate_operator() {
        let plan = LogicalPlan::Project {
            exprs: vec![call("explode", vec![Expr::col("xs")]).alias("v")],
            input: Box::new(table("docs")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        assert_eq!(analyzed.output()[0].name, "v");
        let LogicalPlan::Project { input, .. } = analyzed else {
            panic!("expected projection on top");
        };
        let LogicalPlan::Generate { join, output, .. } = *input else {
            panic!("expected generate under the projection");
        };
        assert!(!join, "a lone generator does not join input columns");
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].name, "v");
        assert_eq!(output[0].data_type, DataType::Int64);
    }

    #[test]
    fn generator_beside_columns_joins_input_rows() {
        let plan = LogicalPlan::Project {
            exprs: vec![
                ualias(Expr::col("tag")),
                call("explode", vec![Expr::col("xs")]).alias("v"),
            ],
            input: Box::new(table("docs")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let names: Vec<String> = analyzed.output().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, ["tag", "v"]);
        let LogicalPlan::Project { input, .. } = analyzed else {
            panic!("expected projection on top");
        };
        let LogicalPlan::Generate { join, .. } = *input else {
            panic!("expected generate under the projection");
        };
        assert!(join, "other select items require the joined generate form");
    }

    #[test]
    fn two_generators_in_one_select_are_rejected() {
        let plan = LogicalPlan::Project {
            exprs: vec![
                call("explode", vec![Expr::col("xs")]).alias("v1"),
                call("explode", vec![Expr::col("xs")]).alias("v2"),
            ],
            input: Box::new(table("docs")),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("only one generator allowed"), "err={msg}");
        assert!(msg.contains("EXPLODE"), "err={msg}");
    }

    #[test]
    fn unaliased_posexplode_gets_default_column_names() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(call("posexplode", vec![Expr::col("xs")]))],
            input: Box::new(table("docs")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let out = analyzed.output();
        let names: Vec<&str> = out.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["_c0", "_c1"]);
        assert_eq!(out[0].data_type, DataType::Int32);
        assert_eq!(out[1].data_type, DataType::Int64);
    }

    #[test]
    fn posexplode_under_a_single_alias_is_rejected() {
        let plan = LogicalPlan::Project {
            exprs: vec![call("posexplode", vec![Expr::col("xs")]).alias("v")],
            input: Box::new(table("docs")),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(
            err.to_string().contains("use a multi-part alias"),
            "err={err}"
        );
    }

    #[test]
    fn generate_node_output_is_synthesized_from_element_types() {
        let plan = LogicalPlan::Generate {
            generator: call("explode", vec![Expr::col("xs")]),
            join: true,
            outer: true,
            qualifier: None,
            output_names: vec!["e".to_string()],
            output: vec![],
            input: Box::new(table("docs")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let LogicalPlan::Generate { output, .. } = &analyzed else {
            panic!("expected generate");
        };
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].name, "e");
        let names: Vec<String> = analyzed.output().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, ["tag", "xs", "e"], "joined generate appends columns");
    }

    #[test]
    fn generate_alias_count_mismatch_is_rejected() {
        let plan = LogicalPlan::Generate {
            generator: call("posexplode", vec![Expr::col("xs")]),
            join: false,
            outer: false,
            qualifier: None,
            output_names: vec!["only_one".to_string()],
            output: vec![],
            input: Box::new(table("docs")),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(
            err.to_string().contains("expected 2 aliases but got 1"),
            "err={err}"
        );
    }

    #[test]
    fn rank_over_partition_builds_a_window_stack() {
        let windowed = Expr::Window {
            function: Box::new(call("rank", vec![])),
            spec: WindowSpec {
                partition_by: vec![Expr::col("a")],
                order_by: vec![SortOrder::asc(Expr::col("b"))],
                frame: None,
            },
        };
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(windowed)],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let out = analyzed.output();
        assert_eq!(out.len(), 1);
        let LogicalPlan::Project { input, .. } = analyzed else {
            panic!("expected restoring projection on top");
        };
        let LogicalPlan::Project { input, .. } = *input else {
            panic!("expected window output projection");
        };
        let LogicalPlan::Window {
            window_exprs,
            spec,
            input,
        } = *input
        else {
            panic!("expected window operator");
        };
        assert_eq!(window_exprs.len(), 1);
        assert!(window_exprs[0].exists(&|e| matches!(
            e,
            Expr::WindowFunction {
                func: crate::expr::WindowFunc::Rank,
                ..
            }
        )));
        assert_eq!(spec.partition_by.len(), 1);
        let LogicalPlan::Project { exprs, .. } = *input else {
            panic!("expected argument projection under the window");
        };
        let names: Vec<String> = exprs
            .iter()
            .filter_map(|e| e.to_attribute())
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ["a", "b"], "partition and order columns are projected");
    }

    #[test]
    fn window_nested_in_an_expression_gets_a_synthetic_alias() {
        let windowed = Expr::BinaryOp {
            left: Box::new(Expr::Window {
                function: Box::new(call("sum", vec![Expr::col("x")])),
                spec: WindowSpec {
                    partition_by: vec![Expr::col("a")],
                    order_by: vec![],
                    frame: None,
                },
            }),
            op: BinaryOp::Plus,
            right: Box::new(Expr::Literal(Literal::Int64(1))),
        };
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(windowed)],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let mut window_alias_names: Vec<String> = vec![];
        analyzed.transform_up(&mut |p| {
            if let LogicalPlan::Window { window_exprs, .. } = &p {
                for e in window_exprs {
                    if let Some(attr) = e.to_attribute() {
                        window_alias_names.push(attr.name);
                    }
                }
            }
            p
        });
        assert_eq!(window_alias_names, ["_we0"]);
    }

    #[test]
    fn windowed_expressions_over_an_aggregation_stack_above_it() {
        let windowed = Expr::Window {
            function: Box::new(call("rank", vec![])),
            spec: WindowSpec {
                partition_by: vec![],
                order_by: vec![SortOrder::asc(Expr::col("a"))],
                frame: None,
            },
        };
        let plan = LogicalPlan::Aggregate {
            group_exprs: vec![Expr::col("a")],
            aggr_exprs: vec![ualias(Expr::col("a")), ualias(windowed)],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let names: Vec<String> = analyzed.output().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, ["a", "_c1"]);

        let mut saw_window_above_aggregate = false;
        analyzed.transform_up(&mut |p| {
            if let LogicalPlan::Window { input, .. } = &p {
                let mut cursor: &LogicalPlan = input;
                loop {
                    match cursor {
                        LogicalPlan::Aggregate { .. } => {
                            saw_window_above_aggregate = true;
                            break;
                        }
                        _ => match cursor.children().first() {
                            Some(next) => cursor = next,
                            None => break,
                        },
                    }
                }
            }
            p
        });
        assert!(saw_window_above_aggregate);
    }

    #[test]
    fn nondeterministic_sort_expression_is_pulled_into_a_projection() {
        let plan = LogicalPlan::Sort {
            order: vec![SortOrder::asc(call("rand", vec![]))],
            input: Box::new(LogicalPlan::Project {
                exprs: vec![ualias(Expr::col("a"))],
                input: Box::new(table("r")),
            }),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let out = analyzed.output();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
        let LogicalPlan::Project { input, .. } = analyzed else {
            panic!("expected restoring projection on top");
        };
        let LogicalPlan::Sort { order, input } = *input else {
            panic!("expected sort under the projection");
        };
        assert!(
            matches!(&order[0].expr, Expr::Column(attr) if attr.name == "_nondeterministic")
        );
        let LogicalPlan::Project { exprs, .. } = *input else {
            panic!("expected projection computing the random value");
        };
        assert!(exprs.iter().any(|e| matches!(
            e,
            Expr::Alias { name, expr, .. } if name == "_nondeterministic"
                && matches!(**expr, Expr::Rand)
        )));
    }
}
