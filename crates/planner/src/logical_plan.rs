use arrow_schema::{DataType, Field, Schema};
use flint_common::{FlintError, Result};
use serde::{Deserialize, Serialize};

use crate::expr::{Attribute, Expr, SortOrder, WindowSpec};

/// Name equality function selected by
/// [`AnalyzerConfig::case_sensitive_analysis`](flint_common::AnalyzerConfig).
/// Every name comparison during analysis routes through one of these.
pub type Resolver = fn(&str, &str) -> bool;

/// Exact string equality.
pub fn case_sensitive_resolver(a: &str, b: &str) -> bool {
    a == b
}

/// ASCII case-insensitive equality.
pub fn case_insensitive_resolver(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Join variants understood by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

/// Relational operator tree.
///
/// Plans are immutable values: every transform rebuilds the spine and shares
/// unchanged subtrees by value. A plan is resolved once every column/function
/// reference is bound and every syntax-level wrapper (`With`, `Cube`, ...)
/// has been lowered away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicalPlan {
    /// Relation named by the frontend, not yet looked up in the catalog.
    UnresolvedRelation {
        /// Possibly qualified name parts (`db`, `table`).
        name: Vec<String>,
        alias: Option<String>,
    },
    /// Schema-carrying leaf produced by catalog lookup or in-memory data.
    Relation {
        name: String,
        output: Vec<Attribute>,
    },
    /// Scoping wrapper naming a derived relation; stripped after analysis.
    Subquery {
        alias: String,
        input: Box<LogicalPlan>,
    },
    Project {
        exprs: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Sort {
        order: Vec<SortOrder>,
        input: Box<LogicalPlan>,
    },
    Aggregate {
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        condition: Option<Expr>,
    },
    /// Application of a table-generating function to each input row.
    Generate {
        generator: Expr,
        /// Whether generated columns are appended to the input row.
        join: bool,
        /// Whether an input row with no generated rows still emits one row
        /// of nulls.
        outer: bool,
        qualifier: Option<String>,
        /// Column names requested by the query, empty for defaults.
        output_names: Vec<String>,
        /// Synthesized output attributes; empty until resolution.
        output: Vec<Attribute>,
        input: Box<LogicalPlan>,
    },
    /// One group of equally-specified window expressions.
    Window {
        window_exprs: Vec<Expr>,
        spec: WindowSpec,
        input: Box<LogicalPlan>,
    },
    /// Replicates each input row once per grouping mask, nulling the
    /// non-grouped columns and tagging rows with a grouping id.
    Expand {
        bitmasks: Vec<u64>,
        group_by: Vec<Attribute>,
        gid: Attribute,
        input: Box<LogicalPlan>,
    },
    /// CTE binder: names become visible to relation references in `input`.
    With {
        input: Box<LogicalPlan>,
        ctes: Vec<(String, LogicalPlan)>,
    },
    /// Named WINDOW clause binder.
    WithWindowDefinition {
        defs: Vec<(String, WindowSpec)>,
        input: Box<LogicalPlan>,
    },
    InsertInto {
        /// Target relation; starts unresolved like any other relation.
        table: Box<LogicalPlan>,
        input: Box<LogicalPlan>,
    },
    /// GROUP BY ... WITH CUBE, lowered to [`LogicalPlan::GroupingSets`].
    Cube {
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    /// GROUP BY ... WITH ROLLUP, lowered to [`LogicalPlan::GroupingSets`].
    Rollup {
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    /// Explicit grouping-set masks over the group-by list; bit i set means
    /// group-by expression i participates in that grouping set.
    GroupingSets {
        bitmasks: Vec<u64>,
        group_exprs: Vec<Expr>,
        aggr_exprs: Vec<Expr>,
        input: Box<LogicalPlan>,
    },
    /// Pipes rows through an external script with a declared output schema.
    ScriptTransformation {
        input_exprs: Vec<Expr>,
        script: String,
        output: Vec<Attribute>,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// Borrowing view of child plans.
    ///
    /// `InsertInto::table` and CTE definition plans are deliberately not
    /// children: the former is resolved explicitly by relation resolution,
    /// the latter are spliced in by CTE substitution.
    pub fn children(&self) -> Vec<&LogicalPlan> {
        match self {
            Self::UnresolvedRelation { .. } | Self::Relation { .. } => vec![],
            Self::Subquery { input, .. }
            | Self::Project { input, .. }
            | Self::Filter { input, .. }
            | Self::Sort { input, .. }
            | Self::Aggregate { input, .. }
            | Self::Generate { input, .. }
            | Self::Window { input, .. }
            | Self::Expand { input, .. }
            | Self::With { input, .. }
            | Self::WithWindowDefinition { input, .. }
            | Self::Cube { input, .. }
            | Self::Rollup { input, .. }
            | Self::GroupingSets { input, .. }
            | Self::ScriptTransformation { input, .. } => vec![input.as_ref()],
            Self::Join { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::InsertInto { input, .. } => vec![input.as_ref()],
        }
    }

    /// Rebuild this node with every child passed through `f`, short-circuiting
    /// on the first error.
    pub fn try_map_children<E>(
        self,
        f: &mut dyn FnMut(LogicalPlan) -> std::result::Result<LogicalPlan, E>,
    ) -> std::result::Result<LogicalPlan, E> {
        Ok(match self {
            leaf @ (Self::UnresolvedRelation { .. } | Self::Relation { .. }) => leaf,
            Self::Subquery { alias, input } => Self::Subquery {
                alias,
                input: Box::new(f(*input)?),
            },
            Self::Project { exprs, input } => Self::Project {
                exprs,
                input: Box::new(f(*input)?),
            },
            Self::Filter { predicate, input } => Self::Filter {
                predicate,
                input: Box::new(f(*input)?),
            },
            Self::Sort { order, input } => Self::Sort {
                order,
                input: Box::new(f(*input)?),
            },
            Self::Aggregate {
                group_exprs,
                aggr_exprs,
                input,
            } => Self::Aggregate {
                group_exprs,
                aggr_exprs,
                input: Box::new(f(*input)?),
            },
            Self::Join {
                left,
                right,
                join_type,
                condition,
            } => Self::Join {
                left: Box::new(f(*left)?),
                right: Box::new(f(*right)?),
                join_type,
                condition,
            },
            Self::Generate {
                generator,
                join,
                outer,
                qualifier,
                output_names,
                output,
                input,
            } => Self::Generate {
                generator,
                join,
                outer,
                qualifier,
                output_names,
                output,
                input: Box::new(f(*input)?),
            },
            Self::Window {
                window_exprs,
                spec,
                input,
            } => Self::Window {
                window_exprs,
                spec,
                input: Box::new(f(*input)?),
            },
            Self::Expand {
                bitmasks,
                group_by,
                gid,
                input,
            } => Self::Expand {
                bitmasks,
                group_by,
                gid,
                input: Box::new(f(*input)?),
            },
            Self::With { input, ctes } => Self::With {
                input: Box::new(f(*input)?),
                ctes,
            },
            Self::WithWindowDefinition { defs, input } => Self::WithWindowDefinition {
                defs,
                input: Box::new(f(*input)?),
            },
            Self::InsertInto { table, input } => Self::InsertInto {
                table,
                input: Box::new(f(*input)?),
            },
            Self::Cube {
                group_exprs,
                aggr_exprs,
                input,
            } => Self::Cube {
                group_exprs,
                aggr_exprs,
                input: Box::new(f(*input)?),
            },
            Self::Rollup {
                group_exprs,
                aggr_exprs,
                input,
            } => Self::Rollup {
                group_exprs,
                aggr_exprs,
                input: Box::new(f(*input)?),
            },
            Self::GroupingSets {
                bitmasks,
                group_exprs,
                aggr_exprs,
                input,
            } => Self::GroupingSets {
                bitmasks,
                group_exprs,
                aggr_exprs,
                input: Box::new(f(*input)?),
            },
            Self::ScriptTransformation {
                input_exprs,
                script,
                output,
                input,
            } => Self::ScriptTransformation {
                input_exprs,
                script,
                output,
                input: Box::new(f(*input)?),
            },
        })
    }

    /// Infallible [`LogicalPlan::try_map_children`].
    pub fn map_children(self, f: &mut dyn FnMut(LogicalPlan) -> LogicalPlan) -> LogicalPlan {
        enum Never {}
        match self.try_map_children::<Never>(&mut |p| Ok(f(p))) {
            Ok(p) => p,
            Err(never) => match never {},
        }
    }

    /// Rewrite bottom-up: children first, then this node.
    pub fn transform_up(self, f: &mut dyn FnMut(LogicalPlan) -> LogicalPlan) -> LogicalPlan {
        let rewritten = self.map_children(&mut |c| c.transform_up(f));
        f(rewritten)
    }

    /// Rewrite top-down: this node first, then its (new) children.
    pub fn transform_down(self, f: &mut dyn FnMut(LogicalPlan) -> LogicalPlan) -> LogicalPlan {
        let rewritten = f(self);
        rewritten.map_children(&mut |c| c.transform_down(f))
    }

    /// Fallible [`LogicalPlan::transform_up`].
    pub fn try_transform_up(
        self,
        f: &mut dyn FnMut(LogicalPlan) -> Result<LogicalPlan>,
    ) -> Result<LogicalPlan> {
        let rewritten = self.try_map_children(&mut |c| c.try_transform_up(f))?;
        f(rewritten)
    }

    /// Fallible [`LogicalPlan::transform_down`].
    pub fn try_transform_down(
        self,
        f: &mut dyn FnMut(LogicalPlan) -> Result<LogicalPlan>,
    ) -> Result<LogicalPlan> {
        let rewritten = f(self)?;
        rewritten.try_map_children(&mut |c| c.try_transform_down(f))
    }

    /// Borrowing view of the expressions held directly by this node.
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Self::Project { exprs, .. } => exprs.iter().collect(),
            Self::Filter { predicate, .. } => vec![predicate],
            Self::Sort { order, .. } => order.iter().map(|o| &o.expr).collect(),
            Self::Aggregate {
                group_exprs,
                aggr_exprs,
                ..
            }
            | Self::Cube {
                group_exprs,
                aggr_exprs,
                ..
            }
            | Self::Rollup {
                group_exprs,
                aggr_exprs,
                ..
            }
            | Self::GroupingSets {
                group_exprs,
                aggr_exprs,
                ..
            } => group_exprs.iter().chain(aggr_exprs.iter()).collect(),
            Self::Join { condition, .. } => condition.iter().collect(),
            Self::Generate { generator, .. } => vec![generator],
            Self::Window {
                window_exprs, spec, ..
            } => window_exprs
                .iter()
                .chain(spec.partition_by.iter())
                .chain(spec.order_by.iter().map(|o| &o.expr))
                .collect(),
            Self::ScriptTransformation { input_exprs, .. } => input_exprs.iter().collect(),
            _ => vec![],
        }
    }

    /// Rebuild this node with each directly held expression passed through
    /// `f`, short-circuiting on the first error. Child plans are untouched.
    pub fn try_map_expressions<E>(
        self,
        f: &mut dyn FnMut(Expr) -> std::result::Result<Expr, E>,
    ) -> std::result::Result<LogicalPlan, E> {
        fn map_vec<E>(
            v: Vec<Expr>,
            f: &mut dyn FnMut(Expr) -> std::result::Result<Expr, E>,
        ) -> std::result::Result<Vec<Expr>, E> {
            v.into_iter().map(|e| f(e)).collect()
        }
        fn map_order<E>(
            v: Vec<SortOrder>,
            f: &mut dyn FnMut(Expr) -> std::result::Result<Expr, E>,
        ) -> std::result::Result<Vec<SortOrder>, E> {
            v.into_iter()
                .map(|o| {
                    Ok(SortOrder {
                        expr: f(o.expr)?,
                        direction: o.direction,
                        nulls_first: o.nulls_first,
                    })
                })
                .collect()
        }

        Ok(match self {
            Self::Project { exprs, input } => Self::Project {
                exprs: map_vec(exprs, f)?,
                input,
            },
            Self::Filter { predicate, input } => Self::Filter {
                predicate: f(predicate)?,
                input,
            },
            Self::Sort { order, input } => Self::Sort {
                order: map_order(order, f)?,
                input,
            },
            Self::Aggregate {
                group_exprs,
                aggr_exprs,
                input,
            } => Self::Aggregate {
                group_exprs: map_vec(group_exprs, f)?,
                aggr_exprs: map_vec(aggr_exprs, f)?,
                input,
            },
            Self::Join {
                left,
                right,
                join_type,
                condition,
            } => Self::Join {
                left,
                right,
                join_type,
                condition: condition.map(|c| f(c)).transpose()?,
            },
            Self::Generate {
                generator,
                join,
                outer,
                qualifier,
                output_names,
                output,
                input,
            } => Self::Generate {
                generator: f(generator)?,
                join,
                outer,
                qualifier,
                output_names,
                output,
                input,
            },
            Self::Window {
                window_exprs,
                spec,
                input,
            } => Self::Window {
                window_exprs: map_vec(window_exprs, f)?,
                spec: WindowSpec {
                    partition_by: map_vec(spec.partition_by, f)?,
                    order_by: map_order(spec.order_by, f)?,
                    frame: spec.frame,
                },
                input,
            },
            Self::Cube {
                group_exprs,
                aggr_exprs,
                input,
            } => Self::Cube {
                group_exprs: map_vec(group_exprs, f)?,
                aggr_exprs: map_vec(aggr_exprs, f)?,
                input,
            },
            Self::Rollup {
                group_exprs,
                aggr_exprs,
                input,
            } => Self::Rollup {
                group_exprs: map_vec(group_exprs, f)?,
                aggr_exprs: map_vec(aggr_exprs, f)?,
                input,
            },
            Self::GroupingSets {
                bitmasks,
                group_exprs,
                aggr_exprs,
                input,
            } => Self::GroupingSets {
                bitmasks,
                group_exprs: map_vec(group_exprs, f)?,
                aggr_exprs: map_vec(aggr_exprs, f)?,
                input,
            },
            Self::ScriptTransformation {
                input_exprs,
                script,
                output,
                input,
            } => Self::ScriptTransformation {
                input_exprs: map_vec(input_exprs, f)?,
                script,
                output,
                input,
            },
            other => other,
        })
    }

    /// Infallible [`LogicalPlan::try_map_expressions`].
    pub fn map_expressions(self, f: &mut dyn FnMut(Expr) -> Expr) -> LogicalPlan {
        enum Never {}
        match self.try_map_expressions::<Never>(&mut |e| Ok(f(e))) {
            Ok(p) => p,
            Err(never) => match never {},
        }
    }

    /// Whether every child plan is resolved.
    pub fn children_resolved(&self) -> bool {
        self.children().iter().all(|c| c.resolved())
    }

    /// Spec §3 `resolved`: children resolved, expressions resolved, and no
    /// syntax-level wrapper remaining.
    pub fn resolved(&self) -> bool {
        match self {
            Self::UnresolvedRelation { .. } => false,
            // These exist only to be lowered away; leaving one in a final
            // plan is an analysis failure.
            Self::With { .. }
            | Self::WithWindowDefinition { .. }
            | Self::Cube { .. }
            | Self::Rollup { .. }
            | Self::GroupingSets { .. } => false,
            Self::Generate {
                generator, output, ..
            } => self.children_resolved() && generator.resolved() && !output.is_empty(),
            Self::InsertInto { table, .. } => {
                table.resolved()
                    && self.children_resolved()
                    && self.expressions().iter().all(|e| e.resolved())
            }
            _ => {
                self.children_resolved() && self.expressions().iter().all(|e| e.resolved())
            }
        }
    }

    /// The ordered attributes this operator produces.
    pub fn output(&self) -> Vec<Attribute> {
        match self {
            Self::UnresolvedRelation { .. } | Self::InsertInto { .. } => vec![],
            Self::Relation { output, .. } => output.clone(),
            Self::Subquery { alias, input } => input
                .output()
                .into_iter()
                .map(|a| a.with_qualifier(alias.clone()))
                .collect(),
            Self::Project { exprs, .. } => exprs.iter().filter_map(|e| e.to_attribute()).collect(),
            Self::Filter { input, .. }
            | Self::Sort { input, .. }
            | Self::With { input, .. }
            | Self::WithWindowDefinition { input, .. } => input.output(),
            Self::Aggregate { aggr_exprs, .. }
            | Self::Cube { aggr_exprs, .. }
            | Self::Rollup { aggr_exprs, .. }
            | Self::GroupingSets { aggr_exprs, .. } => {
                aggr_exprs.iter().filter_map(|e| e.to_attribute()).collect()
            }
            Self::Join {
                left,
                right,
                join_type,
                ..
            } => match join_type {
                JoinType::Semi | JoinType::Anti => left.output(),
                JoinType::Inner => {
                    let mut out = left.output();
                    out.extend(right.output());
                    out
                }
                JoinType::Left => {
                    let mut out = left.output();
                    out.extend(right.output().iter().map(Attribute::as_nullable));
                    out
                }
                JoinType::Right => {
                    let mut out: Vec<Attribute> =
                        left.output().iter().map(Attribute::as_nullable).collect();
                    out.extend(right.output());
                    out
                }
                JoinType::Full => {
                    let mut out: Vec<Attribute> =
                        left.output().iter().map(Attribute::as_nullable).collect();
                    out.extend(right.output().iter().map(Attribute::as_nullable));
                    out
                }
            },
            Self::Generate {
                join,
                qualifier,
                output,
                input,
                ..
            } => {
                let generated: Vec<Attribute> = output
                    .iter()
                    .map(|a| match qualifier {
                        Some(q) => a.clone().with_qualifier(q.clone()),
                        None => a.clone(),
                    })
                    .collect();
                if *join {
                    let mut out = input.output();
                    out.extend(generated);
                    out
                } else {
                    generated
                }
            }
            Self::Window {
                window_exprs,
                input,
                ..
            } => {
                let mut out = input.output();
                out.extend(window_exprs.iter().filter_map(|e| e.to_attribute()));
                out
            }
            Self::Expand { gid, input, .. } => {
                let mut out = input.output();
                out.push(gid.clone());
                out
            }
            Self::ScriptTransformation { output, .. } => output.clone(),
        }
    }

    /// Arrow schema view of [`LogicalPlan::output`].
    pub fn schema(&self) -> Schema {
        Schema::new(
            self.output()
                .into_iter()
                .map(|a| Field::new(a.name, a.data_type, a.nullable))
                .collect::<Vec<_>>(),
        )
    }

    /// Resolve a possibly qualified name against this node's own output.
    pub fn resolve(&self, name_parts: &[String], resolver: Resolver) -> Result<Option<Expr>> {
        resolve_against(&self.output(), name_parts, resolver)
    }

    /// Resolve a possibly qualified name against the concatenated outputs of
    /// this node's children.
    pub fn resolve_children(
        &self,
        name_parts: &[String],
        resolver: Resolver,
    ) -> Result<Option<Expr>> {
        let attrs: Vec<Attribute> = self
            .children()
            .iter()
            .flat_map(|c| c.output())
            .collect();
        resolve_against(&attrs, name_parts, resolver)
    }
}

/// Bind `name_parts` against `attrs`.
///
/// Qualified matches (`rel.col`) take precedence over bare-name matches so a
/// column that happens to share a relation's name does not shadow it. Any
/// remaining trailing parts are nested-struct field accesses.
pub(crate) fn resolve_against(
    attrs: &[Attribute],
    name_parts: &[String],
    resolver: Resolver,
) -> Result<Option<Expr>> {
    if name_parts.is_empty() {
        return Ok(None);
    }

    let mut candidates: Vec<(&Attribute, &[String])> = vec![];
    if name_parts.len() >= 2 {
        for attr in attrs {
            let qualifier_matches = attr
                .qualifier
                .as_deref()
                .map(|q| resolver(q, &name_parts[0]))
                .unwrap_or(false);
            if qualifier_matches && resolver(&attr.name, &name_parts[1]) {
                candidates.push((attr, &name_parts[2..]));
            }
        }
    }
    if candidates.is_empty() {
        for attr in attrs {
            if resolver(&attr.name, &name_parts[0]) {
                candidates.push((attr, &name_parts[1..]));
            }
        }
    }

    // The same attribute may be visible through several paths; that is not
    // an ambiguity.
    candidates.dedup_by(|a, b| a.0.id == b.0.id && a.1.len() == b.1.len());
    match candidates.len() {
        0 => Ok(None),
        1 => {
            let (attr, rest) = candidates[0];
            let mut expr = Expr::Column(attr.clone());
            for field in rest {
                expr = extract_field(expr, field, resolver)?;
            }
            Ok(Some(expr))
        }
        _ => Err(FlintError::Planning(format!(
            "reference '{}' is ambiguous, could be: {}",
            name_parts.join("."),
            candidates
                .iter()
                .map(|(a, _)| a.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Typed nested-field access over a resolved base expression.
pub fn extract_field(base: Expr, field: &str, resolver: Resolver) -> Result<Expr> {
    let base_type = base.data_type().ok_or_else(|| {
        FlintError::Planning(format!("cannot extract '{field}' from an untyped expression"))
    })?;
    match &base_type {
        DataType::Struct(fields) => {
            let matched = fields
                .iter()
                .find(|fld| resolver(fld.name(), field))
                .ok_or_else(|| {
                    FlintError::Planning(format!(
                        "no field '{field}' in struct type {base_type}"
                    ))
                })?;
            Ok(Expr::GetStructField {
                expr: Box::new(base),
                field: matched.name().clone(),
                field_type: matched.data_type().clone(),
                field_nullable: matched.is_nullable(),
            })
        }
        DataType::List(item) => match item.data_type() {
            DataType::Struct(fields) => {
                let matched = fields
                    .iter()
                    .find(|fld| resolver(fld.name(), field))
                    .ok_or_else(|| {
                        FlintError::Planning(format!(
                            "no field '{field}' in element type {}",
                            item.data_type()
                        ))
                    })?;
                Ok(Expr::GetArrayStructFields {
                    expr: Box::new(base),
                    field: matched.name().clone(),
                    field_type: matched.data_type().clone(),
                    field_nullable: matched.is_nullable(),
                })
            }
            other => Err(FlintError::Planning(format!(
                "cannot extract '{field}' from array of {other}"
            ))),
        },
        other => Err(FlintError::Planning(format!(
            "cannot extract '{field}' from value of type {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_schema::Fields;

    fn relation(name: &str, cols: &[(&str, DataType)]) -> LogicalPlan {
        LogicalPlan::Relation {
            name: name.to_string(),
            output: cols
                .iter()
                .map(|(c, dt)| Attribute::new(*c, dt.clone(), true).with_qualifier(name))
                .collect(),
        }
    }

    #[test]
    fn subquery_requalifies_output_without_changing_ids() {
        let rel = relation("t", &[("a", DataType::Int64)]);
        let inner_id = rel.output()[0].id;
        let sub = LogicalPlan::Subquery {
            alias: "q".to_string(),
            input: Box::new(rel),
        };
        let out = sub.output();
        assert_eq!(out[0].qualifier.as_deref(), Some("q"));
        assert_eq!(out[0].id, inner_id);
    }

    #[test]
    fn resolve_prefers_qualified_match_over_bare_name() {
        // A column literally named "t" must not shadow t.a.
        let attrs = vec![
            Attribute::new("t", DataType::Int64, true),
            Attribute::new("a", DataType::Int64, true).with_qualifier("t"),
        ];
        let resolved = resolve_against(
            &attrs,
            &["t".to_string(), "a".to_string()],
            case_insensitive_resolver,
        )
        .expect("resolve")
        .expect("must bind");
        assert!(matches!(resolved, Expr::Column(a) if a.name == "a"));
    }

    #[test]
    fn resolve_reports_ambiguity() {
        let attrs = vec![
            Attribute::new("a", DataType::Int64, true).with_qualifier("l"),
            Attribute::new("a", DataType::Int64, true).with_qualifier("r"),
        ];
        let err = resolve_against(&attrs, &["a".to_string()], case_insensitive_resolver)
            .expect_err("ambiguous reference must fail");
        assert!(err.to_string().contains("ambiguous"), "err={err}");
    }

    #[test]
    fn resolve_builds_struct_field_access() {
        let struct_type = DataType::Struct(Fields::from(vec![Field::new(
            "city",
            DataType::Utf8,
            true,
        )]));
        let attrs = vec![Attribute::new("addr", struct_type, true)];
        let resolved = resolve_against(
            &attrs,
            &["addr".to_string(), "city".to_string()],
            case_insensitive_resolver,
        )
        .expect("resolve")
        .expect("must bind");
        match resolved {
            Expr::GetStructField {
                field, field_type, ..
            } => {
                assert_eq!(field, "city");
                assert_eq!(field_type, DataType::Utf8);
            }
            other => panic!("expected struct field access, got {other:?}"),
        }
    }

    #[test]
    fn outer_join_widens_nullability() {
        let l = relation("l", &[("a", DataType::Int64)]);
        let r = LogicalPlan::Relation {
            name: "r".to_string(),
            output: vec![Attribute::new("b", DataType::Int64, false).with_qualifier("r")],
        };
        let join = LogicalPlan::Join {
            left: Box::new(l),
            right: Box::new(r),
            join_type: JoinType::Left,
            condition: None,
        };
        let out = join.output();
        assert!(out[1].nullable, "right side of a left join must be nullable");
    }

    #[test]
    fn wrappers_are_never_resolved() {
        let rel = relation("t", &[("a", DataType::Int64)]);
        let with = LogicalPlan::With {
            input: Box::new(rel.clone()),
            ctes: vec![],
        };
        assert!(rel.resolved());
        assert!(!with.resolved());
    }

    #[test]
    fn sort_with_unresolved_order_is_unresolved() {
        let rel = relation("t", &[("a", DataType::Int64)]);
        let sort = LogicalPlan::Sort {
            order: vec![SortOrder::asc(Expr::col("a"))],
            input: Box::new(rel),
        };
        assert!(sort.children_resolved());
        assert!(!sort.resolved());
    }
}
