use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use arrow_schema::{DataType, SchemaRef};
use flint_common::{AnalyzerConfig, ExprId, FlintError, Result};
use tracing::{debug, trace};

use crate::expr::{
    is_numeric, wider_numeric, AggregateFunc, Attribute, AttributeSet, BinaryOp, Expr,
    GeneratorFunc, SortOrder, WindowFunc,
};
use crate::logical_plan::{
    case_insensitive_resolver, case_sensitive_resolver, extract_field, resolve_against,
    LogicalPlan, Resolver,
};
use crate::lowering::{
    ExtractWindowExpressions, PullOutNondeterministic, ResolveGenerate, ResolveGroupingAnalytics,
};

/// Alias name given to a HAVING predicate lifted into its aggregate.
pub const HAVING_CONDITION_NAME: &str = "havingCondition";

/// Alias prefix for aggregate expressions lifted out of an ORDER BY clause.
pub const AGG_ORDERING_NAME: &str = "_aggOrdering";

/// The analyzer needs relation schemas to resolve table references.
/// The session layer provides this from its catalog.
pub trait Catalog: Send + Sync {
    /// Return the plan backing a (possibly qualified) table name.
    ///
    /// A miss is fatal: unlike column references, a table reference can never
    /// be resolved by a later rule pass.
    fn lookup_relation(&self, name: &[String], alias: Option<&str>) -> Result<LogicalPlan>;
}

/// In-memory catalog mapping table names to schema-carrying relations.
///
/// Attribute ids are fixed at registration, so every lookup of the same table
/// returns the same columns; joining a table with itself therefore collides
/// on ids and goes through self-join deconfliction, exactly like a reused
/// client-side plan. Table names are matched case-insensitively. Reads take a
/// shared lock, so concurrent analyses see a consistent snapshot.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<HashMap<String, LogicalPlan>>,
}

impl MemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a table schema.
    ///
    /// Returns `true` when an existing table with the same name was replaced.
    pub fn register_table(&self, name: impl Into<String>, schema: SchemaRef) -> bool {
        let name = name.into();
        let output = schema
            .fields()
            .iter()
            .map(|f| Attribute::new(f.name().clone(), f.data_type().clone(), f.is_nullable()))
            .collect();
        let relation = LogicalPlan::Relation {
            name: name.clone(),
            output,
        };
        self.tables
            .write()
            .expect("catalog lock poisoned")
            .insert(name.to_ascii_lowercase(), relation)
            .is_some()
    }

    /// Remove a table by name. Returns `true` when a table was removed.
    pub fn deregister_table(&self, name: &str) -> bool {
        self.tables
            .write()
            .expect("catalog lock poisoned")
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }
}

impl Catalog for MemoryCatalog {
    fn lookup_relation(&self, name: &[String], alias: Option<&str>) -> Result<LogicalPlan> {
        let table = name
            .last()
            .ok_or_else(|| FlintError::Planning("empty table name".to_string()))?;
        let relation = self
            .tables
            .read()
            .expect("catalog lock poisoned")
            .get(&table.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| FlintError::Planning(format!("no such table: {}", name.join("."))))?;
        // The scoping wrapper carries the qualifier; it is stripped after
        // analysis by `eliminate_subqueries`.
        Ok(LogicalPlan::Subquery {
            alias: alias.unwrap_or(table.as_str()).to_string(),
            input: Box::new(relation),
        })
    }
}

/// Type resolver callback for scalar UDFs.
pub type ScalarUdfTypeResolver =
    Arc<dyn Fn(&[DataType]) -> Result<DataType> + Send + Sync + 'static>;

/// Resolves function names to concrete expressions.
pub trait FunctionRegistry: Send + Sync {
    /// Return the resolved expression for a call, or `None` for an unknown
    /// function. A miss is soft: the call is left unresolved and reported by
    /// the post-analysis check if no later pass resolves it.
    fn lookup_function(&self, name: &str, args: &[Expr]) -> Option<Expr>;
}

/// Builtin functions plus runtime-registered scalar UDF type resolvers.
pub struct BuiltinFunctionRegistry {
    scalar_udfs: RwLock<HashMap<String, ScalarUdfTypeResolver>>,
}

impl std::fmt::Debug for BuiltinFunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .scalar_udfs
            .read()
            .map(|m| m.len())
            .unwrap_or_default();
        f.debug_struct("BuiltinFunctionRegistry")
            .field("scalar_udfs", &count)
            .finish()
    }
}

impl Default for BuiltinFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinFunctionRegistry {
    /// Create a registry with only the builtin functions.
    pub fn new() -> Self {
        Self {
            scalar_udfs: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace a scalar UDF type resolver.
    ///
    /// Returns `true` when an existing resolver with the same name was replaced.
    pub fn register_scalar_udf(
        &self,
        name: impl Into<String>,
        resolver: ScalarUdfTypeResolver,
    ) -> bool {
        self.scalar_udfs
            .write()
            .expect("udf resolver lock poisoned")
            .insert(name.into().to_ascii_lowercase(), resolver)
            .is_some()
    }

    /// Deregister a scalar UDF type resolver by name.
    ///
    /// Returns `true` when an existing resolver was removed.
    pub fn deregister_scalar_udf(&self, name: &str) -> bool {
        self.scalar_udfs
            .write()
            .expect("udf resolver lock poisoned")
            .remove(&name.to_ascii_lowercase())
            .is_some()
    }
}

impl FunctionRegistry for BuiltinFunctionRegistry {
    fn lookup_function(&self, name: &str, args: &[Expr]) -> Option<Expr> {
        let aggregate = |func: AggregateFunc| {
            Some(Expr::AggregateFunction {
                func,
                args: args.to_vec(),
                distinct: false,
            })
        };
        let window = |func: WindowFunc| {
            Some(Expr::WindowFunction {
                func,
                args: args.to_vec(),
            })
        };
        let generator = |func: GeneratorFunc| {
            Some(Expr::Generator {
                func,
                args: args.to_vec(),
            })
        };
        let scalar = |return_type: Option<DataType>| {
            return_type.map(|return_type| Expr::ScalarFunction {
                name: name.to_ascii_lowercase(),
                args: args.to_vec(),
                return_type,
            })
        };

        match name.to_ascii_lowercase().as_str() {
            "count" => aggregate(AggregateFunc::Count),
            "sum" => aggregate(AggregateFunc::Sum),
            "min" => aggregate(AggregateFunc::Min),
            "max" => aggregate(AggregateFunc::Max),
            "avg" => aggregate(AggregateFunc::Avg),
            "row_number" => window(WindowFunc::RowNumber),
            "rank" => window(WindowFunc::Rank),
            "dense_rank" => window(WindowFunc::DenseRank),
            "ntile" => window(WindowFunc::Ntile),
            "lag" => window(WindowFunc::Lag),
            "lead" => window(WindowFunc::Lead),
            "explode" => generator(GeneratorFunc::Explode),
            "posexplode" => generator(GeneratorFunc::PosExplode),
            "rand" => Some(Expr::Rand),
            "abs" | "coalesce" => scalar(args.first().and_then(|a| a.data_type())),
            "upper" | "lower" | "trim" | "concat" => scalar(Some(DataType::Utf8)),
            "length" => scalar(Some(DataType::Int32)),
            other => {
                let resolver = self
                    .scalar_udfs
                    .read()
                    .expect("udf resolver lock poisoned")
                    .get(other)
                    .cloned()?;
                let arg_types: Option<Vec<DataType>> =
                    args.iter().map(|a| a.data_type()).collect();
                let return_type = resolver(&arg_types?).ok()?;
                Some(Expr::ScalarFunction {
                    name: other.to_string(),
                    args: args.to_vec(),
                    return_type,
                })
            }
        }
    }
}

/// Read-only view of the collaborators and configuration a rule may consult.
pub struct AnalyzerContext<'a> {
    pub catalog: &'a dyn Catalog,
    pub registry: &'a dyn FunctionRegistry,
    pub config: &'a AnalyzerConfig,
}

impl AnalyzerContext<'_> {
    /// Name equality function selected by the configuration.
    pub fn resolver(&self) -> Resolver {
        if self.config.case_sensitive_analysis {
            case_sensitive_resolver
        } else {
            case_insensitive_resolver
        }
    }
}

/// A pure plan-to-plan transformation; the analyzer's unit of composition.
///
/// Rules must be deterministic and leave the plan unchanged once their work
/// is done: fixed-point batches terminate on structural equality.
pub trait AnalyzerRule: Send + Sync {
    /// Rule name used in logs and iteration-cap diagnostics.
    fn name(&self) -> &str;

    /// Rewrite the plan. Returning the input unchanged means "nothing to do".
    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Run every rule exactly once.
    Once,
    /// Repeat the rule sequence until the plan stops changing.
    FixedPoint,
}

struct Batch {
    name: &'static str,
    strategy: Strategy,
    rules: Vec<Arc<dyn AnalyzerRule>>,
}

/// Logical-plan analyzer: binds every reference in a parsed plan and lowers
/// syntax-level constructs into primitive operators.
///
/// Guarantees for a successfully analyzed plan:
/// - no `Unresolved*` expression or plan node remains;
/// - every attribute has a known type and nullability;
/// - `With`/`WithWindowDefinition`/`Cube`/`Rollup`/`GroupingSets` wrappers
///   have been lowered away;
/// - join sides share no attribute ids;
/// - re-analyzing the result is a no-op.
///
/// Error taxonomy:
/// - `Planning`: semantic/type/name resolution failures in the query
/// - `Internal`: rule bugs (non-converging batch, violated invariant)
pub struct Analyzer {
    catalog: Arc<dyn Catalog>,
    registry: Arc<dyn FunctionRegistry>,
    config: AnalyzerConfig,
    extended_rules: RwLock<Vec<Arc<dyn AnalyzerRule>>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let extended = self
            .extended_rules
            .read()
            .map(|r| r.len())
            .unwrap_or_default();
        f.debug_struct("Analyzer")
            .field("config", &self.config)
            .field("extended_rules", &extended)
            .finish()
    }
}

impl Analyzer {
    /// Create an analyzer over the given catalog and function registry.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        registry: Arc<dyn FunctionRegistry>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            catalog,
            registry,
            config,
            extended_rules: RwLock::new(Vec::new()),
        }
    }

    /// Append a custom rule to the resolution batch.
    pub fn register_rule(&self, rule: Arc<dyn AnalyzerRule>) {
        self.extended_rules
            .write()
            .expect("extended rules lock poisoned")
            .push(rule);
    }

    /// Analyze a logical plan, returning the resolved equivalent.
    pub fn analyze(&self, plan: LogicalPlan) -> Result<LogicalPlan> {
        let ctx = AnalyzerContext {
            catalog: self.catalog.as_ref(),
            registry: self.registry.as_ref(),
            config: &self.config,
        };
        let plan = execute_batches(
            plan,
            &self.batches(),
            &ctx,
            self.config.max_rule_iterations,
        )?;
        check_analysis(&plan)?;
        Ok(plan)
    }

    fn batches(&self) -> Vec<Batch> {
        let mut resolution: Vec<Arc<dyn AnalyzerRule>> = vec![
            Arc::new(ResolveRelations),
            Arc::new(ResolveReferences),
            Arc::new(ResolveGroupingAnalytics),
            Arc::new(ResolveSortReferences),
            Arc::new(ResolveGenerate),
            Arc::new(ResolveFunctions),
            Arc::new(ResolveAliases),
            Arc::new(ExtractWindowExpressions),
            Arc::new(GlobalAggregates),
            Arc::new(ResolveHavingClause),
            Arc::new(TypeCoercion),
        ];
        resolution.extend(
            self.extended_rules
                .read()
                .expect("extended rules lock poisoned")
                .iter()
                .cloned(),
        );
        vec![
            Batch {
                name: "substitution",
                strategy: Strategy::FixedPoint,
                rules: vec![Arc::new(CteSubstitution), Arc::new(WindowsSubstitution)],
            },
            Batch {
                name: "resolution",
                strategy: Strategy::FixedPoint,
                rules: resolution,
            },
            Batch {
                name: "nondeterministic",
                strategy: Strategy::Once,
                rules: vec![Arc::new(PullOutNondeterministic)],
            },
        ]
    }
}

fn execute_batches(
    mut plan: LogicalPlan,
    batches: &[Batch],
    ctx: &AnalyzerContext<'_>,
    max_iterations: usize,
) -> Result<LogicalPlan> {
    for batch in batches {
        let started = Instant::now();
        let mut passes = 0usize;
        loop {
            passes += 1;
            let before_pass = plan.clone();
            let mut last_changed: Option<String> = None;
            for rule in &batch.rules {
                let before_rule = plan.clone();
                plan = rule.rewrite(plan, ctx)?;
                if plan != before_rule {
                    trace!(batch = batch.name, rule = rule.name(), "rule changed plan");
                    last_changed = Some(rule.name().to_string());
                }
            }
            if batch.strategy == Strategy::Once || plan == before_pass {
                break;
            }
            if passes >= max_iterations {
                let culprit = last_changed
                    .map(|r| format!(" (last changing rule: {r})"))
                    .unwrap_or_default();
                return Err(FlintError::Internal(format!(
                    "max iterations ({max_iterations}) reached for batch {}{culprit}",
                    batch.name
                )));
            }
        }
        debug!(
            batch = batch.name,
            passes,
            elapsed_us = started.elapsed().as_micros() as u64,
            "batch finished"
        );
    }
    Ok(plan)
}

/// Strip `Subquery` scoping wrappers.
///
/// Applied by callers after analysis (the wrappers only exist to carry
/// qualifiers during resolution) and to INSERT targets during relation
/// resolution.
pub fn eliminate_subqueries(plan: LogicalPlan) -> LogicalPlan {
    plan.transform_up(&mut |p| match p {
        LogicalPlan::Subquery { input, .. } => *input,
        other => other,
    })
}

pub(crate) fn columns(attrs: &[Attribute]) -> Vec<Expr> {
    attrs.iter().cloned().map(Expr::Column).collect()
}

// -------------------------
// Substitution rules
// -------------------------

/// Splice CTE definitions over the relation references in their scope.
/// CTE names shadow catalog tables; only the final name segment is matched.
pub struct CteSubstitution;

impl AnalyzerRule for CteSubstitution {
    fn name(&self) -> &str {
        "cte_substitution"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver();
        Ok(plan.transform_down(&mut |p| match p {
            LogicalPlan::With { input, ctes } => {
                // Later definitions may reference earlier ones.
                let mut bound: Vec<(String, LogicalPlan)> = Vec::with_capacity(ctes.len());
                for (name, cte) in ctes {
                    let substituted = substitute_ctes(cte, &bound, resolver);
                    bound.push((name, substituted));
                }
                substitute_ctes(*input, &bound, resolver)
            }
            other => other,
        }))
    }
}

fn substitute_ctes(
    plan: LogicalPlan,
    ctes: &[(String, LogicalPlan)],
    resolver: Resolver,
) -> LogicalPlan {
    plan.transform_down(&mut |p| match p {
        LogicalPlan::UnresolvedRelation { name, alias } => {
            let matched = name
                .last()
                .and_then(|last| ctes.iter().rev().find(|(n, _)| resolver(n, last)));
            match matched {
                Some((_, cte)) => match alias {
                    Some(a) => LogicalPlan::Subquery {
                        alias: a,
                        input: Box::new(cte.clone()),
                    },
                    None => cte.clone(),
                },
                None => LogicalPlan::UnresolvedRelation { name, alias },
            }
        }
        other => other,
    })
}

/// Substitute named WINDOW clause definitions into the expressions that
/// reference them. A reference to an undefined name is fatal.
pub struct WindowsSubstitution;

impl AnalyzerRule for WindowsSubstitution {
    fn name(&self) -> &str {
        "windows_substitution"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver();
        plan.try_transform_down(&mut |p| match p {
            LogicalPlan::WithWindowDefinition { defs, input } => {
                input.try_transform_down(&mut |c| {
                    c.try_map_expressions(&mut |e| {
                        e.try_transform_up(&mut |e2| match e2 {
                            Expr::UnresolvedWindow { expr, spec_name } => {
                                match defs.iter().find(|(n, _)| resolver(n, &spec_name)) {
                                    Some((_, spec)) => Ok(Expr::Window {
                                        function: expr,
                                        spec: spec.clone(),
                                    }),
                                    None => Err(FlintError::Planning(format!(
                                        "window specification {spec_name} is not defined"
                                    ))),
                                }
                            }
                            other => Ok(other),
                        })
                    })
                })
            }
            other => Ok(other),
        })
    }
}

// -------------------------
// Resolution rules
// -------------------------

/// Replace relation references with the catalog's plans. INSERT targets are
/// additionally stripped of their scoping wrappers.
pub struct ResolveRelations;

impl AnalyzerRule for ResolveRelations {
    fn name(&self) -> &str {
        "resolve_relations"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.try_transform_down(&mut |p| match p {
            LogicalPlan::InsertInto { table, input }
                if matches!(*table, LogicalPlan::UnresolvedRelation { .. }) =>
            {
                let LogicalPlan::UnresolvedRelation { name, alias } = *table else {
                    return Err(FlintError::Internal(
                        "insert target pattern mismatch".to_string(),
                    ));
                };
                let resolved = ctx.catalog.lookup_relation(&name, alias.as_deref())?;
                Ok(LogicalPlan::InsertInto {
                    table: Box::new(eliminate_subqueries(resolved)),
                    input,
                })
            }
            LogicalPlan::UnresolvedRelation { name, alias } => {
                ctx.catalog.lookup_relation(&name, alias.as_deref())
            }
            other => Ok(other),
        })
    }
}

/// The workhorse rule: expands wildcards, binds column references against
/// child outputs, deconflicts self-joins, and leniently resolves sort
/// orderings. Binding failures are deferred to later passes.
pub struct ResolveReferences;

impl AnalyzerRule for ResolveReferences {
    fn name(&self) -> &str {
        "resolve_references"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver();
        plan.try_transform_up(&mut |p| resolve_references_node(p, resolver))
    }
}

fn resolve_references_node(plan: LogicalPlan, resolver: Resolver) -> Result<LogicalPlan> {
    match plan {
        LogicalPlan::Project { exprs, input }
            if input.resolved() && exprs.iter().any(has_star) =>
        {
            let attrs = input.output();
            Ok(LogicalPlan::Project {
                exprs: expand_star_list(exprs, &attrs, resolver)?,
                input,
            })
        }
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            input,
        } if input.resolved() && aggr_exprs.iter().any(has_star) => {
            let attrs = input.output();
            Ok(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs: expand_star_list(aggr_exprs, &attrs, resolver)?,
                input,
            })
        }
        LogicalPlan::ScriptTransformation {
            input_exprs,
            script,
            output,
            input,
        } if input.resolved() && input_exprs.iter().any(has_star) => {
            let attrs = input.output();
            Ok(LogicalPlan::ScriptTransformation {
                input_exprs: expand_star_list(input_exprs, &attrs, resolver)?,
                script,
                output,
                input,
            })
        }
        LogicalPlan::Join {
            left,
            right,
            join_type,
            condition,
        } if left.resolved() && right.resolved() => {
            let left_set = AttributeSet::from_attributes(&left.output());
            if right.output().iter().any(|a| left_set.contains(a)) {
                // The right side is the same subtree as the left; refresh the
                // first conflicting producer and remap references to it. Any
                // further conflict resolves on a later fixed-point pass.
                let new_right = dedup_join_right(*right, &left_set);
                Ok(LogicalPlan::Join {
                    left,
                    right: Box::new(new_right),
                    join_type,
                    condition,
                })
            } else {
                let join = LogicalPlan::Join {
                    left,
                    right,
                    join_type,
                    condition,
                };
                bind_node_references(join, resolver)
            }
        }
        p if p.children_resolved() => bind_node_references(p, resolver),
        other => Ok(other),
    }
}

/// Bind unresolved columns and nested-field accesses in one node's
/// expressions against its children's outputs. Misses leave the expression
/// untouched for a later pass.
fn bind_node_references(plan: LogicalPlan, resolver: Resolver) -> Result<LogicalPlan> {
    let attrs: Vec<Attribute> = plan.children().iter().flat_map(|c| c.output()).collect();
    plan.try_map_expressions(&mut |e| resolve_expression(e, &attrs, resolver))
}

fn resolve_expression(expr: Expr, attrs: &[Attribute], resolver: Resolver) -> Result<Expr> {
    expr.try_transform_up(&mut |e| match e {
        Expr::UnresolvedColumn { name_parts } => {
            match resolve_against(attrs, &name_parts, resolver)? {
                Some(bound) => Ok(bound),
                None => Ok(Expr::UnresolvedColumn { name_parts }),
            }
        }
        Expr::UnresolvedExtract { expr, field } if expr.resolved() => {
            extract_field(*expr, &field, resolver)
        }
        other => Ok(other),
    })
}

fn has_star(expr: &Expr) -> bool {
    expr.exists(&|e| matches!(e, Expr::Star { .. }))
}

fn star_attributes(
    qualifier: &Option<String>,
    attrs: &[Attribute],
    resolver: Resolver,
) -> Result<Vec<Attribute>> {
    match qualifier {
        None => Ok(attrs.to_vec()),
        Some(q) => {
            let matched: Vec<Attribute> = attrs
                .iter()
                .filter(|a| a.qualifier.as_deref().map(|aq| resolver(aq, q)).unwrap_or(false))
                .cloned()
                .collect();
            if matched.is_empty() {
                return Err(FlintError::Planning(format!(
                    "cannot resolve '{q}.*' given input columns [{}]",
                    attribute_names(attrs)
                )));
            }
            Ok(matched)
        }
    }
}

fn expand_star_list(
    exprs: Vec<Expr>,
    attrs: &[Attribute],
    resolver: Resolver,
) -> Result<Vec<Expr>> {
    let mut out = Vec::with_capacity(exprs.len());
    for expr in exprs {
        match expr {
            Expr::Star { qualifier } => {
                out.extend(columns(&star_attributes(&qualifier, attrs, resolver)?));
            }
            Expr::UnresolvedAlias(inner) if matches!(*inner, Expr::Star { .. }) => {
                let Expr::Star { qualifier } = *inner else {
                    return Err(FlintError::Internal("star pattern mismatch".to_string()));
                };
                out.extend(columns(&star_attributes(&qualifier, attrs, resolver)?));
            }
            other => out.push(expand_star_in_args(other, attrs, resolver)?),
        }
    }
    Ok(out)
}

/// `*` appearing inside function arguments or array/struct constructors
/// expands in place.
fn expand_star_in_args(expr: Expr, attrs: &[Attribute], resolver: Resolver) -> Result<Expr> {
    fn splice(
        args: Vec<Expr>,
        attrs: &[Attribute],
        resolver: Resolver,
    ) -> Result<Vec<Expr>> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            match a {
                Expr::Star { qualifier } => {
                    out.extend(columns(&star_attributes(&qualifier, attrs, resolver)?));
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    expr.try_transform_up(&mut |e| match e {
        Expr::UnresolvedFunction {
            name,
            args,
            distinct,
        } if args.iter().any(|a| matches!(a, Expr::Star { .. })) => Ok(Expr::UnresolvedFunction {
            name,
            args: splice(args, attrs, resolver)?,
            distinct,
        }),
        Expr::CreateArray(args) if args.iter().any(|a| matches!(a, Expr::Star { .. })) => {
            Ok(Expr::CreateArray(splice(args, attrs, resolver)?))
        }
        Expr::CreateStruct(args) if args.iter().any(|a| matches!(a, Expr::Star { .. })) => {
            Ok(Expr::CreateStruct(splice(args, attrs, resolver)?))
        }
        other => Ok(other),
    })
}

// -------------------------
// Self-join deconfliction
// -------------------------

fn dedup_join_right(right: LogicalPlan, conflicts: &AttributeSet) -> LogicalPlan {
    let mut mapping: Vec<(ExprId, Attribute)> = vec![];
    let refreshed = refresh_first_conflict(right, conflicts, &mut mapping);
    if mapping.is_empty() {
        // No refreshable producer found; leave the plan for the post-analysis
        // check to report.
        return refreshed;
    }
    remap_attribute_refs(refreshed, &mapping)
}

/// Find the first node (top-down) whose produced attributes collide with
/// `conflicts` and reassign fresh ids to them, recording old-to-new pairs.
fn refresh_first_conflict(
    plan: LogicalPlan,
    conflicts: &AttributeSet,
    mapping: &mut Vec<(ExprId, Attribute)>,
) -> LogicalPlan {
    if !mapping.is_empty() {
        return plan;
    }
    let alias_conflicts = |exprs: &[Expr]| {
        exprs.iter().any(
            |e| matches!(e, Expr::Alias { id, .. } if conflicts.contains_id(*id)),
        )
    };
    let freshen_aliases = |exprs: Vec<Expr>, mapping: &mut Vec<(ExprId, Attribute)>| {
        exprs
            .into_iter()
            .map(|e| match e {
                Expr::Alias { expr, name, id } if conflicts.contains_id(id) => {
                    let fresh = Expr::Alias {
                        expr,
                        name,
                        id: ExprId::fresh(),
                    };
                    if let Some(attr) = fresh.to_attribute() {
                        mapping.push((id, attr));
                    }
                    fresh
                }
                other => other,
            })
            .collect::<Vec<Expr>>()
    };

    match plan {
        LogicalPlan::Relation { name, output }
            if output.iter().any(|a| conflicts.contains(a)) =>
        {
            let new_output: Vec<Attribute> = output.iter().map(|a| a.new_instance()).collect();
            for (old, new) in output.iter().zip(new_output.iter()) {
                mapping.push((old.id, new.clone()));
            }
            LogicalPlan::Relation {
                name,
                output: new_output,
            }
        }
        LogicalPlan::Project { exprs, input } if alias_conflicts(&exprs) => LogicalPlan::Project {
            exprs: freshen_aliases(exprs, mapping),
            input,
        },
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            input,
        } if alias_conflicts(&aggr_exprs) => LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs: freshen_aliases(aggr_exprs, mapping),
            input,
        },
        LogicalPlan::Generate {
            generator,
            join,
            outer,
            qualifier,
            output_names,
            output,
            input,
        } if output.iter().any(|a| conflicts.contains(a)) => {
            let new_output: Vec<Attribute> = output.iter().map(|a| a.new_instance()).collect();
            for (old, new) in output.iter().zip(new_output.iter()) {
                mapping.push((old.id, new.clone()));
            }
            LogicalPlan::Generate {
                generator,
                join,
                outer,
                qualifier,
                output_names,
                output: new_output,
                input,
            }
        }
        LogicalPlan::Window {
            window_exprs,
            spec,
            input,
        } if alias_conflicts(&window_exprs) => LogicalPlan::Window {
            window_exprs: freshen_aliases(window_exprs, mapping),
            spec,
            input,
        },
        other => other.map_children(&mut |c| refresh_first_conflict(c, conflicts, mapping)),
    }
}

/// Rewrite every reference to a refreshed attribute across the whole subtree.
fn remap_attribute_refs(plan: LogicalPlan, mapping: &[(ExprId, Attribute)]) -> LogicalPlan {
    let remap_attr = |attr: &Attribute| -> Option<Attribute> {
        mapping.iter().find(|(old, _)| *old == attr.id).map(|(_, new)| {
            let mut replacement = new.clone();
            replacement.qualifier = attr.qualifier.clone();
            replacement
        })
    };
    plan.transform_up(&mut |p| {
        let p = match p {
            LogicalPlan::Expand {
                bitmasks,
                group_by,
                gid,
                input,
            } => LogicalPlan::Expand {
                bitmasks,
                group_by: group_by
                    .iter()
                    .map(|a| remap_attr(a).unwrap_or_else(|| a.clone()))
                    .collect(),
                gid,
                input,
            },
            other => other,
        };
        p.map_expressions(&mut |e| {
            e.transform_up(&mut |e2| match e2 {
                Expr::Column(attr) => match remap_attr(&attr) {
                    Some(new) => Expr::Column(new),
                    None => Expr::Column(attr),
                },
                other => other,
            })
        })
    })
}

// -------------------------
// Sort references
// -------------------------

/// ORDER BY may reference attributes that the SELECT list projects away, and
/// (above an aggregation) aggregate results that the SELECT list omits. Both
/// are resolved by widening the child operator and projecting the extra
/// columns away above the sort.
pub struct ResolveSortReferences;

impl AnalyzerRule for ResolveSortReferences {
    fn name(&self) -> &str {
        "resolve_sort_references"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver();
        plan.try_transform_up(&mut |p| match p {
            LogicalPlan::Sort { order, input } => match *input {
                LogicalPlan::Project {
                    exprs,
                    input: grandchild,
                } if grandchild.resolved()
                    && exprs.iter().all(|e| e.resolved())
                    && sort_needs_project_widening(&order, &exprs) =>
                {
                    resolve_sort_over_project(order, exprs, grandchild, resolver)
                }
                LogicalPlan::Aggregate {
                    group_exprs,
                    aggr_exprs,
                    input: grandchild,
                } if grandchild.resolved()
                    && group_exprs.iter().all(|e| e.resolved())
                    && aggr_exprs.iter().all(|e| e.resolved())
                    && sort_needs_aggregate_lift(&order, &aggr_exprs) =>
                {
                    resolve_sort_over_aggregate(order, group_exprs, aggr_exprs, grandchild, resolver)
                }
                child => Ok(LogicalPlan::Sort {
                    order,
                    input: Box::new(child),
                }),
            },
            other => Ok(other),
        })
    }
}

/// Whether a sort above a projection still needs work: unresolved ordering
/// expressions, or resolved ones referencing columns the projection dropped.
fn sort_needs_project_widening(order: &[SortOrder], exprs: &[Expr]) -> bool {
    if order.iter().any(|o| !o.resolved()) {
        return true;
    }
    let projected = AttributeSet::from_attributes(
        exprs
            .iter()
            .filter_map(|e| e.to_attribute())
            .collect::<Vec<_>>()
            .iter(),
    );
    order
        .iter()
        .any(|o| o.expr.column_refs().iter().any(|a| !projected.contains(a)))
}

fn resolve_sort_over_project(
    order: Vec<SortOrder>,
    exprs: Vec<Expr>,
    grandchild: Box<LogicalPlan>,
    resolver: Resolver,
) -> Result<LogicalPlan> {
    let child_attrs = grandchild.output();
    let mut new_order = Vec::with_capacity(order.len());
    let mut fully_resolved = true;
    for o in &order {
        let resolved = resolve_expression(o.expr.clone(), &child_attrs, resolver)?;
        if !resolved.resolved() {
            fully_resolved = false;
        }
        new_order.push(SortOrder {
            expr: resolved,
            direction: o.direction,
            nulls_first: o.nulls_first,
        });
    }
    if !fully_resolved {
        // Keep whatever bound so a later pass (for example function
        // resolution) can finish the job; the widening happens once the
        // ordering is fully resolved.
        return Ok(LogicalPlan::Sort {
            order: new_order,
            input: Box::new(LogicalPlan::Project {
                exprs,
                input: grandchild,
            }),
        });
    }

    let projected = AttributeSet::from_attributes(
        exprs.iter().filter_map(|e| e.to_attribute()).collect::<Vec<_>>().iter(),
    );
    let mut missing: Vec<Attribute> = vec![];
    let mut missing_seen = AttributeSet::default();
    for o in &new_order {
        for attr in o.expr.column_refs() {
            if !projected.contains(attr) && !missing_seen.contains(attr) {
                missing_seen.insert(attr);
                missing.push(attr.clone());
            }
        }
    }

    let project = LogicalPlan::Project {
        exprs,
        input: grandchild,
    };
    if missing.is_empty() {
        return Ok(LogicalPlan::Sort {
            order: new_order,
            input: Box::new(project),
        });
    }

    // Widen the projection below the sort, then restore the advertised
    // schema above it.
    let original_output = project.output();
    let LogicalPlan::Project {
        exprs,
        input: grandchild,
    } = project
    else {
        return Err(FlintError::Internal("project pattern mismatch".to_string()));
    };
    let mut widened = exprs;
    widened.extend(columns(&missing));
    Ok(LogicalPlan::Project {
        exprs: columns(&original_output),
        input: Box::new(LogicalPlan::Sort {
            order: new_order,
            input: Box::new(LogicalPlan::Project {
                exprs: widened,
                input: grandchild,
            }),
        }),
    })
}

fn sort_needs_aggregate_lift(order: &[SortOrder], aggr_exprs: &[Expr]) -> bool {
    if order.iter().any(|o| !o.resolved()) {
        return true;
    }
    let agg_output = AttributeSet::from_attributes(
        aggr_exprs
            .iter()
            .filter_map(|e| e.to_attribute())
            .collect::<Vec<_>>()
            .iter(),
    );
    order.iter().any(|o| {
        o.expr.contains_aggregate()
            || o.expr.column_refs().iter().any(|a| !agg_output.contains(a))
    })
}

fn resolve_sort_over_aggregate(
    order: Vec<SortOrder>,
    group_exprs: Vec<Expr>,
    aggr_exprs: Vec<Expr>,
    grandchild: Box<LogicalPlan>,
    resolver: Resolver,
) -> Result<LogicalPlan> {
    // The sort may see the named grouping columns and (through lifted
    // aggregates) the aggregation input.
    let grouping_attrs: Vec<Attribute> =
        group_exprs.iter().filter_map(|e| e.to_attribute()).collect();
    let child_attrs = grandchild.output();
    let mut bind_attrs = grouping_attrs.clone();
    bind_attrs.extend(child_attrs);

    let agg_output: Vec<Attribute> = aggr_exprs.iter().filter_map(|e| e.to_attribute()).collect();
    let agg_output_set = AttributeSet::from_attributes(agg_output.iter());
    let grouping_set = AttributeSet::from_attributes(grouping_attrs.iter());

    let mut lifted: Vec<Expr> = vec![];
    let mut missing: Vec<Attribute> = vec![];
    let mut missing_seen = AttributeSet::default();
    let mut new_order = Vec::with_capacity(order.len());
    let mut bound_order = Vec::with_capacity(order.len());
    let mut fully_resolved = true;
    for o in &order {
        let bound = resolve_expression(o.expr.clone(), &bind_attrs, resolver)?;
        if !bound.resolved() {
            fully_resolved = false;
        }
        bound_order.push(SortOrder {
            expr: bound,
            direction: o.direction,
            nulls_first: o.nulls_first,
        });
    }
    if !fully_resolved {
        // Keep the bindings so function resolution can run over them; the
        // lift happens once the ordering is fully resolved.
        return Ok(LogicalPlan::Sort {
            order: bound_order,
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                input: grandchild,
            }),
        });
    }
    for o in &bound_order {
        let bound = o.expr.clone();
        // Lift each aggregate call into the aggregation and order by its
        // result attribute instead.
        let rewritten = bound.transform_up(&mut |e| match e {
            agg @ Expr::AggregateFunction { .. } => {
                let alias = agg.alias(AGG_ORDERING_NAME);
                match alias.to_attribute() {
                    Some(attr) => {
                        lifted.push(alias);
                        Expr::Column(attr)
                    }
                    None => alias,
                }
            }
            other => other,
        });
        for attr in rewritten.column_refs() {
            if !agg_output_set.contains(attr)
                && grouping_set.contains(attr)
                && !missing_seen.contains(attr)
            {
                missing_seen.insert(attr);
                missing.push(attr.clone());
            }
        }
        new_order.push(SortOrder {
            expr: rewritten,
            direction: o.direction,
            nulls_first: o.nulls_first,
        });
    }

    if lifted.is_empty() && missing.is_empty() {
        return Ok(LogicalPlan::Sort {
            order: new_order,
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                input: grandchild,
            }),
        });
    }

    let mut widened = aggr_exprs;
    widened.extend(columns(&missing));
    widened.extend(lifted);
    Ok(LogicalPlan::Project {
        exprs: columns(&agg_output),
        input: Box::new(LogicalPlan::Sort {
            order: new_order,
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs: widened,
                input: grandchild,
            }),
        }),
    })
}

// -------------------------
// Functions, aliases, aggregates, HAVING
// -------------------------

/// Look up function calls whose arguments are resolved. Unknown names stay
/// unresolved (the registry may learn them later in the same process); the
/// DISTINCT modifier is validated against the resolved aggregate.
pub struct ResolveFunctions;

impl AnalyzerRule for ResolveFunctions {
    fn name(&self) -> &str {
        "resolve_functions"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.try_transform_up(&mut |p| {
            p.try_map_expressions(&mut |e| {
                e.try_transform_up(&mut |e2| match e2 {
                    Expr::UnresolvedFunction {
                        name,
                        args,
                        distinct,
                    } if args.iter().all(|a| a.resolved()) => {
                        match ctx.registry.lookup_function(&name, &args) {
                            Some(resolved) => apply_distinct(resolved, distinct, &name),
                            None => Ok(Expr::UnresolvedFunction {
                                name,
                                args,
                                distinct,
                            }),
                        }
                    }
                    other => Ok(other),
                })
            })
        })
    }
}

fn apply_distinct(resolved: Expr, distinct: bool, name: &str) -> Result<Expr> {
    if !distinct {
        return Ok(resolved);
    }
    match resolved {
        Expr::AggregateFunction { func, args, .. } => match func {
            AggregateFunc::Count | AggregateFunc::Sum => Ok(Expr::AggregateFunction {
                func,
                args,
                distinct: true,
            }),
            // DISTINCT is mathematically inert for extrema.
            AggregateFunc::Min | AggregateFunc::Max => Ok(Expr::AggregateFunction {
                func,
                args,
                distinct: false,
            }),
            AggregateFunc::Avg => Err(FlintError::Planning(format!(
                "{} does not support DISTINCT keyword",
                func.sql_name()
            ))),
        },
        _ => Err(FlintError::Planning(format!(
            "{name} does not support DISTINCT keyword"
        ))),
    }
}

/// Give every output-list entry a concrete name: nested-field accesses take
/// the field name, multi-column generators get a `MultiAlias`, and anything
/// else is named by position.
pub struct ResolveAliases;

impl AnalyzerRule for ResolveAliases {
    fn name(&self) -> &str {
        "resolve_aliases"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        Ok(plan.transform_up(&mut |p| match p {
            LogicalPlan::Project { exprs, input }
                if input.resolved() && has_unresolved_alias(&exprs) =>
            {
                LogicalPlan::Project {
                    exprs: assign_aliases(exprs),
                    input,
                }
            }
            LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                input,
            } if input.resolved() && has_unresolved_alias(&aggr_exprs) => LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs: assign_aliases(aggr_exprs),
                input,
            },
            LogicalPlan::Cube {
                group_exprs,
                aggr_exprs,
                input,
            } if input.resolved() && has_unresolved_alias(&aggr_exprs) => LogicalPlan::Cube {
                group_exprs,
                aggr_exprs: assign_aliases(aggr_exprs),
                input,
            },
            LogicalPlan::Rollup {
                group_exprs,
                aggr_exprs,
                input,
            } if input.resolved() && has_unresolved_alias(&aggr_exprs) => LogicalPlan::Rollup {
                group_exprs,
                aggr_exprs: assign_aliases(aggr_exprs),
                input,
            },
            LogicalPlan::GroupingSets {
                bitmasks,
                group_exprs,
                aggr_exprs,
                input,
            } if input.resolved() && has_unresolved_alias(&aggr_exprs) => {
                LogicalPlan::GroupingSets {
                    bitmasks,
                    group_exprs,
                    aggr_exprs: assign_aliases(aggr_exprs),
                    input,
                }
            }
            other => other,
        }))
    }
}

fn has_unresolved_alias(exprs: &[Expr]) -> bool {
    exprs.iter().any(|e| matches!(e, Expr::UnresolvedAlias(_)))
}

fn assign_aliases(exprs: Vec<Expr>) -> Vec<Expr> {
    exprs
        .into_iter()
        .enumerate()
        .map(|(i, e)| match e {
            Expr::UnresolvedAlias(inner) => {
                let inner = *inner;
                if !inner.resolved() {
                    // Not ready; retried once the child expression resolves.
                    Expr::UnresolvedAlias(Box::new(inner))
                } else if inner.is_named() {
                    inner
                } else {
                    match &inner {
                        Expr::GetStructField { field, .. }
                        | Expr::GetArrayStructFields { field, .. } => {
                            let name = field.clone();
                            inner.alias(name)
                        }
                        Expr::Generator { .. }
                            if inner
                                .generator_element_types()
                                .map(|t| t.len() > 1)
                                .unwrap_or(false) =>
                        {
                            Expr::MultiAlias {
                                expr: Box::new(inner),
                                names: vec![],
                            }
                        }
                        _ => inner.alias(format!("_c{i}")),
                    }
                }
            }
            other => other,
        })
        .collect()
}

/// A projection computing an aggregate with no GROUP BY is an aggregation
/// over the whole input.
pub struct GlobalAggregates;

impl AnalyzerRule for GlobalAggregates {
    fn name(&self) -> &str {
        "global_aggregates"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        Ok(plan.transform_up(&mut |p| match p {
            LogicalPlan::Project { exprs, input }
                if exprs.iter().any(|e| e.contains_aggregate()) =>
            {
                LogicalPlan::Aggregate {
                    group_exprs: vec![],
                    aggr_exprs: exprs,
                    input,
                }
            }
            other => other,
        }))
    }
}

/// Lift a HAVING predicate into its aggregate so the aggregate functions it
/// mentions are computed alongside the SELECT list, then filter on the
/// lifted result and project the original schema.
pub struct ResolveHavingClause;

impl AnalyzerRule for ResolveHavingClause {
    fn name(&self) -> &str {
        "resolve_having_clause"
    }

    fn rewrite(&self, plan: LogicalPlan, ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        let resolver = ctx.resolver();
        plan.try_transform_up(&mut |p| match p {
            LogicalPlan::Filter { predicate, input } => match *input {
                LogicalPlan::Aggregate {
                    group_exprs,
                    aggr_exprs,
                    input: agg_input,
                } if group_exprs.iter().all(|e| e.resolved())
                    && aggr_exprs.iter().all(|e| e.resolved())
                    && agg_input.resolved() =>
                {
                    rewrite_having(
                        predicate,
                        group_exprs,
                        aggr_exprs,
                        agg_input,
                        resolver,
                    )
                }
                child => Ok(LogicalPlan::Filter {
                    predicate,
                    input: Box::new(child),
                }),
            },
            other => Ok(other),
        })
    }
}

fn rewrite_having(
    predicate: Expr,
    group_exprs: Vec<Expr>,
    aggr_exprs: Vec<Expr>,
    agg_input: Box<LogicalPlan>,
    resolver: Resolver,
) -> Result<LogicalPlan> {
    // HAVING may reference grouping columns and aggregation inputs that the
    // SELECT list does not expose; bind those against the aggregate's scope.
    if !predicate.resolved() {
        let grouping_attrs: Vec<Attribute> =
            group_exprs.iter().filter_map(|e| e.to_attribute()).collect();
        let mut bind_attrs = grouping_attrs;
        bind_attrs.extend(agg_input.output());
        let bound = resolve_expression(predicate.clone(), &bind_attrs, resolver)?;
        return Ok(LogicalPlan::Filter {
            predicate: bound,
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                input: agg_input,
            }),
        });
    }

    // Lift once the predicate is resolved and actually needs the aggregate's
    // scope: it computes an aggregate, or references columns the aggregate
    // does not output.
    let agg_output: Vec<Attribute> = aggr_exprs.iter().filter_map(|e| e.to_attribute()).collect();
    let agg_output_set = AttributeSet::from_attributes(agg_output.iter());
    let needs_lift = predicate.contains_aggregate()
        || predicate
            .column_refs()
            .iter()
            .any(|a| !agg_output_set.contains(a));
    if !needs_lift {
        return Ok(LogicalPlan::Filter {
            predicate,
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs,
                input: agg_input,
            }),
        });
    }

    let having_alias = predicate.alias(HAVING_CONDITION_NAME);
    let having_attr = having_alias
        .to_attribute()
        .ok_or_else(|| FlintError::Internal("alias without attribute".to_string()))?;
    let mut widened = vec![having_alias];
    widened.extend(aggr_exprs);
    Ok(LogicalPlan::Project {
        exprs: columns(&agg_output),
        input: Box::new(LogicalPlan::Filter {
            predicate: Expr::Column(having_attr),
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs,
                aggr_exprs: widened,
                input: agg_input,
            }),
        }),
    })
}

// -------------------------
// Type coercion
// -------------------------

/// Insert explicit casts so comparisons, arithmetic, and CASE branches
/// operate over a single type. Operand types that cannot be unified are a
/// hard failure.
pub struct TypeCoercion;

impl AnalyzerRule for TypeCoercion {
    fn name(&self) -> &str {
        "type_coercion"
    }

    fn rewrite(&self, plan: LogicalPlan, _ctx: &AnalyzerContext<'_>) -> Result<LogicalPlan> {
        plan.try_transform_up(&mut |p| {
            if !p.children_resolved() {
                return Ok(p);
            }
            p.try_map_expressions(&mut |e| e.try_transform_up(&mut coerce_expr))
        })
    }
}

fn coerce_expr(expr: Expr) -> Result<Expr> {
    match expr {
        Expr::BinaryOp { left, op, right } if left.resolved() && right.resolved() => {
            let (Some(ldt), Some(rdt)) = (left.data_type(), right.data_type()) else {
                return Ok(Expr::BinaryOp { left, op, right });
            };
            if op.is_comparison() {
                let (cl, cr, _) = coerce_for_compare(*left, ldt, *right, rdt)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(cl),
                    op,
                    right: Box::new(cr),
                })
            } else {
                let (cl, cr, _) = coerce_for_arithmetic(op, *left, ldt, *right, rdt)?;
                Ok(Expr::BinaryOp {
                    left: Box::new(cl),
                    op,
                    right: Box::new(cr),
                })
            }
        }
        Expr::CaseWhen {
            branches,
            else_expr,
        } if branches.iter().all(|(c, v)| c.resolved() && v.resolved())
            && else_expr.as_ref().map(|e| e.resolved()).unwrap_or(true) =>
        {
            coerce_case(branches, else_expr)
        }
        other => Ok(other),
    }
}

fn cast_if_needed(expr: Expr, from: &DataType, to: &DataType) -> Expr {
    if from == to {
        expr
    } else {
        Expr::Cast {
            expr: Box::new(expr),
            to_type: to.clone(),
        }
    }
}

fn coerce_for_compare(
    left: Expr,
    ldt: DataType,
    right: Expr,
    rdt: DataType,
) -> Result<(Expr, Expr, DataType)> {
    // Null literals take the other side's type.
    if ldt == DataType::Null && rdt != DataType::Null {
        return Ok((cast_if_needed(left, &ldt, &rdt), right, rdt));
    }
    if rdt == DataType::Null && ldt != DataType::Null {
        return Ok((left, cast_if_needed(right, &rdt, &ldt), ldt));
    }

    if is_numeric(&ldt) && is_numeric(&rdt) {
        let target = wider_numeric(&ldt, &rdt).ok_or_else(|| {
            FlintError::Planning("failed to determine numeric widening type".to_string())
        })?;
        return Ok((
            cast_if_needed(left, &ldt, &target),
            cast_if_needed(right, &rdt, &target),
            target,
        ));
    }

    if matches!(ldt, DataType::Utf8 | DataType::LargeUtf8)
        && matches!(rdt, DataType::Utf8 | DataType::LargeUtf8)
    {
        let target = if ldt == DataType::LargeUtf8 || rdt == DataType::LargeUtf8 {
            DataType::LargeUtf8
        } else {
            DataType::Utf8
        };
        return Ok((
            cast_if_needed(left, &ldt, &target),
            cast_if_needed(right, &rdt, &target),
            target,
        ));
    }

    if ldt == rdt {
        return Ok((left, right, ldt));
    }

    Err(FlintError::Planning(format!(
        "cannot compare types {ldt} and {rdt}"
    )))
}

fn coerce_for_arithmetic(
    op: BinaryOp,
    left: Expr,
    ldt: DataType,
    right: Expr,
    rdt: DataType,
) -> Result<(Expr, Expr, DataType)> {
    if !is_numeric(&ldt) || !is_numeric(&rdt) {
        return Err(FlintError::Planning(format!(
            "arithmetic requires numeric operands, got {ldt} and {rdt}"
        )));
    }

    // Division always produces a float.
    if op == BinaryOp::Divide {
        let target = DataType::Float64;
        return Ok((
            cast_if_needed(left, &ldt, &target),
            cast_if_needed(right, &rdt, &target),
            target,
        ));
    }

    let target = wider_numeric(&ldt, &rdt)
        .ok_or_else(|| FlintError::Planning("failed numeric widening".to_string()))?;
    Ok((
        cast_if_needed(left, &ldt, &target),
        cast_if_needed(right, &rdt, &target),
        target,
    ))
}

fn coerce_case(branches: Vec<(Expr, Expr)>, else_expr: Option<Box<Expr>>) -> Result<Expr> {
    let mut result_types: Vec<DataType> = vec![];
    for (_, v) in &branches {
        if let Some(dt) = v.data_type() {
            result_types.push(dt);
        }
    }
    if let Some(e) = &else_expr {
        if let Some(dt) = e.data_type() {
            result_types.push(dt);
        }
    }

    let mut target: Option<DataType> = None;
    for dt in &result_types {
        if *dt == DataType::Null {
            continue;
        }
        target = Some(match target {
            None => dt.clone(),
            Some(t) if t == *dt => t,
            Some(t) if is_numeric(&t) && is_numeric(dt) => {
                wider_numeric(&t, dt).ok_or_else(|| {
                    FlintError::Planning(
                        "failed to determine CASE numeric widening type".to_string(),
                    )
                })?
            }
            Some(DataType::Utf8) if *dt == DataType::LargeUtf8 => DataType::LargeUtf8,
            Some(DataType::LargeUtf8) if *dt == DataType::Utf8 => DataType::LargeUtf8,
            Some(t) => {
                return Err(FlintError::Planning(format!(
                    "CASE branch type mismatch: cannot unify {t} and {dt}"
                )));
            }
        });
    }
    let Some(target) = target else {
        return Ok(Expr::CaseWhen {
            branches,
            else_expr,
        });
    };

    let coerced_branches = branches
        .into_iter()
        .map(|(c, v)| {
            let vdt = v.data_type().unwrap_or(DataType::Null);
            (c, cast_if_needed(v, &vdt, &target))
        })
        .collect();
    let coerced_else = else_expr.map(|e| {
        let edt = e.data_type().unwrap_or(DataType::Null);
        Box::new(cast_if_needed(*e, &edt, &target))
    });
    Ok(Expr::CaseWhen {
        branches: coerced_branches,
        else_expr: coerced_else,
    })
}

// -------------------------
// Post-analysis checks
// -------------------------

/// Walk a fully analyzed plan and reject anything the rules could not
/// resolve, with column-level diagnostics.
pub fn check_analysis(plan: &LogicalPlan) -> Result<()> {
    for child in plan.children() {
        check_analysis(child)?;
    }
    if let LogicalPlan::InsertInto { table, .. } = plan {
        check_analysis(table)?;
    }

    match plan {
        LogicalPlan::UnresolvedRelation { name, .. } => {
            return Err(FlintError::Planning(format!(
                "no such table: {}",
                name.join(".")
            )));
        }
        LogicalPlan::With { .. } | LogicalPlan::WithWindowDefinition { .. } => {
            return Err(FlintError::Internal(
                "substitution left a binder node in the plan".to_string(),
            ));
        }
        LogicalPlan::Cube { .. } | LogicalPlan::Rollup { .. } | LogicalPlan::GroupingSets { .. } => {
            return Err(FlintError::Planning(
                "could not lower grouping analytics; check that the grouping \
                 expressions are resolvable"
                    .to_string(),
            ));
        }
        _ => {}
    }

    let input_attrs: Vec<Attribute> = plan.children().iter().flat_map(|c| c.output()).collect();
    for expr in plan.expressions() {
        check_expression(expr, &input_attrs)?;
    }

    // Every referenced attribute must come from a child.
    if !plan.children().is_empty() {
        let allowed = AttributeSet::from_attributes(input_attrs.iter());
        for expr in plan.expressions() {
            for attr in expr.column_refs() {
                if !allowed.contains(attr) {
                    return Err(FlintError::Planning(format!(
                        "resolved attribute '{attr}' missing from input columns [{}]",
                        attribute_names(&input_attrs)
                    )));
                }
            }
        }
    }

    match plan {
        LogicalPlan::Filter { predicate, .. } => {
            if predicate.data_type() != Some(DataType::Boolean) {
                return Err(FlintError::Planning(format!(
                    "filter predicate must be boolean, got {}",
                    predicate
                        .data_type()
                        .map(|d| d.to_string())
                        .unwrap_or_else(|| "unknown".to_string())
                )));
            }
        }
        LogicalPlan::Join {
            condition: Some(condition),
            ..
        } => {
            if condition.data_type() != Some(DataType::Boolean) {
                return Err(FlintError::Planning(
                    "join condition must be boolean".to_string(),
                ));
            }
        }
        LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            ..
        } => {
            for e in aggr_exprs {
                check_aggregate_expression(e, group_exprs)?;
            }
        }
        LogicalPlan::Window {
            window_exprs, spec, ..
        } => {
            for e in window_exprs {
                let mut specs: Vec<&crate::expr::WindowSpec> = vec![];
                collect_window_specs(e, &mut specs);
                if specs.iter().any(|s| *s != spec) {
                    return Err(FlintError::Internal(
                        "window operator groups expressions with mismatched specs".to_string(),
                    ));
                }
            }
        }
        LogicalPlan::InsertInto { table, input } => {
            let target = table.output();
            let source = input.output();
            if target.len() != source.len() {
                return Err(FlintError::Planning(format!(
                    "INSERT column count mismatch: target has {}, query produces {}",
                    target.len(),
                    source.len()
                )));
            }
            for (i, (src, dst)) in source.iter().zip(target.iter()).enumerate() {
                let compatible = src.data_type == dst.data_type
                    || wider_numeric(&src.data_type, &dst.data_type).is_some();
                if !compatible {
                    return Err(FlintError::Planning(format!(
                        "INSERT type mismatch at column {i}: target '{}' is {}, query produces {}",
                        dst.name, dst.data_type, src.data_type
                    )));
                }
            }
        }
        LogicalPlan::Generate {
            generator, output, ..
        } => {
            let element_types = generator.generator_element_types().ok_or_else(|| {
                FlintError::Planning(format!(
                    "generator {generator} requires an array argument"
                ))
            })?;
            if element_types.len() != output.len() {
                return Err(FlintError::Internal(format!(
                    "generator produces {} columns but the plan declares {}",
                    element_types.len(),
                    output.len()
                )));
            }
            for ((dt, _), attr) in element_types.iter().zip(output.iter()) {
                if *dt != attr.data_type {
                    return Err(FlintError::Internal(format!(
                        "generator column type {dt} does not match declared {}",
                        attr.data_type
                    )));
                }
            }
        }
        _ => {}
    }

    Ok(())
}

fn check_expression(expr: &Expr, input_attrs: &[Attribute]) -> Result<()> {
    match expr {
        Expr::UnresolvedColumn { name_parts } => {
            return Err(FlintError::Planning(format!(
                "cannot resolve '{}' given input columns [{}]",
                name_parts.join("."),
                attribute_names(input_attrs)
            )));
        }
        Expr::UnresolvedFunction { name, .. } => {
            return Err(FlintError::Planning(format!("undefined function: {name}")));
        }
        Expr::Star { qualifier } => {
            return Err(FlintError::Planning(format!(
                "invalid usage of '{}' in this context",
                match qualifier {
                    Some(q) => format!("{q}.*"),
                    None => "*".to_string(),
                }
            )));
        }
        Expr::UnresolvedAlias(inner) => {
            // The unresolved expression underneath is the actionable
            // diagnostic; only a fully resolved orphan blames the alias.
            check_expression(inner, input_attrs)?;
            return Err(FlintError::Planning(format!(
                "expression '{inner}' was not assigned a name"
            )));
        }
        Expr::UnresolvedExtract { expr, field } => {
            return Err(FlintError::Planning(format!(
                "cannot extract field '{field}' from unresolved expression '{expr}'"
            )));
        }
        Expr::UnresolvedWindow { spec_name, .. } => {
            return Err(FlintError::Planning(format!(
                "window specification {spec_name} is not defined"
            )));
        }
        Expr::MultiAlias { expr, .. } => {
            return Err(FlintError::Planning(format!(
                "multi-part alias over '{expr}' was not expanded"
            )));
        }
        _ => {}
    }
    for child in expr.children() {
        check_expression(child, input_attrs)?;
    }
    Ok(())
}

/// Every aggregate output expression must either be an aggregate computation
/// or be derived from the grouping expressions.
fn check_aggregate_expression(expr: &Expr, group_exprs: &[Expr]) -> Result<()> {
    if matches!(expr, Expr::AggregateFunction { .. }) {
        return Ok(());
    }
    if group_exprs.iter().any(|g| g.semantically_equal(expr)) {
        return Ok(());
    }
    if let Expr::Column(attr) = expr {
        return Err(FlintError::Planning(format!(
            "expression '{attr}' is neither present in the group by, nor is it an \
             aggregate function; add it to the group by or wrap it in an aggregate"
        )));
    }
    let children = expr.children();
    if children.is_empty() {
        return Ok(());
    }
    for child in children {
        check_aggregate_expression(child, group_exprs)?;
    }
    Ok(())
}

fn collect_window_specs<'a>(expr: &'a Expr, out: &mut Vec<&'a crate::expr::WindowSpec>) {
    if let Expr::Window { spec, .. } = expr {
        out.push(spec);
    }
    for c in expr.children() {
        collect_window_specs(c, out);
    }
}

fn attribute_names(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Fields, Schema};
    use flint_common::AnalyzerConfig;

    use super::*;
    use crate::expr::{Literal, WindowSpec};
    use crate::logical_plan::JoinType;

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
            "people",
            Arc::new(Schema::new(vec![
                Field::new("name", DataType::Utf8, false),
                Field::new(
                    "addr",
                    DataType::Struct(Fields::from(vec![
                        Field::new("city", DataType::Utf8, true),
                        Field::new("zip", DataType::Int32, true),
                    ])),
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

    fn lit(v: i64) -> Expr {
        Expr::Literal(Literal::Int64(v))
    }

    fn star_select(input: LogicalPlan) -> LogicalPlan {
        LogicalPlan::Project {
            exprs: vec![ualias(Expr::Star { qualifier: None })],
            input: Box::new(input),
        }
    }

    #[test]
    fn select_star_resolves_full_schema_in_order() {
        let analyzed = analyzer().analyze(star_select(table("r"))).expect("analyze");
        assert!(analyzed.resolved());
        let out = analyzed.output();
        let names: Vec<&str> = out.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "x"]);
        assert_eq!(out[0].data_type, DataType::Int64);
        assert_eq!(out[1].data_type, DataType::Utf8);
        assert!(!out[0].nullable);
        assert!(out[1].nullable);
    }

    #[test]
    fn analyze_is_idempotent() {
        let analyzed = analyzer().analyze(star_select(table("r"))).expect("analyze");
        let again = analyzer().analyze(analyzed.clone()).expect("re-analyze");
        assert_eq!(analyzed, again);
    }

    #[test]
    fn unknown_table_is_fatal() {
        let err = analyzer()
            .analyze(star_select(table("missing")))
            .expect_err("must fail");
        assert!(err.to_string().contains("no such table: missing"), "err={err}");
    }

    #[test]
    fn unknown_column_reports_input_columns() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::col("nope"))],
            input: Box::new(table("r")),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("cannot resolve 'nope'"), "err={msg}");
        assert!(msg.contains("r.a"), "err={msg}");
    }

    #[test]
    fn table_alias_qualifies_output() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::qualified_col("q", "a"))],
            input: Box::new(LogicalPlan::UnresolvedRelation {
                name: vec!["r".to_string()],
                alias: Some("q".to_string()),
            }),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let out = analyzed.output();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
    }

    #[test]
    fn cte_shadows_catalog_table_with_same_name() {
        let cte_body = LogicalPlan::Project {
            exprs: vec![ualias(Expr::col("a"))],
            input: Box::new(table("r")),
        };
        let plan = LogicalPlan::With {
            input: Box::new(star_select(table("r"))),
            ctes: vec![("r".to_string(), cte_body)],
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let out = analyzed.output();
        assert_eq!(out.len(), 1, "CTE must shadow the catalog table");
        assert_eq!(out[0].name, "a");
    }

    #[test]
    fn having_predicate_is_lifted_into_the_aggregate() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::BinaryOp {
                left: Box::new(call("sum", vec![Expr::col("x")])),
                op: BinaryOp::Gt,
                right: Box::new(lit(10)),
            },
            input: Box::new(LogicalPlan::Project {
                exprs: vec![ualias(call("sum", vec![Expr::col("x")]))],
                input: Box::new(table("r")),
            }),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let LogicalPlan::Project { exprs, input } = analyzed else {
            panic!("expected projection on top");
        };
        assert_eq!(exprs.len(), 1, "schema must stay one column wide");
        let LogicalPlan::Filter { predicate, input } = *input else {
            panic!("expected filter under the projection");
        };
        let Expr::Column(attr) = predicate else {
            panic!("filter must reference the lifted condition");
        };
        assert_eq!(attr.name, HAVING_CONDITION_NAME);
        let LogicalPlan::Aggregate {
            group_exprs,
            aggr_exprs,
            ..
        } = *input
        else {
            panic!("expected aggregate under the filter");
        };
        assert!(group_exprs.is_empty());
        assert_eq!(aggr_exprs.len(), 2);
        assert!(
            matches!(&aggr_exprs[0], Expr::Alias { name, .. } if name == HAVING_CONDITION_NAME)
        );
    }

    #[test]
    fn having_on_ungrouped_column_is_rejected() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::BinaryOp {
                left: Box::new(Expr::col("b")),
                op: BinaryOp::Eq,
                right: Box::new(Expr::Literal(Literal::Utf8("z".to_string()))),
            },
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs: vec![Expr::col("a")],
                aggr_exprs: vec![ualias(call("sum", vec![Expr::col("x")]))],
                input: Box::new(table("r")),
            }),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(
            err.to_string().contains("neither present in the group by"),
            "err={err}"
        );
    }

    #[test]
    fn order_by_column_missing_from_select_is_projected_away() {
        let plan = LogicalPlan::Sort {
            order: vec![SortOrder::asc(Expr::col("b"))],
            input: Box::new(LogicalPlan::Project {
                exprs: vec![ualias(Expr::col("a"))],
                input: Box::new(table("r")),
            }),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let out = analyzed.output();
        assert_eq!(out.len(), 1, "advertised schema is unchanged");
        assert_eq!(out[0].name, "a");
        let LogicalPlan::Project { input, .. } = analyzed else {
            panic!("expected restoring projection on top");
        };
        let LogicalPlan::Sort { order, input } = *input else {
            panic!("expected sort under the projection");
        };
        assert!(order[0].resolved());
        let LogicalPlan::Project { exprs, .. } = *input else {
            panic!("expected widened projection under the sort");
        };
        assert_eq!(exprs.len(), 2, "sort column must be added below");
    }

    #[test]
    fn order_by_aggregate_is_lifted_as_agg_ordering() {
        let plan = LogicalPlan::Sort {
            order: vec![SortOrder::desc(call("sum", vec![Expr::col("x")]))],
            input: Box::new(LogicalPlan::Aggregate {
                group_exprs: vec![Expr::col("a")],
                aggr_exprs: vec![ualias(Expr::col("a"))],
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
            matches!(&order[0].expr, Expr::Column(attr) if attr.name == AGG_ORDERING_NAME)
        );
        let LogicalPlan::Aggregate { aggr_exprs, .. } = *input else {
            panic!("expected aggregate under the sort");
        };
        assert_eq!(aggr_exprs.len(), 2);
        assert!(
            matches!(&aggr_exprs[1], Expr::Alias { name, .. } if name == AGG_ORDERING_NAME)
        );
    }

    #[test]
    fn self_join_gets_fresh_ids_on_the_right() {
        let relation = test_catalog()
            .lookup_relation(&["r".to_string()], None)
            .expect("lookup");
        let plan = star_select(LogicalPlan::Join {
            left: Box::new(relation.clone()),
            right: Box::new(relation),
            join_type: JoinType::Inner,
            condition: None,
        });
        let analyzed = analyzer().analyze(plan).expect("analyze");

        let out = analyzed.output();
        assert_eq!(out.len(), 6, "join output is twice the schema width");
        let mut ids: Vec<_> = out.iter().map(|a| a.id).collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        assert_eq!(ids.len(), 6, "no id collisions across join sides");

        let LogicalPlan::Project { input, .. } = analyzed else {
            panic!("expected projection on top");
        };
        let LogicalPlan::Join { left, right, .. } = *input else {
            panic!("expected join under the projection");
        };
        let left_set = AttributeSet::from_attributes(&left.output());
        assert!(
            !right.output().iter().any(|a| left_set.contains(a)),
            "join sides must not share ids"
        );
    }

    #[test]
    fn avg_distinct_is_rejected() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::UnresolvedFunction {
                name: "avg".to_string(),
                args: vec![Expr::col("x")],
                distinct: true,
            })],
            input: Box::new(table("r")),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(
            err.to_string().contains("does not support DISTINCT"),
            "err={err}"
        );
    }

    #[test]
    fn min_distinct_is_silently_dropped() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::UnresolvedFunction {
                name: "min".to_string(),
                args: vec![Expr::col("x")],
                distinct: true,
            })],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let mut found = false;
        analyzed.transform_up(&mut |p| {
            for e in p.expressions() {
                if e.exists(&|e2| {
                    matches!(
                        e2,
                        Expr::AggregateFunction {
                            func: AggregateFunc::Min,
                            distinct: false,
                            ..
                        }
                    )
                }) {
                    found = true;
                }
            }
            p
        });
        assert!(found, "MIN must survive with DISTINCT dropped");
    }

    #[test]
    fn sum_distinct_is_preserved() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::UnresolvedFunction {
                name: "sum".to_string(),
                args: vec![Expr::col("x")],
                distinct: true,
            })],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let LogicalPlan::Aggregate { aggr_exprs, .. } = analyzed else {
            panic!("global aggregate expected");
        };
        assert!(aggr_exprs[0].exists(&|e| matches!(
            e,
            Expr::AggregateFunction { distinct: true, .. }
        )));
    }

    #[test]
    fn comparison_widens_numeric_operands_with_casts() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::BinaryOp {
                left: Box::new(Expr::col("x")),
                op: BinaryOp::Gt,
                right: Box::new(Expr::Literal(Literal::Float64(1.5))),
            },
            input: Box::new(table("r")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let LogicalPlan::Filter { predicate, .. } = analyzed else {
            panic!("expected filter");
        };
        assert!(
            predicate.exists(&|e| matches!(
                e,
                Expr::Cast {
                    to_type: DataType::Float64,
                    ..
                }
            )),
            "int column must be cast to the float side"
        );
    }

    #[test]
    fn incomparable_types_are_a_hard_failure() {
        let plan = LogicalPlan::Filter {
            predicate: Expr::BinaryOp {
                left: Box::new(Expr::col("b")),
                op: BinaryOp::Gt,
                right: Box::new(lit(10)),
            },
            input: Box::new(table("r")),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(err.to_string().contains("cannot compare types"), "err={err}");
    }

    #[test]
    fn struct_field_access_takes_the_field_name() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::UnresolvedColumn {
                name_parts: vec!["addr".to_string(), "city".to_string()],
            })],
            input: Box::new(table("people")),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let out = analyzed.output();
        assert_eq!(out[0].name, "city");
        assert_eq!(out[0].data_type, DataType::Utf8);
    }

    #[test]
    fn case_sensitive_analysis_rejects_wrong_case() {
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::col("A"))],
            input: Box::new(table("r")),
        };
        let strict = Analyzer::new(
            test_catalog(),
            Arc::new(BuiltinFunctionRegistry::new()),
            AnalyzerConfig {
                case_sensitive_analysis: true,
                ..AnalyzerConfig::default()
            },
        );
        let err = strict.analyze(plan.clone()).expect_err("must fail");
        assert!(err.to_string().contains("cannot resolve 'A'"), "err={err}");
        analyzer().analyze(plan).expect("case-insensitive default binds");
    }

    #[test]
    fn registered_scalar_udf_resolves_with_its_return_type() {
        let registry = Arc::new(BuiltinFunctionRegistry::new());
        assert!(!registry.register_scalar_udf(
            "embed",
            Arc::new(|arg_types: &[DataType]| {
                if arg_types.len() == 1 {
                    Ok(DataType::Float64)
                } else {
                    Err(FlintError::Planning("embed takes one argument".to_string()))
                }
            }),
        ));
        let analyzer = Analyzer::new(test_catalog(), registry.clone(), AnalyzerConfig::default());
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(call("embed", vec![Expr::col("b")]))],
            input: Box::new(table("r")),
        };
        let analyzed = analyzer.analyze(plan.clone()).expect("analyze");
        assert_eq!(analyzed.output()[0].data_type, DataType::Float64);

        assert!(registry.deregister_scalar_udf("EMBED"));
        let err = analyzer.analyze(plan).expect_err("must fail after removal");
        assert!(err.to_string().contains("undefined function: embed"), "err={err}");
    }

    #[test]
    fn subquery_wrappers_survive_analysis_and_strip_cleanly() {
        let inner = star_select(table("r"));
        let plan = LogicalPlan::Project {
            exprs: vec![ualias(Expr::col("a")), ualias(Expr::col("b"))],
            input: Box::new(LogicalPlan::Subquery {
                alias: "q".to_string(),
                input: Box::new(inner),
            }),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        let names: Vec<String> = analyzed.output().iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, ["a", "b"]);

        let stripped = eliminate_subqueries(analyzed);
        let mut saw_subquery = false;
        stripped.clone().transform_up(&mut |p| {
            if matches!(p, LogicalPlan::Subquery { .. }) {
                saw_subquery = true;
            }
            p
        });
        assert!(!saw_subquery);
        assert_eq!(
            stripped.output().iter().map(|a| a.name.clone()).collect::<Vec<_>>(),
            ["a", "b"]
        );
    }

    #[test]
    fn missing_window_definition_is_fatal() {
        let windowed = Expr::UnresolvedWindow {
            expr: Box::new(call("rank", vec![])),
            spec_name: "w2".to_string(),
        };
        let plan = LogicalPlan::WithWindowDefinition {
            defs: vec![("w".to_string(), crate::expr::WindowSpec::default())],
            input: Box::new(LogicalPlan::Project {
                exprs: vec![ualias(windowed)],
                input: Box::new(table("r")),
            }),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(
            err.to_string()
                .contains("window specification w2 is not defined"),
            "err={err}"
        );
    }

    #[test]
    fn analyzed_plans_round_trip_through_serde() {
        let analyzed = analyzer().analyze(star_select(table("r"))).expect("analyze");
        let encoded = serde_json::to_string(&analyzed).expect("encode");
        let decoded: LogicalPlan = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(analyzed, decoded);
    }

    #[test]
    fn named_window_definition_is_substituted() {
        let spec = WindowSpec {
            partition_by: vec![Expr::col("a")],
            order_by: vec![SortOrder::asc(Expr::col("x"))],
            frame: None,
        };
        let plan = LogicalPlan::WithWindowDefinition {
            defs: vec![("w".to_string(), spec)],
            input: Box::new(LogicalPlan::Project {
                exprs: vec![ualias(Expr::UnresolvedWindow {
                    expr: Box::new(call("rank", vec![])),
                    spec_name: "w".to_string(),
                })],
                input: Box::new(table("r")),
            }),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        assert!(analyzed.resolved());
        let mut saw_window = false;
        analyzed.transform_up(&mut |p| {
            if let LogicalPlan::Window { spec, .. } = &p {
                saw_window = true;
                assert_eq!(spec.partition_by.len(), 1);
                assert_eq!(spec.order_by.len(), 1);
            }
            p
        });
        assert!(saw_window, "named spec must become a window operator");
    }

    #[test]
    fn insert_with_compatible_schema_analyzes() {
        let plan = LogicalPlan::InsertInto {
            table: Box::new(table("r")),
            input: Box::new(star_select(table("r"))),
        };
        let analyzed = analyzer().analyze(plan).expect("analyze");
        assert!(analyzed.resolved());
        let LogicalPlan::InsertInto { table, .. } = analyzed else {
            panic!("expected insert");
        };
        assert!(
            matches!(*table, LogicalPlan::Relation { .. }),
            "insert target loses its scoping wrapper"
        );
    }

    #[test]
    fn insert_with_narrower_query_is_rejected() {
        let plan = LogicalPlan::InsertInto {
            table: Box::new(table("r")),
            input: Box::new(LogicalPlan::Project {
                exprs: vec![ualias(Expr::col("a"))],
                input: Box::new(table("r")),
            }),
        };
        let err = analyzer().analyze(plan).expect_err("must fail");
        assert!(
            err.to_string().contains("INSERT column count mismatch"),
            "err={err}"
        );
    }
}
