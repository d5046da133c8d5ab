use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use flint_common::{AnalyzerConfig, FlintError};
use flint_planner::{
    Analyzer, AnalyzerContext, AnalyzerRule, BinaryOp, BuiltinFunctionRegistry, Expr, Literal,
    LogicalPlan, MemoryCatalog,
};

fn analyzer_with(config: AnalyzerConfig) -> Analyzer {
    let catalog = MemoryCatalog::new();
    catalog.register_table(
        "t",
        Arc::new(Schema::new(vec![
            Field::new("x", DataType::Int64, false),
            Field::new("y", DataType::Int64, false),
        ])),
    );
    Analyzer::new(
        Arc::new(catalog),
        Arc::new(BuiltinFunctionRegistry::new()),
        config,
    )
}

struct GtToGte11Rule;

impl AnalyzerRule for GtToGte11Rule {
    fn name(&self) -> &str {
        "test_gt_to_gte_11"
    }

    fn rewrite(
        &self,
        plan: LogicalPlan,
        _ctx: &AnalyzerContext<'_>,
    ) -> flint_common::Result<LogicalPlan> {
        Ok(plan.transform_up(&mut |p| {
            p.map_expressions(&mut |e| {
                e.transform_up(&mut |e2| match e2 {
                    Expr::BinaryOp {
                        left,
                        op: BinaryOp::Gt,
                        right,
                    } if matches!(*right, Expr::Literal(Literal::Int64(10))) => Expr::BinaryOp {
                        left,
                        op: BinaryOp::GtEq,
                        right: Box::new(Expr::Literal(Literal::Int64(11))),
                    },
                    other => other,
                })
            })
        }))
    }
}

#[test]
fn custom_rule_participates_in_the_resolution_batch() {
    let analyzer = analyzer_with(AnalyzerConfig::default());
    analyzer.register_rule(Arc::new(GtToGte11Rule));

    let plan = LogicalPlan::Filter {
        predicate: Expr::BinaryOp {
            left: Box::new(Expr::col("x")),
            op: BinaryOp::Gt,
            right: Box::new(Expr::Literal(Literal::Int64(10))),
        },
        input: Box::new(LogicalPlan::UnresolvedRelation {
            name: vec!["t".to_string()],
            alias: None,
        }),
    };
    let analyzed = analyzer.analyze(plan).expect("analyze");
    let LogicalPlan::Filter { predicate, .. } = analyzed else {
        panic!("expected filter");
    };
    match predicate {
        Expr::BinaryOp { op, right, .. } => {
            assert_eq!(op, BinaryOp::GtEq);
            assert!(matches!(*right, Expr::Literal(Literal::Int64(11))));
        }
        other => panic!("expected rewritten comparison, got {other:?}"),
    }
}

/// A rule that wraps the plan in one more filter on every pass never reaches
/// a fixed point; the executor must fail with its iteration cap instead of
/// spinning.
struct EverGrowingRule;

impl AnalyzerRule for EverGrowingRule {
    fn name(&self) -> &str {
        "test_ever_growing"
    }

    fn rewrite(
        &self,
        plan: LogicalPlan,
        _ctx: &AnalyzerContext<'_>,
    ) -> flint_common::Result<LogicalPlan> {
        Ok(LogicalPlan::Filter {
            predicate: Expr::Literal(Literal::Boolean(true)),
            input: Box::new(plan),
        })
    }
}

#[test]
fn non_converging_batch_hits_the_iteration_cap() {
    let analyzer = analyzer_with(AnalyzerConfig {
        max_rule_iterations: 5,
        ..AnalyzerConfig::default()
    });
    analyzer.register_rule(Arc::new(EverGrowingRule));

    let plan = LogicalPlan::UnresolvedRelation {
        name: vec!["t".to_string()],
        alias: None,
    };
    let err = analyzer.analyze(plan).expect_err("must hit the cap");
    let msg = err.to_string();
    assert!(matches!(err, FlintError::Internal(_)), "err={msg}");
    assert!(
        msg.contains("max iterations (5) reached for batch resolution"),
        "err={msg}"
    );
    assert!(msg.contains("test_ever_growing"), "err={msg}");
}
