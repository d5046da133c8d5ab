use std::collections::HashSet;
use std::fmt;

use arrow_schema::{DataType, Field, Fields};
use flint_common::ExprId;
use serde::{Deserialize, Serialize};

/// Binary operators usable in scalar expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
}

impl BinaryOp {
    /// Whether this operator yields a boolean comparison result.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }
}

/// Literal scalar values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Boolean(bool),
    Null,
}

// Structural equality: floats compare by bit pattern so that fixed-point
// iteration over plans containing float literals terminates deterministically.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a.to_bits() == b.to_bits(),
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Null, Self::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Literal {
    /// Static type of the literal value.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
            Self::Boolean(_) => DataType::Boolean,
            Self::Null => DataType::Null,
        }
    }
}

/// A resolved column reference: name, type, nullability, optional relation
/// qualifier, and a process-unique [`ExprId`].
///
/// Identity is the id: attribute equality across plan nodes compares ids,
/// never names. Two attributes spelled identically in different scopes are
/// different columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub qualifier: Option<String>,
    pub id: ExprId,
}

impl Attribute {
    /// Create an attribute with a fresh id.
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            qualifier: None,
            id: ExprId::fresh(),
        }
    }

    /// Same column under a relation qualifier. Keeps the id: requalification
    /// renames a scope, it does not mint a new column.
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Same name/type/nullability under a fresh id. Used to deconflict a plan
    /// subtree that is reachable twice (self-joins).
    pub fn new_instance(&self) -> Self {
        Self {
            name: self.name.clone(),
            data_type: self.data_type.clone(),
            nullable: self.nullable,
            qualifier: self.qualifier.clone(),
            id: ExprId::fresh(),
        }
    }

    /// Nullable variant of the same attribute.
    pub fn as_nullable(&self) -> Self {
        Self {
            nullable: true,
            ..self.clone()
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.qualifier {
            Some(q) => write!(f, "{q}.{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// A set of attributes keyed by [`ExprId`].
#[derive(Debug, Clone, Default)]
pub struct AttributeSet {
    ids: HashSet<ExprId>,
}

impl AttributeSet {
    pub fn from_attributes<'a>(attrs: impl IntoIterator<Item = &'a Attribute>) -> Self {
        Self {
            ids: attrs.into_iter().map(|a| a.id).collect(),
        }
    }

    pub fn insert(&mut self, attr: &Attribute) {
        self.ids.insert(attr.id);
    }

    pub fn contains(&self, attr: &Attribute) -> bool {
        self.ids.contains(&attr.id)
    }

    pub fn contains_id(&self, id: ExprId) -> bool {
        self.ids.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn intersects(&self, other: &AttributeSet) -> bool {
        self.ids.iter().any(|id| other.ids.contains(id))
    }
}

/// Sort direction of one ordering expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    pub expr: Expr,
    pub direction: SortDirection,
    pub nulls_first: bool,
}

impl SortOrder {
    pub fn asc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Ascending,
            nulls_first: true,
        }
    }

    pub fn desc(expr: Expr) -> Self {
        Self {
            expr,
            direction: SortDirection::Descending,
            nulls_first: false,
        }
    }

    pub fn resolved(&self) -> bool {
        self.expr.resolved()
    }
}

/// Window frame extent units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFrameUnits {
    Rows,
    Range,
}

/// One bound of a window frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

/// Explicit window frame clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFrame {
    pub units: WindowFrameUnits,
    pub start_bound: WindowFrameBound,
    pub end_bound: WindowFrameBound,
}

/// A fully specified window: partitioning, ordering, optional frame.
///
/// Equality is structural over all three parts; window expressions sharing an
/// equal spec are evaluated by one window operator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<SortOrder>,
    pub frame: Option<WindowFrame>,
}

/// Built-in aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateFunc {
    /// SQL spelling, used in diagnostics and explain output.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Avg => "AVG",
        }
    }
}

/// Built-in ranking/offset window functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowFunc {
    RowNumber,
    Rank,
    DenseRank,
    Ntile,
    Lag,
    Lead,
}

impl WindowFunc {
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::RowNumber => "ROW_NUMBER",
            Self::Rank => "RANK",
            Self::DenseRank => "DENSE_RANK",
            Self::Ntile => "NTILE",
            Self::Lag => "LAG",
            Self::Lead => "LEAD",
        }
    }
}

/// Built-in table-generating functions (one input row, many output rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorFunc {
    /// One output column per array element.
    Explode,
    /// Element position plus the element itself.
    PosExplode,
}

impl GeneratorFunc {
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Explode => "EXPLODE",
            Self::PosExplode => "POSEXPLODE",
        }
    }
}

/// Scalar/aggregate/window expression tree.
///
/// The `Unresolved*` variants are produced by the frontend and eliminated by
/// analysis; a resolved expression contains none of them and has a known type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal),
    /// Resolved column reference.
    Column(Attribute),
    /// Column reference by (possibly qualified) name parts, not yet bound.
    UnresolvedColumn {
        name_parts: Vec<String>,
    },
    /// Function call not yet looked up in the registry.
    UnresolvedFunction {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// Output-list entry that still needs a synthesized name.
    UnresolvedAlias(Box<Expr>),
    /// Nested-field access whose child is not yet typed.
    UnresolvedExtract {
        expr: Box<Expr>,
        field: String,
    },
    /// Windowed expression referring to a named WINDOW clause definition.
    UnresolvedWindow {
        expr: Box<Expr>,
        spec_name: String,
    },
    /// `*` or `qualifier.*` in an output list or function argument.
    Star {
        qualifier: Option<String>,
    },
    /// Named expression carrying its own id.
    Alias {
        expr: Box<Expr>,
        name: String,
        id: ExprId,
    },
    /// Names for the multiple columns of a generator.
    MultiAlias {
        expr: Box<Expr>,
        names: Vec<String>,
    },
    Cast {
        expr: Box<Expr>,
        to_type: DataType,
    },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    CaseWhen {
        branches: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// Typed struct-field access.
    GetStructField {
        expr: Box<Expr>,
        field: String,
        field_type: DataType,
        field_nullable: bool,
    },
    /// Field access distributed over an array of structs.
    GetArrayStructFields {
        expr: Box<Expr>,
        field: String,
        field_type: DataType,
        field_nullable: bool,
    },
    CreateArray(Vec<Expr>),
    CreateStruct(Vec<Expr>),
    /// Resolved scalar function with a registry-provided return type.
    ScalarFunction {
        name: String,
        args: Vec<Expr>,
        return_type: DataType,
    },
    /// Resolved aggregate function call.
    AggregateFunction {
        func: AggregateFunc,
        args: Vec<Expr>,
        distinct: bool,
    },
    /// Resolved ranking/offset window function (only valid under `Window`).
    WindowFunction {
        func: WindowFunc,
        args: Vec<Expr>,
    },
    /// A function evaluated over a window spec.
    Window {
        function: Box<Expr>,
        spec: WindowSpec,
    },
    /// Resolved table-generating function call.
    Generator {
        func: GeneratorFunc,
        args: Vec<Expr>,
    },
    /// Uniform random value; the one nondeterministic builtin.
    Rand,
}

impl Expr {
    /// Convenience constructor for an unqualified unresolved column.
    pub fn col(name: impl Into<String>) -> Self {
        Self::UnresolvedColumn {
            name_parts: vec![name.into()],
        }
    }

    /// Convenience constructor for a qualified unresolved column.
    pub fn qualified_col(qualifier: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnresolvedColumn {
            name_parts: vec![qualifier.into(), name.into()],
        }
    }

    /// Wrap in an alias with a fresh id.
    pub fn alias(self, name: impl Into<String>) -> Self {
        Self::Alias {
            expr: Box::new(self),
            name: name.into(),
            id: ExprId::fresh(),
        }
    }

    /// Borrowing view of direct children, including expressions nested in a
    /// window spec.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Literal(_) | Self::Column(_) | Self::UnresolvedColumn { .. } | Self::Star { .. } | Self::Rand => {
                vec![]
            }
            Self::UnresolvedFunction { args, .. }
            | Self::ScalarFunction { args, .. }
            | Self::AggregateFunction { args, .. }
            | Self::WindowFunction { args, .. }
            | Self::Generator { args, .. }
            | Self::CreateArray(args)
            | Self::CreateStruct(args) => args.iter().collect(),
            Self::UnresolvedAlias(e)
            | Self::UnresolvedExtract { expr: e, .. }
            | Self::UnresolvedWindow { expr: e, .. }
            | Self::Alias { expr: e, .. }
            | Self::MultiAlias { expr: e, .. }
            | Self::Cast { expr: e, .. }
            | Self::Not(e)
            | Self::IsNull(e)
            | Self::IsNotNull(e)
            | Self::GetStructField { expr: e, .. }
            | Self::GetArrayStructFields { expr: e, .. } => vec![e.as_ref()],
            Self::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            Self::And(a, b) | Self::Or(a, b) => vec![a.as_ref(), b.as_ref()],
            Self::CaseWhen {
                branches,
                else_expr,
            } => {
                let mut out: Vec<&Expr> = Vec::with_capacity(branches.len() * 2 + 1);
                for (c, v) in branches {
                    out.push(c);
                    out.push(v);
                }
                if let Some(e) = else_expr {
                    out.push(e.as_ref());
                }
                out
            }
            Self::Window { function, spec } => {
                let mut out: Vec<&Expr> = vec![function.as_ref()];
                out.extend(spec.partition_by.iter());
                out.extend(spec.order_by.iter().map(|o| &o.expr));
                out
            }
        }
    }

    /// Rebuild this node with every direct child passed through `f`,
    /// short-circuiting on the first error.
    pub fn try_map_children<E>(
        self,
        f: &mut dyn FnMut(Expr) -> std::result::Result<Expr, E>,
    ) -> std::result::Result<Expr, E> {
        fn map_vec<E>(
            v: Vec<Expr>,
            f: &mut dyn FnMut(Expr) -> std::result::Result<Expr, E>,
        ) -> std::result::Result<Vec<Expr>, E> {
            v.into_iter().map(|e| f(e)).collect()
        }

        Ok(match self {
            leaf @ (Self::Literal(_)
            | Self::Column(_)
            | Self::UnresolvedColumn { .. }
            | Self::Star { .. }
            | Self::Rand) => leaf,
            Self::UnresolvedFunction {
                name,
                args,
                distinct,
            } => Self::UnresolvedFunction {
                name,
                args: map_vec(args, f)?,
                distinct,
            },
            Self::UnresolvedAlias(e) => Self::UnresolvedAlias(Box::new(f(*e)?)),
            Self::UnresolvedExtract { expr, field } => Self::UnresolvedExtract {
                expr: Box::new(f(*expr)?),
                field,
            },
            Self::UnresolvedWindow { expr, spec_name } => Self::UnresolvedWindow {
                expr: Box::new(f(*expr)?),
                spec_name,
            },
            Self::Alias { expr, name, id } => Self::Alias {
                expr: Box::new(f(*expr)?),
                name,
                id,
            },
            Self::MultiAlias { expr, names } => Self::MultiAlias {
                expr: Box::new(f(*expr)?),
                names,
            },
            Self::Cast { expr, to_type } => Self::Cast {
                expr: Box::new(f(*expr)?),
                to_type,
            },
            Self::BinaryOp { left, op, right } => Self::BinaryOp {
                left: Box::new(f(*left)?),
                op,
                right: Box::new(f(*right)?),
            },
            Self::And(a, b) => Self::And(Box::new(f(*a)?), Box::new(f(*b)?)),
            Self::Or(a, b) => Self::Or(Box::new(f(*a)?), Box::new(f(*b)?)),
            Self::Not(e) => Self::Not(Box::new(f(*e)?)),
            Self::IsNull(e) => Self::IsNull(Box::new(f(*e)?)),
            Self::IsNotNull(e) => Self::IsNotNull(Box::new(f(*e)?)),
            Self::CaseWhen {
                branches,
                else_expr,
            } => {
                let mut new_branches = Vec::with_capacity(branches.len());
                for (c, v) in branches {
                    new_branches.push((f(c)?, f(v)?));
                }
                let new_else = match else_expr {
                    Some(e) => Some(Box::new(f(*e)?)),
                    None => None,
                };
                Self::CaseWhen {
                    branches: new_branches,
                    else_expr: new_else,
                }
            }
            Self::GetStructField {
                expr,
                field,
                field_type,
                field_nullable,
            } => Self::GetStructField {
                expr: Box::new(f(*expr)?),
                field,
                field_type,
                field_nullable,
            },
            Self::GetArrayStructFields {
                expr,
                field,
                field_type,
                field_nullable,
            } => Self::GetArrayStructFields {
                expr: Box::new(f(*expr)?),
                field,
                field_type,
                field_nullable,
            },
            Self::CreateArray(args) => Self::CreateArray(map_vec(args, f)?),
            Self::CreateStruct(args) => Self::CreateStruct(map_vec(args, f)?),
            Self::ScalarFunction {
                name,
                args,
                return_type,
            } => Self::ScalarFunction {
                name,
                args: map_vec(args, f)?,
                return_type,
            },
            Self::AggregateFunction {
                func,
                args,
                distinct,
            } => Self::AggregateFunction {
                func,
                args: map_vec(args, f)?,
                distinct,
            },
            Self::WindowFunction { func, args } => Self::WindowFunction {
                func,
                args: map_vec(args, f)?,
            },
            Self::Generator { func, args } => Self::Generator {
                func,
                args: map_vec(args, f)?,
            },
            Self::Window { function, spec } => {
                let function = Box::new(f(*function)?);
                let partition_by = map_vec(spec.partition_by, f)?;
                let mut order_by = Vec::with_capacity(spec.order_by.len());
                for o in spec.order_by {
                    order_by.push(SortOrder {
                        expr: f(o.expr)?,
                        direction: o.direction,
                        nulls_first: o.nulls_first,
                    });
                }
                Self::Window {
                    function,
                    spec: WindowSpec {
                        partition_by,
                        order_by,
                        frame: spec.frame,
                    },
                }
            }
        })
    }

    /// Infallible [`Expr::try_map_children`].
    pub fn map_children(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        enum Never {}
        match self.try_map_children::<Never>(&mut |e| Ok(f(e))) {
            Ok(e) => e,
            Err(never) => match never {},
        }
    }

    /// Rewrite bottom-up: children first, then this node.
    pub fn transform_up(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let rewritten = self.map_children(&mut |c| c.transform_up(f));
        f(rewritten)
    }

    /// Rewrite top-down: this node first, then its (new) children.
    pub fn transform_down(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let rewritten = f(self);
        rewritten.map_children(&mut |c| c.transform_down(f))
    }

    /// Fallible [`Expr::transform_up`].
    pub fn try_transform_up<E>(
        self,
        f: &mut dyn FnMut(Expr) -> std::result::Result<Expr, E>,
    ) -> std::result::Result<Expr, E> {
        let rewritten = self.try_map_children(&mut |c| c.try_transform_up(f))?;
        f(rewritten)
    }

    /// Whether any node in this subtree satisfies `pred`.
    pub fn exists(&self, pred: &dyn Fn(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().iter().any(|c| c.exists(pred))
    }

    /// All resolved column references in this subtree.
    pub fn column_refs(&self) -> Vec<&Attribute> {
        let mut out = vec![];
        self.collect_column_refs(&mut out);
        out
    }

    fn collect_column_refs<'a>(&'a self, out: &mut Vec<&'a Attribute>) {
        if let Self::Column(attr) = self {
            out.push(attr);
        }
        for c in self.children() {
            c.collect_column_refs(out);
        }
    }

    /// True once no unresolved variant remains and the type is derivable.
    pub fn resolved(&self) -> bool {
        match self {
            Self::UnresolvedColumn { .. }
            | Self::UnresolvedFunction { .. }
            | Self::UnresolvedAlias(_)
            | Self::UnresolvedExtract { .. }
            | Self::UnresolvedWindow { .. }
            | Self::Star { .. }
            | Self::MultiAlias { .. } => false,
            _ => self.children().iter().all(|c| c.resolved()),
        }
    }

    /// Output type, when derivable. `None` for unresolved expressions and for
    /// generators (which produce several columns; see
    /// [`Expr::generator_element_types`]).
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Literal(v) => Some(v.data_type()),
            Self::Column(attr) => Some(attr.data_type.clone()),
            Self::Alias { expr, .. } => expr.data_type(),
            Self::Cast { to_type, .. } => Some(to_type.clone()),
            Self::BinaryOp { left, op, right } => {
                if op.is_comparison() {
                    Some(DataType::Boolean)
                } else {
                    // Arithmetic operands are widened to a common type by
                    // coercion, after which either side carries the result type.
                    match (left.data_type(), right.data_type()) {
                        (Some(l), Some(r)) => wider_numeric(&l, &r).or(Some(l)),
                        _ => None,
                    }
                }
            }
            Self::And(_, _) | Self::Or(_, _) | Self::Not(_) | Self::IsNull(_) | Self::IsNotNull(_) => {
                Some(DataType::Boolean)
            }
            Self::CaseWhen {
                branches,
                else_expr,
            } => branches
                .first()
                .and_then(|(_, v)| v.data_type())
                .or_else(|| else_expr.as_ref().and_then(|e| e.data_type())),
            Self::GetStructField { field_type, .. } => Some(field_type.clone()),
            Self::GetArrayStructFields {
                field_type,
                field_nullable,
                ..
            } => Some(DataType::List(
                Field::new("item", field_type.clone(), *field_nullable).into(),
            )),
            Self::CreateArray(args) => args.first().and_then(|e| e.data_type()).map(|dt| {
                DataType::List(Field::new("item", dt, true).into())
            }),
            Self::CreateStruct(args) => {
                let mut fields = Vec::with_capacity(args.len());
                for (i, e) in args.iter().enumerate() {
                    let dt = e.data_type()?;
                    let name = match e {
                        Self::Column(a) => a.name.clone(),
                        Self::Alias { name, .. } => name.clone(),
                        _ => format!("c{i}"),
                    };
                    fields.push(Field::new(name, dt, e.nullable()));
                }
                Some(DataType::Struct(Fields::from(fields)))
            }
            Self::ScalarFunction { return_type, .. } => Some(return_type.clone()),
            Self::AggregateFunction { func, args, .. } => match func {
                AggregateFunc::Count => Some(DataType::Int64),
                AggregateFunc::Avg => Some(DataType::Float64),
                AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max => {
                    args.first().and_then(|e| e.data_type())
                }
            },
            Self::WindowFunction { func, args } => match func {
                WindowFunc::RowNumber | WindowFunc::Rank | WindowFunc::DenseRank | WindowFunc::Ntile => {
                    Some(DataType::Int64)
                }
                WindowFunc::Lag | WindowFunc::Lead => args.first().and_then(|e| e.data_type()),
            },
            Self::Window { function, .. } => function.data_type(),
            Self::Rand => Some(DataType::Float64),
            Self::Generator { .. }
            | Self::UnresolvedColumn { .. }
            | Self::UnresolvedFunction { .. }
            | Self::UnresolvedAlias(_)
            | Self::UnresolvedExtract { .. }
            | Self::UnresolvedWindow { .. }
            | Self::Star { .. }
            | Self::MultiAlias { .. } => None,
        }
    }

    /// Conservative nullability.
    pub fn nullable(&self) -> bool {
        match self {
            Self::Literal(Literal::Null) => true,
            Self::Literal(_) => false,
            Self::Column(attr) => attr.nullable,
            Self::Alias { expr, .. } => expr.nullable(),
            Self::IsNull(_) | Self::IsNotNull(_) => false,
            Self::AggregateFunction {
                func: AggregateFunc::Count,
                ..
            } => false,
            Self::WindowFunction { func, .. } => matches!(func, WindowFunc::Lag | WindowFunc::Lead),
            Self::Rand => false,
            _ => true,
        }
    }

    /// Whether evaluation is repeatable for identical inputs.
    pub fn deterministic(&self) -> bool {
        !self.exists(&|e| matches!(e, Self::Rand))
    }

    /// Whether the expression reduces to a constant.
    pub fn foldable(&self) -> bool {
        match self {
            Self::Literal(_) => true,
            Self::Cast { expr, .. } | Self::Alias { expr, .. } | Self::Not(expr) => expr.foldable(),
            Self::BinaryOp { left, right, .. } => left.foldable() && right.foldable(),
            Self::And(a, b) | Self::Or(a, b) => a.foldable() && b.foldable(),
            _ => false,
        }
    }

    /// Whether an aggregate function call appears anywhere in this subtree
    /// outside of window expressions.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Self::AggregateFunction { .. } => true,
            // Aggregates inside a window spec are evaluated by the window
            // operator, not by an Aggregate node.
            Self::Window { .. } => false,
            _ => self.children().iter().any(|c| c.contains_aggregate()),
        }
    }

    /// Whether a windowed expression appears anywhere in this subtree.
    pub fn contains_window(&self) -> bool {
        self.exists(&|e| matches!(e, Self::Window { .. }))
    }

    /// Whether this is a name-carrying output expression.
    pub fn is_named(&self) -> bool {
        matches!(
            self,
            Self::Column(_) | Self::Alias { .. } | Self::MultiAlias { .. } | Self::Star { .. }
        )
    }

    /// The attribute this named expression exposes to parent operators.
    pub fn to_attribute(&self) -> Option<Attribute> {
        match self {
            Self::Column(attr) => Some(attr.clone()),
            Self::Alias { expr, name, id } => Some(Attribute {
                name: name.clone(),
                data_type: expr.data_type().unwrap_or(DataType::Null),
                nullable: expr.nullable(),
                qualifier: None,
                id: *id,
            }),
            _ => None,
        }
    }

    /// Per-column output types of a generator call, when derivable from the
    /// argument types.
    pub fn generator_element_types(&self) -> Option<Vec<(DataType, bool)>> {
        let Self::Generator { func, args } = self else {
            return None;
        };
        let arg_type = args.first()?.data_type()?;
        let DataType::List(field) = arg_type else {
            return None;
        };
        let elem = (field.data_type().clone(), true);
        match func {
            GeneratorFunc::Explode => Some(vec![elem]),
            GeneratorFunc::PosExplode => Some(vec![(DataType::Int32, false), elem]),
        }
    }

    /// Equality modulo [`ExprId`]s and qualifiers.
    pub fn semantically_equal(&self, other: &Expr) -> bool {
        self.clone().canonicalized() == other.clone().canonicalized()
    }

    fn canonicalized(self) -> Expr {
        self.transform_up(&mut |e| match e {
            Self::Column(attr) => Self::Column(Attribute {
                qualifier: None,
                id: ExprId::PLACEHOLDER,
                ..attr
            }),
            Self::Alias { expr, name, .. } => Self::Alias {
                expr,
                name,
                id: ExprId::PLACEHOLDER,
            },
            other => other,
        })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(Literal::Int64(v)) => write!(f, "{v}"),
            Self::Literal(Literal::Float64(v)) => write!(f, "{v}"),
            Self::Literal(Literal::Utf8(v)) => write!(f, "'{v}'"),
            Self::Literal(Literal::Boolean(v)) => write!(f, "{v}"),
            Self::Literal(Literal::Null) => write!(f, "NULL"),
            Self::Column(attr) => write!(f, "{attr}"),
            Self::UnresolvedColumn { name_parts } => write!(f, "'{}", name_parts.join(".")),
            Self::UnresolvedFunction {
                name,
                args,
                distinct,
            } => write!(
                f,
                "'{name}({}{})",
                if *distinct { "DISTINCT " } else { "" },
                join_exprs(args)
            ),
            Self::UnresolvedAlias(e) => write!(f, "{e}"),
            Self::UnresolvedExtract { expr, field } => write!(f, "{expr}['{field}']"),
            Self::UnresolvedWindow { expr, spec_name } => write!(f, "{expr} OVER {spec_name}"),
            Self::Star { qualifier: Some(q) } => write!(f, "{q}.*"),
            Self::Star { qualifier: None } => write!(f, "*"),
            Self::Alias { expr, name, .. } => write!(f, "{expr} AS {name}"),
            Self::MultiAlias { expr, names } => write!(f, "{expr} AS ({})", names.join(", ")),
            Self::Cast { expr, to_type } => write!(f, "CAST({expr} AS {to_type})"),
            Self::BinaryOp { left, op, right } => {
                let sym = match op {
                    BinaryOp::Eq => "=",
                    BinaryOp::NotEq => "<>",
                    BinaryOp::Lt => "<",
                    BinaryOp::LtEq => "<=",
                    BinaryOp::Gt => ">",
                    BinaryOp::GtEq => ">=",
                    BinaryOp::Plus => "+",
                    BinaryOp::Minus => "-",
                    BinaryOp::Multiply => "*",
                    BinaryOp::Divide => "/",
                };
                write!(f, "({left} {sym} {right})")
            }
            Self::And(a, b) => write!(f, "({a} AND {b})"),
            Self::Or(a, b) => write!(f, "({a} OR {b})"),
            Self::Not(e) => write!(f, "(NOT {e})"),
            Self::IsNull(e) => write!(f, "({e} IS NULL)"),
            Self::IsNotNull(e) => write!(f, "({e} IS NOT NULL)"),
            Self::CaseWhen {
                branches,
                else_expr,
            } => {
                write!(f, "CASE")?;
                for (c, v) in branches {
                    write!(f, " WHEN {c} THEN {v}")?;
                }
                if let Some(e) = else_expr {
                    write!(f, " ELSE {e}")?;
                }
                write!(f, " END")
            }
            Self::GetStructField { expr, field, .. } => write!(f, "{expr}.{field}"),
            Self::GetArrayStructFields { expr, field, .. } => write!(f, "{expr}.{field}"),
            Self::CreateArray(args) => write!(f, "ARRAY({})", join_exprs(args)),
            Self::CreateStruct(args) => write!(f, "STRUCT({})", join_exprs(args)),
            Self::ScalarFunction { name, args, .. } => {
                write!(f, "{}({})", name.to_uppercase(), join_exprs(args))
            }
            Self::AggregateFunction {
                func,
                args,
                distinct,
            } => write!(
                f,
                "{}({}{})",
                func.sql_name(),
                if *distinct { "DISTINCT " } else { "" },
                join_exprs(args)
            ),
            Self::WindowFunction { func, args } => {
                write!(f, "{}({})", func.sql_name(), join_exprs(args))
            }
            Self::Window { function, spec } => {
                let part = join_exprs(&spec.partition_by);
                let ord = spec
                    .order_by
                    .iter()
                    .map(|o| {
                        format!(
                            "{} {}",
                            o.expr,
                            match o.direction {
                                SortDirection::Ascending => "ASC",
                                SortDirection::Descending => "DESC",
                            }
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "{function} OVER (PARTITION BY [{part}] ORDER BY [{ord}])")
            }
            Self::Generator { func, args } => {
                write!(f, "{}({})", func.sql_name(), join_exprs(args))
            }
            Self::Rand => write!(f, "RAND()"),
        }
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Numeric widening rank shared by coercion and arithmetic typing.
fn numeric_rank(dt: &DataType) -> Option<u8> {
    Some(match dt {
        DataType::Int8 | DataType::UInt8 => 1,
        DataType::Int16 | DataType::UInt16 => 2,
        DataType::Int32 | DataType::UInt32 => 3,
        DataType::Int64 | DataType::UInt64 => 4,
        DataType::Float32 => 5,
        DataType::Float64 => 6,
        _ => return None,
    })
}

/// Whether `dt` participates in numeric widening.
pub fn is_numeric(dt: &DataType) -> bool {
    numeric_rank(dt).is_some()
}

/// The wider of two numeric types, when both are numeric.
pub fn wider_numeric(a: &DataType, b: &DataType) -> Option<DataType> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    Some(if ra >= rb { a.clone() } else { b.clone() })
}
