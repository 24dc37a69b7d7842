//! Compiled filter expressions.
//!
//! A filter document is compiled once into an [`Expr`] tree, then evaluated
//! against many documents. Top-level logical operators become
//! [`Expr::And`]/[`Expr::Or`]/[`Expr::Nor`] nodes; every other key becomes an
//! [`Expr::Field`] holding the field path and a [`FieldOp`].
//!
//! Trees are consumed through the [`QueryVisitor`] trait. The evaluator in
//! [`crate::evaluator`] implements it to decide matches; other visitors extract
//! equality predicates for upserts or pushdown.

use docwire_core::{
    document::Document,
    path::Path,
    value::Value,
};

use crate::filter::Filter;

/// A compiled regular expression together with its source.
#[derive(Debug, Clone)]
pub struct CompiledRegex {
    pub pattern: String,
    pub options: String,
    pub regex: regex::Regex,
}

/// Which bits test a `$bits*` operator performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitsTest {
    AllClear,
    AllSet,
    AnyClear,
    AnySet,
}

/// One accepted type in a `$type` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMatch {
    /// A concrete BSON type code.
    Code(i32),
    /// Any numeric type.
    Number,
}

/// An operator applied to the values found at a field path.
#[derive(Debug, Clone)]
pub enum FieldOp {
    /// Every operator matches (`{a: {$gt: 1, $lt: 5}}`).
    All(Vec<FieldOp>),
    /// The inner operator does not match the field (`$ne`, `$nin`, `$not`).
    Not(Box<FieldOp>),
    Eq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Matches if any listed value, or regex, matches.
    In(Vec<InItem>),
    Exists(bool),
    Type(Vec<TypeMatch>),
    Regex(CompiledRegex),
    Size(usize),
    /// Every listed value is present.
    AllOf(Vec<InItem>),
    ElemMatch(Box<ElemMatch>),
    Mod { divisor: i64, remainder: i64 },
    Bits { test: BitsTest, positions: Vec<u32> },
}

/// An element of an `$in`, `$nin` or `$all` list.
#[derive(Debug, Clone)]
pub enum InItem {
    Value(Value),
    Regex(CompiledRegex),
}

/// The condition an array element must meet for `$elemMatch`.
#[derive(Debug, Clone)]
pub enum ElemMatch {
    /// Operators applied to the element itself (`{$elemMatch: {$gt: 1}}`).
    Ops(FieldOp),
    /// A filter applied to document elements (`{$elemMatch: {a: 1}}`).
    Filter(Filter),
}

/// A compiled filter expression.
#[derive(Debug, Clone)]
pub enum Expr {
    /// All sub-expressions match. An empty list matches every document.
    And(Vec<Expr>),
    /// Any sub-expression matches.
    Or(Vec<Expr>),
    /// No sub-expression matches.
    Nor(Vec<Expr>),
    /// An operator applied to a field.
    ///
    /// `path` is `None` for keys that are not valid paths (such as `""`);
    /// those never resolve to a value.
    Field { path: Option<Path>, op: FieldOp },
}

impl Expr {
    /// Creates a field expression.
    pub fn field(path: Option<Path>, op: FieldOp) -> Self {
        Expr::Field { path, op }
    }

    /// Combines this expression with another using logical AND.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }
}

/// Walks a compiled [`Expr`] tree.
pub trait QueryVisitor {
    type Output;
    type Error;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_nor(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_field(&mut self, path: Option<&Path>, op: &FieldOp) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Nor(exprs) => self.visit_nor(exprs),
            Expr::Field { path, op } => self.visit_field(path.as_ref(), op),
        }
    }
}

/// Collects the `field == value` predicates that must hold for a match.
///
/// Only predicates reachable through `$and` chains are collected; anything
/// under `$or` or `$nor` does not pin a value. Used to seed upserted documents.
#[derive(Debug, Default)]
pub struct EqualityCollector {
    pub equalities: Vec<(Path, Value)>,
}

impl EqualityCollector {
    pub fn collect(expr: &Expr) -> Self {
        let mut collector = Self::default();
        let _ = collector.visit_expr(expr);
        collector
    }

    /// Builds a document from the collected equalities.
    pub fn into_document(self) -> Document {
        let mut doc = Document::new();
        for (path, value) in self.equalities {
            // Paths blocked by an earlier scalar are skipped.
            let _ = doc.set_by_path(&path, value);
        }
        doc
    }

    fn visit_op(&mut self, path: &Path, op: &FieldOp) {
        match op {
            FieldOp::Eq(Value::Regex(_)) => {}
            FieldOp::Eq(value) => self.equalities.push((path.clone(), value.clone())),
            FieldOp::All(ops) => ops.iter().for_each(|op| self.visit_op(path, op)),
            _ => {}
        }
    }
}

impl QueryVisitor for EqualityCollector {
    type Output = ();
    type Error = std::convert::Infallible;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<(), Self::Error> {
        exprs.iter().try_for_each(|e| self.visit_expr(e))
    }

    fn visit_or(&mut self, _exprs: &[Expr]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_nor(&mut self, _exprs: &[Expr]) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_field(&mut self, path: Option<&Path>, op: &FieldOp) -> Result<(), Self::Error> {
        if let Some(path) = path {
            self.visit_op(path, op);
        }
        Ok(())
    }
}
