//! Filter compilation.
//!
//! A filter document is compiled once into an [`Expr`] tree and wrapped in a
//! [`Filter`]. Field operators (`$gt`, `$in`, `$elemMatch`, ...) are looked up
//! in a [`FilterOperators`] registry; each entry parses its argument into a
//! [`FieldOp`]. Parsing fails early with a client-facing error, so evaluation
//! itself never fails.
//!
//! # Example
//!
//! ```ignore
//! use docwire_query::filter::{Filter, default_operators};
//!
//! let ops = default_operators()?;
//! let filter = Filter::compile(&query, &ops)?;
//! assert!(filter.matches(&doc));
//! ```

use docwire_core::{
    document::Document,
    error::{DocWireError, DocWireResult, ErrorCode},
    format::format_value,
    path::Path,
    value::Value,
};

use crate::{
    evaluator::DocumentEvaluator,
    expr::{BitsTest, CompiledRegex, ElemMatch, Expr, FieldOp, InItem, QueryVisitor, TypeMatch},
    registry::OperatorRegistry,
};

/// The operator being parsed, with its surrounding context.
#[derive(Debug, Clone, Copy)]
pub struct OpInput<'a> {
    /// The field the operator applies to.
    pub field: &'a str,
    /// The operator name, e.g. `$gt`.
    pub name: &'a str,
    /// The operator argument.
    pub arg: &'a Value,
    /// The whole operator document, for operators that read their siblings.
    pub siblings: &'a Document,
}

/// Parses one field operator. `Ok(None)` means the operator only modifies a
/// sibling (as `$options` does for `$regex`).
pub type FieldOpParser = fn(&FilterParser<'_>, &OpInput<'_>) -> DocWireResult<Option<FieldOp>>;

/// The registry of field operators.
pub type FilterOperators = OperatorRegistry<FieldOpParser>;

/// Builds the registry with every supported field operator.
///
/// # Errors
///
/// Returns an internal error if an operator name is registered twice.
pub fn default_operators() -> DocWireResult<FilterOperators> {
    let mut ops = FilterOperators::new("filter");
    ops.register("$eq", parse_eq)?;
    ops.register("$ne", parse_ne)?;
    ops.register("$gt", parse_gt)?;
    ops.register("$gte", parse_gte)?;
    ops.register("$lt", parse_lt)?;
    ops.register("$lte", parse_lte)?;
    ops.register("$in", parse_in)?;
    ops.register("$nin", parse_nin)?;
    ops.register("$not", parse_not)?;
    ops.register("$exists", parse_exists)?;
    ops.register("$type", parse_type)?;
    ops.register("$regex", parse_regex)?;
    ops.register("$options", parse_options)?;
    ops.register("$size", parse_size)?;
    ops.register("$all", parse_all)?;
    ops.register("$elemMatch", parse_elem_match)?;
    ops.register("$mod", parse_mod)?;
    ops.register("$bitsAllClear", parse_bits_all_clear)?;
    ops.register("$bitsAllSet", parse_bits_all_set)?;
    ops.register("$bitsAnyClear", parse_bits_any_clear)?;
    ops.register("$bitsAnySet", parse_bits_any_set)?;
    Ok(ops)
}

/// A compiled filter.
#[derive(Debug, Clone)]
pub struct Filter {
    expr: Expr,
}

impl Filter {
    /// Compiles a filter document.
    ///
    /// # Arguments
    ///
    /// * `filter` - The filter document, e.g. `{a: {$gt: 1}, $or: [...]}`
    /// * `ops` - The field operator registry
    ///
    /// # Errors
    ///
    /// Returns `BadValue` for malformed or unknown operators, `TypeMismatch` or
    /// regex errors for invalid arguments, and `NotImplemented` for `$expr`,
    /// `$where` and `$text`.
    pub fn compile(filter: &Document, ops: &FilterOperators) -> DocWireResult<Self> {
        let expr = FilterParser { ops }.parse_document(filter)?;
        Ok(Self { expr })
    }

    /// A filter that matches every document.
    pub fn match_all() -> Self {
        Self { expr: Expr::And(Vec::new()) }
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Returns true if the filter has no predicates.
    pub fn is_empty(&self) -> bool {
        matches!(&self.expr, Expr::And(list) if list.is_empty())
    }

    /// Evaluates the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match DocumentEvaluator::new(doc).visit_expr(&self.expr) {
            Ok(matched) => matched,
            Err(never) => match never {},
        }
    }
}

/// Turns filter documents into expressions using a field operator registry.
#[derive(Debug, Clone, Copy)]
pub struct FilterParser<'a> {
    ops: &'a FilterOperators,
}

impl<'a> FilterParser<'a> {
    pub fn new(ops: &'a FilterOperators) -> Self {
        Self { ops }
    }

    /// Parses a whole filter document into an AND of its keys.
    pub fn parse_document(&self, filter: &Document) -> DocWireResult<Expr> {
        let mut exprs = Vec::with_capacity(filter.len());

        for (key, value) in filter.iter() {
            if key.starts_with('$') {
                match key {
                    "$and" => exprs.push(Expr::And(self.parse_logical(key, value)?)),
                    "$or" => exprs.push(Expr::Or(self.parse_logical(key, value)?)),
                    "$nor" => exprs.push(Expr::Nor(self.parse_logical(key, value)?)),
                    "$comment" => {}
                    "$expr" | "$where" | "$text" | "$jsonSchema" => {
                        return Err(DocWireError::NotImplemented(format!("{key} is not supported")));
                    }
                    _ => {
                        return Err(DocWireError::bad_value(format!(
                            "unknown top level operator: {key}. If you have a field name that starts with a '$' symbol, consider using $getField or $setField."
                        )));
                    }
                }
                continue;
            }

            exprs.push(Expr::field(Path::parse(key).ok(), self.parse_field(key, value)?));
        }

        Ok(Expr::And(exprs))
    }

    fn parse_logical(&self, key: &str, value: &Value) -> DocWireResult<Vec<Expr>> {
        let list = value
            .as_array()
            .ok_or_else(|| DocWireError::bad_value(format!("{key} must be an array")))?;

        if list.is_empty() {
            return Err(DocWireError::bad_value("$and/$or/$nor must be a nonempty array"));
        }

        list.iter()
            .map(|entry| match entry {
                Value::Document(doc) => self.parse_document(doc),
                _ => Err(DocWireError::bad_value("$or/$and/$nor entries need to be full objects")),
            })
            .collect()
    }

    /// Parses the value of a field key: a regex, an operator document or a
    /// literal to compare against.
    pub fn parse_field(&self, field: &str, value: &Value) -> DocWireResult<FieldOp> {
        match value {
            Value::Regex(re) => Ok(FieldOp::Regex(compile_regex(&re.pattern, &re.options)?)),
            Value::Document(doc) if doc.first_key().is_some_and(|k| k.starts_with('$')) => {
                self.parse_operators(field, doc)
            }
            _ => Ok(FieldOp::Eq(value.clone())),
        }
    }

    /// Parses a document of field operators. Several operators are ANDed.
    pub fn parse_operators(&self, field: &str, doc: &Document) -> DocWireResult<FieldOp> {
        let mut ops = Vec::with_capacity(doc.len());

        for (name, arg) in doc.iter() {
            let parser = self
                .ops
                .get(name)
                .ok_or_else(|| DocWireError::bad_value(format!("unknown operator: {name}")))?;

            let input = OpInput { field, name, arg, siblings: doc };
            if let Some(op) = parser(self, &input)? {
                ops.push(op);
            }
        }

        Ok(if ops.len() == 1 { ops.remove(0) } else { FieldOp::All(ops) })
    }
}

/// Compiles a regex with the given options.
///
/// # Errors
///
/// Returns `BadRegexOption` for flags other than `imsx`, and `BadValue` if the
/// pattern does not compile.
pub fn compile_regex(pattern: &str, options: &str) -> DocWireResult<CompiledRegex> {
    let mut flags = String::new();
    for c in options.chars() {
        if !matches!(c, 'i' | 'm' | 's' | 'x') {
            return Err(DocWireError::command(
                ErrorCode::BadRegexOption,
                format!("invalid flag in regex options: {c}"),
            ));
        }
        if !flags.contains(c) {
            flags.push(c);
        }
    }

    let source = if flags.is_empty() { pattern.to_owned() } else { format!("(?{flags}){pattern}") };
    let regex = regex::Regex::new(&source)
        .map_err(|err| DocWireError::bad_value(format!("Regular expression is invalid: {err}")))?;

    Ok(CompiledRegex { pattern: pattern.to_owned(), options: options.to_owned(), regex })
}

fn parse_eq(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Eq(input.arg.clone())))
}

fn parse_ne(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Not(Box::new(FieldOp::Eq(input.arg.clone())))))
}

fn parse_gt(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Gt(input.arg.clone())))
}

fn parse_gte(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Gte(input.arg.clone())))
}

fn parse_lt(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Lt(input.arg.clone())))
}

fn parse_lte(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Lte(input.arg.clone())))
}

fn in_items(name: &str, arg: &Value) -> DocWireResult<Vec<InItem>> {
    let list = arg
        .as_array()
        .ok_or_else(|| DocWireError::bad_value(format!("{name} needs an array")))?;

    list.iter()
        .map(|item| match item {
            Value::Regex(re) => Ok(InItem::Regex(compile_regex(&re.pattern, &re.options)?)),
            Value::Document(doc) if doc.first_key().is_some_and(|k| k.starts_with('$')) => {
                Err(DocWireError::bad_value(format!("cannot nest $ under {name}")))
            }
            other => Ok(InItem::Value(other.clone())),
        })
        .collect()
}

fn parse_in(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::In(in_items(input.name, input.arg)?)))
}

fn parse_nin(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Not(Box::new(FieldOp::In(in_items(input.name, input.arg)?)))))
}

fn parse_not(parser: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let inner = match input.arg {
        Value::Regex(re) => FieldOp::Regex(compile_regex(&re.pattern, &re.options)?),
        Value::Document(doc) if doc.is_empty() => return Err(DocWireError::bad_value("$not cannot be empty")),
        Value::Document(doc) => parser.parse_operators(input.field, doc)?,
        _ => return Err(DocWireError::bad_value("$not needs a regex or a document")),
    };
    Ok(Some(FieldOp::Not(Box::new(inner))))
}

fn parse_exists(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Exists(input.arg.is_truthy())))
}

const TYPE_ALIASES: &[(&str, i32)] = &[
    ("double", 1),
    ("string", 2),
    ("object", 3),
    ("array", 4),
    ("binData", 5),
    ("undefined", 6),
    ("objectId", 7),
    ("bool", 8),
    ("date", 9),
    ("null", 10),
    ("regex", 11),
    ("dbPointer", 12),
    ("javascript", 13),
    ("symbol", 14),
    ("javascriptWithScope", 15),
    ("int", 16),
    ("timestamp", 17),
    ("long", 18),
    ("decimal", 19),
    ("minKey", -1),
    ("maxKey", 127),
];

fn type_match(value: &Value) -> DocWireResult<TypeMatch> {
    match value {
        Value::String(alias) if alias == "number" => Ok(TypeMatch::Number),
        Value::String(alias) => TYPE_ALIASES
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, code)| TypeMatch::Code(*code))
            .ok_or_else(|| DocWireError::bad_value(format!("Unknown type name alias: {alias}"))),
        v if v.is_number() => v
            .to_whole_i64()
            .and_then(|code| i32::try_from(code).ok())
            .filter(|code| TYPE_ALIASES.iter().any(|(_, c)| c == code))
            .map(TypeMatch::Code)
            .ok_or_else(|| DocWireError::bad_value(format!("Invalid numerical type code: {}", format_value(v)))),
        _ => Err(DocWireError::command(
            ErrorCode::TypeMismatch,
            "type must be represented as a number or a string",
        )),
    }
}

fn parse_type(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let types = match input.arg {
        Value::Array(list) if list.is_empty() => {
            return Err(DocWireError::bad_value(format!("{} must match at least one type", input.field)));
        }
        Value::Array(list) => list.iter().map(type_match).collect::<DocWireResult<Vec<_>>>()?,
        single => vec![type_match(single)?],
    };
    Ok(Some(FieldOp::Type(types)))
}

fn parse_regex(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let options = match input.siblings.get("$options") {
        None => None,
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => return Err(DocWireError::bad_value("$options has to be a string")),
    };

    let compiled = match input.arg {
        Value::String(pattern) => compile_regex(pattern, options.unwrap_or(""))?,
        Value::Regex(re) => {
            if options.is_some() && !re.options.is_empty() {
                return Err(DocWireError::command(
                    ErrorCode::RegexOptions,
                    "options set in both $regex and $options",
                ));
            }
            compile_regex(&re.pattern, options.unwrap_or(&re.options))?
        }
        _ => return Err(DocWireError::bad_value("$regex has to be a string")),
    };

    Ok(Some(FieldOp::Regex(compiled)))
}

fn parse_options(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    if !input.siblings.contains_key("$regex") {
        return Err(DocWireError::bad_value("$options needs a $regex"));
    }
    Ok(None)
}

fn parse_size(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let size = match input.arg {
        Value::Int32(i) => i64::from(*i),
        Value::Int64(i) => *i,
        Value::Double(f) if f.fract() != 0.0 || !f.is_finite() => {
            return Err(DocWireError::bad_value("$size must be a whole number"));
        }
        Value::Double(f) => *f as i64,
        _ => return Err(DocWireError::bad_value("$size needs a number")),
    };

    let size = usize::try_from(size).map_err(|_| DocWireError::bad_value("$size may not be negative"))?;
    Ok(Some(FieldOp::Size(size)))
}

fn parse_all(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let list = input
        .arg
        .as_array()
        .ok_or_else(|| DocWireError::bad_value("$all needs an array"))?;

    let items = list
        .iter()
        .map(|item| match item {
            Value::Regex(re) => Ok(InItem::Regex(compile_regex(&re.pattern, &re.options)?)),
            other => Ok(InItem::Value(other.clone())),
        })
        .collect::<DocWireResult<Vec<_>>>()?;

    Ok(Some(FieldOp::AllOf(items)))
}

fn parse_elem_match(parser: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let doc = input
        .arg
        .as_document()
        .ok_or_else(|| DocWireError::bad_value("$elemMatch needs an Object"))?;

    let operator_form = doc
        .first_key()
        .is_some_and(|k| k.starts_with('$') && !matches!(k, "$and" | "$or" | "$nor"));

    let elem = if operator_form {
        ElemMatch::Ops(parser.parse_operators(input.field, doc)?)
    } else {
        ElemMatch::Filter(Filter { expr: parser.parse_document(doc)? })
    };

    Ok(Some(FieldOp::ElemMatch(Box::new(elem))))
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Truncates a `$mod` argument to an integer.
fn mod_argument(value: &Value, what: &str) -> DocWireResult<i64> {
    match value {
        Value::Int32(i) => Ok(i64::from(*i)),
        Value::Int64(i) => Ok(*i),
        Value::Double(f) if !f.is_finite() => Err(DocWireError::bad_value(format!(
            "malformed mod, {what} value is invalid :: caused by :: Unable to coerce NaN/Inf to integral type"
        ))),
        Value::Double(f) if *f > TWO_POW_63 || *f < -TWO_POW_63 => Err(DocWireError::bad_value(format!(
            "malformed mod, {what} value is invalid :: caused by :: Out of bounds coercing to integral value"
        ))),
        // 2^63 itself saturates to i64::MAX.
        Value::Double(f) => Ok(f.trunc() as i64),
        _ => Err(DocWireError::bad_value(format!("malformed mod, {what} not a number"))),
    }
}

fn parse_mod(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    let list = input
        .arg
        .as_array()
        .ok_or_else(|| DocWireError::bad_value("malformed mod, needs to be an array"))?;

    match list.len() {
        0 | 1 => return Err(DocWireError::bad_value("malformed mod, not enough elements")),
        2 => {}
        _ => return Err(DocWireError::bad_value("malformed mod, too many elements")),
    }

    let (divisor, remainder) = match (list.get(0), list.get(1)) {
        (Some(d), Some(r)) => (d, r),
        _ => return Err(DocWireError::bad_value("malformed mod, not enough elements")),
    };

    if !divisor.is_number() {
        return Err(DocWireError::bad_value("malformed mod, divisor not a number"));
    }
    if !remainder.is_number() {
        return Err(DocWireError::bad_value("malformed mod, remainder not a number"));
    }

    let divisor = mod_argument(divisor, "divisor")?;
    let remainder = mod_argument(remainder, "remainder")?;

    if divisor == 0 {
        return Err(DocWireError::bad_value("divisor cannot be 0"));
    }

    Ok(Some(FieldOp::Mod { divisor, remainder }))
}

fn bit_positions(input: &OpInput<'_>) -> DocWireResult<Vec<u32>> {
    let name = input.name;
    let shown = || format!("{name}: {}", format_value(input.arg));

    match input.arg {
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) => {
            let mask = input
                .arg
                .to_whole_i64()
                .ok_or_else(|| DocWireError::bad_value(format!("Expected an integer: {}", shown())))?;
            if mask < 0 {
                return Err(DocWireError::bad_value(format!("Expected a positive number in: {}", shown())));
            }
            Ok((0..63).filter(|bit| mask & (1_i64 << bit) != 0).collect())
        }
        Value::Binary(bin) => Ok(bin
            .bytes
            .iter()
            .enumerate()
            .flat_map(|(i, byte)| (0..8u32).filter(move |bit| byte & (1 << bit) != 0).map(move |bit| i as u32 * 8 + bit))
            .collect()),
        Value::Array(list) => list
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let pos = item.to_whole_i64().ok_or_else(|| {
                    DocWireError::bad_value(format!(
                        "bit positions must be an integer but got: {i}: {}",
                        format_value(item)
                    ))
                })?;
                u32::try_from(pos).map_err(|_| {
                    DocWireError::bad_value(format!("bit positions must be >= 0 but got: {i}: {}", format_value(item)))
                })
            })
            .collect(),
        _ => Err(DocWireError::bad_value(format!(
            "{name} takes an Array, a number, or a BinData but received: {}",
            shown()
        ))),
    }
}

fn parse_bits(input: &OpInput<'_>, test: BitsTest) -> DocWireResult<Option<FieldOp>> {
    Ok(Some(FieldOp::Bits { test, positions: bit_positions(input)? }))
}

fn parse_bits_all_clear(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    parse_bits(input, BitsTest::AllClear)
}

fn parse_bits_all_set(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    parse_bits(input, BitsTest::AllSet)
}

fn parse_bits_any_clear(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    parse_bits(input, BitsTest::AnyClear)
}

fn parse_bits_any_set(_: &FilterParser<'_>, input: &OpInput<'_>) -> DocWireResult<Option<FieldOp>> {
    parse_bits(input, BitsTest::AnySet)
}

#[cfg(test)]
mod tests {
    use bson::doc;

    use super::*;

    fn d(bson: bson::Document) -> Document {
        Document::try_from(bson).unwrap()
    }

    fn compile(filter: bson::Document) -> DocWireResult<Filter> {
        Filter::compile(&d(filter), &default_operators().unwrap())
    }

    fn message(filter: bson::Document) -> (ErrorCode, String) {
        let err = compile(filter).unwrap_err();
        (err.code(), err.to_string())
    }

    #[test]
    fn empty_filter_compiles_to_match_all() {
        let filter = compile(doc! {}).unwrap();
        assert!(filter.is_empty());
        assert!(Filter::match_all().is_empty());
    }

    #[test]
    fn logical_operators_require_nonempty_arrays() {
        assert_eq!(message(doc! { "$and": 1 }), (ErrorCode::BadValue, "$and must be an array".into()));
        assert_eq!(
            message(doc! { "$or": [] }),
            (ErrorCode::BadValue, "$and/$or/$nor must be a nonempty array".into())
        );
        assert_eq!(
            message(doc! { "$nor": [1] }),
            (ErrorCode::BadValue, "$or/$and/$nor entries need to be full objects".into())
        );
    }

    #[test]
    fn unknown_operators() {
        let (code, msg) = message(doc! { "$foo": 1 });
        assert_eq!(code, ErrorCode::BadValue);
        assert!(msg.starts_with("unknown top level operator: $foo."));

        assert_eq!(message(doc! { "a": { "$foo": 1 } }), (ErrorCode::BadValue, "unknown operator: $foo".into()));
        assert_eq!(message(doc! { "$where": "x" }).0, ErrorCode::NotImplemented);
        assert!(compile(doc! { "$comment": "hi", "a": 1 }).is_ok());
    }

    #[test]
    fn mod_argument_errors() {
        assert_eq!(message(doc! { "v": { "$mod": [0, 1] } }).1, "divisor cannot be 0");
        assert_eq!(message(doc! { "v": { "$mod": [0.5, 1] } }).1, "divisor cannot be 0");
        assert_eq!(message(doc! { "v": { "$mod": [1] } }).1, "malformed mod, not enough elements");
        assert_eq!(message(doc! { "v": { "$mod": [1, 2, 3] } }).1, "malformed mod, too many elements");
        assert_eq!(message(doc! { "v": { "$mod": 1 } }).1, "malformed mod, needs to be an array");
        assert_eq!(message(doc! { "v": { "$mod": ["a", 1] } }).1, "malformed mod, divisor not a number");
        assert_eq!(message(doc! { "v": { "$mod": [1, "a"] } }).1, "malformed mod, remainder not a number");
        assert!(message(doc! { "v": { "$mod": [f64::NAN, 1] } })
            .1
            .contains("divisor value is invalid :: caused by :: Unable to coerce NaN/Inf"));
        assert!(message(doc! { "v": { "$mod": [1, f64::INFINITY] } })
            .1
            .contains("remainder value is invalid :: caused by :: Unable to coerce NaN/Inf"));
        assert!(message(doc! { "v": { "$mod": [1e19, 1] } })
            .1
            .contains("Out of bounds coercing to integral value"));
    }

    #[test]
    fn type_errors() {
        assert_eq!(message(doc! { "a": { "$type": "foo" } }).1, "Unknown type name alias: foo");
        assert_eq!(message(doc! { "a": { "$type": 42 } }).1, "Invalid numerical type code: 42");
        assert_eq!(message(doc! { "a": { "$type": true } }).0, ErrorCode::TypeMismatch);
    }

    #[test]
    fn regex_errors() {
        assert_eq!(
            message(doc! { "a": { "$regex": "x", "$options": "q" } }),
            (ErrorCode::BadRegexOption, "invalid flag in regex options: q".into())
        );
        assert_eq!(message(doc! { "a": { "$options": "i" } }).1, "$options needs a $regex");
        assert_eq!(
            message(doc! { "a": { "$regex": bson::Regex { pattern: "x".try_into().unwrap(), options: "i".try_into().unwrap() }, "$options": "m" } })
                .0,
            ErrorCode::RegexOptions
        );
        assert!(message(doc! { "a": { "$regex": "(" } }).1.starts_with("Regular expression is invalid"));
    }

    #[test]
    fn argument_shape_errors() {
        assert_eq!(message(doc! { "a": { "$in": 1 } }).1, "$in needs an array");
        assert_eq!(message(doc! { "a": { "$nin": 1 } }).1, "$nin needs an array");
        assert_eq!(message(doc! { "a": { "$all": 1 } }).1, "$all needs an array");
        assert_eq!(message(doc! { "a": { "$elemMatch": 1 } }).1, "$elemMatch needs an Object");
        assert_eq!(message(doc! { "a": { "$not": 1 } }).1, "$not needs a regex or a document");
        assert_eq!(message(doc! { "a": { "$not": {} } }).1, "$not cannot be empty");
        assert_eq!(message(doc! { "a": { "$size": -1 } }).1, "$size may not be negative");
        assert_eq!(message(doc! { "a": { "$size": 1.5 } }).1, "$size must be a whole number");
        assert_eq!(message(doc! { "a": { "$size": "1" } }).1, "$size needs a number");
        assert_eq!(message(doc! { "a": { "$bitsAllSet": -1 } }).1, "Expected a positive number in: $bitsAllSet: -1");
        assert!(message(doc! { "a": { "$bitsAnySet": [-1] } }).1.starts_with("bit positions must be >= 0"));
        assert!(message(doc! { "a": { "$bitsAnySet": "x" } }).1.contains("takes an Array, a number, or a BinData"));
    }

    #[test]
    fn several_operators_are_combined() {
        let filter = compile(doc! { "a": { "$gt": 1, "$lt": 5 } }).unwrap();
        match filter.expr() {
            Expr::And(list) => match &list[0] {
                Expr::Field { op: FieldOp::All(ops), .. } => assert_eq!(ops.len(), 2),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("unexpected {other:?}"),
        }
    }
}
