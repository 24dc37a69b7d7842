//! Shell-style rendering of values for error messages.
//!
//! Clients compare error messages textually, so the rendering here follows the
//! shell syntax exactly: `{ a: 1, b: "x" }`, `[ 1, 2 ]`, `nan.0`, `-0.0`,
//! `ObjectId('..')`, `new Date(..)` and so on.

use crate::{
    document::{Array, Document},
    value::Value,
};

/// Renders a value in shell syntax.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Document(doc) => format_document(doc),
        Value::Array(arr) => format_array(arr),
        Value::Double(f) => format_double(*f),
        Value::String(s) => format!("\"{s}\""),
        Value::Binary(b) => {
            let hex: String = b.bytes.iter().map(|byte| format!("{byte:02X}")).collect();
            format!("BinData({}, {hex})", b.subtype)
        }
        Value::ObjectId(oid) => format!("ObjectId('{}')", oid.to_hex()),
        Value::Boolean(b) => b.to_string(),
        Value::DateTime(dt) => format!("new Date({})", dt.timestamp_millis()),
        Value::Null => "null".to_owned(),
        Value::Regex(re) => format!("/{}/{}", re.pattern, re.options),
        Value::Int32(i) => i.to_string(),
        Value::Timestamp(ts) => format!("Timestamp({}, {})", ts.time, ts.increment as i32),
        Value::Int64(i) => i.to_string(),
    }
}

/// Renders a document as `{ k: v, ... }`.
pub fn format_document(doc: &Document) -> String {
    if doc.is_empty() {
        return "{}".to_owned();
    }

    let fields: Vec<String> = doc.iter().map(|(k, v)| format!("{k}: {}", format_value(v))).collect();
    format!("{{ {} }}", fields.join(", "))
}

fn format_array(arr: &Array) -> String {
    if arr.is_empty() {
        return "[]".to_owned();
    }

    let items: Vec<String> = arr.iter().map(format_value).collect();
    format!("[ {} ]", items.join(", "))
}

fn format_double(f: f64) -> String {
    if f.is_nan() {
        return "nan.0".to_owned();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf.0" } else { "inf.0" }.to_owned();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }
    if !(-1000.0..=1000.0).contains(&f) || f == f64::from_bits(1) {
        return scientific(f);
    }
    if f.trunc() == f {
        return format!("{}.0", f as i64);
    }

    let fixed = format!("{f:.2}");
    fixed.strip_suffix('0').map(str::to_owned).unwrap_or(fixed)
}

// Exponents are rendered with an explicit sign and at least two digits, `1.5e+03`.
fn scientific(f: f64) -> String {
    let rendered = format!("{f:.15e}");
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered;
    };

    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };

    format!("{mantissa}e{sign}{digits:0>2}")
}

#[cfg(test)]
mod tests {
    use bson::{DateTime, Timestamp, oid::ObjectId};

    use super::*;
    use crate::value::{Binary, Regex};

    #[test]
    fn doubles() {
        assert_eq!(format_value(&Value::Double(f64::NAN)), "nan.0");
        assert_eq!(format_value(&Value::Double(f64::NEG_INFINITY)), "-inf.0");
        assert_eq!(format_value(&Value::Double(-0.0)), "-0.0");
        assert_eq!(format_value(&Value::Double(0.0)), "0.0");
        assert_eq!(format_value(&Value::Double(42.0)), "42.0");
        assert_eq!(format_value(&Value::Double(1.5)), "1.5");
        assert_eq!(format_value(&Value::Double(1.25)), "1.25");
        assert_eq!(format_value(&Value::Double(1234.5)), "1.234500000000000e+03");
        assert_eq!(format_value(&Value::Double(-1e10)), "-1.000000000000000e+10");
    }

    #[test]
    fn scalars() {
        assert_eq!(format_value(&Value::from("x")), "\"x\"");
        assert_eq!(format_value(&Value::Binary(Binary::new(0, vec![0x0a, 0xff]))), "BinData(0, 0AFF)");
        assert_eq!(format_value(&Value::Null), "null");
        assert_eq!(format_value(&Value::Regex(Regex::new("^a", "i"))), "/^a/i");
        assert_eq!(format_value(&Value::DateTime(DateTime::from_millis(1500))), "new Date(1500)");
        assert_eq!(format_value(&Value::Timestamp(Timestamp { time: 3, increment: 4 })), "Timestamp(3, 4)");

        let oid = ObjectId::parse_str("0123456789abcdef01234567").unwrap();
        assert_eq!(format_value(&Value::ObjectId(oid)), "ObjectId('0123456789abcdef01234567')");
    }

    #[test]
    fn composites() {
        let doc = Document::try_from(bson::doc! { "_id": "string", "v": [1, { "a": true }], "e": [] }).unwrap();
        assert_eq!(format_document(&doc), "{ _id: \"string\", v: [ 1, { a: true } ], e: [] }");
        assert_eq!(format_document(&Document::new()), "{}");
    }
}
