//! Expression & Template Engine: `render_template`, `resolve_value`,
//! `evaluate_expr` — a small JSONPath-lite path resolver plus a comparison
//! grammar for condition/switch/while expressions.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("invalid path expression: {0}")]
    InvalidPath(String),
}

/// JSONPath-lite resolution: string/number/boolean/null literals pass
/// through; a dotted path starting with `$.` is resolved against `data`;
/// otherwise the token is treated as a top-level field name.
pub fn resolve_value(expr: &str, data: &Value) -> Value {
    let trimmed = expr.trim();

    if let Ok(n) = trimmed.parse::<f64>() {
        return serde_json::json!(n);
    }
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
        || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
    {
        return Value::String(trimmed[1..trimmed.len() - 1].to_string());
    }

    let path = trimmed.strip_prefix("$.").unwrap_or(trimmed);
    resolve_path(path, data)
}

fn resolve_path(path: &str, data: &Value) -> Value {
    if path.is_empty() {
        return data.clone();
    }
    let mut current = data.clone();
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (field, index) = parse_segment(segment);
        current = match current.get(&field) {
            Some(v) => v.clone(),
            None => return Value::Null,
        };
        if let Some(i) = index {
            current = current.get(i).cloned().unwrap_or(Value::Null);
        }
    }
    current
}

/// Parses `name[3]` into `("name", Some(3))`, or `"name"` into
/// `("name", None)`.
fn parse_segment(segment: &str) -> (String, Option<usize>) {
    if let Some(open) = segment.find('[') {
        if let Some(close) = segment.find(']') {
            if close > open {
                let field = segment[..open].to_string();
                let idx = segment[open + 1..close].parse::<usize>().ok();
                return (field, idx);
            }
        }
    }
    (segment.to_string(), None)
}

/// Substitutes `{{$.path}}` and `{{name}}` in `text` with values resolved
/// from `input`. Unresolved references render as empty string.
pub fn render_template(text: &str, input: &Value) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let expr = after[..end].trim();
                let value = resolve_value(expr, input);
                out.push_str(&value_to_template_string(&value));
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated `{{` — emit literally and stop.
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn value_to_template_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

const OPERATORS: &[(&str, CompareOp)] = &[
    ("==", CompareOp::Eq),
    ("!=", CompareOp::Ne),
    (">=", CompareOp::Ge),
    ("<=", CompareOp::Le),
    (">", CompareOp::Gt),
    ("<", CompareOp::Lt),
];

/// Evaluates a comparison expression against `data`. Splits on the first
/// occurrence (scanned in the precedence order above) of `==,!=,>=,<=,>,<`,
/// resolves each side, and compares with loose-equality semantics: numeric
/// coercion when both sides parse as numbers, else lexicographic. An
/// expression with no operator returns the truthiness of `resolve_value`.
pub fn evaluate_expr(expr: &str, data: &Value) -> bool {
    for (token, op) in OPERATORS {
        if let Some(pos) = expr.find(token) {
            let lhs = expr[..pos].trim();
            let rhs = expr[pos + token.len()..].trim();
            let left = resolve_value(lhs, data);
            let right = resolve_value(rhs, data);
            return compare(&left, &right, *op);
        }
    }
    truthiness(&resolve_value(expr, data))
}

fn compare(left: &Value, right: &Value, op: CompareOp) -> bool {
    if let (Some(l), Some(r)) = (as_f64(left), as_f64(right)) {
        return match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Ge => l >= r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Lt => l < r,
        };
    }
    let l = value_to_template_string(left);
    let r = value_to_template_string(right);
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Ge => l >= r,
        CompareOp::Le => l <= r,
        CompareOp::Gt => l > r,
        CompareOp::Lt => l < r,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn truthiness(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_value_dotted_path() {
        let data = json!({"a": {"b": "x"}});
        assert_eq!(resolve_value("$.a.b", &data), json!("x"));
    }

    #[test]
    fn resolve_value_missing_path_is_null() {
        let data = json!({"a": 1});
        assert_eq!(resolve_value("$.missing.path", &data), Value::Null);
    }

    #[test]
    fn render_template_substitutes_and_falls_back_empty() {
        let data = json!({"a": {"b": "x"}});
        assert_eq!(render_template("{{$.a.b}}", &data), "x");
        assert_eq!(render_template("{{$.missing}}", &data), "");
        assert_eq!(render_template("prefix-{{$.a.b}}-suffix", &data), "prefix-x-suffix");
    }

    #[test]
    fn evaluate_expr_numeric_comparison() {
        assert!(evaluate_expr("$.x > 5", &json!({"x": 10})));
        assert!(!evaluate_expr("$.x > 5", &json!({"x": 1})));
    }

    #[test]
    fn evaluate_expr_no_operator_is_truthiness() {
        assert!(!evaluate_expr("$.x", &json!({"x": 0})));
        assert!(evaluate_expr("$.x", &json!({"x": 1})));
    }

    #[test]
    fn evaluate_expr_array_index() {
        let data = json!({"items": [10, 20, 30]});
        assert_eq!(resolve_value("$.items[1]", &data), json!(20));
    }
}
