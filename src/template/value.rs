use serde_json::{Number, Value};
use std::cmp::Ordering;

/// 模板脚本中的真值判断：false、null、0、NaN、空字符串为假
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// 将值转换为输出文本，null 输出为空字符串
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

pub fn format_number(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{f:.0}")
    } else {
        format!("{f}")
    }
}

/// 构造数字值：整数优先保存为 i64，NaN 与无穷大无法表示，退化为 null
pub fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
        Value::Number(Number::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
    }
}

pub fn to_number(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                0.0
            } else {
                s.parse().unwrap_or(f64::NAN)
            }
        }
        Value::Array(items) if items.is_empty() => 0.0,
        Value::Array(items) if items.len() == 1 => to_number(&items[0]),
        _ => f64::NAN,
    }
}

pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
    }
}

/// `===`：数字按数值比较，其余要求类型与内容都相同
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// `==`：数字、字符串、布尔之间先转为数字再比较
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Number(_) | Value::Bool(_), Value::String(_) | Value::Bool(_) | Value::Number(_))
        | (Value::String(_), Value::Number(_) | Value::Bool(_)) => to_number(a) == to_number(b),
        _ => strict_eq(a, b),
    }
}

/// 关系比较：两边都是字符串时按字典序，否则按数值；NaN 参与时返回 None
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => to_number(a).partial_cmp(&to_number(b)),
    }
}

/// `+`：任意一边为字符串、数组或对象时拼接文本，否则数值相加
pub fn add(a: &Value, b: &Value) -> Value {
    let concat = |v: &Value| matches!(v, Value::String(_) | Value::Array(_) | Value::Object(_));
    if concat(a) || concat(b) {
        let mut s = display(a);
        s.push_str(&display(b));
        Value::String(s)
    } else {
        number(to_number(a) + to_number(b))
    }
}

/// 取属性：对象字段、数组下标、字符串字符以及 length
pub fn property(value: &Value, key: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => Some(map.get(&display(key)).cloned().unwrap_or(Value::Null)),
        Value::Array(items) => {
            if let Value::String(name) = key
                && name == "length"
            {
                return Some(Value::from(items.len()));
            }
            Some(index_of(key).and_then(|i| items.get(i).cloned()).unwrap_or(Value::Null))
        }
        Value::String(s) => {
            if let Value::String(name) = key
                && name == "length"
            {
                return Some(Value::from(s.chars().count()));
            }
            Some(
                index_of(key)
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null),
            )
        }
        Value::Null => None,
        Value::Bool(_) | Value::Number(_) => Some(Value::Null),
    }
}

fn index_of(key: &Value) -> Option<usize> {
    let f = match key {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.parse::<f64>().ok()?,
        _ => return None,
    };
    (f >= 0.0 && f.fract() == 0.0).then_some(f as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_display_like_script_numbers() {
        assert_eq!(display(&json!(3)), "3");
        assert_eq!(display(&number(1.5)), "1.5");
        assert_eq!(display(&number(4.0)), "4");
        assert_eq!(display(&json!([1, "a", null])), "1,a,");
        assert_eq!(display(&Value::Null), "");
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!("0")));
    }

    #[test]
    fn equality_rules() {
        assert!(loose_eq(&json!(1), &json!("1")));
        assert!(!strict_eq(&json!(1), &json!("1")));
        assert!(strict_eq(&json!(1), &json!(1.0)));
        assert!(!loose_eq(&Value::Null, &json!(0)));
    }

    #[test]
    fn plus_concatenates_strings() {
        assert_eq!(add(&json!("a"), &json!(1)), json!("a1"));
        assert_eq!(add(&json!(2), &json!(true)), json!(3));
    }

    #[test]
    fn property_lookup() {
        assert_eq!(property(&json!([1, 2]), &json!("length")), Some(json!(2)));
        assert_eq!(property(&json!("héllo"), &json!(1)), Some(json!("é")));
        assert_eq!(property(&json!({"a": 1}), &json!("b")), Some(Value::Null));
        assert_eq!(property(&Value::Null, &json!("a")), None);
    }
}
