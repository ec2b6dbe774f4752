use crate::template::error::RuntimeError;
use crate::template::value::{self, display, number, to_number};
use chrono::{DateTime, NaiveDate, Utc};
use md5::Md5;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::{self, Write};
use std::sync::Arc;

/// 过滤器：接收管道左侧的值与附加参数，失败时返回错误描述
pub type Filter = Arc<dyn Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync>;

/// 模板中 `funcs.name(...)` / `name(...)` 调用的辅助函数
pub type Function = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// 按名称查找的过滤器表
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
}

impl FilterRegistry {
    /// 空表，不含任何内置过滤器
    pub fn new() -> Self {
        Self::default()
    }

    /// 含全部内置过滤器的表
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        register_filters(&mut registry);
        registry
    }

    pub fn add<F>(&mut self, name: impl Into<String>, filter: F)
    where
        F: Fn(&Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.into(), Arc::new(filter));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    /// 调用过滤器；未注册的名称在求值时才报错
    pub fn invoke(&self, name: &str, value: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
        let filter = self
            .filters
            .get(name)
            .ok_or_else(|| RuntimeError::UnknownFilter(name.to_string()))?;
        filter(value, args).map_err(|message| RuntimeError::Filter {
            name: name.to_string(),
            message,
        })
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

/// 注册到渲染器上的辅助函数表
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn invoke(&self, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| RuntimeError::NotAFunction(name.to_string()))?;
        function(args).map_err(|message| RuntimeError::Function {
            name: name.to_string(),
            message,
        })
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}

/// 向过滤器表注册所有内置过滤器
pub fn register_filters(registry: &mut FilterRegistry) {
    registry.add("first", |v, _| Ok(value::property(v, &Value::from(0)).unwrap_or(Value::Null)));
    registry.add("last", filter_last);
    registry.add("capitalize", |v, _| Ok(Value::String(capitalize(&display(v)))));
    registry.add("downcase", |v, _| Ok(Value::String(display(v).to_lowercase())));
    registry.add("lower", |v, _| Ok(Value::String(display(v).to_lowercase())));
    registry.add("upcase", |v, _| Ok(Value::String(display(v).to_uppercase())));
    registry.add("upper", |v, _| Ok(Value::String(display(v).to_uppercase())));
    registry.add("sort", |v, _| sort_by(v, None));
    registry.add("sort_by", |v, args| sort_by(v, Some(arg(args, 0))));
    registry.add("size", filter_size);
    registry.add("length", filter_size);
    registry.add("plus", |v, args| Ok(number(to_number(v) + to_number(arg(args, 0)))));
    registry.add("minus", |v, args| Ok(number(to_number(v) - to_number(arg(args, 0)))));
    registry.add("times", |v, args| Ok(number(to_number(v) * to_number(arg(args, 0)))));
    registry.add("divided_by", |v, args| Ok(number(to_number(v) / to_number(arg(args, 0)))));
    registry.add("join", filter_join);
    registry.add("truncate", filter_truncate);
    registry.add("truncate_words", filter_truncate_words);
    registry.add("replace", filter_replace);
    registry.add("prepend", |v, args| Ok(attach(v, arg(args, 0), true)));
    registry.add("append", |v, args| Ok(attach(v, arg(args, 0), false)));
    registry.add("map", filter_map);
    registry.add("reverse", filter_reverse);
    registry.add("get", |v, args| Ok(value::property(v, arg(args, 0)).unwrap_or(Value::Null)));
    registry.add("json", |v, _| {
        serde_json::to_string(v).map(Value::String).map_err(|e| e.to_string())
    });
    registry.add("slugify", |v, _| Ok(Value::String(slugify(&display(v)))));
    registry.add("wordcount", |v, _| Ok(Value::from(count_words(&display(v)))));
    registry.add("md5", |v, _| Ok(Value::String(format!("{:x}", Md5::digest(display(v).as_bytes())))));
    registry.add("sha256", |v, _| {
        Ok(Value::String(format!("{:x}", Sha256::digest(display(v).as_bytes()))))
    });
    registry.add("date", filter_date);
}

fn arg(args: &[Value], index: usize) -> &Value {
    args.get(index).unwrap_or(&Value::Null)
}

fn filter_last(value: &Value, _: &[Value]) -> Result<Value, String> {
    Ok(match value {
        Value::Array(items) => items.last().cloned().unwrap_or(Value::Null),
        Value::String(s) => s.chars().last().map(|c| Value::String(c.to_string())).unwrap_or(Value::Null),
        _ => Value::Null,
    })
}

fn filter_size(value: &Value, _: &[Value]) -> Result<Value, String> {
    Ok(match value {
        Value::Array(items) => Value::from(items.len()),
        Value::String(s) => Value::from(s.chars().count()),
        Value::Object(map) => Value::from(map.len()),
        _ => Value::Null,
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => {
            let mut result = first.to_uppercase().to_string();
            result.extend(chars);
            result
        }
    }
}

/// 数组排序；指定属性时按元素的该属性排序。原值不受影响
fn sort_by(value: &Value, key: Option<&Value>) -> Result<Value, String> {
    let Value::Array(items) = value else {
        return Err(format!("期望数组，实际为 {}", value::type_of(value)));
    };
    let mut items = items.clone();
    let sort_key = |item: &Value| match key {
        Some(key) => value::property(item, key).unwrap_or(Value::Null),
        None => item.clone(),
    };
    items.sort_by(|a, b| {
        let (a, b) = (sort_key(a), sort_key(b));
        match (&a, &b) {
            (Value::Number(_), Value::Number(_)) => value::compare(&a, &b).unwrap_or(std::cmp::Ordering::Equal),
            _ => display(&a).cmp(&display(&b)),
        }
    });
    Ok(Value::Array(items))
}

fn filter_join(value: &Value, args: &[Value]) -> Result<Value, String> {
    let separator = match args.first() {
        None | Some(Value::Null) => ", ".to_string(),
        Some(sep) => display(sep),
    };
    Ok(Value::String(match value {
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(&separator),
        other => display(other),
    }))
}

/// truncate:n[,append]：超过 n 个字符时截断，并追加可选后缀
fn filter_truncate(value: &Value, args: &[Value]) -> Result<Value, String> {
    let s = display(value);
    let len = to_number(arg(args, 0));
    if len.is_nan() || len < 0.0 {
        return Err("长度必须是非负数".into());
    }
    let len = len as usize;
    if s.chars().count() <= len {
        return Ok(Value::String(s));
    }
    let mut truncated: String = s.chars().take(len).collect();
    if let Some(append) = args.get(1).filter(|a| !a.is_null()) {
        truncated.push_str(&display(append));
    }
    Ok(Value::String(truncated))
}

fn filter_truncate_words(value: &Value, args: &[Value]) -> Result<Value, String> {
    let count = to_number(arg(args, 0));
    let count = if count.is_nan() || count < 0.0 { 0 } else { count as usize };
    let text = display(value);
    Ok(Value::String(
        text.split(' ').filter(|w| !w.is_empty()).take(count).collect::<Vec<_>>().join(" "),
    ))
}

/// replace:pattern,with：只替换第一次出现
fn filter_replace(value: &Value, args: &[Value]) -> Result<Value, String> {
    let s = display(value);
    let pattern = display(arg(args, 0));
    let with = display(arg(args, 1));
    Ok(Value::String(s.replacen(&pattern, &with, 1)))
}

fn attach(value: &Value, extra: &Value, front: bool) -> Value {
    match value {
        Value::Array(items) => {
            let mut items = items.clone();
            if front {
                items.insert(0, extra.clone());
            } else {
                items.push(extra.clone());
            }
            Value::Array(items)
        }
        other if front => Value::String(display(extra) + &display(other)),
        other => Value::String(display(other) + &display(extra)),
    }
}

fn filter_map(value: &Value, args: &[Value]) -> Result<Value, String> {
    let Value::Array(items) = value else {
        return Err(format!("期望数组，实际为 {}", value::type_of(value)));
    };
    let key = arg(args, 0);
    Ok(Value::Array(
        items.iter().map(|item| value::property(item, key).unwrap_or(Value::Null)).collect(),
    ))
}

fn filter_reverse(value: &Value, _: &[Value]) -> Result<Value, String> {
    Ok(match value {
        Value::Array(items) => Value::Array(items.iter().rev().cloned().collect()),
        other => Value::String(display(other).chars().rev().collect()),
    })
}

pub fn slugify(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// 字数：CJK 字符逐字计数，其余按空白分词
pub fn count_words(s: &str) -> usize {
    let cjk = s.chars().filter(|c| is_cjk(*c)).count();
    let words = s
        .split(|c: char| c.is_whitespace() || is_cjk(c))
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count();
    cjk + words
}

fn is_cjk(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{3040}'..='\u{30FF}' | '\u{AC00}'..='\u{D7AF}')
}

/// date[:format]：接受 RFC 3339 字符串、YYYY-MM-DD 或 Unix 秒数，默认格式 %Y-%m-%d
fn filter_date(value: &Value, args: &[Value]) -> Result<Value, String> {
    let format = match args.first() {
        None | Some(Value::Null) => "%Y-%m-%d".to_string(),
        Some(f) => display(f),
    };
    let datetime: DateTime<Utc> = match value {
        Value::Number(n) => {
            let secs = n.as_f64().unwrap_or(f64::NAN);
            if !secs.is_finite() {
                return Err("无效的时间戳".into());
            }
            DateTime::from_timestamp(secs as i64, 0).ok_or_else(|| format!("时间戳超出范围：{secs}"))?
        }
        Value::String(s) => match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(_) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map_err(|e| format!("无法解析日期 {s:?}：{e}"))?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| format!("无法解析日期 {s:?}"))?
                .and_utc(),
        },
        other => return Err(format!("无法将 {} 转换为日期", value::type_of(other))),
    };

    let mut out = String::new();
    write!(out, "{}", datetime.format(&format)).map_err(|_| format!("无效的日期格式：{format}"))?;
    Ok(Value::String(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(name: &str, value: Value, args: &[Value]) -> Value {
        FilterRegistry::with_builtins().invoke(name, &value, args).unwrap()
    }

    #[test]
    fn collection_filters() {
        assert_eq!(apply("first", json!([3, 4]), &[]), json!(3));
        assert_eq!(apply("last", json!([3, 4]), &[]), json!(4));
        assert_eq!(apply("size", json!("héllo"), &[]), json!(5));
        assert_eq!(apply("sort", json!([3, 1, 2]), &[]), json!([1, 2, 3]));
        assert_eq!(
            apply("sort_by", json!([{"n": "b"}, {"n": "a"}]), &[json!("n")]),
            json!([{"n": "a"}, {"n": "b"}])
        );
        assert_eq!(apply("map", json!([{"name": "tj"}, {"name": "guillermo"}]), &[json!("name")]), json!(["tj", "guillermo"]));
        assert_eq!(apply("reverse", json!("abc"), &[]), json!("cba"));
        assert_eq!(apply("prepend", json!([2]), &[json!(1)]), json!([1, 2]));
        assert_eq!(apply("append", json!("foo"), &[json!("bar")]), json!("foobar"));
    }

    #[test]
    fn join_defaults_to_comma_space() {
        assert_eq!(apply("join", json!(["a", "b"]), &[]), json!("a, b"));
        assert_eq!(apply("join", json!(["a", "b"]), &[json!("-")]), json!("a-b"));
    }

    #[test]
    fn text_filters() {
        assert_eq!(apply("capitalize", json!("tj"), &[]), json!("Tj"));
        assert_eq!(apply("upcase", json!("tj"), &[]), json!("TJ"));
        assert_eq!(apply("truncate", json!("hello world"), &[json!(5)]), json!("hello"));
        assert_eq!(apply("truncate", json!("hello world"), &[json!(5), json!("...")]), json!("hello..."));
        assert_eq!(apply("truncate", json!("hi"), &[json!(5), json!("...")]), json!("hi"));
        assert_eq!(apply("truncate_words", json!("one  two three"), &[json!(2)]), json!("one two"));
        assert_eq!(apply("replace", json!("a-b-c"), &[json!("-"), json!("+")]), json!("a+b-c"));
        assert_eq!(apply("slugify", json!("Hello, World!"), &[]), json!("hello-world"));
        assert_eq!(apply("wordcount", json!("hello world 你好"), &[]), json!(4));
    }

    #[test]
    fn math_filters() {
        assert_eq!(apply("plus", json!(1), &[json!("2")]), json!(3));
        assert_eq!(apply("divided_by", json!(7), &[json!(2)]), json!(3.5));
        assert_eq!(apply("times", json!(1.5), &[json!(2)]), json!(3));
    }

    #[test]
    fn digest_and_json_filters() {
        assert_eq!(apply("md5", json!("abc"), &[]), json!("900150983cd24fb0d6963f7d28e17f72"));
        assert_eq!(
            apply("sha256", json!("abc"), &[]),
            json!("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert_eq!(apply("json", json!({"a": [1]}), &[]), json!(r#"{"a":[1]}"#));
    }

    #[test]
    fn date_filter() {
        assert_eq!(apply("date", json!("2024-03-05T10:00:00+08:00"), &[]), json!("2024-03-05"));
        assert_eq!(apply("date", json!(0), &[json!("%Y/%m/%d %H:%M")]), json!("1970/01/01 00:00"));
        assert_eq!(apply("date", json!("2024-01-02"), &[json!("%d.%m.%Y")]), json!("02.01.2024"));
        let err = FilterRegistry::with_builtins().invoke("date", &json!("soon"), &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Filter { ref name, .. } if name == "date"));
    }

    #[test]
    fn unknown_names_fail_at_invoke() {
        let registry = FilterRegistry::new();
        assert_eq!(
            registry.invoke("nope", &Value::Null, &[]),
            Err(RuntimeError::UnknownFilter("nope".into()))
        );
        let functions = FunctionRegistry::new();
        assert_eq!(functions.invoke("nope", &[]), Err(RuntimeError::NotAFunction("nope".into())));
    }

    #[test]
    fn custom_registrations() {
        let mut registry = FilterRegistry::new();
        registry.add("double", |v, _| Ok(number(to_number(v) * 2.0)));
        assert!(registry.contains("double"));
        assert_eq!(registry.invoke("double", &json!(21), &[]).unwrap(), json!(42));

        let mut functions = FunctionRegistry::new();
        functions.add("fail", |_| Err("boom".into()));
        assert_eq!(
            functions.invoke("fail", &[]),
            Err(RuntimeError::Function { name: "fail".into(), message: "boom".into() })
        );
    }
}
