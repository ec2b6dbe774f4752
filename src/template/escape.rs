use crate::template::value::display;
use serde_json::Value;
use std::sync::Arc;

/// 输出标签 `<%= %>` 使用的转义函数
pub type Escaper = Arc<dyn Fn(&Value) -> String + Send + Sync>;

pub fn html_escaper() -> Escaper {
    Arc::new(|value: &Value| escape_html(&display(value)))
}

/// HTML 转义，已有的实体（`&amp;`、`&#39;`、`&#x27;`）保持不变
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.char_indices() {
        match c {
            '&' if is_entity(&s[i + 1..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `&` 之后是否为 `name;`、`#123;` 或 `#x1f;` 形式的实体
fn is_entity(rest: &str) -> bool {
    let Some(end) = rest.find(';') else {
        return false;
    };
    let body = &rest[..end];
    if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
        !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else if let Some(dec) = body.strip_prefix('#') {
        !dec.is_empty() && dec.chars().all(|c| c.is_ascii_digit())
    } else {
        !body.is_empty() && body.chars().all(|c| c.is_ascii_alphanumeric())
    }
}
