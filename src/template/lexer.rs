use crate::template::parser::SyntaxError;

/// 模板脚本 Token 类型
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// 标识符与关键字
    Ident(String),
    Number(f64),
    /// 已处理转义的字符串字面量
    Str(String),
    Punct(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// 所在标签的起始行
    pub line: usize,
}

/// 按最长匹配排列
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "++", "--", "+=", "-=", "*=", "/=", "+", "-",
    "*", "/", "%", "<", ">", "=", "!", "?", ":", ".", ",", ";", "(", ")", "[", "]", "{", "}",
];

/// 将一个标签体词法分析为 Token 序列，所有 Token 记录标签起始行
pub fn tokenize(code: &str, line: usize) -> Result<Vec<Token>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = code.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let rest = &code[pos..];

        // 注释
        if rest.starts_with("//") {
            while let Some(&(_, c)) = chars.peek() {
                if c == '\n' {
                    break;
                }
                chars.next();
            }
            continue;
        }
        if rest.starts_with("/*") {
            let Some(end) = rest[2..].find("*/") else {
                return Err(SyntaxError::new(line, "未闭合的块注释"));
            };
            let stop = pos + 2 + end + 2;
            while chars.peek().is_some_and(|&(p, _)| p < stop) {
                chars.next();
            }
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && rest[1..].starts_with(|d: char| d.is_ascii_digit())) {
            let len = number_len(rest);
            let text = &rest[..len];
            let value = text
                .parse::<f64>()
                .map_err(|_| SyntaxError::new(line, format!("无效的数字字面量：{text}")))?;
            tokens.push(Token { kind: TokenKind::Number(value), line });
            while chars.peek().is_some_and(|&(p, _)| p < pos + len) {
                chars.next();
            }
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let value = read_string(&mut chars, c, line)?;
            tokens.push(Token { kind: TokenKind::Str(value), line });
            continue;
        }

        if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(&(_, c)) = chars.peek() {
                if !is_ident_part(c) {
                    break;
                }
                ident.push(c);
                chars.next();
            }
            tokens.push(Token { kind: TokenKind::Ident(ident), line });
            continue;
        }

        let Some(punct) = PUNCTUATORS.iter().find(|p| rest.starts_with(**p)) else {
            return Err(SyntaxError::new(line, format!("无法识别的字符 '{c}'")));
        };
        for _ in 0..punct.len() {
            chars.next();
        }
        tokens.push(Token { kind: TokenKind::Punct(*punct), line });
    }

    Ok(tokens)
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// 数字字面量长度：整数部分、小数部分与指数
fn number_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }
    i
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    line: usize,
) -> Result<String, SyntaxError> {
    let mut value = String::new();
    loop {
        let Some((_, c)) = chars.next() else {
            return Err(SyntaxError::new(line, "未闭合的字符串字面量"));
        };
        match c {
            c if c == quote => return Ok(value),
            '\n' => return Err(SyntaxError::new(line, "字符串字面量中不能换行")),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    return Err(SyntaxError::new(line, "未闭合的字符串字面量"));
                };
                match escaped {
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    'r' => value.push('\r'),
                    '0' => value.push('\0'),
                    'u' => {
                        let hex: String = (0..4).filter_map(|_| chars.next().map(|(_, h)| h)).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| SyntaxError::new(line, format!("无效的 unicode 转义：\\u{hex}")))?;
                        value.push(ch);
                    }
                    // 行尾反斜杠续行
                    '\n' => {}
                    other => value.push(other),
                }
            }
            other => value.push(other),
        }
    }
}
