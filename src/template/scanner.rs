use crate::config::Options;
use crate::template::error::EjsError;

/// 中间过程体中的一段
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// 原样追加的字面文本
    Literal(String),
    /// `<%= %>` / `<%- %>`：求值后追加，escape 决定是否经过转义函数
    Emit { code: String, escape: bool, line: usize },
    /// `<% %>`：仅执行，不产生输出
    Statement { code: String, line: usize },
}

/// 扫描结果：按源码顺序排列的段序列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcedureBody {
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum TagKind {
    Code,
    Escaped,
    Unescaped,
}

/// 单遍扫描模板源码，生成中间过程体
pub fn parse(source: &str, options: &Options) -> Result<ProcedureBody, EjsError> {
    let open = options.open.as_str();
    let close = options.close.as_str();
    if open.is_empty() || close.is_empty() || open == close {
        return Err(EjsError::InvalidDelimiters {
            open: open.to_string(),
            close: close.to_string(),
        });
    }

    let eatspace = options.eatspace;
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut line = 1;
    let mut whitespace_last = false;
    let mut close_markup_last = false;
    let mut i = 0;

    while i < source.len() {
        let rest = &source[i..];

        if rest.starts_with(open) {
            let tag_line = line;
            let mut start = i + open.len();
            let kind = match source[start..].chars().next() {
                Some('=') => TagKind::Escaped,
                Some('-') => TagKind::Unescaped,
                _ => TagKind::Code,
            };
            if kind != TagKind::Code {
                start += 1;
            }

            let Some(offset) = source[start..].find(close) else {
                return Err(EjsError::unterminated(options.filename.as_deref(), tag_line, close, source));
            };
            let end = start + offset;
            let mut body = &source[start..end];

            // 以 '-' 结尾的标签吞掉紧随其后的换行
            let trim_newline = match body.strip_suffix('-') {
                Some(stripped) => {
                    body = stripped;
                    true
                }
                None => false,
            };
            line += body.matches('\n').count();

            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(match kind {
                TagKind::Code => Segment::Statement {
                    code: body.to_string(),
                    line: tag_line,
                },
                TagKind::Escaped | TagKind::Unescaped => {
                    let code = match body.trim_start().strip_prefix(':') {
                        Some(pipeline) => filtered(pipeline),
                        None => body.to_string(),
                    };
                    Segment::Emit {
                        code,
                        escape: kind == TagKind::Escaped,
                        line: tag_line,
                    }
                }
            });

            i = end + close.len();
            if trim_newline {
                if source[i..].starts_with('\n') {
                    i += 1;
                    line += 1;
                } else if source[i..].starts_with("\r\n") {
                    i += 2;
                    line += 1;
                }
            }
            continue;
        }

        let Some(c) = rest.chars().next() else {
            break;
        };
        i += c.len_utf8();

        match c {
            '\r' => {
                if !eatspace {
                    literal.push(' ');
                    whitespace_last = true;
                }
            }
            '\t' => {
                if !eatspace {
                    literal.push('\t');
                    whitespace_last = true;
                }
            }
            '\n' => {
                line += 1;
                if !eatspace {
                    literal.push('\n');
                } else if !close_markup_last {
                    literal.push(' ');
                    whitespace_last = true;
                }
            }
            ' ' => {
                close_markup_last = false;
                if eatspace && whitespace_last {
                    continue;
                }
                literal.push(' ');
                whitespace_last = true;
            }
            _ => {
                literal.push(c);
                whitespace_last = false;
                close_markup_last = c == '>';
            }
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(ProcedureBody { segments })
}

/// 把 `base | name:args | ...` 改写为嵌套的 `filters.name(base, args)` 调用
fn filtered(pipeline: &str) -> String {
    let mut stages = pipeline.split('|');
    let base = stages.next().unwrap_or_default().trim().to_string();
    stages.fold(base, |acc, stage| {
        let (name, args) = match stage.split_once(':') {
            Some((name, args)) => (name.trim(), args.trim()),
            None => (stage.trim(), ""),
        };
        if args.is_empty() {
            format!("filters.{name}({acc})")
        } else {
            format!("filters.{name}({acc}, {args})")
        }
    })
}
