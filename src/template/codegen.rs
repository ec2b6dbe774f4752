use crate::template::scanner::{ProcedureBody, Segment};
use std::fmt;

/// 输出中间过程体的文本清单，用于 `debug` 选项与 `ejs parse`
///
/// 每段一行：行号、操作类型与内容。字面文本只在这里加引号转义，
/// 段本身保存原始字符。
pub fn generate(body: &ProcedureBody) -> String {
    body.to_string()
}

impl fmt::Display for ProcedureBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            match segment {
                Segment::Literal(text) => write!(f, "      text    {text:?}")?,
                Segment::Emit { code, escape, line } => {
                    let op = if *escape { "escape" } else { "raw" };
                    write!(f, "{line:04}  {op:<6}  {}", one_line(code))?;
                }
                Segment::Statement { code, line } => write!(f, "{line:04}  code    {}", one_line(code))?,
            }
        }
        Ok(())
    }
}

fn one_line(code: &str) -> String {
    code.trim().replace('\r', "\\r").replace('\n', "\\n")
}
