use crate::template::lexer::{self, Token, TokenKind};
use crate::template::scanner::{ProcedureBody, Segment};
use crate::template::value;
use serde_json::Value;

/// 模板脚本语法错误，行号为所在标签的起始行
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// 表达式节点
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(Value),
    Ident(String),
    This,
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
    },
    /// filters.name(value, args...)
    Filter { name: String, args: Vec<Expr> },
    /// name(args...) 或 funcs.name(args...)
    Call { name: String, args: Vec<Expr> },
    /// value.method(args...)
    Method {
        object: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `&&`（and = true）与 `||`，短路求值
    Logical {
        and: bool,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    /// op 为 None 时是普通赋值，否则是 `+=` 一类复合赋值
    Assign {
        name: String,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Update {
        name: String,
        increment: bool,
        prefix: bool,
    },
    /// `function (a, b) { ... }`，只能作为数组回调方法的唯一参数
    Function { params: Vec<String>, body: Vec<Stmt> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
}

/// 语句节点；字面文本与输出标签也是语句，可以出现在任意代码块内
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Text(String),
    Output {
        expr: Expr,
        escape: bool,
        line: usize,
    },
    Expr {
        expr: Expr,
        line: usize,
    },
    Declare {
        kind: DeclKind,
        decls: Vec<(String, Option<Expr>)>,
        line: usize,
    },
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
        line: usize,
    },
    ForOf {
        binding: String,
        iterable: Expr,
        body: Box<Stmt>,
        line: usize,
    },
    ForIn {
        binding: String,
        object: Expr,
        body: Box<Stmt>,
        line: usize,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        line: usize,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        line: usize,
    },
    Block(Vec<Stmt>),
    Break,
    Continue,
    Return(Option<Expr>),
    Empty,
}

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "var", "let", "const", "break", "continue", "typeof", "of", "in",
    "true", "false", "null", "undefined", "this", "function", "return",
];

#[derive(Debug, Clone)]
enum Item {
    Token(Token),
    Text(String),
    Output { expr: Expr, escape: bool, line: usize },
}

/// 当前位置的概览，避免匹配时借用整个解析器
enum Head {
    End,
    Text,
    Output,
    Punct(&'static str),
    Ident(String),
    Literal,
}

/// 将中间过程体翻译为可执行的语句树
///
/// 代码标签的 Token 串接成一条流，字面文本与输出标签作为语句穿插其中，
/// 因此 `<% if (x) { %>…<% } %>` 这样跨标签的代码块可以正常闭合。
pub fn build(body: &ProcedureBody) -> Result<Vec<Stmt>, SyntaxError> {
    let mut items = Vec::new();
    for segment in &body.segments {
        match segment {
            Segment::Literal(text) => items.push(Item::Text(text.clone())),
            Segment::Emit { code, escape, line } => items.push(Item::Output {
                expr: parse_expression(code, *line)?,
                escape: *escape,
                line: *line,
            }),
            Segment::Statement { code, line } => {
                items.extend(lexer::tokenize(code, *line)?.into_iter().map(Item::Token));
            }
        }
    }
    Parser::new(items).program()
}

/// 解析单个输出标签体，空标签体等价于 null
pub fn parse_expression(code: &str, line: usize) -> Result<Expr, SyntaxError> {
    let tokens = lexer::tokenize(code, line)?;
    if tokens.is_empty() {
        return Ok(Expr::Value(Value::Null));
    }
    let mut parser = Parser::new(tokens.into_iter().map(Item::Token).collect());
    let expr = parser.expression()?;
    if parser.pos < parser.items.len() {
        return Err(parser.unexpected());
    }
    Ok(expr)
}

struct Parser {
    items: Vec<Item>,
    pos: usize,
    loop_depth: usize,
    function_depth: usize,
}

impl Parser {
    fn new(items: Vec<Item>) -> Self {
        Self {
            items,
            pos: 0,
            loop_depth: 0,
            function_depth: 0,
        }
    }

    // ---- 基础操作 ----

    fn head_at(&self, offset: usize) -> Head {
        match self.items.get(self.pos + offset) {
            None => Head::End,
            Some(Item::Text(_)) => Head::Text,
            Some(Item::Output { .. }) => Head::Output,
            Some(Item::Token(token)) => match &token.kind {
                TokenKind::Punct(p) => Head::Punct(*p),
                TokenKind::Ident(name) => Head::Ident(name.clone()),
                TokenKind::Number(_) | TokenKind::Str(_) => Head::Literal,
            },
        }
    }

    fn head(&self) -> Head {
        self.head_at(0)
    }

    fn line(&self) -> usize {
        let line_of = |item: &Item| match item {
            Item::Token(token) => Some(token.line),
            Item::Output { line, .. } => Some(*line),
            Item::Text(_) => None,
        };
        self.items
            .get(self.pos)
            .and_then(line_of)
            .or_else(|| self.items[..self.pos.min(self.items.len())].iter().rev().find_map(line_of))
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Item> {
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.head(), Head::Punct(q) if q == p)
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.head(), Head::Ident(name) if name == keyword)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), SyntaxError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.expected(&format!("'{p}'")))
        }
    }

    /// 读取标识符；allow_reserved 用于属性名，如 `x.in`
    fn ident(&mut self, allow_reserved: bool) -> Result<String, SyntaxError> {
        match self.head() {
            Head::Ident(name) if allow_reserved || !RESERVED.contains(&name.as_str()) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.expected("标识符")),
        }
    }

    fn describe(&self) -> String {
        match self.items.get(self.pos) {
            None => "模板结尾".to_string(),
            Some(Item::Text(_)) => "模板文本".to_string(),
            Some(Item::Output { .. }) => "输出标签".to_string(),
            Some(Item::Token(token)) => match &token.kind {
                TokenKind::Ident(name) => format!("'{name}'"),
                TokenKind::Number(n) => format!("'{}'", value::format_number(*n)),
                TokenKind::Str(s) => format!("{s:?}"),
                TokenKind::Punct(p) => format!("'{p}'"),
            },
        }
    }

    fn unexpected(&self) -> SyntaxError {
        SyntaxError::new(self.line(), format!("意外的 {}", self.describe()))
    }

    fn expected(&self, what: &str) -> SyntaxError {
        SyntaxError::new(self.line(), format!("此处需要 {what}，实际为 {}", self.describe()))
    }

    // ---- 语句 ----

    fn program(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body = Vec::new();
        while !matches!(self.head(), Head::End) {
            if self.is_punct("}") {
                return Err(SyntaxError::new(self.line(), "多余的 '}'"));
            }
            body.push(self.statement()?);
        }
        Ok(body)
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.line();
        match self.head() {
            Head::End => Err(self.unexpected()),
            Head::Text | Head::Output => match self.advance() {
                Some(Item::Text(text)) => Ok(Stmt::Text(text)),
                Some(Item::Output { expr, escape, line }) => Ok(Stmt::Output { expr, escape, line }),
                _ => Err(self.unexpected()),
            },
            Head::Punct("{") => {
                self.pos += 1;
                Ok(Stmt::Block(self.block_body()?))
            }
            Head::Punct(";") => {
                self.pos += 1;
                Ok(Stmt::Empty)
            }
            Head::Ident(keyword) => match keyword.as_str() {
                "if" => self.if_statement(line),
                "for" => self.for_statement(line),
                "while" => {
                    self.pos += 1;
                    self.expect_punct("(")?;
                    let test = self.expression()?;
                    self.expect_punct(")")?;
                    let body = self.loop_body()?;
                    Ok(Stmt::While { test, body, line })
                }
                "var" | "let" | "const" => {
                    let decl = self.declaration(line)?;
                    self.eat_punct(";");
                    Ok(decl)
                }
                "break" | "continue" => {
                    if self.loop_depth == 0 {
                        return Err(SyntaxError::new(line, format!("{keyword} 只能出现在循环中")));
                    }
                    self.pos += 1;
                    self.eat_punct(";");
                    Ok(if keyword == "break" { Stmt::Break } else { Stmt::Continue })
                }
                "return" => {
                    if self.function_depth == 0 {
                        return Err(SyntaxError::new(line, "return 只能出现在函数中"));
                    }
                    self.pos += 1;
                    let value = match self.head() {
                        Head::End | Head::Text | Head::Output | Head::Punct(";" | "}") => None,
                        _ => Some(self.expression()?),
                    };
                    self.eat_punct(";");
                    Ok(Stmt::Return(value))
                }
                "else" => Err(self.unexpected()),
                _ => self.expression_statement(line),
            },
            _ => self.expression_statement(line),
        }
    }

    fn expression_statement(&mut self, line: usize) -> Result<Stmt, SyntaxError> {
        let expr = self.expression()?;
        self.eat_punct(";");
        Ok(Stmt::Expr { expr, line })
    }

    fn block_body(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body = Vec::new();
        loop {
            if self.eat_punct("}") {
                return Ok(body);
            }
            if matches!(self.head(), Head::End) {
                return Err(SyntaxError::new(self.line(), "代码块缺少 '}'"));
            }
            body.push(self.statement()?);
        }
    }

    fn loop_body(&mut self) -> Result<Box<Stmt>, SyntaxError> {
        self.loop_depth += 1;
        let body = self.statement();
        self.loop_depth -= 1;
        Ok(Box::new(body?))
    }

    /// 函数体内的 break / continue 不能跳出外层循环
    fn function(&mut self) -> Result<Expr, SyntaxError> {
        self.pos += 1;
        if matches!(self.head(), Head::Ident(_)) {
            self.ident(false)?;
        }
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.eat_punct(")") {
            params.push(self.ident(false)?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        self.expect_punct("{")?;

        let loop_depth = std::mem::take(&mut self.loop_depth);
        self.function_depth += 1;
        let body = self.block_body();
        self.function_depth -= 1;
        self.loop_depth = loop_depth;
        Ok(Expr::Function { params, body: body? })
    }

    fn if_statement(&mut self, line: usize) -> Result<Stmt, SyntaxError> {
        self.pos += 1;
        self.expect_punct("(")?;
        let test = self.expression()?;
        self.expect_punct(")")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.is_keyword("else") {
            self.pos += 1;
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            then,
            otherwise,
            line,
        })
    }

    fn for_statement(&mut self, line: usize) -> Result<Stmt, SyntaxError> {
        self.pos += 1;
        self.expect_punct("(")?;

        // for (x of xs) / for (const x of xs) / for (k in obj)
        let declared = matches!(self.head(), Head::Ident(k) if matches!(k.as_str(), "var" | "let" | "const"));
        let skip = usize::from(declared);
        if let (Head::Ident(binding), Head::Ident(word)) = (self.head_at(skip), self.head_at(skip + 1))
            && (word == "of" || word == "in")
            && !RESERVED.contains(&binding.as_str())
        {
            self.pos += skip + 2;
            let target = self.expression()?;
            self.expect_punct(")")?;
            let body = self.loop_body()?;
            return Ok(if word == "of" {
                Stmt::ForOf {
                    binding,
                    iterable: target,
                    body,
                    line,
                }
            } else {
                Stmt::ForIn {
                    binding,
                    object: target,
                    body,
                    line,
                }
            });
        }

        let init = if self.eat_punct(";") {
            None
        } else {
            let init = if declared {
                self.declaration(line)?
            } else {
                Stmt::Expr {
                    expr: self.expression()?,
                    line,
                }
            };
            self.expect_punct(";")?;
            Some(Box::new(init))
        };
        let test = if self.is_punct(";") { None } else { Some(self.expression()?) };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") { None } else { Some(self.expression()?) };
        self.expect_punct(")")?;
        let body = self.loop_body()?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
            line,
        })
    }

    fn declaration(&mut self, line: usize) -> Result<Stmt, SyntaxError> {
        let kind = match self.head() {
            Head::Ident(k) if k == "var" => DeclKind::Var,
            Head::Ident(k) if k == "let" => DeclKind::Let,
            _ => DeclKind::Const,
        };
        self.pos += 1;
        let mut decls = Vec::new();
        loop {
            let name = self.ident(false)?;
            let init = if self.eat_punct("=") { Some(self.assignment()?) } else { None };
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Declare { kind, decls, line })
    }

    // ---- 表达式 ----

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.assignment()
    }

    fn assignment(&mut self) -> Result<Expr, SyntaxError> {
        if let Head::Ident(name) = self.head()
            && !RESERVED.contains(&name.as_str())
            && let Head::Punct(p) = self.head_at(1)
            && let Some(op) = assign_op(p)
        {
            self.pos += 2;
            let value = self.assignment()?;
            return Ok(Expr::Assign {
                name,
                op,
                value: Box::new(value),
            });
        }
        self.conditional()
    }

    fn conditional(&mut self) -> Result<Expr, SyntaxError> {
        let test = self.binary(0)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.assignment()?;
        self.expect_punct(":")?;
        let alternate = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, SyntaxError> {
        let mut left = self.unary()?;
        loop {
            let Head::Punct(p) = self.head() else {
                break;
            };
            let Some(prec) = precedence(p) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = Box::new(self.binary(prec + 1)?);
            let left_box = Box::new(left);
            left = match p {
                "&&" => Expr::Logical { and: true, left: left_box, right },
                "||" => Expr::Logical { and: false, left: left_box, right },
                _ => Expr::Binary {
                    op: binary_op(p).ok_or_else(|| self.unexpected())?,
                    left: left_box,
                    right,
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.head() {
            Head::Punct("!") => UnaryOp::Not,
            Head::Punct("-") => UnaryOp::Neg,
            Head::Punct("+") => UnaryOp::Plus,
            Head::Ident(k) if k == "typeof" => UnaryOp::TypeOf,
            Head::Punct(p @ ("++" | "--")) => {
                self.pos += 1;
                let name = self.ident(false)?;
                return Ok(Expr::Update {
                    name,
                    increment: p == "++",
                    prefix: true,
                });
            }
            _ => return self.postfix(),
        };
        self.pos += 1;
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let expr = self.call_member()?;
        if let Expr::Ident(name) = &expr
            && let Head::Punct(p @ ("++" | "--")) = self.head()
        {
            self.pos += 1;
            return Ok(Expr::Update {
                name: name.clone(),
                increment: p == "++",
                prefix: false,
            });
        }
        Ok(expr)
    }

    fn call_member(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat_punct(".") {
                let name = self.ident(true)?;
                if self.is_punct("(") {
                    let args = self.arguments()?;
                    expr = match expr {
                        Expr::Ident(object) if object == "filters" => Expr::Filter { name, args },
                        Expr::Ident(object) if object == "funcs" => Expr::Call { name, args },
                        object => Expr::Method {
                            object: Box::new(object),
                            name,
                            args,
                        },
                    };
                } else {
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property: Box::new(Expr::Value(Value::String(name))),
                    };
                }
            } else if self.eat_punct("[") {
                let property = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property: Box::new(property),
                };
            } else if self.is_punct("(") {
                let Expr::Ident(name) = expr else {
                    return Err(SyntaxError::new(self.line(), "只能调用已注册的函数、过滤器或值的方法"));
                };
                let args = self.arguments()?;
                expr = Expr::Call { name, args };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.eat_punct(")") {
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        match self.head() {
            Head::Literal => match self.advance() {
                Some(Item::Token(Token { kind: TokenKind::Number(n), .. })) => Ok(Expr::Value(value::number(n))),
                Some(Item::Token(Token { kind: TokenKind::Str(s), .. })) => Ok(Expr::Value(Value::String(s))),
                _ => Err(self.unexpected()),
            },
            Head::Ident(name) => {
                let expr = match name.as_str() {
                    "true" => Expr::Value(Value::Bool(true)),
                    "false" => Expr::Value(Value::Bool(false)),
                    "null" | "undefined" => Expr::Value(Value::Null),
                    "this" => Expr::This,
                    "function" => return self.function(),
                    other if RESERVED.contains(&other) => return Err(self.unexpected()),
                    _ => Expr::Ident(name),
                };
                self.pos += 1;
                Ok(expr)
            }
            Head::Punct("(") => {
                self.pos += 1;
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Head::Punct("[") => {
                self.pos += 1;
                let mut items = Vec::new();
                while !self.eat_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        self.expect_punct("]")?;
                        break;
                    }
                }
                Ok(Expr::Array(items))
            }
            Head::Punct("{") => {
                self.pos += 1;
                let mut fields = Vec::new();
                while !self.eat_punct("}") {
                    let key = match self.items.get(self.pos) {
                        Some(Item::Token(Token { kind: TokenKind::Ident(k) | TokenKind::Str(k), .. })) => k.clone(),
                        Some(Item::Token(Token { kind: TokenKind::Number(n), .. })) => value::format_number(*n),
                        _ => return Err(self.expected("属性名")),
                    };
                    self.pos += 1;
                    let value = if self.eat_punct(":") {
                        self.assignment()?
                    } else {
                        Expr::Ident(key.clone())
                    };
                    fields.push((key, value));
                    if !self.eat_punct(",") {
                        self.expect_punct("}")?;
                        break;
                    }
                }
                Ok(Expr::Object(fields))
            }
            _ => Err(self.unexpected()),
        }
    }
}

fn assign_op(p: &str) -> Option<Option<BinaryOp>> {
    match p {
        "=" => Some(None),
        "+=" => Some(Some(BinaryOp::Add)),
        "-=" => Some(Some(BinaryOp::Sub)),
        "*=" => Some(Some(BinaryOp::Mul)),
        "/=" => Some(Some(BinaryOp::Div)),
        _ => None,
    }
}

fn precedence(p: &str) -> Option<u8> {
    Some(match p {
        "||" => 1,
        "&&" => 2,
        "==" | "!=" | "===" | "!==" => 3,
        "<" | "<=" | ">" | ">=" => 4,
        "+" | "-" => 5,
        "*" | "/" | "%" => 6,
        _ => return None,
    })
}

fn binary_op(p: &str) -> Option<BinaryOp> {
    Some(match p {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::NotEq,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Options;
    use crate::template::scanner;

    fn program(source: &str) -> Vec<Stmt> {
        build(&scanner::parse(source, &Options::default()).unwrap()).unwrap()
    }

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    #[test]
    fn precedence_climbing() {
        let expr = parse_expression("a + b * 2 > c && !d", 1).unwrap();
        let Expr::Logical { and: true, left, right } = expr else {
            panic!("expected &&");
        };
        assert!(matches!(*left, Expr::Binary { op: BinaryOp::Gt, .. }));
        assert_eq!(*right, Expr::Unary { op: UnaryOp::Not, operand: ident("d") });
    }

    #[test]
    fn filter_calls_are_recognised() {
        let expr = parse_expression("filters.join(filters.map(users, 'name'), ', ')", 1).unwrap();
        let Expr::Filter { name, args } = expr else {
            panic!("expected filter");
        };
        assert_eq!(name, "join");
        assert!(matches!(&args[0], Expr::Filter { name, .. } if name == "map"));
        assert_eq!(args[1], Expr::Value(Value::String(", ".into())));
    }

    #[test]
    fn blocks_span_tags() {
        let stmts = program("<% if (show) { %>yes<% } else { %>no<% } %>");
        let [Stmt::If { then, otherwise: Some(otherwise), line: 1, .. }] = stmts.as_slice() else {
            panic!("expected a single if statement: {stmts:?}");
        };
        assert_eq!(**then, Stmt::Block(vec![Stmt::Text("yes".into())]));
        assert_eq!(**otherwise, Stmt::Block(vec![Stmt::Text("no".into())]));
    }

    #[test]
    fn for_forms() {
        assert!(matches!(
            program("<% for (const u of users) { %>x<% } %>").as_slice(),
            [Stmt::ForOf { binding, .. }] if binding == "u"
        ));
        assert!(matches!(
            program("<% for (k in obj) { } %>").as_slice(),
            [Stmt::ForIn { binding, .. }] if binding == "k"
        ));
        assert!(matches!(
            program("<% for (var i = 0; i < 3; i++) { } %>").as_slice(),
            [Stmt::For { init: Some(_), test: Some(_), update: Some(_), .. }]
        ));
    }

    #[test]
    fn statements_without_semicolons() {
        let stmts = program("<% var a = 1 %><% a += 2 %>");
        assert_eq!(stmts.len(), 2);
        assert!(matches!(&stmts[1], Stmt::Expr { expr: Expr::Assign { op: Some(BinaryOp::Add), .. }, .. }));
    }

    #[test]
    fn object_and_array_literals() {
        let expr = parse_expression("{ a: [1, 2], 'b': x, c }", 1).unwrap();
        let Expr::Object(fields) = expr else {
            panic!("expected object");
        };
        assert_eq!(fields.len(), 3);
        assert_eq!(fields[2], ("c".to_string(), Expr::Ident("c".into())));
    }

    #[test]
    fn empty_output_is_null() {
        assert_eq!(parse_expression("  ", 4).unwrap(), Expr::Value(Value::Null));
    }

    #[test]
    fn function_callbacks_span_tags() {
        let stmts = program("<% xs.forEach(function (x, i) { %><b><%= x %></b><% }) %>");
        let [Stmt::Expr { expr: Expr::Method { name, args, .. }, .. }] = stmts.as_slice() else {
            panic!("expected a method call: {stmts:?}");
        };
        assert_eq!(name, "forEach");
        let [Expr::Function { params, body }] = args.as_slice() else {
            panic!("expected a function argument: {args:?}");
        };
        assert_eq!(params, &["x", "i"]);
        assert_eq!(body.len(), 3);

        let expr = parse_expression("xs.map(function named(x) { return x * 2 })", 1).unwrap();
        assert!(matches!(expr, Expr::Method { ref args, .. } if matches!(args[0], Expr::Function { .. })));
    }

    #[test]
    fn return_and_break_respect_function_bounds() {
        let body = scanner::parse("<% return 1 %>", &Options::default()).unwrap();
        assert!(build(&body).unwrap_err().message.contains("return"));

        let body = scanner::parse("<% for (const x of xs) { xs.forEach(function () { break }) } %>", &Options::default())
            .unwrap();
        assert!(build(&body).is_err());

        let body = scanner::parse("<% xs.some(function (x) { return; }) %>", &Options::default()).unwrap();
        assert!(build(&body).is_ok());
    }

    #[test]
    fn syntax_errors_carry_line() {
        let body = scanner::parse("a\nb\n<% if (x { %>", &Options::default()).unwrap();
        assert_eq!(build(&body).unwrap_err().line, 3);

        let body = scanner::parse("<% if (x) { %>\nunclosed", &Options::default()).unwrap();
        assert!(build(&body).unwrap_err().message.contains('}'));

        assert!(parse_expression("a b", 1).is_err());
        let body = scanner::parse("<% break %>", &Options::default()).unwrap();
        assert!(build(&body).is_err());
    }
}
