use crate::template::error::RuntimeError;
use crate::template::escape::Escaper;
use crate::template::filters::{FilterRegistry, FunctionRegistry};
use crate::template::parser::{BinaryOp, DeclKind, Expr, Stmt, UnaryOp};
use crate::template::value::{self, display, number, to_number, truthy};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// 单次渲染的源码位置，执行每个带行号的语句前更新
#[derive(Debug, Clone)]
pub struct SourceCursor {
    pub line: usize,
    pub source: Arc<str>,
    pub filename: Option<String>,
}

impl SourceCursor {
    pub fn new(source: Arc<str>, filename: Option<String>) -> Self {
        Self {
            line: 1,
            source,
            filename,
        }
    }
}

/// 执行期间可见的外部数据与协作者
pub struct Scope<'a> {
    /// 调用方传入的值对象，顶层变量
    pub values: &'a Map<String, Value>,
    /// 后备变量表
    pub locals: &'a Map<String, Value>,
    pub this: &'a Value,
    pub filters: &'a FilterRegistry,
    pub functions: &'a FunctionRegistry,
    pub escape: &'a Escaper,
}

struct Binding {
    value: Value,
    constant: bool,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// 执行语句树，返回拼接好的输出
pub fn execute(program: &[Stmt], scope: &Scope<'_>, cursor: &mut SourceCursor) -> Result<String, RuntimeError> {
    let mut executor = Executor {
        scope,
        cursor,
        frames: vec![HashMap::new()],
        out: String::new(),
    };
    executor.run(program)?;
    Ok(executor.out)
}

struct Executor<'s, 'a> {
    scope: &'s Scope<'a>,
    cursor: &'s mut SourceCursor,
    frames: Vec<HashMap<String, Binding>>,
    out: String,
}

impl Executor<'_, '_> {
    fn run(&mut self, stmts: &[Stmt]) -> Result<Flow, RuntimeError> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// 在新的块级作用域中执行
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>) -> Result<T, RuntimeError> {
        self.frames.push(HashMap::new());
        let result = f(self);
        self.frames.pop();
        result
    }

    fn exec(&mut self, stmt: &Stmt) -> Result<Flow, RuntimeError> {
        match stmt {
            Stmt::Text(text) => self.out.push_str(text),
            Stmt::Output { expr, escape, line } => {
                self.cursor.line = *line;
                let value = self.eval(expr)?;
                if *escape {
                    let escaped = (self.scope.escape)(&value);
                    self.out.push_str(&escaped);
                } else {
                    self.out.push_str(&display(&value));
                }
            }
            Stmt::Expr { expr, line } => {
                self.cursor.line = *line;
                self.eval(expr)?;
            }
            Stmt::Declare { kind, decls, line } => {
                self.cursor.line = *line;
                for (name, init) in decls {
                    let value = match init {
                        Some(expr) => self.eval(expr)?,
                        None => Value::Null,
                    };
                    self.declare(*kind, name, value);
                }
            }
            Stmt::If {
                test,
                then,
                otherwise,
                line,
            } => {
                self.cursor.line = *line;
                if truthy(&self.eval(test)?) {
                    return self.exec(then);
                } else if let Some(otherwise) = otherwise {
                    return self.exec(otherwise);
                }
            }
            Stmt::ForOf {
                binding,
                iterable,
                body,
                line,
            } => {
                self.cursor.line = *line;
                let items = match self.eval(iterable)? {
                    Value::Array(items) => items,
                    Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                    other => {
                        return Err(RuntimeError::Type(format!("{} 不可迭代", describe(&other))));
                    }
                };
                for item in items {
                    let flow = self.scoped(|this| {
                        this.declare(DeclKind::Let, binding, item);
                        this.exec(body)
                    })?;
                    match flow {
                        Flow::Break => break,
                        Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::ForIn {
                binding,
                object,
                body,
                line,
            } => {
                self.cursor.line = *line;
                let keys: Vec<String> = match self.eval(object)? {
                    Value::Object(map) => map.keys().cloned().collect(),
                    Value::Array(items) => (0..items.len()).map(|i| i.to_string()).collect(),
                    Value::String(s) => (0..s.chars().count()).map(|i| i.to_string()).collect(),
                    _ => Vec::new(),
                };
                for key in keys {
                    let flow = self.scoped(|this| {
                        this.declare(DeclKind::Let, binding, Value::String(key));
                        this.exec(body)
                    })?;
                    match flow {
                        Flow::Break => break,
                        Flow::Return(_) => return Ok(flow),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                line,
            } => {
                return self.scoped(|this| {
                    this.cursor.line = *line;
                    if let Some(init) = init {
                        this.exec(init)?;
                    }
                    loop {
                        this.cursor.line = *line;
                        if let Some(test) = test
                            && !truthy(&this.eval(test)?)
                        {
                            break;
                        }
                        match this.scoped(|inner| inner.exec(body))? {
                            Flow::Break => break,
                            flow @ Flow::Return(_) => return Ok(flow),
                            Flow::Normal | Flow::Continue => {}
                        }
                        this.cursor.line = *line;
                        if let Some(update) = update {
                            this.eval(update)?;
                        }
                    }
                    Ok(Flow::Normal)
                });
            }
            Stmt::While { test, body, line } => loop {
                self.cursor.line = *line;
                if !truthy(&self.eval(test)?) {
                    break;
                }
                match self.scoped(|this| this.exec(body))? {
                    Flow::Break => break,
                    flow @ Flow::Return(_) => return Ok(flow),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            Stmt::Block(stmts) => return self.scoped(|this| this.run(stmts)),
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Empty => {}
        }
        Ok(Flow::Normal)
    }

    // ---- 变量 ----

    fn declare(&mut self, kind: DeclKind, name: &str, value: Value) {
        let binding = Binding {
            value,
            constant: kind == DeclKind::Const,
        };
        let frame = match kind {
            DeclKind::Var => self.frames.first_mut(),
            DeclKind::Let | DeclKind::Const => self.frames.last_mut(),
        };
        if let Some(frame) = frame {
            frame.insert(name.to_string(), binding);
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(binding) = self.frames.iter().rev().find_map(|frame| frame.get(name)) {
            return Some(binding.value.clone());
        }
        if let Some(value) = self.scope.values.get(name) {
            return Some(value.clone());
        }
        if let Some(value) = self.scope.locals.get(name) {
            return Some(value.clone());
        }
        (name == "locals").then(|| Value::Object(self.scope.values.clone()))
    }

    /// 赋值给最近的同名绑定，没有时在模板顶层新建
    fn assign(&mut self, name: &str, value: Value) -> Result<(), RuntimeError> {
        if let Some(binding) = self.frames.iter_mut().rev().find_map(|frame| frame.get_mut(name)) {
            if binding.constant {
                return Err(RuntimeError::Type(format!("不能给常量 {name} 重新赋值")));
            }
            binding.value = value;
            return Ok(());
        }
        self.declare(DeclKind::Var, name, value);
        Ok(())
    }

    // ---- 表达式 ----

    fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match expr {
            Expr::Value(value) => Ok(value.clone()),
            Expr::Ident(name) => self.lookup(name).ok_or_else(|| RuntimeError::Undefined(name.clone())),
            Expr::This => Ok(self.scope.this.clone()),
            Expr::Array(items) => Ok(Value::Array(self.eval_all(items)?)),
            Expr::Object(fields) => {
                let mut map = Map::new();
                for (key, expr) in fields {
                    let value = self.eval(expr)?;
                    map.insert(key.clone(), value);
                }
                Ok(Value::Object(map))
            }
            Expr::Member { object, property } => {
                let target = self.eval(object)?;
                let key = self.eval(property)?;
                value::property(&target, &key).ok_or_else(|| RuntimeError::NullProperty {
                    target: describe(&target),
                    property: display(&key),
                })
            }
            Expr::Filter { name, args } => {
                let mut args = self.eval_all(args)?;
                let input = if args.is_empty() { Value::Null } else { args.remove(0) };
                self.scope.filters.invoke(name, &input, &args)
            }
            Expr::Call { name, args } => {
                let args = self.eval_all(args)?;
                if name == "escape" && !self.scope.functions.contains(name) {
                    let value = args.first().unwrap_or(&Value::Null);
                    return Ok(Value::String((self.scope.escape)(value)));
                }
                self.scope.functions.invoke(name, &args)
            }
            Expr::Method { object, name, args } => {
                let target = self.eval(object)?;
                if let [Expr::Function { params, body }] = args.as_slice() {
                    return self.call_with_callback(&target, name, params, body);
                }
                let args = self.eval_all(args)?;
                call_method(&target, name, &args)
            }
            Expr::Unary { op, operand } => {
                if *op == UnaryOp::TypeOf {
                    if let Expr::Ident(name) = operand.as_ref() {
                        return Ok(Value::String(
                            self.lookup(name).map_or("undefined", |v| value::type_of(&v)).to_string(),
                        ));
                    }
                    return Ok(Value::String(value::type_of(&self.eval(operand)?).to_string()));
                }
                let value = self.eval(operand)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!truthy(&value)),
                    UnaryOp::Neg => number(-to_number(&value)),
                    UnaryOp::Plus | UnaryOp::TypeOf => number(to_number(&value)),
                })
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            Expr::Logical { and, left, right } => {
                let left = self.eval(left)?;
                if truthy(&left) == *and { self.eval(right) } else { Ok(left) }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if truthy(&self.eval(test)?) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Assign { name, op, value } => {
                let rhs = self.eval(value)?;
                let value = match op {
                    None => rhs,
                    Some(op) => {
                        let current = self.lookup(name).ok_or_else(|| RuntimeError::Undefined(name.clone()))?;
                        binary(*op, &current, &rhs)
                    }
                };
                self.assign(name, value.clone())?;
                Ok(value)
            }
            Expr::Update {
                name,
                increment,
                prefix,
            } => {
                let current = self.lookup(name).ok_or_else(|| RuntimeError::Undefined(name.clone()))?;
                let old = to_number(&current);
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.assign(name, number(new))?;
                Ok(number(if *prefix { new } else { old }))
            }
            Expr::Function { .. } => Err(RuntimeError::Type("函数只能作为数组方法的回调".into())),
        }
    }

    /// 数组的回调方法，回调依次收到 (元素, 下标, 数组)
    fn call_with_callback(
        &mut self,
        target: &Value,
        name: &str,
        params: &[String],
        body: &[Stmt],
    ) -> Result<Value, RuntimeError> {
        let items = match target {
            Value::Array(items) if matches!(name, "forEach" | "map" | "filter" | "some" | "every" | "find") => items,
            Value::Null => {
                return Err(RuntimeError::NullProperty {
                    target: "null".into(),
                    property: name.to_string(),
                });
            }
            _ => return Err(RuntimeError::NotAFunction(format!("{}.{name}", describe(target)))),
        };

        let mut kept = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let whole = if params.len() > 2 { target.clone() } else { Value::Null };
            let result = self.invoke(params, body, [item.clone(), Value::from(index), whole])?;
            match name {
                "map" => kept.push(result),
                "filter" if truthy(&result) => kept.push(item.clone()),
                "some" if truthy(&result) => return Ok(Value::Bool(true)),
                "every" if !truthy(&result) => return Ok(Value::Bool(false)),
                "find" if truthy(&result) => return Ok(item.clone()),
                _ => {}
            }
        }
        Ok(match name {
            "map" | "filter" => Value::Array(kept),
            "some" => Value::Bool(false),
            "every" => Value::Bool(true),
            _ => Value::Null,
        })
    }

    fn invoke(&mut self, params: &[String], body: &[Stmt], args: [Value; 3]) -> Result<Value, RuntimeError> {
        let line = self.cursor.line;
        let result = self.scoped(|this| {
            for (param, arg) in params.iter().zip(args) {
                this.declare(DeclKind::Let, param, arg);
            }
            Ok(match this.run(body)? {
                Flow::Return(value) => value,
                _ => Value::Null,
            })
        })?;
        self.cursor.line = line;
        Ok(result)
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        exprs.iter().map(|expr| self.eval(expr)).collect()
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    let ordered = |accept: fn(Ordering) -> bool| Value::Bool(value::compare(left, right).is_some_and(accept));
    match op {
        BinaryOp::Add => value::add(left, right),
        BinaryOp::Sub => number(to_number(left) - to_number(right)),
        BinaryOp::Mul => number(to_number(left) * to_number(right)),
        BinaryOp::Div => number(to_number(left) / to_number(right)),
        BinaryOp::Rem => number(to_number(left) % to_number(right)),
        BinaryOp::Eq => Value::Bool(value::loose_eq(left, right)),
        BinaryOp::NotEq => Value::Bool(!value::loose_eq(left, right)),
        BinaryOp::StrictEq => Value::Bool(value::strict_eq(left, right)),
        BinaryOp::StrictNotEq => Value::Bool(!value::strict_eq(left, right)),
        BinaryOp::Lt => ordered(Ordering::is_lt),
        BinaryOp::Le => ordered(Ordering::is_le),
        BinaryOp::Gt => ordered(Ordering::is_gt),
        BinaryOp::Ge => ordered(Ordering::is_ge),
    }
}

/// 错误信息里对值的简短描述
fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => format!("{s:?}"),
        Value::Array(_) => "数组".to_string(),
        Value::Object(_) => "对象".to_string(),
        other => display(other),
    }
}

/// 负数从末尾计，结果限制在 [0, len]
fn relative_index(index: Option<&Value>, len: usize, default: usize) -> usize {
    let Some(index) = index.filter(|v| !v.is_null()) else {
        return default;
    };
    let n = to_number(index);
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        (n as usize).min(len)
    }
}

fn call_method(target: &Value, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let arg = |i: usize| args.get(i).unwrap_or(&Value::Null);
    let not_a_function = || RuntimeError::NotAFunction(format!("{}.{name}", describe(target)));

    if name == "toString" {
        return Ok(Value::String(display(target)));
    }

    match target {
        Value::Null => Err(RuntimeError::NullProperty {
            target: "null".into(),
            property: name.to_string(),
        }),
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(match name {
                "toUpperCase" => Value::String(s.to_uppercase()),
                "toLowerCase" => Value::String(s.to_lowercase()),
                "trim" => Value::String(s.trim().to_string()),
                "includes" => Value::Bool(s.contains(&display(arg(0)))),
                "startsWith" => Value::Bool(s.starts_with(&display(arg(0)))),
                "endsWith" => Value::Bool(s.ends_with(&display(arg(0)))),
                "indexOf" => {
                    let needle = display(arg(0));
                    match s.find(&needle) {
                        Some(byte) => Value::from(s[..byte].chars().count()),
                        None => Value::from(-1),
                    }
                }
                "charAt" => {
                    let i = to_number(arg(0));
                    let i = if i.is_nan() { 0.0 } else { i };
                    let c = (i >= 0.0).then(|| chars.get(i as usize)).flatten();
                    Value::String(c.map(char::to_string).unwrap_or_default())
                }
                "slice" => {
                    let start = relative_index(args.first(), chars.len(), 0);
                    let end = relative_index(args.get(1), chars.len(), chars.len());
                    Value::String(if start < end { chars[start..end].iter().collect() } else { String::new() })
                }
                "split" => match args.first().filter(|v| !v.is_null()) {
                    None => Value::Array(vec![Value::String(s.clone())]),
                    Some(sep) => {
                        let sep = display(sep);
                        if sep.is_empty() {
                            Value::Array(chars.iter().map(|c| Value::String(c.to_string())).collect())
                        } else {
                            Value::Array(s.split(sep.as_str()).map(|p| Value::String(p.to_string())).collect())
                        }
                    }
                },
                "replace" => Value::String(s.replacen(&display(arg(0)), &display(arg(1)), 1)),
                "concat" => Value::String(args.iter().fold(s.clone(), |acc, a| acc + &display(a))),
                _ => return Err(not_a_function()),
            })
        }
        Value::Array(items) => Ok(match name {
            "includes" => Value::Bool(items.iter().any(|item| value::strict_eq(item, arg(0)))),
            "indexOf" => match items.iter().position(|item| value::strict_eq(item, arg(0))) {
                Some(i) => Value::from(i),
                None => Value::from(-1),
            },
            "join" => {
                let sep = match args.first() {
                    None | Some(Value::Null) => ",".to_string(),
                    Some(sep) => display(sep),
                };
                Value::String(items.iter().map(display).collect::<Vec<_>>().join(&sep))
            }
            "slice" => {
                let start = relative_index(args.first(), items.len(), 0);
                let end = relative_index(args.get(1), items.len(), items.len());
                Value::Array(if start < end { items[start..end].to_vec() } else { Vec::new() })
            }
            "concat" => {
                let mut joined = items.clone();
                for a in args {
                    match a {
                        Value::Array(more) => joined.extend(more.iter().cloned()),
                        other => joined.push(other.clone()),
                    }
                }
                Value::Array(joined)
            }
            _ => return Err(not_a_function()),
        }),
        Value::Number(n) if name == "toFixed" => {
            let digits = to_number(arg(0));
            let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 100.0) as usize };
            Ok(Value::String(format!("{:.*}", digits, n.as_f64().unwrap_or(f64::NAN))))
        }
        Value::Object(map) if name == "hasOwnProperty" => Ok(Value::Bool(map.contains_key(&display(arg(0))))),
        _ => Err(not_a_function()),
    }
}
