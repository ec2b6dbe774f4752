use crate::config::Options;
use crate::template::codegen;
use crate::template::error::{self, EjsError};
use crate::template::escape::{Escaper, html_escaper};
use crate::template::eval::{self, Scope, SourceCursor};
use crate::template::filters::{FilterRegistry, FunctionRegistry};
use crate::template::parser::{self, Stmt};
use crate::template::scanner::{self, ProcedureBody};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// 编译产物共享的协作者：过滤器表、函数表与转义函数
#[derive(Clone)]
pub struct Environment {
    pub filters: Arc<FilterRegistry>,
    pub functions: Arc<FunctionRegistry>,
    pub escape: Escaper,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            filters: Arc::new(FilterRegistry::with_builtins()),
            functions: Arc::new(FunctionRegistry::new()),
            escape: html_escaper(),
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("filters", &self.filters)
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

/// 编译后的模板，创建后不可变，克隆开销很小
#[derive(Clone)]
pub struct Template {
    inner: Arc<Compiled>,
}

struct Compiled {
    program: Vec<Stmt>,
    source: Arc<str>,
    filename: Option<String>,
    body: ProcedureBody,
    env: Environment,
}

impl Template {
    /// 以 [`Options::values`] 为值对象、`locals` 为后备、`scope` 为 `this` 渲染
    pub fn render(&self, options: &Options) -> Result<String, EjsError> {
        self.render_with(&options.values(), &options.locals, &options.scope)
    }

    pub fn render_with(
        &self,
        values: &Map<String, Value>,
        locals: &Map<String, Value>,
        this: &Value,
    ) -> Result<String, EjsError> {
        let compiled = &self.inner;
        let scope = Scope {
            values,
            locals,
            this,
            filters: &compiled.env.filters,
            functions: &compiled.env.functions,
            escape: &compiled.env.escape,
        };
        let mut cursor = SourceCursor::new(compiled.source.clone(), compiled.filename.clone());
        eval::execute(&compiled.program, &scope, &mut cursor)
            .map_err(|cause| error::rethrow(cause, &cursor.source, cursor.filename.as_deref(), cursor.line))
    }

    pub fn filename(&self) -> Option<&str> {
        self.inner.filename.as_deref()
    }

    /// 编译前的原始源码
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// 扫描得到的中间过程体
    pub fn body(&self) -> &ProcedureBody {
        &self.inner.body
    }

    pub fn ptr_eq(&self, other: &Template) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("filename", &self.inner.filename)
            .field("segments", &self.inner.body.segments.len())
            .finish()
    }
}

/// 编译模板源码：扫描、构建语句树，并绑定源码、文件名与协作者
pub fn compile(source: &str, options: &Options, env: &Environment) -> Result<Template, EjsError> {
    let filename = options.filename.as_deref();
    let body = scanner::parse(source, options)?;
    if options.debug {
        info!(filename = filename.unwrap_or("ejs"), "中间过程体：\n{}", codegen::generate(&body));
    }
    let program = parser::build(&body)
        .map_err(|e| EjsError::syntax(filename, e.line, e.message, source))?;
    debug!(
        filename = filename.unwrap_or("ejs"),
        segments = body.segments.len(),
        "模板编译完成"
    );

    Ok(Template {
        inner: Arc::new(Compiled {
            program,
            source: Arc::from(source),
            filename: options.filename.clone(),
            body,
            env: env.clone(),
        }),
    })
}
