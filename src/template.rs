pub mod codegen;
pub mod compiler;
pub mod error;
pub mod escape;
pub mod eval;
pub mod filters;
pub mod lexer;
pub mod parser;
pub mod scanner;
pub mod value;

pub use compiler::{Environment, Template, compile};
pub use error::{EjsError, RuntimeError};
pub use scanner::{ProcedureBody, Segment, parse};
