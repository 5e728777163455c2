//! Lexer, object model and tree-walking evaluator for mython, a small
//! indentation-based scripting language with classes.

pub mod eval;
pub mod lex;
pub mod runtime;

pub use eval::{ArithmeticOp, Comparator, PrintTarget, Statement, VariableValue};
pub use lex::{LexError, Lexer, Token};
pub use runtime::{
    Class, ClassInstance, Closure, Context, DummyContext, Method, Object, ObjectHolder,
    RuntimeError, SimpleContext,
};
