pub mod ast;
pub mod boot;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod token;
