mod chunk;
mod compiler;
mod error;
mod natives;
mod scanner;
mod scope;
mod token;
mod value;
mod vm;

use std::io::Write;

pub use chunk::{Chunk, Instr, UpvalueDesc};
pub use compiler::{compile, compile_with};
pub use error::{Error, ErrorKind, Result};
pub use scanner::{EagerScanner, LazyScanner, Scanner};
pub use token::{Token, TokenKind};
pub use value::{
    BoundMethod, Class, Closure, Function, Instance, NativeFn, NativeFunction, Upvalue, Value,
};
pub use vm::Vm;

/// What a source submission came to, for the driver's exit status.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
}

/// Compiles and runs one source submission. Errors print to stderr; `print`
/// output goes to `out`.
pub fn interpret(source: &str, out: &mut impl Write) -> InterpretResult {
    let script = match compile(source) {
        Ok(script) => script,
        Err(errors) => {
            for error in errors {
                eprintln!("{}", error);
            }
            return InterpretResult::CompileError;
        }
    };
    match Vm::new().run(script, out) {
        Ok(()) => InterpretResult::Ok,
        Err(error) => {
            eprintln!("{}", error);
            InterpretResult::RuntimeError
        }
    }
}
