use std::env::args;
use std::fs;
use std::io::{self, Write};
use std::process::exit;

use lox::InterpretResult;

fn main() {
    env_logger::init();
    match args().nth(1) {
        None => run_prompt(),
        Some(path) => run_file(&path),
    }
}

fn run_file(path: &str) {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("lox: {}: {}", path, error);
            exit(74);
        }
    };
    let mut stdout = io::stdout();
    match lox::interpret(&source, &mut stdout) {
        InterpretResult::Ok => exit(0),
        InterpretResult::CompileError => exit(65),
        InterpretResult::RuntimeError => exit(70),
    }
}

/// The prompt keeps one interpreter alive, so globals persist across lines.
fn run_prompt() {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut vm = lox::Vm::new();
    loop {
        print!("[In]: ");
        let _ = stdout.flush();

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => exit(0),
            Ok(_) => {}
        }
        if line.trim().is_empty() {
            continue;
        }
        match lox::compile(&line) {
            Ok(script) => {
                if let Err(error) = vm.run(script, &mut stdout) {
                    eprintln!("{}", error);
                }
            }
            Err(errors) => {
                for error in errors {
                    eprintln!("{}", error);
                }
            }
        }
    }
}
