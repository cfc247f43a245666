//! The single-pass compiler: a Pratt parser that emits bytecode while it
//! parses, resolving local, upvalue and global bindings as it goes.

use std::rc::Rc;

use log::debug;

use crate::chunk::{Chunk, Instr, UpvalueDesc};
use crate::error::{Error, ErrorKind, Result};
use crate::scanner::{LazyScanner, Scanner};
use crate::scope::Scope;
use crate::token::{Token, TokenKind};
use crate::value::{Closure, Function, Value};

/// A closure can capture at most 255 variables.
const MAX_UPVALUES: usize = u8::MAX as usize;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool) -> Result<()>;

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

/// The prefix/infix rule and binding power for each token kind.
fn rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use TokenKind::*;
    fn make<'a>(
        prefix: Option<ParseFn<'a>>,
        infix: Option<ParseFn<'a>>,
        precedence: Precedence,
    ) -> ParseRule<'a> {
        ParseRule {
            prefix,
            infix,
            precedence,
        }
    }
    match kind {
        LeftParen => make(Some(Compiler::grouping), Some(Compiler::call), Precedence::Call),
        Dot => make(None, Some(Compiler::dot), Precedence::Call),
        Minus => make(Some(Compiler::unary), Some(Compiler::binary), Precedence::Term),
        Plus => make(None, Some(Compiler::binary), Precedence::Term),
        Slash | Star => make(None, Some(Compiler::binary), Precedence::Factor),
        Bang => make(Some(Compiler::unary), None, Precedence::None),
        BangEqual | EqualEqual => make(None, Some(Compiler::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            make(None, Some(Compiler::binary), Precedence::Comparison)
        }
        Identifier => make(Some(Compiler::variable), None, Precedence::None),
        Str => make(Some(Compiler::string), None, Precedence::None),
        Number => make(Some(Compiler::number), None, Precedence::None),
        And => make(None, Some(Compiler::and_), Precedence::And),
        Or => make(None, Some(Compiler::or_), Precedence::Or),
        True | False | Nil => make(Some(Compiler::literal), None, Precedence::None),
        This => make(Some(Compiler::this_), None, Precedence::None),
        Super => make(Some(Compiler::super_), None, Precedence::None),
        _ => make(None, None, Precedence::None),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// Compile state for one function being emitted.
struct FnCtx {
    chunk: Chunk,
    scope: Scope,
    kind: FunctionKind,
    name: String,
    arity: u8,
}

struct ClassCtx {
    has_superclass: bool,
}

pub struct Compiler<'src> {
    scanner: Box<dyn Scanner + 'src>,
    /// Innermost function last; the script context is always at the bottom.
    ctxs: Vec<FnCtx>,
    classes: Vec<ClassCtx>,
    errors: Vec<Error>,
}

/// Compiles `source` into the closure for the top-level script. On failure
/// every error found before recovery gave up is returned.
pub fn compile(source: &str) -> std::result::Result<Rc<Closure>, Vec<Error>> {
    let scanner = LazyScanner::new(source).map_err(|e| vec![e])?;
    compile_with(Box::new(scanner))
}

/// Like [`compile`], for callers that pick the scanner implementation.
pub fn compile_with(scanner: Box<dyn Scanner + '_>) -> std::result::Result<Rc<Closure>, Vec<Error>> {
    Compiler::new(scanner).run()
}

impl<'src> Compiler<'src> {
    fn new(scanner: Box<dyn Scanner + 'src>) -> Self {
        Compiler {
            scanner,
            ctxs: vec![FnCtx {
                chunk: Chunk::default(),
                scope: Scope::new(""),
                kind: FunctionKind::Script,
                name: "<script>".to_string(),
                arity: 0,
            }],
            classes: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> std::result::Result<Rc<Closure>, Vec<Error>> {
        while !self.scanner.is_at_end() {
            if let Err(error) = self.declaration() {
                self.errors.push(error);
                self.scanner.synchronize();
            }
        }
        let line = self.scanner.current().line;
        self.emit_implicit_return(line);

        if !self.errors.is_empty() {
            return Err(self.errors);
        }
        let ctx = self.ctxs.pop().expect("script context");
        debug!("compiled <script>: {:?}", ctx.chunk.code);
        let function = Rc::new(Function {
            arity: 0,
            name: ctx.name,
            chunk: ctx.chunk,
        });
        Ok(Rc::new(Closure {
            function,
            upvalues: Vec::new(),
        }))
    }

    // Emission helpers

    fn ctx(&mut self) -> &mut FnCtx {
        self.ctxs.last_mut().expect("a function context is always active")
    }

    fn chunk(&mut self) -> &mut Chunk {
        &mut self.ctx().chunk
    }

    fn scope_depth(&self) -> u32 {
        self.ctxs
            .last()
            .expect("a function context is always active")
            .scope
            .depth()
    }

    fn emit(&mut self, instr: Instr) {
        let line = self.scanner.previous().line;
        self.chunk().push(instr, line);
    }

    fn emit_at(&mut self, instr: Instr, line: u32) {
        self.chunk().push(instr, line);
    }

    fn make_constant(&mut self, value: Value) -> Result<u8> {
        let line = self.scanner.previous().line;
        self.chunk().add_constant(value, line)
    }

    fn emit_constant(&mut self, value: Value) -> Result<()> {
        let index = self.make_constant(value)?;
        self.emit(Instr::Constant(index));
        Ok(())
    }

    fn identifier_constant(&mut self, name: &str) -> Result<u8> {
        self.make_constant(Value::string(name))
    }

    /// Emits a placeholder jump and returns its offset for patching.
    fn emit_jump(&mut self, instr: Instr) -> usize {
        self.emit(instr);
        self.chunk().code.len() - 1
    }

    /// Points the jump at `at` to the next instruction to be emitted.
    fn patch_jump(&mut self, at: usize) -> Result<()> {
        let distance = self.chunk().code.len() - at - 1;
        if distance > u16::MAX as usize {
            return Err(self.error_at_previous(ErrorKind::JumpTooLarge));
        }
        let code = &mut self.chunk().code;
        code[at] = match code[at] {
            Instr::Jump(_) => Instr::Jump(distance as u16),
            Instr::JumpIfFalse(_) => Instr::JumpIfFalse(distance as u16),
            other => unreachable!("patching a non-jump instruction {:?}", other),
        };
        Ok(())
    }

    /// Emits a backwards jump to `start`.
    fn emit_loop(&mut self, start: usize) -> Result<()> {
        let distance = self.chunk().code.len() + 1 - start;
        if distance > u16::MAX as usize {
            return Err(self.error_at_previous(ErrorKind::JumpTooLarge));
        }
        self.emit(Instr::Loop(distance as u16));
        Ok(())
    }

    /// The return every body ends on: initializers give back `this`,
    /// everything else `nil`.
    fn emit_return(&mut self, line: u32) {
        if self.ctx().kind == FunctionKind::Initializer {
            self.emit_at(Instr::GetLocal(0), line);
        } else {
            self.emit_at(Instr::Nil, line);
        }
        self.emit_at(Instr::Return, line);
    }

    fn emit_implicit_return(&mut self, line: u32) {
        if let Some(Instr::Return) = self.chunk().code.last() {
            return;
        }
        self.emit_return(line);
    }

    fn error_at_previous(&self, kind: ErrorKind) -> Error {
        let token = self.scanner.previous();
        Error::with_lexeme(kind, token.line, &token.lexeme)
    }

    fn error_at_current(&self, kind: ErrorKind) -> Error {
        let token = self.scanner.current();
        Error::with_lexeme(kind, token.line, &token.lexeme)
    }

    // Declarations

    fn declaration(&mut self) -> Result<()> {
        if self.scanner.matches(TokenKind::Class)? {
            self.class_declaration()
        } else if self.scanner.matches(TokenKind::Fun)? {
            self.fun_declaration()
        } else if self.scanner.matches(TokenKind::Var)? {
            self.var_declaration()
        } else {
            self.statement()
        }
    }

    fn var_declaration(&mut self) -> Result<()> {
        let name = self
            .scanner
            .consume(TokenKind::Identifier, "Expect variable name.")?;
        self.declare_variable(&name)?;
        if self.scanner.matches(TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.emit(Instr::Nil);
        }
        self.scanner
            .consume(TokenKind::Semicolon, "Expect ';' after variable declaration.")?;
        self.define_variable(&name)
    }

    fn fun_declaration(&mut self) -> Result<()> {
        let name = self
            .scanner
            .consume(TokenKind::Identifier, "Expect function name.")?;
        self.declare_variable(&name)?;
        if self.scope_depth() > 0 {
            // Initialized before the body so the function can recurse.
            self.ctx().scope.mark_initialized();
        }
        self.function(FunctionKind::Function, &name.lexeme)?;
        self.define_variable(&name)
    }

    fn class_declaration(&mut self) -> Result<()> {
        let name = self
            .scanner
            .consume(TokenKind::Identifier, "Expect class name.")?;
        let name_index = self.identifier_constant(&name.lexeme)?;
        self.declare_variable(&name)?;
        self.emit_at(Instr::Class(name_index), name.line);
        self.define_variable(&name)?;

        self.classes.push(ClassCtx {
            has_superclass: false,
        });
        let body = self.class_body(&name);
        self.classes.pop();
        body
    }

    fn class_body(&mut self, name: &Token) -> Result<()> {
        if self.scanner.matches(TokenKind::Less)? {
            let superclass = self
                .scanner
                .consume(TokenKind::Identifier, "Expect superclass name.")?;
            if superclass.lexeme == name.lexeme {
                return Err(Error::with_lexeme(
                    ErrorKind::SelfInheritance,
                    superclass.line,
                    &superclass.lexeme,
                ));
            }
            self.named_variable(&superclass, false)?;

            // `super` lives in its own scope so methods capture it like any
            // other variable.
            self.ctx().scope.begin();
            self.ctx().scope.declare("super", superclass.line)?;
            self.ctx().scope.mark_initialized();

            self.named_variable(name, false)?;
            self.emit(Instr::Inherit);
            self.classes
                .last_mut()
                .expect("class context pushed by class_declaration")
                .has_superclass = true;
        }

        self.named_variable(name, false)?;
        self.scanner
            .consume(TokenKind::LeftBrace, "Expect '{' before class body.")?;
        while !self.scanner.check(TokenKind::RightBrace) && !self.scanner.is_at_end() {
            self.method()?;
        }
        self.scanner
            .consume(TokenKind::RightBrace, "Expect '}' after class body.")?;
        self.emit(Instr::Pop);

        let has_superclass = self
            .classes
            .last()
            .expect("class context pushed by class_declaration")
            .has_superclass;
        if has_superclass {
            self.end_scope();
        }
        Ok(())
    }

    fn method(&mut self) -> Result<()> {
        let name = self
            .scanner
            .consume(TokenKind::Identifier, "Expect method name.")?;
        let name_index = self.identifier_constant(&name.lexeme)?;
        let kind = if name.lexeme == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind, &name.lexeme)?;
        self.emit_at(Instr::Method(name_index), name.line);
        Ok(())
    }

    /// Compiles a parameter list and body into a fresh function context,
    /// then emits the `Closure` instruction referencing the finished
    /// function.
    fn function(&mut self, kind: FunctionKind, name: &str) -> Result<()> {
        let reserved = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            _ => "",
        };
        self.ctxs.push(FnCtx {
            chunk: Chunk::default(),
            scope: Scope::new(reserved),
            kind,
            name: name.to_string(),
            arity: 0,
        });
        self.ctx().scope.begin();

        // Pop the context even if the body fails, so recovery continues in
        // the enclosing function.
        let body = self.function_body();
        let ctx = self.ctxs.pop().expect("function context pushed above");
        body?;

        debug!("compiled fn {}: {:?}", ctx.name, ctx.chunk.code);
        let function = Rc::new(Function {
            arity: ctx.arity,
            name: ctx.name,
            chunk: ctx.chunk,
        });
        let index = self.make_constant(Value::Function(function))?;
        self.emit(Instr::Closure(index));
        Ok(())
    }

    fn function_body(&mut self) -> Result<()> {
        self.scanner
            .consume(TokenKind::LeftParen, "Expect '(' after function name.")?;
        if !self.scanner.check(TokenKind::RightParen) {
            loop {
                if self.ctx().arity == u8::MAX {
                    return Err(self.error_at_current(ErrorKind::TooManyParams));
                }
                self.ctx().arity += 1;
                let param = self
                    .scanner
                    .consume(TokenKind::Identifier, "Expect parameter name.")?;
                self.ctx().scope.declare(&param.lexeme, param.line)?;
                self.ctx().scope.mark_initialized();
                if !self.scanner.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.scanner
            .consume(TokenKind::RightParen, "Expect ')' after parameters.")?;
        self.scanner
            .consume(TokenKind::LeftBrace, "Expect '{' before function body.")?;
        while !self.scanner.check(TokenKind::RightBrace) && !self.scanner.is_at_end() {
            self.declaration()?;
        }
        let brace = self
            .scanner
            .consume(TokenKind::RightBrace, "Expect '}' after function body.")?;
        self.emit_implicit_return(brace.line);
        Ok(())
    }

    fn declare_variable(&mut self, name: &Token) -> Result<()> {
        if self.scope_depth() > 0 {
            self.ctx().scope.declare(&name.lexeme, name.line)?;
        }
        Ok(())
    }

    fn define_variable(&mut self, name: &Token) -> Result<()> {
        if self.scope_depth() > 0 {
            self.ctx().scope.mark_initialized();
            return Ok(());
        }
        let index = self.identifier_constant(&name.lexeme)?;
        self.emit_at(Instr::DefineGlobal(index), name.line);
        Ok(())
    }

    // Statements

    fn statement(&mut self) -> Result<()> {
        if self.scanner.matches(TokenKind::Print)? {
            self.print_statement()
        } else if self.scanner.matches(TokenKind::Return)? {
            self.return_statement()
        } else if self.scanner.matches(TokenKind::While)? {
            self.while_statement()
        } else if self.scanner.matches(TokenKind::For)? {
            self.for_statement()
        } else if self.scanner.matches(TokenKind::If)? {
            self.if_statement()
        } else if self.scanner.matches(TokenKind::LeftBrace)? {
            self.ctx().scope.begin();
            let body = self.block();
            self.end_scope();
            body
        } else {
            self.expression_statement()
        }
    }

    fn block(&mut self) -> Result<()> {
        while !self.scanner.check(TokenKind::RightBrace) && !self.scanner.is_at_end() {
            self.declaration()?;
        }
        self.scanner
            .consume(TokenKind::RightBrace, "Expect '}' after block.")?;
        Ok(())
    }

    /// Closes the current scope, popping plain locals and closing captured
    /// ones.
    fn end_scope(&mut self) {
        let leaving = self.ctx().scope.end();
        for local in leaving {
            if local.captured {
                self.emit(Instr::CloseUpvalue);
            } else {
                self.emit(Instr::Pop);
            }
        }
    }

    fn print_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.emit(Instr::Print);
        self.emit(Instr::Pop);
        self.scanner
            .consume(TokenKind::Semicolon, "Expect ';' after statement.")?;
        Ok(())
    }

    fn expression_statement(&mut self) -> Result<()> {
        self.expression()?;
        self.emit(Instr::Pop);
        self.scanner
            .consume(TokenKind::Semicolon, "Expect ';' after expression.")?;
        Ok(())
    }

    /// A `return` at the top level is legal and behaves like the end of the
    /// script.
    fn return_statement(&mut self) -> Result<()> {
        if self.scanner.matches(TokenKind::Semicolon)? {
            let line = self.scanner.previous().line;
            self.emit_return(line);
            return Ok(());
        }
        if self.ctx().kind == FunctionKind::Initializer {
            return Err(self.error_at_previous(ErrorKind::ReturnFromInitializer));
        }
        self.expression()?;
        self.scanner
            .consume(TokenKind::Semicolon, "Expect ';' after return value.")?;
        self.emit(Instr::Return);
        Ok(())
    }

    fn if_statement(&mut self) -> Result<()> {
        self.scanner
            .consume(TokenKind::LeftParen, "Expect '(' after 'if'.")?;
        self.expression()?;
        self.scanner
            .consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let then_jump = self.emit_jump(Instr::JumpIfFalse(u16::MAX));
        self.emit(Instr::Pop);
        self.statement()?;
        let else_jump = self.emit_jump(Instr::Jump(u16::MAX));
        self.patch_jump(then_jump)?;
        self.emit(Instr::Pop);
        if self.scanner.matches(TokenKind::Else)? {
            self.statement()?;
        }
        self.patch_jump(else_jump)
    }

    fn while_statement(&mut self) -> Result<()> {
        let loop_start = self.chunk().code.len();
        self.scanner
            .consume(TokenKind::LeftParen, "Expect '(' after 'while'.")?;
        self.expression()?;
        self.scanner
            .consume(TokenKind::RightParen, "Expect ')' after condition.")?;

        let exit_jump = self.emit_jump(Instr::JumpIfFalse(u16::MAX));
        self.emit(Instr::Pop);
        self.statement()?;
        self.emit_loop(loop_start)?;
        self.patch_jump(exit_jump)?;
        self.emit(Instr::Pop);
        Ok(())
    }

    fn for_statement(&mut self) -> Result<()> {
        self.ctx().scope.begin();
        let body = self.for_loop();
        self.end_scope();
        body
    }

    fn for_loop(&mut self) -> Result<()> {
        self.scanner
            .consume(TokenKind::LeftParen, "Expect '(' after 'for'.")?;

        if self.scanner.matches(TokenKind::Semicolon)? {
            // No initializer.
        } else if self.scanner.matches(TokenKind::Var)? {
            self.var_declaration()?;
        } else {
            self.expression_statement()?;
        }

        let mut loop_start = self.chunk().code.len();

        let mut exit_jump = None;
        if !self.scanner.matches(TokenKind::Semicolon)? {
            self.expression()?;
            self.scanner
                .consume(TokenKind::Semicolon, "Expect ';' after loop condition.")?;
            exit_jump = Some(self.emit_jump(Instr::JumpIfFalse(u16::MAX)));
            self.emit(Instr::Pop);
        }

        // The increment runs after the body, so it is emitted first and
        // jumped over, with a trampoline back to the condition.
        if !self.scanner.matches(TokenKind::RightParen)? {
            let body_jump = self.emit_jump(Instr::Jump(u16::MAX));
            let increment_start = self.chunk().code.len();
            self.expression()?;
            self.emit(Instr::Pop);
            self.scanner
                .consume(TokenKind::RightParen, "Expect ')' after for clauses.")?;
            self.emit_loop(loop_start)?;
            loop_start = increment_start;
            self.patch_jump(body_jump)?;
        }

        self.statement()?;
        self.emit_loop(loop_start)?;

        if let Some(exit) = exit_jump {
            self.patch_jump(exit)?;
            self.emit(Instr::Pop);
        }
        Ok(())
    }

    // Expressions

    fn expression(&mut self) -> Result<()> {
        self.parse_precedence(Precedence::Assignment)
    }

    fn parse_precedence(&mut self, precedence: Precedence) -> Result<()> {
        self.scanner.advance()?;
        let prefix = rule(self.scanner.previous().kind)
            .prefix
            .ok_or_else(|| self.error_at_previous(ErrorKind::ExpectedExpression))?;
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign)?;

        while precedence <= rule(self.scanner.current().kind).precedence {
            self.scanner.advance()?;
            match rule(self.scanner.previous().kind).infix {
                Some(infix) => infix(self, can_assign)?,
                None => return Err(self.error_at_previous(ErrorKind::ExpectedExpression)),
            }
        }

        if can_assign && self.scanner.matches(TokenKind::Equal)? {
            return Err(self.error_at_previous(ErrorKind::AssignmentToRValue));
        }
        Ok(())
    }

    fn grouping(&mut self, _can_assign: bool) -> Result<()> {
        self.expression()?;
        self.scanner
            .consume(TokenKind::RightParen, "Expect ')' after expression.")?;
        Ok(())
    }

    fn unary(&mut self, _can_assign: bool) -> Result<()> {
        let op = self.scanner.previous().clone();
        self.parse_precedence(Precedence::Unary)?;
        match op.kind {
            TokenKind::Minus => self.emit_at(Instr::Negate, op.line),
            TokenKind::Bang => self.emit_at(Instr::Not, op.line),
            _ => unreachable!("unary rule on {:?}", op.kind),
        }
        Ok(())
    }

    fn binary(&mut self, _can_assign: bool) -> Result<()> {
        let op = self.scanner.previous().clone();
        self.parse_precedence(rule(op.kind).precedence.next())?;
        let instr = match op.kind {
            TokenKind::Plus => Instr::Add,
            TokenKind::Minus => Instr::Subtract,
            TokenKind::Star => Instr::Multiply,
            TokenKind::Slash => Instr::Divide,
            TokenKind::EqualEqual => Instr::Equal,
            TokenKind::BangEqual => Instr::NotEqual,
            TokenKind::Greater => Instr::Greater,
            TokenKind::Less => Instr::Less,
            TokenKind::GreaterEqual => Instr::GreaterEqual,
            TokenKind::LessEqual => Instr::LessEqual,
            _ => unreachable!("binary rule on {:?}", op.kind),
        };
        self.emit_at(instr, op.line);
        Ok(())
    }

    fn number(&mut self, _can_assign: bool) -> Result<()> {
        // The scanner only produces digit sequences here.
        let number = self.scanner.previous().lexeme.parse::<f64>().unwrap();
        self.emit_constant(Value::Number(number))
    }

    fn string(&mut self, _can_assign: bool) -> Result<()> {
        let contents = self.scanner.previous().lexeme.clone();
        self.emit_constant(Value::string(contents))
    }

    fn literal(&mut self, _can_assign: bool) -> Result<()> {
        match self.scanner.previous().kind {
            TokenKind::False => self.emit(Instr::False),
            TokenKind::True => self.emit(Instr::True),
            TokenKind::Nil => self.emit(Instr::Nil),
            kind => unreachable!("literal rule on {:?}", kind),
        }
        Ok(())
    }

    fn variable(&mut self, can_assign: bool) -> Result<()> {
        let token = self.scanner.previous().clone();
        self.named_variable(&token, can_assign)
    }

    /// Resolves `name` as a local, then an upvalue, then a global, and emits
    /// the matching get or set.
    fn named_variable(&mut self, name: &Token, can_assign: bool) -> Result<()> {
        let (get, set) = if let Some(slot) = self.ctx().scope.find(&name.lexeme, name.line)? {
            (Instr::GetLocal(slot), Instr::SetLocal(slot))
        } else {
            let innermost = self.ctxs.len() - 1;
            if let Some(index) = self.resolve_upvalue(innermost, name)? {
                (Instr::GetUpvalue(index), Instr::SetUpvalue(index))
            } else {
                let index = self.identifier_constant(&name.lexeme)?;
                (Instr::GetGlobal(index), Instr::SetGlobal(index))
            }
        };

        if can_assign && self.scanner.matches(TokenKind::Equal)? {
            self.expression()?;
            self.emit_at(set, name.line);
        } else {
            self.emit_at(get, name.line);
        }
        Ok(())
    }

    /// Searches the enclosing compile contexts for `name`. A hit in an
    /// enclosing function's locals marks that local captured; deeper hits
    /// chain through the intermediate functions' upvalue lists.
    fn resolve_upvalue(&mut self, level: usize, name: &Token) -> Result<Option<u8>> {
        if level == 0 {
            return Ok(None);
        }
        let enclosing = level - 1;
        if let Some(slot) = self.ctxs[enclosing].scope.find(&name.lexeme, name.line)? {
            self.ctxs[enclosing].scope.capture(slot);
            return self.add_upvalue(level, slot, true, name).map(Some);
        }
        if let Some(index) = self.resolve_upvalue(enclosing, name)? {
            return self.add_upvalue(level, index, false, name).map(Some);
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, level: usize, index: u8, is_local: bool, name: &Token) -> Result<u8> {
        let upvalues = &mut self.ctxs[level].chunk.upvalues;
        for (i, existing) in upvalues.iter().enumerate() {
            if existing.index == index && existing.is_local == is_local {
                return Ok(i as u8);
            }
        }
        if upvalues.len() == MAX_UPVALUES {
            return Err(Error::with_lexeme(
                ErrorKind::TooManyUpvalues,
                name.line,
                &name.lexeme,
            ));
        }
        upvalues.push(UpvalueDesc { index, is_local });
        Ok((upvalues.len() - 1) as u8)
    }

    fn and_(&mut self, _can_assign: bool) -> Result<()> {
        let end_jump = self.emit_jump(Instr::JumpIfFalse(u16::MAX));
        self.emit(Instr::Pop);
        self.parse_precedence(Precedence::And)?;
        self.patch_jump(end_jump)
    }

    fn or_(&mut self, _can_assign: bool) -> Result<()> {
        let else_jump = self.emit_jump(Instr::JumpIfFalse(u16::MAX));
        let end_jump = self.emit_jump(Instr::Jump(u16::MAX));
        self.patch_jump(else_jump)?;
        self.emit(Instr::Pop);
        self.parse_precedence(Precedence::Or)?;
        self.patch_jump(end_jump)
    }

    fn call(&mut self, _can_assign: bool) -> Result<()> {
        let argc = self.argument_list()?;
        self.emit(Instr::Call(argc));
        Ok(())
    }

    fn argument_list(&mut self) -> Result<u8> {
        let mut count: u8 = 0;
        if !self.scanner.check(TokenKind::RightParen) {
            loop {
                self.expression()?;
                if count == u8::MAX {
                    return Err(self.error_at_current(ErrorKind::TooManyArgs));
                }
                count += 1;
                if !self.scanner.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        self.scanner
            .consume(TokenKind::RightParen, "Expect ')' after arguments.")?;
        Ok(count)
    }

    fn dot(&mut self, can_assign: bool) -> Result<()> {
        let name = self
            .scanner
            .consume(TokenKind::Identifier, "Expect property name after '.'.")?;
        let index = self.identifier_constant(&name.lexeme)?;

        if can_assign && self.scanner.matches(TokenKind::Equal)? {
            self.expression()?;
            self.emit_at(Instr::SetProperty(index), name.line);
        } else if self.scanner.matches(TokenKind::LeftParen)? {
            // Fuse property access and call.
            let argc = self.argument_list()?;
            self.emit_at(Instr::Invoke(index, argc), name.line);
        } else {
            self.emit_at(Instr::GetProperty(index), name.line);
        }
        Ok(())
    }

    fn this_(&mut self, _can_assign: bool) -> Result<()> {
        if self.classes.is_empty() {
            return Err(self.error_at_previous(ErrorKind::ThisOutsideClass));
        }
        let token = self.scanner.previous().clone();
        self.named_variable(&token, false)
    }

    fn super_(&mut self, _can_assign: bool) -> Result<()> {
        let keyword = self.scanner.previous().clone();
        match self.classes.last() {
            None => return Err(self.error_at_previous(ErrorKind::SuperOutsideSubclass)),
            Some(class) if !class.has_superclass => {
                return Err(self.error_at_previous(ErrorKind::SuperOutsideSubclass));
            }
            Some(_) => {}
        }

        self.scanner
            .consume(TokenKind::Dot, "Expect '.' after 'super'.")?;
        let method = self
            .scanner
            .consume(TokenKind::Identifier, "Expect superclass method name.")?;
        let index = self.identifier_constant(&method.lexeme)?;

        let this_token = Token::new(TokenKind::This, "this", keyword.line);
        let super_token = Token::new(TokenKind::Super, "super", keyword.line);
        self.named_variable(&this_token, false)?;
        if self.scanner.matches(TokenKind::LeftParen)? {
            let argc = self.argument_list()?;
            self.named_variable(&super_token, false)?;
            self.emit_at(Instr::SuperInvoke(index, argc), method.line);
        } else {
            self.named_variable(&super_token, false)?;
            self.emit_at(Instr::GetSuper(index), method.line);
        }
        Ok(())
    }
}
