//! The bytecode interpreter: operand stack, call frames, globals, open
//! upvalues and the dispatch loop.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use log::trace;

use crate::chunk::Instr;
use crate::error::{Error, ErrorKind, Result};
use crate::natives;
use crate::value::{BoundMethod, Class, Closure, Instance, Upvalue, Value};

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * (u8::MAX as usize + 1);

/// An in-flight call: the closure being run, its next instruction, and the
/// stack slot holding the callee (slot 0 of the function's locals).
struct CallFrame {
    closure: Rc<Closure>,
    ip: usize,
    base: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    pub globals: HashMap<String, Value>,
    /// Open upvalues, sorted by stack index descending.
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        let mut globals = HashMap::new();
        natives::install(&mut globals);
        Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            globals,
            open_upvalues: Vec::new(),
        }
    }

    /// Runs a compiled script. `print` output goes to `out`. On a runtime
    /// error all frames and values are dropped before the error surfaces.
    pub fn run(&mut self, script: Rc<Closure>, out: &mut impl Write) -> Result<()> {
        self.push(Value::Closure(script.clone()))?;
        self.call_closure(script, 0)?;
        let result = self.dispatch(out);
        if result.is_err() {
            self.stack.clear();
            self.frames.clear();
            self.open_upvalues.clear();
        }
        result
    }

    fn dispatch(&mut self, out: &mut impl Write) -> Result<()> {
        loop {
            let (instr, offset) = {
                let frame = self.frames.last_mut().expect("dispatch without a frame");
                let offset = frame.ip;
                frame.ip += 1;
                (frame.closure.function.chunk.code[offset], offset)
            };
            trace!("{:04} {:?}", offset, instr);

            match instr {
                Instr::Constant(index) => {
                    let value = self.constant(index).clone();
                    self.push(value)?;
                }
                Instr::Nil => self.push(Value::Nil)?,
                Instr::True => self.push(Value::Bool(true))?,
                Instr::False => self.push(Value::Bool(false))?,
                Instr::Pop => {
                    self.pop();
                }

                Instr::GetLocal(slot) => {
                    let base = self.frame().base;
                    let value = self.stack[base + slot as usize].clone();
                    self.push(value)?;
                }
                Instr::SetLocal(slot) => {
                    let value = self.peek(0).clone();
                    let base = self.frame().base;
                    self.stack[base + slot as usize] = value;
                }

                Instr::GetGlobal(index) => self.instr_get_global(index)?,
                Instr::DefineGlobal(index) => self.instr_define_global(index)?,
                Instr::SetGlobal(index) => self.instr_set_global(index)?,

                Instr::GetUpvalue(slot) => {
                    let upvalue = self.frame().closure.upvalues[slot as usize].clone();
                    let value = match &*upvalue.borrow() {
                        Upvalue::Open(index) => self.stack[*index].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.push(value)?;
                }
                Instr::SetUpvalue(slot) => {
                    let value = self.peek(0).clone();
                    let upvalue = self.frame().closure.upvalues[slot as usize].clone();
                    let open_slot = match &*upvalue.borrow() {
                        Upvalue::Open(index) => Some(*index),
                        Upvalue::Closed(_) => None,
                    };
                    match open_slot {
                        Some(index) => self.stack[index] = value,
                        None => *upvalue.borrow_mut() = Upvalue::Closed(value),
                    }
                }
                Instr::CloseUpvalue => {
                    self.close_upvalues(self.stack.len() - 1);
                    self.pop();
                }

                Instr::GetProperty(index) => self.instr_get_property(index)?,
                Instr::SetProperty(index) => self.instr_set_property(index)?,

                Instr::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a == b))?;
                }
                Instr::NotEqual => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a != b))?;
                }
                Instr::Greater => self.binary_compare(|a, b| a > b)?,
                Instr::Less => self.binary_compare(|a, b| a < b)?,
                Instr::GreaterEqual => self.binary_compare(|a, b| a >= b)?,
                Instr::LessEqual => self.binary_compare(|a, b| a <= b)?,

                Instr::Add => self.instr_add()?,
                Instr::Subtract => self.binary_number(|a, b| a - b)?,
                Instr::Multiply => self.binary_number(|a, b| a * b)?,
                Instr::Divide => self.binary_number(|a, b| a / b)?,

                Instr::Not => {
                    let value = self.pop();
                    self.push(Value::Bool(value.is_falsey()))?;
                }
                Instr::Negate => {
                    let value = self.pop();
                    match value.as_number() {
                        Some(n) => self.push(Value::Number(-n))?,
                        None => {
                            return Err(
                                self.error(ErrorKind::TypeMismatch("Operand must be a number."))
                            );
                        }
                    }
                }

                Instr::Print => {
                    let _ = writeln!(out, "[Out]: {}", self.peek(0));
                }

                Instr::Jump(distance) => self.frame_mut().ip += distance as usize,
                Instr::JumpIfFalse(distance) => {
                    if self.peek(0).is_falsey() {
                        self.frame_mut().ip += distance as usize;
                    }
                }
                Instr::Loop(distance) => self.frame_mut().ip -= distance as usize,

                Instr::Call(argc) => {
                    let callee = self.peek(argc as usize).clone();
                    self.call_value(callee, argc)?;
                }
                Instr::Invoke(name, argc) => self.instr_invoke(name, argc)?,
                Instr::Closure(index) => self.instr_closure(index)?,

                Instr::Class(index) => {
                    let name = self.name_constant(index);
                    let class = Class::new((*name).clone());
                    self.push(Value::Class(Rc::new(RefCell::new(class))))?;
                }
                Instr::Method(index) => self.instr_method(index),
                Instr::Inherit => self.instr_inherit()?,
                Instr::GetSuper(index) => self.instr_get_super(index)?,
                Instr::SuperInvoke(name, argc) => {
                    let name = self.name_constant(name);
                    let superclass = match self.pop() {
                        Value::Class(class) => class,
                        other => unreachable!("super slot holds {:?}", other),
                    };
                    self.invoke_from_class(&superclass, &name, argc)?;
                }

                Instr::Return => {
                    if self.instr_return()? {
                        return Ok(());
                    }
                }
            }
        }
    }

    // Stack primitives

    fn push(&mut self, value: Value) -> Result<()> {
        if self.stack.len() == STACK_MAX {
            return Err(self.error(ErrorKind::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - distance - 1]
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("an active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("an active call frame")
    }

    fn constant(&self, index: u8) -> &Value {
        &self.frame().closure.function.chunk.constants[index as usize]
    }

    fn name_constant(&self, index: u8) -> Rc<String> {
        match self.constant(index) {
            Value::Str(name) => name.clone(),
            other => unreachable!("name constant holds {:?}", other),
        }
    }

    /// Annotates a runtime error with the line of the instruction that was
    /// just dispatched.
    fn error(&self, kind: ErrorKind) -> Error {
        let line = self
            .frames
            .last()
            .map(|frame| {
                let chunk = &frame.closure.function.chunk;
                chunk.line_of(frame.ip.saturating_sub(1))
            })
            .unwrap_or(0);
        Error::new(kind, line)
    }

    // Globals

    fn instr_get_global(&mut self, index: u8) -> Result<()> {
        let name = self.name_constant(index);
        match self.globals.get(name.as_str()) {
            Some(value) => {
                let value = value.clone();
                self.push(value)
            }
            None => Err(self.error(ErrorKind::UndefinedGlobal((*name).clone()))),
        }
    }

    fn instr_define_global(&mut self, index: u8) -> Result<()> {
        let name = self.name_constant(index);
        if self.globals.contains_key(name.as_str()) {
            return Err(self.error(ErrorKind::GlobalRedefinition((*name).clone())));
        }
        let value = self.pop();
        self.globals.insert((*name).clone(), value);
        Ok(())
    }

    /// Assignment is an expression, so the value stays on the stack.
    fn instr_set_global(&mut self, index: u8) -> Result<()> {
        let name = self.name_constant(index);
        if !self.globals.contains_key(name.as_str()) {
            return Err(self.error(ErrorKind::UndefinedGlobal((*name).clone())));
        }
        let value = self.peek(0).clone();
        self.globals.insert((*name).clone(), value);
        Ok(())
    }

    // Arithmetic

    fn binary_number(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<()> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => self.push(Value::Number(op(a, b))),
            _ => Err(self.error(ErrorKind::TypeMismatch("Operands must be numbers."))),
        }
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<()> {
        let b = self.pop();
        let a = self.pop();
        match (a.as_number(), b.as_number()) {
            (Some(a), Some(b)) => self.push(Value::Bool(op(a, b))),
            _ => Err(self.error(ErrorKind::TypeMismatch("Operands must be numbers."))),
        }
    }

    /// Numeric addition, except that a string operand on either side turns
    /// the operation into concatenation of the printable forms.
    fn instr_add(&mut self) -> Result<()> {
        let b = self.pop();
        let a = self.pop();
        match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => self.push(Value::Number(x + y)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                self.push(Value::string(format!("{}{}", a, b)))
            }
            _ => Err(self.error(ErrorKind::TypeMismatch(
                "Operands must be two numbers or two strings.",
            ))),
        }
    }

    // Properties and classes

    fn instr_get_property(&mut self, index: u8) -> Result<()> {
        let name = self.name_constant(index);
        let instance = match self.peek(0) {
            Value::Instance(instance) => instance.clone(),
            _ => {
                return Err(self.error(ErrorKind::TypeMismatch("Only instances have properties.")));
            }
        };

        let field = instance.borrow().fields.get(name.as_str()).cloned();
        if let Some(value) = field {
            self.pop();
            return self.push(value);
        }

        let method = {
            let instance = instance.borrow();
            let class = instance.class.borrow();
            class.methods.get(name.as_str()).cloned()
        };
        match method {
            Some(method) => {
                let receiver = self.pop();
                self.push(Value::BoundMethod(Rc::new(BoundMethod { receiver, method })))
            }
            None => Err(self.error(ErrorKind::UndefinedProperty((*name).clone()))),
        }
    }

    fn instr_set_property(&mut self, index: u8) -> Result<()> {
        let name = self.name_constant(index);
        let instance = match self.peek(1) {
            Value::Instance(instance) => instance.clone(),
            _ => return Err(self.error(ErrorKind::TypeMismatch("Only instances have fields."))),
        };
        let value = self.pop();
        self.pop();
        instance
            .borrow_mut()
            .fields
            .insert((*name).clone(), value.clone());
        self.push(value)
    }

    fn instr_method(&mut self, index: u8) {
        let name = self.name_constant(index);
        let method = match self.peek(0) {
            Value::Closure(closure) => closure.clone(),
            other => unreachable!("method slot holds {:?}", other),
        };
        let class = match self.peek(1) {
            Value::Class(class) => class.clone(),
            other => unreachable!("class slot holds {:?}", other),
        };
        class.borrow_mut().methods.insert((*name).clone(), method);
        self.pop();
    }

    /// Copies the superclass methods into the subclass; the subclass's own
    /// methods install afterwards and override them.
    fn instr_inherit(&mut self) -> Result<()> {
        let superclass = match self.peek(1) {
            Value::Class(class) => class.clone(),
            _ => return Err(self.error(ErrorKind::SuperclassNotAClass)),
        };
        let subclass = match self.peek(0) {
            Value::Class(class) => class.clone(),
            other => unreachable!("subclass slot holds {:?}", other),
        };
        {
            let superclass = superclass.borrow();
            let mut subclass = subclass.borrow_mut();
            for (name, method) in &superclass.methods {
                subclass.methods.insert(name.clone(), method.clone());
            }
        }
        self.pop();
        Ok(())
    }

    fn instr_get_super(&mut self, index: u8) -> Result<()> {
        let name = self.name_constant(index);
        let superclass = match self.pop() {
            Value::Class(class) => class,
            other => unreachable!("super slot holds {:?}", other),
        };
        let receiver = self.pop();
        let method = superclass.borrow().methods.get(name.as_str()).cloned();
        match method {
            Some(method) => {
                self.push(Value::BoundMethod(Rc::new(BoundMethod { receiver, method })))
            }
            None => Err(self.error(ErrorKind::UndefinedProperty((*name).clone()))),
        }
    }

    /// Fused property access and call. Fields shadow methods, so a callable
    /// stored in a field takes precedence.
    fn instr_invoke(&mut self, name_index: u8, argc: u8) -> Result<()> {
        let name = self.name_constant(name_index);
        let receiver = self.peek(argc as usize).clone();
        let instance = match receiver {
            Value::Instance(instance) => instance,
            _ => return Err(self.error(ErrorKind::TypeMismatch("Only instances have methods."))),
        };

        let field = instance.borrow().fields.get(name.as_str()).cloned();
        if let Some(field) = field {
            let slot = self.stack.len() - argc as usize - 1;
            self.stack[slot] = field.clone();
            return self.call_value(field, argc);
        }

        let class = instance.borrow().class.clone();
        self.invoke_from_class(&class, &name, argc)
    }

    fn invoke_from_class(&mut self, class: &Rc<RefCell<Class>>, name: &str, argc: u8) -> Result<()> {
        let method = class.borrow().methods.get(name).cloned();
        match method {
            Some(method) => self.call_closure(method, argc),
            None => Err(self.error(ErrorKind::UndefinedProperty(name.to_string()))),
        }
    }

    // Calls

    /// Dispatches a call on the kind of the callee sitting below its
    /// arguments.
    fn call_value(&mut self, callee: Value, argc: u8) -> Result<()> {
        match callee {
            Value::Closure(closure) => self.call_closure(closure, argc),
            Value::Native(native) => {
                let first_arg = self.stack.len() - argc as usize;
                let result = (native.function)(argc, &self.stack[first_arg..])?;
                // The callee and its arguments come off together.
                self.stack.truncate(first_arg - 1);
                self.push(result)
            }
            Value::Class(class) => {
                let slot = self.stack.len() - argc as usize - 1;
                let instance = Instance::new(class.clone());
                self.stack[slot] = Value::Instance(Rc::new(RefCell::new(instance)));
                let init = class.borrow().methods.get("init").cloned();
                match init {
                    Some(init) => self.call_closure(init, argc),
                    None if argc == 0 => Ok(()),
                    None => Err(self.error(ErrorKind::ArityMismatch {
                        expected: 0,
                        got: argc,
                    })),
                }
            }
            Value::BoundMethod(bound) => {
                let slot = self.stack.len() - argc as usize - 1;
                self.stack[slot] = bound.receiver.clone();
                self.call_closure(bound.method.clone(), argc)
            }
            _ => Err(self.error(ErrorKind::NotCallable)),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, argc: u8) -> Result<()> {
        if argc != closure.function.arity {
            return Err(self.error(ErrorKind::ArityMismatch {
                expected: closure.function.arity,
                got: argc,
            }));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.error(ErrorKind::StackOverflow));
        }
        let base = self.stack.len() - argc as usize - 1;
        self.frames.push(CallFrame {
            closure,
            ip: 0,
            base,
        });
        Ok(())
    }

    /// Builds a closure from a function constant, capturing each upvalue
    /// from the current frame's locals or its own upvalue list.
    fn instr_closure(&mut self, index: u8) -> Result<()> {
        let function = match self.constant(index) {
            Value::Function(function) => function.clone(),
            other => unreachable!("closure constant holds {:?}", other),
        };
        let base = self.frame().base;
        let mut upvalues = Vec::with_capacity(function.chunk.upvalues.len());
        for desc in &function.chunk.upvalues {
            let upvalue = if desc.is_local {
                self.capture_upvalue(base + desc.index as usize)
            } else {
                self.frame().closure.upvalues[desc.index as usize].clone()
            };
            upvalues.push(upvalue);
        }
        self.push(Value::Closure(Rc::new(Closure { function, upvalues })))
    }

    /// Pops the returning frame, closing its upvalues and replacing its
    /// stack window with the return value. Returns true when the script
    /// frame itself returned.
    fn instr_return(&mut self) -> Result<bool> {
        let result = self.pop();
        let frame = self.frames.pop().expect("a returning frame");
        self.close_upvalues(frame.base);
        self.stack.truncate(frame.base);
        if self.frames.is_empty() {
            return Ok(true);
        }
        self.push(result)?;
        Ok(false)
    }

    // Upvalue protocol

    /// Returns the open upvalue for a stack slot, creating and inserting it
    /// in sorted position if no closure has captured that slot yet.
    fn capture_upvalue(&mut self, index: usize) -> Rc<RefCell<Upvalue>> {
        let mut insert_at = self.open_upvalues.len();
        for (i, existing) in self.open_upvalues.iter().enumerate() {
            match &*existing.borrow() {
                Upvalue::Open(open) if *open == index => return existing.clone(),
                Upvalue::Open(open) if *open < index => {
                    insert_at = i;
                    break;
                }
                _ => {}
            }
        }
        let upvalue = Rc::new(RefCell::new(Upvalue::Open(index)));
        self.open_upvalues.insert(insert_at, upvalue.clone());
        upvalue
    }

    /// Closes every open upvalue at or above `from`, copying the stack value
    /// into the upvalue itself.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(first) = self.open_upvalues.first().cloned() {
            let index = match &*first.borrow() {
                Upvalue::Open(index) => *index,
                Upvalue::Closed(_) => unreachable!("closed upvalue in the open list"),
            };
            if index < from {
                break;
            }
            *first.borrow_mut() = Upvalue::Closed(self.stack[index].clone());
            self.open_upvalues.remove(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;

    /// Compiles and runs `source`, returning the VM, captured print output
    /// and the run result.
    fn run(source: &str) -> (Vm, String, Result<()>) {
        let closure = compile(source).expect("test source compiles");
        let mut vm = Vm::new();
        let mut out = Vec::new();
        let result = vm.run(closure, &mut out);
        (vm, String::from_utf8(out).unwrap(), result)
    }

    fn global(vm: &Vm, name: &str) -> Value {
        vm.globals.get(name).cloned().expect("global defined")
    }

    fn run_err(source: &str) -> Error {
        let (_, _, result) = run(source);
        result.unwrap_err()
    }

    #[test]
    fn globals_define_and_read() {
        let (vm, _, result) = run("var a = 1; var b = a + 2;");
        result.unwrap();
        assert_eq!(global(&vm, "b"), Value::Number(3.0));
    }

    #[test]
    fn stacks_are_empty_after_a_script() {
        let (vm, _, result) = run("var a = 1; { var b = a; print b; } print a;");
        result.unwrap();
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        assert!(vm.open_upvalues.is_empty());
    }

    #[test]
    fn print_writes_to_the_given_writer() {
        let (_, out, result) = run("print 1 + 2;");
        result.unwrap();
        assert_eq!(out, "[Out]: 3\n");
    }

    #[test]
    fn assignment_is_an_expression() {
        let (vm, _, result) = run("var a = 1; var b = (a = 5) + 1;");
        result.unwrap();
        assert_eq!(global(&vm, "a"), Value::Number(5.0));
        assert_eq!(global(&vm, "b"), Value::Number(6.0));
    }

    #[test]
    fn global_redefinition_is_a_runtime_error() {
        let err = run_err("var a = 1; var a = 2;");
        assert_eq!(*err.kind(), ErrorKind::GlobalRedefinition("a".to_string()));
    }

    #[test]
    fn undefined_globals() {
        let err = run_err("print x;");
        assert_eq!(*err.kind(), ErrorKind::UndefinedGlobal("x".to_string()));
        let err = run_err("x = 1;");
        assert_eq!(*err.kind(), ErrorKind::UndefinedGlobal("x".to_string()));
    }

    #[test]
    fn runtime_error_lines() {
        let err = run_err("var a = 1;\nvar b = 2;\nprint c;");
        assert_eq!(err.line(), 3);
    }

    #[test]
    fn arithmetic_type_errors() {
        let err = run_err("1 - nil;");
        assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
        let err = run_err("-true;");
        assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
        let err = run_err("1 + nil;");
        assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn add_stringifies_mixed_operands() {
        let (vm, _, result) = run("var a = 1 + \"a\"; var b = \"b\" + 2; var c = \"x\" + \"y\";");
        result.unwrap();
        assert_eq!(global(&vm, "a"), Value::string("1a"));
        assert_eq!(global(&vm, "b"), Value::string("b2"));
        assert_eq!(global(&vm, "c"), Value::string("xy"));
    }

    #[test]
    fn equality_uses_value_semantics() {
        let (vm, _, result) = run(
            "var a = 1 == 1; var b = \"x\" == \"x\"; var c = nil == false; var d = 1 != 2;",
        );
        result.unwrap();
        assert_eq!(global(&vm, "a"), Value::Bool(true));
        assert_eq!(global(&vm, "b"), Value::Bool(true));
        assert_eq!(global(&vm, "c"), Value::Bool(false));
        assert_eq!(global(&vm, "d"), Value::Bool(true));
    }

    #[test]
    fn while_loop_runs() {
        let (vm, _, result) = run("var a = 0; while (a < 10) a = a + 1;");
        result.unwrap();
        assert_eq!(global(&vm, "a"), Value::Number(10.0));
    }

    #[test]
    fn for_loop_runs() {
        let (vm, _, result) = run("var total = 0; for (var i = 1; i <= 3; i = i + 1) total = total + i;");
        result.unwrap();
        assert_eq!(global(&vm, "total"), Value::Number(6.0));
    }

    #[test]
    fn function_call_and_return() {
        let (vm, _, result) = run("fun add(a, b) { return a + b; } var r = add(2, 3);");
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(5.0));
    }

    #[test]
    fn function_without_return_yields_nil() {
        let (vm, _, result) = run("fun noop() {} var r = noop();");
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Nil);
    }

    #[test]
    fn closure_counter_keeps_state() {
        let (vm, _, result) = run(
            "fun make() { var x = 0; fun inc() { x = x + 1; return x; } return inc; }\
             var c = make(); var r1 = c(); var r2 = c();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r1"), Value::Number(1.0));
        assert_eq!(global(&vm, "r2"), Value::Number(2.0));
    }

    #[test]
    fn two_closures_share_one_upvalue() {
        let (vm, _, result) = run(
            "var get; var set;\
             { var x = 1; fun g() { return x; } fun s() { x = 2; } get = g; set = s; }\
             set(); var r = get();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(2.0));
    }

    #[test]
    fn upvalue_closes_when_scope_exits() {
        let (vm, _, result) = run(
            "var f; { var x = 10; fun g() { return x; } f = g; } var r = f();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(10.0));
        assert!(vm.open_upvalues.is_empty());
    }

    #[test]
    fn class_construction_and_fields() {
        let (vm, _, result) = run(
            "class Point { init(x, y) { this.x = x; this.y = y; } }\
             var p = Point(3, 4); var r = p.x + p.y;",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(7.0));
        assert!(matches!(global(&vm, "p"), Value::Instance(_)));
    }

    #[test]
    fn constructor_without_init_rejects_arguments() {
        let (vm, _, result) = run("class A {} var a = A();");
        result.unwrap();
        assert!(matches!(global(&vm, "a"), Value::Instance(_)));

        let err = run_err("class A {} A(1);");
        assert_eq!(
            *err.kind(),
            ErrorKind::ArityMismatch {
                expected: 0,
                got: 1
            }
        );
    }

    #[test]
    fn bound_method_remembers_its_receiver() {
        let (vm, _, result) = run(
            "class A { f() { return this.x; } }\
             var a = A(); a.x = 7; var m = a.f; var r = m();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(7.0));
    }

    #[test]
    fn fields_shadow_methods_in_invoke() {
        let (vm, _, result) = run(
            "class A { f() { return \"method\"; } }\
             fun other() { return \"field\"; }\
             var a = A(); var r1 = a.f(); a.f = other; var r2 = a.f();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r1"), Value::string("method"));
        assert_eq!(global(&vm, "r2"), Value::string("field"));
    }

    #[test]
    fn inheritance_copies_methods_and_super_dispatches() {
        let (vm, _, result) = run(
            "class A { f() { return \"A\"; } g() { return \"gA\"; } }\
             class B < A { f() { return super.f() + \"B\"; } }\
             var b = B(); var r1 = b.f(); var r2 = b.g();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r1"), Value::string("AB"));
        assert_eq!(global(&vm, "r2"), Value::string("gA"));
    }

    #[test]
    fn superclass_must_be_a_class() {
        let err = run_err("var NotAClass = 1; class B < NotAClass {}");
        assert_eq!(*err.kind(), ErrorKind::SuperclassNotAClass);
    }

    #[test]
    fn undefined_property() {
        let err = run_err("class A {} var a = A(); print a.missing;");
        assert_eq!(
            *err.kind(),
            ErrorKind::UndefinedProperty("missing".to_string())
        );
        let err = run_err("class A {} var a = A(); a.missing();");
        assert_eq!(
            *err.kind(),
            ErrorKind::UndefinedProperty("missing".to_string())
        );
    }

    #[test]
    fn only_instances_have_properties() {
        let err = run_err("print 1.x;");
        assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
        let err = run_err("var s = \"s\"; s.f();");
        assert!(matches!(err.kind(), ErrorKind::TypeMismatch(_)));
    }

    #[test]
    fn calling_a_non_callable() {
        let err = run_err("var x = 1; x();");
        assert_eq!(*err.kind(), ErrorKind::NotCallable);
    }

    #[test]
    fn arity_mismatch() {
        let err = run_err("fun f(a) { return a; } f(1, 2);");
        assert_eq!(
            *err.kind(),
            ErrorKind::ArityMismatch {
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn deep_recursion_overflows_the_frame_stack() {
        let err = run_err("fun f() { f(); } f();");
        assert_eq!(*err.kind(), ErrorKind::StackOverflow);
    }

    #[test]
    fn stacks_clear_after_a_runtime_error() {
        let (vm, _, result) = run("fun f() { return missing; } f();");
        assert!(result.is_err());
        assert!(vm.stack.is_empty());
        assert!(vm.frames.is_empty());
        assert!(vm.open_upvalues.is_empty());
    }

    #[test]
    fn native_clock_returns_a_number() {
        let (vm, _, result) = run("var t = clock();");
        result.unwrap();
        match global(&vm, "t") {
            Value::Number(n) => assert!(n > 0.0),
            other => panic!("clock() returned {:?}", other),
        }
    }

    #[test]
    fn native_call_pops_callee_and_arguments() {
        let (vm, _, result) = run("var ok = sleep(0); var t = clock();");
        result.unwrap();
        assert_eq!(global(&vm, "ok"), Value::Bool(true));
        assert!(vm.stack.is_empty());
    }

    #[test]
    fn fibonacci() {
        let (vm, _, result) = run(
            "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }\
             var r = fib(10);",
        );
        result.unwrap();
        assert_eq!(global(&vm, "r"), Value::Number(55.0));
    }

    #[test]
    fn short_circuit_skips_the_right_operand() {
        let (vm, _, result) = run(
            "var called = false;\
             fun boom() { called = true; return true; }\
             var a = false and boom();\
             var b = true or boom();",
        );
        result.unwrap();
        assert_eq!(global(&vm, "a"), Value::Bool(false));
        assert_eq!(global(&vm, "b"), Value::Bool(true));
        assert_eq!(global(&vm, "called"), Value::Bool(false));
    }
}
