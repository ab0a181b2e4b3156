//! JVM runtime module responsible for creating a new runtime
//! environment and running programs.
use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use tracing::{debug, trace};

use crate::bytecode::OPCode;
use crate::heap::{ArrayRef, Heap};
use crate::program::{Method, Program};

type Result<T> = std::result::Result<T, RuntimeError>;

/// The name of the method invoked to run a loaded class.
const MAIN_METHOD: &str = "main";
/// The descriptor of `main`: takes a `String[]`, returns void.
const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

/// `RuntimeErrorKind` represents the possible errors that can occur
/// while setting up execution.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    /// The class defines no `main([Ljava/lang/String;)V` method.
    MissingEntryPoint,
    /// The entry method returned a value even though it is declared void.
    EntryPointReturnedValue,
}

/// `RuntimeError` is a custom type used to handle and represent
/// possible execution failures.
#[derive(Debug, Clone)]
pub struct RuntimeError {
    kind: RuntimeErrorKind,
}

impl RuntimeError {
    fn new(kind: RuntimeErrorKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> RuntimeErrorKind {
        self.kind
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            RuntimeErrorKind::MissingEntryPoint => {
                write!(f, "class defines no {MAIN_METHOD}{MAIN_DESCRIPTOR} method")
            }
            RuntimeErrorKind::EntryPointReturnedValue => {
                write!(f, "entry method returned a value")
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Operand stack for a single invocation, bounded by the method's declared
/// maximum depth. We create a new frame each time we enter a method and
/// destroy it once we leave.
///
/// Overflow and underflow mean the code stream was not produced by a
/// conforming compiler and abort execution.
struct Frame {
    stack: Vec<i32>,
    max_stack: usize,
}

impl Frame {
    fn new(max_stack: usize) -> Self {
        Self {
            stack: Vec::with_capacity(max_stack),
            max_stack,
        }
    }

    fn push(&mut self, value: i32) {
        assert!(self.stack.len() < self.max_stack, "operand stack overflow");
        self.stack.push(value);
    }

    fn pop(&mut self) -> i32 {
        self.stack.pop().expect("operand stack underflow")
    }
}

/// `Runtime` owns the loaded program and its heap and drives the entry
/// method to completion.
pub struct Runtime {
    program: Program,
    heap: Heap,
}

impl Runtime {
    #[must_use]
    pub fn new(program: Program) -> Self {
        Self {
            program,
            heap: Heap::new(),
        }
    }

    /// Runs the program's `main` method.
    ///
    /// # Errors
    /// Fails if the class defines no entry method or the entry method
    /// produces a value.
    pub fn run(&mut self) -> Result<()> {
        let method = self
            .program
            .find_method(MAIN_METHOD, MAIN_DESCRIPTOR)
            .ok_or_else(|| {
                RuntimeError::new(RuntimeErrorKind::MissingEntryPoint)
            })?;
        // There is no argument-object support; the String[] parameter slot
        // stays zero like every other local.
        let locals = vec![0; usize::from(method.max_locals)];
        match execute(method, locals, &self.program, &mut self.heap) {
            None => Ok(()),
            Some(_) => Err(RuntimeError::new(
                RuntimeErrorKind::EntryPointReturnedValue,
            )),
        }
    }
}

/// Runs one method's bytecode to completion and returns its result, `None`
/// for void. `locals` must hold the method's parameters in its leading
/// slots, zeros elsewhere, and is owned by this invocation. Static calls
/// recurse through this same function, one native frame per invocation.
///
/// # Panics
/// Malformed bytecode is unrecoverable: stack overflow or underflow, local
/// slots beyond `max_locals`, division or remainder by zero, negative shift
/// amounts, negative array lengths, out-of-range array access and
/// unresolvable call targets all abort execution.
pub fn execute(
    method: &Method,
    mut locals: Vec<i32>,
    program: &Program,
    heap: &mut Heap,
) -> Option<i32> {
    debug!(method = %method.name, "enter");
    let code = &method.code;
    let mut frame = Frame::new(usize::from(method.max_stack));
    let mut pc: usize = 0;
    while pc < code.len() {
        let opcode = OPCode::from(code[pc]);
        trace!(pc, ?opcode, depth = frame.stack.len(), "dispatch");
        match opcode {
            OPCode::NOP => pc += 1,
            OPCode::IconstM1 => {
                frame.push(-1);
                pc += 1;
            }
            OPCode::Iconst0 => {
                frame.push(0);
                pc += 1;
            }
            OPCode::Iconst1 => {
                frame.push(1);
                pc += 1;
            }
            OPCode::Iconst2 => {
                frame.push(2);
                pc += 1;
            }
            OPCode::Iconst3 => {
                frame.push(3);
                pc += 1;
            }
            OPCode::Iconst4 => {
                frame.push(4);
                pc += 1;
            }
            OPCode::Iconst5 => {
                frame.push(5);
                pc += 1;
            }
            OPCode::BiPush => {
                frame.push(i32::from(code[pc + 1] as i8));
                pc += 2;
            }
            OPCode::SiPush => {
                frame.push(i32::from(BigEndian::read_i16(&code[pc + 1..])));
                pc += 3;
            }
            OPCode::Ldc => {
                let pool_index = usize::from(code[pc + 1]);
                frame.push(program.integer_constant(pool_index));
                pc += 2;
            }
            OPCode::ILoad | OPCode::ALoad => {
                frame.push(locals[usize::from(code[pc + 1])]);
                pc += 2;
            }
            OPCode::ILoad0 | OPCode::ILoad1 | OPCode::ILoad2
            | OPCode::ILoad3 => {
                frame.push(locals[usize::from(code[pc] - OPCode::ILoad0 as u8)]);
                pc += 1;
            }
            OPCode::ALoad0 | OPCode::ALoad1 | OPCode::ALoad2
            | OPCode::ALoad3 => {
                frame.push(locals[usize::from(code[pc] - OPCode::ALoad0 as u8)]);
                pc += 1;
            }
            OPCode::IStore | OPCode::AStore => {
                locals[usize::from(code[pc + 1])] = frame.pop();
                pc += 2;
            }
            OPCode::IStore0 | OPCode::IStore1 | OPCode::IStore2
            | OPCode::IStore3 => {
                locals[usize::from(code[pc] - OPCode::IStore0 as u8)] =
                    frame.pop();
                pc += 1;
            }
            OPCode::AStore0 | OPCode::AStore1 | OPCode::AStore2
            | OPCode::AStore3 => {
                locals[usize::from(code[pc] - OPCode::AStore0 as u8)] =
                    frame.pop();
                pc += 1;
            }
            OPCode::IInc => {
                let slot = usize::from(code[pc + 1]);
                let constant = i32::from(code[pc + 2] as i8);
                locals[slot] = locals[slot].wrapping_add(constant);
                pc += 3;
            }
            OPCode::IAdd => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(a.wrapping_add(b));
                pc += 1;
            }
            OPCode::ISub => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(a.wrapping_sub(b));
                pc += 1;
            }
            OPCode::IMul => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(a.wrapping_mul(b));
                pc += 1;
            }
            OPCode::IDiv => {
                let b = frame.pop();
                let a = frame.pop();
                assert!(b != 0, "division by zero");
                frame.push(a.wrapping_div(b));
                pc += 1;
            }
            OPCode::IRem => {
                let b = frame.pop();
                let a = frame.pop();
                assert!(b != 0, "remainder by zero");
                frame.push(a.wrapping_rem(b));
                pc += 1;
            }
            OPCode::INeg => {
                let a = frame.pop();
                frame.push(a.wrapping_neg());
                pc += 1;
            }
            OPCode::IShl => {
                let b = frame.pop();
                let a = frame.pop();
                assert!(b >= 0, "negative shift amount {b}");
                frame.push(a.wrapping_shl(b as u32));
                pc += 1;
            }
            OPCode::IShr => {
                let b = frame.pop();
                let a = frame.pop();
                assert!(b >= 0, "negative shift amount {b}");
                frame.push(a.wrapping_shr(b as u32));
                pc += 1;
            }
            OPCode::IUShr => {
                let b = frame.pop();
                let a = frame.pop();
                assert!(b >= 0, "negative shift amount {b}");
                // The left operand's bit pattern is shifted as unsigned.
                frame.push((a as u32).wrapping_shr(b as u32) as i32);
                pc += 1;
            }
            OPCode::IAnd => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(a & b);
                pc += 1;
            }
            OPCode::IOr => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(a | b);
                pc += 1;
            }
            OPCode::IXor => {
                let b = frame.pop();
                let a = frame.pop();
                frame.push(a ^ b);
                pc += 1;
            }
            OPCode::IfEq => {
                let a = frame.pop();
                pc = if a == 0 { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfNe => {
                let a = frame.pop();
                pc = if a != 0 { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfLt => {
                let a = frame.pop();
                pc = if a < 0 { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfGe => {
                let a = frame.pop();
                pc = if a >= 0 { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfGt => {
                let a = frame.pop();
                pc = if a > 0 { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfLe => {
                let a = frame.pop();
                pc = if a <= 0 { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfICmpEq => {
                let b = frame.pop();
                let a = frame.pop();
                pc = if a == b { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfICmpNe => {
                let b = frame.pop();
                let a = frame.pop();
                pc = if a != b { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfICmpLt => {
                let b = frame.pop();
                let a = frame.pop();
                pc = if a < b { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfICmpGe => {
                let b = frame.pop();
                let a = frame.pop();
                pc = if a >= b { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfICmpGt => {
                let b = frame.pop();
                let a = frame.pop();
                pc = if a > b { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::IfICmpLe => {
                let b = frame.pop();
                let a = frame.pop();
                pc = if a <= b { branch_target(code, pc) } else { pc + 3 };
            }
            OPCode::Goto => pc = branch_target(code, pc),
            OPCode::IReturn | OPCode::AReturn => {
                let value = frame.pop();
                debug!(method = %method.name, value, "return");
                return Some(value);
            }
            OPCode::Return => {
                debug!(method = %method.name, "return void");
                return None;
            }
            OPCode::GetStatic => {
                // The restricted runtime only emits getstatic to set up the
                // println call; the field itself is never read.
                pc += 3;
            }
            OPCode::InvokeVirtual => {
                // The sole virtual call is System.out.println(int).
                println!("{}", frame.pop());
                pc += 3;
            }
            OPCode::InvokeStatic => {
                let pool_index =
                    usize::from(BigEndian::read_u16(&code[pc + 1..]));
                let callee = program.find_method_from_index(pool_index);
                let mut callee_locals =
                    vec![0; usize::from(callee.max_locals)];
                // Parameters leave the caller's stack in reverse order so
                // the first value pushed lands in slot 0.
                for slot in (0..callee.num_parameters()).rev() {
                    callee_locals[slot] = frame.pop();
                }
                if let Some(value) =
                    execute(callee, callee_locals, program, heap)
                {
                    frame.push(value);
                }
                pc += 3;
            }
            OPCode::Dup => {
                let a = frame.pop();
                frame.push(a);
                frame.push(a);
                pc += 1;
            }
            OPCode::NewArray => {
                let count = frame.pop();
                let handle = heap.allocate(count);
                frame.push(handle.value());
                // The element type operand is irrelevant, only int arrays
                // exist in the subset.
                pc += 2;
            }
            OPCode::ArrayLength => {
                let handle = ArrayRef::from_value(frame.pop());
                frame.push(heap.array(handle)[0]);
                pc += 1;
            }
            OPCode::IALoad => {
                let index = frame.pop();
                let handle = ArrayRef::from_value(frame.pop());
                frame.push(heap.array(handle)[index as usize + 1]);
                pc += 1;
            }
            OPCode::IAStore => {
                let value = frame.pop();
                let index = frame.pop();
                let handle = ArrayRef::from_value(frame.pop());
                heap.array_mut(handle)[index as usize + 1] = value;
                pc += 1;
            }
        }
    }
    // Ran past the last instruction, the method returns void.
    debug!(method = %method.name, "return void");
    None
}

// Branch offsets are signed 16-bit and relative to the position of the
// branch opcode itself, not the following instruction.
fn branch_target(code: &[u8], pc: usize) -> usize {
    let offset = BigEndian::read_i16(&code[pc + 1..]);
    (pc as isize + isize::from(offset)) as usize
}
