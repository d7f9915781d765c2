use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

use crate::{
    compiler::code::Opcode,
    object::{CompiledFunction, Object},
};

use super::builtins::BUILTINS;

const STACK_SIZE: usize = 2048;

/// Error raised by a `throw` statement. Displays as the thrown value.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Thrown {
    pub message: String,
}

struct Frame {
    function: Rc<CompiledFunction>,
    ip: usize,
    base_pointer: usize,
}

/// Executes bytecode against the runtime's constant pool and globals. A VM
/// lives for one top-level run or one direct function call.
pub struct VirtualMachine<'a> {
    constants: &'a [Object],
    globals: &'a mut Vec<Object>,
    stack: Vec<Object>,
    frames: Vec<Frame>,
    max_frames: usize,
}

impl<'a> VirtualMachine<'a> {
    pub fn new(constants: &'a [Object], globals: &'a mut Vec<Object>, max_frames: usize) -> Self {
        Self {
            constants,
            globals,
            stack: Vec::with_capacity(64),
            frames: vec![],
            max_frames,
        }
    }

    /// Runs a snippet's top-level code. `None` means the snippet finished
    /// without producing a value.
    pub fn run(mut self, main: Rc<CompiledFunction>) -> Result<Option<Object>> {
        self.frames.push(Frame {
            function: main,
            ip: 0,
            base_pointer: 0,
        });
        self.execute()
    }

    pub fn call(mut self, function: Object, args: Vec<Object>) -> Result<Object> {
        let num_args = args.len();
        self.push(function)?;
        for arg in args {
            self.push(arg)?;
        }
        self.call_function(num_args)?;

        // Builtins complete without pushing a frame.
        if self.frames.is_empty() {
            return self.pop();
        }
        Ok(self.execute()?.unwrap_or(Object::Null))
    }

    fn execute(&mut self) -> Result<Option<Object>> {
        loop {
            let (opcode, operand) = self.fetch()?;
            match opcode {
                Opcode::Constant => {
                    let index = self.current_frame()?.function.constants_offset + operand;
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or(anyhow!("constant {index} is not loaded"))?;
                    self.push(constant)?;
                }
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Equal
                | Opcode::NotEqual
                | Opcode::GreaterThan => {
                    self.execute_binary_operation(opcode)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::True => self.push(Object::Boolean(true))?,
                Opcode::False => self.push(Object::Boolean(false))?,
                Opcode::Null => self.push(Object::Null)?,
                Opcode::Minus => match self.pop()? {
                    Object::Integer(value) => {
                        let negated = value
                            .checked_neg()
                            .ok_or(anyhow!("integer overflow"))?;
                        self.push(Object::Integer(negated))?;
                    }
                    other => bail!("unsupported type for negation: {}", other.object_type()),
                },
                Opcode::Bang => {
                    let value = self.pop()?;
                    self.push(Object::Boolean(!value.is_truthy()))?;
                }
                Opcode::JumpNotTruthy => {
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame()?.ip = operand;
                    }
                }
                Opcode::Jump => {
                    self.current_frame()?.ip = operand;
                }
                Opcode::GetGlobal => {
                    let value = self
                        .globals
                        .get(operand)
                        .cloned()
                        .ok_or(anyhow!("global {operand} is not defined"))?;
                    self.push(value)?;
                }
                Opcode::SetGlobal => {
                    let value = self.pop()?;
                    if operand >= self.globals.len() {
                        self.globals.resize(operand + 1, Object::Null);
                    }
                    self.globals[operand] = value;
                }
                Opcode::GetLocal => {
                    let base_pointer = self.current_frame()?.base_pointer;
                    let value = self
                        .stack
                        .get(base_pointer + operand)
                        .cloned()
                        .ok_or(anyhow!("local {operand} is out of range"))?;
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let base_pointer = self.current_frame()?.base_pointer;
                    let value = self.pop()?;
                    let slot = self
                        .stack
                        .get_mut(base_pointer + operand)
                        .ok_or(anyhow!("local {operand} is out of range"))?;
                    *slot = value;
                }
                Opcode::GetBuiltin => {
                    let builtin = BUILTINS
                        .get(operand)
                        .ok_or(anyhow!("unknown builtin {operand}"))?;
                    self.push(Object::Builtin(builtin))?;
                }
                Opcode::Array => {
                    let start = self
                        .stack
                        .len()
                        .checked_sub(operand)
                        .ok_or(anyhow!("stack underflow"))?;
                    let elements = self.stack.split_off(start);
                    self.push(Object::Array(elements))?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }
                Opcode::Call => {
                    self.call_function(operand)?;
                }
                Opcode::ReturnValue => {
                    let value = self.pop()?;
                    if let Some(value) = self.return_from_frame(value)? {
                        return Ok(Some(value));
                    }
                }
                Opcode::Return => {
                    if self.return_from_frame(Object::Null)?.is_some() {
                        return Ok(None);
                    }
                }
                Opcode::Throw => {
                    let value = self.pop()?;
                    return Err(Thrown {
                        message: value.to_string(),
                    }
                    .into());
                }
            }
        }
    }

    /// Reads the next instruction of the current frame and advances past it.
    fn fetch(&mut self) -> Result<(Opcode, usize)> {
        let frame = self.current_frame()?;
        let instructions = &frame.function.instructions;
        let byte = *instructions
            .inner()
            .get(frame.ip)
            .ok_or(anyhow!("instruction pointer {} out of range", frame.ip))?;
        let opcode = Opcode::try_from(byte)?;

        let mut operand = 0;
        let mut pos = frame.ip + 1;
        for width in opcode.operand_width() {
            operand = match width {
                2 => instructions.read_u16(pos)?,
                _ => instructions.read_u8(pos)?,
            };
            pos += width;
        }
        frame.ip = pos;

        Ok((opcode, operand))
    }

    /// Pops the current frame and hands `value` to the caller. Returns the
    /// value back once the outermost frame has returned.
    fn return_from_frame(&mut self, value: Object) -> Result<Option<Object>> {
        let frame = self.frames.pop().ok_or(anyhow!("no frame to return from"))?;
        if self.frames.is_empty() {
            return Ok(Some(value));
        }
        // Drop the frame's locals together with the callee itself.
        self.stack.truncate(frame.base_pointer.saturating_sub(1));
        self.push(value)?;
        Ok(None)
    }

    fn call_function(&mut self, num_args: usize) -> Result<()> {
        let callee_pos = self
            .stack
            .len()
            .checked_sub(num_args + 1)
            .ok_or(anyhow!("stack underflow"))?;

        match self.stack[callee_pos].clone() {
            Object::Function(function) => {
                if num_args != function.num_parameters {
                    bail!(
                        "wrong number of arguments: want={}, got={}",
                        function.num_parameters,
                        num_args
                    );
                }
                if self.frames.len() >= self.max_frames {
                    bail!("stack overflow: call depth exceeded {}", self.max_frames);
                }
                let base_pointer = callee_pos + 1;
                let frame_top = base_pointer + function.num_locals;
                if frame_top > STACK_SIZE {
                    bail!("stack overflow");
                }
                self.stack.resize(frame_top, Object::Null);
                self.frames.push(Frame {
                    function,
                    ip: 0,
                    base_pointer,
                });
            }
            Object::Builtin(builtin) => {
                let args = self.stack.split_off(callee_pos + 1);
                self.stack.truncate(callee_pos);
                let result = (builtin.function)(args)?;
                self.push(result)?;
            }
            other => bail!("calling non-function: {}", other.object_type()),
        }
        Ok(())
    }

    fn execute_binary_operation(&mut self, opcode: Opcode) -> Result<()> {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (opcode, left, right) {
            (Opcode::Equal, left, right) => Object::Boolean(left == right),
            (Opcode::NotEqual, left, right) => Object::Boolean(left != right),
            (opcode, Object::Integer(left), Object::Integer(right)) => {
                let int = match opcode {
                    Opcode::Add => left.checked_add(right),
                    Opcode::Sub => left.checked_sub(right),
                    Opcode::Mul => left.checked_mul(right),
                    Opcode::Div => {
                        if right == 0 {
                            bail!("division by zero");
                        }
                        left.checked_div(right)
                    }
                    Opcode::GreaterThan => return self.push(Object::Boolean(left > right)),
                    _ => bail!("unknown integer operator: {}", opcode.name()),
                };
                Object::Integer(int.ok_or(anyhow!("integer overflow"))?)
            }
            (Opcode::Add, Object::String(left), Object::String(right)) => {
                Object::String(left + &right)
            }
            (Opcode::GreaterThan, Object::String(left), Object::String(right)) => {
                Object::Boolean(left > right)
            }
            (opcode, left, right) => bail!(
                "unsupported types for {}: {} and {}",
                opcode.name(),
                left.object_type(),
                right.object_type()
            ),
        };
        self.push(result)
    }

    fn execute_index_expression(&mut self, left: Object, index: Object) -> Result<()> {
        match (left, index) {
            (Object::Array(elements), Object::Integer(index)) => {
                let element = usize::try_from(index)
                    .ok()
                    .and_then(|index| elements.get(index).cloned())
                    .unwrap_or(Object::Null);
                self.push(element)
            }
            (left, index) => bail!(
                "index operator not supported: {}[{}]",
                left.object_type(),
                index.object_type()
            ),
        }
    }

    fn current_frame(&mut self) -> Result<&mut Frame> {
        self.frames.last_mut().ok_or(anyhow!("no active frame"))
    }

    fn push(&mut self, object: Object) -> Result<()> {
        if self.stack.len() >= STACK_SIZE {
            bail!("stack overflow");
        }

        self.stack.push(object);

        Ok(())
    }

    fn pop(&mut self) -> Result<Object> {
        self.stack.pop().ok_or(anyhow!("stack underflow"))
    }
}
