use std::{fmt, io::Cursor};

use anyhow::{anyhow, bail, Result};
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Instructions(Vec<u8>);

impl Instructions {
    pub fn new() -> Self {
        Self(vec![])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    #[cfg(test)]
    pub fn from(instructions: Vec<Vec<u8>>) -> Self {
        Self(instructions.into_iter().flatten().collect::<Vec<u8>>())
    }

    pub fn inner(&self) -> &Vec<u8> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, instruction: Vec<u8>) -> usize {
        let instr_start_pos = self.0.len();
        self.0.extend(instruction);
        instr_start_pos
    }

    pub fn drain_at(&mut self, pos: usize) {
        self.0.drain(pos..);
    }

    pub fn change_u16_operand(&mut self, pos: usize, operand: usize) -> Result<()> {
        let mut instructions = Cursor::new(&mut self.0);
        instructions.set_position((pos + 1) as u64);
        instructions.write_u16::<BigEndian>(operand.try_into()?)?;
        Ok(())
    }

    pub fn read_u16(&self, pos: usize) -> Result<usize> {
        let bytes = self
            .0
            .get(pos..pos + 2)
            .ok_or(anyhow!("truncated 2-byte operand at {pos}"))?;
        Ok(BigEndian::read_u16(bytes) as usize)
    }

    pub fn read_u8(&self, pos: usize) -> Result<usize> {
        self.0
            .get(pos)
            .map(|byte| *byte as usize)
            .ok_or(anyhow!("truncated 1-byte operand at {pos}"))
    }

    /// Convert an opcode and a vector of operands into a byte vector instruction
    pub fn make(opcode: Opcode, operands: Vec<usize>) -> Result<Vec<u8>> {
        let widths = opcode.operand_width();
        let name = opcode.name();

        if operands.len() != widths.len() {
            bail!(
                "{name} expects {} operands, got {}",
                widths.len(),
                operands.len()
            );
        }

        let mut instruction = vec![opcode.into()];
        for (operand, width) in operands.into_iter().zip(widths) {
            match width {
                2 => instruction.write_u16::<BigEndian>(operand.try_into()?)?,
                1 => instruction.write_u8(operand.try_into()?)?,
                width => bail!("unknown operand width: {}", width),
            }
        }
        Ok(instruction)
    }

    fn write_listing(&self, f: &mut fmt::Formatter) -> Result<()> {
        let mut pos = 0;
        while pos < self.0.len() {
            let opcode = Opcode::try_from(self.0[pos])?;
            write!(f, "{:04} {}", pos, opcode.name())?;
            pos += 1;
            for width in opcode.operand_width() {
                let operand = match width {
                    2 => self.read_u16(pos)?,
                    _ => self.read_u8(pos)?,
                };
                write!(f, " {}", operand)?;
                pos += width;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl fmt::Display for Instructions {
    /// Print the instructions in a human-readable format
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write_listing(f).map_err(|_| fmt::Error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Opcode {
    Constant,
    Pop,

    Add,
    Sub,
    Mul,
    Div,

    True,
    False,

    Equal,
    NotEqual,
    GreaterThan,

    Minus,
    Bang,

    JumpNotTruthy,
    Jump,

    Null,

    GetGlobal,
    SetGlobal,

    Array,
    Index,

    Call,
    ReturnValue,
    Return,

    GetLocal,
    SetLocal,
    GetBuiltin,

    Throw,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Constant => "Constant",
            Opcode::Add => "Add",
            Opcode::Pop => "Pop",
            Opcode::Sub => "Sub",
            Opcode::Mul => "Mul",
            Opcode::Div => "Div",
            Opcode::True => "True",
            Opcode::False => "False",
            Opcode::Equal => "Equal",
            Opcode::NotEqual => "NotEqual",
            Opcode::GreaterThan => "GreaterThan",
            Opcode::Minus => "Minus",
            Opcode::Bang => "Bang",
            Opcode::JumpNotTruthy => "JumpNotTruthy",
            Opcode::Jump => "Jump",
            Opcode::Null => "Null",
            Opcode::GetGlobal => "GetGlobal",
            Opcode::SetGlobal => "SetGlobal",
            Opcode::Array => "Array",
            Opcode::Index => "Index",
            Opcode::Call => "Call",
            Opcode::ReturnValue => "ReturnValue",
            Opcode::Return => "Return",
            Opcode::GetLocal => "GetLocal",
            Opcode::SetLocal => "SetLocal",
            Opcode::GetBuiltin => "GetBuiltin",
            Opcode::Throw => "Throw",
        }
    }

    /// The number of elements is the number of operands for the opcode
    ///
    /// The value of each element is the byte width of the operand
    ///
    /// E.g. OpConstant has one operand, which is a 2-byte unsigned integer (u16).
    /// In this case, this operand is an index into the constants pool that contains the actual value.
    pub fn operand_width(&self) -> Vec<usize> {
        match self {
            Opcode::Constant
            | Opcode::JumpNotTruthy
            | Opcode::Jump
            | Opcode::GetGlobal
            | Opcode::SetGlobal
            | Opcode::Array => vec![2],
            Opcode::Call | Opcode::GetLocal | Opcode::SetLocal | Opcode::GetBuiltin => vec![1],
            _ => vec![],
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        let opcode = match value {
            0 => Opcode::Constant,
            1 => Opcode::Add,
            2 => Opcode::Pop,
            3 => Opcode::Sub,
            4 => Opcode::Mul,
            5 => Opcode::Div,
            6 => Opcode::True,
            7 => Opcode::False,
            8 => Opcode::Equal,
            9 => Opcode::NotEqual,
            10 => Opcode::GreaterThan,
            11 => Opcode::Minus,
            12 => Opcode::Bang,
            13 => Opcode::JumpNotTruthy,
            14 => Opcode::Jump,
            15 => Opcode::Null,
            16 => Opcode::GetGlobal,
            17 => Opcode::SetGlobal,
            18 => Opcode::Array,
            19 => Opcode::Index,
            20 => Opcode::Call,
            21 => Opcode::ReturnValue,
            22 => Opcode::Return,
            23 => Opcode::GetLocal,
            24 => Opcode::SetLocal,
            25 => Opcode::GetBuiltin,
            26 => Opcode::Throw,
            _ => bail!("unknown opcode: {}", value),
        };
        Ok(opcode)
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Constant => 0,
            Opcode::Add => 1,
            Opcode::Pop => 2,
            Opcode::Sub => 3,
            Opcode::Mul => 4,
            Opcode::Div => 5,
            Opcode::True => 6,
            Opcode::False => 7,
            Opcode::Equal => 8,
            Opcode::NotEqual => 9,
            Opcode::GreaterThan => 10,
            Opcode::Minus => 11,
            Opcode::Bang => 12,
            Opcode::JumpNotTruthy => 13,
            Opcode::Jump => 14,
            Opcode::Null => 15,
            Opcode::GetGlobal => 16,
            Opcode::SetGlobal => 17,
            Opcode::Array => 18,
            Opcode::Index => 19,
            Opcode::Call => 20,
            Opcode::ReturnValue => 21,
            Opcode::Return => 22,
            Opcode::GetLocal => 23,
            Opcode::SetLocal => 24,
            Opcode::GetBuiltin => 25,
            Opcode::Throw => 26,
        }
    }
}
