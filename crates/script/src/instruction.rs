//! Push-data aware iteration over raw script bytes.

use std::fmt;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_16: u8 = 0x60;
pub const OP_RETURN: u8 = 0x6a;
pub const OP_CHECKMULTISIG: u8 = 0xae;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Instruction<'a> {
    Push(&'a [u8]),
    Op(u8),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptError {
    TruncatedPush { offset: usize },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::TruncatedPush { offset } => {
                write!(f, "push at offset {offset} runs past end of script")
            }
        }
    }
}

impl std::error::Error for ScriptError {}

/// Iterator over script instructions. `OP_0` yields an empty push; a truncated push ends
/// iteration with an error.
pub struct Instructions<'a> {
    script: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    pub fn new(script: &'a [u8]) -> Self {
        Self {
            script,
            cursor: 0,
            failed: false,
        }
    }

    /// Byte offset of the next instruction.
    pub fn position(&self) -> usize {
        self.cursor
    }

    fn take(&mut self, offset: usize, len: usize) -> Result<&'a [u8], ScriptError> {
        let end = self
            .cursor
            .checked_add(len)
            .filter(|end| *end <= self.script.len())
            .ok_or(ScriptError::TruncatedPush { offset })?;
        let bytes = &self.script[self.cursor..end];
        self.cursor = end;
        Ok(bytes)
    }

    fn read_len(&mut self, offset: usize, width: usize) -> Result<usize, ScriptError> {
        let bytes = self.take(offset, width)?;
        let mut len = 0usize;
        for (shift, byte) in bytes.iter().enumerate() {
            len |= usize::from(*byte) << (8 * shift);
        }
        Ok(len)
    }

    fn next_instruction(&mut self) -> Result<Instruction<'a>, ScriptError> {
        let offset = self.cursor;
        let opcode = self.script[self.cursor];
        self.cursor += 1;
        let len = match opcode {
            OP_0 => return Ok(Instruction::Push(&[])),
            0x01..=0x4b => usize::from(opcode),
            OP_PUSHDATA1 => self.read_len(offset, 1)?,
            OP_PUSHDATA2 => self.read_len(offset, 2)?,
            OP_PUSHDATA4 => self.read_len(offset, 4)?,
            other => return Ok(Instruction::Op(other)),
        };
        Ok(Instruction::Push(self.take(offset, len)?))
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ScriptError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.script.len() {
            return None;
        }
        let item = self.next_instruction();
        if item.is_err() {
            self.failed = true;
        }
        Some(item)
    }
}

/// Appends the minimal push of `data` to `script`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < usize::from(OP_PUSHDATA1) {
        script.push(len as u8);
    } else if len <= 0xff {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else if len <= 0xffff {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    } else {
        script.push(OP_PUSHDATA4);
        script.extend_from_slice(&(len as u32).to_le_bytes());
    }
    script.extend_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_pushes_and_ops() {
        let mut script = vec![OP_RETURN];
        push_data(&mut script, b"SLP\0");
        push_data(&mut script, &[0xaa; 80]);
        script.push(OP_0);
        let items: Vec<_> = Instructions::new(&script)
            .collect::<Result<_, _>>()
            .expect("well formed");
        assert_eq!(items.len(), 4);
        assert_eq!(items[0], Instruction::Op(OP_RETURN));
        assert_eq!(items[1], Instruction::Push(b"SLP\0"));
        assert_eq!(items[2], Instruction::Push(&[0xaa; 80][..]));
        assert_eq!(items[3], Instruction::Push(&[]));
    }

    #[test]
    fn truncated_push_stops_iteration() {
        let script = [OP_RETURN, 0x05, 0x01, 0x02];
        let mut iter = Instructions::new(&script);
        assert_eq!(iter.next(), Some(Ok(Instruction::Op(OP_RETURN))));
        assert_eq!(
            iter.next(),
            Some(Err(ScriptError::TruncatedPush { offset: 1 }))
        );
        assert_eq!(iter.next(), None);
    }
}
