use crate::prelude::*;

use bytes::Bytes;

use super::command::ProtocolCommand;

/// Read-only cursor over the payload of one received frame.
#[derive(Clone, Debug)]
pub struct ProtocolResponse {
    data: Bytes,
    position: usize,
    command: Option<ProtocolCommand>,
}

impl ProtocolResponse {
    pub fn new(data: impl Into<Bytes>, command: Option<ProtocolCommand>) -> Self {
        Self {
            data: data.into(),
            position: 0,
            command,
        }
    }

    pub fn response_data(&self) -> &[u8] {
        &self.data
    }

    pub fn command(&self) -> Option<&ProtocolCommand> {
        self.command.as_ref()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Moves the cursor to a register offset. With a read command attached the
    /// offset is a register address, otherwise a plain byte index.
    pub fn seek(&mut self, offset: u16) -> Result<()> {
        let position = match self.command.as_ref().and_then(ProtocolCommand::first_register) {
            Some(first) => offset
                .checked_sub(first)
                .map(|registers| registers as usize * 2)
                .ok_or(Error::OffsetOutOfBounds { offset })?,
            None => offset as usize,
        };
        if position > self.data.len() {
            return Err(Error::OffsetOutOfBounds { offset });
        }
        self.position = position;
        Ok(())
    }

    /// Answers up to `n` bytes from the cursor, fewer when the payload ends
    /// first.
    pub fn read(&mut self, n: usize) -> Bytes {
        let end = self.data.len().min(self.position + n);
        let chunk = self.data.slice(self.position.min(end)..end);
        self.position = end;
        chunk
    }

    /// Fixed-width read; a short payload is an error.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.remaining() < N {
            return Err(Error::ShortRead {
                wanted: N,
                position: self.position,
                length: self.data.len(),
            });
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[self.position..self.position + N]);
        self.position += N;
        Ok(out)
    }
}
