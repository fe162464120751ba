use std::fmt::{self, Display};

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChunksError(err) => write!(f, "{err}"),
            Error::InvalidPayload => write!(f, "invalid event stream payload"),
        }
    }
}

/// A type for reading server-sent events from a chunk stream.
///
/// Only the `data` field is surfaced. Comments and the `event`, `id` and
/// `retry` fields are skipped, multi-line data is joined with `\n`.
pub struct Sse {
    buf: String,
    pending: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            pending: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain complete events before reading more from the stream.
            if let Some(event) = self.try_parse_event() {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                return Ok(None);
            };
            self.push_bytes(&bytes)?;
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), Error> {
        // A chunk boundary may split a multi-byte character.
        self.pending.extend_from_slice(bytes);
        match str::from_utf8(&self.pending) {
            Ok(s) => {
                self.buf.push_str(&s.replace('\r', ""));
                self.pending.clear();
            }
            Err(err) if err.error_len().is_none() => {
                let valid = err.valid_up_to();
                let s = str::from_utf8(&self.pending[..valid])
                    .map_err(|_| Error::InvalidPayload)?;
                self.buf.push_str(&s.replace('\r', ""));
                self.pending.drain(..valid);
            }
            Err(_) => return Err(Error::InvalidPayload),
        }
        Ok(())
    }

    fn try_parse_event(&mut self) -> Option<String> {
        loop {
            let eol_idx = self.buf.find("\n\n")?;
            let block: String = self.buf.drain(..eol_idx + 2).collect();

            let mut data: Option<String> = None;
            for line in block.lines() {
                let (field, value) = match line.split_once(':') {
                    Some((field, value)) => {
                        (field, value.strip_prefix(' ').unwrap_or(value))
                    }
                    None => (line, ""),
                };
                if field != "data" {
                    // Comments (empty field) and other fields.
                    continue;
                }
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Blocks without data (keep-alive comments) are skipped.
            if data.is_some() {
                return data;
            }
        }
    }
}
