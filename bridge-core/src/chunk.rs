use craftlink_bridge_protocol::{tellraw_command, CommandRequest};
use thiserror::Error;

/// Stand-in request id with the same width as a real UUID.
const PLACEHOLDER_REQUEST_ID: &str = "00000000-0000-0000-0000-000000000000";

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("frame budget of {budget} bytes cannot hold the {overhead}-byte envelope")]
    BudgetBelowOverhead { budget: usize, overhead: usize },
    #[error("character {ch:?} alone needs a {frame_bytes}-byte frame, budget is {budget}")]
    CharExceedsBudget {
        ch: char,
        frame_bytes: usize,
        budget: usize,
    },
    #[error("failed to encode chat frame: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Splits chat text into pieces whose `tellraw` command-request frame fits
/// the peer's frame limit.
#[derive(Debug, Clone)]
pub struct ChunkPacker {
    max_frame_bytes: usize,
}

impl ChunkPacker {
    pub fn new(max_frame_bytes: usize) -> Result<Self, ChunkError> {
        let overhead = frame_bytes("")?;
        if overhead >= max_frame_bytes {
            return Err(ChunkError::BudgetBelowOverhead {
                budget: max_frame_bytes,
                overhead,
            });
        }
        Ok(Self { max_frame_bytes })
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Lazily yields chunks; each call starts over from the full text.
    pub fn chunks<'p, 'a>(&'p self, text: &'a str) -> Chunks<'p, 'a> {
        Chunks {
            packer: self,
            remaining: text,
            failed: false,
        }
    }

    pub fn pack<'a>(&self, text: &'a str) -> Result<Vec<&'a str>, ChunkError> {
        self.chunks(text).collect()
    }

    /// Byte offset of the end of the longest prefix of `text` that fits.
    fn longest_fitting_prefix(&self, text: &str) -> Result<usize, ChunkError> {
        if frame_bytes(text)? <= self.max_frame_bytes {
            return Ok(text.len());
        }

        let ends: Vec<usize> = text
            .char_indices()
            .map(|(idx, ch)| idx + ch.len_utf8())
            .collect();

        // `lo` chars always fit (zero does, by construction); `hi` chars never do.
        let (mut lo, mut hi) = (0usize, ends.len());
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if frame_bytes(&text[..ends[mid - 1]])? <= self.max_frame_bytes {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        if lo == 0 {
            let first = &text[..ends[0]];
            return Err(ChunkError::CharExceedsBudget {
                ch: first.chars().next().unwrap_or_default(),
                frame_bytes: frame_bytes(first)?,
                budget: self.max_frame_bytes,
            });
        }
        Ok(ends[lo - 1])
    }
}

/// Size of the complete command-request frame carrying `text` as chat.
pub(crate) fn frame_bytes(text: &str) -> Result<usize, serde_json::Error> {
    let request = CommandRequest::new(PLACEHOLDER_REQUEST_ID, tellraw_command(text));
    Ok(serde_json::to_vec(&request)?.len())
}

pub struct Chunks<'p, 'a> {
    packer: &'p ChunkPacker,
    remaining: &'a str,
    failed: bool,
}

impl<'a> Iterator for Chunks<'_, 'a> {
    type Item = Result<&'a str, ChunkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }
        match self.packer.longest_fitting_prefix(self.remaining) {
            Ok(end) => {
                let (chunk, rest) = self.remaining.split_at(end);
                self.remaining = rest;
                Some(Ok(chunk))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}
