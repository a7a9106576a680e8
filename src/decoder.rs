//! Dot-stuff and terminator decoding for multi-line POP3 replies
//!
//! A POP3 multi-line payload arrives dot-stuffed (any line starting
//! with `.` carries an extra leading `.`) and ends with the five-octet
//! sequence `CRLF . CRLF`. The decoder translates that wire form into
//! the raw message bytes: CRLF (and bare LF) line ends become `\n`,
//! stuffed dots are stripped, and decoding stops exactly at the
//! terminator.
//!
//! The tricky part is that TCP hands us arbitrary fragments: the
//! terminator may be split across up to five reads, and a `.` right
//! after a line break may still turn out to be ordinary stuffed data.
//! A character-level state machine handles this without lookahead by
//! re-processing the bytes a tentative match consumed whenever the
//! match falls through, which keeps total work linear.

use crate::error::{Error, Result};
use crate::transport::Transport;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Block size for pulling payload data off the transport.
const BLOCK: usize = 4096;

/// Decoder position within a potential line break / terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    /// Plain message bytes.
    #[default]
    Text,
    /// Saw `\r`.
    Cr,
    /// Saw `\r\n`; a following `.` starts stuffing or the terminator.
    CrLf,
    /// Saw `\r\n.`.
    CrLfDot,
    /// Saw `\r\n.\r`; one `\n` away from the terminator.
    CrLfDotCr,
    /// Saw a bare `\n`.
    Lf,
    /// Saw a bare `\n` followed by `.`.
    LfDot,
}

/// Result of feeding one block into the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum Feed {
    /// The block was consumed; more payload is expected.
    More,
    /// The terminator was reached after `consumed` input bytes; the
    /// remainder of the block belongs to the next server reply.
    Done { consumed: usize },
}

/// Streaming dot-stuff decoder. One instance decodes one payload.
#[derive(Debug, Default)]
pub struct Decoder {
    state: State,
    terminated: bool,
}

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a block of wire bytes, appending decoded output to `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Feed {
        if self.terminated {
            return Feed::Done { consumed: 0 };
        }
        for (i, &b) in chunk.iter().enumerate() {
            if self.step(b, out) {
                self.terminated = true;
                return Feed::Done { consumed: i + 1 };
            }
        }
        Feed::More
    }

    /// Advance the machine by one byte. Returns true on the terminator.
    ///
    /// A fallen-through tentative match re-enters `step` with the bytes
    /// it had swallowed; the re-entry always lands in `Text` or `Cr`,
    /// so the depth is bounded by the terminator length.
    fn step(&mut self, b: u8, out: &mut Vec<u8>) -> bool {
        match self.state {
            State::Text => match b {
                b'\r' => self.state = State::Cr,
                b'\n' => {
                    out.push(b'\n');
                    self.state = State::Lf;
                }
                _ => out.push(b),
            },
            State::Cr => {
                if b == b'\n' {
                    out.push(b'\n');
                    self.state = State::CrLf;
                } else {
                    // lone \r is data, the current byte starts over
                    out.push(b'\r');
                    self.state = State::Text;
                    return self.step(b, out);
                }
            }
            State::CrLf | State::Lf => {
                if b == b'.' {
                    self.state = if self.state == State::CrLf {
                        State::CrLfDot
                    } else {
                        State::LfDot
                    };
                } else {
                    self.state = State::Text;
                    return self.step(b, out);
                }
            }
            State::CrLfDot => match b {
                b'\r' => self.state = State::CrLfDotCr,
                b'.' => {
                    // stuffed dot, keep one
                    out.push(b'.');
                    self.state = State::Text;
                }
                _ => {
                    out.push(b'.');
                    self.state = State::Text;
                    return self.step(b, out);
                }
            },
            State::LfDot => {
                out.push(b'.');
                self.state = State::Text;
                if b != b'.' {
                    return self.step(b, out);
                }
            }
            State::CrLfDotCr => {
                if b == b'\n' {
                    return true;
                }
                // not the terminator after all; the dot was data and
                // the swallowed \r plus this byte must be re-read
                out.push(b'.');
                self.state = State::Text;
                self.step(b'\r', out);
                return self.step(b, out);
            }
        }
        false
    }
}

/// Pull a complete multi-line payload off the transport, decode it, and
/// stream it into `sink`. Returns the number of decoded bytes.
///
/// `progress` is invoked with the running decoded byte count after each
/// flushed block. Output is staged per block; a sink write failure
/// aborts the decode with a [`Error::Data`].
pub async fn read_multiline<W>(
    transport: &mut Transport,
    sink: &mut W,
    mut progress: impl FnMut(u64),
) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut decoder = Decoder::new();
    let mut staging: Vec<u8> = Vec::with_capacity(BLOCK);
    let mut chunk = [0_u8; BLOCK];
    let mut total: u64 = 0;

    loop {
        let n = transport.recv_block(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Data(
                "connection closed before end of multi-line reply".into(),
            ));
        }

        let outcome = decoder.feed(&chunk[..n], &mut staging);
        total += staging.len() as u64;
        sink.write_all(&staging)
            .await
            .map_err(|e| Error::Data(format!("could not write message data: {e}")))?;
        staging.clear();
        progress(total);

        if let Feed::Done { consumed } = outcome {
            transport.unread(&chunk[consumed..n]);
            sink.flush()
                .await
                .map_err(|e| Error::Data(format!("could not write message data: {e}")))?;
            return Ok(total);
        }
    }
}
