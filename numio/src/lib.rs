//! Text format shared by every front-end: whitespace-separated decimal
//! floats, row-major. The reader tolerates anything; missing or
//! unparsable values read as zero, which is the contract the streaming
//! plane relies on (it has no failure path).

use std::io::{self, BufRead, ErrorKind, Write};

/// Pulls whitespace-separated `f32` values out of a buffered reader.
pub struct FloatReader<R> {
    input: R,
}

impl<R: BufRead> FloatReader<R> {
    pub fn new(input: R) -> Self {
        FloatReader { input }
    }

    /// Next value in the stream. End of input, read errors and tokens
    /// that do not parse as a float all read as `0.0`.
    pub fn next_f32(&mut self) -> f32 {
        match self.next_token() {
            Some(token) => std::str::from_utf8(&token)
                .ok()
                .and_then(|text| text.parse().ok())
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    fn next_token(&mut self) -> Option<Vec<u8>> {
        let mut token = Vec::new();
        loop {
            let (consumed, complete) = {
                let buf = match self.input.fill_buf() {
                    Ok(buf) => buf,
                    Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(_) => {
                        return if token.is_empty() { None } else { Some(token) };
                    }
                };
                if buf.is_empty() {
                    return if token.is_empty() { None } else { Some(token) };
                }
                let mut consumed = 0;
                let mut complete = false;
                for &byte in buf {
                    consumed += 1;
                    if byte.is_ascii_whitespace() {
                        if !token.is_empty() {
                            complete = true;
                            break;
                        }
                    } else {
                        token.push(byte);
                    }
                }
                (consumed, complete)
            };
            self.input.consume(consumed);
            if complete {
                return Some(token);
            }
        }
    }
}

/// One output row: values separated by single spaces, with a trailing
/// space before the newline, matching the files the readers consume.
pub fn write_row<W: Write>(out: &mut W, row: &[f32]) -> io::Result<()> {
    for value in row {
        write!(out, "{} ", value)?;
    }
    writeln!(out)
}
