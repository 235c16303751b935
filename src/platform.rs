// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Abstraction over the byte-addressed I/O space the `st32`/`ld32`
//! primitives talk to, so the reducer core can be exercised against a byte
//! buffer instead of real standard streams.

use std::io::{Read, Write};

/// External address space the `ld32`/`st32` primitives read and write.
/// Address 0 is standard input/output; other addresses are
/// implementation-defined.
pub trait Platform {
    /// Read a byte from `addr`. Address 0 reads the next byte of standard
    /// input, returning -1 at end of stream.
    fn ld32(&mut self, addr: i32) -> i32;

    /// Write the low byte of `value` to `addr`. Address 0 writes a byte to
    /// standard output.
    fn st32(&mut self, addr: i32, value: i32);

    /// Write the decimal representation of `value` to standard output.
    fn emit_int(&mut self, value: i32);
}

/// The real stdio-backed platform used by the CLI.
#[derive(Default)]
pub struct StdPlatform;

impl Platform for StdPlatform {
    fn ld32(&mut self, addr: i32) -> i32 {
        if addr != 0 {
            return 0;
        }
        let mut byte = [0u8; 1];
        match std::io::stdin().read(&mut byte) {
            Ok(1) => i32::from(byte[0]),
            _ => -1,
        }
    }

    fn st32(&mut self, addr: i32, value: i32) {
        if addr != 0 {
            return;
        }
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        let byte = [value as u8];
        let _ = std::io::stdout().write_all(&byte);
        let _ = std::io::stdout().flush();
    }

    fn emit_int(&mut self, value: i32) {
        print!("{value}");
        let _ = std::io::stdout().flush();
    }
}

/// In-memory platform for tests: feeds a fixed input buffer to `ld32(0)`
/// and records every byte/line written to `st32(0, _)`/`emitInt`.
#[derive(Default)]
pub struct MockPlatform {
    input: Vec<u8>,
    input_pos: usize,
    pub output: Vec<u8>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(input: impl Into<Vec<u8>>) -> Self {
        Self {
            input: input.into(),
            input_pos: 0,
            output: Vec::new(),
        }
    }

    #[must_use]
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

impl Platform for MockPlatform {
    fn ld32(&mut self, addr: i32) -> i32 {
        if addr != 0 {
            return 0;
        }
        if self.input_pos < self.input.len() {
            let b = self.input[self.input_pos];
            self.input_pos += 1;
            i32::from(b)
        } else {
            -1
        }
    }

    fn st32(&mut self, addr: i32, value: i32) {
        if addr != 0 {
            return;
        }
        #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
        self.output.push(value as u8);
    }

    fn emit_int(&mut self, value: i32) {
        self.output.extend(value.to_string().into_bytes());
    }
}
