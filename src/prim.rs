// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Primitive operators and their evaluation.

use crate::atom::Atom;
use crate::platform::Platform;

/// Identifier of a primitive operator, carried inside `Atom::Pri`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Prim {
    Add,
    Sub,
    Eq,
    Neq,
    Leq,
    And,
    Emit,
    EmitInt,
    St32,
    Ld32,
    Seq,
}

impl Prim {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Eq => "==",
            Self::Neq => "/=",
            Self::Leq => "<=",
            Self::And => ".&.",
            Self::Emit => "emit",
            Self::EmitInt => "emitInt",
            Self::St32 => "st32",
            Self::Ld32 => "ld32",
            Self::Seq => "!",
        }
    }

    #[must_use]
    pub fn from_name(s: &str) -> Option<Self> {
        Some(match s {
            "+" => Self::Add,
            "-" => Self::Sub,
            "==" => Self::Eq,
            "/=" => Self::Neq,
            "<=" => Self::Leq,
            ".&." => Self::And,
            "emit" => Self::Emit,
            "emitInt" => Self::EmitInt,
            "st32" => Self::St32,
            "ld32" => Self::Ld32,
            "!" => Self::Seq,
            _ => return None,
        })
    }
}

const TRUE: Atom = Atom::Con { arity: 0, index: 1 };
const FALSE: Atom = Atom::Con { arity: 0, index: 0 };

/// Evaluate a non-`Seq` primitive. `a` and `b` are already-forced integer
/// atoms in canonical (non-swapped) order; `k` is the third, speculative
/// argument slot `applyPrim` reads defensively for `Emit`/`St32`'s
/// continuation value.
#[expect(
    clippy::many_single_char_names,
    reason = "a, b, k mirror the applyPrim operand/continuation names"
)]
pub fn eval(p: Prim, a: Atom, b: Atom, k: Atom, platform: &mut dyn Platform, trace: bool) -> Atom {
    let n = a.as_int().unwrap_or_default();
    let m = b.as_int().unwrap_or_default();
    match p {
        Prim::Add => Atom::int(n.wrapping_add(m)),
        Prim::Sub => Atom::int(n.wrapping_sub(m)),
        Prim::Eq => {
            if n == m {
                TRUE
            } else {
                FALSE
            }
        }
        Prim::Neq => {
            if n == m {
                FALSE
            } else {
                TRUE
            }
        }
        Prim::Leq => {
            if n <= m {
                TRUE
            } else {
                FALSE
            }
        }
        Prim::And => Atom::int(n & m),
        Prim::Emit => {
            platform.st32(0, n & 0xff);
            if trace {
                tracing::trace!(byte = n & 0xff, "emit");
            }
            b
        }
        Prim::EmitInt => {
            platform.emit_int(n);
            if trace {
                tracing::trace!(value = n, "emitInt");
            }
            b
        }
        Prim::St32 => {
            platform.st32(n, m);
            if trace {
                tracing::trace!(addr = n, value = m, "st32");
            }
            k
        }
        Prim::Ld32 => {
            let v = platform.ld32(n);
            if trace {
                tracing::trace!(addr = n, value = v, "ld32");
            }
            Atom::int(v)
        }
        Prim::Seq => unreachable!("Seq is handled by the dispatch loop, not eval"),
    }
}
