// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! The dispatch loop and machine state: four stacks, a heap, and the
//! template code array.

use crate::atom::{Atom, HeapAddr};
use crate::error::RuntimeError;
use crate::heap::{App, AppTag, Heap, UpdateEntry};
use crate::platform::Platform;
use crate::prim::{self, Prim};
use crate::template::Template;

/// Construction-time limits, overridable from the CLI; defaults mirror the
/// reference implementation's compile-time constants.
#[derive(Clone, Copy, Debug)]
pub struct MachineConfig {
    pub max_stack: usize,
    pub max_heap_apps: usize,
    pub max_templates: usize,
    pub stack_margin: usize,
    pub heap_margin: usize,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_stack: 8000,
            max_heap_apps: 32_000,
            max_templates: 8000,
            stack_margin: 100,
            heap_margin: 200,
        }
    }
}

#[derive(Default, Clone, Copy, Debug)]
pub struct Counters {
    pub swap: u64,
    pub prim: u64,
    pub unwind: u64,
    pub update: u64,
    pub apply: u64,
    pub select: u64,
    pub prs_success: u64,
    pub prs_candidate: u64,
}

impl Counters {
    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.swap + self.prim + self.unwind + self.update + self.apply + self.select
    }
}

/// How the machine stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Reached `|S|==1` with an integer on top.
    Result(i32),
    /// `ld32(0)` returned a negative value; the program asked to exit.
    Halted,
}

#[derive(Clone, Debug)]
pub struct Report {
    pub outcome: Outcome,
    pub counters: Counters,
    pub gc_count: u64,
}

pub struct Machine<'p> {
    code: Vec<Template>,
    stack: Vec<Atom>,
    updates: Vec<UpdateEntry>,
    luts: Vec<u32>,
    regs: [Atom; 8],
    heap: Heap,
    config: MachineConfig,
    platform: &'p mut dyn Platform,
    trace: bool,
    counters: Counters,
}

impl<'p> Machine<'p> {
    /// Build a machine ready to run `code[0]` (the program entry point).
    ///
    /// # Errors
    /// Returns [`RuntimeError::NoTemplates`] if `code` is empty, or
    /// [`RuntimeError::TooManyTemplates`] if `code` exceeds
    /// `config.max_templates`.
    pub fn new(
        code: Vec<Template>,
        config: MachineConfig,
        platform: &'p mut dyn Platform,
        trace: bool,
    ) -> Result<Self, RuntimeError> {
        if code.is_empty() {
            return Err(RuntimeError::NoTemplates);
        }
        if code.len() > config.max_templates {
            return Err(RuntimeError::TooManyTemplates {
                found: code.len(),
                max: config.max_templates,
            });
        }
        let mut stack = Vec::with_capacity(config.max_stack);
        stack.push(Atom::Fun {
            arity: 0,
            original: true,
            id: 0,
        });
        Ok(Self {
            code,
            stack,
            updates: Vec::new(),
            luts: Vec::new(),
            regs: [Atom::Int(0); 8],
            heap: Heap::new(config.max_heap_apps),
            config,
            platform,
            trace,
            counters: Counters::default(),
        })
    }

    /// Run dispatch to completion.
    ///
    /// # Errors
    /// Returns a [`RuntimeError`] if any stack exceeds its configured limit
    /// or the program dereferences a malformed heap/template reference.
    ///
    /// # Panics
    /// Never: the dispatch loop's `|S| ≥ 1` invariant holds for every
    /// reachable state, so `self.stack.last()` always succeeds.
    #[expect(
        clippy::expect_used,
        reason = "the |S| >= 1 invariant holds for every reachable state"
    )]
    pub fn run(&mut self) -> Result<Report, RuntimeError> {
        loop {
            if self.stack.len() + self.config.stack_margin >= self.config.max_stack {
                return Err(RuntimeError::StackOverflow { stack: "value" });
            }
            if self.updates.len() + self.config.stack_margin >= self.config.max_stack {
                return Err(RuntimeError::StackOverflow { stack: "update" });
            }
            if self.luts.len() + self.config.stack_margin >= self.config.max_stack {
                return Err(RuntimeError::StackOverflow { stack: "LUT" });
            }

            let top = *self.stack.last().expect("stack never empties");

            if self.stack.len() == 1 {
                if let Atom::Int(n) = top {
                    return Ok(Report {
                        outcome: Outcome::Result(n),
                        counters: self.counters,
                        gc_count: self.heap.gc_count,
                    });
                }
            }

            if self.heap.should_collect(self.config.heap_margin) && top.is_collectable() {
                let before = self.heap.occupancy();
                self.heap.collect(&mut self.stack, &mut self.updates);
                tracing::debug!(before, after = self.heap.occupancy(), "collected heap");
            }

            let top = *self.stack.last().expect("stack never empties");

            if let Atom::Ptr { shared, addr } = top {
                self.unwind(shared, addr);
                continue;
            }

            if let Some(entry) = self.updates.last().copied() {
                let arity = top.arity().ok_or(RuntimeError::InvalidTopOfStack)?;
                if arity > self.stack.len() - 1 - entry.saddr {
                    self.update(entry.saddr, entry.haddr)?;
                    continue;
                }
            }

            match top {
                Atom::Int(n) => {
                    if let Some(Outcome::Halted) = self.apply_prim(n)? {
                        return Ok(Report {
                            outcome: Outcome::Halted,
                            counters: self.counters,
                            gc_count: self.heap.gc_count,
                        });
                    }
                }
                Atom::Con { index, .. } => self.case_select(index)?,
                Atom::Fun { id, .. } => {
                    if let Some(Outcome::Halted) = self.apply(id)? {
                        return Ok(Report {
                            outcome: Outcome::Halted,
                            counters: self.counters,
                            gc_count: self.heap.gc_count,
                        });
                    }
                }
                Atom::Arg { .. } | Atom::Reg { .. } | Atom::Ptr { .. } | Atom::Pri { .. } => {
                    return Err(RuntimeError::InvalidTopOfStack)
                }
            }
        }
    }

    fn unwind(&mut self, shared: bool, addr: HeapAddr) {
        self.counters.unwind += 1;
        let mut app = self.heap.get(addr).clone();
        let in_nf = app.tag != AppTag::Case && app.nf;
        if shared && !in_nf {
            self.updates.push(UpdateEntry {
                saddr: self.stack.len() - 1,
                haddr: addr,
            });
        }
        if shared {
            for atom in &mut app.atoms {
                *atom = atom.shared();
            }
        }
        if app.tag == AppTag::Case {
            self.luts.push(app.info);
        }
        self.stack.pop();
        for &atom in app.atoms.iter().rev() {
            self.stack.push(atom);
        }
    }

    fn update(&mut self, saddr: usize, haddr: HeapAddr) -> Result<(), RuntimeError> {
        self.counters.update += 1;
        let top_idx = self.stack.len() - 1;
        let mut len = top_idx + 1 - saddr;
        let mut head = self.stack[top_idx];
        self.stack[top_idx] = Atom::dash(true, head);
        head = self.stack[top_idx];
        let mut cursor = top_idx;

        loop {
            if len == 0 {
                return Err(RuntimeError::ZeroSizeUpdate);
            }
            let chunk = len.min(4);
            let mut atoms = Vec::with_capacity(chunk);
            atoms.push(head);
            let mut c = cursor;
            for _ in 1..chunk {
                c -= 1;
                self.stack[c] = Atom::dash(true, self.stack[c]);
                atoms.push(self.stack[c]);
            }
            if chunk == len {
                self.heap.set(
                    haddr,
                    App {
                        tag: AppTag::Ap,
                        nf: true,
                        info: 0,
                        atoms,
                    },
                );
                self.updates.pop();
                return Ok(());
            }
            let new_addr = self.heap.alloc(App {
                tag: AppTag::Ap,
                nf: true,
                info: 0,
                atoms,
            })?;
            cursor = c;
            len -= 3;
            head = Atom::ptr(true, new_addr);
        }
    }

    /// Instantiate template `id`. Returns `Halted` if a speculated `ld32`
    /// fired during instantiation returned a negative value.
    fn apply(&mut self, id: u32) -> Result<Option<Outcome>, RuntimeError> {
        self.counters.apply += 1;
        let t = self
            .code
            .get(id as usize)
            .ok_or(RuntimeError::UnknownTemplate { id })?
            .clone();
        #[allow(clippy::cast_possible_truncation)]
        let base = self.heap.occupancy() as HeapAddr;
        let frame_len = self.stack.len();
        let arity = t.arity as usize;
        // `arg_ptr` indexes the topmost argument (just below the `Fun` atom
        // itself); with arity 0 there is no argument to index and no `Arg`
        // atom in the template can reference it, so the saturated value is
        // never dereferenced.
        let arg_ptr = frame_len.saturating_sub(2);

        for &lut in t.luts.iter().rev() {
            self.luts.push(lut);
        }

        for app in &t.apps {
            if let Some(outcome) = self.inst_app(base, arg_ptr, app)? {
                return Ok(Some(outcome));
            }
        }

        for &atom in t.pushs.iter().rev() {
            let v = Self::inst(base, arg_ptr, &self.stack, &self.regs, atom);
            self.stack.push(v);
        }

        let start = frame_len - 1 - arity;
        self.stack.drain(start..frame_len);
        Ok(None)
    }

    /// Instantiate one template application. Returns `Halted` if a
    /// successfully speculated `ld32` returned a negative value.
    fn inst_app(
        &mut self,
        base: HeapAddr,
        arg_ptr: usize,
        app: &App,
    ) -> Result<Option<Outcome>, RuntimeError> {
        if app.tag == AppTag::Prim {
            let a = Self::get_prim_arg(arg_ptr, &self.stack, &self.regs, app.atoms[0]);
            let b = Self::get_prim_arg(arg_ptr, &self.stack, &self.regs, app.atoms[2]);
            let Atom::Pri { id, .. } = app.atoms[1] else {
                return Err(RuntimeError::InvalidTopOfStack);
            };
            self.counters.prs_candidate += 1;
            if a.is_int() && b.is_int() {
                let result = prim::eval(id, a, b, b, self.platform, self.trace);
                if id == Prim::Ld32 {
                    if let Some(n) = result.as_int() {
                        if n < 0 {
                            return Ok(Some(Outcome::Halted));
                        }
                    }
                }
                self.regs[app.info as usize] = result;
                self.counters.prs_success += 1;
                return Ok(None);
            }
            let atoms = app
                .atoms
                .iter()
                .map(|&atom| Self::inst(base, arg_ptr, &self.stack, &self.regs, atom))
                .collect();
            let addr = self.heap.alloc(App {
                tag: AppTag::Prim,
                nf: false,
                info: app.info,
                atoms,
            })?;
            self.regs[app.info as usize] = Atom::ptr(false, addr);
            return Ok(None);
        }

        let atoms = app
            .atoms
            .iter()
            .map(|&atom| Self::inst(base, arg_ptr, &self.stack, &self.regs, atom))
            .collect();
        self.heap.alloc(App {
            tag: app.tag,
            nf: app.nf,
            info: app.info,
            atoms,
        })?;
        Ok(None)
    }

    fn inst(base: HeapAddr, arg_ptr: usize, stack: &[Atom], regs: &[Atom; 8], a: Atom) -> Atom {
        match a {
            Atom::Ptr { shared, addr } => Atom::Ptr {
                shared,
                addr: base + addr,
            },
            Atom::Arg { shared, index } => Atom::dash(shared, stack[arg_ptr - index as usize]),
            Atom::Reg { shared, index } => Atom::dash(shared, regs[index as usize]),
            other => other,
        }
    }

    fn get_prim_arg(arg_ptr: usize, stack: &[Atom], regs: &[Atom; 8], a: Atom) -> Atom {
        match a {
            Atom::Arg { index, .. } => stack[arg_ptr - index as usize],
            Atom::Reg { index, .. } => regs[index as usize],
            other => other,
        }
    }

    /// Fires the `PRI`/`INT` redex on top of the stack. Returns `Halted` if
    /// `ld32(0)` returned a negative value.
    fn apply_prim(&mut self, top_int: i32) -> Result<Option<Outcome>, RuntimeError> {
        let len = self.stack.len();
        let top_idx = len - 1;
        let Atom::Pri { arity, swap, id } = self.stack[top_idx - 1] else {
            return Err(RuntimeError::InvalidTopOfStack);
        };

        if id == Prim::Seq {
            // The forced value is discarded and `k`, already sitting one
            // slot below it, becomes the new top once the frame collapses
            // by `arity` — exactly like any other binary primitive's
            // result.
            self.counters.prim += 1;
            self.stack.truncate(len - arity as usize);
            return Ok(None);
        }

        let second = self.stack[top_idx - 2];
        if second.is_int() || id == Prim::Emit || id == Prim::EmitInt {
            self.counters.prim += 1;
            let k = if top_idx >= 3 {
                self.stack[top_idx - 3]
            } else {
                self.stack[0]
            };
            let (a, b) = if swap {
                (second, Atom::Int(top_int))
            } else {
                (Atom::Int(top_int), second)
            };
            let result = prim::eval(id, a, b, k, self.platform, self.trace);
            if id == Prim::Ld32 {
                if let Some(n) = result.as_int() {
                    if n < 0 {
                        return Ok(Some(Outcome::Halted));
                    }
                }
            }
            self.stack[top_idx - 2] = result;
            self.stack.truncate(len - arity as usize);
            return Ok(None);
        }

        self.counters.swap += 1;
        self.stack[top_idx - 1] = Atom::Pri {
            arity,
            swap: !swap,
            id,
        };
        self.stack.swap(top_idx, top_idx - 2);
        Ok(None)
    }

    fn case_select(&mut self, index: u8) -> Result<(), RuntimeError> {
        self.counters.select += 1;
        let lut = self.luts.pop().ok_or(RuntimeError::EmptyLutStack)?;
        let top_idx = self.stack.len() - 1;
        self.stack[top_idx] = Atom::Fun {
            arity: 0,
            original: true,
            id: lut + u32::from(index),
        };
        Ok(())
    }
}

#[cfg(test)]
mod machine_test {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;
    use crate::platform::MockPlatform;
    use crate::template::parse;

    pub(super) fn run_src(src: &str) -> Report {
        let code = parse(src).unwrap();
        let mut platform = MockPlatform::default();
        let mut m = Machine::new(code, MachineConfig::default(), &mut platform, false).unwrap();
        m.run().unwrap()
    }

    #[test]
    fn constant_main_terminates() {
        let r = run_src(r#"("main", 0, [], [INT(42)], [])"#);
        assert_eq!(r.outcome, Outcome::Result(42));
    }

    #[test]
    fn rejects_program_exceeding_max_templates() {
        let src = r#"
            ("main", 0, [], [FUN True (0) (1)], [])
            ("aux", 0, [], [INT(0)], [])
        "#;
        let code = parse(src).unwrap();
        let config = MachineConfig {
            max_templates: 1,
            ..MachineConfig::default()
        };
        let mut platform = MockPlatform::default();
        let result = Machine::new(code, config, &mut platform, false);
        assert_eq!(result.err(), Some(RuntimeError::TooManyTemplates { found: 2, max: 1 }));
    }

    #[test]
    fn addition_via_prs() {
        let src = r#"("main", 0, [], [REG False (0)], [PRIM 0 [INT(2), PRI (2) "+", INT(3)]])"#;
        let r = run_src(src);
        assert_eq!(r.outcome, Outcome::Result(5));
        assert_eq!(r.counters.prs_success, 1);
    }

    #[test]
    fn boolean_primitive_selects_case() {
        // the PRIM app's operands are literal, so speculation always succeeds
        // and consumes no heap slot; the CASE app is therefore the first real
        // allocation and lands at `base + 0`.
        let src = r#"
            ("main", 0, [], [VAR False (0)], [
                PRIM 0 [INT(3), PRI (2) "<=", INT(3)],
                CASE 0 [REG False (0)]
            ])
            ("true", 0, [], [INT(1)], [])
            ("false", 0, [], [INT(0)], [])
        "#;
        let r = run_src(src);
        assert_eq!(r.outcome, Outcome::Result(1));
        assert!(r.counters.select >= 1);
    }

    #[test]
    fn shared_redex_is_forced_once() {
        // `x = 1+2 in x+x`: both occurrences of `x` reference the same heap
        // cell, so the addition inside it must fire exactly once.
        let src = r#"
            ("main", 0, [], [VAR True (1)], [
                APP False [INT(1), PRI (2) "+", INT(2)],
                APP False [VAR True (0), PRI (2) "+", VAR True (0)]
            ])
        "#;
        let r = run_src(src);
        assert_eq!(r.outcome, Outcome::Result(6));
        assert_eq!(r.counters.prim, 2);
        assert!(r.counters.update >= 1);
    }

    #[test]
    fn gc_reclaims_bounded_live_set_under_pressure() {
        // count(n) = if n <= 0 then 0 else count(n-1), tail-recursing through
        // `recurse`. Every call allocates one comparison cell and one CASE
        // cell, both of which are garbage the instant the case selects its
        // successor, so the live set never grows past a handful of cells
        // even though the run allocates far more than a tiny heap's
        // capacity.
        let src = r#"
            ("main", 0, [], [FUN True (1) (1), INT(20)], [])
            ("count", 1, [], [VAR False (1), ARG False (0)], [
                APP False [ARG False (0), PRI (2) "<=", INT(0)],
                CASE 2 [VAR False (0)]
            ])
            ("recurse", 1, [], [FUN True (1) (1), REG False (0)], [
                PRIM 0 [ARG False (0), PRI (2) "-", INT(1)]
            ])
            ("zero", 1, [], [INT(0)], [])
        "#;
        let code = parse(src).unwrap();
        let config = MachineConfig {
            max_heap_apps: 4,
            heap_margin: 1,
            ..MachineConfig::default()
        };
        let mut platform = MockPlatform::default();
        let mut m = Machine::new(code, config, &mut platform, false).unwrap();
        let r = m.run().unwrap();
        assert_eq!(r.outcome, Outcome::Result(0));
        assert!(r.gc_count >= 1, "expected at least one collection");
    }

    #[test]
    fn io_termination_on_negative_ld32() {
        let src = r#"("main", 0, [], [], [PRIM 0 [INT(0), PRI (2) "ld32", INT(0)]])"#;
        let code = parse(src).unwrap();
        let mut platform = MockPlatform::new(Vec::<u8>::new());
        let mut m = Machine::new(code, MachineConfig::default(), &mut platform, false).unwrap();
        let r = m.run().unwrap();
        assert_eq!(r.outcome, Outcome::Halted);
    }

    #[test]
    fn seq_forces_evaluation_order() {
        let src = r#"
            ("main", 0, [], [VAR False (1)], [
                APP True [INT(65), PRI (2) "emit", INT(0)],
                APP False [VAR False (0), PRI (2) "!", INT(97)]
            ])
        "#;
        let code = parse(src).unwrap();
        let mut platform = MockPlatform::default();
        let mut m = Machine::new(code, MachineConfig::default(), &mut platform, false).unwrap();
        let r = m.run().unwrap();
        assert_eq!(r.outcome, Outcome::Result(97));
        assert_eq!(platform.output_string(), "A");
    }
}
