// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! Heap of application nodes and the two-space copying collector over it.

use crate::atom::{Atom, HeapAddr};
use crate::error::RuntimeError;

/// Discriminates what an application node represents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AppTag {
    /// Ordinary application.
    Ap,
    /// Scrutinee whose head constructor selects an alternative via `info`
    /// (a LUT id).
    Case,
    /// Speculative primitive redex whose result is bound to register
    /// `info`.
    Prim,
    /// Forwarding marker left behind during collection; `atoms[0]` is the
    /// new location.
    Collected,
}

/// A heap application node: 1-4 atoms plus tag metadata.
#[derive(Clone, Debug)]
pub struct App {
    pub tag: AppTag,
    pub nf: bool,
    pub info: u32,
    pub atoms: Vec<Atom>,
}

impl App {
    #[must_use]
    pub fn forwarding(to: Atom) -> Self {
        Self {
            tag: AppTag::Collected,
            nf: true,
            info: 0,
            atoms: vec![to],
        }
    }

    /// A size-1, non-`Case` application whose sole atom is already a
    /// literal: the collector can inline it instead of copying a cell.
    #[must_use]
    fn is_simple(&self) -> bool {
        self.atoms.len() == 1
            && self.tag != AppTag::Case
            && matches!(self.atoms[0], Atom::Int(_) | Atom::Con { .. })
    }
}

/// A pending update: once the stack shrinks to `saddr` with a head-normal
/// atom on top, write it back into the heap cell at `haddr`.
#[derive(Clone, Copy, Debug)]
pub struct UpdateEntry {
    pub saddr: usize,
    pub haddr: HeapAddr,
}

/// Two equal-sized arenas of application nodes, swapped at the end of every
/// collection.
pub struct Heap {
    live: Vec<App>,
    to_space: Vec<App>,
    hp: usize,
    capacity: usize,
    pub gc_count: u64,
}

impl Heap {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            live: Vec::with_capacity(capacity),
            to_space: Vec::with_capacity(capacity),
            hp: 0,
            capacity,
            gc_count: 0,
        }
    }

    #[must_use]
    pub const fn occupancy(&self) -> usize {
        self.hp
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Allocate a new application node, returning its address.
    ///
    /// # Errors
    /// Returns [`RuntimeError::HeapExhausted`] if the arena is at capacity.
    pub fn alloc(&mut self, app: App) -> Result<HeapAddr, RuntimeError> {
        if self.hp >= self.capacity {
            return Err(RuntimeError::HeapExhausted);
        }
        #[allow(clippy::cast_possible_truncation)]
        let addr = self.hp as HeapAddr;
        if self.hp < self.live.len() {
            self.live[self.hp] = app;
        } else {
            self.live.push(app);
        }
        self.hp += 1;
        Ok(addr)
    }

    #[must_use]
    pub fn get(&self, addr: HeapAddr) -> &App {
        &self.live[addr as usize]
    }

    pub fn set(&mut self, addr: HeapAddr, app: App) {
        self.live[addr as usize] = app;
    }

    /// Whether a collection is warranted: heap occupancy is within the
    /// safety margin of capacity.
    #[must_use]
    pub fn should_collect(&self, margin: usize) -> bool {
        self.hp + margin >= self.capacity
    }

    /// Run a full collection, rewriting every atom reachable from `stack`
    /// and dropping update entries whose target became unreachable.
    pub fn collect(&mut self, stack: &mut [Atom], updates: &mut Vec<UpdateEntry>) {
        self.gc_count += 1;
        self.to_space.clear();

        for atom in stack.iter_mut() {
            *atom = self.copy_child(*atom);
        }

        let mut scan = 0;
        while scan < self.to_space.len() {
            let mut app = self.to_space[scan].clone();
            for atom in &mut app.atoms {
                *atom = self.copy_child(*atom);
            }
            self.to_space[scan] = app;
            scan += 1;
        }

        updates.retain_mut(|entry| match self.forwarded(entry.haddr) {
            Some(new_addr) => {
                entry.haddr = new_addr;
                true
            }
            None => false,
        });

        std::mem::swap(&mut self.live, &mut self.to_space);
        self.hp = self.live.len();
    }

    /// Address an already-forwarded cell now lives at, if it was copied.
    fn forwarded(&self, addr: HeapAddr) -> Option<HeapAddr> {
        match self.live.get(addr as usize) {
            Some(App {
                tag: AppTag::Collected,
                atoms,
                ..
            }) => match atoms[0] {
                Atom::Ptr { addr, .. } => Some(addr),
                _ => None,
            },
            _ => None,
        }
    }

    fn copy_child(&mut self, atom: Atom) -> Atom {
        let Atom::Ptr { shared, addr } = atom else {
            return atom;
        };
        let app = &self.live[addr as usize];
        if app.tag == AppTag::Collected {
            return match app.atoms[0] {
                Atom::Ptr { addr: new_addr, .. } => Atom::Ptr {
                    shared,
                    addr: new_addr,
                },
                other => other,
            };
        }
        if app.is_simple() {
            return app.atoms[0];
        }
        let app = app.clone();
        #[allow(clippy::cast_possible_truncation)]
        let new_addr = self.to_space.len() as HeapAddr;
        self.to_space.push(app);
        self.live[addr as usize] = App::forwarding(Atom::ptr(shared, new_addr));
        Atom::ptr(shared, new_addr)
    }
}

#[cfg(test)]
mod heap_test {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    fn simple_app(n: i32) -> App {
        App {
            tag: AppTag::Ap,
            nf: true,
            info: 0,
            atoms: vec![Atom::int(n)],
        }
    }

    #[test]
    fn alloc_returns_increasing_addresses() {
        let mut h = Heap::new(16);
        let a = h.alloc(simple_app(1)).unwrap();
        let b = h.alloc(simple_app(2)).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
    }

    #[test]
    fn alloc_fails_at_capacity() {
        let mut h = Heap::new(1);
        h.alloc(simple_app(1)).unwrap();
        assert!(matches!(
            h.alloc(simple_app(2)),
            Err(RuntimeError::HeapExhausted)
        ));
    }

    #[test]
    fn collect_inlines_simple_cells() {
        let mut h = Heap::new(16);
        let addr = h.alloc(simple_app(7)).unwrap();
        let mut stack = [Atom::ptr(true, addr)];
        let mut updates = Vec::new();
        h.collect(&mut stack, &mut updates);
        assert_eq!(stack[0], Atom::int(7));
        assert_eq!(h.occupancy(), 0);
    }

    #[test]
    fn collect_drops_obsolete_updates() {
        let mut h = Heap::new(16);
        let mut stack = [Atom::int(0)];
        let mut updates = vec![UpdateEntry { saddr: 0, haddr: 99 }];
        h.collect(&mut stack, &mut updates);
        assert!(updates.is_empty());
    }

    #[test]
    fn collect_preserves_reachable_application() {
        let mut h = Heap::new(16);
        let inner = h
            .alloc(App {
                tag: AppTag::Ap,
                nf: false,
                info: 0,
                atoms: vec![Atom::int(1), Atom::int(2)],
            })
            .unwrap();
        let mut stack = [Atom::ptr(true, inner)];
        let mut updates = Vec::new();
        h.collect(&mut stack, &mut updates);
        let Atom::Ptr { addr, .. } = stack[0] else {
            panic!("expected pointer")
        };
        assert_eq!(h.get(addr).atoms, vec![Atom::int(1), Atom::int(2)]);
    }
}
