// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! A template-instantiation graph-reduction machine for a small lazy
//! functional language, modelled after the Reduceron family of abstract
//! machines.
//!
//! The machine reduces a program compiled to a flat array of [`template::Template`]s
//! by repeatedly classifying the top of a value stack and either unwinding a
//! heap application, writing back an update, instantiating a template, firing
//! a primitive, or selecting a case alternative. See [`machine`] for the
//! dispatch loop and [`heap`] for the two-space copying collector that backs
//! it.

pub mod atom;
pub mod error;
pub mod heap;
pub mod machine;
pub mod platform;
pub mod prim;
pub mod template;

pub use error::Error;
pub use machine::{Machine, MachineConfig, Outcome, Report};
pub use platform::Platform;
pub use template::Template;

pub const VERSION: &str = match option_env!("REDVM_VERSION") {
    Some(v) => v,
    None => "unknown",
};
