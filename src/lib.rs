//! emsbus: a participant on the EMS bus of Buderus, Nefit, Sieger and Junkers heating
//! systems.
//!
//! The crate answers polls from the bus master, keeps a queue of outgoing reads and writes
//! (confirming every write by reading it back), recognises the boiler and thermostat from
//! their Version telegrams and hands every decoded telegram to registered handlers.
//!
//! [`api::ems::EmsEngine`] is the protocol engine itself and does no I/O. [`api::ems::EmsBus`]
//! runs it on a serial port with one engine thread and one reader thread. The `emsbus` binary
//! wraps the latter in a small CLI.

pub mod api;
#[doc(hidden)]
pub mod cli;
#[doc(hidden)]
pub mod core;
pub mod protocol;

pub use api::*;
