//! # Container unwrapping library (`unself`)
//!
//! `unself` turns a signed executable container, as produced by the
//! console's signing tools, back into the plain ELF64 image it wraps.
//! The container stores the ELF header and program header table
//! verbatim, followed by a table of entries each holding one
//! segment's bytes; rebuilding the ELF means putting every entry back
//! at the offset its program header names.
//!
//! The library does no I/O and prints nothing. [`convert()`] takes the
//! container's bytes and returns the ELF's, together with a list of
//! [`Diagnostic`]s describing what was found and done. Each stage is
//! also usable on its own:
//!
//! - [`container::parse`] decodes the container into an [`Image`];
//! - [`reconstruct::reconstruct`] rebuilds the ELF from it;
//! - [`patch`] repairs two kinds of damage signers leave behind;
//! - [`inspect`] lists the vendor dynamic-linking tables.
//!
//! Only unencrypted, uncompressed containers can be converted.

#![no_std]
#![warn(clippy::pedantic, missing_docs)]
#![allow(
    clippy::must_use_candidate,
    clippy::cast_possible_truncation,
    clippy::module_name_repetitions,
    clippy::cast_lossless,
    clippy::too_many_lines
)]

extern crate alloc;

pub mod container;
pub mod convert;
pub mod decode;
pub mod diag;
pub mod elf;
pub mod inspect;
pub mod patch;
pub mod reconstruct;

pub use self::container::{FormatError, Image};
pub use self::convert::{convert, Conversion, ConvertError, Options};
pub use self::diag::{Diagnostic, Diagnostics, Event};
pub use self::patch::FirstSegmentHeuristic;
pub use self::reconstruct::ReconstructError;
