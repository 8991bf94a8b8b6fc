//! Listing of the vendor dynamic-linking tables.
//!
//! Vendor images keep their symbol, relocation and string tables in
//! the [`SegmentType::SceDynlibData`] segment and locate them with
//! `Sce*` tags in the regular dynamic section, relative to that
//! segment. This walks the reconstructed image to find and list them.
//! It is purely informational: anything out of range is skipped.

use alloc::string::String;
use alloc::vec::Vec;

use log::Level;

use crate::container::Image;
use crate::decode::{decode_at, Decode};
use crate::diag::{Diagnostics, Event, SkipReason};
use crate::elf::dynamic::{DynTag, DynamicEntry, Relocation, Symbol};
use crate::elf::SegmentType;

/// Everything the inspector managed to read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicReport {
    /// The dynamic section, in order.
    pub tags: Vec<DynamicEntry>,
    /// Strings in the pool that precede the symbol names.
    pub leading_names: Vec<String>,
    /// Symbols with their resolved names.
    pub symbols: Vec<(Symbol, Option<String>)>,
    /// Relocations, with the name of the symbol they refer to. Index
    /// zero refers to no symbol and never resolves.
    pub relocations: Vec<(Relocation, Option<String>)>,
}

/// Where the tables are. Addresses start at the dynlib-data segment
/// and every matching tag adds to them, as do the sizes.
struct Tables {
    rela_addr: u64,
    rela_size: u64,
    sym_addr: u64,
    sym_size: u64,
}

/// List the dynamic tables of the reconstructed `output`.
///
/// Returns `None` if the image lacks a dynamic or dynlib-data segment.
pub fn inspect(image: &Image, output: &[u8], diag: &mut Diagnostics) -> Option<DynamicReport> {
    let Some(dynamic) = image.find_segment(SegmentType::Dynamic) else {
        diag.push(
            Level::Trace,
            Event::InspectionSkipped(SkipReason::NoSegment(SegmentType::Dynamic)),
        );
        return None;
    };
    let Some(dynlib) = image.find_segment(SegmentType::SceDynlibData) else {
        diag.push(
            Level::Trace,
            Event::InspectionSkipped(SkipReason::NoSegment(SegmentType::SceDynlibData)),
        );
        return None;
    };
    diag.push(
        Level::Trace,
        Event::DynamicSegments {
            dynamic: dynamic.offset,
            dynlib_data: dynlib.offset,
        },
    );

    let mut report = DynamicReport::default();
    let mut tables = Tables {
        rela_addr: dynlib.offset,
        rela_size: 0,
        sym_addr: dynlib.offset,
        sym_size: 0,
    };

    let count = dynamic.mem_size / DynamicEntry::SIZE as u64;
    for entry in records::<DynamicEntry>(output, dynamic.offset, count) {
        match entry.tag {
            DynTag::SceJmpRel => tables.rela_addr = tables.rela_addr.wrapping_add(entry.val),
            DynTag::ScePltRelSz | DynTag::SceRelaSz => {
                tables.rela_size = tables.rela_size.wrapping_add(entry.val)
            }
            DynTag::SceSymTab => tables.sym_addr = tables.sym_addr.wrapping_add(entry.val),
            DynTag::SceSymTabSz => tables.sym_size = tables.sym_size.wrapping_add(entry.val),
            _ => {}
        }
        diag.push(Level::Trace, Event::DynamicTag(entry));
        report.tags.push(entry);
    }

    // The pool starts after a 24-byte preamble and runs up to the
    // symbol table.
    let names = dynlib
        .offset
        .checked_add(24)
        .and_then(|start| slice(output, start, tables.sym_addr))
        .map(string_pool)
        .unwrap_or_default();

    let sym_count = tables.sym_size / Symbol::SIZE as u64;
    let start = names
        .len()
        .saturating_sub(usize::try_from(sym_count).unwrap_or(usize::MAX));
    let name_of = |index: usize| start.checked_add(index).and_then(|i| names.get(i)).cloned();

    diag.push(
        Level::Trace,
        Event::SymbolTable {
            count: usize::try_from(sym_count).unwrap_or(usize::MAX),
        },
    );
    for name in &names[..start] {
        diag.push(Level::Trace, Event::LeadingName(name.clone()));
        report.leading_names.push(name.clone());
    }
    for (index, symbol) in records::<Symbol>(output, tables.sym_addr, sym_count).enumerate() {
        let name = name_of(index);
        diag.push(
            Level::Trace,
            Event::Symbol {
                symbol,
                name: name.clone(),
            },
        );
        report.symbols.push((symbol, name));
    }

    let rela_count = tables.rela_size / Relocation::SIZE as u64;
    diag.push(
        Level::Trace,
        Event::RelocationTable {
            count: usize::try_from(rela_count).unwrap_or(usize::MAX),
        },
    );
    for relocation in records::<Relocation>(output, tables.rela_addr, rela_count) {
        let name = match relocation.sym {
            0 => None,
            sym => usize::try_from(sym).ok().and_then(name_of),
        };
        if relocation.sym != 0 {
            diag.push(
                Level::Trace,
                Event::Relocation {
                    relocation,
                    name: name.clone(),
                },
            );
        }
        report.relocations.push((relocation, name));
    }

    Some(report)
}

/// Decode up to `count` consecutive records starting at `offset`,
/// stopping at the first one that does not fit.
fn records<'a, T: Decode + 'a>(
    buf: &'a [u8],
    offset: u64,
    count: u64,
) -> impl Iterator<Item = T> + 'a {
    let start = usize::try_from(offset).ok();
    (0..count).map_while(move |i| {
        let at = usize::try_from(i)
            .ok()?
            .checked_mul(T::SIZE)?
            .checked_add(start?)?;
        decode_at::<T>(buf, at).ok()
    })
}

/// `buf[start..end]`, if that is a valid range.
fn slice(buf: &[u8], start: u64, end: u64) -> Option<&[u8]> {
    let start = usize::try_from(start).ok()?;
    let end = usize::try_from(end).ok()?;
    buf.get(start..end)
}

/// Split a NUL-separated pool, dropping empty strings.
fn string_pool(pool: &[u8]) -> Vec<String> {
    pool.split(|&b| b == 0)
        .filter(|s| !s.is_empty())
        .map(|s| String::from_utf8_lossy(s).into_owned())
        .collect()
}
