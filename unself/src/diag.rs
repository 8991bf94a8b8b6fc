//! Structured diagnostics.
//!
//! Nothing in this crate prints. Each stage of the conversion records
//! what it saw and did as an [`Event`] tagged with a [`log::Level`];
//! the caller decides how, and whether, to show them.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use log::Level;

use crate::container::{ContainerEntry, ContainerHeader, ExtendedInfo};
use crate::elf::dynamic::{DynamicEntry, ModuleVersion, Relocation, Symbol};
use crate::elf::{ElfHeader, FileType, ProgramHeader, SegmentType};

/// A single recorded event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// How interesting this is.
    pub level: Level,
    /// What happened.
    pub event: Event,
}

/// An ordered list of [`Diagnostic`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// An empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Record an event.
    pub fn push(&mut self, level: Level, event: Event) {
        self.0.push(Diagnostic { level, event });
    }

    /// All events, in the order they were recorded.
    pub fn iter(&self) -> core::slice::Iter<'_, Diagnostic> {
        self.0.iter()
    }

    /// Events at `level` or more severe.
    pub fn at_least(&self, level: Level) -> impl Iterator<Item = &Diagnostic> + '_ {
        self.0.iter().filter(move |d| d.level <= level)
    }

}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a Diagnostic;
    type IntoIter = core::slice::Iter<'a, Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One of the two corruption-recovery passes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Patch {
    /// Restores the version segment from the container's tail.
    VersionSegment,
    /// Clears a duplicated copy of the first segment's header.
    FirstSegmentDuplicate,
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::VersionSegment => "version segment",
            Self::FirstSegmentDuplicate => "first segment duplicate",
        })
    }
}

/// Why a patch or the dynamic inspection did nothing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// There is no segment of the type the pass works on.
    NoSegment(SegmentType),
    /// The input is smaller than the data to copy.
    InputTooShort,
    /// The target range lies outside the output.
    OutOfBounds,
    /// No offset qualified for clearing.
    NoCandidate,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSegment(ty) => write!(f, "no {ty:?} segment"),
            Self::InputTooShort => f.write_str("input too short"),
            Self::OutOfBounds => f.write_str("target range outside the output"),
            Self::NoCandidate => f.write_str("no duplicate found"),
        }
    }
}

/// Something a conversion stage observed.
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Event {
    /// The input is smaller than a page.
    SmallInput { len: usize },
    ContainerHeader(ContainerHeader),
    Entry {
        index: usize,
        record_offset: usize,
        entry: ContainerEntry,
    },
    ElfHeader {
        offset: usize,
        header: ElfHeader,
    },
    /// The embedded ELF is not a vendor file type.
    NonVendorFileType(FileType),
    ProgramHeader {
        index: usize,
        record_offset: usize,
        header: ProgramHeader,
    },
    ExtendedInfo {
        offset: usize,
        info: ExtendedInfo,
    },
    MissingExtendedInfo { offset: usize },
    /// The computed output layout.
    Layout {
        size: u64,
        first_offset: u64,
        last_offset: u64,
    },
    /// A segment's declared size differs from the entry filling it.
    SizeMismatch {
        segment: u16,
        entry_size: u64,
        declared_size: u64,
    },
    SegmentCopied {
        entry: usize,
        segment: u16,
        seg_type: SegmentType,
        src: u64,
        dst: u64,
        len: u64,
    },
    VersionSegmentPatched { src: u64, dst: u64, len: u64 },
    FirstSegmentDuplicateCleared { offset: u64, len: u64 },
    PatchSkipped { patch: Patch, reason: SkipReason },
    InspectionSkipped(SkipReason),
    DynamicSegments { dynamic: u64, dynlib_data: u64 },
    DynamicTag(DynamicEntry),
    SymbolTable { count: usize },
    LeadingName(String),
    Symbol {
        symbol: Symbol,
        name: Option<String>,
    },
    RelocationTable { count: usize },
    Relocation {
        relocation: Relocation,
        name: Option<String>,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SmallInput { len } => {
                write!(f, "small file size ({len} bytes), continuing regardless")
            }
            Self::ContainerHeader(h) => write!(
                f,
                "container header: magic {:#x}, version {:#x}, mode {:#x}, endian {:#x}, \
                 attribs {:#x}, key type {:#x}, header size {:#x}, meta size {:#x}, \
                 file size {} bytes, {} entries, flags {:#x}",
                h.magic,
                h.version,
                h.mode,
                h.endian,
                h.attribs,
                h.key_type,
                h.header_size,
                h.meta_size,
                h.file_size,
                h.entry_count,
                h.flags
            ),
            Self::Entry {
                index,
                record_offset,
                entry,
            } => write!(
                f,
                "entry {index:02} ({record_offset:04x}~{:04x}) offset {:08x} +{:<8x} \
                 (mem size {:08x}) props {:08x} segment {:x}{}",
                record_offset + 31,
                entry.offset,
                entry.file_size,
                entry.mem_size,
                entry.props.bits(),
                entry.props.segment_index(),
                if entry.props.present() { "" } else { " (not present)" }
            ),
            Self::ElfHeader { offset, header } => write!(
                f,
                "ELF header ({offset:x}~{:x}): type {:?}, machine {}, entry {:#x}, \
                 program headers at {:#x} ({} x {:#x} bytes)",
                offset + 63,
                header.filety,
                header.machine,
                header.entry_addr,
                header.prog_hdr_offset,
                header.prog_hdr_count,
                header.prog_hdr_size
            ),
            Self::NonVendorFileType(ty) => {
                write!(f, "unexpected ELF type {:#06x} ({ty:?})", u16::from(*ty))
            }
            Self::ProgramHeader {
                index,
                record_offset,
                header,
            } => write!(
                f,
                "segment {index:02} ({record_offset:04x}~{:04x}) offset {:08x} +{:<8x} \
                 (mem size {:08x}) type {:08x} ({:?})",
                record_offset + 55,
                header.offset,
                header.file_size,
                header.mem_size,
                u32::from(header.seg_type),
                header.seg_type
            ),
            Self::ExtendedInfo { offset, info } => {
                write!(
                    f,
                    "extended info ({offset:x}~{:x}): paid {:#x}, type {:?}, app version {:x}, \
                     fw version {:x}, digest ",
                    offset + 63,
                    info.paid,
                    info.ptype,
                    info.app_version,
                    info.fw_version
                )?;
                info.digest.iter().try_for_each(|b| write!(f, "{b:02X}"))
            }
            Self::MissingExtendedInfo { offset } => {
                write!(f, "no room for extended info at {offset:#x}")
            }
            Self::Layout {
                size,
                first_offset,
                last_offset,
            } => write!(
                f,
                "output size {size} bytes ({size:#x}), first offset {first_offset:#x}, \
                 last offset {last_offset:#x}"
            ),
            Self::SizeMismatch {
                segment,
                entry_size,
                declared_size,
            } => write!(
                f,
                "segment {segment}: entry size {entry_size:#x} != program header size {declared_size:#x}"
            ),
            Self::SegmentCopied {
                entry,
                segment,
                seg_type,
                src,
                dst,
                len,
            } => write!(
                f,
                "entry {entry:02} {src:08x}~{:08x} -> segment {segment:02} {dst:08x}~{:08x} ({seg_type:?})",
                src + len,
                dst + len
            ),
            Self::VersionSegmentPatched { src, dst, len } => write!(
                f,
                "patched version segment: {src:08x}~{:08x} -> {dst:08x}~{:08x}",
                src + len,
                dst + len
            ),
            Self::FirstSegmentDuplicateCleared { offset, len } => write!(
                f,
                "patched first segment duplicate: cleared {len:#x} bytes at {offset:#010x}"
            ),
            Self::PatchSkipped { patch, reason } => write!(f, "not patching {patch}: {reason}"),
            Self::InspectionSkipped(reason) => {
                write!(f, "skipping dynamic section listing: {reason}")
            }
            Self::DynamicSegments {
                dynamic,
                dynlib_data,
            } => write!(
                f,
                "dynamic offset {dynamic:#x}, dynlib data offset {dynlib_data:#x}"
            ),
            Self::DynamicTag(entry) => {
                if entry.tag.carries_module_version() {
                    let v = ModuleVersion::from(entry.val);
                    write!(
                        f,
                        "tag {:<22} id {:4} version {}.{} index {:5}",
                        alloc::format!("{:?}", entry.tag),
                        v.id,
                        v.major,
                        v.minor,
                        v.index
                    )
                } else {
                    write!(
                        f,
                        "tag {:<22} val {:#x}",
                        alloc::format!("{:?}", entry.tag),
                        entry.val
                    )
                }
            }
            Self::SymbolTable { count } => write!(f, "symbol table: {count} entries"),
            Self::LeadingName(name) => f.write_str(name),
            Self::Symbol { symbol, name } => write!(
                f,
                "name {:6x} {:?}/{:?} {:<32} other {} shndx {} value {:#x} size {:#x}",
                symbol.name,
                symbol.binding(),
                symbol.kind(),
                name.as_deref().unwrap_or("?"),
                symbol.other,
                symbol.shndx,
                symbol.value,
                symbol.size
            ),
            Self::RelocationTable { count } => write!(f, "relocation table: {count} entries"),
            Self::Relocation { relocation, name } => write!(
                f,
                "offset {:6x} {:<12} sym {} {}",
                relocation.offset,
                alloc::format!("{:?}", relocation.kind),
                relocation.sym,
                name.as_deref().unwrap_or("?")
            ),
        }
    }
}
