//! This module contains an opinionated parser for the x86-64 ELF64
//! images embedded in signed containers. The structures contained in
//! this file are intended to be consumed idiomatically; the exact
//! on-disk layout of the file header lives in [`raw`].
//!
//! # References
//!
//! - [ELF-64 Object File Format v1.5 Draft
//! 2](https://uclibc.org/docs/elf-64-gen.pdf).
//! - [System V AMD64 psABI](https://gitlab.com/x86-psABIs/x86-64-ABI).
use core::fmt;

use bitflags::bitflags;
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::decode::{Decode, DecodeError, Encode, Read, Write};

use self::raw::FileHdr;

pub mod dynamic;
pub mod raw;

/// The validated ELF file header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ElfHeader {
    /// What type of ELF file is this?
    pub filety: FileType,
    /// Always [`raw::EM_X86_64`] once validated.
    pub machine: u16,
    /// What is the entry address of this ELF file?
    pub entry_addr: u64,
    /// Offset of the program header table, relative to the start of
    /// the ELF header.
    pub prog_hdr_offset: u64,
    /// Size of one program header as declared by the file.
    pub prog_hdr_size: u16,
    /// Number of program headers.
    pub prog_hdr_count: u16,
    /// Offset of the section header table. Signed executables usually
    /// strip it.
    pub sec_hdr_offset: u64,
    /// Number of section headers.
    pub sec_hdr_count: u16,
    /// Size of the file header as declared by the file.
    pub hdr_size: u16,
    /// Processor-specific flags.
    pub flags: u32,
    /// The identification bytes exactly as they were read.
    pub ident: raw::FileIdent,
}

impl ElfHeader {
    /// Validate a decoded file header.
    ///
    /// # Errors
    ///
    /// This will return an error naming the first identification
    /// field that does not describe a little-endian, 64-bit, FreeBSD
    /// ABI x86-64 executable.
    pub fn validate(hdr: FileHdr) -> Result<Self, BadIdent> {
        let ident = hdr.ident;
        let checks = [
            (
                IdentField::Magic,
                ident.magic == raw::MAGIC,
                u64::from(u32::from_le_bytes(ident.magic)),
            ),
            (
                IdentField::Class,
                ident.class == raw::ELFCLASS64,
                ident.class.into(),
            ),
            (
                IdentField::Data,
                ident.data == raw::ELFDATA2LSB,
                ident.data.into(),
            ),
            (
                IdentField::LegacyVersion,
                u32::from(ident.version) == raw::EV_CURRENT,
                ident.version.into(),
            ),
            (
                IdentField::OsAbi,
                ident.osabi == raw::ELFOSABI_FREEBSD,
                ident.osabi.into(),
            ),
            (
                IdentField::Machine,
                hdr.machine == raw::EM_X86_64,
                hdr.machine.into(),
            ),
            (
                IdentField::Version,
                hdr.version == raw::EV_CURRENT,
                hdr.version.into(),
            ),
        ];
        if let Some(&(field, _, found)) = checks.iter().find(|(_, ok, _)| !ok) {
            return Err(BadIdent { field, found });
        }

        Ok(Self {
            filety: FileType::from(hdr.filety),
            machine: hdr.machine,
            entry_addr: hdr.entry_addr,
            prog_hdr_offset: hdr.prog_hdr_offset,
            prog_hdr_size: hdr.prog_hdr_size,
            prog_hdr_count: hdr.prog_hdr_count,
            sec_hdr_offset: hdr.sec_hdr_offset,
            sec_hdr_count: hdr.sec_hdr_count,
            hdr_size: hdr.hdr_size,
            flags: hdr.flags,
            ident,
        })
    }
}

/// Which identification field made an ELF header unacceptable.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IdentField {
    /// `e_ident[EI_MAG0..EI_MAG3]`
    Magic,
    /// `e_ident[EI_CLASS]`
    Class,
    /// `e_ident[EI_DATA]`
    Data,
    /// `e_ident[EI_VERSION]`
    LegacyVersion,
    /// `e_ident[EI_OSABI]`
    OsAbi,
    /// `e_machine`
    Machine,
    /// `e_version`
    Version,
}

/// The ELF header failed validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BadIdent {
    /// The offending field.
    pub field: IdentField,
    /// The value that was found there.
    pub found: u64,
}

impl fmt::Display for BadIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected {:?} value {:#x}", self.field, self.found)
    }
}

/// What type of ELF file is this?
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u16)]
pub enum FileType {
    /// Unknown file type.
    None = 0,
    /// Relocatable file.
    Rel = 1,
    /// Executable file.
    Exec = 2,
    /// Shared object.
    Dyn = 3,
    /// Core dump file.
    Core = 4,
    /// Vendor executable.
    SceExec = 0xFE00,
    /// Vendor replay executable.
    SceReplayExec = 0xFE01,
    /// Vendor relocatable executable.
    SceRelExec = 0xFE04,
    /// Vendor SDK stub library.
    SceStubLib = 0xFE0C,
    /// Vendor position-independent executable.
    SceDynExec = 0xFE10,
    /// Vendor dynamic library.
    SceDynamic = 0xFE18,
    /// Anything else. Kept as-is.
    #[num_enum(catch_all)]
    Unknown(u16),
}

impl FileType {
    /// Vendor types all live in the `0xFExx` range.
    pub fn is_vendor(self) -> bool {
        u16::from(self) >> 8 == 0xFE
    }
}

/// What type of segment is this?
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum SegmentType {
    /// Undefined.
    Null = 0,
    /// Loadable segment, mapped into memory.
    Load = 1,
    /// Dynamic linking information.
    Dynamic = 2,
    /// Path of a dynamic interpreter.
    Interp = 3,
    /// Specifies the location of notes.
    Note = 4,
    /// Reserved.
    Shlib = 5,
    /// Specifies the location and size of the program header table.
    Phdr = 6,
    /// Thread-local storage template.
    Tls = 7,
    /// Vendor relocations (`.rela`).
    SceRela = 0x6000_0000,
    /// Vendor dynamic-linking tables (`.sce_special`).
    SceDynlibData = 0x6100_0000,
    /// Process parameters (`.sce_process_param`).
    SceProcParam = 0x6100_0001,
    /// Module parameters.
    SceModuleParam = 0x6100_0002,
    /// `.data.rel.ro`
    SceRelro = 0x6100_0010,
    /// `.eh_frame_hdr`
    GnuEhFrame = 0x6474_E550,
    /// Stack executability; carries no file data.
    GnuStack = 0x6474_E551,
    /// `.sce_comment`
    SceComment = 0x6FFF_FF00,
    /// `.sce_version`, often stored at the tail of the container
    /// rather than in an entry.
    SceVersion = 0x6FFF_FF01,
    /// Vendor symbol segment.
    SceSegSym = 0x7000_00A8,
    /// Anything else. Kept as-is.
    #[num_enum(catch_all)]
    Unknown(u32),
}

// rustfmt keeps messing this up idk why
#[rustfmt::skip]
bitflags! {
    /// Flags for segments.
    pub struct SegmentFlags: u32 {
	/// Executable
	const EXEC = 1;
	/// Writable
	const WRITE = 2;
	/// Readable
	const READ = 4;
	/// All bits in this mask are reserved for OS-specific
	/// semantics.
	const MASK_OS = 0x0FF0_0000;
	/// All bits in this mask are reserved for processor-specific
	/// semantics.
	const MASK_PROC = 0xF000_0000;
    }
}

/// An ELF program header, describing where a segment's bytes live in
/// the reconstructed image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProgramHeader {
    /// What type of segment is this?
    pub seg_type: SegmentType,
    /// Flags related to segments, typically a subset of the typical
    /// RWX.
    pub flags: SegmentFlags,
    /// Offset of this segment in the file.
    pub offset: u64,
    /// Virtual address of this segment.
    pub virt_addr: u64,
    /// Physical address of this segment. Usually equal to
    /// `virt_addr`.
    pub phys_addr: u64,
    /// Size of this segment in the file.
    pub file_size: u64,
    /// Size of this segment at runtime. The difference, if any,
    /// between `mem_size` and [`Self::file_size`] is filled with
    /// zeroes.
    pub mem_size: u64,
    /// Alignment of this segment. Zero and one are both equivalent to
    /// no alignment constraints.
    pub align: u64,
}

impl ProgramHeader {
    /// One past the last file byte of this segment.
    pub fn file_end(&self) -> u64 {
        self.offset.saturating_add(self.file_size)
    }
}

impl Decode for ProgramHeader {
    const SIZE: usize = raw::PROGRAM_HDR_SIZE;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            seg_type: SegmentType::from(reader.read_u32()?),
            flags: SegmentFlags::from_bits_truncate(reader.read_u32()?),
            offset: reader.read_u64()?,
            virt_addr: reader.read_u64()?,
            phys_addr: reader.read_u64()?,
            file_size: reader.read_u64()?,
            mem_size: reader.read_u64()?,
            align: reader.read_u64()?,
        })
    }
}

impl Encode for ProgramHeader {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u32(self.seg_type.into());
        writer.write_u32(self.flags.bits());
        writer.write_u64(self.offset);
        writer.write_u64(self.virt_addr);
        writer.write_u64(self.phys_addr);
        writer.write_u64(self.file_size);
        writer.write_u64(self.mem_size);
        writer.write_u64(self.align);
    }
}

#[cfg(test)]
mod tests {
    use super::raw::{FileIdent, ELFCLASS64, ELFDATA2LSB, ELFOSABI_FREEBSD, EM_X86_64, MAGIC};
    use super::*;
    use crate::decode::decode_at;

    fn header() -> FileHdr {
        FileHdr {
            ident: FileIdent {
                magic: MAGIC,
                class: ELFCLASS64,
                data: ELFDATA2LSB,
                version: 1,
                osabi: ELFOSABI_FREEBSD,
                abi_version: 0,
                padding: [0; 7],
            },
            filety: 0xFE10,
            machine: EM_X86_64,
            version: 1,
            entry_addr: 0x40_0000,
            prog_hdr_offset: 0x40,
            sec_hdr_offset: 0,
            flags: 0,
            hdr_size: 0x40,
            prog_hdr_size: 0x38,
            prog_hdr_count: 3,
            sec_hdr_size: 0x40,
            sec_hdr_count: 0,
            sec_strtab_index: 0,
        }
    }

    #[test]
    fn file_header_is_sixty_four_bytes() {
        let bytes = header().to_bytes();
        assert_eq!(bytes.len(), FileHdr::SIZE);
        assert_eq!(&bytes[..4], b"\x7fELF");
        assert_eq!(decode_at::<FileHdr>(&bytes, 0), Ok(header()));
    }

    #[test]
    fn accepts_vendor_executable() {
        let elf = ElfHeader::validate(header()).unwrap();
        assert_eq!(elf.filety, FileType::SceDynExec);
        assert!(elf.filety.is_vendor());
        assert_eq!(elf.prog_hdr_count, 3);
    }

    #[test]
    fn rejects_wrong_machine_and_abi() {
        let mut hdr = header();
        hdr.machine = 243;
        assert_eq!(
            ElfHeader::validate(hdr),
            Err(BadIdent {
                field: IdentField::Machine,
                found: 243
            })
        );

        let mut hdr = header();
        hdr.ident.osabi = 0;
        assert_eq!(
            ElfHeader::validate(hdr).unwrap_err().field,
            IdentField::OsAbi
        );

        let mut hdr = header();
        hdr.ident.class = 1;
        assert_eq!(
            ElfHeader::validate(hdr).unwrap_err().field,
            IdentField::Class
        );
    }

    #[test]
    fn rejects_foreign_identification() {
        let mut hdr = header();
        hdr.ident.magic = *b"\x7fELG";
        assert_eq!(
            ElfHeader::validate(hdr),
            Err(BadIdent {
                field: IdentField::Magic,
                found: u64::from(u32::from_le_bytes(*b"\x7fELG")),
            })
        );

        let mut hdr = header();
        hdr.ident.data = 2;
        assert_eq!(
            ElfHeader::validate(hdr),
            Err(BadIdent {
                field: IdentField::Data,
                found: 2
            })
        );

        let mut hdr = header();
        hdr.ident.version = 0;
        assert_eq!(
            ElfHeader::validate(hdr).unwrap_err().field,
            IdentField::LegacyVersion
        );

        let mut hdr = header();
        hdr.version = 2;
        assert_eq!(
            ElfHeader::validate(hdr),
            Err(BadIdent {
                field: IdentField::Version,
                found: 2
            })
        );
    }

    #[test]
    fn first_failing_field_is_reported() {
        let mut hdr = header();
        hdr.ident.data = 2;
        hdr.machine = 243;
        assert_eq!(
            ElfHeader::validate(hdr).unwrap_err().field,
            IdentField::Data
        );
    }

    #[test]
    fn unknown_segment_types_survive() {
        let ph = ProgramHeader {
            seg_type: SegmentType::from(0x6123_4567),
            flags: SegmentFlags::READ,
            offset: 0x4000,
            virt_addr: 0,
            phys_addr: 0,
            file_size: 0x10,
            mem_size: 0x10,
            align: 0x4000,
        };
        assert_eq!(ph.seg_type, SegmentType::Unknown(0x6123_4567));
        let bytes = ph.to_bytes();
        assert_eq!(bytes.len(), ProgramHeader::SIZE);
        assert_eq!(decode_at::<ProgramHeader>(&bytes, 0), Ok(ph));
        assert_eq!(SegmentType::from(0x6FFF_FF01), SegmentType::SceVersion);
        assert_eq!(u32::from(SegmentType::SceDynlibData), 0x6100_0000);
    }
}
