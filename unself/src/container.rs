//! The signed container wrapped around every executable: a fixed
//! header, a table of entries, the embedded ELF header and program
//! headers, and the extended signing info that follows them.
//!
//! ```text
//! [ContainerHeader][ContainerEntry; n][ElfHeader][ProgramHeader; m]
//! [pad to 16][ExtendedInfo][entry payloads ...][version segment?]
//! ```

use alloc::vec::Vec;
use core::fmt;

use bitfield::bitfield;
use log::Level;
use num_enum::{FromPrimitive, IntoPrimitive};

use crate::decode::{
    align_up, decode_at, Cursor, Decode, DecodeError, Encode, Read, Write,
};
use crate::diag::{Diagnostics, Event};
use crate::elf::raw::FileHdr;
use crate::elf::{BadIdent, ElfHeader, ProgramHeader, SegmentType};

/// Container magic, `4F 15 3D 1D` on disk.
pub const SELF_MAGIC: u32 = 0x1D3D_154F;

/// Inputs smaller than one page are suspicious, but still parsed.
pub const PAGE_SIZE: usize = 0x4000;

/// The container header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Always [`SELF_MAGIC`] once parsed.
    pub magic: u32,
    /// Format version.
    pub version: u8,
    /// Mode.
    pub mode: u8,
    /// Endianness marker.
    pub endian: u8,
    /// Attributes.
    pub attribs: u8,
    /// Key type used for signing.
    pub key_type: u32,
    /// Size of the signed header region.
    pub header_size: u16,
    /// Size of the metadata region.
    pub meta_size: u16,
    /// Size of the whole container, as recorded by the signer.
    pub file_size: u64,
    /// Number of [`ContainerEntry`] records following the header.
    pub entry_count: u16,
    /// Flags.
    pub flags: u16,
    /// Trailing padding, kept so the header re-encodes verbatim.
    pub padding: u32,
}

impl Decode for ContainerHeader {
    const SIZE: usize = 32;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            magic: reader.read_u32()?,
            version: reader.read_u8()?,
            mode: reader.read_u8()?,
            endian: reader.read_u8()?,
            attribs: reader.read_u8()?,
            key_type: reader.read_u32()?,
            header_size: reader.read_u16()?,
            meta_size: reader.read_u16()?,
            file_size: reader.read_u64()?,
            entry_count: reader.read_u16()?,
            flags: reader.read_u16()?,
            padding: reader.read_u32()?,
        })
    }
}

impl Encode for ContainerHeader {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u32(self.magic);
        writer.write_all(&[self.version, self.mode, self.endian, self.attribs]);
        writer.write_u32(self.key_type);
        writer.write_u16(self.header_size);
        writer.write_u16(self.meta_size);
        writer.write_u64(self.file_size);
        writer.write_u16(self.entry_count);
        writer.write_u16(self.flags);
        writer.write_u32(self.padding);
    }
}

bitfield! {
    /// The packed properties word of a [`ContainerEntry`].
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct EntryProps(u64);
    impl Debug;
    pub encrypted, set_encrypted: 1;
    pub signed, set_signed: 2;
    pub compressed, set_compressed: 3;
    // Set for entries that carry segment data; clear for the
    // container's own metadata blocks.
    pub present, set_present: 11;
    // Index of the program header this entry fills.
    pub u16, segment_index, set_segment_index: 31, 20;
}

impl EntryProps {
    /// Props for a present entry filling program header `index`.
    pub fn for_segment(index: u16) -> Self {
        let mut props = Self(0);
        props.set_present(true);
        props.set_segment_index(index);
        props
    }

    /// The stored word, unchanged.
    pub fn bits(self) -> u64 {
        self.0
    }
}

impl From<u64> for EntryProps {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

/// One entry of the container's table of contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Packed flags and program header index.
    pub props: EntryProps,
    /// Offset of the entry's data in the container.
    pub offset: u64,
    /// Number of bytes stored in the container.
    pub file_size: u64,
    /// Number of bytes the data occupies once unpacked.
    pub mem_size: u64,
}

impl Decode for ContainerEntry {
    const SIZE: usize = 32;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            props: EntryProps::from(reader.read_u64()?),
            offset: reader.read_u64()?,
            file_size: reader.read_u64()?,
            mem_size: reader.read_u64()?,
        })
    }
}

impl Encode for ContainerEntry {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u64(self.props.bits());
        writer.write_u64(self.offset);
        writer.write_u64(self.file_size);
        writer.write_u64(self.mem_size);
    }
}

/// Program type recorded in [`ExtendedInfo`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum ProgramType {
    Fake = 0x1,
    NpdrmExec = 0x4,
    NpdrmDynlib = 0x5,
    SystemExec = 0x8,
    SystemDynlib = 0x9,
    HostKernel = 0xC,
    SecureModule = 0xE,
    SecureKernel = 0xF,
    #[num_enum(catch_all)]
    Unknown(u64),
}

/// Signing metadata stored after the program header table. Never
/// written to the output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExtendedInfo {
    /// Program authentication id.
    pub paid: u64,
    /// Program type.
    pub ptype: ProgramType,
    /// Application version.
    pub app_version: u64,
    /// Firmware version.
    pub fw_version: u64,
    /// SHA-256 digest.
    pub digest: [u8; 32],
}

impl Decode for ExtendedInfo {
    const SIZE: usize = 64;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            paid: reader.read_u64()?,
            ptype: ProgramType::from(reader.read_u64()?),
            app_version: reader.read_u64()?,
            fw_version: reader.read_u64()?,
            digest: reader.read_array()?,
        })
    }
}

impl Encode for ExtendedInfo {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u64(self.paid);
        writer.write_u64(self.ptype.into());
        writer.write_u64(self.app_version);
        writer.write_u64(self.fw_version);
        writer.write_all(&self.digest);
    }
}

/// Everything decoded from a container. Read-only once parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    /// The container header.
    pub header: ContainerHeader,
    /// The table of contents, in file order.
    pub entries: Vec<ContainerEntry>,
    /// Where the embedded ELF header starts in the container.
    pub elf_offset: usize,
    /// The embedded ELF header.
    pub elf: ElfHeader,
    /// The program headers, in table order.
    pub program_headers: Vec<ProgramHeader>,
    /// Where the extended info is (or would be) stored.
    pub ext_info_offset: usize,
    /// The extended info, if the container was long enough to hold it.
    pub ext_info: Option<ExtendedInfo>,
}

impl Image {
    /// Entries that carry segment data, with their table index.
    pub fn present_entries(&self) -> impl Iterator<Item = (usize, &ContainerEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.props.present())
    }

    /// The program header an entry fills. Always `Some` for present
    /// entries of a parsed image.
    pub fn segment_for(&self, entry: &ContainerEntry) -> Option<&ProgramHeader> {
        self.program_headers
            .get(usize::from(entry.props.segment_index()))
    }

    /// The last program header of the given type.
    pub fn find_segment(&self, seg_type: SegmentType) -> Option<&ProgramHeader> {
        self.program_headers
            .iter()
            .rev()
            .find(|ph| ph.seg_type == seg_type)
    }
}

/// The container could not be parsed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// The first four bytes are not [`SELF_MAGIC`].
    BadMagic(u32),
    /// The embedded ELF header is not an x86-64 FreeBSD ELF64 image.
    BadIdent(BadIdent),
    /// A record extends past the end of the input.
    Truncated(DecodeError),
    /// A present entry names a program header that does not exist.
    SegmentIndexOutOfRange {
        /// Index of the entry in the table.
        entry: usize,
        /// The program header index it carries.
        index: u16,
        /// Number of program headers.
        count: usize,
    },
}

impl From<DecodeError> for FormatError {
    fn from(err: DecodeError) -> Self {
        Self::Truncated(err)
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic(magic) => write!(f, "invalid container magic {magic:#010x}"),
            Self::BadIdent(bad) => write!(f, "invalid ELF identification: {bad}"),
            Self::Truncated(err) => write!(f, "truncated container: {err}"),
            Self::SegmentIndexOutOfRange {
                entry,
                index,
                count,
            } => write!(
                f,
                "entry {entry} refers to program header {index}, but there are only {count}"
            ),
        }
    }
}

impl core::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Truncated(err) => Some(err),
            _ => None,
        }
    }
}

/// Parse a container.
///
/// # Errors
///
/// See [`parse_with_diagnostics`].
pub fn parse(buf: &[u8]) -> Result<Image, FormatError> {
    parse_with_diagnostics(buf, &mut Diagnostics::new())
}

/// Parse a container, recording every decoded record in `diag`.
///
/// # Errors
///
/// This function will return an error if the magic is wrong, if the
/// ELF identification is not acceptable, if any header does not fit
/// in `buf`, or if a present entry names a missing program header.
pub fn parse_with_diagnostics(buf: &[u8], diag: &mut Diagnostics) -> Result<Image, FormatError> {
    if buf.len() < PAGE_SIZE {
        diag.push(Level::Warn, Event::SmallInput { len: buf.len() });
    }

    let magic = Cursor::new(buf).read_u32()?;
    if magic != SELF_MAGIC {
        return Err(FormatError::BadMagic(magic));
    }
    let header = decode_at::<ContainerHeader>(buf, 0)?;
    diag.push(Level::Debug, Event::ContainerHeader(header));

    let mut reader = Cursor::at(buf, ContainerHeader::SIZE);
    let mut entries = Vec::with_capacity(header.entry_count.into());
    for index in 0..usize::from(header.entry_count) {
        let record_offset = reader.position();
        let entry = ContainerEntry::decode(&mut reader)?;
        diag.push(
            Level::Debug,
            Event::Entry {
                index,
                record_offset,
                entry,
            },
        );
        entries.push(entry);
    }

    let elf_offset = reader.position();
    let elf = ElfHeader::validate(decode_at::<FileHdr>(buf, elf_offset)?)
        .map_err(FormatError::BadIdent)?;
    diag.push(
        Level::Debug,
        Event::ElfHeader {
            offset: elf_offset,
            header: elf,
        },
    );
    if !elf.filety.is_vendor() {
        diag.push(Level::Warn, Event::NonVendorFileType(elf.filety));
    }

    let table = offset_in(elf_offset, elf.prog_hdr_offset);
    let mut reader = Cursor::at(buf, table);
    let mut program_headers = Vec::with_capacity(elf.prog_hdr_count.into());
    for index in 0..usize::from(elf.prog_hdr_count) {
        let record_offset = reader.position();
        let header = ProgramHeader::decode(&mut reader)?;
        diag.push(
            Level::Debug,
            Event::ProgramHeader {
                index,
                record_offset,
                header,
            },
        );
        program_headers.push(header);
    }

    let ext_info_offset = usize::try_from(align_up(reader.position() as u64, 0x10))
        .unwrap_or(usize::MAX);
    let ext_info = match decode_at::<ExtendedInfo>(buf, ext_info_offset) {
        Ok(info) => {
            diag.push(
                Level::Debug,
                Event::ExtendedInfo {
                    offset: ext_info_offset,
                    info,
                },
            );
            Some(info)
        }
        Err(_) => {
            diag.push(
                Level::Warn,
                Event::MissingExtendedInfo {
                    offset: ext_info_offset,
                },
            );
            None
        }
    };

    let image = Image {
        header,
        entries,
        elf_offset,
        elf,
        program_headers,
        ext_info_offset,
        ext_info,
    };

    if let Some((entry, bad)) = image
        .present_entries()
        .find(|(_, entry)| image.segment_for(entry).is_none())
    {
        return Err(FormatError::SegmentIndexOutOfRange {
            entry,
            index: bad.props.segment_index(),
            count: image.program_headers.len(),
        });
    }

    Ok(image)
}

/// `base + rel` as a buffer offset. Values that cannot be addressed
/// saturate, so the following read reports truncation.
fn offset_in(base: usize, rel: u64) -> usize {
    (base as u64)
        .checked_add(rel)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn props_accessors_share_one_word() {
        let props = EntryProps::from(0x0020_0800 | 0b1110);
        assert!(props.present());
        assert!(props.encrypted());
        assert!(props.signed());
        assert!(props.compressed());
        assert_eq!(props.segment_index(), 2);
        assert_eq!(props.bits(), 0x0020_080E);

        let props = EntryProps::for_segment(0xFFF);
        assert!(props.present());
        assert_eq!(props.segment_index(), 0xFFF);
        assert_eq!(props.bits(), 0xFFF0_0800);

        assert!(!EntryProps::from(0xFFF0_0000).present());
    }

    #[test]
    fn header_encodes_to_thirty_two_bytes() {
        let header = ContainerHeader {
            magic: SELF_MAGIC,
            version: 0,
            mode: 1,
            endian: 1,
            attribs: 0x12,
            key_type: 0x101,
            header_size: 0x100,
            meta_size: 0x50,
            file_size: 0x2000,
            entry_count: 4,
            flags: 0x22,
            padding: 0,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), ContainerHeader::SIZE);
        assert_eq!(&bytes[..4], &[0x4F, 0x15, 0x3D, 0x1D]);
        assert_eq!(decode_at::<ContainerHeader>(&bytes, 0), Ok(header));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut buf = alloc::vec![0u8; 0x100];
        buf[..4].copy_from_slice(b"\x7fELF");
        assert_eq!(parse(&buf), Err(FormatError::BadMagic(0x464C_457F)));
    }

    #[test]
    fn tiny_input_is_truncated() {
        assert!(matches!(parse(&[0x4F, 0x15]), Err(FormatError::Truncated(_))));
    }

    #[test]
    fn offsets_saturate_instead_of_wrapping() {
        assert_eq!(offset_in(0x40, 0x10), 0x50);
        assert_eq!(offset_in(0x40, u64::MAX), usize::MAX);
    }
}
