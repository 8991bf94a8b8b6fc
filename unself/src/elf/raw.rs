//! Raw representation of the ELF file header, decoded field by field
//! in its little-endian on-disk order.

use crate::decode::{Decode, DecodeError, Encode, Read, Write};

/// ELF file header. Equivalent to `Elf64_Ehdr` in `elf.h`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FileHdr {
    pub ident: FileIdent,
    pub filety: u16,
    pub machine: u16,
    pub version: u32,
    pub entry_addr: u64,
    pub prog_hdr_offset: u64,
    pub sec_hdr_offset: u64,
    pub flags: u32,
    pub hdr_size: u16,
    pub prog_hdr_size: u16,
    pub prog_hdr_count: u16,
    pub sec_hdr_size: u16,
    pub sec_hdr_count: u16,
    pub sec_strtab_index: u16,
}

/// ELF file identifier. Equivalent to `e_ident` in `Elf64_Ehdr` in
/// `elf.h`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct FileIdent {
    pub magic: [u8; 4],
    pub class: u8,
    pub data: u8,
    pub version: u8,
    pub osabi: u8,
    pub abi_version: u8,
    /// `EI_PAD` through `EI_NIDENT`, kept so the record re-encodes
    /// byte for byte.
    pub padding: [u8; 7],
}

/// Magic number (`b"\x7FELF"`).
pub const MAGIC: [u8; 4] = *b"\x7fELF";
/// 64-bit files.
pub const ELFCLASS64: u8 = 2;
/// Two's complement, little-endian.
pub const ELFDATA2LSB: u8 = 1;
/// FreeBSD ABI, used by every signed executable this crate accepts.
pub const ELFOSABI_FREEBSD: u8 = 9;
/// Current ELF version.
pub const EV_CURRENT: u32 = 1;
/// AMD x86-64 architecture.
pub const EM_X86_64: u16 = 62;

/// Size of an encoded [`FileHdr`].
pub const FILE_HDR_SIZE: usize = 64;
/// Size of an encoded program header.
pub const PROGRAM_HDR_SIZE: usize = 56;

impl Decode for FileIdent {
    const SIZE: usize = 16;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        let [m0, m1, m2, m3, class, data, version, osabi, abi_version, p0, p1, p2, p3, p4, p5, p6] =
            reader.read_array::<16>()?;
        Ok(Self {
            magic: [m0, m1, m2, m3],
            class,
            data,
            version,
            osabi,
            abi_version,
            padding: [p0, p1, p2, p3, p4, p5, p6],
        })
    }
}

impl Encode for FileIdent {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_all(&self.magic);
        writer.write_all(&[
            self.class,
            self.data,
            self.version,
            self.osabi,
            self.abi_version,
        ]);
        writer.write_all(&self.padding);
    }
}

impl Decode for FileHdr {
    const SIZE: usize = FILE_HDR_SIZE;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            ident: FileIdent::decode(reader)?,
            filety: reader.read_u16()?,
            machine: reader.read_u16()?,
            version: reader.read_u32()?,
            entry_addr: reader.read_u64()?,
            prog_hdr_offset: reader.read_u64()?,
            sec_hdr_offset: reader.read_u64()?,
            flags: reader.read_u32()?,
            hdr_size: reader.read_u16()?,
            prog_hdr_size: reader.read_u16()?,
            prog_hdr_count: reader.read_u16()?,
            sec_hdr_size: reader.read_u16()?,
            sec_hdr_count: reader.read_u16()?,
            sec_strtab_index: reader.read_u16()?,
        })
    }
}

impl Encode for FileHdr {
    fn encode<W: Write>(&self, writer: &mut W) {
        self.ident.encode(writer);
        writer.write_u16(self.filety);
        writer.write_u16(self.machine);
        writer.write_u32(self.version);
        writer.write_u64(self.entry_addr);
        writer.write_u64(self.prog_hdr_offset);
        writer.write_u64(self.sec_hdr_offset);
        writer.write_u32(self.flags);
        writer.write_u16(self.hdr_size);
        writer.write_u16(self.prog_hdr_size);
        writer.write_u16(self.prog_hdr_count);
        writer.write_u16(self.sec_hdr_size);
        writer.write_u16(self.sec_hdr_count);
        writer.write_u16(self.sec_strtab_index);
    }
}
