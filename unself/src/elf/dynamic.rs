//! Dynamic-linking records: `Elf64_Dyn`, `Elf64_Sym` and
//! `Elf64_Rela`, plus the vendor dynamic tags that locate them.

use num_enum::{FromPrimitive, IntoPrimitive};

use crate::decode::{Decode, DecodeError, Encode, Read, Write};

/// A dynamic section tag. Vendor images keep their tables in a
/// separate segment and point at them with the `Sce*` tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u64)]
#[allow(missing_docs)]
pub enum DynTag {
    Null = 0,
    Needed = 1,
    PltRelSz = 2,
    PltGot = 3,
    Hash = 4,
    StrTab = 5,
    SymTab = 6,
    Rela = 7,
    RelaSz = 8,
    RelaEnt = 9,
    StrSz = 10,
    SymEnt = 11,
    Init = 12,
    Fini = 13,
    SoName = 14,
    RPath = 15,
    Symbolic = 16,
    Rel = 17,
    RelSz = 18,
    RelEnt = 19,
    PltRel = 20,
    Debug = 21,
    TextRel = 22,
    JmpRel = 23,
    SceIdTabEntSz = 0x6100_0005,
    SceFingerprint = 0x6100_0007,
    SceOriginalFilename = 0x6100_0009,
    SceModuleInfo = 0x6100_000D,
    SceNeededModule = 0x6100_000F,
    SceModuleAttr = 0x6100_0011,
    SceExportLib = 0x6100_0013,
    SceImportLib = 0x6100_0015,
    SceExportLibAttr = 0x6100_0017,
    SceImportLibAttr = 0x6100_0019,
    SceStubModuleName = 0x6100_001D,
    SceStubModuleVersion = 0x6100_001F,
    SceStubLibraryName = 0x6100_0021,
    SceStubLibraryVersion = 0x6100_0023,
    SceHash = 0x6100_0025,
    ScePltGot = 0x6100_0027,
    SceJmpRel = 0x6100_0029,
    ScePltRel = 0x6100_002B,
    ScePltRelSz = 0x6100_002D,
    SceRela = 0x6100_002F,
    SceRelaSz = 0x6100_0031,
    SceRelaEnt = 0x6100_0033,
    SceStrTab = 0x6100_0035,
    SceStrSz = 0x6100_0037,
    SceSymTab = 0x6100_0039,
    SceSymEnt = 0x6100_003B,
    SceHashSz = 0x6100_003D,
    SceSymTabSz = 0x6100_003F,
    #[num_enum(catch_all)]
    Unknown(u64),
}

impl DynTag {
    /// Tags whose value packs a module or library id together with a
    /// version and string-table index; see [`ModuleVersion`].
    pub fn carries_module_version(self) -> bool {
        matches!(
            self,
            Self::SceNeededModule
                | Self::SceImportLib
                | Self::SceImportLibAttr
                | Self::SceExportLib
                | Self::SceExportLibAttr
                | Self::SceModuleInfo
                | Self::SceModuleAttr
                | Self::SceFingerprint
                | Self::SceOriginalFilename
        )
    }
}

/// The packed `d_val` of module and library tags.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ModuleVersion {
    /// Bits 63..48.
    pub id: u16,
    /// Bits 43..40.
    pub minor: u8,
    /// Bits 35..32.
    pub major: u8,
    /// Bits 11..0.
    pub index: u16,
}

impl From<u64> for ModuleVersion {
    fn from(val: u64) -> Self {
        Self {
            id: (val >> 48) as u16,
            minor: ((val >> 40) & 0xF) as u8,
            major: ((val >> 32) & 0xF) as u8,
            index: (val & 0xFFF) as u16,
        }
    }
}

/// One entry of the dynamic section. Equivalent to `Elf64_Dyn`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DynamicEntry {
    /// What kind of entry is this?
    pub tag: DynTag,
    /// Value or address, depending on `tag`.
    pub val: u64,
}

impl Decode for DynamicEntry {
    const SIZE: usize = 16;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            tag: DynTag::from(reader.read_u64()?),
            val: reader.read_u64()?,
        })
    }
}

impl Encode for DynamicEntry {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u64(self.tag.into());
        writer.write_u64(self.val);
    }
}

/// Symbol binding, the high nibble of `st_info`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum SymbolBinding {
    Local = 0,
    Global = 1,
    Weak = 2,
    #[num_enum(catch_all)]
    Other(u8),
}

/// Symbol type, the low nibble of `st_info`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum SymbolKind {
    NoType = 0,
    Object = 1,
    Function = 2,
    Section = 3,
    File = 4,
    Common = 5,
    Tls = 6,
    #[num_enum(catch_all)]
    Other(u8),
}

/// A symbol table entry. Equivalent to `Elf64_Sym`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// Offset of the symbol name in the string table.
    pub name: u32,
    /// Binding and type.
    pub info: u8,
    /// Visibility.
    pub other: u8,
    /// Associated section index.
    pub shndx: u16,
    /// Value of the symbol.
    pub value: u64,
    /// Size of the object the symbol refers to.
    pub size: u64,
}

impl Symbol {
    /// The binding encoded in `info`.
    pub fn binding(&self) -> SymbolBinding {
        SymbolBinding::from(self.info >> 4)
    }

    /// The type encoded in `info`.
    pub fn kind(&self) -> SymbolKind {
        SymbolKind::from(self.info & 0xF)
    }
}

impl Decode for Symbol {
    const SIZE: usize = 24;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_u32()?,
            info: reader.read_u8()?,
            other: reader.read_u8()?,
            shndx: reader.read_u16()?,
            value: reader.read_u64()?,
            size: reader.read_u64()?,
        })
    }
}

impl Encode for Symbol {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u32(self.name);
        writer.write_u8(self.info);
        writer.write_u8(self.other);
        writer.write_u16(self.shndx);
        writer.write_u64(self.value);
        writer.write_u64(self.size);
    }
}

/// x86-64 relocation types.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive, IntoPrimitive)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum RelocationType {
    None = 0,
    R64 = 1,
    Pc32 = 2,
    Got32 = 3,
    Plt32 = 4,
    Copy = 5,
    GlobDat = 6,
    JumpSlot = 7,
    Relative = 8,
    GotPcRel = 9,
    R32 = 10,
    R32S = 11,
    R16 = 12,
    Pc16 = 13,
    R8 = 14,
    Pc8 = 15,
    DtpMod64 = 16,
    DtpOff64 = 17,
    TpOff64 = 18,
    TlsGd = 19,
    TlsLd = 20,
    DtpOff32 = 21,
    GotTpOff = 22,
    TpOff32 = 23,
    Pc64 = 24,
    GotOff64 = 25,
    GotPc32 = 26,
    #[num_enum(catch_all)]
    Unknown(u32),
}

/// A relocation with addend. Equivalent to `Elf64_Rela`, with
/// `r_info` split into its type and symbol halves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Relocation {
    /// Location at which to apply the relocation.
    pub offset: u64,
    /// Low half of `r_info`.
    pub kind: RelocationType,
    /// High half of `r_info`: index into the symbol table.
    pub sym: u32,
    /// Constant addend.
    pub addend: i64,
}

impl Decode for Relocation {
    const SIZE: usize = 24;

    fn decode<R: Read>(reader: &mut R) -> Result<Self, DecodeError> {
        Ok(Self {
            offset: reader.read_u64()?,
            kind: RelocationType::from(reader.read_u32()?),
            sym: reader.read_u32()?,
            addend: reader.read_i64()?,
        })
    }
}

impl Encode for Relocation {
    fn encode<W: Write>(&self, writer: &mut W) {
        writer.write_u64(self.offset);
        writer.write_u32(self.kind.into());
        writer.write_u32(self.sym);
        writer.write_i64(self.addend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_at;

    #[test]
    fn module_version_unpacks_fields() {
        let v = ModuleVersion::from(0x0003_0201_0000_0007);
        assert_eq!(
            v,
            ModuleVersion {
                id: 3,
                minor: 2,
                major: 1,
                index: 7
            }
        );
    }

    #[test]
    fn relocation_splits_info() {
        let mut bytes = alloc::vec::Vec::new();
        bytes.write_u64(0x1000);
        bytes.write_u64((5u64 << 32) | 7);
        bytes.write_i64(-8);
        let rela = decode_at::<Relocation>(&bytes, 0).unwrap();
        assert_eq!(rela.kind, RelocationType::JumpSlot);
        assert_eq!(rela.sym, 5);
        assert_eq!(rela.addend, -8);
        assert_eq!(rela.to_bytes(), bytes);
    }

    #[test]
    fn symbol_info_nibbles() {
        let sym = Symbol {
            name: 0,
            info: 0x12,
            other: 0,
            shndx: 0,
            value: 0,
            size: 0,
        };
        assert_eq!(sym.binding(), SymbolBinding::Global);
        assert_eq!(sym.kind(), SymbolKind::Function);
        assert_eq!(DynTag::from(0x6100_0039), DynTag::SceSymTab);
        assert!(DynTag::SceImportLib.carries_module_version());
        assert!(!DynTag::SceSymTab.carries_module_version());
    }
}
