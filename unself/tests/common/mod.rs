#![allow(dead_code)]

use unself::container::{
    ContainerEntry, ContainerHeader, EntryProps, ExtendedInfo, ProgramType, SELF_MAGIC,
};
use unself::decode::{align_up, Decode, Encode};
use unself::elf::raw::{
    FileHdr, FileIdent, ELFCLASS64, ELFDATA2LSB, ELFOSABI_FREEBSD, EM_X86_64, EV_CURRENT,
    FILE_HDR_SIZE, MAGIC, PROGRAM_HDR_SIZE,
};
use unself::elf::{ProgramHeader, SegmentFlags, SegmentType};

/// Builds container images for tests.
#[derive(Clone, Debug)]
pub struct Fixture {
    pub len: usize,
    pub filety: u16,
    pub machine: u16,
    pub entries: Vec<ContainerEntry>,
    pub program_headers: Vec<ProgramHeader>,
    pub patches: Vec<(usize, Vec<u8>)>,
    pub seed: u8,
}

impl Fixture {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            filety: 0xFE10,
            machine: EM_X86_64,
            entries: Vec::new(),
            program_headers: Vec::new(),
            patches: Vec::new(),
            seed: 0x5A,
        }
    }

    pub fn segment(self, seg_type: SegmentType, offset: u64, file_size: u64) -> Self {
        self.segment_with_mem_size(seg_type, offset, file_size, file_size)
    }

    pub fn segment_with_mem_size(
        mut self,
        seg_type: SegmentType,
        offset: u64,
        file_size: u64,
        mem_size: u64,
    ) -> Self {
        self.program_headers.push(ProgramHeader {
            seg_type,
            flags: SegmentFlags::READ,
            offset,
            virt_addr: offset,
            phys_addr: offset,
            file_size,
            mem_size,
            align: 0x4000,
        });
        self
    }

    /// A present entry filling program header `segment`.
    pub fn entry(mut self, segment: u16, offset: u64, size: u64) -> Self {
        self.entries.push(ContainerEntry {
            props: EntryProps::for_segment(segment),
            offset,
            file_size: size,
            mem_size: size,
        });
        self
    }

    /// An entry holding signing metadata, skipped by the conversion.
    pub fn metadata(mut self, offset: u64, size: u64) -> Self {
        self.entries.push(ContainerEntry {
            props: EntryProps::from(0),
            offset,
            file_size: size,
            mem_size: size,
        });
        self
    }

    /// Place `bytes` at `offset` in the container, after everything
    /// else has been written.
    pub fn bytes(mut self, offset: usize, bytes: impl Into<Vec<u8>>) -> Self {
        self.patches.push((offset, bytes.into()));
        self
    }

    pub fn elf_offset(&self) -> usize {
        ContainerHeader::SIZE + self.entries.len() * ContainerEntry::SIZE
    }

    /// End of the extended info.
    pub fn headers_end(&self) -> usize {
        let table_end =
            self.elf_offset() + FILE_HDR_SIZE + self.program_headers.len() * PROGRAM_HDR_SIZE;
        align_up(table_end as u64, 0x10) as usize + ExtendedInfo::SIZE
    }

    /// Byte stored at `pos` in every present entry's payload.
    pub fn pattern(&self, pos: usize) -> u8 {
        (pos as u8).wrapping_mul(31).wrapping_add(self.seed) | 1
    }

    pub fn build(&self) -> Vec<u8> {
        let mut headers = Vec::new();
        ContainerHeader {
            magic: SELF_MAGIC,
            version: 0,
            mode: 1,
            endian: 1,
            attribs: 0x12,
            key_type: 0x101,
            header_size: self.headers_end() as u16,
            meta_size: 0,
            file_size: self.len as u64,
            entry_count: self.entries.len() as u16,
            flags: 0x22,
            padding: 0,
        }
        .encode(&mut headers);
        for entry in &self.entries {
            entry.encode(&mut headers);
        }
        FileHdr {
            ident: FileIdent {
                magic: MAGIC,
                class: ELFCLASS64,
                data: ELFDATA2LSB,
                version: EV_CURRENT as u8,
                osabi: ELFOSABI_FREEBSD,
                abi_version: 0,
                padding: [0; 7],
            },
            filety: self.filety,
            machine: self.machine,
            version: EV_CURRENT,
            entry_addr: 0,
            prog_hdr_offset: FILE_HDR_SIZE as u64,
            sec_hdr_offset: 0,
            flags: 0,
            hdr_size: FILE_HDR_SIZE as u16,
            prog_hdr_size: PROGRAM_HDR_SIZE as u16,
            prog_hdr_count: self.program_headers.len() as u16,
            sec_hdr_size: 0x40,
            sec_hdr_count: 0,
            sec_strtab_index: 0,
        }
        .encode(&mut headers);
        for ph in &self.program_headers {
            ph.encode(&mut headers);
        }
        headers.resize(align_up(headers.len() as u64, 0x10) as usize, 0);
        ExtendedInfo {
            paid: 0x3100_0000_0000_0002,
            ptype: ProgramType::NpdrmExec,
            app_version: 0x0100_0000,
            fw_version: 0x0500_0000,
            digest: [0xAB; 32],
        }
        .encode(&mut headers);

        let mut buf = vec![0; self.len.max(headers.len())];
        buf[..headers.len()].copy_from_slice(&headers);

        for entry in self.entries.iter().filter(|e| e.props.present()) {
            let start = entry.offset as usize;
            let end = (start + entry.file_size as usize).min(buf.len());
            for pos in start..end {
                buf[pos] = self.pattern(pos);
            }
        }
        for (offset, bytes) in &self.patches {
            buf[*offset..offset + bytes.len()].copy_from_slice(bytes);
        }

        buf
    }
}

/// One LOAD segment at 0x1000, filled by an entry at 0x100.
pub fn single_load() -> Fixture {
    Fixture::new(0x2000)
        .segment(SegmentType::Load, 0x1000, 0x800)
        .entry(0, 0x100, 0x800)
}
