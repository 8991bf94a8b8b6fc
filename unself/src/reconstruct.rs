//! Rebuilds the plain ELF image from a parsed container.
//!
//! The ELF header and program header table are transplanted verbatim
//! from the container, then every present entry is copied to the file
//! offset of the program header it fills. Everything else stays zero.

use alloc::vec::Vec;
use core::fmt;

use log::Level;

use crate::container::Image;
use crate::decode::{align_up, byte_range};
use crate::diag::{Diagnostics, Event};
use crate::elf::ProgramHeader;

/// Where the output's bytes come from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    /// Smallest nonzero program header offset, or zero if every
    /// header sits at offset zero. Everything before it comes from
    /// the container's ELF header region.
    pub first_offset: u64,
    /// Largest program header offset.
    pub last_offset: u64,
    /// Size of the output buffer.
    pub size: u64,
}

impl Layout {
    /// Compute the layout described by `program_headers`. Returns
    /// `None` for an empty table, or if the last segment ends beyond
    /// `u64::MAX`.
    pub fn new(program_headers: &[ProgramHeader], align_output: bool) -> Option<Self> {
        // Offset zero is the container header, never a real segment.
        let first_offset = program_headers
            .iter()
            .map(|ph| ph.offset)
            .filter(|&offset| offset != 0)
            .min()
            .unwrap_or(0);
        // Ties keep the earliest header.
        let last = program_headers
            .iter()
            .reduce(|last, ph| if ph.offset > last.offset { ph } else { last })?;

        let mut size = last.offset.checked_add(last.file_size)?;
        if align_output {
            size = size.checked_add(0xF).map(|_| align_up(size, 0x10))?;
        }

        Some(Self {
            first_offset,
            last_offset: last.offset,
            size,
        })
    }
}

/// Largest output accepted for `input_len` bytes of container. Segment
/// payloads come from the container, so a valid image is never much
/// larger than its input; anything beyond this comes from corrupt
/// program headers.
pub fn output_limit(input_len: usize) -> u64 {
    (input_len as u64)
        .saturating_mul(16)
        .saturating_add(0x10_0000)
}

/// Which buffer an out-of-range copy touched.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Buffer {
    /// The container.
    Input,
    /// The reconstructed image.
    Output,
}

/// The image could not be rebuilt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReconstructError {
    /// The ELF has no program headers.
    NoProgramHeaders,
    /// The container has no entries.
    NoEntries,
    /// The last segment ends beyond `u64::MAX`.
    SizeOverflow,
    /// The program headers ask for an output far larger than the
    /// container.
    TooLarge {
        /// Requested size in bytes.
        size: u64,
        /// The [`output_limit`] for this container.
        limit: u64,
    },
    /// The output buffer could not be allocated.
    Allocation {
        /// Requested size in bytes.
        size: u64,
    },
    /// A present entry names a program header that does not exist.
    SegmentIndexOutOfRange {
        /// Index of the entry in the table.
        entry: usize,
        /// The program header index it carries.
        index: u16,
    },
    /// A copy's source or destination lies outside its buffer.
    OutOfBounds {
        /// The buffer in question.
        buffer: Buffer,
        /// Start of the range.
        offset: u64,
        /// Length of the range.
        len: u64,
        /// Size of the buffer.
        available: usize,
    },
}

impl fmt::Display for ReconstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProgramHeaders => f.write_str("the ELF has no program headers"),
            Self::NoEntries => f.write_str("the container has no entries"),
            Self::SizeOverflow => f.write_str("the last segment ends past the addressable range"),
            Self::TooLarge { size, limit } => write!(
                f,
                "the program headers need a {size:#x} byte output, more than the {limit:#x} allowed"
            ),
            Self::Allocation { size } => {
                write!(f, "could not allocate a {size:#x} byte output buffer")
            }
            Self::SegmentIndexOutOfRange { entry, index } => {
                write!(f, "entry {entry} refers to missing program header {index}")
            }
            Self::OutOfBounds {
                buffer,
                offset,
                len,
                available,
            } => write!(
                f,
                "{buffer:?} range {offset:#x}..{:#x} exceeds its {available:#x} bytes",
                offset.saturating_add(*len)
            ),
        }
    }
}

impl core::error::Error for ReconstructError {}

/// Copy `len` bytes from `input[src..]` to `output[dst..]`.
pub(crate) fn copy_range(
    input: &[u8],
    src: u64,
    output: &mut [u8],
    dst: u64,
    len: u64,
) -> Result<(), ReconstructError> {
    let from = byte_range(src, len, input.len()).ok_or(ReconstructError::OutOfBounds {
        buffer: Buffer::Input,
        offset: src,
        len,
        available: input.len(),
    })?;
    let to = byte_range(dst, len, output.len()).ok_or(ReconstructError::OutOfBounds {
        buffer: Buffer::Output,
        offset: dst,
        len,
        available: output.len(),
    })?;
    output[to].copy_from_slice(&input[from]);
    Ok(())
}

/// Rebuild the ELF image.
///
/// # Errors
///
/// See [`reconstruct_with_diagnostics`].
pub fn reconstruct(image: &Image, input: &[u8], align_output: bool) -> Result<Vec<u8>, ReconstructError> {
    reconstruct_with_diagnostics(image, input, align_output, &mut Diagnostics::new())
}

/// Rebuild the ELF image, recording the layout and every copy in
/// `diag`.
///
/// # Errors
///
/// This function will return an error if the image has no program
/// headers or no entries, if the output would exceed
/// [`output_limit`] or cannot be allocated, or if
/// any copy would read or write outside its buffer.
pub fn reconstruct_with_diagnostics(
    image: &Image,
    input: &[u8],
    align_output: bool,
    diag: &mut Diagnostics,
) -> Result<Vec<u8>, ReconstructError> {
    if image.program_headers.is_empty() {
        return Err(ReconstructError::NoProgramHeaders);
    }
    if image.entries.is_empty() {
        return Err(ReconstructError::NoEntries);
    }

    let layout =
        Layout::new(&image.program_headers, align_output).ok_or(ReconstructError::SizeOverflow)?;
    diag.push(
        Level::Debug,
        Event::Layout {
            size: layout.size,
            first_offset: layout.first_offset,
            last_offset: layout.last_offset,
        },
    );

    let limit = output_limit(input.len());
    if layout.size > limit {
        return Err(ReconstructError::TooLarge {
            size: layout.size,
            limit,
        });
    }
    let size = usize::try_from(layout.size).map_err(|_| ReconstructError::Allocation {
        size: layout.size,
    })?;
    let mut output = Vec::new();
    output
        .try_reserve_exact(size)
        .map_err(|_| ReconstructError::Allocation { size: layout.size })?;
    output.resize(size, 0);

    // ELF header, program header table and whatever else precedes
    // the first segment.
    copy_range(
        input,
        image.elf_offset as u64,
        &mut output,
        0,
        layout.first_offset,
    )?;

    for (index, entry) in image.present_entries() {
        let segment = entry.props.segment_index();
        let ph = image
            .segment_for(entry)
            .ok_or(ReconstructError::SegmentIndexOutOfRange {
                entry: index,
                index: segment,
            })?;

        if ph.file_size != 0 && ph.file_size != entry.mem_size {
            diag.push(
                Level::Warn,
                Event::SizeMismatch {
                    segment,
                    entry_size: entry.mem_size,
                    declared_size: ph.file_size,
                },
            );
        }

        copy_range(input, entry.offset, &mut output, ph.offset, entry.file_size)?;
        diag.push(
            Level::Debug,
            Event::SegmentCopied {
                entry: index,
                segment,
                seg_type: ph.seg_type,
                src: entry.offset,
                dst: ph.offset,
                len: entry.file_size,
            },
        );
    }

    Ok(output)
}
