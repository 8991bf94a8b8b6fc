//! Corruption-recovery passes run over the reconstructed image.
//!
//! Both are heuristics learned from real dumps rather than anything
//! the container format promises, so each can be disabled and neither
//! fails: when there is nothing to fix the pass records why and leaves
//! the output alone.

use log::Level;

use crate::container::Image;
use crate::diag::{Diagnostics, Event, Patch, SkipReason};
use crate::elf::SegmentType;
use crate::reconstruct::{copy_range, Layout};

/// Tuning for [`patch_first_segment_duplicate`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FirstSegmentHeuristic {
    /// Bytes taken from the start of the first segment and searched
    /// for in front of it. The interesting part of a first segment
    /// nearly always fits in 0xC0 bytes.
    pub probe_len: usize,
    /// Percentage at the end of the pre-segment region that is never
    /// searched.
    pub safety_percent: u8,
}

impl Default for FirstSegmentHeuristic {
    fn default() -> Self {
        Self {
            probe_len: 0xC0,
            safety_percent: 2,
        }
    }
}

/// Restore the version segment from the last `file_size` bytes of
/// the container, where signers tend to append it instead of listing
/// it as an entry.
///
/// Returns whether the output was changed.
pub fn patch_version_segment(
    image: &Image,
    input: &[u8],
    output: &mut [u8],
    diag: &mut Diagnostics,
) -> bool {
    let skip = |diag: &mut Diagnostics, reason| {
        diag.push(
            Level::Debug,
            Event::PatchSkipped {
                patch: Patch::VersionSegment,
                reason,
            },
        );
        false
    };

    let Some(ph) = image.find_segment(SegmentType::SceVersion) else {
        return skip(diag, SkipReason::NoSegment(SegmentType::SceVersion));
    };
    let Some(src) = (input.len() as u64).checked_sub(ph.file_size) else {
        return skip(diag, SkipReason::InputTooShort);
    };
    if copy_range(input, src, output, ph.offset, ph.file_size).is_err() {
        return skip(diag, SkipReason::OutOfBounds);
    }

    diag.push(
        Level::Info,
        Event::VersionSegmentPatched {
            src,
            dst: ph.offset,
            len: ph.file_size,
        },
    );
    true
}

/// Clear a duplicate of the first segment's leading bytes that some
/// signers leave between the program header table and the first
/// segment.
///
/// The duplicate is located two ways: from the last container entry
/// that starts before the first segment, and by searching for an
/// exact copy of the segment's first [`FirstSegmentHeuristic::probe_len`]
/// bytes. A match from the search wins.
///
/// Returns the offset the cleared range starts at; it always ends at
/// the first segment.
pub fn patch_first_segment_duplicate(
    image: &Image,
    output: &mut [u8],
    heuristic: FirstSegmentHeuristic,
    diag: &mut Diagnostics,
) -> Option<usize> {
    let skip = |diag: &mut Diagnostics, reason| {
        diag.push(
            Level::Debug,
            Event::PatchSkipped {
                patch: Patch::FirstSegmentDuplicate,
                reason,
            },
        );
        None
    };

    let first = Layout::new(&image.program_headers, false).map_or(0, |l| l.first_offset);
    let Some(first) = usize::try_from(first).ok().filter(|&f| f <= output.len()) else {
        return skip(diag, SkipReason::OutOfBounds);
    };

    let elf_offset = image.elf_offset as u64;
    let mut candidate = image
        .entries
        .iter()
        .filter_map(|entry| entry.offset.checked_sub(elf_offset))
        .filter_map(|offset| usize::try_from(offset).ok())
        .filter(|&offset| offset < first)
        .max()
        .filter(|&offset| offset != 0);

    // Metadata blocks are zero-padded; move up to the last zero
    // before real data.
    if let Some(c) = candidate {
        if output[c] == 0 {
            if let Some(pos) = output[c + 1..first].iter().position(|&b| b != 0) {
                candidate = Some(c + pos);
            }
        }
    }

    let probe_len = heuristic.probe_len;
    if probe_len != 0 && first.checked_add(probe_len).is_some_and(|end| end <= output.len()) {
        let safety = u64::from(heuristic.safety_percent.min(100));
        let limit = (first as u64 * (100 - safety) / 100) as usize;
        let end = candidate.map_or(limit, |c| c.min(limit));
        let probe = &output[first..first + probe_len];
        if let Some(found) = output[..first]
            .windows(probe_len)
            .take(end)
            .position(|window| window == probe)
        {
            candidate = Some(found);
        }
    }

    let Some(start) = candidate.filter(|&c| c != 0) else {
        return skip(diag, SkipReason::NoCandidate);
    };
    output[start..first].fill(0);
    diag.push(
        Level::Info,
        Event::FirstSegmentDuplicateCleared {
            offset: start as u64,
            len: (first - start) as u64,
        },
    );
    Some(start)
}
