//! The whole conversion, from container bytes to ELF bytes.

use alloc::vec::Vec;
use core::fmt;

use crate::container::{parse_with_diagnostics, FormatError, Image};
use crate::diag::Diagnostics;
use crate::inspect::{inspect, DynamicReport};
use crate::patch::{patch_first_segment_duplicate, patch_version_segment, FirstSegmentHeuristic};
use crate::reconstruct::{reconstruct_with_diagnostics, ReconstructError};

/// What [`convert`] should do besides the plain reconstruction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Options {
    /// Round the output size up to 16 bytes.
    pub align_output: bool,
    /// Restore the version segment from the container's tail.
    pub patch_version_segment: bool,
    /// Clear a duplicated first segment header.
    pub patch_first_segment: bool,
    /// List the dynamic tables.
    pub inspect_dynamic: bool,
    /// Tuning for the first segment patch.
    pub first_segment: FirstSegmentHeuristic,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            align_output: false,
            patch_version_segment: true,
            patch_first_segment: true,
            inspect_dynamic: false,
            first_segment: FirstSegmentHeuristic::default(),
        }
    }
}

/// A finished conversion.
#[derive(Clone, Debug)]
pub struct Conversion {
    /// The parsed container.
    pub image: Image,
    /// The ELF image.
    pub output: Vec<u8>,
    /// The dynamic listing, if one was requested and possible.
    pub dynamic: Option<DynamicReport>,
    /// Everything recorded along the way.
    pub diagnostics: Diagnostics,
}

/// The conversion failed. No output exists.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConvertError {
    /// The input is not a usable container.
    Format(FormatError),
    /// The image could not be rebuilt.
    Reconstruct(ReconstructError),
}

impl From<FormatError> for ConvertError {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

impl From<ReconstructError> for ConvertError {
    fn from(err: ReconstructError) -> Self {
        Self::Reconstruct(err)
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format(err) => write!(f, "could not parse container: {err}"),
            Self::Reconstruct(err) => write!(f, "could not rebuild ELF: {err}"),
        }
    }
}

impl core::error::Error for ConvertError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        match self {
            Self::Format(err) => Some(err),
            Self::Reconstruct(err) => Some(err),
        }
    }
}

/// Convert a container to an ELF image.
///
/// Parses `input`, rebuilds the image, then runs the enabled patches
/// and the dynamic listing in that order.
///
/// # Errors
///
/// This function will return an error if `input` cannot be parsed or
/// the image cannot be rebuilt. The patches and the listing never
/// fail.
pub fn convert(input: &[u8], options: &Options) -> Result<Conversion, ConvertError> {
    let mut diagnostics = Diagnostics::new();
    let image = parse_with_diagnostics(input, &mut diagnostics)?;
    let mut output =
        reconstruct_with_diagnostics(&image, input, options.align_output, &mut diagnostics)?;

    if options.patch_version_segment {
        patch_version_segment(&image, input, &mut output, &mut diagnostics);
    }
    if options.patch_first_segment {
        patch_first_segment_duplicate(&image, &mut output, options.first_segment, &mut diagnostics);
    }

    let dynamic = if options.inspect_dynamic {
        inspect(&image, &output, &mut diagnostics)
    } else {
        None
    };

    Ok(Conversion {
        image,
        output,
        dynamic,
        diagnostics,
    })
}
