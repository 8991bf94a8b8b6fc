use clap::Parser;
use color_eyre::eyre::{self, WrapErr};
use log::LevelFilter;
use unself::{FirstSegmentHeuristic, Options};

use std::{
    fs,
    num::ParseIntError,
    path::{Path, PathBuf},
};

use crate::syslog;

/// Convert signed executable containers back to plain ELF files
#[derive(Clone, Debug, Parser)]
#[clap(version)]
pub struct ConvertOptions {
    /// Input file, or a glob pattern matching several files
    input: String,

    /// Output file [default: INPUT with its extension replaced by `.elf`]
    output: Option<PathBuf>,

    /// Show details. Given twice, same as --vv
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Show everything, including the dynamic tables
    #[clap(long = "vv")]
    very_verbose: bool,

    /// Convert, but don't write anything
    #[clap(short, long)]
    dry_run: bool,

    /// Overwrite the input if no output is given
    #[clap(short, long)]
    overwrite: bool,

    /// Round the output size up to 16 bytes
    #[clap(short, long)]
    align_size: bool,

    /// Don't clear a duplicated first segment header
    #[clap(long, visible_alias = "nf")]
    not_patch_first_segment_duplicate: bool,

    /// Don't restore the version segment from the end of the input
    #[clap(long, visible_alias = "nv")]
    not_patch_version_segment: bool,

    /// Bytes of the first segment searched for in front of it
    #[clap(long, default_value = "0xC0", value_parser = parse_number)]
    probe_len: usize,

    /// Percentage at the end of the region before the first segment
    /// that is never searched
    #[clap(long, default_value_t = 2, value_parser = clap::value_parser!(u8).range(0..=100))]
    safety_percent: u8,
}

/// Accepts decimal, or hex with a `0x` prefix.
fn parse_number(s: &str) -> Result<usize, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

impl ConvertOptions {
    fn tracing(&self) -> bool {
        self.very_verbose || self.verbose >= 2
    }

    pub fn level_filter(&self) -> LevelFilter {
        if self.tracing() {
            LevelFilter::Trace
        } else if self.verbose == 1 {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        }
    }

    pub fn library_options(&self) -> Options {
        Options {
            align_output: self.align_size,
            patch_version_segment: !self.not_patch_version_segment,
            patch_first_segment: !self.not_patch_first_segment_duplicate,
            inspect_dynamic: self.tracing(),
            first_segment: FirstSegmentHeuristic {
                probe_len: self.probe_len,
                safety_percent: self.safety_percent,
            },
        }
    }

    /// Files named by the input argument. A path that exists is taken
    /// literally, even if it looks like a pattern.
    pub fn inputs(&self) -> eyre::Result<Vec<PathBuf>> {
        let literal = Path::new(&self.input);
        if literal.exists() {
            return Ok(vec![literal.to_path_buf()]);
        }

        let mut inputs = Vec::new();
        for path in glob::glob(&self.input).wrap_err("invalid input pattern")? {
            let path = path?;
            if path.is_file() {
                inputs.push(path);
            }
        }
        if inputs.is_empty() {
            eyre::bail!("no files match {}", self.input);
        }
        Ok(inputs)
    }

    /// Where the ELF converted from `input` goes.
    pub fn output_for(&self, input: &Path) -> PathBuf {
        match &self.output {
            Some(output) => output.clone(),
            None if self.overwrite => input.to_path_buf(),
            None => input.with_extension("elf"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    pub failed: usize,
}

pub struct ConvertCtx {
    opts: ConvertOptions,
    options: Options,
}

impl ConvertCtx {
    pub fn new(opts: ConvertOptions) -> Self {
        let options = opts.library_options();
        Self { opts, options }
    }

    /// Convert every input in turn. A failed input is logged and
    /// counted, and does not stop the others.
    pub fn run(&mut self) -> eyre::Result<Summary> {
        let inputs = self.opts.inputs()?;
        if inputs.len() > 1 && self.opts.output.is_some() {
            eyre::bail!(
                "{} matches {} files, so an output path can't be given",
                self.opts.input,
                inputs.len()
            );
        }

        let mut summary = Summary {
            total: inputs.len(),
            failed: 0,
        };
        for input in &inputs {
            syslog::set_input(Some(input));
            if let Err(err) = self.convert_one(input) {
                log::error!("{err:#}");
                summary.failed += 1;
            }
        }
        syslog::set_input(None);

        Ok(summary)
    }

    pub fn convert_one(&self, input: &Path) -> eyre::Result<()> {
        let data =
            fs::read(input).wrap_err_with(|| format!("failed to read {}", input.display()))?;
        let conversion = unself::convert(&data, &self.options)
            .wrap_err_with(|| format!("failed to convert {}", input.display()))?;

        for diagnostic in &conversion.diagnostics {
            log::log!(diagnostic.level, "{}", diagnostic.event);
        }

        let output = self.opts.output_for(input);
        if self.opts.dry_run {
            log::info!(
                "dry run, not writing {} bytes to {}",
                conversion.output.len(),
                output.display()
            );
            return Ok(());
        }

        fs::write(&output, &conversion.output)
            .wrap_err_with(|| format!("failed to write {}", output.display()))?;
        log::info!(
            "wrote {} bytes to {}",
            conversion.output.len(),
            output.display()
        );

        Ok(())
    }
}
