use clap::Parser;
use color_eyre::eyre;

mod convert;
mod syslog;

use convert::{ConvertCtx, ConvertOptions};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let opts = ConvertOptions::parse();
    syslog::init_logging(opts.level_filter())?;

    let mut ctx = ConvertCtx::new(opts);
    let summary = ctx.run()?;

    if summary.failed > 0 {
        eyre::bail!(
            "{} of {} inputs could not be converted",
            summary.failed,
            summary.total
        );
    }

    Ok(())
}
