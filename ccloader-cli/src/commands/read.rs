//! Flash dump command.

use {
    super::{SessionOptions, finish, open_loader, progress::Progress},
    crate::CliError,
    anyhow::{Context, Result},
    std::{
        fs::File,
        io::{BufWriter, Write},
        path::Path,
    },
};

/// Read command implementation.
///
/// The range and the destination file are checked before the port is opened.
pub(crate) fn cmd_read(
    opts: &SessionOptions,
    file: &Path,
    start_block: u16,
    block_count: u16,
) -> Result<()> {
    ccloader::flasher::validate_dump(start_block, block_count)
        .map_err(|e| CliError::Usage(e.to_string()))?;

    let out = File::create(file)
        .with_context(|| format!("Could not create file {}", file.display()))?;
    let mut sink = BufWriter::new(out);

    let mut loader = open_loader(opts)?;
    let mut progress = Progress::new(opts.chatty());
    let report = loader.dump(start_block, block_count, &mut sink, &mut |event| {
        progress.handle(event);
    })?;

    sink.flush()
        .with_context(|| format!("Could not write file {}", file.display()))?;
    finish(opts, &report)
}
