//! Flash programming command.

use {
    super::{SessionOptions, finish, open_loader, progress::Progress},
    anyhow::{Context, Result},
    console::style,
    std::{fs::File, io::BufReader, path::Path},
};

/// Write command implementation.
///
/// The image is opened before the port so a bad path fails fast.
pub(crate) fn cmd_write(opts: &SessionOptions, file: &Path, verify: bool) -> Result<()> {
    let image = File::open(file)
        .with_context(|| format!("Could not open file {}", file.display()))?;
    let len = image
        .metadata()
        .with_context(|| format!("Could not read metadata of {}", file.display()))?
        .len();

    if opts.chatty() {
        eprintln!(
            "{} Image {} ({len} bytes{})",
            style("📦").cyan(),
            file.display(),
            if verify { ", verify on" } else { "" }
        );
    }

    let mut source = BufReader::new(image);
    let mut loader = open_loader(opts)?;
    let mut progress = Progress::new(opts.chatty());
    let report = loader.program(&mut source, len, verify, &mut |event| {
        progress.handle(event);
    })?;

    finish(opts, &report)
}
