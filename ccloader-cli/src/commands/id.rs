//! Chip identification command.

use {
    super::{SessionOptions, finish, open_loader, progress::Progress},
    anyhow::Result,
    ccloader::ChipIdentity,
};

/// Id command implementation.
pub(crate) fn cmd_id(opts: &SessionOptions) -> Result<()> {
    let mut loader = open_loader(opts)?;
    let mut progress = Progress::new(opts.chatty());

    let report = loader.identify(&mut |event| progress.handle(event))?;

    if !opts.json {
        if let Some(identity) = &report.identity {
            print_identity(identity);
        }
    }
    finish(opts, &report)
}

fn print_identity(identity: &ChipIdentity) {
    println!("Chip ID: 0x{:02x} ({})", identity.chip_id, identity.model);
    println!("Chip Revision: 0x{:02x}", identity.revision);
    if let Some(address) = identity.address {
        println!("IEEE Address: {address}");
    }
}
