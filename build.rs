//! Renders the `snapmigrate(1)` man page from the clap definitions.
//!
//! The page lands in `OUT_DIR/snapmigrate.1` so packaging can pick it up
//! without running the binary.

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "snapmigrate.1";

fn main() -> io::Result<()> {
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(io::stdout(), "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let mut page = BufWriter::new(File::create(out_dir.join(MAN_PAGE))?);
    Man::new(cli::Cli::command()).render(&mut page)?;
    page.flush()
}
