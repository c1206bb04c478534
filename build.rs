//! Build script rendering the `cloudvol.1` man page into `OUT_DIR` from the
//! clap definitions shared with the binary.

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

const MAN_PAGE: &str = "cloudvol.1";

fn render_man_page(target: &Path) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(target)?);
    Man::new(cli::Cli::command()).render(&mut writer)?;
    writer.flush()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    for watched in ["build.rs", "src/cli/mod.rs"] {
        writeln!(stdout, "cargo:rerun-if-changed={watched}")?;
    }

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;
    render_man_page(&out_dir.join(MAN_PAGE))?;
    Ok(())
}
