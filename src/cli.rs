// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Command-line surface: argument types only, no behavior.
//!
//! ```bash
//! # List blocks of a VI
//! lvrsrc list -i program.vi
//!
//! # Binary-faithful dump to XML + BIN side files, and back
//! lvrsrc dump -i program.vi -m program.xml
//! lvrsrc create -m program.xml -i rebuilt.vi
//!
//! # Fully parsed export
//! lvrsrc extract -i program.vi
//!
//! # In-place password change
//! lvrsrc password -i program.vi qwerty
//! ```

use clap::{Parser, Subcommand};

use lvrsrc::printmap::MapTarget;

#[derive(Parser, Debug)]
#[command(name = "lvrsrc", version, about = "LabVIEW RSRC container reader and writer")]
pub struct Cli {
    /// Name of the RSRC file (VI or other)
    #[arg(short = 'i', long = "rsrc", global = true)]
    pub rsrc: Option<String>,

    /// Main XML file of the extracted dataset; defaults to the RSRC name
    /// with the extension changed to xml
    #[arg(short = 'm', long = "xml", global = true)]
    pub xml: Option<String>,

    /// Text encoding used for strings in the file
    #[arg(short = 't', long = "textcp", global = true, default_value = "mac_roman")]
    pub textcp: String,

    /// Export type descriptors as raw binary instead of parsed XML
    #[arg(long = "raw-connectors", global = true)]
    pub raw_connectors: bool,

    /// Print an offset map for the whole file (RSRC) or one block ident
    #[arg(long = "print-map", global = true, value_name = "RSRC|IDENT")]
    pub print_map: Option<String>,

    /// Derive side-file names from section names stored in the file
    #[arg(long = "keep-names", global = true)]
    pub keep_names: bool,

    /// Increase verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the blocks of an RSRC file
    List,
    /// Dump to XML with BIN side files, minimal parsing
    Dump,
    /// Extract to fully parsed XML
    Extract,
    /// Create an RSRC file from XML
    Create,
    /// Print general information about an RSRC file
    Info,
    /// Change the password and recompute checksums, in place
    Password {
        /// The new password; empty removes protection
        #[arg(allow_hyphen_values = true)]
        new_password: String,
    },
}

impl Cli {
    pub fn map_target(&self) -> MapTarget {
        match self.print_map.as_deref() {
            None => MapTarget::Off,
            Some("RSRC") => MapTarget::Container,
            Some(ident) => MapTarget::Block(ident.to_string()),
        }
    }
}
