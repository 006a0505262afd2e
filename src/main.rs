// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! lvrsrc CLI: list, dump, extract, create, info and password commands
//! over LabVIEW RSRC containers.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use lvrsrc::container::header::ident_str;
use lvrsrc::container::{Config, Container};
use lvrsrc::error::{LvError, Result};
use lvrsrc::textenc::TextEncoding;
use lvrsrc::xml;

mod cli;
use cli::{Cli, Commands};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> Result<Config> {
    let textenc = TextEncoding::from_label(&cli.textcp).ok_or_else(|| {
        LvError::XmlSchemaViolation(format!("unsupported text encoding '{}'", cli.textcp))
    })?;
    Ok(Config {
        textenc,
        raw_connectors: cli.raw_connectors,
        print_map: cli.map_target(),
        keep_names: cli.keep_names,
    })
}

fn rsrc_path(cli: &Cli) -> Result<PathBuf> {
    cli.rsrc
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| LvError::ContainerMalformed("no RSRC file given (use -i)".into()))
}

fn xml_path(cli: &Cli) -> Result<PathBuf> {
    if let Some(xml) = &cli.xml {
        return Ok(PathBuf::from(xml));
    }
    Ok(rsrc_path(cli)?.with_extension("xml"))
}

fn open(cli: &Cli) -> Result<Container<fs::File>> {
    let path = rsrc_path(cli)?;
    let file = fs::File::open(&path)?;
    Container::open(file, build_config(cli)?)
}

fn print_map_if_requested<R>(container: &mut Container<R>) {
    if container.config.print_map.wants_container() {
        container.map.group("BlockSectionStarts", |l| l.starts_with("BlockSectionStart["));
        container.map.group("BlockData", |l| l.starts_with("BlockSectionData["));
        container.map.group("NameStrings", |l| l.starts_with("NameOfSection["));
        print!("{}", container.map.render());
    } else if let lvrsrc::printmap::MapTarget::Block(ident) = &container.config.print_map {
        let mut map = lvrsrc::printmap::PrintMap::new();
        if let Some(block) = container.blocks.iter().find(|b| &b.pretty_ident() == ident) {
            for section in &block.sections {
                if let lvrsrc::block::Content::Vctp(table) = &section.content {
                    lvrsrc::block::vctp::record_map(table, &mut map);
                }
            }
        }
        print!("{}", map.render());
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::List => {
            let container = open(cli)?;
            println!("{}\t{}", "ident", "content");
            for block in &container.blocks {
                println!("{}\t{}", block.pretty_ident(), block.preview());
            }
            Ok(())
        }
        Commands::Dump => {
            let mut container = open(cli)?;
            xml::export_file(&mut container, &xml_path(cli)?, true)?;
            print_map_if_requested(&mut container);
            Ok(())
        }
        Commands::Extract => {
            let mut container = open(cli)?;
            xml::export_file(&mut container, &xml_path(cli)?, false)?;
            print_map_if_requested(&mut container);
            Ok(())
        }
        Commands::Create => {
            let xml_file = xml_path(cli)?;
            let mut container = xml::import_file(&xml_file, build_config(cli)?)?;
            let out_path = match &cli.rsrc {
                Some(p) => PathBuf::from(p),
                None => xml_file.with_extension(container.file_type().extension()),
            };
            write_container(&mut container, &out_path)
        }
        Commands::Info => {
            let container = open(cli)?;
            print_info(&container);
            Ok(())
        }
        Commands::Password { new_password } => {
            let path = rsrc_path(cli)?;
            let file = fs::File::open(&path)?;
            let mut container = Container::open(file, build_config(cli)?)?;
            container.load_all_raw()?;
            print_password_state(&container, "Previous password data");
            container.set_password(new_password)?;
            print_password_state(&container, "New password data");
            write_container(&mut container, &path)
        }
    }
}

fn write_container(container: &mut Container<fs::File>, path: &Path) -> Result<()> {
    let mut out = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    container.write(&mut out)
}

fn print_info<R>(container: &Container<R>) {
    let version = container.version();
    println!("Type:          {}", ident_str(&container.rsrc_type));
    println!("FormatVersion: {}", container.format_version);
    println!("FileVersion:   {}", version);
    println!("Encoding:      {}", container.config.textenc);
    println!("Blocks:        {}", container.blocks.len());
    for block in &container.blocks {
        let sections: Vec<String> = block
            .sections
            .iter()
            .map(|s| {
                let size = s.raw.as_ref().map_or(0, Vec::len);
                format!("{} ({} B)", s.index(), size)
            })
            .collect();
        println!("  {:4}  sections: {}", block.pretty_ident(), sections.join(", "));
    }
}

fn print_password_state<R>(container: &Container<R>, heading: &str) {
    let Some(block) = container.block(b"BDPW") else {
        return;
    };
    let Some(section) = block.default_section() else {
        return;
    };
    if let lvrsrc::block::Content::Bdpw(rec) = &section.content {
        println!("{}:", heading);
        println!("  password md5: {}", hex::encode(rec.password_md5));
        println!("  hash_1      : {}", hex::encode(rec.hash_1));
        println!("  hash_2      : {}", hex::encode(rec.hash_2.unwrap_or_default()));
    }
}
