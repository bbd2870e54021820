//! Command-line interface for the FDF compiler
//!
//! Usage:
//!   fdfc <file.fdf> [-o <dir>] [-D NAME=VALUE]... [--pcd NAME=VALUE]...
//!   fdfc <file.fdf> --check            - parse and validate only
//!   fdfc <file.fdf> --dump-document    - print the parsed document as JSON
//!   fdfc <file.fdf> --dry-run          - plan images without writing files

use std::collections::HashMap;

use clap::{Arg, ArgAction, Command};
use log::info;

use fdf_gen::toolchain::{CommandToolchain, StubToolchain, Toolchain};
use fdf_gen::GenContext;
use fdf_parser::CompileSession;

fn main() {
    let matches = Command::new("fdfc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compiles flash description files into firmware image layouts")
        .arg_required_else_help(true)
        .arg(
            Arg::new("file")
                .help("Path to the FDF file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("define")
                .long("define")
                .short('D')
                .value_name("NAME=VALUE")
                .help("Define a macro, overriding any file-level definition")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("pcd")
                .long("pcd")
                .value_name("NAME=VALUE")
                .help("Bind a PCD value (same effect as a SET statement)")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("workspace")
                .long("workspace")
                .short('w')
                .value_name("DIR")
                .help("Workspace root for include and input resolution"),
        )
        .arg(
            Arg::new("platform")
                .long("platform")
                .short('p')
                .value_name("DIR")
                .help("Active platform directory, searched for includes"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .value_name("DIR")
                .help("Output directory for generated images")
                .default_value("."),
        )
        .arg(
            Arg::new("tools")
                .long("tools")
                .value_name("FILE")
                .help("JSON map of encoder commands; without it a stub encoder is used"),
        )
        .arg(
            Arg::new("symbols")
                .long("symbols")
                .value_name("FILE")
                .help("Depex symbol table ('name guid' per line)"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Parse and validate only; generate nothing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dump-document")
                .long("dump-document")
                .help("Print the parsed document as JSON and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Plan every artifact but write nothing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("quiet")
                .long("quiet")
                .short('q')
                .help("Only log errors")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let default_level = if matches.get_flag("verbose") {
        "debug"
    } else if matches.get_flag("quiet") {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let file = matches.get_one::<String>("file").expect("file is required");
    let mut session = CompileSession::new(file);
    if let Some(dir) = matches.get_one::<String>("workspace") {
        session = session.with_workspace(dir);
    }
    if let Some(dir) = matches.get_one::<String>("platform") {
        session = session.with_platform(dir);
    }
    for item in matches.get_many::<String>("define").into_iter().flatten() {
        let (name, value) = split_assignment(item, "-D");
        session.scope.define_cli(name, value);
    }
    for item in matches.get_many::<String>("pcd").into_iter().flatten() {
        let (name, value) = split_assignment(item, "--pcd");
        session.scope.set_pcd(name, value);
    }

    let document = fdf_parser::compile_document(&mut session).unwrap_or_else(|e| {
        eprintln!("error: {}", e);
        std::process::exit(1);
    });

    if matches.get_flag("dump-document") {
        let json = serde_json::to_string_pretty(&document).unwrap_or_else(|e| {
            eprintln!("error: cannot serialize document: {}", e);
            std::process::exit(1);
        });
        println!("{}", json);
        return;
    }
    if matches.get_flag("check") {
        fdf_gen::xref::check(&document).unwrap_or_else(|e| {
            eprintln!("error: {}", e);
            std::process::exit(1);
        });
        info!("{}: document is valid", file);
        return;
    }

    let toolchain = build_toolchain(&matches);
    let base_dir = session.fdf_dir();
    let output_dir = matches.get_one::<String>("output").expect("has default");
    let mut ctx = GenContext::new(&document, toolchain.as_ref(), base_dir, output_dir);

    if matches.get_flag("dry-run") {
        let artifacts = ctx.plan().unwrap_or_else(|e| {
            eprintln!("error: {}", e);
            std::process::exit(1);
        });
        for artifact in artifacts {
            println!("{}\t{} bytes", artifact.path.display(), artifact.data.len());
        }
        return;
    }

    let written = ctx.generate().unwrap_or_else(|e| {
        eprintln!("error: {}", e);
        std::process::exit(1);
    });
    for path in written {
        println!("{}", path.display());
    }
}

fn split_assignment<'a>(item: &'a str, flag: &str) -> (&'a str, &'a str) {
    match item.split_once('=') {
        Some((name, value)) if !name.is_empty() => (name, value),
        _ => {
            eprintln!("error: {} expects NAME=VALUE, got '{}'", flag, item);
            std::process::exit(1);
        }
    }
}

fn build_toolchain(matches: &clap::ArgMatches) -> Box<dyn Toolchain> {
    let Some(tools_path) = matches.get_one::<String>("tools") else {
        return Box::new(StubToolchain::new());
    };
    let text = std::fs::read_to_string(tools_path).unwrap_or_else(|e| {
        eprintln!("error: cannot read '{}': {}", tools_path, e);
        std::process::exit(1);
    });
    let commands: HashMap<String, Vec<String>> =
        serde_json::from_str(&text).unwrap_or_else(|e| {
            eprintln!("error: malformed tool map '{}': {}", tools_path, e);
            std::process::exit(1);
        });
    let mut toolchain = CommandToolchain::new(commands);
    if let Some(symbols) = matches.get_one::<String>("symbols") {
        toolchain
            .load_symbol_table(std::path::Path::new(symbols))
            .unwrap_or_else(|e| {
                eprintln!("error: {}", e);
                std::process::exit(1);
            });
    }
    Box::new(toolchain)
}
