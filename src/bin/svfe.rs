//! Command-line front end.

use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use sv_frontend::{Options, Session};

#[derive(Parser, Debug)]
#[command(
    name = "svfe",
    version,
    about = "SystemVerilog 2017 front-end producing an elaborated UHDM design model",
    arg_required_else_help = true
)]
struct Cli {
    /// Design source files; `+define+NAME=VALUE` and `+libext+.sv+.v`
    /// plusargs are accepted in place
    #[arg(value_name = "FILE", required = true)]
    files: Vec<String>,

    /// Library directory searched by module name
    #[arg(short = 'y', value_name = "PATH")]
    library_dirs: Vec<PathBuf>,

    /// Library file, parsed only for unresolved definitions
    #[arg(short = 'v', value_name = "FILE")]
    library_files: Vec<PathBuf>,

    /// Include search directory
    #[arg(short = 'I', value_name = "PATH")]
    include_dirs: Vec<PathBuf>,

    /// Library map file
    #[arg(long = "map", value_name = "FILE")]
    map_files: Vec<PathBuf>,

    /// Macro definition, NAME or NAME=VALUE
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    defines: Vec<String>,

    /// Treat every file as SystemVerilog regardless of extension
    #[arg(long)]
    sv: bool,

    /// Give each file its own compilation unit
    #[arg(long)]
    fileunit: bool,

    /// Stop after parsing; no design model is built
    #[arg(long)]
    parseonly: bool,

    /// Suppress diagnostic printing to stdout
    #[arg(long)]
    nostdout: bool,

    /// Bypass the on-disk caches
    #[arg(long)]
    nohash: bool,

    /// Synthesizable-subset checking mode
    #[arg(long)]
    synth: bool,

    /// Formal-verification mode
    #[arg(long)]
    formal: bool,

    /// Worker threads per stage (0 = machine default)
    #[arg(long = "mt", value_name = "N", default_value_t = 0)]
    max_threads: usize,

    /// Output directory for caches, logs and the .uhdm file
    #[arg(short = 'o', value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Log file location
    #[arg(short = 'l', value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Explicit top module (repeatable)
    #[arg(long = "top", value_name = "NAME")]
    top_modules: Vec<String>,
}

fn build_options(cli: Cli) -> Options {
    let mut options = Options {
        library_dirs: cli.library_dirs,
        library_files: cli.library_files,
        include_dirs: cli.include_dirs,
        map_files: cli.map_files,
        force_sv: cli.sv,
        file_unit: cli.fileunit,
        parse_only: cli.parseonly,
        no_stdout: cli.nostdout,
        no_cache: cli.nohash,
        synth: cli.synth,
        formal: cli.formal,
        max_threads: cli.max_threads,
        top_modules: cli.top_modules,
        log_file: cli.log_file,
        ..Options::default()
    };
    if let Some(out_dir) = cli.out_dir {
        options.out_dir = out_dir;
    }
    for file in cli.files {
        if let Some(rest) = file.strip_prefix("+define+") {
            options.push_define_arg(rest);
        } else if let Some(rest) = file.strip_prefix("+libext+") {
            options.push_libext_arg(rest);
        } else {
            options.sources.push(PathBuf::from(file));
        }
    }
    for define in cli.defines {
        options.push_define_arg(&define);
    }
    options
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let no_stdout = cli.nostdout;
    let session = Session::new(build_options(cli));

    let output = match session.compile() {
        Ok(output) => output,
        Err(err) => {
            eprintln!("svfe: {err}");
            return ExitCode::FAILURE;
        }
    };

    match session.log_diagnostics(&output) {
        Ok(rendered) => {
            if !no_stdout && !rendered.is_empty() {
                print!("{rendered}");
            }
        }
        Err(err) => eprintln!("svfe: could not write log file: {err}"),
    }

    if let Some(uhdm) = &output.uhdm_file {
        if !no_stdout {
            println!("wrote {}", uhdm.display());
        }
    }

    if output.exit_code() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
