//! A SystemVerilog 2017 front-end.
//!
//! Accepts a set of design source files, library files, include directories
//! and command-line macro definitions, and produces an elaborated, typed
//! hardware design model (UHDM) ready for downstream synthesis, simulation
//! or linting tools.
//!
//! The pipeline is strictly staged: library resolution, preprocessing,
//! parsing (with large-file splitting), first-pass model compilation,
//! elaboration, reference binding, and a final integrity check. See
//! [`Session::compile`].
//!
//! # Examples
//!
//! ```no_run
//! use sv_frontend::Session;
//!
//! let session = Session::builder()
//!     .source("rtl/top.sv")
//!     .include_dir("rtl/include")
//!     .define("SYNTHESIS", None)
//!     .build();
//! let output = session.compile()?;
//! assert_eq!(output.exit_code(), 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(rustdoc::all)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod error;

pub mod binder;
pub mod cache;
pub mod config;
pub mod diagnostics;
pub mod elaborator;
pub mod fs;
pub mod integrity;
pub mod lexer;
pub mod library;
pub mod node;
pub mod parser;
pub mod preprocessor;
pub mod splitter;
pub mod symbols;
pub mod uhdm;

mod compile;
pub use compile::{CompileOutput, Compiler};

pub use config::Options;
pub use diagnostics::{Diagnostic, ErrorContainer, ErrorKind, Severity};
pub use elaborator::Design;
pub use error::{Result, SvError};
pub use fs::{FileSystem, PathId};
pub use symbols::{SymbolId, SymbolTable};

use std::path::PathBuf;

/// Process-wide holder for the symbol table, the filesystem boundary, and
/// the command-line options of one front-end run.
#[derive(Debug)]
pub struct Session {
    /// The run's configuration.
    pub options: Options,
    /// Path interner and filesystem access.
    pub fs: FileSystem,
    /// Shared string interner; safe to use from worker threads.
    pub symbols: SymbolTable,
}

impl Session {
    /// Convenience function to call `SessionBuilder::default()`.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn new(options: Options) -> Self {
        Self { options, fs: FileSystem::new(), symbols: SymbolTable::new() }
    }

    /// Compiles all the sources of the session through the full pipeline.
    ///
    /// Diagnostics never abort compilation below [`Severity::Fatal`]; the
    /// returned [`CompileOutput`] carries them alongside the design.
    pub fn compile(&self) -> Result<CompileOutput> {
        Compiler::new(self).compile()
    }

    /// Renders the run's diagnostics and writes them to the configured log
    /// file. Returns the rendered text so callers can mirror it to stdout.
    pub fn log_diagnostics(&self, output: &CompileOutput) -> Result<String> {
        let rendered = output.errors.render(&self.fs, &self.symbols, false);
        let log_path = self
            .options
            .log_file
            .clone()
            .unwrap_or_else(|| self.options.out_dir.join("svfe.log"));
        let id = self.fs.to_path_id(&log_path);
        self.fs.write(id, &rendered)?;
        Ok(rendered)
    }
}

/// Builder for [`Session`].
#[derive(Debug, Default)]
pub struct SessionBuilder {
    options: Options,
}

impl SessionBuilder {
    #[must_use]
    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.sources.push(path.into());
        self
    }

    #[must_use]
    pub fn sources<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.options.sources.extend(paths.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn include_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.include_dirs.push(path.into());
        self
    }

    #[must_use]
    pub fn library_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.library_dirs.push(path.into());
        self
    }

    #[must_use]
    pub fn library_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.library_files.push(path.into());
        self
    }

    #[must_use]
    pub fn map_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.map_files.push(path.into());
        self
    }

    #[must_use]
    pub fn define(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.options.defines.push(config::CommandLineDefine { name: name.into(), value });
        self
    }

    #[must_use]
    pub fn top_module(mut self, name: impl Into<String>) -> Self {
        self.options.top_modules.push(name.into());
        self
    }

    /// `-sv`: treat every file as SystemVerilog.
    #[must_use]
    pub fn force_sv(mut self, force: bool) -> Self {
        self.options.force_sv = force;
        self
    }

    /// `-fileunit`: give each file its own compilation unit.
    #[must_use]
    pub fn file_unit(mut self, file_unit: bool) -> Self {
        self.options.file_unit = file_unit;
        self
    }

    /// `-parseonly`: stop the pipeline after parsing.
    #[must_use]
    pub fn parse_only(mut self, parse_only: bool) -> Self {
        self.options.parse_only = parse_only;
        self
    }

    /// `-nohash`: disable the on-disk caches.
    #[must_use]
    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.options.no_cache = no_cache;
        self
    }

    /// `-mt N`: worker threads per stage; `0` picks the machine default.
    #[must_use]
    pub fn max_threads(mut self, threads: usize) -> Self {
        self.options.max_threads = threads;
        self
    }

    /// `-o <dir>`: output directory for caches, logs and the `.uhdm` file.
    #[must_use]
    pub fn out_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.out_dir = path.into();
        self
    }

    /// `-l <file>`: log file location.
    #[must_use]
    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.log_file = Some(path.into());
        self
    }

    pub fn build(self) -> Session {
        Session::new(self.options)
    }
}
