//! Session configuration.
//!
//! [`Options`] mirrors the command-line surface; the binary fills it from
//! `clap`, library users fill it through [`crate::SessionBuilder`]. The
//! subset that influences preprocessing output is hashed into cache keys, so
//! anything added here that changes expanded text must be covered by
//! [`Options::cache_signature`].

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Language level forced or inferred per file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerilogVersion {
    Verilog2005,
    #[default]
    SystemVerilog,
}

/// A `+define+NAME=VALUE` from the command line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLineDefine {
    pub name: String,
    pub value: Option<String>,
}

/// All knobs of a front-end run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Options {
    /// Design source files, in command-line order.
    pub sources: Vec<PathBuf>,
    /// `-v <file>`: library files, parsed only for unresolved definitions.
    pub library_files: Vec<PathBuf>,
    /// `-y <path>`: library directories searched by module name.
    pub library_dirs: Vec<PathBuf>,
    /// `-I <path>`: include search path, in priority order.
    pub include_dirs: Vec<PathBuf>,
    /// Library map files.
    pub map_files: Vec<PathBuf>,
    /// `+libext+.sv+.v`: extensions recognized in library directories.
    pub libext: Vec<String>,
    /// `+define+NAME=VALUE` macros, applied before any file is read.
    pub defines: Vec<CommandLineDefine>,
    /// `-sv`: treat every file as SystemVerilog regardless of extension.
    pub force_sv: bool,
    /// `-fileunit`: each file gets its own compilation unit.
    pub file_unit: bool,
    /// `-parseonly`: stop after stage 6.
    pub parse_only: bool,
    /// `-nostdout`: suppress diagnostic printing to stdout.
    pub no_stdout: bool,
    /// `-nohash`: bypass the on-disk caches.
    pub no_cache: bool,
    /// `-synth`: restrict to the synthesizable subset (reserved; checks are
    /// reported as warnings by downstream tools).
    pub synth: bool,
    /// `-formal`: formal-verification mode (reserved).
    pub formal: bool,
    /// `-mt N`: worker threads per stage. `0` picks the machine default.
    pub max_threads: usize,
    /// `-o <dir>`: output directory for caches and the `.uhdm` file.
    pub out_dir: PathBuf,
    /// `-l <file>`: log file; defaults to `<out_dir>/svfe.log`.
    pub log_file: Option<PathBuf>,
    /// Explicit top modules; when empty, roots are inferred.
    pub top_modules: Vec<String>,
    /// Expanded files above this many bytes are split for parallel parsing.
    pub split_threshold: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            library_files: Vec::new(),
            library_dirs: Vec::new(),
            include_dirs: Vec::new(),
            map_files: Vec::new(),
            libext: vec![".sv".into(), ".v".into()],
            defines: Vec::new(),
            force_sv: false,
            file_unit: false,
            parse_only: false,
            no_stdout: false,
            no_cache: false,
            synth: false,
            formal: false,
            max_threads: 0,
            out_dir: PathBuf::from("sv_out"),
            log_file: None,
            top_modules: Vec::new(),
            split_threshold: 10 * 1024 * 1024,
        }
    }
}

impl Options {
    /// Worker-thread count with the machine default applied.
    pub fn thread_count(&self) -> usize {
        if self.max_threads == 0 {
            num_cpus::get()
        } else {
            self.max_threads
        }
    }

    /// Language level for `path` under the current flags.
    pub fn version_for(&self, path: &std::path::Path) -> VerilogVersion {
        if self.force_sv {
            return VerilogVersion::SystemVerilog;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("v") => VerilogVersion::Verilog2005,
            _ => VerilogVersion::SystemVerilog,
        }
    }

    /// Hash over every option that can change preprocessing output. Part of
    /// each cache key; a changed flag set invalidates all entries.
    pub fn cache_signature(&self) -> String {
        let mut hasher = Md5::new();
        for define in &self.defines {
            hasher.update(define.name.as_bytes());
            hasher.update(b"=");
            if let Some(value) = &define.value {
                hasher.update(value.as_bytes());
            }
            hasher.update(b";");
        }
        for dir in &self.include_dirs {
            hasher.update(dir.to_string_lossy().as_bytes());
            hasher.update(b";");
        }
        for ext in &self.libext {
            hasher.update(ext.as_bytes());
        }
        hasher.update([self.force_sv as u8, self.file_unit as u8]);
        hex(&hasher.finalize())
    }

    /// Parses a `+define+A=1+B` command-line chunk.
    pub fn push_define_arg(&mut self, arg: &str) {
        for part in arg.split('+').filter(|p| !p.is_empty()) {
            let (name, value) = match part.split_once('=') {
                Some((n, v)) => (n.to_owned(), Some(v.to_owned())),
                None => (part.to_owned(), None),
            };
            self.defines.push(CommandLineDefine { name, value });
        }
    }

    /// Parses a `+libext+.sv+.v` command-line chunk.
    pub fn push_libext_arg(&mut self, arg: &str) {
        self.libext = arg.split('+').filter(|p| !p.is_empty()).map(str::to_owned).collect();
        if self.libext.is_empty() {
            self.libext = vec![".sv".into(), ".v".into()];
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_arg_parsing() {
        let mut options = Options::default();
        options.push_define_arg("WIDTH=8+DEBUG");
        assert_eq!(options.defines.len(), 2);
        assert_eq!(options.defines[0].name, "WIDTH");
        assert_eq!(options.defines[0].value.as_deref(), Some("8"));
        assert_eq!(options.defines[1].name, "DEBUG");
        assert_eq!(options.defines[1].value, None);
    }

    #[test]
    fn cache_signature_tracks_defines() {
        let mut a = Options::default();
        let b = Options::default();
        assert_eq!(a.cache_signature(), b.cache_signature());
        a.push_define_arg("X=1");
        assert_ne!(a.cache_signature(), b.cache_signature());
    }

    #[test]
    fn version_per_extension() {
        let options = Options::default();
        assert_eq!(options.version_for(std::path::Path::new("a.v")), VerilogVersion::Verilog2005);
        assert_eq!(
            options.version_for(std::path::Path::new("a.sv")),
            VerilogVersion::SystemVerilog
        );
        let forced = Options { force_sv: true, ..Options::default() };
        assert_eq!(forced.version_for(std::path::Path::new("a.v")), VerilogVersion::SystemVerilog);
    }
}
