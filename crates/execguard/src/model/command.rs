//! Shapes produced by command analysis.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Host platform whose shell and path rules apply to an analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Linux.
    Linux,
    /// macOS.
    Macos,
    /// Windows; `cmd.exe` rules.
    Windows,
    /// Any other Unix-like host.
    Other,
}

impl Platform {
    /// Platform this binary was compiled for.
    #[must_use]
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "macos") {
            Self::Macos
        } else if cfg!(windows) {
            Self::Windows
        } else {
            Self::Other
        }
    }

    /// Whether `&&`, `||` and `;` are split into chain parts.
    ///
    /// `cmd.exe` quoting differs enough from POSIX shells that Windows
    /// commands are always analyzed as a single segment.
    #[must_use]
    pub fn supports_chain_splitting(self) -> bool {
        !matches!(self, Self::Windows)
    }

    /// Whether allowlist matching ignores case.
    #[must_use]
    pub fn case_insensitive_paths(self) -> bool {
        matches!(self, Self::Windows)
    }

    /// True on Windows.
    #[must_use]
    pub fn is_windows(self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Lowercase name, as accepted by `--platform`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Macos => "macos",
            Self::Windows => "windows",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::Macos),
            "windows" | "win32" => Ok(Self::Windows),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown platform '{other}'")),
        }
    }
}

/// How a wrapper command affects the command it wraps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WrapperDisposition {
    /// Re-invokes the wrapped command unchanged; analysis looks through it.
    Transparent,
    /// Changes the wrapped command's semantics; the wrapper itself is the
    /// executable that must be trusted.
    Semantic,
    /// Re-splits a string into a new command line; never trusted.
    Unsafe,
}

/// A wrapper found at the head of a segment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperUse {
    /// Basename of the wrapper, e.g. `env`.
    pub name: String,
    /// How the wrapper treats the wrapped command.
    pub disposition: WrapperDisposition,
}

/// Executable identity of a segment's first token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutableResolution {
    /// Token as written in the command.
    pub raw_executable: String,
    /// File the token resolved to, if it exists.
    pub resolved_path: Option<PathBuf>,
    /// `resolved_path` with symlinks resolved.
    pub canonical_path: Option<PathBuf>,
    /// Basename of the resolved path, or of the raw token when unresolved.
    pub executable_name: String,
    /// True when the token had no path separator and was found via `PATH`.
    pub via_path_search: bool,
}

/// One simple command inside a pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSegment {
    /// Source text of the segment.
    pub raw: String,
    /// Tokens as written.
    pub argv: Vec<String>,
    /// Tokens after unwrapping a transparent wrapper; equal to `argv` otherwise.
    pub effective_argv: Vec<String>,
    /// Resolution of `effective_argv[0]`.
    pub resolution: Option<ExecutableResolution>,
    /// Wrapper found at the head of `argv`, if any.
    pub wrapper: Option<WrapperUse>,
    /// Index of the chain part (split on `&&`, `||`, `;`) this segment is in.
    pub chain_index: usize,
    /// Position inside its pipeline.
    pub pipeline_index: usize,
}

impl CommandSegment {
    /// True when analysis looked through a transparent wrapper.
    #[must_use]
    pub fn is_transparent_wrapper(&self) -> bool {
        self.wrapper
            .as_ref()
            .is_some_and(|w| w.disposition == WrapperDisposition::Transparent)
    }

    /// True when the segment re-splits a string (`eval`, `sh -c`).
    #[must_use]
    pub fn is_unsafe_wrapper(&self) -> bool {
        self.wrapper
            .as_ref()
            .is_some_and(|w| w.disposition == WrapperDisposition::Unsafe)
    }

    /// Arguments after the executable.
    #[must_use]
    pub fn args(&self) -> &[String] {
        self.effective_argv.get(1..).unwrap_or(&[])
    }
}

/// Result of analyzing a command line.
///
/// `ok == true` implies `segments` is non-empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandAnalysis {
    /// Whether the command could be analyzed statically.
    pub ok: bool,
    /// Why analysis failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every segment, in chain then pipeline order.
    pub segments: Vec<CommandSegment>,
    /// Segments grouped by chain part; absent when the line has one part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chains: Option<Vec<Vec<CommandSegment>>>,
}

impl CommandAnalysis {
    /// A failed analysis. Callers must treat it as not allowlisted.
    #[must_use]
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            segments: Vec::new(),
            chains: None,
        }
    }
}
