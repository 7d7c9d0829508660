//! Shader source loading and preprocessing.
//!
//! Two directives are understood, each on its own line:
//!
//! - `#pragma once`: the file is emitted at most once per program, even if it
//!   is included from both stages.
//! - `#pragma qrk_include <name>` / `#pragma qrk_include "path"`: angle
//!   brackets resolve against the built-in shader set, quotes resolve relative
//!   to the including file.
//!
//! Stage files must end in `.vert`, `.frag` or `.comp`; `.wgsl` is accepted
//! for code shared between stages.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use super::{ShaderSource, ShaderStage, builtin};
use crate::errors::{QuarkError, Result};

/// Extension accepted for either stage.
const GENERIC_EXTENSION: &str = ".wgsl";

#[derive(Debug, Clone)]
enum Origin {
    File(PathBuf),
    Builtin(String),
    Inline,
}

impl Origin {
    fn key(&self) -> String {
        match self {
            Self::File(path) => std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
            Self::Builtin(name) => format!("<{name}>"),
            Self::Inline => "<inline>".to_string(),
        }
    }

    fn display_path(&self) -> PathBuf {
        match self {
            Self::File(path) => path.clone(),
            Self::Builtin(name) => PathBuf::from(name),
            Self::Inline => PathBuf::from("<inline>"),
        }
    }

    fn read(&self) -> std::io::Result<Cow<'static, str>> {
        match self {
            Self::File(path) => std::fs::read_to_string(path).map(Cow::Owned),
            Self::Builtin(name) => builtin::get(name).ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no built-in shader named '{name}'"),
                )
            }),
            Self::Inline => Ok(Cow::Borrowed("")),
        }
    }

    fn resolve_relative(&self, include: &str) -> Origin {
        match self {
            Self::File(path) => {
                let dir = path.parent().unwrap_or_else(|| Path::new(""));
                Self::File(dir.join(include))
            }
            Self::Builtin(name) => {
                let dir = name.rsplit_once('/').map_or("", |(dir, _)| dir);
                Self::Builtin(normalize_builtin(&format!("{dir}/{include}")))
            }
            Self::Inline => Self::File(PathBuf::from(include)),
        }
    }
}

/// Collapses `.` and `..` segments of a built-in shader name.
fn normalize_builtin(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// Resolves the sources of one program.
///
/// The `#pragma once` set is shared by every [`load`](Self::load) call on the
/// same loader, so use one loader per program.
#[derive(Debug, Default)]
pub struct ShaderLoader {
    once: FxHashSet<String>,
    include_chain: Vec<String>,
}

impl ShaderLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fully preprocessed text of `source` for `stage`.
    pub fn load(&mut self, source: &ShaderSource, stage: ShaderStage) -> Result<String> {
        self.include_chain.clear();
        match source {
            ShaderSource::Inline(code) => self.preprocess(&Origin::Inline, code, stage),
            ShaderSource::Path(path) => self.load_origin(&Origin::File(path.clone()), stage),
            ShaderSource::Builtin(name) => {
                self.load_origin(&Origin::Builtin(normalize_builtin(name)), stage)
            }
        }
    }

    fn load_origin(&mut self, origin: &Origin, stage: ShaderStage) -> Result<String> {
        check_extension(origin, stage)?;

        let key = origin.key();
        if self.once.contains(&key) {
            return Ok(String::new());
        }
        if self.include_chain.contains(&key) {
            return Err(QuarkError::CircularInclude {
                path: origin.display_path(),
                traceback: self.traceback(),
            });
        }

        let code = origin.read().map_err(|source| QuarkError::ShaderIo {
            path: origin.display_path(),
            traceback: self.traceback(),
            source,
        })?;
        self.preprocess(origin, &code, stage)
    }

    fn preprocess(&mut self, origin: &Origin, code: &str, stage: ShaderStage) -> Result<String> {
        let key = origin.key();
        if code.lines().any(|line| pragma(line) == Some("once")) {
            self.once.insert(key.clone());
        }
        self.include_chain.push(key);

        let mut output = String::with_capacity(code.len());
        for line in code.lines() {
            match pragma(line) {
                None => {
                    output.push_str(line);
                    output.push('\n');
                }
                Some("once") => output.push('\n'),
                Some(directive) => {
                    let Some(target) = directive.strip_prefix("qrk_include") else {
                        log::warn!("Ignoring unknown directive '{}'", line.trim());
                        output.push('\n');
                        continue;
                    };
                    let include = self.parse_include(origin, line, target.trim())?;
                    let included = self.load_origin(&include, stage)?;
                    output.push_str(&included);
                    if !included.ends_with('\n') {
                        output.push('\n');
                    }
                }
            }
        }

        self.include_chain.pop();
        Ok(output)
    }

    fn parse_include(&self, origin: &Origin, line: &str, target: &str) -> Result<Origin> {
        let invalid = || QuarkError::InvalidInclude {
            line: line.trim().to_string(),
            traceback: self.traceback(),
        };
        let angled = target.len() >= 2 && target.starts_with('<') && target.ends_with('>');
        let quoted = target.len() >= 2 && target.starts_with('"') && target.ends_with('"');
        if !angled && !quoted {
            return Err(invalid());
        }
        let inner = target[1..target.len() - 1].trim();
        if inner.is_empty() {
            return Err(invalid());
        }
        if angled {
            Ok(Origin::Builtin(normalize_builtin(inner)))
        } else {
            Ok(origin.resolve_relative(inner))
        }
    }

    /// Include chain, most recent last.
    fn traceback(&self) -> String {
        self.include_chain
            .iter()
            .map(|path| format!("  > {path}\n"))
            .collect()
    }
}

/// The directive text of a `#pragma` line.
fn pragma(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("#pragma")?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim())
}

fn check_extension(origin: &Origin, stage: ShaderStage) -> Result<()> {
    let path = origin.display_path();
    let name = path.to_string_lossy();
    if matches!(origin, Origin::Inline)
        || name.ends_with(GENERIC_EXTENSION)
        || name.ends_with(stage.extension())
    {
        return Ok(());
    }
    Err(QuarkError::ShaderExtensionMismatch {
        stage,
        path,
        expected: stage.extension(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pragma_requires_whitespace() {
        assert_eq!(pragma("#pragma once"), Some("once"));
        assert_eq!(pragma("   #pragma   qrk_include <a.wgsl>  "), Some("qrk_include <a.wgsl>"));
        assert_eq!(pragma("#pragmaonce"), None);
        assert_eq!(pragma("// #pragma once"), None);
    }

    #[test]
    fn builtin_names_are_normalized() {
        assert_eq!(normalize_builtin("builtin/../common/math.wgsl"), "common/math.wgsl");
        assert_eq!(normalize_builtin("./a//b.wgsl"), "a/b.wgsl");
    }

    #[test]
    fn relative_includes_follow_the_includer() {
        let origin = Origin::Builtin("ibl/irradiance.frag".to_string());
        match origin.resolve_relative("../common/sampling.wgsl") {
            Origin::Builtin(name) => assert_eq!(name, "common/sampling.wgsl"),
            other => panic!("unexpected origin {other:?}"),
        }
    }
}
