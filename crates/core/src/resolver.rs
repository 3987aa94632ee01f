//! Environment resolver (spec §4.5): merges process environment, an
//! optional env-file, and manifest defaults into one variable map with a
//! fixed precedence, and exposes narrow `${VAR}` interpolation for
//! migration-config values only.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::manifest::{EnvironmentOverlay, Manifest};

/// The result of resolving a named environment against a manifest: its
/// overlay plus the fully merged variable map (spec §4.5 precedence:
/// process env > env-file > manifest defaults).
#[derive(Debug, Clone)]
pub struct ResolvedEnv {
    pub name: String,
    pub overlay: EnvironmentOverlay,
    pub variables: BTreeMap<String, String>,
}

/// Resolves environments against a manifest and (for tests) an injectable
/// process-environment source, so resolution can be exercised without
/// mutating real process state.
pub struct EnvResolver<'a> {
    manifest: &'a Manifest,
}

impl<'a> EnvResolver<'a> {
    pub fn new(manifest: &'a Manifest) -> Self {
        Self { manifest }
    }

    /// Resolve `environment`, reading its env-file (if any) from disk and
    /// merging with the real process environment.
    pub async fn resolve(&self, environment: &str) -> Result<ResolvedEnv> {
        let overlay = self.manifest.environment(environment)?.clone();
        let file_vars = match &overlay.env_file {
            Some(path) => read_env_file(path).await?,
            None => BTreeMap::new(),
        };
        let process_vars: BTreeMap<String, String> = std::env::vars().collect();
        let variables = merge(&process_vars, &file_vars);
        Ok(ResolvedEnv { name: environment.to_string(), overlay, variables })
    }

    /// Resolve using an explicit process-environment snapshot instead of the
    /// real one; the seam tests use to stay hermetic.
    pub async fn resolve_with(
        &self,
        environment: &str,
        process_vars: &BTreeMap<String, String>,
    ) -> Result<ResolvedEnv> {
        let overlay = self.manifest.environment(environment)?.clone();
        let file_vars = match &overlay.env_file {
            Some(path) => read_env_file(path).await?,
            None => BTreeMap::new(),
        };
        let variables = merge(process_vars, &file_vars);
        Ok(ResolvedEnv { name: environment.to_string(), overlay, variables })
    }
}

fn merge(process_vars: &BTreeMap<String, String>, file_vars: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut merged = file_vars.clone();
    merged.extend(process_vars.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

async fn read_env_file(path: &Path) -> Result<BTreeMap<String, String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(dotenv_parse::parse(&contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(err) => Err(err.into()),
    }
}

/// Narrow `${VAR}` interpolation, used only for migration-config values
/// (spec §4.5: "broader interpolation is deliberately out of scope").
/// Unknown variables are left untouched rather than erroring, since a
/// migration config may reference a var the resolver does not carry.
pub fn interpolate(value: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '$' && value[i..].starts_with("${") {
            if let Some(close) = value[i + 2..].find('}') {
                let name = &value[i + 2..i + 2 + close];
                match variables.get(name) {
                    Some(v) => out.push_str(v),
                    None => out.push_str(&value[i..i + 2 + close + 1]),
                }
                for _ in 0..(close + 2) {
                    chars.next();
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Hand-implements the env-file grammar from spec §4.5 rather than reaching
/// for the `dotenvy` crate, because the grammar here (inline unquoted `#`
/// comments, escape handling only inside double quotes, last-key-wins) is a
/// narrower dialect than `dotenvy`'s and is simple enough to own directly.
mod dotenv_parse {
    use std::collections::BTreeMap;

    pub fn parse(contents: &str) -> BTreeMap<String, String> {
        let mut vars = BTreeMap::new();
        for raw_line in contents.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let line = line.strip_prefix("export ").unwrap_or(line);
            let Some((key, rest)) = line.split_once('=') else { continue };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = parse_value(rest.trim_start());
            vars.insert(key.to_string(), value);
        }
        vars
    }

    fn parse_value(raw: &str) -> String {
        let mut chars = raw.chars().peekable();
        match chars.peek() {
            Some('"') => {
                chars.next();
                parse_double_quoted(&mut chars)
            }
            Some('\'') => {
                chars.next();
                parse_single_quoted(&mut chars)
            }
            _ => parse_unquoted(raw),
        }
    }

    fn parse_double_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
        let mut out = String::new();
        while let Some(c) = chars.next() {
            match c {
                '"' => break,
                '\\' => match chars.next() {
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(other) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => out.push('\\'),
                },
                other => out.push(other),
            }
        }
        out
    }

    fn parse_single_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
        let mut out = String::new();
        for c in chars.by_ref() {
            if c == '\'' {
                break;
            }
            out.push(c);
        }
        out
    }

    /// An unquoted value ends at the first unquoted `#` (inline comment) and
    /// is trimmed of trailing whitespace.
    fn parse_unquoted(raw: &str) -> String {
        let value = match raw.find('#') {
            Some(idx) => &raw[..idx],
            None => raw,
        };
        value.trim_end().to_string()
    }

}
