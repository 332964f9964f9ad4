//! Plain-text policy file adapter.
//!
//! One rule per line, comma separated, type first:
//!
//! ```text
//! # comments and blank lines are skipped
//! p, role:operator, device_control, w
//! g, alice, role:operator
//! ```
//!
//! Values containing a comma, a double quote, or surrounding whitespace are
//! written double-quoted with embedded quotes doubled.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::adapter::Adapter;
use crate::error::AdapterError;
use crate::store::Rule;

/// Adapter backed by a policy file on disk.
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
}

impl FileAdapter {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> AdapterError {
        AdapterError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_all(&self, rules: &[Rule]) -> Result<(), AdapterError> {
        let mut contents = String::new();
        for (ptype, values) in rules {
            contents.push_str(&format_line(ptype, values));
            contents.push('\n');
        }

        // Write beside the target and rename so readers never see a torn file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, contents).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))
    }
}

impl Adapter for FileAdapter {
    fn load_policy(&self) -> Result<Vec<Rule>, AdapterError> {
        let contents = fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;
        let rules = parse(&contents)?;
        debug!(path = %self.path.display(), rules = rules.len(), "policy file read");
        Ok(rules)
    }

    fn save_policy(&self, rules: &[Rule]) -> Result<(), AdapterError> {
        self.write_all(rules)?;
        debug!(path = %self.path.display(), rules = rules.len(), "policy file written");
        Ok(())
    }

    fn add_policy(&self, ptype: &str, values: &[String]) -> Result<(), AdapterError> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        // A hand-written file may lack a final newline.
        let mut line = String::new();
        if !ends_with_newline(&mut file).map_err(|e| self.io_error(e))? {
            line.push('\n');
        }
        line.push_str(&format_line(ptype, values));
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(|e| self.io_error(e))
    }

    fn remove_policy(&self, ptype: &str, values: &[String]) -> Result<(), AdapterError> {
        let mut rules = self.load_policy()?;
        rules.retain(|(p, v)| !(p == ptype && v == values));
        self.write_all(&rules)
    }

    fn remove_policies(&self, ptype: &str, rules: &[Vec<String>]) -> Result<(), AdapterError> {
        let mut stored = self.load_policy()?;
        stored.retain(|(p, v)| !(p == ptype && rules.contains(v)));
        self.write_all(&stored)
    }
}

/// True for an empty file or one whose last byte is `\n`.
fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))?;
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

// ─── Line format ────────────────────────────────────────────────────────

/// Parses policy file contents. Line numbers in errors are 1-based.
pub fn parse(contents: &str) -> Result<Vec<Rule>, AdapterError> {
    let mut rules = Vec::new();
    for (i, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = split_line(line).map_err(|reason| AdapterError::Format {
            line: i + 1,
            reason,
        })?;
        if fields.len() < 2 {
            return Err(AdapterError::Format {
                line: i + 1,
                reason: "expected a type followed by at least one value".to_string(),
            });
        }
        let ptype = fields.remove(0);
        if ptype.is_empty() {
            return Err(AdapterError::Format {
                line: i + 1,
                reason: "empty rule type".to_string(),
            });
        }
        rules.push((ptype, fields));
    }
    Ok(rules)
}

fn split_line(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();

    loop {
        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}

        let mut field = String::new();
        if chars.next_if_eq(&'"').is_some() {
            loop {
                match chars.next() {
                    Some('"') if chars.next_if_eq(&'"').is_some() => field.push('"'),
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err("unterminated quoted value".to_string()),
                }
            }
            while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
            match chars.peek() {
                None | Some(',') => {}
                Some(c) => return Err(format!("unexpected {c:?} after quoted value")),
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                field.push(c);
            }
            field.truncate(field.trim_end().len());
        }
        fields.push(field);

        if chars.next().is_none() {
            return Ok(fields);
        }
    }
}

fn format_line(ptype: &str, values: &[String]) -> String {
    let mut line = ptype.to_string();
    for value in values {
        line.push_str(", ");
        let needs_quotes = value.contains([',', '"'])
            || value.starts_with(char::is_whitespace)
            || value.ends_with(char::is_whitespace);
        if needs_quotes {
            line.push('"');
            line.push_str(&value.replace('"', "\"\""));
            line.push('"');
        } else {
            line.push_str(value);
        }
    }
    line
}
