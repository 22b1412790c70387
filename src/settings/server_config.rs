//! Backend server configuration file (INI).
//!
//! Only the named section is rewritten; every other section and its lines
//! are kept as they were.

use anyhow::{Context, Result};
use std::path::Path;

/// Replace `section` in the INI file at `path` with `entries`, creating the
/// file if needed.
pub fn save_section(path: &Path, section: &str, entries: &[(&str, String)]) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let content = replace_section(&existing, section, entries);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

/// Read the key/value pairs of `section`, in file order.
pub fn load_section(path: &Path, section: &str) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let mut entries = Vec::new();
    let mut inside = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(name) = section_name(trimmed) {
            inside = name == section;
            continue;
        }
        if !inside || trimmed.is_empty() || trimmed.starts_with(['#', ';']) {
            continue;
        }
        if let Some((key, value)) = trimmed.split_once('=') {
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    Ok(entries)
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

fn replace_section(existing: &str, section: &str, entries: &[(&str, String)]) -> String {
    let mut out = String::new();
    let mut skipping = false;
    let mut written = false;

    for line in existing.lines() {
        if let Some(name) = section_name(line.trim()) {
            skipping = name == section;
            if skipping && !written {
                write_section(&mut out, section, entries);
                written = true;
            }
            if skipping {
                continue;
            }
        }
        if !skipping {
            out.push_str(line);
            out.push('\n');
        }
    }

    if !written {
        if !out.is_empty() && !out.ends_with("\n\n") {
            out.push('\n');
        }
        write_section(&mut out, section, entries);
    }
    out
}

fn write_section(out: &mut String, section: &str, entries: &[(&str, String)]) {
    out.push_str(&format!("[{}]\n", section));
    for (key, value) in entries {
        out.push_str(&format!("{} = {}\n", key, value));
    }
    out.push('\n');
}
