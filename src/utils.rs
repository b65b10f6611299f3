// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ASM Utility Helpers
 * Hostname list hygiene, temp file handoff, tool lookup
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::net::IpAddr;
use std::path::Path;

use crate::errors::EnumError;

/// External tools the enumeration pipeline shells out to
pub const REQUIRED_TOOLS: &[&str] = &["subfinder", "dnsx", "alterx"];

/// Remove duplicate entries preserving first-occurrence order.
/// Idempotent: applying it twice yields the same list.
pub fn remove_duplicates(items: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.as_str()) {
            out.push(item.clone());
        }
    }
    out
}

/// Elements of `a` not present in `b`, preserving the order of `a`
pub fn difference(a: &[String], b: &[String]) -> Vec<String> {
    let exclude: HashSet<&str> = b.iter().map(|s| s.as_str()).collect();
    a.iter()
        .filter(|item| !exclude.contains(item.as_str()))
        .cloned()
        .collect()
}

/// Append hostnames to a temp file, one per line. Used to hand results
/// between enumeration phases through the tools' `-l` flags.
pub fn write_temp_file(path: impl AsRef<Path>, lines: &[String]) -> Result<(), EnumError> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(|e| EnumError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    for line in lines {
        writeln!(file, "{}", line).map_err(|e| EnumError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

/// Validate a literal IPv4/IPv6 address for the launch command
pub fn is_valid_ip_address(value: &str) -> bool {
    value.parse::<IpAddr>().is_ok()
}

/// Look a tool up on PATH
pub fn check_tool(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| {
        let candidate = dir.join(name);
        candidate.is_file()
    })
}

/// Verify the external enumeration tools are installed. The tools are
/// provisioned by the deployment image; a missing binary is an
/// operator problem this service cannot fix at runtime.
pub fn install_tools() -> Result<(), EnumError> {
    let missing: Vec<&str> = REQUIRED_TOOLS
        .iter()
        .copied()
        .filter(|tool| !check_tool(tool))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(EnumError::Tool {
            tool: missing.join(", "),
            reason: "not found on PATH".to_string(),
        })
    }
}
