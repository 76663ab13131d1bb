use std::cmp::Ordering;

use anyhow::{anyhow, Result};

pub fn compare_versions(a: &str, b: &str) -> Result<Ordering> {
    let left = parse_components(a)?;
    let right = parse_components(b)?;

    let width = left.len().max(right.len());
    for index in 0..width {
        let l = left.get(index).copied().unwrap_or(0);
        let r = right.get(index).copied().unwrap_or(0);
        match l.cmp(&r) {
            Ordering::Equal => {}
            other => return Ok(other),
        }
    }

    Ok(Ordering::Equal)
}

pub fn is_newer(current: &str, candidate: &str) -> Result<bool> {
    Ok(compare_versions(current, candidate)? == Ordering::Less)
}

fn parse_components(version: &str) -> Result<Vec<u64>> {
    let trimmed = version.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("malformed version: empty version string"));
    }

    let parts = trimmed.split('.').collect::<Vec<_>>();
    let mut components = Vec::with_capacity(parts.len());
    for (index, part) in parts.iter().enumerate() {
        // only the final component may carry a revision suffix, e.g. "10f1"
        let numeric = if index == parts.len() - 1 {
            strip_revision_suffix(part)
        } else {
            part
        };
        if numeric.is_empty() || !numeric.bytes().all(|b| b.is_ascii_digit()) {
            return Err(anyhow!(
                "malformed version '{trimmed}': component '{part}' is not numeric"
            ));
        }
        let value = numeric.parse::<u64>().map_err(|_| {
            anyhow!("malformed version '{trimmed}': component '{part}' is out of range")
        })?;
        components.push(value);
    }

    Ok(components)
}

fn strip_revision_suffix(component: &str) -> &str {
    match component.find(|ch: char| !ch.is_ascii_digit()) {
        Some(position) => &component[..position],
        None => component,
    }
}
