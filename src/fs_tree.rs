//! Path resolution, allocation and disposal over the dentry tree.

use crate::dentry::{case_key, is_predecessor, Dentry, LTFS_FILENAME_MAX};
use crate::error::{Result, RustLtfsError};
use std::sync::Arc;

/// Reserved device-prefix names substituted on case-insensitive hosts,
/// mirroring the original's `dosdev_list`.
const RESERVED_PREFIXES: &[&str] = &[
    "CON", "PRN", "AUX", "CLOCK$", "NUL", "COM0", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6",
    "COM7", "COM8", "COM9", "LPT0", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7",
    "LPT8", "LPT9",
];

fn is_forbidden_char(c: char) -> bool {
    matches!(c as u32, 0x01..=0x1F) || matches!(c, '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
}

/// Replace forbidden characters with `_`; report whether a reserved device
/// prefix was also detected (forces whole-name substitution, like the
/// original's `dosdev` flag).
fn sanitize_chars(name: &str) -> (String, bool) {
    let mut dosdev = false;
    for prefix in RESERVED_PREFIXES {
        if name.len() >= prefix.len()
            && name[..prefix.len()].eq_ignore_ascii_case(prefix)
            && (name.len() == prefix.len() || name.as_bytes()[prefix.len()] == b'.')
        {
            dosdev = true;
            break;
        }
    }
    let sanitized: String = name
        .chars()
        .map(|c| if is_forbidden_char(c) { '_' } else { c })
        .collect();
    (sanitized, dosdev)
}

/// Split a sanitized name into (prefix, extension) at the last `.`, unless
/// the dot is the first character (in which case there is no extension).
fn split_prefix_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(0) | None => (name, None),
        Some(idx) => (&name[..idx], Some(&name[idx + 1..])),
    }
}

/// Trim `s` to at most `max_chars` Unicode scalars, respecting UTF-8
/// boundaries (there are no multi-scalar grapheme concerns here since we
/// count scalars, matching the original's UTF-8-aware `_utf8_strncpy`).
fn trim_to_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Generate a platform-safe name for `canonical_name` that is unique within
/// `parent`'s child map. On case-sensitive hosts this is the identity
/// function.
pub fn generate_platform_safe_name(
    parent: &Arc<Dentry>,
    canonical_name: &str,
    case_sensitive: bool,
) -> Result<String> {
    if case_sensitive {
        return Ok(canonical_name.to_string());
    }

    let (sanitized, dosdev) = sanitize_chars(canonical_name);
    let (prefix, extension) = split_prefix_extension(&sanitized);

    let mut suffix = 0u32;
    loop {
        let candidate = if suffix == 0 {
            match extension {
                Some(ext) => format!("{prefix}.{ext}"),
                None => prefix.to_string(),
            }
        } else {
            let suffix_str = format!("~{suffix}");
            let prefix_len = prefix.chars().count();
            let ext_len = extension.map(|e| e.chars().count()).unwrap_or(0);
            let suffix_len = suffix_str.chars().count();

            if prefix_len + ext_len + suffix_len > LTFS_FILENAME_MAX {
                if !dosdev && prefix_len > suffix_len {
                    let trimmed = trim_to_chars(prefix, prefix_len - suffix_len);
                    match extension {
                        Some(ext) => format!("{trimmed}{suffix_str}.{ext}"),
                        None => format!("{trimmed}{suffix_str}"),
                    }
                } else if ext_len > suffix_len {
                    let trimmed = trim_to_chars(extension.unwrap(), ext_len - suffix_len);
                    format!("{prefix}{suffix_str}.{trimmed}")
                } else {
                    return Err(RustLtfsError::name_too_long(canonical_name));
                }
            } else {
                match extension {
                    Some(ext) => format!("{prefix}{suffix_str}.{ext}"),
                    None => format!("{prefix}{suffix_str}"),
                }
            }
        };

        let key = case_key(&candidate, case_sensitive);
        if parent.contents.read().get(&key).is_none() {
            return Ok(candidate);
        }
        suffix += 1;
        if suffix > 10_000 {
            return Err(RustLtfsError::dentry_exists(canonical_name));
        }
    }
}

/// Caseless-match primitive: an ASCII-only stand-in for full ICU collation.
pub fn caseless_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Walk `/`-separated path components from `root`, returning the resolved
/// dentry with `numhandles` bumped under its `meta_lock`. Every intermediate
/// component visited along the way is a transient parent: its handle is
/// acquired to look it up and released again once the walk moves past it,
/// so only the final target keeps a retained handle.
pub fn path_lookup(root: &Arc<Dentry>, path: &str, case_sensitive: bool) -> Result<Arc<Dentry>> {
    if path == "/" || path.is_empty() {
        root.acquire_handle();
        return Ok(root.clone());
    }

    let mut current = root.clone();
    let mut current_is_held = false;
    for component in path.split('/').filter(|c| !c.is_empty()) {
        if component.chars().count() > LTFS_FILENAME_MAX {
            return Err(RustLtfsError::name_too_long(component));
        }
        let key = case_key(component, case_sensitive);
        let next = {
            let contents = current.contents.read();
            contents.get(&key)
        };
        let next = next.ok_or_else(|| RustLtfsError::no_dentry(path.to_string()))?;
        next.acquire_handle();
        if current_is_held {
            current.release_handle();
        }
        current = next;
        current_is_held = true;
    }
    Ok(current)
}

/// Attach a new dentry to `parent`'s child map under the platform-safe-name
/// key, in lock order contents then meta.
pub fn attach_child(parent: &Arc<Dentry>, child: &Arc<Dentry>, case_sensitive: bool) {
    let key = case_key(&child.platform_safe_name(), case_sensitive);
    {
        let mut contents = parent.contents.write();
        let mut parent_meta = parent.meta.write();
        contents.insert(key, child.clone());
        parent_meta.link_count += 1;
        if child.is_directory() {
            parent_meta.link_count += 1;
        }
    }
    child.set_parent(parent);
}

/// Decrement `numhandles`; if it reaches zero and the dentry is not
/// out-of-sync, dispose its contents.
///
/// Returns `true` if disposal happened.
pub fn release_dentry(d: &Arc<Dentry>, case_sensitive: bool) -> bool {
    let (reached_zero, out_of_sync) = {
        let mut meta = d.meta.write();
        meta.numhandles = meta.numhandles.saturating_sub(1);
        (meta.numhandles == 0, meta.flags.is_out_of_sync)
    };
    if reached_zero && !out_of_sync {
        dispose_dentry_contents(d, case_sensitive);
        true
    } else {
        false
    }
}

/// Recursively dispose a subtree's contents. Children that still have
/// outstanding handles are warned about, not crashed on — they are
/// detached anyway since the parent is going away.
pub fn dispose_dentry_contents(d: &Arc<Dentry>, case_sensitive: bool) {
    let children: Vec<Arc<Dentry>> = d.contents.read().values().cloned().collect();
    for child in &children {
        let handles = child.meta.read().numhandles;
        if handles > 1 {
            tracing::warn!(
                uid = child.uid,
                handles,
                "disposing dentry with outstanding handles"
            );
        }
        dispose_dentry_contents(child, case_sensitive);
    }
    d.contents.write().clear();

    if let Some(parent) = d.parent() {
        let key = case_key(&d.platform_safe_name(), case_sensitive);
        parent.contents.write().remove(&key);
    }
}

/// `gc_dentry`: same traversal as disposal, without touching `numhandles`;
/// for tearing down a subtree whose external handles are known invalid.
pub fn gc_dentry(d: &Arc<Dentry>, case_sensitive: bool) {
    let children: Vec<Arc<Dentry>> = d.contents.read().values().cloned().collect();
    for child in &children {
        gc_dentry(child, case_sensitive);
    }
    d.contents.write().clear();
    if let Some(parent) = d.parent() {
        let key = case_key(&d.platform_safe_name(), case_sensitive);
        parent.contents.write().remove(&key);
    }
}

pub use crate::dentry::absolute_path as dentry_lookup;
pub use is_predecessor as fs_is_predecessor;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dentry::Dentry;

    fn root() -> Arc<Dentry> {
        Dentry::new_root("2026-01-01T00:00:00Z")
    }

    #[test]
    fn platform_safe_name_is_identity_on_case_sensitive() {
        let r = root();
        let name = generate_platform_safe_name(&r, "Weird:Name?.txt", true).unwrap();
        assert_eq!(name, "Weird:Name?.txt");
    }

    #[test]
    fn platform_safe_name_substitutes_forbidden_chars() {
        let r = root();
        let name = generate_platform_safe_name(&r, "a:b*c.txt", false).unwrap();
        assert_eq!(name, "a_b_c.txt");
    }

    #[test]
    fn platform_safe_name_dedupes_with_suffix() {
        let r = root();
        let child = Dentry::new(2, "A".into(), "a".into(), false, false, "t");
        attach_child(&r, &child, false);
        let name = generate_platform_safe_name(&r, "A", false).unwrap();
        assert_eq!(name, "A~1");
    }

    #[test]
    fn reserved_device_prefix_is_detected() {
        let r = root();
        let (sanitized, dosdev) = sanitize_chars("CON.txt");
        assert!(dosdev);
        assert_eq!(sanitized, "CON.txt");
        let _ = r;
    }

    #[test]
    fn path_lookup_bumps_handles_and_fails_on_missing() {
        let r = root();
        let child = Dentry::new(2, "a".into(), "a".into(), true, false, "t");
        attach_child(&r, &child, true);
        let found = path_lookup(&r, "/a", true).unwrap();
        assert_eq!(found.uid, 2);
        assert_eq!(found.meta.read().numhandles, 2);

        let err = path_lookup(&r, "/missing", true).unwrap_err();
        assert!(matches!(err, RustLtfsError::NoDentry(_)));
    }

    #[test]
    fn release_dentry_disposes_at_zero_handles() {
        let r = root();
        let child = Dentry::new(2, "a".into(), "a".into(), false, false, "t");
        attach_child(&r, &child, true);
        assert_eq!(r.contents.read().len(), 1);
        let disposed = release_dentry(&child, true);
        assert!(disposed);
        assert_eq!(r.contents.read().len(), 0);
    }
}
