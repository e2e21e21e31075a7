//! Cache-key normalization.
//!
//! Keys are POSIX-style paths cleaned lexically: repeated separators collapse,
//! `.` components vanish and `..` eats the preceding component. The root of a
//! sync destination is keyed by its cleaned prefix, `.` for an empty prefix.

/// Lexically clean a slash-separated path. An empty result becomes `"."`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Join two path fragments and clean the result.
pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        return clean(name);
    }
    if name.is_empty() {
        return clean(base);
    }
    clean(&format!("{base}/{name}"))
}

/// Normalize a request path into the sync-root prefix form: `""` for the
/// module root, otherwise a relative directory ending in `/`.
pub fn sync_prefix(path: &str) -> String {
    let cleaned = clean(path);
    let relative = cleaned.trim_start_matches('/');
    if relative.is_empty() || relative == "." {
        String::new()
    } else {
        format!("{relative}/")
    }
}

/// Cache key for `name` below the sync root `prefix`.
pub fn cache_key(prefix: &str, name: &str) -> String {
    join(prefix, name)
}

/// Cache key of the sync root itself.
pub fn root_key(prefix: &str) -> String {
    clean(prefix)
}

/// Split a cache key into its parent key and final component.
pub fn split_parent(key: &str) -> (String, String) {
    match key.rfind('/') {
        Some(0) => ("/".to_string(), key[1..].to_string()),
        Some(i) => (key[..i].to_string(), key[i + 1..].to_string()),
        None => (".".to_string(), key.to_string()),
    }
}

/// Cache key a symlink at `link_key` points to, given its raw target.
///
/// Targets are relative to the link's parent directory.
pub fn link_target_key(link_key: &str, target: &str) -> String {
    let (parent, _) = split_parent(link_key);
    join(&parent, target)
}
