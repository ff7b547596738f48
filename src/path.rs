//! Package path normalization.

use std::sync::LazyLock;

use regex::Regex;

static GIST_WITH_USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^gist\.github\.com/[A-Za-z0-9_.\-]+/([a-f0-9]+)(/[\p{L}0-9_.\-]+)*$")
        .expect("valid regex for gist paths")
});

static GITHUB_USERNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\-]{0,38}$").expect("valid regex for github usernames")
});

const GITHUB_PREFIX: &str = "github.com/";

/// Canonicalize a requested package path.
///
/// - `gist.github.com/<user>/<id>[/...]` becomes `gist.github.com/<id>`
/// - a path whose first segment has no dot and looks like a GitHub user name
///   gets `github.com/` prepended
/// - anything else is returned unchanged
pub fn normalize_path(path: &str) -> String {
    if path.starts_with("gist.github.com/") {
        if let Some(id) = GIST_WITH_USERNAME
            .captures(path)
            .and_then(|captures| captures.get(1))
        {
            return format!("gist.github.com/{}", id.as_str());
        }
    }

    if let Some((first, _)) = path.split_once('/') {
        if !first.contains('.') && GITHUB_USERNAME.is_match(first) {
            return format!("{GITHUB_PREFIX}{path}");
        }
    }

    path.to_string()
}

/// Display form of a path: the `github.com/` prefix stripped.
pub fn short_name(path: &str) -> &str {
    path.strip_prefix(GITHUB_PREFIX).unwrap_or(path)
}
