use std::ffi::OsString;
use std::path::{Path, PathBuf};

use url::Url;

use crate::error::DownloadError;

/// Parses `url_str` and rejects anything reqwest cannot fetch.
pub fn parse_source_url(url_str: &str) -> Result<Url, DownloadError> {
    let invalid = |reason: &str| DownloadError::UrlParse {
        url: url_str.to_string(),
        reason: reason.to_string(),
    };

    let url = Url::parse(url_str).map_err(|e| match e {
        url::ParseError::RelativeUrlWithoutBase => invalid("missing protocol"),
        url::ParseError::EmptyHost => invalid("missing host"),
        other => invalid(&other.to_string()),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(&format!("unsupported protocol `{}`", other))),
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(invalid("missing host")),
    }
}

/// Appends `suffix` to the full file name, keeping any existing extension.
///
/// `movie.tar.gz` + `.part1` becomes `movie.tar.gz.part1`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

/// Temp file for the part at zero-based `index`: `<destination>.part<index + 1>`.
pub fn part_path(destination: &Path, index: u32) -> PathBuf {
    with_suffix(destination, &format!(".part{}", index + 1))
}

pub fn staging_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".merging")
}

pub fn manifest_path(destination: &Path) -> PathBuf {
    with_suffix(destination, ".parts.json")
}
