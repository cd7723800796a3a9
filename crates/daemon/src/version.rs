//! Build metadata surfaced by `GET /version`.

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit injected at build time, when available.
pub const COMMIT: &str = match option_env!("TINYSERVE_COMMIT") {
    Some(commit) => commit,
    None => "unknown",
};

/// Build date injected at build time, when available.
pub const DATE: &str = match option_env!("TINYSERVE_BUILD_DATE") {
    Some(date) => date,
    None => "unknown",
};

/// `tinyserved <version> (<commit>, <date>)`.
pub fn long() -> String {
    format!("tinyserved {VERSION} ({COMMIT}, {DATE})")
}
