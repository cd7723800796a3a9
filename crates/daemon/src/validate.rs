//! Field validators shared by the API layer and the state store.
//!
//! Every value that ends up in generated YAML passes through here first, so
//! the checks treat newlines, carriage returns, null bytes, and leading
//! document markers as fatal.

use std::sync::LazyLock;

use regex::Regex;

/// A single human-readable validation failure naming the offending value.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

fn fail(msg: impl Into<String>) -> Result<(), ValidationError> {
    Err(ValidationError(msg.into()))
}

// Image references: [registry/][namespace/]name[:tag][@digest]
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._/-]*(:[a-zA-Z0-9._-]+)?(@sha256:[a-fA-F0-9]{64})?$")
        .expect("image regex")
});

static ENV_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("env key regex"));

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("hostname regex")
});

static SERVICE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_-]*$").expect("service name regex"));

static VOLUME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^:]+:[^:]+(:(ro|rw))?$").expect("volume regex"));

// Host paths that must never be mounted into a container.
const DANGEROUS_HOST_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    "/root/.ssh",
    "/var/run/docker.sock",
];

/// Validates a container image reference.
pub fn image_name(image: &str) -> Result<(), ValidationError> {
    if image.is_empty() {
        return fail("image name is required");
    }
    if image.len() > 256 {
        return fail("image name too long (max 256 characters)");
    }
    if !IMAGE_RE.is_match(image) {
        return fail(format!("invalid image name format: {image:?}"));
    }
    if contains_yaml_injection(image) {
        return fail("image name contains invalid characters");
    }
    Ok(())
}

/// Validates an environment variable key.
pub fn env_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return fail("environment variable key is required");
    }
    if key.len() > 256 {
        return fail("environment variable key too long (max 256 characters)");
    }
    if !ENV_KEY_RE.is_match(key) {
        return fail(format!(
            "invalid environment variable key: {key:?} (must start with letter or underscore, contain only alphanumeric and underscore)"
        ));
    }
    Ok(())
}

/// Validates an environment variable value.
pub fn env_value(value: &str) -> Result<(), ValidationError> {
    if value.len() > 32 * 1024 {
        return fail("environment variable value too long (max 32KB)");
    }
    if value.contains('\0') {
        return fail("environment variable value contains null byte");
    }
    Ok(())
}

/// Validates a DNS hostname (RFC 1123 labels, no underscores).
pub fn hostname(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return fail("hostname is required");
    }
    if host.len() > 253 {
        return fail("hostname too long (max 253 characters)");
    }
    if !HOSTNAME_RE.is_match(host) {
        return fail(format!("invalid hostname format: {host:?}"));
    }
    Ok(())
}

/// Validates a service name.
pub fn service_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return fail("service name is required");
    }
    if name.len() > 64 {
        return fail("service name too long (max 64 characters)");
    }
    if !SERVICE_NAME_RE.is_match(name) {
        return fail(format!(
            "invalid service name: {name:?} (must start with letter, contain only alphanumeric, underscore, and hyphen)"
        ));
    }
    Ok(())
}

/// Validates a `host:container[:mode]` volume spec and its host path.
pub fn volume_spec(volume: &str) -> Result<(), ValidationError> {
    if volume.is_empty() {
        return fail("volume path is required");
    }
    if volume.len() > 4096 {
        return fail("volume path too long (max 4096 characters)");
    }
    if !VOLUME_RE.is_match(volume) {
        return fail(format!(
            "invalid volume format: {volume:?} (expected host:container or host:container:mode)"
        ));
    }
    if contains_yaml_injection(volume) {
        return fail("volume path contains invalid characters");
    }

    let host_path = volume.split(':').next().unwrap_or_default();

    for dangerous in DANGEROUS_HOST_PATHS {
        if host_path == *dangerous || host_path.starts_with(&format!("{dangerous}/")) {
            return fail(format!(
                "mounting {dangerous:?} is not allowed for security reasons"
            ));
        }
    }

    if host_path.starts_with("/etc/")
        || host_path.starts_with("/var/run/")
        || host_path.starts_with("/root/")
        || host_path == "/etc"
        || host_path == "/var/run"
        || host_path == "/root"
    {
        return fail(format!(
            "mounting system paths like {host_path:?} is not allowed"
        ));
    }

    Ok(())
}

/// Validates a healthcheck command vector; empty is allowed.
pub fn healthcheck_command(cmd: &[String]) -> Result<(), ValidationError> {
    if cmd.len() > 100 {
        return fail("healthcheck command has too many arguments (max 100)");
    }
    for (i, arg) in cmd.iter().enumerate() {
        if arg.len() > 4096 {
            return fail(format!("healthcheck argument {i} too long (max 4096 characters)"));
        }
        if arg.contains('\0') {
            return fail("healthcheck argument contains null byte");
        }
    }
    Ok(())
}

/// Validates a TCP port.
pub fn port(port: u32) -> Result<(), ValidationError> {
    if port < 1 || port > 65535 {
        return fail(format!("port must be between 1 and 65535, got {port}"));
    }
    Ok(())
}

// Rejects values that could break out of their position in generated YAML.
fn contains_yaml_injection(s: &str) -> bool {
    if s.contains('\n') || s.contains('\r') || s.contains('\0') {
        return true;
    }
    let trimmed = s.trim_start();
    trimmed.starts_with("---") || trimmed.starts_with("...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_name_accepts_common_references() {
        for image in [
            "nginx",
            "nginx:latest",
            "nginx:1.25-alpine",
            "ghcr.io/user/repo:v1.0",
            "registry.example.com/path/image",
            "redis:7",
        ] {
            assert!(image_name(image).is_ok(), "{image} should validate");
        }
    }

    #[test]
    fn image_name_rejects_injection_and_garbage() {
        for image in [
            "",
            "-leading-dash",
            "nginx:latest\nevil: true",
            "nginx\0",
            "--- !!python/object",
            &"x".repeat(300),
        ] {
            assert!(image_name(image).is_err(), "{image:?} should be rejected");
        }
    }

    #[test]
    fn image_name_accepts_digest_references() {
        let digest = format!("nginx@sha256:{}", "a".repeat(64));
        assert!(image_name(&digest).is_ok());
        let short = format!("nginx@sha256:{}", "a".repeat(60));
        assert!(image_name(&short).is_err());
    }

    #[test]
    fn env_key_shape() {
        assert!(env_key("PATH").is_ok());
        assert!(env_key("_PRIVATE").is_ok());
        assert!(env_key("MY_VAR_2").is_ok());
        assert!(env_key("").is_err());
        assert!(env_key("2BAD").is_err());
        assert!(env_key("WITH-DASH").is_err());
        assert!(env_key("WITH SPACE").is_err());
    }

    #[test]
    fn env_value_limits() {
        assert!(env_value("anything goes: even colons, quotes \"'").is_ok());
        assert!(env_value(&"v".repeat(32 * 1024)).is_ok());
        assert!(env_value(&"v".repeat(32 * 1024 + 1)).is_err());
        assert!(env_value("null\0byte").is_err());
    }

    #[test]
    fn hostname_shape() {
        assert!(hostname("example.com").is_ok());
        assert!(hostname("app1.example.com").is_ok());
        assert!(hostname("a").is_ok());
        assert!(hostname("").is_err());
        assert!(hostname("under_score.example.com").is_err());
        assert!(hostname("-leading.example.com").is_err());
        assert!(hostname("trailing-.example.com").is_err());
        assert!(hostname(&format!("{}.com", "a".repeat(260))).is_err());
    }

    #[test]
    fn service_name_shape() {
        assert!(service_name("app1").is_ok());
        assert!(service_name("my-app_2").is_ok());
        assert!(service_name("").is_err());
        assert!(service_name("1app").is_err());
        assert!(service_name("app.dot").is_err());
        assert!(service_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn volume_spec_shape_and_modes() {
        assert!(volume_spec("/data/app:/var/lib/app").is_ok());
        assert!(volume_spec("/data/app:/var/lib/app:ro").is_ok());
        assert!(volume_spec("/data/app:/var/lib/app:rw").is_ok());
        assert!(volume_spec("/data/app").is_err());
        assert!(volume_spec("/data:/app:bogus").is_err());
        assert!(volume_spec("").is_err());
    }

    #[test]
    fn volume_spec_blocks_dangerous_host_paths() {
        for vol in [
            "/etc/passwd:/data",
            "/etc/shadow:/data",
            "/var/run/docker.sock:/var/run/docker.sock",
            "/root/.ssh:/keys",
            "/etc/nginx:/config",
            "/root:/host-root",
            "/var/run:/run",
        ] {
            assert!(volume_spec(vol).is_err(), "{vol} should be rejected");
        }
        assert!(volume_spec("/srv/data:/data").is_ok());
        assert!(volume_spec("/home/user/app:/app").is_ok());
    }

    #[test]
    fn volume_spec_rejects_yaml_injection() {
        assert!(volume_spec("/data:/app\n  evil: true").is_err());
        assert!(volume_spec("/data:/app\r").is_err());
    }

    #[test]
    fn healthcheck_command_limits() {
        assert!(healthcheck_command(&[]).is_ok());
        assert!(healthcheck_command(&["curl".into(), "-f".into(), "http://localhost".into()]).is_ok());
        let many: Vec<String> = (0..101).map(|i| i.to_string()).collect();
        assert!(healthcheck_command(&many).is_err());
        assert!(healthcheck_command(&["bad\0arg".into()]).is_err());
    }

    #[test]
    fn port_bounds() {
        assert!(port(1).is_ok());
        assert!(port(80).is_ok());
        assert!(port(65535).is_ok());
        assert!(port(0).is_err());
        assert!(port(65536).is_err());
    }

    #[test]
    fn verdicts_are_deterministic() {
        for _ in 0..3 {
            assert!(image_name("nginx:latest").is_ok());
            assert!(hostname("app.example.com").is_ok());
            assert!(service_name("2bad").is_err());
        }
    }
}
