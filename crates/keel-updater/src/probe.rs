//! Local helper version probe.
//!
//! The installed helper has no version record of its own; its version is
//! whatever it prints when run with the version flag. A binary that cannot
//! be spawned, exits non-zero or prints nothing resembling a version is
//! reported as unavailable.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use crate::error::UpdateError;

/// Run `binary <version_flag>` and derive its version.
pub async fn probe_version(binary: &Path, version_flag: &str) -> Result<String, UpdateError> {
    let output = Command::new(binary)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            UpdateError::LocalBinaryUnavailable(format!("cannot run {}: {}", binary.display(), e))
        })?;

    if !output.status.success() {
        return Err(UpdateError::LocalBinaryUnavailable(format!(
            "{} {} exited with {}",
            binary.display(),
            version_flag,
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = parse_version_output(&stdout).ok_or_else(|| {
        UpdateError::LocalBinaryUnavailable(format!(
            "no version in output of {}: {:?}",
            binary.display(),
            stdout.trim()
        ))
    })?;

    debug!(binary = %binary.display(), version = %version, "Probed helper version");
    Ok(version)
}

/// First whitespace-separated token that parses as a semantic version.
///
/// The token goes through [`normalize_version`] and is returned verbatim
/// otherwise, so comparison with the manifest stays a plain string
/// comparison.
pub fn parse_version_output(output: &str) -> Option<String> {
    output.split_whitespace().find_map(|token| {
        let token = normalize_version(token);
        semver::Version::parse(token).ok().map(|_| token.to_string())
    })
}

/// Version text without surrounding whitespace or a leading `v`.
///
/// Applied to both sides of every local/manifest comparison.
pub fn normalize_version(version: &str) -> &str {
    let version = version.trim();
    version.strip_prefix('v').unwrap_or(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_output() {
        assert_eq!(parse_version_output("2.0.0\n"), Some("2.0.0".to_string()));
        assert_eq!(
            parse_version_output("keel-helper version v1.9.0 (linux/amd64)"),
            Some("1.9.0".to_string())
        );
        assert_eq!(
            parse_version_output("helper 3.1.0-beta.2+build.7"),
            Some("3.1.0-beta.2+build.7".to_string())
        );
        assert_eq!(parse_version_output("helper 1.2"), None);
        assert_eq!(parse_version_output(""), None);
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("v2.0.0"), "2.0.0");
        assert_eq!(normalize_version(" 2.0.0\n"), "2.0.0");
        assert_eq!(normalize_version("2.0.0-rc.1"), "2.0.0-rc.1");
        assert_eq!(normalize_version("vv1"), "v1");
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let err = probe_version(&temp_dir.path().join("nope"), "--version")
            .await
            .unwrap_err();
        assert!(matches!(err, UpdateError::LocalBinaryUnavailable(_)));
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;
        use tempfile::TempDir;

        fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn test_probe_reads_version() {
            let dir = TempDir::new().unwrap();
            let bin = script(&dir, "helper", r#"[ "$1" = "--version" ] && echo "helper v1.9.0""#);
            assert_eq!(probe_version(&bin, "--version").await.unwrap(), "1.9.0");
        }

        #[tokio::test]
        async fn test_nonzero_exit_is_unavailable() {
            let dir = TempDir::new().unwrap();
            let bin = script(&dir, "helper", "echo 1.0.0; exit 3");
            assert!(probe_version(&bin, "--version").await.is_err());
        }

        #[tokio::test]
        async fn test_garbage_output_is_unavailable() {
            let dir = TempDir::new().unwrap();
            let bin = script(&dir, "helper", "echo hello");
            assert!(probe_version(&bin, "--version").await.is_err());
        }

        #[tokio::test]
        async fn test_not_executable_is_unavailable() {
            let dir = TempDir::new().unwrap();
            let bin = dir.path().join("helper");
            std::fs::write(&bin, "#!/bin/sh\necho 1.0.0\n").unwrap();
            std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();
            assert!(probe_version(&bin, "--version").await.is_err());
        }
    }
}
