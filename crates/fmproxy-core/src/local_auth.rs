use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use rand::RngCore;

const KEY_PREFIX: &str = "fmpx_sk_";
const RANDOM_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum LocalAuthError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write key file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("key file {0} has no API_KEY line")]
    Malformed(PathBuf),
}

/// Generates/loads the single local bearer key, persists it with
/// owner-only permissions, and validates incoming requests in constant
/// time (spec.md §4.3).
pub struct LocalApiKeyAuthority {
    key: String,
}

impl LocalApiKeyAuthority {
    /// Loads the key from `path` if present, otherwise generates and
    /// persists a new one. A single initializer guard isn't needed beyond
    /// this call running once during bootstrap — the authority is
    /// immutable afterward and shared behind an `Arc`.
    pub fn ensure_initialized(path: &Path) -> Result<Self, LocalAuthError> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| LocalAuthError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let key = parse_api_key_line(&contents).ok_or_else(|| LocalAuthError::Malformed(path.to_path_buf()))?;
            return Ok(Self { key });
        }

        let key = generate_key();
        persist_key(path, &key)?;
        Ok(Self { key })
    }

    /// Exact-length check, then a constant-time XOR reduction over code
    /// units — the length mismatch short-circuit returns `false` before any
    /// content is compared, so unequal-length inputs carry no timing signal
    /// about *content*, only about length (spec.md §8 invariant).
    pub fn validate(&self, provided: &str) -> bool {
        if provided.len() != self.key.len() {
            return false;
        }
        let mut diff: u8 = 0;
        for (a, b) in self.key.as_bytes().iter().zip(provided.as_bytes().iter()) {
            diff |= a ^ b;
        }
        diff == 0
    }

    pub fn masked(&self) -> String {
        let visible = 4.min(self.key.len());
        format!(
            "{}{}",
            &self.key[..KEY_PREFIX.len().min(self.key.len())],
            "*".repeat(self.key.len().saturating_sub(visible).min(8))
        )
    }
}

fn generate_key() -> String {
    let mut bytes = [0u8; RANDOM_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    format!("{KEY_PREFIX}{encoded}")
}

fn persist_key(path: &Path, key: &str) -> Result<(), LocalAuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| LocalAuthError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
    }

    let mut file = open_owner_only(path).map_err(|source| LocalAuthError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    writeln!(file, "API_KEY=\"{key}\"").map_err(|source| LocalAuthError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(unix)]
fn open_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

fn parse_api_key_line(contents: &str) -> Option<String> {
    for line in contents.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("API_KEY=") {
            return Some(rest.trim_matches('"').to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[test]
    fn generated_key_round_trips_through_file() {
        let dir = std::env::temp_dir().join(format!("fmproxy-test-{}", uuid_like()));
        let path = dir.join("api_key.env");
        let authority = LocalApiKeyAuthority::ensure_initialized(&path).unwrap();
        let reloaded = LocalApiKeyAuthority::ensure_initialized(&path).unwrap();
        assert_eq!(authority.key, reloaded.key);
        assert!(authority.validate(&authority.key));
        std::fs::remove_dir_all(dir).ok();
    }

    #[cfg(unix)]
    #[test]
    fn persisted_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = std::env::temp_dir().join(format!("fmproxy-test-{}", uuid_like()));
        let path = dir.join("api_key.env");
        LocalApiKeyAuthority::ensure_initialized(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn validate_rejects_wrong_length_without_content_comparison() {
        let authority = LocalApiKeyAuthority { key: "fmpx_sk_abcdefgh".to_string() };
        assert!(!authority.validate("short"));
        assert!(!authority.validate(&format!("{}extra", authority.key)));
    }

    #[test]
    fn validate_runtime_is_length_proportional_not_content_dependent() {
        let authority = LocalApiKeyAuthority { key: "fmpx_sk_".to_string() + &"a".repeat(43) };
        let correct = authority.key.clone();
        let mut wrong_early = correct.clone();
        wrong_early.replace_range(0..1, "Z");
        let mut wrong_late = correct.clone();
        let last = wrong_late.len() - 1;
        wrong_late.replace_range(last..last + 1, "Z");

        let iterations = 2000;
        let t1 = time_validate(&authority, &wrong_early, iterations);
        let t2 = time_validate(&authority, &wrong_late, iterations);
        // Not a strict proof of constant-time behavior, but guards against a
        // short-circuiting implementation where a early mismatch returns
        // dramatically faster than a late one.
        let ratio = t1.as_secs_f64().max(1e-9) / t2.as_secs_f64().max(1e-9);
        assert!(ratio > 0.2 && ratio < 5.0, "ratio={ratio}");
    }

    fn time_validate(authority: &LocalApiKeyAuthority, candidate: &str, iterations: u32) -> Duration {
        let start = Instant::now();
        for _ in 0..iterations {
            std::hint::black_box(authority.validate(std::hint::black_box(candidate)));
        }
        start.elapsed()
    }

    fn uuid_like() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
    }
}
