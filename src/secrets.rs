//! Secrets envelope: encrypt/decrypt/rotate a key-value secrets file via the
//! external `age`/`age-keygen` binaries. This module is the only one that
//! reads identity key material.
use std::{
    collections::HashMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use tempfile::NamedTempFile;

use crate::constants::{AGE_BINARY, AGE_KEYGEN_BINARY, ENCRYPTED_EXTENSION};
use crate::error::SecretsError;

/// Wraps the `age`/`age-keygen` binaries and the per-user key directory.
pub struct SecretsEnvelope {
    key_path: PathBuf,
    key_old_path: PathBuf,
}

impl SecretsEnvelope {
    /// Builds an envelope rooted at the given key paths. Callers are
    /// expected to have already called
    /// [`crate::runtime::ensure_state_tree`].
    pub fn new(key_path: PathBuf, key_old_path: PathBuf) -> Self {
        Self {
            key_path,
            key_old_path,
        }
    }

    /// Generates a fresh identity key, writing it with owner-only
    /// permission. Idempotent at this layer; the "replace?" confirmation
    /// prompt lives at the CLI boundary, not here.
    pub fn generate_key(&self) -> Result<(), SecretsError> {
        let output = run_capturing(AGE_KEYGEN_BINARY, &[])?;
        write_atomic_with_mode(&self.key_path, output.stdout.as_bytes(), 0o600)
            .map_err(|source| SecretsError::IOFailed {
                path: self.key_path.clone(),
                source,
            })
    }

    /// Reads the public recipient out of the identity file (the
    /// `# public key: ...` comment `age-keygen` writes above the secret
    /// key line).
    pub fn recipient(&self) -> Result<String, SecretsError> {
        let contents = fs::read_to_string(&self.key_path).map_err(|source| SecretsError::IOFailed {
            path: self.key_path.clone(),
            source,
        })?;
        contents
            .lines()
            .find_map(|line| line.strip_prefix("# public key: "))
            .map(str::to_string)
            .ok_or_else(|| SecretsError::DecryptFailed {
                path: self.key_path.clone(),
                detail: "identity file has no public key comment".into(),
            })
    }

    /// Encrypts `plaintext_path`, replacing any prior `<plaintext_path>.age`
    /// atomically.
    pub fn encrypt(&self, plaintext_path: &Path) -> Result<PathBuf, SecretsError> {
        let recipient = self.recipient()?;
        let encrypted_path = with_age_extension(plaintext_path);
        let output = run_capturing(
            AGE_BINARY,
            &["-r", &recipient, "-o", "-", &plaintext_path.to_string_lossy()],
        )?;
        if !output.status_ok {
            return Err(SecretsError::EncryptFailed {
                path: plaintext_path.to_path_buf(),
                detail: output.stderr,
            });
        }
        write_atomic_with_mode(&encrypted_path, output.stdout.as_bytes(), 0o600).map_err(
            |source| SecretsError::IOFailed {
                path: encrypted_path.clone(),
                source,
            },
        )?;
        Ok(encrypted_path)
    }

    /// Decrypts `encrypted_path` back to its plaintext sibling.
    pub fn decrypt(&self, encrypted_path: &Path) -> Result<PathBuf, SecretsError> {
        self.decrypt_with_key(encrypted_path, &self.key_path)
    }

    fn decrypt_with_key(&self, encrypted_path: &Path, key_path: &Path) -> Result<PathBuf, SecretsError> {
        let output = run_capturing(
            AGE_BINARY,
            &[
                "-d",
                "-i",
                &key_path.to_string_lossy(),
                &encrypted_path.to_string_lossy(),
            ],
        )?;
        if !output.status_ok {
            return Err(SecretsError::DecryptFailed {
                path: encrypted_path.to_path_buf(),
                detail: output.stderr,
            });
        }
        let plaintext_path = without_age_extension(encrypted_path);
        write_atomic_with_mode(&plaintext_path, output.stdout.as_bytes(), 0o600).map_err(
            |source| SecretsError::IOFailed {
                path: plaintext_path.clone(),
                source,
            },
        )?;
        Ok(plaintext_path)
    }

    /// Decrypts every file in `encrypted_files` with the current key to a
    /// staging directory, rotates the key, then re-encrypts the staged
    /// plaintexts with the new recipient and atomically replaces the
    /// originals. If any decryption fails, the old key and all original
    /// encrypted files are left unchanged.
    pub fn rotate(&self, encrypted_files: &[PathBuf]) -> Result<(), SecretsError> {
        let staging = tempfile::tempdir().map_err(|source| SecretsError::IOFailed {
            path: self.key_path.clone(),
            source,
        })?;

        let mut staged = Vec::new();
        for encrypted in encrypted_files {
            let output = run_capturing(
                AGE_BINARY,
                &[
                    "-d",
                    "-i",
                    &self.key_path.to_string_lossy(),
                    &encrypted.to_string_lossy(),
                ],
            )?;
            if !output.status_ok {
                // Nothing has been mutated yet; old key and files intact.
                return Err(SecretsError::DecryptFailed {
                    path: encrypted.clone(),
                    detail: output.stderr,
                });
            }
            let plaintext_name = without_age_extension(encrypted)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let staged_path = staging.path().join(plaintext_name);
            fs::write(&staged_path, output.stdout.as_bytes()).map_err(|source| {
                SecretsError::IOFailed {
                    path: staged_path.clone(),
                    source,
                }
            })?;
            staged.push((encrypted.clone(), staged_path));
        }

        rename_or_copy(&self.key_path, &self.key_old_path)
            .map_err(|source| SecretsError::IOFailed {
                path: self.key_old_path.clone(),
                source,
            })?;
        self.generate_key()?;
        let new_recipient = self.recipient()?;

        for (original, staged_path) in staged {
            let output = run_capturing(
                AGE_BINARY,
                &["-r", &new_recipient, "-o", "-", &staged_path.to_string_lossy()],
            )?;
            if !output.status_ok {
                // Keys have already been rotated; don't compound the
                // failure by overwriting the original with a bad payload.
                return Err(SecretsError::EncryptFailed {
                    path: original.clone(),
                    detail: output.stderr,
                });
            }
            write_atomic_with_mode(&original, output.stdout.as_bytes(), 0o600).map_err(
                |source| SecretsError::IOFailed {
                    path: original.clone(),
                    source,
                },
            )?;
        }
        Ok(())
    }

    /// Parses `path` as a `KEY=VALUE` secrets file and checks that every
    /// name in `required_keys` is present and non-empty.
    pub fn validate_env(&self, path: &Path, required_keys: &[String]) -> Result<(), SecretsError> {
        let contents = fs::read_to_string(path).map_err(|source| SecretsError::IOFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let present = parse_env_file(&contents);
        let missing: Vec<String> = required_keys
            .iter()
            .filter(|key| present.get(*key).map(|v| v.is_empty()).unwrap_or(true))
            .cloned()
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SecretsError::MissingKeys(missing))
        }
    }
}

/// Parses a `KEY=VALUE` text file, one entry per line; `#` comments and
/// blank lines are ignored.
pub fn parse_env_file(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

fn with_age_extension(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ENCRYPTED_EXTENSION);
    PathBuf::from(os)
}

fn without_age_extension(path: &Path) -> PathBuf {
    let suffix = format!(".{ENCRYPTED_EXTENSION}");
    let as_str = path.to_string_lossy();
    as_str
        .strip_suffix(&suffix)
        .map(PathBuf::from)
        .unwrap_or_else(|| path.to_path_buf())
}

fn rename_or_copy(from: &Path, to: &Path) -> std::io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

fn write_atomic_with_mode(path: &Path, bytes: &[u8], mode: u32) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    }
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

struct CapturedOutput {
    stdout: String,
    stderr: String,
    status_ok: bool,
}

fn run_capturing(binary: &'static str, args: &[&str]) -> Result<CapturedOutput, SecretsError> {
    let output = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = match output {
        Ok(o) => o,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SecretsError::ExternalToolMissing(binary));
        }
        Err(source) => {
            return Err(SecretsError::IOFailed {
                path: PathBuf::from(binary),
                source,
            });
        }
    };

    Ok(CapturedOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status_ok: output.status.success(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_env_file_ignores_comments_and_blanks() {
        let contents = "# a comment\n\nCLAUDE_API_KEY=abc\nOPENAI_API_KEY=def\n";
        let parsed = parse_env_file(contents);
        assert_eq!(parsed.get("CLAUDE_API_KEY").map(String::as_str), Some("abc"));
        assert_eq!(parsed.get("OPENAI_API_KEY").map(String::as_str), Some("def"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn with_and_without_age_extension_round_trip() {
        let path = PathBuf::from("/tmp/secrets.env");
        let encrypted = with_age_extension(&path);
        assert_eq!(encrypted, PathBuf::from("/tmp/secrets.env.age"));
        assert_eq!(without_age_extension(&encrypted), path);
    }

    #[test]
    fn validate_env_reports_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.env");
        fs::write(&path, "CLAUDE_API_KEY=abc\n").unwrap();
        let envelope = SecretsEnvelope::new(dir.path().join("key"), dir.path().join("key.old"));
        let err = envelope
            .validate_env(&path, &["CLAUDE_API_KEY".into(), "OPENAI_API_KEY".into()])
            .unwrap_err();
        match err {
            SecretsError::MissingKeys(missing) => assert_eq!(missing, vec!["OPENAI_API_KEY".to_string()]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_age_binary_surfaces_external_tool_missing() {
        let err = run_capturing("definitely-not-a-real-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, SecretsError::ExternalToolMissing(_)));
    }
}
