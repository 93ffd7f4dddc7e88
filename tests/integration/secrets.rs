//! E7: secrets round-trip, shelling out to the real `age`/`age-keygen`
//! binaries. Skips instead of failing when those tools aren't installed on
//! the machine running the suite, matching `fctl check`'s own treatment of
//! a missing external tool as an environment condition, not a crate bug.
use std::fs;
use std::os::unix::fs::PermissionsExt;

use fleetctl::secrets::SecretsEnvelope;

fn age_tools_available() -> bool {
    std::process::Command::new("age-keygen")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}

#[test]
fn round_trips_a_plaintext_secrets_file() {
    if !age_tools_available() {
        eprintln!("skipping: age/age-keygen not found on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let envelope = SecretsEnvelope::new(dir.path().join("key"), dir.path().join("key.old"));
    envelope.generate_key().expect("generate_key");

    let plaintext_path = dir.path().join("secrets.env");
    let plaintext = b"CLAUDE_API_KEY=x\nOPENAI_API_KEY=y\n";
    fs::write(&plaintext_path, plaintext).unwrap();

    let encrypted_path = envelope.encrypt(&plaintext_path).expect("encrypt");
    assert!(encrypted_path.exists());

    fs::remove_file(&plaintext_path).unwrap();

    let decrypted_path = envelope.decrypt(&encrypted_path).expect("decrypt");
    assert_eq!(decrypted_path, plaintext_path);

    let recovered = fs::read(&decrypted_path).unwrap();
    assert_eq!(recovered, plaintext);

    let mode = fs::metadata(&decrypted_path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}

#[test]
fn rotate_re_encrypts_under_a_fresh_key() {
    if !age_tools_available() {
        eprintln!("skipping: age/age-keygen not found on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let envelope = SecretsEnvelope::new(dir.path().join("key"), dir.path().join("key.old"));
    envelope.generate_key().expect("generate_key");
    let old_recipient = envelope.recipient().expect("recipient");

    let plaintext_path = dir.path().join("secrets.env");
    fs::write(&plaintext_path, b"CLAUDE_API_KEY=x\n").unwrap();
    let encrypted_path = envelope.encrypt(&plaintext_path).expect("encrypt");

    envelope.rotate(&[encrypted_path.clone()]).expect("rotate");
    let new_recipient = envelope.recipient().expect("new recipient");
    assert_ne!(old_recipient, new_recipient);

    fs::remove_file(&plaintext_path).unwrap();
    let decrypted_path = envelope.decrypt(&encrypted_path).expect("decrypt with new key");
    assert_eq!(fs::read(&decrypted_path).unwrap(), b"CLAUDE_API_KEY=x\n");
}
