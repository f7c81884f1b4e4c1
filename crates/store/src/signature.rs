//! Detached signatures over `collection.yaml`.
//!
//! A signed collection ships the signature next to its manifest:
//! `collection.yaml.asc` or `collection.yaml.sig` for GPG, `collection.yaml.sshsig`
//! for `ssh-keygen -Y sign`. Verification shells out to the corresponding tool.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{io_op, Result, StoreError};
use crate::manifest::MANIFEST_FILE;

pub const GPG_VERIFIER: &str = "gpg";
pub const SSH_VERIFIER: &str = "ssh";
pub const DEFAULT_SSH_IDENTITY: &str = "collection-signer";
pub const DEFAULT_SSH_NAMESPACE: &str = "file";
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Signature file suffixes in lookup order, with the verifier that reads them.
const SIGNATURE_SUFFIXES: &[(&str, &str)] = &[
    (".asc", GPG_VERIFIER),
    (".sig", GPG_VERIFIER),
    (".sshsig", SSH_VERIFIER),
];

#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    fn name(&self) -> &str;

    /// Checks `signature` over `file`. `public_key` is verifier specific: a key to
    /// import for GPG, an allowed-signers file for SSH.
    async fn verify(&self, file: &Path, signature: &Path, public_key: Option<&Path>) -> Result<()>;
}

/// The manifest signature shipped in `root`, with the name of the verifier for it.
pub fn find_signature(root: &Path) -> Option<(PathBuf, &'static str)> {
    SIGNATURE_SUFFIXES.iter().find_map(|(suffix, verifier)| {
        let path = root.join(format!("{}{}", MANIFEST_FILE, suffix));
        path.is_file().then_some((path, *verifier))
    })
}

async fn run_tool(program: &Path, args: &[&OsStr], stdin: Option<Vec<u8>>, timeout: Duration) -> Result<Output> {
    debug!("Running {:?} {:?}", program, args);
    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| StoreError::SignatureInvalid(format!("failed to start {:?}: {}", program, e)))?;

    if let (Some(data), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(&data)
            .await
            .map_err(|e| StoreError::SignatureInvalid(format!("failed to feed {:?}: {}", program, e)))?;
    }

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| StoreError::SignatureInvalid(e.to_string())),
        Err(_) => Err(StoreError::Timeout(format!(
            "{:?} did not finish within {:?}",
            program, timeout
        ))),
    }
}

fn combined_output(output: &Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined.trim().to_string()
}

/// Verifies OpenPGP detached signatures with `gpg`.
#[derive(Debug, Clone)]
pub struct GpgVerifier {
    program: PathBuf,
    timeout: Duration,
}

impl GpgVerifier {
    /// Finds `gpg` on `PATH`.
    pub fn locate() -> Result<Self> {
        let program = which::which("gpg")
            .map_err(|e| StoreError::InvalidConfiguration(format!("gpg not found in PATH: {}", e)))?;
        Ok(Self::with_program(program))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SignatureVerifier for GpgVerifier {
    fn name(&self) -> &str {
        GPG_VERIFIER
    }

    async fn verify(&self, file: &Path, signature: &Path, public_key: Option<&Path>) -> Result<()> {
        if let Some(key) = public_key {
            let output = run_tool(
                &self.program,
                &[OsStr::new("--batch"), OsStr::new("--import"), key.as_os_str()],
                None,
                self.timeout,
            )
            .await?;
            if !output.status.success() {
                return Err(StoreError::SignatureInvalid(format!(
                    "key import from {:?} failed: {}",
                    key,
                    combined_output(&output)
                )));
            }
        }

        // Status lines are stable across locales, unlike the human-readable verdict.
        let output = run_tool(
            &self.program,
            &[
                OsStr::new("--batch"),
                OsStr::new("--status-fd"),
                OsStr::new("1"),
                OsStr::new("--verify"),
                signature.as_os_str(),
                file.as_os_str(),
            ],
            None,
            self.timeout,
        )
        .await?;
        let status = String::from_utf8_lossy(&output.stdout);
        if output.status.success() && status.contains("[GNUPG:] GOODSIG") {
            return Ok(());
        }
        Err(StoreError::SignatureInvalid(format!(
            "gpg rejected {:?}: {}",
            signature,
            combined_output(&output)
        )))
    }
}

/// Verifies SSH signatures with `ssh-keygen -Y verify` against an allowed-signers file.
#[derive(Debug, Clone)]
pub struct SshVerifier {
    program: PathBuf,
    identity: String,
    namespace: String,
    timeout: Duration,
}

impl SshVerifier {
    /// Finds `ssh-keygen` on `PATH`.
    pub fn locate() -> Result<Self> {
        let program = which::which("ssh-keygen").map_err(|e| {
            StoreError::InvalidConfiguration(format!("ssh-keygen not found in PATH: {}", e))
        })?;
        Ok(Self::with_program(program))
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            identity: DEFAULT_SSH_IDENTITY.to_string(),
            namespace: DEFAULT_SSH_NAMESPACE.to_string(),
            timeout: DEFAULT_VERIFY_TIMEOUT,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl SignatureVerifier for SshVerifier {
    fn name(&self) -> &str {
        SSH_VERIFIER
    }

    async fn verify(&self, file: &Path, signature: &Path, public_key: Option<&Path>) -> Result<()> {
        let allowed_signers = public_key.ok_or_else(|| {
            StoreError::SignatureInvalid("SSH verification needs an allowed signers file".to_string())
        })?;
        let data = tokio::fs::read(file)
            .await
            .map_err(io_op("read signed file", file))?;

        let output = run_tool(
            &self.program,
            &[
                OsStr::new("-Y"),
                OsStr::new("verify"),
                OsStr::new("-f"),
                allowed_signers.as_os_str(),
                OsStr::new("-I"),
                OsStr::new(&self.identity),
                OsStr::new("-n"),
                OsStr::new(&self.namespace),
                OsStr::new("-s"),
                signature.as_os_str(),
            ],
            Some(data),
            self.timeout,
        )
        .await?;
        if output.status.success() {
            return Ok(());
        }
        Err(StoreError::SignatureInvalid(format!(
            "ssh-keygen rejected {:?}: {}",
            signature,
            combined_output(&output)
        )))
    }
}

/// Named set of verifiers. Registering a name again replaces the earlier verifier.
#[derive(Clone, Default)]
pub struct SignatureManager {
    verifiers: Vec<Arc<dyn SignatureVerifier>>,
}

impl std::fmt::Debug for SignatureManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureManager")
            .field("verifiers", &self.names())
            .finish()
    }
}

impl SignatureManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// GPG and SSH verifiers for whichever of the tools are installed.
    pub fn with_available() -> Self {
        let mut manager = Self::new();
        match GpgVerifier::locate() {
            Ok(gpg) => manager.register(Arc::new(gpg)),
            Err(e) => debug!("GPG verification unavailable: {}", e),
        }
        match SshVerifier::locate() {
            Ok(ssh) => manager.register(Arc::new(ssh)),
            Err(e) => debug!("SSH verification unavailable: {}", e),
        }
        manager
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.register(verifier);
        self
    }

    pub fn register(&mut self, verifier: Arc<dyn SignatureVerifier>) {
        self.verifiers.retain(|v| v.name() != verifier.name());
        self.verifiers.push(verifier);
    }

    pub fn names(&self) -> Vec<&str> {
        self.verifiers.iter().map(|v| v.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }

    pub async fn verify(
        &self,
        verifier: &str,
        file: &Path,
        signature: &Path,
        public_key: Option<&Path>,
    ) -> Result<()> {
        let found = self
            .verifiers
            .iter()
            .find(|v| v.name() == verifier)
            .ok_or_else(|| {
                StoreError::SignatureInvalid(format!("no '{}' verifier is available", verifier))
            })?;
        found.verify(file, signature, public_key).await?;
        info!("Signature {:?} verified with {}", signature, verifier);
        Ok(())
    }

    /// Tries every verifier in registration order and succeeds on the first that
    /// accepts the signature.
    pub async fn verify_any(&self, file: &Path, signature: &Path, public_key: Option<&Path>) -> Result<String> {
        if self.verifiers.is_empty() {
            return Err(StoreError::SignatureInvalid(
                "no signature verifiers available (install gpg or ssh-keygen)".to_string(),
            ));
        }

        let mut failures = Vec::new();
        for verifier in &self.verifiers {
            match verifier.verify(file, signature, public_key).await {
                Ok(()) => return Ok(verifier.name().to_string()),
                Err(e) => failures.push(format!("{}: {}", verifier.name(), e)),
            }
        }
        Err(StoreError::SignatureInvalid(failures.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FixedVerifier {
        name: &'static str,
        accept: bool,
    }

    #[async_trait]
    impl SignatureVerifier for FixedVerifier {
        fn name(&self) -> &str {
            self.name
        }

        async fn verify(&self, _file: &Path, _signature: &Path, _public_key: Option<&Path>) -> Result<()> {
            if self.accept {
                Ok(())
            } else {
                Err(StoreError::SignatureInvalid("bad signature".to_string()))
            }
        }
    }

    #[test]
    fn test_find_signature_prefers_gpg_suffixes() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_signature(temp_dir.path()).is_none());

        std::fs::write(temp_dir.path().join("collection.yaml.sshsig"), "sig").unwrap();
        let (path, verifier) = find_signature(temp_dir.path()).unwrap();
        assert_eq!(verifier, SSH_VERIFIER);
        assert!(path.ends_with("collection.yaml.sshsig"));

        std::fs::write(temp_dir.path().join("collection.yaml.asc"), "sig").unwrap();
        assert_eq!(find_signature(temp_dir.path()).unwrap().1, GPG_VERIFIER);
    }

    #[tokio::test]
    async fn test_manager_verify_by_name_and_any() {
        let manager = SignatureManager::new()
            .with_verifier(Arc::new(FixedVerifier { name: "gpg", accept: false }))
            .with_verifier(Arc::new(FixedVerifier { name: "ssh", accept: true }));
        let file = Path::new("collection.yaml");
        let sig = Path::new("collection.yaml.sig");

        assert!(matches!(
            manager.verify("gpg", file, sig, None).await,
            Err(StoreError::SignatureInvalid(_))
        ));
        manager.verify("ssh", file, sig, None).await.unwrap();
        assert!(manager.verify("x509", file, sig, None).await.is_err());
        assert_eq!(manager.verify_any(file, sig, None).await.unwrap(), "ssh");

        let replaced = manager.with_verifier(Arc::new(FixedVerifier { name: "ssh", accept: false }));
        assert_eq!(replaced.names(), vec!["gpg", "ssh"]);
        let err = replaced.verify_any(file, sig, None).await.unwrap_err();
        assert!(err.to_string().contains("gpg: "));
        assert!(err.to_string().contains("ssh: "));

        assert!(SignatureManager::new().verify_any(file, sig, None).await.is_err());
    }

    #[tokio::test]
    async fn test_ssh_requires_allowed_signers() {
        let verifier = SshVerifier::with_program("/nonexistent/ssh-keygen");
        let err = verifier
            .verify(Path::new("collection.yaml"), Path::new("collection.yaml.sshsig"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SignatureInvalid(m) if m.contains("allowed signers")));
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_gpg_reads_status_lines() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("collection.yaml");
        let sig = temp_dir.path().join("collection.yaml.asc");
        std::fs::write(&file, "name: devops\n").unwrap();
        std::fs::write(&sig, "sig").unwrap();

        let good = fake_tool(temp_dir.path(), "gpg-good", "echo '[GNUPG:] GOODSIG 0123 alice'");
        GpgVerifier::with_program(good).verify(&file, &sig, None).await.unwrap();

        let bad = fake_tool(temp_dir.path(), "gpg-bad", "echo '[GNUPG:] BADSIG 0123 alice'; exit 1");
        assert!(matches!(
            GpgVerifier::with_program(bad).verify(&file, &sig, None).await,
            Err(StoreError::SignatureInvalid(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ssh_pipes_signed_file_to_stdin() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("collection.yaml");
        let sig = temp_dir.path().join("collection.yaml.sshsig");
        let signers = temp_dir.path().join("allowed_signers");
        std::fs::write(&file, "name: devops\n").unwrap();
        std::fs::write(&sig, "sig").unwrap();
        std::fs::write(&signers, "collection-signer ssh-ed25519 AAAA\n").unwrap();

        // accepts only when the manifest arrives on stdin
        let tool = fake_tool(temp_dir.path(), "ssh-keygen", "grep -q 'name: devops'");
        SshVerifier::with_program(tool)
            .verify(&file, &sig, Some(&signers))
            .await
            .unwrap();
    }
}
