//! Pre-install security scanning.
//!
//! A scanner sees every package about to be installed before anything is
//! written to disk. Any `fatal` advisory aborts the install.

use super::error::PkgError;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// A package offered to the scanner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanPackage {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvisoryLevel {
    Fatal,
    Warn,
}

/// A finding reported by a scanner.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Advisory {
    pub level: AdvisoryLevel,
    pub package: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.package)?;
        if let Some(description) = &self.description {
            write!(f, ": {description}")?;
        }
        if let Some(url) = &self.url {
            write!(f, " ({url})")?;
        }
        Ok(())
    }
}

pub trait SecurityScanner: Send + Sync {
    fn scan<'a>(
        &'a self,
        packages: &'a [ScanPackage],
    ) -> BoxFuture<'a, Result<Vec<Advisory>, PkgError>>;
}

#[derive(Serialize)]
struct ScanRequest<'a> {
    packages: &'a [ScanPackage],
}

#[derive(Deserialize)]
struct ScanResponse {
    #[serde(default)]
    advisories: Vec<Advisory>,
}

/// Runs an executable that reads `{"packages":[...]}` on stdin and answers
/// `{"advisories":[...]}` on stdout.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    program: PathBuf,
}

impl CommandScanner {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, packages: &[ScanPackage]) -> Result<Vec<Advisory>, PkgError> {
        let display = self.program.display().to_string();
        let request = serde_json::to_vec(&ScanRequest { packages })?;

        let mut child = tokio::process::Command::new(&self.program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                PkgError::scanner_failed(format!("failed to start scanner {display}: {e}"))
            })?;

        // Stdin is fed while stdout drains; a scanner may answer before it reads everything.
        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(&request).await?;
            stdin.shutdown().await
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());

        let output =
            output.map_err(|e| PkgError::scanner_failed(format!("scanner {display} failed: {e}")))?;
        match written {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                return Err(PkgError::scanner_failed(format!("failed to write to scanner: {e}")));
            }
            _ => {}
        }
        if !output.status.success() {
            return Err(PkgError::scanner_failed(format!(
                "scanner {display} exited with {}",
                output.status
            )));
        }

        let response: ScanResponse = serde_json::from_slice(&output.stdout).map_err(|e| {
            PkgError::scanner_failed(format!("scanner {display} returned invalid JSON: {e}"))
        })?;
        Ok(response.advisories)
    }
}

impl SecurityScanner for CommandScanner {
    fn scan<'a>(
        &'a self,
        packages: &'a [ScanPackage],
    ) -> BoxFuture<'a, Result<Vec<Advisory>, PkgError>> {
        self.run(packages).boxed()
    }
}

/// Fail on any fatal advisory; return the warnings otherwise.
///
/// # Errors
/// Returns `SECURITY_ADVISORY_FATAL` if any advisory is fatal.
pub fn enforce(advisories: Vec<Advisory>) -> Result<Vec<Advisory>, PkgError> {
    let (fatal, warnings): (Vec<_>, Vec<_>) = advisories
        .into_iter()
        .partition(|a| a.level == AdvisoryLevel::Fatal);

    if fatal.is_empty() {
        return Ok(warnings);
    }
    for advisory in &fatal {
        tracing::error!(advisory = %advisory, "fatal security advisory");
    }
    let listed: Vec<String> = fatal.iter().map(ToString::to_string).collect();
    Err(PkgError::security_fatal(format!(
        "Installation aborted due to fatal security advisories\n  {}",
        listed.join("\n  ")
    )))
}
