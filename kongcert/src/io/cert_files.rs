//! Reading certificate material issued by the ACME client.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Full chain and private key, exactly as read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertMaterial {
    pub fullchain: String,
    pub key: String,
}

/// Read the private key and full chain PEM files.
///
/// Contents are not trimmed: certificate reuse compares material
/// byte-for-byte against what the gateway stores.
pub fn read_cert_material(key_path: &Path, fullchain_path: &Path) -> Result<CertMaterial> {
    let key = fs::read_to_string(key_path)
        .with_context(|| format!("read private key {}", key_path.display()))?;
    let fullchain = fs::read_to_string(fullchain_path)
        .with_context(|| format!("read full chain {}", fullchain_path.display()))?;
    if key.trim().is_empty() {
        bail!("private key {} is empty", key_path.display());
    }
    if fullchain.trim().is_empty() {
        bail!("full chain {} is empty", fullchain_path.display());
    }
    Ok(CertMaterial { fullchain, key })
}
