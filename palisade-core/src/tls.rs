//! TLS support for the default connector.
//!
//! Certificates and keys are read from PEM files named by the `cert_file`
//! and `key_file` config options.

use crate::{Error, Result};
use rustls::{
    ServerConfig,
    pki_types::{CertificateDer, PrivateKeyDer},
};
use rustls_pemfile::{certs, private_key};
use std::{fs::File, io::BufReader, path::Path, sync::Arc};
use tokio_rustls::TlsAcceptor;

/// Server-side TLS settings.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub server_config: Arc<ServerConfig>,
}

impl TlsConfig {
    /// Load a certificate chain and private key from PEM files.
    ///
    /// ```no_run
    /// use palisade_core::tls::TlsConfig;
    ///
    /// # fn example() -> palisade_core::Result<()> {
    /// let tls = TlsConfig::from_pem_files("cert.pem", "key.pem")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        let cert_file = File::open(cert_path).map_err(|e| {
            Error::Tls(format!("Failed to open certificate file {}: {e}", cert_path.display()))
        })?;
        let key_file = File::open(key_path)
            .map_err(|e| Error::Tls(format!("Failed to open key file {}: {e}", key_path.display())))?;

        let certs = read_certs(&mut BufReader::new(cert_file))?;
        let key = read_private_key(&mut BufReader::new(key_file))?;
        Self::from_parts(certs, key)
    }

    /// Same as [`TlsConfig::from_pem_files`] with the PEM text in memory.
    pub fn from_pem_bytes(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = read_certs(&mut BufReader::new(cert_pem))?;
        let key = read_private_key(&mut BufReader::new(key_pem))?;
        Self::from_parts(certs, key)
    }

    fn from_parts(certs: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Result<Self> {
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| Error::Tls(format!("Failed to create TLS config: {e}")))?;

        // The connector speaks HTTP/1.1 only
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        Ok(Self {
            server_config: Arc::new(config),
        })
    }

    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config.clone())
    }
}

fn read_certs(reader: &mut dyn std::io::BufRead) -> Result<Vec<CertificateDer<'static>>> {
    let certs = certs(reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Tls(format!("Failed to parse certificates: {e}")))?;
    if certs.is_empty() {
        return Err(Error::Tls("No certificate found".to_string()));
    }
    Ok(certs)
}

fn read_private_key(reader: &mut dyn std::io::BufRead) -> Result<PrivateKeyDer<'static>> {
    private_key(reader)
        .map_err(|e| Error::Tls(format!("Failed to read private key: {e}")))?
        .ok_or_else(|| Error::Tls("No private key found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_files() {
        let err = TlsConfig::from_pem_files("/nonexistent/cert.pem", "/nonexistent/key.pem").unwrap_err();
        assert!(matches!(err, Error::Tls(_)));
    }

    #[test]
    fn test_empty_pem() {
        let err = TlsConfig::from_pem_bytes(b"", b"").unwrap_err();
        assert!(matches!(err, Error::Tls(ref msg) if msg.contains("No certificate")));
    }
}
