//! ノードエージェント接続用のTLSクライアント設定
//!
//! HTTPクライアントと生ソケットのコネクタは同じ `rustls` 設定を使う

use fleet_common::error::{RouterError, RouterResult};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use std::{path::Path, sync::Arc};
use tracing::info;

/// ノードエージェントへTLSで接続するためのPEMファイル
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// エージェント証明書の検証に使うCAバンドル
    pub ca_cert: Option<std::path::PathBuf>,
    /// クライアント証明書チェーン
    pub cert: Option<std::path::PathBuf>,
    /// クライアント秘密鍵
    pub key: Option<std::path::PathBuf>,
}

impl TlsFiles {
    /// TLS設定が1つでも指定されているか
    pub fn is_enabled(&self) -> bool {
        self.ca_cert.is_some() || self.cert.is_some() || self.key.is_some()
    }
}

/// クライアント設定を構築する。TLS未設定なら `None`
pub fn load_client_config(files: &TlsFiles) -> RouterResult<Option<Arc<ClientConfig>>> {
    if !files.is_enabled() {
        return Ok(None);
    }

    let ca_path = files.ca_cert.as_deref().ok_or_else(|| {
        RouterError::Config("--tlscacert is required when TLS is enabled".to_string())
    })?;

    let mut roots = RootCertStore::empty();
    for cert in read_certs(ca_path)? {
        roots
            .add(cert)
            .map_err(|e| RouterError::Config(format!("Invalid CA certificate: {}", e)))?;
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| RouterError::Config(format!("Unsupported TLS protocol versions: {}", e)))?
    .with_root_certificates(roots);

    let config = match (&files.cert, &files.key) {
        (Some(cert), Some(key)) => {
            let chain = read_certs(cert)?;
            let key = PrivateKeyDer::from_pem_file(key).map_err(|e| {
                RouterError::Config(format!("Failed to read {}: {}", key.display(), e))
            })?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|e| RouterError::Config(format!("Invalid client certificate: {}", e)))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(RouterError::Config(
                "--tlscert and --tlskey must be given together".to_string(),
            ))
        }
    };

    info!(ca = %ca_path.display(), "TLS enabled for node agent connections");
    Ok(Some(Arc::new(config)))
}

fn read_certs(path: &Path) -> RouterResult<Vec<CertificateDer<'static>>> {
    let certs = CertificateDer::pem_file_iter(path)
        .and_then(|iter| iter.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RouterError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
    if certs.is_empty() {
        return Err(RouterError::Config(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}
