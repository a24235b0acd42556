use std::fs;
use std::io;
use std::path::Path;

use rcgen::{CertificateParams, DnType, Ia5String, KeyPair, SanType};
use tel_protocol::ApplicationCertificate;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("failed to create certificate directory {path}: {source}")]
    Mkdir {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to generate certificate: {0}")]
    Generate(#[from] rcgen::Error),
}

/// Makes sure a self-signed application certificate and its key exist.
/// Existing files are reused. Returns true when a new pair was written.
pub fn ensure_key_pair(
    paths: &ApplicationCertificate,
    application_name: &str,
) -> Result<bool, CertificateError> {
    if paths.certificate_path.is_file() && paths.private_key_path.is_file() {
        return Ok(false);
    }

    let mut params = CertificateParams::new(vec!["localhost".to_string()])?;
    params
        .distinguished_name
        .push(DnType::CommonName, application_name);
    params.distinguished_name.push(DnType::OrganizationName, "telegate");
    let uri = Ia5String::try_from(format!("urn:{application_name}:client"))?;
    params.subject_alt_names.push(SanType::URI(uri));

    let key_pair = KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    write_pem(&paths.certificate_path, &cert.pem())?;
    write_pem(&paths.private_key_path, &key_pair.serialize_pem())?;
    info!(
        certificate = %paths.certificate_path.display(),
        key = %paths.private_key_path.display(),
        "generated application certificate"
    );
    Ok(true)
}

fn write_pem(path: &Path, contents: &str) -> Result<(), CertificateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| CertificateError::Mkdir {
                path: parent.display().to_string(),
                source,
            })?;
        }
    }
    fs::write(path, contents).map_err(|source| CertificateError::Write {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("{prefix}_{unique}"))
    }

    #[test]
    fn generates_once_and_reuses() {
        let dir = unique_temp_dir("telegate_certs");
        let paths = ApplicationCertificate {
            certificate_path: dir.join("certs").join("cert.pem"),
            private_key_path: dir.join("certs").join("key.pem"),
        };

        assert!(ensure_key_pair(&paths, "telegate").expect("generate"));
        let cert = fs::read_to_string(&paths.certificate_path).expect("read cert");
        let key = fs::read_to_string(&paths.private_key_path).expect("read key");
        assert!(cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(key.contains("PRIVATE KEY"));

        assert!(!ensure_key_pair(&paths, "telegate").expect("reuse"));
        assert_eq!(
            fs::read_to_string(&paths.certificate_path).expect("read cert again"),
            cert
        );

        let _ = fs::remove_dir_all(dir);
    }
}
