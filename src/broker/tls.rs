//! TLS client configuration for broker connections
//!
//! Loading is lenient and every fallback is logged at `warn`:
//!
//! - a configured client certificate/key pair that cannot be loaded yields the
//!   default configuration (system trust store, no client certificate)
//! - a CA bundle that cannot be read, or that holds no certificates, is
//!   replaced by the system trust store
//!
//! Neither case fails the connection. Operators relying on pinned CAs or
//! mutual TLS should watch for these warnings.

use std::path::Path;
use std::sync::Arc;

use rumqttc::tokio_rustls::rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{debug, warn};

use crate::config::TlsFiles;

/// Client certificate chain and its private key
pub struct ClientIdentity {
    pub certs: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Build the rustls configuration for a probe's TLS material
pub fn client_config(files: &TlsFiles) -> Arc<ClientConfig> {
    let (cert_path, key_path) = match (&files.client_cert, &files.client_key) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => return Arc::new(server_auth_only(files.ca_chain.as_deref())),
        _ => {
            warn!("only one of client_cert/client_key configured, using default TLS configuration");
            return Arc::new(default_config());
        }
    };

    let Some(identity) = load_identity(cert_path, key_path) else {
        warn!(
            "could not load client certificate {}, using default TLS configuration",
            cert_path.display()
        );
        return Arc::new(default_config());
    };

    let roots = trust_roots(files.ca_chain.as_deref());
    match ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(identity.certs, identity.key)
    {
        Ok(config) => Arc::new(config),
        Err(e) => {
            warn!("client certificate rejected ({e}), using default TLS configuration");
            Arc::new(default_config())
        }
    }
}

/// System trust store, no client certificate
pub fn default_config() -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(system_roots())
        .with_no_client_auth()
}

fn server_auth_only(ca_chain: Option<&Path>) -> ClientConfig {
    ClientConfig::builder()
        .with_root_certificates(trust_roots(ca_chain))
        .with_no_client_auth()
}

fn trust_roots(ca_chain: Option<&Path>) -> RootCertStore {
    let Some(path) = ca_chain else {
        return system_roots();
    };

    load_ca_bundle(path).unwrap_or_else(|| {
        warn!(
            "could not load CA bundle {}, verifying against the system trust store",
            path.display()
        );
        system_roots()
    })
}

/// Load the certificates of a PEM bundle
///
/// Returns `None` if the file cannot be read or contains no usable certificate.
pub fn load_ca_bundle(path: &Path) -> Option<RootCertStore> {
    let certs = CertificateDer::pem_file_iter(path)
        .inspect_err(|e| debug!("reading {}: {e}", path.display()))
        .ok()?
        .filter_map(Result::ok);

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!("loaded {added} CA certificates from {} ({ignored} ignored)", path.display());

    (added > 0).then_some(roots)
}

/// Load a client certificate chain and private key from PEM files
pub fn load_identity(cert_path: &Path, key_path: &Path) -> Option<ClientIdentity> {
    let certs = CertificateDer::pem_file_iter(cert_path)
        .ok()?
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if certs.is_empty() {
        return None;
    }

    let key = PrivateKeyDer::from_pem_file(key_path)
        .inspect_err(|e| debug!("reading {}: {e}", key_path.display()))
        .ok()?;

    Some(ClientIdentity { certs, key })
}

fn system_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        debug!("error loading system certificate: {error}");
    }

    let mut roots = RootCertStore::empty();
    roots.add_parsable_certificates(native.certs);
    roots
}
