//! Turning command-line connection options into a [`ConnectTarget`].

use std::path::{Path, PathBuf};

use mudlink_core::{ConnectTarget, TlsParams};

/// Connection options as given on the command line. PEM inputs are paths.
#[derive(Debug, Clone, Default)]
pub struct TargetOptions {
    pub host: String,
    pub port: u16,
    pub name: Option<String>,
    pub tls: bool,
    pub insecure: bool,
    pub server_name: Option<String>,
    pub ca: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub key_passphrase: Option<String>,
}

fn read_pem(path: &Option<PathBuf>) -> std::io::Result<Option<String>> {
    path.as_deref().map(read_file).transpose()
}

fn read_file(path: &Path) -> std::io::Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        std::io::Error::new(e.kind(), format!("cannot read {}: {e}", path.display()))
    })
}

impl TargetOptions {
    /// Build the target, reading any PEM files. Any TLS-only option
    /// implies `--tls`.
    pub fn into_target(self) -> std::io::Result<ConnectTarget> {
        let wants_tls = self.tls
            || self.insecure
            || self.server_name.is_some()
            || self.ca.is_some()
            || self.cert.is_some()
            || self.key.is_some();

        let mut target = ConnectTarget::new(self.host, self.port);
        target.name = self.name;
        if wants_tls {
            target = target.with_tls(TlsParams {
                enabled: true,
                verify_peer: !self.insecure,
                server_name: self.server_name,
                trust_anchor: read_pem(&self.ca)?,
                client_cert: read_pem(&self.cert)?,
                client_key: read_pem(&self.key)?,
                key_passphrase: self.key_passphrase,
            });
        }
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> TargetOptions {
        TargetOptions {
            host: "mud.example.org".into(),
            port: 4000,
            ..Default::default()
        }
    }

    #[test]
    fn plain_by_default() {
        let target = options().into_target().unwrap();
        assert!(!target.uses_tls());
        assert_eq!(target.display_name(), "mud.example.org:4000");
    }

    #[test]
    fn insecure_implies_tls_without_verification() {
        let target = TargetOptions {
            insecure: true,
            ..options()
        }
        .into_target()
        .unwrap();
        let tls = target.tls.unwrap();
        assert!(tls.enabled);
        assert!(!tls.verify_peer);
    }

    #[test]
    fn missing_pem_file_is_an_error() {
        let err = TargetOptions {
            ca: Some(PathBuf::from("/nonexistent/ca.pem")),
            ..options()
        }
        .into_target()
        .unwrap_err();
        assert!(err.to_string().contains("ca.pem"));
    }
}
