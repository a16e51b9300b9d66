//! TLS transport to the IMAP server, direct or through a SOCKS5 proxy.

use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use rustls::ClientConfig;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_socks::tcp::Socks5Stream;
use tracing::{debug, instrument};
use webpki_roots::TLS_SERVER_ROOTS;

/// A TLS stream over TCP, used for IMAP communication.
pub(crate) type TlsStream = tokio_rustls::client::TlsStream<TcpStream>;

/// Opens the encrypted channel to `imap_host` at `target_addr`.
#[instrument(
    name = "connection::open_tls",
    skip_all,
    fields(
        imap_host = %imap_host,
        target_addr = %target_addr,
        proxy_enabled = proxy.is_some()
    )
)]
pub(crate) async fn open_tls(
    imap_host: &str,
    target_addr: &str,
    proxy: Option<&ProxyConfig>,
) -> Result<TlsStream> {
    let server_name = server_name(imap_host)?;
    let tcp_stream = match proxy {
        Some(proxy) => tcp_via_socks5(target_addr, proxy).await?,
        None => tcp_direct(target_addr).await?,
    };

    debug!("Performing TLS handshake");

    tls_connector()
        .connect(server_name, tcp_stream)
        .await
        .map_err(|source| Error::TlsConnect {
            target: target_addr.to_string(),
            source,
        })
}

/// Connector trusting the bundled webpki roots.
fn tls_connector() -> TlsConnector {
    let mut roots = rustls::RootCertStore::empty();
    roots.add_trust_anchors(TLS_SERVER_ROOTS.iter().map(|ta| {
        rustls::OwnedTrustAnchor::from_subject_spki_name_constraints(
            ta.subject,
            ta.spki,
            ta.name_constraints,
        )
    }));

    let tls_config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(tls_config))
}

fn server_name(host: &str) -> Result<rustls::ServerName> {
    rustls::ServerName::try_from(host).map_err(|source| Error::InvalidDnsName {
        host: host.to_string(),
        source,
    })
}

async fn tcp_direct(target_addr: &str) -> Result<TcpStream> {
    debug!(target = %target_addr, "Opening direct TCP connection");

    TcpStream::connect(target_addr)
        .await
        .map_err(|source| Error::TcpConnect {
            target: target_addr.to_string(),
            source,
        })
}

#[instrument(
    name = "connection::socks5",
    skip_all,
    fields(proxy = %proxy, target = %target_addr)
)]
async fn tcp_via_socks5(target_addr: &str, proxy: &ProxyConfig) -> Result<TcpStream> {
    let proxy_addr = (proxy.host.as_str(), proxy.port);

    let stream = match proxy.credentials() {
        Some((username, password)) => {
            Socks5Stream::connect_with_password(proxy_addr, target_addr, username, password).await
        }
        None => Socks5Stream::connect(proxy_addr, target_addr).await,
    };

    stream
        .map(Socks5Stream::into_inner)
        .map_err(|source| Error::Socks5Connect {
            proxy_host: proxy.host.clone(),
            target: target_addr.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_for_default_host() {
        assert!(server_name(crate::config::DEFAULT_IMAP_HOST).is_ok());
    }

    #[test]
    fn test_server_name_rejects_empty_host() {
        assert!(matches!(
            server_name(""),
            Err(Error::InvalidDnsName { .. })
        ));
    }

    #[tokio::test]
    async fn test_direct_connect_failure_is_reported() {
        // Port 1 on localhost is never an IMAP server
        let err = open_tls("localhost", "127.0.0.1:1", None).await.unwrap_err();
        assert!(matches!(err, Error::TcpConnect { .. }));
        assert_eq!(err.category(), crate::error::ErrorCategory::Connection);
    }
}
