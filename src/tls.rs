// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transport security for client connections.
//!
//! TLS libraries historically defaulted to permissive protocol negotiation,
//! including deprecated versions. This module layers a narrowing policy on
//! top of a general-purpose TLS stack: it constrains which protocol
//! versions a connection may negotiate, preferring the most modern
//! supported versions, and after the handshake it verifies that the session
//! actually derived key material before any data is sent.

use crate::{Error, Result};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpSocket, TcpStream};

/// TLS protocol versions, in descending order of preference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsProtocol {
    /// TLS 1.3.
    V1_3,
    /// TLS 1.2.
    V1_2,
    /// TLS 1.1, deprecated. Only ever negotiated as a fallback on stacks
    /// that still support it.
    V1_1,
    /// TLS 1.0, deprecated. Only ever negotiated as a fallback on stacks
    /// that still support it.
    V1_0,
}

impl TlsProtocol {
    /// All versions, most preferred first.
    pub const ALL: [TlsProtocol; 4] = [
        TlsProtocol::V1_3,
        TlsProtocol::V1_2,
        TlsProtocol::V1_1,
        TlsProtocol::V1_0,
    ];

    /// The standard protocol name.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Self::V1_3 => "TLSv1.3",
            Self::V1_2 => "TLSv1.2",
            Self::V1_1 => "TLSv1.1",
            Self::V1_0 => "TLSv1",
        }
    }
}

/// Computes the protocol versions to enable on a connection.
///
/// Walks the fixed preference order, including each version only when the
/// connection supports it, then appends any currently-enabled version not
/// already present so an existing configuration is never lost. The result
/// contains no duplicates. A `None` or empty `supported` set contributes
/// nothing; the result is then just the enabled versions as they were.
pub fn preferred_protocols<S, E>(supported: Option<&[S]>, enabled: Option<&[E]>) -> Vec<String>
where
    S: AsRef<str>,
    E: AsRef<str>,
{
    let mut target = Vec::new();
    if let Some(supported) = supported {
        for protocol in TlsProtocol::ALL {
            let name = protocol.protocol_name();
            if supported.iter().any(|s| s.as_ref() == name) {
                target.push(name.to_string());
            }
        }
    }
    if let Some(enabled) = enabled {
        for name in enabled {
            let name = name.as_ref();
            if !target.iter().any(|t| t == name) {
                target.push(name.to_string());
            }
        }
    }
    target
}

/// A socket (or socket-like configuration) whose enabled protocol versions
/// can be inspected and replaced before the handshake.
pub trait ProtocolSocket {
    /// The protocol versions the implementation is able to negotiate.
    fn supported_protocols(&self) -> Vec<String>;
    /// The protocol versions currently eligible for negotiation.
    fn enabled_protocols(&self) -> Vec<String>;
    /// Replaces the set of versions eligible for negotiation.
    fn set_enabled_protocols(&mut self, protocols: &[String]);
}

/// Enforces the preferred protocol versions on a socket before handshake.
///
/// Narrows the preference order only; a version that was both supported and
/// enabled stays eligible. When the computed list is empty the socket is
/// left untouched, so this can never strip a connection down to zero
/// enabled protocols. Mutates only the given socket and performs no I/O.
pub fn prepare_socket<S: ProtocolSocket + ?Sized>(socket: &mut S) {
    let supported = socket.supported_protocols();
    let enabled = socket.enabled_protocols();
    tracing::debug!(?supported, ?enabled, "preparing socket for TLS handshake");
    let target = preferred_protocols(Some(&supported), Some(&enabled));
    if !target.is_empty() {
        tracing::debug!(?target, "TLS protocols enabled for handshake");
        socket.set_enabled_protocols(&target);
    }
}

/// The outcome of probing a TLS session for key material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyMaterialProbe {
    /// Key material was derived by the handshake.
    Present,
    /// The session demonstrably holds no key material.
    Absent,
    /// The probe itself could not complete; carries the reason.
    Inconclusive(String),
}

/// Introspection over a completed TLS session.
///
/// The key-material check is a heuristic against one known implementation
/// family, not a protocol requirement, so it is guarded by an explicit
/// implementation-identity tag: sessions from other implementations are
/// never flagged.
pub trait SessionIntrospect {
    /// An identity tag for the TLS implementation behind this session.
    fn implementation(&self) -> &'static str;
    /// Probes whether the session holds usable key material.
    fn probe_key_material(&self) -> KeyMaterialProbe;
}

pub(crate) const RECOGNIZED_IMPLEMENTATION: &str = "rustls";

/// Verifies that a handshake produced real key material.
///
/// Fails with a fatal [Error::Security] only on a confirmed absence of key
/// material for the recognized implementation. An inconclusive probe is
/// logged at debug level and treated as "not verified", and the connection
/// proceeds.
pub fn verify_key_material(session: &dyn SessionIntrospect) -> Result<()> {
    if session.implementation() != RECOGNIZED_IMPLEMENTATION {
        return Ok(());
    }
    match session.probe_key_material() {
        KeyMaterialProbe::Present => Ok(()),
        KeyMaterialProbe::Absent => Err(Error::security(
            "TLS handshake completed without deriving session key material",
        )),
        KeyMaterialProbe::Inconclusive(reason) => {
            tracing::debug!(%reason, "failed to verify TLS session key material");
            Ok(())
        }
    }
}

struct RustlsSession<'a>(&'a rustls::ClientConnection);

impl SessionIntrospect for RustlsSession<'_> {
    fn implementation(&self) -> &'static str {
        RECOGNIZED_IMPLEMENTATION
    }

    fn probe_key_material(&self) -> KeyMaterialProbe {
        // Exporting keying material (RFC 5705) only succeeds when the
        // handshake derived secrets, which is exactly the property under
        // test.
        match self
            .0
            .export_keying_material([0_u8; 32], b"ks3-client session probe", None)
        {
            Ok(_) => KeyMaterialProbe::Present,
            Err(rustls::Error::HandshakeNotComplete) => KeyMaterialProbe::Absent,
            Err(e) => KeyMaterialProbe::Inconclusive(e.to_string()),
        }
    }
}

/// Parameters for establishing one connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectParams {
    /// Bound on the TCP connect; `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
}

impl ConnectParams {
    /// Creates parameters with no timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, v: Duration) -> Self {
        self.connect_timeout = Some(v);
        self
    }
}

/// The protocol-version state carried into one handshake.
#[derive(Clone, Debug)]
struct HandshakeState {
    supported: Vec<String>,
    enabled: Vec<String>,
}

impl ProtocolSocket for HandshakeState {
    fn supported_protocols(&self) -> Vec<String> {
        self.supported.clone()
    }

    fn enabled_protocols(&self) -> Vec<String> {
        self.enabled.clone()
    }

    fn set_enabled_protocols(&mut self, protocols: &[String]) {
        self.enabled = protocols.to_vec();
    }
}

fn rustls_protocol_name(version: rustls::ProtocolVersion) -> Option<&'static str> {
    match version {
        rustls::ProtocolVersion::TLSv1_3 => Some(TlsProtocol::V1_3.protocol_name()),
        rustls::ProtocolVersion::TLSv1_2 => Some(TlsProtocol::V1_2.protocol_name()),
        _ => None,
    }
}

fn rustls_supported_names() -> Vec<String> {
    rustls::ALL_VERSIONS
        .iter()
        .filter_map(|v| rustls_protocol_name(v.version))
        .map(str::to_string)
        .collect()
}

fn rustls_default_names() -> Vec<String> {
    rustls::DEFAULT_VERSIONS
        .iter()
        .filter_map(|v| rustls_protocol_name(v.version))
        .map(str::to_string)
        .collect()
}

/// Establishes hardened client connections.
///
/// Each [connect][TlsConnector::connect] runs the protocol-version
/// narrowing for that connection, performs the TCP connect and TLS
/// handshake, and then verifies the session key material. The connector
/// holds no per-connection state and may be shared across concurrent
/// connection attempts.
///
/// # Example
/// ```no_run
/// # tokio_test::block_on(async {
/// use ks3_client::tls::{ConnectParams, TlsConnector};
/// let connector = TlsConnector::new(rustls::RootCertStore::empty());
/// let channel = connector
///     .connect(
///         "ks3-cn-beijing.ksyuncs.com",
///         "203.0.113.10:443".parse()?,
///         None,
///         &ConnectParams::new().with_connect_timeout(std::time::Duration::from_secs(10)),
///     )
///     .await?;
/// assert!(channel.is_secure());
/// # anyhow::Result::<()>::Ok(()) });
/// ```
#[derive(Clone, Debug)]
pub struct TlsConnector {
    roots: Arc<rustls::RootCertStore>,
    enabled: Vec<String>,
}

impl TlsConnector {
    /// Creates a connector trusting the given roots, with the TLS stack's
    /// default protocol versions enabled.
    pub fn new(roots: rustls::RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
            enabled: rustls_default_names(),
        }
    }

    /// Overrides the protocol versions enabled before narrowing.
    pub fn with_enabled_protocols<I, T>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.enabled = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// The protocol versions a handshake from this connector may use,
    /// after narrowing.
    pub fn negotiable_protocols(&self) -> Vec<String> {
        let mut state = HandshakeState {
            supported: rustls_supported_names(),
            enabled: self.enabled.clone(),
        };
        prepare_socket(&mut state);
        state.enabled
    }

    /// Opens a TLS-secured channel to `remote`.
    ///
    /// `server_name` is used for SNI and certificate validation. An
    /// optional `local` address is bound before connecting. Connect
    /// failures propagate unchanged as [Error::Io]; a handshake that
    /// completes without key material fails fast with [Error::Security].
    pub async fn connect(
        &self,
        server_name: &str,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        params: &ConnectParams,
    ) -> Result<Channel> {
        let domain = rustls_pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::invalid_argument(format!("invalid server name {server_name}: {e}")))?;

        let mut state = HandshakeState {
            supported: rustls_supported_names(),
            enabled: self.enabled.clone(),
        };
        prepare_socket(&mut state);
        let config = self.client_config(&state.enabled);

        let tcp = self.connect_tcp(remote, local, params).await?;
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let stream = connector
            .connect(domain, tcp)
            .await
            .map_err(|e| Error::io(format!("TLS handshake with {server_name}"), e))?;

        let (_, session) = stream.get_ref();
        verify_key_material(&RustlsSession(session))?;
        Ok(Channel::Tls(Box::new(stream)))
    }

    /// Opens a plain TCP channel, for endpoints that do not use TLS.
    pub async fn connect_plain(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        params: &ConnectParams,
    ) -> Result<Channel> {
        let tcp = self.connect_tcp(remote, local, params).await?;
        Ok(Channel::Plain(tcp))
    }

    fn client_config(&self, enabled: &[String]) -> rustls::ClientConfig {
        let mut versions: Vec<&'static rustls::SupportedProtocolVersion> = enabled
            .iter()
            .filter_map(|name| {
                rustls::ALL_VERSIONS
                    .iter()
                    .find(|v| rustls_protocol_name(v.version) == Some(name.as_str()))
                    .copied()
            })
            .collect();
        if versions.is_empty() {
            versions = rustls::DEFAULT_VERSIONS.to_vec();
        }
        rustls::ClientConfig::builder_with_protocol_versions(&versions)
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth()
    }

    async fn connect_tcp(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        params: &ConnectParams,
    ) -> Result<TcpStream> {
        tracing::debug!(%remote, ?local, "connecting");
        let connect = async {
            match local {
                None => TcpStream::connect(remote).await,
                Some(local) => {
                    let socket = if remote.is_ipv4() {
                        TcpSocket::new_v4()?
                    } else {
                        TcpSocket::new_v6()?
                    };
                    socket.bind(local)?;
                    socket.connect(remote).await
                }
            }
        };
        let stream = match params.connect_timeout {
            None => connect.await,
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .unwrap_or_else(|_| {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connect timed out",
                    ))
                }),
        };
        stream.map_err(|e| Error::io(format!("connecting to {remote}"), e))
    }
}

/// A connected channel, distinguishing TLS-secured sockets from plain ones.
///
/// Downstream logic that must branch on channel security (e.g. refusing to
/// send credentials over plain sockets) can use
/// [is_secure][Channel::is_secure]; everything else reads and writes it as
/// an ordinary async stream.
#[derive(Debug)]
pub enum Channel {
    /// A TLS-secured connection with verified key material.
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
    /// A plain TCP connection.
    Plain(TcpStream),
}

impl Channel {
    /// True when the channel is protected by TLS.
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// The negotiated protocol version name, when TLS-secured.
    pub fn protocol_version(&self) -> Option<&'static str> {
        match self {
            Self::Tls(stream) => {
                let (_, session) = stream.get_ref();
                session.protocol_version().and_then(rustls_protocol_name)
            }
            Self::Plain(_) => None,
        }
    }
}

impl AsyncRead for Channel {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Channel::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
            Channel::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Channel {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Channel::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
            Channel::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Channel::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
            Channel::Plain(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Channel::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
            Channel::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn svec(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test_case(
        &["TLSv1", "TLSv1.1", "TLSv1.2", "TLSv1.3", "SSLv3"],
        &["TLSv1.2", "TLSv1"],
        &["TLSv1.3", "TLSv1.2", "TLSv1.1", "TLSv1"];
        "full overlap keeps preference order")]
    #[test_case(
        &["TLSv1.2", "TLSv1.3"],
        &["TLSv1.2"],
        &["TLSv1.3", "TLSv1.2"];
        "modern stack")]
    #[test_case(
        &[],
        &["TLSv1.2", "SSLv3"],
        &["TLSv1.2", "SSLv3"];
        "empty supported passes enabled through")]
    #[test_case(
        &["TLSv1.2"],
        &["SSLv3"],
        &["TLSv1.2", "SSLv3"];
        "unlisted enabled protocol appended last")]
    #[test_case(
        &["SSLv3"],
        &[],
        &[];
        "no overlap and nothing enabled")]
    fn preference_combinations(supported: &[&str], enabled: &[&str], want: &[&str]) {
        let got = preferred_protocols(Some(supported), Some(enabled));
        assert_eq!(got, svec(want));
    }

    #[test]
    fn preference_handles_missing_inputs() {
        let got = preferred_protocols::<&str, &str>(None, None);
        assert!(got.is_empty(), "{got:?}");
        let got = preferred_protocols::<&str, _>(None, Some(&["TLSv1.2"]));
        assert_eq!(got, svec(&["TLSv1.2"]));
        let got = preferred_protocols::<_, &str>(Some(&["TLSv1.2"]), None);
        assert_eq!(got, svec(&["TLSv1.2"]));
    }

    #[test]
    fn preference_never_duplicates() {
        let got = preferred_protocols(
            Some(&["TLSv1.2", "TLSv1.2", "TLSv1.3"]),
            Some(&["TLSv1.3", "TLSv1.2", "TLSv1.3"]),
        );
        assert_eq!(got, svec(&["TLSv1.3", "TLSv1.2"]));
    }

    #[derive(Default)]
    struct FakeSocket {
        supported: Vec<String>,
        enabled: Vec<String>,
        set_calls: usize,
    }

    impl ProtocolSocket for FakeSocket {
        fn supported_protocols(&self) -> Vec<String> {
            self.supported.clone()
        }

        fn enabled_protocols(&self) -> Vec<String> {
            self.enabled.clone()
        }

        fn set_enabled_protocols(&mut self, protocols: &[String]) {
            self.set_calls += 1;
            self.enabled = protocols.to_vec();
        }
    }

    #[test]
    fn prepare_orders_enabled_protocols() {
        let mut socket = FakeSocket {
            supported: svec(&["TLSv1", "TLSv1.1", "TLSv1.2", "TLSv1.3"]),
            enabled: svec(&["TLSv1.2", "TLSv1"]),
            ..Default::default()
        };
        prepare_socket(&mut socket);
        assert_eq!(socket.set_calls, 1);
        assert_eq!(
            socket.enabled,
            svec(&["TLSv1.3", "TLSv1.2", "TLSv1.1", "TLSv1"])
        );
    }

    #[test]
    fn prepare_with_nothing_to_enable_leaves_socket_untouched() {
        let mut socket = FakeSocket::default();
        prepare_socket(&mut socket);
        assert_eq!(socket.set_calls, 0);
        assert!(socket.enabled.is_empty());
    }

    #[test]
    fn prepare_with_empty_supported_keeps_enabled_set() {
        let mut socket = FakeSocket {
            enabled: svec(&["TLSv1.2", "SSLv3"]),
            ..Default::default()
        };
        prepare_socket(&mut socket);
        assert_eq!(socket.enabled, svec(&["TLSv1.2", "SSLv3"]));
    }

    #[test]
    fn prepare_never_disables_supported_and_enabled() {
        let mut socket = FakeSocket {
            supported: svec(&["TLSv1.2", "TLSv1.3"]),
            enabled: svec(&["TLSv1.2"]),
            ..Default::default()
        };
        prepare_socket(&mut socket);
        assert!(socket.enabled.iter().any(|p| p == "TLSv1.2"));
    }

    struct FakeSession {
        implementation: &'static str,
        probe: KeyMaterialProbe,
    }

    impl SessionIntrospect for FakeSession {
        fn implementation(&self) -> &'static str {
            self.implementation
        }

        fn probe_key_material(&self) -> KeyMaterialProbe {
            self.probe.clone()
        }
    }

    #[test]
    fn verification_fails_only_for_recognized_and_absent() {
        let err = verify_key_material(&FakeSession {
            implementation: RECOGNIZED_IMPLEMENTATION,
            probe: KeyMaterialProbe::Absent,
        })
        .unwrap_err();
        assert!(err.is_security(), "{err:?}");

        verify_key_material(&FakeSession {
            implementation: RECOGNIZED_IMPLEMENTATION,
            probe: KeyMaterialProbe::Present,
        })
        .unwrap();

        verify_key_material(&FakeSession {
            implementation: RECOGNIZED_IMPLEMENTATION,
            probe: KeyMaterialProbe::Inconclusive("access denied".to_string()),
        })
        .unwrap();

        // Unknown implementations are never flagged, even on Absent.
        verify_key_material(&FakeSession {
            implementation: "openssl",
            probe: KeyMaterialProbe::Absent,
        })
        .unwrap();
    }

    #[test]
    fn connector_narrows_to_modern_versions() {
        let connector = TlsConnector::new(rustls::RootCertStore::empty());
        let got = connector.negotiable_protocols();
        assert_eq!(got, svec(&["TLSv1.3", "TLSv1.2"]));
    }

    #[test]
    fn connector_keeps_an_explicit_narrower_choice() {
        let connector = TlsConnector::new(rustls::RootCertStore::empty())
            .with_enabled_protocols(["TLSv1.2"]);
        let got = connector.negotiable_protocols();
        // Narrowing reorders by preference, it does not drop TLSv1.2.
        assert!(got.iter().any(|p| p == "TLSv1.2"), "{got:?}");
    }

    #[tokio::test]
    async fn invalid_server_name_fails_before_any_io() {
        let connector = TlsConnector::new(rustls::RootCertStore::empty());
        let err = connector
            .connect(
                "not a hostname",
                "127.0.0.1:1".parse().unwrap(),
                None,
                &ConnectParams::new(),
            )
            .await
            .unwrap_err();
        assert!(err.is_invalid_argument(), "{err:?}");
    }

    #[tokio::test]
    async fn plain_channel_is_not_secure() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let remote = listener.local_addr()?;
        let connector = TlsConnector::new(rustls::RootCertStore::empty());
        let channel = connector
            .connect_plain(remote, None, &ConnectParams::new())
            .await?;
        assert!(!channel.is_secure());
        assert_eq!(channel.protocol_version(), None);
        Ok(())
    }

    #[tokio::test]
    async fn connect_failures_propagate_as_io() -> anyhow::Result<()> {
        // Bind a listener and drop it so the port is (very likely) closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let remote = listener.local_addr()?;
        drop(listener);
        let connector = TlsConnector::new(rustls::RootCertStore::empty());
        let err = connector
            .connect_plain(remote, None, &ConnectParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }), "{err:?}");
        Ok(())
    }
}
