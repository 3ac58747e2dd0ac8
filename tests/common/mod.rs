//! Shared collaborators and helpers for integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use front_proxy::certs::{CertificateError, CertificateHandle, CertificateProvider};
use front_proxy::config::RoutingConfig;
use front_proxy::error::ProxyError;
use front_proxy::forward::{
    AgentForwarder, DirectFallback, DirectForwarder, ForwardError, ForwardOutcome, ForwardRequest,
    LocalResponse, LoopbackClient, ResponseSink,
};
use front_proxy::http::{Collaborators, DispatchLimits, Dispatcher, Headers};
use front_proxy::net::ClientConnection;
use front_proxy::routing::{LocalAddressClassifier, LocalNames, RoutingRuleSet};

pub const CANNED_RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok";

/// Loopback client that records calls and answers 200 "local".
#[derive(Default)]
pub struct MockLoopback {
    pub calls: Mutex<Vec<(Method, String, Bytes)>>,
    pub fail: bool,
}

#[async_trait]
impl LoopbackClient for MockLoopback {
    async fn request(
        &self,
        method: &Method,
        path: &str,
        _headers: &Headers,
        payload: Bytes,
    ) -> Result<LocalResponse, ForwardError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.clone(), path.to_string(), payload));
        if self.fail {
            return Err(ForwardError::Upstream("loopback down".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("5"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));
        Ok(LocalResponse {
            status: 200,
            headers,
            body: Bytes::from_static(b"local"),
        })
    }
}

/// Direct forwarder that records requests and writes a canned response.
#[derive(Default)]
pub struct MockDirect {
    pub requests: Mutex<Vec<ForwardRequest>>,
    pub fail: bool,
}

#[async_trait]
impl DirectForwarder for MockDirect {
    async fn handle(&self, request: &ForwardRequest, sink: ResponseSink<'_>) -> ForwardOutcome {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail {
            return ForwardOutcome::Failed;
        }
        let _ = sink.write_all(CANNED_RESPONSE).await;
        ForwardOutcome::Ok
    }
}

/// Agent forwarder that records requests.
#[derive(Default)]
pub struct MockAgent {
    pub requests: Mutex<Vec<ForwardRequest>>,
    pub fail: bool,
    /// Hand every request to the direct fallback instead.
    pub use_fallback: bool,
}

#[async_trait]
impl AgentForwarder for MockAgent {
    async fn handle(
        &self,
        request: &ForwardRequest,
        sink: ResponseSink<'_>,
        fallback: &DirectFallback<'_>,
    ) -> ForwardOutcome {
        self.requests.lock().unwrap().push(request.clone());
        if self.use_fallback {
            return fallback.forward(request, sink).await;
        }
        if self.fail {
            return ForwardOutcome::Failed;
        }
        let _ = sink.write_all(CANNED_RESPONSE).await;
        ForwardOutcome::Ok
    }
}

/// Throwaway CA issuing leaf certificates.
pub struct TestCa {
    cert: rcgen::Certificate,
    key: rcgen::KeyPair,
}

impl TestCa {
    pub fn new() -> Self {
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "front-proxy test CA");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn root(&self) -> CertificateDer<'static> {
        self.cert.der().clone()
    }

    /// Server context for `host`, signed by this CA.
    pub fn server_context(&self, host: &str) -> CertificateHandle {
        let params = rcgen::CertificateParams::new(vec![host.to_string()]).unwrap();
        let key = rcgen::KeyPair::generate().unwrap();
        let leaf = params.signed_by(&key, &self.cert, &self.key).unwrap();
        let private = PrivateKeyDer::Pkcs8(key.serialize_der().into());
        let config =
            front_proxy::net::tls::server_config(vec![leaf.der().clone(), self.root()], private)
                .unwrap();
        Arc::new(config)
    }

    /// Client context trusting only this CA.
    pub fn client_config(&self) -> Arc<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        roots.add(self.root()).unwrap();
        let config = rustls::ClientConfig::builder_with_provider(front_proxy::net::tls::crypto_provider())
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Arc::new(config)
    }
}

/// Certificate provider that serves one context and records lookups.
pub struct RecordingCerts {
    context: CertificateHandle,
    pub calls: Mutex<Vec<(String, bool)>>,
}

impl RecordingCerts {
    pub fn new(context: CertificateHandle) -> Self {
        Self {
            context,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl CertificateProvider for RecordingCerts {
    fn get_certificate(&self, host: &str, full_domain: bool) -> Result<CertificateHandle, CertificateError> {
        self.calls.lock().unwrap().push((host.to_string(), full_domain));
        Ok(self.context.clone())
    }
}

/// Mocks wired into a collaborator set, kept so tests can inspect them.
pub struct Harness {
    pub loopback: Arc<MockLoopback>,
    pub direct: Arc<MockDirect>,
    pub agent: Arc<MockAgent>,
    pub certs: Arc<RecordingCerts>,
    pub ca: TestCa,
    pub rules: RoutingConfig,
    pub limits: DispatchLimits,
}

impl Harness {
    pub fn new() -> Self {
        let ca = TestCa::new();
        let certs = Arc::new(RecordingCerts::new(ca.server_context("www.google.com")));
        Self {
            loopback: Arc::new(MockLoopback::default()),
            direct: Arc::new(MockDirect::default()),
            agent: Arc::new(MockAgent::default()),
            certs,
            ca,
            rules: RoutingConfig::default(),
            limits: DispatchLimits::default(),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            loopback: self.loopback.clone(),
            direct: self.direct.clone(),
            agent: self.agent.clone(),
            certs: self.certs.clone(),
        }
    }

    pub fn classifier() -> LocalAddressClassifier {
        LocalAddressClassifier::with_names(LocalNames::new(["localhost", "devbox"]))
    }

    /// Serve one in-memory connection; returns the client end and the task.
    pub fn connect(&self) -> (DuplexStream, JoinHandle<Result<(), ProxyError>>) {
        self.connect_with(self.collaborators())
    }

    /// Like [`Harness::connect`] but with caller-supplied backends.
    pub fn connect_with(
        &self,
        collaborators: Collaborators,
    ) -> (DuplexStream, JoinHandle<Result<(), ProxyError>>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let dispatcher = Dispatcher::new(
            Arc::new(RoutingRuleSet::from_config(&self.rules)),
            Arc::new(Self::classifier()),
            collaborators,
            self.limits.clone(),
        );
        let task = tokio::spawn(async move { dispatcher.serve(ClientConnection::new(server)).await });
        (client, task)
    }
}

/// Read one `Content-Length` framed response, returning head and body.
pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> (String, Vec<u8>) {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = reader.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "connection closed mid-head: {:?}", String::from_utf8_lossy(&head));
        head.push(byte[0]);
    }
    let head = String::from_utf8(head).unwrap();
    let length = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().unwrap())
        })
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await.unwrap();
    (head, body)
}

/// Assert the peer closed the connection without sending anything more.
pub async fn assert_closed<R: AsyncRead + Unpin>(reader: &mut R) {
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty(), "unexpected bytes: {:?}", String::from_utf8_lossy(&rest));
}
