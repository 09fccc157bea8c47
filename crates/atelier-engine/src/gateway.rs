use std::time::Duration;

use atelier_contracts::store::KvStore;
use atelier_contracts::usage::UsageCounter;
use atelier_contracts::wire::proxy::{ProxyRequest, ProxyResponse, GENERATE_PATH, SOURCE_HEADER};
use reqwest::blocking::Client as HttpClient;

use crate::composer::{clamp_count, GenerationRequest};
use crate::error::{clip, GenerationError};
use crate::transport::{send_error, UpstreamTransport};

const LABEL: &str = "Generation proxy";
const PROXY_UNREACHABLE: &str = "Could not connect to the generation proxy.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// A user key is present; calls go straight to the upstream API.
    Direct,
    /// No user key; one call goes to the proxy holding the shared key.
    Proxy,
}

impl GenerationMode {
    pub fn for_credential(credential: Option<&str>) -> Self {
        match credential.map(str::trim) {
            Some(key) if !key.is_empty() => GenerationMode::Direct,
            _ => GenerationMode::Proxy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationMode::Direct => "direct",
            GenerationMode::Proxy => "proxy",
        }
    }
}

/// Client side of `POST /api/generate`.
pub trait ProxyClient: Send + Sync {
    fn generate(&self, request: &ProxyRequest) -> Result<ProxyResponse, GenerationError>;
}

pub struct HttpProxyClient {
    endpoint: String,
    timeout: Duration,
    http: HttpClient,
}

impl HttpProxyClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            endpoint: format!("{}{GENERATE_PATH}", base_url.trim().trim_end_matches('/')),
            timeout,
            http: HttpClient::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ProxyClient for HttpProxyClient {
    fn generate(&self, request: &ProxyRequest) -> Result<ProxyResponse, GenerationError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(SOURCE_HEADER, "atelier")
            .timeout(self.timeout)
            .json(request)
            .send()
            .map_err(|err| send_error(LABEL, err))?;
        let status = response.status();
        let body = response.text().map_err(|err| send_error(LABEL, err))?;
        let parsed = serde_json::from_str::<ProxyResponse>(&body);
        if status.is_success() {
            return parsed.map_err(|err| {
                GenerationError::transport_with(
                    PROXY_UNREACHABLE,
                    &anyhow::Error::new(err).context("generation proxy returned invalid JSON"),
                )
            });
        }
        // Non-2xx without an `{error}` body did not come from the proxy itself.
        match parsed.ok().and_then(|reply| reply.error) {
            Some(message) if !message.trim().is_empty() => {
                Err(GenerationError::UpstreamRejection(message))
            }
            _ => Err(GenerationError::transport_with(
                PROXY_UNREACHABLE,
                &anyhow::anyhow!(
                    "generation proxy answered {status} without an error message: {}",
                    clip(&body, 200)
                ),
            )),
        }
    }
}

/// Routes a composed request to the upstream API (direct mode) or the proxy
/// (proxy mode) and normalizes both into `data:image/png;base64,` URIs.
///
/// Direct mode never touches the usage counter. Proxy mode adds exactly one
/// per successful call whatever `count` was.
pub struct GenerationGateway {
    direct: Box<dyn UpstreamTransport>,
    proxy: Box<dyn ProxyClient>,
}

impl GenerationGateway {
    pub fn new(direct: Box<dyn UpstreamTransport>, proxy: Box<dyn ProxyClient>) -> Self {
        Self { direct, proxy }
    }

    pub fn generate<S: KvStore>(
        &self,
        request: &GenerationRequest,
        credential: Option<&str>,
        usage: &mut UsageCounter<S>,
    ) -> Result<Vec<String>, GenerationError> {
        match (GenerationMode::for_credential(credential), credential) {
            (GenerationMode::Direct, Some(key)) => self.generate_direct(request, key.trim()),
            _ => self.generate_via_proxy(request, usage),
        }
    }

    /// `count` sequential upstream calls, clamped to 1..=4. Each must yield
    /// images or the whole generation fails with nothing returned.
    fn generate_direct(
        &self,
        request: &GenerationRequest,
        credential: &str,
    ) -> Result<Vec<String>, GenerationError> {
        let mut images = Vec::new();
        for _ in 0..clamp_count(request.count) {
            let batch = self.direct.generate(credential, request)?;
            images.extend(batch.iter().map(|inline| inline.to_png_data_uri()));
        }
        Ok(images)
    }

    fn generate_via_proxy<S: KvStore>(
        &self,
        request: &GenerationRequest,
        usage: &mut UsageCounter<S>,
    ) -> Result<Vec<String>, GenerationError> {
        let reply = self.proxy.generate(&request.to_proxy_request())?;
        if let Some(message) = reply.error.filter(|message| !message.trim().is_empty()) {
            return Err(GenerationError::UpstreamRejection(message));
        }
        let Some(images) = reply.images else {
            return Err(GenerationError::Transport {
                message: PROXY_UNREACHABLE.to_string(),
                detail: "proxy reply carried neither images nor error".to_string(),
            });
        };
        if images.is_empty() {
            return Err(GenerationError::UpstreamRejection(
                "The generation proxy returned no images.".to_string(),
            ));
        }
        usage
            .increment()
            .map_err(|err| GenerationError::storage(&err))?;
        Ok(images)
    }
}


#[cfg(test)]
mod tests {
    use atelier_contracts::store::MemoryKvStore;
    use atelier_contracts::usage::UsageCounter;
    use atelier_contracts::wire::gemini::InlineData;
    use atelier_contracts::wire::proxy::ProxyResponse;
    use atelier_contracts::wire::AspectRatio;

    use std::time::Duration;

    use super::test_support::{ScriptedProxy, ScriptedTransport};
    use super::{GenerationGateway, GenerationMode, HttpProxyClient, ProxyClient, PROXY_UNREACHABLE};
    use crate::composer::{GenerationRequest, ReferenceImages};
    use crate::error::GenerationError;
    use crate::transport::stub_http::serve_once;

    fn request(count: u32) -> GenerationRequest {
        GenerationRequest::compose(
            ReferenceImages {
                character: Some("data:image/png;base64,Q0g=".to_string()),
                outfit: Some("data:image/png;base64,T1U=".to_string()),
                context: None,
            },
            "scene",
            AspectRatio::Portrait,
            count,
        )
        .unwrap_or_else(|err| panic!("compose failed: {err}"))
    }

    fn gateway(direct: &ScriptedTransport, proxy: &ScriptedProxy) -> GenerationGateway {
        GenerationGateway::new(Box::new(direct.clone()), Box::new(proxy.clone()))
    }

    #[test]
    fn mode_follows_credential_presence() {
        assert_eq!(GenerationMode::for_credential(Some("k")), GenerationMode::Direct);
        assert_eq!(GenerationMode::for_credential(Some("  ")), GenerationMode::Proxy);
        assert_eq!(GenerationMode::for_credential(None), GenerationMode::Proxy);
    }

    #[test]
    fn direct_mode_makes_count_calls_and_concatenates_in_order() -> anyhow::Result<()> {
        let direct = ScriptedTransport::with(vec![
            Ok(vec![InlineData::png("A1")]),
            Ok(vec![InlineData::png("B1"), InlineData::png("B2")]),
            Ok(vec![InlineData::png("C1")]),
        ]);
        let proxy = ScriptedProxy::default();
        let mut usage = UsageCounter::new(MemoryKvStore::new());

        let images = gateway(&direct, &proxy).generate(&request(3), Some("user-key"), &mut usage)?;

        assert_eq!(direct.call_count(), 3);
        assert_eq!(proxy.call_count(), 0);
        assert_eq!(
            images,
            vec![
                "data:image/png;base64,A1",
                "data:image/png;base64,B1",
                "data:image/png;base64,B2",
                "data:image/png;base64,C1",
            ]
        );
        assert_eq!(usage.count(), 0);
        let calls = direct.calls.lock().map(|rows| rows.clone()).unwrap_or_default();
        assert!(calls.iter().all(|(key, _)| key == "user-key"));
        Ok(())
    }

    #[test]
    fn direct_mode_failure_returns_nothing() {
        let direct = ScriptedTransport::with(vec![
            Ok(vec![InlineData::png("A1")]),
            Err(GenerationError::UpstreamRejection(
                "Gemini returned no image (finish reason: IMAGE_SAFETY)".to_string(),
            )),
            Ok(vec![InlineData::png("C1")]),
        ]);
        let proxy = ScriptedProxy::default();
        let mut usage = UsageCounter::new(MemoryKvStore::new());

        let result = gateway(&direct, &proxy).generate(&request(3), Some("user-key"), &mut usage);

        match result {
            Err(GenerationError::UpstreamRejection(message)) => {
                assert!(message.contains("IMAGE_SAFETY"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(direct.call_count(), 2);
    }

    #[test]
    fn proxy_mode_is_one_call_and_one_increment_for_any_count() -> anyhow::Result<()> {
        let direct = ScriptedTransport::default();
        let proxy = ScriptedProxy::with(vec![Ok(ProxyResponse::images(vec![
            "data:image/png;base64,P1".to_string(),
            "data:image/png;base64,P2".to_string(),
            "data:image/png;base64,P3".to_string(),
            "data:image/png;base64,P4".to_string(),
        ]))]);
        let mut usage = UsageCounter::new(MemoryKvStore::new());

        let images = gateway(&direct, &proxy).generate(&request(4), None, &mut usage)?;

        assert_eq!(images.len(), 4);
        assert_eq!(proxy.call_count(), 1);
        assert_eq!(direct.call_count(), 0);
        assert_eq!(usage.count(), 1);
        let sent = proxy
            .requests
            .lock()
            .ok()
            .and_then(|rows| rows.first().cloned())
            .unwrap_or_default();
        assert_eq!(sent.count, Some(4));
        assert_eq!(sent.aspect_ratio, Some(AspectRatio::Portrait));
        assert!(sent.final_prompt.is_some());
        Ok(())
    }

    #[test]
    fn proxy_error_field_is_surfaced_without_increment() {
        let direct = ScriptedTransport::default();
        let proxy = ScriptedProxy::with(vec![Ok(ProxyResponse::error("Gemini request failed (429): quota"))]);
        let mut usage = UsageCounter::new(MemoryKvStore::new());

        let err = gateway(&direct, &proxy)
            .generate(&request(1), None, &mut usage)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();

        assert_eq!(err, "Gemini request failed (429): quota");
        assert_eq!(usage.count(), 0);
    }

    #[test]
    fn proxy_reply_without_images_is_an_error() {
        let direct = ScriptedTransport::default();
        let proxy = ScriptedProxy::with(vec![
            Ok(ProxyResponse::default()),
            Ok(ProxyResponse::images(Vec::new())),
        ]);
        let mut usage = UsageCounter::new(MemoryKvStore::new());
        let gateway = gateway(&direct, &proxy);

        assert!(matches!(
            gateway.generate(&request(1), None, &mut usage),
            Err(GenerationError::Transport { .. })
        ));
        assert!(matches!(
            gateway.generate(&request(1), None, &mut usage),
            Err(GenerationError::UpstreamRejection(_))
        ));
        assert_eq!(usage.count(), 0);
    }

    #[test]
    fn direct_mode_clamps_an_oversized_count() -> anyhow::Result<()> {
        let direct = ScriptedTransport::with(
            (0..6).map(|_| Ok(vec![InlineData::png("X")])).collect(),
        );
        let proxy = ScriptedProxy::default();
        let mut usage = UsageCounter::new(MemoryKvStore::new());
        let mut oversized = request(1);
        oversized.count = 50;

        let images = gateway(&direct, &proxy).generate(&oversized, Some("user-key"), &mut usage)?;

        assert_eq!(direct.call_count(), 4);
        assert_eq!(images.len(), 4);

        oversized.count = 0;
        gateway(&direct, &proxy).generate(&oversized, Some("user-key"), &mut usage)?;
        assert_eq!(direct.call_count(), 5);
        Ok(())
    }

    #[test]
    fn http_proxy_error_reply_is_a_rejection() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "500 Internal Server Error",
            "application/json",
            r#"{"error":"Gemini returned no image (finish reason: IMAGE_SAFETY)"}"#,
        )?;
        let client = HttpProxyClient::new(&format!("{base}/"), Duration::from_secs(5));

        let result = client.generate(&request(2).to_proxy_request());

        match result {
            Err(GenerationError::UpstreamRejection(message)) => {
                assert_eq!(message, "Gemini returned no image (finish reason: IMAGE_SAFETY)");
            }
            other => panic!("unexpected {other:?}"),
        }
        let raw = server.join().unwrap_or_default();
        assert!(raw.starts_with("POST /api/generate "), "{raw}");
        assert!(raw.to_ascii_lowercase().contains("x-source-request: atelier"), "{raw}");
        assert!(raw.contains(r#""count":2"#), "{raw}");
        Ok(())
    }

    #[test]
    fn http_proxy_non_json_failure_is_a_transport_error() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "502 Bad Gateway",
            "text/html",
            "<html><body>502 Bad Gateway</body></html>",
        )?;
        let client = HttpProxyClient::new(&base, Duration::from_secs(5));

        let result = client.generate(&request(1).to_proxy_request());

        match result {
            Err(err @ GenerationError::Transport { .. }) => {
                assert_eq!(err.to_string(), PROXY_UNREACHABLE);
                assert_eq!(err.kind(), "transport");
                assert!(err.log_text().contains("502 Bad Gateway"), "{}", err.log_text());
            }
            other => panic!("unexpected {other:?}"),
        }
        server.join().unwrap_or_default();
        Ok(())
    }

    #[test]
    fn http_proxy_images_reply_is_returned() -> anyhow::Result<()> {
        let (base, server) = serve_once(
            "200 OK",
            "application/json",
            r#"{"images":["data:image/png;base64,P1","data:image/png;base64,P2"]}"#,
        )?;
        let client = HttpProxyClient::new(&base, Duration::from_secs(5));

        let reply = client.generate(&request(2).to_proxy_request())?;

        assert_eq!(
            reply,
            ProxyResponse::images(vec![
                "data:image/png;base64,P1".to_string(),
                "data:image/png;base64,P2".to_string(),
            ])
        );
        server.join().unwrap_or_default();
        Ok(())
    }
}
