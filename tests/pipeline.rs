//! Integration tests for petition-ocr.
//!
//! Every vendor exchange goes through a scripted [`HttpTransport`], so these
//! run offline and deterministically. Rate-limit, pacing and concurrency
//! tests use tokio's paused clock, so backoff and latency cost no wall time.
//!
//! The one test that needs libpdfium is gated on `PDFIUM_LIB_PATH`.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use petition_ocr::provider::transport::Auth;
use petition_ocr::{
    BatchOrchestrator, CredentialCipher, CredentialSource, CredentialStore, CropConfig,
    EncodedImage, FileCredentialStore, HttpReply, HttpTransport, JobRequest, JsonFileSink,
    MatchingOutcome, MemorySink, NoopProgressCallback, PetitionError, PetitionJob, PipelineConfig,
    ProviderCredential, ProviderGateway, ProviderKind, ProviderSettings, ResultSink,
    RpcMatchingProcedure, SourceFile, TransportError, VendorRequest,
};
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};
use zeroize::Zeroizing;

// ── Test helpers ─────────────────────────────────────────────────────────────

type Responder = dyn Fn(&VendorRequest, usize) -> HttpReply + Send + Sync;

/// Answers each request with whatever the responder returns for it.
///
/// The responder sees the request and the 0-based call number; every request
/// is also recorded as `(url, body)` for later inspection.
struct ScriptedTransport {
    responder: Box<Responder>,
    calls: AtomicUsize,
    seen: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    fn new(responder: impl Fn(&VendorRequest, usize) -> HttpReply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn seen(&self) -> Vec<(String, Value)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post_json(&self, request: &VendorRequest) -> Result<HttpReply, TransportError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push((request.url.clone(), request.body.clone()));
        Ok((self.responder)(request, n))
    }
}

/// An OpenAI/Mistral-shaped 200 whose content is `content`.
fn chat_reply(content: &str) -> HttpReply {
    HttpReply {
        status: 200,
        body: json!({"choices": [{"message": {"content": content}}]}).to_string(),
    }
}

fn status(code: u16) -> HttpReply {
    HttpReply {
        status: code,
        body: format!("{{\"error\": \"status {code}\"}}"),
    }
}

/// The image data URL a chat-completion request carries.
fn image_url(request: &VendorRequest) -> String {
    request.body["messages"][0]["content"][1]["image_url"]["url"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// Encoded images whose payload is just `img<i>`, enough to route on.
fn fake_images(n: usize) -> Vec<EncodedImage> {
    (1..=n)
        .map(|i| EncodedImage {
            name: format!("sheet_page{i}.png"),
            page_index: i,
            data: format!("img{i}"),
            mime_type: "image/png".into(),
        })
        .collect()
}

/// Which fake image a request is for (1-based).
fn image_number(request: &VendorRequest) -> usize {
    let url = image_url(request);
    url.rsplit("img")
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

fn orchestrator(
    kind: ProviderKind,
    transport: Arc<dyn HttpTransport>,
    batch_size: usize,
) -> BatchOrchestrator {
    let gateway = ProviderGateway::new(kind, ProviderSettings::defaults_for(kind), transport);
    BatchOrchestrator::new(Arc::new(gateway), batch_size).unwrap()
}

/// Start or end of one vendor call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Start,
    End,
}

/// Holds each request for `latency(image)` on tokio's clock and logs when
/// every call starts and ends, plus the peak number in flight.
struct TrackingTransport {
    latency: fn(usize) -> Duration,
    origin: tokio::time::Instant,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    events: Mutex<Vec<(Edge, usize, Duration)>>,
}

impl TrackingTransport {
    fn new(latency: fn(usize) -> Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            origin: tokio::time::Instant::now(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        })
    }

    fn events(&self) -> Vec<(Edge, usize, Duration)> {
        self.events.lock().unwrap().clone()
    }

    /// Position of `edge` for `image` in the event log.
    fn position(&self, edge: Edge, image: usize) -> usize {
        self.events()
            .iter()
            .position(|(e, n, _)| *e == edge && *n == image)
            .unwrap()
    }
}

#[async_trait]
impl HttpTransport for TrackingTransport {
    async fn post_json(&self, request: &VendorRequest) -> Result<HttpReply, TransportError> {
        let n = image_number(request);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push((Edge::Start, n, self.origin.elapsed()));

        tokio::time::sleep((self.latency)(n)).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push((Edge::End, n, self.origin.elapsed()));
        Ok(chat_reply(&format!(r#"[{{"name": "Signer {n}"}}]"#)))
    }
}

/// Never gets a status back.
struct UnreachableTransport {
    calls: AtomicUsize,
}

#[async_trait]
impl HttpTransport for UnreachableTransport {
    async fn post_json(&self, _request: &VendorRequest) -> Result<HttpReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(TransportError("connection refused".into()))
    }
}

fn gateway(kind: ProviderKind, transport: Arc<dyn HttpTransport>) -> ProviderGateway {
    ProviderGateway::new(kind, ProviderSettings::defaults_for(kind), transport)
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |_, y| {
        if y % 2 == 0 {
            Rgb([255, 255, 255])
        } else {
            Rgb([20, 40, 60])
        }
    });
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn cropped_config() -> PipelineConfig {
    PipelineConfig::builder()
        .crop(CropConfig::new(0.25, 0.75).unwrap())
        .batch_size(2)
        .build()
        .unwrap()
}

// ── BatchOrchestrator ────────────────────────────────────────────────────────

#[tokio::test]
async fn progress_fires_once_per_chunk_and_ends_at_one() {
    let transport = ScriptedTransport::new(|_, _| chat_reply(r#"[{"name": "Ada"}]"#));
    let fractions = Mutex::new(Vec::new());
    let cb = |fraction: f64, chunk: usize, total: usize| {
        fractions.lock().unwrap().push((fraction, chunk, total));
    };

    let out = orchestrator(ProviderKind::OpenAi, transport.clone(), 2)
        .run(&fake_images(5), "read", &ProviderCredential::new("k"), &cb)
        .await;
    let out = assert_ok!(out);

    assert_eq!(out.records.len(), 5);
    assert_eq!(transport.calls(), 5);

    let fractions = fractions.into_inner().unwrap();
    assert_eq!(fractions.len(), 3);
    assert!(fractions.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(fractions.last().map(|f| f.0), Some(1.0));
    let chunks: Vec<usize> = fractions.iter().map(|f| f.1).collect();
    assert_eq!(chunks, vec![1, 2, 3]);
    assert!(fractions.iter().all(|f| f.2 == 3));
}

#[tokio::test]
async fn one_failing_image_does_not_affect_siblings() {
    let transport = ScriptedTransport::new(|req, _| match image_number(req) {
        2 => status(500),
        n => chat_reply(&format!(r#"[{{"name": "Signer {n}"}}]"#)),
    });

    let out = orchestrator(ProviderKind::OpenAi, transport, 10)
        .run(&fake_images(3), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);

    let pages: Vec<usize> = out.records.iter().map(|r| r.page_number).collect();
    assert_eq!(pages, vec![1, 3]);
    assert_eq!(out.records[1].record.name.as_deref(), Some("Signer 3"));

    assert_eq!(out.images.len(), 3);
    assert!(out.images[0].error.is_none());
    assert!(out.images[1].error.is_some());
    assert_eq!(out.images[1].record_count, 0);
    assert_eq!(out.failed_images(), 1);
}

#[tokio::test]
async fn page_and_row_numbers_follow_input_order() {
    // Image i answers with i rows.
    let transport = ScriptedTransport::new(|req, _| {
        let n = image_number(req);
        let rows: Vec<Value> = (1..=n).map(|r| json!({"name": format!("p{n}r{r}")})).collect();
        chat_reply(&Value::Array(rows).to_string())
    });

    let out = orchestrator(ProviderKind::OpenAi, transport, 2)
        .run(&fake_images(3), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);

    let numbering: Vec<(usize, usize)> = out
        .records
        .iter()
        .map(|r| (r.page_number, r.row_number))
        .collect();
    assert_eq!(numbering, vec![(1, 1), (2, 1), (2, 2), (3, 1), (3, 2), (3, 3)]);
    assert_eq!(out.records[3].filename, "sheet_page3.png");
    assert_eq!(out.records[3].record.name.as_deref(), Some("p3r1"));
}

#[tokio::test(start_paused = true)]
async fn mistral_rides_out_two_rate_limits() {
    let transport = ScriptedTransport::new(|_, n| {
        if n < 2 {
            status(429)
        } else {
            chat_reply(r#"[{"name": "Grace"}]"#)
        }
    });
    let start = tokio::time::Instant::now();

    let out = orchestrator(ProviderKind::Mistral, transport.clone(), 10)
        .run(&fake_images(1), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);

    assert_eq!(transport.calls(), 3);
    assert_eq!(out.records.len(), 1);
    let waited = start.elapsed();
    assert!(waited >= Duration::from_secs(15), "waited {waited:?}");
    assert!(waited < Duration::from_secs(16), "waited {waited:?}");
}

#[tokio::test(start_paused = true)]
async fn mistral_exhausted_retries_stop_the_run() {
    let transport = ScriptedTransport::new(|_, _| status(429));

    let result = orchestrator(ProviderKind::Mistral, transport.clone(), 10)
        .run(&fake_images(1), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let err = assert_err!(result);

    assert!(matches!(
        err,
        PetitionError::RetriesExhausted {
            provider: ProviderKind::Mistral,
            attempts: 3,
            ..
        }
    ));
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn openai_rate_limit_degrades_the_page() {
    let transport = ScriptedTransport::new(|_, _| status(429));

    let out = orchestrator(ProviderKind::OpenAi, transport.clone(), 10)
        .run(&fake_images(1), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);

    assert_eq!(transport.calls(), 1);
    assert!(out.records.is_empty());
    assert_eq!(out.failed_images(), 1);
}

#[tokio::test]
async fn mistral_reply_wrapped_in_code_fence_is_parsed() {
    let transport = ScriptedTransport::new(|_, _| {
        chat_reply("Here you go:\n```json\n[{\"name\": \"Ada\", \"ward\": \"7\"}]\n```")
    });

    let out = orchestrator(ProviderKind::Mistral, transport, 10)
        .run(&fake_images(1), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);

    assert_eq!(out.records.len(), 1);
    assert_eq!(out.records[0].record.name.as_deref(), Some("Ada"));
    assert_eq!(out.records[0].record.ward.as_deref(), Some("7"));
}

#[tokio::test]
async fn gemini_request_uses_query_key_and_inline_data() {
    let transport = ScriptedTransport::new(|req, _| {
        assert!(matches!(&req.auth, Auth::QueryKey { name: "key", value } if value.as_str() == "g-key"));
        HttpReply {
            status: 200,
            body: json!({
                "candidates": [{"content": {"parts": [{"text": "[{\"name\": \"Lin\"}]"}]}}]
            })
            .to_string(),
        }
    });

    let out = orchestrator(ProviderKind::Gemini, transport.clone(), 10)
        .run(&fake_images(1), "read", &ProviderCredential::new("g-key"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);
    assert_eq!(out.records[0].record.name.as_deref(), Some("Lin"));

    let (url, body) = transport.seen().remove(0);
    assert!(url.ends_with("/gemini-2.0-flash:generateContent"), "{url}");
    assert!(!url.contains("g-key"));
    assert_eq!(body["contents"][0]["parts"][1]["inline_data"]["data"], "img1");
}

#[tokio::test(start_paused = true)]
async fn chunks_run_concurrently_inside_and_strictly_in_sequence() {
    // Later images answer sooner, so completion order inside a chunk is reversed.
    let transport = TrackingTransport::new(|n| Duration::from_millis(100 * (6 - n as u64)));

    let out = orchestrator(ProviderKind::OpenAi, transport.clone(), 2)
        .run(&fake_images(5), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);

    assert_eq!(transport.max_in_flight.load(Ordering::SeqCst), 2);
    let pages: Vec<usize> = out.records.iter().map(|r| r.page_number).collect();
    assert_eq!(pages, vec![1, 2, 3, 4, 5]);

    // Every request of a chunk is dispatched before any of them resolves.
    for chunk in [[1, 2], [3, 4]] {
        let last_start = chunk.iter().map(|&n| transport.position(Edge::Start, n)).max();
        let first_end = chunk.iter().map(|&n| transport.position(Edge::End, n)).min();
        assert!(last_start < first_end, "chunk {chunk:?}: {:?}", transport.events());
    }

    // The next chunk starts only after the previous one fully resolved.
    for (done, next) in [([1, 2], 3), ([3, 4], 5)] {
        let next_start = transport.position(Edge::Start, next);
        for n in done {
            assert!(
                transport.position(Edge::End, n) < next_start,
                "image {next} started before image {n} ended: {:?}",
                transport.events()
            );
        }
    }
}

#[tokio::test(start_paused = true)]
async fn pacing_staggers_dispatch_inside_a_chunk() {
    let transport = TrackingTransport::new(|_| Duration::from_millis(300));
    let mut settings = ProviderSettings::defaults_for(ProviderKind::OpenAi);
    settings.pacing = Some(Duration::from_secs(1));
    let gateway = ProviderGateway::new(ProviderKind::OpenAi, settings, transport.clone());
    let orchestrator = BatchOrchestrator::new(Arc::new(gateway), 3).unwrap();
    let start = tokio::time::Instant::now();

    let out = orchestrator
        .run(&fake_images(3), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);
    assert_eq!(out.records.len(), 3);

    let starts: Vec<(usize, u128)> = transport
        .events()
        .into_iter()
        .filter(|(edge, _, _)| *edge == Edge::Start)
        .map(|(_, n, at)| (n, at.as_millis()))
        .collect();
    assert_eq!(starts, vec![(1, 0), (2, 1000), (3, 2000)]);

    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(2300), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(2400), "elapsed {elapsed:?}");
}

// ── ProviderGateway ──────────────────────────────────────────────────────────

#[tokio::test]
async fn unparseable_answer_text_is_an_empty_page() {
    for kind in [ProviderKind::OpenAi, ProviderKind::Mistral] {
        let transport = ScriptedTransport::new(|_, _| chat_reply("not json"));
        let records = gateway(kind, transport)
            .extract(&fake_images(1)[0], "read", &ProviderCredential::new("k"))
            .await;
        let records = assert_ok!(records);
        assert!(records.is_empty(), "{kind}");
    }
}

#[tokio::test]
async fn non_json_envelope_is_an_empty_page() {
    let transport = ScriptedTransport::new(|_, _| HttpReply {
        status: 200,
        body: "<html>upstream hiccup</html>".into(),
    });
    let records = gateway(ProviderKind::OpenAi, transport)
        .extract(&fake_images(1)[0], "read", &ProviderCredential::new("k"))
        .await;
    assert!(assert_ok!(records).is_empty());
}

#[tokio::test]
async fn gemini_reply_without_text_is_an_empty_page() {
    let transport = ScriptedTransport::new(|_, _| HttpReply {
        status: 200,
        body: json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string(),
    });
    let records = gateway(ProviderKind::Gemini, transport)
        .extract(&fake_images(1)[0], "read", &ProviderCredential::new("k"))
        .await;
    assert!(assert_ok!(records).is_empty());
}

#[tokio::test]
async fn transport_failure_has_no_status_and_degrades_the_page() {
    let transport = Arc::new(UnreachableTransport {
        calls: AtomicUsize::new(0),
    });

    let err = assert_err!(
        gateway(ProviderKind::OpenAi, transport.clone())
            .extract(&fake_images(1)[0], "read", &ProviderCredential::new("k"))
            .await
    );
    assert!(matches!(
        err,
        PetitionError::ProviderFailed {
            provider: ProviderKind::OpenAi,
            status: None,
            ..
        }
    ));

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

    let out = orchestrator(ProviderKind::OpenAi, transport.clone(), 10)
        .run(&fake_images(2), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
        .await;
    let out = assert_ok!(out);
    assert!(out.records.is_empty());
    assert_eq!(out.failed_images(), 2);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn mistral_does_not_retry_auth_or_bad_request() {
    for code in [401, 400] {
        let transport = ScriptedTransport::new(move |_, _| status(code));
        let err = assert_err!(
            gateway(ProviderKind::Mistral, transport.clone())
                .extract(&fake_images(1)[0], "read", &ProviderCredential::new("k"))
                .await
        );
        match code {
            401 => assert!(matches!(err, PetitionError::AuthFailed { .. }), "{err:?}"),
            _ => assert!(matches!(err, PetitionError::BadRequest { .. }), "{err:?}"),
        }
        assert_eq!(transport.calls(), 1);
    }
}

// ── PetitionJob ──────────────────────────────────────────────────────────────

/// Vendor calls answer with `rows`; `/rpc/` calls succeed.
fn vendor_and_rpc(rows: &'static str) -> Arc<ScriptedTransport> {
    ScriptedTransport::new(move |req, _| {
        if req.url.contains("/rpc/") {
            HttpReply {
                status: 204,
                body: String::new(),
            }
        } else {
            chat_reply(rows)
        }
    })
}

#[tokio::test]
async fn job_extracts_persists_and_matches() {
    let transport = vendor_and_rpc(r#"[{"name": " Ada ", "address": "1 Main St"}, {"name": ""}]"#);
    let sink = Arc::new(MemorySink::new());
    let matching = Arc::new(RpcMatchingProcedure::new(
        "https://db.example.org/rest/v1",
        RpcMatchingProcedure::DEFAULT_NAME,
        "db-key",
        transport.clone(),
    ));

    let job = PetitionJob::new(
        cropped_config(),
        transport.clone(),
        CredentialSource::Plain(Zeroizing::new("sk-test".into())),
    )
    .with_sink(sink.clone())
    .with_matching(matching);

    let sources = vec![
        SourceFile::from_bytes("a.png", png(20, 40)),
        SourceFile::from_bytes("b.jpg.png", png(20, 40)),
    ];
    let request = JobRequest {
        provider: ProviderKind::OpenAi,
        campaign_key: Some("spring-2024".into()),
    };

    let out = assert_ok!(job.run(&sources, &request, &NoopProgressCallback).await);

    assert_eq!(out.stats.source_files, 2);
    assert_eq!(out.stats.normalized_images, 2);
    assert_eq!(out.records.len(), 2);
    assert_eq!(out.records[0].filename, "a_cropped.png");
    assert_eq!(out.records[0].record.name.as_deref(), Some("Ada"));
    assert_eq!(out.records[1].page_number, 2);
    assert_eq!(
        out.matching,
        MatchingOutcome::Completed {
            procedure: "insert_top_matches".into()
        }
    );

    let stored = sink.rows("spring-2024").await;
    assert_eq!(stored.len(), 2);

    let seen = transport.seen();
    assert_eq!(seen.len(), 3);
    let (rpc_url, rpc_body) = seen.iter().find(|(u, _)| u.contains("/rpc/")).unwrap();
    assert_eq!(rpc_url, "https://db.example.org/rest/v1/rpc/insert_top_matches");
    assert_eq!(rpc_body["campaign_id_input"], "spring-2024");
}

#[tokio::test]
async fn rerunning_a_campaign_replaces_its_rows() {
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(JsonFileSink::new(dir.path()));
    let request = JobRequest {
        provider: ProviderKind::OpenAi,
        campaign_key: Some("ward7".into()),
    };
    let sources = vec![SourceFile::from_bytes("s.png", png(10, 20))];

    for rows in [
        r#"[{"name": "First"}, {"name": "Second"}]"#,
        r#"[{"name": "Third"}]"#,
    ] {
        let transport = vendor_and_rpc(rows);
        let job = PetitionJob::new(
            cropped_config(),
            transport,
            CredentialSource::Plain(Zeroizing::new("k".into())),
        )
        .with_sink(sink.clone());
        assert_ok!(job.run(&sources, &request, &NoopProgressCallback).await);
    }

    let stored = assert_ok!(sink.load("ward7").await);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].record.name.as_deref(), Some("Third"));
}

#[tokio::test]
async fn matching_failure_keeps_persisted_rows() {
    let transport = ScriptedTransport::new(|req, _| {
        if req.url.contains("/rpc/") {
            status(500)
        } else {
            chat_reply(r#"[{"name": "Ada"}]"#)
        }
    });
    let sink = Arc::new(MemorySink::new());
    let job = PetitionJob::new(
        cropped_config(),
        transport.clone(),
        CredentialSource::Plain(Zeroizing::new("k".into())),
    )
    .with_sink(sink.clone())
    .with_matching(Arc::new(RpcMatchingProcedure::new(
        "https://db.example.org",
        "insert_top_matches",
        "db-key",
        transport,
    )));
    let request = JobRequest {
        provider: ProviderKind::OpenAi,
        campaign_key: Some("c".into()),
    };

    let out = assert_ok!(
        job.run(&[SourceFile::from_bytes("s.png", png(10, 20))], &request, &NoopProgressCallback)
            .await
    );

    assert!(matches!(out.matching, MatchingOutcome::Failed { .. }));
    assert_eq!(sink.rows("c").await.len(), 1);
}

#[tokio::test]
async fn stored_credential_is_decrypted_for_the_vendor_call() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCredentialStore::new(dir.path().join("keys.json")));
    let cipher = Arc::new(CredentialCipher::generate());
    let secret = cipher.encrypt("sk-stored").unwrap();
    store.upsert("alice", ProviderKind::OpenAi, secret).await.unwrap();

    let transport = ScriptedTransport::new(|req, _| {
        assert!(matches!(&req.auth, Auth::Bearer(token) if token.as_str() == "sk-stored"));
        chat_reply("[]")
    });
    let job = PetitionJob::new(
        cropped_config(),
        transport.clone(),
        CredentialSource::Stored {
            store: store.clone(),
            cipher,
            owner_id: "alice".into(),
        },
    );
    let request = JobRequest {
        provider: ProviderKind::OpenAi,
        campaign_key: None,
    };

    let out = assert_ok!(
        job.run(&[SourceFile::from_bytes("s.png", png(10, 20))], &request, &NoopProgressCallback)
            .await
    );
    assert!(out.records.is_empty());
    assert_eq!(transport.calls(), 1);

    // The key file never holds the plaintext.
    let on_disk = std::fs::read_to_string(store.path()).unwrap();
    assert!(!on_disk.contains("sk-stored"));
}

#[tokio::test]
async fn deactivated_credential_stops_the_job_before_any_call() {
    let store = Arc::new(petition_ocr::MemoryCredentialStore::new());
    let cipher = Arc::new(CredentialCipher::generate());
    store
        .upsert("bob", ProviderKind::Mistral, cipher.encrypt("k").unwrap())
        .await
        .unwrap();
    store.deactivate("bob", ProviderKind::Mistral).await.unwrap();

    let transport = ScriptedTransport::new(|_, _| chat_reply("[]"));
    let job = PetitionJob::new(
        cropped_config(),
        transport.clone(),
        CredentialSource::Stored {
            store,
            cipher,
            owner_id: "bob".into(),
        },
    );
    let request = JobRequest {
        provider: ProviderKind::Mistral,
        campaign_key: None,
    };

    let err = assert_err!(
        job.run(&[SourceFile::from_bytes("s.png", png(10, 20))], &request, &NoopProgressCallback)
            .await
    );
    assert!(matches!(err, PetitionError::CredentialInactive { .. }));
    assert_eq!(transport.calls(), 0);
}

// ── PDF (needs libpdfium) ────────────────────────────────────────────────────

#[tokio::test]
async fn unloadable_pdfium_is_fatal() {
    let config = PipelineConfig::builder()
        .crop(CropConfig::full_page())
        .pdfium_library("/nonexistent/dir/libpdfium.so")
        .build()
        .unwrap();
    let transport = ScriptedTransport::new(|_, _| chat_reply("[]"));
    let job = PetitionJob::new(
        config,
        transport.clone(),
        CredentialSource::Plain(Zeroizing::new("k".into())),
    );
    let request = JobRequest {
        provider: ProviderKind::OpenAi,
        campaign_key: None,
    };
    let pdf = SourceFile::from_bytes("minutes.pdf", b"%PDF-1.4\n%%EOF\n".to_vec());

    let err = assert_err!(job.run(&[pdf], &request, &NoopProgressCallback).await);
    assert!(matches!(err, PetitionError::PdfiumBindingFailed(_)));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test]
async fn real_pdf_pages_are_named_by_page() {
    let Ok(lib) = std::env::var("PDFIUM_LIB_PATH") else {
        println!("SKIP — set PDFIUM_LIB_PATH to run pdfium tests");
        return;
    };
    let Ok(path) = std::env::var("PETITION_OCR_TEST_PDF") else {
        println!("SKIP — set PETITION_OCR_TEST_PDF to a multi-page petition PDF");
        return;
    };

    let config = PipelineConfig::builder()
        .crop(CropConfig::new(0.2, 0.9).unwrap())
        .pdfium_library(lib)
        .build()
        .unwrap();
    let pre = petition_ocr::ImagePreprocessor::new(&config).unwrap();
    let source = SourceFile::from_path(path.as_ref()).await.unwrap();

    let pages = pre.preprocess(&source).await.unwrap();
    assert!(!pages.is_empty());
    let stem = source.name.trim_end_matches(".pdf");
    for (i, page) in pages.iter().enumerate() {
        assert_eq!(page.name, format!("{stem}_page{}.png", i + 1));
    }
}

// ── Sink contract ────────────────────────────────────────────────────────────

#[tokio::test]
async fn replacing_with_nothing_empties_the_campaign() {
    let sink = MemorySink::new();
    let first = {
        let transport = ScriptedTransport::new(|_, _| chat_reply(r#"[{"name": "Ada"}]"#));
        orchestrator(ProviderKind::OpenAi, transport, 4)
            .run(&fake_images(2), "read", &ProviderCredential::new("k"), &NoopProgressCallback)
            .await
            .unwrap()
    };

    let report = sink.replace(&first.records, "c1").await.unwrap();
    assert_eq!(report.inserted, 2);

    let report = sink.replace(&[], "c1").await.unwrap();
    assert_eq!(report.deleted, 2);
    assert_eq!(report.inserted, 0);
    assert!(sink.rows("c1").await.is_empty());
}
