mod common;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::get;
use bytes::Bytes;
use common::{Hits, media_body, serve, test_config};
use streamcheck_engine::client::create_client;
use streamcheck_engine::probe::ThroughputSampler;
use streamcheck_engine::{
    Candidate, Classifier, ClassifierConfig, FailureKind, GroupRule, HttpProber, Outcome,
    ProbeConfig, ProbeDispatcher, ProbeVerdict, StreamProber, playlist,
};
use tokio_util::sync::CancellationToken;

async fn probe_one(config: ProbeConfig, url: String) -> ProbeVerdict {
    let client = create_client(&config).unwrap();
    let prober = HttpProber::new(client, Arc::new(config));
    prober
        .probe(&Candidate::new("test", url), &CancellationToken::new())
        .await
}

#[tokio::test]
async fn live_entry_keeps_its_options_and_gets_a_group() {
    let seen_referer = Arc::new(parking_lot::Mutex::new(None::<String>));
    let app = Router::new().route(
        "/live.ts",
        get({
            let seen_referer = seen_referer.clone();
            move |headers: HeaderMap| {
                let seen_referer = seen_referer.clone();
                async move {
                    *seen_referer.lock() = headers
                        .get(header::REFERER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    media_body(128 * 1024)
                }
            }
        }),
    );
    let addr = serve(app).await;

    let text = format!(
        "#EXTM3U\n\
#EXTINF:-1 tvg-id=\"arena\",Sports Arena\n\
#EXTVLCOPT:http-referrer=https://portal.example.com/\n\
http://{addr}/live.ts\n"
    );
    let document = playlist::parse_document(&text).unwrap();
    let dispatcher = ProbeDispatcher::http(test_config()).unwrap();
    let results = dispatcher.run(document.candidates).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].verdict.outcome, Outcome::Live);
    assert!(results[0].verdict.ttfb.is_some());
    assert!(results[0].verdict.throughput_kbps.is_some());
    assert_eq!(
        seen_referer.lock().as_deref(),
        Some("https://portal.example.com/")
    );

    let classifier = Classifier::new(ClassifierConfig {
        group_keywords: vec![GroupRule::new("sports", "Sports")],
        ..Default::default()
    });
    let mut output = classifier.classify(results);
    output.header = document.header;
    let written = output.to_m3u();

    assert!(written.starts_with("#EXTM3U\n"));
    assert!(written.contains("tvg-id=\"arena\""));
    assert!(written.contains("group-title=\"Sports\""));
    assert!(written.contains("#EXTVLCOPT:http-referrer=https://portal.example.com/\n"));
    assert!(written.contains(&format!("http://{addr}/live.ts\n")));
}

#[tokio::test]
async fn missing_stream_is_dead_and_dropped() {
    let addr = serve(Router::new()).await;

    let verdict = probe_one(test_config(), format!("http://{addr}/absent.ts")).await;
    assert_eq!(verdict.outcome, Outcome::Dead);
    assert_eq!(verdict.failure, Some(FailureKind::HttpStatus(404)));
    assert_eq!(verdict.ttfb, None);

    let mut candidate = Candidate::new("Gone", format!("http://{addr}/absent.ts"));
    candidate.seq = 0;
    let dispatcher = ProbeDispatcher::http(test_config()).unwrap();
    let results = dispatcher.run(vec![candidate]).await;
    let output = Classifier::new(ClassifierConfig::default()).classify(results);
    assert!(output.is_empty());
    assert_eq!(output.to_m3u(), "#EXTM3U\n");
}

#[tokio::test]
async fn master_playlist_resolves_to_the_1080p_variant() {
    // Nothing listens here once the listener is dropped.
    let dead_addr = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let app = Router::new()
        .route(
            "/channel/master.m3u8",
            get(|| async {
                "#EXTM3U\n\
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720\n\
v720/index.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=6000000,RESOLUTION=1920x1080\n\
v1080/index.m3u8\n"
            }),
        )
        .route(
            "/channel/v720/index.m3u8",
            get(move || async move {
                format!(
                    "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nhttp://{dead_addr}/seg0.ts\n"
                )
            }),
        )
        .route(
            "/channel/v1080/index.m3u8",
            get(|| async {
                "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:7\n#EXTINF:6.0,\nseg7.ts\n#EXTINF:6.0,\nseg8.ts\n"
            }),
        )
        .route(
            "/channel/v1080/seg7.ts",
            get(|| async { media_body(128 * 1024) }),
        );
    let addr = serve(app).await;

    let verdict = probe_one(test_config(), format!("http://{addr}/channel/master.m3u8")).await;
    assert_eq!(verdict.outcome, Outcome::Live);
    assert_eq!(verdict.resolved_depth, 2);
    assert_eq!(
        verdict.resolved_url.as_deref(),
        Some(format!("http://{addr}/channel/v1080/seg7.ts").as_str())
    );
}

#[tokio::test]
async fn duplicate_urls_produce_one_entry() {
    let app = Router::new().route("/dup.ts", get(|| async { media_body(96 * 1024) }));
    let addr = serve(app).await;

    let text = format!(
        "#EXTM3U\n#EXTINF:-1,First\nhttp://{addr}/dup.ts\n#EXTINF:-1,Second\nhttp://{addr}/dup.ts\n"
    );
    let document = playlist::parse_document(&text).unwrap();
    let dispatcher = ProbeDispatcher::http(test_config()).unwrap();
    let results = dispatcher.run(document.candidates).await;
    assert_eq!(results.len(), 2);

    let output = Classifier::new(ClassifierConfig::default()).classify(results);
    assert_eq!(output.len(), 1);
    assert_eq!(output.entries().next().unwrap().candidate.title, "First");
}

#[tokio::test]
async fn self_referencing_manifest_is_dead_without_hanging() {
    let hits = Hits::default();
    let app = Router::new().route(
        "/loop.m3u8",
        get({
            let hits = hits.clone();
            move || {
                let hits = hits.clone();
                async move {
                    hits.bump();
                    "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nloop.m3u8\n"
                }
            }
        }),
    );
    let addr = serve(app).await;

    let verdict = tokio::time::timeout(
        Duration::from_secs(5),
        probe_one(test_config(), format!("http://{addr}/loop.m3u8")),
    )
    .await
    .expect("resolver terminates");
    assert_eq!(verdict.outcome, Outcome::Dead);
    assert_eq!(verdict.failure, Some(FailureKind::ManifestCycle));
    assert_eq!(hits.get(), 1);
}

#[tokio::test]
async fn endless_manifest_chain_stops_at_max_depth() {
    let hits = Hits::default();
    let app = Router::new().route(
        "/chain.m3u8",
        get({
            let hits = hits.clone();
            move |Query(params): Query<HashMap<String, String>>| {
                let hits = hits.clone();
                async move {
                    hits.bump();
                    let n: u32 = params.get("n").and_then(|n| n.parse().ok()).unwrap_or(0);
                    format!(
                        "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nchain.m3u8?n={}\n",
                        n + 1
                    )
                }
            }
        }),
    );
    let addr = serve(app).await;

    let config = ProbeConfig {
        max_manifest_depth: 3,
        ..test_config()
    };
    let verdict = probe_one(config, format!("http://{addr}/chain.m3u8?n=0")).await;
    assert_eq!(verdict.outcome, Outcome::Dead);
    assert_eq!(verdict.failure, Some(FailureKind::DepthExceeded));
    assert_eq!(hits.get(), 4);
}

#[tokio::test]
async fn extensionless_playlist_is_detected_from_the_response() {
    let app = Router::new()
        .route(
            "/play",
            get(|| async {
                (
                    [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
                    "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nsegment.ts\n",
                )
            }),
        )
        .route("/segment.ts", get(|| async { media_body(128 * 1024) }));
    let addr = serve(app).await;

    let verdict = probe_one(test_config(), format!("http://{addr}/play")).await;
    assert_eq!(verdict.outcome, Outcome::Live);
    assert_eq!(verdict.resolved_depth, 1);
    assert_eq!(
        verdict.resolved_url.as_deref(),
        Some(format!("http://{addr}/segment.ts").as_str())
    );
}

#[tokio::test]
async fn slow_stream_is_too_slow() {
    let app = Router::new().route(
        "/slow.ts",
        get(|| async {
            let chunks = futures::stream::unfold(0u32, |n| async move {
                if n >= 100 {
                    return None;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                Some((Ok::<_, Infallible>(Bytes::from(vec![0x47u8; 512])), n + 1))
            });
            Body::from_stream(chunks)
        }),
    );
    let addr = serve(app).await;

    let config = ProbeConfig {
        sample_timeout: Duration::from_secs(1),
        warmup_bytes: 1024,
        min_speed_kbps: 1000.0,
        ..test_config()
    };
    let verdict = probe_one(config, format!("http://{addr}/slow.ts")).await;
    assert_eq!(verdict.outcome, Outcome::TooSlow);
    assert_eq!(verdict.failure, Some(FailureKind::BelowThreshold));
    let kbps = verdict.throughput_kbps.unwrap();
    assert!(kbps < 1000.0, "measured {kbps} kbps");
}

#[tokio::test]
async fn stream_that_stalls_after_a_burst_is_too_slow() {
    let app = Router::new().route(
        "/stall.ts",
        get(|| async {
            let chunks = futures::stream::unfold(0u32, |n| async move {
                if n >= 8 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    return None;
                }
                Some((Ok::<_, Infallible>(Bytes::from(vec![0x47u8; 4096])), n + 1))
            });
            Body::from_stream(chunks)
        }),
    );
    let addr = serve(app).await;

    let config = ProbeConfig {
        sample_timeout: Duration::from_secs(1),
        warmup_bytes: 4096,
        sample_bytes: 64 * 1024,
        min_speed_kbps: 1000.0,
        ..test_config()
    };
    let verdict = probe_one(config, format!("http://{addr}/stall.ts")).await;
    assert_eq!(verdict.outcome, Outcome::TooSlow);
    // 32 KiB spread over the whole one-second window.
    let kbps = verdict.throughput_kbps.unwrap();
    assert!(kbps < 1000.0, "measured {kbps} kbps");
}

#[tokio::test]
async fn redirect_status_is_dead_when_not_followed() {
    let app = Router::new().route(
        "/moved.ts",
        get(|| async {
            (
                StatusCode::FOUND,
                [(header::LOCATION, "/elsewhere.ts")],
                media_body(96 * 1024),
            )
        }),
    );
    let addr = serve(app).await;

    let config = ProbeConfig {
        follow_redirects: false,
        ..test_config()
    };
    let verdict = probe_one(config.clone(), format!("http://{addr}/moved.ts")).await;
    assert_eq!(verdict.outcome, Outcome::Dead);
    assert_eq!(verdict.failure, Some(FailureKind::HttpStatus(302)));

    let checked = ProbeConfig {
        head_precheck: true,
        ..config
    };
    let verdict = probe_one(checked, format!("http://{addr}/moved.ts")).await;
    assert_eq!(verdict.failure, Some(FailureKind::HttpStatus(302)));
}

#[tokio::test]
async fn sampler_judges_a_media_url_directly() {
    let app = Router::new()
        .route("/media.ts", get(|| async { media_body(128 * 1024) }))
        .route("/gone.ts", get(|| async { StatusCode::GONE }));
    let addr = serve(app).await;

    let config = test_config();
    let sampler = ThroughputSampler::new(create_client(&config).unwrap(), Arc::new(config));
    let headers = reqwest::header::HeaderMap::new();

    let media = url::Url::parse(&format!("http://{addr}/media.ts")).unwrap();
    let verdict = sampler.sample(&media, &headers).await;
    assert_eq!(verdict.outcome, Outcome::Live);
    assert!(verdict.throughput_kbps.unwrap() >= 100.0);

    let gone = url::Url::parse(&format!("http://{addr}/gone.ts")).unwrap();
    let verdict = sampler.sample(&gone, &headers).await;
    assert_eq!(verdict.outcome, Outcome::Dead);
    assert_eq!(verdict.failure, Some(FailureKind::HttpStatus(410)));
}

#[tokio::test]
async fn short_body_is_unknown_and_empty_body_is_dead() {
    let app = Router::new()
        .route("/short.ts", get(|| async { media_body(100) }))
        .route("/empty.ts", get(|| async { "" }));
    let addr = serve(app).await;

    let short = probe_one(test_config(), format!("http://{addr}/short.ts")).await;
    assert_eq!(short.outcome, Outcome::Unknown);
    assert!(short.ttfb.is_some());
    assert_eq!(short.throughput_kbps, None);

    let empty = probe_one(test_config(), format!("http://{addr}/empty.ts")).await;
    assert_eq!(empty.outcome, Outcome::Dead);
    assert_eq!(empty.failure, Some(FailureKind::EmptyBody));
}

#[tokio::test]
async fn head_precheck_tolerates_unsupported_head() {
    let app = Router::new()
        .route(
            "/head-missing.ts",
            get(|| async { media_body(96 * 1024) }).head(|| async { StatusCode::NOT_FOUND }),
        )
        .route(
            "/head-refused.ts",
            get(|| async { media_body(96 * 1024) })
                .head(|| async { StatusCode::METHOD_NOT_ALLOWED }),
        );
    let addr = serve(app).await;
    let config = ProbeConfig {
        head_precheck: true,
        ..test_config()
    };

    let missing = probe_one(config.clone(), format!("http://{addr}/head-missing.ts")).await;
    assert_eq!(missing.failure, Some(FailureKind::HttpStatus(404)));

    let refused = probe_one(config, format!("http://{addr}/head-refused.ts")).await;
    assert_eq!(refused.outcome, Outcome::Live);
}

#[tokio::test]
async fn transient_server_error_is_retried() {
    let hits = Hits::default();
    let app = Router::new().route(
        "/flaky.ts",
        get({
            let hits = hits.clone();
            move || {
                let hits = hits.clone();
                async move {
                    if hits.bump() == 1 {
                        (StatusCode::SERVICE_UNAVAILABLE, Vec::new())
                    } else {
                        (StatusCode::OK, media_body(96 * 1024))
                    }
                }
            }
        }),
    );
    let addr = serve(app).await;

    let config = ProbeConfig {
        retries: 1,
        retry_delay: Duration::from_millis(10),
        ..test_config()
    };
    let verdict = probe_one(config, format!("http://{addr}/flaky.ts")).await;
    assert_eq!(verdict.outcome, Outcome::Live);
    assert_eq!(hits.get(), 2);
}

#[tokio::test]
async fn dead_host_is_probed_once() {
    let hits = Hits::default();
    let app = Router::new().fallback({
        let hits = hits.clone();
        move || {
            let hits = hits.clone();
            async move {
                hits.bump();
                StatusCode::NOT_FOUND
            }
        }
    });
    let addr = serve(app).await;

    let candidates: Vec<Candidate> = (0..4)
        .map(|i| {
            let mut c = Candidate::new(format!("Gone {i}"), format!("http://{addr}/gone{i}.ts"));
            c.seq = i;
            c
        })
        .collect();

    let dispatcher = ProbeDispatcher::http(test_config()).unwrap();
    let results = dispatcher.run(candidates).await;

    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r.verdict.outcome == Outcome::Dead));
    let gated = results
        .iter()
        .filter(|r| r.verdict.failure == Some(FailureKind::HostGated))
        .count();
    assert_eq!(gated, 3);
    assert_eq!(hits.get(), 1);
    assert_eq!(dispatcher.stats().gated, 3);

    let ungated = ProbeDispatcher::http(ProbeConfig {
        host_gate: false,
        ..test_config()
    })
    .unwrap();
    let results = ungated
        .run(vec![
            Candidate::new("a", format!("http://{addr}/a.ts")),
            Candidate::new("b", format!("http://{addr}/b.ts")),
        ])
        .await;
    assert!(results.iter().all(|r| r.verdict.failure == Some(FailureKind::HttpStatus(404))));
    assert_eq!(hits.get(), 3);
}
