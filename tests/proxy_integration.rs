//! End-to-end tests: a real router instance proxying to an in-process origin
//! server over loopback.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use openaperture_router::config::RouterConfig;
use openaperture_router::routing::Backend;
use openaperture_router::server::RouterState;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::sync::Notify;

type OriginBody = http_body_util::combinators::BoxBody<Bytes, Infallible>;

fn full(data: impl Into<Bytes>) -> OriginBody {
    Full::new(data.into()).boxed()
}

fn empty() -> OriginBody {
    Full::new(Bytes::new()).boxed()
}

async fn spawn_origin<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: std::future::Future<Output = Response<OriginBody>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let handler = handler.clone();
                    async move { Ok::<_, Infallible>(handler(req).await) }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    addr
}

/// Start a router on an ephemeral port, routed (if an origin is given) for
/// its own `127.0.0.1:<port>` authority.
async fn spawn_router(origin: Option<SocketAddr>) -> (SocketAddr, RouterState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = RouterConfig {
        http_port: addr.port(),
        ..RouterConfig::default()
    };
    let state = RouterState::new(config).unwrap();

    if let Some(origin) = origin {
        state.routes.put(
            &format!("127.0.0.1:{}", addr.port()),
            vec![Backend {
                host: "127.0.0.1".into(),
                port: origin.port(),
                secure: false,
            }],
        );
    }

    let shutdown = Arc::new(Notify::new());
    let serve_state = state.clone();
    tokio::spawn(async move {
        let _ = openaperture_router::server::serve(listener, serve_state, shutdown).await;
    });

    (addr, state)
}

fn header_str(req: &Request<Incoming>, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[tokio::test]
async fn forwarding_headers_reach_the_backend() {
    let origin = spawn_origin(|req: Request<Incoming>| async move {
        let body = serde_json::json!({
            "path": req.uri().path_and_query().map(|pq| pq.as_str().to_owned()),
            "request_id": header_str(&req, "x-openaperture-request-id"),
            "forwarded_for": header_str(&req, "x-forwarded-for"),
            "forwarded_host": header_str(&req, "x-forwarded-host"),
            "forwarded_port": header_str(&req, "x-forwarded-port"),
            "forwarded_proto": header_str(&req, "x-forwarded-proto"),
        });
        Response::new(full(body.to_string()))
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/get?a=1&b=2", router.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let seen: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(seen["path"], "/get?a=1&b=2");
    assert_eq!(seen["forwarded_host"], "127.0.0.1");
    assert_eq!(seen["forwarded_port"], router.port().to_string());
    assert_eq!(seen["forwarded_proto"], "http");

    let request_id = seen["request_id"].as_str().unwrap();
    assert_eq!(request_id.len(), 32);
    assert!(request_id.chars().all(|c| c.is_ascii_hexdigit()));

    let forwarded_for = seen["forwarded_for"].as_str().unwrap();
    assert!(forwarded_for.starts_with("127.0.0.1:"), "{}", forwarded_for);
}

#[tokio::test]
async fn client_supplied_request_id_is_preserved() {
    let origin = spawn_origin(|req: Request<Incoming>| async move {
        Response::new(full(header_str(&req, "x-openaperture-request-id")))
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/", router.port()))
        .header("X-OpenAperture-Request-ID", "client-chosen-id")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), "client-chosen-id");
}

#[tokio::test]
async fn unknown_authority_gets_503_with_empty_body() {
    let (router, _state) = spawn_router(None).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/anything", router.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn large_body_round_trips_through_chunked_response() {
    // Origin echoes the posted body as a chunked stream of 64 KiB frames.
    let origin = spawn_origin(|req: Request<Incoming>| async move {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        let frames: Vec<Result<Frame<Bytes>, Infallible>> = body
            .chunks(64 * 1024)
            .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
            .collect();
        let stream = futures_util::stream::iter(frames);
        Response::new(BodyExt::boxed(StreamBody::new(stream)))
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let payload: Vec<u8> = (0..(1024 * 1024u32)).map(|i| (i % 251) as u8).collect();
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/echo", router.port()))
        .body(payload.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let echoed = resp.bytes().await.unwrap();
    assert_eq!(echoed.len(), payload.len());
    assert_eq!(&echoed[..], &payload[..]);
}

#[tokio::test]
async fn chunked_request_body_is_relayed_whole() {
    // Origin echoes the body back with a declared length.
    let origin = spawn_origin(|req: Request<Incoming>| async move {
        let body = req.into_body().collect().await.unwrap().to_bytes();
        Response::new(full(body))
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let payload: Vec<u8> = (0..(256 * 1024u32)).map(|i| (i % 241) as u8).collect();
    let chunks: Vec<Result<Bytes, std::io::Error>> = payload
        .chunks(10_000)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    let body = reqwest::Body::wrap_stream(futures_util::stream::iter(chunks));

    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}/echo", router.port()))
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let echoed = resp.bytes().await.unwrap();
    assert_eq!(&echoed[..], &payload[..]);
}

#[tokio::test]
async fn small_response_is_buffered_and_intact() {
    let origin = spawn_origin(|_req: Request<Incoming>| async move {
        Response::builder()
            .header("content-type", "text/plain")
            .body(full("hello from the origin"))
            .unwrap()
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/hello", router.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/plain"
    );
    assert_eq!(resp.text().await.unwrap(), "hello from the origin");
}

#[tokio::test]
async fn buffered_response_concatenates_chunks_in_order() {
    // Declared length below the buffering ceiling, delivered in many frames.
    let payload: Vec<u8> = (0..30_000u32).map(|i| (i % 239) as u8).collect();
    let expected = payload.clone();

    let origin = spawn_origin(move |_req: Request<Incoming>| {
        let payload = payload.clone();
        async move {
            let frames: Vec<Result<Frame<Bytes>, Infallible>> = payload
                .chunks(7_000)
                .map(|c| Ok(Frame::data(Bytes::copy_from_slice(c))))
                .collect();
            let stream = futures_util::stream::iter(frames);
            Response::builder()
                .header("content-length", payload.len().to_string())
                .body(BodyExt::boxed(StreamBody::new(stream)))
                .unwrap()
        }
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/blob", router.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-length").unwrap(),
        &expected.len().to_string()
    );
    assert_eq!(&resp.bytes().await.unwrap()[..], &expected[..]);
}

#[tokio::test]
async fn no_content_completes_without_waiting_for_a_body() {
    let origin = spawn_origin(|_req: Request<Incoming>| async move {
        Response::builder().status(204).body(empty()).unwrap()
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let resp = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        reqwest::Client::new()
            .get(format!("http://127.0.0.1:{}/nothing", router.port()))
            .send(),
    )
    .await
    .expect("204 must complete promptly")
    .unwrap();

    assert_eq!(resp.status(), 204);
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_response_headers_keep_the_last_value() {
    let origin = spawn_origin(|_req: Request<Incoming>| async move {
        let mut resp = Response::new(full("ok"));
        resp.headers_mut()
            .append("server", "Cowboy".parse().unwrap());
        resp.headers_mut()
            .append("server", "nginx".parse().unwrap());
        resp
    })
    .await;
    let (router, _state) = spawn_router(Some(origin)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/dup", router.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let servers: Vec<_> = resp.headers().get_all("server").iter().collect();
    assert_eq!(servers.len(), 1);
    assert_eq!(servers[0], "nginx");
}

#[tokio::test]
async fn status_check_tracks_route_refresh_age() {
    let (router, state) = spawn_router(None).await;
    let url = format!(
        "http://127.0.0.1:{}/openaperture_router_status_check",
        router.port()
    );
    let client = reqwest::Client::new();

    // Never refreshed.
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 503);

    // Fresh refresh.
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();
    state.last_refresh.advance(now);
    let resp = client.get(&url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unreachable_backend_gets_503() {
    let (router, state) = spawn_router(None).await;
    // Routed, but nothing listens on the target port.
    state.routes.put(
        &format!("127.0.0.1:{}", router.port()),
        vec![Backend {
            host: "127.0.0.1".into(),
            port: 1,
            secure: false,
        }],
    );

    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}/down", router.port()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
}
