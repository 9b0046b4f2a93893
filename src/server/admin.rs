use super::RouterState;
use crate::proxy::context::{full_body, BoxBody};
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::convert::Infallible;

pub fn handle_admin(
    req: Request<Incoming>,
    state: RouterState,
) -> Result<Response<BoxBody>, Infallible> {
    match req.uri().path() {
        "/health" | "/healthz" => Ok(Response::builder()
            .status(200)
            .body(full_body(r#"{"status":"ok"}"#))
            .unwrap()),

        "/metrics" => {
            let body = state.metrics.render();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
                .body(full_body(body))
                .unwrap())
        }

        "/routes" => {
            let routes: serde_json::Map<String, serde_json::Value> = state
                .routes
                .snapshot()
                .into_iter()
                .map(|(authority, backends)| {
                    let list: Vec<serde_json::Value> = backends
                        .iter()
                        .map(|b| {
                            serde_json::json!({
                                "hostname": b.host,
                                "port": b.port,
                                "secure_connection": b.secure,
                            })
                        })
                        .collect();
                    (authority, serde_json::Value::Array(list))
                })
                .collect();

            let body = serde_json::to_string_pretty(&routes).unwrap_or_default();
            Ok(Response::builder()
                .status(200)
                .header("content-type", "application/json")
                .body(full_body(body))
                .unwrap())
        }

        _ => Ok(Response::builder()
            .status(404)
            .body(full_body(r#"{"error":"not found"}"#))
            .unwrap()),
    }
}
