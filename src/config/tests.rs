use super::RouterConfig;

#[test]
fn test_deserialize_defaults() {
    let toml_str = r#"
[route_server]
url = "http://routes.internal:4000"
"#;
    let cfg: RouterConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(cfg.http_port, 8080);
    assert_eq!(cfg.http_acceptors, 100);
    assert_eq!(cfg.route_server.url, "http://routes.internal:4000");
    assert_eq!(cfg.route_server.ttl_ms, 60_000);
    assert_eq!(cfg.timeouts.connecting, 5_000);
    assert_eq!(cfg.timeouts.sending_request_body, 60_000);
    assert_eq!(cfg.timeouts.waiting_for_response, 60_000);
    assert_eq!(cfg.timeouts.receiving_response, 60_000);
    assert!(cfg.outbound_proxy.is_none());
    assert!(!cfg.tls_verify);
}

#[test]
fn test_load_json_config() {
    let json = r#"{
        "http_port": 9000,
        "route_server": {
            "url": "http://routes.internal:4000",
            "ttl_ms": 15000,
            "client_id": "router",
            "client_secret": "secret",
            "oauth_url": "http://auth.internal/oauth/token"
        },
        "timeouts": { "connecting": 2000 }
    }"#;
    let tmp = std::env::temp_dir().join("openaperture_router_test_config.json");
    std::fs::write(&tmp, json).unwrap();
    let cfg = RouterConfig::load(&tmp).unwrap();
    assert_eq!(cfg.http_port, 9000);
    assert_eq!(cfg.route_server.ttl_ms, 15_000);
    assert_eq!(cfg.route_server.client_id, "router");
    assert_eq!(cfg.timeouts.connecting, 2_000);
    // Unspecified timeouts keep their defaults.
    assert_eq!(cfg.timeouts.receiving_response, 60_000);
    std::fs::remove_file(&tmp).ok();
}

#[test]
fn test_validate_zero_ttl_fails() {
    let mut cfg = RouterConfig::default();
    cfg.route_server.ttl_ms = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_zero_timeout_fails() {
    let mut cfg = RouterConfig::default();
    cfg.timeouts.waiting_for_response = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_bad_route_server_url_fails() {
    let mut cfg = RouterConfig::default();
    cfg.route_server.url = "routes.internal:4000".into();
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_bad_proxy_url_fails() {
    let mut cfg = RouterConfig::default();
    cfg.outbound_proxy = Some("proxy.internal:3128".into());
    assert!(cfg.validate().is_err());
}

#[test]
fn test_validate_default_config() {
    assert!(RouterConfig::default().validate().is_ok());
}

#[test]
fn test_unsupported_format() {
    let tmp = std::env::temp_dir().join("openaperture_router_test.yml");
    std::fs::write(&tmp, "key: value").unwrap();
    assert!(RouterConfig::load(&tmp).is_err());
    std::fs::remove_file(&tmp).ok();
}
