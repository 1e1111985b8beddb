use stream_api::{endpoint_url, normalize_base_url, Endpoint};

#[test]
fn url_normalization_keeps_existing_api_root() {
    assert_eq!(
        normalize_base_url("https://api.example.dev/api/"),
        "https://api.example.dev/api"
    );
}

#[test]
fn url_normalization_appends_api_to_bare_host() {
    assert_eq!(
        normalize_base_url("http://127.0.0.1:4000"),
        "http://127.0.0.1:4000/api"
    );
}

#[test]
fn url_normalization_falls_back_to_default_host() {
    assert_eq!(normalize_base_url("  "), "https://api.agent-tabs.dev/api");
}

#[test]
fn endpoint_paths_embed_app_id() {
    assert_eq!(
        endpoint_url("http://host", Endpoint::Commits { app_id: "app_1" }),
        "http://host/api/apps/app_1/commits"
    );
    assert_eq!(
        endpoint_url("http://host", Endpoint::Deployments { app_id: "app_1" }),
        "http://host/api/apps/app_1/deployments"
    );
    assert_eq!(
        endpoint_url("http://host/api", Endpoint::DeviceLoginPoll),
        "http://host/api/auth/device/poll"
    );
}
