//! The served router and the OpenAPI document are built from the same
//! registrations; these tests pin the documented surface.

use custodia::api;

#[test]
fn openapi_documents_every_endpoint() {
    let spec = api::openapi();
    let paths = &spec.paths.paths;

    for path in [
        "/health",
        "/auth/register",
        "/auth/login",
        "/auth/logout",
        "/auth/token/refresh",
        "/auth/profile",
        "/auth/change-password",
        "/auth/permissions",
        "/auth/gdpr/consent",
        "/auth/gdpr/export",
    ] {
        assert!(paths.contains_key(path), "missing path: {path}");
    }
    assert_eq!(paths.len(), 10, "undocumented endpoints crept in");
}

#[test]
fn profile_path_serves_get_and_put() {
    let spec = api::openapi();
    let profile = spec
        .paths
        .paths
        .get("/auth/profile")
        .expect("profile path documented");
    assert!(profile.get.is_some());
    assert!(profile.put.is_some());
}

#[test]
fn router_builds_without_state() {
    // Extensions are layered at serve time; construction alone must work.
    let (_router, openapi) = api::router().split_for_parts();
    assert_eq!(openapi.info.title, "custodia");
}
