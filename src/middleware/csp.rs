use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response},
    middleware::Next,
};

// Thumbnails and avatars come from YouTube's CDNs; API calls from the browser only
// go to the OAuth token endpoint and this server.
const CSP: &str = "default-src 'self'; \
    script-src 'self' https://accounts.google.com; \
    connect-src 'self' https://www.googleapis.com https://youtubeanalytics.googleapis.com https://oauth2.googleapis.com; \
    img-src 'self' https: data:; \
    frame-src https://accounts.google.com; \
    object-src 'none'; base-uri 'self'; form-action 'self'; frame-ancestors 'self'";

/// Adds CSP and a couple of hardening headers unless a handler already set them.
pub async fn csp_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    for (name, value) in [
        (header::CONTENT_SECURITY_POLICY, CSP),
        (header::REFERRER_POLICY, "no-referrer"),
        (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    ] {
        if !headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static(value));
        }
    }

    res
}

#[cfg(test)]
mod tests {
    use axum::{routing::get, Router};
    use tower::ServiceExt;

    use super::*;

    #[tokio::test]
    async fn policy_is_added_but_handler_headers_win() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route(
                "/custom",
                get(|| async { ([(header::REFERRER_POLICY, "same-origin")], "ok") }),
            )
            .layer(axum::middleware::from_fn(csp_middleware));

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let csp = resp.headers()[header::CONTENT_SECURITY_POLICY].to_str().unwrap();
        assert!(csp.contains("https://www.googleapis.com"));
        assert!(csp.contains("object-src 'none'"));
        assert_eq!(resp.headers()[header::X_CONTENT_TYPE_OPTIONS], "nosniff");

        let resp = app
            .oneshot(Request::builder().uri("/custom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::REFERRER_POLICY], "same-origin");
    }
}
