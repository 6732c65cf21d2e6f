use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request, Response},
    middleware::Next,
};

// Adds baseline security headers to all responses. The service is a JSON API
// with no HTML surface, so there is no CSP policy here.
pub async fn security_headers_middleware(req: Request<Body>, next: Next) -> Response<Body> {
    let mut res = next.run(req).await;

    // Insert headers only if not already present
    if res.headers().get("x-content-type-options").is_none() {
        let val = HeaderValue::from_static("nosniff");
        res.headers_mut()
            .insert(HeaderName::from_static("x-content-type-options"), val);
    }
    if res.headers().get("x-frame-options").is_none() {
        let val = HeaderValue::from_static("DENY");
        res.headers_mut()
            .insert(HeaderName::from_static("x-frame-options"), val);
    }
    if res.headers().get("referrer-policy").is_none() {
        let val = HeaderValue::from_static("no-referrer");
        res.headers_mut()
            .insert(HeaderName::from_static("referrer-policy"), val);
    }

    res
}
