use std::net::SocketAddr;
use axum::{
    extract::{MatchedPath, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use crate::state::AppState;
use crate::{auth, contacts, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { Json(json!({ "message": "Contact Book" })) }))
        .nest("/api",
              Router::new()
                  .merge(auth::router())
                  .merge(contacts::router())
                  .merge(users::router())
                  .route("/healthchecker", get(healthchecker))
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let path = span_path(req);
                    tracing::info_span!("http_request", %method, path = %path, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     _latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, "response");
                        } else {
                            tracing::info!(%status, "response");
                        }
                    },
                ),
        )
}

/// Path recorded on request spans. Verification tokens travel in the path and are masked.
fn span_path<B>(req: &axum::http::Request<B>) -> String {
    match req.extensions().get::<MatchedPath>() {
        Some(matched) => matched.as_str().to_string(),
        None => redact_path(req.uri().path()),
    }
}

fn redact_path(path: &str) -> String {
    match path.split_once("/confirmed_email/") {
        Some((head, _)) => format!("{head}/confirmed_email/:token"),
        None => path.to_string(),
    }
}

async fn healthchecker(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "message": "Welcome to Contact Book!" }))),
        Err(e) => {
            tracing::error!(error = %e, "healthcheck failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "detail": "Error connecting to the database" })),
            )
        }
    }
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
        .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::FakeState;
    use axum::{
        body::Body,
        http::{header, HeaderMap, Method, Request},
    };
    use tower::ServiceExt;

    struct Harness {
        app: Router,
        fake: FakeState,
    }

    fn harness() -> Harness {
        let fake = AppState::fake();
        Harness {
            app: build_app(fake.state.clone()),
            fake,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let headers = res.headers().clone();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, headers, body)
    }

    fn json_req(method: Method, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut b = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        b.body(Body::from(body.to_string())).unwrap()
    }

    fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut b = Request::builder().uri(uri);
        if let Some(t) = token {
            b = b.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        b.body(Body::empty()).unwrap()
    }

    fn login_req(email: &str, password: &str) -> Request<Body> {
        let form = format!("username={}&password={}", email.replace('@', "%40"), password);
        Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap()
    }

    async fn access_token(h: &Harness, email: &str) -> String {
        h.fake.users.insert_confirmed("ann", email, "s3cret-pass");
        let (status, _, body) = send(&h.app, login_req(email, "s3cret-pass")).await;
        assert_eq!(status, StatusCode::OK);
        body["access_token"].as_str().unwrap().to_string()
    }

    fn contact_body() -> Value {
        json!({
            "name": "Anna",
            "lastname": "Smith",
            "email": "anna@example.com",
            "phone": "+380501234567",
            "birthday": "1990-06-15",
            "notes": "met at a conference"
        })
    }

    #[tokio::test]
    async fn root_greets() {
        let h = harness();
        let (status, _, body) = send(&h.app, get_req("/", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Contact Book");
    }

    #[tokio::test]
    async fn signup_returns_created_user_without_secrets() {
        let h = harness();
        let req = json_req(
            Method::POST,
            "/api/auth/signup",
            None,
            json!({ "username": "ann", "email": "Ann@Example.com", "password": "12345678" }),
        );
        let (status, _, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["email"], "ann@example.com");
        assert_eq!(body["confirmed"], false);
        assert!(body.get("password_hash").is_none());
        assert!(body.get("refresh_token").is_none());

        let again = json_req(
            Method::POST,
            "/api/auth/signup",
            None,
            json!({ "username": "ann2", "email": "ann@example.com", "password": "12345678" }),
        );
        let (status, _, body) = send(&h.app, again).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Account already exists");
    }

    #[tokio::test]
    async fn login_failures_carry_bearer_challenge() {
        let h = harness();
        h.fake.users.insert_confirmed("ann", "ann@example.com", "s3cret-pass");
        let (status, headers, body) = send(&h.app, login_req("ann@example.com", "wrong-pass")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid password");
        assert_eq!(headers.get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[tokio::test]
    async fn protected_routes_require_access_token() {
        let h = harness();
        let (status, _, body) = send(&h.app, get_req("/api/contacts", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Could not validate credentials");

        let (status, _, _) = send(&h.app, get_req("/api/contacts", Some("garbage"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let h = harness();
        h.fake.users.insert_confirmed("ann", "ann@example.com", "s3cret-pass");
        let (_, _, pair) = send(&h.app, login_req("ann@example.com", "s3cret-pass")).await;
        let refresh = pair["refresh_token"].as_str().unwrap();

        let (status, _, body) = send(&h.app, get_req("/api/contacts", Some(refresh))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid scope for token");
    }

    #[tokio::test]
    async fn delete_is_limited_to_one_per_window() {
        let h = harness();
        let token = access_token(&h, "ann@example.com").await;

        let req = || {
            Request::builder()
                .method(Method::DELETE)
                .uri("/api/contacts/7")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap()
        };
        let (status, _, _) = send(&h.app, req()).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, headers, body) = send(&h.app, req()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["detail"], "Too many requests");
        let retry: u64 = headers
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=60).contains(&retry));
    }

    #[tokio::test]
    async fn rate_limit_runs_before_authentication() {
        let h = harness();
        for _ in 0..10 {
            let (status, _, _) = send(&h.app, get_req("/api/contacts", None)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _, _) = send(&h.app, get_req("/api/contacts", None)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn profile_is_limited_per_subject() {
        let h = harness();
        let ann = access_token(&h, "ann@example.com").await;
        for _ in 0..2 {
            let (status, _, body) = send(&h.app, get_req("/api/users/myself", Some(&ann))).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["email"], "ann@example.com");
        }
        let (status, _, _) = send(&h.app, get_req("/api/users/myself", Some(&ann))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let bob = access_token(&h, "bob@example.com").await;
        let (status, _, _) = send(&h.app, get_req("/api/users/myself", Some(&bob))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, _) = send(&h.app, get_req("/api/users/me", Some(&bob))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn avatar_upload_stores_object_url() {
        let h = harness();
        let token = access_token(&h, "ann@example.com").await;
        let boundary = "XBOUNDARY";
        let body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"a.png\"\r\n\
             Content-Type: image/png\r\n\r\nPNGDATA\r\n--{boundary}--\r\n"
        );
        let req = Request::builder()
            .method(Method::PATCH)
            .uri("/api/users/avatar")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap();
        let (status, _, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::OK);
        let avatar = body["avatar"].as_str().unwrap();
        assert!(avatar.starts_with("https://fake.local/avatars-bucket/avatars/"));
        assert!(avatar.ends_with(body["id"].as_str().unwrap()));
    }

    #[tokio::test]
    async fn contact_validation_errors_are_unprocessable() {
        let h = harness();
        let token = access_token(&h, "ann@example.com").await;

        let mut bad = contact_body();
        bad["name"] = json!("Al");
        let (status, _, _) = send(&h.app, json_req(Method::POST, "/api/contacts", Some(&token), bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _, _) = send(&h.app, get_req("/api/contacts/0", Some(&token))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, _, _) = send(&h.app, get_req("/api/contacts?limit=5", Some(&token))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn contacts_are_private_to_their_owner() {
        let h = harness();
        let ann = access_token(&h, "ann@example.com").await;
        let (status, _, created) =
            send(&h.app, json_req(Method::POST, "/api/contacts", Some(&ann), contact_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_i64().unwrap();

        let bob = access_token(&h, "bob@example.com").await;
        let (status, _, body) =
            send(&h.app, get_req(&format!("/api/contacts/{id}"), Some(&bob))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Contact not found");

        let (_, _, list) = send(&h.app, get_req("/api/contacts", Some(&bob))).await;
        assert_eq!(list.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn end_to_end_session_and_contacts() {
        let mut h = harness();

        let signup = json_req(
            Method::POST,
            "/api/auth/signup",
            None,
            json!({ "username": "ann", "email": "ann@example.com", "password": "s3cret-pass" }),
        );
        let (status, _, _) = send(&h.app, signup).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _, body) = send(&h.app, login_req("ann@example.com", "s3cret-pass")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Email not confirmed");

        let mail = h.fake.outbox.try_recv().expect("verification email queued");
        let uri = format!("/api/auth/confirmed_email/{}", mail.token);
        let (status, _, body) = send(&h.app, get_req(&uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Email confirmed");
        let (_, _, body) = send(&h.app, get_req(&uri, None)).await;
        assert_eq!(body["message"], "Your email is already confirmed");

        let (status, _, pair) = send(&h.app, login_req("ann@example.com", "s3cret-pass")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pair["token_type"], "bearer");
        let access = pair["access_token"].as_str().unwrap().to_string();
        let refresh = pair["refresh_token"].as_str().unwrap().to_string();

        let (status, _, created) =
            send(&h.app, json_req(Method::POST, "/api/contacts", Some(&access), contact_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["birthday"], "1990-06-15");
        assert_eq!(created["user"]["email"], "ann@example.com");
        assert!(created["user"].get("password_hash").is_none());
        assert_eq!(created["favourite"], false);
        let id = created["id"].as_i64().unwrap();

        let (_, _, list) = send(&h.app, get_req("/api/contacts", Some(&access))).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (_, _, found) = send(&h.app, get_req("/api/contacts/search?search=SMI", Some(&access))).await;
        assert_eq!(found.as_array().unwrap().len(), 1);

        let (_, _, soon) = send(&h.app, get_req("/api/contacts/birthdays?days=366", Some(&access))).await;
        assert_eq!(soon.as_array().unwrap().len(), 1);

        let (status, _, patched) = send(
            &h.app,
            json_req(
                Method::PATCH,
                &format!("/api/contacts/{id}"),
                Some(&access),
                json!({ "favourite": true }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(patched["favourite"], true);
        assert_eq!(patched["name"], "Anna");

        let (status, _, rotated) =
            send(&h.app, get_req("/api/auth/refresh_token", Some(&refresh))).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(rotated["refresh_token"].as_str().unwrap(), refresh);

        let (status, _, body) = send(&h.app, get_req("/api/auth/refresh_token", Some(&refresh))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], "Invalid refresh token");

        let delete = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/api/contacts/{id}"))
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(&h.app, delete).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(&h.app, get_req(&format!("/api/contacts/{id}"), Some(&access))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn request_email_for_unknown_user_is_not_found() {
        let h = harness();
        let req = json_req(
            Method::POST,
            "/api/auth/request_email",
            None,
            json!({ "email": "ghost@example.com" }),
        );
        let (status, _, body) = send(&h.app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "User not found");
    }

    #[test]
    fn span_path_masks_verification_tokens() {
        assert_eq!(
            redact_path("/api/auth/confirmed_email/eyJhbGciOi.abc.def"),
            "/api/auth/confirmed_email/:token"
        );
        assert_eq!(redact_path("/api/contacts/7"), "/api/contacts/7");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn verification_token_never_reaches_logs() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("contactbook=debug,tower_http=debug")
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let h = harness();
        let token = h
            .fake
            .state
            .keys
            .sign_email_verification("ghost@example.com")
            .unwrap();
        let uri = format!("/api/auth/confirmed_email/{token}");
        let (status, _, _) = send(&h.app, get_req(&uri, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("http_request"));
        assert!(output.contains("/api/auth/confirmed_email/:token"));
        assert!(!output.contains(&token));
    }

    #[tokio::test]
    async fn malformed_input_renders_as_unprocessable_detail() {
        let h = harness();
        let token = access_token(&h, "ann@example.com").await;

        for uri in [
            "/api/contacts/birthdays?days=abc",
            "/api/contacts/search",
            "/api/contacts/abc",
        ] {
            let (status, headers, body) = send(&h.app, get_req(uri, Some(&token))).await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
            assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
            assert!(body["detail"].is_string(), "{uri}");
        }

        let bad_json = Request::builder()
            .method(Method::POST)
            .uri("/api/contacts")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, _, body) = send(&h.app, bad_json).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());

        let missing_field = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=ann%40example.com"))
            .unwrap();
        let (status, _, body) = send(&h.app, missing_field).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["detail"].is_string());
    }
}
