use cafes::orm::{Db, auto_migrate};
use cafes::router::*;
use cafes::{CafeStore, Settings};
use serde::{Serialize, Serializer};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

async fn state() -> AppState {
    let db = Arc::new(Db::connect("sqlite::memory:").await.unwrap());
    auto_migrate(db.clone()).await.unwrap();
    AppState {
        store: CafeStore::new(db),
        settings: Arc::new(Settings::default()),
    }
}

// ========== Response ==========

#[test]
fn test_response_ok() {
    let resp = Response::ok("hello world");
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, "hello world");
    assert!(resp.headers.is_empty());
}

#[test]
fn test_response_html_sets_content_type() {
    let resp = Response::html(404, "<p>gone</p>");
    assert_eq!(resp.status_code, 404);
    assert_eq!(
        resp.headers.get("Content-Type").unwrap(),
        "text/html; charset=utf-8"
    );
}

#[test]
fn test_response_json_success() {
    let mut headers = HashMap::new();
    headers.insert("X-Test".into(), "yes".into());
    let resp = Response::json(json!({"foo": "bar"}), 201, headers);
    assert_eq!(resp.status_code, 201);
    assert_eq!(
        resp.headers.get("Content-Type").unwrap(),
        "application/json; charset=utf-8"
    );
    assert_eq!(resp.headers.get("X-Test").unwrap(), "yes");
    assert!(resp.body.contains("\"foo\":\"bar\""));
}

struct AlwaysFailsSerialize;

impl Serialize for AlwaysFailsSerialize {
    fn serialize<S>(&self, _serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Err(serde::ser::Error::custom("Forced failure"))
    }
}

#[test]
fn test_response_json_error_branch_always_fails() {
    let resp = Response::json(AlwaysFailsSerialize, 200, HashMap::new());
    assert_eq!(resp.status_code, 500);
    assert!(resp.body.contains("Serialization failed"));
    assert_eq!(
        resp.headers.get("Content-Type").unwrap(),
        "application/json; charset=utf-8"
    );
}

// ========== Path matching ==========

#[test]
fn test_static_and_param_matching() {
    assert!(match_path("/", "/").is_some());
    assert!(match_path("/all", "/all").is_some());
    let params = match_path("/update/:id", "/update/42").unwrap();
    assert_eq!(params.get("id"), Some(&"42".to_string()));
    assert!(match_path("/remove/:id", "/remove/").is_none());
    assert!(match_path("/all", "/random").is_none());
    assert!(match_path("/", "/random").is_none());
    assert!(match_path("/update/:id", "/update/1/extra").is_none());
}

// ========== Dispatch ==========

#[tokio::test]
async fn test_dispatch_by_method_and_path() {
    let mut router = Router::new();
    router.add_route(
        Method::GET,
        "/hi/:who",
        handler(|ctx: RequestContext, _state: AppState| async move {
            Response::ok(format!("hello {}", ctx.params["who"]))
        }),
        vec![],
    );
    router.set_app_state(state().await);

    let resp = router
        .handle(RequestContext::new(Method::GET, "/hi/tomato"))
        .await;
    assert_eq!(resp.status_code, 200);
    assert_eq!(resp.body, "hello tomato");

    let resp = router
        .handle(RequestContext::new(Method::POST, "/hi/tomato"))
        .await;
    assert_eq!(resp.status_code, 405);
    assert!(resp.body.contains("Method Not Allowed"));

    let resp = router
        .handle(RequestContext::new(Method::GET, "/nowhere"))
        .await;
    assert_eq!(resp.status_code, 404);
    let body: serde_json::Value = serde_json::from_str(&resp.body).unwrap();
    assert!(body["error"]["Not Found"].is_string());
}

#[tokio::test]
async fn test_route_macro_registers_method() {
    async fn pong(_ctx: RequestContext, _state: AppState) -> Response {
        Response::ok("pong")
    }

    let mut router = Router::new();
    cafes::route!(router,
        PATCH "/ping" => { pong },
    );
    router.set_app_state(state().await);

    assert_eq!(router.routes.len(), 1);
    assert_eq!(router.routes[0].method, Method::PATCH);
    let resp = router
        .handle(RequestContext::new(Method::PATCH, "/ping"))
        .await;
    assert_eq!(resp.body, "pong");
}

#[tokio::test]
async fn test_route_middleware_short_circuits_before_handler() {
    let mut router = Router::new();
    let guard: Middleware = Arc::new(|ctx: &mut RequestContext| -> Option<Response> {
        if ctx.query_param("token") == Some("abc123") {
            None
        } else {
            Some(Response::json(json!({"blocked": true}), 403, HashMap::new()))
        }
    });
    router.add_route(
        Method::GET,
        "/secret",
        handler(|_ctx: RequestContext, _state: AppState| async { Response::ok("allowed") }),
        vec![guard],
    );
    router.set_app_state(state().await);

    let blocked = router
        .handle(RequestContext::new(Method::GET, "/secret"))
        .await;
    assert_eq!(blocked.status_code, 403);

    let allowed = router
        .handle(RequestContext::new(Method::GET, "/secret").with_query(&[("token", "abc123")]))
        .await;
    assert_eq!(allowed.body, "allowed");
}

#[tokio::test]
async fn test_global_and_post_middleware_order() {
    let mut router = Router::new();
    router.add_middleware(Arc::new(|ctx: &mut RequestContext| -> Option<Response> {
        if ctx.path == "/blocked" {
            Some(Response {
                status_code: 403,
                body: "block".to_string(),
                headers: HashMap::new(),
            })
        } else {
            None
        }
    }));
    router.add_post_middleware(Arc::new(|_ctx: &RequestContext, mut r: Response| -> Response {
        r.body.push('1');
        r
    }));
    router.add_post_middleware(Arc::new(|_ctx: &RequestContext, mut r: Response| -> Response {
        r.body.push('2');
        r
    }));
    let h = handler(|_ctx: RequestContext, _state: AppState| async { Response::ok("x") });
    router.add_route(Method::GET, "/blocked", h.clone(), vec![]);
    router.add_route(Method::GET, "/open", h, vec![]);
    router.set_app_state(state().await);

    let resp = router
        .handle(RequestContext::new(Method::GET, "/blocked"))
        .await;
    assert_eq!(resp.status_code, 403);
    assert_eq!(resp.body, "block12");

    let resp = router
        .handle(RequestContext::new(Method::GET, "/open"))
        .await;
    assert_eq!(resp.body, "x12");
}

#[tokio::test]
async fn test_request_timer_feeds_access_log() {
    let mut ctx = RequestContext::new(Method::GET, "/all");
    assert!(request_timer()(&mut ctx).is_none());
    assert!(ctx.start_time.is_some());
    let resp = access_log()(&ctx, Response::ok("done"));
    assert_eq!(resp.body, "done");
}

#[tokio::test]
async fn test_router_without_state_reports_internal_error() {
    let mut router = Router::new();
    router.add_route(
        Method::GET,
        "/",
        handler(|_ctx: RequestContext, _state: AppState| async { Response::ok("never") }),
        vec![],
    );
    let resp = router.handle(RequestContext::new(Method::GET, "/")).await;
    assert_eq!(resp.status_code, 500);
}
