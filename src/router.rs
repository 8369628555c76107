//! Routing and HTTP plumbing for the cafe API.
//!
//! Routes are kept in a small table of method + path pattern (`/update/:id`)
//! entries, each with its own middleware chain. The table is served through a
//! single axum fallback so that matching, middleware ordering and the JSON
//! error envelope stay under our control:
//!
//! - global pre-middleware runs first and may short-circuit with a response
//! - route middleware runs after the path matched, with `params` filled in
//! - post-middleware sees every response, including 404/405 and rejected bodies
//!
//! Request bodies are read as `application/x-www-form-urlencoded` or
//! `multipart/form-data`; any other non-empty body is answered with 415.
//!
//! In debug mode a `/ws/reload` websocket pushes `reload` whenever a file in
//! the template directory changes.
use crate::error::ApiError;
use crate::settings::Settings;
use crate::store::CafeStore;
use axum::Router as AxumRouter;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Form, FromRequest, Multipart, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use notify::event::DataChange;
use notify::event::ModifyKind::Data;
use notify::{EventKind, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

pub use axum::http::Method;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: CafeStore,
    pub settings: Arc<Settings>,
}

/// Outcome of a handler: status, body and extra headers.
#[derive(Debug)]
pub struct Response {
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl Response {
    /// HTTP 200 with a plain body.
    pub fn ok(body: impl Into<String>) -> Self {
        Response {
            status_code: 200,
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn html(status_code: u16, body: impl Into<String>) -> Self {
        let mut headers = HashMap::new();
        headers.insert(
            "Content-Type".to_string(),
            "text/html; charset=utf-8".to_string(),
        );
        Response {
            status_code,
            body: body.into(),
            headers,
        }
    }

    /// JSON response; falls back to a 500 envelope if `data` cannot be serialized.
    pub fn json<T: Serialize>(
        data: T,
        status_code: u16,
        mut headers: HashMap<String, String>,
    ) -> Self {
        headers.insert(
            "Content-Type".to_string(),
            "application/json; charset=utf-8".to_string(),
        );
        match serde_json::to_string(&data) {
            Ok(body) => Response {
                status_code,
                body,
                headers,
            },
            Err(e) => {
                log::error!("Response serialization failed: {}", e);
                Response {
                    status_code: 500,
                    body: r#"{"error":{"Internal Server Error":"Serialization failed"}}"#
                        .to_string(),
                    headers,
                }
            }
        }
    }
}

impl IntoResponse for Response {
    fn into_response(self) -> axum::response::Response {
        let status =
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, self.body).into_response();
        for (key, value) in self.headers {
            match (HeaderName::try_from(key), HeaderValue::try_from(value)) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => log::warn!("Dropping invalid response header"),
            }
        }
        response
    }
}

/// Everything a handler or middleware may read about the current request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
    pub start_time: Option<Instant>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestContext {
            method,
            path: path.into(),
            params: HashMap::new(),
            query: HashMap::new(),
            form: HashMap::new(),
            start_time: None,
        }
    }

    pub fn with_query(mut self, pairs: &[(&str, &str)]) -> Self {
        self.query
            .extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn with_form(mut self, pairs: &[(&str, &str)]) -> Self {
        self.form
            .extend(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        self
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

pub type BoxedResponse = Pin<Box<dyn Future<Output = Response> + Send>>;

/// Async handler for an HTTP route.
pub type Handler = Arc<dyn Fn(RequestContext, AppState) -> BoxedResponse + Send + Sync>;

/// Pre-processing middleware. Returning `Some(Response)` stops the request there.
pub type Middleware = Arc<dyn Fn(&mut RequestContext) -> Option<Response> + Send + Sync>;

/// Post-processing middleware; may inspect or rewrite the response.
pub type PostMiddleware = Arc<dyn Fn(&RequestContext, Response) -> Response + Send + Sync>;

/// Wrap an async fn into a `Handler`.
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(RequestContext, AppState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(move |ctx: RequestContext, state: AppState| -> BoxedResponse {
        Box::pin(f(ctx, state))
    })
}

#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path_pattern: String,
    pub handler: Handler,
    pub middlewares: Vec<Middleware>,
}

#[derive(Clone, Default)]
pub struct Router {
    pub routes: Vec<Route>,
    pub middlewares: Vec<Middleware>,
    pub post_middlewares: Vec<PostMiddleware>,
    pub app_state: Option<AppState>,
}

impl Router {
    pub fn new() -> Self {
        Router::default()
    }

    /// Register a route with its own middleware chain.
    pub fn add_route(
        &mut self,
        method: Method,
        path_pattern: &str,
        handler: Handler,
        middlewares: Vec<Middleware>,
    ) {
        self.routes.push(Route {
            method,
            path_pattern: path_pattern.to_string(),
            handler,
            middlewares,
        });
    }

    /// Add a global pre-middleware to be run before all HTTP handlers.
    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.middlewares.push(middleware);
    }

    /// Add a post-middleware to be run after each HTTP handler.
    pub fn add_post_middleware(&mut self, middleware: PostMiddleware) {
        self.post_middlewares.push(middleware);
    }

    pub fn set_app_state(&mut self, state: AppState) {
        self.app_state = Some(state);
    }

    /// Run one request through middleware, route matching and the handler.
    pub async fn handle(&self, mut ctx: RequestContext) -> Response {
        let response = self.dispatch(&mut ctx).await;
        self.finish(&ctx, response)
    }

    fn finish(&self, ctx: &RequestContext, response: Response) -> Response {
        self.post_middlewares
            .iter()
            .fold(response, |response, post| post(ctx, response))
    }

    async fn dispatch(&self, ctx: &mut RequestContext) -> Response {
        for middleware in &self.middlewares {
            if let Some(response) = middleware(ctx) {
                return response;
            }
        }

        let mut path_matched = false;
        for route in &self.routes {
            let Some(params) = match_path(&route.path_pattern, &ctx.path) else {
                continue;
            };
            path_matched = true;
            if route.method != ctx.method {
                continue;
            }
            ctx.params = params;

            for middleware in &route.middlewares {
                if let Some(response) = middleware(ctx) {
                    return response;
                }
            }

            let Some(state) = self.app_state.clone() else {
                log::error!("Router has no application state; cannot serve {}", ctx.path);
                return ApiError::Internal("Server is not ready.".to_string()).into_response();
            };
            return (route.handler)(ctx.clone(), state).await;
        }

        if path_matched {
            ApiError::MethodNotAllowed(format!(
                "{} is not supported on {}.",
                ctx.method, ctx.path
            ))
            .into_response()
        } else {
            ApiError::NotFound(format!("No route for {}.", ctx.path)).into_response()
        }
    }

    /// Build the axum service: every request goes through `handle`, plus the
    /// template reload websocket when debug is on.
    pub fn into_axum(self) -> AxumRouter {
        let reload_dir = self
            .app_state
            .as_ref()
            .filter(|state| state.settings.debug)
            .map(|state| PathBuf::from(&state.settings.template.dir));

        let mut app: AxumRouter<Arc<Router>> = AxumRouter::new();
        if let Some(template_dir) = reload_dir {
            let (sender, _) = broadcast::channel::<String>(10);
            spawn_template_watcher(template_dir, sender.clone());
            app = app.route(
                "/ws/reload",
                get(move |ws: WebSocketUpgrade| {
                    let mut rx = sender.subscribe();
                    async move {
                        ws.on_upgrade(move |mut socket| async move {
                            log::info!("Hot reload client connected");
                            while let Ok(msg) = rx.recv().await {
                                if socket.send(Message::Text(msg.into())).await.is_err() {
                                    break;
                                }
                            }
                        })
                    }
                }),
            );
        }

        app.fallback(serve_request).with_state(Arc::new(self))
    }

    /// Bind `settings.bind_addr()` and serve until the process stops.
    pub async fn run(self, settings: &Settings) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = settings.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        log::info!("HTTP server running on http://{}", addr);
        axum::serve(listener, self.into_axum()).await?;
        Ok(())
    }
}

async fn serve_request(State(router): State<Arc<Router>>, request: Request) -> Response {
    let mut ctx = RequestContext::new(request.method().clone(), request.uri().path());
    match Query::<HashMap<String, String>>::try_from_uri(request.uri()) {
        Ok(Query(query)) => ctx.query = query,
        Err(e) => log::debug!("Ignoring unparsable query string: {}", e),
    }
    match read_form(request).await {
        Ok(form) => ctx.form = form,
        Err(e) => {
            log::debug!("Rejected body for {} {}: {}", ctx.method, ctx.path, e);
            return router.finish(&ctx, e.into_response());
        }
    }
    router.handle(ctx).await
}

/// Text fields of a urlencoded or multipart body; empty when there is no body.
async fn read_form(request: Request) -> Result<HashMap<String, String>, ApiError> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "application/x-www-form-urlencoded" => {
            let Form(form) = Form::<HashMap<String, String>>::from_request(request, &())
                .await
                .map_err(|e| ApiError::Validation(format!("Malformed form body: {e}")))?;
            Ok(form)
        }
        "multipart/form-data" => {
            let mut multipart = Multipart::from_request(request, &())
                .await
                .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?;
            let mut form = HashMap::new();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| ApiError::Validation(format!("Malformed multipart body: {e}")))?
            {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                // File parts have no place in a cafe record.
                if field.file_name().is_some() {
                    continue;
                }
                let value = field.text().await.map_err(|e| {
                    ApiError::Validation(format!("Malformed multipart field `{name}`: {e}"))
                })?;
                form.insert(name, value);
            }
            Ok(form)
        }
        _ => {
            let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
                .await
                .map_err(|e| ApiError::Validation(format!("Unreadable request body: {e}")))?;
            if body.is_empty() {
                Ok(HashMap::new())
            } else if content_type.is_empty() {
                Err(ApiError::UnsupportedMediaType(
                    "Request body has no Content-Type; send application/x-www-form-urlencoded or multipart/form-data.".to_string(),
                ))
            } else {
                Err(ApiError::UnsupportedMediaType(format!(
                    "Unsupported Content-Type `{content_type}`; send application/x-www-form-urlencoded or multipart/form-data."
                )))
            }
        }
    }
}

/// Watch the template directory and broadcast `reload` on content changes.
fn spawn_template_watcher(template_dir: PathBuf, sender: broadcast::Sender<String>) {
    tokio::spawn(async move {
        let (tx, mut rx) = tokio::sync::mpsc::channel(32);
        let watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let _ = tx.blocking_send(res);
        });
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(e) => {
                log::error!("Template watcher unavailable: {:?}", e);
                return;
            }
        };
        if let Err(e) = watcher.watch(&template_dir, RecursiveMode::Recursive) {
            log::error!("Cannot watch {}: {:?}", template_dir.display(), e);
            return;
        }

        while let Some(res) = rx.recv().await {
            match res {
                Ok(event) => {
                    if let EventKind::Modify(Data(DataChange::Content)) = event.kind {
                        if let Some(name) = event
                            .paths
                            .first()
                            .and_then(|p| p.file_name())
                            .and_then(|n| n.to_str())
                        {
                            log::info!("Template changed: {}", name);
                            let _ = sender.send("reload".to_string());
                        }
                    }
                }
                Err(e) => log::error!("Watch error: {:?}", e),
            }
        }
    });
}

/// Stamp the request start time; pair with `access_log`.
pub fn request_timer() -> Middleware {
    Arc::new(|ctx: &mut RequestContext| -> Option<Response> {
        ctx.start_time = Some(Instant::now());
        None
    })
}

/// Log `METHOD path -> status (elapsed)` for every response.
pub fn access_log() -> PostMiddleware {
    Arc::new(|ctx: &RequestContext, response: Response| -> Response {
        let elapsed = ctx
            .start_time
            .map(|t| format!("{:.2}ms", t.elapsed().as_secs_f64() * 1000.0))
            .unwrap_or_else(|| "-".to_string());
        log::info!(
            "{} {} -> {} ({})",
            ctx.method,
            ctx.path,
            response.status_code,
            elapsed
        );
        response
    })
}

/// Register routes as `METHOD "/path" => { handler, middleware... }`.
#[macro_export]
macro_rules! route {
    ($router:expr, $( $method:ident $path:expr => { $handler:expr $(, $middleware:expr )* } ),* $(,)?) => {
        $(
            $router.add_route(
                $crate::router::Method::$method,
                $path,
                $crate::router::handler($handler),
                vec![$($middleware),*]
            );
        )*
    };
}

/// Matches a path pattern (e.g. `/update/:id`) against a real path,
/// extracting parameters into a HashMap if matched, or None if not.
pub fn match_path(pattern: &str, path: &str) -> Option<HashMap<String, String>> {
    let pattern_parts: Vec<&str> = pattern.trim_matches('/').split('/').collect();
    let path_parts: Vec<&str> = path.trim_matches('/').split('/').collect();

    if pattern_parts.len() != path_parts.len() {
        return None;
    }

    let mut params = HashMap::new();

    for (p, a) in pattern_parts.iter().zip(path_parts.iter()) {
        if let Some(name) = p.strip_prefix(':') {
            if a.is_empty() {
                return None;
            }
            params.insert(name.to_string(), a.to_string());
        } else if p != a {
            return None;
        }
    }

    Some(params)
}
