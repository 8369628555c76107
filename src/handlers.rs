//! The cafe API routes.
//!
//! | Route            | Verb   | Result                                   |
//! |------------------|--------|------------------------------------------|
//! | `/`              | GET    | landing page                             |
//! | `/random`        | GET    | `{"cafe": {..., "amenities": {...}}}`    |
//! | `/all`           | GET    | `{"cafes": [...]}`                       |
//! | `/search?loc=`   | GET    | `{"cafe": {...}}` or 404                 |
//! | `/add`           | POST   | form fields, `{"response": {...}}`       |
//! | `/update/:id`    | PATCH  | `?new_price=`, `{"response": {...}}`     |
//! | `/remove/:id`    | DELETE | `?api-key=`, `{"response": {...}}`       |
use crate::error::ApiError;
use crate::forms::{new_cafe_from_form, optional, parse_id};
use crate::models::RandomCafe;
use crate::route;
use crate::router::{
    AppState, Middleware, RequestContext, Response, Router, access_log, request_timer,
};
use crate::template::render_template;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn ok_json(value: serde_json::Value) -> Response {
    Response::json(value, 200, HashMap::new())
}

fn respond(result: Result<Response, ApiError>) -> Response {
    result.unwrap_or_else(ApiError::into_response)
}

pub async fn home(_ctx: RequestContext, state: AppState) -> Response {
    let context = json!({
        "title": "Cafe & Wifi API",
        "routes": [
            {"method": "GET", "path": "/random", "about": "A random cafe."},
            {"method": "GET", "path": "/all", "about": "Every cafe."},
            {"method": "GET", "path": "/search?loc=", "about": "First cafe at a location."},
            {"method": "POST", "path": "/add", "about": "Add a cafe (form fields)."},
            {"method": "PATCH", "path": "/update/<id>?new_price=", "about": "Change a coffee price."},
            {"method": "DELETE", "path": "/remove/<id>?api-key=", "about": "Remove a cafe."},
        ],
        "debug": state.settings.debug,
    });
    render_template(&state.settings.template, "index.html", &context)
}

pub async fn random_cafe(_ctx: RequestContext, state: AppState) -> Response {
    respond(try_random_cafe(&state).await)
}

async fn try_random_cafe(state: &AppState) -> Result<Response, ApiError> {
    let cafe = state.store.get_random().await?;
    Ok(ok_json(json!({ "cafe": RandomCafe::from(&cafe) })))
}

pub async fn all_cafes(_ctx: RequestContext, state: AppState) -> Response {
    respond(try_all_cafes(&state).await)
}

async fn try_all_cafes(state: &AppState) -> Result<Response, ApiError> {
    let cafes = state.store.list_all().await?;
    Ok(ok_json(json!({ "cafes": cafes })))
}

pub async fn search_cafe(ctx: RequestContext, state: AppState) -> Response {
    respond(try_search_cafe(&ctx, &state).await)
}

async fn try_search_cafe(ctx: &RequestContext, state: &AppState) -> Result<Response, ApiError> {
    let location = ctx.query_param("loc").unwrap_or_default();
    match state.store.find_by_location(location).await? {
        Some(cafe) => Ok(ok_json(json!({ "cafe": cafe }))),
        None => Err(ApiError::NotFound(
            "Sorry, we do not have a cafe at that location.".to_string(),
        )),
    }
}

pub async fn add_cafe(ctx: RequestContext, state: AppState) -> Response {
    respond(try_add_cafe(&ctx, &state).await)
}

async fn try_add_cafe(ctx: &RequestContext, state: &AppState) -> Result<Response, ApiError> {
    let new_cafe = new_cafe_from_form(&ctx.form)?;
    state.store.create(new_cafe).await?;
    Ok(ok_json(json!({
        "response": { "success": "Successfully added the new cafe." }
    })))
}

fn cafe_id_not_found() -> ApiError {
    ApiError::NotFound("Sorry a cafe with that id was not found in the database.".to_string())
}

pub async fn update_price(ctx: RequestContext, state: AppState) -> Response {
    respond(try_update_price(&ctx, &state).await)
}

async fn try_update_price(ctx: &RequestContext, state: &AppState) -> Result<Response, ApiError> {
    let new_price = optional(&ctx.query, "new_price").ok_or_else(|| {
        ApiError::Validation("Missing required query parameter `new_price`.".to_string())
    })?;
    let id = parse_id(ctx.params.get("id")).ok_or_else(cafe_id_not_found)?;
    state
        .store
        .update_price(id, &new_price)
        .await?
        .ok_or_else(cafe_id_not_found)?;
    Ok(ok_json(json!({
        "response": { "Success": "Successfully updated the price." }
    })))
}

pub async fn delete_cafe(ctx: RequestContext, state: AppState) -> Response {
    respond(try_delete_cafe(&ctx, &state).await)
}

async fn try_delete_cafe(ctx: &RequestContext, state: &AppState) -> Result<Response, ApiError> {
    let id = parse_id(ctx.params.get("id")).ok_or_else(cafe_id_not_found)?;
    if !state.store.delete(id).await? {
        return Err(cafe_id_not_found());
    }
    Ok(ok_json(json!({
        "response": { "success": "Successfully deleted the cafe from the database." }
    })))
}

/// Reject the request unless `api-key` equals `secret`.
pub fn require_api_key(secret: String) -> Middleware {
    Arc::new(move |ctx: &mut RequestContext| -> Option<Response> {
        if ctx.query_param("api-key") == Some(secret.as_str()) {
            None
        } else {
            log::warn!("Rejected {} {}: bad api-key", ctx.method, ctx.path);
            Some(
                ApiError::Forbidden(
                    "Sorry, that's not allowed. Make sure you have the correct api_key."
                        .to_string(),
                )
                .into_response(),
            )
        }
    })
}

/// All routes, wired to `state`.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new();
    router.add_middleware(request_timer());
    router.add_post_middleware(access_log());

    let api_key = state.settings.api_key.clone();
    route!(router,
        GET "/" => { home },
        GET "/random" => { random_cafe },
        GET "/all" => { all_cafes },
        GET "/search" => { search_cafe },
        POST "/add" => { add_cafe },
        PATCH "/update/:id" => { update_price },
        DELETE "/remove/:id" => { delete_cafe, require_api_key(api_key) },
    );

    router.set_app_state(state);
    router
}
