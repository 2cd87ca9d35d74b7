use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use branchpass_gate::SwitchLanding;
use branchpass_token::CredentialClaims;
use http::header::LOCATION;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::middleware::{locality_guard, Bearer, Serving};
use crate::server::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub user_id: String,
    pub secret: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub credential: String,
    pub active_branch_id: i64,
    pub active_branch_name: String,
    pub home_branch_id: i64,
    pub home_branch_name: String,
    pub redirect_url: String,
    pub must_change_password: bool,
}

#[derive(Debug, Deserialize)]
pub struct SwitchLoginQuery {
    pub switch_token: Option<String>,
}

/// Every route, with the locality guard layered over all of them.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/branch/switch/{target_branch_id}", get(request_switch))
        .route("/auth/switchLogin", get(consume_switch))
        .route("/session", get(session))
        .layer(middleware::from_fn_with_state(state.clone(), locality_guard))
        .with_state(state)
}

async fn login(
    State(state): State<AppState>,
    Serving(serving): Serving,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let outcome = state.service.login(&body.user_id, &body.secret, &serving)?;
    let claims = outcome.credential.claims;

    Ok(Json(LoginResponse {
        credential: outcome.credential.token,
        active_branch_id: claims.active_branch.id,
        active_branch_name: claims.active_branch.name,
        home_branch_id: claims.home_branch.id,
        home_branch_name: claims.home_branch.name,
        redirect_url: outcome.redirect_url,
        must_change_password: claims.must_change_password,
    }))
}

async fn request_switch(
    State(state): State<AppState>,
    Bearer(bearer): Bearer,
    Path(target_branch_id): Path<i64>,
) -> Result<Response, ApiError> {
    let redirect = state
        .service
        .request_switch(bearer.as_deref(), target_branch_id)?;
    Ok(found(&redirect.location))
}

async fn consume_switch(
    State(state): State<AppState>,
    Serving(serving): Serving,
    Query(query): Query<SwitchLoginQuery>,
) -> Response {
    let landing = state
        .service
        .consume_switch(query.switch_token.as_deref(), &serving);
    if let SwitchLanding::Failure { code, .. } = &landing {
        debug!(code = code.as_str(), "switch landed with error");
    }
    found(landing.location())
}

async fn session(
    State(state): State<AppState>,
    Bearer(bearer): Bearer,
) -> Result<Json<CredentialClaims>, ApiError> {
    Ok(Json(state.service.session(bearer.as_deref())?))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}
