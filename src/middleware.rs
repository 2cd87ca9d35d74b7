//! Request-side plumbing: the locality guard layer and the extractors that
//! build a [`ServingRequest`] and pull the bearer credential.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::connect_info::{ConnectInfo, Connected};
use axum::extract::{FromRequestParts, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::serve::IncomingStream;
use branchpass_gate::{AuthError, GuardDecision, ServingRequest};
use http::header::{AUTHORIZATION, HOST};
use http::request::Parts;
use http::{Extensions, HeaderMap};
use tokio::net::TcpListener;

use crate::error::ApiError;
use crate::server::AppState;

const X_FORWARDED_HOST: &str = "x-forwarded-host";

/// Local address of the accepted connection, recorded as connect info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServingSocket(pub SocketAddr);

impl Connected<IncomingStream<'_, TcpListener>> for ServingSocket {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        // Port 0 never matches a published endpoint, so a lost address fails closed.
        let addr = stream
            .io()
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        ServingSocket(addr)
    }
}

/// Builds the resolver input for one request. Without connect info (tests,
/// custom transports) the configured listen address stands in for the socket.
pub fn serving_request(
    headers: &HeaderMap,
    extensions: &Extensions,
    listen_addr: SocketAddr,
) -> ServingRequest {
    let local_addr = extensions
        .get::<ConnectInfo<ServingSocket>>()
        .map(|ConnectInfo(socket)| socket.0)
        .unwrap_or(listen_addr);

    ServingRequest {
        forwarded_host: header_value(headers, X_FORWARDED_HOST),
        host: header_value(headers, HOST.as_str()),
        local_addr,
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// The credential from `Authorization: Bearer <token>`, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Extractor for the per-request [`ServingRequest`].
pub struct Serving(pub ServingRequest);

impl FromRequestParts<AppState> for Serving {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Serving(serving_request(
            &parts.headers,
            &parts.extensions,
            state.listen_addr,
        )))
    }
}

/// Extractor for the optional bearer credential.
pub struct Bearer(pub Option<String>);

impl<S: Send + Sync> FromRequestParts<S> for Bearer {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Bearer(bearer_token(&parts.headers)))
    }
}

/// Runs the locality guard ahead of every route.
///
/// Requests without a usable credential go through untouched; routes decide
/// whether they need one. A credential used off its home branch gets 403.
pub async fn locality_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let bearer = bearer_token(request.headers());
    let serving = serving_request(request.headers(), request.extensions(), state.listen_addr);

    match state.service.guard().check(bearer.as_deref(), &serving) {
        GuardDecision::Rejected(reason) => ApiError(AuthError::forbidden(reason)).into_response(),
        GuardDecision::Pass(_) | GuardDecision::Unauthenticated => next.run(request).await,
    }
}
