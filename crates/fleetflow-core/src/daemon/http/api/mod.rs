//! HTTP API handlers and the request auth guards.

pub mod agents;
pub mod relay;
pub mod tasks;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;

use super::error::ApiError;
use crate::auth::TokenClaims;
use crate::models::Agent;
use crate::AppCore;

pub(crate) const ACCOUNT_KEY_HEADER: &str = "x-account-key";

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(ApiError::unauthorized)
}

/// Verify the bearer token only. Used where no path agent ID exists.
pub(crate) fn bearer_claims(core: &AppCore, headers: &HeaderMap) -> Result<TokenClaims, ApiError> {
    let token = bearer_token(headers)?;
    Ok(core.tokens.verify(token)?)
}

/// Full agent guard: valid token, token agent matches the path agent, and
/// the stored agent belongs to the token's account. Every mismatch is the
/// same opaque auth failure.
pub(crate) fn authorize_agent(
    core: &AppCore,
    headers: &HeaderMap,
    agent_id: &str,
) -> Result<(TokenClaims, Agent), ApiError> {
    let claims = bearer_claims(core, headers)?;
    if claims.agent_id != agent_id {
        return Err(ApiError::unauthorized());
    }
    let agent = core
        .storage
        .agents
        .get(agent_id)
        .map_err(|_| ApiError::internal())?
        .ok_or_else(ApiError::unauthorized)?;
    if agent.account_id != claims.account_id {
        return Err(ApiError::unauthorized());
    }
    Ok((claims, agent))
}

/// Owner/dashboard guard: shared account key when one is configured.
pub(crate) fn authorize_owner(core: &AppCore, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &core.account_key else {
        return Ok(());
    };
    let provided = headers
        .get(ACCOUNT_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::unauthorized)?;
    if provided != expected {
        return Err(ApiError::unauthorized());
    }
    Ok(())
}
