// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 the taskforge contributors

//! Identity boundary (spec §4.7, §6.1 "Identity boundary").
//!
//! Token validation and policy decisions are delegated: this module only
//! defines the interfaces the API layer calls out to and extracts the
//! bearer token from the request. Issuing tokens and evaluating policy are
//! explicit Non-goals; a deployment plugs in its own `TokenVerifier` and
//! `PolicyEngine`.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use taskforge_core::CoreError;

/// The authenticated caller, returned by a [`TokenVerifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: String,
    pub scopes: HashSet<String>,
}

/// Validates a bearer token into a [`Principal`] (spec §6.1). Deployments
/// supply their own implementation; this crate ships only the trait and a
/// fixed-token stand-in for local/test use.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, CoreError>;
}

/// A verifier that accepts any non-empty bearer token and grants it every
/// scope, for local development and integration tests where a real
/// identity provider is out of scope.
pub struct AllowAllVerifier;

#[async_trait]
impl TokenVerifier for AllowAllVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, CoreError> {
        if token.is_empty() {
            return Err(CoreError::Unauthenticated);
        }
        Ok(Principal { principal_id: token.to_string(), scopes: HashSet::from(["*".to_string()]) })
    }
}

/// An action/resource pair submitted to a [`PolicyEngine`] for a verdict
/// (spec §6.1 "the API calls out to a policy decision").
pub struct PolicyRequest<'a> {
    pub principal: &'a Principal,
    pub action: &'a str,
    pub resource: &'a str,
}

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    async fn authorize(&self, request: PolicyRequest<'_>) -> Result<(), CoreError>;
}

/// A policy engine that permits everything — policy evaluation itself is a
/// Non-goal; this is the default until a deployment supplies its own.
pub struct AllowAllPolicy;

#[async_trait]
impl PolicyEngine for AllowAllPolicy {
    async fn authorize(&self, _request: PolicyRequest<'_>) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Shared identity services, injected into the router as axum state.
#[derive(Clone)]
pub struct Identity {
    pub verifier: Arc<dyn TokenVerifier>,
    pub policy: Arc<dyn PolicyEngine>,
}

impl Identity {
    pub fn allow_all() -> Self {
        Self { verifier: Arc::new(AllowAllVerifier), policy: Arc::new(AllowAllPolicy) }
    }
}

/// Extracted from `Authorization: Bearer <token>`; handlers that need the
/// caller's identity take this as an extractor argument.
pub struct Bearer(pub String);

impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        let token = header.strip_prefix("Bearer ").ok_or(StatusCode::UNAUTHORIZED)?;
        Ok(Bearer(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_verifier_rejects_empty_token() {
        let v = AllowAllVerifier;
        assert!(v.verify("").await.is_err());
        assert!(v.verify("anything").await.is_ok());
    }

    #[tokio::test]
    async fn allow_all_policy_permits_everything() {
        let p = AllowAllPolicy;
        let principal = Principal { principal_id: "p".into(), scopes: HashSet::new() };
        let req = PolicyRequest { principal: &principal, action: "claim", resource: "task:1" };
        assert!(p.authorize(req).await.is_ok());
    }
}
