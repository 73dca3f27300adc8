//! Scheduler-only authentication for the trigger and status endpoints.
//!
//! Callers are cron jobs or other schedulers, never end users. Two schemes
//! are supported: a bearer token in `Authorization`, or a shared secret in a
//! configurable header.

use axum::http::HeaderMap;
use upkeep_core::config::{AuthConfig, AuthMode};
use upkeep_core::UpkeepError;

pub fn authorize(cfg: &AuthConfig, headers: &HeaderMap) -> Result<(), UpkeepError> {
    match cfg.mode {
        AuthMode::None => Ok(()),
        AuthMode::Token => {
            let expected = cfg
                .token
                .as_deref()
                .ok_or_else(|| failed("no scheduler token configured"))?;
            let token = extract_bearer(headers)
                .ok_or_else(|| failed("missing bearer token"))?;
            if token == expected {
                Ok(())
            } else {
                Err(failed("bearer token mismatch"))
            }
        }
        AuthMode::SharedSecret => {
            let expected = cfg
                .shared_secret
                .as_deref()
                .ok_or_else(|| failed("no shared secret configured"))?;
            let provided = headers
                .get(cfg.header.as_str())
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| failed(&format!("missing {} header", cfg.header)))?;
            if provided == expected {
                Ok(())
            } else {
                Err(failed("shared secret mismatch"))
            }
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn failed(reason: &str) -> UpkeepError {
    UpkeepError::AuthFailed(reason.to_string())
}
