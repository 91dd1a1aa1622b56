//! Authentication application for outbound connector requests.
//!
//! Consumes an [`AuthDescriptor`] and mutates a `reqwest::RequestBuilder`.
//! Secret fields are env-expanded first and held in `SecretString` so an
//! accidental `Debug` of intermediate state never prints a credential.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use maestro_core::security::validate_header;
use maestro_types::connector::AuthDescriptor;
use maestro_types::error::EngineError;
use reqwest::RequestBuilder;
use reqwest::header::AUTHORIZATION;
use secrecy::{ExposeSecret, SecretString};

use crate::env::expand_env;

fn expand_secret(value: &str) -> Result<SecretString, EngineError> {
    let expanded = expand_env(value).map_err(|err| {
        // Keep the env error's detail but surface it as an auth failure.
        EngineError::auth(err.message).with_suggestion(
            err.suggestion
                .unwrap_or_else(|| "Check the connector's auth configuration".to_string()),
        )
    })?;
    Ok(SecretString::from(expanded))
}

/// Apply an auth descriptor to a request under construction.
pub fn apply_auth(
    builder: RequestBuilder,
    auth: &AuthDescriptor,
) -> Result<RequestBuilder, EngineError> {
    match auth {
        AuthDescriptor::Bearer { token } => {
            let token = expand_secret(token)?;
            Ok(builder.header(
                AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ))
        }
        AuthDescriptor::Basic { username, password } => {
            let username = expand_secret(username)?;
            let password = expand_secret(password)?;
            let encoded = BASE64.encode(format!(
                "{}:{}",
                username.expose_secret(),
                password.expose_secret()
            ));
            Ok(builder.header(AUTHORIZATION, format!("Basic {encoded}")))
        }
        AuthDescriptor::ApiKey { header, value } => {
            let value = expand_secret(value)?;
            validate_header(header, value.expose_secret())?;
            Ok(builder.header(header.as_str(), value.expose_secret()))
        }
        AuthDescriptor::Bot { token } => {
            let token = expand_secret(token)?;
            Ok(builder.header(AUTHORIZATION, format!("Bot {}", token.expose_secret())))
        }
        AuthDescriptor::Oauth2 { .. } => Err(EngineError::not_implemented(
            "oauth2 client-credentials auth is not implemented",
        )
        .with_suggestion("Use bearer, basic, api_key, or bot auth")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
