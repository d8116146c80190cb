use http::{HeaderValue, Method};
use thiserror::Error;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

#[derive(Debug, Error)]
pub enum CorsDomainError {
    #[error("{domain} is an invalid header value")]
    InvalidHeader { domain: String },
    #[error("wildcard origin (`*`) cannot be part of an origin list: {input}")]
    WildCardNotAllowed { input: String },
}

/// Builds the gateway's CORS layer from a configured origin string: either
/// `"*"` for any origin, or a comma-separated list of exact origins.
pub fn create_cors_layer(cors_origins: &str) -> Result<CorsLayer, CorsDomainError> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if cors_origins.trim() == "*" {
        return Ok(base.allow_origin(Any));
    }

    let domains: Vec<&str> = cors_origins.split(',').map(str::trim).collect();
    if domains.iter().any(|domain| *domain == "*") {
        return Err(CorsDomainError::WildCardNotAllowed {
            input: cors_origins.to_string(),
        });
    }

    let origins = domains
        .into_iter()
        .map(|domain| {
            domain
                .parse::<HeaderValue>()
                .map_err(|_| CorsDomainError::InvalidHeader {
                    domain: domain.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(base.allow_origin(AllowOrigin::list(origins)))
}
