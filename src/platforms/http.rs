/// Shared HTTP plumbing for the platform clients
use crate::{
    error::{LinkError, LinkResult},
    models::Platform,
};
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Map a transport failure to a typed platform error
pub fn transport_error(platform: Platform, err: reqwest::Error) -> LinkError {
    LinkError::Network {
        platform,
        message: err.to_string(),
    }
}

/// Check the status code and decode a JSON body
pub async fn decode_json<T: DeserializeOwned>(platform: Platform, response: Response) -> LinkResult<T> {
    let status = response.status();

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(LinkError::AuthExpired { platform });
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        return Err(LinkError::RateLimited { platform, retry_after });
    }

    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(LinkError::Upstream {
            platform,
            status: status.as_u16(),
            message: message.chars().take(200).collect(),
        });
    }

    response.json::<T>().await.map_err(|e| LinkError::Decode {
        platform,
        message: e.to_string(),
    })
}
