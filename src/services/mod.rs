use hyper::HeaderMap;

use crate::config::VALID_AUTH_TOKENS;

pub mod cache;
pub mod executor;
pub mod limiter;
pub mod notify;
pub mod registry;

#[cfg(test)]
mod tests;

pub fn is_authenticated(headers: &HeaderMap) -> bool {
    if let Some(auth_header) = headers.get("Authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if auth_str.starts_with("Bearer ") {
                let token = &auth_str[7..];
                return VALID_AUTH_TOKENS.contains_key(token);
            }
        }
    }
    false
}
