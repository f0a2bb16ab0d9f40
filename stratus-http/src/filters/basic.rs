//! HTTP basic authentication.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::AUTHORIZATION;

use super::RequestFilter;
use crate::{HttpRequest, Result};

/// Adds `Authorization: Basic ...` to every request.
#[derive(Clone)]
pub struct BasicAuthentication {
    header: String,
}

impl std::fmt::Debug for BasicAuthentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthentication").finish_non_exhaustive()
    }
}

impl BasicAuthentication {
    /// Create a filter for the given credentials.
    pub fn new(user: &str, password: &str) -> Self {
        Self {
            header: format!("Basic {}", STANDARD.encode(format!("{}:{}", user, password))),
        }
    }
}

impl RequestFilter for BasicAuthentication {
    fn filter(&self, request: &mut HttpRequest) -> Result<()> {
        request.replace_header(AUTHORIZATION, &self.header)
    }
}
