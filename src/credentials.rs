//! Provider credentials and the signing scheme that uses them.

use std::fmt;
use std::sync::Arc;
use stratus_http::filters::{
    BasicAuthentication, Clock, QuerySigner, RequestFilter, SharedKeyAuthentication, SystemClock,
};

use crate::{Error, Result};

/// An identity and its secret, e.g. an access key id and secret key.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// How requests are authenticated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Signer {
    /// Requests go out unsigned.
    #[default]
    Anonymous,
    /// HTTP basic authentication.
    Basic,
    /// Azure Storage `SharedKeyLite`; the secret is the base64 account key.
    SharedKeyLite,
    /// AWS query API signature version 2.
    QueryV2,
}

impl Signer {
    /// Build the request filter for this scheme.
    ///
    /// Returns `None` for [`Signer::Anonymous`].
    pub fn filter(
        &self,
        credentials: Option<&Credentials>,
        clock: Arc<dyn Clock>,
    ) -> Result<Option<Arc<dyn RequestFilter>>> {
        if *self == Signer::Anonymous {
            return Ok(None);
        }
        let credentials = credentials
            .ok_or_else(|| Error::Credentials(format!("{:?} signing needs credentials", self)))?;
        if credentials.identity.is_empty() {
            return Err(Error::Credentials("identity is empty".to_string()));
        }

        let filter: Arc<dyn RequestFilter> = match self {
            Signer::Anonymous => return Ok(None),
            Signer::Basic => Arc::new(BasicAuthentication::new(
                &credentials.identity,
                &credentials.secret,
            )),
            Signer::SharedKeyLite => Arc::new(
                SharedKeyAuthentication::with_clock(
                    credentials.identity.clone(),
                    &credentials.secret,
                    clock,
                )
                .map_err(|e| Error::Credentials(e.to_string()))?,
            ),
            Signer::QueryV2 => Arc::new(QuerySigner::with_clock(
                credentials.identity.clone(),
                credentials.secret.clone(),
                clock,
            )),
        };
        Ok(Some(filter))
    }

    /// [`filter`](Self::filter) with the system clock.
    pub fn system_filter(
        &self,
        credentials: Option<&Credentials>,
    ) -> Result<Option<Arc<dyn RequestFilter>>> {
        self.filter(credentials, Arc::new(SystemClock))
    }
}
