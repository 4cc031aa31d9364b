//! Account resolution against the realtime database.
//!
//! The database is an external collaborator; this module consumes its HTTP
//! gateway through a deliberately narrow surface: one SQL row lookup per
//! table and one reducer invocation. Subscription bookkeeping from the
//! vendor SDK is remodeled as explicit async operations so ordering and
//! error propagation stay visible to the caller.

use crate::config::Config;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Opaque cryptographic account key: 32 bytes, written as 64 hex digits.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity([u8; 32]);

impl Identity {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_hex())
    }
}

#[derive(Debug, Error)]
#[error("invalid identity")]
pub struct IdentityParseError;

impl FromStr for Identity {
    type Err = IdentityParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.strip_prefix("0x").unwrap_or(value);
        if value.len() != 64 {
            return Err(IdentityParseError);
        }
        let bytes = hex::decode(value).map_err(|_| IdentityParseError)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| IdentityParseError)?;
        Ok(Identity(bytes))
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: u64,
    pub identity: Identity,
}

#[derive(Debug, Clone)]
pub struct AccountCustomization {
    pub account_id: u64,
    pub pfp_version: u8,
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("backend connection is not configured")]
    NotConfigured,
    #[error("backend connection failed: {0}")]
    Connect(String),
    #[error("account lookup failed: {0}")]
    Lookup(String),
    #[error("reducer call failed: {0}")]
    Procedure(String),
}

/// Opens sessions against the account directory.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn DirectorySession>, DirectoryError>;
}

/// One connection's worth of directory operations. `close` must run on every
/// exit path once a session has been opened.
#[async_trait]
pub trait DirectorySession: Send + Sync {
    async fn find_account(&self, identity: &Identity) -> Result<Option<Account>, DirectoryError>;

    async fn find_customization(
        &self,
        account_id: u64,
    ) -> Result<Option<AccountCustomization>, DirectoryError>;

    /// Triggers the authoritative server-side version bump. The local
    /// version computed by the caller is advisory only.
    async fn increment_pfp_version(&self) -> Result<(), DirectoryError>;

    async fn close(&self);
}

/// Production directory backed by the database's HTTP gateway.
#[derive(Clone)]
pub struct RemoteDirectory {
    config: Arc<Config>,
    client: reqwest::Client,
}

impl RemoteDirectory {
    pub fn new(config: Arc<Config>, client: reqwest::Client) -> Self {
        Self { config, client }
    }
}

#[async_trait]
impl AccountDirectory for RemoteDirectory {
    async fn open_session(&self) -> Result<Box<dyn DirectorySession>, DirectoryError> {
        let host = self
            .config
            .backend_host
            .as_deref()
            .ok_or(DirectoryError::NotConfigured)?;
        let module = self
            .config
            .backend_module
            .clone()
            .ok_or(DirectoryError::NotConfigured)?;
        let token = self
            .config
            .backend_token
            .clone()
            .ok_or(DirectoryError::NotConfigured)?;
        let base = Url::parse(host).map_err(|err| DirectoryError::Connect(err.to_string()))?;
        Ok(Box::new(RemoteSession {
            client: self.client.clone(),
            base,
            module,
            token,
        }))
    }
}

struct RemoteSession {
    client: reqwest::Client,
    base: Url,
    module: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SqlStatementResult {
    #[serde(default)]
    rows: Vec<Value>,
}

impl RemoteSession {
    async fn sql(&self, query: String) -> Result<Vec<Value>, DirectoryError> {
        let url = self
            .base
            .join(&format!("v1/database/{}/sql", self.module))
            .map_err(|err| DirectoryError::Connect(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .body(query)
            .send()
            .await
            .map_err(|err| DirectoryError::Connect(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Lookup(format!(
                "gateway query returned {status}"
            )));
        }
        let results: Vec<SqlStatementResult> = response
            .json()
            .await
            .map_err(|err| DirectoryError::Lookup(err.to_string()))?;
        Ok(results
            .into_iter()
            .next()
            .map(|result| result.rows)
            .unwrap_or_default())
    }
}

#[async_trait]
impl DirectorySession for RemoteSession {
    async fn find_account(&self, identity: &Identity) -> Result<Option<Account>, DirectoryError> {
        let rows = self
            .sql(format!(
                "SELECT id FROM Account WHERE identity = 0x{}",
                identity.to_hex()
            ))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let id = scalar_u64(row).ok_or_else(|| {
            DirectoryError::Lookup("account row has no decodable id".to_string())
        })?;
        Ok(Some(Account {
            id,
            identity: identity.clone(),
        }))
    }

    async fn find_customization(
        &self,
        account_id: u64,
    ) -> Result<Option<AccountCustomization>, DirectoryError> {
        let rows = self
            .sql(format!(
                "SELECT pfpVersion FROM AccountCustomization WHERE accountId = {account_id}"
            ))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let version = scalar_u64(row).ok_or_else(|| {
            DirectoryError::Lookup("customization row has no decodable version".to_string())
        })?;
        Ok(Some(AccountCustomization {
            account_id,
            pfp_version: version.min(u64::from(u8::MAX)) as u8,
        }))
    }

    async fn increment_pfp_version(&self) -> Result<(), DirectoryError> {
        let url = self
            .base
            .join(&format!(
                "v1/database/{}/call/IncrementPfpVersion",
                self.module
            ))
            .map_err(|err| DirectoryError::Procedure(err.to_string()))?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&Vec::<Value>::new())
            .send()
            .await
            .map_err(|err| DirectoryError::Procedure(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Procedure(format!(
                "reducer call returned {status}"
            )));
        }
        Ok(())
    }

    async fn close(&self) {
        debug!(module = %self.module, "directory session closed");
    }
}

/// Rows come back either as a bare value or a positional array; numbers may
/// arrive as JSON numbers or decimal strings depending on their width.
fn scalar_u64(row: &Value) -> Option<u64> {
    let value = match row {
        Value::Array(values) => values.first()?,
        other => other,
    };
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}
