#![forbid(unsafe_code)]

//! Blocking HTTP client for the `/v1` API.

use std::fs;
use std::path::{Path, PathBuf};

use bazaar_engines::http::{build_http_agent, classify_transport_error_kind, DEFAULT_USER_AGENT};
use bazaar_kernel_contracts::arbitration::ArbitratedRecord;
use bazaar_kernel_contracts::records::{Page, PersistedSimulation, PersistedTransaction, RecordId};
use bazaar_kernel_contracts::simulation::SimulationOutcome;
use bazaar_storage::OwnerStats;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const API_URL_DEFAULT: &str = "http://127.0.0.1:8080";
pub const CLIENT_TIMEOUT_MS_DEFAULT: u32 = 60_000;
const MULTIPART_BOUNDARY: &str = "----bazaar-cli-boundary-7d9c1f";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("server unreachable ({kind})")]
    Transport { kind: &'static str },
    #[error("API error {status} {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    Config(String),
}

impl ClientError {
    /// True when the write may not have reached the store and should be
    /// counted as unsynced.
    pub fn is_unsynced(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Api { status, .. } => *status == 503,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptUploadReply {
    pub success: bool,
    pub synced: bool,
    pub record_id: Option<RecordId>,
    pub result: ArbitratedRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResultBody {
    pub arbitrated: ArbitratedRecord,
    pub outcome: SimulationOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReply {
    pub success: bool,
    pub synced: bool,
    pub record_id: Option<RecordId>,
    pub result: SimulationResultBody,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub created_after: Option<u64>,
    pub created_before: Option<u64>,
    pub source: Option<String>,
}

impl ListFilter {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(v) = self.limit {
            pairs.push(("limit", v.to_string()));
        }
        if let Some(v) = self.offset {
            pairs.push(("offset", v.to_string()));
        }
        if let Some(v) = self.created_after {
            pairs.push(("created_after", v.to_string()));
        }
        if let Some(v) = self.created_before {
            pairs.push(("created_before", v.to_string()));
        }
        if let Some(v) = &self.source {
            pairs.push(("source", v.clone()));
        }
        pairs
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_url: String,
    pub token: Option<String>,
    pub timeout_ms: u32,
}

impl ClientConfig {
    pub fn v1(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            timeout_ms: CLIENT_TIMEOUT_MS_DEFAULT,
        }
    }
}

pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let agent = build_http_agent(config.timeout_ms, DEFAULT_USER_AGENT)
            .map_err(ClientError::Config)?;
        Ok(Self {
            agent,
            base_url: config.api_url.clone(),
            token: config.token.clone(),
        })
    }

    pub fn ready(&self) -> Result<bool, ClientError> {
        match self.agent.get(&self.url("/readyz")).call() {
            Ok(_) => Ok(true),
            Err(ureq::Error::Status(503, _)) => Ok(false),
            Err(e) => Err(client_error_from_ureq(e)),
        }
    }

    pub fn upload_receipt(
        &self,
        path: &Path,
        source_label: Option<&str>,
        hint: Option<&str>,
    ) -> Result<ReceiptUploadReply, ClientError> {
        let bytes = fs::read(path).map_err(|source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload");
        let body = multipart_body(file_name, mime_for_path(path), &bytes, source_label, hint);
        let req = self.authed(self.agent.post(&self.url("/v1/receipts"))).set(
            "Content-Type",
            &format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        );
        decode(req.send_bytes(&body))
    }

    pub fn simulate(&self, query: &str) -> Result<SimulationReply, ClientError> {
        let req = self.authed(self.agent.post(&self.url("/v1/simulations")));
        decode(req.send_json(serde_json::json!({ "query": query })))
    }

    pub fn list_transactions(
        &self,
        filter: &ListFilter,
    ) -> Result<Page<PersistedTransaction>, ClientError> {
        self.get_json("/v1/transactions", filter)
    }

    pub fn list_simulations(
        &self,
        filter: &ListFilter,
    ) -> Result<Page<PersistedSimulation>, ClientError> {
        self.get_json("/v1/simulations", filter)
    }

    pub fn delete_transaction(&self, id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/v1/transactions/{id}"))
    }

    pub fn delete_simulation(&self, id: &str) -> Result<(), ClientError> {
        self.delete(&format!("/v1/simulations/{id}"))
    }

    pub fn stats(&self) -> Result<OwnerStats, ClientError> {
        self.get_json("/v1/stats", &ListFilter::default())
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        filter: &ListFilter,
    ) -> Result<T, ClientError> {
        let mut req = self.authed(self.agent.get(&self.url(path)));
        for (k, v) in filter.query_pairs() {
            req = req.query(k, &v);
        }
        decode(req.call())
    }

    fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.authed(self.agent.delete(&self.url(path)))
            .call()
            .map(|_| ())
            .map_err(client_error_from_ureq)
    }

    fn authed(&self, req: ureq::Request) -> ureq::Request {
        match &self.token {
            Some(token) => req.set("Authorization", &format!("Bearer {token}")),
            None => req,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn decode<T: DeserializeOwned>(res: Result<ureq::Response, ureq::Error>) -> Result<T, ClientError> {
    res.map_err(client_error_from_ureq)?
        .into_json::<T>()
        .map_err(|e| ClientError::Decode(e.to_string()))
}

pub fn client_error_from_ureq(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(status, resp) => {
            let raw = resp.into_string().unwrap_or_default();
            match serde_json::from_str::<ErrorEnvelope>(&raw) {
                Ok(env) => ClientError::Api {
                    status,
                    code: env.error.code,
                    message: env.error.message,
                },
                Err(_) => ClientError::Api {
                    status,
                    code: "HTTP".to_string(),
                    message: raw.chars().take(200).collect(),
                },
            }
        }
        ureq::Error::Transport(transport) => ClientError::Transport {
            kind: classify_transport_error_kind(&format!("{:?} {}", transport.kind(), transport)),
        },
    }
}

pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

pub fn multipart_body(
    file_name: &str,
    mime: &str,
    bytes: &[u8],
    source_label: Option<&str>,
    hint: Option<&str>,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    for (name, value) in [("source", source_label), ("hint", hint)] {
        if let Some(value) = value {
            body.extend_from_slice(
                format!(
                    "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
    }
    let safe_name: String = file_name
        .chars()
        .map(|c| if c == '"' || c.is_control() { '_' } else { c })
        .collect();
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{safe_name}\"\r\nContent-Type: {mime}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}
