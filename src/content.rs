//! Content-addressed storage of off-chain blobs
//!
//! State records carry only the content hash; the blob itself lives here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{LedgerError, Result};
use crate::hash::sha256;
use crate::types::ByteString;

/// Multihash prefix for sha2-256 with a 32-byte digest
const SHA256_MULTIHASH_PREFIX: &str = "1220";

/// Identifier a store hands back for a blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait ContentStore {
    fn put(&self, blob: &[u8]) -> Result<ContentHash>;

    /// `NotFound` when the store has no blob under `hash`.
    fn get(&self, hash: &ContentHash) -> Result<ByteString>;
}

/// Blobs kept in a map, addressed by hex sha2-256 multihash
#[derive(Default)]
pub struct InMemoryContentStore {
    blobs: Mutex<HashMap<ContentHash, ByteString>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash_of(blob: &[u8]) -> ContentHash {
        ContentHash(format!("{SHA256_MULTIHASH_PREFIX}{}", hex::encode(sha256(blob))))
    }
}

impl ContentStore for InMemoryContentStore {
    fn put(&self, blob: &[u8]) -> Result<ContentHash> {
        let hash = Self::hash_of(blob);
        self.blobs
            .lock()
            .map_err(|_| LedgerError::Transport("content store lock poisoned".to_string()))?
            .insert(hash.clone(), blob.to_vec());
        Ok(hash)
    }

    fn get(&self, hash: &ContentHash) -> Result<ByteString> {
        self.blobs
            .lock()
            .map_err(|_| LedgerError::Transport("content store lock poisoned".to_string()))?
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("content {hash}")))
    }
}

/// IPFS node reached through its HTTP RPC API
pub struct IpfsHttpStore {
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

impl IpfsHttpStore {
    /// `base_url` is the RPC root, e.g. `http://127.0.0.1:5001`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/api/v0/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl ContentStore for IpfsHttpStore {
    fn put(&self, blob: &[u8]) -> Result<ContentHash> {
        let url = self.endpoint("add");
        let form = Form::new().part("file", Part::bytes(blob.to_vec()).file_name("blob"));
        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|e| LedgerError::Transport(format!("HTTP POST {url} failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LedgerError::Query(format!("IPFS add returned HTTP status {status}")));
        }
        let body: AddResponse = resp
            .json()
            .map_err(|e| LedgerError::Encoding(format!("failed to parse IPFS add response: {e}")))?;
        info!("stored {} bytes as {}", blob.len(), body.hash);
        Ok(ContentHash(body.hash))
    }

    fn get(&self, hash: &ContentHash) -> Result<ByteString> {
        let url = self.endpoint("cat");
        let resp = self
            .client
            .post(&url)
            .query(&[("arg", hash.0.as_str())])
            .send()
            .map_err(|e| LedgerError::Transport(format!("HTTP POST {url} failed: {e}")))?;

        match resp.status() {
            s if s.is_success() => {
                let bytes = resp.bytes()?;
                debug!("fetched {} bytes for {}", bytes.len(), hash);
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(LedgerError::NotFound(format!("content {hash}"))),
            // the RPC API reports unknown paths as a 500 with an error message
            StatusCode::INTERNAL_SERVER_ERROR => {
                let text = resp.text().unwrap_or_default();
                if text.contains("not found") || text.contains("invalid path") {
                    Err(LedgerError::NotFound(format!("content {hash}")))
                } else {
                    Err(LedgerError::Query(format!("IPFS cat failed: {text}")))
                }
            }
            s => Err(LedgerError::Query(format!("IPFS cat returned HTTP status {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_round_trip() {
        let store = InMemoryContentStore::new();
        let hash = store.put(b"embedding").unwrap();
        assert_eq!(store.get(&hash).unwrap(), b"embedding".to_vec());
        assert_eq!(hash, InMemoryContentStore::hash_of(b"embedding"));
    }

    #[test]
    fn test_hash_is_sha256_multihash() {
        let hash = InMemoryContentStore::hash_of(b"abc");
        assert_eq!(
            hash.0,
            "1220ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_missing_blob() {
        let store = InMemoryContentStore::new();
        assert!(matches!(
            store.get(&ContentHash("1220ff".to_string())),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn test_ipfs_endpoint() {
        let store = IpfsHttpStore::new("http://127.0.0.1:5001/", Duration::from_secs(1)).unwrap();
        assert_eq!(store.endpoint("/add"), "http://127.0.0.1:5001/api/v0/add");
    }

    #[test]
    fn test_add_response_parses() {
        let body: AddResponse = serde_json::from_str(
            r#"{"Name":"blob","Hash":"QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG","Size":"8"}"#,
        )
        .unwrap();
        assert_eq!(body.hash, "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");
    }
}
