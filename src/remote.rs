use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml_ng::{Mapping, Value};

use crate::domain::{ArchiveSize, AssetRef};
use crate::error::RefgenError;
use crate::listing::select_genomes;

pub const API_VERSION: &str = "v2";

/// Remote attributes written into the local tag entry after a pull.
const ATTRS_COPY_PULL: &[&str] = &[
    "asset_description",
    "seek_keys",
    "asset_parents",
    "asset_path",
    "asset_digest",
    "asset_children",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteAssetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek_keys: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_size: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_parents: Vec<AssetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub asset_children: Vec<AssetRef>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RemoteAssetMetadata {
    pub fn parsed_archive_size(&self) -> Option<ArchiveSize> {
        let raw = self.archive_size.as_deref()?;
        match raw.parse::<ArchiveSize>() {
            Ok(size) => Some(size),
            Err(err) => {
                tracing::debug!("Ignoring archive size '{raw}': {err}");
                None
            }
        }
    }

    /// The subset of attributes copied into the registry on pull.
    pub fn pull_attributes(&self) -> Result<Mapping, RefgenError> {
        let value = serde_yaml_ng::to_value(self)
            .map_err(|err| RefgenError::MalformedRegistryStructure(err.to_string()))?;
        let mut picked = Mapping::new();
        if let Value::Mapping(all) = value {
            for key in ATTRS_COPY_PULL {
                if let Some(value) = all.get(*key).filter(|value| !value.is_null()) {
                    picked.insert(Value::from(*key), value.clone());
                }
            }
        }
        Ok(picked)
    }
}

pub trait CatalogClient: Send + Sync {
    /// Collection name to asset names available on the server.
    fn fetch_listing(&self) -> Result<BTreeMap<String, Vec<String>>, RefgenError>;
    fn fetch_metadata(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
    ) -> Result<RemoteAssetMetadata, RefgenError>;
    fn fetch_default_tag(&self, collection: &str, asset: &str) -> Result<String, RefgenError>;
    fn fetch_asset_digest(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
    ) -> Result<String, RefgenError>;
    /// Streams the tag archive into `destination`, returning the byte count.
    fn download_archive(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
        destination: &Path,
    ) -> Result<u64, RefgenError>;
}

/// Remote collections and a per-collection asset listing, filtered to the
/// requested collections when given.
pub fn list_remote(
    client: &dyn CatalogClient,
    filter: Option<&[String]>,
) -> Result<(String, String), RefgenError> {
    let listing = client.fetch_listing()?;
    let selected = select_genomes(listing.keys(), filter);
    let lines = selected
        .iter()
        .filter_map(|name| {
            listing
                .get(name)
                .map(|assets| format!("{name:>20}/   {}", assets.join(", ")))
        })
        .collect::<Vec<_>>();
    Ok((selected.join(", "), lines.join("\n")))
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
}

impl CatalogHttpClient {
    pub fn new(server: &str) -> Result<Self, RefgenError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("refgenconf/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RefgenError::CatalogHttp(err.to_string()))?,
        );
        // Archive transfers are not time-limited; JSON requests set their own.
        let client = Client::builder()
            .default_headers(headers)
            .timeout(None)
            .build()
            .map_err(|err| RefgenError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: format!("{}/{API_VERSION}", server.trim_end_matches('/')),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn asset_url(&self, collection: &str, asset: &str) -> String {
        format!("{}/asset/{collection}/{asset}", self.base_url)
    }

    fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, RefgenError> {
        tracing::debug!("Downloading JSON data; querying URL: '{url}'");
        let failed = |message: String| RefgenError::RemoteMetadataFetchFailed {
            url: url.to_string(),
            message,
        };
        let response = self
            .send_with_retries(|| {
                self.client
                    .get(url)
                    .query(query)
                    .timeout(Duration::from_secs(60))
            })
            .map_err(|err| failed(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(failed(format!("status {status}: {body}")));
        }
        response.json::<T>().map_err(|err| failed(err.to_string()))
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, RefgenError>
    where
        F: FnMut() -> RequestBuilder,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            match make_req().send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(RefgenError::CatalogHttp(err.to_string()));
                }
            }
        }
    }
}

impl CatalogClient for CatalogHttpClient {
    fn fetch_listing(&self) -> Result<BTreeMap<String, Vec<String>>, RefgenError> {
        let url = format!("{}/assets", self.base_url);
        tracing::info!("Querying available assets from server: {url}");
        self.fetch_json(&url, &[])
    }

    fn fetch_metadata(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
    ) -> Result<RemoteAssetMetadata, RefgenError> {
        self.fetch_json(&self.asset_url(collection, asset), &[("tag", tag)])
    }

    fn fetch_default_tag(&self, collection: &str, asset: &str) -> Result<String, RefgenError> {
        let url = format!("{}/default_tag", self.asset_url(collection, asset));
        self.fetch_json(&url, &[])
    }

    fn fetch_asset_digest(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
    ) -> Result<String, RefgenError> {
        let url = format!(
            "{}/{tag}/asset_digest",
            self.asset_url(collection, asset)
        );
        self.fetch_json(&url, &[])
    }

    fn download_archive(
        &self,
        collection: &str,
        asset: &str,
        tag: &str,
        destination: &Path,
    ) -> Result<u64, RefgenError> {
        let url = format!("{}/archive", self.asset_url(collection, asset));
        tracing::info!("Downloading URL: {url}?tag={tag}");
        let mut response = match self.client.get(&url).query(&[("tag", tag)]).send() {
            Ok(response) => response,
            Err(err) if err.is_connect() => {
                return Err(RefgenError::ConnectionRefused(format!(
                    "{}: {err}",
                    self.base_url
                )));
            }
            Err(err) => return Err(RefgenError::CatalogHttp(err.to_string())),
        };
        if !response.status().is_success() {
            return Err(RefgenError::ArchiveNotFound(format!(
                "{url}?tag={tag} (status {})",
                response.status().as_u16()
            )));
        }
        let expected = response.content_length();
        let mut file =
            File::create(destination).map_err(|err| RefgenError::Filesystem(err.to_string()))?;
        let written = io::copy(&mut response, &mut file)
            .map_err(|err| RefgenError::TruncatedDownload(format!("{collection}/{asset}:{tag}: {err}")))?;
        if let Some(expected) = expected.filter(|expected| written < *expected) {
            return Err(RefgenError::TruncatedDownload(format!(
                "{collection}/{asset}:{tag}: received {written} of {expected} bytes"
            )));
        }
        Ok(written)
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::JoinHandle;

    use assert_matches::assert_matches;

    use super::*;

    /// Serves one canned response per accepted connection, in order.
    fn serve(responses: Vec<Vec<u8>>) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = format!("http://{}", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let mut request_lines = Vec::new();
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                request_lines.push(read_request_line(&mut stream));
                stream.write_all(&response).unwrap();
            }
            request_lines
        });
        (server, handle)
    }

    fn read_request_line(stream: &mut TcpStream) -> String {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = stream.read(&mut chunk).unwrap();
            if read == 0 {
                break;
            }
            request.extend_from_slice(&chunk[..read]);
        }
        String::from_utf8_lossy(&request)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string()
    }

    fn response(status: &str, headers: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes =
            format!("HTTP/1.1 {status}\r\n{headers}Connection: close\r\n\r\n").into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn archive_status_error_is_not_found() {
        let (server, handle) = serve(vec![response(
            "404 Not Found",
            "Content-Length: 0\r\n",
            b"",
        )]);
        let dir = tempfile::tempdir().unwrap();
        let client = CatalogHttpClient::new(&server).unwrap();
        let err = client
            .download_archive("hg38", "fasta", "default", &dir.path().join("fasta__default.tgz"))
            .unwrap_err();
        assert_matches!(err, RefgenError::ArchiveNotFound(message) if message.contains("404"));
        let requests = handle.join().unwrap();
        assert_eq!(
            requests,
            vec!["GET /v2/asset/hg38/fasta/archive?tag=default HTTP/1.1"]
        );
    }

    #[test]
    fn archive_closed_port_is_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let server = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let dir = tempfile::tempdir().unwrap();
        let client = CatalogHttpClient::new(&server).unwrap();
        let err = client
            .download_archive("hg38", "fasta", "default", &dir.path().join("fasta__default.tgz"))
            .unwrap_err();
        assert_matches!(err, RefgenError::ConnectionRefused(_));
    }

    #[test]
    fn archive_short_body_is_truncated() {
        let (server, handle) = serve(vec![response(
            "200 OK",
            "Content-Length: 100\r\n",
            &[7u8; 10],
        )]);
        let dir = tempfile::tempdir().unwrap();
        let client = CatalogHttpClient::new(&server).unwrap();
        let err = client
            .download_archive("hg38", "fasta", "default", &dir.path().join("fasta__default.tgz"))
            .unwrap_err();
        assert_matches!(err, RefgenError::TruncatedDownload(message) if message.contains("hg38/fasta:default"));
        handle.join().unwrap();
    }

    #[test]
    fn archive_is_streamed_to_destination() {
        let (server, handle) = serve(vec![response(
            "200 OK",
            "Content-Length: 5\r\n",
            b"tgz!!",
        )]);
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("fasta__default.tgz");
        let client = CatalogHttpClient::new(&server).unwrap();
        let written = client
            .download_archive("hg38", "fasta", "default", &destination)
            .unwrap();
        assert_eq!(written, 5);
        assert_eq!(std::fs::read(&destination).unwrap(), b"tgz!!");
        handle.join().unwrap();
    }

    #[test]
    fn json_request_retries_unavailable_server() {
        let body = br#""default""#;
        let (server, handle) = serve(vec![
            response("503 Service Unavailable", "Content-Length: 0\r\n", b""),
            response(
                "200 OK",
                &format!("Content-Type: application/json\r\nContent-Length: {}\r\n", body.len()),
                body,
            ),
        ]);
        let client = CatalogHttpClient::new(&server).unwrap();
        let tag = client.fetch_default_tag("hg38", "fasta").unwrap();
        assert_eq!(tag, "default");
        let requests = handle.join().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|line| line.starts_with("GET /v2/asset/hg38/fasta/default_tag")));
    }

    #[test]
    fn json_error_status_is_metadata_failure() {
        let (server, handle) = serve(vec![response(
            "404 Not Found",
            "Content-Length: 9\r\n",
            b"not found",
        )]);
        let client = CatalogHttpClient::new(&server).unwrap();
        let err = client.fetch_metadata("hg38", "fasta", "v9").unwrap_err();
        assert_matches!(
            err,
            RefgenError::RemoteMetadataFetchFailed { url, message }
                if url.ends_with("/v2/asset/hg38/fasta") && message.contains("404")
        );
        handle.join().unwrap();
    }

    #[test]
    fn base_url_is_versioned() {
        let client = CatalogHttpClient::new("http://refgenomes.databio.org/").unwrap();
        assert_eq!(client.base_url(), "http://refgenomes.databio.org/v2");
        assert_eq!(
            client.asset_url("hg38", "fasta"),
            "http://refgenomes.databio.org/v2/asset/hg38/fasta"
        );
    }

    #[test]
    fn pull_attributes_subset() {
        let metadata: RemoteAssetMetadata = serde_json::from_str(
            r#"{
                "asset_path": "bowtie2_index",
                "asset_digest": "d1",
                "archive_digest": "a1",
                "archive_size": "3.5GB",
                "seek_keys": {"bowtie2_index": "."},
                "asset_parents": ["fasta:default"]
            }"#,
        )
        .unwrap();
        let picked = metadata.pull_attributes().unwrap();
        assert!(picked.contains_key("asset_path"));
        assert!(picked.contains_key("asset_parents"));
        assert!(!picked.contains_key("archive_digest"));
        assert!(!picked.contains_key("archive_size"));
        assert!(!metadata.parsed_archive_size().unwrap().is_large());
    }
}
