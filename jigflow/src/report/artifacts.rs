//! Firmware artifact retrieval.

use super::SinkError;
use async_trait::async_trait;
use semver::Version;
use tracing::debug;

/// Which artifact to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareKind {
    /// Bootloader image. Stored under the fixed `bootloader`
    /// vendor/product, shared across boards.
    Bootloader,
    /// Board-specific application image.
    Application,
}

/// A fetched firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Image bytes.
    pub bytes: Vec<u8>,
    /// Version label of the selected record.
    pub version: String,
}

/// Binary/artifact fetch interface.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Fetches the latest image for `{vendor, product, kind}`.
    async fn fetch_latest(
        &self,
        vendor: &str,
        product: &str,
        kind: FirmwareKind,
    ) -> Result<FirmwareImage, SinkError>;
}

/// HTTP implementation against the factory record server's firmware
/// collection.
pub struct HttpArtifactStore {
    base_url: String,
    collection: String,
    http: reqwest::Client,
}

impl HttpArtifactStore {
    /// Creates a store.
    #[must_use]
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn fetch_latest(
        &self,
        vendor: &str,
        product: &str,
        kind: FirmwareKind,
    ) -> Result<FirmwareImage, SinkError> {
        // Bootloaders are stored under a fixed pseudo vendor/product.
        let (vendor, product, kind_label) = match kind {
            FirmwareKind::Bootloader => ("bootloader", "bootloader", "bootloader"),
            FirmwareKind::Application => (vendor, product, "application"),
        };

        let endpoint =
            format!("{}/api/collections/{}/records", self.base_url, self.collection);
        let filter = format!(
            "vendor = \"{vendor}\" && product = \"{product}\" && type = \"{kind_label}\""
        );

        let response = self
            .http
            .get(&endpoint)
            .query(&[("filter", filter.as_str())])
            .send()
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected { status: status.as_u16() });
        }

        let body: serde_json::Value =
            response.json().await.map_err(|e| SinkError::Malformed(e.to_string()))?;
        let records = body
            .get("items")
            .and_then(serde_json::Value::as_array)
            .filter(|items| !items.is_empty())
            .ok_or_else(|| {
                SinkError::Malformed(format!("no firmware records for {vendor}/{product}"))
            })?;

        let latest = pick_latest(records).ok_or_else(|| {
            SinkError::Malformed(format!("no usable firmware record for {vendor}/{product}"))
        })?;

        let version = latest
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("0.0.0")
            .to_string();
        let file_url = latest
            .get("file_url")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| SinkError::Malformed("firmware record missing file_url".to_string()))?;

        debug!(vendor, product, version, "downloading firmware");
        let bytes = self
            .http
            .get(file_url)
            .send()
            .await
            .map_err(|e| SinkError::Unreachable(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| SinkError::Malformed(e.to_string()))?;

        Ok(FirmwareImage { bytes: bytes.to_vec(), version })
    }
}

/// Picks the record with the highest semantic version.
///
/// Records without a parseable version sort as `0.0.0` rather than being
/// dropped, matching the server's lenient versioning.
fn pick_latest(records: &[serde_json::Value]) -> Option<&serde_json::Value> {
    records.iter().max_by_key(|record| {
        record
            .get("version")
            .and_then(serde_json::Value::as_str)
            .map(|v| v.trim_start_matches('v'))
            .and_then(|v| Version::parse(v).ok())
            .unwrap_or_else(|| Version::new(0, 0, 0))
    })
}
