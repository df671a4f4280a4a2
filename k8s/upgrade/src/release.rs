use crate::{
    common::{
        constants::{HTTP_REQUEST_TIMEOUT, RELEASE_DIST_DIR, USER_AGENT},
        error::{
            FetchReleaseAsset, FetchReleaseTags, HttpClientBuild, HttpStatus, JsonConversion,
            MissingPatchManifest, ReadResponseBody, Result, UrlParse, YamlParseFromSlice,
        },
    },
    context::ClusterFlavor,
};
use async_trait::async_trait;
use kube::core::DynamicObject;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;
use url::Url;

/// Where the known releases and their per-release manifests come from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// The identifiers of all known releases, e.g. "v7.2.0".
    async fn list_releases(&self) -> Result<Vec<String>>;

    /// The body of the release's patch manifest for the cluster flavor: the list of `images`
    /// entries of a kustomization. Fails with MissingPatchManifest if the release doesn't
    /// publish one.
    async fn fetch_patch_manifest(&self, release: &str, flavor: ClusterFlavor) -> Result<String>;

    /// The marketplace CatalogSource which serves the release's operator bundle.
    async fn fetch_catalog_source(&self, release: &str) -> Result<DynamicObject>;
}

/// A release tag, as listed by the GitHub tags API.
#[derive(Deserialize)]
struct Tag {
    name: String,
}

/// Fetches releases over HTTP from the entando-releases repository.
pub struct HttpReleaseSource {
    client: ClientWithMiddleware,
    tags_url: Url,
    assets_url: String,
}

impl HttpReleaseSource {
    /// Build a release source. Transient HTTP failures are retried with exponential backoff.
    pub fn new(tags_url: &str, assets_url: &str) -> Result<Self> {
        let tags_url = Url::parse(tags_url).context(UrlParse { url: tags_url })?;
        // Validated here, joined by string formatting later so that no path segment is lost.
        Url::parse(assets_url).context(UrlParse { url: assets_url })?;

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .context(HttpClientBuild)?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            tags_url,
            assets_url: assets_url.trim_end_matches('/').to_string(),
        })
    }

    /// GET a URL. Returns the response status along with the body.
    async fn get(&self, url: &str) -> Result<(reqwest::StatusCode, String)> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context(FetchReleaseAsset { url })?;
        let status = response.status();
        let body = response.text().await.context(ReadResponseBody { url })?;
        debug!(%url, %status, "Fetched release asset");
        Ok((status, body))
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn list_releases(&self) -> Result<Vec<String>> {
        let url = self.tags_url.as_str();
        let response = self
            .client
            .get(self.tags_url.clone())
            .send()
            .await
            .context(FetchReleaseTags { url })?;
        let status = response.status();
        if !status.is_success() {
            return HttpStatus { url, status }.fail();
        }
        let body = response.text().await.context(ReadResponseBody { url })?;
        parse_tags(url, body.as_str())
    }

    async fn fetch_patch_manifest(&self, release: &str, flavor: ClusterFlavor) -> Result<String> {
        let url = patch_manifest_url(self.assets_url.as_str(), release, flavor);
        let (status, body) = self.get(url.as_str()).await?;
        if !status.is_success() {
            return MissingPatchManifest {
                version: release,
                url,
            }
            .fail();
        }
        Ok(body)
    }

    async fn fetch_catalog_source(&self, release: &str) -> Result<DynamicObject> {
        let url = catalog_source_url(self.assets_url.as_str(), release);
        let (status, body) = self.get(url.as_str()).await?;
        if !status.is_success() {
            return HttpStatus { url, status }.fail();
        }
        serde_yaml::from_str(body.as_str()).context(YamlParseFromSlice { input_yaml: body })
    }
}

/// Parse the release names out of a GitHub tags listing.
fn parse_tags(url: &str, body: &str) -> Result<Vec<String>> {
    let tags: Vec<Tag> = serde_json::from_str(body).context(JsonConversion {
        name: url,
        target: "release tags",
    })?;
    Ok(tags.into_iter().map(|tag| tag.name).collect())
}

/// Match a requested version against the known releases. Versions are accepted with or
/// without their leading 'v'.
pub fn resolve_release(requested: &str, releases: &[String]) -> Option<String> {
    let prefixed = format!("v{requested}");
    releases
        .iter()
        .find(|release| release.as_str() == requested)
        .or_else(|| releases.iter().find(|release| **release == prefixed))
        .cloned()
}

/// URL of the patch manifest of a release for a cluster flavor.
pub fn patch_manifest_url(assets_url: &str, release: &str, flavor: ClusterFlavor) -> String {
    format!(
        "{assets_url}/{release}/{RELEASE_DIST_DIR}/plain-templates/misc/kustomization-{}.yaml",
        flavor.manifest_suffix()
    )
}

/// URL of the marketplace CatalogSource of a release.
pub fn catalog_source_url(assets_url: &str, release: &str) -> String {
    format!("{assets_url}/{release}/{RELEASE_DIST_DIR}/samples/openshift-catalog-source.yaml")
}

#[cfg(test)]
pub(crate) use fake::StaticReleaseSource;
