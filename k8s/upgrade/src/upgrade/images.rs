use crate::{
    common::{
        constants::{CONTAINER_IMAGE_ANNOTATION, OPERATOR_MANAGED_DEPLOYMENTS},
        error::{Result, YamlParseFromFile},
        file,
    },
    context::ClusterFlavor,
};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::path::Path;
use tracing::debug;

/// One entry of the `images` list of a kustomization.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageMappingEntry {
    /// The image name to match, i.e. the repository of the current image.
    pub name: String,
    /// Replacement repository, including the registry host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_tag: Option<String>,
    #[serde(default, alias = "newDigest", skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

/// Which of an entry's tag and digest wins when both are set.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReferencePrecedence {
    #[default]
    DigestFirst,
    TagFirst,
}

/// The tag or digest part of an image reference.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Reference<'a> {
    Tag(&'a str),
    Digest(&'a str),
}

impl ImageMappingEntry {
    fn reference(&self, precedence: ReferencePrecedence) -> Option<Reference<'_>> {
        let tag = self.new_tag.as_deref().map(Reference::Tag);
        let digest = self.digest.as_deref().map(Reference::Digest);
        match precedence {
            ReferencePrecedence::DigestFirst => digest.or(tag),
            ReferencePrecedence::TagFirst => tag.or(digest),
        }
    }
}

/// The image rewrites published by a release.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageMapping {
    entries: Vec<ImageMappingEntry>,
}

/// The part of a kustomization the upgrade reads.
#[derive(Deserialize)]
struct Kustomization {
    #[serde(default)]
    images: Option<Vec<ImageMappingEntry>>,
}

impl From<Vec<ImageMappingEntry>> for ImageMapping {
    fn from(entries: Vec<ImageMappingEntry>) -> Self {
        Self { entries }
    }
}

impl ImageMapping {
    /// Read the `images` of a kustomization file.
    pub fn from_kustomization_file(filepath: &Path) -> Result<Self> {
        let contents = file::read_file(filepath)?;
        let kustomization: Kustomization =
            serde_yaml::from_str(contents.as_str()).context(YamlParseFromFile { filepath })?;
        Ok(kustomization.images.unwrap_or_default().into())
    }

    pub fn entries(&self) -> &[ImageMappingEntry] {
        self.entries.as_slice()
    }

    /// Find the entry for a repository: an exact match first, then a match without the
    /// registry host.
    fn lookup(&self, repository: &str) -> Option<&ImageMappingEntry> {
        self.find(repository).or_else(|| {
            let (host, path) = repository.split_once('/')?;
            if !is_registry_host(host) {
                return None;
            }
            self.find(path)
        })
    }

    fn find(&self, name: &str) -> Option<&ImageMappingEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// The rewritten image, or None if the mapping has no entry for it. An entry with neither
    /// tag nor digest keeps the current one.
    fn rewrite_image(
        &self,
        image: &str,
        flavor: ClusterFlavor,
        precedence: ReferencePrecedence,
    ) -> Option<String> {
        let (repository, current) = split_image(image, flavor);
        let entry = self.lookup(repository)?;

        let repository = entry.new_name.as_deref().unwrap_or(repository);
        Some(match entry.reference(precedence).or(current) {
            Some(Reference::Tag(tag)) => format!("{repository}:{tag}"),
            Some(Reference::Digest(digest)) => format!("{repository}@{digest}"),
            None => repository.to_string(),
        })
    }
}

/// The first path component of an image is a registry host if it looks like a hostname.
fn is_registry_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

/// Split an image into its repository and its tag or digest. OpenShift images are
/// digest-addressed and split on '@', other images split on the ':' of the last path
/// component. An image without the flavor's separator is all repository.
fn split_image(image: &str, flavor: ClusterFlavor) -> (&str, Option<Reference<'_>>) {
    if flavor.is_operator_managed() {
        return match image.split_once('@') {
            Some((repository, digest)) => (repository, Some(Reference::Digest(digest))),
            None => (image, None),
        };
    }
    let name_start = image.rfind('/').map_or(0, |index| index + 1);
    match image[name_start..].rfind(':') {
        Some(index) => (
            &image[..name_start + index],
            Some(Reference::Tag(&image[name_start + index + 1..])),
        ),
        None => (image, None),
    }
}

/// Rewrite the primary container image of a Deployment, and the image in its
/// `containerImage` pod template annotation, with the mapping. The input isn't modified.
/// Returns the rewritten copy, and whether the primary image had a mapping entry. The
/// Deployments managed by OLM are never rewritten on OpenShift.
pub fn rewrite(
    workload: &Deployment,
    mapping: &ImageMapping,
    flavor: ClusterFlavor,
    precedence: ReferencePrecedence,
) -> (Deployment, bool) {
    let mut rewritten = workload.clone();
    let name = workload.name_any();
    if flavor.is_operator_managed() && OPERATOR_MANAGED_DEPLOYMENTS.contains(&name.as_str()) {
        return (rewritten, false);
    }

    let applied =
        rewrite_template(&mut rewritten, mapping, flavor, precedence, name.as_str()).is_some();
    (rewritten, applied)
}

/// Returns None if the primary image has no mapping entry.
fn rewrite_template(
    deployment: &mut Deployment,
    mapping: &ImageMapping,
    flavor: ClusterFlavor,
    precedence: ReferencePrecedence,
    name: &str,
) -> Option<()> {
    let template = &mut deployment.spec.as_mut()?.template;
    let container = template.spec.as_mut()?.containers.first_mut()?;
    let image = mapping.rewrite_image(container.image.as_deref()?, flavor, precedence)?;
    debug!(deployment.name = %name, %image, "Rewrote container image");
    container.image = Some(image);

    let annotation = template
        .metadata
        .as_mut()
        .and_then(|metadata| metadata.annotations.as_mut())
        .and_then(|annotations| annotations.get_mut(CONTAINER_IMAGE_ANNOTATION));
    if let Some(annotation) = annotation {
        if let Some(image) = mapping.rewrite_image(annotation.as_str(), flavor, precedence) {
            debug!(deployment.name = %name, %image, "Rewrote containerImage annotation");
            *annotation = image;
        }
    }
    Some(())
}
