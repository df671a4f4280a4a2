use crate::common::constants::PRODUCT;
use snafu::Snafu;
use std::{path::PathBuf, time::Duration};

/// For use with multiple fallible operations which may fail for different reasons, but are
/// defined withing the same scope and must return to the outer scope (calling scope) using
/// the try operator -- '?'.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(context(suffix(false)))]
pub enum Error {
    /// Error for when the kubeconfig file cannot be read.
    #[snafu(display("Failed to read kubeconfig: {}", source))]
    ReadKubeconfig {
        source: kube::config::KubeconfigError,
    },

    /// Error for when a client configuration cannot be generated for a kubeconfig context.
    #[snafu(display("Failed to load kubeconfig context {}: {}", context, source))]
    LoadKubeContext {
        source: kube::config::KubeconfigError,
        context: String,
    },

    /// Error for when Kubernetes API client generation fails.
    #[snafu(display("Failed to generate kubernetes client: {}", source))]
    K8sClientGeneration { source: kube::Error },

    /// Error for when the kubeconfig has no usable context.
    #[snafu(display("The kubeconfig does not define any context"))]
    NoKubeContext,

    /// Error for when the cluster rejects the credentials of the selected context.
    #[snafu(display(
        "Not logged in to the cluster of context '{}', please login and then rerun",
        context
    ))]
    NotLoggedIn { context: String },

    /// Error for a Kubernetes API GET request for a namespace resource fails.
    #[snafu(display("Failed to GET Kubernetes namespace {}: {}", namespace, source))]
    GetNamespace {
        source: kube::Error,
        namespace: String,
    },

    /// Error for when the namespace flag is not a valid namespace name.
    #[snafu(display("'{}' is not a valid Kubernetes namespace name", namespace))]
    InvalidNamespaceName { namespace: String },

    /// Error for when the input namespace has no EntandoApp.
    #[snafu(display("The namespace '{}' does not have {} installed", namespace, PRODUCT))]
    NoPlatformInstallation { namespace: String },

    /// Error for when a Kubernetes API request for listing objects of a kind fails.
    #[snafu(display(
        "Failed to list {} {} in namespace {}: {}",
        api_version,
        kind,
        namespace,
        source
    ))]
    ListObjects {
        source: kube::Error,
        api_version: String,
        kind: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API GET request for an object fails.
    #[snafu(display("Failed to GET {} {} in namespace {}: {}", kind, name, namespace, source))]
    GetObject {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API create request for an object fails.
    #[snafu(display(
        "Failed to create {} {} in namespace {}: {}",
        kind,
        name,
        namespace,
        source
    ))]
    CreateObject {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API patch request for an object fails.
    #[snafu(display(
        "Failed to update {} {} in namespace {}: {}",
        kind,
        name,
        namespace,
        source
    ))]
    PatchObject {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API replace request for an object fails.
    #[snafu(display(
        "Failed to replace {} {} in namespace {}: {}",
        kind,
        name,
        namespace,
        source
    ))]
    ReplaceObject {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API delete request for an object fails.
    #[snafu(display(
        "Failed to uninstall {} {} in namespace {}: {}",
        kind,
        name,
        namespace,
        source
    ))]
    DeleteObject {
        source: kube::Error,
        kind: String,
        name: String,
        namespace: String,
    },

    /// Error for when an object lacks its apiVersion/kind.
    #[snafu(display("Object {} has no apiVersion or kind", name))]
    MissingTypeMeta { name: String },

    /// Error for when an object lacks a field the upgrade depends on.
    #[snafu(display("{} {} has no field {}", kind, name, field))]
    MissingObjectField {
        kind: String,
        name: String,
        field: String,
    },

    /// Error for when a Kubernetes API request for listing Deployments fails.
    #[snafu(display("Failed to list Deployments in namespace {}: {}", namespace, source))]
    ListDeployments {
        source: kube::Error,
        namespace: String,
    },

    /// Error for when a Kubernetes API GET request for a Deployment fails.
    #[snafu(display(
        "Failed to GET Deployment {} in namespace {}: {}",
        name,
        namespace,
        source
    ))]
    GetDeployment {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API GET request for a Deployment's status fails.
    #[snafu(display(
        "Failed to GET status of Deployment {} in namespace {}: {}",
        name,
        namespace,
        source
    ))]
    GetDeploymentStatus {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    /// Error for when a Kubernetes API replace request for a Deployment fails.
    #[snafu(display(
        "Failed to replace Deployment {} in namespace {}: {}",
        name,
        namespace,
        source
    ))]
    ReplaceDeployment {
        source: kube::Error,
        name: String,
        namespace: String,
    },

    /// Error for when a Deployment has no .spec.
    #[snafu(display("Deployment {} in namespace {} has no spec", name, namespace))]
    EmptyDeploymentSpec { name: String, namespace: String },

    /// Error for when one or more Deployments could not be scaled.
    #[snafu(display(
        "Failed to scale {} Deployment(s) to {} replica(s):\n{}",
        failures.len(),
        replicas,
        failures.join("\n")
    ))]
    ScaleDeployments { replicas: i32, failures: Vec<String> },

    /// Error for when a readiness wait does not converge within its deadline.
    #[snafu(display("Timed out after {:?} waiting for {}", timeout, what))]
    DeadlineExceeded { what: String, timeout: Duration },

    /// Error for when an expected singleton object is absent.
    #[snafu(display("Found no {} in namespace {}", kind, namespace))]
    NoInstallation { kind: String, namespace: String },

    /// Error for when an expected singleton object exists more than once.
    #[snafu(display(
        "Found {} {} objects in namespace {}, expected exactly one",
        count,
        kind,
        namespace
    ))]
    AmbiguousInstallation {
        kind: String,
        namespace: String,
        count: usize,
    },

    /// Error for when the HTTP client for the release source cannot be built.
    #[snafu(display("Failed to build HTTP client: {}", source))]
    HttpClientBuild { source: reqwest::Error },

    /// Error for when the release tag listing cannot be fetched.
    #[snafu(display("Failed to fetch {} release tags from {}: {}", PRODUCT, url, source))]
    FetchReleaseTags {
        source: reqwest_middleware::Error,
        url: String,
    },

    /// Error for when a release asset cannot be fetched.
    #[snafu(display("Failed to fetch {}: {}", url, source))]
    FetchReleaseAsset {
        source: reqwest_middleware::Error,
        url: String,
    },

    /// Error for when the body of an HTTP response cannot be read.
    #[snafu(display("Failed to read the response body of {}: {}", url, source))]
    ReadResponseBody { source: reqwest::Error, url: String },

    /// Error for when an HTTP response carries an unsuccessful status.
    #[snafu(display("GET {} returned {}", url, status))]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Error for when a URL cannot be parsed.
    #[snafu(display("Failed to parse URL {}: {}", url, source))]
    UrlParse {
        source: url::ParseError,
        url: String,
    },

    /// Error for when the requested release is not amongst the known releases.
    #[snafu(display("The {} version {} could not be found", PRODUCT, version))]
    UnknownRelease { version: String },

    /// Error for when a release does not publish a patch manifest for the cluster flavor.
    #[snafu(display(
        "Kustomization for {} version {} is not available at {}",
        PRODUCT,
        version,
        url
    ))]
    MissingPatchManifest { version: String, url: String },

    /// Error for when yaml could not be parsed from a slice.
    #[snafu(display("Failed to parse YAML {}: {}", input_yaml, source))]
    YamlParseFromSlice {
        source: serde_yaml::Error,
        input_yaml: String,
    },

    /// Error for when yaml could not be parsed from a file.
    #[snafu(display("Failed to parse YAML at {}: {}", filepath.display(), source))]
    YamlParseFromFile {
        source: serde_yaml::Error,
        filepath: PathBuf,
    },

    /// Error for when an object could not be serialized to yaml.
    #[snafu(display("Failed to serialize {} to YAML: {}", name, source))]
    YamlSerialize {
        source: serde_yaml::Error,
        name: String,
    },

    /// Error for when an object could not be converted between typed and dynamic forms.
    #[snafu(display("Failed to convert {} to {}: {}", name, target, source))]
    JsonConversion {
        source: serde_json::Error,
        name: String,
        target: String,
    },

    /// Error for when a directory cannot be created.
    #[snafu(display("Error while creating folder '{}': {}", path.display(), source))]
    CreateDirectory {
        source: std::io::Error,
        path: PathBuf,
    },

    /// Error for when a file cannot be written.
    #[snafu(display("Failed to write file {}: {}", filepath.display(), source))]
    WriteFile {
        source: std::io::Error,
        filepath: PathBuf,
    },

    /// Error for when a file cannot be read.
    #[snafu(display("Failed to read file {}: {}", filepath.display(), source))]
    ReadingFile {
        source: std::io::Error,
        filepath: PathBuf,
    },

    /// Error for when the current working directory is not accessible.
    #[snafu(display("Failed to determine the current directory: {}", source))]
    CurrentDir { source: std::io::Error },

    /// Error for when regular expression parsing or compilation fails.
    #[snafu(display("Failed to compile regex {}: {}", expression, source))]
    RegexCompile {
        source: regex::Error,
        expression: String,
    },

    /// Error for when reading an answer from the operator fails.
    #[snafu(display("Failed to read input: {}", source))]
    Prompt { source: std::io::Error },

    /// Error for when a selection prompt has no choices.
    #[snafu(display("No choices available for '{}'", message))]
    EmptySelection { message: String },

    /// Error for when the operator chose to stop the upgrade at a decision point.
    #[snafu(display("Upgrade aborted by the operator"))]
    Aborted,

    /// Error for when the process receives an interrupt signal.
    #[snafu(display("Interrupted by signal"))]
    Interrupted,
}

impl Error {
    /// Returns true if the error means "not yet ready" to a readiness wait, i.e. the object
    /// may still appear or the API may still recover.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::GetObject { source, .. }
            | Error::ListObjects { source, .. }
            | Error::GetDeployment { source, .. }
            | Error::GetDeploymentStatus { source, .. }
            | Error::ListDeployments { source, .. } => is_transient_kube_error(source),
            Error::NoInstallation { .. } => true,
            _ => false,
        }
    }
}

/// Returns true for kube API errors worth retrying: not-found, conflicts, throttling, server
/// errors and transport failures.
pub fn is_transient_kube_error(error: &kube::Error) -> bool {
    match error {
        kube::Error::Api(response) => {
            matches!(response.code, 404 | 409 | 429) || response.code >= 500
        }
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Returns true if the kube API error is a 404.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

/// Returns true if the kube API error is a 401.
pub fn is_unauthorized(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 401)
}

/// A wrapper type to remove repeated Result<T, Error> returns.
pub type Result<T, E = Error> = std::result::Result<T, E>;
