use std::time::Duration;

/// This is the name of the project that is being upgraded.
pub const PRODUCT: &str = "Entando";

/// Namespace whose presence identifies an OpenShift cluster.
pub const OPENSHIFT_NAMESPACE: &str = "openshift";

/// apiVersion of the EntandoApp custom resource.
pub const ENTANDO_APP_API_VERSION: &str = "entando.org/v1";

/// Kind of the EntandoApp custom resource. A namespace without one has no Entando installation.
pub const ENTANDO_APP_KIND: &str = "EntandoApp";

/// apiVersion of the OLM objects (Subscription, ClusterServiceVersion).
pub const OLM_API_VERSION: &str = "operators.coreos.com/v1alpha1";

/// Kind of the OLM subscription object.
pub const SUBSCRIPTION_KIND: &str = "Subscription";

/// Kind of the OLM resolved-version object.
pub const CLUSTER_SERVICE_VERSION_KIND: &str = "ClusterServiceVersion";

/// Phase reported by a ClusterServiceVersion once the operator is installed.
pub const CSV_SUCCEEDED_PHASE: &str = "Succeeded";

/// Kind of the OLM marketplace catalog object.
pub const CATALOG_SOURCE_KIND: &str = "CatalogSource";

/// Connection state reported by a CatalogSource once it is serving.
pub const CONNECTION_STATE_READY: &str = "READY";

/// Name of the Entando operator Deployment. Managed by OLM on OpenShift.
pub const OPERATOR_DEPLOYMENT: &str = "entando-operator";

/// Name of the Entando k8s-service Deployment. Managed by OLM on OpenShift.
pub const K8S_SERVICE_DEPLOYMENT: &str = "entando-k8s-service";

/// Deployments which are only ever upgraded by replacing the operator on OpenShift.
pub const OPERATOR_MANAGED_DEPLOYMENTS: [&str; 2] = [OPERATOR_DEPLOYMENT, K8S_SERVICE_DEPLOYMENT];

/// Pod template annotation carrying a secondary image reference.
pub const CONTAINER_IMAGE_ANNOTATION: &str = "containerImage";

/// OLM package and Subscription name of the Entando operator.
pub const OPERATOR_PACKAGE: &str = "entando-k8s-operator";

/// OLM channel the new Subscription follows.
pub const OPERATOR_CHANNEL: &str = "final";

/// Namespace of the OpenShift marketplace catalog sources.
pub const MARKETPLACE_NAMESPACE: &str = "openshift-marketplace";

/// Release directory inside the entando-releases repository.
pub const RELEASE_DIST_DIR: &str = "dist/ge-1-1-6";

/// Default release tag listing.
pub const DEFAULT_RELEASE_TAGS_URL: &str =
    "https://api.github.com/repos/entando/entando-releases/tags?per_page=200";

/// Default base URL of the raw release assets.
pub const DEFAULT_RELEASE_ASSETS_URL: &str =
    "https://raw.githubusercontent.com/entando/entando-releases";

/// User-Agent sent to the release source. The GitHub API rejects anonymous agents.
pub const USER_AGENT: &str = concat!("entando-upgrade/", env!("CARGO_PKG_VERSION"));

/// Timeout for a single HTTP request to the release source.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Header of every generated kustomization.yaml file.
pub const KUSTOMIZATION_HEADER: &str =
    "apiVersion: kustomize.config.k8s.io/v1beta1\nkind: Kustomization\n\nresources:\n";

/// File name of the generated kustomization files.
pub const KUSTOMIZATION_FILE: &str = "kustomization.yaml";

/// Default readiness recheck interval.
pub const DEFAULT_POLL_INTERVAL: &str = "3s";

/// Default deadline of a single readiness wait.
pub const DEFAULT_POLL_TIMEOUT: &str = "30m";

/// Environment variables of the operator Deployment that track identity or version and are
/// never carried over to a new operator.
pub const OPERATOR_ENV_DENYLIST: [&str; 3] = [
    "ENTANDO_K8S_OPERATOR_VERSION",
    "OPERATOR_CONDITION_NAME",
    "OPERATOR_NAME",
];

/// Prefix of operator environment variables which pin related images to a release.
pub const RELATED_IMAGE_ENV_PREFIX: &str = "RELATED_IMAGE_";

/// Environment variables of the k8s-service Deployment never carried over to a new operator.
pub const K8S_SERVICE_ENV_DENYLIST: [&str; 2] = ["OPERATOR_CONDITION_NAME", "OPERATOR_NAME"];
