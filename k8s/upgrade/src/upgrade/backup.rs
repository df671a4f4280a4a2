use crate::common::{
    constants::{CLUSTER_SERVICE_VERSION_KIND, OLM_API_VERSION, SUBSCRIPTION_KIND},
    error::{
        AmbiguousInstallation, GetDeployment, GetObject, ListDeployments, ListObjects,
        NoInstallation, Result,
    },
    file,
    kube_client::{kind_of, ClusterFacade},
};
use k8s_openapi::api::apps::v1::Deployment;
use kube::{core::DynamicObject, ResourceExt};
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Fully qualified host of the public registry.
const PUBLIC_REGISTRY_HOST: &str = "registry.hub.docker.com";

/// The OLM objects of the Entando operator installation: the Subscription and the
/// ClusterServiceVersion it resolved to.
#[derive(Clone, Debug)]
pub struct ManagingOperatorHandle {
    subscription: DynamicObject,
    cluster_service_version: DynamicObject,
}

impl ManagingOperatorHandle {
    pub fn new(subscription: DynamicObject, cluster_service_version: DynamicObject) -> Self {
        Self {
            subscription,
            cluster_service_version,
        }
    }

    pub fn subscription(&self) -> &DynamicObject {
        &self.subscription
    }

    pub fn cluster_service_version(&self) -> &DynamicObject {
        &self.cluster_service_version
    }
}

/// List the Deployments in the namespace and read each of them in full. The primary container
/// image of the returned copies is rewritten to its fully qualified registry host, the live
/// objects are not touched.
pub async fn capture_workloads(
    facade: &dyn ClusterFacade,
    namespace: &str,
) -> Result<Vec<Deployment>> {
    let listed = facade
        .list_deployments(namespace)
        .await
        .context(ListDeployments { namespace })?;

    let mut captured = Vec::with_capacity(listed.len());
    for summary in listed {
        let name = summary.name_any();
        let mut deployment = facade
            .read_deployment(name.as_str(), namespace)
            .await
            .context(GetDeployment {
                name: name.clone(),
                namespace,
            })?;
        normalize_primary_image(&mut deployment);
        captured.push(deployment);
    }

    info!(%namespace, count = captured.len(), "Captured Deployments");
    Ok(captured)
}

/// Read the Subscription and ClusterServiceVersion of the operator installation. There must be
/// exactly one of each.
pub async fn capture_operator_state(
    facade: &dyn ClusterFacade,
    namespace: &str,
) -> Result<ManagingOperatorHandle> {
    let subscription = read_single_object(facade, SUBSCRIPTION_KIND, namespace).await?;
    let cluster_service_version =
        read_single_object(facade, CLUSTER_SERVICE_VERSION_KIND, namespace).await?;

    info!(
        subscription = %subscription.name_any(),
        csv = %cluster_service_version.name_any(),
        "Captured the operator installation"
    );
    Ok(ManagingOperatorHandle::new(
        subscription,
        cluster_service_version,
    ))
}

/// Write one file per object to the directory.
pub fn persist<K>(objects: &[K], directory: &Path) -> Result<Vec<PathBuf>>
where
    K: kube::Resource + serde::Serialize + Clone,
{
    file::write_objects(objects, directory)
}

/// Write the operator installation objects to the directory.
pub fn persist_operator_state(
    handle: &ManagingOperatorHandle,
    directory: &Path,
) -> Result<Vec<PathBuf>> {
    persist(
        &[
            handle.subscription.clone(),
            handle.cluster_service_version.clone(),
        ],
        directory,
    )
}

/// List the OLM objects of a kind in the namespace, failing with NoInstallation or
/// AmbiguousInstallation unless there is exactly one.
pub(crate) async fn single_object(
    facade: &dyn ClusterFacade,
    kind: &str,
    namespace: &str,
) -> Result<DynamicObject> {
    let mut objects = facade
        .list_objects(OLM_API_VERSION, kind, namespace)
        .await
        .context(ListObjects {
            api_version: OLM_API_VERSION,
            kind,
            namespace,
        })?;

    match objects.len() {
        0 => NoInstallation { kind, namespace }.fail(),
        1 => Ok(objects.remove(0)),
        count => AmbiguousInstallation {
            kind,
            namespace,
            count,
        }
        .fail(),
    }
}

/// Like single_object(), followed by a GET of the full object.
pub(crate) async fn read_single_object(
    facade: &dyn ClusterFacade,
    kind: &str,
    namespace: &str,
) -> Result<DynamicObject> {
    let listed = single_object(facade, kind, namespace).await?;
    facade.read_object(&listed).await.context(GetObject {
        kind: kind_of(&listed),
        name: listed.name_any(),
        namespace,
    })
}

fn normalize_primary_image(deployment: &mut Deployment) {
    let name = deployment.name_any();
    let container = deployment
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .and_then(|pod| pod.containers.first_mut());

    if let Some(container) = container {
        if let Some(normalized) = container.image.as_deref().and_then(normalize_registry) {
            debug!(deployment.name = %name, image = %normalized, "Normalized image registry");
            container.image = Some(normalized);
        }
    }
}

/// Expand the public registry shorthands into the fully qualified registry host.
/// Returns None for images which don't use a shorthand.
pub(crate) fn normalize_registry(image: &str) -> Option<String> {
    if let Some(rest) = image.strip_prefix("docker.io/") {
        Some(format!("{PUBLIC_REGISTRY_HOST}/{rest}"))
    } else {
        image
            .strip_prefix("entando/")
            .map(|rest| format!("{PUBLIC_REGISTRY_HOST}/entando/{rest}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        error::Error,
        fake_cluster::{deployment, object, FakeCluster},
    };
    use serde_json::json;

    fn primary_image(deployment: &Deployment) -> Option<String> {
        deployment.spec.as_ref()?.template.spec.as_ref()?.containers[0]
            .image
            .clone()
    }

    #[test]
    fn registry_shorthands_are_expanded() {
        assert_eq!(
            normalize_registry("docker.io/foo:1.0").as_deref(),
            Some("registry.hub.docker.com/foo:1.0")
        );
        assert_eq!(
            normalize_registry("entando/entando-de-app-wildfly:7.1.0").as_deref(),
            Some("registry.hub.docker.com/entando/entando-de-app-wildfly:7.1.0")
        );
        assert_eq!(normalize_registry("quay.io/entando/operator@sha256:abc"), None);
        assert_eq!(normalize_registry("entando-server:7.1.0"), None);
    }

    #[tokio::test]
    async fn backup_copies_are_normalized_but_live_objects_are_not() {
        let cluster = FakeCluster::new()
            .with_deployment(deployment("foo", "docker.io/foo:1.0", 1))
            .with_deployment(deployment("bar", "quay.io/bar:2.0", 1));

        let captured = capture_workloads(&cluster, "entando").await.unwrap();

        assert_eq!(captured.len(), 2);
        let foo = captured.iter().find(|d| d.name_any() == "foo").unwrap();
        assert_eq!(
            primary_image(foo).as_deref(),
            Some("registry.hub.docker.com/foo:1.0")
        );
        let bar = captured.iter().find(|d| d.name_any() == "bar").unwrap();
        assert_eq!(primary_image(bar).as_deref(), Some("quay.io/bar:2.0"));

        let live = cluster.stored_deployment("foo").unwrap();
        assert_eq!(primary_image(&live).as_deref(), Some("docker.io/foo:1.0"));
        assert_eq!(cluster.count_calls("read Deployment/"), 2);
        assert_eq!(cluster.count_calls("replace "), 0);
    }

    #[tokio::test]
    async fn operator_state_is_read_in_full() {
        let cluster = FakeCluster::new()
            .with_object(object(
                OLM_API_VERSION,
                SUBSCRIPTION_KIND,
                "entando-k8s-operator",
                json!({ "spec": { "channel": "final" } }),
            ))
            .with_object(object(
                OLM_API_VERSION,
                CLUSTER_SERVICE_VERSION_KIND,
                "entando-k8s-operator.v7.1.6",
                json!({ "status": { "phase": "Succeeded" } }),
            ));

        let handle = capture_operator_state(&cluster, "entando").await.unwrap();

        assert_eq!(handle.subscription().name_any(), "entando-k8s-operator");
        assert_eq!(
            handle.cluster_service_version().name_any(),
            "entando-k8s-operator.v7.1.6"
        );
        assert_eq!(
            cluster.calls(),
            vec![
                "list Subscription",
                "read Subscription/entando-k8s-operator",
                "list ClusterServiceVersion",
                "read ClusterServiceVersion/entando-k8s-operator.v7.1.6",
            ]
        );
    }

    #[tokio::test]
    async fn multiple_subscriptions_are_ambiguous() {
        let cluster = FakeCluster::new()
            .with_object(object(OLM_API_VERSION, SUBSCRIPTION_KIND, "a", json!({})))
            .with_object(object(OLM_API_VERSION, SUBSCRIPTION_KIND, "b", json!({})));

        let result = capture_operator_state(&cluster, "entando").await;

        match result {
            Err(Error::AmbiguousInstallation { kind, count, .. }) => {
                assert_eq!(kind, SUBSCRIPTION_KIND);
                assert_eq!(count, 2);
            }
            other => panic!("expected AmbiguousInstallation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_csv_is_no_installation() {
        let cluster = FakeCluster::new().with_object(object(
            OLM_API_VERSION,
            SUBSCRIPTION_KIND,
            "entando-k8s-operator",
            json!({}),
        ));

        let result = capture_operator_state(&cluster, "entando").await;

        assert!(matches!(result, Err(Error::NoInstallation { .. })));
    }

    #[tokio::test]
    async fn persisted_operator_state_has_one_file_per_object() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ManagingOperatorHandle::new(
            object(OLM_API_VERSION, SUBSCRIPTION_KIND, "entando-k8s-operator", json!({})),
            object(
                OLM_API_VERSION,
                CLUSTER_SERVICE_VERSION_KIND,
                "entando-k8s-operator.v7.1.6",
                json!({}),
            ),
        );

        let files = persist_operator_state(&handle, dir.path()).unwrap();

        assert_eq!(
            files,
            vec![
                dir.path().join("entando-k8s-operator.yaml"),
                dir.path().join("entando-k8s-operator.v7.1.6.yaml"),
            ]
        );
    }
}
