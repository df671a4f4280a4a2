use crate::{
    common::{
        constants::{CATALOG_SOURCE_KIND, CONNECTION_STATE_READY},
        error::{CreateObject, GetObject, JsonConversion, PatchObject, Result},
        kube_client::{kind_of, ClusterFacade},
    },
    upgrade::poll::{wait_until, PollParams},
};
use kube::{core::DynamicObject, Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use snafu::ResultExt;
use tracing::{debug, info};

/// What apply() did to an object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ApplyOutcome {
    Created,
    Updated,
}

/// Create or update each object, one at a time and in order. An object which can't be read is
/// created, and then awaited until its connection state is READY if it reports one. Objects
/// without a namespace are placed in `namespace`. The first failure ends the batch.
pub async fn apply(
    facade: &dyn ClusterFacade,
    objects: &[DynamicObject],
    namespace: &str,
    poll: &PollParams,
) -> Result<Vec<ApplyOutcome>> {
    let mut outcomes = Vec::with_capacity(objects.len());
    for object in objects {
        let mut object = object.clone();
        if object.metadata.namespace.is_none() {
            object.metadata.namespace = Some(namespace.to_string());
        }
        outcomes.push(apply_one(facade, &object, poll).await?);
    }
    Ok(outcomes)
}

async fn apply_one(
    facade: &dyn ClusterFacade,
    object: &DynamicObject,
    poll: &PollParams,
) -> Result<ApplyOutcome> {
    let kind = kind_of(object);
    let name = object.name_any();
    let namespace = object.namespace().unwrap_or_default();

    if let Err(error) = facade.read_object(object).await {
        debug!(%kind, %name, %error, "Object could not be read, creating it");
        let created = facade.create_object(object).await.context(CreateObject {
            kind: kind.as_str(),
            name: name.as_str(),
            namespace: namespace.as_str(),
        })?;
        info!(%kind, %name, %namespace, "Created");

        if awaits_connection(&created) {
            let what = format!("{kind} {name} to be {CONNECTION_STATE_READY}");
            let (kind, name, namespace) = (kind.as_str(), name.as_str(), namespace.as_str());
            wait_until(poll, what.as_str(), move || async move {
                let live = facade.read_object(object).await.context(GetObject {
                    kind,
                    name,
                    namespace,
                })?;
                Ok(connection_state(&live) == Some(CONNECTION_STATE_READY))
            })
            .await?;
            info!(%kind, %name, "Connection is ready");
        }
        return Ok(ApplyOutcome::Created);
    }

    facade.patch_object(object).await.context(PatchObject {
        kind: kind.as_str(),
        name: name.as_str(),
        namespace: namespace.as_str(),
    })?;
    info!(%kind, %name, %namespace, "Updated");
    Ok(ApplyOutcome::Updated)
}

/// The last observed connection state of an object which reports one.
fn connection_state(object: &DynamicObject) -> Option<&str> {
    object
        .data
        .pointer("/status/connectionState/lastObservedState")
        .and_then(Value::as_str)
}

/// CatalogSources report a connection state once their registry is up. Other kinds are only
/// awaited if they already carry one.
fn awaits_connection(object: &DynamicObject) -> bool {
    kind_of(object) == CATALOG_SOURCE_KIND
        || object.data.pointer("/status/connectionState").is_some()
}

/// Convert a typed object into a dynamic one which can be applied: the fields which only
/// describe the object's server-side history are removed.
pub fn to_applicable<K>(object: &K) -> Result<DynamicObject>
where
    K: Resource + Serialize,
{
    let name = object.name_any();
    let value = serde_json::to_value(object).context(JsonConversion {
        name: name.as_str(),
        target: "JSON",
    })?;
    let mut dynamic: DynamicObject = serde_json::from_value(value).context(JsonConversion {
        name: name.as_str(),
        target: "DynamicObject",
    })?;
    dynamic.metadata.resource_version = None;
    dynamic.metadata.managed_fields = None;
    Ok(dynamic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{
        constants::OLM_API_VERSION,
        error::Error,
        fake_cluster::{deployment, object, FakeCluster},
    };
    use serde_json::json;
    use std::time::Duration;

    fn poll() -> PollParams {
        PollParams::new(Duration::from_secs(3), Some(Duration::from_secs(600)))
    }

    fn config_map(name: &str) -> DynamicObject {
        object("v1", "ConfigMap", name, json!({ "data": { "key": "value" } }))
    }

    fn catalog_source(state: Option<&str>) -> DynamicObject {
        let mut body = json!({ "spec": { "sourceType": "grpc" } });
        if let Some(state) = state {
            body["status"] = json!({ "connectionState": { "lastObservedState": state } });
        }
        let mut catalog = object(OLM_API_VERSION, CATALOG_SOURCE_KIND, "entando-catalog", body);
        catalog.metadata.namespace = Some("openshift-marketplace".to_string());
        catalog
    }

    #[tokio::test(start_paused = true)]
    async fn applying_twice_updates_the_second_time() {
        let cluster = FakeCluster::new();
        let objects = vec![config_map("entando-config")];

        let first = apply(&cluster, &objects, "entando", &poll()).await.unwrap();
        let second = apply(&cluster, &objects, "entando", &poll()).await.unwrap();

        assert_eq!(first, vec![ApplyOutcome::Created]);
        assert_eq!(second, vec![ApplyOutcome::Updated]);
        assert_eq!(cluster.count_calls("create "), 1);
        assert_eq!(
            cluster.calls(),
            vec![
                "read ConfigMap/entando-config",
                "create ConfigMap/entando-config",
                "read ConfigMap/entando-config",
                "patch ConfigMap/entando-config",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn created_catalog_source_is_awaited_until_ready() {
        let cluster = FakeCluster::new().script_read(
            CATALOG_SOURCE_KIND,
            "entando-catalog",
            vec![
                None,
                Some(catalog_source(None)),
                Some(catalog_source(Some("CONNECTING"))),
                Some(catalog_source(Some("READY"))),
            ],
        );

        let outcomes = apply(&cluster, &[catalog_source(None)], "entando", &poll())
            .await
            .unwrap();

        assert_eq!(outcomes, vec![ApplyOutcome::Created]);
        assert_eq!(cluster.count_calls("read CatalogSource/entando-catalog"), 4);
        let stored = cluster
            .stored_object(CATALOG_SOURCE_KIND, "entando-catalog")
            .unwrap();
        assert_eq!(
            stored.metadata.namespace.as_deref(),
            Some("openshift-marketplace")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn objects_without_namespace_go_to_the_target_namespace() {
        let cluster = FakeCluster::new();
        let mut unscoped = config_map("entando-config");
        unscoped.metadata.namespace = None;

        apply(&cluster, &[unscoped], "entando-7", &poll())
            .await
            .unwrap();

        let stored = cluster.stored_object("ConfigMap", "entando-config").unwrap();
        assert_eq!(stored.metadata.namespace.as_deref(), Some("entando-7"));
    }

    #[tokio::test(start_paused = true)]
    async fn first_failure_ends_the_batch() {
        let cluster = FakeCluster::new().fail_on("create ConfigMap/b");
        let objects = vec![config_map("a"), config_map("b"), config_map("c")];

        let result = apply(&cluster, &objects, "entando", &poll()).await;

        assert!(matches!(result, Err(Error::CreateObject { .. })));
        assert!(cluster.stored_object("ConfigMap", "a").is_some());
        assert_eq!(cluster.count_calls("read ConfigMap/c"), 0);
    }

    #[test]
    fn applicable_deployments_have_no_server_side_history() {
        let mut live = deployment("entando-server", "entando/entando-server:7.2.0", 1);
        live.metadata.resource_version = Some("4711".to_string());

        let applicable = to_applicable(&live).unwrap();

        assert_eq!(applicable.metadata.resource_version, None);
        assert_eq!(kind_of(&applicable), "Deployment");
        assert_eq!(applicable.name_any(), "entando-server");
        assert_eq!(
            applicable.data["spec"]["template"]["spec"]["containers"][0]["image"],
            "entando/entando-server:7.2.0"
        );
    }
}
