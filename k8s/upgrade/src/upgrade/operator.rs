use crate::{
    common::{
        constants::{
            CLUSTER_SERVICE_VERSION_KIND, CSV_SUCCEEDED_PHASE, K8S_SERVICE_DEPLOYMENT,
            K8S_SERVICE_ENV_DENYLIST, MARKETPLACE_NAMESPACE, OLM_API_VERSION, OPERATOR_CHANNEL,
            OPERATOR_DEPLOYMENT, OPERATOR_ENV_DENYLIST, OPERATOR_PACKAGE,
            RELATED_IMAGE_ENV_PREFIX, SUBSCRIPTION_KIND,
        },
        error::{
            CreateObject, DeleteObject, GetObject, JsonConversion, ListObjects, MissingObjectField,
            ReplaceObject, Result,
        },
        kube_client::{kind_of, ClusterFacade},
    },
    upgrade::{
        backup::ManagingOperatorHandle,
        poll::{wait_for, PollParams},
    },
};
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{EnvVar, EnvVarSource},
};
use kube::{core::DynamicObject, ResourceExt};
use serde_json::{json, Value};
use snafu::{OptionExt, ResultExt};
use std::fmt;
use tracing::{debug, info, warn};

/// The steps of replacing the OLM installation of the Entando operator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OperatorPhase {
    /// Deleting the previous Subscription and ClusterServiceVersion.
    Uninstalling,
    /// Creating the Subscription for the new release.
    Installing,
    /// Waiting for OLM to install the new ClusterServiceVersion.
    AwaitingReady,
    /// The new ClusterServiceVersion reports Succeeded.
    Ready,
}

impl fmt::Display for OperatorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Uninstalling => "uninstalling the previous operator",
            Self::Installing => "installing the new operator",
            Self::AwaitingReady => "waiting for the new operator",
            Self::Ready => "ready",
        };
        write!(f, "{phase}")
    }
}

/// Replaces the Entando operator installation in a namespace.
pub struct OperatorReplacement<'a> {
    facade: &'a dyn ClusterFacade,
    namespace: &'a str,
    poll: &'a PollParams,
    phase: OperatorPhase,
}

impl<'a> OperatorReplacement<'a> {
    pub fn new(facade: &'a dyn ClusterFacade, namespace: &'a str, poll: &'a PollParams) -> Self {
        Self {
            facade,
            namespace,
            poll,
            phase: OperatorPhase::Uninstalling,
        }
    }

    /// The current phase. After a failure, this is the phase which failed.
    pub fn phase(&self) -> OperatorPhase {
        self.phase
    }

    fn enter(&mut self, phase: OperatorPhase) {
        info!(from = ?self.phase, to = ?phase, namespace = %self.namespace, "Operator replacement");
        self.phase = phase;
    }

    /// Uninstall the previous operator, subscribe to the release's operator from the catalog
    /// and wait until OLM reports the release's ClusterServiceVersion as Succeeded. Failing to
    /// delete either of the previous objects is fatal. The previous ClusterServiceVersion may
    /// still be listed while it's finalized, it's never taken for the new one.
    pub async fn run(
        &mut self,
        previous: &ManagingOperatorHandle,
        release: &str,
        catalog: &str,
    ) -> Result<ManagingOperatorHandle> {
        self.phase = OperatorPhase::Uninstalling;
        self.delete(previous.subscription()).await?;
        self.delete(previous.cluster_service_version()).await?;

        self.enter(OperatorPhase::Installing);
        let subscription = subscription_template(self.namespace, release, catalog)?;
        let subscription = self.facade.create_object(&subscription).await.context(
            CreateObject {
                kind: SUBSCRIPTION_KIND,
                name: OPERATOR_PACKAGE,
                namespace: self.namespace,
            },
        )?;

        self.enter(OperatorPhase::AwaitingReady);
        let (facade, namespace) = (self.facade, self.namespace);
        let expected = cluster_service_version_name(release);
        let expected = expected.as_str();
        let what = format!("ClusterServiceVersion {expected} to succeed");
        let cluster_service_version = wait_for(self.poll, what.as_str(), move || async move {
            let csv = read_live_csv(facade, expected, namespace).await?;
            Ok(csv.filter(has_succeeded))
        })
        .await?;

        self.enter(OperatorPhase::Ready);
        Ok(ManagingOperatorHandle::new(
            subscription,
            cluster_service_version,
        ))
    }

    async fn delete(&self, object: &DynamicObject) -> Result<()> {
        self.facade
            .delete_object(object)
            .await
            .context(DeleteObject {
                kind: kind_of(object),
                name: object.name_any(),
                namespace: self.namespace,
            })?;
        info!(kind = %kind_of(object), name = %object.name_any(), "Uninstalled");
        Ok(())
    }
}

/// The Subscription to the Entando operator of a release, served by the given catalog.
pub fn subscription_template(
    namespace: &str,
    release: &str,
    catalog: &str,
) -> Result<DynamicObject> {
    serde_json::from_value(json!({
        "apiVersion": OLM_API_VERSION,
        "kind": SUBSCRIPTION_KIND,
        "metadata": {
            "name": OPERATOR_PACKAGE,
            "namespace": namespace,
        },
        "spec": {
            "channel": OPERATOR_CHANNEL,
            "installPlanApproval": "Automatic",
            "name": OPERATOR_PACKAGE,
            "source": catalog,
            "sourceNamespace": MARKETPLACE_NAMESPACE,
            "startingCSV": cluster_service_version_name(release),
        },
    }))
    .context(JsonConversion {
        name: OPERATOR_PACKAGE,
        target: SUBSCRIPTION_KIND,
    })
}

/// The name OLM gives to the ClusterServiceVersion of a release.
pub fn cluster_service_version_name(release: &str) -> String {
    format!("{OPERATOR_PACKAGE}.{release}")
}

/// GET the named ClusterServiceVersion. None if it isn't listed yet, or is being deleted.
async fn read_live_csv(
    facade: &dyn ClusterFacade,
    name: &str,
    namespace: &str,
) -> Result<Option<DynamicObject>> {
    let listed = facade
        .list_objects(OLM_API_VERSION, CLUSTER_SERVICE_VERSION_KIND, namespace)
        .await
        .context(ListObjects {
            api_version: OLM_API_VERSION,
            kind: CLUSTER_SERVICE_VERSION_KIND,
            namespace,
        })?;
    let Some(listed) = listed.iter().find(|csv| csv.name_any() == name) else {
        return Ok(None);
    };
    if listed.metadata.deletion_timestamp.is_some() {
        return Ok(None);
    }

    let csv = facade.read_object(listed).await.context(GetObject {
        kind: CLUSTER_SERVICE_VERSION_KIND,
        name,
        namespace,
    })?;
    Ok(csv.metadata.deletion_timestamp.is_none().then_some(csv))
}

fn has_succeeded(cluster_service_version: &DynamicObject) -> bool {
    cluster_service_version
        .data
        .pointer("/status/phase")
        .and_then(Value::as_str)
        == Some(CSV_SUCCEEDED_PHASE)
}

/// The value of an environment variable: a literal or a reference.
#[derive(Clone, Debug, PartialEq)]
pub enum EnvSource {
    Value(String),
    ValueFrom(EnvVarSource),
}

impl EnvSource {
    /// None for a variable with neither a value nor a reference.
    pub fn of(variable: &EnvVar) -> Option<Self> {
        match (&variable.value, &variable.value_from) {
            (_, Some(reference)) => Some(Self::ValueFrom(reference.clone())),
            (Some(value), None) => Some(Self::Value(value.clone())),
            (None, None) => None,
        }
    }
}

/// Environment variables which are never carried over to a new operator.
#[derive(Clone, Debug, Default)]
pub struct EnvDenylist {
    names: Vec<String>,
    prefixes: Vec<String>,
}

impl EnvDenylist {
    pub fn new(names: &[&str], prefixes: &[&str]) -> Self {
        Self {
            names: names.iter().map(ToString::to_string).collect(),
            prefixes: prefixes.iter().map(ToString::to_string).collect(),
        }
    }

    /// The variables of the operator Deployment which track its identity, version or related
    /// images.
    pub fn operator() -> Self {
        Self::new(&OPERATOR_ENV_DENYLIST, &[RELATED_IMAGE_ENV_PREFIX])
    }

    /// The variables of the k8s-service Deployment which track its identity.
    pub fn k8s_service() -> Self {
        Self::new(&K8S_SERVICE_ENV_DENYLIST, &[])
    }

    pub fn is_denied(&self, name: &str) -> bool {
        self.names.iter().any(|denied| denied == name)
            || self.prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Merge the source variables into the target, by name. Denied variables are skipped, and
/// variables the target doesn't have are appended. For a variable in both, the target keeps
/// its shape: a literal value only replaces a literal value, a reference only replaces a
/// reference. A source variable without either leaves the target's alone.
pub fn merge_env(target: &mut Vec<EnvVar>, source: &[EnvVar], denylist: &EnvDenylist) {
    for variable in source.iter().filter(|variable| !denylist.is_denied(&variable.name)) {
        let Some(existing) = target.iter_mut().find(|env| env.name == variable.name) else {
            target.push(variable.clone());
            continue;
        };
        match EnvSource::of(variable) {
            Some(EnvSource::Value(value)) if existing.value.is_some() => {
                existing.value = Some(value)
            }
            Some(EnvSource::ValueFrom(reference)) if existing.value_from.is_some() => {
                existing.value_from = Some(reference)
            }
            None => debug!(
                env.name = %variable.name,
                "Source variable has no value, keeping the target's"
            ),
            _ => warn!(
                env.name = %variable.name,
                "Not carrying over environment variable, its value has a different form"
            ),
        }
    }
}

/// Merge variables into the primary container of one of the Deployments in the install
/// strategy of a ClusterServiceVersion. The Deployment is located by name.
pub fn merge_install_env(
    cluster_service_version: &mut DynamicObject,
    deployment: &str,
    source: &[EnvVar],
    denylist: &EnvDenylist,
) -> Result<()> {
    let kind = kind_of(cluster_service_version);
    let name = cluster_service_version.name_any();
    let field = format!("spec.install.spec.deployments[{deployment}].spec.template.spec.containers[0]");

    let container = cluster_service_version
        .data
        .pointer_mut("/spec/install/spec/deployments")
        .and_then(Value::as_array_mut)
        .and_then(|deployments| {
            deployments
                .iter_mut()
                .find(|entry| entry.get("name").and_then(Value::as_str) == Some(deployment))
        })
        .and_then(|entry| entry.pointer_mut("/spec/template/spec/containers/0"))
        .and_then(Value::as_object_mut)
        .context(MissingObjectField {
            kind: kind.as_str(),
            name: name.as_str(),
            field,
        })?;

    let env = container.entry("env").or_insert_with(|| json!([]));
    let mut target: Vec<EnvVar> = match &*env {
        Value::Null => Vec::new(),
        value => serde_json::from_value(value.clone()).context(JsonConversion {
            name: name.as_str(),
            target: "environment variables",
        })?,
    };
    merge_env(&mut target, source, denylist);
    *env = serde_json::to_value(&target).context(JsonConversion {
        name: name.as_str(),
        target: "environment variables",
    })?;
    Ok(())
}

/// Carry the environment of the previous operator and k8s-service Deployments over to the
/// new ClusterServiceVersion, then replace it. Returns the replaced object.
pub async fn forward_operator_env(
    facade: &dyn ClusterFacade,
    previous_workloads: &[Deployment],
    installed: &DynamicObject,
    namespace: &str,
) -> Result<DynamicObject> {
    let mut cluster_service_version = facade.read_object(installed).await.context(GetObject {
        kind: CLUSTER_SERVICE_VERSION_KIND,
        name: installed.name_any(),
        namespace,
    })?;

    for (deployment, denylist) in [
        (OPERATOR_DEPLOYMENT, EnvDenylist::operator()),
        (K8S_SERVICE_DEPLOYMENT, EnvDenylist::k8s_service()),
    ] {
        let Some(previous) = previous_workloads
            .iter()
            .find(|workload| workload.name_any() == deployment)
        else {
            warn!(deployment.name = %deployment, "No backup of Deployment, skipping its environment");
            continue;
        };
        let source = primary_env(previous);
        merge_install_env(&mut cluster_service_version, deployment, &source, &denylist)?;
    }

    cluster_service_version.metadata.managed_fields = None;
    let name = cluster_service_version.name_any();
    let replaced = facade
        .replace_object(&cluster_service_version)
        .await
        .context(ReplaceObject {
            kind: CLUSTER_SERVICE_VERSION_KIND,
            name: name.as_str(),
            namespace,
        })?;
    info!(csv = %name, "Carried over the operator environment");
    Ok(replaced)
}

fn primary_env(deployment: &Deployment) -> Vec<EnvVar> {
    deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.first())
        .and_then(|container| container.env.clone())
        .unwrap_or_default()
}
