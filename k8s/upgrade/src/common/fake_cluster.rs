use crate::common::kube_client::{kind_of, ClusterFacade};
use async_trait::async_trait;
use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec, DeploymentStatus},
        core::v1::{Container, Namespace, PodSpec, PodTemplateSpec},
    },
    apimachinery::pkg::apis::meta::v1::ObjectMeta,
};
use kube::{
    core::{DynamicObject, TypeMeta},
    error::ErrorResponse,
    ResourceExt,
};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Mutex,
};

/// An in-memory cluster. Deployments converge instantly unless a readiness script says
/// otherwise; every call is recorded so tests can assert on the sequence of API requests.
#[derive(Default)]
pub(crate) struct FakeCluster {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    namespaces: BTreeSet<String>,
    unauthorized: bool,
    objects: BTreeMap<(String, String), DynamicObject>,
    deployments: BTreeMap<String, Deployment>,
    list_scripts: BTreeMap<String, VecDeque<Vec<DynamicObject>>>,
    read_scripts: BTreeMap<(String, String), VecDeque<Option<DynamicObject>>>,
    ready_scripts: BTreeMap<String, VecDeque<Option<i32>>>,
    stalled: BTreeSet<String>,
    failing: BTreeSet<String>,
    calls: Vec<String>,
    resource_version: u64,
}

pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    })
}

fn not_found() -> kube::Error {
    api_error(404, "NotFound")
}

/// A single-container Deployment.
pub(crate) fn deployment(name: &str, image: &str, replicas: i32) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("entando".to_string()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: name.to_string(),
                        image: Some(image.to_string()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// A namespaced dynamic object built from its JSON definition.
pub(crate) fn object(api_version: &str, kind: &str, name: &str, mut body: Value) -> DynamicObject {
    if let Some(map) = body.as_object_mut() {
        map.entry("metadata").or_insert_with(|| serde_json::json!({}));
    }
    let mut object: DynamicObject = serde_json::from_value(body).unwrap();
    object.types = Some(TypeMeta {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
    });
    object.metadata.name = Some(name.to_string());
    if object.metadata.namespace.is_none() {
        object.metadata.namespace = Some("entando".to_string());
    }
    object
}

const DEPLOYMENT_KIND: &str = "Deployment";

/// Deployments live in their own map; the generic object calls see them as DynamicObjects.
fn as_dynamic(deployment: &Deployment) -> DynamicObject {
    let value = serde_json::to_value(deployment).unwrap();
    serde_json::from_value(value).unwrap()
}

fn as_deployment(object: &DynamicObject) -> Deployment {
    let value = serde_json::to_value(object).unwrap();
    serde_json::from_value(value).unwrap()
}

fn object_key(object: &DynamicObject) -> (String, String) {
    (kind_of(object), object.name_any())
}

impl FakeCluster {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn with_namespace(self, name: &str) -> Self {
        self.state().namespaces.insert(name.to_string());
        self
    }

    pub(crate) fn unauthorized(self) -> Self {
        self.state().unauthorized = true;
        self
    }

    pub(crate) fn with_deployment(self, deployment: Deployment) -> Self {
        self.state()
            .deployments
            .insert(deployment.name_any(), deployment);
        self
    }

    pub(crate) fn with_object(self, object: DynamicObject) -> Self {
        self.state().objects.insert(object_key(&object), object);
        self
    }

    /// Successive list calls for a kind return these results, then fall back to the stored
    /// objects.
    pub(crate) fn script_list(self, kind: &str, results: Vec<Vec<DynamicObject>>) -> Self {
        self.state()
            .list_scripts
            .insert(kind.to_string(), results.into());
        self
    }

    /// Successive reads of an object return these results, None being a 404, then fall back to
    /// the stored object.
    pub(crate) fn script_read(
        self,
        kind: &str,
        name: &str,
        results: Vec<Option<DynamicObject>>,
    ) -> Self {
        self.state()
            .read_scripts
            .insert((kind.to_string(), name.to_string()), results.into());
        self
    }

    /// Successive status reads of a Deployment report these ready replica counts, then the
    /// converged value.
    pub(crate) fn script_ready(self, name: &str, ready: Vec<Option<i32>>) -> Self {
        self.state()
            .ready_scripts
            .insert(name.to_string(), ready.into());
        self
    }

    /// Status reads of a Deployment never report convergence.
    pub(crate) fn stall(self, name: &str) -> Self {
        self.state().stalled.insert(name.to_string());
        self
    }

    /// Calls whose label (see `calls()`) matches fail with a 500.
    pub(crate) fn fail_on(self, call: &str) -> Self {
        self.state().failing.insert(call.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn stored_object(&self, kind: &str, name: &str) -> Option<DynamicObject> {
        self.state()
            .objects
            .get(&(kind.to_string(), name.to_string()))
            .cloned()
    }

    pub(crate) fn stored_deployment(&self, name: &str) -> Option<Deployment> {
        self.state().deployments.get(name).cloned()
    }

    fn record(&self, call: String) -> Result<(), kube::Error> {
        let mut state = self.state();
        let fails = state.failing.contains(&call);
        state.calls.push(call);
        if fails {
            return Err(api_error(500, "InternalError"));
        }
        Ok(())
    }

    fn bump(state: &mut State) -> String {
        state.resource_version += 1;
        state.resource_version.to_string()
    }
}

#[async_trait]
impl ClusterFacade for FakeCluster {
    async fn read_namespace(&self, name: &str) -> Result<Namespace, kube::Error> {
        self.record(format!("read_namespace {name}"))?;
        let state = self.state();
        if state.unauthorized {
            return Err(api_error(401, "Unauthorized"));
        }
        if !state.namespaces.contains(name) {
            return Err(not_found());
        }
        Ok(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    async fn list_objects(
        &self,
        _api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, kube::Error> {
        self.record(format!("list {kind}"))?;
        let mut state = self.state();
        if let Some(script) = state.list_scripts.get_mut(kind) {
            if let Some(result) = script.pop_front() {
                return Ok(result);
            }
        }
        Ok(state
            .objects
            .values()
            .filter(|object| {
                kind_of(object) == kind && object.namespace().as_deref() == Some(namespace)
            })
            .cloned()
            .collect())
    }

    async fn read_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.record(format!("read {}/{}", kind_of(object), object.name_any()))?;
        let mut state = self.state();
        let key = object_key(object);
        if let Some(script) = state.read_scripts.get_mut(&key) {
            if let Some(result) = script.pop_front() {
                return result.ok_or_else(not_found);
            }
        }
        if key.0 == DEPLOYMENT_KIND {
            let deployment = state.deployments.get(&key.1).ok_or_else(not_found)?;
            return Ok(as_dynamic(deployment));
        }
        state.objects.get(&key).cloned().ok_or_else(not_found)
    }

    async fn create_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.record(format!("create {}/{}", kind_of(object), object.name_any()))?;
        let mut state = self.state();
        let key = object_key(object);
        if state.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut created = object.clone();
        created.metadata.resource_version = Some(Self::bump(&mut state));
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn patch_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.record(format!("patch {}/{}", kind_of(object), object.name_any()))?;
        let mut state = self.state();
        let key = object_key(object);
        if key.0 == DEPLOYMENT_KIND {
            if !state.deployments.contains_key(&key.1) {
                return Err(not_found());
            }
            let mut patched = as_deployment(object);
            patched.metadata.resource_version = Some(Self::bump(&mut state));
            state.deployments.insert(key.1, patched.clone());
            return Ok(as_dynamic(&patched));
        }
        if !state.objects.contains_key(&key) {
            return Err(not_found());
        }
        let mut patched = object.clone();
        patched.metadata.resource_version = Some(Self::bump(&mut state));
        state.objects.insert(key, patched.clone());
        Ok(patched)
    }

    async fn replace_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        self.record(format!("replace {}/{}", kind_of(object), object.name_any()))?;
        let mut state = self.state();
        let key = object_key(object);
        if !state.objects.contains_key(&key) {
            return Err(not_found());
        }
        let mut replaced = object.clone();
        replaced.metadata.resource_version = Some(Self::bump(&mut state));
        state.objects.insert(key, replaced.clone());
        Ok(replaced)
    }

    async fn delete_object(&self, object: &DynamicObject) -> Result<(), kube::Error> {
        self.record(format!("delete {}/{}", kind_of(object), object.name_any()))?;
        self.state()
            .objects
            .remove(&object_key(object))
            .map(|_| ())
            .ok_or_else(not_found)
    }

    async fn list_deployments(&self, _namespace: &str) -> Result<Vec<Deployment>, kube::Error> {
        self.record("list Deployment".to_string())?;
        Ok(self.state().deployments.values().cloned().collect())
    }

    async fn read_deployment(
        &self,
        name: &str,
        _namespace: &str,
    ) -> Result<Deployment, kube::Error> {
        self.record(format!("read Deployment/{name}"))?;
        self.state()
            .deployments
            .get(name)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn replace_deployment(
        &self,
        deployment: &Deployment,
        _namespace: &str,
    ) -> Result<Deployment, kube::Error> {
        let name = deployment.name_any();
        self.record(format!("replace Deployment/{name}"))?;
        let mut state = self.state();
        if !state.deployments.contains_key(&name) {
            return Err(not_found());
        }
        let mut replaced = deployment.clone();
        replaced.metadata.resource_version = Some(Self::bump(&mut state));
        state.deployments.insert(name, replaced.clone());
        Ok(replaced)
    }

    async fn read_deployment_status(
        &self,
        name: &str,
        _namespace: &str,
    ) -> Result<Deployment, kube::Error> {
        self.record(format!("status Deployment/{name}"))?;
        let mut state = self.state();
        let scripted = state
            .ready_scripts
            .get_mut(name)
            .and_then(|script| script.pop_front());
        let stalled = state.stalled.contains(name);
        let mut deployment = state.deployments.get(name).cloned().ok_or_else(not_found)?;

        let desired = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.replicas)
            .unwrap_or(1);
        let ready_replicas = match scripted {
            Some(ready) => ready,
            None if stalled => Some(0),
            // The controller drops readyReplicas from the status once every Pod is gone.
            None if desired == 0 => None,
            None => Some(desired),
        };
        deployment.status = Some(DeploymentStatus {
            ready_replicas,
            ..Default::default()
        });
        Ok(deployment)
    }
}
