use crate::common::error::{
    K8sClientGeneration, LoadKubeContext, NoKubeContext, ReadKubeconfig, Result,
};
use async_trait::async_trait;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Namespace};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::{DynamicObject, GroupVersionKind, TypeMeta},
    discovery::{pinned_kind, ApiCapabilities, ApiResource, Scope},
    error::DiscoveryError,
    Client, Config, ResourceExt,
};
use snafu::{OptionExt, ResultExt};
use std::{collections::BTreeMap, sync::Mutex};
use tracing::debug;

/// The cluster operations the upgrade depends on. Every method operates on the context and
/// namespace confirmed by the operator; errors are the raw API errors, callers attach the
/// identity of the object they were working on.
#[async_trait]
pub trait ClusterFacade: Send + Sync {
    /// GET a Namespace.
    async fn read_namespace(&self, name: &str) -> Result<Namespace, kube::Error>;

    /// List all objects of an arbitrary kind in a namespace.
    async fn list_objects(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, kube::Error>;

    /// GET the live version of an arbitrary object, identified by its type, name and namespace.
    async fn read_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Create an arbitrary object.
    async fn create_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Merge-patch an existing object with the given definition.
    async fn patch_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Replace an existing object. The definition must carry the live resourceVersion.
    async fn replace_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error>;

    /// Delete an arbitrary object.
    async fn delete_object(&self, object: &DynamicObject) -> Result<(), kube::Error>;

    /// List the Deployments in a namespace.
    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, kube::Error>;

    /// GET a Deployment.
    async fn read_deployment(&self, name: &str, namespace: &str)
        -> Result<Deployment, kube::Error>;

    /// Replace a Deployment.
    async fn replace_deployment(
        &self,
        deployment: &Deployment,
        namespace: &str,
    ) -> Result<Deployment, kube::Error>;

    /// GET the status subresource of a Deployment.
    async fn read_deployment_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, kube::Error>;
}

/// The kubeconfig contexts available to the operator.
pub struct KubeContexts {
    kubeconfig: Kubeconfig,
}

impl KubeContexts {
    /// Read the kubeconfig from the default locations ($KUBECONFIG or ~/.kube/config).
    pub fn read() -> Result<Self> {
        let kubeconfig = Kubeconfig::read().context(ReadKubeconfig)?;
        Ok(Self { kubeconfig })
    }

    /// The context selected in the kubeconfig file, falling back to the first one defined.
    pub fn current(&self) -> Result<String> {
        self.kubeconfig
            .current_context
            .clone()
            .or_else(|| self.names().into_iter().next())
            .context(NoKubeContext)
    }

    /// The names of all of the contexts in the kubeconfig.
    pub fn names(&self) -> Vec<String> {
        self.kubeconfig
            .contexts
            .iter()
            .map(|context| context.name.clone())
            .collect()
    }

    /// Build a client set for a context. The kubeconfig file itself is never modified.
    pub async fn client_set(&self, context: &str) -> Result<KubeClientSet> {
        let options = KubeConfigOptions {
            context: Some(context.to_string()),
            ..Default::default()
        };
        let config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .context(LoadKubeContext { context })?;
        let cluster_url = config.cluster_url.to_string();
        let client = Client::try_from(config).context(K8sClientGeneration)?;

        Ok(KubeClientSet {
            client,
            context: context.to_string(),
            cluster_url,
            resources: Mutex::new(BTreeMap::new()),
        })
    }
}

/// This is a wrapper around a kube::Client for a single kubeconfig context, implementing the
/// ClusterFacade.
pub struct KubeClientSet {
    client: Client,
    context: String,
    cluster_url: String,
    resources: Mutex<BTreeMap<(String, String), (ApiResource, ApiCapabilities)>>,
}

impl KubeClientSet {
    /// The kubeconfig context this client set talks to.
    pub fn context(&self) -> &str {
        self.context.as_str()
    }

    /// The API server URL of the context.
    pub fn cluster_url(&self) -> &str {
        self.cluster_url.as_str()
    }

    /// Resolve the ApiResource for an apiVersion and kind, using the API server's discovery
    /// endpoints. Results are cached for the lifetime of the client set.
    async fn api_resource(
        &self,
        api_version: &str,
        kind: &str,
    ) -> Result<(ApiResource, ApiCapabilities), kube::Error> {
        let key = (api_version.to_string(), kind.to_string());
        if let Some(found) = self.cached_resource(&key) {
            return Ok(found);
        }

        let gvk = group_version_kind(api_version, kind);
        let resolved = pinned_kind(&self.client, &gvk).await?;
        debug!(%api_version, %kind, plural = %resolved.0.plural, "Resolved API resource");

        if let Ok(mut cache) = self.resources.lock() {
            cache.insert(key, resolved.clone());
        }
        Ok(resolved)
    }

    fn cached_resource(&self, key: &(String, String)) -> Option<(ApiResource, ApiCapabilities)> {
        self.resources
            .lock()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
    }

    /// Generate the Api<DynamicObject> for the type of an object, scoped to its namespace when
    /// the kind is namespaced.
    async fn dynamic_api(
        &self,
        object: &DynamicObject,
    ) -> Result<(Api<DynamicObject>, ApiResource), kube::Error> {
        let types = object.types.as_ref().ok_or_else(|| {
            kube::Error::Discovery(DiscoveryError::MissingKind(object.name_any()))
        })?;
        let (resource, capabilities) = self
            .api_resource(types.api_version.as_str(), types.kind.as_str())
            .await?;

        let api = match (capabilities.scope, object.namespace()) {
            (Scope::Namespaced, Some(namespace)) => {
                Api::namespaced_with(self.client.clone(), namespace.as_str(), &resource)
            }
            (Scope::Namespaced, None) => {
                Api::default_namespaced_with(self.client.clone(), &resource)
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource),
        };
        Ok((api, resource))
    }

    /// Generate the Deployment api client.
    fn deployments_api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterFacade for KubeClientSet {
    async fn read_namespace(&self, name: &str) -> Result<Namespace, kube::Error> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        namespaces.get(name).await
    }

    async fn list_objects(
        &self,
        api_version: &str,
        kind: &str,
        namespace: &str,
    ) -> Result<Vec<DynamicObject>, kube::Error> {
        let (resource, _) = self.api_resource(api_version, kind).await?;
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);

        let list = api.list(&ListParams::default()).await?;
        Ok(list
            .items
            .into_iter()
            .map(|object| with_types(object, &resource))
            .collect())
    }

    async fn read_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let (api, resource) = self.dynamic_api(object).await?;
        let live = api.get(object.name_any().as_str()).await?;
        Ok(with_types(live, &resource))
    }

    async fn create_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let (api, resource) = self.dynamic_api(object).await?;
        let created = api.create(&PostParams::default(), object).await?;
        Ok(with_types(created, &resource))
    }

    async fn patch_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let (api, resource) = self.dynamic_api(object).await?;
        let patched = api
            .patch(
                object.name_any().as_str(),
                &PatchParams::default(),
                &Patch::Merge(object),
            )
            .await?;
        Ok(with_types(patched, &resource))
    }

    async fn replace_object(&self, object: &DynamicObject) -> Result<DynamicObject, kube::Error> {
        let (api, resource) = self.dynamic_api(object).await?;
        let replaced = api
            .replace(object.name_any().as_str(), &PostParams::default(), object)
            .await?;
        Ok(with_types(replaced, &resource))
    }

    async fn delete_object(&self, object: &DynamicObject) -> Result<(), kube::Error> {
        let (api, _) = self.dynamic_api(object).await?;
        api.delete(object.name_any().as_str(), &DeleteParams::default())
            .await
            .map(|_| ())
    }

    async fn list_deployments(&self, namespace: &str) -> Result<Vec<Deployment>, kube::Error> {
        let list = self
            .deployments_api(namespace)
            .list(&ListParams::default())
            .await?;
        Ok(list.items)
    }

    async fn read_deployment(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, kube::Error> {
        self.deployments_api(namespace).get(name).await
    }

    async fn replace_deployment(
        &self,
        deployment: &Deployment,
        namespace: &str,
    ) -> Result<Deployment, kube::Error> {
        self.deployments_api(namespace)
            .replace(
                deployment.name_any().as_str(),
                &PostParams::default(),
                deployment,
            )
            .await
    }

    async fn read_deployment_status(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Deployment, kube::Error> {
        self.deployments_api(namespace).get_status(name).await
    }
}

/// Split an apiVersion into its group and version. Core objects have an empty group.
pub(crate) fn group_version_kind(api_version: &str, kind: &str) -> GroupVersionKind {
    match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    }
}

/// List items don't always carry apiVersion and kind; fill them in from the resource.
fn with_types(mut object: DynamicObject, resource: &ApiResource) -> DynamicObject {
    if object.types.is_none() {
        object.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
    }
    object
}

/// The kind of a dynamic object, for log messages and error contexts.
pub(crate) fn kind_of(object: &DynamicObject) -> String {
    object
        .types
        .as_ref()
        .map(|types| types.kind.clone())
        .unwrap_or_else(|| "object".to_string())
}
