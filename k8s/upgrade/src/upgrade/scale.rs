use crate::{
    common::{
        error::{
            EmptyDeploymentSpec, GetDeployment, GetDeploymentStatus, ReplaceDeployment, Result,
            ScaleDeployments,
        },
        kube_client::ClusterFacade,
    },
    upgrade::poll::{wait_until, PollParams},
};
use futures::future::join_all;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use snafu::{ensure, OptionExt, ResultExt};
use tracing::{error, info};

/// Scale every workload to `replicas` and wait until each has converged. The workloads are
/// scaled concurrently; a workload which fails doesn't stop the others. Fails with
/// ScaleDeployments naming every workload which failed, once all of them are done.
pub async fn scale_to(
    facade: &dyn ClusterFacade,
    workloads: &[Deployment],
    namespace: &str,
    replicas: i32,
    poll: &PollParams,
) -> Result<()> {
    let names: Vec<String> = workloads.iter().map(ResourceExt::name_any).collect();
    let results = join_all(
        names
            .iter()
            .map(|name| scale_one(facade, name.as_str(), namespace, replicas, poll)),
    )
    .await;

    let failures: Vec<String> = names
        .iter()
        .zip(results)
        .filter_map(|(name, result)| {
            result.err().map(|error| {
                error!(deployment.name = %name, %error, replicas, "Failed to scale Deployment");
                format!("{name}: {error}")
            })
        })
        .collect();
    ensure!(failures.is_empty(), ScaleDeployments { replicas, failures });

    info!(%namespace, replicas, count = names.len(), "Scaled Deployments");
    Ok(())
}

/// Re-read the Deployment so that changes made since it was captured are kept, set the
/// replica count, then wait for the status to report it.
async fn scale_one(
    facade: &dyn ClusterFacade,
    name: &str,
    namespace: &str,
    replicas: i32,
    poll: &PollParams,
) -> Result<()> {
    let mut deployment = facade
        .read_deployment(name, namespace)
        .await
        .context(GetDeployment { name, namespace })?;
    deployment
        .spec
        .as_mut()
        .context(EmptyDeploymentSpec { name, namespace })?
        .replicas = Some(replicas);
    facade
        .replace_deployment(&deployment, namespace)
        .await
        .context(ReplaceDeployment { name, namespace })?;

    let what = format!("Deployment {name} to scale to {replicas} replica(s)");
    wait_until(poll, what.as_str(), move || async move {
        let status = facade
            .read_deployment_status(name, namespace)
            .await
            .context(GetDeploymentStatus { name, namespace })?;
        Ok(has_converged(&status, replicas))
    })
    .await?;

    info!(deployment.name = %name, replicas, "Scaled Deployment");
    Ok(())
}

/// A Deployment scaled to zero has converged once its status no longer carries a ready
/// replica count at all. Otherwise the ready replica count must match.
pub(crate) fn has_converged(deployment: &Deployment, replicas: i32) -> bool {
    let ready_replicas = deployment
        .status
        .as_ref()
        .and_then(|status| status.ready_replicas);
    match replicas {
        0 => ready_replicas.is_none(),
        _ => ready_replicas == Some(replicas),
    }
}
