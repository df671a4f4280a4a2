use crate::{
    common::{
        constants::{ENTANDO_APP_API_VERSION, ENTANDO_APP_KIND, OPENSHIFT_NAMESPACE, PRODUCT},
        error::{
            is_unauthorized, Aborted, CurrentDir, EmptySelection, Error, GetNamespace, ListObjects,
            NoPlatformInstallation, NotLoggedIn, Result,
        },
        kube_client::{ClusterFacade, KubeContexts},
        regex::is_namespace_name,
    },
    context::ClusterFlavor,
    prompt::Prompter,
    release::{resolve_release, ReleaseSource},
    upgrade::{apply::apply, poll::PollParams},
};
use kube::ResourceExt;
use snafu::{ensure, OptionExt, ResultExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// The release picked by the operator, and on OpenShift the marketplace catalog which serves
/// its operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReleaseSelection {
    pub release: String,
    pub catalog: Option<String>,
}

/// Confirm the current kubeconfig context, or pick another one. The kubeconfig file is left
/// as it is.
pub async fn select_context(contexts: &KubeContexts, prompter: &dyn Prompter) -> Result<String> {
    let current = contexts.current()?;
    console_logger::info_with("Your current context is:", current.as_str());
    if prompter
        .confirm("Is this the context you want to use?")
        .await?
    {
        return Ok(current);
    }

    let message = "What context would you like to use?";
    let names = contexts.names();
    let index = prompter.select(message, names.as_slice()).await?;
    names
        .get(index)
        .cloned()
        .context(EmptySelection { message })
}

/// The cluster is OpenShift if the 'openshift' namespace can be read. Credentials which are
/// rejected outright mean the operator has to log in first.
pub async fn detect_flavor(facade: &dyn ClusterFacade, context: &str) -> Result<ClusterFlavor> {
    match facade.read_namespace(OPENSHIFT_NAMESPACE).await {
        Ok(_) => Ok(ClusterFlavor::OperatorManagedPlatform),
        Err(error) if is_unauthorized(&error) => NotLoggedIn { context }.fail(),
        Err(error) => {
            debug!(%error, "Namespace '{OPENSHIFT_NAMESPACE}' is not readable");
            Ok(ClusterFlavor::StandardK8s)
        }
    }
}

/// The namespace must exist and have at least one EntandoApp.
pub async fn validate_namespace(facade: &dyn ClusterFacade, namespace: &str) -> Result<()> {
    facade
        .read_namespace(namespace)
        .await
        .context(GetNamespace { namespace })?;
    let apps = facade
        .list_objects(ENTANDO_APP_API_VERSION, ENTANDO_APP_KIND, namespace)
        .await
        .context(ListObjects {
            api_version: ENTANDO_APP_API_VERSION,
            kind: ENTANDO_APP_KIND,
            namespace,
        })?;
    ensure!(!apps.is_empty(), NoPlatformInstallation { namespace });
    Ok(())
}

/// Ask for the target namespace until it is a valid one, or the operator gives up. The
/// namespace flag, if any, is the first candidate.
pub async fn select_namespace(
    facade: &dyn ClusterFacade,
    prompter: &dyn Prompter,
    flag: Option<&str>,
) -> Result<String> {
    let mut candidate = flag.map(str::to_lowercase);
    loop {
        let namespace = match candidate.take() {
            Some(namespace) => namespace,
            None => prompter
                .input("Enter the target namespace:")
                .await?
                .to_lowercase(),
        };

        let problem = if !is_namespace_name(namespace.as_str())? {
            format!("'{namespace}' is not a valid namespace name")
        } else {
            match validate_namespace(facade, namespace.as_str()).await {
                Ok(()) => {
                    info!(%namespace, "Validated target namespace");
                    return Ok(namespace);
                }
                Err(Error::GetNamespace { source, .. }) => {
                    debug!(%namespace, error = %source, "Namespace is not readable");
                    format!("The namespace '{namespace}' does not exist")
                }
                Err(error @ (Error::ListObjects { .. } | Error::NoPlatformInstallation { .. })) => {
                    debug!(%namespace, %error, "No EntandoApp found");
                    format!("The namespace '{namespace}' does not seem to have {PRODUCT} installed")
                }
                Err(error) => return Err(error),
            }
        };

        if !prompter
            .confirm(format!("{problem}. Do you want to try again?").as_str())
            .await?
        {
            return Aborted.fail();
        }
    }
}

/// Pick the release to upgrade to. The release must be known and publish a patch manifest for
/// the cluster flavor. On OpenShift its catalog must be in the marketplace too; the operator
/// may add it, pick another release or give up.
pub async fn select_release(
    facade: &dyn ClusterFacade,
    releases: &dyn ReleaseSource,
    prompter: &dyn Prompter,
    flavor: ClusterFlavor,
    namespace: &str,
    poll: &PollParams,
    flag: Option<&str>,
) -> Result<ReleaseSelection> {
    let known = releases.list_releases().await?;
    let mut candidate = flag.and_then(|requested| {
        let resolved = resolve_release(requested, known.as_slice());
        if resolved.is_none() {
            console_logger::warn(
                format!("The {PRODUCT} version you specified could not be found:").as_str(),
                requested,
            );
        }
        resolved
    });

    loop {
        if let Some(release) = candidate.take() {
            if let Some(selection) = check_release(
                facade, releases, prompter, flavor, namespace, poll, release.as_str(),
            )
            .await?
            {
                info!(release = %selection.release, catalog = ?selection.catalog, "Selected release");
                return Ok(selection);
            }
        }

        let message = format!("What version of {PRODUCT} do you wish to upgrade to?");
        let index = prompter.select(message.as_str(), known.as_slice()).await?;
        candidate = Some(
            known
                .get(index)
                .cloned()
                .context(EmptySelection { message })?,
        );
    }
}

/// Returns None if the operator should pick another release.
async fn check_release(
    facade: &dyn ClusterFacade,
    releases: &dyn ReleaseSource,
    prompter: &dyn Prompter,
    flavor: ClusterFlavor,
    namespace: &str,
    poll: &PollParams,
    release: &str,
) -> Result<Option<ReleaseSelection>> {
    match releases.fetch_patch_manifest(release, flavor).await {
        Ok(_) => {}
        Err(error @ Error::MissingPatchManifest { .. }) => {
            debug!(%error, "Release has no patch manifest");
            console_logger::warn(
                "Kustomization for the selected version is not available, please pick a different one:",
                release,
            );
            return Ok(None);
        }
        Err(error) => return Err(error),
    }

    if !flavor.is_operator_managed() {
        return Ok(Some(ReleaseSelection {
            release: release.to_string(),
            catalog: None,
        }));
    }

    let catalog = releases.fetch_catalog_source(release).await?;
    let catalog_name = catalog.name_any();
    if let Err(error) = facade.read_object(&catalog).await {
        debug!(catalog = %catalog_name, %error, "Catalog is not in the marketplace");
        console_logger::warn(
            format!("Catalog for {PRODUCT} {release} not found:").as_str(),
            catalog_name.as_str(),
        );
        let choices = vec![
            "Yes".to_string(),
            "No, change version".to_string(),
            "No, close the program".to_string(),
        ];
        let choice = prompter
            .select(
                "Would you like to add the selected version's catalog to the marketplace?",
                choices.as_slice(),
            )
            .await?;
        match choice {
            0 => {
                apply(facade, &[catalog], namespace, poll).await?;
                console_logger::info_with(
                    "Added to the OpenShift Marketplace:",
                    catalog_name.as_str(),
                );
            }
            1 => return Ok(None),
            _ => return Aborted.fail(),
        }
    }

    Ok(Some(ReleaseSelection {
        release: release.to_string(),
        catalog: Some(catalog_name),
    }))
}

/// The directory in which the run directory is created: the output-dir flag, the current
/// directory, or a custom path. Declining both is an abort.
pub async fn select_output_root(
    prompter: &dyn Prompter,
    flag: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(dir) = flag {
        return Ok(trim_trailing_separators(dir.to_string_lossy().as_ref()));
    }

    let current = std::env::current_dir().context(CurrentDir)?;
    let here = format!(
        "You are here: '{}'. Do you want to create a directory here?",
        current.display()
    );
    if prompter.confirm(here.as_str()).await? {
        return Ok(current);
    }
    if prompter.confirm("Do you want to specify a custom path?").await? {
        let custom = prompter.input("Enter your custom path:").await?;
        return Ok(trim_trailing_separators(custom.as_str()));
    }
    Aborted.fail()
}

fn trim_trailing_separators(path: &str) -> PathBuf {
    match path.trim_end_matches('/') {
        "" if path.starts_with('/') => PathBuf::from("/"),
        trimmed => PathBuf::from(trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::{
            constants::{CATALOG_SOURCE_KIND, OLM_API_VERSION},
            fake_cluster::{object, FakeCluster},
        },
        prompt::{Answer, ScriptedPrompter},
        release::StaticReleaseSource,
    };
    use kube::core::DynamicObject;
    use serde_json::json;
    use std::time::Duration;

    const IMAGES: &str = "- name: entando/app-builder\n  newTag: 7.2.0\n";

    fn entando_app(namespace: &str) -> DynamicObject {
        let mut app = object(ENTANDO_APP_API_VERSION, ENTANDO_APP_KIND, "quickstart", json!({}));
        app.metadata.namespace = Some(namespace.to_string());
        app
    }

    fn catalog(state: Option<&str>) -> DynamicObject {
        let mut body = json!({ "spec": { "image": "registry.example/entando-catalog:7.2.0" } });
        if let Some(state) = state {
            body["status"] = json!({ "connectionState": { "lastObservedState": state } });
        }
        let mut catalog = object(
            OLM_API_VERSION,
            CATALOG_SOURCE_KIND,
            "entando-catalog-v7-2-0",
            body,
        );
        catalog.metadata.namespace = Some("openshift-marketplace".to_string());
        catalog
    }

    fn poll() -> PollParams {
        PollParams::new(Duration::from_secs(3), Some(Duration::from_secs(600)))
    }

    #[tokio::test]
    async fn openshift_is_detected_by_its_namespace() {
        let openshift = FakeCluster::new().with_namespace("openshift");
        let kubernetes = FakeCluster::new();

        assert_eq!(
            detect_flavor(&openshift, "ocp").await.unwrap(),
            ClusterFlavor::OperatorManagedPlatform
        );
        assert_eq!(
            detect_flavor(&kubernetes, "kind").await.unwrap(),
            ClusterFlavor::StandardK8s
        );
    }

    #[tokio::test]
    async fn rejected_credentials_are_fatal() {
        let cluster = FakeCluster::new().unauthorized();

        let result = detect_flavor(&cluster, "ocp").await;

        match result {
            Err(Error::NotLoggedIn { context }) => assert_eq!(context, "ocp"),
            other => panic!("expected NotLoggedIn, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn namespace_flag_is_used_without_asking() {
        let cluster = FakeCluster::new()
            .with_namespace("entando")
            .with_object(entando_app("entando"));
        let prompter = ScriptedPrompter::new(vec![]);

        let namespace = select_namespace(&cluster, &prompter, Some("Entando"))
            .await
            .unwrap();

        assert_eq!(namespace, "entando");
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn missing_namespace_can_be_retried() {
        let cluster = FakeCluster::new()
            .with_namespace("entando")
            .with_object(entando_app("entando"));
        let prompter = ScriptedPrompter::new(vec![
            Answer::Confirm(true),
            Answer::Input("entando"),
        ]);

        let namespace = select_namespace(&cluster, &prompter, Some("entando-old"))
            .await
            .unwrap();

        assert_eq!(namespace, "entando");
        assert_eq!(
            prompter.asked(),
            vec![
                "The namespace 'entando-old' does not exist. Do you want to try again?",
                "Enter the target namespace:",
            ]
        );
    }

    #[tokio::test]
    async fn namespace_without_entando_can_abort() {
        let cluster = FakeCluster::new().with_namespace("default");
        let prompter = ScriptedPrompter::new(vec![Answer::Input("default"), Answer::Confirm(false)]);

        let result = select_namespace(&cluster, &prompter, None).await;

        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(
            prompter.asked()[1],
            "The namespace 'default' does not seem to have Entando installed. Do you want to try again?"
        );
    }

    #[tokio::test]
    async fn release_flag_accepts_missing_prefix() {
        let cluster = FakeCluster::new();
        let releases = StaticReleaseSource::new(&["v7.2.0", "v7.1.6"]).with_manifest(
            "v7.2.0",
            ClusterFlavor::StandardK8s,
            IMAGES,
        );
        let prompter = ScriptedPrompter::new(vec![]);

        let selection = select_release(
            &cluster,
            &releases,
            &prompter,
            ClusterFlavor::StandardK8s,
            "entando",
            &poll(),
            Some("7.2.0"),
        )
        .await
        .unwrap();

        assert_eq!(
            selection,
            ReleaseSelection {
                release: "v7.2.0".to_string(),
                catalog: None,
            }
        );
    }

    #[tokio::test]
    async fn releases_without_manifest_are_picked_again() {
        let cluster = FakeCluster::new();
        let releases = StaticReleaseSource::new(&["v7.2.0", "v7.1.6"]).with_manifest(
            "v7.2.0",
            ClusterFlavor::StandardK8s,
            IMAGES,
        );
        let prompter = ScriptedPrompter::new(vec![Answer::Select(1), Answer::Select(0)]);

        let selection = select_release(
            &cluster,
            &releases,
            &prompter,
            ClusterFlavor::StandardK8s,
            "entando",
            &poll(),
            Some("7.3.0"),
        )
        .await
        .unwrap();

        assert_eq!(selection.release, "v7.2.0");
        assert!(prompter.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_catalog_can_be_added() {
        let cluster = FakeCluster::new().script_read(
            CATALOG_SOURCE_KIND,
            "entando-catalog-v7-2-0",
            vec![None, None, Some(catalog(Some("READY")))],
        );
        let releases = StaticReleaseSource::new(&["v7.2.0"])
            .with_manifest("v7.2.0", ClusterFlavor::OperatorManagedPlatform, IMAGES)
            .with_catalog("v7.2.0", catalog(None));
        let prompter = ScriptedPrompter::new(vec![Answer::Select(0)]);

        let selection = select_release(
            &cluster,
            &releases,
            &prompter,
            ClusterFlavor::OperatorManagedPlatform,
            "entando",
            &poll(),
            Some("v7.2.0"),
        )
        .await
        .unwrap();

        assert_eq!(selection.catalog.as_deref(), Some("entando-catalog-v7-2-0"));
        assert_eq!(cluster.count_calls("create CatalogSource/"), 1);
    }

    #[tokio::test]
    async fn missing_catalog_can_close_the_program() {
        let cluster = FakeCluster::new();
        let releases = StaticReleaseSource::new(&["v7.2.0"])
            .with_manifest("v7.2.0", ClusterFlavor::OperatorManagedPlatform, IMAGES)
            .with_catalog("v7.2.0", catalog(None));
        let prompter = ScriptedPrompter::new(vec![Answer::Select(2)]);

        let result = select_release(
            &cluster,
            &releases,
            &prompter,
            ClusterFlavor::OperatorManagedPlatform,
            "entando",
            &poll(),
            Some("v7.2.0"),
        )
        .await;

        assert!(matches!(result, Err(Error::Aborted)));
        assert_eq!(cluster.count_calls("create "), 0);
    }

    #[tokio::test]
    async fn output_root_comes_from_flag_or_prompts() {
        let prompter = ScriptedPrompter::new(vec![]);
        assert_eq!(
            select_output_root(&prompter, Some(Path::new("/srv/upgrades//")))
                .await
                .unwrap(),
            PathBuf::from("/srv/upgrades")
        );

        let prompter = ScriptedPrompter::new(vec![
            Answer::Confirm(false),
            Answer::Confirm(true),
            Answer::Input("/tmp/entando/"),
        ]);
        assert_eq!(
            select_output_root(&prompter, None).await.unwrap(),
            PathBuf::from("/tmp/entando")
        );

        let prompter = ScriptedPrompter::new(vec![Answer::Confirm(false), Answer::Confirm(false)]);
        assert!(matches!(
            select_output_root(&prompter, None).await,
            Err(Error::Aborted)
        ));
    }

    #[test]
    fn root_is_never_trimmed_away() {
        assert_eq!(trim_trailing_separators("/"), PathBuf::from("/"));
        assert_eq!(trim_trailing_separators("out///"), PathBuf::from("out"));
    }
}
