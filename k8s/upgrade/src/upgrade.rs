use crate::{
    common::{
        constants::{
            CATALOG_SOURCE_KIND, MARKETPLACE_NAMESPACE, OPERATOR_MANAGED_DEPLOYMENTS, PRODUCT,
            SUBSCRIPTION_KIND,
        },
        error::{EmptySelection, ListDeployments, NoInstallation, Result},
        file,
        kube_client::ClusterFacade,
    },
    context::{ClusterContext, ClusterFlavor},
    prompt::Prompter,
    release::ReleaseSource,
};
use backup::ManagingOperatorHandle;
use chrono::Local;
use images::{ImageMapping, ReferencePrecedence};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use layout::RunLayout;
use operator::OperatorReplacement;
use poll::PollParams;
use snafu::{OptionExt, ResultExt};
use std::path::PathBuf;
use tracing::{error, info};
use validate::ReleaseSelection;

/// Create or update objects, waiting for marketplace catalogs to connect.
pub mod apply;
/// Capture and persist the pre-upgrade state.
pub mod backup;
/// Image reference rewriting.
pub mod images;
/// Directories and kustomization files of a run.
pub mod layout;
/// Operator replacement and environment carry-over on OpenShift.
pub mod operator;
/// Readiness waits.
pub mod poll;
/// Deployment scaling.
pub mod scale;
/// The operator dialogue which picks the upgrade target.
pub mod validate;

/// The answers given on the command line. Each one skips its prompt.
#[derive(Clone, Debug, Default)]
pub struct Selections {
    pub namespace: Option<String>,
    pub release: Option<String>,
    pub output_dir: Option<PathBuf>,
}

/// What the upgrade acts on, as confirmed by the operator.
#[derive(Clone, Debug)]
pub struct UpgradeTarget {
    cluster: ClusterContext,
    release: ReleaseSelection,
    layout: RunLayout,
}

impl UpgradeTarget {
    pub fn new(cluster: ClusterContext, release: ReleaseSelection, layout: RunLayout) -> Self {
        Self {
            cluster,
            release,
            layout,
        }
    }

    pub fn cluster(&self) -> &ClusterContext {
        &self.cluster
    }

    pub fn release(&self) -> &ReleaseSelection {
        &self.release
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }
}

/// The state captured before anything is changed. It is never modified afterwards.
#[derive(Clone, Debug)]
pub struct Snapshot {
    workloads: Vec<Deployment>,
    operator: Option<ManagingOperatorHandle>,
}

impl Snapshot {
    pub fn workloads(&self) -> &[Deployment] {
        self.workloads.as_slice()
    }

    /// The operator installation, on OpenShift.
    pub fn operator(&self) -> Option<&ManagingOperatorHandle> {
        self.operator.as_ref()
    }
}

/// How an upgrade run ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Completion {
    /// The tool applied the upgrade.
    Applied,
    /// The kustomizations were written; the operator applies them.
    Manual,
}

/// Drives an upgrade run, from the operator dialogue to the post-upgrade backups.
pub struct UpgradeRunner<'a> {
    facade: &'a dyn ClusterFacade,
    releases: &'a dyn ReleaseSource,
    prompter: &'a dyn Prompter,
    poll: PollParams,
    precedence: ReferencePrecedence,
}

impl<'a> UpgradeRunner<'a> {
    pub fn new(
        facade: &'a dyn ClusterFacade,
        releases: &'a dyn ReleaseSource,
        prompter: &'a dyn Prompter,
        poll: PollParams,
    ) -> Self {
        Self {
            facade,
            releases,
            prompter,
            poll,
            precedence: ReferencePrecedence::default(),
        }
    }

    /// Which of an image mapping entry's tag and digest is used when it has both.
    #[must_use]
    pub fn with_precedence(mut self, precedence: ReferencePrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Detect the cluster flavor, then ask for the namespace, release and output directory.
    pub async fn prepare(&self, context: &str, selections: &Selections) -> Result<UpgradeTarget> {
        let flavor = validate::detect_flavor(self.facade, context).await?;
        console_logger::info_with("Cluster type:", flavor.to_string().as_str());

        let namespace = validate::select_namespace(
            self.facade,
            self.prompter,
            selections.namespace.as_deref(),
        )
        .await?;
        let release = validate::select_release(
            self.facade,
            self.releases,
            self.prompter,
            flavor,
            namespace.as_str(),
            &self.poll,
            selections.release.as_deref(),
        )
        .await?;
        let root =
            validate::select_output_root(self.prompter, selections.output_dir.as_deref()).await?;

        let layout = RunLayout::new(root.as_path(), namespace.as_str(), &Local::now());
        let cluster = ClusterContext::new(context.to_string(), flavor, namespace);
        Ok(UpgradeTarget::new(cluster, release, layout))
    }

    /// Back up the workloads, write the kustomizations, then apply the upgrade or leave it to
    /// the operator. The rollback instructions are printed either way.
    pub async fn run(&self, target: &UpgradeTarget) -> Result<Completion> {
        let (cluster, layout) = (target.cluster(), target.layout());
        info!(
            context = %cluster.context(),
            namespace = %cluster.namespace(),
            release = %target.release().release,
            run_dir = %layout.run_dir().display(),
            "Starting upgrade"
        );

        layout.create(cluster.flavor())?;
        self.scale_down_all(cluster.namespace()).await?;
        let snapshot = self.backup(target).await?;
        self.write_kustomizations(target, &snapshot).await?;

        let completion = if self.choose_apply(cluster.flavor()).await? {
            self.apply_upgrade(target, &snapshot).await?;
            Completion::Applied
        } else {
            print_manual_instructions(target);
            Completion::Manual
        };

        print_rollback_instructions(target);
        print_reminder(cluster);
        info!(?completion, "Upgrade run finished");
        Ok(completion)
    }

    async fn scale_down_all(&self, namespace: &str) -> Result<()> {
        console_logger::header(format!("Scaling down the {PRODUCT} Deployments").as_str());
        let workloads = self.list_workloads(namespace).await?;
        scale::scale_to(self.facade, workloads.as_slice(), namespace, 0, &self.poll).await
    }

    async fn backup(&self, target: &UpgradeTarget) -> Result<Snapshot> {
        let (cluster, layout) = (target.cluster(), target.layout());
        console_logger::header("Backing up the Deployments");
        let workloads = backup::capture_workloads(self.facade, cluster.namespace()).await?;
        backup::persist(workloads.as_slice(), layout.base_dir())?;

        let operator = match cluster.flavor() {
            ClusterFlavor::OperatorManagedPlatform => {
                let handle =
                    backup::capture_operator_state(self.facade, cluster.namespace()).await?;
                backup::persist_operator_state(&handle, layout.operator_dir())?;
                Some(handle)
            }
            ClusterFlavor::StandardK8s => None,
        };
        console_logger::info_with(
            "Backups are in:",
            layout.base_dir().display().to_string().as_str(),
        );

        Ok(Snapshot {
            workloads,
            operator,
        })
    }

    async fn write_kustomizations(&self, target: &UpgradeTarget, snapshot: &Snapshot) -> Result<()> {
        let (cluster, layout) = (target.cluster(), target.layout());
        layout.write_base_kustomization(snapshot.workloads(), cluster.flavor())?;
        let images = self
            .releases
            .fetch_patch_manifest(target.release().release.as_str(), cluster.flavor())
            .await?;
        let overlay = layout.write_overlay_kustomization(cluster.namespace(), images.as_str())?;
        console_logger::info_with(
            "Kustomization written to:",
            overlay.display().to_string().as_str(),
        );
        Ok(())
    }

    async fn choose_apply(&self, flavor: ClusterFlavor) -> Result<bool> {
        if flavor.is_operator_managed() {
            console_logger::note(&[
                "Applying the upgrade replaces the operator installed through OLM,",
                "the Subscription and ClusterServiceVersion backups are in base/operator.",
            ]);
        }
        let message =
            "Would you like this tool to apply the upgrade, or do you prefer to continue manually?";
        let choices = vec![
            "Apply the upgrade".to_string(),
            "Continue manually".to_string(),
        ];
        let choice = self.prompter.select(message, choices.as_slice()).await?;
        choices
            .get(choice)
            .map(|_| choice == 0)
            .context(EmptySelection { message })
    }

    async fn apply_upgrade(&self, target: &UpgradeTarget, snapshot: &Snapshot) -> Result<()> {
        let (cluster, layout) = (target.cluster(), target.layout());
        let namespace = cluster.namespace();

        let installed = match cluster.flavor() {
            ClusterFlavor::OperatorManagedPlatform => {
                let handle = self.replace_operator(target, snapshot).await?;
                self.scale_down_fresh_workloads(namespace).await?;
                Some(handle)
            }
            ClusterFlavor::StandardK8s => None,
        };

        console_logger::header("Upgrading the Deployments");
        let mapping = ImageMapping::from_kustomization_file(layout.overlay_kustomization().as_path())?;
        let mut upgraded = Vec::new();
        for workload in snapshot.workloads() {
            let (rewritten, mapped) =
                images::rewrite(workload, &mapping, cluster.flavor(), self.precedence);
            if mapped {
                upgraded.push(apply::to_applicable(&rewritten)?);
            }
        }
        apply::apply(self.facade, upgraded.as_slice(), namespace, &self.poll).await?;
        info!(count = upgraded.len(), "Applied the upgraded Deployments");

        let mut scale_up = self.list_workloads(namespace).await?;
        let forwarded = match &installed {
            Some(handle) => self.forward_env(snapshot, handle, namespace).await?,
            None => false,
        };
        if forwarded {
            scale_up.retain(|workload| {
                !OPERATOR_MANAGED_DEPLOYMENTS.contains(&workload.name_any().as_str())
            });
        }
        console_logger::header(format!("Scaling up the {PRODUCT} Deployments").as_str());
        scale::scale_to(self.facade, scale_up.as_slice(), namespace, 1, &self.poll).await?;

        file::create_directories(&[layout.new_deployments_dir()])?;
        let upgraded = backup::capture_workloads(self.facade, namespace).await?;
        backup::persist(upgraded.as_slice(), layout.new_deployments_dir())?;
        console_logger::info_with(
            "The upgraded Deployments are in:",
            layout.new_deployments_dir().display().to_string().as_str(),
        );
        Ok(())
    }

    async fn replace_operator(
        &self,
        target: &UpgradeTarget,
        snapshot: &Snapshot,
    ) -> Result<ManagingOperatorHandle> {
        let namespace = target.cluster().namespace();
        let previous = snapshot.operator().context(NoInstallation {
            kind: SUBSCRIPTION_KIND,
            namespace,
        })?;
        let catalog = target
            .release()
            .catalog
            .as_deref()
            .context(NoInstallation {
                kind: CATALOG_SOURCE_KIND,
                namespace: MARKETPLACE_NAMESPACE,
            })?;

        console_logger::header("Replacing the operator");
        let mut replacement = OperatorReplacement::new(self.facade, namespace, &self.poll);
        match replacement
            .run(previous, target.release().release.as_str(), catalog)
            .await
        {
            Ok(handle) => {
                console_logger::info_with(
                    "Operator installed:",
                    handle.cluster_service_version().name_any().as_str(),
                );
                Ok(handle)
            }
            Err(error) => {
                error!(phase = %replacement.phase(), %error, "Operator replacement failed");
                Err(error)
            }
        }
    }

    /// The new operator starts the workloads it manages with one replica, ahead of the
    /// upgraded images. They're stopped until the images are applied.
    async fn scale_down_fresh_workloads(&self, namespace: &str) -> Result<()> {
        let fresh: Vec<Deployment> = self
            .list_workloads(namespace)
            .await?
            .into_iter()
            .filter(|workload| workload.spec.as_ref().and_then(|spec| spec.replicas) == Some(1))
            .collect();
        scale::scale_to(self.facade, fresh.as_slice(), namespace, 0, &self.poll).await
    }

    /// Returns true if the operator environment was carried over.
    async fn forward_env(
        &self,
        snapshot: &Snapshot,
        installed: &ManagingOperatorHandle,
        namespace: &str,
    ) -> Result<bool> {
        let forward = self
            .prompter
            .confirm("Do you want to carry over the environment variables of the previous operator?")
            .await?;
        if forward {
            operator::forward_operator_env(
                self.facade,
                snapshot.workloads(),
                installed.cluster_service_version(),
                namespace,
            )
            .await?;
        }
        Ok(forward)
    }

    async fn list_workloads(&self, namespace: &str) -> Result<Vec<Deployment>> {
        self.facade
            .list_deployments(namespace)
            .await
            .context(ListDeployments { namespace })
    }
}

fn print_manual_instructions(target: &UpgradeTarget) {
    let (cluster, layout) = (target.cluster(), target.layout());
    let cmd = cluster.flavor().kube_command();
    console_logger::header("Manual upgrade");
    console_logger::info("To apply the upgrade, run from the overlay directory:");
    console_logger::command(format!("cd {}", layout.overlay_dir().display()).as_str());
    console_logger::command(format!("{cmd} kustomize | {cmd} apply -f -").as_str());
    if cluster.flavor().is_operator_managed() {
        console_logger::note(&[
            "Upgrade the operator from the OperatorHub before applying the kustomization,",
            "the operator Deployments are left out of it.",
        ]);
    }
    console_logger::info("Then scale the Deployments back up:");
    console_logger::command(
        format!(
            "{cmd} scale deploy --all -n {} --replicas=1",
            cluster.namespace()
        )
        .as_str(),
    );
}

fn print_rollback_instructions(target: &UpgradeTarget) {
    let (cluster, layout) = (target.cluster(), target.layout());
    let cmd = cluster.flavor().kube_command();
    console_logger::header("Rollback");
    console_logger::info_with(
        "The previous Deployments are backed up in:",
        layout.base_dir().display().to_string().as_str(),
    );
    console_logger::info("To restore them, run:");
    console_logger::command(format!("{cmd} apply -k {}", layout.base_dir().display()).as_str());
    console_logger::command(
        format!(
            "{cmd} scale deploy --all -n {} --replicas=1",
            cluster.namespace()
        )
        .as_str(),
    );
    if cluster.flavor().is_operator_managed() {
        console_logger::note(&[
            "The previous Subscription and ClusterServiceVersion are backed up in:",
            layout.operator_dir().display().to_string().as_str(),
        ]);
    }
}

fn print_reminder(cluster: &ClusterContext) {
    let cmd = cluster.flavor().kube_command();
    console_logger::separator();
    console_logger::warn(
        "REMINDER:",
        "this tool did not change your kubeconfig, to work on the upgraded cluster run",
    );
    console_logger::command(format!("{cmd} config use-context {}", cluster.context()).as_str());
    console_logger::command(
        format!(
            "{cmd} config set-context --current --namespace={}",
            cluster.namespace()
        )
        .as_str(),
    );
    farewell();
}

/// The closing message, also printed when the operator aborts.
pub fn farewell() {
    console_logger::info(format!("Thank you for using the {PRODUCT} upgrade tool. Goodbye!").as_str());
}
