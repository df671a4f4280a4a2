use crate::{
    common::{
        constants::{KUSTOMIZATION_FILE, KUSTOMIZATION_HEADER, OPERATOR_MANAGED_DEPLOYMENTS},
        error::Result,
        file,
    },
    context::ClusterFlavor,
};
use chrono::{Datelike, Timelike};
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use std::path::{Path, PathBuf};

/// The directories of one upgrade run:
///
/// ```text
/// <root>/entando-upgrade-<namespace>-<timestamp>/
///     base/                    backups of the workloads before the upgrade
///     base/operator/           backups of the OLM objects (OpenShift only)
///     overlay/                 kustomization of the upgrade
///     overlay/new-deployments/ backups of the workloads after the upgrade
/// ```
#[derive(Clone, Debug)]
pub struct RunLayout {
    run: PathBuf,
    base: PathBuf,
    operator: PathBuf,
    overlay: PathBuf,
    new_deployments: PathBuf,
}

impl RunLayout {
    pub fn new<T>(root: &Path, namespace: &str, started_at: &T) -> Self
    where
        T: Datelike + Timelike,
    {
        let run = root.join(format!(
            "entando-upgrade-{namespace}-{}",
            timestamp(started_at)
        ));
        let base = run.join("base");
        let overlay = run.join("overlay");
        Self {
            operator: base.join("operator"),
            new_deployments: overlay.join("new-deployments"),
            run,
            base,
            overlay,
        }
    }

    /// Create the run, base and overlay directories, and the operator backup directory on
    /// OpenShift.
    pub fn create(&self, flavor: ClusterFlavor) -> Result<()> {
        file::create_directories(&[&self.run, &self.base, &self.overlay])?;
        if flavor.is_operator_managed() {
            file::create_directories(&[&self.operator])?;
        }
        Ok(())
    }

    pub fn run_dir(&self) -> &Path {
        self.run.as_path()
    }

    pub fn base_dir(&self) -> &Path {
        self.base.as_path()
    }

    pub fn operator_dir(&self) -> &Path {
        self.operator.as_path()
    }

    pub fn overlay_dir(&self) -> &Path {
        self.overlay.as_path()
    }

    pub fn new_deployments_dir(&self) -> &Path {
        self.new_deployments.as_path()
    }

    /// The kustomization file of the overlay.
    pub fn overlay_kustomization(&self) -> PathBuf {
        self.overlay.join(KUSTOMIZATION_FILE)
    }

    /// Write the base kustomization, listing the backup file of each workload.
    pub fn write_base_kustomization(
        &self,
        workloads: &[Deployment],
        flavor: ClusterFlavor,
    ) -> Result<PathBuf> {
        let filepath = self.base.join(KUSTOMIZATION_FILE);
        file::write_file(&filepath, base_kustomization(workloads, flavor).as_str())?;
        Ok(filepath)
    }

    /// Write the overlay kustomization, on top of the base and with the release's images.
    pub fn write_overlay_kustomization(&self, namespace: &str, images: &str) -> Result<PathBuf> {
        let filepath = self.overlay_kustomization();
        file::write_file(&filepath, overlay_kustomization(namespace, images).as_str())?;
        Ok(filepath)
    }
}

/// Year-month-day_hour_minute_second, without zero padding.
pub fn timestamp<T>(time: &T) -> String
where
    T: Datelike + Timelike,
{
    format!(
        "{}-{}-{}_{}_{}_{}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// The base kustomization lists the backup of every workload. On OpenShift the operator
/// Deployments are left out, OLM owns them.
pub fn base_kustomization(workloads: &[Deployment], flavor: ClusterFlavor) -> String {
    let mut kustomization = KUSTOMIZATION_HEADER.to_string();
    for name in workloads.iter().map(ResourceExt::name_any) {
        if flavor.is_operator_managed() && OPERATOR_MANAGED_DEPLOYMENTS.contains(&name.as_str()) {
            continue;
        }
        kustomization.push_str(format!("  - {name}.yaml\n").as_str());
    }
    kustomization
}

/// The overlay kustomization: the base, moved to the namespace, followed by the `images`
/// published by the release, verbatim.
pub fn overlay_kustomization(namespace: &str, images: &str) -> String {
    format!("{KUSTOMIZATION_HEADER}  - ../base\n\nnamespace: {namespace}\n\nimages:\n\n{images}")
}
