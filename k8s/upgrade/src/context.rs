use std::fmt;

/// The orchestration platform variant. It decides which objects exist in the cluster, how
/// container images are addressed and which patch manifest a release publishes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClusterFlavor {
    /// Vanilla Kubernetes. Images are addressed by tag.
    StandardK8s,
    /// OpenShift. The Entando operator is installed through OLM, and images are addressed by
    /// digest.
    OperatorManagedPlatform,
}

impl ClusterFlavor {
    /// The suffix of the release's patch manifest file for this flavor.
    pub fn manifest_suffix(&self) -> &'static str {
        match self {
            Self::StandardK8s => "K8S",
            Self::OperatorManagedPlatform => "OCP",
        }
    }

    /// The command line tool the operator uses against this flavor of cluster.
    pub fn kube_command(&self) -> &'static str {
        match self {
            Self::StandardK8s => "kubectl",
            Self::OperatorManagedPlatform => "oc",
        }
    }

    /// Returns true if the Entando operator is managed by OLM.
    pub fn is_operator_managed(&self) -> bool {
        matches!(self, Self::OperatorManagedPlatform)
    }
}

impl fmt::Display for ClusterFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StandardK8s => write!(f, "Kubernetes"),
            Self::OperatorManagedPlatform => write!(f, "OpenShift"),
        }
    }
}

/// The kubeconfig context, cluster flavor and namespace confirmed by the operator.
#[derive(Clone, Debug)]
pub struct ClusterContext {
    context: String,
    flavor: ClusterFlavor,
    namespace: String,
}

impl ClusterContext {
    pub fn new(context: String, flavor: ClusterFlavor, namespace: String) -> Self {
        Self {
            context,
            flavor,
            namespace,
        }
    }

    /// The kubeconfig context name.
    pub fn context(&self) -> &str {
        self.context.as_str()
    }

    pub fn flavor(&self) -> ClusterFlavor {
        self.flavor
    }

    /// The namespace of the EntandoApp.
    pub fn namespace(&self) -> &str {
        self.namespace.as_str()
    }
}
