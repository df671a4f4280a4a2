/// Shared tooling: constants, errors, kube clients and files.
pub mod common;
/// The kubeconfig context, cluster flavor and namespace of a run.
pub mod context;
/// Operator prompts.
pub mod prompt;
/// Release discovery and release assets.
pub mod release;
/// The upgrade workflow and its steps.
pub mod upgrade;
