use entando_upgrade::common::{
    error::{InvalidNamespaceName, Result},
    regex::is_namespace_name,
};
use snafu::ensure;
use tracing::debug;

/// Validate that the Namespace flag, once lower-cased, is a DNS-1123 label. No flag is valid.
pub(crate) fn validate_namespace(namespace: Option<&str>) -> Result<()> {
    let Some(namespace) = namespace else {
        return Ok(());
    };
    let namespace = namespace.to_lowercase();
    ensure!(
        is_namespace_name(namespace.as_str())?,
        InvalidNamespaceName { namespace }
    );
    debug!(%namespace, "Validated Namespace flag");
    Ok(())
}
