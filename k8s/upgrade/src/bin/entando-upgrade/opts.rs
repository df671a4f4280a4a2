use clap::{Parser, ValueEnum};
use entando_upgrade::{
    common::constants::{
        DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, DEFAULT_RELEASE_ASSETS_URL,
        DEFAULT_RELEASE_TAGS_URL, PRODUCT,
    },
    upgrade::{poll::PollParams, Selections},
};
use std::path::PathBuf;

/// Validate input before any cluster call.
pub(crate) mod validators;

/// The output format of the diagnostic logs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum FmtStyle {
    Pretty,
    Compact,
    Json,
}

/// These are the supported cli configuration options for the upgrade.
#[derive(Parser)]
#[command(name = "entando-upgrade", version)]
#[command(about = format!("Upgrades an {PRODUCT} installation"), long_about = None)]
pub(crate) struct CliArgs {
    /// The release to upgrade to, e.g. v7.2.0. The 'v' prefix may be left out.
    #[arg(short = 'v', long)]
    entando_version: Option<String>,

    /// The Kubernetes Namespace of the EntandoApp.
    #[arg(short, long)]
    namespace: Option<String>,

    /// The directory in which the run directory, with backups and kustomizations, is created.
    #[arg(long, value_name = "DIR_PATH")]
    output_dir: Option<PathBuf>,

    /// How often readiness is rechecked while waiting for the cluster.
    #[arg(long, default_value = DEFAULT_POLL_INTERVAL)]
    poll_interval: humantime::Duration,

    /// How long a single readiness wait may take.
    #[arg(long, default_value = DEFAULT_POLL_TIMEOUT)]
    poll_timeout: humantime::Duration,

    /// The listing of the known release tags.
    #[arg(long, env = "ENTANDO_RELEASE_TAGS_URL", default_value = DEFAULT_RELEASE_TAGS_URL)]
    release_tags_url: String,

    /// The base URL of the per-release manifests.
    #[arg(long, env = "ENTANDO_RELEASE_ASSETS_URL", default_value = DEFAULT_RELEASE_ASSETS_URL)]
    release_assets_url: String,

    /// Formatting style to be used while logging.
    #[arg(value_enum, default_value = "pretty", short, long)]
    fmt_style: FmtStyle,

    /// Use ANSI colors for the logs.
    #[arg(long, default_value_t = true)]
    ansi_colors: bool,
}

impl CliArgs {
    /// This returns the Namespace flag, if set.
    pub(crate) fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The answers given on the command line.
    pub(crate) fn selections(&self) -> Selections {
        Selections {
            namespace: self.namespace.clone(),
            release: self.entando_version.clone(),
            output_dir: self.output_dir.clone(),
        }
    }

    /// The recheck interval and deadline of every readiness wait.
    pub(crate) fn poll_params(&self) -> PollParams {
        PollParams::new(self.poll_interval.into(), Some(self.poll_timeout.into()))
    }

    pub(crate) fn release_tags_url(&self) -> &str {
        self.release_tags_url.as_str()
    }

    pub(crate) fn release_assets_url(&self) -> &str {
        self.release_assets_url.as_str()
    }

    /// This returns formatting style to be used.
    pub(crate) fn fmt_style(&self) -> FmtStyle {
        self.fmt_style
    }

    /// This returns ansi_colours arg.
    pub(crate) fn ansi_colours(&self) -> bool {
        self.ansi_colors
    }
}
