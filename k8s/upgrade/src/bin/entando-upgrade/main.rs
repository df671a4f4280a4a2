use crate::opts::{validators::validate_namespace, CliArgs, FmtStyle};
use clap::Parser;
use entando_upgrade::{
    common::{
        constants::PRODUCT,
        error::{Error, Interrupted, Result},
        kube_client::KubeContexts,
    },
    prompt::StdinPrompter,
    release::HttpReleaseSource,
    upgrade::{farewell, validate::select_context, UpgradeRunner},
};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod opts;

#[tokio::main]
async fn main() -> ExitCode {
    let opts = CliArgs::parse();
    init_logging(&opts);

    let result = tokio::select! {
        result = upgrade(&opts) => result,
        Ok(()) = tokio::signal::ctrl_c() => Interrupted.fail(),
    };

    if report(result) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Tell the user how the run ended, once. Returns false if it failed; an abort by the user
/// is not a failure.
fn report(result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(Error::Aborted) => {
            farewell();
            true
        }
        Err(error) => {
            error!(%error, "Failed to upgrade {PRODUCT}");
            console_logger::error("The upgrade failed:", error.to_string().as_str());
            false
        }
    }
}

/// Initialize logging components -- tracing. RUST_LOG overrides the default 'info' level.
fn init_logging(opts: &CliArgs) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(opts.ansi_colours())
        .with_writer(std::io::stderr);

    match opts.fmt_style() {
        FmtStyle::Pretty => builder.pretty().init(),
        FmtStyle::Compact => builder.compact().init(),
        FmtStyle::Json => builder.json().init(),
    }
}

/// Pick the kubeconfig context, then hand over to the upgrade runner.
async fn upgrade(opts: &CliArgs) -> Result<()> {
    validate_namespace(opts.namespace())?;

    console_logger::header(format!("{PRODUCT} upgrade").as_str());
    console_logger::note(&[
        "This tool scales down the Deployments of the namespace, backs them up, and writes",
        "the kustomizations of the upgrade. It then applies them, or leaves that to you.",
    ]);

    let contexts = KubeContexts::read()?;
    let prompter = StdinPrompter::new();
    let context = select_context(&contexts, &prompter).await?;
    let client_set = contexts.client_set(context.as_str()).await?;
    info!(%context, cluster = %client_set.cluster_url(), "Using kubeconfig context");

    let releases = HttpReleaseSource::new(opts.release_tags_url(), opts.release_assets_url())?;
    let runner = UpgradeRunner::new(&client_set, &releases, &prompter, opts.poll_params());
    let target = runner.prepare(context.as_str(), &opts.selections()).await?;
    runner.run(&target).await?;
    Ok(())
}
