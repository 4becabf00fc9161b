use anyhow::Context;
use clap::Parser;
use img_relay::cli::{Args, Commands};
use img_relay::{logger, Pipeline, WalkOptions};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init(args.quiet, args.verbose);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight work");
            on_interrupt.cancel();
        }
    });

    let summary = match args.command {
        Commands::Dir {
            root,
            recursive,
            images_only,
            upload,
        } => {
            let config = upload.into_config().context("invalid configuration")?;
            let pipeline = Pipeline::http(config, cancel)?.with_progress(logger::show_progress());
            let options = WalkOptions {
                recursive,
                images_only,
                exclude: Vec::new(),
            };
            pipeline
                .run_directory(&root, options)
                .await
                .with_context(|| format!("upload of {} failed", root.display()))?
        }
        Commands::Urls { list, upload } => {
            let config = upload.into_config().context("invalid configuration")?;
            let pipeline = Pipeline::http(config, cancel)?.with_progress(logger::show_progress());
            pipeline
                .run_url_list(&list)
                .await
                .with_context(|| format!("upload from {} failed", list.display()))?
        }
    };

    if summary.terminal_failures > 0 {
        error!(
            failed = summary.terminal_failures,
            "some uploads failed; see error.txt in the output directory"
        );
    }
    if summary.cancelled {
        std::process::exit(130);
    }
    Ok(())
}
