use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::{error, info};

use transcript_worker::{
    app::ComponentRegistry,
    config::Config,
    job::{MediaSource, Request, RequesterId},
    util::url::detect_platform,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let config = Config::from_env().context("failed to load configuration")?;
    let registry =
        ComponentRegistry::build(config).context("failed to build component registry")?;

    let mut args = std::env::args().skip(1);
    let target = args
        .next()
        .context("usage: transcript-worker <url|audio-file> [requester-id]")?;
    let requester = RequesterId(
        args.next()
            .map(|raw| raw.parse().context("requester-id must be an integer"))
            .transpose()?
            .unwrap_or(0),
    );

    let source = match detect_platform(&target) {
        Some(platform) => MediaSource::Url {
            url: target,
            platform,
        },
        None => MediaSource::File {
            local_path: PathBuf::from(&target),
            declared_mime: None,
        },
    };

    let dispatcher = registry.dispatcher();
    match dispatcher.submit(Request::new(requester, source)).await {
        Ok(output) => {
            let output_dir = registry.config().output_dir().clone();
            tokio::fs::create_dir_all(&output_dir)
                .await
                .with_context(|| format!("failed to create {}", output_dir.display()))?;

            let markdown_path = output_dir.join(format!("{}.md", output.file_stem));
            let pdf_path = output_dir.join(format!("{}.pdf", output.file_stem));
            tokio::fs::write(&markdown_path, &output.markdown)
                .await
                .with_context(|| format!("failed to write {}", markdown_path.display()))?;
            tokio::fs::write(&pdf_path, &output.pdf)
                .await
                .with_context(|| format!("failed to write {}", pdf_path.display()))?;

            info!(
                job_id = %output.job_id,
                markdown = %markdown_path.display(),
                pdf = %pdf_path.display(),
                "transcript ready"
            );
            Ok(())
        }
        Err(failure) => {
            error!(
                stage = failure.stage.map_or("dispatch", |stage| stage.label()),
                attempts = failure.attempts_made,
                cause = %failure.cause,
                "job failed"
            );
            bail!("{failure}")
        }
    }
}
