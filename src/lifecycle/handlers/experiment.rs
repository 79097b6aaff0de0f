//! Experiment handlers (prepare, start, finish)

use tracing::{info, warn};

use super::{ActionResult, HandlerContext};
use crate::artifact::ArtifactKind;
use crate::command::CommandChannel;

/// Download the experiment overlay and hand it to the overlay hook
pub async fn handle_prepare(
    ctx: &HandlerContext<'_>,
    experiment_id: &str,
    overlay: &str,
    hash: &str,
) -> ActionResult {
    let image = match ctx.fetcher.fetch(ArtifactKind::Overlay, overlay, hash).await {
        Ok(path) => path,
        Err(e) => {
            return ActionResult::Failed {
                message: format!("Overlay {} download failed: {}", overlay, e),
            };
        }
    };

    let env = [
        ("WIBED_EXPERIMENT_ID", experiment_id.to_string()),
        ("WIBED_OVERLAY", overlay.to_string()),
    ];
    match ctx.overlay_hook.run(&image, &env).await {
        Ok(_) => ActionResult::Completed {
            message: format!("Experiment {} prepared with overlay {}", experiment_id, overlay),
        },
        Err(e) => ActionResult::Failed {
            message: format!("Overlay {} install failed: {}", overlay, e),
        },
    }
}

/// Start the prepared experiment.
///
/// Nothing is launched here; commands arrive through later dispatches.
pub async fn handle_start(experiment_id: Option<&str>) -> ActionResult {
    ActionResult::Completed {
        message: format!("Experiment {} running", experiment_id.unwrap_or("?")),
    }
}

/// Tear down an experiment.
///
/// Cleanup is best effort: every step runs even if an earlier one fails,
/// and the node always ends up IDLE.
pub async fn handle_finish(ctx: &HandlerContext<'_>, channel: &mut CommandChannel) -> ActionResult {
    let mut problems = Vec::new();

    match channel.terminate_executor().await {
        Ok(true) => info!("Executor asked to exit"),
        Ok(false) => {}
        Err(e) => problems.push(format!("executor: {}", e)),
    }

    if let Err(e) = ctx.results.clear().await {
        problems.push(format!("results: {}", e));
    }

    if let Err(e) = ctx.fetcher.discard(ArtifactKind::Overlay).await {
        problems.push(format!("overlay: {}", e));
    }

    if problems.is_empty() {
        ActionResult::Completed {
            message: "Experiment finished".into(),
        }
    } else {
        for problem in &problems {
            warn!("Cleanup problem: {}", problem);
        }
        ActionResult::Failed {
            message: format!("Experiment finished with cleanup errors: {}", problems.join("; ")),
        }
    }
}
