//! Firmware upgrade handler

use super::{ActionResult, HandlerContext};
use crate::artifact::ArtifactKind;
use wibed_shared::UpgradeOrder;

/// Download the firmware image and hand it to the firmware hook.
///
/// The scheduled upgrade time travels to the hook as `WIBED_UPGRADE_UTIME`.
pub async fn handle_upgrade(ctx: &HandlerContext<'_>, order: &UpgradeOrder) -> ActionResult {
    let image = match ctx
        .fetcher
        .fetch(ArtifactKind::Firmware, &order.version, &order.hash)
        .await
    {
        Ok(path) => path,
        Err(e) => {
            return ActionResult::Failed {
                message: format!("Firmware {} download failed: {}", order.version, e),
            };
        }
    };

    let mut env = vec![("WIBED_UPGRADE_VERSION", order.version.clone())];
    if let Some(utime) = order.utime {
        env.push(("WIBED_UPGRADE_UTIME", utime.to_string()));
    }

    match ctx.firmware_hook.run(&image, &env).await {
        Ok(_) => ActionResult::Completed {
            message: format!("Firmware {} staged at {}", order.version, image.display()),
        },
        Err(e) => ActionResult::Failed {
            message: format!("Firmware {} install failed: {}", order.version, e),
        },
    }
}
