use std::future::Future;

use tracing::{debug, error, warn};

use crate::client::HvacApi;
use crate::protocol::{ApiCommand, CommandParams};
use crate::types::CommandResult;
use crate::Result;

/// Sends `command` and applies the standard outcome handling:
///
/// * `Success`: `on_success` applies the optimistic local update.
/// * `Failure`: `resync` reloads the entity from the cloud, exactly once.
/// * `ApiError`: nothing changes; a resync would fail the same way.
pub(crate) async fn execute_command<A, R>(
    api: &A,
    target: &str,
    command: ApiCommand,
    params: CommandParams,
    on_success: impl FnOnce(),
    resync: impl FnOnce() -> R,
) -> Result<CommandResult>
where
    A: HvacApi,
    R: Future<Output = Result<()>>,
{
    let result = api.run_command(command, params).await?;
    match result {
        CommandResult::Success => {
            on_success();
            debug!(target, command = command.name(), "command applied");
        }
        CommandResult::Failure => {
            resync().await?;
            error!(
                target,
                command = command.name(),
                "command failed, state refreshed from the cloud"
            );
        }
        CommandResult::ApiError => {
            warn!(
                target,
                command = command.name(),
                "failed to send command, cloud unreachable"
            );
        }
    }
    Ok(result)
}
