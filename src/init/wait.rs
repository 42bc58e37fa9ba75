// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use tokio::task::JoinSet;

/// Wait for the first task in `tasks` to finish and return its result. A task
/// that panicked or was aborted is reported as an error.
pub async fn wait_for_any_task(
    tasks: &mut JoinSet<Result<(), Box<dyn Error + Send + Sync>>>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let r = tasks.join_next().await;

    match r {
        None => Ok(()),
        Some(res) => res?,
    }
}
