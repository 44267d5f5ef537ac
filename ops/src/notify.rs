//! Console commands against whichever instance is currently the game server.

use crate::cloud::OpsContext;
use crate::error::{OpsError, ResolveError};
use crate::resolver::{primary_instance, resolve_private_addresses};
use console::{send_command_with, ConsoleOptions};
use log::{info, warn};
use shared::config::ConsoleConfig;
use shared::AddressClass;

/// Builds a chat broadcast. The message is JSON-quoted so it cannot break
/// out of the command.
pub fn tellraw_command(message: &str) -> String {
    format!("tellraw @a {}", serde_json::Value::from(message))
}

/// Resolves the game server and sends it `command` over a fresh connection.
pub async fn send_console_command(
    ctx: &OpsContext,
    config: &ConsoleConfig,
    command: &str,
) -> Result<String, OpsError> {
    let instances =
        resolve_private_addresses(&*ctx.fleet, &*ctx.compute, &config.scaling_group_name).await?;

    let address = primary_instance(&instances)
        .and_then(|instance| instance.address(AddressClass::Private))
        .ok_or_else(|| ResolveError::NoAddress {
            class: AddressClass::Private,
            scope: format!("scaling group {}", config.scaling_group_name),
        })?;

    let reply = send_command_with(
        address,
        config.port,
        &config.credential,
        command,
        ConsoleOptions::from(config),
    )
    .await?;

    Ok(reply)
}

/// Best effort: a failed notice is logged and never fails the caller.
pub async fn notify_players(ctx: &OpsContext, config: &ConsoleConfig, message: &str) -> bool {
    match send_console_command(ctx, config, &tellraw_command(message)).await {
        Ok(_) => {
            info!("Notified players: {}", message);
            true
        }
        Err(e) => {
            warn!("Could not notify players ({}): {}", message, e);
            false
        }
    }
}
