//! Login and logout commands.

use crate::error::CliResult;
use ddp_client::ClientHandle;
use ddp_core::Value;
use tracing::info;

/// Logs in with `method` and prints the login result.
pub async fn login(client: &ClientHandle, method: &str, params: Vec<Value>) -> CliResult<()> {
    let result = client.login_with_method(method, params).await?;
    info!(method, "logged in");
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Logs out.
pub async fn logout(client: &ClientHandle) -> CliResult<()> {
    client.logout().await?;
    info!("logged out");
    Ok(())
}
