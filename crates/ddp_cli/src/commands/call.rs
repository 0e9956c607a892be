//! Call command implementation.

use crate::error::CliResult;
use ddp_client::{CallOptions, ClientHandle};
use ddp_core::Value;

/// Calls `method` and prints its result.
pub async fn run(
    client: &ClientHandle,
    method: &str,
    params: Vec<Value>,
    barrier: bool,
) -> CliResult<()> {
    let mut options = CallOptions::new();
    if barrier {
        options = options.barrier();
    }
    let result = client.call(method, params, options).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
