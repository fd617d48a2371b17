use crate::error::SandboxError;
use crate::executor::ExecutionResult;
use serde::Serialize;

/// Render any serializable payload as pretty JSON.
pub fn render_json<T: Serialize>(value: &T) -> Result<String, SandboxError> {
    serde_json::to_string_pretty(value).map_err(|e| SandboxError::Server {
        message: format!("cannot serialize output: {e}"),
    })
}

/// The `data` payload of a successful execution, as the HTTP API returns it.
pub fn render_result(result: &ExecutionResult) -> Result<String, SandboxError> {
    render_json(result)
}

/// Print a rendered payload to stdout.
pub fn print_result(rendered: &str) {
    println!("{}", rendered);
}

/// Print error to stderr in the contract format: error: <category>: <message>
pub fn print_error(err: &SandboxError) {
    eprintln!("error: {}", err);
}
