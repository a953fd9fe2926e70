//! Execution stdio RPC: JSON-RPC 2.0 over stdio.
//!
//! **Entry**: `scrapelite serve --stdio`
//!
//! Protocol:
//!
//! Request: `{"jsonrpc":"2.0","id":1,"method":"execute"|"plan","params":{...}}`
//! Response: `{"jsonrpc":"2.0","id":1,"result":{...}}` or `{"jsonrpc":"2.0","id":1,"error":{...}}`
//!
//! `execute` params are an `ExecutionRequest`; the result is always a result
//! envelope, including for failed scripts. JSON-RPC errors are reserved for
//! requests that never reach the coordinator.

use anyhow::Result;
use serde_json::{json, Value};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use thiserror::Error;

use crate::commands::execute;
use scrapelite_core::protocol::ExecutionRequest;
use scrapelite_executor::{ExecutionCoordinator, ExecutorSettings};

/// Maximum JSON-RPC request size (10 MB) to prevent OOM DoS.
const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, Error)]
enum RpcError {
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Method not found: {0}")]
    MethodNotFound(String),
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Request size error: {0}")]
    Size(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RpcError {
    fn code(&self) -> i64 {
        match self {
            Self::Parse(_) => -32700,
            Self::Size(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) => -32602,
            Self::Internal(_) => -32603,
        }
    }
}

fn response(id: Value, result: Result<Value, RpcError>) -> Value {
    match result {
        Ok(res) => json!({"jsonrpc": "2.0", "id": id, "result": res}),
        Err(e) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": e.code(), "message": e.to_string()}
        }),
    }
}

/// Run the stdio RPC daemon on the process's stdin/stdout.
pub fn serve_stdio() -> Result<()> {
    let coordinator = Arc::new(ExecutionCoordinator::with_node_toolchain(
        ExecutorSettings::from_env(),
    ));
    tracing::info!("stdio server ready");
    let stdin = io::stdin();
    serve(BufReader::new(stdin.lock()), io::stdout(), coordinator)
}

/// Read JSON-RPC requests from `reader` (one per line), write responses to `writer`.
/// Requests are handled concurrently on the rayon pool; responses are written
/// in completion order.
fn serve<R, W>(mut reader: R, writer: W, coordinator: Arc<ExecutionCoordinator>) -> Result<()>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<(Value, Result<Value, RpcError>)>();

    // Writer thread: receives results and writes them out (stdout is not Sync)
    let writer_handle = thread::spawn(move || -> Result<()> {
        let mut writer = writer;
        for (id, result) in rx {
            writeln!(writer, "{}", response(id, result))?;
            writer.flush()?;
        }
        Ok(())
    });

    let (done_tx, done_rx) = mpsc::channel::<()>();
    let mut pending = 0usize;

    loop {
        let line = match read_line_limited(&mut reader) {
            Ok(None) => break, // EOF
            Ok(Some(l)) => l,
            Err(e) => {
                let _ = tx.send((Value::Null, Err(RpcError::Size(e.to_string()))));
                continue;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                let _ = tx.send((Value::Null, Err(RpcError::Parse(e.to_string()))));
                continue;
            }
        };

        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        let params = request
            .get("params")
            .cloned()
            .unwrap_or(Value::Object(serde_json::Map::new()));

        pending += 1;
        let tx = tx.clone();
        let done_tx = done_tx.clone();
        let coordinator = Arc::clone(&coordinator);
        rayon::spawn(move || {
            let result = dispatch_request(&coordinator, &method, params);
            let _ = tx.send((id, result));
            let _ = done_tx.send(());
        });
    }

    for _ in 0..pending {
        let _ = done_rx.recv();
    }
    drop(tx);
    writer_handle
        .join()
        .map_err(|_| anyhow::anyhow!("Writer thread panicked"))??;

    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// Size-Limited Stdin Reader
// ═══════════════════════════════════════════════════════════════════════════════

/// Read a single line from `reader`, enforcing [`MAX_REQUEST_SIZE`].
/// Returns `Ok(None)` on EOF, `Ok(Some(line))` on success.
fn read_line_limited(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    read_line_bounded(reader, MAX_REQUEST_SIZE)
}

fn read_line_bounded(reader: &mut impl BufRead, limit: usize) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        let available = match reader.fill_buf() {
            Ok(b) => b,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return if buf.is_empty() { Ok(None) } else { finish_line(buf) };
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if buf.len() + pos > limit {
                    reader.consume(pos + 1);
                    return Err(too_large());
                }
                buf.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                return finish_line(buf);
            }
            None => {
                let len = available.len();
                if buf.len() + len > limit {
                    reader.consume(len);
                    skip_until_newline(reader);
                    return Err(too_large());
                }
                buf.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

fn finish_line(mut buf: Vec<u8>) -> io::Result<Option<String>> {
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid UTF-8"))
}

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, "Request exceeds 10MB size limit")
}

fn skip_until_newline(reader: &mut impl BufRead) {
    loop {
        match reader.fill_buf() {
            Ok(b) if b.is_empty() => break,
            Ok(b) => {
                if let Some(pos) = b.iter().position(|&c| c == b'\n') {
                    reader.consume(pos + 1);
                    break;
                }
                let len = b.len();
                reader.consume(len);
            }
            Err(_) => break,
        }
    }
}

/// Dispatch JSON-RPC request to the appropriate handler.
fn dispatch_request(
    coordinator: &ExecutionCoordinator,
    method: &str,
    params: Value,
) -> Result<Value, RpcError> {
    match method {
        "execute" => handle_execute(coordinator, params),
        "plan" => handle_plan(coordinator, params),
        _ => Err(RpcError::MethodNotFound(method.to_string())),
    }
}

fn parse_request(params: Value) -> Result<ExecutionRequest, RpcError> {
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn handle_execute(coordinator: &ExecutionCoordinator, params: Value) -> Result<Value, RpcError> {
    let request = parse_request(params)?;
    let envelope = coordinator.execute(&request);
    serde_json::to_value(envelope).map_err(|e| RpcError::Internal(e.to_string()))
}

fn handle_plan(coordinator: &ExecutionCoordinator, params: Value) -> Result<Value, RpcError> {
    let request = parse_request(params)?;
    let plan = execute::plan_request(&request, &coordinator.settings().transform);
    serde_json::to_value(plan).map_err(|e| RpcError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrapelite_core::config::ProvisioningConfig;
    use scrapelite_sandbox::env::HostEnv;
    use scrapelite_sandbox::runner::ResourceLimits;
    use scrapelite_sandbox::toolchain::NodeToolchain;
    use scrapelite_sandbox::transform::TransformOptions;
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn coordinator(work: &std::path::Path) -> Arc<ExecutionCoordinator> {
        let settings = ExecutorSettings {
            provisioning: ProvisioningConfig {
                work_root: Some(work.to_path_buf()),
                npm_cache_dir: None,
                ..ProvisioningConfig::default()
            },
            limits: ResourceLimits::default(),
            transform: TransformOptions::default(),
            host_env: HostEnv::default(),
        };
        Arc::new(ExecutionCoordinator::new(
            settings,
            Arc::new(NodeToolchain::default()),
        ))
    }

    fn run_lines(input: &str) -> Vec<Value> {
        let dir = tempfile::tempdir().unwrap();
        let out = SharedBuf::default();
        serve(
            Cursor::new(input.as_bytes().to_vec()),
            out.clone(),
            coordinator(dir.path()),
        )
        .unwrap();
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    fn by_id(responses: &[Value], id: i64) -> &Value {
        responses.iter().find(|r| r["id"] == id).unwrap()
    }

    #[test]
    fn test_errors_for_bad_lines_and_methods() {
        let responses = run_lines(
            "not json\n\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"nope\",\"params\":{}}\n{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"execute\",\"params\":{\"max_items\":\"many\"}}\n",
        );
        assert_eq!(responses.len(), 3);
        let parse = responses.iter().find(|r| r["id"].is_null()).unwrap();
        assert_eq!(parse["error"]["code"], -32700);
        assert_eq!(by_id(&responses, 2)["error"]["code"], -32601);
        assert_eq!(by_id(&responses, 3)["error"]["code"], -32602);
    }

    #[test]
    fn test_empty_script_gets_envelope_result() {
        let responses =
            run_lines("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"execute\",\"params\":{\"script_code\":\"\"}}\n");
        let result = &by_id(&responses, 1)["result"];
        assert_eq!(result["success"], false);
        assert_eq!(result["errors"][0], "No script code provided");
        assert_eq!(result["metadata"]["error"], "Missing script code");
        assert!(result["metadata"].get("phase").is_none());
    }

    #[test]
    fn test_plan_method() {
        let responses = run_lines(
            "{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"plan\",\"params\":{\"scriptCode\":\"launch({ headless: false })\",\"toolType\":\"playwright\"}}\n",
        );
        let result = &by_id(&responses, 7)["result"];
        assert_eq!(result["packageJson"]["dependencies"]["playwright"], "^1.48.2");
        assert_eq!(result["transformedScript"], "launch({ headless: true })");
        assert_eq!(result["requiresBrowser"], true);
    }

    #[test]
    fn test_read_line_bounded() {
        let mut ok = Cursor::new(b"abc\r\ndef".to_vec());
        assert_eq!(read_line_bounded(&mut ok, 16).unwrap().as_deref(), Some("abc"));
        assert_eq!(read_line_bounded(&mut ok, 16).unwrap().as_deref(), Some("def"));
        assert_eq!(read_line_bounded(&mut ok, 16).unwrap(), None);

        let mut big = Cursor::new(b"0123456789abcdef0123\nnext\n".to_vec());
        assert!(read_line_bounded(&mut big, 8).is_err());
        assert_eq!(read_line_bounded(&mut big, 8).unwrap().as_deref(), Some("next"));
    }
}
