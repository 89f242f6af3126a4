//! HTTP server for the query pipeline
//! Plain tokio listener with minimal HTTP/1.1 handling

use schema_rag_sql::catalog::SchemaSource;
use schema_rag_sql::config::AppConfig;
use schema_rag_sql::context::ServingContext;
use schema_rag_sql::execution::MssqlExecutor;
use schema_rag_sql::llm::OllamaClient;
use schema_rag_sql::orchestrator::QueryOrchestrator;
use schema_rag_sql::SqlRagError;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const MAX_REQUEST_BYTES: usize = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let database_url = config
        .database_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL must be set"))?;

    let context = Arc::new(ServingContext::from_config(&config)?);
    let orchestrator = Arc::new(QueryOrchestrator::new(
        context,
        Arc::new(OllamaClient::new(config.ollama_url.clone())),
        Arc::new(MssqlExecutor::connect(&database_url).await?),
    ));

    let listener = TcpListener::bind(&config.server_addr).await?;
    info!(addr = %config.server_addr, "Server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        debug!(%addr, "New connection");
        tokio::spawn(handle_connection(stream, orchestrator.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, orchestrator: Arc<QueryOrchestrator>) {
    let request = match read_request(&mut stream).await {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to read from stream");
            return;
        }
    };
    let response = handle_request(&request, &orchestrator).await;
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(error = %e, "Failed to write response");
    }
}

/// Reads until the headers and the announced body have arrived.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        let text = String::from_utf8_lossy(&buffer);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let body_len = content_length(&text[..header_end]);
            if buffer.len() >= header_end + 4 + body_len {
                break;
            }
        }
        if buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn content_length(headers: &str) -> usize {
    headers
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

struct ParsedRequest<'a> {
    method: &'a str,
    path: String,
    body: &'a str,
}

fn parse_request(request: &str) -> Option<ParsedRequest<'_>> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;

    // Query string and trailing slash are ignored.
    let path = target.split('?').next().unwrap_or(target);
    let path = match path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    };
    let body = request
        .find("\r\n\r\n")
        .map(|idx| request[idx + 4..].trim())
        .unwrap_or("");
    Some(ParsedRequest { method, path, body })
}

async fn handle_request(request: &str, orchestrator: &QueryOrchestrator) -> String {
    let Some(parsed) = parse_request(request) else {
        return create_response(400, "Bad Request", r#"{"error":"Malformed request"}"#);
    };
    debug!(method = parsed.method, path = %parsed.path, "Request");

    match (parsed.method, parsed.path.as_str()) {
        ("GET", "/health") => create_response(200, "OK", r#"{"status":"ok"}"#),
        ("GET", path) if path.starts_with("/schema/") => {
            let table = &path["/schema/".len()..];
            match orchestrator.context().catalog.describe(table) {
                Ok(descriptor) => json_response(200, "OK", &descriptor),
                Err(e) => error_response(&e),
            }
        }
        ("POST", "/query") => {
            let query = serde_json::from_str::<serde_json::Value>(parsed.body)
                .ok()
                .and_then(|json| json.get("query").and_then(|v| v.as_str()).map(str::to_string))
                .unwrap_or_default();
            if query.trim().is_empty() {
                return create_response(400, "Bad Request", r#"{"error":"Query is required"}"#);
            }
            match orchestrator.answer(&query).await {
                Ok(response) => json_response(200, "OK", &response),
                Err(e) => error_response(&e),
            }
        }
        ("OPTIONS", _) => create_response(200, "OK", "{}"),
        _ => create_response(404, "Not Found", r#"{"error":"Not found"}"#),
    }
}

fn json_response<T: serde::Serialize>(status: u16, status_text: &str, value: &T) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(status, status_text, &body),
        Err(e) => error_response(&SqlRagError::Json(e)),
    }
}

/// Only client-facing errors keep their message; the rest are logged and
/// reported generically.
fn error_response(err: &SqlRagError) -> String {
    if err.is_client_facing() {
        let body = serde_json::json!({ "error": err.to_string() }).to_string();
        return create_response(404, "Not Found", &body);
    }
    error!(error = %err, "Request failed");
    create_response(500, "Internal Server Error", r#"{"error":"Internal server error"}"#)
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let raw = "POST /query/?debug=1 HTTP/1.1\r\nContent-Length: 16\r\n\r\n{\"query\":\"open\"}";
        let parsed = parse_request(raw).unwrap();
        assert_eq!(parsed.method, "POST");
        assert_eq!(parsed.path, "/query");
        assert_eq!(parsed.body, "{\"query\":\"open\"}");

        assert_eq!(parse_request("GET / HTTP/1.1\r\n\r\n").unwrap().path, "/");
        assert!(parse_request("").is_none());
    }

    #[test]
    fn test_content_length_header() {
        assert_eq!(content_length("POST /q HTTP/1.1\r\ncontent-length: 42"), 42);
        assert_eq!(content_length("GET / HTTP/1.1"), 0);
    }

    #[test]
    fn test_error_mapping() {
        let not_found = error_response(&SqlRagError::SchemaNotFound("Nope_TBL".to_string()));
        assert!(not_found.starts_with("HTTP/1.1 404 Not Found"));
        assert!(not_found.contains("Nope_TBL"));

        let internal = error_response(&SqlRagError::Execution("password=hunter2".to_string()));
        assert!(internal.starts_with("HTTP/1.1 500 Internal Server Error"));
        assert!(!internal.contains("hunter2"));
        assert!(internal.ends_with(r#"{"error":"Internal server error"}"#));
    }
}
