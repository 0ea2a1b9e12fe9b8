//! REST: one HTTP request.
//!
//! The response is forwarded to the sink as
//! `REST <METHOD> <URL> - Status: <code>\n<body>` and copied to the clipboard,
//! either whole or the value at the `toClipboard` dot path (whole body when
//! the path does not resolve). Clipboard problems are logged only.
//! `captures` resolve dot paths into named values returned with the result;
//! the registry stores them as group parameters.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    Command, CommandFactory, CommandKind, CommandMetadata, CommandResult, CommandSpec,
    ExecutionHandle, HttpMethod, RestSpec,
};
use crate::clipboard::ClipboardService;
use crate::error::{CommandError, Result};
use crate::sink::{StreamHandler, StreamKind};
use crate::template::{Parameters, TemplateEngine, TemplatingPolicy};
use crate::utils::elapsed_ms;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolve a dot path (`data.items.0.id`) in a JSON document. Numeric
/// segments index arrays. Strings are returned unquoted, anything else as JSON.
pub fn extract_json_path(body: &str, path: &str) -> std::result::Result<String, String> {
    let doc: Value = serde_json::from_str(body).map_err(|e| format!("response is not JSON: {e}"))?;
    let mut current = &doc;
    for part in path.split('.') {
        current = match current {
            Value::Object(map) => map
                .get(part)
                .ok_or_else(|| format!("JSON path not found: {path}"))?,
            Value::Array(items) => part
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .ok_or_else(|| format!("JSON path not found: {path}"))?,
            _ => return Err(format!("Cannot navigate JSON path: {path}")),
        };
    }
    Ok(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn to_reqwest(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

struct RestCall {
    meta: CommandMetadata,
    spec: RestSpec,
    sink: Arc<dyn StreamHandler>,
    clipboard: Arc<dyn ClipboardService>,
}

struct RestResponse {
    status: u16,
    body: String,
}

async fn send(spec: &RestSpec) -> anyhow::Result<RestResponse> {
    use anyhow::Context;

    let url = Url::parse(&spec.url).with_context(|| format!("invalid URL '{}'", spec.url))?;
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .context("building HTTP client")?;
    let mut req = client.request(to_reqwest(spec.method), url);
    for (k, v) in &spec.headers {
        req = req.header(k.as_str(), v.as_str());
    }
    if spec.method.sends_body()
        && let Some(body) = spec.request_body.as_deref().filter(|b| !b.is_empty())
    {
        req = req.body(body.to_string());
    }
    let resp = req.send().await.context("sending request")?;
    let status = resp.status().as_u16();
    let body = resp.text().await.context("reading response body")?;
    Ok(RestResponse { status, body })
}

impl RestCall {
    async fn publish(&self, status: u16, body: &str) {
        let text = format!(
            "REST {} {} - Status: {}\n{}",
            self.spec.method, self.spec.url, status, body
        );
        let forwarding = self.sink.handle_stream(
            Box::new(Cursor::new(text.into_bytes())),
            StreamKind::Stdout,
            &self.meta.name,
        );
        if let Err(e) = forwarding.await {
            warn!(command = %self.meta.name, "response forwarding failed: {e}");
        }
    }

    async fn copy_to_clipboard(&self, body: &str) {
        let content = match self.spec.to_clipboard.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => extract_json_path(body, path).unwrap_or_else(|e| {
                warn!(command = %self.meta.name, "{e}; copying full response");
                body.to_string()
            }),
            None => body.to_string(),
        };
        match self.clipboard.set_text(&content).await {
            Ok(()) => debug!(command = %self.meta.name, "response copied to clipboard"),
            Err(e) => warn!(command = %self.meta.name, "copying response failed: {e}"),
        }
    }

    fn captures(&self, body: &str) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (param, path) in &self.spec.captures {
            match extract_json_path(body, path) {
                Ok(v) => {
                    out.insert(param.clone(), v);
                }
                Err(e) => warn!(command = %self.meta.name, "capture '{param}' skipped: {e}"),
            }
        }
        out
    }

    async fn run(self: Arc<Self>) -> CommandResult {
        let start = Instant::now();
        let resp = match send(&self.spec).await {
            Ok(r) => r,
            Err(e) => {
                warn!(command = %self.meta.name, "REST request failed: {e:#}");
                return CommandResult::failure(start);
            }
        };
        self.publish(resp.status, &resp.body).await;
        self.copy_to_clipboard(&resp.body).await;
        let success = (200..300).contains(&resp.status);
        let captured = if success {
            self.captures(&resp.body)
        } else {
            BTreeMap::new()
        };
        info!(command = %self.meta.name, status = resp.status, "REST request finished");
        CommandResult::new(success, i32::from(resp.status), elapsed_ms(start)).with_captured(captured)
    }
}

pub struct RestCommand(Arc<RestCall>);

impl Command for RestCommand {
    fn metadata(&self) -> &CommandMetadata {
        &self.0.meta
    }

    fn execute_async(&self) -> ExecutionHandle {
        ExecutionHandle::spawn(Arc::clone(&self.0).run())
    }
}

/// Renders `url`, `requestBody` and every header value.
#[derive(Debug, Clone, Copy, Default)]
pub struct RestTemplatingPolicy;

impl TemplatingPolicy for RestTemplatingPolicy {
    fn kind(&self) -> CommandKind {
        CommandKind::Rest
    }

    fn templatable_fields<'a>(&self, meta: &'a CommandMetadata) -> Vec<&'a str> {
        let CommandSpec::Rest(r) = &meta.spec else {
            return Vec::new();
        };
        std::iter::once(r.url.as_str())
            .chain(r.request_body.as_deref())
            .chain(r.headers.values().map(String::as_str))
            .collect()
    }

    fn render(
        &self,
        meta: &CommandMetadata,
        params: &Parameters,
        engine: &TemplateEngine,
    ) -> Result<CommandMetadata> {
        let CommandSpec::Rest(r) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        let headers = r
            .headers
            .iter()
            .map(|(k, v)| -> Result<(String, String)> { Ok((k.clone(), engine.render(v, params)?)) })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let rendered = RestSpec {
            url: engine.render(&r.url, params)?,
            request_body: engine.render_opt(r.request_body.as_deref(), params)?,
            headers,
            ..r.clone()
        };
        Ok(meta.with_spec(CommandSpec::Rest(rendered)))
    }
}

pub struct RestCommandFactory {
    clipboard: Arc<dyn ClipboardService>,
}

impl RestCommandFactory {
    pub fn new(clipboard: Arc<dyn ClipboardService>) -> Self {
        Self { clipboard }
    }
}

impl CommandFactory for RestCommandFactory {
    fn kind(&self) -> CommandKind {
        CommandKind::Rest
    }

    fn templating_policy(&self) -> Arc<dyn TemplatingPolicy> {
        Arc::new(RestTemplatingPolicy)
    }

    fn validate(&self, meta: &CommandMetadata) -> Result<()> {
        match &meta.spec {
            CommandSpec::Rest(r) if r.url.trim().is_empty() => {
                Err(CommandError::invalid(self.kind(), "url must not be empty"))
            }
            CommandSpec::Rest(_) => Ok(()),
            _ => Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind()))),
        }
    }

    fn create_command(
        &self,
        meta: CommandMetadata,
        sink: Arc<dyn StreamHandler>,
    ) -> Result<Arc<dyn Command>> {
        let CommandSpec::Rest(spec) = &meta.spec else {
            return Err(CommandError::invalid(self.kind(), format!("got {}", meta.kind())));
        };
        Ok(Arc::new(RestCommand(Arc::new(RestCall {
            spec: spec.clone(),
            sink,
            clipboard: Arc::clone(&self.clipboard),
            meta,
        }))))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{BrokenClipboard, MemoryClipboard};
    use crate::sink::MemoryStreamHandler;

    const USER: &str = r#"{"data":{"user":{"email":"a@b.com","id":7,"roles":["x","y"]}}}"#;

    fn meta(spec: RestSpec) -> CommandMetadata {
        CommandMetadata::new("user", "", CommandSpec::Rest(spec))
    }

    #[test]
    fn json_path_extraction() {
        assert_eq!(extract_json_path(USER, "data.user.email").unwrap(), "a@b.com");
        assert_eq!(extract_json_path(USER, "data.user.id").unwrap(), "7");
        assert_eq!(extract_json_path(USER, "data.user.roles.1").unwrap(), "y");
        assert!(extract_json_path(USER, "data.missing").is_err());
        assert!(extract_json_path(USER, "data.user.email.x").is_err());
        assert!(extract_json_path("not json", "a").is_err());
    }

    #[tokio::test]
    async fn to_clipboard_copies_extracted_value() {
        let (base, server) = stub::serve(200, USER, 1).await;
        let cb = MemoryClipboard::new();
        let mem = MemoryStreamHandler::new();
        let f = RestCommandFactory::new(Arc::new(cb.clone()));
        let cmd = f
            .create_command(
                meta(RestSpec {
                    url: format!("{base}/users/1"),
                    to_clipboard: Some("data.user.email".into()),
                    ..RestSpec::default()
                }),
                Arc::new(mem.clone()),
            )
            .unwrap();
        let r = cmd.execute_async().await;
        assert!(r.success);
        assert_eq!(r.status, 200);
        assert_eq!(cb.get_text().as_deref(), Some("a@b.com"));
        let lines = mem.lines(StreamKind::Stdout);
        assert_eq!(lines[0], format!("REST GET {base}/users/1 - Status: 200"));
        assert_eq!(lines[1], USER);
        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /users/1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn missing_path_falls_back_to_full_body() {
        let (base, _server) = stub::serve(200, USER, 1).await;
        let cb = MemoryClipboard::new();
        let cmd = RestCommandFactory::new(Arc::new(cb.clone()))
            .create_command(
                meta(RestSpec {
                    url: base,
                    to_clipboard: Some("data.nope".into()),
                    ..RestSpec::default()
                }),
                Arc::new(MemoryStreamHandler::new()),
            )
            .unwrap();
        assert!(cmd.execute_async().await.success);
        assert_eq!(cb.get_text().as_deref(), Some(USER));
    }

    #[tokio::test]
    async fn post_sends_body_headers_and_captures() {
        let (base, server) = stub::serve(201, USER, 1).await;
        let cmd = RestCommandFactory::new(Arc::new(BrokenClipboard))
            .create_command(
                meta(RestSpec {
                    url: format!("{base}/login"),
                    method: HttpMethod::Post,
                    request_body: Some(r#"{"u":"me"}"#.into()),
                    headers: BTreeMap::from([("X-Token".to_string(), "abc".to_string())]),
                    captures: BTreeMap::from([
                        ("user_id".to_string(), "data.user.id".to_string()),
                        ("bad".to_string(), "data.none".to_string()),
                    ]),
                    ..RestSpec::default()
                }),
                Arc::new(MemoryStreamHandler::new()),
            )
            .unwrap();
        let r = cmd.execute_async().await;
        assert!(r.success, "clipboard failure must not change the result");
        assert_eq!(r.status, 201);
        assert_eq!(r.captured, BTreeMap::from([("user_id".to_string(), "7".to_string())]));
        let req = &server.await.unwrap()[0];
        assert!(req.starts_with("POST /login"));
        assert!(req.to_ascii_lowercase().contains("x-token: abc"));
        assert!(req.ends_with(r#"{"u":"me"}"#));
    }

    #[tokio::test]
    async fn non_2xx_is_failure_with_real_status() {
        let (base, _server) = stub::serve(404, "{}", 1).await;
        let cmd = RestCommandFactory::new(Arc::new(MemoryClipboard::new()))
            .create_command(
                meta(RestSpec {
                    url: base,
                    captures: BTreeMap::from([("x".to_string(), "a".to_string())]),
                    ..RestSpec::default()
                }),
                Arc::new(MemoryStreamHandler::new()),
            )
            .unwrap();
        let r = cmd.execute_async().await;
        assert!(!r.success);
        assert_eq!(r.status, 404);
        assert!(r.captured.is_empty());
    }

    #[tokio::test]
    async fn unreachable_or_invalid_url_is_minus_one() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let f = RestCommandFactory::new(Arc::new(MemoryClipboard::new()));
        for url in [format!("http://127.0.0.1:{port}/"), "not a url".to_string()] {
            let cmd = f
                .create_command(
                    meta(RestSpec {
                        url,
                        ..RestSpec::default()
                    }),
                    Arc::new(MemoryStreamHandler::new()),
                )
                .unwrap();
            let r = cmd.execute_async().await;
            assert!(!r.success);
            assert_eq!(r.status, -1);
        }
    }

    #[test]
    fn policy_renders_url_body_and_headers() {
        let m = meta(RestSpec {
            url: "https://${host}/u/${id}".into(),
            request_body: Some(r#"{"id":"${id}"}"#.into()),
            headers: BTreeMap::from([("Authorization".to_string(), "Bearer ${token}".to_string())]),
            to_clipboard: Some("${kept}".into()),
            ..RestSpec::default()
        });
        let params = Parameters::from([
            ("host".to_string(), "api".to_string()),
            ("id".to_string(), "9".to_string()),
            ("token".to_string(), "t0k".to_string()),
        ]);
        let engine = TemplateEngine::new();
        assert_eq!(
            RestTemplatingPolicy.placeholder_names(&m, &engine).len(),
            3
        );
        let CommandSpec::Rest(r) = RestTemplatingPolicy.render(&m, &params, &engine).unwrap().spec else {
            panic!("wrong spec");
        };
        assert_eq!(r.url, "https://api/u/9");
        assert_eq!(r.request_body.as_deref(), Some(r#"{"id":"9"}"#));
        assert_eq!(r.headers["Authorization"], "Bearer t0k");
        assert_eq!(r.to_clipboard.as_deref(), Some("${kept}"));
    }
}
