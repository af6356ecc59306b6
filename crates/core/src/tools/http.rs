// HTTP fetch tool: calls a REST endpoint and stores the JSON reply as context

use super::{non_empty, ParameterSpec, Tool, ToolContext, ToolOutput, ToolSchema};
use crate::error::ToolError;
use crate::types::{Parameters, RunState};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use url::Url;

pub const HTTP_FETCH: &str = "http_fetch";

/// Tool to fetch JSON from a REST API into `auxiliary_context`.
///
/// One client is shared by every invocation; the timeout is set per request.
pub struct HttpFetchTool {
    client: reqwest::Client,
}

impl HttpFetchTool {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("toolgraph/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
}

/// Validated request, built before anything touches the network
#[derive(Debug)]
struct FetchRequest {
    url: Url,
    method: Method,
    headers: HeaderMap,
    body: Value,
}

impl FetchRequest {
    fn from_parameters(parameters: &Parameters) -> Result<Self, ToolError> {
        let raw_url =
            non_empty(parameters, "url").ok_or_else(|| ToolError::MissingParameter("url".into()))?;

        let url = Url::parse(raw_url).map_err(|e| ToolError::invalid("url", e))?;

        // Only allow HTTP/HTTPS
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ToolError::invalid(
                "url",
                format!("only HTTP/HTTPS URLs are supported, got: {}", url.scheme()),
            ));
        }

        let method = match non_empty(parameters, "method")
            .unwrap_or("GET")
            .trim()
            .to_ascii_uppercase()
            .as_str()
        {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => {
                return Err(ToolError::invalid(
                    "method",
                    format!("unsupported HTTP method {}", other),
                ))
            }
        };

        let headers = parse_headers(non_empty(parameters, "headers").unwrap_or("{}"))?;

        let body: Value = serde_json::from_str(non_empty(parameters, "body").unwrap_or("{}"))
            .map_err(|e| ToolError::invalid("body", format!("invalid JSON: {}", e)))?;

        Ok(Self {
            url,
            method,
            headers,
            body,
        })
    }
}

fn parse_headers(raw: &str) -> Result<HeaderMap, ToolError> {
    let parsed: Value = serde_json::from_str(raw)
        .map_err(|e| ToolError::invalid("headers", format!("invalid JSON: {}", e)))?;

    let Value::Object(entries) = parsed else {
        return Err(ToolError::invalid("headers", "expected a JSON object"));
    };

    let mut headers = HeaderMap::with_capacity(entries.len());
    for (name, value) in entries {
        let value = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ToolError::invalid("headers", format!("{}: {}", name, e)))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| ToolError::invalid("headers", format!("{}: {}", name.as_str(), e)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[async_trait::async_trait]
impl Tool for HttpFetchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: HTTP_FETCH.to_string(),
            description: "Fetch data from a REST API and store it as context.".to_string(),
            parameters: vec![
                ParameterSpec::text("url", "API URL"),
                ParameterSpec::text("method", "HTTP Method (GET/POST)"),
                ParameterSpec::textarea("headers", "Headers (JSON)"),
                ParameterSpec::textarea("body", "Body (JSON, for POST)"),
            ],
        }
    }

    async fn invoke(
        &self,
        mut state: RunState,
        parameters: &Parameters,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let request = FetchRequest::from_parameters(parameters)?;

        tracing::debug!(
            "node {} fetching {:?} {}",
            ctx.node_id,
            request.method,
            request.url
        );

        let builder = match request.method {
            Method::Get => self.client.get(request.url),
            Method::Post => self.client.post(request.url).json(&request.body),
        };

        let response = builder
            .headers(request.headers)
            .timeout(ctx.timeout)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| request_error(e, ctx))?;

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::Timeout(ctx.timeout)
            } else {
                ToolError::Request(format!("response is not JSON: {}", e))
            }
        })?;

        let output = payload.to_string();
        state.auxiliary_context = output.clone();

        Ok(ToolOutput::new(state, output))
    }
}

fn request_error(e: reqwest::Error, ctx: &ToolContext) -> ToolError {
    if e.is_timeout() {
        ToolError::Timeout(ctx.timeout)
    } else {
        ToolError::Request(e.to_string())
    }
}
