use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeItem, NodeOutput};
use fluxruntime::{NodeFactory, NodeMetadata};
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// HTTP request node: one request per input item
pub struct HttpRequestNode {
    client: reqwest::Client,
    url: String,
    method: Method,
    headers: Map<String, Value>,
    body: Option<Value>,
    send_item: bool,
    fail_on_status: bool,
}

impl HttpRequestNode {
    async fn request(&self, item: &NodeItem) -> Result<NodeItem, NodeError> {
        let mut request = self.client.request(self.method.clone(), &self.url);

        for (key, value) in &self.headers {
            if let Some(value) = value.as_str() {
                request = request.header(key, value);
            }
        }

        if self.send_item {
            request = request.json(&item.json);
        } else if let Some(body) = &self.body {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = request
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or(""))))
            .collect();
        let text = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        if self.fail_on_status && (status.is_client_error() || status.is_server_error()) {
            return Err(NodeError::ExecutionFailed(format!(
                "{} {} returned {}: {}",
                self.method, self.url, status, text
            )));
        }

        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(NodeItem::new(json!({
            "statusCode": status.as_u16(),
            "headers": headers,
            "body": body,
        })))
    }
}

#[async_trait]
impl Node for HttpRequestNode {
    fn node_type(&self) -> &str {
        "http.request"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut inputs = ctx.all_inputs();
        if inputs.is_empty() {
            inputs.push(NodeItem::empty());
        }

        let mut items = Vec::with_capacity(inputs.len());
        for item in &inputs {
            tracing::debug!("Node {}: {} {}", ctx.node_name, self.method, self.url);
            items.push(self.request(item).await?);
        }

        Ok(NodeOutput::main(items))
    }

    fn validate_parameters(&self, parameters: &HashMap<String, Value>) -> Result<(), NodeError> {
        let url = parameters
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Configuration("Missing parameter: url".to_string()))?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(NodeError::Configuration(format!("Unsupported URL: {}", url)));
        }
        Ok(())
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let url = parameters
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Configuration("Missing parameter: url".to_string()))?
            .to_string();

        let method_name = parameters
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = match method_name.as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => {
                return Err(NodeError::Configuration(format!("Unsupported method: {}", other)))
            }
        };

        let headers = match parameters.get("headers") {
            Some(Value::Object(headers)) => headers.clone(),
            _ => Map::new(),
        };

        Ok(Box::new(HttpRequestNode {
            client: reqwest::Client::new(),
            url,
            method,
            headers,
            body: parameters.get("body").cloned(),
            send_item: parameters
                .get("sendItem")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            fail_on_status: parameters
                .get("failOnStatus")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        }))
    }

    fn node_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Make HTTP requests", "http")
    }
}
