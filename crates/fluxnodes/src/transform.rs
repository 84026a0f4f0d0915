use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeItem, NodeOutput};
use fluxruntime::{NodeFactory, NodeMetadata};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Subnode slot whose attached nodes contribute extra fields.
const FIELDS_SLOT: &str = "fields";

/// Assigns fixed values to every item. Dotted keys create nested objects.
pub struct SetNode {
    values: Map<String, Value>,
    keep_only_set: bool,
}

#[async_trait]
impl Node for SetNode {
    fn node_type(&self) -> &str {
        "transform.set"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut assignments = self.values.clone();
        for subnode in ctx.subnodes_on(FIELDS_SLOT) {
            if let Some(Value::Object(values)) = subnode.parameters.get("values") {
                tracing::debug!("Node {} takes fields from {}", ctx.node_name, subnode.name);
                assignments.extend(values.clone());
            }
        }

        let items = ctx
            .all_inputs()
            .into_iter()
            .map(|item| {
                let mut json = if self.keep_only_set {
                    Map::new()
                } else {
                    item.json
                };
                for (path, value) in &assignments {
                    set_path(&mut json, path, value.clone());
                }
                NodeItem {
                    json,
                    binary: item.binary,
                }
            })
            .collect();

        Ok(NodeOutput::main(items))
    }
}

fn set_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let slot = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(child) = slot {
                set_path(child, rest, value);
            }
        }
    }
}

pub struct SetNodeFactory;

impl NodeFactory for SetNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let values = match parameters.get("values") {
            None => Map::new(),
            Some(Value::Object(values)) => values.clone(),
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: "values".to_string(),
                    expected: "object".to_string(),
                    actual: other.to_string(),
                })
            }
        };
        Ok(Box::new(SetNode {
            values,
            keep_only_set: parameters
                .get("keepOnlySet")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }))
    }

    fn node_type(&self) -> &str {
        "transform.set"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Set fields on every item", "transform")
    }
}

/// Parse a JSON string field of each item
pub struct JsonParseNode {
    field: String,
    target: String,
}

#[async_trait]
impl Node for JsonParseNode {
    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let mut items = Vec::new();
        for mut item in ctx.all_inputs() {
            let text = match item.get_path(&self.field) {
                Some(Value::String(text)) => text.clone(),
                other => {
                    return Err(NodeError::InvalidInputType {
                        field: self.field.clone(),
                        expected: "string".to_string(),
                        actual: other.map(type_name).unwrap_or("nothing").to_string(),
                    })
                }
            };

            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                NodeError::InvalidInputType {
                    field: self.field.clone(),
                    expected: "JSON text".to_string(),
                    actual: format!("unparsable text ({})", e),
                }
            })?;
            set_path(&mut item.json, &self.target, parsed);
            items.push(item);
        }

        Ok(NodeOutput::main(items))
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let field = parameters
            .get("field")
            .and_then(Value::as_str)
            .unwrap_or("data")
            .to_string();
        let target = parameters
            .get("target")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| field.clone());
        Ok(Box::new(JsonParseNode { field, target }))
    }

    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Parse a JSON string field", "transform")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_path_creates_nested_objects() {
        let mut map = Map::new();
        map.insert("user".to_string(), json!("flat"));

        set_path(&mut map, "user.name", json!("ada"));
        set_path(&mut map, "count", json!(2));

        assert_eq!(Value::Object(map), json!({"user": {"name": "ada"}, "count": 2}));
    }
}
