//! Flow control: branching, merging and batching.

use async_trait::async_trait;
use fluxcore::{Node, NodeContext, NodeError, NodeItem, NodeOutput};
use fluxruntime::{NodeFactory, NodeMetadata, PortDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Exists,
    IsEmpty,
    IsTrue,
}

impl Operation {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "equals" => Self::Equals,
            "notEquals" => Self::NotEquals,
            "contains" => Self::Contains,
            "gt" => Self::GreaterThan,
            "gte" => Self::GreaterOrEqual,
            "lt" => Self::LessThan,
            "lte" => Self::LessOrEqual,
            "exists" => Self::Exists,
            "isEmpty" => Self::IsEmpty,
            "isTrue" => Self::IsTrue,
            _ => return None,
        })
    }
}

/// `field <operation> value`, evaluated against one item.
#[derive(Debug, Clone)]
struct Condition {
    field: String,
    operation: Operation,
    value: Value,
}

impl Condition {
    fn from_parameters(parameters: &HashMap<String, Value>) -> Result<Self, NodeError> {
        let field = parameters
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Configuration("Missing parameter: field".to_string()))?;
        let name = parameters
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("equals");
        let operation = Operation::parse(name)
            .ok_or_else(|| NodeError::Configuration(format!("Unknown operation: {}", name)))?;

        Ok(Self {
            field: field.to_string(),
            operation,
            value: parameters.get("value").cloned().unwrap_or(Value::Null),
        })
    }

    fn matches(&self, item: &NodeItem) -> bool {
        let actual = item.get_path(&self.field);
        match self.operation {
            Operation::Equals => actual.is_some_and(|a| loosely_equal(a, &self.value)),
            Operation::NotEquals => !actual.is_some_and(|a| loosely_equal(a, &self.value)),
            Operation::Contains => match actual {
                Some(Value::String(s)) => self.value.as_str().is_some_and(|v| s.contains(v)),
                Some(Value::Array(list)) => list.iter().any(|v| loosely_equal(v, &self.value)),
                _ => false,
            },
            Operation::GreaterThan => self.compare(actual, |a, b| a > b),
            Operation::GreaterOrEqual => self.compare(actual, |a, b| a >= b),
            Operation::LessThan => self.compare(actual, |a, b| a < b),
            Operation::LessOrEqual => self.compare(actual, |a, b| a <= b),
            Operation::Exists => actual.is_some_and(|a| !a.is_null()),
            Operation::IsEmpty => match actual {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(Value::Array(list)) => list.is_empty(),
                Some(Value::Object(map)) => map.is_empty(),
                Some(_) => false,
            },
            Operation::IsTrue => actual == Some(&Value::Bool(true)),
        }
    }

    fn compare(&self, actual: Option<&Value>, op: impl Fn(f64, f64) -> bool) -> bool {
        match (actual.and_then(Value::as_f64), self.value.as_f64()) {
            (Some(a), Some(b)) => op(a, b),
            _ => false,
        }
    }
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Routes each input item to `true` or `false` by a condition.
pub struct IfNode {
    condition: Condition,
}

#[async_trait]
impl Node for IfNode {
    fn node_type(&self) -> &str {
        "flow.if"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let (matched, rest): (Vec<NodeItem>, Vec<NodeItem>) = ctx
            .all_inputs()
            .into_iter()
            .partition(|item| self.condition.matches(item));

        tracing::debug!(
            "Node {}: {} true, {} false",
            ctx.node_name,
            matched.len(),
            rest.len()
        );

        Ok(branch(branch(NodeOutput::new(), "true", matched), "false", rest))
    }

    fn validate_parameters(&self, parameters: &HashMap<String, Value>) -> Result<(), NodeError> {
        Condition::from_parameters(parameters).map(|_| ())
    }
}

fn branch(output: NodeOutput, slot: &str, items: Vec<NodeItem>) -> NodeOutput {
    if items.is_empty() {
        output.without_output(slot)
    } else {
        output.with_output(slot, items)
    }
}

pub struct IfNodeFactory;

impl NodeFactory for IfNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(IfNode {
            condition: Condition::from_parameters(parameters)?,
        }))
    }

    fn node_type(&self) -> &str {
        "flow.if"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Route items by a condition", "flow").with_outputs(vec![
            PortDefinition::optional("true", "Items matching the condition"),
            PortDefinition::optional("false", "Items not matching the condition"),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMode {
    Append,
    Combine,
}

/// Joins two inputs, either one after the other or pairwise by position.
pub struct MergeNode {
    mode: MergeMode,
}

#[async_trait]
impl Node for MergeNode {
    fn node_type(&self) -> &str {
        "flow.merge"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let first = ctx.require_input("input1")?;
        let second = ctx.require_input("input2")?;

        let items = match self.mode {
            MergeMode::Append => first.iter().chain(second).cloned().collect(),
            MergeMode::Combine => first
                .iter()
                .zip(second)
                .map(|(a, b)| {
                    let mut merged = a.clone();
                    merged.json.extend(b.json.clone());
                    merged
                })
                .collect(),
        };

        Ok(NodeOutput::main(items))
    }
}

pub struct MergeNodeFactory;

impl NodeFactory for MergeNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let mode = match parameters.get("mode").and_then(Value::as_str) {
            None | Some("append") => MergeMode::Append,
            Some("combine") => MergeMode::Combine,
            Some(other) => {
                return Err(NodeError::Configuration(format!("Unknown merge mode: {}", other)))
            }
        };
        Ok(Box::new(MergeNode { mode }))
    }

    fn node_type(&self) -> &str {
        "flow.merge"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Merge two inputs", "flow").with_inputs(vec![
            PortDefinition::required("input1", "First input"),
            PortDefinition::required("input2", "Second input"),
        ])
    }
}

const DEFAULT_BATCH_SIZE: usize = 10;

/// Loop state kept in the execution context between entries.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchState {
    remaining: Vec<NodeItem>,
    processed: usize,
    batches: usize,
    returned: Vec<NodeItem>,
}

/// Emits its input in batches on `loop`, one batch per entry. Items fed back
/// from the loop body are collected; once nothing remains the next entry
/// emits a summary on `done`.
pub struct SplitInBatchesNode {
    batch_size: usize,
}

#[async_trait]
impl Node for SplitInBatchesNode {
    fn node_type(&self) -> &str {
        "flow.split_in_batches"
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let input = ctx.main_input().to_vec();
        let mut state = match ctx.state.get().await {
            Some(saved) => {
                let mut state: BatchState = serde_json::from_value(saved).map_err(|e| {
                    NodeError::ExecutionFailed(format!("Corrupt batch state: {}", e))
                })?;
                state.returned.extend(input);
                state
            }
            None => BatchState {
                remaining: input,
                ..BatchState::default()
            },
        };

        if state.remaining.is_empty() {
            ctx.state.clear().await;
            tracing::info!(
                "Node {} finished {} item(s) in {} batch(es)",
                ctx.node_name,
                state.processed,
                state.batches
            );
            let returned: Vec<Value> = state
                .returned
                .into_iter()
                .map(|item| Value::Object(item.json))
                .collect();
            let summary = NodeItem::new(json!({
                "totalProcessed": state.processed,
                "batches": state.batches,
                "items": returned,
            }));
            return Ok(NodeOutput::new()
                .with_output("done", vec![summary])
                .without_output("loop"));
        }

        let take = self.batch_size.min(state.remaining.len());
        let batch: Vec<NodeItem> = state.remaining.drain(..take).collect();
        state.processed += batch.len();
        state.batches += 1;

        let saved = serde_json::to_value(&state)
            .map_err(|e| NodeError::ExecutionFailed(format!("Cannot save batch state: {}", e)))?;
        ctx.state.set(saved).await;

        tracing::debug!(
            "Node {} emitting batch {} ({} item(s), {} left)",
            ctx.node_name,
            state.batches,
            batch.len(),
            state.remaining.len()
        );
        Ok(NodeOutput::new()
            .with_output("loop", batch)
            .without_output("done"))
    }
}

pub struct SplitInBatchesNodeFactory;

impl NodeFactory for SplitInBatchesNodeFactory {
    fn create(&self, parameters: &HashMap<String, Value>) -> Result<Box<dyn Node>, NodeError> {
        let batch_size = match parameters.get("batchSize") {
            None => DEFAULT_BATCH_SIZE,
            Some(value) => match value.as_u64() {
                Some(size) if size > 0 => size as usize,
                _ => {
                    return Err(NodeError::Configuration(format!(
                        "batchSize must be a positive integer, got {}",
                        value
                    )))
                }
            },
        };
        Ok(Box::new(SplitInBatchesNode { batch_size }))
    }

    fn node_type(&self) -> &str {
        "flow.split_in_batches"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new("Process items in batches", "flow")
            .with_outputs(vec![
                PortDefinition::loop_output("loop", "Current batch"),
                PortDefinition::optional("done", "Summary once all batches ran"),
            ])
            .reentrant()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_condition_operations() {
        let item = NodeItem::new(json!({
            "age": 30,
            "name": "ada",
            "tags": ["admin", "ops"],
            "active": true,
            "note": "",
        }));

        let cases = [
            (json!({"field": "age", "value": 30}), true),
            (json!({"field": "age", "value": 30.0}), true),
            (json!({"field": "age", "operation": "gt", "value": 40}), false),
            (json!({"field": "age", "operation": "lte", "value": 30}), true),
            (json!({"field": "name", "operation": "contains", "value": "d"}), true),
            (json!({"field": "tags", "operation": "contains", "value": "ops"}), true),
            (json!({"field": "missing", "operation": "exists"}), false),
            (json!({"field": "note", "operation": "isEmpty"}), true),
            (json!({"field": "active", "operation": "isTrue"}), true),
            (json!({"field": "missing", "operation": "notEquals", "value": 1}), true),
        ];

        for (parameters, expected) in cases {
            let condition = Condition::from_parameters(&params(parameters.clone())).unwrap();
            assert_eq!(condition.matches(&item), expected, "{}", parameters);
        }
    }

    #[test]
    fn test_condition_rejects_bad_configuration() {
        assert!(Condition::from_parameters(&params(json!({}))).is_err());
        assert!(
            Condition::from_parameters(&params(json!({"field": "a", "operation": "near"}))).is_err()
        );
    }
}
