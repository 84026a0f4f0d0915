use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of data flowing along a connection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeItem {
    pub json: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary: Option<Map<String, Value>>,
}

impl NodeItem {
    /// Build an item from any JSON value. Non-object values are wrapped
    /// under a `value` key so the item body is always an object.
    pub fn new(json: Value) -> Self {
        let json = match json {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self { json, binary: None }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a dotted path (`a.b.0.c`) inside the item body.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.json.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(list) => list.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl From<Value> for NodeItem {
    fn from(json: Value) -> Self {
        NodeItem::new(json)
    }
}

/// Turn run input into start items: an array becomes one item per element,
/// `null` becomes a single empty item, anything else a single item.
pub fn items_from_json(input: Value) -> Vec<NodeItem> {
    match input {
        Value::Null => vec![NodeItem::empty()],
        Value::Array(list) if list.is_empty() => vec![NodeItem::empty()],
        Value::Array(list) => list.into_iter().map(item_from_wire).collect(),
        other => vec![item_from_wire(other)],
    }
}

/// Accepts both `{json: {...}, binary?}` envelopes and bare objects.
fn item_from_wire(value: Value) -> NodeItem {
    if let Value::Object(map) = &value {
        if map.get("json").is_some_and(Value::is_object) {
            if let Ok(item) = serde_json::from_value::<NodeItem>(value.clone()) {
                return item;
            }
        }
    }
    NodeItem::new(value)
}
