//! JSON snapshots of objects and lightweight object references.

use crate::error::{CoreError, ObjectError, Result};
use crate::field::FieldKind;
use crate::object::ObjectHandle;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// JSON form of an object: its readable scriptable values plus the
/// snapshots of the objects in its scriptable child fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub keyword: String,
    pub uuid: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<ObjectSnapshot>>,
}

impl ObjectSnapshot {
    /// Snapshot carrying identity only.
    pub fn reference(keyword: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            uuid: uuid.into(),
            fields: Map::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| CoreError::Object(ObjectError::InvalidSnapshot(e.to_string())))
    }
}

/// Names a remote object without owning it.
///
/// Carries the class keyword, identity and a JSON text snapshot of the
/// object's readable scalar fields. Never carries children.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectReference {
    pub class_keyword: String,
    pub uuid: String,
    pub inline_fields: String,
}

impl ObjectReference {
    pub fn new(class_keyword: impl Into<String>, uuid: impl Into<String>) -> Self {
        Self {
            class_keyword: class_keyword.into(),
            uuid: uuid.into(),
            inline_fields: "{}".to_string(),
        }
    }
}

impl From<&ObjectSnapshot> for ObjectReference {
    fn from(snapshot: &ObjectSnapshot) -> Self {
        Self {
            class_keyword: snapshot.keyword.clone(),
            uuid: snapshot.uuid.clone(),
            inline_fields: Value::Object(snapshot.fields.clone()).to_string(),
        }
    }
}

impl ObjectHandle {
    /// Full snapshot of this object and its scriptable subtree.
    pub fn snapshot(&self) -> ObjectSnapshot {
        let mut snapshot = ObjectSnapshot {
            keyword: self.class_keyword().to_string(),
            uuid: self.uuid().to_string(),
            fields: self.readable_values(),
            children: BTreeMap::new(),
        };
        let data = self.read();
        let child_fields: Vec<(String, Vec<ObjectHandle>)> = data
            .child_fields
            .iter()
            .filter_map(|f| {
                f.scripting
                    .as_ref()
                    .filter(|s| s.readable)
                    .map(|s| (s.script_name.clone(), f.children.clone()))
            })
            .collect();
        drop(data);
        for (name, children) in child_fields {
            snapshot
                .children
                .insert(name, children.iter().map(ObjectHandle::snapshot).collect());
        }
        snapshot
    }

    /// Reference to this object with inline scalar values.
    pub fn reference(&self) -> ObjectReference {
        ObjectReference {
            class_keyword: self.class_keyword().to_string(),
            uuid: self.uuid().to_string(),
            inline_fields: Value::Object(self.readable_values()).to_string(),
        }
    }

    /// Write every value present in `fields` into the matching scriptable
    /// field. Unknown names are ignored; writability is not checked.
    pub fn apply_values(&self, fields: &Map<String, Value>) -> Result<()> {
        for info in self.fields_info() {
            if !matches!(info.kind, FieldKind::Value { .. }) {
                continue;
            }
            let Some(json) = fields.get(&info.script_name) else {
                continue;
            };
            self.replace(&info.script_name, false, |current| {
                current.parse_like(&info.script_name, json.clone())
            })?;
        }
        Ok(())
    }

    fn readable_values(&self) -> Map<String, Value> {
        self.read()
            .fields
            .iter()
            .filter_map(|f| {
                f.scripting
                    .as_ref()
                    .filter(|s| s.readable)
                    .map(|s| (s.script_name.clone(), f.value.to_json()))
            })
            .collect()
    }
}
