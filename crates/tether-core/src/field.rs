//! Field definitions: value fields, child fields and their scripting flags.

use crate::object::ObjectHandle;
use crate::value::{ElementType, FieldValue};

/// Marks a field as accessible from remote clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scriptability {
    /// Name the field is addressed by over RPC.
    pub script_name: String,
    pub readable: bool,
    pub writable: bool,
}

impl Scriptability {
    pub fn read_write(script_name: impl Into<String>) -> Self {
        Self {
            script_name: script_name.into(),
            readable: true,
            writable: true,
        }
    }
}

/// A field holding a scalar or homogeneous array value.
#[derive(Debug, Clone)]
pub struct ValueField {
    pub keyword: String,
    pub value: FieldValue,
    pub scripting: Option<Scriptability>,
}

impl ValueField {
    /// Internal field, invisible to remote clients.
    pub fn new(keyword: impl Into<String>, value: FieldValue) -> Self {
        Self {
            keyword: keyword.into(),
            value,
            scripting: None,
        }
    }

    /// Read-write scriptable field whose script name equals its keyword.
    pub fn scriptable(keyword: impl Into<String>, value: FieldValue) -> Self {
        let keyword = keyword.into();
        Self {
            scripting: Some(Scriptability::read_write(keyword.clone())),
            keyword,
            value,
        }
    }

    pub fn read_only(mut self) -> Self {
        if let Some(s) = self.scripting.as_mut() {
            s.writable = false;
        }
        self
    }

    pub fn write_only(mut self) -> Self {
        if let Some(s) = self.scripting.as_mut() {
            s.readable = false;
        }
        self
    }

    pub(crate) fn info(&self) -> Option<FieldInfo> {
        self.scripting.as_ref().map(|s| FieldInfo {
            keyword: self.keyword.clone(),
            script_name: s.script_name.clone(),
            readable: s.readable,
            writable: s.writable,
            kind: FieldKind::Value {
                element_type: self.value.element_type(),
                array: self.value.is_array(),
            },
        })
    }
}

/// A structural field owning one (or, for arrays, many) child objects.
#[derive(Debug, Clone)]
pub struct ChildField {
    pub keyword: String,
    pub children: Vec<ObjectHandle>,
    /// `false` for single-child fields, which hold at most one object.
    pub array: bool,
    pub scripting: Option<Scriptability>,
}

impl ChildField {
    pub fn single(keyword: impl Into<String>, child: Option<ObjectHandle>) -> Self {
        let keyword = keyword.into();
        Self {
            scripting: Some(Scriptability::read_write(keyword.clone())),
            keyword,
            children: child.into_iter().collect(),
            array: false,
        }
    }

    pub fn array(keyword: impl Into<String>, children: Vec<ObjectHandle>) -> Self {
        let keyword = keyword.into();
        Self {
            scripting: Some(Scriptability::read_write(keyword.clone())),
            keyword,
            children,
            array: true,
        }
    }

    /// Hide the field from remote clients. Its children are still part of
    /// the tree and remain resolvable by identity.
    pub fn internal(mut self) -> Self {
        self.scripting = None;
        self
    }

    pub(crate) fn info(&self) -> Option<FieldInfo> {
        self.scripting.as_ref().map(|s| FieldInfo {
            keyword: self.keyword.clone(),
            script_name: s.script_name.clone(),
            readable: s.readable,
            writable: s.writable,
            kind: FieldKind::Child { array: self.array },
        })
    }
}

/// Shape of a field as seen through reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Value { element_type: ElementType, array: bool },
    Child { array: bool },
}

/// Reflection summary of one scriptable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub keyword: String,
    pub script_name: String,
    pub readable: bool,
    pub writable: bool,
    pub kind: FieldKind,
}
