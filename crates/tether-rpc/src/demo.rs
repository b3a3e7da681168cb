//! Demo application used by the CLI server and the integration tests.
//!
//! One document holding a `DemoDocument` root with a single `demoObject`
//! child and an `items` child array. `DemoObject` carries one array field
//! per element type.

use crate::rpc::messages::AppInfo;
use crate::rpc::services::ServerApp;
use serde::{Deserialize, Serialize};
use tether_core::prelude::*;

pub const DOCUMENT_ID: &str = "testDocument";
pub const DOCUMENT_CLASS: &str = "DemoDocument";
pub const OBJECT_CLASS: &str = "DemoObject";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntVectorParams {
    pub values: Vec<i32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleParams {
    pub factor: i32,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SumResult {
    pub total: i64,
}

/// Builder of a `DemoObject` with default values.
pub fn demo_object() -> ObjectBuilder {
    ObjectHandle::builder(OBJECT_CLASS)
        .field(ValueField::scriptable("intVector", FieldValue::Int32Array(vec![42])))
        .field(ValueField::scriptable("uint64Vector", FieldValue::UInt64Array(vec![])))
        .field(ValueField::scriptable("doubleVector", FieldValue::Float64Array(vec![])))
        .field(ValueField::scriptable("floatVector", FieldValue::Float32Array(vec![])))
        .field(ValueField::scriptable("stringVector", FieldValue::StringArray(vec![])))
        .field(ValueField::scriptable("boolVector", FieldValue::BoolArray(vec![])))
        .field(ValueField::scriptable("intField", FieldValue::Int32(0)))
        .field(ValueField::scriptable("name", FieldValue::String("demo".into())).read_only())
        .field(ValueField::new("revision", FieldValue::UInt64(0)))
}

/// Builder of a `DemoDocument` root with no children.
pub fn demo_document() -> ObjectBuilder {
    ObjectHandle::builder(DOCUMENT_CLASS)
        .field(ValueField::scriptable("title", FieldValue::String("Demo".into())))
        .child(ChildField::single("demoObject", None))
        .child(ChildField::array("items", vec![]))
}

/// Root of a fresh demo tree.
pub fn document_root() -> ObjectHandle {
    ObjectHandle::builder(DOCUMENT_CLASS)
        .field(ValueField::scriptable("title", FieldValue::String("Demo".into())))
        .child(ChildField::single("demoObject", Some(demo_object().build())))
        .child(ChildField::array("items", vec![]))
        .build()
}

pub fn methods() -> MethodRegistry {
    let mut methods = MethodRegistry::new();
    methods.register(
        OBJECT_CLASS,
        TypedMethod::read_write("setIntVector", |owner: &ObjectHandle, p: IntVectorParams| {
            owner.set("intVector", FieldValue::Int32Array(p.values))
        }),
    );
    methods.register(
        OBJECT_CLASS,
        TypedMethod::read_only("sumIntVector", |owner: &ObjectHandle, _: ()| {
            Ok(SumResult {
                total: int_vector(owner)?.iter().map(|v| *v as i64).sum(),
            })
        }),
    );
    methods.register(
        OBJECT_CLASS,
        TypedMethod::read_write("scaleIntVector", |owner: &ObjectHandle, p: ScaleParams| {
            if p.factor == 0 {
                return Err(CoreError::method_failed("Scale factor must be non-zero"));
            }
            let scaled = int_vector(owner)?.iter().map(|v| v * p.factor).collect();
            owner.set("intVector", FieldValue::Int32Array(scaled))
        }),
    );
    methods
}

pub fn factory() -> ObjectFactory {
    let mut factory = ObjectFactory::new();
    factory.register(DOCUMENT_CLASS, demo_document);
    factory.register(OBJECT_CLASS, demo_object);
    factory
}

pub fn app_info() -> AppInfo {
    AppInfo::new("tether-demo", "demo", (1, 0, 0))
}

/// The whole demo application.
pub fn app() -> ServerApp {
    ServerApp {
        info: Some(app_info()),
        documents: vec![Document::new(DOCUMENT_ID, document_root())],
        methods: methods(),
        factory: factory(),
    }
}

fn int_vector(owner: &ObjectHandle) -> Result<Vec<i32>> {
    match owner.get("intVector")? {
        FieldValue::Int32Array(values) => Ok(values),
        other => Err(CoreError::type_mismatch(
            "intVector",
            "Int32Array",
            other.type_name(),
        )),
    }
}
