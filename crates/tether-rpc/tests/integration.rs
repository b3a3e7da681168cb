//! End-to-end tests against a demo server on an ephemeral port.
//!
//! Covers session tiers, array transfer of every element type around the
//! chunk boundaries, method execution, child object editing and shutdown.

use serde_json::json;
use std::fmt::Debug;
use std::time::Duration;
use tether_core::snapshot::{ObjectReference, ObjectSnapshot};
use tether_rpc::demo;
use tether_rpc::rpc::{Client, Server, ServerHandle};
use tether_core::value::ElementType;
use tether_rpc::transfer::{chunk_size, ArrayElement, ArrayValues};
use tether_rpc::{ClientError, ServerConfig, SessionType, StatusCode};

const PACKAGE_BYTE_SIZE: usize = 64;

/// Helper: config for a test server on an ephemeral port.
fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        package_byte_size: PACKAGE_BYTE_SIZE,
        ..Default::default()
    }
}

/// Helper: start a demo server.
async fn start_server(config: ServerConfig) -> ServerHandle {
    Server::new(config, demo::app()).start().await.unwrap()
}

/// Helper: connect a client using the test package size.
async fn connect(handle: &ServerHandle) -> Client {
    let config = tether_rpc::rpc::ClientConfig {
        package_byte_size: PACKAGE_BYTE_SIZE,
        ..Default::default()
    };
    Client::connect_with_config(handle.local_addr(), config)
        .await
        .unwrap()
}

/// Helper: connect and open a session of the given tier.
async fn session(handle: &ServerHandle, session_type: SessionType) -> Client {
    let client = connect(handle).await;
    client.create_session(session_type).await.unwrap();
    client
}

/// Helper: references to the document root and its demo object.
async fn demo_references(client: &Client) -> (ObjectReference, ObjectReference) {
    let root = client.document("").await.unwrap();
    let demo = &root.children["demoObject"][0];
    (ObjectReference::from(&root), ObjectReference::from(demo))
}

fn code(err: ClientError) -> StatusCode {
    err.status().map(|s| s.code).unwrap()
}

/// Helper: upload then download `field` at every size around the chunk
/// boundary.
async fn round_trip<T, F>(client: &Client, owner: &ObjectReference, field: &str, make: F)
where
    T: ArrayElement + PartialEq + Debug,
    F: Fn(usize) -> T,
{
    let chunk = chunk_size(PACKAGE_BYTE_SIZE, T::ELEMENT_TYPE);
    for count in [0, 1, chunk.saturating_sub(1), chunk, chunk + 1, 10_000] {
        let values: Vec<T> = (0..count).map(&make).collect();
        let reply = client.set_array(owner, field, values.clone()).await.unwrap();
        assert_eq!(reply.applied, count as u64, "{} x{}", field, count);

        let back: Vec<T> = client.get_array(owner, field).await.unwrap();
        assert_eq!(back, values, "{} x{}", field, count);
    }
}

#[tokio::test]
async fn test_app_info_and_ping() {
    let handle = start_server(test_config()).await;
    let client = connect(&handle).await;

    let info = client.app_info().await.unwrap();
    assert_eq!(info, demo::app_info());
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_calls_require_session() {
    let handle = start_server(test_config()).await;
    let client = connect(&handle).await;

    let err = client.document("").await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);

    client.set_session("not-a-session");
    let err = client.list_documents().await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);
}

#[tokio::test]
async fn test_array_round_trip_every_type() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    round_trip(&client, &demo, "intVector", |i| i as i32 - 5000).await;
    round_trip(&client, &demo, "uint64Vector", |i| i as u64 * 3).await;
    round_trip(&client, &demo, "doubleVector", |i| i as f64 * 0.5).await;
    round_trip(&client, &demo, "floatVector", |i| i as f32 * 0.25).await;
    round_trip(&client, &demo, "stringVector", |i| format!("s{}", i)).await;
    round_trip(&client, &demo, "boolVector", |i| i % 3 == 0).await;
}

#[tokio::test]
async fn test_method_updates_array() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    let before: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(before, vec![42]);

    client
        .execute_method(&demo, "setIntVector", &json!({"values": [42, 43, 44]}))
        .await
        .unwrap();
    let after: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(after, vec![42, 43, 44]);

    let sum = client
        .execute_method(&demo, "sumIntVector", &serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(sum, json!({"total": 129}));
}

#[tokio::test]
async fn test_upload_replaces_array() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    let before: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(before, vec![42]);

    let reply = client.set_array(&demo, "intVector", vec![42, 43, 44]).await.unwrap();
    assert_eq!(reply.applied, 3);

    let after: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(after, vec![42, 43, 44]);

    let other = session(&handle, SessionType::Observing).await;
    let seen: Vec<i32> = other.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(seen, vec![42, 43, 44]);
}

#[tokio::test]
async fn test_method_failures() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    let err = client
        .execute_method(&demo, "scaleIntVector", &json!({"factor": 0}))
        .await
        .unwrap_err();
    let status = err.status().cloned().unwrap();
    assert_eq!(status.code, StatusCode::FailedPrecondition);
    assert!(status.message.contains("non-zero"));

    let err = client
        .execute_method(&demo, "missing", &serde_json::Value::Null)
        .await
        .unwrap_err();
    assert_eq!(code(err), StatusCode::NotFound);

    let methods = client.list_methods(&demo).await.unwrap();
    let names: Vec<&str> = methods.iter().map(|m| m.keyword.as_str()).collect();
    assert_eq!(names, vec!["setIntVector", "sumIntVector", "scaleIntVector"]);
}

#[tokio::test]
async fn test_field_errors() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    let err = client.get_array_values(&demo, "missing").await.unwrap_err();
    assert_eq!(code(err), StatusCode::NotFound);

    let err = client.get_array_values(&demo, "intField").await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unimplemented);

    let err = client
        .set_value(&demo, "name", &json!("renamed"))
        .await
        .unwrap_err();
    assert_eq!(code(err), StatusCode::FailedPrecondition);

    let err = client.get_element(&demo, "intVector", 7).await.unwrap_err();
    assert_eq!(code(err), StatusCode::OutOfRange);

    let gone = ObjectReference::new(demo::OBJECT_CLASS, "no-such-uuid");
    let err = client.get_value(&gone, "intVector").await.unwrap_err();
    assert_eq!(code(err), StatusCode::NotFound);
}

#[tokio::test]
async fn test_scalar_values() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    client.set_value(&demo, "intField", &json!(7)).await.unwrap();
    assert_eq!(client.get_value(&demo, "intField").await.unwrap(), json!(7));

    client
        .set_element(&demo, "intVector", 0, &json!(-1))
        .await
        .unwrap();
    assert_eq!(
        client.get_element(&demo, "intVector", 0).await.unwrap(),
        json!(-1)
    );
}

#[tokio::test]
async fn test_regular_session_is_exclusive() {
    let config = ServerConfig {
        session_timeout_ms: 300,
        ..test_config()
    };
    let handle = start_server(config).await;
    let first = session(&handle, SessionType::Regular).await;
    let second = connect(&handle).await;

    assert!(!second.ready_for_session(SessionType::Regular).await.unwrap());
    assert!(second.ready_for_session(SessionType::Observing).await.unwrap());
    let err = second
        .create_session(SessionType::Regular)
        .await
        .unwrap_err();
    assert_eq!(code(err), StatusCode::FailedPrecondition);

    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(second.ready_for_session(SessionType::Regular).await.unwrap());
    second.create_session(SessionType::Regular).await.unwrap();
    let err = first.check_session().await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);
}

#[tokio::test]
async fn test_observing_session_is_read_only() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Observing).await;
    let (root, demo) = demo_references(&client).await;

    let values: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(values, vec![42]);
    client
        .execute_method(&demo, "sumIntVector", &serde_json::Value::Null)
        .await
        .unwrap();

    let err = client.set_value(&demo, "intField", &json!(1)).await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);

    let err = client
        .set_array(&demo, "intVector", vec![1, 2])
        .await
        .unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);

    let err = client
        .execute_method(&demo, "setIntVector", &json!({"values": [1]}))
        .await
        .unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);

    let err = client.clear_child_objects(&root, "items").await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);

    let values: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(values, vec![42]);
}

#[tokio::test]
async fn test_change_and_destroy_session() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Observing).await;
    let (_, demo) = demo_references(&client).await;

    let changed = client.change_session(SessionType::Regular).await.unwrap();
    assert_eq!(changed.session_type, SessionType::Regular);
    client.set_value(&demo, "intField", &json!(3)).await.unwrap();
    client.keep_alive().await.unwrap();

    client.destroy_session().await.unwrap();
    assert!(client.session().is_empty());
    let err = client.get_value(&demo, "intField").await.unwrap_err();
    assert_eq!(code(err), StatusCode::Unauthenticated);
}

#[tokio::test]
async fn test_reads_never_observe_partial_upload() {
    const COUNT: usize = 1_000;
    let handle = start_server(test_config()).await;
    let writer = session(&handle, SessionType::Regular).await;
    let reader = session(&handle, SessionType::Observing).await;
    let (_, demo) = demo_references(&writer).await;

    writer.set_array(&demo, "intVector", vec![0i32; COUNT]).await.unwrap();

    let upload = writer
        .open_upload(&demo, "intVector", ElementType::Int32, COUNT as u64)
        .unwrap();
    let chunk = chunk_size(PACKAGE_BYTE_SIZE, ElementType::Int32);
    for part in ArrayValues::Int32(vec![1i32; COUNT]).into_chunks(chunk) {
        upload.send(part).unwrap();
    }
    // Every chunk is on the server; the stream is still open.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..3 {
        let values: Vec<i32> = reader.get_array(&demo, "intVector").await.unwrap();
        assert_eq!(values, vec![0i32; COUNT]);
    }

    let reply = upload.finish().await.unwrap();
    assert_eq!(reply.applied, COUNT as u64);
    let values: Vec<i32> = reader.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(values, vec![1i32; COUNT]);
}

#[tokio::test]
async fn test_cancelled_upload_leaves_field_unchanged() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    {
        let upload = client
            .open_upload(&demo, "intVector", ElementType::Int32, 3)
            .unwrap();
        upload.send(ArrayValues::Int32(vec![7, 8])).unwrap();
    }

    let values: Vec<i32> = client.get_array(&demo, "intVector").await.unwrap();
    assert_eq!(values, vec![42]);
}

#[tokio::test]
async fn test_oversized_upload_is_refused() {
    let config = ServerConfig {
        max_array_elements: 100,
        ..test_config()
    };
    let handle = start_server(config).await;
    let client = session(&handle, SessionType::Regular).await;
    let (_, demo) = demo_references(&client).await;

    let upload = client
        .open_upload(&demo, "intVector", ElementType::Int32, u64::MAX)
        .unwrap();
    let err = upload.finish().await.unwrap_err();
    assert_eq!(code(err), StatusCode::OutOfRange);

    let err = client.set_array(&demo, "intVector", vec![1i32; 101]).await.unwrap_err();
    assert_eq!(code(err), StatusCode::OutOfRange);

    client.set_array(&demo, "intVector", vec![1i32; 100]).await.unwrap();
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_child_object_editing() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Regular).await;
    let (root, _) = demo_references(&client).await;

    let item = ObjectSnapshot::reference(demo::OBJECT_CLASS, "item-1");
    let item_ref = ObjectReference::from(&item);

    let err = client.get_value(&item_ref, "intVector").await.unwrap_err();
    assert_eq!(code(err), StatusCode::NotFound);

    client
        .insert_child_object(&root, "items", 0, &item)
        .await
        .unwrap();
    let values: Vec<i32> = client.get_array(&item_ref, "intVector").await.unwrap();
    assert_eq!(values, vec![42]);

    let children = client.child_objects(&root, "items", false).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].uuid, "item-1");
    let copies = client.child_objects(&root, "items", true).await.unwrap();
    assert_eq!(copies[0].fields["intVector"], json!([42]));

    let err = client.remove_child_object(&root, "items", 3).await.unwrap_err();
    assert_eq!(code(err), StatusCode::OutOfRange);
    client.remove_child_object(&root, "items", 0).await.unwrap();

    let err = client.get_value(&item_ref, "intVector").await.unwrap_err();
    assert_eq!(code(err), StatusCode::NotFound);
    assert!(client.child_objects(&root, "items", false).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_documents() {
    let handle = start_server(test_config()).await;
    let client = session(&handle, SessionType::Observing).await;

    assert_eq!(
        client.list_documents().await.unwrap(),
        vec![demo::DOCUMENT_ID.to_string()]
    );
    let root = client.document(demo::DOCUMENT_ID).await.unwrap();
    assert_eq!(root.keyword, demo::DOCUMENT_CLASS);

    let err = client.document("elsewhere").await.unwrap_err();
    assert_eq!(code(err), StatusCode::NotFound);
}

#[tokio::test]
async fn test_quit_stops_server() {
    let handle = start_server(test_config()).await;
    let addr = handle.local_addr();
    let client = connect(&handle).await;

    client.quit().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();

    assert!(Client::connect(addr).await.is_err());
}
