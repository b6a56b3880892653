mod common;

use std::time::Duration;

use comfyui_job_gateway::comfyui::{Engine, FileType, HistoryOutcome, OutputFile};
use comfyui_job_gateway::workflow::{Graph, NodeDescriptor};
use comfyui_job_gateway::{AppError, ComfyUIClient};
use serde_json::json;

fn graph(class_type: &str) -> Graph {
    let mut graph = Graph::new();
    graph.insert("1", NodeDescriptor::new(class_type).with_input("text", json!("hello")));
    graph
}

#[tokio::test]
async fn submit_then_poll_until_outputs() {
    let (addr, engine) = common::spawn().await;
    let client = ComfyUIClient::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

    let queued = client.submit(&graph("CLIPTextEncode"), "test-client").await.unwrap();
    assert_eq!(queued.prompt_id, "p-1");
    assert_eq!(engine.prompts.lock().unwrap()[0]["1"]["inputs"]["text"], "hello");

    for _ in 0..common::PENDING_POLLS {
        assert!(client.history(&queued.prompt_id).await.unwrap().is_none());
    }
    let entry = client.history(&queued.prompt_id).await.unwrap().unwrap();
    match entry.outcome() {
        HistoryOutcome::Completed(files) => {
            assert_eq!(files.len(), 1);
            assert_eq!(files[0].filename, "clip.mp4");
            let bytes = client.view(&files[0]).await.unwrap();
            assert_eq!(bytes, b"MP4DATA");
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[tokio::test]
async fn validation_errors_become_graph_rejected() {
    let (addr, engine) = common::spawn().await;
    let client = ComfyUIClient::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

    let err = client.submit(&graph("Broken"), "test-client").await.unwrap_err();
    match err {
        AppError::GraphRejected { message, node_errors } => {
            assert_eq!(message, "Prompt outputs failed validation");
            assert_eq!(node_errors["1"]["errors"][0]["type"], "value_not_in_list");
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(engine.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_file_and_upload() {
    let (addr, engine) = common::spawn().await;
    let client = ComfyUIClient::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();

    let missing = OutputFile::new("nope.png", "", FileType::Temp);
    assert_eq!(client.view(&missing).await.unwrap_err().kind(), "not_found");

    let name = client.upload_image("input.png", b"PNGDATA".to_vec()).await.unwrap();
    assert_eq!(name, "staged.png");
    {
        let uploads = engine.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert!(String::from_utf8_lossy(&uploads[0]).contains("PNGDATA"));
    }

    assert!(client.system_stats().await.unwrap().get("system").is_some());
}

#[tokio::test]
async fn refused_connection_is_engine_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = ComfyUIClient::new(&format!("http://{}", addr), Duration::from_secs(2)).unwrap();

    let err = client.submit(&graph("CLIPTextEncode"), "test-client").await.unwrap_err();
    assert_eq!(err.kind(), "engine_unavailable");
    let err = client.history("p-1").await.unwrap_err();
    assert!(err.is_transient());
}
