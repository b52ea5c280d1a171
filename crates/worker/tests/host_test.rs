//! Worker-side dispatcher contract, exercised over the raw transport.

use serde_json::json;
use test_log::test;

use threadmill_protocol::{
    CallId, RequestPayload, WorkerRequest, WorkerSignal, WorkerSpawner,
};
use threadmill_worker::{FunctionRegistry, InProcessSpawner};

fn calculator() -> FunctionRegistry {
    FunctionRegistry::new()
        .with_function("add", |inv| async move {
            let a = inv.args[0].as_i64().unwrap_or(0);
            let b = inv.args[1].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        })
        .with_function("fail", |_| async move {
            Err(threadmill_protocol::ErrorPayload::new("Error", "fail"))
        })
        .with_function("explode", |_| async move { panic!("kaboom") })
        .with_function("buffer_len", |inv| async move {
            let total: usize = inv.buffers.iter().map(Vec::len).sum();
            Ok(json!(total))
        })
}

fn request(func: &str, args: Vec<serde_json::Value>) -> (CallId, WorkerRequest) {
    let id = CallId::generate();
    (
        id,
        WorkerRequest {
            payload: RequestPayload {
                func: func.to_string(),
                args,
                id,
            },
            buffers: vec![],
        },
    )
}

#[test(tokio::test)]
async fn replies_with_result_under_the_request_id() {
    let spawner = InProcessSpawner::new(calculator());
    let mut handle = spawner.spawn().await.unwrap();

    let (id, req) = request("add", vec![json!(1), json!(2)]);
    handle.requests.send(req).unwrap();

    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Message(response) => {
            assert_eq!(response.id, id);
            assert_eq!(response.into_outcome().unwrap(), json!(3));
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}

#[test(tokio::test)]
async fn unknown_function_is_an_error_reply_and_worker_survives() {
    let spawner = InProcessSpawner::new(calculator());
    let mut handle = spawner.spawn().await.unwrap();

    let (_, req) = request("missing", vec![]);
    handle.requests.send(req).unwrap();

    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Message(response) => {
            let error = response.into_outcome().unwrap_err();
            assert_eq!(error.message, "Function 'missing' not found in worker.");
        }
        other => panic!("unexpected signal: {other:?}"),
    }

    // Still serving afterwards.
    let (_, req) = request("add", vec![json!(2), json!(2)]);
    handle.requests.send(req).unwrap();
    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Message(response) => {
            assert_eq!(response.into_outcome().unwrap(), json!(4));
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}

#[test(tokio::test)]
async fn handler_error_keeps_name_and_message() {
    let spawner = InProcessSpawner::new(calculator());
    let mut handle = spawner.spawn().await.unwrap();

    let (_, req) = request("fail", vec![]);
    handle.requests.send(req).unwrap();

    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Message(response) => {
            let error = response.into_outcome().unwrap_err();
            assert_eq!(error.name, "Error");
            assert_eq!(error.message, "fail");
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}

#[test(tokio::test)]
async fn panicking_handler_crashes_the_worker() {
    let spawner = InProcessSpawner::new(calculator());
    let mut handle = spawner.spawn().await.unwrap();

    let (_, req) = request("explode", vec![]);
    handle.requests.send(req).unwrap();

    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Crash(error) => {
            assert!(error.message.contains("kaboom"), "got: {}", error.message);
        }
        other => panic!("unexpected signal: {other:?}"),
    }
    // Crash is terminal: the signal channel closes without an Exit.
    assert!(handle.signals.recv().await.is_none());
}

#[test(tokio::test)]
async fn terminate_signal_exits_cleanly() {
    let spawner = InProcessSpawner::new(calculator());
    let mut handle = spawner.spawn().await.unwrap();

    handle.shutdown.cancel();
    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Exit => {}
        other => panic!("unexpected signal: {other:?}"),
    }
}

#[test(tokio::test)]
async fn moved_buffers_reach_the_handler() {
    let spawner = InProcessSpawner::new(calculator());
    let mut handle = spawner.spawn().await.unwrap();

    let id = CallId::generate();
    handle
        .requests
        .send(WorkerRequest {
            payload: RequestPayload {
                func: "buffer_len".to_string(),
                args: vec![json!({"parts": 2})],
                id,
            },
            buffers: vec![vec![0u8; 16], vec![0u8; 8]],
        })
        .unwrap();

    match handle.signals.recv().await.unwrap() {
        WorkerSignal::Message(response) => {
            assert_eq!(response.into_outcome().unwrap(), json!(24));
        }
        other => panic!("unexpected signal: {other:?}"),
    }
}
