//! The in-worker serve loop.
//!
//! One loop per worker: receive a request, look the function up, run it,
//! reply under the request's correlation id. The loop processes one request
//! at a time, matching the coordinator's one-outstanding-call-per-worker
//! contract.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, trace};

use threadmill_protocol::{
    ErrorPayload, ResponsePayload, WorkerEndpoint, WorkerRequest, WorkerSignal,
};

use crate::registry::{FunctionRegistry, Invocation};

/// Run the worker side of the contract until terminated.
///
/// Replies carry exactly one of result/error. An unknown function name is
/// an ordinary error reply and the loop keeps serving; a panicking handler
/// is a crash signal and the loop exits, leaving replacement to the pool.
pub async fn serve(registry: Arc<FunctionRegistry>, endpoint: WorkerEndpoint) {
    let WorkerEndpoint {
        mut requests,
        signals,
        shutdown,
    } = endpoint;

    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("worker terminate signal received");
                break;
            }
            request = requests.recv() => match request {
                Some(request) => request,
                None => {
                    debug!("request channel closed");
                    break;
                }
            },
        };

        let WorkerRequest { payload, buffers } = request;
        trace!(call = %payload.id, func = %payload.func, "request received");

        let response = match registry.get(&payload.func) {
            None => ResponsePayload::failure(
                payload.id,
                ErrorPayload::function_not_found(&payload.func),
            ),
            Some(handler) => {
                let invocation = Invocation {
                    args: payload.args,
                    buffers,
                };
                match AssertUnwindSafe(handler(invocation)).catch_unwind().await {
                    Ok(Ok(result)) => ResponsePayload::success(payload.id, result),
                    Ok(Err(error)) => ResponsePayload::failure(payload.id, error),
                    Err(panic) => {
                        // A panicked handler leaves the worker in an unknown
                        // state: report the crash and die.
                        let message = panic_message(panic);
                        let _ = signals.send(WorkerSignal::Crash(ErrorPayload::crash(format!(
                            "handler '{}' panicked: {message}",
                            payload.func
                        ))));
                        return;
                    }
                }
            }
        };

        if signals.send(WorkerSignal::Message(response)).is_err() {
            break;
        }
    }

    let _ = signals.send(WorkerSignal::Exit);
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
