#![allow(dead_code)]

use http::Method;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use switchyard::{Body, DispatchError, Dispatcher, HandlerResponse, HeaderVec, RuntimeConfig};

static LOGGING: Once = Once::new();

/// Route test output through the test harness writer, once per binary.
///
/// Honours `RUST_LOG`; quiet by default.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Dispatcher with `workers` blocking threads and default thresholds
pub fn dispatcher(workers: usize) -> Dispatcher {
    init_test_logging();
    let config = RuntimeConfig {
        blocking_workers: workers,
        ..RuntimeConfig::default()
    };
    Dispatcher::new(config).unwrap()
}

/// GET without query, headers or body
pub async fn get(dispatcher: &Dispatcher, path: &str) -> Result<HandlerResponse, DispatchError> {
    send(dispatcher, Method::GET, path, &[]).await
}

/// Request with query pairs, no headers or body
pub async fn send(
    dispatcher: &Dispatcher,
    method: Method,
    path: &str,
    query: &[(&str, &str)],
) -> Result<HandlerResponse, DispatchError> {
    let query = query
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    dispatcher
        .handle(method, path, query, HeaderVec::new(), Body::empty())
        .await
}

/// Shared invocation counter for instrumented providers
#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}
