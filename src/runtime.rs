//! Process-wide tokio runtime for front ends that call in from synchronous code
//! (desktop shells, FFI through the static/dynamic library builds).

use crate::error::{ConsoleError, ConsoleResult};
use parking_lot::{const_mutex, Mutex};
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

static RUNTIME: Mutex<Option<Arc<Runtime>>> = const_mutex(None);

pub fn async_init() -> ConsoleResult<()> {
    let mut rt_lock = RUNTIME.lock();
    if rt_lock.is_some() {
        return Ok(());
    }
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("allsafe")
        .build()
        .map_err(|e| ConsoleError::Runtime(e.to_string()))?;
    *rt_lock = Some(Arc::new(rt));
    Ok(())
}

fn runtime() -> ConsoleResult<Arc<Runtime>> {
    RUNTIME
        .lock()
        .as_ref()
        .cloned()
        .ok_or_else(|| ConsoleError::Runtime("runtime not initialized".to_string()))
}

/// Blocks the calling thread until `async_fn` completes. Must not be called from inside the runtime.
pub fn async_exec<F>(async_fn: F) -> ConsoleResult<F::Output>
where
    F: Future,
{
    Ok(runtime()?.block_on(async_fn))
}

pub fn async_spawn<F>(async_fn: F) -> ConsoleResult<JoinHandle<()>>
where
    F: Future<Output = ()> + 'static + Send,
{
    Ok(runtime()?.spawn(async_fn))
}
