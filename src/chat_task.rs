// src/chat_task.rs
// Chat Task Manager (§4.6): at most one in-flight LLM task per session.

use crate::models::Id;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct TaskEntry {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

#[derive(Clone)]
pub struct ChatTaskManager {
    tasks: Arc<Mutex<HashMap<Id, TaskEntry>>>,
}

impl ChatTaskManager {
    pub fn new() -> Self {
        Self { tasks: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Cancels any in-flight task for `session_id`, awaits its teardown, then
    /// spawns `work` under a fresh cancellation token.
    pub async fn start<F, Fut>(&self, session_id: Id, work: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.cancel(session_id).await;

        let cancel = CancellationToken::new();
        let cancel_for_task = cancel.clone();
        let tasks = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            work(cancel_for_task).await;
            tasks.lock().await.remove(&session_id);
        });

        self.tasks.lock().await.insert(session_id, TaskEntry { handle, cancel });
    }

    /// Signals and awaits the in-flight task for `session_id`, if any.
    pub async fn cancel(&self, session_id: Id) {
        let entry = self.tasks.lock().await.remove(&session_id);
        if let Some(entry) = entry {
            entry.cancel.cancel();
            debug!(%session_id, "canceling in-flight chat task");
            let _ = entry.handle.await;
        }
    }

    pub async fn has_active_task(&self, session_id: Id) -> bool {
        self.tasks.lock().await.contains_key(&session_id)
    }

    /// Signals and awaits every in-flight task, for graceful shutdown. Callers
    /// should bound this with a timeout since a misbehaving task could hang.
    pub async fn cancel_all(&self) {
        let entries: Vec<TaskEntry> = self.tasks.lock().await.drain().map(|(_, entry)| entry).collect();
        debug!(count = entries.len(), "canceling all in-flight chat tasks for shutdown");
        for entry in entries {
            entry.cancel.cancel();
            let _ = entry.handle.await;
        }
    }
}

impl Default for ChatTaskManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    #[tokio::test]
    async fn starting_a_second_task_cancels_the_first() {
        let manager = ChatTaskManager::new();
        let session_id = Uuid::new_v4();
        let first_canceled = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&first_canceled);
        manager
            .start(session_id, move |cancel| async move {
                cancel.cancelled().await;
                flag.store(true, Ordering::SeqCst);
            })
            .await;

        manager.start(session_id, |_cancel| async move {}).await;

        assert!(first_canceled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn at_most_one_task_per_session() {
        let manager = ChatTaskManager::new();
        let session_id = Uuid::new_v4();

        manager
            .start(session_id, |cancel| async move {
                cancel.cancelled().await;
            })
            .await;
        assert!(manager.has_active_task(session_id).await);

        manager.cancel(session_id).await;
        assert!(!manager.has_active_task(session_id).await);
    }
}
