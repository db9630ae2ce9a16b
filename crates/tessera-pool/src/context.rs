//! Cancellation and deadlines for pool operations.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

struct Node {
    cancelled: watch::Sender<bool>,
    deadline: Option<Instant>,
    children: Mutex<Vec<Weak<Node>>>,
}

impl Node {
    fn new(deadline: Option<Instant>, cancelled: bool) -> Arc<Self> {
        let (tx, _) = watch::channel(cancelled);
        Arc::new(Self {
            cancelled: tx,
            deadline,
            children: Mutex::new(Vec::new()),
        })
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    fn cancel(&self) {
        if self.cancelled.send_replace(true) {
            return;
        }
        let children = std::mem::take(&mut *self.children.lock().expect("context lock poisoned"));
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cancellation token with an optional deadline.
///
/// Cancelling a context cancels every context derived from it with
/// [`Context::child`]; cancelling a child leaves the parent untouched. A
/// child never outlives its parent's deadline.
#[derive(Clone)]
pub struct Context {
    node: Arc<Node>,
}

impl Context {
    /// A context that is never cancelled unless [`Context::cancel`] is called.
    pub fn background() -> Self {
        Self {
            node: Node::new(None, false),
        }
    }

    /// A context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            node: Node::new(Some(Instant::now() + timeout), false),
        }
    }

    /// Derive a context cancelled together with this one.
    pub fn child(&self) -> Self {
        self.derive(self.node.deadline)
    }

    /// Derive a context that also expires after `timeout`.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.node.deadline {
            Some(parent) => parent.min(own),
            None => own,
        };
        self.derive(Some(deadline))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        let mut children = self.node.children.lock().expect("context lock poisoned");
        let node = Node::new(deadline, self.node.is_cancelled());
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&node));
        Self { node }
    }

    pub fn cancel(&self) {
        self.node.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.node.deadline
    }

    /// Whether the context was cancelled or its deadline has passed.
    pub fn is_done(&self) -> bool {
        self.node.is_cancelled() || self.node.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Completes once the context is cancelled or its deadline passes.
    pub async fn done(&self) {
        let mut rx = self.node.cancelled.subscribe();
        match self.node.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = rx.wait_for(|c| *c) => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => {
                let _ = rx.wait_for(|c| *c).await;
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.node.is_cancelled())
            .field("deadline", &self.node.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_reaches_children_not_parents() {
        let root = Context::background();
        let child = root.child();
        let grandchild = child.child();
        let sibling = root.child();

        child.cancel();
        assert!(child.is_done());
        assert!(grandchild.is_done());
        assert!(!root.is_done());
        assert!(!sibling.is_done());

        grandchild.done().await;
    }

    #[tokio::test]
    async fn child_of_cancelled_context_is_born_done() {
        let root = Context::background();
        root.cancel();
        assert!(root.child().is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_completes_done() {
        let ctx = Context::with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_done());
        ctx.done().await;
        assert!(ctx.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn child_inherits_earlier_deadline() {
        let parent = Context::with_timeout(Duration::from_millis(10));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        child.done().await;
        assert!(parent.is_done());
    }

    #[tokio::test]
    async fn done_wakes_waiting_task() {
        let ctx = Context::background();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };
        tokio::task::yield_now().await;
        ctx.cancel();
        waiter.await.unwrap();
    }
}
