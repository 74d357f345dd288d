use std::any::Any;
use std::fmt::Debug;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

pub type ActionResult = anyhow::Result<()>;

type ActionBody = dyn Fn() -> ActionResult + Send + Sync;

/// Opaque callable fired by the driver loop.
///
/// Actions are reference counted so that persistent and recurring points can
/// fire the same callable any number of times. They should return quickly:
/// a slow action delays every other entry due in the same tick.
#[derive(Clone)]
pub struct Action {
    label: Arc<str>,
    body: Arc<ActionBody>,
}

impl Action {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Action::fallible(move || {
            f();
            Ok(())
        })
    }

    /// An action whose `Err` is reported like a panic would be.
    pub fn fallible<F>(f: F) -> Self
    where
        F: Fn() -> ActionResult + Send + Sync + 'static,
    {
        Action {
            label: Arc::from("action"),
            body: Arc::new(f),
        }
    }

    /// Names the action in logs and failure notifications.
    pub fn labeled(mut self, label: impl AsRef<str>) -> Self {
        self.label = Arc::from(label.as_ref());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Calls the action without catching panics.
    pub fn call(&self) -> ActionResult {
        (self.body)()
    }

    /// Calls the action, turning an error or a panic into a failure reason.
    pub fn run(&self) -> Result<(), String> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.call())) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(payload) => Err(panic_reason(payload)),
        }
    }

    /// Wraps this action so it becomes a no-op once `guard` returns false.
    pub(crate) fn guarded<G>(&self, guard: G) -> Action
    where
        G: Fn() -> bool + Send + Sync + 'static,
    {
        let inner = self.clone();
        Action {
            label: self.label.clone(),
            body: Arc::new(move || if guard() { inner.call() } else { Ok(()) }),
        }
    }
}

impl<F> From<F> for Action
where
    F: Fn() + Send + Sync + 'static,
{
    fn from(f: F) -> Self {
        Action::new(f)
    }
}

impl Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").field("label", &self.label).finish()
    }
}

fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_owned()
    }
}
