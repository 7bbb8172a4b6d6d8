//! Render requests for mounted proxies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use super::proxy::StateProxy;
use crate::scheduler::{Priority, Scheduler};

/// Called with the proxy whenever its state implies a re-render.
///
/// A render callback must not write to the proxy it renders.
pub type RenderFn = Arc<dyn Fn(&StateProxy) + Send + Sync>;

#[derive(Clone)]
pub(super) struct Mount {
    render: RenderFn,
    scheduler: Option<Scheduler>,
    /// A render task is queued and has not run yet.
    frame_pending: Arc<AtomicBool>,
}

impl StateProxy {
    /// Attach a render callback and render once, synchronously.
    ///
    /// With a scheduler, later renders are queued on the animation lane, at
    /// most one per pending frame. Without one they run inline after each
    /// mutation.
    pub fn mount<F>(&self, render: F, scheduler: Option<Scheduler>)
    where
        F: Fn(&StateProxy) + Send + Sync + 'static,
    {
        let render: RenderFn = Arc::new(render);
        *self.inner.mount.lock() = Some(Mount {
            render: render.clone(),
            scheduler,
            frame_pending: Arc::new(AtomicBool::new(false)),
        });
        debug!("mounted state proxy");
        render(self);
    }

    /// Detach the render callback. Returns `false` if nothing was mounted.
    pub fn unmount(&self) -> bool {
        let removed = self.inner.mount.lock().take();
        removed.is_some()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mount.lock().is_some()
    }

    pub(super) fn request_render(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.transaction_depth > 0 {
                state.render_deferred = true;
                return;
            }
        }
        let Some(mount) = self.inner.mount.lock().clone() else {
            return;
        };

        let Some(scheduler) = mount.scheduler else {
            (mount.render)(self);
            return;
        };
        if mount.frame_pending.swap(true, Ordering::SeqCst) {
            trace!("render already queued");
            return;
        }

        let proxy = Arc::downgrade(&self.inner);
        let pending = mount.frame_pending;
        scheduler.schedule(
            move || {
                pending.store(false, Ordering::SeqCst);
                let Some(inner) = proxy.upgrade() else {
                    return;
                };
                let proxy = StateProxy { inner };
                let mount = proxy.inner.mount.lock().clone();
                if let Some(mount) = mount {
                    (mount.render)(&proxy);
                }
            },
            Priority::Animation,
        );
    }
}
