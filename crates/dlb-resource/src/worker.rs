//! Background worker that finishes deferred map and unmap procedures.
//!
//! The manager asks for the worker through the platform's
//! `worker_active`/`schedule_work` hooks whenever a map or unmap is left in
//! progress. [`SweepWorker`] implements those hooks on top of a tokio task:
//! once scheduled it keeps sweeping until nothing is outstanding, then
//! parks until the next request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dlb_hw::WorkScheduler;
use log::{debug, info};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

use crate::mgr::DlbResourceMgr;

/// Completion worker shared between the manager's platform hooks and the
/// task that runs the sweeps.
#[derive(Debug, Default)]
pub struct SweepWorker {
    active: AtomicBool,
    stopping: AtomicBool,
    notify: Notify,
}

impl SweepWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Spawns [`SweepWorker::run`] on the current runtime.
    pub fn spawn(self: &Arc<Self>, mgr: Arc<Mutex<DlbResourceMgr>>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(mgr))
    }

    /// Asks the task to exit once its current pass is done.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Sweeps `mgr` every time the worker is scheduled.
    pub async fn run(self: Arc<Self>, mgr: Arc<Mutex<DlbResourceMgr>>) {
        let interval = Duration::from_millis(mgr.lock().await.config().sweep_interval_ms);
        info!("sweep worker started ({:?} between passes)", interval);

        loop {
            self.notify.notified().await;
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            let mut passes = 0u32;
            loop {
                passes += 1;
                let mut guard = mgr.lock().await;
                let outstanding = sweep(&mut guard);
                if outstanding == 0 || self.stopping.load(Ordering::SeqCst) {
                    // Cleared under the manager lock: any request made after
                    // this point sees an idle worker and schedules again.
                    self.active.store(false, Ordering::SeqCst);
                    break;
                }
                drop(guard);
                tokio::time::sleep(interval).await;
            }
            debug!("sweep worker idle after {} passes", passes);

            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
        }
        info!("sweep worker stopped");
    }
}

/// One unmap sweep followed by one map sweep. Returns the procedures
/// still outstanding in domains that have not faulted.
fn sweep(mgr: &mut DlbResourceMgr) -> u32 {
    mgr.finish_unmap_qid_procedures() + mgr.finish_map_qid_procedures()
}

impl WorkScheduler for SweepWorker {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn schedule(&self) {
        self.active.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}
