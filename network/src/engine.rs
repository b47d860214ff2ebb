//! The multi-queue engine.
//!
//! Owns one [`QueueInterruptContext`] per queue plus the collaborators
//! every ring operation needs. Entry points are spread over the modules
//! that implement them:
//!
//! | Entry point | Module |
//! |-------------|--------|
//! | `submit` | [`crate::dispatch`] |
//! | `handle_interrupt`, `run` | [`crate::interrupt`] |
//! | `watchdog_tick` | [`crate::watchdog`] |
//! | `new`, `configure`, `reset`, `shutdown` | here |

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::EngineConfig;
use crate::descriptor::{Advanced, DescriptorFamily};
use crate::device::{DeviceOps, Upstream};
use crate::dispatch::Dispatcher;
use crate::dma::DmaPlatform;
use crate::driver::{RxQueue, TxQueue};
use crate::error::SetupError;
use crate::interrupt::{DispatchState, QueueInterruptContext};
use crate::stats::{add, CounterSnapshot};
use crate::types::{OffloadFlags, QueueId};

/// Multi-queue TX/RX engine over one device.
pub struct Engine<P, H, U, F = Advanced>
where
    P: DmaPlatform,
    H: DeviceOps,
    U: Upstream<P::Buffer>,
    F: DescriptorFamily,
{
    /// Current configuration; rings are rebuilt from it on reset.
    pub(crate) config: EngineConfig,
    /// Mapping and buffer services.
    pub(crate) platform: P,
    /// Registers and scheduling.
    pub(crate) device: H,
    /// Receives completed packets.
    pub(crate) upstream: U,
    /// One context per queue, indexed by queue id.
    pub(crate) queues: Vec<QueueInterruptContext<P, F>>,
    /// Queue selection and the active-queue mask.
    pub(crate) dispatcher: Dispatcher,
    /// Every queue hung at once; cleared only by `reset`.
    pub(crate) wedged: AtomicBool,
}

impl<P, H, U, F> Engine<P, H, U, F>
where
    P: DmaPlatform,
    H: DeviceOps,
    U: Upstream<P::Buffer>,
    F: DescriptorFamily,
{
    /// Build every queue and post the receive rings.
    pub fn new(config: EngineConfig, platform: P, device: H, upstream: U) -> Result<Self, SetupError> {
        config.validate()?;
        let queues = config
            .queues
            .iter()
            .enumerate()
            .map(|(i, ring)| QueueInterruptContext::new(QueueId(i as u16), ring))
            .collect();
        let engine = Self {
            dispatcher: Dispatcher::new(config.num_queues()),
            config,
            platform,
            device,
            upstream,
            queues,
            wedged: AtomicBool::new(false),
        };

        // On error the partially built engine drops and releases buffers.
        for ctx in &engine.queues {
            ctx.rx.lock().setup(&ctx.env(&engine.platform, &engine.device))?;
        }
        log::info!(
            "nicring: {} queues up ({} descriptors)",
            engine.queues.len(),
            F::NAME
        );
        Ok(engine)
    }

    /// Number of queues.
    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn device(&self) -> &H {
        &self.device
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Context of queue `id`.
    pub fn queue(&self, id: QueueId) -> Option<&QueueInterruptContext<P, F>> {
        self.queues.get(id.index())
    }

    /// Counter snapshot of queue `id`.
    pub fn counters(&self, id: QueueId) -> Option<CounterSnapshot> {
        self.queue(id).map(|ctx| ctx.counters.snapshot())
    }

    /// Every queue was found hung and no reset has happened since.
    pub fn is_wedged(&self) -> bool {
        self.wedged.load(Ordering::Acquire)
    }

    /// Change one queue's ring size and offloads, rebuilding its rings.
    /// Packets still pending for the queue are kept.
    pub fn configure(&mut self, id: QueueId, ring_size: u16, offload: OffloadFlags) -> Result<(), SetupError> {
        self.config.configure(id, ring_size, offload)?;
        let ctx = &self.queues[id.index()];
        self.quiesce(ctx);
        self.rebuild(ctx)?;
        log::debug!("{}: reconfigured, {} descriptors, offload {:?}", id, ring_size, offload);
        Ok(())
    }

    /// Tear down and rebuild every queue from the configuration, then
    /// clear the wedge latch. Pending packets survive.
    pub fn reset(&self) -> Result<(), SetupError> {
        log::info!("nicring: resetting {} queues", self.queues.len());
        for ctx in &self.queues {
            self.quiesce(ctx);
        }
        for ctx in &self.queues {
            self.rebuild(ctx)?;
        }
        self.wedged.store(false, Ordering::Release);
        Ok(())
    }

    /// Close every queue, drain it, and release all buffers, mappings
    /// and pending packets. Safe to call more than once.
    pub fn shutdown(&self) {
        for ctx in &self.queues {
            if !self.quiesce(ctx) {
                continue;
            }
            let dropped = ctx.drop_pending();
            if dropped > 0 {
                add(&ctx.counters.pending_dropped, dropped as u64);
                log::debug!("{}: dropped {} pending packets", ctx.id(), dropped);
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TEARDOWN / REBUILD
    // ═══════════════════════════════════════════════════════════════════════

    /// Close `ctx`, mask its vector, deliver or reclaim whatever already
    /// completed, then release everything still on the rings. Returns
    /// false if the queue was already closed.
    pub(crate) fn quiesce(&self, ctx: &QueueInterruptContext<P, F>) -> bool {
        let Some(previous) = ctx.close() else {
            return false;
        };
        // A deferred dispatch already holds a mask level.
        if previous != DispatchState::Deferred {
            ctx.mask(&self.device);
        }
        self.dispatcher.deactivate(ctx.id());
        let env = ctx.env(&self.platform, &self.device);

        let mut rx = ctx.rx.lock();
        for packet in rx.poll(usize::MAX, env) {
            self.upstream.deliver(ctx.id(), packet);
        }
        let rx_released = rx.teardown(&env);
        drop(rx);

        let mut tx = ctx.tx.lock();
        let tx_released = tx.teardown(&env);
        drop(tx);

        log::debug!(
            "{}: down, released {} rx buffers and {} tx packets",
            ctx.id(),
            rx_released,
            tx_released
        );
        true
    }

    /// Fresh rings for a closed queue, then reopen it.
    fn rebuild(&self, ctx: &QueueInterruptContext<P, F>) -> Result<(), SetupError> {
        let id = ctx.id();
        let ring = &self.config.queues[id.index()];
        *ctx.tx.lock() = TxQueue::new(id, ring);
        {
            let mut rx = ctx.rx.lock();
            *rx = RxQueue::new(id, ring);
            rx.setup(&ctx.env(&self.platform, &self.device))?;
        }
        ctx.stall.clear();
        ctx.clear_start();
        ctx.reopen();
        self.dispatcher.activate(id);
        ctx.unmask(&self.device);
        Ok(())
    }
}

impl<P, H, U, F> Drop for Engine<P, H, U, F>
where
    P: DmaPlatform,
    H: DeviceOps,
    U: Upstream<P::Buffer>,
    F: DescriptorFamily,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
