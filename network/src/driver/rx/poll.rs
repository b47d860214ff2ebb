//! Lazy receive drain.

use super::queue::RxQueue;
use super::REFRESH_BATCH;
use crate::descriptor::RxDescriptor;
use crate::device::Doorbell;
use crate::dma::DmaPlatform;
use crate::driver::QueueEnv;
use crate::types::{RxBuffer, RxPacket};

/// Iterator over completed packets of one [`RxQueue`].
///
/// Each `next()` consumes descriptors until a whole packet is assembled,
/// the device has nothing more, or `budget` descriptors have been
/// consumed. Slots are refilled every [`REFRESH_BATCH`] descriptors and
/// once more when the drain ends, including when the iterator is dropped
/// early.
pub struct RxPoll<'q, 'e, B, D, P, H>
where
    B: RxBuffer,
    D: RxDescriptor,
    P: DmaPlatform<Buffer = B>,
    H: Doorbell,
{
    queue: &'q mut RxQueue<B, D>,
    env: QueueEnv<'e, P, H>,
    budget: usize,
    processed: usize,
    since_refill: usize,
    finished: bool,
}

impl<'q, 'e, B, D, P, H> RxPoll<'q, 'e, B, D, P, H>
where
    B: RxBuffer,
    D: RxDescriptor,
    P: DmaPlatform<Buffer = B>,
    H: Doorbell,
{
    pub(super) fn new(queue: &'q mut RxQueue<B, D>, env: QueueEnv<'e, P, H>, budget: usize) -> Self {
        Self {
            queue,
            env,
            budget,
            processed: 0,
            since_refill: 0,
            finished: false,
        }
    }

    /// Descriptors consumed so far.
    pub fn processed(&self) -> usize {
        self.processed
    }

    fn finish(&mut self) {
        self.finished = true;
        if self.processed > 0 {
            self.queue.refill(usize::MAX, &self.env);
        }
    }
}

impl<B, D, P, H> Iterator for RxPoll<'_, '_, B, D, P, H>
where
    B: RxBuffer,
    D: RxDescriptor,
    P: DmaPlatform<Buffer = B>,
    H: Doorbell,
{
    type Item = RxPacket<B>;

    fn next(&mut self) -> Option<RxPacket<B>> {
        while !self.finished {
            if self.processed >= self.budget {
                self.finish();
                break;
            }
            let Some((index, wb)) = self.queue.take_writeback() else {
                self.finish();
                break;
            };
            self.processed += 1;
            let packet = self.queue.consume(index, &wb, &self.env);

            self.since_refill += 1;
            if self.since_refill == REFRESH_BATCH {
                self.queue.refill(usize::MAX, &self.env);
                self.since_refill = 0;
            }
            if packet.is_some() {
                return packet;
            }
        }
        None
    }
}

impl<B, D, P, H> Drop for RxPoll<'_, '_, B, D, P, H>
where
    B: RxBuffer,
    D: RxDescriptor,
    P: DmaPlatform<Buffer = B>,
    H: Doorbell,
{
    fn drop(&mut self) {
        if !self.finished {
            self.finish();
        }
    }
}
