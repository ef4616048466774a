// =============================================================================
// FRAME PRESENTATION LOOP
// =============================================================================
//
// One pass through the loop:
//
//   Idle -> Acquiring -> Recording -> Submitted -> Presenting -> Idle
//                                                           \-> Recreating -> Idle
//
// The loop only sequences the steps. Everything that touches Vulkan lives
// behind `FrameTarget`, which keeps the sequencing testable without a GPU.
//
// Exactly one frame is in flight: the shared fence and semaphore pair is
// reused every pass and the target blocks on the queue after submitting.

use anyhow::Result;

/// Where the loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording { image_index: u32 },
    Submitted { image_index: u32 },
    Presenting { image_index: u32 },
    Recreating,
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    /// The surface changed; the swapchain has to be rebuilt first
    OutOfDate,
}

/// Result of queueing an image for presentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented { suboptimal: bool },
    OutOfDate,
}

/// What one call to `FrameLoop::run_frame` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented { image_index: u32 },
    /// The swapchain bundle was rebuilt. `image_index` is the image that was
    /// rendered and presented before the rebuild, if any.
    Recreated { image_index: Option<u32> },
}

/// The GPU side of one frame.
///
/// Every method except `acquire_next_image` and `present` treats a
/// non-success result as fatal and returns it as an error.
pub trait FrameTarget {
    /// Images in the current swapchain
    fn image_count(&self) -> usize;

    /// Reset the shared fence so the next acquire can signal it
    fn reset_fence(&mut self) -> Result<()>;

    /// Blocks until an image is available or the timeout expires
    fn acquire_next_image(&mut self) -> Result<AcquireOutcome>;

    /// Re-record the fixed draw into the command buffer of `image_index`
    fn record_commands(&mut self, image_index: u32) -> Result<()>;

    /// Submit the command buffer of `image_index` and wait for the queue
    fn submit(&mut self, image_index: u32) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    /// Wait for the shared fence and reset the command buffer of `image_index`
    fn finish_frame(&mut self, image_index: u32) -> Result<()>;

    /// Wait for the device, destroy the swapchain bundle and build a new one
    fn recreate_swapchain(&mut self) -> Result<()>;

    fn wait_queue_idle(&mut self) -> Result<()>;
}

/// Drives a `FrameTarget` one frame at a time
#[derive(Debug, Default)]
pub struct FrameLoop {
    state: FrameState,
    frames_presented: u64,
    recreations: u64,
}

impl FrameLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    /// Run one acquire/record/submit/present pass.
    ///
    /// Out-of-date from acquire or present rebuilds the swapchain bundle and
    /// returns `FrameOutcome::Recreated`. Any error leaves the loop in the
    /// state it failed in and the loop refuses to run again.
    pub fn run_frame<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<FrameOutcome> {
        if self.state != FrameState::Idle {
            anyhow::bail!("Frame loop cannot resume from {:?} after a failed frame", self.state);
        }

        // ─────────────────────────────────────────────────────────────────────
        // Idle -> Acquiring: fence reset strictly before the acquire
        // ─────────────────────────────────────────────────────────────────────
        self.enter(FrameState::Acquiring);
        target.reset_fence()?;

        let image_index = match target.acquire_next_image()? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    log::debug!("Acquired image {} from a suboptimal swapchain", image_index);
                }
                let image_count = target.image_count();
                if image_index as usize >= image_count {
                    anyhow::bail!(
                        "Acquired image index {} but the swapchain has {} images",
                        image_index,
                        image_count
                    );
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                log::info!("Swapchain out of date on acquire, recreating");
                self.recreate(target)?;
                return Ok(FrameOutcome::Recreated { image_index: None });
            }
        };

        self.enter(FrameState::Recording { image_index });
        target.record_commands(image_index)?;

        self.enter(FrameState::Submitted { image_index });
        target.submit(image_index)?;

        self.enter(FrameState::Presenting { image_index });
        let presented = target.present(image_index)?;

        // The command buffer belongs to the current bundle, so it is reset
        // before a rebuild can free it.
        target.finish_frame(image_index)?;

        match presented {
            PresentOutcome::Presented { suboptimal } => {
                if suboptimal {
                    log::debug!("Presented image {} to a suboptimal swapchain", image_index);
                }
                self.frames_presented += 1;
                self.enter(FrameState::Idle);
                Ok(FrameOutcome::Presented { image_index })
            }
            PresentOutcome::OutOfDate => {
                log::info!("Swapchain out of date, trying to remake");
                self.frames_presented += 1;
                self.recreate(target)?;
                Ok(FrameOutcome::Recreated {
                    image_index: Some(image_index),
                })
            }
        }
    }

    /// Wait for the queue to drain, then release the target and everything
    /// it owns.
    pub fn shutdown<T: FrameTarget>(&mut self, mut target: T) -> Result<()> {
        log::info!("Waiting for the queue before releasing Vulkan objects");
        target.wait_queue_idle()?;
        drop(target);
        self.state = FrameState::Idle;
        Ok(())
    }

    fn recreate<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<()> {
        self.enter(FrameState::Recreating);
        target.recreate_swapchain()?;
        self.recreations += 1;
        log::info!(
            "Swapchain rebuilt with {} images (rebuild #{})",
            target.image_count(),
            self.recreations
        );
        self.enter(FrameState::Idle);
        Ok(())
    }

    fn enter(&mut self, next: FrameState) {
        log::trace!("{:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::{HashSet, VecDeque};
    use std::rc::Rc;

    /// (bundle generation, image index)
    type Slot = (u32, u32);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        ResetFence,
        Acquire,
        Record { framebuffer: Slot, command_buffer: Slot },
        Submit { command_buffer: Slot },
        Present { image_index: u32 },
        Finish { command_buffer: Slot },
        WaitDeviceIdle,
        DestroyBundle { generation: u32 },
        BuildBundle { generation: u32, images: usize },
        WaitQueueIdle,
        DestroySync,
    }

    struct Bundle {
        generation: u32,
        images: Vec<Slot>,
        views: Vec<Slot>,
        framebuffers: Vec<Slot>,
        command_buffers: Vec<Slot>,
    }

    impl Bundle {
        fn build(generation: u32, images: usize) -> Self {
            let slots: Vec<Slot> = (0..images as u32).map(|i| (generation, i)).collect();
            Self {
                generation,
                images: slots.clone(),
                views: slots.clone(),
                framebuffers: slots.clone(),
                command_buffers: slots,
            }
        }
    }

    struct FakeTarget {
        log: Rc<RefCell<Vec<Event>>>,
        acquires: VecDeque<AcquireOutcome>,
        presents: VecDeque<PresentOutcome>,
        rebuild_sizes: VecDeque<usize>,
        bundle: Option<Bundle>,
        destroyed_framebuffers: HashSet<Slot>,
        fence_reset: bool,
    }

    impl FakeTarget {
        fn new(images: usize) -> (Self, Rc<RefCell<Vec<Event>>>) {
            let log = Rc::new(RefCell::new(Vec::new()));
            let target = Self {
                log: log.clone(),
                acquires: VecDeque::new(),
                presents: VecDeque::new(),
                rebuild_sizes: VecDeque::new(),
                bundle: Some(Bundle::build(0, images)),
                destroyed_framebuffers: HashSet::new(),
                fence_reset: false,
            };
            (target, log)
        }

        fn push(&self, event: Event) {
            self.log.borrow_mut().push(event);
        }

        fn bundle(&self) -> &Bundle {
            self.bundle.as_ref().expect("bundle alive")
        }
    }

    impl FrameTarget for FakeTarget {
        fn image_count(&self) -> usize {
            self.bundle().images.len()
        }

        fn reset_fence(&mut self) -> Result<()> {
            self.fence_reset = true;
            self.push(Event::ResetFence);
            Ok(())
        }

        fn acquire_next_image(&mut self) -> Result<AcquireOutcome> {
            anyhow::ensure!(self.fence_reset, "acquire with a fence that was not reset");
            self.fence_reset = false;
            self.push(Event::Acquire);
            self.acquires
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("VK_ERROR_DEVICE_LOST"))
        }

        fn record_commands(&mut self, image_index: u32) -> Result<()> {
            let bundle = self.bundle();
            let framebuffer = bundle.framebuffers[image_index as usize];
            let command_buffer = bundle.command_buffers[image_index as usize];
            anyhow::ensure!(
                !self.destroyed_framebuffers.contains(&framebuffer),
                "recorded against destroyed framebuffer {:?}",
                framebuffer
            );
            self.push(Event::Record {
                framebuffer,
                command_buffer,
            });
            Ok(())
        }

        fn submit(&mut self, image_index: u32) -> Result<()> {
            let command_buffer = self.bundle().command_buffers[image_index as usize];
            self.push(Event::Submit { command_buffer });
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
            self.push(Event::Present { image_index });
            self.presents
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("VK_ERROR_SURFACE_LOST_KHR"))
        }

        fn finish_frame(&mut self, image_index: u32) -> Result<()> {
            let command_buffer = self.bundle().command_buffers[image_index as usize];
            self.push(Event::Finish { command_buffer });
            Ok(())
        }

        fn recreate_swapchain(&mut self) -> Result<()> {
            self.push(Event::WaitDeviceIdle);
            let old = self.bundle.take().expect("bundle alive");
            self.destroyed_framebuffers.extend(old.framebuffers.iter().copied());
            self.push(Event::DestroyBundle {
                generation: old.generation,
            });

            let images = self.rebuild_sizes.pop_front().unwrap_or(old.images.len());
            let generation = old.generation + 1;
            self.push(Event::BuildBundle { generation, images });
            self.bundle = Some(Bundle::build(generation, images));
            Ok(())
        }

        fn wait_queue_idle(&mut self) -> Result<()> {
            self.push(Event::WaitQueueIdle);
            Ok(())
        }
    }

    impl Drop for FakeTarget {
        fn drop(&mut self) {
            self.push(Event::DestroySync);
        }
    }

    fn ready(image_index: u32) -> AcquireOutcome {
        AcquireOutcome::Ready {
            image_index,
            suboptimal: false,
        }
    }

    const PRESENTED: PresentOutcome = PresentOutcome::Presented { suboptimal: false };

    #[test]
    fn test_acquired_index_drives_record_submit_and_present() {
        let (mut target, log) = FakeTarget::new(3);
        target.acquires.push_back(ready(2));
        target.presents.push_back(PRESENTED);

        let mut frames = FrameLoop::new();
        let outcome = frames.run_frame(&mut target).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented { image_index: 2 });
        assert_eq!(frames.state(), FrameState::Idle);
        assert_eq!(
            *log.borrow(),
            vec![
                Event::ResetFence,
                Event::Acquire,
                Event::Record {
                    framebuffer: (0, 2),
                    command_buffer: (0, 2)
                },
                Event::Submit {
                    command_buffer: (0, 2)
                },
                Event::Present { image_index: 2 },
                Event::Finish {
                    command_buffer: (0, 2)
                },
            ]
        );
    }

    #[test]
    fn test_fence_is_reset_before_every_acquire() {
        let (mut target, log) = FakeTarget::new(2);
        for i in [0, 1, 0, 1] {
            target.acquires.push_back(ready(i));
            target.presents.push_back(PRESENTED);
        }

        let mut frames = FrameLoop::new();
        for _ in 0..4 {
            frames.run_frame(&mut target).unwrap();
        }

        let log = log.borrow();
        let acquires: Vec<usize> = log
            .iter()
            .enumerate()
            .filter(|(_, e)| **e == Event::Acquire)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(acquires.len(), 4);
        for i in acquires {
            assert_eq!(log[i - 1], Event::ResetFence);
        }
        assert_eq!(frames.frames_presented(), 4);
    }

    #[test]
    fn test_out_of_date_present_rebuilds_before_next_record() {
        let (mut target, log) = FakeTarget::new(3);
        target.acquires.push_back(ready(1));
        target.presents.push_back(PresentOutcome::OutOfDate);
        target.rebuild_sizes.push_back(2);
        target.acquires.push_back(ready(1));
        target.presents.push_back(PRESENTED);

        let mut frames = FrameLoop::new();
        let first = frames.run_frame(&mut target).unwrap();
        assert_eq!(first, FrameOutcome::Recreated { image_index: Some(1) });
        assert_eq!(frames.recreations(), 1);
        assert_eq!(target.image_count(), 2);

        let second = frames.run_frame(&mut target).unwrap();
        assert_eq!(second, FrameOutcome::Presented { image_index: 1 });

        let log = log.borrow();
        let destroy = log
            .iter()
            .position(|e| *e == Event::DestroyBundle { generation: 0 })
            .unwrap();
        let build = log
            .iter()
            .position(|e| matches!(e, Event::BuildBundle { generation: 1, images: 2 }))
            .unwrap();
        let finish = log
            .iter()
            .position(|e| *e == Event::Finish { command_buffer: (0, 1) })
            .unwrap();

        assert_eq!(log[destroy - 1], Event::WaitDeviceIdle);
        assert!(finish < destroy, "old command buffer reset before the bundle goes away");
        assert!(destroy < build);
        assert!(log[build..].contains(&Event::Record {
            framebuffer: (1, 1),
            command_buffer: (1, 1)
        }));
    }

    #[test]
    fn test_recreated_bundle_matches_image_count() {
        let (mut target, _log) = FakeTarget::new(3);
        let mut frames = FrameLoop::new();

        for size in [2, 4, 3] {
            target.acquires.push_back(ready(0));
            target.presents.push_back(PresentOutcome::OutOfDate);
            target.rebuild_sizes.push_back(size);
            frames.run_frame(&mut target).unwrap();

            let bundle = target.bundle();
            assert_eq!(target.image_count(), size);
            assert_eq!(bundle.views.len(), size);
            assert_eq!(bundle.framebuffers.len(), size);
            assert_eq!(bundle.command_buffers.len(), size);
        }
        assert_eq!(frames.recreations(), 3);
    }

    #[test]
    fn test_out_of_date_acquire_skips_recording() {
        let (mut target, log) = FakeTarget::new(3);
        target.acquires.push_back(AcquireOutcome::OutOfDate);

        let mut frames = FrameLoop::new();
        let outcome = frames.run_frame(&mut target).unwrap();

        assert_eq!(outcome, FrameOutcome::Recreated { image_index: None });
        assert_eq!(frames.frames_presented(), 0);
        assert!(!log
            .borrow()
            .iter()
            .any(|e| matches!(e, Event::Record { .. } | Event::Submit { .. })));
    }

    #[test]
    fn test_suboptimal_is_not_a_rebuild() {
        let (mut target, _log) = FakeTarget::new(2);
        target.acquires.push_back(AcquireOutcome::Ready {
            image_index: 0,
            suboptimal: true,
        });
        target.presents.push_back(PresentOutcome::Presented { suboptimal: true });

        let mut frames = FrameLoop::new();
        assert_eq!(
            frames.run_frame(&mut target).unwrap(),
            FrameOutcome::Presented { image_index: 0 }
        );
        assert_eq!(frames.recreations(), 0);
    }

    #[test]
    fn test_acquire_failure_is_fatal_and_sticky() {
        let (mut target, _log) = FakeTarget::new(2);

        let mut frames = FrameLoop::new();
        let err = frames.run_frame(&mut target).unwrap_err();
        assert!(err.to_string().contains("DEVICE_LOST"));
        assert_eq!(frames.state(), FrameState::Acquiring);

        target.acquires.push_back(ready(0));
        assert!(frames.run_frame(&mut target).is_err());
    }

    #[test]
    fn test_present_failure_is_fatal() {
        let (mut target, _log) = FakeTarget::new(2);
        target.acquires.push_back(ready(1));

        let mut frames = FrameLoop::new();
        assert!(frames.run_frame(&mut target).is_err());
        assert_eq!(frames.state(), FrameState::Presenting { image_index: 1 });
        assert_eq!(frames.recreations(), 0);
    }

    #[test]
    fn test_out_of_range_image_index_is_rejected() {
        let (mut target, log) = FakeTarget::new(2);
        target.acquires.push_back(ready(5));

        let mut frames = FrameLoop::new();
        assert!(frames.run_frame(&mut target).is_err());
        assert!(!log.borrow().iter().any(|e| matches!(e, Event::Record { .. })));
    }

    #[test]
    fn test_shutdown_waits_for_queue_before_releasing() {
        let (mut target, log) = FakeTarget::new(2);
        target.acquires.push_back(ready(0));
        target.presents.push_back(PRESENTED);

        let mut frames = FrameLoop::new();
        frames.run_frame(&mut target).unwrap();
        frames.shutdown(target).unwrap();

        let log = log.borrow();
        assert_eq!(
            &log[log.len() - 2..],
            &[Event::WaitQueueIdle, Event::DestroySync]
        );
    }
}
