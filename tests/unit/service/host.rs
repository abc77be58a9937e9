use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::Receiver;

use super::*;
use crate::composite::layout::AlphaLayout;
use crate::foundation::core::Size;

enum Gate {
    Pass,
    Panic,
}

/// Holds every frame until the test opens the gate.
struct GateProcessor {
    gate: Receiver<Gate>,
}

impl FrameProcessor for GateProcessor {
    fn process_frame(
        &mut self,
        _geometry: &FrameGeometry,
        input: FrameInput,
    ) -> DualframeResult<RgbaFrame> {
        match self.gate.recv() {
            Ok(Gate::Panic) => panic!("injected fault"),
            Ok(Gate::Pass) | Err(_) => Ok(RgbaFrame {
                width: 1,
                height: 1,
                data: input.color.into_vec(),
            }),
        }
    }

    fn process_frames(
        &mut self,
        geometry: &FrameGeometry,
        frames: Vec<FrameInput>,
        _on_progress: &mut dyn FnMut(f32),
        _is_cancelled: &dyn Fn() -> bool,
    ) -> DualframeResult<Vec<RgbaFrame>> {
        frames
            .into_iter()
            .map(|f| self.process_frame(geometry, f))
            .collect()
    }

    fn clear_memory(&mut self) {}
}

fn gated(opts: ServiceOpts, gate: Receiver<Gate>, builds: Arc<AtomicUsize>) -> CompositeService {
    CompositeService::with_processor(opts, move || {
        builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(GateProcessor { gate: gate.clone() }) as Box<dyn FrameProcessor>)
    })
    .unwrap()
}

fn geom() -> FrameGeometry {
    let s = Size::new(1, 1).unwrap();
    FrameGeometry {
        source: s,
        target: s,
        layout: AlphaLayout::Separate,
    }
}

fn input(tag: u8) -> FrameInput {
    FrameInput::separate(vec![tag, 0, 0, 0], vec![255, 0, 0, 0])
}

#[test]
fn opts_load_from_partial_json() {
    let opts = ServiceOpts::from_json(
        r#"{ "queue_capacity": 4, "compositor": { "sampling": "bilinear" } }"#,
    )
    .unwrap();
    assert_eq!(opts.queue_capacity, 4);
    assert_eq!(opts.thread_name, "dualframe-worker");
    assert_eq!(
        opts.compositor.sampling,
        crate::composite::sample::Sampling::Bilinear
    );
    assert_eq!(
        opts.compositor.parallel_rows_threshold,
        CompositorOpts::default().parallel_rows_threshold
    );
}

#[test]
fn opts_reject_bad_values() {
    assert!(matches!(
        ServiceOpts::from_json(r#"{ "thread_name": " " }"#),
        Err(DualframeError::Validation(_))
    ));
    assert!(matches!(
        ServiceOpts::from_json(r#"{ "compositor": { "threads": 0 } }"#),
        Err(DualframeError::Validation(_))
    ));
    assert!(matches!(
        ServiceOpts::from_json("{ nope"),
        Err(DualframeError::Serde(_))
    ));
    assert!(matches!(
        ServiceOpts::from_path("/definitely/not/here.json"),
        Err(DualframeError::Other(_))
    ));
}

#[test]
fn worker_starts_lazily_and_ids_increase() {
    let svc = CompositeService::open(ServiceOpts::default()).unwrap();
    assert_eq!(
        svc.status(),
        ServiceStatus {
            initialized: false,
            pending: 0
        }
    );

    let a = svc.clear_memory();
    let b = svc.clear_memory();
    assert!(a.id() < b.id());
    a.wait().unwrap();
    b.wait().unwrap();
    assert_eq!(
        svc.status(),
        ServiceStatus {
            initialized: true,
            pending: 0
        }
    );
}

#[test]
fn concurrent_first_calls_start_one_worker() {
    let builds = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&builds);
    let svc = Arc::new(
        CompositeService::with_processor(ServiceOpts::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Compositor::new(CompositorOpts::default())?) as Box<dyn FrameProcessor>)
        })
        .unwrap(),
    );

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let svc = Arc::clone(&svc);
            std::thread::spawn(move || svc.clear_memory().wait())
        })
        .collect();
    for t in threads {
        t.join().unwrap().unwrap();
    }
    assert_eq!(builds.load(Ordering::SeqCst), 1);
}

#[test]
fn worker_fault_rejects_all_pending_and_next_call_restarts() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let builds = Arc::new(AtomicUsize::new(0));
    let svc = gated(ServiceOpts::default(), rx, Arc::clone(&builds));

    let h1 = svc.process_frame(geom(), input(1));
    let h2 = svc.process_frame(geom(), input(2));
    assert_eq!(svc.status().pending, 2);

    tx.send(Gate::Panic).unwrap();
    assert!(matches!(
        h1.wait(),
        Err(CompositeError::WorkerFault(m)) if m.contains("injected fault")
    ));
    assert!(matches!(h2.wait(), Err(CompositeError::WorkerFault(_))));
    assert_eq!(
        svc.status(),
        ServiceStatus {
            initialized: false,
            pending: 0
        }
    );

    tx.send(Gate::Pass).unwrap();
    let h3 = svc.process_frame(geom(), input(3));
    assert_eq!(h3.wait().unwrap().data, vec![3, 0, 0, 0]);
    assert_eq!(builds.load(Ordering::SeqCst), 2);
}

#[test]
fn cancelled_task_is_skipped_by_worker() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let svc = gated(ServiceOpts::default(), rx, Arc::new(AtomicUsize::new(0)));

    let h1 = svc.process_frame(geom(), input(1));
    let h2 = svc.process_frame(geom(), input(2));
    h2.cancel();
    tx.send(Gate::Pass).unwrap();

    assert_eq!(h1.wait().unwrap().data, vec![1, 0, 0, 0]);
    assert_eq!(h2.wait(), Err(CompositeError::Cancelled));
}

#[test]
fn dispose_rejects_pending_with_disposed() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let svc = Arc::new(gated(
        ServiceOpts::default(),
        rx,
        Arc::new(AtomicUsize::new(0)),
    ));

    let h1 = svc.process_frame(geom(), input(1));
    let h2 = svc.process_frame(geom(), input(2));
    let disposer = {
        let svc = Arc::clone(&svc);
        std::thread::spawn(move || svc.dispose())
    };

    assert_eq!(h1.wait(), Err(CompositeError::Disposed));
    assert_eq!(h2.wait(), Err(CompositeError::Disposed));
    // Release the frame the worker is stuck on so it can observe the closed queue.
    tx.send(Gate::Pass).unwrap();
    disposer.join().unwrap();

    assert_eq!(
        svc.status(),
        ServiceStatus {
            initialized: false,
            pending: 0
        }
    );
}

#[test]
fn full_queue_fails_submission_without_blocking() {
    let (tx, rx) = crossbeam_channel::unbounded();
    let opts = ServiceOpts {
        queue_capacity: 1,
        ..ServiceOpts::default()
    };
    let svc = gated(opts, rx, Arc::new(AtomicUsize::new(0)));

    let h1 = svc.process_frame(geom(), input(1));
    let _h2 = svc.process_frame(geom(), input(2));
    let h3 = svc.process_frame(geom(), input(3));
    assert_eq!(
        h3.wait(),
        Err(CompositeError::task("worker queue is full"))
    );

    for _ in 0..2 {
        tx.send(Gate::Pass).unwrap();
    }
    assert!(h1.wait().is_ok());
}

#[test]
fn panicking_progress_callback_fails_only_its_task() {
    let svc = CompositeService::open(ServiceOpts::default()).unwrap();
    let frames = (0..3).map(input).collect();
    let progress: ProgressFn = Box::new(|_| panic!("callback blew up"));

    let batch = svc.process_frames(geom(), frames, Some(progress));
    assert!(matches!(
        batch.wait(),
        Err(CompositeError::Task(m)) if m.contains("callback blew up")
    ));

    svc.clear_memory().wait().unwrap();
    let frame = svc.process_frame(geom(), input(9)).wait().unwrap();
    assert_eq!(frame.data, vec![9, 0, 0, 255]);
    assert_eq!(
        svc.status(),
        ServiceStatus {
            initialized: true,
            pending: 0
        }
    );
}

#[test]
fn progress_callback_may_call_back_into_the_service() {
    let svc = Arc::new(CompositeService::open(ServiceOpts::default()).unwrap());
    let weak = Arc::downgrade(&svc);
    let nested = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&nested);
    let progress: ProgressFn = Box::new(move |_| {
        if let Some(svc) = weak.upgrade() {
            let status = svc.status();
            sink.lock().push((status.initialized, svc.clear_memory()));
        }
    });

    let frames = (0..3).map(input).collect();
    let out = svc
        .process_frames(geom(), frames, Some(progress))
        .wait()
        .unwrap();
    assert_eq!(out.len(), 3);

    let nested: Vec<_> = std::mem::take(&mut *nested.lock());
    assert_eq!(nested.len(), 3);
    for (initialized, handle) in nested {
        assert!(initialized);
        handle.wait().unwrap();
    }
}
