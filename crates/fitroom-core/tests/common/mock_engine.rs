//! Scriptable in-process engine that records every hook call.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fitroom_core::engine::{EngineError, InferenceEngine, PreparedInput, RawOutput, SubjectMesh};
use fitroom_core::intake::InputImage;
use fitroom_core::mask::MaskCandidate;

type Hook = Box<dyn FnOnce() + Send>;

/// Shared log of engine calls across every mock in a test.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    resident: AtomicUsize,
    max_resident: AtomicUsize,
    alpha_coverage: Mutex<Vec<f64>>,
    seeds: Mutex<Vec<u64>>,
    segment_hook: Mutex<Option<Hook>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Highest number of engines ever loaded at the same time.
    pub fn max_resident(&self) -> usize {
        self.max_resident.load(Ordering::SeqCst)
    }

    pub fn resident(&self) -> usize {
        self.resident.load(Ordering::SeqCst)
    }

    /// Alpha coverage of every prepared input passed to `run`.
    pub fn alpha_coverage(&self) -> Vec<f64> {
        self.alpha_coverage.lock().unwrap().clone()
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.seeds.lock().unwrap().clone()
    }

    /// Run `hook` once, the next time any mock segments an image.
    pub fn on_segment(&self, hook: impl FnOnce() + Send + 'static) {
        *self.segment_hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct MockEngine {
    name: &'static str,
    recorder: Arc<Recorder>,
    loaded: bool,
    candidates: Vec<MaskCandidate>,
    subjects: Vec<SubjectMesh>,
    run_error: Option<EngineError>,
    load_error: Option<EngineError>,
    panic_on_run: bool,
    lose_on_run: bool,
    run_delay: Duration,
}

impl MockEngine {
    pub fn new(name: &'static str, recorder: &Arc<Recorder>) -> Self {
        Self {
            name,
            recorder: Arc::clone(recorder),
            loaded: false,
            candidates: Vec::new(),
            subjects: vec![triangle(0.0)],
            run_error: None,
            load_error: None,
            panic_on_run: false,
            lose_on_run: false,
            run_delay: Duration::ZERO,
        }
    }

    pub fn with_candidates(mut self, candidates: Vec<MaskCandidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_subjects(mut self, subjects: Vec<SubjectMesh>) -> Self {
        self.subjects = subjects;
        self
    }

    pub fn failing_run(mut self, error: EngineError) -> Self {
        self.run_error = Some(error);
        self
    }

    pub fn failing_load(mut self, error: EngineError) -> Self {
        self.load_error = Some(error);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_run = true;
        self
    }

    /// The first run fails the way a crashed worker does and drops the weights.
    pub fn losing_worker(mut self) -> Self {
        self.lose_on_run = true;
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }
}

impl InferenceEngine for MockEngine {
    fn load(&mut self) -> Result<(), EngineError> {
        self.recorder.push(format!("load {}", self.name));
        if let Some(e) = self.load_error.clone() {
            return Err(e);
        }
        let now = self.recorder.resident.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder.max_resident.fetch_max(now, Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    fn unload(&mut self) {
        if self.loaded {
            self.recorder.resident.fetch_sub(1, Ordering::SeqCst);
            self.loaded = false;
        }
        self.recorder.push(format!("unload {}", self.name));
    }

    fn run(&mut self, input: &PreparedInput) -> Result<RawOutput, EngineError> {
        assert!(self.loaded, "run on unloaded {} engine", self.name);
        self.recorder.push(format!("run {}", self.name));
        self.recorder.alpha_coverage.lock().unwrap().push(input.alpha_coverage());
        self.recorder.seeds.lock().unwrap().push(input.seed);
        std::thread::sleep(self.run_delay);
        if self.panic_on_run {
            panic!("mock {} engine crashed", self.name);
        }
        if std::mem::take(&mut self.lose_on_run) {
            self.recorder.resident.fetch_sub(1, Ordering::SeqCst);
            self.loaded = false;
            return Err(EngineError::Protocol("worker closed its output".into()));
        }
        if let Some(e) = self.run_error.clone() {
            return Err(e);
        }
        Ok(RawOutput {
            subjects: self.subjects.clone(),
        })
    }

    fn still_loaded(&mut self) -> bool {
        self.loaded
    }

    fn segment_candidates(&mut self, _image: &InputImage) -> Vec<MaskCandidate> {
        self.recorder.push(format!("segment {}", self.name));
        let hook = self.recorder.segment_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.candidates.clone()
    }
}

/// Single-triangle mesh shifted along X.
pub fn triangle(x: f32) -> SubjectMesh {
    SubjectMesh {
        vertices: vec![[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 1.0, 0.0]],
        faces: vec![[0, 1, 2]],
    }
}
