use serde::Serialize;
use uuid::Uuid;

use crate::analysis::ImageAnalysis;
use crate::chat::ChatLog;
use crate::image_data::ImagePayload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Upload,
    Analyzing,
    Results,
}

/// Everything that can legally move the session. Any other combination
/// of state and event is ignored.
#[derive(Debug)]
pub enum SessionEvent {
    ImageSelected(ImagePayload),
    AnalysisSucceeded(ImageAnalysis),
    AnalysisFailed,
    Reset,
}

/// The single-flow state. Invariants: `image` is present whenever the
/// step is `analyzing` or `results`; `analysis` only in `results`; the
/// description is non-empty only in `results`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub step: Step,
    pub image: Option<ImagePayload>,
    pub analysis: Option<ImageAnalysis>,
    pub description: String,
}

impl SessionState {
    pub fn initial() -> Self {
        Self {
            step: Step::Upload,
            image: None,
            analysis: None,
            description: String::new(),
        }
    }
}

/// Pure transition function. Analysis failure discards the image;
/// analysis success seeds the editable description from the decoded
/// prompt; reset clears everything unconditionally.
pub fn apply(state: SessionState, event: SessionEvent) -> SessionState {
    match (state.step, event) {
        (Step::Upload, SessionEvent::ImageSelected(image)) => SessionState {
            step: Step::Analyzing,
            image: Some(image),
            analysis: None,
            description: String::new(),
        },
        (Step::Analyzing, SessionEvent::AnalysisSucceeded(analysis)) => SessionState {
            step: Step::Results,
            image: state.image,
            description: analysis.prompt.clone(),
            analysis: Some(analysis),
        },
        (Step::Analyzing, SessionEvent::AnalysisFailed) => SessionState::initial(),
        (_, SessionEvent::Reset) => SessionState::initial(),
        (_, _) => state,
    }
}

/// Operations that allow at most one in-flight call per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Refine,
    Remix,
    Chat,
}

#[derive(Debug, Default)]
struct InFlight {
    refine: bool,
    remix: bool,
    chat: bool,
}

impl InFlight {
    fn flag(&mut self, op: Operation) -> &mut bool {
        match op {
            Operation::Refine => &mut self.refine,
            Operation::Remix => &mut self.remix,
            Operation::Chat => &mut self.chat,
        }
    }
}

/// One user's session: the state machine, the chat log, the in-flight
/// guards and an epoch counter. The epoch bumps on every reset so that
/// a remote result resolving late can be recognized as stale and
/// dropped instead of overwriting a fresh session.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    state: SessionState,
    pub chat: ChatLog,
    epoch: u64,
    in_flight: InFlight,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::initial(),
            chat: ChatLog::new(),
            epoch: 0,
            in_flight: InFlight::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn handle(&mut self, event: SessionEvent) {
        if matches!(event, SessionEvent::Reset) {
            self.epoch += 1;
        }
        self.state = apply(std::mem::replace(&mut self.state, SessionState::initial()), event);
    }

    /// Claims the in-flight slot for `op`. Returns false when a call of
    /// the same kind is already outstanding.
    pub fn try_begin(&mut self, op: Operation) -> bool {
        let flag = self.in_flight.flag(op);
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    pub fn finish(&mut self, op: Operation) {
        *self.in_flight.flag(op) = false;
    }

    pub fn set_description(&mut self, description: String) {
        self.state.description = description;
    }

    /// Swaps in a remixed image. Only meaningful in `results`; the step
    /// and analysis stay put.
    pub fn replace_image(&mut self, image: ImagePayload) {
        if self.state.step == Step::Results {
            self.state.image = Some(image);
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
