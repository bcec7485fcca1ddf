pub mod action;
pub mod constraints;
pub mod coverage;
pub mod domain;
pub mod engine;
pub mod memory;
pub mod mutator;
pub mod narration;
pub mod ports;
pub mod prompt;
pub mod selector;
pub mod session;

pub use action::{parse_actions, parse_directives, Action, ActionKind};
pub use constraints::Constraints;
pub use domain::{Course, Draft, DraftStatus, FacultyProfile, Part, Question, QuestionId};
pub use engine::ActionEngine;
pub use narration::Narration;
pub use ports::{
    DraftRepository, FacultyDirectory, PaperRenderer, PortError, PortResult, QuestionBank,
    TextCompletionService,
};
pub use session::{ChatOutcome, DraftLocator, DraftSession, SessionError};
