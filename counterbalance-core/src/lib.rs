//! Counterbalance Core - Assignment Types
//!
//! Pure data structures and the two pure rules of the service: least-loaded
//! group selection and latin-square rotation. Storage, locking and HTTP live
//! in the other crates; everything here is deterministic given its inputs.

pub mod balance;
pub mod error;
pub mod group;
pub mod identity;
pub mod lock;
pub mod record;
pub mod results;
pub mod rotation;

pub use balance::{choose_least_loaded, least_loaded};
pub use error::{AssignmentError, AssignmentResult};
pub use group::{GroupId, GroupSet, MAX_GROUP_ID_LEN};
pub use identity::{AssignmentId, ResultId, Timestamp};
pub use lock::{advisory_lock_key, AdvisoryLockName};
pub use record::{AssignmentRecord, GroupLoad};
pub use results::{
    ParticipantProfile, ParticipantResults, ProgrammingLanguage, QuestionResult,
    ResultsSubmission, Sex, SexParseError,
};
pub use rotation::{
    latin_square_rotation, question_order, syntax_order, Rotation, StimulusCounts,
    MAX_STIMULUS_COUNT,
};
