pub mod sqlite;

pub use sqlite::{
    CuratedModel, KeyValidation, NewFeedback, NewSpeech, SearchFilter, Speech, Store, StoreError,
    Workflow, WorkflowPatch, WorkflowStatus,
};
