pub mod context;
pub mod error;
pub mod event_loop;
pub mod sequence;
