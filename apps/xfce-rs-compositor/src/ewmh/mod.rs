pub mod atoms;
pub mod selection;
