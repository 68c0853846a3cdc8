pub mod backend;
pub mod damage;
pub mod event;
pub mod fade;
pub mod manager;
pub mod paint;
pub mod region;
pub mod render;
pub mod settings;
pub mod shadow;
pub mod store;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

/// Opacity value of a fully opaque window, as in `_NET_WM_WINDOW_OPACITY`.
pub const OPAQUE: u32 = u32::MAX;
