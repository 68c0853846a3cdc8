//! The `_NET_WM_CM_Sn` manager selection that marks the running compositor.

use tracing::info;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ConnectionExt, CreateWindowAux, EventMask, PropMode, Window, WindowClass,
};
use x11rb::wrapper::ConnectionExt as _;

use crate::core::context::Context;
use crate::core::error::{CompositorError, Result};

pub const COMPOSITOR_NAME: &str = "xfce-rs-compositor";

/// A claimed selection: the atom and the window that holds it.
#[derive(Debug, Clone, Copy)]
pub struct CmSelection {
    pub atom: u32,
    pub owner: Window,
}

/// Claim `_NET_WM_CM_S<screen>`. Fails with the current owner's name if
/// another compositor already holds it.
pub fn claim_cm_selection(ctx: &Context) -> Result<CmSelection> {
    let atom_name = format!("_NET_WM_CM_S{}", ctx.screen_num);
    let atom = ctx.conn.intern_atom(false, atom_name.as_bytes())?.reply()?.atom;

    let current = ctx.conn.get_selection_owner(atom)?.reply()?.owner;
    if current != x11rb::NONE {
        let owner = window_name(ctx, current).unwrap_or_else(|| format!("window {:#x}", current));
        return Err(CompositorError::AlreadyRunning { owner });
    }

    let owner = ctx.conn.generate_id()?;
    ctx.conn.create_window(
        x11rb::COPY_DEPTH_FROM_PARENT,
        owner,
        ctx.root_window,
        -1,
        -1,
        1,
        1,
        0,
        WindowClass::INPUT_ONLY,
        x11rb::COPY_FROM_PARENT,
        &CreateWindowAux::new().event_mask(EventMask::STRUCTURE_NOTIFY),
    )?;
    ctx.conn.change_property8(
        PropMode::REPLACE,
        owner,
        ctx.atoms._NET_WM_NAME,
        ctx.atoms.UTF8_STRING,
        COMPOSITOR_NAME.as_bytes(),
    )?;
    ctx.conn.change_property8(
        PropMode::REPLACE,
        owner,
        AtomEnum::WM_NAME,
        AtomEnum::STRING,
        COMPOSITOR_NAME.as_bytes(),
    )?;

    ctx.conn.set_selection_owner(owner, atom, x11rb::CURRENT_TIME)?;
    let new_owner = ctx.conn.get_selection_owner(atom)?.reply()?.owner;
    if new_owner != owner {
        let owner = window_name(ctx, new_owner).unwrap_or_else(|| format!("window {:#x}", new_owner));
        return Err(CompositorError::AlreadyRunning { owner });
    }

    info!("Acquired composite manager selection {}", atom_name);
    Ok(CmSelection { atom, owner })
}

/// `_NET_WM_NAME`, falling back to `WM_NAME`.
fn window_name(ctx: &Context, window: Window) -> Option<String> {
    let candidates = [
        (ctx.atoms._NET_WM_NAME, ctx.atoms.UTF8_STRING),
        (u32::from(AtomEnum::WM_NAME), u32::from(AtomEnum::ANY)),
    ];
    candidates.into_iter().find_map(|(property, kind)| {
        let reply = ctx.conn.get_property(false, window, property, kind, 0, 1024).ok()?.reply().ok()?;
        if reply.value.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&reply.value).into_owned())
    })
}
