use tracing::info;
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::composite::{self, ConnectionExt as _};
use x11rb::protocol::damage::{self, ConnectionExt as _};
use x11rb::protocol::render::{self, ConnectionExt as _};
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ChangeWindowAttributesAux, ConnectionExt as _, EventMask, Visualid, Window};
use x11rb::rust_connection::RustConnection;

use crate::core::error::{CompositorError, Result};
use crate::ewmh::atoms::AtomCollection;

pub struct Context {
    pub conn: RustConnection,
    pub screen_num: usize,
    pub root_window: Window,
    pub root_visual: Visualid,
    pub root_depth: u8,
    pub atoms: AtomCollection,
    pub screen_width: u16,
    pub screen_height: u16,
}

impl Context {
    /// Connect to `display` (or `$DISPLAY`) and make sure every extension
    /// the compositor depends on is present in a usable version.
    pub fn new(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display)?;

        require_extension(&conn, composite::X11_EXTENSION_NAME)?;
        require_extension(&conn, damage::X11_EXTENSION_NAME)?;
        require_extension(&conn, xfixes::X11_EXTENSION_NAME)?;
        require_extension(&conn, render::X11_EXTENSION_NAME)?;
        require_extension(&conn, shape::X11_EXTENSION_NAME)?;

        // The overlay window needs Composite 0.3.
        let composite = conn.composite_query_version(0, 4)?.reply()?;
        if (composite.major_version, composite.minor_version) < (0, 3) {
            return Err(CompositorError::MissingExtension("Composite 0.3"));
        }
        let damage = conn.damage_query_version(1, 1)?.reply()?;
        let xfixes = conn.xfixes_query_version(5, 0)?.reply()?;
        if xfixes.major_version < 2 {
            return Err(CompositorError::MissingExtension("XFixes 2.0"));
        }
        let render = conn.render_query_version(0, 11)?.reply()?;
        conn.shape_query_version()?.reply()?;
        info!(
            "Composite {}.{}, Damage {}.{}, XFixes {}.{}, Render {}.{}",
            composite.major_version,
            composite.minor_version,
            damage.major_version,
            damage.minor_version,
            xfixes.major_version,
            xfixes.minor_version,
            render.major_version,
            render.minor_version
        );

        let screen = &conn.setup().roots[screen_num];
        let root_window = screen.root;
        let root_visual = screen.root_visual;
        let root_depth = screen.root_depth;
        let screen_width = screen.width_in_pixels;
        let screen_height = screen.height_in_pixels;

        let atoms = AtomCollection::new(&conn)?.reply()?;

        let values = ChangeWindowAttributesAux::new().event_mask(
            EventMask::SUBSTRUCTURE_NOTIFY
                | EventMask::EXPOSURE
                | EventMask::STRUCTURE_NOTIFY
                | EventMask::PROPERTY_CHANGE,
        );
        conn.change_window_attributes(root_window, &values)?;

        Ok(Self {
            conn,
            screen_num,
            root_window,
            root_visual,
            root_depth,
            atoms,
            screen_width,
            screen_height,
        })
    }
}

fn require_extension(conn: &RustConnection, name: &'static str) -> Result<()> {
    conn.extension_information(name)?
        .map(|_| ())
        .ok_or(CompositorError::MissingExtension(name))
}
