//! Raw command bytes understood by P-touch printers.
//!
//! Every command is sent as its own discrete write. The printer never acknowledges a command;
//! the only reply it ever produces is the 32-byte status frame.

/// Number of zero bytes sent at startup to flush whatever half-received job the printer may hold.
pub const WAKE_LEN: usize = 200;

/// `ESC @`: clear the device state.
pub const RESET: [u8; 2] = [0x1b, b'@'];

/// `ESC i S`: request a status frame.
pub const STATUS_QUERY: [u8; 3] = [0x1b, b'i', b'S'];

/// `ESC i M`: auto cut with a small feed amount.
pub const SET_AUTO_CUT: [u8; 4] = [0x1b, b'i', b'M', 0x48];

/// `ESC i K`: cut all the way through after every print.
pub const SET_FULL_CUT: [u8; 4] = [0x1b, b'i', b'K', 0x08];

/// `M`: select TIFF (RLE) compression. Raster lines are still sent uncompressed,
/// which the printer accepts in this mode.
pub const SET_COMPRESSION: [u8; 2] = [b'M', 0x02];

/// Header of a raster line: `G`, two length bytes and a fixed flag byte.
pub const RASTER_LINE_HEADER: [u8; 4] = [b'G', 0x11, 0x00, 0x0f];

/// `Ctrl-Z`: print the buffered raster lines, then feed and cut.
pub const END_OF_PRINT: [u8; 1] = [0x1a];

/// The startup flush: [`WAKE_LEN`] zero bytes.
pub fn wake() -> Vec<u8> {
    vec![0x00; WAKE_LEN]
}
