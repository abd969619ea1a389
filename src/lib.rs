#[macro_use]
extern crate bitflags;

/// Connect to a Brother P-touch tape printer, watch its health and print labels with it.
pub mod printer;
