//! Translation between russh wire types and the bastion's channel model.

use russh::{Pty, Sig};

/// Returns the wire name of `signal`, without the `SIG` prefix.
pub(super) fn signal_name(signal: &Sig) -> String {
    let name = match signal {
        Sig::ABRT => "ABRT",
        Sig::ALRM => "ALRM",
        Sig::FPE => "FPE",
        Sig::HUP => "HUP",
        Sig::ILL => "ILL",
        Sig::INT => "INT",
        Sig::KILL => "KILL",
        Sig::PIPE => "PIPE",
        Sig::QUIT => "QUIT",
        Sig::SEGV => "SEGV",
        Sig::TERM => "TERM",
        Sig::USR1 => "USR1",
        Sig::Custom(name) => name.as_str(),
    };
    name.to_owned()
}

/// Parses a wire signal name; unrecognised names are carried verbatim.
pub(super) fn signal_from_name(name: &str) -> Sig {
    match name {
        "ABRT" => Sig::ABRT,
        "ALRM" => Sig::ALRM,
        "FPE" => Sig::FPE,
        "HUP" => Sig::HUP,
        "ILL" => Sig::ILL,
        "INT" => Sig::INT,
        "KILL" => Sig::KILL,
        "PIPE" => Sig::PIPE,
        "QUIT" => Sig::QUIT,
        "SEGV" => Sig::SEGV,
        "TERM" => Sig::TERM,
        "USR1" => Sig::USR1,
        other => Sig::Custom(other.to_owned()),
    }
}

pub(super) fn modes_to_wire(modes: &[(Pty, u32)]) -> Vec<(u8, u32)> {
    modes.iter().map(|(mode, value)| (*mode as u8, *value)).collect()
}

/// Drops opcodes russh does not know; the backend would ignore them anyway.
pub(super) fn modes_from_wire(modes: &[(u8, u32)]) -> Vec<(Pty, u32)> {
    modes
        .iter()
        .filter_map(|(opcode, value)| Pty::from_u8(*opcode).map(|mode| (mode, *value)))
        .collect()
}
