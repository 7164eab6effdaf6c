/*!
Crate-wide error taxonomy.

Bus accesses never fail (open-bus reads return a default, stray writes are
dropped), so errors here cover the edges that can legitimately refuse:
cartridge construction, snapshot decoding, and core swaps. CPU faults are
not errors at all; they travel as `CpuStep` values through the scheduler.
*/

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmuError>;

#[derive(Debug, Error)]
pub enum EmuError {
    /// The ROM parsed but names a mapper this build has no implementation for.
    /// Fatal for that ROM; the console converts it into a diagnostic screen.
    #[error("mapper {id} is not supported")]
    UnsupportedMapper { id: u8 },

    /// The ROM image itself is malformed (bad magic, truncated banks).
    #[error("invalid ROM image: {0}")]
    InvalidRom(String),

    /// A snapshot could not be decoded at all (bad JSON, wrong version).
    /// Individual field failures inside an otherwise valid snapshot are
    /// logged and skipped instead of surfacing here.
    #[error("state restore failed: {0}")]
    StateRestore(String),

    /// A core swap was requested for an id that is not registered. The
    /// previously active instance stays in effect.
    #[error("no {contract} core registered under id {id:?}")]
    SwapFailed {
        contract: &'static str,
        id: String,
    },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let e = EmuError::UnsupportedMapper { id: 77 };
        assert_eq!(e.to_string(), "mapper 77 is not supported");
        let e = EmuError::SwapFailed {
            contract: "audio",
            id: "NOPE".into(),
        };
        assert!(e.to_string().contains("audio"));
        assert!(e.to_string().contains("NOPE"));
    }
}
