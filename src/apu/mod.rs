/*!
Audio-unit cores.

- `PULSE` synthesizes the two square channels into a 44.1 kHz sample queue.
  Triangle, noise and DMC registers are accepted and tracked but not
  mixed.
- `MUTE` queues silence at the same pacing. Register, status and frame-IRQ
  behavior is identical, so swapping to it only changes what comes out of
  the speaker.

Both wrap [`state::ApuState`], which owns the register file, length
counters, frame sequencer and sample pacing.
*/

use crate::cores::AudioCore;
use crate::registry::Factory;

mod mute;
mod pulse;
mod state;

pub use mute::new_mute;
pub use pulse::new_pulse;

pub const AUDIO_CORES: &[(&str, Factory<dyn AudioCore>)] =
    &[("PULSE", new_pulse), ("MUTE", new_mute)];

pub const AUDIO_PREFERENCE: &[&str] = &["PULSE", "MUTE"];
